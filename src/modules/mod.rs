//! Screen modules and the factory that builds them from the menu layout.

use std::time::Duration;

use crate::config::{MenuLayout, ModuleDependencies, ModuleKind};
use crate::menu::{MenuModule, ModuleFactory, ScreenModule};
use crate::Result;

pub mod brightness;
pub mod generic_list;
pub mod iperf;
pub mod job;
pub mod net_info;
pub mod net_settings;
pub mod netif;
pub mod ping;
pub mod status;
pub mod textbox;
pub mod throughput_client;
pub mod throughput_server;

#[cfg(test)]
pub(crate) mod testing;

pub use brightness::Brightness;
pub use generic_list::GenericList;
pub use net_info::NetInfo;
pub use net_settings::NetSettings;
pub use ping::Ping;
pub use status::{InternetStatus, NetworkStatus, SystemStatus};
pub use textbox::TextBox;
pub use throughput_client::ThroughputClient;
pub use throughput_server::ThroughputServer;

pub const DYNAMIC_STATS_SECTION: &str = "dynamic_network_stats";
pub const DYNAMIC_STATS_SCRIPT: &str = "./scripts/network-data-info.sh --interface=$INTERFACE";
pub const DYNAMIC_STATS_REFRESH: Duration = Duration::from_secs(2);

/// Ids that resolve to a compiled-in screen without any configuration.
pub const BUILTIN_IDS: [&str; 9] = [
    brightness::MODULE_ID,
    ping::MODULE_ID,
    net_settings::MODULE_ID,
    throughput_server::MODULE_ID,
    throughput_client::MODULE_ID,
    net_info::MODULE_ID,
    "network",
    "system",
    "internet",
];

pub fn builtin(id: &str, deps: &ModuleDependencies) -> Option<Box<dyn ScreenModule>> {
    let module: Box<dyn ScreenModule> = match id {
        brightness::MODULE_ID => Box::new(Brightness::new()),
        ping::MODULE_ID => Box::new(Ping::new()),
        net_settings::MODULE_ID => Box::new(NetSettings::from_deps(deps)),
        throughput_server::MODULE_ID => Box::new(ThroughputServer::from_deps(deps)),
        throughput_client::MODULE_ID => Box::new(ThroughputClient::from_deps(deps)),
        net_info::MODULE_ID => Box::new(NetInfo::new()),
        "network" => Box::new(NetworkStatus),
        "system" => Box::new(SystemStatus::new()),
        "internet" => Box::new(InternetStatus::new()),
        _ => return None,
    };
    Some(module)
}

/// `MAIN MENU` built from the layout's root entries.
pub fn root_menu(layout: &MenuLayout) -> MenuModule {
    MenuModule::root(&layout.root)
}

/// Builds configured and built-in modules on demand.
#[derive(Debug, Clone)]
pub struct BuiltinFactory {
    layout: MenuLayout,
}

impl BuiltinFactory {
    pub fn new(layout: MenuLayout) -> Self {
        Self { layout }
    }

    /// `textbox` for one interface, refreshed every two seconds.
    fn dynamic_stats(interface: &str, deps: &ModuleDependencies) -> TextBox {
        let id = format!("{interface}_dynamic_stats");
        let script = deps
            .get(DYNAMIC_STATS_SECTION, "script_path")
            .unwrap_or(DYNAMIC_STATS_SCRIPT);
        TextBox::new(&id, "$INTERFACE Stats", script)
            .with_param("INTERFACE", interface)
            .with_refresh(DYNAMIC_STATS_REFRESH)
    }
}

impl ModuleFactory for BuiltinFactory {
    fn create(&self, id: &str, deps: &ModuleDependencies) -> Result<Option<Box<dyn ScreenModule>>> {
        let Some(config) = self.layout.module(id) else {
            return Ok(builtin(id, deps));
        };
        let module: Box<dyn ScreenModule> = match config.kind() {
            ModuleKind::Menu => Box::new(MenuModule::submenu(
                id,
                &config.title,
                &config.submenus,
                self.layout.is_top_level(id),
            )),
            ModuleKind::GenericList => Box::new(GenericList::from_config(config)?),
            ModuleKind::TextBox => Box::new(TextBox::from_deps(id, &config.title, deps)),
            ModuleKind::Action => return Ok(None),
            ModuleKind::Builtin => return Ok(builtin(id, deps)),
        };
        Ok(Some(module))
    }

    fn launch(
        &self,
        kind: &str,
        param: &str,
        deps: &ModuleDependencies,
    ) -> Result<Option<Box<dyn ScreenModule>>> {
        match kind {
            "textbox" => Ok(Some(Box::new(Self::dynamic_stats(param, deps)))),
            other => self.create(other, deps),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Logger;
    use crate::config::loader;

    const LAYOUT: &str = r#"{
        "modules": [
            {"id": "tools", "title": "Tools", "type": "menu", "enabled": true,
             "submenus": [{"id": "ping", "title": "Ping"}, {"id": "playlist", "title": "Playlist"}]},
            {"id": "playlist", "title": "Playlist", "type": "GenericList", "enabled": true,
             "list_items": [{"title": "Song", "action": "true"}]},
            {"id": "broken", "title": "Broken", "type": "GenericList", "enabled": true},
            {"id": "reboot", "title": "Reboot", "type": "action", "enabled": true}
        ]
    }"#;

    fn factory() -> BuiltinFactory {
        BuiltinFactory::new(loader::parse(LAYOUT, &Logger::silent()).unwrap())
    }

    #[test]
    fn creates_configured_and_builtin_modules() {
        let deps = ModuleDependencies::default();
        let f = factory();
        assert_eq!(f.create("tools", &deps).unwrap().unwrap().id(), "tools");
        assert_eq!(f.create("playlist", &deps).unwrap().unwrap().id(), "playlist");
        assert_eq!(f.create("ping", &deps).unwrap().unwrap().id(), "ping");
        assert!(f.create("reboot", &deps).unwrap().is_none());
        assert!(f.create("nonexistent", &deps).unwrap().is_none());
        assert!(f.create("broken", &deps).is_err());
        for id in BUILTIN_IDS {
            assert_eq!(builtin(id, &deps).unwrap().id(), id);
        }
    }

    #[test]
    fn textbox_launch_builds_dynamic_stats() {
        let mut deps = ModuleDependencies::default();
        let stats = BuiltinFactory::dynamic_stats("eth0", &deps);
        assert_eq!(stats.script(), "./scripts/network-data-info.sh --interface=eth0");
        assert_eq!(stats.title(), "eth0 Stats");

        deps.add(DYNAMIC_STATS_SECTION, "script_path", "/opt/stats.sh $INTERFACE");
        let module = factory().launch("textbox", "wlan0", &deps).unwrap().unwrap();
        assert_eq!(module.id(), "wlan0_dynamic_stats");
        assert_eq!(
            BuiltinFactory::dynamic_stats("wlan0", &deps).script(),
            "/opt/stats.sh wlan0"
        );
    }
}
