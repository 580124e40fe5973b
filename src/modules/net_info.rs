//! Interface browser: every non-loopback interface, with link state and address details.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::display::center_line;
use crate::menu::list_view::SEPARATOR;
use crate::menu::{step_of, ListView, ModuleContext, ScreenModule, Transition};

use super::netif::{self, InterfaceInfo};
use super::status::compact_mac;

pub const MODULE_ID: &str = "netinfo";
const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    info: InterfaceInfo,
    link_up: bool,
}

pub struct NetInfo {
    source: fn() -> Vec<InterfaceInfo>,
    sysfs: PathBuf,
    entries: Vec<Entry>,
    list: ListView,
    /// Index of the interface whose details are shown.
    detail: Option<usize>,
    last_refresh: Instant,
}

impl Default for NetInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl NetInfo {
    pub fn new() -> Self {
        Self::with_source(netif::interfaces, PathBuf::from(netif::SYSFS_NET))
    }

    pub fn with_source(source: fn() -> Vec<InterfaceInfo>, sysfs: PathBuf) -> Self {
        Self {
            source,
            sysfs,
            entries: Vec::new(),
            list: ListView::default(),
            detail: None,
            last_refresh: Instant::now(),
        }
    }

    pub fn labels(&self) -> &[String] {
        self.list.items()
    }

    fn refresh(&mut self) {
        self.entries = (self.source)()
            .into_iter()
            .filter(|i| !i.is_loopback())
            .map(|info| Entry {
                link_up: netif::link_up(&self.sysfs, &info.name),
                info,
            })
            .collect();
        let mut labels: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("{}{}", e.info.name, if e.link_up { "*" } else { "" }))
            .collect();
        labels.push("Back".to_string());
        self.list.set_items(labels);
        self.last_refresh = Instant::now();
    }

    fn draw_details(&self, index: usize, ctx: &mut ModuleContext<'_>) {
        let Some(entry) = self.entries.get(index) else {
            return;
        };
        let info = &entry.info;
        ctx.display.clear();
        ctx.display.draw_text(0, 0, &center_line(&info.name));
        ctx.display.draw_text(0, 8, SEPARATOR);
        let link = if entry.link_up { "Up" } else { "Down" };
        ctx.display.draw_text(0, 16, &format!("Link: {link}"));
        let ip = info
            .ipv4
            .map_or_else(|| "<no ip>".to_string(), |ip| ip.to_string());
        ctx.display.draw_text(0, 24, &center_line(&ip));
        ctx.display.draw_text(0, 32, &center_line(&compact_mac(&info.mac)));
        let mask = info
            .netmask()
            .map_or_else(|| "<no netmask>".to_string(), |m| m.to_string());
        ctx.display.draw_text(0, 40, &center_line(&mask));
        ctx.display.draw_text(0, 48, "Press to return");
    }
}

impl ScreenModule for NetInfo {
    fn id(&self) -> &str {
        MODULE_ID
    }

    fn enter(&mut self, ctx: &mut ModuleContext<'_>) {
        self.detail = None;
        self.list.reset();
        self.refresh();
        ctx.logger
            .debug(format!("netinfo: {} interfaces", self.entries.len()));
        self.list.render_full(ctx.display, "   Net Info");
    }

    fn update(&mut self, ctx: &mut ModuleContext<'_>) -> Transition {
        if self.last_refresh.elapsed() < REFRESH_INTERVAL {
            return Transition::Continue;
        }
        let before = self.entries.clone();
        self.refresh();
        if before != self.entries {
            match self.detail {
                Some(index) if index < self.entries.len() => self.draw_details(index, ctx),
                Some(_) => {
                    self.detail = None;
                    self.list.render_full(ctx.display, "   Net Info");
                }
                None => self.list.render_rows(ctx.display),
            }
        }
        Transition::Continue
    }

    fn on_rotate(&mut self, steps: i32, ctx: &mut ModuleContext<'_>) -> Transition {
        if self.detail.is_none() {
            self.list.rotate(step_of(steps), ctx.display);
        }
        Transition::Continue
    }

    fn on_button(&mut self, ctx: &mut ModuleContext<'_>) -> Transition {
        if self.detail.take().is_some() {
            self.list.render_full(ctx.display, "   Net Info");
            return Transition::Continue;
        }
        let index = self.list.selected();
        if index >= self.entries.len() {
            return Transition::Pop;
        }
        self.detail = Some(index);
        self.draw_details(index, ctx);
        Transition::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::pad_line;
    use crate::modules::testing::Rig;
    use std::net::Ipv4Addr;

    fn fixed() -> Vec<InterfaceInfo> {
        vec![
            InterfaceInfo {
                name: "eth0".into(),
                ipv4: Some(Ipv4Addr::new(10, 0, 0, 7)),
                prefix: 24,
                mac: "b8:27:eb:00:00:01".into(),
            },
            InterfaceInfo {
                name: "lo".into(),
                ipv4: Some(Ipv4Addr::LOCALHOST),
                prefix: 8,
                mac: "00:00:00:00:00:00".into(),
            },
            InterfaceInfo {
                name: "wlan0".into(),
                ipv4: None,
                prefix: 0,
                mac: "b8:27:eb:00:00:02".into(),
            },
        ]
    }

    fn sysfs() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("eth0")).unwrap();
        std::fs::write(root.path().join("eth0/operstate"), "up\n").unwrap();
        root
    }

    #[test]
    fn list_marks_linked_interfaces_and_skips_loopback() {
        let root = sysfs();
        let mut rig = Rig::new();
        let log = rig.log.clone();
        let mut screen = NetInfo::with_source(fixed, root.path().to_path_buf());
        let mut ctx = rig.ctx();
        screen.enter(&mut ctx);
        assert_eq!(screen.labels(), ["eth0*", "wlan0", "Back"]);
        assert_eq!(log.text_at(0, 16), Some(pad_line("> eth0*")));
    }

    #[test]
    fn details_show_address_and_netmask() {
        let root = sysfs();
        let mut rig = Rig::new();
        let log = rig.log.clone();
        let mut screen = NetInfo::with_source(fixed, root.path().to_path_buf());
        let mut ctx = rig.ctx();
        screen.enter(&mut ctx);
        screen.on_button(&mut ctx);
        assert_eq!(log.text_at(0, 16).as_deref(), Some("Link: Up"));
        assert_eq!(log.text_at(0, 24), Some(center_line("10.0.0.7")));
        assert_eq!(log.text_at(0, 40), Some(center_line("255.255.255.0")));
        screen.on_button(&mut ctx);
        screen.on_rotate(1, &mut ctx);
        screen.on_rotate(1, &mut ctx);
        assert!(matches!(screen.on_button(&mut ctx), Transition::Pop));
    }
}
