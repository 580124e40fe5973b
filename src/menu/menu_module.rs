use crate::config::{MenuEntry, BACK_ID, INVERT_DISPLAY_ID, MENU_TITLE};

use super::{step_of, ListView, ModuleContext, ScreenModule, Transition};

pub const MAIN_MENU_LABEL: &str = "Main Menu";
pub const BACK_LABEL: &str = "Back";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Row {
    Module(MenuEntry),
    Back,
    InvertDisplay,
    MainMenu,
}

/// A titled list of module entries. Also serves as the root `MAIN MENU`.
#[derive(Debug)]
pub struct MenuModule {
    id: String,
    title: String,
    rows: Vec<Row>,
    list: ListView,
}

impl MenuModule {
    pub fn root(entries: &[MenuEntry]) -> Self {
        Self::build("main", MENU_TITLE, entries, true, true)
    }

    /// `top_level` menus hang directly off the root and get no `Main Menu` row.
    pub fn submenu(id: &str, title: &str, entries: &[MenuEntry], top_level: bool) -> Self {
        Self::build(id, title, entries, top_level, false)
    }

    fn build(id: &str, title: &str, entries: &[MenuEntry], top_level: bool, is_root: bool) -> Self {
        let mut rows: Vec<(Row, String)> = entries
            .iter()
            .map(|entry| {
                let row = match entry.id.as_str() {
                    BACK_ID => Row::Back,
                    INVERT_DISPLAY_ID => Row::InvertDisplay,
                    _ => Row::Module(entry.clone()),
                };
                (row, entry.title.clone())
            })
            .collect();
        if rows.is_empty() && !is_root {
            rows.push((Row::Back, BACK_LABEL.to_string()));
        }
        if !is_root && !top_level {
            rows.push((Row::MainMenu, MAIN_MENU_LABEL.to_string()));
        }
        let (rows, labels): (Vec<Row>, Vec<String>) = rows.into_iter().unzip();
        Self {
            id: id.to_string(),
            title: title.to_string(),
            rows,
            list: ListView::new(labels),
        }
    }

    pub fn labels(&self) -> &[String] {
        self.list.items()
    }

    pub fn selected(&self) -> usize {
        self.list.selected()
    }
}

impl ScreenModule for MenuModule {
    fn id(&self) -> &str {
        &self.id
    }

    fn enter(&mut self, ctx: &mut ModuleContext<'_>) {
        self.list.render_full(ctx.display, &self.title);
    }

    fn on_rotate(&mut self, steps: i32, ctx: &mut ModuleContext<'_>) -> Transition {
        self.list.rotate(step_of(steps), ctx.display);
        Transition::Continue
    }

    fn on_button(&mut self, ctx: &mut ModuleContext<'_>) -> Transition {
        match self.rows.get(self.list.selected()) {
            Some(Row::Module(entry)) => {
                ctx.logger.info(format!("selected menu item: {}", entry.title));
                Transition::Open(entry.id.clone())
            }
            Some(Row::Back) => Transition::Pop,
            Some(Row::MainMenu) => Transition::PopToRoot,
            Some(Row::InvertDisplay) => {
                let inverted = !ctx.display.is_inverted();
                ctx.display.set_inverted(inverted);
                ctx.logger.info(format!("display inverted: {inverted}"));
                Transition::Continue
            }
            None => Transition::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Logger;
    use crate::config::ModuleDependencies;
    use crate::display::{Display, RecordingBackend};
    use crate::storage::PersistentStore;

    fn entries(pairs: &[(&str, &str)]) -> Vec<MenuEntry> {
        pairs.iter().map(|(id, t)| MenuEntry::new(id, t)).collect()
    }

    #[test]
    fn nested_menus_get_a_main_menu_row() {
        let nested = MenuModule::submenu("tools_menu", "Tools", &entries(&[("ping", "Ping")]), false);
        assert_eq!(nested.labels(), ["Ping", "Main Menu"]);
        let top = MenuModule::submenu("tools_menu", "Tools", &entries(&[("ping", "Ping")]), true);
        assert_eq!(top.labels(), ["Ping"]);
        let empty = MenuModule::submenu("empty_menu", "Empty", &[], true);
        assert_eq!(empty.labels(), ["Back"]);
        let root = MenuModule::root(&[]);
        assert!(root.labels().is_empty());
    }

    #[test]
    fn reserved_rows_act_locally() {
        let (backend, log) = RecordingBackend::new();
        let mut display = Display::new(Box::new(backend));
        let deps = ModuleDependencies::default();
        let mut store = PersistentStore::in_memory(Logger::silent());
        let logger = Logger::silent();
        let mut ctx = crate::menu::ModuleContext::new(&mut display, &deps, &mut store, &logger);

        let mut menu = MenuModule::submenu(
            "tools_menu",
            "Tools",
            &entries(&[("invert_display", "Invert"), ("ping", "Ping"), ("back", "Back")]),
            false,
        );
        menu.enter(&mut ctx);
        assert_eq!(log.text_at(0, 0).as_deref(), Some("Tools"));
        assert!(menu.on_button(&mut ctx).is_continue());
        assert!(ctx.display.is_inverted());

        menu.on_rotate(5, &mut ctx);
        assert!(matches!(menu.on_button(&mut ctx), Transition::Open(id) if id == "ping"));
        menu.on_rotate(1, &mut ctx);
        assert!(matches!(menu.on_button(&mut ctx), Transition::Pop));
        menu.on_rotate(1, &mut ctx);
        assert!(matches!(menu.on_button(&mut ctx), Transition::PopToRoot));
    }
}
