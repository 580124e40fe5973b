//! Panel brightness, adjusted live and remembered across restarts.

use crate::display::Display;
use crate::menu::list_view::SEPARATOR;
use crate::menu::{ModuleContext, ScreenModule, Transition};
use crate::storage::PersistentStore;

pub const MODULE_ID: &str = "brightness";
pub const STEP: i32 = 10;

#[derive(Debug, Default)]
pub struct Brightness;

impl Brightness {
    pub fn new() -> Self {
        Self
    }

    fn draw_level(display: &mut Display) {
        let pct = i32::from(display.brightness()) * 100 / 255;
        display.draw_text(50, 20, &format!("{pct:>3}%"));
        display.draw_progress_bar(10, 30, 108, 15, pct);
    }
}

/// Apply a saved level, if any. Called at startup and when the screen opens.
pub fn restore(display: &mut Display, storage: &PersistentStore) {
    if let Some(level) = storage.get_i64(MODULE_ID, "value") {
        display.set_brightness(level.clamp(0, 255) as i32);
    }
}

impl ScreenModule for Brightness {
    fn id(&self) -> &str {
        MODULE_ID
    }

    fn enter(&mut self, ctx: &mut ModuleContext<'_>) {
        restore(ctx.display, ctx.storage);
        ctx.display.clear();
        ctx.display.draw_text(0, 0, "   Brightness");
        ctx.display.draw_text(0, 8, SEPARATOR);
        Self::draw_level(ctx.display);
        ctx.display.draw_text(0, 56, "Press to return");
    }

    fn on_rotate(&mut self, steps: i32, ctx: &mut ModuleContext<'_>) -> Transition {
        let level = i32::from(ctx.display.brightness()) + steps * STEP;
        ctx.display.set_brightness(level);
        let level = ctx.display.brightness();
        ctx.storage.set(MODULE_ID, "value", i64::from(level));
        ctx.logger.debug(format!("brightness set to {level}"));
        Self::draw_level(ctx.display);
        Transition::Continue
    }

    fn on_button(&mut self, _ctx: &mut ModuleContext<'_>) -> Transition {
        Transition::Pop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayCommand;
    use crate::modules::testing::Rig;

    #[test]
    fn rotation_steps_by_ten_and_clamps() {
        let mut rig = Rig::new();
        let log = rig.log.clone();
        let mut screen = Brightness::new();
        let mut ctx = rig.ctx();
        screen.enter(&mut ctx);
        assert_eq!(log.text_at(50, 20).as_deref(), Some(" 50%"));
        screen.on_rotate(2, &mut ctx);
        assert_eq!(ctx.display.brightness(), 148);
        screen.on_rotate(20, &mut ctx);
        assert_eq!(ctx.display.brightness(), 255);
        assert_eq!(log.text_at(50, 20).as_deref(), Some("100%"));
        assert_eq!(ctx.storage.get_i64(MODULE_ID, "value"), Some(255));
        assert!(log.commands().contains(&DisplayCommand::ProgressBar {
            x: 10,
            y: 30,
            width: 108,
            height: 15,
            pct: 100
        }));
        screen.on_rotate(-40, &mut ctx);
        assert_eq!(ctx.display.brightness(), 0);
        assert!(matches!(screen.on_button(&mut ctx), Transition::Pop));
    }

    #[test]
    fn saved_level_is_restored() {
        let mut rig = Rig::new();
        rig.store.set(MODULE_ID, "value", 30);
        restore(&mut rig.display, &rig.store);
        assert_eq!(rig.display.brightness(), 30);
    }
}
