//! Short-lived message screen that pops itself after a delay.

use std::time::{Duration, Instant};

use super::{ModuleContext, ScreenModule, Transition};

pub const NOTICE_DURATION: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct Notice {
    id: String,
    lines: Vec<(u8, String)>,
    duration: Duration,
    shown_at: Option<Instant>,
}

impl Notice {
    pub fn new(id: &str, lines: Vec<(u8, String)>, duration: Duration) -> Self {
        Self {
            id: id.to_string(),
            lines,
            duration,
            shown_at: None,
        }
    }

    pub fn module_unavailable(module: &str) -> Self {
        Self::new(
            "notice",
            vec![(0, "Module unavailable:".into()), (10, module.to_string())],
            NOTICE_DURATION,
        )
    }

    pub fn dependency_error(module: &str) -> Self {
        Self::new(
            "notice",
            vec![
                (0, "Dependency Error".into()),
                (10, "Module unavailable:".into()),
                (20, module.to_string()),
            ],
            NOTICE_DURATION,
        )
    }
}

impl ScreenModule for Notice {
    fn id(&self) -> &str {
        &self.id
    }

    fn enter(&mut self, ctx: &mut ModuleContext<'_>) {
        ctx.display.clear();
        for (y, text) in &self.lines {
            ctx.display.draw_text(0, *y, text);
        }
        self.shown_at = Some(Instant::now());
    }

    fn update(&mut self, _ctx: &mut ModuleContext<'_>) -> Transition {
        match self.shown_at {
            Some(at) if at.elapsed() >= self.duration => Transition::Pop,
            _ => Transition::Continue,
        }
    }

    fn on_rotate(&mut self, _steps: i32, _ctx: &mut ModuleContext<'_>) -> Transition {
        Transition::Continue
    }

    fn on_button(&mut self, _ctx: &mut ModuleContext<'_>) -> Transition {
        Transition::Pop
    }
}
