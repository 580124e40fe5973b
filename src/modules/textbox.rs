//! Script output viewer: four centered lines, optionally refreshed on an interval.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::config::dependency::substitute_params;
use crate::config::ModuleDependencies;
use crate::display::{center_line, pad_line};
use crate::menu::list_view::SEPARATOR;
use crate::menu::{ModuleContext, ScreenModule, Transition};
use crate::process::{CapturedRun, CAPTURE_TIMEOUT};

pub const DEFAULT_SCRIPT: &str = "/usr/bin/micropanel-version.sh";
pub const DEFAULT_TITLE: &str = "Info";
/// Dependency section shared by every plain `textbox`.
pub const TEXTBOX_SECTION: &str = "textbox";
const LINE_Y: [u8; 4] = [16, 24, 32, 40];
const FOOTER: &str = "Press to return";

#[derive(Debug)]
pub struct TextBox {
    id: String,
    title: String,
    script: String,
    params: BTreeMap<String, String>,
    refresh: Option<Duration>,
    shown: [String; 4],
    last_run: Option<Instant>,
    running: Option<CapturedRun>,
}

impl TextBox {
    pub fn new(id: &str, title: &str, script: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            script: script.to_string(),
            params: BTreeMap::new(),
            refresh: None,
            shown: Default::default(),
            last_run: None,
            running: None,
        }
    }

    /// Resolve `script_path`, `display_title` and `refresh_sec` from the module's own
    /// dependencies, then the shared `textbox` section.
    pub fn from_deps(id: &str, fallback_title: &str, deps: &ModuleDependencies) -> Self {
        let lookup = |key: &str| deps.get(id, key).or_else(|| deps.get(TEXTBOX_SECTION, key));
        let script = lookup("script_path").unwrap_or(DEFAULT_SCRIPT);
        let title = lookup("display_title").unwrap_or(fallback_title);
        let refresh = lookup("refresh_sec")
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|s| *s > 0.0)
            .map(Duration::from_secs_f64);
        let mut textbox = Self::new(id, title, script);
        textbox.refresh = refresh;
        textbox
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_refresh(mut self, every: Duration) -> Self {
        self.refresh = Some(every).filter(|d| !d.is_zero());
        self
    }

    pub fn title(&self) -> String {
        let title = substitute_params(&self.title, &self.params);
        if title.is_empty() {
            DEFAULT_TITLE.to_string()
        } else {
            title
        }
    }

    pub fn script(&self) -> String {
        substitute_params(&self.script, &self.params)
    }

    /// Start the script in the background; errors that prevent a run are drawn at once.
    fn start_script(&mut self, ctx: &mut ModuleContext<'_>) {
        let script = self.script();
        if script.trim().is_empty() {
            self.show(&["Error: No script".to_string()], ctx);
            return;
        }
        match CapturedRun::start(&script, &self.id, CAPTURE_TIMEOUT) {
            Ok(run) => self.running = Some(run),
            Err(err) => {
                ctx.logger.warn(format!("{}: script failed: {err}", self.id));
                self.show(&["Error: Script failed".to_string()], ctx);
            }
        }
    }

    /// Draw the finished run's output, if any.
    fn collect_script(&mut self, ctx: &mut ModuleContext<'_>) {
        let Some(result) = self.running.as_mut().and_then(CapturedRun::poll) else {
            return;
        };
        self.running = None;
        let lines = match result {
            Ok(out) => out
                .lines()
                .map(|l| l.trim_end_matches('\r').replace('\u{00B0}', "*"))
                .filter(|l| !l.is_empty())
                .collect(),
            Err(err) => {
                ctx.logger.warn(format!("{}: script failed: {err}", self.id));
                vec!["Error: Script failed".to_string()]
            }
        };
        self.show(&lines, ctx);
    }

    fn show(&mut self, lines: &[String], ctx: &mut ModuleContext<'_>) {
        self.draw_changed(Self::slots(lines), ctx);
        self.last_run = Some(Instant::now());
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn slots(lines: &[String]) -> [String; 4] {
        let mut slots: [String; 4] = Default::default();
        if lines.is_empty() {
            slots[0] = pad_line("No output");
            return slots;
        }
        for (slot, line) in slots.iter_mut().zip(lines) {
            *slot = pad_line(&center_line(line));
        }
        slots
    }

    /// Draw the slots that differ from what is on screen.
    fn draw_changed(&mut self, next: [String; 4], ctx: &mut ModuleContext<'_>) {
        for (i, (old, new)) in self.shown.iter_mut().zip(next).enumerate() {
            if *old != new {
                let text = if new.is_empty() { pad_line("") } else { new.clone() };
                ctx.display.draw_text(0, LINE_Y[i], &text);
                *old = new;
            }
        }
    }
}

impl ScreenModule for TextBox {
    fn id(&self) -> &str {
        &self.id
    }

    fn enter(&mut self, ctx: &mut ModuleContext<'_>) {
        ctx.display.clear();
        ctx.display.draw_text(0, 0, &center_line(&self.title()));
        ctx.display.draw_text(0, 8, SEPARATOR);
        ctx.display.draw_text(0, 48, FOOTER);
        self.shown = Default::default();
        self.last_run = None;
        self.start_script(ctx);
    }

    fn update(&mut self, ctx: &mut ModuleContext<'_>) -> Transition {
        if self.running.is_some() {
            self.collect_script(ctx);
            return Transition::Continue;
        }
        let (Some(every), Some(last)) = (self.refresh, self.last_run) else {
            return Transition::Continue;
        };
        if last.elapsed() >= every {
            self.start_script(ctx);
        }
        Transition::Continue
    }

    fn exit(&mut self, ctx: &mut ModuleContext<'_>) {
        self.running = None;
        ctx.display.clear();
    }

    fn on_rotate(&mut self, _steps: i32, _ctx: &mut ModuleContext<'_>) -> Transition {
        Transition::Pop
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

    /// Tick until the pending script run has been drawn.
    fn settle(tb: &mut TextBox, ctx: &mut ModuleContext<'_>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while tb.is_running() {
            assert!(Instant::now() < deadline, "script never finished");
            tb.update(ctx);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn renders_centered_lines_and_footer() {
        let mut rig = Rig::new();
        let log = rig.log.clone();
        let mut tb = TextBox::new("version", "Version", "printf 'v2.0\\n\\nTemp 41\\302\\260C\\n'");
        let mut ctx = rig.ctx();
        tb.enter(&mut ctx);
        settle(&mut tb, &mut ctx);
        assert_eq!(log.text_at(0, 0), Some(center_line("Version")));
        assert_eq!(log.text_at(0, 16), Some(pad_line(&center_line("v2.0"))));
        assert_eq!(log.text_at(0, 24), Some(pad_line(&center_line("Temp 41*C"))));
        assert_eq!(log.text_at(0, 48).as_deref(), Some(FOOTER));
        assert!(matches!(tb.on_rotate(1, &mut ctx), Transition::Pop));
    }

    #[test]
    fn params_apply_to_script_and_title() {
        let mut deps = ModuleDependencies::default();
        deps.add("eth0_dynamic_stats", "script_path", "echo $INTERFACE");
        deps.add("eth0_dynamic_stats", "display_title", "$INTERFACE Stats");
        deps.add("eth0_dynamic_stats", "refresh_sec", "2.0");
        let tb = TextBox::from_deps("eth0_dynamic_stats", "Info", &deps).with_param("INTERFACE", "eth0");
        assert_eq!(tb.script(), "echo eth0");
        assert_eq!(tb.title(), "eth0 Stats");
        assert_eq!(tb.refresh, Some(Duration::from_secs(2)));

        let plain = TextBox::from_deps("version", "Version", &ModuleDependencies::default());
        assert_eq!(plain.script(), DEFAULT_SCRIPT);
        assert_eq!(plain.title(), "Version");
    }

    #[test]
    fn empty_output_and_refresh_redraw_only_changes() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("lines");
        std::fs::write(&data, "").unwrap();
        let mut rig = Rig::new();
        let log = rig.log.clone();
        let mut tb = TextBox::new("stats", "Stats", &format!("cat {}", data.display()))
            .with_refresh(Duration::from_millis(1));
        let mut ctx = rig.ctx();
        tb.enter(&mut ctx);
        settle(&mut tb, &mut ctx);
        assert_eq!(log.text_at(0, 16), Some(pad_line("No output")));

        std::fs::write(&data, "one\ntwo\n").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        log.clear_log();
        tb.update(&mut ctx);
        assert!(tb.is_running());
        settle(&mut tb, &mut ctx);
        let drawn: Vec<u8> = log
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                DisplayCommand::DrawText { y, .. } => Some(y),
                _ => None,
            })
            .collect();
        assert_eq!(drawn, vec![16, 24]);

        log.clear_log();
        std::thread::sleep(Duration::from_millis(5));
        tb.update(&mut ctx);
        settle(&mut tb, &mut ctx);
        assert!(log.commands().is_empty());
    }

    #[test]
    fn slow_refresh_script_does_not_hold_up_the_tick() {
        let mut rig = Rig::new();
        let log = rig.log.clone();
        let mut tb = TextBox::new("slow", "Slow", "sleep 2; echo hi").with_refresh(Duration::from_millis(1));
        let mut ctx = rig.ctx();

        let started = Instant::now();
        tb.enter(&mut ctx);
        tb.update(&mut ctx);
        tb.update(&mut ctx);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(tb.is_running());

        tb.exit(&mut ctx);
        assert!(!tb.is_running());
        assert!(!log.contains("hi"));
    }

    #[test]
    fn missing_script_is_reported_without_spawning() {
        let mut rig = Rig::new();
        let log = rig.log.clone();
        let mut tb = TextBox::new("empty", "Empty", "  ");
        let mut ctx = rig.ctx();
        tb.enter(&mut ctx);
        assert!(!tb.is_running());
        assert_eq!(log.text_at(0, 16), Some(pad_line(&center_line("Error: No script"))));
    }
}
