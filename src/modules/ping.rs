//! Single ICMP probe against an address picked with the IP editor.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::display::pad_line;
use crate::menu::list_view::SEPARATOR;
use crate::menu::{IpEditor, ModuleContext, ScreenModule, Transition};
use crate::process::{read_output, ExternalProcess, Output};

pub const MODULE_ID: &str = "ping";
pub const DEFAULT_TARGET: &str = "192.168.001.001";
pub const RESULT_FILE: &str = "/tmp/micropanel_ping_result.txt";
/// `{ip}` and `{out}` are filled in per run.
pub const PING_COMMAND: &str = "ping -c 1 -W 2 {ip} | grep -oP 'time=\\K[0-9.]+' > {out}";
const ANIMATION_STEP: Duration = Duration::from_millis(300);
const EDITOR_Y: u8 = 16;
const PING_Y: u8 = 32;
const EXIT_Y: u8 = 40;
const STATUS_Y: u8 = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Ip,
    Ping,
    Exit,
}

impl Focus {
    fn next(self, direction: i32) -> Self {
        match (self, direction > 0) {
            (Focus::Ip, true) => Focus::Ping,
            (Focus::Ping, true) => Focus::Exit,
            (Focus::Exit, true) => Focus::Ip,
            (Focus::Ip, false) => Focus::Exit,
            (Focus::Ping, false) => Focus::Ip,
            (Focus::Exit, false) => Focus::Ping,
        }
    }
}

#[derive(Debug)]
pub struct Ping {
    editor: IpEditor,
    focus: Focus,
    probe: Option<ExternalProcess>,
    command: String,
    result_path: PathBuf,
    status: String,
    dots: usize,
    last_frame: Instant,
}

impl Default for Ping {
    fn default() -> Self {
        Self::new()
    }
}

impl Ping {
    pub fn new() -> Self {
        Self {
            editor: IpEditor::new(DEFAULT_TARGET, EDITOR_Y),
            focus: Focus::Ip,
            probe: None,
            command: PING_COMMAND.to_string(),
            result_path: PathBuf::from(RESULT_FILE),
            status: String::new(),
            dots: 0,
            last_frame: Instant::now(),
        }
    }

    /// Replace the probe command; `{ip}` and `{out}` are substituted.
    pub fn with_command(mut self, command: &str, result_path: PathBuf) -> Self {
        self.command = command.to_string();
        self.result_path = result_path;
        self
    }

    pub fn focus(&self) -> Focus {
        self.focus
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn target(&self) -> String {
        self.editor.ip()
    }

    pub fn is_probing(&self) -> bool {
        self.probe.is_some()
    }

    fn draw_options(&self, ctx: &mut ModuleContext<'_>) {
        self.editor.draw(ctx.display, self.focus == Focus::Ip);
        let marker = |f| if self.focus == f { '>' } else { ' ' };
        ctx.display.draw_text(0, PING_Y, &pad_line(&format!("{}Ping", marker(Focus::Ping))));
        ctx.display.draw_text(0, EXIT_Y, &pad_line(&format!("{}Exit", marker(Focus::Exit))));
    }

    fn set_status(&mut self, status: String, ctx: &mut ModuleContext<'_>) {
        if status != self.status {
            ctx.display.draw_text(0, STATUS_Y, &pad_line(&status));
            self.status = status;
        }
    }

    fn start_probe(&mut self, ctx: &mut ModuleContext<'_>) {
        if self.probe.is_some() {
            return;
        }
        let _ = std::fs::remove_file(&self.result_path);
        let command = self
            .command
            .replace("{ip}", &self.editor.address().to_string())
            .replace("{out}", &self.result_path.to_string_lossy());
        ctx.storage.set(MODULE_ID, "last_ip", self.editor.ip());
        match ExternalProcess::spawn(&command, &Output::Null) {
            Ok(process) => {
                ctx.logger.debug(format!("pinging {}", self.editor.address()));
                self.probe = Some(process);
                self.dots = 0;
                self.last_frame = Instant::now();
                self.set_status("Pinging".to_string(), ctx);
            }
            Err(err) => {
                ctx.logger.warn(format!("failed to start ping: {err}"));
                self.set_status("No Response".to_string(), ctx);
            }
        }
    }

    fn finish_probe(&mut self, success: bool, ctx: &mut ModuleContext<'_>) {
        self.probe = None;
        let millis = read_output(&self.result_path)
            .lines()
            .next()
            .and_then(|l| l.trim().parse::<f64>().ok());
        let status = match millis {
            Some(ms) if success => format!("Success!({ms:.1}ms)"),
            _ => "No Response".to_string(),
        };
        ctx.logger.info(format!("ping {}: {status}", self.editor.address()));
        self.set_status(status, ctx);
    }
}

impl ScreenModule for Ping {
    fn id(&self) -> &str {
        MODULE_ID
    }

    fn enter(&mut self, ctx: &mut ModuleContext<'_>) {
        if let Some(ip) = ctx.storage.get_str(MODULE_ID, "last_ip") {
            let ip = ip.to_string();
            self.editor.set_ip(&ip);
        }
        self.editor.reset();
        self.focus = Focus::Ip;
        self.status.clear();
        ctx.display.clear();
        ctx.display.draw_text(0, 0, "   Ping Test");
        ctx.display.draw_text(0, 8, SEPARATOR);
        self.draw_options(ctx);
    }

    fn update(&mut self, ctx: &mut ModuleContext<'_>) -> Transition {
        let Some(probe) = self.probe.as_mut() else {
            return Transition::Continue;
        };
        match probe.try_wait() {
            Ok(Some(status)) => self.finish_probe(status.success(), ctx),
            Ok(None) => {
                if self.last_frame.elapsed() >= ANIMATION_STEP {
                    self.dots = (self.dots + 1) % 4;
                    self.last_frame = Instant::now();
                    self.set_status(format!("Pinging{}", ".".repeat(self.dots)), ctx);
                }
            }
            Err(err) => {
                ctx.logger.warn(format!("lost track of ping: {err}"));
                self.finish_probe(false, ctx);
            }
        }
        Transition::Continue
    }

    fn exit(&mut self, ctx: &mut ModuleContext<'_>) {
        if let Some(mut probe) = self.probe.take() {
            let _ = probe.terminate();
        }
        let _ = std::fs::remove_file(&self.result_path);
        ctx.display.clear();
    }

    fn on_rotate(&mut self, steps: i32, ctx: &mut ModuleContext<'_>) -> Transition {
        if self.focus == Focus::Ip && self.editor.on_rotate(steps) {
            self.editor.draw(ctx.display, true);
            return Transition::Continue;
        }
        self.focus = self.focus.next(steps);
        self.draw_options(ctx);
        Transition::Continue
    }

    fn on_button(&mut self, ctx: &mut ModuleContext<'_>) -> Transition {
        match self.focus {
            Focus::Ip => {
                self.editor.on_button();
                self.editor.draw(ctx.display, true);
                Transition::Continue
            }
            Focus::Ping => {
                self.start_probe(ctx);
                Transition::Continue
            }
            Focus::Exit => Transition::Pop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::Rig;

    fn run_until_done(ping: &mut Ping, ctx: &mut ModuleContext<'_>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while ping.is_probing() {
            assert!(Instant::now() < deadline, "probe never finished");
            ping.update(ctx);
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn focus_wraps_when_editor_declines_rotation() {
        let mut rig = Rig::new();
        let mut ping = Ping::new();
        let mut ctx = rig.ctx();
        ping.enter(&mut ctx);
        ping.on_rotate(-1, &mut ctx);
        assert_eq!(ping.focus(), Focus::Exit);
        ping.on_rotate(1, &mut ctx);
        assert_eq!(ping.focus(), Focus::Ip);
        for _ in 0..11 {
            ping.on_rotate(1, &mut ctx);
        }
        assert_eq!(ping.focus(), Focus::Ip);
        ping.on_rotate(1, &mut ctx);
        assert_eq!(ping.focus(), Focus::Ping);
        assert!(matches!(ping.on_rotate(1, &mut ctx), Transition::Continue));
        assert!(matches!(ping.on_button(&mut ctx), Transition::Pop));
    }

    #[test]
    fn successful_probe_reports_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("ping.txt");
        let mut rig = Rig::new();
        let log = rig.log.clone();
        let mut ping = Ping::new().with_command("printf '0.123\\n' > {out}", out);
        let mut ctx = rig.ctx();
        ping.enter(&mut ctx);
        ping.editor.set_ip("127.0.0.1");
        ping.on_rotate(-1, &mut ctx);
        ping.on_rotate(-1, &mut ctx);
        assert_eq!(ping.focus(), Focus::Ping);
        ping.on_button(&mut ctx);
        run_until_done(&mut ping, &mut ctx);
        assert_eq!(ping.status(), "Success!(0.1ms)");
        assert_eq!(log.text_at(0, STATUS_Y), Some(pad_line("Success!(0.1ms)")));
        assert_eq!(ctx.storage.get_str(MODULE_ID, "last_ip"), Some("127.000.000.001"));
    }

    #[test]
    fn failed_probe_reports_no_response() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = Rig::new();
        let mut ping = Ping::new().with_command("exit 1", dir.path().join("none.txt"));
        let mut ctx = rig.ctx();
        ping.enter(&mut ctx);
        ping.on_rotate(-1, &mut ctx);
        ping.on_rotate(-1, &mut ctx);
        ping.on_button(&mut ctx);
        run_until_done(&mut ping, &mut ctx);
        assert_eq!(ping.status(), "No Response");
    }
}
