//! Read-only status screens: system load and memory, primary interface, internet reachability.

use std::time::{Duration, Instant};

use sysinfo::System;

use crate::display::{center_line, pad_line};
use crate::menu::list_view::SEPARATOR;
use crate::menu::{ModuleContext, ScreenModule, Transition};
use crate::process::{ExternalProcess, Output};

use super::netif::{self, InterfaceInfo};

const FOOTER: &str = "Press to return";
const SYSTEM_REFRESH: Duration = Duration::from_secs(1);

fn header(ctx: &mut ModuleContext<'_>, title: &str) {
    ctx.display.clear();
    ctx.display.draw_text(0, 0, title);
    ctx.display.draw_text(0, 8, SEPARATOR);
}

/// Memory usage as a whole percentage; 0 when the total is unknown.
pub fn memory_pct(used: u64, total: u64) -> i32 {
    if total == 0 {
        return 0;
    }
    (used.saturating_mul(100) / total).min(100) as i32
}

pub fn system_lines(load_one: f64, used: u64, total: u64) -> [String; 3] {
    const MIB: u64 = 1024 * 1024;
    [
        format!("Load: {load_one:.2}"),
        format!("Mem: {}/{}M", used / MIB, total / MIB),
        format!("Used: {}%", memory_pct(used, total)),
    ]
}

#[derive(Debug)]
pub struct SystemStatus {
    system: System,
    last_refresh: Option<Instant>,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemStatus {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            last_refresh: None,
        }
    }

    fn draw(&mut self, ctx: &mut ModuleContext<'_>) {
        self.system.refresh_memory();
        let load = System::load_average();
        let (used, total) = (self.system.used_memory(), self.system.total_memory());
        for (i, line) in system_lines(load.one, used, total).iter().enumerate() {
            ctx.display.draw_text(0, 16 + i as u8 * 8, &pad_line(line));
        }
        ctx.display
            .draw_progress_bar(0, 42, 128, 8, memory_pct(used, total));
        self.last_refresh = Some(Instant::now());
    }
}

impl ScreenModule for SystemStatus {
    fn id(&self) -> &str {
        "system"
    }

    fn enter(&mut self, ctx: &mut ModuleContext<'_>) {
        header(ctx, "  System Stats");
        self.draw(ctx);
        ctx.display.draw_text(0, 56, FOOTER);
    }

    fn update(&mut self, ctx: &mut ModuleContext<'_>) -> Transition {
        if self.last_refresh.map_or(true, |t| t.elapsed() >= SYSTEM_REFRESH) {
            self.draw(ctx);
        }
        Transition::Continue
    }

    fn on_rotate(&mut self, _steps: i32, _ctx: &mut ModuleContext<'_>) -> Transition {
        Transition::Continue
    }

    fn on_button(&mut self, _ctx: &mut ModuleContext<'_>) -> Transition {
        Transition::Pop
    }
}

/// MAC without separators so it fits one row.
pub fn compact_mac(mac: &str) -> String {
    mac.replace(':', "").to_uppercase()
}

pub fn network_lines(iface: Option<&InterfaceInfo>) -> Vec<String> {
    let Some(iface) = iface else {
        return vec!["No network".to_string()];
    };
    let ip = iface
        .ipv4
        .map_or_else(|| "<no ip>".to_string(), |ip| ip.to_string());
    vec![
        format!("If: {}", iface.name),
        ip,
        "MAC:".to_string(),
        compact_mac(&iface.mac),
    ]
}

#[derive(Debug, Default)]
pub struct NetworkStatus;

impl ScreenModule for NetworkStatus {
    fn id(&self) -> &str {
        "network"
    }

    fn enter(&mut self, ctx: &mut ModuleContext<'_>) {
        header(ctx, "  Network Info");
        let primary = netif::primary();
        for (i, line) in network_lines(primary.as_ref()).iter().enumerate() {
            ctx.display.draw_text(0, 16 + i as u8 * 8, &center_line(line));
        }
        ctx.display.draw_text(0, 56, FOOTER);
    }

    fn on_rotate(&mut self, _steps: i32, _ctx: &mut ModuleContext<'_>) -> Transition {
        Transition::Continue
    }

    fn on_button(&mut self, _ctx: &mut ModuleContext<'_>) -> Transition {
        Transition::Pop
    }
}

pub const INTERNET_TARGET: &str = "8.8.8.8";
pub const INTERNET_TIMEOUT: Duration = Duration::from_secs(5);
const ANIMATION_STEP: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Testing,
    Online,
    Offline,
}

#[derive(Debug)]
pub struct InternetStatus {
    command: String,
    probe: Option<ExternalProcess>,
    state: Reachability,
    frame: usize,
    last_frame: Instant,
}

impl Default for InternetStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl InternetStatus {
    pub fn new() -> Self {
        Self::with_command(&format!(
            "ping -c 1 -W {} {INTERNET_TARGET}",
            INTERNET_TIMEOUT.as_secs()
        ))
    }

    pub fn with_command(command: &str) -> Self {
        Self {
            command: command.to_string(),
            probe: None,
            state: Reachability::Testing,
            frame: 0,
            last_frame: Instant::now(),
        }
    }

    pub fn state(&self) -> Reachability {
        self.state
    }

    fn show_result(&mut self, online: bool, ctx: &mut ModuleContext<'_>) {
        self.probe = None;
        self.state = if online {
            Reachability::Online
        } else {
            Reachability::Offline
        };
        ctx.logger.info(format!("internet check: {:?}", self.state));
        let text = if online { "Connected" } else { "No connection" };
        ctx.display.draw_text(0, 32, &pad_line(&center_line(text)));
        ctx.display.draw_progress_bar(0, 42, 128, 8, 100);
    }
}

impl ScreenModule for InternetStatus {
    fn id(&self) -> &str {
        "internet"
    }

    fn enter(&mut self, ctx: &mut ModuleContext<'_>) {
        header(ctx, "  Internet Test");
        ctx.display
            .draw_text(0, 16, &center_line(&format!("Ping {INTERNET_TARGET}")));
        ctx.display.draw_text(0, 56, FOOTER);
        self.state = Reachability::Testing;
        self.frame = 0;
        self.last_frame = Instant::now();
        match ExternalProcess::spawn(&self.command, &Output::Null) {
            Ok(process) => {
                self.probe = Some(process);
                ctx.display.draw_text(0, 32, &pad_line("Testing"));
            }
            Err(err) => {
                ctx.logger.warn(format!("failed to start internet check: {err}"));
                self.show_result(false, ctx);
            }
        }
    }

    fn update(&mut self, ctx: &mut ModuleContext<'_>) -> Transition {
        let Some(probe) = self.probe.as_mut() else {
            return Transition::Continue;
        };
        match probe.try_wait() {
            Ok(Some(status)) => self.show_result(status.success(), ctx),
            Ok(None) if probe.elapsed() > INTERNET_TIMEOUT + Duration::from_secs(1) => {
                let _ = probe.terminate();
                self.show_result(false, ctx);
            }
            Ok(None) => {
                if self.last_frame.elapsed() >= ANIMATION_STEP {
                    self.frame = (self.frame + 1) % 4;
                    self.last_frame = Instant::now();
                    let pct = (probe.elapsed().as_millis() * 100
                        / INTERNET_TIMEOUT.as_millis())
                    .min(99) as i32;
                    ctx.display.draw_text(
                        0,
                        32,
                        &pad_line(&format!("Testing{}", ".".repeat(self.frame))),
                    );
                    ctx.display.draw_progress_bar(0, 42, 128, 8, pct);
                }
            }
            Err(err) => {
                ctx.logger.warn(format!("lost track of internet check: {err}"));
                self.show_result(false, ctx);
            }
        }
        Transition::Continue
    }

    fn exit(&mut self, ctx: &mut ModuleContext<'_>) {
        if let Some(mut probe) = self.probe.take() {
            let _ = probe.terminate();
        }
        ctx.display.clear();
    }

    fn on_rotate(&mut self, _steps: i32, _ctx: &mut ModuleContext<'_>) -> Transition {
        Transition::Continue
    }

    fn on_button(&mut self, _ctx: &mut ModuleContext<'_>) -> Transition {
        Transition::Pop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::Rig;
    use std::net::Ipv4Addr;

    #[test]
    fn system_lines_format_load_and_memory() {
        let mib = 1024 * 1024;
        assert_eq!(
            system_lines(0.456, 256 * mib, 1024 * mib),
            ["Load: 0.46", "Mem: 256/1024M", "Used: 25%"]
        );
        assert_eq!(memory_pct(5, 0), 0);
    }

    #[test]
    fn network_lines_show_address_and_mac() {
        let iface = InterfaceInfo {
            name: "eth0".into(),
            ipv4: Some(Ipv4Addr::new(192, 168, 1, 20)),
            prefix: 24,
            mac: "b8:27:eb:01:02:03".into(),
        };
        assert_eq!(
            network_lines(Some(&iface)),
            ["If: eth0", "192.168.1.20", "MAC:", "B827EB010203"]
        );
        assert_eq!(network_lines(None), ["No network"]);
    }

    fn run_internet(command: &str) -> (Reachability, crate::display::ScreenLog) {
        let mut rig = Rig::new();
        let log = rig.log.clone();
        let mut screen = InternetStatus::with_command(command);
        let mut ctx = rig.ctx();
        screen.enter(&mut ctx);
        let deadline = Instant::now() + Duration::from_secs(5);
        while screen.state() == Reachability::Testing {
            assert!(Instant::now() < deadline);
            screen.update(&mut ctx);
            std::thread::sleep(Duration::from_millis(10));
        }
        (screen.state(), log)
    }

    #[test]
    fn internet_check_reports_outcome() {
        let (state, log) = run_internet("true");
        assert_eq!(state, Reachability::Online);
        assert_eq!(log.text_at(0, 32), Some(pad_line(&center_line("Connected"))));
        let (state, _) = run_internet("exit 1");
        assert_eq!(state, Reachability::Offline);
    }
}
