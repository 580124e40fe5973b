//! iperf3 server control. The server keeps running after leaving the screen.

use crate::config::ModuleDependencies;
use crate::display::pad_line;
use crate::menu::list_view::SEPARATOR;
use crate::menu::{ModuleContext, ScreenModule, Transition};
use crate::process::{run_status, ExternalProcess, Output};

use super::iperf::{self, DEFAULT_PORT, SERVER_SECTION};
use super::netif;

pub const MODULE_ID: &str = SERVER_SECTION;
const OPTIONS: [&str; 3] = ["Start", "Stop", "Back"];
const OPTION_Y: u8 = 16;
const OPTION_SPACING: u8 = 10;
const IP_Y: u8 = 48;
const PORT_Y: u8 = 56;

#[derive(Debug)]
pub struct ThroughputServer {
    port: u16,
    iperf3: String,
    publish: bool,
    selected: usize,
    server: Option<ExternalProcess>,
    announcer: Option<ExternalProcess>,
}

impl ThroughputServer {
    /// Port from `throughputserver.default_port`, then the `throughputtest` section.
    pub fn from_deps(deps: &ModuleDependencies) -> Self {
        let port = deps
            .get(SERVER_SECTION, "default_port")
            .or_else(|| deps.get("throughputtest", "default_port"))
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let publish = deps
            .get(SERVER_SECTION, "avahi_publish")
            .map_or(true, |v| !matches!(v.trim(), "false" | "0" | "no"));
        Self {
            port,
            iperf3: iperf::iperf3_path(deps),
            publish,
            selected: 0,
            server: None,
            announcer: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&mut self) -> bool {
        match self.server.as_mut().map(ExternalProcess::try_wait) {
            Some(Ok(None)) => true,
            Some(_) => {
                self.server = None;
                false
            }
            None => false,
        }
    }

    pub fn start(&mut self, ctx: &mut ModuleContext<'_>) {
        if self.is_running() {
            return;
        }
        let command = iperf::server_command(&self.iperf3, self.port);
        match ExternalProcess::spawn(&command, &Output::Null) {
            Ok(process) => {
                ctx.logger.info(format!("iperf3 server started (pid {})", process.pid()));
                self.server = Some(process);
            }
            Err(err) => {
                ctx.logger.error(format!("failed to start iperf3 server: {err}"));
                return;
            }
        }
        if self.publish && run_status("command -v avahi-publish >/dev/null") {
            let ip = netif::local_ipv4().map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
            match ExternalProcess::spawn(&iperf::publish_command(&ip, self.port), &Output::Null) {
                Ok(process) => self.announcer = Some(process),
                Err(err) => ctx.logger.warn(format!("avahi-publish failed: {err}")),
            }
        }
    }

    pub fn stop(&mut self, ctx: &mut ModuleContext<'_>) {
        if let Some(mut announcer) = self.announcer.take() {
            let _ = announcer.terminate();
        }
        if let Some(mut server) = self.server.take() {
            match server.terminate() {
                Ok(_) => ctx.logger.info("iperf3 server stopped"),
                Err(err) => ctx.logger.warn(format!("stopping iperf3 server: {err}")),
            }
        }
    }

    fn draw(&mut self, ctx: &mut ModuleContext<'_>) {
        let running = self.is_running();
        let header = if running { "Server(Running)" } else { "Server(Stopped)" };
        ctx.display.draw_text(0, 0, &pad_line(header));
        ctx.display.draw_text(0, 8, SEPARATOR);
        let current = if running { 0 } else { 1 };
        for (i, label) in OPTIONS.iter().enumerate() {
            let marker = if i == self.selected { '>' } else { ' ' };
            let text = if i == current {
                format!("{marker}[{label}]")
            } else {
                format!("{marker} {label}")
            };
            ctx.display
                .draw_text(0, OPTION_Y + i as u8 * OPTION_SPACING, &pad_line(&text));
        }
        let ip = netif::local_ipv4().map_or_else(|| "No IP".to_string(), |ip| ip.to_string());
        ctx.display.draw_text(0, IP_Y, &pad_line(&ip));
        ctx.display
            .draw_text(0, PORT_Y, &pad_line(&format!("Port:{}", self.port)));
    }
}

impl Drop for ThroughputServer {
    fn drop(&mut self) {
        if let Some(mut announcer) = self.announcer.take() {
            let _ = announcer.terminate();
        }
        if let Some(mut server) = self.server.take() {
            let _ = server.terminate();
        }
    }
}

impl ScreenModule for ThroughputServer {
    fn id(&self) -> &str {
        MODULE_ID
    }

    fn enter(&mut self, ctx: &mut ModuleContext<'_>) {
        self.selected = 0;
        ctx.display.clear();
        self.draw(ctx);
    }

    fn exit(&mut self, ctx: &mut ModuleContext<'_>) {
        ctx.display.clear();
    }

    fn on_rotate(&mut self, steps: i32, ctx: &mut ModuleContext<'_>) -> Transition {
        let len = OPTIONS.len() as i32;
        self.selected = (self.selected as i32 + steps.signum()).rem_euclid(len) as usize;
        self.draw(ctx);
        Transition::Continue
    }

    fn on_button(&mut self, ctx: &mut ModuleContext<'_>) -> Transition {
        match self.selected {
            0 => self.start(ctx),
            1 => self.stop(ctx),
            _ => return Transition::Pop,
        }
        self.draw(ctx);
        Transition::Continue
    }
}
