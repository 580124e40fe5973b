//! iperf3 client: settings menu, server discovery, a polled test run and its results.

use std::path::PathBuf;

use crate::config::ModuleDependencies;
use crate::display::pad_line;
use crate::menu::list_view::SEPARATOR;
use crate::menu::{step_of, IpEditor, ListView, ModuleContext, ScreenModule, Transition};
use crate::process::{read_output, ExternalProcess, Output};

use super::iperf::{
    self, bandwidth_label, format_rate, parse_discovery, DiscoveredServer, Protocol, TestParams,
    TestResult, CLIENT_SECTION, DEFAULT_PORT,
};

pub const MODULE_ID: &str = CLIENT_SECTION;
pub const DEFAULT_SERVER: &str = "192.168.001.001";
pub const RESULT_FILE: &str = "/tmp/micropanel_iperf_result.txt";
pub const DISCOVERY_FILE: &str = "/tmp/micropanel_avahi_result.txt";
pub const DURATIONS: [u32; 6] = [10, 20, 30, 40, 50, 60];
pub const BANDWIDTHS: [u32; 13] = [0, 10, 20, 50, 100, 500, 1000, 2000, 2500, 4500, 5000, 9500, 10000];
pub const PARALLEL: [u32; 5] = [1, 4, 8, 16, 32];
const MAX_DISCOVERED: usize = 5;

const ROW_START: usize = 0;
const ROW_REVERSE: usize = 1;
const ROW_PROTOCOL: usize = 2;
const ROW_DURATION: usize = 3;
const ROW_BANDWIDTH: usize = 4;
const ROW_PARALLEL: usize = 5;
const ROW_SERVER: usize = 6;
const ROW_BACK: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Main,
    Protocol,
    Duration,
    Bandwidth,
    Parallel,
    ServerIp,
    Discovering,
    Servers,
    NoServers,
    Testing,
    Results,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerFocus {
    Editor,
    Discover,
    Back,
}

impl ServerFocus {
    fn next(self, direction: i32) -> Self {
        use ServerFocus::*;
        match (self, direction > 0) {
            (Editor, true) => Discover,
            (Discover, true) => Back,
            (Back, true) => Editor,
            (Editor, false) => Back,
            (Discover, false) => Editor,
            (Back, false) => Discover,
        }
    }
}

#[derive(Debug)]
pub struct ThroughputClient {
    screen: Screen,
    editor: IpEditor,
    server_focus: ServerFocus,
    port: u16,
    protocol: Protocol,
    duration_s: u32,
    bandwidth_mbps: u32,
    parallel: u32,
    reverse: bool,
    main: ListView,
    submenu: ListView,
    servers: Vec<DiscoveredServer>,
    test: Option<ExternalProcess>,
    discovery: Option<ExternalProcess>,
    cancel_prompt: bool,
    outcome: Option<std::result::Result<TestResult, String>>,
    iperf3: String,
    result_path: PathBuf,
    discovery_path: PathBuf,
}

impl ThroughputClient {
    pub fn from_deps(deps: &ModuleDependencies) -> Self {
        let dep = |key: &str| deps.get(MODULE_ID, key);
        let parse_u32 = |key: &str, default: u32| {
            dep(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        };
        let mut client = Self {
            screen: Screen::Main,
            editor: IpEditor::new(DEFAULT_SERVER, 16),
            server_focus: ServerFocus::Editor,
            port: dep("default_port")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_PORT),
            protocol: dep("default_protocol")
                .and_then(Protocol::parse)
                .unwrap_or(Protocol::Tcp),
            duration_s: parse_u32("default_duration", 10),
            bandwidth_mbps: parse_u32("default_bandwidth", 0),
            parallel: parse_u32("default_parallel", 1).max(1),
            reverse: false,
            main: ListView::default(),
            submenu: ListView::default(),
            servers: Vec::new(),
            test: None,
            discovery: None,
            cancel_prompt: false,
            outcome: None,
            iperf3: iperf::iperf3_path(deps),
            result_path: PathBuf::from(RESULT_FILE),
            discovery_path: PathBuf::from(DISCOVERY_FILE),
        };
        if let Some(ip) = dep("default_server_ip") {
            client.editor.set_ip(ip);
        }
        client.main = ListView::new(client.main_labels());
        client
    }

    pub fn with_paths(mut self, result: PathBuf, discovery: PathBuf) -> Self {
        self.result_path = result;
        self.discovery_path = discovery;
        self
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn server(&self) -> String {
        self.editor.ip()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn main_labels(&self) -> Vec<String> {
        vec![
            "Start Test".to_string(),
            "Reverse Test".to_string(),
            format!("Proto: {}", self.protocol.label()),
            format!("Duration: {}s", self.duration_s),
            format!("BW: {}", bandwidth_label(self.bandwidth_mbps)),
            format!("Parallel: {}", self.parallel),
            self.editor.ip(),
            "Back".to_string(),
        ]
    }

    pub fn params(&self) -> TestParams {
        TestParams {
            server: self.editor.address().to_string(),
            port: self.port,
            protocol: self.protocol,
            duration_s: self.duration_s,
            bandwidth_mbps: self.bandwidth_mbps,
            parallel: self.parallel,
            reverse: self.reverse,
        }
    }

    fn show_main(&mut self, ctx: &mut ModuleContext<'_>) {
        self.screen = Screen::Main;
        self.main.set_items(self.main_labels());
        let title = if self.test.is_some() {
            "Client(Running)"
        } else {
            "Client(Ready)"
        };
        self.main.render_full(ctx.display, title);
    }

    fn show_submenu(&mut self, screen: Screen, ctx: &mut ModuleContext<'_>) {
        let (title, mut labels, current): (&str, Vec<String>, Option<usize>) = match screen {
            Screen::Protocol => (
                "   Protocol",
                vec!["TCP".into(), "UDP".into()],
                Some(usize::from(self.protocol == Protocol::Udp)),
            ),
            Screen::Duration => (
                "   Duration",
                DURATIONS.iter().map(|d| format!("{d} sec")).collect(),
                DURATIONS.iter().position(|d| *d == self.duration_s),
            ),
            Screen::Bandwidth => (
                "   Bandwidth",
                BANDWIDTHS
                    .iter()
                    .map(|b| match b {
                        0 => "Auto (0)".to_string(),
                        b => format!("{b} Mbps"),
                    })
                    .collect(),
                BANDWIDTHS.iter().position(|b| *b == self.bandwidth_mbps),
            ),
            Screen::Parallel => (
                "   Parallel",
                PARALLEL.iter().map(u32::to_string).collect(),
                PARALLEL.iter().position(|p| *p == self.parallel),
            ),
            _ => return,
        };
        labels.push("Back".into());
        self.screen = screen;
        self.submenu = ListView::new(labels);
        self.submenu.set_marked(current);
        if let Some(index) = current {
            self.submenu.select(index);
        }
        self.submenu.render_full(ctx.display, title);
    }

    /// Apply the chosen submenu row. The last row is `Back`.
    fn choose_option(&mut self, index: usize, ctx: &mut ModuleContext<'_>) {
        match self.screen {
            Screen::Protocol if index < 2 => {
                self.protocol = if index == 0 { Protocol::Tcp } else { Protocol::Udp };
            }
            Screen::Duration if index < DURATIONS.len() => self.duration_s = DURATIONS[index],
            Screen::Bandwidth if index < BANDWIDTHS.len() => self.bandwidth_mbps = BANDWIDTHS[index],
            Screen::Parallel if index < PARALLEL.len() => self.parallel = PARALLEL[index],
            _ => {}
        }
        self.show_main(ctx);
    }

    fn show_server_ip(&mut self, ctx: &mut ModuleContext<'_>) {
        self.screen = Screen::ServerIp;
        ctx.display.clear();
        ctx.display.draw_text(0, 0, "   Server IP");
        ctx.display.draw_text(0, 8, SEPARATOR);
        self.draw_server_ip(ctx);
    }

    fn draw_server_ip(&self, ctx: &mut ModuleContext<'_>) {
        self.editor
            .draw(ctx.display, self.server_focus == ServerFocus::Editor);
        let marker = |f| if self.server_focus == f { '>' } else { ' ' };
        ctx.display.draw_text(
            0,
            32,
            &pad_line(&format!("{}Auto-Discover", marker(ServerFocus::Discover))),
        );
        ctx.display
            .draw_text(0, 40, &pad_line(&format!("{}Back", marker(ServerFocus::Back))));
    }

    fn remember_server(&self, ctx: &mut ModuleContext<'_>) {
        ctx.storage.set(MODULE_ID, "server_ip", self.editor.ip());
        ctx.storage.set(MODULE_ID, "server_port", i64::from(self.port));
    }

    fn start_discovery(&mut self, ctx: &mut ModuleContext<'_>) {
        self.screen = Screen::Discovering;
        ctx.display.clear();
        ctx.display.draw_text(0, 0, "   Discovering");
        ctx.display.draw_text(0, 8, SEPARATOR);
        ctx.display.draw_text(0, 16, "Scanning...");
        let output = Output::File(self.discovery_path.clone());
        match ExternalProcess::spawn(&iperf::browse_command(), &output) {
            Ok(process) => self.discovery = Some(process),
            Err(err) => {
                ctx.logger.warn(format!("avahi-browse failed to start: {err}"));
                self.finish_discovery(ctx);
            }
        }
    }

    fn finish_discovery(&mut self, ctx: &mut ModuleContext<'_>) {
        self.discovery = None;
        self.servers = parse_discovery(&read_output(&self.discovery_path));
        let _ = std::fs::remove_file(&self.discovery_path);
        ctx.logger.info(format!("found {} iperf3 servers", self.servers.len()));
        if self.servers.is_empty() {
            self.screen = Screen::NoServers;
            ctx.display.clear();
            ctx.display.draw_text(0, 0, "   No Servers");
            ctx.display.draw_text(0, 8, SEPARATOR);
            ctx.display.draw_text(0, 16, "No iperf3 servers");
            ctx.display.draw_text(0, 24, "found on network");
            ctx.display.draw_text(0, 40, ">Back");
            return;
        }
        self.screen = Screen::Servers;
        let mut labels: Vec<String> = self
            .servers
            .iter()
            .take(MAX_DISCOVERED)
            .map(|s| s.ip.clone())
            .collect();
        labels.push("Back".into());
        self.submenu = ListView::new(labels);
        self.submenu.render_full(ctx.display, "   Select Server");
    }

    fn start_test(&mut self, reverse: bool, ctx: &mut ModuleContext<'_>) {
        self.reverse = reverse;
        self.cancel_prompt = false;
        self.outcome = None;
        self.remember_server(ctx);
        let params = self.params();
        let command = format!("{} 2>/dev/null", params.command(&self.iperf3));
        ctx.logger.info(format!("starting iperf3 test: {command}"));
        match ExternalProcess::spawn(&command, &Output::File(self.result_path.clone())) {
            Ok(process) => {
                self.test = Some(process);
                self.show_testing(&params, ctx);
            }
            Err(err) => {
                ctx.logger.warn(format!("iperf3 failed to start: {err}"));
                self.outcome = Some(Err("Test failed".into()));
                self.show_results(ctx);
            }
        }
    }

    fn show_testing(&mut self, params: &TestParams, ctx: &mut ModuleContext<'_>) {
        self.screen = Screen::Testing;
        let d = &mut *ctx.display;
        d.clear();
        d.draw_text(0, 0, if params.reverse { "  Reverse Test" } else { "    Testing" });
        d.draw_text(0, 8, SEPARATOR);
        d.draw_text(0, 16, &format!("Srv:{}", params.server));
        d.draw_text(0, 24, &format!("Proto  :{}", params.protocol.label()));
        d.draw_text(0, 32, &format!("Dur    :{}sec", params.duration_s));
        let rate = match params.bandwidth_mbps {
            0 => "Auto".to_string(),
            b => format!("{b}Mbps"),
        };
        d.draw_text(0, 40, &format!("Rate   :{rate}"));
        d.draw_text(0, 48, &format!("Streams:{}", params.parallel));
        d.draw_text(0, 56, "Please wait...");
    }

    fn finish_test(&mut self, success: bool, ctx: &mut ModuleContext<'_>) {
        self.test = None;
        let output = read_output(&self.result_path);
        let _ = std::fs::remove_file(&self.result_path);
        self.outcome = Some(if success {
            iperf::parse_result(&output, self.protocol).map_err(|err| {
                ctx.logger.warn(format!("could not parse iperf3 output: {err}"));
                "No results".to_string()
            })
        } else {
            ctx.logger.warn("iperf3 client exited with an error");
            Err("Test failed".to_string())
        });
        if let Some(Ok(result)) = &self.outcome {
            ctx.logger.info(format!("iperf3 result: {}", format_rate(result.mbps())));
        }
        self.show_results(ctx);
    }

    fn show_results(&mut self, ctx: &mut ModuleContext<'_>) {
        self.screen = Screen::Results;
        let d = &mut *ctx.display;
        d.clear();
        d.draw_text(0, 0, if self.reverse { " Reverse Results" } else { "  Test Results" });
        d.draw_text(0, 8, SEPARATOR);
        match &self.outcome {
            Some(Ok(result)) => {
                d.draw_text(0, 16, &format!("Proto :{}", self.protocol.label()));
                d.draw_text(0, 24, &format!("Speed :{}", format_rate(result.mbps())));
                match result {
                    TestResult::Tcp { retransmits, .. } => {
                        d.draw_text(0, 32, &format!("Retrns:{retransmits}"));
                    }
                    TestResult::Udp {
                        jitter_ms,
                        lost_percent,
                        ..
                    } => {
                        d.draw_text(0, 32, &format!("Loss  :{lost_percent:.4}%"));
                        d.draw_text(0, 40, &format!("Jitter:{jitter_ms:.4}ms"));
                    }
                }
            }
            Some(Err(message)) => d.draw_text(0, 16, message),
            None => {}
        }
        d.draw_text(0, 56, "Enter to continu");
    }

    fn cancel_test(&mut self, ctx: &mut ModuleContext<'_>) {
        if let Some(mut test) = self.test.take() {
            ctx.logger.info("iperf3 test cancelled");
            let _ = test.terminate();
        }
        let _ = std::fs::remove_file(&self.result_path);
        self.cancel_prompt = false;
        self.show_main(ctx);
    }
}

impl ScreenModule for ThroughputClient {
    fn id(&self) -> &str {
        MODULE_ID
    }

    fn enter(&mut self, ctx: &mut ModuleContext<'_>) {
        if let Some(ip) = ctx.storage.get_str(MODULE_ID, "server_ip") {
            let ip = ip.to_string();
            self.editor.set_ip(&ip);
        }
        if let Some(port) = ctx
            .storage
            .get_i64(MODULE_ID, "server_port")
            .and_then(|p| u16::try_from(p).ok())
        {
            self.port = port;
        }
        self.editor.reset();
        self.main.reset();
        self.show_main(ctx);
    }

    fn update(&mut self, ctx: &mut ModuleContext<'_>) -> Transition {
        if let Some(test) = self.test.as_mut() {
            match test.try_wait() {
                Ok(Some(status)) => self.finish_test(status.success(), ctx),
                Ok(None) => {}
                Err(err) => {
                    ctx.logger.warn(format!("lost track of iperf3: {err}"));
                    self.finish_test(false, ctx);
                }
            }
        }
        if let Some(discovery) = self.discovery.as_mut() {
            if !matches!(discovery.try_wait(), Ok(None)) {
                self.finish_discovery(ctx);
            }
        }
        Transition::Continue
    }

    fn exit(&mut self, ctx: &mut ModuleContext<'_>) {
        if let Some(mut test) = self.test.take() {
            let _ = test.terminate();
        }
        if let Some(mut discovery) = self.discovery.take() {
            let _ = discovery.terminate();
        }
        let _ = std::fs::remove_file(&self.result_path);
        let _ = std::fs::remove_file(&self.discovery_path);
        ctx.display.clear();
    }

    fn on_rotate(&mut self, steps: i32, ctx: &mut ModuleContext<'_>) -> Transition {
        match self.screen {
            Screen::Main => {
                self.main.rotate(step_of(steps), ctx.display);
            }
            Screen::Protocol
            | Screen::Duration
            | Screen::Bandwidth
            | Screen::Parallel
            | Screen::Servers => {
                self.submenu.rotate(step_of(steps), ctx.display);
            }
            Screen::ServerIp => {
                if self.server_focus == ServerFocus::Editor && self.editor.on_rotate(steps) {
                    self.editor.draw(ctx.display, true);
                } else {
                    self.server_focus = self.server_focus.next(steps);
                    self.draw_server_ip(ctx);
                }
            }
            Screen::Discovering | Screen::NoServers | Screen::Testing | Screen::Results => {}
        }
        Transition::Continue
    }

    fn on_button(&mut self, ctx: &mut ModuleContext<'_>) -> Transition {
        match self.screen {
            Screen::Main => match self.main.selected() {
                ROW_START => self.start_test(false, ctx),
                ROW_REVERSE => self.start_test(true, ctx),
                ROW_PROTOCOL => self.show_submenu(Screen::Protocol, ctx),
                ROW_DURATION => self.show_submenu(Screen::Duration, ctx),
                ROW_BANDWIDTH => self.show_submenu(Screen::Bandwidth, ctx),
                ROW_PARALLEL => self.show_submenu(Screen::Parallel, ctx),
                ROW_SERVER => {
                    self.server_focus = ServerFocus::Editor;
                    self.editor.reset();
                    self.show_server_ip(ctx);
                }
                ROW_BACK => return Transition::Pop,
                _ => {}
            },
            Screen::Protocol | Screen::Duration | Screen::Bandwidth | Screen::Parallel => {
                self.choose_option(self.submenu.selected(), ctx);
            }
            Screen::ServerIp => match self.server_focus {
                ServerFocus::Editor => {
                    self.editor.on_button();
                    self.editor.draw(ctx.display, true);
                    if !self.editor.is_editing() {
                        self.remember_server(ctx);
                    }
                }
                ServerFocus::Discover => self.start_discovery(ctx),
                ServerFocus::Back => {
                    self.remember_server(ctx);
                    self.show_main(ctx);
                }
            },
            Screen::Servers => {
                let index = self.submenu.selected();
                let chosen = (index + 1 < self.submenu.len())
                    .then(|| self.servers.get(index).cloned())
                    .flatten();
                if let Some(server) = chosen {
                    ctx.logger.info(format!("selected server {}:{}", server.ip, server.port));
                    self.editor.set_ip(&server.ip);
                    self.port = server.port;
                    self.remember_server(ctx);
                }
                self.server_focus = ServerFocus::Editor;
                self.show_server_ip(ctx);
            }
            Screen::NoServers => self.show_server_ip(ctx),
            Screen::Discovering => {}
            Screen::Testing => {
                if self.cancel_prompt {
                    self.cancel_test(ctx);
                } else {
                    self.cancel_prompt = true;
                    ctx.display.draw_text(0, 56, "Cancel test? Press again");
                }
            }
            Screen::Results => self.show_main(ctx),
        }
        Transition::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::Rig;
    use std::time::{Duration, Instant};

    fn client_with_fake_iperf(dir: &std::path::Path, json: &str) -> ThroughputClient {
        let fixture = dir.join("iperf.json");
        std::fs::write(&fixture, json).unwrap();
        let mut deps = ModuleDependencies::default();
        deps.add(MODULE_ID, "iperf3_path", &format!("cat {} #", fixture.display()));
        ThroughputClient::from_deps(&deps)
            .with_paths(dir.join("result.txt"), dir.join("avahi.txt"))
    }

    fn wait_for(client: &mut ThroughputClient, screen: Screen, ctx: &mut ModuleContext<'_>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while client.screen() != screen {
            assert!(Instant::now() < deadline, "never reached {screen:?}");
            client.update(ctx);
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn defaults_come_from_dependencies() {
        let mut deps = ModuleDependencies::default();
        deps.add(MODULE_ID, "default_protocol", "udp");
        deps.add(MODULE_ID, "default_duration", "30");
        deps.add(MODULE_ID, "default_bandwidth", "2500");
        deps.add(MODULE_ID, "default_server_ip", "10.1.2.3");
        deps.add(MODULE_ID, "default_port", "5301");
        let client = ThroughputClient::from_deps(&deps);
        assert_eq!(
            client.main_labels(),
            [
                "Start Test",
                "Reverse Test",
                "Proto: UDP",
                "Duration: 30s",
                "BW: 2.5G",
                "Parallel: 1",
                "010.001.002.003",
                "Back"
            ]
        );
        assert_eq!(client.port(), 5301);
    }

    #[test]
    fn submenu_choice_updates_setting() {
        let mut rig = Rig::new();
        let log = rig.log.clone();
        let mut client = ThroughputClient::from_deps(&ModuleDependencies::default());
        let mut ctx = rig.ctx();
        client.enter(&mut ctx);
        assert_eq!(log.text_at(0, 0).as_deref(), Some("Client(Ready)"));
        for _ in 0..ROW_PARALLEL {
            client.on_rotate(1, &mut ctx);
        }
        client.on_button(&mut ctx);
        assert_eq!(client.screen(), Screen::Parallel);
        assert_eq!(log.text_at(0, 16), Some(pad_line(">[1]")));
        client.on_rotate(1, &mut ctx);
        client.on_rotate(1, &mut ctx);
        client.on_button(&mut ctx);
        assert_eq!(client.screen(), Screen::Main);
        assert_eq!(client.params().parallel, 8);
    }

    #[test]
    fn tcp_test_shows_speed_and_retransmits() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{"end": {"sum_sent": {"bits_per_second": 950000000, "retransmits": 3}}}"#;
        let mut client = client_with_fake_iperf(dir.path(), json);
        let mut rig = Rig::new();
        let log = rig.log.clone();
        let mut ctx = rig.ctx();
        client.enter(&mut ctx);
        client.on_button(&mut ctx);
        assert_eq!(log.text_at(0, 0).as_deref(), Some("    Testing"));
        wait_for(&mut client, Screen::Results, &mut ctx);
        assert_eq!(log.text_at(0, 24).as_deref(), Some("Speed :950.0Mbps"));
        assert_eq!(log.text_at(0, 32).as_deref(), Some("Retrns:3"));
        client.on_button(&mut ctx);
        assert_eq!(client.screen(), Screen::Main);
    }

    #[test]
    fn second_press_cancels_a_running_test() {
        let dir = tempfile::tempdir().unwrap();
        let mut deps = ModuleDependencies::default();
        deps.add(MODULE_ID, "iperf3_path", "sleep 30 #");
        let mut client = ThroughputClient::from_deps(&deps)
            .with_paths(dir.path().join("r.txt"), dir.path().join("a.txt"));
        let mut rig = Rig::new();
        let log = rig.log.clone();
        let mut ctx = rig.ctx();
        client.enter(&mut ctx);
        client.on_button(&mut ctx);
        assert_eq!(client.screen(), Screen::Testing);
        client.on_button(&mut ctx);
        assert_eq!(log.text_at(0, 56).as_deref(), Some("Cancel test? Press again"));
        client.on_button(&mut ctx);
        assert_eq!(client.screen(), Screen::Main);
        assert!(client.test.is_none());
    }
}
