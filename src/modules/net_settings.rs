//! Static/DHCP configuration of one interface through the `dhcp-net-settings.sh` helper.
//!
//! The helper prints `mode=`, `ip=`, `gateway=`, `netmask=` lines and a closing
//! `RESULT:OK` or `RESULT:ERROR`; the same script applies a new configuration.

use crate::config::ModuleDependencies;
use crate::display::pad_line;
use crate::menu::list_view::SEPARATOR;
use crate::menu::{IpEditor, ModuleContext, Notice, ScreenModule, Transition};
use crate::process::run_capture;

pub const MODULE_ID: &str = "netsettings";
pub const DEFAULT_SCRIPT: &str = "/usr/bin/dhcp-net-settings.sh";
pub const DEFAULT_INTERFACE: &str = "eth0";
const MAIN_ROWS: usize = 6;
const MODE_ROWS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Static,
    Dhcp,
}

impl Mode {
    fn label(self) -> &'static str {
        match self {
            Mode::Static => "Static",
            Mode::Dhcp => "DHCP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub mode: Mode,
    pub ip: Option<String>,
    pub gateway: Option<String>,
    pub netmask: Option<String>,
}

/// Parse helper output. `None` when the helper reported `RESULT:ERROR` or named no mode.
pub fn parse_settings(output: &str) -> Option<Settings> {
    let mut mode = None;
    let mut settings = Settings {
        mode: Mode::Dhcp,
        ip: None,
        gateway: None,
        netmask: None,
    };
    for line in output.lines().map(str::trim) {
        if let Some(result) = line.strip_prefix("RESULT:") {
            if result.contains("ERROR") {
                return None;
            }
        } else if let Some(value) = line.strip_prefix("mode=") {
            mode = match value {
                "static" => Some(Mode::Static),
                "dhcp" => Some(Mode::Dhcp),
                _ => mode,
            };
        } else if let Some(value) = line.strip_prefix("ip=") {
            settings.ip = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("gateway=") {
            settings.gateway = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("netmask=") {
            settings.netmask = Some(value.to_string());
        }
    }
    settings.mode = mode?;
    Some(settings)
}

fn reports_ok(output: &str) -> bool {
    output
        .lines()
        .filter_map(|l| l.trim().strip_prefix("RESULT:"))
        .any(|r| r.contains("OK"))
}

/// `os_info`'s distribution name, lower-cased for the helper's `--os=`.
pub fn detected_os() -> String {
    os_info::get().os_type().to_string().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Ip,
    Gateway,
    Netmask,
}

impl Field {
    fn title(self) -> &'static str {
        match self {
            Field::Ip => "IP",
            Field::Gateway => "Gateway",
            Field::Netmask => "Netmask",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Main,
    Mode,
    Address(Field),
}

#[derive(Debug)]
pub struct NetSettings {
    script: String,
    os_type: String,
    iface: String,
    mode: Mode,
    ip: IpEditor,
    gateway: IpEditor,
    netmask: IpEditor,
    screen: Screen,
    main_selected: usize,
    mode_selected: usize,
    /// On an address screen: editor (false) or `Back` (true).
    on_back: bool,
}

impl NetSettings {
    pub fn from_deps(deps: &ModuleDependencies) -> Self {
        let dep = |key: &str| deps.get(MODULE_ID, key).map(str::to_string);
        Self {
            script: dep("action_script").unwrap_or_else(|| DEFAULT_SCRIPT.to_string()),
            os_type: dep("os_type").unwrap_or_else(detected_os),
            iface: dep("iface_name").unwrap_or_else(|| DEFAULT_INTERFACE.to_string()),
            mode: Mode::Dhcp,
            ip: IpEditor::new("192.168.001.001", 16),
            gateway: IpEditor::new("192.168.001.001", 16),
            netmask: IpEditor::new("255.255.255.000", 16),
            screen: Screen::Main,
            main_selected: 0,
            mode_selected: 0,
            on_back: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    fn base_command(&self) -> String {
        format!("{} --os={} --interface={}", self.script, self.os_type, self.iface)
    }

    pub fn apply_command(&self) -> String {
        match self.mode {
            Mode::Static => format!(
                "{} --mode=static --ip={} --gateway={} --netmask={}",
                self.base_command(),
                self.ip.address(),
                self.gateway.address(),
                self.netmask.address()
            ),
            Mode::Dhcp => format!("{} --mode=dhcp", self.base_command()),
        }
    }

    fn refresh(&mut self, ctx: &mut ModuleContext<'_>) {
        let command = self.base_command();
        let settings = match run_capture(&command) {
            Ok(out) => parse_settings(&out),
            Err(err) => {
                ctx.logger.info(format!("network settings helper unavailable: {err}"));
                return;
            }
        };
        let Some(settings) = settings else {
            ctx.logger.warn("network settings helper reported an error, keeping current values");
            return;
        };
        self.mode = settings.mode;
        for (editor, value) in [
            (&mut self.ip, &settings.ip),
            (&mut self.gateway, &settings.gateway),
            (&mut self.netmask, &settings.netmask),
        ] {
            if let Some(value) = value {
                editor.set_ip(value);
            }
        }
        ctx.logger.debug(format!(
            "{}: mode={} ip={}",
            self.iface,
            self.mode.label(),
            self.ip.address()
        ));
    }

    fn apply(&mut self, ctx: &mut ModuleContext<'_>) -> bool {
        let command = self.apply_command();
        ctx.logger.info(format!("applying network settings: {command}"));
        match run_capture(&command) {
            Ok(out) if reports_ok(&out) => true,
            Ok(_) => {
                ctx.logger.error("network settings helper did not confirm the change");
                false
            }
            Err(err) => {
                ctx.logger.error(format!("failed to run network settings helper: {err}"));
                false
            }
        }
    }

    fn editor(&self, field: Field) -> &IpEditor {
        match field {
            Field::Ip => &self.ip,
            Field::Gateway => &self.gateway,
            Field::Netmask => &self.netmask,
        }
    }

    fn editor_mut(&mut self, field: Field) -> &mut IpEditor {
        match field {
            Field::Ip => &mut self.ip,
            Field::Gateway => &mut self.gateway,
            Field::Netmask => &mut self.netmask,
        }
    }

    fn draw_main(&self, ctx: &mut ModuleContext<'_>) {
        ctx.display.clear();
        ctx.display.draw_text(0, 0, "  Net Settings");
        ctx.display.draw_text(0, 8, SEPARATOR);
        let rows = [
            format!("Mode: {}", self.mode.label()),
            "IP".to_string(),
            "Gateway".to_string(),
            "Netmask".to_string(),
            "Apply".to_string(),
            "Back".to_string(),
        ];
        for (i, row) in rows.iter().enumerate() {
            let marker = if i == self.main_selected { '>' } else { ' ' };
            ctx.display
                .draw_text(0, 16 + i as u8 * 8, &pad_line(&format!("{marker}{row}")));
        }
    }

    fn draw_mode(&self, ctx: &mut ModuleContext<'_>) {
        ctx.display.clear();
        ctx.display.draw_text(0, 0, "Mode");
        ctx.display.draw_text(0, 8, SEPARATOR);
        for (i, row) in ["Static", "Dhcp", "Back"].iter().enumerate() {
            let marker = if i == self.mode_selected { '>' } else { ' ' };
            ctx.display
                .draw_text(0, 16 + i as u8 * 8, &pad_line(&format!("{marker}{row}")));
        }
    }

    fn draw_address(&self, field: Field, ctx: &mut ModuleContext<'_>) {
        self.editor(field).draw(ctx.display, !self.on_back);
        let marker = if self.on_back { '>' } else { ' ' };
        ctx.display
            .draw_text(0, 32, &pad_line(&format!("{marker}Back")));
    }

    fn open_address(&mut self, field: Field, ctx: &mut ModuleContext<'_>) {
        if self.mode != Mode::Static {
            return;
        }
        self.screen = Screen::Address(field);
        self.on_back = false;
        self.editor_mut(field).reset();
        ctx.display.clear();
        ctx.display.draw_text(0, 0, field.title());
        ctx.display.draw_text(0, 8, SEPARATOR);
        self.draw_address(field, ctx);
    }

    fn show_main(&mut self, ctx: &mut ModuleContext<'_>) {
        self.screen = Screen::Main;
        self.draw_main(ctx);
    }
}

impl ScreenModule for NetSettings {
    fn id(&self) -> &str {
        MODULE_ID
    }

    fn enter(&mut self, ctx: &mut ModuleContext<'_>) {
        self.main_selected = 0;
        self.mode_selected = 0;
        self.refresh(ctx);
        self.show_main(ctx);
    }

    fn resume(&mut self, ctx: &mut ModuleContext<'_>) {
        self.show_main(ctx);
    }

    fn on_rotate(&mut self, steps: i32, ctx: &mut ModuleContext<'_>) -> Transition {
        let direction = steps.signum();
        match self.screen {
            Screen::Main => {
                let next = (self.main_selected as i32 + direction).clamp(0, MAIN_ROWS as i32 - 1);
                self.main_selected = next as usize;
                self.draw_main(ctx);
            }
            Screen::Mode => {
                let next = (self.mode_selected as i32 + direction).clamp(0, MODE_ROWS as i32 - 1);
                self.mode_selected = next as usize;
                self.draw_mode(ctx);
            }
            Screen::Address(field) => {
                if !self.on_back && self.editor_mut(field).on_rotate(steps) {
                    self.editor(field).draw(ctx.display, true);
                } else {
                    self.on_back = !self.on_back;
                    self.draw_address(field, ctx);
                }
            }
        }
        Transition::Continue
    }

    fn on_button(&mut self, ctx: &mut ModuleContext<'_>) -> Transition {
        match self.screen {
            Screen::Main => match self.main_selected {
                0 => {
                    self.screen = Screen::Mode;
                    self.mode_selected = usize::from(self.mode == Mode::Dhcp);
                    self.draw_mode(ctx);
                }
                1 => self.open_address(Field::Ip, ctx),
                2 => self.open_address(Field::Gateway, ctx),
                3 => self.open_address(Field::Netmask, ctx),
                4 => {
                    let message = if self.apply(ctx) {
                        "Settings applied"
                    } else {
                        "Apply failed"
                    };
                    return Transition::Push(Box::new(Notice::new(
                        "netsettings_result",
                        vec![(0, "  Net Settings".into()), (24, message.into())],
                        crate::menu::notice::NOTICE_DURATION,
                    )));
                }
                _ => return Transition::Pop,
            },
            Screen::Mode => {
                match self.mode_selected {
                    0 => self.mode = Mode::Static,
                    1 => self.mode = Mode::Dhcp,
                    _ => {}
                }
                self.show_main(ctx);
            }
            Screen::Address(field) => {
                if self.on_back {
                    self.show_main(ctx);
                } else {
                    self.editor_mut(field).on_button();
                    self.editor(field).draw(ctx.display, true);
                }
            }
        }
        Transition::Continue
    }
}
