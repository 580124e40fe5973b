use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::app::Logger;
use crate::Result;

pub mod dependency;
pub mod loader;

pub use dependency::ModuleDependencies;

pub const DEFAULT_INPUT_DEVICE: &str = "/dev/input/event0";
pub const DEFAULT_SERIAL_DEVICE: &str = "/dev/ttyACM0";
pub const GPIO_INPUT: &str = "gpio";
pub const I2C_PREFIX: &str = "/dev/i2c-";
pub const MENU_TITLE: &str = "MAIN MENU";
pub const DATA_FILE_SUFFIX: &str = "_data.json";

/// Reserved submenu ids handled by the menu itself.
pub const BACK_ID: &str = "back";
pub const INVERT_DISPLAY_ID: &str = "invert_display";

/// One `modules[]` entry. Type specific keys (GenericList items, scripts, ...) stay in `extra`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModuleConfig {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub depends: Map<String, Value>,
    #[serde(default)]
    pub submenus: Vec<MenuEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModuleConfig {
    pub fn kind(&self) -> ModuleKind {
        match self.kind.as_deref() {
            Some("menu") => ModuleKind::Menu,
            Some("action") => ModuleKind::Action,
            Some("GenericList") => ModuleKind::GenericList,
            Some("textbox") => ModuleKind::TextBox,
            _ => ModuleKind::Builtin,
        }
    }

    pub fn str_key(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn bool_key(&self, key: &str) -> Option<bool> {
        self.extra.get(key).and_then(Value::as_bool)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Menu,
    Action,
    GenericList,
    TextBox,
    Builtin,
}

/// A selectable row: a module id (or `back` / `invert_display`) and its label.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MenuEntry {
    pub id: String,
    pub title: String,
}

impl MenuEntry {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
        }
    }
}

/// Everything the menu needs, resolved from the JSON file or the built-in default.
#[derive(Debug, Clone, PartialEq)]
pub struct MenuLayout {
    /// Rows of `MAIN MENU`, in order.
    pub root: Vec<MenuEntry>,
    /// Configured modules by id.
    pub modules: BTreeMap<String, ModuleConfig>,
    pub persistent_file: Option<PathBuf>,
}

impl Default for MenuLayout {
    fn default() -> Self {
        Self {
            root: default_root_entries(),
            modules: BTreeMap::new(),
            persistent_file: None,
        }
    }
}

impl MenuLayout {
    pub fn load_from_path(path: &Path, logger: &Logger) -> Result<Self> {
        loader::load_from_path(path, logger)
    }

    /// Load `path`, falling back to the default menu with a warning.
    pub fn load_or_default(path: &Path, logger: &Logger) -> Self {
        match loader::load_from_path(path, logger) {
            Ok(layout) => layout,
            Err(err) => {
                logger.warn(format!(
                    "failed to load config from {} ({err}), using default menu",
                    path.display()
                ));
                Self::default()
            }
        }
    }

    pub fn module(&self, id: &str) -> Option<&ModuleConfig> {
        self.modules.get(id)
    }

    /// Menu modules enabled in the file sit directly under `MAIN MENU`.
    pub fn is_top_level(&self, id: &str) -> bool {
        self.modules
            .get(id)
            .is_some_and(|m| m.enabled && m.kind() == ModuleKind::Menu)
    }
}

pub fn default_root_entries() -> Vec<MenuEntry> {
    [
        ("brightness", "Brightness"),
        ("ping", "IP Ping"),
        ("netsettings", "Net Settings"),
        ("throughputserver", "Iperf3 Server"),
        ("throughputclient", "Iperf3 Client"),
        ("network", "Net Info"),
        ("system", "System Stats"),
        ("internet", "Test Internet"),
    ]
    .into_iter()
    .map(|(id, title)| MenuEntry::new(id, title))
    .collect()
}

/// `<config without extension>_data.json`.
pub fn data_file_for(config: &Path) -> PathBuf {
    let mut stem = config.with_extension("").into_os_string();
    stem.push(DATA_FILE_SUFFIX);
    PathBuf::from(stem)
}
