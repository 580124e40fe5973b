use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::app::Logger;
use crate::{Error, Result};

use super::{MenuEntry, MenuLayout, ModuleConfig, ModuleKind, INVERT_DISPLAY_ID};

pub fn load_from_path(path: &Path, logger: &Logger) -> Result<MenuLayout> {
    logger.debug(format!("loading configuration from {}", path.display()));
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("could not open {}: {e}", path.display())))?;
    parse(&raw, logger)
}

/// Build the menu layout from the JSON text. Malformed module entries are skipped.
pub fn parse(raw: &str, logger: &Logger) -> Result<MenuLayout> {
    let doc: Value = serde_json::from_str(raw)?;
    let modules = doc
        .get("modules")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Config("config has no 'modules' array".into()))?;

    let mut layout = MenuLayout {
        root: Vec::new(),
        modules: BTreeMap::new(),
        persistent_file: doc
            .pointer("/persistent_data/file_path")
            .and_then(Value::as_str)
            .map(PathBuf::from),
    };

    logger.debug(format!("found {} modules in config", modules.len()));
    for raw_module in modules {
        let module: ModuleConfig = match serde_json::from_value(raw_module.clone()) {
            Ok(module) => module,
            Err(err) => {
                logger.warn(format!("skipping module with missing required field: {err}"));
                continue;
            }
        };
        if module.enabled {
            match module.kind() {
                ModuleKind::Action if module.id != INVERT_DISPLAY_ID => {
                    logger.warn(format!("unknown action '{}' ignored", module.id));
                }
                _ => layout.root.push(MenuEntry::new(&module.id, &module.title)),
            }
        }
        if layout.modules.contains_key(&module.id) {
            logger.warn(format!("duplicate module id '{}', keeping the last one", module.id));
        }
        layout.modules.insert(module.id.clone(), module);
    }

    let invert = doc.pointer("/options/invert_display");
    let invert_enabled = invert
        .and_then(|o| o.get("enabled"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if let Some(title) = invert
        .and_then(|o| o.get("title"))
        .and_then(Value::as_str)
        .filter(|_| invert_enabled)
    {
        layout.root.push(MenuEntry::new(INVERT_DISPLAY_ID, title));
        logger.debug(format!("added invert display option: {title}"));
    }

    Ok(layout)
}
