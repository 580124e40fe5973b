//! Per-module `depends` table: scripts, helpers and other values a module reads at runtime.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde_json::Value;

use crate::app::Logger;

use super::MenuLayout;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleDependencies {
    table: HashMap<String, BTreeMap<String, String>>,
}

impl ModuleDependencies {
    pub fn from_layout(layout: &MenuLayout, logger: &Logger) -> Self {
        let mut deps = Self::default();
        for (id, module) in &layout.modules {
            for (key, value) in &module.depends {
                match value {
                    Value::String(s) => {
                        logger.debug(format!("registered dependency for {id}: {key} -> {s}"));
                        deps.add(id, key, s);
                    }
                    _ => logger.warn(format!(
                        "ignoring non-string dependency '{key}' for module {id}"
                    )),
                }
            }
        }
        deps
    }

    pub fn add(&mut self, module: &str, key: &str, value: &str) {
        self.table
            .entry(module.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, module: &str, key: &str) -> Option<&str> {
        self.table.get(module)?.get(key).map(String::as_str)
    }

    pub fn has(&self, module: &str, key: &str) -> bool {
        self.get(module, key).is_some()
    }

    pub fn for_module(&self, module: &str) -> Option<&BTreeMap<String, String>> {
        self.table.get(module)
    }

    /// Menus carry no dependencies of their own.
    pub fn should_skip(module: &str) -> bool {
        module.contains("_menu")
    }

    /// Local paths among the module's dependencies that do not exist. URLs are not checked.
    pub fn missing(&self, module: &str) -> Vec<String> {
        if Self::should_skip(module) {
            return Vec::new();
        }
        let Some(entries) = self.table.get(module) else {
            return Vec::new();
        };
        entries
            .values()
            .filter(|v| looks_like_path(v))
            .filter(|v| !Path::new(first_word(v)).exists())
            .cloned()
            .collect()
    }

    /// Log unmet dependencies. Missing files never block a module from opening.
    pub fn check(&self, module: &str, logger: &Logger) -> bool {
        for path in self.missing(module) {
            logger.warn(format!("dependency not satisfied: {path} for module {module}"));
        }
        true
    }
}

fn looks_like_path(value: &str) -> bool {
    !(value.starts_with("http://") || value.starts_with("https://"))
        && (value.starts_with('/') || value.starts_with("./"))
}

/// Script dependencies may carry arguments after the path.
fn first_word(value: &str) -> &str {
    value.split_whitespace().next().unwrap_or(value)
}

/// Replace `$NAME` with the matching runtime parameter; unknown names are left as is.
pub fn substitute_params(text: &str, params: &BTreeMap<String, String>) -> String {
    let mut out = text.to_string();
    // Longest names first so `$IF` does not clobber `$IFACE`.
    let mut names: Vec<&String> = params.keys().collect();
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));
    for name in names {
        out = out.replace(&format!("${name}"), &params[name]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader;

    #[test]
    fn table_is_built_from_string_entries() {
        let raw = r#"{"modules": [
            {"id": "version", "title": "Version", "type": "textbox",
             "depends": {"script_path": "/usr/bin/micropanel-version.sh", "refresh_sec": 2}},
            {"id": "tools_menu", "title": "Tools", "type": "menu",
             "depends": {"script": "/does/not/exist"}}
        ]}"#;
        let layout = loader::parse(raw, &Logger::silent()).unwrap();
        let deps = ModuleDependencies::from_layout(&layout, &Logger::silent());
        assert_eq!(
            deps.get("version", "script_path"),
            Some("/usr/bin/micropanel-version.sh")
        );
        assert!(!deps.has("version", "refresh_sec"));
        assert!(deps.missing("tools_menu").is_empty());
    }

    #[test]
    fn missing_reports_local_paths_only() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("helper.sh");
        std::fs::write(&present, "#!/bin/sh\n").unwrap();
        let mut deps = ModuleDependencies::default();
        deps.add("m", "present", &format!("{} --flag", present.display()));
        deps.add("m", "absent", "/nonexistent/helper.sh");
        deps.add("m", "url", "https://example.com/api");
        deps.add("m", "word", "ifconfig");
        assert_eq!(deps.missing("m"), vec!["/nonexistent/helper.sh".to_string()]);
        assert!(deps.check("m", &Logger::silent()));
    }

    #[test]
    fn params_substitute_longest_name_first() {
        let mut params = BTreeMap::new();
        params.insert("IF".to_string(), "x".to_string());
        params.insert("INTERFACE".to_string(), "eth0".to_string());
        assert_eq!(
            substitute_params("$INTERFACE Stats via $IF and $OTHER", &params),
            "eth0 Stats via x and $OTHER"
        );
    }
}
