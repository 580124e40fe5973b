//! Configurable list of shell actions, optionally filled from a script and run asynchronously.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::config::ModuleConfig;
use crate::display::pad_line;
use crate::menu::{step_of, ListView, ModuleContext, ScreenModule, Transition};
use crate::process::run_capture;
use crate::{Error, Result};

use super::job::{AsyncJob, JobState, DEFAULT_TIMEOUT};

/// Rows kept across reloads of a dynamic list.
const STATIC_TITLES: [&str; 2] = ["Back", "Stop-Playback"];
const LAUNCH_PREFIX: &str = "launch_module:";
pub const EXIT_TO_MAIN_MENU: &str = "exit_to_main_menu";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListItem {
    pub title: String,
    #[serde(default)]
    pub action: String,
    #[serde(rename = "async", default)]
    pub is_async: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub progress_title: String,
    #[serde(default)]
    pub parse_progress: bool,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl ListItem {
    pub fn new(title: &str, action: &str) -> Self {
        Self {
            title: title.to_string(),
            action: action.to_string(),
            is_async: false,
            timeout: default_timeout_secs(),
            log_file: None,
            progress_title: String::new(),
            parse_progress: false,
        }
    }

    fn is_back(&self) -> bool {
        matches!(self.title.as_str(), "Back" | "back" | "BACK")
    }
}

#[derive(Debug)]
pub struct GenericList {
    id: String,
    title: String,
    items: Vec<ListItem>,
    list: ListView,
    items_source: Option<String>,
    items_path: Option<String>,
    items_action: Option<String>,
    prepend_static_items: bool,
    selection_script: Option<String>,
    notify_on_exit: bool,
    callback_action: Option<String>,
    job: Option<AsyncJob>,
}

impl GenericList {
    pub fn new(id: &str, title: &str, items: Vec<ListItem>) -> Self {
        let labels = items.iter().map(|i| i.title.clone()).collect();
        Self {
            id: id.to_string(),
            title: title.to_string(),
            items,
            list: ListView::new(labels),
            items_source: None,
            items_path: None,
            items_action: None,
            prepend_static_items: false,
            selection_script: None,
            notify_on_exit: false,
            callback_action: None,
            job: None,
        }
    }

    /// Build from a `GenericList` module entry. A list with neither `list_items` nor an
    /// `items_source` is a configuration error.
    pub fn from_config(config: &ModuleConfig) -> Result<Self> {
        let items: Vec<ListItem> = match config.extra.get("list_items") {
            Some(Value::Array(raw)) => raw
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect(),
            _ => Vec::new(),
        };
        let source = config.str_key("items_source").map(str::to_string);
        if items.is_empty() && source.is_none() {
            return Err(Error::Config(format!(
                "GenericList '{}' has no list_items or items_source",
                config.id
            )));
        }
        let mut list = Self::new(&config.id, &config.title, items);
        list.items_source = source;
        list.items_path = config.str_key("items_path").map(str::to_string);
        list.items_action = config.str_key("items_action").map(str::to_string);
        list.prepend_static_items = config.bool_key("prepend_static_items").unwrap_or(false);
        list.selection_script = config.str_key("list_selection").map(str::to_string);
        list.notify_on_exit = config.bool_key("notify_on_exit").unwrap_or(false);
        list.callback_action = config.str_key("callback_action").map(str::to_string);
        Ok(list)
    }

    pub fn with_items_source(mut self, source: &str, action: Option<&str>) -> Self {
        self.items_source = Some(source.to_string());
        self.items_action = action.map(str::to_string);
        self
    }

    pub fn with_selection_script(mut self, script: &str) -> Self {
        self.selection_script = Some(script.to_string());
        self
    }

    pub fn with_callback(mut self, action: &str, on_exit: bool) -> Self {
        self.callback_action = Some(action.to_string());
        self.notify_on_exit = on_exit;
        self
    }

    pub fn titles(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.title.as_str()).collect()
    }

    pub fn job_state(&self) -> JobState {
        self.job.as_ref().map_or(JobState::Idle, AsyncJob::state)
    }

    pub fn job_pid(&self) -> Option<u32> {
        self.job.as_ref().and_then(AsyncJob::pid)
    }

    /// Re-run `items_source`, keeping `Back` and `Stop-Playback` rows.
    fn load_dynamic_items(&mut self, ctx: &ModuleContext<'_>) {
        let Some(source) = self.items_source.as_deref() else {
            return;
        };
        let command = match self.items_path.as_deref() {
            Some(path) => format!("{source} {path}"),
            None => source.to_string(),
        };
        let output = match run_capture(&command) {
            Ok(out) => out,
            Err(err) => {
                ctx.logger.warn(format!("items_source for {} failed: {err}", self.id));
                String::new()
            }
        };
        let statics: Vec<ListItem> = self
            .items
            .iter()
            .filter(|i| STATIC_TITLES.contains(&i.title.as_str()))
            .cloned()
            .collect();
        let action = self.items_action.clone().unwrap_or_default();
        let dynamic = output
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .map(|l| ListItem::new(l, &action));

        let mut items = Vec::new();
        if self.prepend_static_items {
            items.extend(statics.iter().cloned());
        }
        items.extend(dynamic);
        if !self.prepend_static_items {
            items.extend(statics);
        }
        ctx.logger.debug(format!("{}: loaded {} items", self.id, items.len()));
        self.list.set_items(items.iter().map(|i| i.title.clone()).collect());
        self.items = items;
    }

    /// Mark the row whose title equals the selection script's output.
    fn refresh_marked(&mut self, ctx: &ModuleContext<'_>) {
        let Some(script) = self.selection_script.as_deref() else {
            return;
        };
        let current = run_capture(script).unwrap_or_default();
        let current = current.trim_end_matches(['\n', '\r']);
        let marked = self.items.iter().position(|i| i.title == current);
        if marked.is_none() {
            ctx.logger.trace(format!("{}: no row matches state '{current}'", self.id));
        }
        self.list.set_marked(marked);
    }

    fn render_list(&mut self, ctx: &mut ModuleContext<'_>) {
        self.refresh_marked(ctx);
        self.list.render_full(ctx.display, &self.title);
    }

    fn exit_transition(&self, ctx: &ModuleContext<'_>) -> Transition {
        match (self.notify_on_exit, self.callback_action.as_deref()) {
            (true, Some(EXIT_TO_MAIN_MENU)) => Transition::PopToRoot,
            (true, Some(other)) => {
                ctx.logger.debug(format!("{}: exit callback '{other}' has no handler", self.id));
                Transition::Pop
            }
            _ => Transition::Pop,
        }
    }

    fn activate(&mut self, index: usize, ctx: &mut ModuleContext<'_>) -> Transition {
        let Some(item) = self.items.get(index).cloned() else {
            return Transition::Continue;
        };
        if item.is_back() {
            return self.exit_transition(ctx);
        }
        if item.is_async {
            self.start_job(&item, ctx);
            return Transition::Continue;
        }
        if item.action.is_empty() {
            return Transition::Continue;
        }
        let action = item.action.replace("$1", &item.title);
        if let Some(kind) = action.strip_prefix(LAUNCH_PREFIX) {
            ctx.logger.debug(format!("{}: launching {kind} for {}", self.id, item.title));
            return Transition::Launch {
                kind: kind.to_string(),
                param: item.title.clone(),
            };
        }
        match run_capture(&action) {
            Ok(_) => ctx.logger.debug(format!("{}: executed action: {action}", self.id)),
            Err(err) => ctx.logger.warn(format!("{}: action failed: {err}", self.id)),
        }
        if !self.notify_on_exit && self.callback_action.as_deref() == Some(EXIT_TO_MAIN_MENU) {
            return Transition::PopToRoot;
        }
        self.render_list(ctx);
        Transition::Continue
    }

    fn start_job(&mut self, item: &ListItem, ctx: &mut ModuleContext<'_>) {
        let command = item.action.replace("$1", &item.title);
        let title = item.progress_title.replace("$1", &item.title);
        let job = AsyncJob::start(
            &command,
            item.log_file.clone(),
            Duration::from_secs(item.timeout),
            item.parse_progress,
            ctx.logger,
        );
        let failed = job.state() != JobState::Running;
        self.job = Some(job);
        if failed {
            self.render_result(ctx);
            return;
        }
        ctx.display.clear();
        ctx.display.draw_text(0, 0, &title);
        if let Some(line) = self.job.as_mut().and_then(AsyncJob::progress_update) {
            ctx.display.draw_text(0, 16, &line);
        }
    }

    fn render_result(&self, ctx: &mut ModuleContext<'_>) {
        let Some(job) = self.job.as_ref() else {
            return;
        };
        ctx.display.clear();
        if job.state() == JobState::Completed {
            ctx.display.draw_text(0, 0, "Update");
            ctx.display.draw_text(0, 8, "Success!");
            ctx.display.draw_text(0, 24, "Press any button");
        } else {
            for (y, line) in [0u8, 8].into_iter().zip(job.message().lines()) {
                ctx.display.draw_text(0, y, line);
            }
            ctx.display.draw_text(0, 24, "Press button");
        }
        ctx.display.draw_text(0, 32, "to continue");
    }

    /// Any input on the result screen dismisses it. Returns true when it did.
    fn dismiss_result(&mut self, ctx: &mut ModuleContext<'_>) -> bool {
        match self.job.as_mut() {
            Some(job) if job.state().is_finished() => {
                job.acknowledge();
                self.job = None;
                self.render_list(ctx);
                true
            }
            _ => false,
        }
    }

    fn job_running(&self) -> bool {
        self.job_state() == JobState::Running
    }
}

impl ScreenModule for GenericList {
    fn id(&self) -> &str {
        &self.id
    }

    fn enter(&mut self, ctx: &mut ModuleContext<'_>) {
        ctx.logger.debug(format!("entering list {}", self.id));
        self.load_dynamic_items(ctx);
        self.list.reset();
        self.render_list(ctx);
    }

    fn update(&mut self, ctx: &mut ModuleContext<'_>) -> Transition {
        let Some(job) = self.job.as_mut() else {
            return Transition::Continue;
        };
        if job.state() != JobState::Running {
            return Transition::Continue;
        }
        if job.poll(ctx.logger) == JobState::Running {
            if let Some(line) = job.progress_update() {
                ctx.display.draw_text(0, 16, &pad_line(&line));
            }
        } else {
            self.render_result(ctx);
        }
        Transition::Continue
    }

    fn exit(&mut self, ctx: &mut ModuleContext<'_>) {
        if let Some(job) = self.job.as_mut() {
            job.cancel(ctx.logger);
        }
        self.job = None;
        ctx.display.clear();
    }

    fn on_rotate(&mut self, steps: i32, ctx: &mut ModuleContext<'_>) -> Transition {
        if self.dismiss_result(ctx) || self.job_running() {
            return Transition::Continue;
        }
        self.list.rotate(step_of(steps), ctx.display);
        Transition::Continue
    }

    fn on_button(&mut self, ctx: &mut ModuleContext<'_>) -> Transition {
        if self.dismiss_result(ctx) {
            return Transition::Continue;
        }
        if self.job_running() {
            ctx.logger.debug(format!("{}: ignoring button while job runs", self.id));
            return Transition::Continue;
        }
        self.activate(self.list.selected(), ctx)
    }

    fn resume(&mut self, ctx: &mut ModuleContext<'_>) {
        self.render_list(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::Rig;

    fn config(raw: serde_json::Value) -> ModuleConfig {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn config_without_items_is_rejected() {
        let cfg = config(serde_json::json!({"id": "empty", "title": "Empty", "type": "GenericList"}));
        assert!(matches!(GenericList::from_config(&cfg), Err(Error::Config(_))));
    }

    #[test]
    fn item_defaults_follow_config() {
        let cfg = config(serde_json::json!({
            "id": "flash", "title": "Flash", "type": "GenericList",
            "list_items": [
                {"title": "Go", "action": "echo $1", "async": true, "log_file": "/tmp/x.log"},
                {"title": "Back"}
            ]
        }));
        let list = GenericList::from_config(&cfg).unwrap();
        assert_eq!(list.items[0].timeout, 300);
        assert!(list.items[0].is_async);
        assert!(list.items[1].is_back());
    }

    #[test]
    fn dynamic_items_are_deterministic_and_keep_static_rows() {
        let mut rig = Rig::new();
        let mut list = GenericList::new(
            "media",
            "Media",
            vec![ListItem::new("Stop-Playback", "true"), ListItem::new("Back", "")],
        )
        .with_items_source("printf 'a.mp4\\n\\nb.mp4\\n'", Some("play $1"));
        list.enter(&mut rig.ctx());
        assert_eq!(list.titles(), ["a.mp4", "b.mp4", "Stop-Playback", "Back"]);
        assert_eq!(list.items[0].action, "play $1");
        list.enter(&mut rig.ctx());
        assert_eq!(list.titles(), ["a.mp4", "b.mp4", "Stop-Playback", "Back"]);

        list.prepend_static_items = true;
        list.enter(&mut rig.ctx());
        assert_eq!(list.titles(), ["Stop-Playback", "Back", "a.mp4", "b.mp4"]);
    }

    #[test]
    fn selection_script_marks_current_row() {
        let mut rig = Rig::new();
        let mut list = GenericList::new(
            "mode",
            "Mode",
            vec![ListItem::new("Fast", ""), ListItem::new("Slow", "")],
        )
        .with_selection_script("echo Slow");
        list.enter(&mut rig.ctx());
        assert_eq!(rig.log.text_at(0, 16), Some(pad_line("> Fast")));
        assert_eq!(rig.log.text_at(0, 24), Some(pad_line(" [Slow]")));
    }

    #[test]
    fn launch_and_back_become_transitions() {
        let mut rig = Rig::new();
        let mut list = GenericList::new(
            "ifaces",
            "Interfaces",
            vec![
                ListItem::new("eth0", "launch_module:textbox"),
                ListItem::new("Back", ""),
            ],
        )
        .with_callback(EXIT_TO_MAIN_MENU, true);
        let mut ctx = rig.ctx();
        list.enter(&mut ctx);
        match list.on_button(&mut ctx) {
            Transition::Launch { kind, param } => {
                assert_eq!(kind, "textbox");
                assert_eq!(param, "eth0");
            }
            other => panic!("unexpected {other:?}"),
        }
        list.on_rotate(1, &mut ctx);
        assert!(matches!(list.on_button(&mut ctx), Transition::PopToRoot));
    }

    #[test]
    fn sync_action_substitutes_title() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let mut rig = Rig::new();
        let action = format!("echo $1 > {}", out.display());
        let mut list = GenericList::new("sync", "Sync", vec![ListItem::new("hello", &action)]);
        let mut ctx = rig.ctx();
        list.enter(&mut ctx);
        assert!(list.on_button(&mut ctx).is_continue());
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "hello");
    }

    #[test]
    fn async_timeout_kills_and_waits_for_ack() {
        let mut rig = Rig::new();
        let log = rig.log.clone();
        let mut item = ListItem::new("Flash", "sleep 30");
        item.is_async = true;
        item.timeout = 1;
        item.progress_title = "Flashing $1".into();
        let mut list = GenericList::new("flash", "Flash", vec![item]);
        let mut ctx = rig.ctx();
        list.enter(&mut ctx);
        list.on_button(&mut ctx);
        assert_eq!(list.job_state(), JobState::Running);
        assert!(list.job_pid().is_some());
        assert_eq!(log.text_at(0, 0).as_deref(), Some("Flashing Flash"));
        assert_eq!(log.text_at(0, 16).as_deref(), Some("0% - 0:00"));

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while list.job_state() == JobState::Running {
            assert!(std::time::Instant::now() < deadline);
            list.update(&mut ctx);
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(list.job_state(), JobState::Timeout);
        assert!(list.job_pid().is_none());
        assert_eq!(log.text_at(0, 0).as_deref(), Some("Action timed-out"));
        assert_eq!(log.text_at(0, 24).as_deref(), Some("Press button"));

        assert!(list.on_rotate(1, &mut ctx).is_continue());
        assert_eq!(list.job_state(), JobState::Idle);
        assert_eq!(log.text_at(0, 0).as_deref(), Some("Flash"));
    }
}
