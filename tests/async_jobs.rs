//! GenericList actions run through the menu engine against a real `/bin/sh`.

use micropanel::{
    app::Logger,
    config::{loader, ModuleDependencies},
    display::{Display, RecordingBackend, ScreenLog},
    input::InputEvent,
    menu::{MenuEngine, MenuModule, ModuleContext},
    modules::BuiltinFactory,
    process::{run_capture, ExternalProcess, Output},
    storage::PersistentStore,
};
use std::time::{Duration, Instant};

struct Panel {
    engine: MenuEngine,
    display: Display,
    deps: ModuleDependencies,
    storage: PersistentStore,
    logger: Logger,
    log: ScreenLog,
}

impl Panel {
    fn from_config(raw: &str) -> Self {
        let logger = Logger::silent();
        let layout = loader::parse(raw, &logger).unwrap();
        let (backend, log) = RecordingBackend::new();
        let mut panel = Self {
            engine: MenuEngine::new(
                Box::new(MenuModule::root(&layout.root)),
                Box::new(BuiltinFactory::new(layout.clone())),
                logger.clone(),
            ),
            display: Display::new(Box::new(backend)),
            deps: ModuleDependencies::from_layout(&layout, &logger),
            storage: PersistentStore::in_memory(logger.clone()),
            logger,
            log,
        };
        panel.drive(|engine, ctx| engine.start(ctx));
        panel
    }

    fn drive(&mut self, f: impl FnOnce(&mut MenuEngine, &mut ModuleContext<'_>)) {
        let mut ctx = ModuleContext::new(
            &mut self.display,
            &self.deps,
            &mut self.storage,
            &self.logger,
        );
        f(&mut self.engine, &mut ctx);
    }

    fn send(&mut self, event: InputEvent) {
        self.drive(|engine, ctx| engine.route(event, ctx));
    }

    /// Tick until `done` holds for the screen or the deadline passes.
    fn tick_until(&mut self, limit: Duration, done: impl Fn(&ScreenLog) -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            self.drive(|engine, ctx| engine.update(ctx));
            if done(&self.log) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }
}

fn config(action: &str, timeout: u64, log_file: Option<&str>) -> String {
    let log_file = log_file.map_or(String::new(), |p| format!(r#", "log_file": "{p}""#));
    format!(
        r#"{{"modules": [
            {{"id": "updates", "title": "Updates", "type": "GenericList", "enabled": true,
              "list_items": [
                {{"title": "Flash", "action": "{action}", "async": true, "timeout": {timeout},
                  "progress_title": "Flashing $1"{log_file}}},
                {{"title": "Back"}}
              ]}}
        ]}}"#
    )
}

#[test]
fn async_action_reports_success_and_returns_to_list() {
    let mut panel = Panel::from_config(&config("sleep 0.2", 10, None));
    panel.send(InputEvent::Button);
    assert_eq!(panel.engine.active_id(), Some("updates"));
    panel.send(InputEvent::Button);
    assert_eq!(panel.log.text_at(0, 0).as_deref(), Some("Flashing Flash"));

    assert!(panel.tick_until(Duration::from_secs(5), |log| {
        log.text_at(0, 8).as_deref() == Some("Success!")
    }));

    panel.send(InputEvent::Rotate(1));
    assert_eq!(panel.log.text_at(0, 0).as_deref(), Some("Updates"));
    assert_eq!(panel.engine.active_id(), Some("updates"));
}

#[test]
fn failing_log_marks_the_job_failed() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("flash.log");
    let action = "echo '[ERROR] verify failed'";
    let mut panel =
        Panel::from_config(&config(action, 10, Some(&log_path.display().to_string())));
    panel.send(InputEvent::Button);
    panel.send(InputEvent::Button);

    assert!(panel.tick_until(Duration::from_secs(5), |log| {
        log.text_at(0, 0).as_deref() == Some("Update failed!")
    }));
    assert_eq!(panel.log.text_at(0, 24).as_deref(), Some("Press button"));
    assert!(run_capture(&format!("cat {}", log_path.display()))
        .unwrap()
        .contains("[ERROR]"));
}

#[test]
fn async_timeout_is_reported() {
    let mut panel = Panel::from_config(&config("sleep 30", 1, None));
    panel.send(InputEvent::Button);
    panel.send(InputEvent::Button);
    assert!(panel.tick_until(Duration::from_secs(10), |log| {
        log.text_at(0, 0).as_deref() == Some("Action timed-out")
    }));
}

#[test]
fn suspend_unwinds_a_list_with_a_running_job() {
    let mut panel = Panel::from_config(&config("sleep 30", 60, None));
    panel.send(InputEvent::Button);
    panel.send(InputEvent::Button);
    let started = Instant::now();
    panel.drive(|engine, ctx| engine.suspend(ctx));
    assert_eq!(panel.engine.stack_ids(), ["main"]);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn terminate_reaps_a_running_child() {
    let mut child = ExternalProcess::spawn("sleep 30", &Output::Null).unwrap();
    assert!(child.try_wait().unwrap().is_none());
    let status = child.terminate().unwrap();
    assert!(!status.success());
    assert!(!child.is_running());
}
