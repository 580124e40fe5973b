//! The module stack: routes input to the top module and applies the transitions it returns.

use std::collections::HashMap;

use crate::app::Logger;
use crate::input::InputEvent;

use super::{ModuleContext, ModuleFactory, Notice, ScreenModule, Transition};

struct Layer {
    module: Box<dyn ScreenModule>,
    /// Configured modules are parked on pop so their state (and running servers) survive.
    park: bool,
}

pub struct MenuEngine {
    stack: Vec<Layer>,
    parked: HashMap<String, Box<dyn ScreenModule>>,
    factory: Box<dyn ModuleFactory>,
    logger: Logger,
    started: bool,
}

impl MenuEngine {
    pub fn new(root: Box<dyn ScreenModule>, factory: Box<dyn ModuleFactory>, logger: Logger) -> Self {
        Self {
            stack: vec![Layer {
                module: root,
                park: false,
            }],
            parked: HashMap::new(),
            factory,
            logger,
            started: false,
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.stack.last().map(|l| l.module.id())
    }

    pub fn stack_ids(&self) -> Vec<String> {
        self.stack.iter().map(|l| l.module.id().to_string()).collect()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Enter the root menu.
    pub fn start(&mut self, ctx: &mut ModuleContext<'_>) {
        if self.started {
            return;
        }
        if let Some(root) = self.stack.first_mut() {
            root.module.enter(ctx);
            self.started = true;
        }
    }

    /// Exit everything, root included. `start` brings the root back.
    pub fn suspend(&mut self, ctx: &mut ModuleContext<'_>) {
        if !self.started {
            return;
        }
        if self.stack.len() > 1 {
            self.unwind_to_root(ctx);
        } else if let Some(root) = self.stack.first_mut() {
            root.module.exit(ctx);
        }
        self.started = false;
    }

    /// Exit every layer and drop parked modules, stopping anything they still run.
    pub fn shutdown(&mut self, ctx: &mut ModuleContext<'_>) {
        self.suspend(ctx);
        self.parked.clear();
    }

    pub fn route(&mut self, event: InputEvent, ctx: &mut ModuleContext<'_>) {
        let Some(top) = self.stack.last_mut() else {
            return;
        };
        let transition = match event {
            InputEvent::Rotate(steps) => top.module.on_rotate(steps, ctx),
            InputEvent::Button => top.module.on_button(ctx),
        };
        self.apply(transition, ctx);
    }

    /// Give the top module its per-tick slice.
    pub fn update(&mut self, ctx: &mut ModuleContext<'_>) {
        let Some(top) = self.stack.last_mut() else {
            return;
        };
        let transition = top.module.update(ctx);
        self.apply(transition, ctx);
    }

    /// Full redraw of the active module.
    pub fn redraw(&mut self, ctx: &mut ModuleContext<'_>) {
        if let Some(top) = self.stack.last_mut() {
            top.module.resume(ctx);
        }
    }

    pub fn apply(&mut self, transition: Transition, ctx: &mut ModuleContext<'_>) {
        match transition {
            Transition::Continue => {}
            Transition::Pop => {
                if self.stack.len() > 1 {
                    self.pop_layer(ctx, true);
                    self.redraw(ctx);
                } else {
                    self.logger.debug("root menu ignored a pop request");
                }
            }
            Transition::PopToRoot => {
                if self.stack.len() > 1 {
                    self.unwind_to_root(ctx);
                    self.redraw(ctx);
                }
            }
            Transition::Open(id) => self.open(&id, ctx),
            Transition::Launch { kind, param } => {
                self.logger.info(format!("launching module {kind} with {param}"));
                match self.factory.launch(&kind, &param, ctx.deps) {
                    Ok(Some(module)) => self.push(module, false, ctx),
                    Ok(None) => {
                        self.logger.error(format!("unknown module type '{kind}'"));
                        self.push(Box::new(Notice::module_unavailable(&kind)), false, ctx);
                    }
                    Err(err) => {
                        self.logger.error(format!("cannot launch {kind}:{param}: {err}"));
                        self.push(Box::new(Notice::dependency_error(&kind)), false, ctx);
                    }
                }
            }
            Transition::Push(module) => self.push(module, false, ctx),
        }
    }

    fn open(&mut self, id: &str, ctx: &mut ModuleContext<'_>) {
        if let Some(module) = self.parked.remove(id) {
            self.push(module, true, ctx);
            return;
        }
        ctx.deps.check(id, ctx.logger);
        match self.factory.create(id, ctx.deps) {
            Ok(Some(module)) => self.push(module, true, ctx),
            Ok(None) => {
                self.logger.error(format!("module not found: {id}"));
                self.push(Box::new(Notice::module_unavailable(id)), false, ctx);
            }
            Err(err) => {
                self.logger.error(format!("module {id} unavailable: {err}"));
                self.push(Box::new(Notice::dependency_error(id)), false, ctx);
            }
        }
    }

    fn push(&mut self, mut module: Box<dyn ScreenModule>, park: bool, ctx: &mut ModuleContext<'_>) {
        if let Some(top) = self.stack.last_mut() {
            top.module.exit(ctx);
        }
        self.logger.debug(format!("entering module {}", module.id()));
        module.enter(ctx);
        self.stack.push(Layer { module, park });
    }

    /// Pop everything above the root. Only the top layer is still entered; the ones below were
    /// exited when their child was pushed.
    fn unwind_to_root(&mut self, ctx: &mut ModuleContext<'_>) {
        let mut active = true;
        while self.stack.len() > 1 {
            self.pop_layer(ctx, active);
            active = false;
        }
    }

    fn pop_layer(&mut self, ctx: &mut ModuleContext<'_>, active: bool) {
        if let Some(mut layer) = self.stack.pop() {
            self.logger.debug(format!("leaving module {}", layer.module.id()));
            if active {
                layer.module.exit(ctx);
            }
            if layer.park {
                self.parked.insert(layer.module.id().to_string(), layer.module);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::config::ModuleDependencies;
    use crate::display::{Display, RecordingBackend};
    use crate::storage::PersistentStore;
    use crate::{Error, Result};

    #[derive(Default)]
    struct Counts {
        enters: usize,
        exits: usize,
        resumes: usize,
    }

    struct Probe {
        id: String,
        counts: Rc<RefCell<Counts>>,
        on_button: fn() -> Transition,
    }

    impl ScreenModule for Probe {
        fn id(&self) -> &str {
            &self.id
        }
        fn enter(&mut self, _ctx: &mut ModuleContext<'_>) {
            self.counts.borrow_mut().enters += 1;
        }
        fn exit(&mut self, _ctx: &mut ModuleContext<'_>) {
            self.counts.borrow_mut().exits += 1;
        }
        fn resume(&mut self, _ctx: &mut ModuleContext<'_>) {
            let mut counts = self.counts.borrow_mut();
            counts.resumes += 1;
            counts.enters += 1;
        }
        fn on_rotate(&mut self, _steps: i32, _ctx: &mut ModuleContext<'_>) -> Transition {
            Transition::Continue
        }
        fn on_button(&mut self, _ctx: &mut ModuleContext<'_>) -> Transition {
            (self.on_button)()
        }
    }

    struct ProbeFactory {
        counts: Rc<RefCell<Counts>>,
    }

    impl ModuleFactory for ProbeFactory {
        fn create(&self, id: &str, _deps: &ModuleDependencies) -> Result<Option<Box<dyn ScreenModule>>> {
            let on_button: fn() -> Transition = match id {
                "leaf" => || Transition::Pop,
                "deep" => || Transition::PopToRoot,
                "child" => || Transition::Open("deep".into()),
                "broken" => return Err(Error::Config("no items".into())),
                _ => return Ok(None),
            };
            Ok(Some(Box::new(Probe {
                id: id.to_string(),
                counts: self.counts.clone(),
                on_button,
            })))
        }

        fn launch(&self, _kind: &str, _param: &str, _deps: &ModuleDependencies) -> Result<Option<Box<dyn ScreenModule>>> {
            Ok(None)
        }
    }

    fn fixture() -> (MenuEngine, Rc<RefCell<Counts>>) {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let root = Probe {
            id: "root".into(),
            counts: counts.clone(),
            on_button: || Transition::Open("child".into()),
        };
        let factory = ProbeFactory {
            counts: counts.clone(),
        };
        (
            MenuEngine::new(Box::new(root), Box::new(factory), Logger::silent()),
            counts,
        )
    }

    #[test]
    fn enters_and_exits_balance_after_pop_to_root() {
        let (backend, _log) = RecordingBackend::new();
        let mut display = Display::new(Box::new(backend));
        let deps = ModuleDependencies::default();
        let mut store = PersistentStore::in_memory(Logger::silent());
        let logger = Logger::silent();
        let mut ctx = ModuleContext::new(&mut display, &deps, &mut store, &logger);
        let (mut engine, counts) = fixture();

        engine.start(&mut ctx);
        engine.route(InputEvent::Button, &mut ctx);
        engine.route(InputEvent::Button, &mut ctx);
        assert_eq!(engine.stack_ids(), vec!["root", "child", "deep"]);
        engine.route(InputEvent::Button, &mut ctx);
        assert_eq!(engine.depth(), 1);
        assert_eq!(counts.borrow().resumes, 1);

        engine.shutdown(&mut ctx);
        let counts = counts.borrow();
        assert_eq!(counts.enters, counts.exits);
    }

    #[test]
    fn unknown_and_broken_modules_show_a_notice() {
        let (backend, log) = RecordingBackend::new();
        let mut display = Display::new(Box::new(backend));
        let deps = ModuleDependencies::default();
        let mut store = PersistentStore::in_memory(Logger::silent());
        let logger = Logger::silent();
        let mut ctx = ModuleContext::new(&mut display, &deps, &mut store, &logger);
        let (mut engine, _counts) = fixture();
        engine.start(&mut ctx);

        engine.apply(Transition::Open("missing".into()), &mut ctx);
        assert_eq!(log.text_at(0, 0).as_deref(), Some("Module unavailable:"));
        assert_eq!(log.text_at(0, 10).as_deref(), Some("missing"));
        engine.route(InputEvent::Button, &mut ctx);
        assert_eq!(engine.active_id(), Some("root"));

        engine.apply(Transition::Open("broken".into()), &mut ctx);
        assert_eq!(log.text_at(0, 0).as_deref(), Some("Dependency Error"));
        assert_eq!(log.text_at(0, 20).as_deref(), Some("broken"));
    }

    #[test]
    fn root_ignores_pop() {
        let (backend, _log) = RecordingBackend::new();
        let mut display = Display::new(Box::new(backend));
        let deps = ModuleDependencies::default();
        let mut store = PersistentStore::in_memory(Logger::silent());
        let logger = Logger::silent();
        let mut ctx = ModuleContext::new(&mut display, &deps, &mut store, &logger);
        let (mut engine, counts) = fixture();
        engine.start(&mut ctx);
        engine.apply(Transition::Pop, &mut ctx);
        engine.apply(Transition::PopToRoot, &mut ctx);
        assert_eq!(engine.depth(), 1);
        assert_eq!(counts.borrow().exits, 0);
    }

    #[test]
    fn parked_modules_are_reused() {
        let (backend, _log) = RecordingBackend::new();
        let mut display = Display::new(Box::new(backend));
        let deps = ModuleDependencies::default();
        let mut store = PersistentStore::in_memory(Logger::silent());
        let logger = Logger::silent();
        let mut ctx = ModuleContext::new(&mut display, &deps, &mut store, &logger);
        let (mut engine, _counts) = fixture();
        engine.start(&mut ctx);
        engine.apply(Transition::Open("leaf".into()), &mut ctx);
        engine.route(InputEvent::Button, &mut ctx);
        assert!(engine.parked.contains_key("leaf"));
        engine.apply(Transition::Open("leaf".into()), &mut ctx);
        assert!(!engine.parked.contains_key("leaf"));
        assert_eq!(engine.active_id(), Some("leaf"));
    }
}
