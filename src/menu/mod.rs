//! Screen modules and the stack that schedules them.
//!
//! A module only ever sees a [`ModuleContext`] borrowed from the supervisor and talks back
//! through the [`Transition`] it returns; it never holds a reference to its parent.

use crate::app::Logger;
use crate::config::ModuleDependencies;
use crate::display::Display;
use crate::storage::PersistentStore;
use crate::Result;

pub mod engine;
pub mod ip_editor;
pub mod list_view;
pub mod menu_module;
pub mod notice;

pub use engine::MenuEngine;
pub use ip_editor::IpEditor;
pub use list_view::ListView;
pub use menu_module::MenuModule;
pub use notice::Notice;

/// Shared handles lent to the active module for the duration of one call.
pub struct ModuleContext<'a> {
    pub display: &'a mut Display,
    pub deps: &'a ModuleDependencies,
    pub storage: &'a mut PersistentStore,
    pub logger: &'a Logger,
}

impl<'a> ModuleContext<'a> {
    pub fn new(
        display: &'a mut Display,
        deps: &'a ModuleDependencies,
        storage: &'a mut PersistentStore,
        logger: &'a Logger,
    ) -> Self {
        Self {
            display,
            deps,
            storage,
            logger,
        }
    }

    /// Reborrow for a nested call.
    pub fn reborrow(&mut self) -> ModuleContext<'_> {
        ModuleContext {
            display: &mut *self.display,
            deps: self.deps,
            storage: &mut *self.storage,
            logger: self.logger,
        }
    }
}

/// What the engine should do after a module handled an event or tick.
pub enum Transition {
    Continue,
    /// Leave this module and return to its parent.
    Pop,
    /// Unwind every layer above the root menu.
    PopToRoot,
    /// Open a configured module by id.
    Open(String),
    /// Build a module on the fly, e.g. `textbox` for the selected interface.
    Launch { kind: String, param: String },
    /// Push an already built module.
    Push(Box<dyn ScreenModule>),
}

impl std::fmt::Debug for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transition::Continue => write!(f, "Continue"),
            Transition::Pop => write!(f, "Pop"),
            Transition::PopToRoot => write!(f, "PopToRoot"),
            Transition::Open(id) => write!(f, "Open({id})"),
            Transition::Launch { kind, param } => write!(f, "Launch({kind}:{param})"),
            Transition::Push(module) => write!(f, "Push({})", module.id()),
        }
    }
}

impl Transition {
    pub fn is_continue(&self) -> bool {
        matches!(self, Transition::Continue)
    }
}

/// A screen that owns the panel while it sits on top of the stack.
///
/// `enter` and `exit` are called exactly once per activation. When a child module is pushed the
/// parent is exited first, and it gets `resume` (not `enter`) once the child is gone.
pub trait ScreenModule {
    fn id(&self) -> &str;

    fn enter(&mut self, ctx: &mut ModuleContext<'_>);

    /// Called once per supervisor tick while on top.
    fn update(&mut self, _ctx: &mut ModuleContext<'_>) -> Transition {
        Transition::Continue
    }

    fn exit(&mut self, ctx: &mut ModuleContext<'_>) {
        ctx.display.clear();
    }

    fn on_rotate(&mut self, steps: i32, ctx: &mut ModuleContext<'_>) -> Transition;

    fn on_button(&mut self, ctx: &mut ModuleContext<'_>) -> Transition;

    /// Re-activate after a child popped. Defaults to a fresh `enter`.
    fn resume(&mut self, ctx: &mut ModuleContext<'_>) {
        self.enter(ctx);
    }
}

/// Builds modules the engine is asked to open.
pub trait ModuleFactory {
    /// `Ok(None)` when no module with this id exists; `Err` when it exists but cannot be built.
    fn create(&self, id: &str, deps: &ModuleDependencies) -> Result<Option<Box<dyn ScreenModule>>>;

    /// Dynamic instances requested by a running module (`launch_module:<kind>`).
    fn launch(
        &self,
        kind: &str,
        param: &str,
        deps: &ModuleDependencies,
    ) -> Result<Option<Box<dyn ScreenModule>>>;
}

/// Sign of a rotation, one list row per event regardless of detent size.
pub fn step_of(steps: i32) -> i32 {
    steps.signum()
}
