use std::collections::BTreeMap;
use std::sync::Arc;

use super::basic::{Assign, Close, Help, Label, Rebase, Unassign, Unlabel};
use super::batch::{Batch, Check};
use super::checkbox::{Checkbox, CheckboxIssue};
use super::cherry_pick::{CherryPick, CherryPickBuiltin, CherryPickEngine};
use super::lgtm::{Lgtm, RemoveLgtm};
use super::merge::Merge;
use super::retest::Retest;
use super::CommandHandler;
use crate::git::CherryPicker;

/// Command name to handler. Names are canonical; aliases are resolved by the
/// parser.
#[derive(Default)]
pub struct Registry {
    handlers: BTreeMap<&'static str, Arc<dyn CommandHandler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(name, handler);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CommandHandler>> {
        self.handlers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Every user-facing command plus the `__cherry-pick` built-in.
    ///
    /// With a `picker`, cherry-picks go through it instead of the
    /// platform's commit API.
    pub fn standard(picker: Option<Arc<dyn CherryPicker>>) -> Self {
        let engine = Arc::new(CherryPickEngine::new(picker));
        let mut registry = Self::new();
        registry.register("help", Arc::new(Help));
        registry.register("assign", Arc::new(Assign));
        registry.register("unassign", Arc::new(Unassign));
        registry.register("label", Arc::new(Label));
        registry.register("unlabel", Arc::new(Unlabel));
        registry.register("close", Arc::new(Close));
        registry.register("rebase", Arc::new(Rebase));
        registry.register("lgtm", Arc::new(Lgtm));
        registry.register("remove-lgtm", Arc::new(RemoveLgtm));
        registry.register("merge", Arc::new(Merge));
        registry.register("cherry-pick", Arc::new(CherryPick::new(engine.clone())));
        registry.register("__cherry-pick", Arc::new(CherryPickBuiltin::new(engine)));
        registry.register("checkbox", Arc::new(Checkbox));
        registry.register("checkbox-issue", Arc::new(CheckboxIssue));
        registry.register("retest", Arc::new(Retest));
        registry.register("check", Arc::new(Check));
        registry.register("batch", Arc::new(Batch));
        registry
    }
}
