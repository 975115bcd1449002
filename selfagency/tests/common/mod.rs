#![allow(dead_code)]

use selfagency::shaping::PassthroughShaper;
use selfagency::{Configuration, GenerationController, InstallHook, ScopeKind, StubCompletionService};
use std::sync::{Arc, Mutex};

/// Controller over `stub` with an explicit configuration, so tests never
/// depend on the global one.
pub fn controller(stub: &Arc<StubCompletionService>) -> GenerationController {
    GenerationController::new(stub.clone()).with_config(Configuration::default())
}

/// [`controller`] without the shaping round trip.
pub fn passthrough_controller(stub: &Arc<StubCompletionService>) -> GenerationController {
    controller(stub).with_shaper(PassthroughShaper)
}

#[derive(Clone, Default)]
pub struct RecordingHook {
    pub installed: Arc<Mutex<Vec<(String, ScopeKind, String)>>>,
}

impl RecordingHook {
    pub fn names(&self) -> Vec<String> {
        self.installed
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _, _)| name.clone())
            .collect()
    }
}

impl InstallHook for RecordingHook {
    fn unit_installed(&self, name: &str, scope: ScopeKind, source: &str) {
        self.installed
            .lock()
            .unwrap()
            .push((name.to_string(), scope, source.to_string()));
    }
}
