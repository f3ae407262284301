//! In-memory module provider for tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{ModuleInfo, ModuleProvider};
use crate::error::{Error, Result};

/// Shared log of open/close events, in the order they happened.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Library handle that records its release.
pub struct MockLibrary {
    path: String,
    events: EventLog,
}

impl Drop for MockLibrary {
    fn drop(&mut self) {
        self.events
            .lock()
            .unwrap()
            .push(format!("close {}", self.path));
    }
}

/// Provider reporting a fixed module list.
#[derive(Default)]
pub struct MockModules {
    modules: Mutex<Vec<ModuleInfo>>,
    failing: Vec<PathBuf>,
    events: EventLog,
}

impl MockModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a module with the given name and base address.
    pub fn with_module(self, name: &str, base: usize) -> Self {
        self.modules.lock().unwrap().push(ModuleInfo {
            name: name.to_string(),
            base,
        });
        self
    }

    /// Make opening `path` fail.
    pub fn failing_on<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.failing.push(path.into());
        self
    }

    /// Replace the reported module list.
    pub fn set_modules(&self, modules: Vec<ModuleInfo>) {
        *self.modules.lock().unwrap() = modules;
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    fn open_as(&self, kind: &str, path: &Path) -> Result<MockLibrary> {
        if self.failing.iter().any(|p| p == path) {
            return Err(Error::DynamicLoad {
                path: path.display().to_string(),
                message: "cannot open shared object file".to_string(),
            });
        }
        let path = path.display().to_string();
        self.events
            .lock()
            .unwrap()
            .push(format!("{} {}", kind, path));
        Ok(MockLibrary {
            path,
            events: Arc::clone(&self.events),
        })
    }
}

impl ModuleProvider for MockModules {
    type Library = MockLibrary;

    fn open_global(&self, path: &Path) -> Result<MockLibrary> {
        self.open_as("open-global", path)
    }

    fn open(&self, path: &Path) -> Result<MockLibrary> {
        self.open_as("open", path)
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        Ok(self.modules.lock().unwrap().clone())
    }
}
