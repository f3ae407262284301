//! Shared library loading and module enumeration.
//!
//! Everything that touches the platform loader goes through [`ModuleProvider`],
//! so the signer can be driven by an in-memory provider in tests.

mod matcher;
mod system;

#[cfg(test)]
pub mod mock;

use std::path::Path;

use crate::error::Result;

pub use matcher::{ModuleMatch, find_module};
pub use system::{NativeLibrary, SystemModules};

#[cfg(test)]
pub use mock::{MockLibrary, MockModules};

/// A module mapped into the current process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Name reported by the platform loader (usually a path, may be empty
    /// for the main executable)
    pub name: String,
    /// Address the module's first byte is mapped at
    pub base: usize,
}

/// Access to the platform's dynamic loader.
///
/// Dropping a `Library` releases it.
pub trait ModuleProvider {
    type Library: Send;

    /// Open a dependency library and make its symbols visible to libraries
    /// loaded afterwards.
    fn open_global(&self, path: &Path) -> Result<Self::Library>;

    /// Open the target module with local symbol visibility.
    fn open(&self, path: &Path) -> Result<Self::Library>;

    /// List the modules currently mapped into the process.
    fn modules(&self) -> Result<Vec<ModuleInfo>>;
}

/// Library handles released in reverse order of opening.
pub(crate) struct OpenedLibraries<L>(Vec<L>);

impl<L> OpenedLibraries<L> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub fn push(&mut self, library: L) {
        self.0.push(library);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<L> Drop for OpenedLibraries<L> {
    fn drop(&mut self) {
        while let Some(library) = self.0.pop() {
            drop(library);
        }
    }
}
