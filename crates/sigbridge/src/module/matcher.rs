//! Identify the target module in the process module list.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, warn};

use super::ModuleInfo;

/// How the loaded target module is recognised among the process's modules.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ModuleMatch {
    /// Same file as the target path (after resolving symlinks and relative
    /// components). Falls back to comparing file names when the target path
    /// does not exist on disk, e.g. a bare soname resolved by the loader.
    #[default]
    Exact,
    /// Reported name contains a fragment (the target file name by default).
    Substring,
}

/// Find the module matching `target`.
///
/// When several modules match, the first one in enumeration order wins.
/// Enumeration order is platform defined, so a warning lists every candidate.
pub fn find_module<'a>(
    modules: &'a [ModuleInfo],
    target: &Path,
    mode: ModuleMatch,
    fragment: Option<&str>,
) -> Option<&'a ModuleInfo> {
    let candidates: Vec<&ModuleInfo> = match mode {
        ModuleMatch::Exact => {
            let canonical_target = fs::canonicalize(target).ok();
            modules
                .iter()
                .filter(|m| !m.name.is_empty())
                .filter(|m| same_file(&m.name, target, canonical_target.as_deref()))
                .collect()
        }
        ModuleMatch::Substring => {
            let fragment = fragment
                .map(str::to_owned)
                .or_else(|| target.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_default();
            if fragment.is_empty() {
                return None;
            }
            let finder = memchr::memmem::Finder::new(fragment.as_bytes());
            modules
                .iter()
                .filter(|m| finder.find(m.name.as_bytes()).is_some())
                .collect()
        }
    };

    if candidates.len() > 1 {
        warn!(
            "{} modules match {} ({} mode), using the first: {}",
            candidates.len(),
            target.display(),
            mode,
            candidates
                .iter()
                .map(|m| format!("{} @ {:#x}", m.name, m.base))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let found = candidates.first().copied();
    if let Some(module) = found {
        debug!("Matched module {} at {:#x}", module.name, module.base);
    }
    found
}

fn same_file(name: &str, target: &Path, canonical_target: Option<&Path>) -> bool {
    let module_path = Path::new(name);
    match canonical_target {
        Some(canonical_target) => fs::canonicalize(module_path)
            .map(|p| p == canonical_target)
            .unwrap_or(false),
        None => module_path.file_name().is_some() && module_path.file_name() == target.file_name(),
    }
}
