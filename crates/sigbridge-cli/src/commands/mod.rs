//! CLI command implementations.

pub mod init;
pub mod modules;
pub mod serve;
pub mod sign;

use std::path::Path;

use anyhow::{Result, bail};
use sigbridge::SignerConfig;
use tracing::warn;

/// Load the configuration, creating a default file on first run.
///
/// The default has no offset, so a freshly created file is reported as an
/// error asking the user to fill it in.
pub fn load_config(path: &Path) -> Result<SignerConfig> {
    match SignerConfig::load_or_create(path)? {
        Some(config) => Ok(config),
        None => {
            warn!(
                "Configuration file {} not found, created a default one",
                path.display()
            );
            bail!(
                "Set the correct 'offset' value in {} and restart",
                path.display()
            )
        }
    }
}
