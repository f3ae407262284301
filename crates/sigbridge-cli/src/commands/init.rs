//! Init command implementation.

use std::path::Path;

use anyhow::{Result, bail};
use sigbridge::SignerConfig;

/// Run the init command
pub fn run(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    SignerConfig::default().save(config_path)?;
    println!("Wrote {}", config_path.display());
    println!("Set 'offset' to the sign function offset before starting the service.");

    Ok(())
}
