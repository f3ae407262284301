//! Modules command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use sigbridge::{ModuleProvider, Signer, SystemModules};

/// Run the modules command
pub fn run(config_path: &Path, filter: Option<&str>, load: bool) -> Result<()> {
    let signer = Signer::new();
    if load {
        let config = super::load_config(config_path)?;
        config.apply(&signer)?;
        signer.load().context("Failed to load sign module")?;
    }

    let modules = SystemModules.modules()?;
    let mut shown = 0;
    for module in &modules {
        if filter.is_some_and(|f| !module.name.contains(f)) {
            continue;
        }
        let name = if module.name.is_empty() {
            "(main executable)"
        } else {
            module.name.as_str()
        };
        println!("0x{:016X}  {}", module.base, name);
        shown += 1;
    }
    println!();
    println!("{} of {} modules", shown, modules.len());

    if let Some(base) = signer.status().module_base {
        println!("Target base: 0x{:X}", base);
    }
    signer.unload();

    Ok(())
}
