//! Serve command implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use sigbridge::Signer;
use tracing::{error, info};

use crate::server::{self, AppState};

/// Run the serve command
pub fn run(config_path: &Path, appinfo: PathBuf) -> Result<()> {
    let config = super::load_config(config_path)?;

    info!("Initializing sign service...");
    let signer = Signer::new();
    config
        .apply(&signer)
        .context("Failed to initialize sign service")?;
    signer
        .load()
        .context("Failed to initialize sign service")?;
    let signer = Arc::new(signer);

    let addr = config.listen_addr();
    let state = AppState::new(Arc::clone(&signer), appinfo);
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let result = runtime.block_on(server::serve(&addr, state));
    if let Err(e) = &result {
        error!("Sign service stopped: {:#}", e);
    }

    signer.unload();
    info!("Sign module unloaded");
    result
}
