//! Sign command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use sigbridge::Signer;

/// Run the sign command
pub fn run(config_path: &Path, cmd: &str, src: &str, seq: i32) -> Result<()> {
    let config = super::load_config(config_path)?;
    let payload = hex::decode(src.trim()).context("Invalid hex data")?;

    let signer = Signer::new();
    config.apply(&signer)?;
    signer.load().context("Failed to load sign module")?;

    let result = signer.sign(cmd, &payload, seq);
    signer.unload();
    let output = result.context("Sign failed")?;

    let [token, extra, sign] = output.to_hex();
    println!("token: {}", token);
    println!("extra: {}", extra);
    println!("sign:  {}", sign);

    Ok(())
}
