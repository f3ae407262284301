//! Service configuration (`signer.json`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::module::{ModuleMatch, ModuleProvider};
use crate::signer::{DEFAULT_TARGET, Signer};

/// Default configuration file name
pub const CONFIG_FILE: &str = "signer.json";

/// Listen defaults
pub mod defaults {
    pub const HOST: &str = "127.0.0.1";
    pub const PORT: u16 = 8080;
    pub const LIBS: [&str; 2] = ["libgnutls.so.30", "./libsymbols.so"];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Dependency libraries preloaded before the target. Kept untyped so a
    /// non-string entry is reported as an invalid argument.
    #[serde(default)]
    pub libs: Vec<serde_json::Value>,
    /// Offset of the sign function, hex with `0x` prefix or decimal.
    #[serde(default)]
    pub offset: String,
    #[serde(default = "default_target")]
    pub target: PathBuf,
    #[serde(default, rename = "match")]
    pub match_mode: ModuleMatch,
    /// Name fragment for substring matching (defaults to the target file name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
}

fn default_host() -> String {
    defaults::HOST.to_string()
}

fn default_port() -> u16 {
    defaults::PORT
}

fn default_target() -> PathBuf {
    PathBuf::from(DEFAULT_TARGET)
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            libs: defaults::LIBS
                .iter()
                .map(|lib| serde_json::Value::from(*lib))
                .collect(),
            offset: String::new(),
            target: default_target(),
            match_mode: ModuleMatch::default(),
            module_name: None,
        }
    }
}

impl SignerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: SignerConfig = serde_json::from_str(&content)?;
        debug!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        info!("Saved config to {}", path.as_ref().display());
        Ok(())
    }

    /// Load the configuration, writing a default file when none exists.
    ///
    /// Returns `Ok(None)` when the default was just created; it has no offset
    /// yet and must be edited before the service can start.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        match Self::load(&path) {
            Ok(config) => Ok(Some(config)),
            Err(e) if e.is_not_found() => {
                Self::default().save(&path)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Parsed sign function offset.
    pub fn offset(&self) -> Result<u64> {
        parse_offset(&self.offset)
    }

    /// `host:port` to listen on.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Apply libraries, offset, target and match settings to a signer.
    ///
    /// The offset is parsed before anything is applied, and a rejected
    /// library list leaves the signer untouched.
    pub fn apply<P: ModuleProvider>(&self, signer: &Signer<P>) -> Result<()> {
        let offset = self.offset()?;
        signer.set_libs_from_values(&self.libs)?;
        signer.set_target(&self.target)?;
        signer.set_offset(offset);
        signer.set_match_mode(self.match_mode, self.module_name.clone());
        Ok(())
    }
}

/// Parse an offset written as `0x`-prefixed hex or as decimal.
pub fn parse_offset(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Config(format!(
            "offset is not set; put the sign function offset into {}",
            CONFIG_FILE
        )));
    }

    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse::<u64>(),
    };
    parsed.map_err(|e| Error::Config(format!("Invalid offset '{}': {}", s, e)))
}
