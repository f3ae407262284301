//! # sigbridge
//!
//! Bridge for calling a sign function inside a closed-source shared library
//! that exports no symbol for it.
//!
//! The function is located at a fixed offset from the library's load
//! address. This crate provides:
//! - Preloading of the library's dependencies with global symbol visibility
//! - Locating the loaded module's base address in the process module list
//! - Resolving and invoking the function with its fixed calling convention
//! - Decoding the three-slot output buffer (token, extra, signature)
//! - The `signer.json` service configuration

pub mod config;
pub mod error;
pub mod module;
pub mod output;
pub mod signer;

pub use config::{SignerConfig, parse_offset};
pub use error::{Error, Result};
pub use module::{ModuleInfo, ModuleMatch, ModuleProvider, SystemModules, find_module};
pub use output::SignOutput;
pub use signer::{DEFAULT_TARGET, MIN_FUNCTION_ADDRESS, SignFn, Signer, SignerStatus};
