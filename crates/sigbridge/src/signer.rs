//! Signer context: configuration, module lifecycle and invocation.
//!
//! A [`Signer`] owns everything needed to call the sign function: the list of
//! dependency libraries to preload, the target module path, the offset of the
//! function inside the target, and, once loaded, the open library handles and
//! the resolved function pointer. All of it sits behind one mutex, so
//! configure/load/unload/sign calls on the same context are serialized and an
//! unload can never run while the function is executing.
//!
//! ## Example
//!
//! ```ignore
//! use sigbridge::Signer;
//!
//! let signer = Signer::new();
//! signer.set_libs(["libgnutls.so.30", "./libsymbols.so"])?;
//! signer.set_offset(0x5ADE220);
//! signer.load()?;
//!
//! let output = signer.sign("wtlogin.login", &payload, 1)?;
//! signer.unload();
//! ```

use std::ffi::{CString, c_char, c_int};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::module::{ModuleMatch, ModuleProvider, OpenedLibraries, SystemModules, find_module};
use crate::output::{self, SignOutput};

/// Calling convention of the sign function:
/// `(command, payload, payload_len, seq, output) -> status`.
pub type SignFn = unsafe extern "C" fn(*const c_char, *const u8, c_int, c_int, *mut u8) -> c_int;

/// Lowest address accepted as a function pointer. Anything below is treated
/// as a null-adjacent bogus pointer.
pub const MIN_FUNCTION_ADDRESS: usize = 0x1000;

/// Target module path used when none is configured.
pub const DEFAULT_TARGET: &str = "./wrapper.node";

/// Loaded target module and the resolved function.
struct LoadedModule<L> {
    function: SignFn,
    base: usize,
    loaded_at: DateTime<Utc>,
    /// Preloaded dependencies followed by the target; only held to be
    /// released in reverse on drop.
    _libraries: OpenedLibraries<L>,
}

struct Registry<L> {
    libraries: Vec<PathBuf>,
    target: PathBuf,
    match_mode: ModuleMatch,
    fragment: Option<String>,
    offset: u64,
    loaded: Option<LoadedModule<L>>,
}

impl<L> Default for Registry<L> {
    fn default() -> Self {
        Self {
            libraries: Vec::new(),
            target: PathBuf::from(DEFAULT_TARGET),
            match_mode: ModuleMatch::default(),
            fragment: None,
            offset: 0,
            loaded: None,
        }
    }
}

/// Snapshot of a signer's configuration and load state.
#[derive(Debug, Clone, Serialize)]
pub struct SignerStatus {
    pub loaded: bool,
    pub target: PathBuf,
    pub libraries: Vec<PathBuf>,
    pub match_mode: ModuleMatch,
    pub offset: u64,
    pub module_base: Option<usize>,
    pub function_address: Option<usize>,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Signing context.
pub struct Signer<P: ModuleProvider = SystemModules> {
    provider: P,
    state: Mutex<Registry<P::Library>>,
}

impl Signer<SystemModules> {
    /// Create an unconfigured signer backed by the process's own loader.
    pub fn new() -> Self {
        Self::with_provider(SystemModules)
    }
}

impl Default for Signer<SystemModules> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ModuleProvider> Signer<P> {
    pub fn with_provider(provider: P) -> Self {
        Self {
            provider,
            state: Mutex::new(Registry::default()),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn state(&self) -> MutexGuard<'_, Registry<P::Library>> {
        // The registry is plain data; a panic elsewhere cannot leave it torn.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the list of dependency libraries preloaded by [`load`](Self::load).
    ///
    /// On error the previous list is kept.
    pub fn set_libs<I, S>(&self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths = paths.into_iter();
        let mut libraries = Vec::new();
        libraries
            .try_reserve_exact(paths.size_hint().0)
            .map_err(|_| Error::Allocation("library list"))?;
        for (index, path) in paths.enumerate() {
            let path = validate_path(
                Path::new(path.as_ref()),
                format_args!("library path at index {}", index),
            )?;
            libraries.push(path);
        }
        self.commit_libs(libraries);
        Ok(())
    }

    /// Replace the library list from untyped values, e.g. a JSON array.
    ///
    /// Every element must be a string.
    pub fn set_libs_from_values(&self, values: &[serde_json::Value]) -> Result<()> {
        let mut libraries = Vec::new();
        libraries
            .try_reserve_exact(values.len())
            .map_err(|_| Error::Allocation("library list"))?;
        for (index, value) in values.iter().enumerate() {
            let path = value.as_str().ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "expected string in library list at index {}, got {}",
                    index, value
                ))
            })?;
            let path = validate_path(
                Path::new(path),
                format_args!("library path at index {}", index),
            )?;
            libraries.push(path);
        }
        self.commit_libs(libraries);
        Ok(())
    }

    fn commit_libs(&self, libraries: Vec<PathBuf>) {
        debug!("Library list set: {:?}", libraries);
        self.state().libraries = libraries;
    }

    /// Set the offset of the sign function from the target module's base.
    ///
    /// Not range checked: an offset outside the module is only caught if the
    /// resulting address falls below [`MIN_FUNCTION_ADDRESS`].
    pub fn set_offset(&self, offset: u64) {
        debug!("Offset set: {:#x}", offset);
        self.state().offset = offset;
    }

    /// Set the target module path (defaults to [`DEFAULT_TARGET`]).
    pub fn set_target<Q: AsRef<Path>>(&self, path: Q) -> Result<()> {
        let target = validate_path(path.as_ref(), "target path")?;
        self.state().target = target;
        Ok(())
    }

    /// Choose how the target is located among loaded modules. `fragment`
    /// overrides the name fragment used by [`ModuleMatch::Substring`].
    pub fn set_match_mode(&self, mode: ModuleMatch, fragment: Option<String>) {
        let mut state = self.state();
        state.match_mode = mode;
        state.fragment = fragment.filter(|f| !f.is_empty());
    }

    /// Preload the dependency libraries, load the target and resolve the sign
    /// function at `base + offset`.
    ///
    /// Either commits a fully resolved module or leaves the signer as it was;
    /// every library opened by a failed attempt is released in reverse order.
    pub fn load(&self) -> Result<()> {
        let mut state = self.state();

        let mut libraries = OpenedLibraries::with_capacity(state.libraries.len() + 1);
        for path in &state.libraries {
            libraries.push(self.provider.open_global(path)?);
        }
        debug!("Preloaded {} libraries", libraries.len());

        libraries.push(self.provider.open(&state.target)?);

        let modules = self.provider.modules()?;
        let base = find_module(
            &modules,
            &state.target,
            state.match_mode,
            state.fragment.as_deref(),
        )
        .map(|m| m.base)
        .filter(|&base| base != 0)
        .ok_or_else(|| Error::ModuleNotFound(state.target.display().to_string()))?;

        let address = base.wrapping_add(state.offset as usize);
        if address < MIN_FUNCTION_ADDRESS {
            return Err(Error::InvalidPointer { address });
        }

        // SAFETY: `address` is non-null. Whether it really is a function with
        // the `SignFn` signature is the operator's responsibility (it is only
        // dereferenced in `sign`).
        let function = unsafe { std::mem::transmute::<usize, SignFn>(address) };

        let previous = state.loaded.replace(LoadedModule {
            function,
            base,
            loaded_at: Utc::now(),
            _libraries: libraries,
        });
        info!(
            "Loaded {} (base: {:#x}, function: {:#x})",
            state.target.display(),
            base,
            address
        );
        if let Some(previous) = previous {
            drop(previous);
            debug!("Released previously loaded module");
        }
        Ok(())
    }

    /// Release the target module and the preloaded libraries. No-op when
    /// nothing is loaded.
    pub fn unload(&self) {
        let loaded = self.state().loaded.take();
        if let Some(loaded) = loaded {
            info!("Unloading module (base: {:#x})", loaded.base);
            drop(loaded);
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state().loaded.is_some()
    }

    /// Call the sign function and decode its output buffer.
    pub fn sign(&self, command: &str, payload: &[u8], seq: i32) -> Result<SignOutput> {
        let state = self.state();
        let loaded = state.loaded.as_ref().ok_or(Error::NotLoaded)?;

        let command = CString::new(command)
            .map_err(|_| Error::InvalidArgument("command contains a NUL byte".to_string()))?;
        let payload_len = c_int::try_from(payload.len()).map_err(|_| {
            Error::InvalidArgument(format!("payload too large ({} bytes)", payload.len()))
        })?;

        let mut buffer = output::new_buffer();
        // SAFETY: the function was resolved by `load` and the module stays
        // mapped while the state lock is held. All pointers are valid for the
        // duration of the call and the buffer has the size the callee expects.
        let code = unsafe {
            (loaded.function)(
                command.as_ptr(),
                payload.as_ptr(),
                payload_len,
                seq,
                buffer.as_mut_ptr(),
            )
        };
        drop(state);

        if code != 0 {
            return Err(Error::SignFailure { code });
        }
        Ok(SignOutput::from_buffer(&buffer))
    }

    pub fn status(&self) -> SignerStatus {
        let state = self.state();
        let loaded = state.loaded.as_ref();
        SignerStatus {
            loaded: loaded.is_some(),
            target: state.target.clone(),
            libraries: state.libraries.clone(),
            match_mode: state.match_mode,
            offset: state.offset,
            module_base: loaded.map(|m| m.base),
            function_address: loaded.map(|m| m.function as usize),
            loaded_at: loaded.map(|m| m.loaded_at),
        }
    }
}

fn validate_path(path: &Path, what: impl std::fmt::Display) -> Result<PathBuf> {
    let raw = path.as_os_str();
    if raw.is_empty() {
        return Err(Error::InvalidArgument(format!("{} is empty", what)));
    }
    if raw.as_encoded_bytes().contains(&0) {
        return Err(Error::InvalidArgument(format!(
            "{} contains a NUL byte",
            what
        )));
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::MockModules;
    use serde_json::json;

    const TARGET_NAME: &str = "/opt/QQ/resources/app/wrapper.node";

    extern "C" fn fill_fixed_lengths(
        _command: *const c_char,
        _payload: *const u8,
        _payload_len: c_int,
        _seq: c_int,
        buffer: *mut u8,
    ) -> c_int {
        // SAFETY: the signer always passes a full output buffer.
        let out = unsafe { std::slice::from_raw_parts_mut(buffer, output::layout::BUFFER_SIZE) };
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = (i % 200) as u8;
        }
        out[255] = 5;
        out[511] = 3;
        out[767] = 10;
        0
    }

    /// Copies the payload into the token slot, the command into the extra
    /// slot and the little-endian sequence number into the signature slot.
    extern "C" fn echo_arguments(
        command: *const c_char,
        payload: *const u8,
        payload_len: c_int,
        seq: c_int,
        buffer: *mut u8,
    ) -> c_int {
        // SAFETY: arguments come straight from `Signer::sign`.
        let (out, payload, command) = unsafe {
            (
                std::slice::from_raw_parts_mut(buffer, output::layout::BUFFER_SIZE),
                std::slice::from_raw_parts(payload, payload_len as usize),
                std::ffi::CStr::from_ptr(command).to_bytes(),
            )
        };
        out[..payload.len()].copy_from_slice(payload);
        out[255] = payload.len() as u8;
        out[256..256 + command.len()].copy_from_slice(command);
        out[511] = command.len() as u8;
        out[512..516].copy_from_slice(&seq.to_le_bytes());
        out[767] = 4;
        0
    }

    extern "C" fn always_fail(
        _command: *const c_char,
        _payload: *const u8,
        _payload_len: c_int,
        _seq: c_int,
        buffer: *mut u8,
    ) -> c_int {
        // SAFETY: see fill_fixed_lengths.
        unsafe { *buffer.add(255) = 7 };
        -3
    }

    fn address_of(function: SignFn) -> usize {
        function as usize
    }

    /// Signer whose target module is reported at the address of `callee`,
    /// so offset 0 resolves to the callee itself.
    fn signer_for(callee: SignFn) -> Signer<MockModules> {
        let provider = MockModules::new()
            .with_module("", 0x400000)
            .with_module(TARGET_NAME, address_of(callee));
        Signer::with_provider(provider)
    }

    #[test]
    fn test_sign_before_load_is_not_loaded() {
        let signer = signer_for(fill_fixed_lengths);
        assert!(matches!(signer.sign("cmd", b"data", 1), Err(Error::NotLoaded)));
        assert!(matches!(signer.sign("", &[], -1), Err(Error::NotLoaded)));
        assert!(matches!(
            signer.sign("bad\0cmd", &[0u8; 16], i32::MAX),
            Err(Error::NotLoaded)
        ));
    }

    #[test]
    fn test_load_and_sign_slices_each_slot() {
        let signer = signer_for(fill_fixed_lengths);
        signer.load().unwrap();
        assert!(signer.is_loaded());

        let output = signer.sign("cmd", &[1, 2, 3], 1).unwrap();
        assert_eq!(output.token.len(), 5);
        assert_eq!(output.extra.len(), 3);
        assert_eq!(output.signature.len(), 10);
        assert_eq!(output.token, vec![0, 1, 2, 3, 4]);
        assert_eq!(output.extra, vec![56, 57, 58]); // 256 % 200
        assert_eq!(output.signature[0], (512 % 200) as u8);
    }

    #[test]
    fn test_sign_passes_arguments_through() {
        let signer = signer_for(echo_arguments);
        signer.load().unwrap();

        let output = signer
            .sign("wtlogin.login", &[0xDE, 0xAD, 0xBE, 0xEF], 0x01020304)
            .unwrap();
        assert_eq!(output.token, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(output.extra, b"wtlogin.login".to_vec());
        assert_eq!(output.signature, 0x01020304i32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_sign_failure_on_nonzero_code() {
        let signer = signer_for(always_fail);
        signer.load().unwrap();
        match signer.sign("cmd", b"payload", 1) {
            Err(Error::SignFailure { code }) => assert_eq!(code, -3),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_sign_rejects_command_with_nul() {
        let signer = signer_for(fill_fixed_lengths);
        signer.load().unwrap();
        let err = signer.sign("c\0md", b"", 1).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_low_address_is_invalid_pointer() {
        let provider = MockModules::new().with_module(TARGET_NAME, 0x100);
        let signer = Signer::with_provider(provider);
        signer.set_offset(0x10);

        match signer.load() {
            Err(Error::InvalidPointer { address }) => assert_eq!(address, 0x110),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!signer.is_loaded());
        assert_eq!(signer.status().function_address, None);
        assert!(matches!(signer.sign("cmd", b"", 1), Err(Error::NotLoaded)));
        assert_eq!(
            signer.provider().events(),
            vec!["open ./wrapper.node", "close ./wrapper.node"]
        );
    }

    #[test]
    fn test_wrapped_address_is_invalid_pointer() {
        let base = 0x7f00_0000_0000usize;
        let provider = MockModules::new().with_module(TARGET_NAME, base);
        let signer = Signer::with_provider(provider);
        // base + offset wraps around to 0x20
        signer.set_offset((usize::MAX - base + 1 + 0x20) as u64);

        assert!(matches!(
            signer.load(),
            Err(Error::InvalidPointer { address: 0x20 })
        ));
        assert!(!signer.is_loaded());
    }

    #[test]
    fn test_unload_then_sign_is_not_loaded() {
        let signer = signer_for(fill_fixed_lengths);
        signer.load().unwrap();
        signer.sign("cmd", b"", 1).unwrap();

        signer.unload();
        assert!(!signer.is_loaded());
        assert!(matches!(signer.sign("cmd", b"", 1), Err(Error::NotLoaded)));

        let status = signer.status();
        assert_eq!(status.module_base, None);
        assert_eq!(status.function_address, None);
        assert_eq!(status.loaded_at, None);
    }

    #[test]
    fn test_unload_when_nothing_loaded_is_noop() {
        let signer = signer_for(fill_fixed_lengths);
        signer.unload();
        signer.unload();
        assert!(!signer.is_loaded());
        assert!(signer.provider().events().is_empty());
    }

    #[test]
    fn test_unload_releases_in_reverse_order() {
        let signer = signer_for(fill_fixed_lengths);
        signer.set_libs(["libgnutls.so.30", "./libsymbols.so"]).unwrap();
        signer.load().unwrap();
        signer.provider().clear_events();

        signer.unload();
        assert_eq!(
            signer.provider().events(),
            vec![
                "close ./wrapper.node",
                "close ./libsymbols.so",
                "close libgnutls.so.30",
            ]
        );
    }

    #[test]
    fn test_preload_failure_releases_opened_libraries() {
        let provider = MockModules::new()
            .with_module(TARGET_NAME, address_of(fill_fixed_lengths))
            .failing_on("libmissing.so");
        let signer = Signer::with_provider(provider);
        signer
            .set_libs(["liba.so", "libb.so", "libmissing.so", "libc_never.so"])
            .unwrap();

        match signer.load() {
            Err(Error::DynamicLoad { path, .. }) => assert_eq!(path, "libmissing.so"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!signer.is_loaded());
        assert_eq!(
            signer.provider().events(),
            vec![
                "open-global liba.so",
                "open-global libb.so",
                "close libb.so",
                "close liba.so",
            ]
        );
    }

    #[test]
    fn test_target_load_failure() {
        let provider = MockModules::new().failing_on("./wrapper.node");
        let signer = Signer::with_provider(provider);
        signer.set_libs(["liba.so"]).unwrap();

        assert!(matches!(signer.load(), Err(Error::DynamicLoad { .. })));
        assert_eq!(
            signer.provider().events(),
            vec!["open-global liba.so", "close liba.so"]
        );
    }

    #[test]
    fn test_module_not_found_releases_everything() {
        let provider = MockModules::new().with_module("/usr/lib/libc.so.6", 0x7f0000000000);
        let signer = Signer::with_provider(provider);
        signer.set_libs(["liba.so"]).unwrap();

        assert!(matches!(signer.load(), Err(Error::ModuleNotFound(_))));
        assert!(!signer.is_loaded());
        assert_eq!(
            signer.provider().events(),
            vec![
                "open-global liba.so",
                "open ./wrapper.node",
                "close ./wrapper.node",
                "close liba.so",
            ]
        );
    }

    #[test]
    fn test_custom_target_and_substring_match() {
        let provider = MockModules::new()
            .with_module("/opt/QQ/wrapper-3.2.node", address_of(fill_fixed_lengths));
        let signer = Signer::with_provider(provider);
        signer.set_target("/opt/QQ/wrapper-3.2.node").unwrap();
        signer.set_match_mode(ModuleMatch::Substring, Some("wrapper".to_string()));

        signer.load().unwrap();
        let status = signer.status();
        assert_eq!(status.target, PathBuf::from("/opt/QQ/wrapper-3.2.node"));
        assert_eq!(status.match_mode, ModuleMatch::Substring);
        assert_eq!(status.module_base, Some(address_of(fill_fixed_lengths)));
    }

    #[test]
    fn test_failed_reload_keeps_previous_module() {
        let signer = signer_for(fill_fixed_lengths);
        signer.load().unwrap();
        let base = signer.status().module_base;

        signer.provider().set_modules(Vec::new());
        assert!(matches!(signer.load(), Err(Error::ModuleNotFound(_))));
        assert!(signer.is_loaded());
        assert_eq!(signer.status().module_base, base);
        assert_eq!(signer.sign("cmd", b"", 1).unwrap().token.len(), 5);
    }

    #[test]
    fn test_reload_replaces_module() {
        let signer = signer_for(fill_fixed_lengths);
        signer.load().unwrap();
        signer
            .provider()
            .set_modules(vec![crate::module::ModuleInfo {
                name: TARGET_NAME.to_string(),
                base: address_of(always_fail),
            }]);

        signer.load().unwrap();
        assert!(matches!(
            signer.sign("cmd", b"", 1),
            Err(Error::SignFailure { .. })
        ));
    }

    #[test]
    fn test_set_libs_from_values_rejects_non_string() {
        let signer = signer_for(fill_fixed_lengths);
        signer
            .set_libs_from_values(&[json!("libgnutls.so.30")])
            .unwrap();

        let err = signer
            .set_libs_from_values(&[json!("liba.so"), json!(42), json!("libb.so")])
            .unwrap_err();
        assert!(err.is_invalid_input());
        assert!(err.to_string().contains("index 1"));
        assert_eq!(
            signer.status().libraries,
            vec![PathBuf::from("libgnutls.so.30")]
        );
    }

    #[test]
    fn test_set_libs_rejects_invalid_paths() {
        let signer = signer_for(fill_fixed_lengths);
        signer.set_libs(["liba.so"]).unwrap();

        assert!(signer.set_libs(["libb.so", ""]).unwrap_err().is_invalid_input());
        assert!(
            signer
                .set_libs(["lib\0b.so"])
                .unwrap_err()
                .is_invalid_input()
        );
        assert!(signer.set_target("").unwrap_err().is_invalid_input());
        assert_eq!(signer.status().libraries, vec![PathBuf::from("liba.so")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_set_target_keeps_non_utf8_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let signer = signer_for(fill_fixed_lengths);
        let target = Path::new(OsStr::from_bytes(b"/opt/QQ/\xffwrapper.node"));
        signer.set_target(target).unwrap();
        assert_eq!(signer.status().target, target);

        let with_nul = Path::new(OsStr::from_bytes(b"/opt/\xff\0wrapper.node"));
        assert!(signer.set_target(with_nul).unwrap_err().is_invalid_input());
        assert_eq!(signer.status().target, target);
    }

    #[test]
    fn test_set_libs_does_not_touch_loaded_module() {
        let signer = signer_for(fill_fixed_lengths);
        signer.load().unwrap();
        signer.provider().clear_events();

        signer.set_libs(["libnew.so"]).unwrap();
        assert!(signer.is_loaded());
        assert!(signer.provider().events().is_empty());
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_system_loader_resolves_libc_base() {
        let signer = Signer::new();
        signer.set_target("libc.so.6").unwrap();
        signer.load().unwrap();

        let status = signer.status();
        assert!(status.loaded);
        assert!(status.module_base.unwrap() >= MIN_FUNCTION_ADDRESS);
        assert_eq!(status.module_base, status.function_address);

        signer.unload();
        assert!(!signer.is_loaded());
    }
}
