//! Platform loader access.

use std::path::Path;

use tracing::debug;

use super::{ModuleInfo, ModuleProvider};
use crate::error::{Error, Result};

#[cfg(unix)]
pub type NativeLibrary = libloading::os::unix::Library;

#[cfg(windows)]
pub type NativeLibrary = libloading::Library;

/// The running process's own dynamic loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemModules;

impl ModuleProvider for SystemModules {
    type Library = NativeLibrary;

    fn open_global(&self, path: &Path) -> Result<NativeLibrary> {
        debug!("Opening {} (global)", path.display());
        open_library(path, true)
    }

    fn open(&self, path: &Path) -> Result<NativeLibrary> {
        debug!("Opening {}", path.display());
        open_library(path, false)
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        enumerate_modules()
    }
}

fn load_error(path: &Path, e: libloading::Error) -> Error {
    Error::DynamicLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

#[cfg(unix)]
fn open_library(path: &Path, global: bool) -> Result<NativeLibrary> {
    use libloading::os::unix::{RTLD_GLOBAL, RTLD_LAZY, RTLD_LOCAL};

    let flags = if global {
        RTLD_LAZY | RTLD_GLOBAL
    } else {
        RTLD_LAZY | RTLD_LOCAL
    };
    // SAFETY: loading a library runs its initialisers. The libraries opened
    // here are chosen by the operator's configuration and trusted.
    unsafe { NativeLibrary::open(Some(path), flags) }.map_err(|e| load_error(path, e))
}

#[cfg(windows)]
fn open_library(path: &Path, _global: bool) -> Result<NativeLibrary> {
    // SAFETY: see the unix variant; Windows has no symbol visibility flags.
    unsafe { NativeLibrary::new(path) }.map_err(|e| load_error(path, e))
}

#[cfg(all(unix, not(target_vendor = "apple")))]
fn enumerate_modules() -> Result<Vec<ModuleInfo>> {
    use std::ffi::{CStr, c_int, c_void};

    unsafe extern "C" fn collect(
        info: *mut libc::dl_phdr_info,
        _size: usize,
        data: *mut c_void,
    ) -> c_int {
        // SAFETY: `data` is the `Vec` passed to dl_iterate_phdr below and
        // `info` is valid for the duration of the callback.
        let (modules, info) = unsafe { (&mut *(data as *mut Vec<ModuleInfo>), &*info) };
        let name = if info.dlpi_name.is_null() {
            String::new()
        } else {
            // SAFETY: dlpi_name is a NUL-terminated string owned by the loader.
            unsafe { CStr::from_ptr(info.dlpi_name) }
                .to_string_lossy()
                .into_owned()
        };
        modules.push(ModuleInfo {
            name,
            base: info.dlpi_addr as usize,
        });
        0
    }

    let mut modules: Vec<ModuleInfo> = Vec::new();
    // SAFETY: the callback only touches `modules`, which outlives the call.
    unsafe {
        libc::dl_iterate_phdr(Some(collect), &mut modules as *mut Vec<ModuleInfo> as *mut c_void);
    }
    debug!("Enumerated {} loaded modules", modules.len());
    Ok(modules)
}

#[cfg(target_vendor = "apple")]
fn enumerate_modules() -> Result<Vec<ModuleInfo>> {
    use std::ffi::CStr;

    // SAFETY: dyld image queries are read-only; an index past the end
    // yields null pointers, which are skipped.
    let count = unsafe { libc::_dyld_image_count() };
    let mut modules = Vec::with_capacity(count as usize);
    for index in 0..count {
        let (header, name) =
            unsafe { (libc::_dyld_get_image_header(index), libc::_dyld_get_image_name(index)) };
        if header.is_null() {
            continue;
        }
        let name = if name.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
        };
        modules.push(ModuleInfo {
            name,
            base: header as usize,
        });
    }
    debug!("Enumerated {} loaded modules", modules.len());
    Ok(modules)
}

#[cfg(windows)]
fn enumerate_modules() -> Result<Vec<ModuleInfo>> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, MODULEENTRY32W, Module32FirstW, Module32NextW,
        TH32CS_SNAPMODULE,
    };

    // SAFETY: a module snapshot of the current process (pid 0).
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE, 0) }
        .map_err(|e| Error::ModuleEnumeration(e.to_string()))?;

    let mut entry = MODULEENTRY32W {
        dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
        ..Default::default()
    };

    let mut modules = Vec::new();
    // SAFETY: `entry` is initialised with its size as the API requires.
    let mut more = unsafe { Module32FirstW(snapshot, &mut entry) }.is_ok();
    while more {
        let len = entry
            .szExePath
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(entry.szExePath.len());
        modules.push(ModuleInfo {
            name: String::from_utf16_lossy(&entry.szExePath[..len]),
            base: entry.modBaseAddr as usize,
        });
        more = unsafe { Module32NextW(snapshot, &mut entry) }.is_ok();
    }

    // SAFETY: the snapshot handle is owned here and closed once.
    let _ = unsafe { CloseHandle(snapshot) };

    debug!("Enumerated {} loaded modules", modules.len());
    Ok(modules)
}
