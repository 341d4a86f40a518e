// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Channel plugin modules: shared objects exporting a
// `tll_channel_module` entry function that hands back a descriptor with
// the implementations to register and optional init/free hooks. The
// library stays loaded for the context lifetime.

use libloading::Library;

use crate::error::{Error, Result};

use super::context::Context;
use super::ImplDesc;

pub const MODULE_VERSION: u32 = 1;

pub const MODULE_SYMBOL: &str = "tll_channel_module";

/// Descriptor returned by a module's entry function.
#[repr(C)]
pub struct ChannelModule {
    /// Must be [`MODULE_VERSION`]; newer modules are rejected.
    pub version: u32,
    pub impls: &'static [&'static ImplDesc],
    /// Optional; a failure aborts the load.
    pub init: Option<fn(&Context) -> Result<()>>,
    /// Called on context destruction.
    pub free: Option<fn()>,
}

pub type ModuleEntry = extern "C" fn() -> *const ChannelModule;

pub(crate) struct LoadedModule {
    library: Library,
    descriptor: &'static ChannelModule,
}

impl LoadedModule {
    pub(crate) fn unload(self) {
        if let Some(free) = self.descriptor.free {
            free();
        }
        drop(self.library);
    }
}

/// Library file name for a module path: `dir/name` becomes
/// `dir/libname.so` (`.dylib` on macOS).
fn library_path(module: &str) -> String {
    let suffix = if cfg!(target_os = "macos") { "dylib" } else { "so" };
    match module.rfind('/') {
        Some(sep) => format!("{}lib{}.{suffix}", &module[..sep + 1], &module[sep + 1..]),
        None => format!("lib{module}.{suffix}"),
    }
}

pub(crate) fn load(
    context: &Context,
    module: &str,
    symbol: Option<&str>,
) -> Result<Option<LoadedModule>> {
    let path = library_path(module);
    let symbol = symbol.filter(|s| !s.is_empty()).unwrap_or(MODULE_SYMBOL);
    tracing::debug!(module, path, symbol, "loading channel module");

    let library = unsafe { Library::new(&path) }
        .map_err(|e| Error::InvalidArgument(format!("failed to load module '{path}': {e}")))?;
    let entry = unsafe { library.get::<ModuleEntry>(symbol.as_bytes()) }.map_err(|e| {
        Error::InvalidArgument(format!("module '{path}' has no symbol '{symbol}': {e}"))
    })?;

    let descriptor = entry();
    if descriptor.is_null() {
        return Err(Error::InvalidArgument(format!(
            "module '{path}' entry '{symbol}' returned null"
        )));
    }
    let descriptor: &'static ChannelModule = unsafe { &*descriptor };
    if descriptor.version > MODULE_VERSION {
        return Err(Error::InvalidArgument(format!(
            "module '{path}' version mismatch: expected {MODULE_VERSION}, got {}",
            descriptor.version
        )));
    }
    if let Some(init) = descriptor.init {
        init(context).map_err(|e| {
            Error::InvalidArgument(format!("module '{path}' init failed: {e}"))
        })?;
    }
    if descriptor.impls.is_empty() && descriptor.init.is_none() {
        tracing::info!(module = path, "no channels defined in module");
    }
    for desc in descriptor.impls {
        context.register(desc)?;
    }
    Ok(Some(LoadedModule { library, descriptor }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_naming() {
        assert!(library_path("mymod").starts_with("libmymod."));
        assert!(library_path("/opt/tll/mymod").starts_with("/opt/tll/libmymod."));
    }
}
