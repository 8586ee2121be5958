//! Conductor Plugins - WASM module discovery for plugin-provided step
//! kinds.
//!
//! Built-ins register unconditionally at startup; plugins register by
//! discovery. At startup, scan a configured directory for `*.wasm` files,
//! load each with `wasmtime`, ask it which step tag it wants via an
//! exported `step_kind` function, and register it as a leaf executor. A
//! minimal ABI (no full host/guest interface, no non-leaf kinds) keeps
//! this a discovery seam rather than a general plugin host.

pub mod wasm;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use wasmtime::{Instance, Store};

use conductor_domain::Step;
use conductor_engine::{
    generic_leaf_decode, generic_leaf_encode, ExecutorError, RegistryError, StepExecutor,
    StepOutcome, StepRegistry,
};

pub use wasm::runtime::{WasmError, WasmModule, WasmRuntime, WasmRuntimeConfig};

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin directory '{0}' is not readable: {1}")]
    DirectoryUnreadable(PathBuf, std::io::Error),
    #[error("wasm error loading '{path}': {source}")]
    Wasm {
        path: PathBuf,
        #[source]
        source: WasmError,
    },
    #[error("module '{0}' is missing a required export: {1}")]
    MissingExport(PathBuf, &'static str),
    #[error("registry rejected plugin kind: {0}")]
    Registry(#[from] RegistryError),
}

/// Scan `dir` for `*.wasm` modules and register each as a plugin-provided
/// step kind. Returns the number of kinds registered. A missing or
/// unreadable directory is not fatal: it yields zero kinds, logged as a
/// warning, never a startup panic — discovery fails closed.
pub fn discover_plugins(
    dir: &Path,
    runtime: &WasmRuntime,
    registry: &mut StepRegistry,
) -> Result<usize, PluginError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "plugin directory unreadable, loading no plugins");
            return Ok(0);
        }
    };

    let mut loaded = 0usize;
    for entry in entries {
        let entry = entry.map_err(|e| PluginError::DirectoryUnreadable(dir.to_path_buf(), e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("wasm") {
            continue;
        }
        match load_one(&path, runtime, registry) {
            Ok(tag) => {
                info!(tag, path = %path.display(), "registered plugin step kind");
                loaded += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load plugin module, skipping");
            }
        }
    }
    Ok(loaded)
}

fn load_one(
    path: &Path,
    runtime: &WasmRuntime,
    registry: &mut StepRegistry,
) -> Result<String, PluginError> {
    let bytes = std::fs::read(path).map_err(|e| PluginError::DirectoryUnreadable(path.to_path_buf(), e))?;
    let module = runtime
        .load_module(&bytes)
        .map_err(|e| PluginError::Wasm {
            path: path.to_path_buf(),
            source: e,
        })?;
    let tag = read_step_kind(&module, path)?;

    let executor = std::sync::Arc::new(WasmStepExecutor { module });
    registry.register_dynamic(
        tag.clone(),
        generic_leaf_decode,
        generic_leaf_encode,
        executor,
        false,
        format!("Plugin: {tag}"),
    )?;
    Ok(tag)
}

/// Calls the module's exported `step_kind() -> i64` (packed `ptr << 32 |
/// len` into its own linear memory) to learn the tag it wants to register.
fn read_step_kind(module: &WasmModule, path: &Path) -> Result<String, PluginError> {
    let mut store = Store::new(module.engine(), ());
    let instance = Instance::new(&mut store, module.module(), &[]).map_err(|e| PluginError::Wasm {
        path: path.to_path_buf(),
        source: WasmError::ModuleLoadError(e.to_string()),
    })?;
    let memory = instance
        .get_memory(&mut store, "memory")
        .ok_or_else(|| PluginError::MissingExport(path.to_path_buf(), "memory"))?;
    let step_kind_fn = instance
        .get_typed_func::<(), i64>(&mut store, "step_kind")
        .map_err(|_| PluginError::MissingExport(path.to_path_buf(), "step_kind"))?;
    let packed = step_kind_fn
        .call(&mut store, ())
        .map_err(|e| PluginError::Wasm {
            path: path.to_path_buf(),
            source: WasmError::ExecutionError(e.to_string()),
        })?;
    let ptr = (packed >> 32) as u32 as usize;
    let len = (packed & 0xffff_ffff) as u32 as usize;
    let mut buf = vec![0u8; len];
    memory
        .read(&store, ptr, &mut buf)
        .map_err(|e| PluginError::Wasm {
            path: path.to_path_buf(),
            source: WasmError::ExecutionError(e.to_string()),
        })?;
    String::from_utf8(buf).map_err(|e| PluginError::Wasm {
        path: path.to_path_buf(),
        source: WasmError::ExecutionError(e.to_string()),
    })
}

/// Wraps one loaded WASM module as a leaf `StepExecutor`. Each call
/// instantiates fresh rather than reusing one long-lived instance, the
/// simplest way to keep calls isolated without a pool.
struct WasmStepExecutor {
    module: WasmModule,
}

#[async_trait::async_trait]
impl StepExecutor for WasmStepExecutor {
    async fn execute(
        &self,
        step: &Step,
        ctx: &mut conductor_engine::ExecutionContext,
        _engine: &conductor_engine::ExecutionEngine,
    ) -> Result<StepOutcome, ExecutorError> {
        let input = serde_json::json!({ "fields": step.fields, "context": ctx.context });
        let bytes = serde_json::to_vec(&input).map_err(|e| ExecutorError::Failed(e.to_string()))?;

        let mut store = Store::new(self.module.engine(), ());
        let instance = Instance::new(&mut store, self.module.module(), &[])
            .map_err(|e| ExecutorError::Failed(e.to_string()))?;
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| ExecutorError::Failed("plugin module has no exported memory".to_string()))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, "alloc")
            .map_err(|e| ExecutorError::Failed(e.to_string()))?;
        let ptr = alloc
            .call(&mut store, bytes.len() as i32)
            .map_err(|e| ExecutorError::Failed(e.to_string()))?;
        memory
            .write(&mut store, ptr as usize, &bytes)
            .map_err(|e| ExecutorError::Failed(e.to_string()))?;

        let execute_fn = instance
            .get_typed_func::<(i32, i32), i64>(&mut store, "execute")
            .map_err(|e| ExecutorError::Failed(e.to_string()))?;
        let packed = execute_fn
            .call(&mut store, (ptr, bytes.len() as i32))
            .map_err(|e| ExecutorError::Failed(e.to_string()))?;

        let out_ptr = (packed >> 32) as u32 as usize;
        let out_len = (packed & 0xffff_ffff) as u32 as usize;
        let mut out_buf = vec![0u8; out_len];
        memory
            .read(&store, out_ptr, &mut out_buf)
            .map_err(|e| ExecutorError::Failed(e.to_string()))?;
        let output: serde_json::Value =
            serde_json::from_slice(&out_buf).map_err(|e| ExecutorError::Failed(e.to_string()))?;

        Ok(StepOutcome::completed(Some(output)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn discovery_fails_closed_on_missing_directory() {
        let mut registry = StepRegistry::with_builtins();
        let runtime = WasmRuntime::new(WasmRuntimeConfig::default()).unwrap();
        let missing: PathBuf = "/nonexistent/plugin/dir/for/tests".into();
        let loaded = discover_plugins(&missing, &runtime, &mut registry).unwrap();
        assert_eq!(loaded, 0);
    }

    #[test]
    fn discovery_skips_non_wasm_files() {
        let dir = std::env::temp_dir().join(format!("conductor-plugins-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("notes.txt"), b"not a plugin").unwrap();

        let mut registry = StepRegistry::with_builtins();
        let runtime = WasmRuntime::new(WasmRuntimeConfig::default()).unwrap();
        let loaded = discover_plugins(&dir, &runtime, &mut registry).unwrap();
        assert_eq!(loaded, 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn discovery_skips_unparseable_wasm_and_keeps_going() {
        let dir = std::env::temp_dir().join(format!("conductor-plugins-test-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("broken.wasm"), b"not actually wasm bytes").unwrap();

        let mut registry = StepRegistry::with_builtins();
        let runtime = WasmRuntime::new(WasmRuntimeConfig::default()).unwrap();
        let loaded = discover_plugins(&dir, &runtime, &mut registry).unwrap();
        assert_eq!(loaded, 0);
        assert!(registry.is_registered("LogTask"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
