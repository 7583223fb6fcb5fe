// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Instance registry
//!
//! Maps instance ids to module paths. An instance id is the XXH64 hash of
//! the lexically canonicalized module path, so registering the same file
//! twice yields the same id.
//!
//! The registry also owns the [`FunctionCatalog`]. Both maps sit behind
//! `RwLock`s and are always locked instances first, catalog second: a drop
//! evicts the catalog entry while still holding the instances lock, so a
//! concurrent catalog computation can never publish signatures for an
//! instance that has just been dropped.

use crate::catalog::{FunctionCatalog, FunctionSignature};
use crate::error::{ExecutorError, ExecutorResult};
use crate::wasm::WasmRuntime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::Hasher;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use twox_hash::XxHash64;

/// A registered module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: i64,
    pub module_path: PathBuf,
}

/// Lexically canonicalize a module path
///
/// Collapses repeated separators, drops `.` components, folds `..` into a
/// preceding normal component and strips trailing separators. The
/// filesystem is never consulted, so symlinks are kept as written.
pub fn canonicalize_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().collect()
}

/// Deterministic instance id for an already canonical path
///
/// Hashes the raw path bytes, so paths that are not valid UTF-8 still get
/// distinct ids.
pub fn instance_id(canonical: &Path) -> i64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(canonical.as_os_str().as_encoded_bytes());
    hasher.finish() as i64
}

/// Snapshot of the registered instances, ordered by id
///
/// Calling [`InstanceRegistry::list`] again starts over from a fresh
/// snapshot.
pub struct InstanceSnapshot {
    inner: std::vec::IntoIter<Instance>,
}

impl Iterator for InstanceSnapshot {
    type Item = Instance;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for InstanceSnapshot {}

/// Process-lifetime registry of module instances
pub struct InstanceRegistry {
    instances: RwLock<BTreeMap<i64, Instance>>,
    catalog: FunctionCatalog,
    runtime: Arc<WasmRuntime>,
}

impl InstanceRegistry {
    pub fn new(runtime: Arc<WasmRuntime>) -> Self {
        Self {
            instances: RwLock::new(BTreeMap::new()),
            catalog: FunctionCatalog::new(),
            runtime,
        }
    }

    pub fn runtime(&self) -> &WasmRuntime {
        &self.runtime
    }

    pub fn catalog(&self) -> &FunctionCatalog {
        &self.catalog
    }

    /// Register the module at `path` and return its id
    ///
    /// Registering a path that is already known is a successful no-op. New
    /// modules are loaded and validated, then discarded; only the path is
    /// kept.
    pub fn create(&self, path: &Path) -> ExecutorResult<i64> {
        let module_path = canonicalize_path(path);
        let id = instance_id(&module_path);

        if self.instances.read().contains_key(&id) {
            tracing::info!(id, path = ?module_path, "instance already created");
            return Ok(id);
        }

        let loaded = self.runtime.load(&module_path)?;
        self.runtime.validate(&loaded)?;
        drop(loaded);

        self.instances
            .write()
            .entry(id)
            .or_insert_with(|| Instance {
                id,
                module_path: module_path.clone(),
            });

        tracing::info!(id, path = ?module_path, "instance created");
        Ok(id)
    }

    /// Remove an instance, its cached signatures and its compiled module,
    /// returning its path
    pub fn drop(&self, id: i64) -> ExecutorResult<PathBuf> {
        let mut instances = self.instances.write();
        let instance = instances.remove(&id).ok_or(ExecutorError::NotFound(id))?;
        self.catalog.evict(id);
        self.runtime.evict_module(&instance.module_path);

        tracing::info!(id, path = ?instance.module_path, "instance dropped");
        Ok(instance.module_path)
    }

    pub fn list(&self) -> InstanceSnapshot {
        let snapshot: Vec<Instance> = self.instances.read().values().cloned().collect();
        InstanceSnapshot {
            inner: snapshot.into_iter(),
        }
    }

    pub fn resolve(&self, id: i64) -> ExecutorResult<PathBuf> {
        self.instances
            .read()
            .get(&id)
            .map(|instance| instance.module_path.clone())
            .ok_or(ExecutorError::NotFound(id))
    }

    pub fn contains(&self, id: i64) -> bool {
        self.instances.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    /// Exported function signatures of an instance, computed on first use
    pub fn signatures(&self, id: i64) -> ExecutorResult<Arc<[FunctionSignature]>> {
        self.catalog.ensure(self, id)
    }

    /// Cache `signatures` for `id` unless the instance was dropped meanwhile
    pub(crate) fn publish_signatures(
        &self,
        id: i64,
        signatures: Vec<FunctionSignature>,
    ) -> ExecutorResult<Arc<[FunctionSignature]>> {
        let instances = self.instances.read();
        if !instances.contains_key(&id) {
            return Err(ExecutorError::NotFound(id));
        }
        Ok(self.catalog.insert(id, signatures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_path() {
        let cases = [
            ("/tmp//mods/./fib.wasm", "/tmp/mods/fib.wasm"),
            ("/tmp/mods/../fib.wasm", "/tmp/fib.wasm"),
            ("/tmp/mods/", "/tmp/mods"),
            ("/../fib.wasm", "/fib.wasm"),
            ("mods/fib.wasm", "mods/fib.wasm"),
            ("../x/../y.wasm", "../y.wasm"),
            ("./", "."),
        ];

        for (input, expected) in cases {
            assert_eq!(
                canonicalize_path(Path::new(input)),
                PathBuf::from(expected),
                "canonicalizing {}",
                input
            );
        }
    }

    #[test]
    fn test_instance_id_is_deterministic() {
        let a = instance_id(&canonicalize_path(Path::new("/tmp/mods/../fib.wasm")));
        let b = instance_id(&canonicalize_path(Path::new("/tmp//fib.wasm")));
        let c = instance_id(Path::new("/tmp/other.wasm"));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[cfg(unix)]
    #[test]
    fn test_instance_id_uses_raw_path_bytes() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let a = Path::new(OsStr::from_bytes(b"/tmp/mods/\xff.wasm"));
        let b = Path::new(OsStr::from_bytes(b"/tmp/mods/\xfe.wasm"));
        assert_ne!(instance_id(a), instance_id(b));
        assert_eq!(instance_id(a), instance_id(&canonicalize_path(a)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_paths_register_separately() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let registry = InstanceRegistry::new(Arc::new(WasmRuntime::with_defaults().unwrap()));

        let mut ids = Vec::new();
        for name in [&b"\xff.wasm"[..], &b"\xfe.wasm"[..]] {
            let path = dir.path().join(OsStr::from_bytes(name));
            std::fs::write(&path, wat::parse_str("(module)").unwrap()).unwrap();
            ids.push(registry.create(&path).unwrap());
        }

        assert_ne!(ids[0], ids[1]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unknown_instance() {
        let registry = InstanceRegistry::new(Arc::new(WasmRuntime::with_defaults().unwrap()));

        assert!(registry.is_empty());
        assert!(matches!(registry.resolve(1), Err(ExecutorError::NotFound(1))));
        assert!(matches!(registry.drop(1), Err(ExecutorError::NotFound(1))));
        assert_eq!(registry.list().count(), 0);
    }

    #[test]
    fn test_create_missing_file_is_load_error() {
        let registry = InstanceRegistry::new(Arc::new(WasmRuntime::with_defaults().unwrap()));

        let err = registry
            .create(Path::new("/nonexistent/dir/module.wasm"))
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Load { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_publish_requires_registration() {
        let registry = InstanceRegistry::new(Arc::new(WasmRuntime::with_defaults().unwrap()));

        let err = registry.publish_signatures(9, Vec::new()).unwrap_err();
        assert!(matches!(err, ExecutorError::NotFound(9)));
        assert!(registry.catalog().cached(9).is_none());
    }
}
