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

//! Exported function catalog
//!
//! Signatures are computed the first time an instance's functions are
//! requested, by instantiating the module in a throwaway context and
//! reading its export table. By convention an `i32` is always a guest
//! memory offset (text) and an `i64` is an integer.

use crate::config::OverflowPolicy;
use crate::error::{ExecutorError, ExecutorResult};
use crate::registry::InstanceRegistry;
use crate::wasm::WasmRuntime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use wasmtime::{FuncType, ValType};

/// Maximum number of parameters an exported function may take
pub const MAX_PARAMS: usize = 5;

/// Value kinds that can cross the host/guest boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Integer,
    Text,
}

impl ValueKind {
    /// Map a wasm value type onto a kind
    pub fn from_val_type(ty: &ValType) -> ExecutorResult<Self> {
        match ty {
            ValType::I32 => Ok(ValueKind::Text),
            ValType::I64 => Ok(ValueKind::Integer),
            other => Err(ExecutorError::UnsupportedType(format!(
                "value type {:?} is not supported",
                other
            ))),
        }
    }

    /// SQL type name
    pub fn sql_name(&self) -> &'static str {
        match self {
            ValueKind::Integer => "bigint",
            ValueKind::Text => "text",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// Signature of an exported function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<ValueKind>,
    pub result: ValueKind,
}

impl FunctionSignature {
    pub fn from_func_type(name: &str, ty: &FuncType) -> ExecutorResult<Self> {
        let param_count = ty.params().len();
        if param_count > MAX_PARAMS {
            return Err(ExecutorError::unsupported_signature(
                name,
                format!("{} parameters (max {})", param_count, MAX_PARAMS),
            ));
        }

        let results: Vec<ValType> = ty.results().collect();
        let [result] = results.as_slice() else {
            return Err(ExecutorError::unsupported_signature(
                name,
                format!("{} return values (exactly 1 supported)", results.len()),
            ));
        };

        let params = ty
            .params()
            .map(|p| ValueKind::from_val_type(&p))
            .collect::<ExecutorResult<Vec<_>>>()?;

        Ok(Self {
            name: name.to_string(),
            params,
            result: ValueKind::from_val_type(result)?,
        })
    }

    /// Parameter kinds joined with commas, e.g. `text,bigint`
    pub fn joined_params(&self) -> String {
        self.params
            .iter()
            .map(|p| p.sql_name())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Per-instance cache of exported signatures
pub struct FunctionCatalog {
    entries: RwLock<HashMap<i64, Arc<[FunctionSignature]>>>,
}

impl FunctionCatalog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the signatures of `id`, computing and caching them on first use
    pub fn ensure(
        &self,
        registry: &InstanceRegistry,
        id: i64,
    ) -> ExecutorResult<Arc<[FunctionSignature]>> {
        if let Some(cached) = self.cached(id) {
            tracing::debug!(id, "exported function catalog cache hit");
            return Ok(cached);
        }

        let path = registry.resolve(id)?;
        let signatures = introspect(registry.runtime(), &path)?;
        tracing::debug!(id, functions = signatures.len(), "exported function catalog built");

        registry.publish_signatures(id, signatures)
    }

    pub fn cached(&self, id: i64) -> Option<Arc<[FunctionSignature]>> {
        self.entries.read().get(&id).cloned()
    }

    /// Insert unless another caller got there first; the first entry wins
    pub(crate) fn insert(
        &self,
        id: i64,
        signatures: Vec<FunctionSignature>,
    ) -> Arc<[FunctionSignature]> {
        self.entries
            .write()
            .entry(id)
            .or_insert_with(|| signatures.into())
            .clone()
    }

    pub fn evict(&self, id: i64) -> bool {
        self.entries.write().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for FunctionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Load, validate and instantiate `path`, then read its export table
fn introspect(runtime: &WasmRuntime, path: &Path) -> ExecutorResult<Vec<FunctionSignature>> {
    let config = runtime.config();
    let loaded = runtime.load(path)?;
    runtime.validate(&loaded)?;
    let running = runtime.instantiate(&loaded, &config.capabilities.catalog)?;

    let exports = running.function_exports();
    let capacity = config.catalog.capacity;
    if exports.len() > capacity {
        match config.catalog.on_overflow {
            OverflowPolicy::Truncate => {
                tracing::warn!(
                    path = ?path,
                    exported = exports.len(),
                    capacity,
                    dropped = exports.len() - capacity,
                    "module exports more functions than the catalog holds; extra exports are ignored"
                );
            }
            OverflowPolicy::Reject => {
                return Err(ExecutorError::unsupported_signature(
                    &path.to_string_lossy(),
                    format!("{} exported functions (capacity {})", exports.len(), capacity),
                ));
            }
        }
    }

    let allocator = config.guest.allocator_export.as_str();
    let mut signatures = Vec::with_capacity(exports.len().min(capacity));
    for (name, ty) in exports.into_iter().take(capacity) {
        if name == allocator {
            tracing::debug!(function = %name, "allocator export is not listed");
            continue;
        }
        signatures.push(FunctionSignature::from_func_type(&name, &ty)?);
    }

    Ok(signatures)
}
