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

//! Executor facade - main entry point for host glue
//!
//! Wraps the registry, catalog and invocation sessions behind the surface a
//! database extension exposes as SQL functions. Authorization and SQL value
//! conversion stay with the caller.

use crate::catalog::FunctionSignature;
use crate::config::ExecutorConfig;
use crate::error::ExecutorResult;
use crate::registry::{InstanceRegistry, InstanceSnapshot};
use crate::session::InvocationSession;
use crate::wasm::WasmRuntime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One row of the exported functions listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedFunctionRow {
    /// Function name
    pub name: String,
    /// Comma separated parameter types, empty when there are none
    pub inputs: String,
    /// Result type
    pub output: String,
}

impl From<&FunctionSignature> for ExportedFunctionRow {
    fn from(sig: &FunctionSignature) -> Self {
        Self {
            name: sig.name.clone(),
            inputs: sig.joined_params(),
            output: sig.result.sql_name().to_string(),
        }
    }
}

/// Registry plus invocation entry points
///
/// `Send + Sync`; share it behind an `Arc` when the host calls from several
/// threads.
pub struct WasmExecutor {
    registry: InstanceRegistry,
}

impl WasmExecutor {
    pub fn new(config: ExecutorConfig) -> ExecutorResult<Self> {
        let runtime = Arc::new(WasmRuntime::new(config)?);
        Ok(Self {
            registry: InstanceRegistry::new(runtime),
        })
    }

    pub fn with_defaults() -> ExecutorResult<Self> {
        Self::new(ExecutorConfig::default())
    }

    pub fn config(&self) -> &ExecutorConfig {
        self.registry.runtime().config()
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Register a module file; returns the existing id if already registered
    pub fn create_instance(&self, path: impl AsRef<Path>) -> ExecutorResult<i64> {
        self.registry.create(path.as_ref())
    }

    /// Unregister an instance, returning the module path it pointed to
    pub fn drop_instance(&self, id: i64) -> ExecutorResult<PathBuf> {
        self.registry.drop(id)
    }

    pub fn instances(&self) -> InstanceSnapshot {
        self.registry.list()
    }

    pub fn signatures(&self, id: i64) -> ExecutorResult<Arc<[FunctionSignature]>> {
        self.registry.signatures(id)
    }

    pub fn exported_functions(&self, id: i64) -> ExecutorResult<Vec<ExportedFunctionRow>> {
        let signatures = self.registry.signatures(id)?;
        Ok(signatures.iter().map(ExportedFunctionRow::from).collect())
    }

    /// Call an integer function with zero to five arguments
    pub fn invoke_int8(&self, id: i64, function: &str, args: &[i64]) -> ExecutorResult<i64> {
        InvocationSession::new(&self.registry).invoke_integers(id, function, args)
    }

    /// Call a text function with one or two arguments
    pub fn invoke_text(&self, id: i64, function: &str, args: &[&str]) -> ExecutorResult<String> {
        InvocationSession::new(&self.registry).invoke_text(id, function, args)
    }
}
