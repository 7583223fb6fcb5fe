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

//! Invocation sessions
//!
//! Each invocation reloads, revalidates and reinstantiates the module in a
//! fresh store. The [`RunningInstance`] is dropped when the call returns, on
//! success and on every error path, so no guest state survives between
//! calls and a module replaced on disk is picked up by the next call.

use crate::capabilities::CapabilitySet;
use crate::catalog::MAX_PARAMS;
use crate::error::{ExecutorError, ExecutorResult};
use crate::marshal::ValueMarshaler;
use crate::registry::InstanceRegistry;
use crate::wasm::{RunningInstance, WasmRuntime};
use std::path::Path;
use wasmtime::{FuncType, ValType};

/// Allowed number of text arguments
pub const MIN_TEXT_ARGS: usize = 1;
pub const MAX_TEXT_ARGS: usize = 2;

/// Runs single calls against registered instances
pub struct InvocationSession<'a> {
    registry: &'a InstanceRegistry,
    marshaler: ValueMarshaler,
}

impl<'a> InvocationSession<'a> {
    pub fn new(registry: &'a InstanceRegistry) -> Self {
        let marshaler = ValueMarshaler::new(registry.runtime().config().guest.text_tag);
        Self {
            registry,
            marshaler,
        }
    }

    fn runtime(&self) -> &WasmRuntime {
        self.registry.runtime()
    }

    /// Call an `(i64, ...) -> i64` export with up to five arguments
    ///
    /// Lifecycle failures, a missing export and signature mismatches are all
    /// reported as [`ExecutorError::Invocation`]; guest traps as
    /// [`ExecutorError::RuntimeTrap`].
    pub fn invoke_integers(&self, id: i64, function: &str, args: &[i64]) -> ExecutorResult<i64> {
        if args.len() > MAX_PARAMS {
            return Err(ExecutorError::unsupported_signature(
                function,
                format!("{} integer arguments (max {})", args.len(), MAX_PARAMS),
            ));
        }

        let path = self.registry.resolve(id)?;
        let grants = &self.runtime().config().capabilities.integer;
        tracing::debug!(id, function, args = args.len(), "invoking integer function");

        let mut running = self
            .start(&path, grants)
            .map_err(|e| fold_lifecycle_error(function, e))?;

        let ty = running
            .func_type(function)
            .ok_or_else(|| ExecutorError::invocation(function, "function is not exported"))?;
        expect_signature(function, &ty, &vec![ValType::I64; args.len()], ValType::I64)?;

        let params: Vec<_> = args
            .iter()
            .map(|a| self.marshaler.to_guest_integer(*a))
            .collect();
        let result = running.call(function, &params)?;

        self.marshaler
            .from_guest_integer(&result)
            .map_err(|e| ExecutorError::invocation(function, e.to_string()))
    }

    /// Call an `(i32, ...) -> i32` export with one or two text arguments
    pub fn invoke_text(&self, id: i64, function: &str, args: &[&str]) -> ExecutorResult<String> {
        if !(MIN_TEXT_ARGS..=MAX_TEXT_ARGS).contains(&args.len()) {
            return Err(ExecutorError::unsupported_signature(
                function,
                format!(
                    "{} text arguments (expected {} to {})",
                    args.len(),
                    MIN_TEXT_ARGS,
                    MAX_TEXT_ARGS
                ),
            ));
        }

        let path = self.registry.resolve(id)?;
        let config = self.runtime().config();
        tracing::debug!(id, function, args = args.len(), "invoking text function");

        let mut running = self.start(&path, &config.capabilities.text)?;

        let memory = running.memory(&config.guest.memory_export).ok_or_else(|| {
            ExecutorError::invocation(
                function,
                format!("module does not export memory {:?}", config.guest.memory_export),
            )
        })?;

        let ty = running
            .func_type(function)
            .ok_or_else(|| ExecutorError::invocation(function, "function is not exported"))?;
        expect_signature(function, &ty, &vec![ValType::I32; args.len()], ValType::I32)?;

        let params = {
            let mut guest = running.guest(memory, &config.guest.allocator_export);
            args.iter()
                .map(|arg| self.marshaler.to_guest_text(arg, &mut guest))
                .collect::<ExecutorResult<Vec<_>>>()?
        };

        let result = running.call(function, &params)?;
        let offset = result
            .i32()
            .ok_or_else(|| ExecutorError::invocation(function, "expected an i32 result"))?;

        let guest = running.guest(memory, &config.guest.allocator_export);
        self.marshaler.from_guest_text(offset as u32, &guest)
    }

    /// Load, validate and instantiate in one isolated context
    fn start(&self, path: &Path, grants: &CapabilitySet) -> ExecutorResult<RunningInstance> {
        let runtime = self.runtime();
        let loaded = runtime.load(path)?;
        runtime.validate(&loaded)?;
        runtime.instantiate(&loaded, grants)
    }
}

fn fold_lifecycle_error(function: &str, error: ExecutorError) -> ExecutorError {
    if error.is_lifecycle_error() {
        ExecutorError::invocation(function, error.to_string())
    } else {
        error
    }
}

fn expect_signature(
    function: &str,
    ty: &FuncType,
    params: &[ValType],
    result: ValType,
) -> ExecutorResult<()> {
    let actual_params: Vec<ValType> = ty.params().collect();
    let actual_results: Vec<ValType> = ty.results().collect();

    let params_match = actual_params.len() == params.len()
        && actual_params
            .iter()
            .zip(params)
            .all(|(a, b)| same_numeric_type(a, b));
    let result_matches =
        matches!(actual_results.as_slice(), [r] if same_numeric_type(r, &result));

    if params_match && result_matches {
        Ok(())
    } else {
        Err(ExecutorError::invocation(
            function,
            format!(
                "signature mismatch: function is {:?} -> {:?}, call expects {:?} -> {:?}",
                actual_params, actual_results, params, result
            ),
        ))
    }
}

fn same_numeric_type(a: &ValType, b: &ValType) -> bool {
    matches!(
        (a, b),
        (ValType::I32, ValType::I32)
            | (ValType::I64, ValType::I64)
            | (ValType::F32, ValType::F32)
            | (ValType::F64, ValType::F64)
    )
}
