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

//! Host state and host imports for guest modules
//!
//! The system interface capability links WASI preview1 backed by the
//! [`WasiP1Ctx`] held in [`HostState`]. The neural network capability
//! satisfies every `wasi_ephemeral_nn` import the module declares; no
//! inference backend is bundled, so each call reports
//! `unsupported_operation` to the guest.

use crate::capabilities::WASI_NN_MODULE;
use crate::config::RuntimeConfig;
use crate::error::{ExecutorError, ExecutorResult};
use std::path::Path;
use wasmtime::{ExternType, Linker, Module, Val, ValType};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::WasiCtxBuilder;

/// wasi-nn `nn_errno::unsupported_operation`
pub const NN_ERRNO_UNSUPPORTED_OPERATION: i32 = 6;

/// Per-call store data
///
/// Lives exactly as long as the store of one session.
pub struct HostState {
    /// WASI context; only reachable from the guest when the system
    /// interface capability was linked
    wasi: WasiP1Ctx,

    /// Number of wasi-nn calls the guest attempted
    pub nn_calls: u64,
}

impl HostState {
    pub fn new(config: &RuntimeConfig) -> Self {
        let mut builder = WasiCtxBuilder::new();
        if config.inherit_stdio {
            builder.inherit_stdout().inherit_stderr();
        }

        Self {
            wasi: builder.build_p1(),
            nn_calls: 0,
        }
    }

    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }
}

/// Link WASI preview1 into the linker
pub fn link_system_interface(linker: &mut Linker<HostState>, path: &Path) -> ExecutorResult<()> {
    preview1::add_to_linker_sync(linker, |state: &mut HostState| state.wasi_mut()).map_err(|e| {
        ExecutorError::Instantiation {
            path: path.to_path_buf(),
            message: format!("failed to add WASI to linker: {}", e),
        }
    })
}

/// Define every `wasi_ephemeral_nn` function import of `module`
///
/// Imports whose results are not numeric are left undefined and surface as
/// missing imports at instantiation.
pub fn link_neural_network(
    linker: &mut Linker<HostState>,
    module: &Module,
    path: &Path,
) -> ExecutorResult<()> {
    for import in module.imports() {
        if import.module() != WASI_NN_MODULE {
            continue;
        }
        let ExternType::Func(ty) = import.ty() else {
            continue;
        };

        let results: Option<Vec<Val>> = ty.results().map(|r| unsupported_result(&r)).collect();
        let Some(results) = results else {
            tracing::debug!(import = import.name(), "wasi-nn import has non-numeric results");
            continue;
        };

        let name = import.name().to_string();
        linker
            .func_new(
                WASI_NN_MODULE,
                import.name(),
                ty.clone(),
                move |mut caller, _params, out| {
                    caller.data_mut().nn_calls += 1;
                    tracing::debug!(function = %name, "wasi-nn call without an inference backend");
                    for (slot, value) in out.iter_mut().zip(results.iter()) {
                        *slot = value.clone();
                    }
                    Ok(())
                },
            )
            .map_err(|e| ExecutorError::Instantiation {
                path: path.to_path_buf(),
                message: format!("failed to define {}::{}: {}", WASI_NN_MODULE, import.name(), e),
            })?;
    }
    Ok(())
}

fn unsupported_result(ty: &ValType) -> Option<Val> {
    match ty {
        ValType::I32 => Some(Val::I32(NN_ERRNO_UNSUPPORTED_OPERATION)),
        ValType::I64 => Some(Val::I64(NN_ERRNO_UNSUPPORTED_OPERATION as i64)),
        ValType::F32 => Some(Val::F32(0)),
        ValType::F64 => Some(Val::F64(0)),
        _ => None,
    }
}
