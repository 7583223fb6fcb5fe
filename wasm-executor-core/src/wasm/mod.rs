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

//! WASM module runtime
//!
//! The module-loader capability the registry, catalog and sessions are built
//! on:
//! - Load, validate and instantiate as separate phases
//! - Host capability binding (WASI preview1, wasi-nn)
//! - Optional fuel budget per call
//! - Optional compiled-module cache, one entry per module path

pub mod host_functions;
pub mod runtime;

pub use host_functions::HostState;
pub use runtime::{LoadedModule, RunningInstance, WasmGuest, WasmRuntime};
