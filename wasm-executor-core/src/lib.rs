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

//! WASM Executor Core
//!
//! Lets a database register compiled WebAssembly modules as instances and
//! call their exported functions from SQL with integer or text arguments.
//!
//! # Architecture
//!
//! - [`InstanceRegistry`]: instance id → module path, owns the catalog
//! - [`FunctionCatalog`]: lazily built, cached exported signatures
//! - [`ValueMarshaler`]: SQL values ↔ guest wire values
//! - [`InvocationSession`]: one isolated load/instantiate/call per invocation
//! - [`WasmRuntime`]: the wasmtime-backed module runtime
//! - [`WasmExecutor`]: facade tying the above together for host glue
//!
//! # Guest ABI
//!
//! Integer functions take and return `i64`. Text functions take and return
//! `i32` offsets of tagged, NUL-terminated strings in the guest's `memory`
//! export; the host allocates argument space through the guest's
//! `opengauss_malloc(i32) -> i32` export.
//!
//! # Example
//!
//! ```rust,ignore
//! use wasm_executor_core::WasmExecutor;
//!
//! let executor = WasmExecutor::with_defaults()?;
//! let id = executor.create_instance("/opt/udf/fib.wasm")?;
//!
//! for row in executor.exported_functions(id)? {
//!     println!("{}({}) -> {}", row.name, row.inputs, row.output);
//! }
//!
//! let fib = executor.invoke_int8(id, "fib", &[30])?;
//! ```

pub mod capabilities;
pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod marshal;
pub mod registry;
pub mod session;
pub mod wasm;

// Re-exports
pub use capabilities::{CapabilitySet, HostCapability};
pub use catalog::{FunctionCatalog, FunctionSignature, ValueKind, MAX_PARAMS};
pub use config::{
    CapabilityConfig, CatalogConfig, ExecutorConfig, GuestAbiConfig, OverflowPolicy,
    RuntimeConfig,
};
pub use error::{ExecutorError, ExecutorResult};
pub use executor::{ExportedFunctionRow, WasmExecutor};
pub use marshal::{GuestAllocator, GuestMemory, ValueMarshaler};
pub use registry::{canonicalize_path, instance_id, Instance, InstanceRegistry, InstanceSnapshot};
pub use session::InvocationSession;
pub use wasm::{RunningInstance, WasmRuntime};
