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

//! Configuration for the executor
//!
//! Every section has defaults matching the behaviour database users expect
//! out of the box: no execution budget, no module caching, the
//! `opengauss_malloc` guest allocator and a 256 entry export catalog.
//! Configs can be loaded from TOML:
//!
//! ```toml
//! [runtime]
//! fuel_limit = 10_000_000
//!
//! [catalog]
//! on_overflow = "reject"
//!
//! [capabilities]
//! text = ["system_interface"]
//! ```

use crate::capabilities::{CapabilitySet, HostCapability};
use crate::error::{ExecutorError, ExecutorResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the allocator export guests provide for text arguments
pub const DEFAULT_ALLOCATOR_EXPORT: &str = "opengauss_malloc";

/// Name of the linear memory export
pub const DEFAULT_MEMORY_EXPORT: &str = "memory";

/// Tag byte marking a text value in guest memory
pub const TEXT_TAG: u8 = 3;

/// Maximum number of function exports read from a module
pub const DEFAULT_CATALOG_CAPACITY: usize = 256;

/// Top-level executor configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub runtime: RuntimeConfig,
    pub guest: GuestAbiConfig,
    pub catalog: CatalogConfig,
    pub capabilities: CapabilityConfig,
}

impl ExecutorConfig {
    /// Parse a config from a TOML string
    pub fn from_toml(content: &str) -> ExecutorResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file
    pub fn from_file(path: &Path) -> ExecutorResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> ExecutorResult<()> {
        if self.catalog.capacity == 0 {
            return Err(ExecutorError::Config(
                "catalog.capacity must be at least 1".to_string(),
            ));
        }
        if self.guest.allocator_export.is_empty() {
            return Err(ExecutorError::Config(
                "guest.allocator_export must not be empty".to_string(),
            ));
        }
        if self.guest.memory_export.is_empty() {
            return Err(ExecutorError::Config(
                "guest.memory_export must not be empty".to_string(),
            ));
        }
        if self.runtime.fuel_limit == Some(0) {
            return Err(ExecutorError::Config(
                "runtime.fuel_limit must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Runtime engine settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Fuel (instruction) budget per call. `None` means no budget: a guest
    /// that loops forever blocks the caller.
    pub fuel_limit: Option<u64>,

    /// Keep compiled modules keyed by content hash. Running instances are
    /// never reused.
    pub cache_compiled_modules: bool,

    /// Let guests write to the host's stdout/stderr through WASI
    pub inherit_stdio: bool,
}

/// Guest ABI conventions for text marshaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestAbiConfig {
    pub allocator_export: String,
    pub memory_export: String,
    pub text_tag: u8,
}

impl Default for GuestAbiConfig {
    fn default() -> Self {
        Self {
            allocator_export: DEFAULT_ALLOCATOR_EXPORT.to_string(),
            memory_export: DEFAULT_MEMORY_EXPORT.to_string(),
            text_tag: TEXT_TAG,
        }
    }
}

/// What to do with exports beyond the catalog capacity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the first `capacity` exports and log a warning
    #[default]
    Truncate,
    /// Fail the catalog request
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub capacity: usize,
    pub on_overflow: OverflowPolicy,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CATALOG_CAPACITY,
            on_overflow: OverflowPolicy::Truncate,
        }
    }
}

/// Host capabilities granted per invocation path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Integer invocations
    pub integer: CapabilitySet,
    /// Text invocations
    pub text: CapabilitySet,
    /// Export introspection
    pub catalog: CapabilitySet,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            integer: [HostCapability::SystemInterface].into_iter().collect(),
            text: CapabilitySet::all(),
            catalog: CapabilitySet::all(),
        }
    }
}

impl CapabilityConfig {
    /// Grant the same set on every path
    pub fn uniform(set: CapabilitySet) -> Self {
        Self {
            integer: set.clone(),
            text: set.clone(),
            catalog: set,
        }
    }
}
