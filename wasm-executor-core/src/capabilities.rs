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

//! Host capabilities granted to guest modules
//!
//! A capability is a family of host imports linked into the guest at
//! instantiation time. Grants are explicit per invocation path and come
//! from [`CapabilityConfig`](crate::config::CapabilityConfig).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Import module name used by wasi-nn guests
pub const WASI_NN_MODULE: &str = "wasi_ephemeral_nn";

/// Individual host capability that can be granted to a guest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostCapability {
    /// WASI preview1 system interface (`wasi_snapshot_preview1`)
    SystemInterface,
    /// wasi-nn neural network interface (`wasi_ephemeral_nn`)
    NeuralNetwork,
}

impl fmt::Display for HostCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostCapability::SystemInterface => write!(f, "system_interface"),
            HostCapability::NeuralNetwork => write!(f, "neural_network"),
        }
    }
}

/// A set of host capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    capabilities: BTreeSet<HostCapability>,
}

impl CapabilitySet {
    /// Create an empty capability set
    pub fn new() -> Self {
        Self {
            capabilities: BTreeSet::new(),
        }
    }

    /// Every capability the runtime knows how to bind
    pub fn all() -> Self {
        [HostCapability::SystemInterface, HostCapability::NeuralNetwork]
            .into_iter()
            .collect()
    }

    /// Add a capability
    pub fn add(&mut self, cap: HostCapability) {
        self.capabilities.insert(cap);
    }

    /// Remove a capability
    pub fn remove(&mut self, cap: HostCapability) {
        self.capabilities.remove(&cap);
    }

    /// Check if a capability is present
    pub fn has(&self, cap: HostCapability) -> bool {
        self.capabilities.contains(&cap)
    }

    pub fn iter(&self) -> impl Iterator<Item = HostCapability> + '_ {
        self.capabilities.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }
}

impl FromIterator<HostCapability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = HostCapability>>(iter: I) -> Self {
        Self {
            capabilities: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_set() {
        let mut set = CapabilitySet::new();
        set.add(HostCapability::SystemInterface);

        assert!(set.has(HostCapability::SystemInterface));
        assert!(!set.has(HostCapability::NeuralNetwork));
        assert_eq!(set.len(), 1);

        set.remove(HostCapability::SystemInterface);
        assert!(set.is_empty());
    }

    #[test]
    fn test_display_is_ordered() {
        let set: CapabilitySet = [HostCapability::NeuralNetwork, HostCapability::SystemInterface]
            .into_iter()
            .collect();
        assert_eq!(set.to_string(), "[system_interface, neural_network]");
        assert_eq!(set, CapabilitySet::all());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&CapabilitySet::all()).unwrap();
        assert_eq!(json, r#"["system_interface","neural_network"]"#);
    }
}
