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

//! Executor error types

use std::path::PathBuf;
use thiserror::Error;

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Errors that can occur while registering or invoking WASM modules
#[derive(Debug, Error)]
pub enum ExecutorError {
    // Registry errors
    #[error("instance with id {0} not found")]
    NotFound(i64),

    // Module lifecycle errors
    #[error("failed to load {path:?}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("validation of {path:?} failed: {message}")]
    Validation { path: PathBuf, message: String },

    #[error("instantiation of {path:?} failed: {message}")]
    Instantiation { path: PathBuf, message: String },

    // Signature errors
    #[error("unsupported signature for {function}: {reason}")]
    UnsupportedSignature { function: String, reason: String },

    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    // Guest memory errors
    #[error("guest allocation failed: {0}")]
    Allocation(String),

    #[error("guest memory access out of bounds: offset {offset}, length {len}, memory size {size}")]
    MemoryOutOfBounds { offset: usize, len: usize, size: usize },

    // Invocation errors
    #[error("call to {function} failed: {message}")]
    Invocation { function: String, message: String },

    #[error("{function} trapped: {message}")]
    RuntimeTrap { function: String, message: String },

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    pub(crate) fn invocation(function: &str, message: impl Into<String>) -> Self {
        ExecutorError::Invocation {
            function: function.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn unsupported_signature(function: &str, reason: impl Into<String>) -> Self {
        ExecutorError::UnsupportedSignature {
            function: function.to_string(),
            reason: reason.into(),
        }
    }

    /// Missing export, signature mismatch or guest trap.
    pub fn is_invocation_error(&self) -> bool {
        matches!(
            self,
            ExecutorError::Invocation { .. } | ExecutorError::RuntimeTrap { .. }
        )
    }

    /// Whether the failure happened in one of the module lifecycle phases.
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            ExecutorError::Load { .. }
                | ExecutorError::Validation { .. }
                | ExecutorError::Instantiation { .. }
        )
    }
}

impl From<toml::de::Error> for ExecutorError {
    fn from(e: toml::de::Error) -> Self {
        ExecutorError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_class() {
        let trap = ExecutorError::RuntimeTrap {
            function: "fib".to_string(),
            message: "unreachable".to_string(),
        };
        assert!(trap.is_invocation_error());
        assert!(ExecutorError::invocation("fib", "missing export").is_invocation_error());
        assert!(!ExecutorError::NotFound(7).is_invocation_error());
    }

    #[test]
    fn test_display() {
        let err = ExecutorError::unsupported_signature("wide", "6 parameters (max 5)");
        assert_eq!(
            err.to_string(),
            "unsupported signature for wide: 6 parameters (max 5)"
        );
        assert_eq!(
            ExecutorError::NotFound(42).to_string(),
            "instance with id 42 not found"
        );
    }
}
