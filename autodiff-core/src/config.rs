//! Function configuration.
//!
//! Options are plain data with serde support so that host applications can
//! keep them in their own configuration files. Missing fields take their
//! default values.

use serde::{Deserialize, Serialize};

/// Options for a [`Function`](crate::Function).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionConfig {
    /// Compare the structural revision of every compiled node before each
    /// evaluation or propagation, and fail instead of running over a
    /// topology that changed since `compile`.
    pub verify_topology: bool,
}

impl FunctionConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            verify_topology: true,
        }
    }
}
