//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// Fixed-point iteration settings for [`FlatModel::compute`](crate::FlatModel::compute).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Iteration stops once no tensor entry moved by this much or more.
    pub tolerance: f64,

    /// Iteration cap. `None` iterates until convergence, however long that
    /// takes; the caller is then responsible for any wall-clock guard.
    pub max_iterations: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            tolerance: 1e-6,
            max_iterations: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.tolerance, 1e-6);
        assert!(config.max_iterations.is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{"max_iterations":500}"#).unwrap();
        assert_eq!(config.tolerance, 1e-6);
        assert_eq!(config.max_iterations, Some(500));
    }
}
