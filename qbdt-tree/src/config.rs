//! Tree engine configuration

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for a [`QBdt`](crate::QBdt) state
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QBdtConfig {
    /// Draw a random global phase when resetting to a permutation
    ///
    /// Default: false
    pub random_global_phase: bool,

    /// Minimum traversal width, in index bits, before work fans out to the
    /// rayon pool
    ///
    /// Narrower traversals run on the calling thread.
    ///
    /// Default: 8
    pub parallel_threshold: usize,

    /// Index-range chunks handed to each worker thread
    ///
    /// Default: 4
    pub chunks_per_thread: usize,

    /// Switch to a single dense engine once the tree grows past this fraction
    /// of a full tree
    ///
    /// After each gate the number of distinct live nodes is compared against
    /// `ratio * 2^tree_qubits`. `None` never switches.
    ///
    /// Default: None
    pub dense_fallback_ratio: Option<f64>,

    /// Seed for the default random source
    ///
    /// If None, the source is seeded from the operating system.
    ///
    /// Default: None (random)
    pub seed: Option<u64>,
}

impl Default for QBdtConfig {
    fn default() -> Self {
        Self {
            random_global_phase: false,
            parallel_threshold: 8,
            chunks_per_thread: 4,
            dense_fallback_ratio: None,
            seed: None,
        }
    }
}

impl QBdtConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration that never leaves the calling thread
    pub fn sequential() -> Self {
        Self {
            parallel_threshold: usize::MAX,
            ..Default::default()
        }
    }

    /// Configuration with a fixed seed and no random global phase
    pub fn deterministic(seed: u64) -> Self {
        Self {
            random_global_phase: false,
            seed: Some(seed),
            ..Default::default()
        }
    }

    pub fn with_random_global_phase(mut self, enabled: bool) -> Self {
        self.random_global_phase = enabled;
        self
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    pub fn with_chunks_per_thread(mut self, chunks: usize) -> Self {
        self.chunks_per_thread = chunks.max(1);
        self
    }

    pub fn with_dense_fallback_ratio(mut self, ratio: f64) -> Self {
        self.dense_fallback_ratio = Some(ratio);
        self
    }

    /// Set the random seed for deterministic measurement
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.chunks_per_thread == 0 {
            return Err("chunks_per_thread must be > 0".to_string());
        }
        if let Some(ratio) = self.dense_fallback_ratio {
            if !(ratio > 0.0 && ratio.is_finite()) {
                return Err(format!(
                    "dense_fallback_ratio must be positive and finite, got {ratio}"
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QBdtConfig::default();
        assert!(!config.random_global_phase);
        assert_eq!(config.parallel_threshold, 8);
        assert_eq!(config.chunks_per_thread, 4);
        assert_eq!(config.dense_fallback_ratio, None);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn test_presets() {
        assert_eq!(QBdtConfig::sequential().parallel_threshold, usize::MAX);
        assert_eq!(QBdtConfig::deterministic(42).seed, Some(42));
    }

    #[test]
    fn test_builder_pattern() {
        let config = QBdtConfig::new()
            .with_random_global_phase(true)
            .with_parallel_threshold(4)
            .with_chunks_per_thread(0)
            .with_dense_fallback_ratio(0.5)
            .with_seed(7);

        assert!(config.random_global_phase);
        assert_eq!(config.parallel_threshold, 4);
        assert_eq!(config.chunks_per_thread, 1);
        assert_eq!(config.dense_fallback_ratio, Some(0.5));
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn test_validate() {
        assert!(QBdtConfig::default().validate().is_ok());

        let invalid = QBdtConfig {
            dense_fallback_ratio: Some(-1.0),
            ..Default::default()
        };
        assert!(invalid.validate().is_err());

        let invalid = QBdtConfig {
            chunks_per_thread: 0,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
    }
}
