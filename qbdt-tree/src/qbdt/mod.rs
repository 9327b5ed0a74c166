//! The tree engine
//!
//! A [`QBdt`] splits an `n`-qubit register into `tree_qubits` decided by the
//! levels of a binary tree and `attached_qubits` held by dense engines at its
//! leaves. Operations live in submodules by concern:
//!
//! - `state`: amplitude reads, full-vector load and fidelity
//! - `gates`: single and controlled 2x2 operators, swaps and rotations
//! - `measure`: marginal probabilities and collapse
//! - `compose`: tensoring registers together and splitting them apart

mod compose;
mod gates;
mod measure;
mod state;

use crate::config::QBdtConfig;
use crate::node::{zero_ref, Children, Node, NodeRef};
use crate::traversal::SkipAhead;
use ahash::AHashSet;
use num_complex::Complex64;
use qbdt_core::bits::{bit_is_set, pow2, pow2_mask, MAX_QUBITS};
use qbdt_core::random::{shared, StdRandom};
use qbdt_core::{QbdtError, Result, SharedRandom, ONE};
use qbdt_state::{AttachedEngine, DenseEngine};
use std::f64::consts::TAU;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Compressed quantum state
///
/// Cloning is shallow: the clone shares every node and engine with the
/// original until either side writes to them.
///
/// # Example
///
/// ```
/// use qbdt_tree::QBdt;
/// use qbdt_core::matrix::HADAMARD;
///
/// let mut state = QBdt::new(2, 0).unwrap();
/// state.mtrx(&HADAMARD, 0).unwrap();
/// state.mc_invert(&[0], qbdt_core::ONE, qbdt_core::ONE, 1).unwrap();
///
/// let amps = state.get_quantum_state();
/// assert!((amps[0].re - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
/// assert!((amps[3].re - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
/// ```
#[derive(Clone)]
pub struct QBdt<E: AttachedEngine = DenseEngine> {
    root: NodeRef<E>,
    tree_qubits: usize,
    attached_qubits: usize,
    /// Attached width to restore when leaving dense fallback
    dense_fallback: Option<usize>,
    config: QBdtConfig,
    traversal: SkipAhead,
    rng: SharedRandom,
}

/// Sharing statistics of a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TreeStats {
    /// Distinct nonzero nodes
    pub nodes: usize,
    /// Distinct nodes referenced from more than one place
    pub shared_nodes: usize,
    /// Distinct attached engines
    pub engines: usize,
    /// Distinct engines referenced from more than one leaf
    pub shared_engines: usize,
}

impl QBdt<DenseEngine> {
    /// `num_qubits` register in basis state `perm`, default configuration.
    pub fn new(num_qubits: usize, perm: usize) -> Result<Self> {
        Self::with_config(num_qubits, perm, QBdtConfig::default())
    }
}

impl<E: AttachedEngine> QBdt<E> {
    /// Register with every qubit in the tree.
    pub fn with_config(num_qubits: usize, perm: usize, config: QBdtConfig) -> Result<Self> {
        Self::with_split(num_qubits, 0, perm, config)
    }

    /// Register whose last `attached_qubits` live in dense engines.
    pub fn with_split(
        tree_qubits: usize,
        attached_qubits: usize,
        perm: usize,
        config: QBdtConfig,
    ) -> Result<Self> {
        config.validate().map_err(QbdtError::InvalidArgument)?;
        let num_qubits = tree_qubits.saturating_add(attached_qubits);
        if num_qubits > MAX_QUBITS {
            return Err(QbdtError::TooManyQubits {
                num_qubits,
                max: MAX_QUBITS,
            });
        }
        let mut state = Self {
            root: zero_ref(),
            tree_qubits,
            attached_qubits,
            dense_fallback: None,
            traversal: SkipAhead::new(&config),
            rng: shared(StdRandom::from_seed(config.seed)),
            config,
        };
        state.set_permutation(perm)?;
        Ok(state)
    }

    /// Register loaded from a full amplitude vector of length `2^num_qubits`.
    pub fn from_amplitudes(
        num_qubits: usize,
        amplitudes: &[Complex64],
        config: QBdtConfig,
    ) -> Result<Self> {
        let mut state = Self::with_config(num_qubits, 0, config)?;
        state.set_quantum_state(amplitudes)?;
        Ok(state)
    }

    /// Replaces the random source; clones made afterwards share it.
    pub fn with_random_source(mut self, rng: SharedRandom) -> Self {
        self.rng = rng;
        self
    }

    /// State sharing this one's configuration and random source.
    fn with_root(&self, root: NodeRef<E>, tree_qubits: usize, attached_qubits: usize) -> Self {
        Self {
            root,
            tree_qubits,
            attached_qubits,
            dense_fallback: None,
            config: self.config.clone(),
            traversal: self.traversal.clone(),
            rng: Arc::clone(&self.rng),
        }
    }

    #[inline]
    pub fn qubit_count(&self) -> usize {
        self.tree_qubits + self.attached_qubits
    }

    /// Qubits decided by tree levels.
    #[inline]
    pub fn tree_qubit_count(&self) -> usize {
        self.tree_qubits
    }

    /// Qubits held by attached engines.
    #[inline]
    pub fn attached_qubit_count(&self) -> usize {
        self.attached_qubits
    }

    /// `2^qubit_count`
    #[inline]
    pub fn max_index(&self) -> usize {
        pow2(self.qubit_count())
    }

    /// Whether the whole state currently lives in one dense engine.
    #[inline]
    pub fn is_dense_fallback(&self) -> bool {
        self.dense_fallback.is_some()
    }

    pub fn config(&self) -> &QBdtConfig {
        &self.config
    }

    fn check_index(&self, perm: usize) -> Result<()> {
        if perm >= self.max_index() {
            return Err(QbdtError::InvalidArgument(format!(
                "basis index {perm} out of range for {} qubits",
                self.qubit_count()
            )));
        }
        Ok(())
    }

    /// Resets to basis state `perm`.
    pub fn set_permutation(&mut self, perm: usize) -> Result<()> {
        self.check_index(perm)?;
        let tail = self.attached_qubits;
        let mut node = if tail == 0 {
            Node::leaf(ONE)
        } else {
            let engine = E::new_permutation(tail, perm & pow2_mask(tail))?;
            Node::attached(ONE, Arc::new(engine))
        };
        for level in (0..self.tree_qubits).rev() {
            let below = Arc::new(node);
            let pair = if bit_is_set(perm, tail + self.tree_qubits - 1 - level) {
                [zero_ref(), below]
            } else {
                [below, zero_ref()]
            };
            node = Node::branch(ONE, pair);
        }
        node.scale = self.initial_phase();
        self.root = Arc::new(node);
        Ok(())
    }

    fn initial_phase(&self) -> Complex64 {
        if self.config.random_global_phase {
            Complex64::from_polar(1.0, TAU * self.draw())
        } else {
            ONE
        }
    }

    fn draw(&self) -> f64 {
        self.rng.lock().draw()
    }

    /// Distinct nonzero nodes in the tree.
    pub fn node_count(&self) -> usize {
        self.stats().nodes
    }

    pub fn stats(&self) -> TreeStats {
        let mut seen = AHashSet::new();
        let mut engines = AHashSet::new();
        let mut stats = TreeStats::default();
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            if node.is_zero() || !seen.insert(Arc::as_ptr(node) as usize) {
                continue;
            }
            stats.nodes += 1;
            if Arc::strong_count(node) > 1 {
                stats.shared_nodes += 1;
            }
            match &node.children {
                Children::Pair([c0, c1]) => {
                    stack.push(c0);
                    stack.push(c1);
                }
                Children::Engine(engine) => {
                    if engines.insert(Arc::as_ptr(engine) as usize) {
                        stats.engines += 1;
                        if Arc::strong_count(engine) > 1 {
                            stats.shared_engines += 1;
                        }
                    }
                }
                Children::Terminal => {}
            }
        }
        stats
    }

    /// Moves the whole state into a single dense engine.
    pub fn set_dense_fallback(&mut self) -> Result<()> {
        if self.is_dense_fallback() {
            return Ok(());
        }
        let num_qubits = self.qubit_count();
        let mut engine = E::from_amplitudes(num_qubits, &self.get_quantum_state())?;
        let norm = engine.norm().sqrt();
        engine.normalize();
        self.dense_fallback = Some(self.attached_qubits);
        self.root = Arc::new(Node::attached(Complex64::new(norm, 0.0), Arc::new(engine)));
        self.tree_qubits = 0;
        self.attached_qubits = num_qubits;
        debug!(qubits = num_qubits, "switched to dense fallback");
        Ok(())
    }

    /// Compresses a dense-fallback state back into a tree.
    pub fn reset_dense_fallback(&mut self) -> Result<()> {
        let Some(attached) = self.dense_fallback else {
            return Ok(());
        };
        let amplitudes = self.get_quantum_state();
        let num_qubits = self.qubit_count();
        let attached = attached.min(num_qubits);
        self.dense_fallback = None;
        self.tree_qubits = num_qubits - attached;
        self.attached_qubits = attached;
        self.set_quantum_state(&amplitudes)?;
        debug!(
            tree = self.tree_qubits,
            attached = self.attached_qubits,
            nodes = self.node_count(),
            "left dense fallback"
        );
        Ok(())
    }

    /// Switches to dense fallback once the tree outgrows the configured ratio.
    fn maybe_fall_back(&mut self) {
        let Some(ratio) = self.config.dense_fallback_ratio else {
            return;
        };
        if self.is_dense_fallback() || self.tree_qubits == 0 {
            return;
        }
        let limit = ratio * pow2(self.tree_qubits) as f64;
        if (self.node_count() as f64) <= limit {
            return;
        }
        if let Err(err) = self.set_dense_fallback() {
            warn!(%err, "dense fallback failed, staying compressed");
        }
    }

    /// Keeps the fallback flag consistent after the split changed.
    fn sync_fallback(&mut self) {
        if let Some(saved) = self.dense_fallback {
            self.dense_fallback = if self.tree_qubits > 0 {
                None
            } else {
                Some(saved.min(self.attached_qubits))
            };
        }
    }

    /// Drops accumulated magnitude error from the root scale, keeping its phase.
    fn renormalize_root(&mut self) {
        let norm = self.root.scale.norm();
        if norm > 0.0 && !self.root.is_zero() {
            Arc::make_mut(&mut self.root).scale /= norm;
        }
    }
}

impl<E: AttachedEngine> fmt::Debug for QBdt<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QBdt")
            .field("tree_qubits", &self.tree_qubits)
            .field("attached_qubits", &self.attached_qubits)
            .field("dense_fallback", &self.dense_fallback.is_some())
            .field("nodes", &self.node_count())
            .finish()
    }
}
