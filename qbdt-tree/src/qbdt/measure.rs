//! Marginal probabilities and measurement collapse

use super::QBdt;
use crate::memo::{address, EngineMemo};
use crate::node::{prune, zero_ref, Children, NodeRef};
use crate::traversal::{descend_mut, walk, Descent, FirstError};
use ahash::AHashMap;
use qbdt_core::error::check_qubit;
use qbdt_core::{clamp_probability, unit_phase, QbdtError, Result, NORM_EPSILON};
use qbdt_state::AttachedEngine;
use std::sync::Arc;

impl<E: AttachedEngine> QBdt<E> {
    /// Probability that `qubit` reads 1.
    pub fn prob(&self, qubit: usize) -> Result<f64> {
        check_qubit(qubit, self.qubit_count())?;
        let root = &self.root;
        if qubit < self.tree_qubits {
            let p = self.traversal.fold(
                qubit,
                0.0,
                |i, acc| {
                    let w = walk(root, i, qubit);
                    if w.is_zero() {
                        return w.skip(i, qubit);
                    }
                    if let Children::Pair(pair) = &w.node.children {
                        *acc += (w.scale * pair[1].scale).norm_sqr();
                    }
                    0
                },
                |a, b| a + b,
            );
            return Ok(clamp_probability(p));
        }

        // Prefixes below different tree paths are orthogonal, so each leaf
        // contributes |scale|² times its engine's marginal whatever its phase.
        let bit = qubit - self.tree_qubits;
        let levels = self.tree_qubits;
        let errors = FirstError::default();
        let (p, _) = self.traversal.fold(
            levels,
            (0.0, AHashMap::new()),
            |i, (acc, cache)| {
                let w = walk(root, i, levels);
                if w.is_zero() {
                    return w.skip(i, levels);
                }
                if let Children::Engine(engine) = &w.node.children {
                    let key = address(engine);
                    let p = match cache.get(&key) {
                        Some(&p) => p,
                        None => match engine.probability(bit) {
                            Ok(p) => {
                                cache.insert(key, p);
                                p
                            }
                            Err(err) => {
                                errors.record(err);
                                0.0
                            }
                        },
                    };
                    *acc += w.scale.norm_sqr() * p;
                }
                0
            },
            |(a, _), (b, _)| (a + b, AHashMap::new()),
        );
        errors.into_result()?;
        Ok(clamp_probability(p))
    }

    /// Measures `qubit`, forcing `result` when given.
    ///
    /// With `apply` set the state collapses onto the outcome: every branch
    /// that disagrees with it is zeroed and the state is renormalized.
    ///
    /// # Arguments
    /// * `qubit` - Qubit to measure
    /// * `result` - Outcome to force, or `None` to sample one
    /// * `apply` - Whether to collapse the state onto the outcome
    ///
    /// # Returns
    /// The outcome. Forcing an outcome with zero probability fails with
    /// [`QbdtError::ImpossibleOutcome`].
    ///
    /// # Example
    /// ```
    /// use qbdt_tree::QBdt;
    /// use qbdt_core::matrix::HADAMARD;
    /// use qbdt_core::ONE;
    ///
    /// let mut state = QBdt::new(2, 0).unwrap();
    /// state.mtrx(&HADAMARD, 0).unwrap();
    /// state.mc_invert(&[0], ONE, ONE, 1).unwrap();
    ///
    /// assert!(state.force_m(0, Some(true), true).unwrap());
    /// assert!((state.prob(1).unwrap() - 1.0).abs() < 1e-12);
    /// ```
    pub fn force_m(&mut self, qubit: usize, result: Option<bool>, apply: bool) -> Result<bool> {
        let p1 = self.prob(qubit)?;
        let outcome = match result {
            Some(forced) => {
                let p = if forced { p1 } else { 1.0 - p1 };
                if p <= NORM_EPSILON {
                    return Err(QbdtError::ImpossibleOutcome {
                        qubit,
                        result: forced,
                    });
                }
                forced
            }
            None if p1 >= 1.0 => true,
            None if p1 <= 0.0 => false,
            None => self.draw() <= p1,
        };
        if !apply {
            return Ok(outcome);
        }

        if qubit < self.tree_qubits {
            let dropped = usize::from(!outcome);
            self.traversal
                .for_each_mut(&mut self.root, qubit, 0, |i, slot, levels| {
                    match descend_mut(slot, i, levels) {
                        Descent::Skip(skip) => skip,
                        Descent::Reached(node) => {
                            if let Children::Pair(pair) = &mut node.children {
                                pair[dropped] = zero_ref();
                            }
                            0
                        }
                    }
                });
            prune(&mut self.root, qubit + 1);
        } else {
            self.collapse_tail(qubit - self.tree_qubits, outcome)?;
        }
        self.renormalize_root();
        Ok(outcome)
    }

    /// Collapses engine qubit `bit` in every leaf, weighting each leaf by the
    /// probability of `outcome` it held.
    fn collapse_tail(&mut self, bit: usize, outcome: bool) -> Result<()> {
        let errors = FirstError::default();
        let engines = EngineMemo::new();
        let levels = self.tree_qubits;
        self.traversal
            .for_each_mut(&mut self.root, levels, 0, |i, slot, chunk| {
                let node = match descend_mut(slot, i, chunk) {
                    Descent::Skip(skip) => return skip,
                    Descent::Reached(node) => node,
                };
                let Children::Engine(engine) = &mut node.children else {
                    return 0;
                };
                let p = match engine.probability(bit) {
                    Ok(p1) if outcome => p1,
                    Ok(p1) => 1.0 - p1,
                    Err(err) => {
                        errors.record(err);
                        return 0;
                    }
                };
                if p <= NORM_EPSILON {
                    node.set_zero();
                    return 0;
                }
                let collapsed = engines.update(engine, |e| {
                    let mut no_draw = || 0.0;
                    e.force_measure(bit, Some(outcome), &mut no_draw, true)
                        .map(|_| ())
                });
                match collapsed {
                    Ok(()) => node.scale *= p.sqrt(),
                    Err(err) => errors.record(err),
                }
                0
            });
        errors.into_result()?;
        prune(&mut self.root, levels);
        Ok(())
    }

    /// Samples and collapses `qubit`.
    pub fn m(&mut self, qubit: usize) -> Result<bool> {
        self.force_m(qubit, None, true)
    }

    /// Measures the parity of a set of qubits and collapses onto it.
    ///
    /// Parity does not factor along tree paths, so the state is measured in
    /// dense fallback and compressed again afterwards unless it was already
    /// dense.
    ///
    /// # Arguments
    /// * `mask` - Basis-index mask; qubit `q` is bit `qubit_count() - 1 - q`
    /// * `result` - Parity to force, `true` for odd, used when `force` is set
    /// * `force` - Whether to force `result` instead of sampling
    ///
    /// # Returns
    /// `true` when the masked bits have odd parity. Forcing an outcome with
    /// zero probability fails with [`QbdtError::ImpossibleParity`].
    ///
    /// # Example
    /// ```
    /// use qbdt_tree::QBdt;
    /// use qbdt_core::matrix::HADAMARD;
    /// use qbdt_core::ONE;
    ///
    /// // Bell pair: both qubits always agree
    /// let mut state = QBdt::new(2, 0).unwrap();
    /// state.mtrx(&HADAMARD, 0).unwrap();
    /// state.mc_invert(&[0], ONE, ONE, 1).unwrap();
    ///
    /// assert!(!state.force_m_parity(0b11, false, false).unwrap());
    /// assert!(state.force_m_parity(0b11, true, true).is_err());
    /// ```
    pub fn force_m_parity(&mut self, mask: usize, result: bool, force: bool) -> Result<bool> {
        if mask >= self.max_index() {
            return Err(QbdtError::DimensionMismatch {
                expected: self.max_index(),
                actual: mask + 1,
            });
        }
        let was_dense = self.is_dense_fallback();
        self.set_dense_fallback()?;

        let rng = Arc::clone(&self.rng);
        let mut draw = move || rng.lock().draw();
        let forced = force.then_some(result);
        let node = Arc::make_mut(&mut self.root);
        let outcome = match &mut node.children {
            Children::Engine(engine) => {
                Arc::make_mut(engine).force_measure_parity(mask, forced, &mut draw)
            }
            _ => Err(QbdtError::InvalidArgument(
                "dense fallback holds no engine".to_string(),
            )),
        };

        if !was_dense {
            self.reset_dense_fallback()?;
        }
        outcome
    }

    /// Samples every qubit and collapses onto the sampled basis state.
    pub fn m_all(&mut self) -> Result<usize> {
        let rng = Arc::clone(&self.rng);
        let mut draw = move || rng.lock().draw();

        if let Some(attached) = self.dense_fallback {
            let node = Arc::make_mut(&mut self.root);
            let result = match &mut node.children {
                Children::Engine(engine) => Arc::make_mut(engine).measure_all(&mut draw),
                _ => 0,
            };
            let num_qubits = self.qubit_count();
            self.dense_fallback = None;
            self.tree_qubits = num_qubits - attached;
            self.attached_qubits = attached;
            self.set_permutation(result)?;
            return Ok(result);
        }

        let result = collapse_path(
            &mut self.root,
            self.tree_qubits,
            self.attached_qubits,
            &mut draw,
        );
        prune(&mut self.root, self.tree_qubits);
        self.renormalize_root();
        Ok(result)
    }
}

/// Samples one path from `slot` down `levels` levels, zeroing every branch
/// off it, and returns the basis index it spells.
fn collapse_path<E: AttachedEngine>(
    slot: &mut NodeRef<E>,
    levels: usize,
    tail: usize,
    draw: &mut dyn FnMut() -> f64,
) -> usize {
    if slot.is_zero() {
        return 0;
    }
    let node = Arc::make_mut(slot);
    match &mut node.children {
        Children::Engine(engine) if levels == 0 => Arc::make_mut(engine).measure_all(draw),
        Children::Pair(pair) if levels > 0 => {
            let weight = |child: &NodeRef<E>| {
                if child.is_zero() {
                    0.0
                } else {
                    child.scale.norm_sqr()
                }
            };
            let (w0, w1) = (weight(&pair[0]), weight(&pair[1]));
            let p1 = w1 / (w0 + w1);
            let bit = if p1 >= 1.0 {
                true
            } else if p1 <= 0.0 {
                false
            } else {
                draw() <= p1
            };
            let keep = usize::from(bit);
            pair[1 - keep] = zero_ref();
            let kept = Arc::make_mut(&mut pair[keep]);
            kept.scale = unit_phase(kept.scale);
            let below = collapse_path(&mut pair[keep], levels - 1, tail, draw);
            (usize::from(bit) << (levels - 1 + tail)) | below
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use crate::{QBdt, QBdtConfig};
    use approx::assert_relative_eq;
    use qbdt_core::matrix::{rotation_y, HADAMARD};
    use qbdt_core::random::{shared, FixedRandom, SequenceRandom};
    use qbdt_core::{QbdtError, ONE};
    use qbdt_state::DenseEngine;

    fn bell(draw: f64) -> QBdt {
        let mut state = QBdt::new(2, 0)
            .unwrap()
            .with_random_source(shared(FixedRandom(draw)));
        state.mtrx(&HADAMARD, 0).unwrap();
        state.mc_invert(&[0], ONE, ONE, 1).unwrap();
        state
    }

    #[test]
    fn test_prob_of_tree_qubit() {
        let mut state = QBdt::new(3, 0).unwrap();
        state.mtrx(&rotation_y(1.0), 1).unwrap();
        let expected = (0.5f64).sin().powi(2);
        assert_relative_eq!(state.prob(1).unwrap(), expected, epsilon = 1e-12);
        assert_relative_eq!(state.prob(0).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_prob_of_tail_qubit_shared_engine() {
        let mut state =
            QBdt::<DenseEngine>::with_split(2, 1, 0, QBdtConfig::default()).unwrap();
        state.mtrx(&HADAMARD, 0).unwrap();
        state.mtrx(&rotation_y(1.0), 2).unwrap();
        let expected = (0.5f64).sin().powi(2);
        assert_relative_eq!(state.prob(2).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_bell_outcomes_are_correlated() {
        for (draw, expected) in [(0.0, true), (0.999, false)] {
            let mut state = bell(draw);
            let first = state.m(0).unwrap();
            assert_eq!(first, expected);
            assert_relative_eq!(
                state.prob(1).unwrap(),
                if first { 1.0 } else { 0.0 },
                epsilon = 1e-12
            );
            assert_eq!(state.m(1).unwrap(), first);
        }
    }

    #[test]
    fn test_forcing_impossible_outcome_fails() {
        let mut state = QBdt::new(2, 0).unwrap();
        assert_eq!(
            state.force_m(1, Some(true), true),
            Err(QbdtError::ImpossibleOutcome {
                qubit: 1,
                result: true
            })
        );
    }

    #[test]
    fn test_collapse_keeps_relative_weights() {
        // cos|0>|0> + sin|1>(|0>+|1>)/√2, then force qubit 2 to 0
        let mut state = QBdt::new(3, 0).unwrap();
        state.mtrx(&rotation_y(1.2), 0).unwrap();
        state.mc_mtrx(&[0], &HADAMARD, 2).unwrap();
        assert!(!state.force_m(2, Some(false), true).unwrap());

        let (c, s) = ((0.6f64).cos(), (0.6f64).sin());
        let norm = (c * c + s * s / 2.0).sqrt();
        assert_relative_eq!(state.get_amplitude(0b000).unwrap().re, c / norm, epsilon = 1e-12);
        assert_relative_eq!(
            state.get_amplitude(0b100).unwrap().re,
            s / 2f64.sqrt() / norm,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_tail_collapse_renormalizes() {
        let mut state =
            QBdt::<DenseEngine>::with_split(1, 1, 0, QBdtConfig::default()).unwrap();
        state.mtrx(&HADAMARD, 0).unwrap();
        state.mc_mtrx(&[0], &HADAMARD, 1).unwrap();
        assert!(state.force_m(1, Some(true), true).unwrap());
        let probs = state.probabilities();
        assert_relative_eq!(probs.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(probs[0b11], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_m_all_returns_sampled_permutation() {
        let mut state = QBdt::<DenseEngine>::with_split(2, 1, 0, QBdtConfig::default())
            .unwrap()
            .with_random_source(shared(SequenceRandom::new([0.1, 0.9, 0.9])));
        for q in 0..3 {
            state.mtrx(&HADAMARD, q).unwrap();
        }
        let result = state.m_all().unwrap();
        assert_eq!(result, 0b101);
        assert_relative_eq!(state.get_amplitude(result).unwrap().norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_parity_of_ghz_pair() {
        // GHZ over three qubits, one in the tail
        let mut state = QBdt::<DenseEngine>::with_split(2, 1, 0, QBdtConfig::default()).unwrap();
        state.mtrx(&HADAMARD, 0).unwrap();
        state.mc_invert(&[0], ONE, ONE, 1).unwrap();
        state.mc_invert(&[1], ONE, ONE, 2).unwrap();

        // Qubits 0 and 2 agree in both branches, so the state is untouched
        assert!(!state.force_m_parity(0b101, false, false).unwrap());
        assert!(!state.is_dense_fallback());
        assert_eq!(state.tree_qubit_count(), 2);
        assert_relative_eq!(state.prob(0).unwrap(), 0.5, epsilon = 1e-12);
        assert_eq!(
            state.force_m_parity(0b101, true, true),
            Err(QbdtError::ImpossibleParity {
                mask: 0b101,
                result: true
            })
        );
        assert!(state.force_m_parity(0b1000, false, false).is_err());

        // Odd parity of qubit 0 alone selects the |111> branch
        assert!(state.force_m_parity(0b100, true, true).unwrap());
        assert_relative_eq!(state.probability_all(0b111).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_parity_sampling_collapses() {
        let mut state = QBdt::new(2, 0)
            .unwrap()
            .with_random_source(shared(FixedRandom(0.25)));
        state.mtrx(&HADAMARD, 0).unwrap();
        state.mtrx(&HADAMARD, 1).unwrap();
        state.set_dense_fallback().unwrap();

        let odd = state.force_m_parity(0b11, false, false).unwrap();
        assert!(odd);
        assert!(state.is_dense_fallback());
        let probs = state.probabilities();
        assert_relative_eq!(probs[0b01], 0.5, epsilon = 1e-12);
        assert_relative_eq!(probs[0b10], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_m_all_in_dense_fallback() {
        let mut state = QBdt::new(2, 0b10)
            .unwrap()
            .with_random_source(shared(FixedRandom(0.5)));
        state.set_dense_fallback().unwrap();
        assert_eq!(state.m_all().unwrap(), 0b10);
        assert!(!state.is_dense_fallback());
        assert_eq!(state.tree_qubit_count(), 2);
    }
}
