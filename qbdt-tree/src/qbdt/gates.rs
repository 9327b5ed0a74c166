//! Single-qubit and controlled operators, swaps and register rotations

use super::QBdt;
use crate::memo::EngineMemo;
use crate::node::{prune, Children};
use crate::traversal::{descend_mut, Descent, FirstError};
use num_complex::Complex64;
use qbdt_core::bits::{mask_skip, pow2};
use qbdt_core::error::{check_qubit, check_range};
use qbdt_core::matrix::{self, classify, MatrixKind, HADAMARD};
use qbdt_core::{approx_eq, Matrix2, QbdtError, Result, ONE};
use qbdt_state::AttachedEngine;
use smallvec::SmallVec;
use tracing::{debug, trace};

type Qubits = SmallVec<[usize; 4]>;

impl<E: AttachedEngine> QBdt<E> {
    /// Applies `m` to `target`.
    pub fn mtrx(&mut self, m: &Matrix2, target: usize) -> Result<()> {
        self.mc_mtrx(&[], m, target)
    }

    /// Applies `m` to `target` on the basis states where every control is 1.
    pub fn mc_mtrx(&mut self, controls: &[usize], m: &Matrix2, target: usize) -> Result<()> {
        self.check_gate(controls, target)?;
        match classify(m) {
            MatrixKind::Diagonal => self.mc_phase(controls, m[0][0], m[1][1], target),
            MatrixKind::AntiDiagonal => self.mc_invert(controls, m[0][1], m[1][0], target),
            MatrixKind::General => self.apply_controlled_single(controls, m, target),
        }
    }

    /// Controlled `diag(top_left, bottom_right)`.
    ///
    /// When `top_left` is 1 the operator only phases the all-ones pattern, so
    /// it is the same gate whichever of its qubits is called the target. It is
    /// then applied to the deepest one, which needs no reordering.
    pub fn mc_phase(
        &mut self,
        controls: &[usize],
        top_left: Complex64,
        bottom_right: Complex64,
        target: usize,
    ) -> Result<()> {
        self.check_gate(controls, target)?;
        if approx_eq(top_left, ONE) && approx_eq(bottom_right, ONE) {
            return Ok(());
        }
        let m = matrix::diagonal(top_left, bottom_right);
        if controls.is_empty() || !approx_eq(top_left, ONE) {
            return self.apply_controlled_single(controls, &m, target);
        }
        let deepest = controls.iter().copied().fold(target, usize::max);
        let retargeted: Qubits = controls
            .iter()
            .copied()
            .chain(std::iter::once(target))
            .filter(|&q| q != deepest)
            .collect();
        self.apply_controlled_single(&retargeted, &m, deepest)
    }

    /// Controlled `[[0, top_right], [bottom_left, 0]]`.
    pub fn mc_invert(
        &mut self,
        controls: &[usize],
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    ) -> Result<()> {
        self.check_gate(controls, target)?;
        let m = matrix::anti_diagonal(top_right, bottom_left);
        self.apply_controlled_single(controls, &m, target)
    }

    fn check_gate(&self, controls: &[usize], target: usize) -> Result<()> {
        let n = self.qubit_count();
        check_qubit(target, n)?;
        for (k, &c) in controls.iter().enumerate() {
            check_qubit(c, n)?;
            if c == target || controls[..k].contains(&c) {
                return Err(QbdtError::InvalidArgument(format!(
                    "qubit {c} appears twice among the gate's qubits"
                )));
            }
        }
        Ok(())
    }

    /// General controlled application; every other gate path ends here.
    fn apply_controlled_single(
        &mut self,
        controls: &[usize],
        m: &Matrix2,
        target: usize,
    ) -> Result<()> {
        let mut sorted: Qubits = controls.iter().copied().collect();
        sorted.sort_unstable();
        let tree_qubits = self.tree_qubits;

        // Controls must sit above the target in the tree.
        if let Some(&deepest) = sorted.last() {
            if target < deepest && target < tree_qubits {
                debug!(target, control = deepest, "moving target below its deepest control");
                self.swap(target, deepest)?;
                let mut moved: Qubits = sorted[..sorted.len() - 1].iter().copied().collect();
                moved.push(target);
                let applied = self.apply_controlled_single(&moved, m, deepest);
                self.swap(target, deepest)?;
                return applied;
            }
        }

        let in_tail = target >= tree_qubits;
        let bits = if in_tail { tree_qubits } else { target };
        let mut required = 0usize;
        let mut ket: Qubits = SmallVec::new();
        for &c in &sorted {
            if c < tree_qubits {
                required |= pow2(bits - 1 - c);
            } else {
                ket.push(c - tree_qubits);
            }
        }

        let errors = FirstError::default();
        let engines = EngineMemo::new();
        self.traversal
            .for_each_mut(&mut self.root, bits, required, |i, slot, levels| {
                if i & required != required {
                    return mask_skip(i, required);
                }
                let node = match descend_mut(slot, i, levels) {
                    Descent::Skip(skip) => return skip,
                    Descent::Reached(node) => node,
                };
                let applied = if in_tail {
                    match &mut node.children {
                        Children::Engine(engine) => engines.update(engine, |e| {
                            e.apply_controlled_matrix(&ket, m, target - tree_qubits)
                        }),
                        _ => Ok(()),
                    }
                } else {
                    node.apply_matrix(m)
                };
                if let Err(err) = applied {
                    errors.record(err);
                }
                0
            });
        errors.into_result()?;

        prune(&mut self.root, bits + 1);
        trace!(target, nodes = self.node_count(), "applied controlled matrix");
        self.maybe_fall_back();
        Ok(())
    }

    /// Applies `op` to every distinct attached engine.
    pub(crate) fn update_engines(
        &mut self,
        op: impl Fn(&mut E) -> Result<()> + Sync + Send,
    ) -> Result<()> {
        let errors = FirstError::default();
        let engines = EngineMemo::new();
        self.traversal
            .for_each_mut(&mut self.root, self.tree_qubits, 0, |i, slot, levels| {
                match descend_mut(slot, i, levels) {
                    Descent::Skip(skip) => skip,
                    Descent::Reached(node) => {
                        if let Children::Engine(engine) = &mut node.children {
                            if let Err(err) = engines.update(engine, &op) {
                                errors.record(err);
                            }
                        }
                        0
                    }
                }
            });
        errors.into_result()
    }

    /// Exchanges two qubits.
    ///
    /// Inside the tree the swap is three CNOTs. The middle one runs in the
    /// Hadamard basis so its control stays above its target.
    pub fn swap(&mut self, qubit_a: usize, qubit_b: usize) -> Result<()> {
        let n = self.qubit_count();
        check_qubit(qubit_a, n)?;
        check_qubit(qubit_b, n)?;
        if qubit_a == qubit_b {
            return Ok(());
        }
        let (a, b) = (qubit_a.min(qubit_b), qubit_a.max(qubit_b));
        if a >= self.tree_qubits {
            let offset = self.tree_qubits;
            return self.update_engines(|e| e.swap(a - offset, b - offset));
        }
        self.mc_invert(&[a], ONE, ONE, b)?;
        self.mtrx(&HADAMARD, a)?;
        self.mtrx(&HADAMARD, b)?;
        self.mc_invert(&[a], ONE, ONE, b)?;
        self.mtrx(&HADAMARD, a)?;
        self.mtrx(&HADAMARD, b)?;
        self.mc_invert(&[a], ONE, ONE, b)
    }

    /// Reverses the order of qubits `[start, end)`.
    pub fn reverse(&mut self, start: usize, end: usize) -> Result<()> {
        check_range(start, end.saturating_sub(start), self.qubit_count())?;
        let (mut lo, mut hi) = (start, end);
        while lo + 1 < hi {
            hi -= 1;
            self.swap(lo, hi)?;
            lo += 1;
        }
        Ok(())
    }

    /// Rotates qubits `[start, start + length)` so qubit `start + j` moves
    /// to `start + (j + shift) % length`.
    pub fn rol(&mut self, shift: usize, start: usize, length: usize) -> Result<()> {
        check_range(start, length, self.qubit_count())?;
        if length == 0 {
            return Ok(());
        }
        let shift = shift % length;
        if shift == 0 {
            return Ok(());
        }
        let end = start + length;
        self.reverse(start, end)?;
        self.reverse(start, start + shift)?;
        self.reverse(start + shift, end)
    }

    /// Inverse of [`rol`](Self::rol).
    pub fn ror(&mut self, shift: usize, start: usize, length: usize) -> Result<()> {
        if length == 0 {
            return check_range(start, length, self.qubit_count());
        }
        self.rol(length - shift % length, start, length)
    }
}
