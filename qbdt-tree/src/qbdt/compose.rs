//! Tensoring registers together and splitting them apart
//!
//! The tree only splices at one place: the boundary between its last tree
//! level and its attached engines. Other positions are reached by rotating
//! the register so the requested offset lands on that boundary, acting, and
//! rotating back.

use super::QBdt;
use crate::memo::{address, EngineMemo, PointerMemo, Split};
use crate::node::{
    graft, is_phase, node_overlap, not_separable, prune, truncate, Children, Node, NodeRef,
    OverlapMemo,
};
use crate::traversal::{descend_mut, walk, Descent, FirstError};
use ahash::AHashMap;
use num_complex::Complex64;
use qbdt_core::bits::MAX_QUBITS;
use qbdt_core::error::check_range;
use qbdt_core::{is_norm_zero, QbdtError, Result, ONE};
use qbdt_state::AttachedEngine;
use std::sync::Arc;
use tracing::debug;

/// First nonzero path `levels` levels below `node`, with the product of
/// scales along it (including `node`'s own) and the node it ends on.
fn first_nonzero_path<E>(node: &Node<E>, levels: usize) -> Option<(usize, Complex64, &Node<E>)> {
    if node.is_zero() {
        return None;
    }
    let mut node = node;
    let mut path = 0;
    let mut scale = node.scale;
    for _ in 0..levels {
        let Children::Pair(pair) = &node.children else {
            return None;
        };
        let bit = usize::from(pair[0].is_zero());
        node = &pair[bit];
        if node.is_zero() {
            return None;
        }
        path = (path << 1) | bit;
        scale *= node.scale;
    }
    Some((path, scale, node))
}

/// Canonical copy of the top `levels` levels under `node`, cut against the
/// remainder `reference`.
fn factor_of<E: AttachedEngine>(
    node: &Node<E>,
    levels: usize,
    reference: &Children<E>,
) -> Result<NodeRef<E>> {
    let mut copy = truncate(node, levels, reference, &mut AHashMap::new())?;
    prune(&mut copy, levels);
    Ok(copy)
}

impl<E: AttachedEngine> QBdt<E> {
    /// Inserts `other`'s qubits so that its qubit 0 becomes qubit `start`.
    ///
    /// # Arguments
    /// * `other` - Register to insert; it is left unchanged
    /// * `start` - Position of the inserted register, at most `qubit_count()`
    ///
    /// # Returns
    /// `start`, the index of the first inserted qubit
    ///
    /// # Example
    /// ```
    /// use qbdt_tree::QBdt;
    ///
    /// let mut state = QBdt::new(1, 1).unwrap();
    /// let front = QBdt::new(2, 0b01).unwrap();
    /// assert_eq!(state.compose(&front, 0).unwrap(), 0);
    /// assert_eq!(state.qubit_count(), 3);
    /// assert!((state.probability_all(0b011).unwrap() - 1.0).abs() < 1e-12);
    /// ```
    pub fn compose(&mut self, other: &QBdt<E>, start: usize) -> Result<usize> {
        let n = self.qubit_count();
        check_range(start, 0, n)?;
        let total = n + other.qubit_count();
        if total > MAX_QUBITS {
            return Err(QbdtError::TooManyQubits {
                num_qubits: total,
                max: MAX_QUBITS,
            });
        }

        let boundary = self.tree_qubits;
        if start != boundary && (other.attached_qubits > 0 || start > boundary) {
            if start < boundary {
                let shift = boundary - start;
                self.rol(shift, 0, n)?;
                self.compose(other, boundary)?;
                self.ror(shift, 0, total)?;
            } else {
                let shift = start - boundary;
                self.ror(shift, 0, n)?;
                self.compose(other, boundary)?;
                self.rol(shift, 0, total)?;
            }
            return Ok(start);
        }

        let errors = FirstError::default();
        let engines = EngineMemo::new();
        let inserted = &other.root;
        self.traversal
            .for_each_mut(&mut self.root, start, 0, |i, slot, levels| {
                let node = match descend_mut(slot, i, levels) {
                    Descent::Skip(skip) => return skip,
                    Descent::Reached(node) => node,
                };
                let below = std::mem::replace(&mut node.children, Children::Terminal);
                let mut grafted = AHashMap::new();
                match graft(&inserted.children, &below, &mut grafted, &engines) {
                    Ok(children) => {
                        node.children = children;
                        node.scale *= inserted.scale;
                    }
                    Err(err) => {
                        node.children = below;
                        errors.record(err);
                    }
                }
                0
            });
        errors.into_result()?;

        self.tree_qubits += other.tree_qubits;
        self.attached_qubits += other.attached_qubits;
        self.sync_fallback();
        prune(&mut self.root, start + 1);
        debug!(
            start,
            added = other.qubit_count(),
            tree = self.tree_qubits,
            attached = self.attached_qubits,
            "composed registers"
        );
        Ok(start)
    }

    /// Splits qubits `[start, start + length)` off into a new state.
    ///
    /// # Arguments
    /// * `start` - First qubit of the range
    /// * `length` - Number of qubits to split off, at least 1
    ///
    /// # Returns
    /// The extracted register. A range entangled with the remaining qubits
    /// fails with [`QbdtError::InvalidArgument`] and leaves the state as it was.
    ///
    /// # Example
    /// ```
    /// use qbdt_tree::QBdt;
    /// use qbdt_core::matrix::HADAMARD;
    ///
    /// let mut state = QBdt::new(3, 0b110).unwrap();
    /// state.mtrx(&HADAMARD, 2).unwrap();
    ///
    /// let middle = state.decompose(1, 1).unwrap();
    /// assert!((middle.prob(0).unwrap() - 1.0).abs() < 1e-12);
    /// assert_eq!(state.qubit_count(), 2);
    /// assert!((state.prob(0).unwrap() - 1.0).abs() < 1e-12);
    /// assert!((state.prob(1).unwrap() - 0.5).abs() < 1e-12);
    /// ```
    pub fn decompose(&mut self, start: usize, length: usize) -> Result<QBdt<E>> {
        let n = self.qubit_count();
        check_range(start, length, n)?;
        if length == 0 {
            return Err(QbdtError::InvalidArgument(
                "cannot decompose an empty qubit range".into(),
            ));
        }

        let extracted = if start + length <= self.tree_qubits {
            self.remove_in_tree(start, length)?
        } else if start == 0 {
            self.remove_with_tail(length)?
        } else {
            self.ror(start, 0, n)?;
            let extracted = match self.decompose(0, length) {
                Ok(extracted) => extracted,
                Err(err) => {
                    self.rol(start, 0, n)?;
                    return Err(err);
                }
            };
            self.rol(start, 0, n - length)?;
            extracted
        };
        debug!(
            start,
            length,
            remaining = self.qubit_count(),
            "decomposed register"
        );
        Ok(extracted)
    }

    /// Decomposes `[start, start + length)` and discards it.
    pub fn dispose(&mut self, start: usize, length: usize) -> Result<()> {
        self.decompose(start, length).map(|_| ())
    }

    /// Removes tree levels `[start, start + length)`.
    ///
    /// Every nonzero subtree at depth `start` holds `extracted ⊗ remainder`.
    /// The extracted factor is read off the first of them; each subtree is
    /// then replaced by its remainder, rescaled by how much of the extracted
    /// factor its first path carried.
    fn remove_in_tree(&mut self, start: usize, length: usize) -> Result<QBdt<E>> {
        let (_, _, first) = first_nonzero_path(&self.root, start).ok_or_else(not_separable)?;
        let (_, _, cut) = first_nonzero_path(first, length).ok_or_else(not_separable)?;
        let reference = cut.children.clone();

        let mut extracted_root = factor_of(first, length, &reference)?;
        if extracted_root.is_zero() {
            return Err(not_separable());
        }
        Arc::make_mut(&mut extracted_root).scale = ONE;
        let extracted = self.with_root(extracted_root, length, 0);

        let backup = Arc::clone(&self.root);
        let errors = FirstError::default();
        let factor = &extracted.root;
        self.traversal
            .for_each_mut(&mut self.root, start, 0, |i, slot, levels| {
                let node = match descend_mut(slot, i, levels) {
                    Descent::Skip(skip) => return skip,
                    Descent::Reached(node) => node,
                };
                let mut settle = || -> Result<()> {
                    let (path, carried, remainder) = first_nonzero_path(node, length)
                        .map(|(p, s, m)| (p, s, m.children.clone()))
                        .ok_or_else(not_separable)?;
                    // this prefix must hold the same factor, up to phase
                    let own = factor_of(node, length, &remainder)?;
                    let overlap = node_overlap(factor, &own, &mut OverlapMemo::new())?
                        / own.scale.norm();
                    let psi = walk(factor, path, length).scale;
                    if !is_phase(overlap) || is_norm_zero(psi) {
                        return Err(not_separable());
                    }
                    node.children = remainder;
                    node.scale = carried / psi;
                    Ok(())
                };
                if let Err(err) = settle() {
                    errors.record(err);
                }
                0
            });
        if let Err(err) = errors.into_result() {
            self.root = backup;
            return Err(err);
        }

        self.tree_qubits -= length;
        prune(&mut self.root, start + 1);
        self.renormalize_root();
        Ok(extracted)
    }

    /// Removes qubits `[0, length)` where the range reaches into the tail.
    ///
    /// The extracted state keeps every tree level plus the first
    /// `length - tree_qubits` engine qubits. This state keeps one engine
    /// holding the remaining engine qubits.
    fn remove_with_tail(&mut self, length: usize) -> Result<QBdt<E>> {
        let levels = self.tree_qubits;
        let split = length - levels;
        let remaining = self.attached_qubits - split;

        let (_, _, leaf) = first_nonzero_path(&self.root, levels).ok_or_else(not_separable)?;
        let Children::Engine(first) = &leaf.children else {
            return Err(not_separable());
        };
        let mut rest_ref = (**first).clone();
        rest_ref.decompose(0, split)?;

        let mut extracted_root = Arc::clone(&self.root);
        let errors = FirstError::default();
        let splits: PointerMemo<Split<E>> = PointerMemo::new();
        let reference = &rest_ref;
        self.traversal
            .for_each_mut(&mut extracted_root, levels, 0, |i, slot, chunk| {
                let node = match descend_mut(slot, i, chunk) {
                    Descent::Skip(skip) => return skip,
                    Descent::Reached(node) => node,
                };
                let Children::Engine(engine) = &mut node.children else {
                    return 0;
                };
                let source = Arc::clone(engine);
                let split_engine = splits.get_or_try_insert((address(&source), 0), || {
                    let mut rest = (*source).clone();
                    let part = rest.decompose(0, split)?;
                    // <part ⊗ reference | source>, whatever phase decompose picked
                    let mut product = part.clone();
                    product.compose(reference)?;
                    let overlap = product.inner_product(&source)?;
                    if !is_phase(overlap) {
                        return Err(not_separable());
                    }
                    Ok((Arc::clone(&source), Arc::new(part), overlap))
                });
                match split_engine {
                    Ok((_, part, overlap)) => {
                        *engine = part;
                        node.scale *= overlap;
                    }
                    Err(err) => errors.record(err),
                }
                0
            });
        errors.into_result()?;
        prune(&mut extracted_root, levels);
        let mut extracted = self.with_root(extracted_root, levels, split);
        extracted.renormalize_root();

        self.root = Arc::new(if remaining == 0 {
            Node::leaf(ONE)
        } else {
            Node::attached(ONE, Arc::new(rest_ref))
        });
        self.tree_qubits = 0;
        self.attached_qubits = remaining;
        self.sync_fallback();
        Ok(extracted)
    }

    /// Appends `engine`'s qubits after every current qubit, as attached qubits.
    ///
    /// # Arguments
    /// * `engine` - State of the new qubits; it is normalized before attaching
    ///
    /// # Returns
    /// The index of the first appended qubit
    ///
    /// # Example
    /// ```
    /// use qbdt_tree::{AttachedEngine, DenseEngine, QBdt};
    ///
    /// let mut state = QBdt::new(1, 1).unwrap();
    /// let engine = DenseEngine::new_permutation(2, 0b10).unwrap();
    /// assert_eq!(state.attach(engine).unwrap(), 1);
    /// assert_eq!(state.attached_qubit_count(), 2);
    /// assert!((state.probability_all(0b110).unwrap() - 1.0).abs() < 1e-12);
    /// ```
    pub fn attach(&mut self, mut engine: E) -> Result<usize> {
        let start = self.qubit_count();
        let added = engine.qubit_count();
        if start + added > MAX_QUBITS {
            return Err(QbdtError::TooManyQubits {
                num_qubits: start + added,
                max: MAX_QUBITS,
            });
        }
        engine.normalize();

        if self.attached_qubits > 0 {
            self.update_engines(|e| e.compose(&engine).map(|_| ()))?;
        } else {
            let shared = Arc::new(engine);
            self.traversal
                .for_each_mut(&mut self.root, self.tree_qubits, 0, |i, slot, levels| {
                    match descend_mut(slot, i, levels) {
                        Descent::Skip(skip) => skip,
                        Descent::Reached(node) => {
                            node.children = Children::Engine(Arc::clone(&shared));
                            0
                        }
                    }
                });
            prune(&mut self.root, self.tree_qubits);
        }
        self.attached_qubits += added;
        debug!(start, added, "attached engine");
        Ok(start)
    }
}
