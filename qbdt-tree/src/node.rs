//! Tree nodes and their canonical form
//!
//! A node carries the scale of the edge entering it and either two child
//! references, an attached engine, or nothing. The amplitude of a basis index
//! is the product of the scales along its path, times the engine amplitude
//! for the tail bits when the path ends in an attached leaf.
//!
//! Children are `Arc`-shared. A node reached through a shared reference is
//! never mutated in place: writers go through `Arc::make_mut`, which copies
//! the node when anyone else still holds it.
//!
//! # Canonical form
//!
//! Below every nonzero node with two children:
//!
//! - `|s0|² + |s1|² = 1`, and the first nonzero child scale is real and positive
//! - zero children are the terminal zero placeholder
//! - siblings with equal subtrees share one `Arc`; siblings equal up to scale
//!   share their children
//!
//! The magnitude of the whole state therefore sits in the root scale.

use crate::memo::{address, EngineMemo};
use ahash::AHashMap;
use num_complex::Complex64;
use qbdt_core::matrix::{self, classify, MatrixKind};
use qbdt_core::{approx_eq, is_norm_zero, Matrix2, QbdtError, Result, ONE, ZERO};
use qbdt_state::AttachedEngine;
use rayon::join;
use std::fmt;
use std::sync::Arc;

pub(crate) type NodeRef<E> = Arc<Node<E>>;

#[derive(Clone)]
pub(crate) enum Children<E> {
    /// Deepest tree level without a tail, or a zero subtree
    Terminal,
    Pair([NodeRef<E>; 2]),
    /// Attached leaf; the engine covers the tail qubits
    Engine(Arc<E>),
}

#[derive(Clone)]
pub(crate) struct Node<E> {
    pub(crate) scale: Complex64,
    pub(crate) children: Children<E>,
}

impl<E> fmt::Debug for Node<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let children = match &self.children {
            Children::Terminal => "terminal",
            Children::Pair(_) => "pair",
            Children::Engine(_) => "engine",
        };
        f.debug_struct("Node")
            .field("scale", &self.scale)
            .field("children", &children)
            .finish()
    }
}

impl<E> Node<E> {
    pub(crate) fn zero() -> Self {
        Self {
            scale: ZERO,
            children: Children::Terminal,
        }
    }

    pub(crate) fn leaf(scale: Complex64) -> Self {
        Self::with_children(scale, Children::Terminal)
    }

    pub(crate) fn attached(scale: Complex64, engine: Arc<E>) -> Self {
        Self::with_children(scale, Children::Engine(engine))
    }

    pub(crate) fn branch(scale: Complex64, pair: [NodeRef<E>; 2]) -> Self {
        Self::with_children(scale, Children::Pair(pair))
    }

    /// Node with `children`, or the zero placeholder when `scale` is zero.
    pub(crate) fn with_children(scale: Complex64, children: Children<E>) -> Self {
        if is_norm_zero(scale) {
            Self::zero()
        } else {
            Self { scale, children }
        }
    }

    #[inline]
    pub(crate) fn is_zero(&self) -> bool {
        is_norm_zero(self.scale)
    }

    pub(crate) fn set_zero(&mut self) {
        self.scale = ZERO;
        self.children = Children::Terminal;
    }

    fn is_canonical_zero(&self) -> bool {
        self.scale == ZERO && matches!(self.children, Children::Terminal)
    }
}

pub(crate) fn zero_ref<E>() -> NodeRef<E> {
    Arc::new(Node::zero())
}

/// Whether two child sets are the same objects.
fn children_ptr_eq<E>(a: &Children<E>, b: &Children<E>) -> bool {
    match (a, b) {
        (Children::Terminal, Children::Terminal) => true,
        (Children::Engine(x), Children::Engine(y)) => Arc::ptr_eq(x, y),
        (Children::Pair([a0, a1]), Children::Pair([b0, b1])) => {
            Arc::ptr_eq(a0, b0) && Arc::ptr_eq(a1, b1)
        }
        _ => false,
    }
}

type EqMemo = AHashMap<(usize, usize), bool>;

/// Whether two child sets represent the same vector.
///
/// Engines compare by identity only.
fn children_equal<E>(a: &Children<E>, b: &Children<E>, memo: &mut EqMemo) -> bool {
    match (a, b) {
        (Children::Terminal, Children::Terminal) => true,
        (Children::Engine(x), Children::Engine(y)) => Arc::ptr_eq(x, y),
        (Children::Pair([a0, a1]), Children::Pair([b0, b1])) => {
            nodes_equal(a0, b0, memo) && nodes_equal(a1, b1, memo)
        }
        _ => false,
    }
}

fn nodes_equal<E>(a: &NodeRef<E>, b: &NodeRef<E>, memo: &mut EqMemo) -> bool {
    if Arc::ptr_eq(a, b) {
        return true;
    }
    match (a.is_zero(), b.is_zero()) {
        (true, true) => return true,
        (false, false) => {}
        _ => return false,
    }
    if !approx_eq(a.scale, b.scale) {
        return false;
    }
    let key = (address(a), address(b));
    if let Some(&known) = memo.get(&key) {
        return known;
    }
    let equal = children_equal(&a.children, &b.children, memo);
    memo.insert(key, equal);
    equal
}

fn rescale<E: AttachedEngine>(slot: &mut NodeRef<E>, factor: Complex64) {
    if !slot.is_zero() {
        Arc::make_mut(slot).scale *= factor;
    }
}

impl<E: AttachedEngine> Node<E> {
    /// Restores canonical form one level below this node.
    ///
    /// Assumes the children are already canonical below themselves.
    pub(crate) fn canonicalize(&mut self) {
        if self.is_zero() {
            self.set_zero();
            return;
        }
        let Children::Pair([c0, c1]) = &mut self.children else {
            return;
        };
        let (z0, z1) = (c0.is_zero(), c1.is_zero());
        if z0 && z1 {
            self.set_zero();
            return;
        }

        let s0 = if z0 { ZERO } else { c0.scale };
        let s1 = if z1 { ZERO } else { c1.scale };
        let norm = (s0.norm_sqr() + s1.norm_sqr()).sqrt();
        let lead = if z0 { s1 } else { s0 };
        let factor = lead / lead.norm() * norm;
        if !approx_eq(factor, ONE) {
            if !z0 {
                Arc::make_mut(c0).scale /= factor;
            }
            if !z1 {
                Arc::make_mut(c1).scale /= factor;
            }
            self.scale *= factor;
        }

        if z0 && !c0.is_canonical_zero() {
            *c0 = zero_ref();
        }
        if z1 && !c1.is_canonical_zero() {
            *c1 = zero_ref();
        }

        if !z0 && !z1 && !Arc::ptr_eq(c0, c1) {
            let mut memo = EqMemo::new();
            if children_equal(&c0.children, &c1.children, &mut memo) {
                if approx_eq(c0.scale, c1.scale) {
                    *c1 = Arc::clone(c0);
                } else if !children_ptr_eq(&c0.children, &c1.children) {
                    let shared = c0.children.clone();
                    Arc::make_mut(c1).children = shared;
                }
            }
        }
    }

    /// Applies `m` to the two children of this node, i.e. to the qubit one
    /// level below it.
    pub(crate) fn apply_matrix(&mut self, m: &Matrix2) -> Result<()> {
        let Children::Pair([c0, c1]) = &mut self.children else {
            return Ok(());
        };
        match classify(m) {
            MatrixKind::Diagonal => {
                rescale(c0, m[0][0]);
                rescale(c1, m[1][1]);
            }
            MatrixKind::AntiDiagonal => {
                std::mem::swap(c0, c1);
                rescale(c0, m[0][1]);
                rescale(c1, m[1][0]);
            }
            MatrixKind::General => apply_pair(c0, c1, m)?,
        }
        Ok(())
    }
}

/// Mixes the subtrees in `c0` and `c1` by `m`.
///
/// When both sides hang off the same children only their scales mix.
/// Otherwise the scales are pushed one level down and the mix recurses,
/// ending at terminal leaves or by combining two engines amplitude-wise.
fn apply_pair<E: AttachedEngine>(
    c0: &mut NodeRef<E>,
    c1: &mut NodeRef<E>,
    m: &Matrix2,
) -> Result<()> {
    let (z0, z1) = (c0.is_zero(), c1.is_zero());
    if z0 && z1 {
        return Ok(());
    }
    if z0 || z1 || children_ptr_eq(&c0.children, &c1.children) {
        let s0 = if z0 { ZERO } else { c0.scale };
        let s1 = if z1 { ZERO } else { c1.scale };
        let (n0, n1) = matrix::apply(m, s0, s1);
        let shared = if z0 {
            c1.children.clone()
        } else {
            c0.children.clone()
        };
        *c0 = Arc::new(Node::with_children(n0, shared.clone()));
        *c1 = Arc::new(Node::with_children(n1, shared));
        return Ok(());
    }
    push_down(c0, c1, m)
}

fn push_down<E: AttachedEngine>(
    c0: &mut NodeRef<E>,
    c1: &mut NodeRef<E>,
    m: &Matrix2,
) -> Result<()> {
    let n0 = Arc::make_mut(c0);
    let n1 = Arc::make_mut(c1);
    let (s0, s1) = (n0.scale, n1.scale);

    match (&mut n0.children, &mut n1.children) {
        (Children::Pair(p0), Children::Pair(p1)) => {
            n0.scale = ONE;
            n1.scale = ONE;
            p0.iter_mut().for_each(|slot| rescale(slot, s0));
            p1.iter_mut().for_each(|slot| rescale(slot, s1));
            let [a0, a1] = p0;
            let [b0, b1] = p1;
            apply_pair(a0, b0, m)?;
            apply_pair(a1, b1, m)?;
        }
        (Children::Engine(e0), Children::Engine(e1)) => {
            let qubits = e0.qubit_count();
            let (x, y) = (e0.amplitudes(), e1.amplitudes());
            let mixed = |w0: Complex64, w1: Complex64| -> Vec<Complex64> {
                x.iter().zip(&y).map(|(a, b)| w0 * a + w1 * b).collect()
            };
            let v0 = mixed(m[0][0] * s0, m[0][1] * s1);
            let v1 = mixed(m[1][0] * s0, m[1][1] * s1);
            n0.scale = settle_engine(e0, qubits, &v0)?;
            n1.scale = settle_engine(e1, qubits, &v1)?;
        }
        _ => {}
    }

    n0.canonicalize();
    n1.canonicalize();
    Ok(())
}

/// Stores `amplitudes` normalized in `slot` and returns their norm as a scale.
fn settle_engine<E: AttachedEngine>(
    slot: &mut Arc<E>,
    qubits: usize,
    amplitudes: &[Complex64],
) -> Result<Complex64> {
    let norm = amplitudes.iter().map(|a| a.norm_sqr()).sum::<f64>().sqrt();
    if is_norm_zero(Complex64::new(norm, 0.0)) {
        return Ok(ZERO);
    }
    let mut engine = E::from_amplitudes(qubits, amplitudes)?;
    engine.scale_amplitudes(Complex64::new(1.0 / norm, 0.0));
    *slot = Arc::new(engine);
    Ok(Complex64::new(norm, 0.0))
}

/// Canonicalizes every uniquely held node above depth `depth` under `slot`.
///
/// Shared nodes are skipped: nothing mutates a node without privatizing it
/// first, so a node that is still shared has not changed since it was last
/// canonical.
pub(crate) fn prune<E: AttachedEngine>(slot: &mut NodeRef<E>, depth: usize) {
    if depth == 0 {
        return;
    }
    let Some(node) = Arc::get_mut(slot) else {
        return;
    };
    if let Children::Pair([c0, c1]) = &mut node.children {
        prune(c0, depth - 1);
        prune(c1, depth - 1);
    }
    node.canonicalize();
}

/// Builds the tree for a dense vector whose last `tail` qubits go to engines.
///
/// The result still needs [`prune`] to reach canonical form.
pub(crate) fn build<E: AttachedEngine>(
    amplitudes: &[Complex64],
    levels: usize,
    tail: usize,
    parallel_levels: usize,
) -> Result<NodeRef<E>> {
    if levels == 0 {
        if tail == 0 {
            return Ok(Arc::new(Node::leaf(amplitudes[0])));
        }
        let norm = amplitudes.iter().map(|a| a.norm_sqr()).sum::<f64>().sqrt();
        if is_norm_zero(Complex64::new(norm, 0.0)) {
            return Ok(zero_ref());
        }
        let mut engine = E::from_amplitudes(tail, amplitudes)?;
        engine.normalize();
        return Ok(Arc::new(Node::attached(
            Complex64::new(norm, 0.0),
            Arc::new(engine),
        )));
    }
    let (low, high) = amplitudes.split_at(amplitudes.len() / 2);
    let (c0, c1) = if levels >= parallel_levels {
        join(
            || build(low, levels - 1, tail, parallel_levels),
            || build(high, levels - 1, tail, parallel_levels),
        )
    } else {
        (
            build(low, levels - 1, tail, parallel_levels),
            build(high, levels - 1, tail, parallel_levels),
        )
    };
    Ok(Arc::new(Node::branch(ONE, [c0?, c1?])))
}

/// Copy of `source`'s levels whose leaves continue into `tail`.
///
/// Terminal leaves of `source` take `tail` as their children. Attached leaves
/// of `source` keep their engine, tensored with `tail`'s engine when `tail`
/// is attached itself.
pub(crate) fn graft<E: AttachedEngine>(
    source: &Children<E>,
    tail: &Children<E>,
    grafted: &mut AHashMap<usize, NodeRef<E>>,
    engines: &EngineMemo<E>,
) -> Result<Children<E>> {
    Ok(match source {
        Children::Terminal => tail.clone(),
        Children::Engine(engine) => match tail {
            Children::Engine(below) => Children::Engine(engines.product(engine, below)?),
            _ => Children::Engine(Arc::clone(engine)),
        },
        Children::Pair([b0, b1]) => Children::Pair([
            graft_node(b0, tail, grafted, engines)?,
            graft_node(b1, tail, grafted, engines)?,
        ]),
    })
}

fn graft_node<E: AttachedEngine>(
    node: &NodeRef<E>,
    tail: &Children<E>,
    grafted: &mut AHashMap<usize, NodeRef<E>>,
    engines: &EngineMemo<E>,
) -> Result<NodeRef<E>> {
    if node.is_zero() {
        return Ok(Arc::clone(node));
    }
    if let Some(done) = grafted.get(&address(node)) {
        return Ok(Arc::clone(done));
    }
    let copy = Arc::new(Node {
        scale: node.scale,
        children: graft(&node.children, tail, grafted, engines)?,
    });
    grafted.insert(address(node), Arc::clone(&copy));
    Ok(copy)
}

/// Largest deviation of `|<reference|remainder>|` from 1 accepted as a
/// product state.
const SEPARABILITY_EPSILON: f64 = 1e-8;

pub(crate) fn not_separable() -> QbdtError {
    QbdtError::InvalidArgument("qubit range is not separable from the rest of the state".into())
}

pub(crate) type OverlapMemo = AHashMap<(usize, usize), Complex64>;

/// `<a|b>` for the unit vectors hanging below two nodes.
///
/// Canonical children have unit norm, so for a product state the overlap of
/// two remainders is a pure phase.
pub(crate) fn children_overlap<E: AttachedEngine>(
    a: &Children<E>,
    b: &Children<E>,
    memo: &mut OverlapMemo,
) -> Result<Complex64> {
    Ok(match (a, b) {
        (Children::Terminal, Children::Terminal) => ONE,
        (Children::Engine(x), Children::Engine(y)) => {
            if Arc::ptr_eq(x, y) {
                ONE
            } else {
                x.inner_product(y)?
            }
        }
        (Children::Pair(pa), Children::Pair(pb)) => {
            let mut sum = ZERO;
            for (x, y) in pa.iter().zip(pb) {
                sum += node_overlap(x, y, memo)?;
            }
            sum
        }
        _ => ZERO,
    })
}

/// `<a|b>` for two subtrees, scales included.
pub(crate) fn node_overlap<E: AttachedEngine>(
    a: &NodeRef<E>,
    b: &NodeRef<E>,
    memo: &mut OverlapMemo,
) -> Result<Complex64> {
    if a.is_zero() || b.is_zero() {
        return Ok(ZERO);
    }
    let key = (address(a), address(b));
    if let Some(&known) = memo.get(&key) {
        return Ok(known);
    }
    let inner = if Arc::ptr_eq(a, b) {
        Complex64::new(a.scale.norm_sqr(), 0.0)
    } else {
        a.scale.conj() * b.scale * children_overlap(&a.children, &b.children, memo)?
    };
    memo.insert(key, inner);
    Ok(inner)
}

/// Copy of the top `levels` levels under `node`, ending in terminal leaves.
///
/// Each cut leaf takes its scale times the overlap of its remainder with
/// `reference`, so phases held below the cut (inside attached engines or
/// deeper scales) stay in the copy. A remainder that is not a phase multiple
/// of `reference` means the cut is entangled and fails.
pub(crate) fn truncate<E: AttachedEngine>(
    node: &Node<E>,
    levels: usize,
    reference: &Children<E>,
    memo: &mut AHashMap<(usize, usize), NodeRef<E>>,
) -> Result<NodeRef<E>> {
    if node.is_zero() {
        return Ok(zero_ref());
    }
    let key = (node as *const Node<E> as usize, levels);
    if let Some(done) = memo.get(&key) {
        return Ok(Arc::clone(done));
    }
    let copy = match (&node.children, levels) {
        (children, 0) => {
            let overlap = children_overlap(reference, children, &mut OverlapMemo::new())?;
            if !is_phase(overlap) {
                return Err(not_separable());
            }
            Node::leaf(node.scale * overlap)
        }
        (Children::Pair([c0, c1]), _) => Node::branch(
            node.scale,
            [
                truncate(c0, levels - 1, reference, memo)?,
                truncate(c1, levels - 1, reference, memo)?,
            ],
        ),
        _ => return Err(not_separable()),
    };
    let copy = Arc::new(copy);
    memo.insert(key, Arc::clone(&copy));
    Ok(copy)
}

/// Whether `overlap` of two unit vectors says they differ only by a phase.
pub(crate) fn is_phase(overlap: Complex64) -> bool {
    (overlap.norm() - 1.0).abs() <= SEPARABILITY_EPSILON
}
