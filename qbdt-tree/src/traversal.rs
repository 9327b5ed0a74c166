//! Skip-ahead traversal over the basis index space
//!
//! A traversal visits indices `[0, 2^bits)` in order. The visitor returns how
//! many of the following indices are provably no-ops (below a zero subtree,
//! or failing a control mask) and the driver jumps over them.
//!
//! Wide traversals are split into aligned chunks that run on the rayon pool.
//! Read-only traversals share `&Node` between workers. Mutating traversals
//! first privatize every node above the chunk depth on the calling thread,
//! which leaves each chunk an exclusive `&mut` subtree; the rayon join is the
//! only synchronization point.

use crate::config::QBdtConfig;
use crate::node::{Children, Node, NodeRef};
use num_complex::Complex64;
use parking_lot::Mutex;
use qbdt_core::bits::{bit_is_set, block_skip, pow2};
use qbdt_core::{is_norm_zero, QbdtError, Result, ZERO};
use qbdt_state::AttachedEngine;
use rayon::prelude::*;
use std::sync::Arc;

/// Chunking policy for traversals.
#[derive(Debug, Clone)]
pub(crate) struct SkipAhead {
    parallel_threshold: usize,
    chunks: usize,
}

impl SkipAhead {
    pub(crate) fn new(config: &QBdtConfig) -> Self {
        Self {
            parallel_threshold: config.parallel_threshold,
            chunks: rayon::current_num_threads() * config.chunks_per_thread.max(1),
        }
    }

    /// Low index bits covered by one chunk of a `bits`-wide traversal.
    fn chunk_bits(&self, bits: usize) -> usize {
        if bits < self.parallel_threshold || self.chunks <= 1 {
            return bits;
        }
        let split = self.chunks.next_power_of_two().trailing_zeros() as usize;
        bits - split.min(bits)
    }

    /// Folds `visit` over `[0, 2^bits)`.
    ///
    /// Each chunk starts from a clone of `identity`; chunk results are
    /// combined with `reduce` in no particular order.
    pub(crate) fn fold<T, V, R>(&self, bits: usize, identity: T, visit: V, reduce: R) -> T
    where
        T: Clone + Send + Sync,
        V: Fn(usize, &mut T) -> usize + Sync,
        R: Fn(T, T) -> T + Sync + Send,
    {
        let chunk = self.chunk_bits(bits);
        let run = |c: usize| {
            let mut acc = identity.clone();
            let start = c << chunk;
            walk_range(start, start + pow2(chunk), |i| visit(i, &mut acc));
            acc
        };
        let chunks = pow2(bits - chunk);
        if chunks == 1 {
            run(0)
        } else {
            (0..chunks)
                .into_par_iter()
                .map(run)
                .reduce(|| identity.clone(), &reduce)
        }
    }

    /// Visits `[0, 2^bits)`, handing each index the stride of `out` it owns.
    pub(crate) fn fill<T, V>(&self, bits: usize, out: &mut [T], visit: V)
    where
        T: Send,
        V: Fn(usize, &mut [T]) -> usize + Sync,
    {
        let stride = out.len() >> bits;
        let chunk = self.chunk_bits(bits);
        let run = |(c, part): (usize, &mut [T])| {
            let start = c << chunk;
            walk_range(start, start + pow2(chunk), |i| {
                let offset = (i - start) * stride;
                visit(i, &mut part[offset..offset + stride])
            });
        };
        let piece = stride << chunk;
        if piece == out.len() {
            run((0, out));
        } else {
            out.par_chunks_mut(piece).enumerate().for_each(run);
        }
    }

    /// Visits `[0, 2^bits)` with exclusive access to the tree.
    ///
    /// `visit(i, slot, levels)` receives the node at the chunk depth above
    /// `i`; the low `levels` bits of `i` select the path below it (see
    /// [`descend_mut`]). Indices whose chunk prefix misses a bit of
    /// `required` are never visited.
    pub(crate) fn for_each_mut<E, V>(
        &self,
        root: &mut NodeRef<E>,
        bits: usize,
        required: usize,
        visit: V,
    ) where
        E: AttachedEngine,
        V: Fn(usize, &mut NodeRef<E>, usize) -> usize + Sync + Send,
    {
        let chunk = self.chunk_bits(bits);
        let mut frontier = Vec::new();
        collect_frontier(root, bits - chunk, 0, required >> chunk, &mut frontier);

        let run = |(prefix, slot): (usize, &mut NodeRef<E>)| {
            let start = prefix << chunk;
            walk_range(start, start + pow2(chunk), |i| visit(i, slot, chunk));
        };
        if frontier.len() <= 1 {
            frontier.into_iter().for_each(run);
        } else {
            frontier.into_par_iter().for_each(run);
        }
    }
}

/// Runs `visit` over `[start, end)`, advancing by `1 + skip` after each call.
pub(crate) fn walk_range(start: usize, end: usize, mut visit: impl FnMut(usize) -> usize) {
    let mut i = start;
    while i < end {
        let skip = visit(i);
        i = i.saturating_add(skip).saturating_add(1);
    }
}

/// Privatizes the nonzero nodes `levels` levels below `slot` and collects
/// them with their index prefixes.
fn collect_frontier<'a, E: AttachedEngine>(
    slot: &'a mut NodeRef<E>,
    levels: usize,
    prefix: usize,
    required: usize,
    out: &mut Vec<(usize, &'a mut NodeRef<E>)>,
) {
    if slot.is_zero() {
        return;
    }
    if levels == 0 {
        out.push((prefix, slot));
        return;
    }
    let node = Arc::make_mut(slot);
    if let Children::Pair([c0, c1]) = &mut node.children {
        if !bit_is_set(required, levels - 1) {
            collect_frontier(c0, levels - 1, prefix << 1, required, out);
        }
        collect_frontier(c1, levels - 1, (prefix << 1) | 1, required, out);
    }
}

/// Result of walking down from a node.
pub(crate) enum Descent<T> {
    Reached(T),
    /// The path hit a zero subtree; this many following indices share it.
    Skip(usize),
}

/// Walks `levels` levels below `slot` along the low bits of `i` (highest
/// first), privatizing every node on the way.
pub(crate) fn descend_mut<E: AttachedEngine>(
    slot: &mut NodeRef<E>,
    i: usize,
    levels: usize,
) -> Descent<&mut Node<E>> {
    if slot.is_zero() {
        return Descent::Skip(block_skip(i, levels));
    }
    let node = Arc::make_mut(slot);
    if levels == 0 {
        return Descent::Reached(node);
    }
    match &mut node.children {
        Children::Pair(pair) => {
            let bit = usize::from(bit_is_set(i, levels - 1));
            descend_mut(&mut pair[bit], i, levels - 1)
        }
        _ => Descent::Skip(block_skip(i, levels)),
    }
}

/// Read-only walk to a fixed depth.
pub(crate) struct Walk<'a, E> {
    pub(crate) node: &'a Node<E>,
    /// Product of scales from the root to `node`, or zero
    pub(crate) scale: Complex64,
    /// Levels descended before stopping
    pub(crate) depth: usize,
}

impl<E> Walk<'_, E> {
    #[inline]
    pub(crate) fn is_zero(&self) -> bool {
        is_norm_zero(self.scale)
    }

    /// Following indices that share this walk's zero prefix.
    #[inline]
    pub(crate) fn skip(&self, i: usize, levels: usize) -> usize {
        block_skip(i, levels - self.depth)
    }
}

/// Walks `levels` levels below `root` along the low bits of `i`, stopping
/// early once the running product is zero.
pub(crate) fn walk<E>(root: &Node<E>, i: usize, levels: usize) -> Walk<'_, E> {
    let mut node = root;
    let mut scale = root.scale;
    for depth in 0..levels {
        if is_norm_zero(scale) {
            return Walk {
                node,
                scale: ZERO,
                depth,
            };
        }
        match &node.children {
            Children::Pair(pair) => {
                node = &pair[usize::from(bit_is_set(i, levels - 1 - depth))];
                scale *= node.scale;
            }
            _ => {
                return Walk {
                    node,
                    scale: ZERO,
                    depth,
                }
            }
        }
    }
    if is_norm_zero(scale) {
        scale = ZERO;
    }
    Walk {
        node,
        scale,
        depth: levels,
    }
}

/// First error reported by any worker of a traversal.
#[derive(Default)]
pub(crate) struct FirstError(Mutex<Option<QbdtError>>);

impl FirstError {
    pub(crate) fn record(&self, err: QbdtError) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub(crate) fn into_result(self) -> Result<()> {
        match self.0.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
