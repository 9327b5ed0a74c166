//! Pointer-keyed memo tables shared by traversal workers
//!
//! Leaves that share one engine must see one result when the same operation
//! is applied to each of them. Tables key on `Arc` addresses and keep the
//! input `Arc`s alive, so an address cannot be reused while a table holds it.

use ahash::AHashMap;
use num_complex::Complex64;
use parking_lot::Mutex;
use qbdt_core::Result;
use qbdt_state::AttachedEngine;
use std::sync::Arc;

#[inline]
pub(crate) fn address<T>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value) as usize
}

pub(crate) struct PointerMemo<V> {
    map: Mutex<AHashMap<(usize, usize), V>>,
}

impl<V: Clone> PointerMemo<V> {
    pub(crate) fn new() -> Self {
        Self {
            map: Mutex::new(AHashMap::new()),
        }
    }

    /// Returns the value stored under `key`, computing it on a miss.
    ///
    /// Two workers missing on the same key may both compute; the first insert wins.
    pub(crate) fn get_or_try_insert(
        &self,
        key: (usize, usize),
        compute: impl FnOnce() -> Result<V>,
    ) -> Result<V> {
        if let Some(hit) = self.map.lock().get(&key) {
            return Ok(hit.clone());
        }
        let value = compute()?;
        Ok(self.map.lock().entry(key).or_insert(value).clone())
    }
}

/// Inputs kept alive next to a memoized output.
type Pinned<E> = ([Arc<E>; 2], Arc<E>);

pub(crate) struct EngineMemo<E> {
    results: PointerMemo<Pinned<E>>,
}

impl<E: AttachedEngine> EngineMemo<E> {
    pub(crate) fn new() -> Self {
        Self {
            results: PointerMemo::new(),
        }
    }

    /// Applies `op` to the engine in `slot`, copying it first when shared.
    ///
    /// Every slot that held the same shared engine ends up pointing at one
    /// updated copy.
    pub(crate) fn update(
        &self,
        slot: &mut Arc<E>,
        op: impl FnOnce(&mut E) -> Result<()>,
    ) -> Result<()> {
        if let Some(engine) = Arc::get_mut(slot) {
            return op(engine);
        }
        let input = Arc::clone(slot);
        let (_, output) = self.results.get_or_try_insert((address(slot), 0), || {
            let mut fresh = (*input).clone();
            op(&mut fresh)?;
            Ok(([Arc::clone(&input), Arc::clone(&input)], Arc::new(fresh)))
        })?;
        *slot = output;
        Ok(())
    }

    /// `high ⊗ low`, with `high`'s qubits first.
    pub(crate) fn product(&self, high: &Arc<E>, low: &Arc<E>) -> Result<Arc<E>> {
        let (_, output) = self
            .results
            .get_or_try_insert((address(high), address(low)), || {
                let mut joined = (**high).clone();
                joined.compose(low)?;
                Ok(([Arc::clone(high), Arc::clone(low)], Arc::new(joined)))
            })?;
        Ok(output)
    }
}

/// An engine split into an extracted part and the phase of its remainder
/// relative to a reference remainder.
pub(crate) type Split<E> = (Arc<E>, Arc<E>, Complex64);
