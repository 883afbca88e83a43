//! Beam recycling pool.
//!
//! Beams carry large per-gate buffers, so the engine recycles them instead
//! of allocating per dwell. Steady-state operation allocates nothing: a
//! recycled beam's buffers are grown once and reused.

use std::sync::Mutex;

use log::debug;

use crate::beam::Beam;

pub struct BeamPool {
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    free: Vec<Box<Beam>>,
    outstanding: usize,
    allocated: usize,
}

impl BeamPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                free: Vec::new(),
                outstanding: 0,
                allocated: 0,
            }),
        }
    }

    /// Take a beam from the pool, allocating a fresh one if the pool is
    /// empty. The caller must hand it back through [`release`].
    ///
    /// [`release`]: BeamPool::release
    pub fn checkout(&self) -> Box<Beam> {
        let mut inner = self.lock();
        inner.outstanding += 1;
        match inner.free.pop() {
            Some(beam) => beam,
            None => {
                inner.allocated += 1;
                debug!("beam pool grew to {} beams", inner.allocated);
                Box::new(Beam::new())
            }
        }
    }

    /// Return a beam for reuse. Releasing more beams than were checked
    /// out is a caller bug and panics.
    pub fn release(&self, beam: Box<Beam>) {
        let mut inner = self.lock();
        assert!(inner.outstanding > 0, "beam released twice");
        inner.outstanding -= 1;
        inner.free.push(beam);
    }

    /// (free, outstanding, total allocated)
    pub fn stats(&self) -> (usize, usize, usize) {
        let inner = self.lock();
        (inner.free.len(), inner.outstanding, inner.allocated)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        // a poisoned lock only means another thread panicked mid-update
        // of the counters; the beam list itself is always consistent
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl Default for BeamPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_release_recycles_the_same_beam() {
        let pool = BeamPool::new();
        let mut beam = pool.checkout();
        beam.n_gates = 77;
        pool.release(beam);
        let beam = pool.checkout();
        // recycled, not reallocated
        assert_eq!(beam.n_gates, 77);
        assert_eq!(pool.stats().2, 1);
        pool.release(beam);
    }

    #[test]
    fn pool_grows_when_empty() {
        let pool = BeamPool::new();
        let b1 = pool.checkout();
        let b2 = pool.checkout();
        assert_eq!(pool.stats(), (0, 2, 2));
        pool.release(b1);
        pool.release(b2);
        assert_eq!(pool.stats(), (2, 0, 2));
    }

    #[test]
    #[should_panic(expected = "beam released twice")]
    fn double_release_panics() {
        let pool = BeamPool::new();
        pool.release(Box::new(Beam::new()));
    }
}
