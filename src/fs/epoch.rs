//! Per-volume epoch clock
//!
//! The epoch counts generations of mutation. Mutations stamp their clocks
//! with the current epoch and mark it dirty; a sync seals a dirty epoch by
//! advancing it once, so everything stamped before the seal is ordered
//! before everything stamped after it.

use crate::clock::Epoch;
use crate::error::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug)]
struct EpochState {
    ticks: Epoch,
    /// Mutations happened since the last seal
    dirty: bool,
}

/// Cached epoch and dirty flag of an open volume
#[derive(Debug)]
pub struct EpochClock {
    state: Mutex<EpochState>,
}

impl EpochClock {
    /// Start from the persisted tick.
    ///
    /// The clock starts dirty: the previous process may have mutated the
    /// volume without sealing.
    pub fn new(ticks: Epoch) -> Self {
        EpochClock {
            state: Mutex::new(EpochState { ticks, dirty: true }),
        }
    }

    /// Mark the epoch dirty and return the tick to stamp a mutation with
    pub fn mark_dirty(&self) -> Epoch {
        let mut state = self.state.lock();
        state.dirty = true;
        state.ticks
    }

    /// Take the epoch lock
    pub fn lock(&self) -> EpochGuard<'_> {
        EpochGuard {
            state: self.state.lock(),
        }
    }

    pub fn ticks(&self) -> Epoch {
        self.state.lock().ticks
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }
}

/// Exclusive access to an [`EpochClock`]; released on drop
pub struct EpochGuard<'a> {
    state: MutexGuard<'a, EpochState>,
}

impl EpochGuard<'_> {
    /// Seal the current epoch.
    ///
    /// A clean epoch is returned as is. A dirty one is advanced through
    /// `advance`, which must persist and return the next tick; on error
    /// the cached tick and dirty flag are left untouched.
    pub fn seal<F>(&mut self, advance: F) -> Result<Epoch>
    where
        F: FnOnce() -> Result<Epoch>,
    {
        if !self.state.dirty {
            return Ok(self.state.ticks);
        }
        let next = advance()?;
        if next <= self.state.ticks {
            return Err(Error::CorruptRecord(format!(
                "epoch went from {} to {}",
                self.state.ticks, next
            )));
        }
        self.state.ticks = next;
        self.state.dirty = false;
        debug!("Sealed epoch {}", next);
        Ok(next)
    }

    pub fn ticks(&self) -> Epoch {
        self.state.ticks
    }

    pub fn is_dirty(&self) -> bool {
        self.state.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::Cell;

    #[test]
    fn test_starts_dirty() {
        let clock = EpochClock::new(5);
        assert!(clock.is_dirty());
        assert_eq!(clock.ticks(), 5);
    }

    #[test]
    fn test_seal_clean_skips_advance() {
        let clock = EpochClock::new(5);
        let calls = Cell::new(0);
        let advance = || {
            calls.set(calls.get() + 1);
            Ok(6)
        };
        assert_eq!(clock.lock().seal(advance).unwrap(), 6);
        assert!(!clock.is_dirty());

        let sealed = clock
            .lock()
            .seal(|| -> Result<Epoch> { panic!("clean epoch must not advance") })
            .unwrap();
        assert_eq!(sealed, 6);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_mark_dirty_returns_current_tick() {
        let clock = EpochClock::new(3);
        clock.lock().seal(|| Ok(4)).unwrap();
        assert_eq!(clock.mark_dirty(), 4);
        assert!(clock.is_dirty());
        assert_eq!(clock.ticks(), 4);
    }

    #[test]
    fn test_failed_seal_keeps_state() {
        let clock = EpochClock::new(3);
        let result = clock
            .lock()
            .seal(|| Err(Error::Transport("disk gone".to_string())));
        assert!(result.is_err());
        assert!(clock.is_dirty());
        assert_eq!(clock.ticks(), 3);
    }

    #[test]
    fn test_seal_rejects_non_increasing_tick() {
        let clock = EpochClock::new(3);
        assert!(clock.lock().seal(|| Ok(3)).is_err());
        assert!(clock.is_dirty());
    }

    proptest! {
        #[test]
        fn test_sealed_ticks_strictly_increase(
            marks in proptest::collection::vec(any::<bool>(), 1..64)
        ) {
            let clock = EpochClock::new(0);
            let mut persisted = 0u64;
            let mut last = None;
            for dirty in marks {
                if dirty {
                    clock.mark_dirty();
                }
                let was_dirty = clock.is_dirty();
                let sealed = clock.lock().seal(|| {
                    persisted += 1;
                    Ok(persisted)
                }).unwrap();
                if let Some(prev) = last {
                    if was_dirty {
                        prop_assert!(sealed > prev);
                    } else {
                        prop_assert_eq!(sealed, prev);
                    }
                }
                last = Some(sealed);
            }
        }
    }
}
