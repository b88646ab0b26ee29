use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const EMPTY: u64 = 0;

/// Identity of one admitted frame.
///
/// The value is the admission time in nanoseconds since the slot was
/// created, bumped when needed so every ticket is unique and non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    fn admitted_after_epoch(self) -> Duration {
        Duration::from_nanos(self.0)
    }
}

/// The single in-flight slot.
///
/// All transitions are compare-and-swap on one word, so an admission and a
/// clear can never interleave into two frames in flight.
#[derive(Debug)]
pub struct InFlight {
    epoch: Instant,
    slot: AtomicU64,
    last_ticket: AtomicU64,
}

impl Default for InFlight {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlight {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            slot: AtomicU64::new(EMPTY),
            last_ticket: AtomicU64::new(EMPTY),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.slot.load(Ordering::Acquire) == EMPTY
    }

    pub fn current(&self) -> Option<Ticket> {
        match self.slot.load(Ordering::Acquire) {
            EMPTY => None,
            raw => Some(Ticket(raw)),
        }
    }

    /// Claim the slot if it is empty.
    pub fn try_admit(&self) -> Option<Ticket> {
        if !self.is_idle() {
            return None;
        }
        let ticket = self.next_ticket();
        self.slot
            .compare_exchange(EMPTY, ticket.0, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ticket)
    }

    /// Release the slot if `ticket` still owns it. Returns whether it did.
    pub fn clear(&self, ticket: Ticket) -> bool {
        self.slot
            .compare_exchange(ticket.0, EMPTY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Time the current occupant has been in flight.
    pub fn age(&self, ticket: Ticket) -> Duration {
        self.epoch
            .elapsed()
            .saturating_sub(ticket.admitted_after_epoch())
    }

    /// Clear the slot if its occupant is older than `timeout`.
    pub fn expire(&self, timeout: Duration) -> Option<Ticket> {
        let ticket = self.current()?;
        if self.age(ticket) <= timeout {
            return None;
        }
        self.clear(ticket).then_some(ticket)
    }

    fn next_ticket(&self) -> Ticket {
        let now = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX - 1);
        let mut prev = self.last_ticket.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self.last_ticket.compare_exchange_weak(
                prev,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ticket(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use super::*;

    #[test]
    fn admits_once_until_cleared() {
        let state = InFlight::new();
        let first = state.try_admit().unwrap();
        assert!(state.try_admit().is_none());
        assert_eq!(state.current(), Some(first));

        assert!(state.clear(first));
        assert!(state.is_idle());
        let second = state.try_admit().unwrap();
        assert!(second > first);
    }

    #[test]
    fn stale_ticket_cannot_clear_new_occupant() {
        let state = InFlight::new();
        let first = state.try_admit().unwrap();
        assert!(state.clear(first));
        let second = state.try_admit().unwrap();

        assert!(!state.clear(first));
        assert_eq!(state.current(), Some(second));
    }

    #[test]
    fn expire_only_clears_old_occupants() {
        let state = InFlight::new();
        let ticket = state.try_admit().unwrap();
        assert_eq!(state.expire(Duration::from_secs(60)), None);

        thread::sleep(Duration::from_millis(5));
        assert_eq!(state.expire(Duration::from_millis(1)), Some(ticket));
        assert!(state.is_idle());
    }

    #[test]
    fn concurrent_admission_has_one_winner() {
        let state = Arc::new(InFlight::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = state.clone();
                let winners = winners.clone();
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        if state.try_admit().is_some() {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
