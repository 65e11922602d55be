//! Bounded, chunked, location-partitioned queue connecting two arrows.
//!
//! Producers never push a partial chunk: they `reserve()` capacity first,
//! and either `commit()` the full reservation or let it drop, which
//! releases the reservation without touching the queue. This is the fix
//! for the partial-chunk ambiguity in the original source: rather than
//! committing a reservation that was only ever partially filled, an
//! aborted round rolls the whole reservation back and reports
//! `ComeBackLater` so the caller retries once space frees up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::metrics::ArrowStatus;

/// A provisional claim on `amount` slots of mailbox capacity. Must be
/// consumed by [`Reservation::commit`]; dropping it uncommitted releases
/// the capacity back to the mailbox.
pub struct Reservation<'m, T: Send> {
    mailbox: &'m Mailbox<T>,
    amount: usize,
    loc: usize,
    spent: bool,
}

impl<'m, T: Send> Reservation<'m, T> {
    /// Number of slots actually granted; may be less than requested.
    pub fn amount(&self) -> usize {
        self.amount
    }

    /// Pushes `items` (which must have length `<= amount()`) into the
    /// mailbox, returning the arrow's next scheduling status. Any
    /// reserved-but-unused slots are released.
    pub fn commit(mut self, mut items: Vec<T>) -> ArrowStatus {
        debug_assert!(items.len() <= self.amount, "committed more than reserved");
        let pushed = items.len();
        let unused = self.amount - pushed;
        {
            let mut q = self.mailbox.locations[self.loc].lock();
            q.extend(items.drain(..));
        }
        self.mailbox.len.fetch_add(pushed, Ordering::AcqRel);
        self.mailbox.reserved.fetch_sub(self.amount, Ordering::AcqRel);
        let _ = unused;
        self.spent = true;
        if pushed == 0 {
            ArrowStatus::ComeBackLater
        } else {
            ArrowStatus::KeepGoing
        }
    }
}

impl<'m, T: Send> Drop for Reservation<'m, T> {
    fn drop(&mut self) {
        if !self.spent {
            self.mailbox.reserved.fetch_sub(self.amount, Ordering::AcqRel);
        }
    }
}

pub struct Mailbox<T: Send> {
    capacity: usize,
    locations: Vec<Mutex<VecDeque<T>>>,
    reserved: AtomicUsize,
    len: AtomicUsize,
    upstream_finished: AtomicBool,
}

impl<T: Send> Mailbox<T> {
    pub fn new(capacity: usize, location_count: usize) -> Self {
        let location_count = location_count.max(1);
        Mailbox {
            capacity,
            locations: (0..location_count).map(|_| Mutex::new(VecDeque::new())).collect(),
            reserved: AtomicUsize::new(0),
            len: AtomicUsize::new(0),
            upstream_finished: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claims up to `requested` slots of capacity for location `loc`. The
    /// amount granted may be 0..=requested depending on current
    /// occupancy; callers that need exact-size chunks (e.g. a source
    /// preserving an entangled event block) must check
    /// `reservation.amount() == requested` and drop the reservation
    /// instead of committing a partial chunk.
    pub fn reserve(&self, requested: usize, loc: usize) -> Reservation<'_, T> {
        loop {
            let reserved = self.reserved.load(Ordering::Acquire);
            let used = reserved + self.len();
            if used >= self.capacity {
                return Reservation { mailbox: self, amount: 0, loc, spent: false };
            }
            let available = self.capacity - used;
            let grant = requested.min(available);
            if grant == 0 {
                return Reservation { mailbox: self, amount: 0, loc, spent: false };
            }
            if self
                .reserved
                .compare_exchange(reserved, reserved + grant, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Reservation { mailbox: self, amount: grant, loc, spent: false };
            }
        }
    }

    /// Pops up to `max` items, preferring `loc`'s own partition and
    /// falling back to scanning the others (cheap NUMA locality, not a
    /// hard guarantee).
    pub fn pop(&self, max: usize, loc: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(max);
        self.drain_from(loc, max, &mut out);
        if out.len() < max {
            for i in 1..self.locations.len() {
                if out.len() >= max {
                    break;
                }
                let other = (loc + i) % self.locations.len();
                self.drain_from(other, max, &mut out);
            }
        }
        self.len.fetch_sub(out.len(), Ordering::AcqRel);
        out
    }

    fn drain_from(&self, loc: usize, max: usize, out: &mut Vec<T>) {
        let mut q = self.locations[loc].lock();
        while out.len() < max {
            match q.pop_front() {
                Some(item) => out.push(item),
                None => break,
            }
        }
    }

    /// Marks that no more items will ever be pushed. Downstream arrows
    /// combine this with `is_empty()` to decide they've seen everything.
    pub fn mark_upstream_finished(&self) {
        self.upstream_finished.store(true, Ordering::Release);
    }

    pub fn is_upstream_finished(&self) -> bool {
        self.upstream_finished.load(Ordering::Acquire)
    }

    pub fn is_drained(&self) -> bool {
        self.is_upstream_finished() && self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_commit_roundtrip() {
        let mb: Mailbox<i32> = Mailbox::new(8, 1);
        let r = mb.reserve(4, 0);
        assert_eq!(r.amount(), 4);
        let status = r.commit(vec![1, 2, 3, 4]);
        assert_eq!(status, ArrowStatus::KeepGoing);
        assert_eq!(mb.len(), 4);
    }

    #[test]
    fn reservation_caps_at_capacity() {
        let mb: Mailbox<i32> = Mailbox::new(4, 1);
        let r1 = mb.reserve(4, 0);
        assert_eq!(r1.amount(), 4);
        let r2 = mb.reserve(4, 0);
        assert_eq!(r2.amount(), 0);
        r1.commit(vec![1, 2, 3, 4]);
    }

    #[test]
    fn dropped_reservation_releases_capacity() {
        let mb: Mailbox<i32> = Mailbox::new(4, 1);
        {
            let r = mb.reserve(4, 0);
            assert_eq!(r.amount(), 4);
        }
        let r2 = mb.reserve(4, 0);
        assert_eq!(r2.amount(), 4);
    }

    #[test]
    fn partial_grant_aborts_cleanly() {
        let mb: Mailbox<i32> = Mailbox::new(4, 1);
        let r1 = mb.reserve(3, 0);
        r1.commit(vec![1, 2, 3]);
        let r2 = mb.reserve(4, 0);
        assert_eq!(r2.amount(), 1, "only 1 slot left, source must abort rather than commit a partial chunk");
        drop(r2);
        assert_eq!(mb.len(), 3);
    }

    #[test]
    fn pop_respects_fifo_within_location() {
        let mb: Mailbox<i32> = Mailbox::new(8, 1);
        mb.reserve(3, 0).commit(vec![1, 2, 3]);
        let popped = mb.pop(2, 0);
        assert_eq!(popped, vec![1, 2]);
        assert_eq!(mb.len(), 1);
    }

    #[test]
    fn drained_requires_finished_and_empty() {
        let mb: Mailbox<i32> = Mailbox::new(4, 1);
        assert!(!mb.is_drained());
        mb.mark_upstream_finished();
        assert!(mb.is_drained());
        mb.reserve(1, 0).commit(vec![1]);
        mb.mark_upstream_finished();
        assert!(!mb.is_drained());
    }
}
