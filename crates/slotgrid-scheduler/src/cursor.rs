//! Round-robin cursor of a resource group.
//!
//! The round-robin strategy picks `next_index mod n` but never moves the
//! index itself. The cursor owns that index across cycles: the cycle reads
//! it before selecting and advances it once per round-robin placement.
//! Lock-free and safe for concurrent access.

use std::sync::atomic::{AtomicUsize, Ordering};

pub struct RoundRobinCursor {
    counter: AtomicUsize,
}

impl RoundRobinCursor {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(index: usize) -> Self {
        Self {
            counter: AtomicUsize::new(index),
        }
    }

    /// Index the next round-robin selection should use.
    pub fn current(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }

    /// Move past the current index. Returns the index that was consumed.
    pub fn advance(&self) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.counter.store(0, Ordering::Relaxed);
    }
}

impl Default for RoundRobinCursor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_by_one() {
        let cursor = RoundRobinCursor::new();
        assert_eq!(cursor.current(), 0);
        assert_eq!(cursor.advance(), 0);
        assert_eq!(cursor.advance(), 1);
        assert_eq!(cursor.current(), 2);
    }

    #[test]
    fn reading_does_not_advance() {
        let cursor = RoundRobinCursor::starting_at(7);
        for _ in 0..5 {
            assert_eq!(cursor.current(), 7);
        }
        cursor.reset();
        assert_eq!(cursor.current(), 0);
    }

    #[test]
    fn concurrent_advances_are_not_lost() {
        let cursor = std::sync::Arc::new(RoundRobinCursor::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cursor = cursor.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        cursor.advance();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cursor.current(), 400);
    }
}
