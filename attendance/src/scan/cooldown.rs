//! Per-student lock held from scan until the enclosing flush cycle completes.

use std::collections::HashMap;

use tokio::time::{Duration, Instant};

use crate::types::StudentId;

#[derive(Debug)]
pub struct CooldownGuard {
    held: HashMap<StudentId, Instant>,
    max_hold: Duration,
}

impl CooldownGuard {
    pub fn new(max_hold: Duration) -> Self {
        Self {
            held: HashMap::new(),
            max_hold,
        }
    }

    /// Takes the lock for `student_id`. `false` means a previous scan still
    /// holds it.
    ///
    /// A lock older than `max_hold` is treated as orphaned and taken over, so a
    /// lost release can never block a student for the rest of the session.
    pub fn acquire(&mut self, student_id: StudentId, now: Instant) -> bool {
        if let Some(&since) = self.held.get(&student_id) {
            if now.saturating_duration_since(since) < self.max_hold {
                return false;
            }
            tracing::warn!(
                student_id,
                held_ms = now.saturating_duration_since(since).as_millis() as u64,
                "cooldown lock exceeded max hold; reclaiming"
            );
        }
        self.held.insert(student_id, now);
        true
    }

    pub fn release(&mut self, student_id: StudentId) {
        self.held.remove(&student_id);
    }

    pub fn release_all<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = StudentId>,
    {
        for id in ids {
            self.held.remove(&id);
        }
    }

    /// Drops every lock older than `max_hold`. Returns how many were dropped.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.held.len();
        let max_hold = self.max_hold;
        self.held
            .retain(|_, since| now.saturating_duration_since(*since) < max_hold);
        before - self.held.len()
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let now = Instant::now();
        let mut g = CooldownGuard::new(Duration::from_secs(30));
        assert!(g.acquire(1, now));
        assert!(!g.acquire(1, now + Duration::from_millis(10)));
        assert!(g.acquire(2, now));
        g.release(1);
        assert!(g.acquire(1, now + Duration::from_millis(20)));
    }

    #[test]
    fn orphaned_lock_is_reclaimed_after_max_hold() {
        let now = Instant::now();
        let mut g = CooldownGuard::new(Duration::from_secs(30));
        assert!(g.acquire(7, now));
        assert!(!g.acquire(7, now + Duration::from_secs(29)));
        assert!(g.acquire(7, now + Duration::from_secs(30)));
    }

    #[test]
    fn release_all_and_expire() {
        let now = Instant::now();
        let mut g = CooldownGuard::new(Duration::from_secs(5));
        for id in 1..=4 {
            g.acquire(id, now);
        }
        g.release_all([1, 2]);
        assert_eq!(g.held_count(), 2);
        assert_eq!(g.expire(now + Duration::from_secs(1)), 0);
        assert_eq!(g.expire(now + Duration::from_secs(6)), 2);
        assert_eq!(g.held_count(), 0);
    }
}
