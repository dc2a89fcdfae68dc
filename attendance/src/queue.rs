//! Debounced, single-flight batching of classifications.
//!
//! The queue only keeps state and deadlines; the owning actor sleeps until
//! [`PendingUpdateQueue::next_deadline`] and performs the I/O.

use std::collections::BTreeMap;

use tokio::time::{Duration, Instant};

use crate::types::{PendingUpdate, StudentId};

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Quiet interval after the last enqueue before a flush fires.
    pub batch_window: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
    /// Consecutive failures after which the failure is escalated. Retries continue.
    pub retry_max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_secs(2),
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
            retry_max_attempts: 5,
        }
    }
}

/// Snapshot handed to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub id: u64,
    pub updates: Vec<PendingUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Committed {
        batch_size: usize,
    },
    Failed {
        /// Consecutive failures so far, including this one.
        attempt: u32,
        retry_in: Duration,
        /// The failure count has reached the escalation threshold.
        exhausted: bool,
    },
    /// Completion for a batch that is not the one in flight.
    Stale,
}

#[derive(Debug)]
pub struct PendingUpdateQueue {
    config: QueueConfig,
    pending: BTreeMap<StudentId, PendingUpdate>,
    in_flight: Option<Batch>,
    debounce_at: Option<Instant>,
    retry_at: Option<Instant>,
    follow_up: bool,
    failures: u32,
    next_batch_id: u64,
}

impl PendingUpdateQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            pending: BTreeMap::new(),
            in_flight: None,
            debounce_at: None,
            retry_at: None,
            follow_up: false,
            failures: 0,
            next_batch_id: 1,
        }
    }

    /// Inserts or replaces the entry for the update's student and restarts the
    /// debounce window.
    pub fn enqueue(&mut self, update: PendingUpdate, now: Instant) {
        self.pending.insert(update.student_id, update);
        self.debounce_at = Some(now + self.config.batch_window);
    }

    /// Asks for a flush as soon as possible, skipping the debounce window and
    /// any retry backoff. While a batch is in flight this becomes a follow-up.
    pub fn request_flush(&mut self, now: Instant) {
        if self.in_flight.is_some() {
            self.follow_up = true;
        } else {
            self.debounce_at = Some(now);
            self.retry_at = None;
        }
    }

    /// When the next flush should start, if any.
    ///
    /// Nothing is due while a batch is in flight. During retry backoff the
    /// retry instant governs; updates enqueued meanwhile ride along with it.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.in_flight.is_some() {
            return None;
        }
        if self.retry_at.is_some() {
            return self.retry_at;
        }
        self.debounce_at
    }

    /// Atomically snapshots and clears the queue.
    ///
    /// Returns `None` when there is nothing to send or a batch is already in
    /// flight; the latter records a follow-up flush.
    pub fn begin_flush(&mut self) -> Option<Batch> {
        if self.in_flight.is_some() {
            self.follow_up = true;
            return None;
        }
        self.debounce_at = None;
        self.retry_at = None;
        if self.pending.is_empty() {
            return None;
        }

        let updates: Vec<PendingUpdate> = std::mem::take(&mut self.pending).into_values().collect();
        let batch = Batch {
            id: self.next_batch_id,
            updates,
        };
        self.next_batch_id += 1;
        self.in_flight = Some(batch.clone());
        Some(batch)
    }

    /// Settles the in-flight batch.
    ///
    /// On failure the batch is merged back under anything enqueued while it was
    /// in flight (newer entries win) and a retry is scheduled with exponential
    /// backoff.
    pub fn complete<E>(&mut self, batch_id: u64, result: &Result<(), E>, now: Instant) -> FlushOutcome {
        let batch = match self.in_flight.take() {
            Some(b) if b.id == batch_id => b,
            other => {
                self.in_flight = other;
                return FlushOutcome::Stale;
            }
        };

        match result {
            Ok(()) => {
                self.failures = 0;
                if std::mem::take(&mut self.follow_up) {
                    self.debounce_at = Some(now);
                }
                FlushOutcome::Committed {
                    batch_size: batch.updates.len(),
                }
            }
            Err(_) => {
                for update in batch.updates {
                    self.pending.entry(update.student_id).or_insert(update);
                }
                self.failures = self.failures.saturating_add(1);
                self.follow_up = false;
                let retry_in = self.backoff(self.failures);
                self.retry_at = Some(now + retry_in);
                FlushOutcome::Failed {
                    attempt: self.failures,
                    retry_in,
                    exhausted: self.failures >= self.config.retry_max_attempts,
                }
            }
        }
    }

    /// `retry_base * 2^(attempt-1)`, capped at `retry_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.config
            .retry_base
            .saturating_mul(1u32 << exp)
            .min(self.config.retry_max)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.as_ref().map_or(0, |b| b.updates.len())
    }

    /// Pending or in-flight work exists.
    pub fn has_work(&self) -> bool {
        !self.pending.is_empty() || self.in_flight.is_some()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingUpdate> {
        self.pending.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttendanceStatus, RecordSource};
    use chrono::{TimeZone, Utc};

    fn update(student_id: StudentId, status: AttendanceStatus, secs: u32) -> PendingUpdate {
        PendingUpdate {
            student_id,
            status,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, secs).unwrap(),
            source: RecordSource::Scan,
        }
    }

    fn queue() -> PendingUpdateQueue {
        PendingUpdateQueue::new(QueueConfig::default())
    }

    #[test]
    fn enqueue_coalesces_per_student_and_resets_debounce() {
        let t0 = Instant::now();
        let mut q = queue();
        q.enqueue(update(1, AttendanceStatus::Present, 0), t0);
        q.enqueue(update(1, AttendanceStatus::Excused, 1), t0 + Duration::from_secs(1));
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_deadline(), Some(t0 + Duration::from_secs(3)));
        assert_eq!(q.pending().next().unwrap().status, AttendanceStatus::Excused);
    }

    #[test]
    fn burst_becomes_a_single_batch() {
        let t0 = Instant::now();
        let mut q = queue();
        for id in 1..=5 {
            q.enqueue(update(id, AttendanceStatus::Present, id as u32), t0);
        }
        let batch = q.begin_flush().unwrap();
        assert_eq!(batch.updates.len(), 5);
        assert!(q.is_empty());
        assert!(q.begin_flush().is_none());
    }

    #[test]
    fn single_flight_records_a_follow_up() {
        let t0 = Instant::now();
        let mut q = queue();
        q.enqueue(update(1, AttendanceStatus::Present, 0), t0);
        let first = q.begin_flush().unwrap();

        q.enqueue(update(2, AttendanceStatus::Late, 1), t0);
        assert_eq!(q.next_deadline(), None);
        assert!(q.begin_flush().is_none());

        let ok: Result<(), ()> = Ok(());
        let later = t0 + Duration::from_millis(10);
        assert_eq!(
            q.complete(first.id, &ok, later),
            FlushOutcome::Committed { batch_size: 1 }
        );
        assert_eq!(q.next_deadline(), Some(later));
        let second = q.begin_flush().unwrap();
        assert_eq!(second.updates[0].student_id, 2);
    }

    #[test]
    fn failure_restores_exact_pre_flush_set() {
        let t0 = Instant::now();
        let mut q = queue();
        for id in 1..=3 {
            q.enqueue(update(id, AttendanceStatus::Present, id as u32), t0);
        }
        let before: Vec<_> = q.pending().cloned().collect();
        let batch = q.begin_flush().unwrap();

        let err: Result<(), &str> = Err("offline");
        let outcome = q.complete(batch.id, &err, t0);
        assert!(matches!(outcome, FlushOutcome::Failed { attempt: 1, exhausted: false, .. }));
        let after: Vec<_> = q.pending().cloned().collect();
        assert_eq!(before, after);
        assert_eq!(q.next_deadline(), Some(t0 + Duration::from_millis(500)));
    }

    #[test]
    fn failure_merge_keeps_newer_arrivals() {
        let t0 = Instant::now();
        let mut q = queue();
        q.enqueue(update(1, AttendanceStatus::Present, 0), t0);
        q.enqueue(update(2, AttendanceStatus::Present, 0), t0);
        let batch = q.begin_flush().unwrap();

        q.enqueue(update(2, AttendanceStatus::Excused, 5), t0);
        q.enqueue(update(3, AttendanceStatus::Late, 5), t0);

        let err: Result<(), &str> = Err("timeout");
        q.complete(batch.id, &err, t0);

        let statuses: Vec<_> = q.pending().map(|u| (u.student_id, u.status)).collect();
        assert_eq!(
            statuses,
            vec![
                (1, AttendanceStatus::Present),
                (2, AttendanceStatus::Excused),
                (3, AttendanceStatus::Late),
            ]
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let q = queue();
        assert_eq!(q.backoff(1), Duration::from_millis(500));
        assert_eq!(q.backoff(2), Duration::from_secs(1));
        assert_eq!(q.backoff(4), Duration::from_secs(4));
        assert_eq!(q.backoff(10), Duration::from_secs(30));
        assert_eq!(q.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn escalates_after_max_attempts_without_dropping() {
        let t0 = Instant::now();
        let mut q = PendingUpdateQueue::new(QueueConfig {
            retry_max_attempts: 2,
            ..QueueConfig::default()
        });
        q.enqueue(update(9, AttendanceStatus::Absent, 0), t0);
        let err: Result<(), &str> = Err("down");

        let b1 = q.begin_flush().unwrap();
        assert!(matches!(q.complete(b1.id, &err, t0), FlushOutcome::Failed { exhausted: false, .. }));
        let b2 = q.begin_flush().unwrap();
        assert!(matches!(q.complete(b2.id, &err, t0), FlushOutcome::Failed { attempt: 2, exhausted: true, .. }));
        assert_eq!(q.len(), 1);
        assert_eq!(q.consecutive_failures(), 2);
    }

    #[test]
    fn request_flush_skips_backoff() {
        let t0 = Instant::now();
        let mut q = queue();
        q.enqueue(update(1, AttendanceStatus::Present, 0), t0);
        let b = q.begin_flush().unwrap();
        let err: Result<(), &str> = Err("down");
        q.complete(b.id, &err, t0);
        assert_eq!(q.next_deadline(), Some(t0 + Duration::from_millis(500)));
        q.request_flush(t0);
        assert_eq!(q.next_deadline(), Some(t0));
    }

    #[test]
    fn stale_completion_is_ignored() {
        let t0 = Instant::now();
        let mut q = queue();
        q.enqueue(update(1, AttendanceStatus::Present, 0), t0);
        let b = q.begin_flush().unwrap();
        let ok: Result<(), ()> = Ok(());
        assert_eq!(q.complete(b.id + 1, &ok, t0), FlushOutcome::Stale);
        assert_eq!(q.in_flight_len(), 1);
    }
}
