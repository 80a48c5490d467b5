use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::calculator::ProposedResources;

/* ============================= TYPES ============================= */

/// A resize that was structurally valid but temporarily infeasible
/// (node capacity, quota), parked for re-dispatch.
#[derive(Debug, Clone)]
pub struct DeferredResize {
    pub namespace: String,
    pub pod: String,
    pub proposals: HashMap<String, ProposedResources>,
    pub first_seen: DateTime<Utc>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub next_attempt: DateTime<Utc>,
    pub attempts: u32,
    /// Pod priority (spec.priority); higher re-dispatches first.
    pub priority: i32,
    /// Pod generation when the deferral was created; a newer generation
    /// supersedes the queued work.
    pub observed_generation: Option<i64>,
    pub reason: String,
    pub original_error: String,
}

impl DeferredResize {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.pod)
    }
}

/// Backoff parameters, copied out of the config snapshot at sweep time.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_attempts: u32,
    pub max_deferral: Duration,
}

/* ============================= QUEUE ============================= */

#[derive(Debug, Eq, PartialEq)]
struct HeapEntry {
    priority: i32,
    first_seen: DateTime<Utc>,
    seq: u64,
    key: String,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher pod priority pops first; within a priority
        // class, older deferrals pop first (FIFO).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.first_seen.cmp(&self.first_seen))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of deferred resizes keyed by `namespace/pod`.
///
/// The side map is authoritative; heap entries whose sequence number no
/// longer matches are skipped on pop (lazy deletion), so replacement and
/// removal stay O(log n) without heap surgery.
#[derive(Debug, Default)]
pub struct RetryQueue {
    heap: BinaryHeap<HeapEntry>,
    entries: HashMap<String, (u64, DeferredResize)>,
    next_seq: u64,
}

impl RetryQueue {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&DeferredResize> {
        self.entries.get(key).map(|(_, e)| e)
    }

    /// Queue a deferral. A key already present keeps its original
    /// `first_seen` and attempt count; only the proposal and reason are
    /// replaced.
    pub fn defer(&mut self, mut entry: DeferredResize) {
        let key = entry.key();
        if let Some((_, existing)) = self.entries.get(&key) {
            entry.first_seen = existing.first_seen;
            entry.attempts = existing.attempts;
            entry.last_attempt = existing.last_attempt;
        }

        self.next_seq += 1;
        self.heap.push(HeapEntry {
            priority: entry.priority,
            first_seen: entry.first_seen,
            seq: self.next_seq,
            key: key.clone(),
        });
        self.entries.insert(key, (self.next_seq, entry));
    }

    pub fn remove(&mut self, key: &str) -> Option<DeferredResize> {
        self.entries.remove(key).map(|(_, e)| e)
    }

    /// Drop and return every entry past its attempt or age budget.
    pub fn drain_expired(&mut self, now: DateTime<Utc>, policy: &BackoffPolicy) -> Vec<DeferredResize> {
        let max_age = chrono::Duration::from_std(policy.max_deferral)
            .unwrap_or_else(|_| chrono::Duration::days(36500));

        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, (_, e))| {
                e.attempts >= policy.max_attempts || now.signed_duration_since(e.first_seen) > max_age
            })
            .map(|(k, _)| k.clone())
            .collect();

        expired_keys
            .into_iter()
            .filter_map(|k| self.remove(&k))
            .collect()
    }

    /// Remove and return the due entries in dispatch order
    /// (priority descending, then first-seen ascending).
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<DeferredResize> {
        let mut due = Vec::new();
        let mut requeue = Vec::new();

        while let Some(top) = self.heap.pop() {
            match self.entries.get(&top.key) {
                // Stale heap entry: the key was replaced or removed.
                Some((seq, _)) if *seq != top.seq => continue,
                None => continue,
                Some((_, entry)) => {
                    if entry.next_attempt <= now {
                        let (_, entry) = self.entries.remove(&top.key).expect("entry present");
                        due.push(entry);
                    } else {
                        requeue.push(top);
                    }
                }
            }
        }

        for entry in requeue {
            self.heap.push(entry);
        }
        due
    }

    /// Record a failed attempt and put the entry back with exponential
    /// backoff (±10% jitter) on its next dispatch time.
    pub fn requeue_after_attempt(
        &mut self,
        mut entry: DeferredResize,
        now: DateTime<Utc>,
        policy: &BackoffPolicy,
    ) {
        entry.attempts += 1;
        entry.last_attempt = Some(now);
        entry.next_attempt = now + backoff_delay(policy, entry.attempts);
        let key = entry.key();

        self.next_seq += 1;
        self.heap.push(HeapEntry {
            priority: entry.priority,
            first_seen: entry.first_seen,
            seq: self.next_seq,
            key: key.clone(),
        });
        self.entries.insert(key, (self.next_seq, entry));
    }
}

/// `min(initial × factor^attempts, max)` with ±10% jitter.
fn backoff_delay(policy: &BackoffPolicy, attempts: u32) -> chrono::Duration {
    let exp = policy.factor.powi(attempts.min(24) as i32);
    let raw = policy.initial_delay.as_secs_f64() * exp;
    let capped = raw.min(policy.max_delay.as_secs_f64());
    let jittered = capped * rand::thread_rng().gen_range(0.9..1.1);
    chrono::Duration::milliseconds((jittered * 1000.0) as i64)
}

/* ============================= TESTS ============================= */
