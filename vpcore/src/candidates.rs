//! Local candidate queue and its flush policy.
//!
//! The queue never decides to send anything before the remote answer has
//! been applied. After that, server-reflexive candidates go out alone and
//! immediately, everything else is batched by count or by elapsed time, and
//! the end of gathering flushes whatever is left.

use crate::signaling::IceCandidateInit;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Candidate type, parsed from the `typ` token of the candidate line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
    Unknown,
}

impl CandidateKind {
    pub fn of(candidate: &IceCandidateInit) -> Self {
        let mut tokens = candidate.candidate.split_whitespace();
        while let Some(tok) = tokens.next() {
            if tok == "typ" {
                return match tokens.next() {
                    Some("host") => Self::Host,
                    Some("srflx") => Self::ServerReflexive,
                    Some("prflx") => Self::PeerReflexive,
                    Some("relay") => Self::Relay,
                    _ => Self::Unknown,
                };
            }
        }
        Self::Unknown
    }
}

/// Batching bounds for non-priority candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateBatchPolicy {
    /// Flush once this many candidates are pending.
    pub max_batch: usize,
    /// Flush once this much time has passed since the previous flush.
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl Default for CandidateBatchPolicy {
    fn default() -> Self {
        Self {
            max_batch: 4,
            max_delay: Duration::from_millis(300),
        }
    }
}

/// What to transmit now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateFlush {
    Single(IceCandidateInit),
    Batch(Vec<IceCandidateInit>),
}

impl CandidateFlush {
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct CandidateQueue {
    policy: CandidateBatchPolicy,
    pending: Vec<IceCandidateInit>,
    remote_applied: bool,
    gathering_complete: bool,
    last_flush: Option<Instant>,
}

impl CandidateQueue {
    pub fn new(policy: CandidateBatchPolicy) -> Self {
        Self {
            policy,
            pending: Vec::new(),
            remote_applied: false,
            gathering_complete: false,
            last_flush: None,
        }
    }

    pub fn pending(&self) -> &[IceCandidateInit] {
        &self.pending
    }

    pub fn is_remote_applied(&self) -> bool {
        self.remote_applied
    }

    pub fn is_gathering_complete(&self) -> bool {
        self.gathering_complete
    }

    /// Records a gathered candidate and returns what should be sent now, if anything.
    pub fn push(&mut self, candidate: IceCandidateInit, now: Instant) -> Option<CandidateFlush> {
        if candidate.is_end_of_candidates() {
            return self.gathering_complete(now);
        }

        if !self.remote_applied {
            self.pending.push(candidate);
            return None;
        }

        if CandidateKind::of(&candidate) == CandidateKind::ServerReflexive {
            return Some(CandidateFlush::Single(candidate));
        }

        self.pending.push(candidate);

        let elapsed = self
            .last_flush
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or(Duration::MAX);
        if self.gathering_complete
            || self.pending.len() >= self.policy.max_batch
            || elapsed >= self.policy.max_delay
        {
            return self.drain(now);
        }
        None
    }

    /// The remote description is in place: everything held so far goes out.
    pub fn mark_remote_applied(&mut self, now: Instant) -> Option<CandidateFlush> {
        self.remote_applied = true;
        self.last_flush = Some(now);
        self.drain(now)
    }

    /// Gathering finished: flush unconditionally once the remote is applied.
    pub fn gathering_complete(&mut self, now: Instant) -> Option<CandidateFlush> {
        self.gathering_complete = true;
        if self.remote_applied {
            self.drain(now)
        } else {
            None
        }
    }

    /// Flushes the pending batch if its time bound has passed.
    pub fn poll(&mut self, now: Instant) -> Option<CandidateFlush> {
        match self.next_deadline() {
            Some(deadline) if now >= deadline => self.drain(now),
            _ => None,
        }
    }

    /// When [`poll`](Self::poll) must next be called, if a batch is waiting.
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.remote_applied || self.pending.is_empty() {
            return None;
        }
        self.last_flush.map(|t| t + self.policy.max_delay)
    }

    /// Drops everything; used at teardown. Returns how many were discarded.
    pub fn discard(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    fn drain(&mut self, now: Instant) -> Option<CandidateFlush> {
        if self.pending.is_empty() {
            return None;
        }
        self.last_flush = Some(now);
        Some(CandidateFlush::Batch(std::mem::take(&mut self.pending)))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
