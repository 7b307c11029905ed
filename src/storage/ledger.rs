//! Bounded in-memory store of tracked invocations.
//!
//! `upsert` is the single mutation path for stream records; the retry
//! controller additionally owns the `retry` sub-state through
//! `begin_retry`/`finish_retry`. Presentation order is not stored: readers sort
//! by `(last_updated_at_ns, update_seq)` descending.

use crate::domain::errors::{InvalidStateReason, RetryError};
use crate::domain::state_machine::{can_begin_retry, transition_status, StatusTransition};
use crate::domain::types::{
    CorrelationId, InvocationCandidate, InvocationStatus, LedgerKey, RetryPhase, RetryState,
    TrackedInvocation, TxHash,
};
use canlog::{log, GetLogFilter, LogFilter, LogPriorityLevels};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, LogPriorityLevels)]
enum LedgerLogPriority {
    #[log_level(capacity = 1000, name = "LEDGER_INFO")]
    Info,
}

impl GetLogFilter for LedgerLogPriority {
    fn get_log_filter() -> LogFilter {
        LogFilter::ShowAll
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeEffect {
    pub identity_filled: bool,
    pub tx_filled: bool,
    pub adopted_synthetic: bool,
    pub status: Option<StatusTransition>,
}

impl MergeEffect {
    /// True when the merge only bumped `last_updated_at_ns`.
    pub fn is_noop(&self) -> bool {
        !self.identity_filled
            && !self.tx_filled
            && !self.adopted_synthetic
            && !matches!(self.status, Some(StatusTransition::Advanced(_)))
    }

    pub fn conflict_ignored(&self) -> bool {
        matches!(self.status, Some(StatusTransition::ConflictIgnored { .. }))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted {
        key: LedgerKey,
        evicted: Option<LedgerKey>,
    },
    Merged {
        key: LedgerKey,
        effect: MergeEffect,
    },
}

impl UpsertOutcome {
    pub fn key(&self) -> LedgerKey {
        match self {
            UpsertOutcome::Inserted { key, .. } | UpsertOutcome::Merged { key, .. } => *key,
        }
    }
}

#[derive(Debug)]
pub struct InvocationLedger {
    capacity: usize,
    entries: HashMap<LedgerKey, TrackedInvocation>,
    next_seq: u64,
}

impl InvocationLedger {
    /// A zero capacity is raised to one so an insert can always be retained.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity + 1),
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &LedgerKey) -> Option<&TrackedInvocation> {
        self.entries.get(key)
    }

    pub fn get_by_correlation(&self, correlation_id: &CorrelationId) -> Option<&TrackedInvocation> {
        self.entries.get(&LedgerKey::Correlation(*correlation_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedInvocation> {
        self.entries.values()
    }

    /// Snapshot ordered most-recently-updated first.
    pub fn by_recency(&self) -> Vec<&TrackedInvocation> {
        let mut rows: Vec<&TrackedInvocation> = self.entries.values().collect();
        rows.sort_by_key(|entry| std::cmp::Reverse(entry.recency()));
        rows
    }

    pub fn upsert(&mut self, candidate: InvocationCandidate, now_ns: u64) -> UpsertOutcome {
        let key = self.resolve_key(&candidate);
        let adopted = self.adopt_synthetic(key, &candidate, now_ns);
        let seq = self.bump_seq();

        if let Some(entry) = self.entries.get_mut(&key) {
            let mut effect = merge_candidate(entry, &candidate);
            effect.adopted_synthetic = adopted;
            entry.last_updated_at_ns = now_ns;
            entry.update_seq = seq;
            return UpsertOutcome::Merged { key, effect };
        }

        let entry = new_entry(key, &candidate, now_ns, seq);
        self.entries.insert(key, entry);
        let evicted = self.evict_over_capacity(&key);
        UpsertOutcome::Inserted { key, evicted }
    }

    /// Moves an entry to `InFlight` and returns the new attempt number.
    pub fn begin_retry(
        &mut self,
        correlation_id: &CorrelationId,
        now_ns: u64,
    ) -> Result<u32, RetryError> {
        let seq = self.next_seq.saturating_add(1);
        let entry = self
            .entries
            .get_mut(&LedgerKey::Correlation(*correlation_id))
            .ok_or(RetryError::InvalidState {
                correlation_id: *correlation_id,
                reason: InvalidStateReason::NotTracked,
            })?;
        if entry.status.is_terminal() {
            return Err(RetryError::InvalidState {
                correlation_id: *correlation_id,
                reason: InvalidStateReason::AlreadyTerminal(entry.status),
            });
        }
        if !can_begin_retry(entry.retry.phase) {
            return Err(RetryError::AlreadyInFlight {
                correlation_id: *correlation_id,
            });
        }

        entry.retry = RetryState {
            attempt: entry.retry.attempt.saturating_add(1),
            phase: RetryPhase::InFlight,
            last_error: None,
        };
        entry.last_updated_at_ns = now_ns;
        entry.update_seq = seq;
        let attempt = entry.retry.attempt;
        self.next_seq = seq;
        Ok(attempt)
    }

    /// Records the settled outcome of the in-flight retry `attempt`.
    ///
    /// Returns `false` and discards the outcome when the entry is gone or is
    /// no longer running that attempt (evicted and re-created while the retry
    /// was suspended).
    pub fn finish_retry(
        &mut self,
        correlation_id: &CorrelationId,
        attempt: u32,
        outcome: Result<(), String>,
        now_ns: u64,
    ) -> bool {
        let seq = self.next_seq.saturating_add(1);
        let Some(entry) = self
            .entries
            .get_mut(&LedgerKey::Correlation(*correlation_id))
        else {
            return false;
        };
        if entry.retry.phase != RetryPhase::InFlight || entry.retry.attempt != attempt {
            return false;
        }
        match outcome {
            Ok(()) => {
                entry.retry.phase = RetryPhase::Succeeded;
                entry.retry.last_error = None;
            }
            Err(error) => {
                entry.retry.phase = RetryPhase::Failed;
                entry.retry.last_error = Some(error);
            }
        }
        entry.last_updated_at_ns = now_ns;
        entry.update_seq = seq;
        self.next_seq = seq;
        true
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq = self.next_seq.saturating_add(1);
        self.next_seq
    }

    /// An id-less invocation whose transaction is already tracked under its
    /// correlation id merges into that entry instead of creating a second one.
    fn resolve_key(&self, candidate: &InvocationCandidate) -> LedgerKey {
        match candidate.key {
            LedgerKey::InvokeTx(tx) => self
                .find_correlated_by_invoke_tx(&tx)
                .unwrap_or(candidate.key),
            key @ LedgerKey::Correlation(_) => key,
        }
    }

    fn find_correlated_by_invoke_tx(&self, tx: &TxHash) -> Option<LedgerKey> {
        self.entries
            .values()
            .find(|entry| {
                matches!(entry.key, LedgerKey::Correlation(_))
                    && entry.source_tx_invoke.as_ref() == Some(tx)
            })
            .map(|entry| entry.key)
    }

    /// Re-keys a synthetic entry once its correlation id becomes known.
    fn adopt_synthetic(
        &mut self,
        key: LedgerKey,
        candidate: &InvocationCandidate,
        now_ns: u64,
    ) -> bool {
        let (LedgerKey::Correlation(_), Some(tx)) = (key, candidate.source_tx_invoke) else {
            return false;
        };
        let Some(mut orphan) = self.entries.remove(&LedgerKey::InvokeTx(tx)) else {
            return false;
        };

        match self.entries.get_mut(&key) {
            Some(existing) => {
                merge_candidate(existing, &candidate_from_entry(&orphan));
                existing.first_seen_at_ns = existing.first_seen_at_ns.min(orphan.first_seen_at_ns);
            }
            None => {
                orphan.key = key;
                self.entries.insert(key, orphan);
            }
        }
        log!(
            LedgerLogPriority::Info,
            "ledger_adopt_synthetic tx=0x{} key={} now={}",
            hex::encode(tx.as_slice()),
            key,
            now_ns
        );
        true
    }

    fn evict_over_capacity(&mut self, protected: &LedgerKey) -> Option<LedgerKey> {
        if self.entries.len() <= self.capacity {
            return None;
        }
        let victim = self
            .entries
            .values()
            .filter(|entry| &entry.key != protected)
            .min_by_key(|entry| entry.recency())
            .map(|entry| entry.key)?;
        let removed = self.entries.remove(&victim)?;
        log!(
            LedgerLogPriority::Info,
            "ledger_evict key={} status={:?} last_updated={} capacity={}",
            removed.key,
            removed.status,
            removed.last_updated_at_ns,
            self.capacity
        );
        Some(victim)
    }
}

fn new_entry(
    key: LedgerKey,
    candidate: &InvocationCandidate,
    now_ns: u64,
    seq: u64,
) -> TrackedInvocation {
    TrackedInvocation {
        key,
        agent_id: candidate.agent_id,
        caller: candidate.caller,
        paid_amount: candidate.paid_amount,
        status: candidate.status,
        source_tx_invoke: candidate.source_tx_invoke,
        source_tx_confirm: candidate.source_tx_confirm,
        result_reference: if candidate.status.is_terminal() {
            candidate.result_reference.clone()
        } else {
            None
        },
        first_seen_at_ns: now_ns,
        last_updated_at_ns: now_ns,
        update_seq: seq,
        retry: RetryState::default(),
    }
}

fn candidate_from_entry(entry: &TrackedInvocation) -> InvocationCandidate {
    InvocationCandidate {
        key: entry.key,
        agent_id: entry.agent_id,
        caller: entry.caller,
        paid_amount: entry.paid_amount,
        status: entry.status,
        source_tx_invoke: entry.source_tx_invoke,
        source_tx_confirm: entry.source_tx_confirm,
        result_reference: entry.result_reference.clone(),
    }
}

fn fill<T: Clone>(slot: &mut Option<T>, offered: &Option<T>) -> bool {
    if slot.is_none() && offered.is_some() {
        *slot = offered.clone();
        return true;
    }
    false
}

/// Field-by-field merge. Identity, transaction ids and the result reference
/// are set only while unset; status follows `transition_status`.
fn merge_candidate(entry: &mut TrackedInvocation, candidate: &InvocationCandidate) -> MergeEffect {
    let mut identity_filled = fill(&mut entry.agent_id, &candidate.agent_id);
    identity_filled |= fill(&mut entry.caller, &candidate.caller);
    identity_filled |= fill(&mut entry.paid_amount, &candidate.paid_amount);

    let mut tx_filled = fill(&mut entry.source_tx_invoke, &candidate.source_tx_invoke);
    tx_filled |= fill(&mut entry.source_tx_confirm, &candidate.source_tx_confirm);

    let status = transition_status(entry.status, candidate.status);
    if let StatusTransition::Advanced(next) = status {
        entry.status = next;
        fill(&mut entry.result_reference, &candidate.result_reference);
    }

    MergeEffect {
        identity_filled,
        tx_filled,
        adopted_synthetic: false,
        status: (candidate.status != InvocationStatus::Pending
            || status != StatusTransition::Unchanged)
            .then_some(status),
    }
}
