//! Serialized merge path for the two event streams.
//!
//! Records from both subscriptions are applied one at a time and each apply
//! runs to completion (upsert, then exactly one notification) before the next
//! record is looked at. Agent scoping is left to the projection; every
//! well-formed record reaches the ledger.

use crate::domain::errors::NormalizeError;
use crate::domain::types::{
    ConfirmedRecord, EventKind, InvokedRecord, NotifyEvent, RawEventLog, ReconcilerStats,
};
use crate::features::event_source::{
    EventSource, EventStream, SubscriptionFilter, SubscriptionHandle,
};
use crate::features::normalize::{normalize_confirmed, normalize_invoked};
use crate::notify::NotificationSink;
use crate::storage::ledger::{InvocationLedger, UpsertOutcome};
use crate::timing::current_time_ns;
use canlog::{log, GetLogFilter, LogFilter, LogPriorityLevels};
use std::cell::{Ref, RefCell};
use std::rc::Rc;

#[derive(Clone, Copy, Debug, LogPriorityLevels)]
enum ReconcilerLogPriority {
    #[log_level(capacity = 2000, name = "RECONCILER_INFO")]
    Info,
    #[log_level(capacity = 500, name = "RECONCILER_ERROR")]
    Error,
}

impl GetLogFilter for ReconcilerLogPriority {
    fn get_log_filter() -> LogFilter {
        LogFilter::ShowAll
    }
}

struct Subscription {
    kind: EventKind,
    stream: Box<dyn EventStream>,
    handle: SubscriptionHandle,
}

/// What one `pump` call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub applied: usize,
    pub malformed: usize,
    pub stream_errors: usize,
}

pub struct Reconciler {
    ledger: Rc<RefCell<InvocationLedger>>,
    sink: Rc<dyn NotificationSink>,
    subscriptions: Vec<Subscription>,
    stats: ReconcilerStats,
}

impl Reconciler {
    pub fn new(ledger: Rc<RefCell<InvocationLedger>>, sink: Rc<dyn NotificationSink>) -> Self {
        Self {
            ledger,
            sink,
            subscriptions: Vec::new(),
            stats: ReconcilerStats::default(),
        }
    }

    pub fn ledger(&self) -> Ref<'_, InvocationLedger> {
        self.ledger.borrow()
    }

    pub fn stats(&self) -> &ReconcilerStats {
        &self.stats
    }

    /// Number of live (not cancelled) subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .iter()
            .filter(|subscription| !subscription.handle.is_cancelled())
            .count()
    }

    pub fn subscribe(
        &mut self,
        source: &dyn EventSource,
        kind: EventKind,
        filter: &SubscriptionFilter,
    ) -> Result<SubscriptionHandle, String> {
        let stream = source.subscribe(kind, filter)?;
        let handle = SubscriptionHandle::new();
        self.subscriptions.push(Subscription {
            kind,
            stream,
            handle: handle.clone(),
        });
        log!(
            ReconcilerLogPriority::Info,
            "reconciler_subscribe kind={:?} contract={:?}",
            kind,
            filter.contract
        );
        Ok(handle)
    }

    /// Subscribes to invocations first, then confirmations. Both are torn down
    /// if the second subscription fails.
    pub fn connect(
        &mut self,
        source: &dyn EventSource,
        filter: &SubscriptionFilter,
    ) -> Result<(SubscriptionHandle, SubscriptionHandle), String> {
        let invoked = self.subscribe(source, EventKind::Invoked, filter)?;
        match self.subscribe(source, EventKind::Confirmed, filter) {
            Ok(confirmed) => Ok((invoked, confirmed)),
            Err(error) => {
                invoked.unsubscribe();
                self.prune_cancelled();
                Err(error)
            }
        }
    }

    pub fn disconnect(&mut self) {
        for subscription in &self.subscriptions {
            subscription.handle.unsubscribe();
        }
        self.prune_cancelled();
    }

    /// Polls every live subscription once, in subscription order, and applies
    /// whatever each yields. A transport error on one stream is counted and
    /// logged; the stream stays subscribed and the remaining streams are
    /// still polled.
    pub async fn pump(&mut self) -> PumpReport {
        self.prune_cancelled();
        let mut report = PumpReport::default();

        for index in 0..self.subscriptions.len() {
            let (kind, batch) = {
                let subscription = &mut self.subscriptions[index];
                if subscription.handle.is_cancelled() {
                    continue;
                }
                (subscription.kind, subscription.stream.next_batch().await)
            };

            let logs = match batch {
                Ok(logs) => logs,
                Err(error) => {
                    self.stats.stream_errors = self.stats.stream_errors.saturating_add(1);
                    report.stream_errors += 1;
                    log!(
                        ReconcilerLogPriority::Error,
                        "reconciler_stream_error kind={:?} err={}",
                        kind,
                        error
                    );
                    continue;
                }
            };

            for raw in &logs {
                if self.subscriptions[index].handle.is_cancelled() {
                    log!(
                        ReconcilerLogPriority::Info,
                        "reconciler_batch_abandoned kind={:?} reason=unsubscribed",
                        kind
                    );
                    break;
                }
                match self.apply_raw(kind, raw) {
                    Ok(_) => report.applied += 1,
                    Err(_) => report.malformed += 1,
                }
            }
        }

        self.prune_cancelled();
        report
    }

    /// Normalizes and applies a single raw log. Malformed logs are counted,
    /// logged and returned as errors; the ledger is not touched.
    pub fn apply_raw(
        &mut self,
        kind: EventKind,
        raw: &RawEventLog,
    ) -> Result<UpsertOutcome, NormalizeError> {
        let normalized = match kind {
            EventKind::Invoked => normalize_invoked(raw).map(|record| self.apply_invoked(&record)),
            EventKind::Confirmed => {
                normalize_confirmed(raw).map(|record| self.apply_confirmed(&record))
            }
        };
        if let Err(error) = &normalized {
            self.stats.malformed_dropped = self.stats.malformed_dropped.saturating_add(1);
            log!(
                ReconcilerLogPriority::Error,
                "reconciler_malformed_dropped kind={:?} tx={:?} err={}",
                kind,
                raw.transaction_hash,
                error
            );
        }
        normalized
    }

    pub fn apply_invoked(&mut self, record: &InvokedRecord) -> UpsertOutcome {
        self.stats.invoked_seen = self.stats.invoked_seen.saturating_add(1);
        let outcome = self
            .ledger
            .borrow_mut()
            .upsert(record.to_candidate(), current_time_ns());
        self.record_outcome(EventKind::Invoked, &outcome);

        self.sink.notify(NotifyEvent::Invoked {
            agent_id: Some(record.agent_id),
            caller: Some(record.caller),
        });
        outcome
    }

    pub fn apply_confirmed(&mut self, record: &ConfirmedRecord) -> UpsertOutcome {
        self.stats.confirmed_seen = self.stats.confirmed_seen.saturating_add(1);
        let outcome = self
            .ledger
            .borrow_mut()
            .upsert(record.to_candidate(), current_time_ns());
        self.record_outcome(EventKind::Confirmed, &outcome);

        let agent_id = record.agent_id.or_else(|| {
            self.ledger
                .borrow()
                .get(&outcome.key())
                .and_then(|entry| entry.agent_id)
        });
        self.sink.notify(NotifyEvent::Confirmed {
            agent_id,
            success: record.success,
        });
        outcome
    }

    fn record_outcome(&mut self, kind: EventKind, outcome: &UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted { key, evicted } => {
                self.stats.inserted = self.stats.inserted.saturating_add(1);
                if evicted.is_some() {
                    self.stats.evicted = self.stats.evicted.saturating_add(1);
                }
                log!(
                    ReconcilerLogPriority::Info,
                    "reconciler_insert kind={:?} key={} evicted={:?}",
                    kind,
                    key,
                    evicted.map(|victim| victim.to_string())
                );
            }
            UpsertOutcome::Merged { key, effect } => {
                self.stats.merged = self.stats.merged.saturating_add(1);
                if effect.is_noop() {
                    self.stats.noop_merges = self.stats.noop_merges.saturating_add(1);
                }
                if effect.conflict_ignored() {
                    self.stats.conflicts_ignored = self.stats.conflicts_ignored.saturating_add(1);
                    log!(
                        ReconcilerLogPriority::Error,
                        "reconciler_conflict_ignored key={} effect={:?}",
                        key,
                        effect.status
                    );
                }
            }
        }
    }

    fn prune_cancelled(&mut self) {
        let before = self.subscriptions.len();
        self.subscriptions
            .retain(|subscription| !subscription.handle.is_cancelled());
        let dropped = before - self.subscriptions.len();
        if dropped > 0 {
            log!(
                ReconcilerLogPriority::Info,
                "reconciler_unsubscribed count={} remaining={}",
                dropped,
                self.subscriptions.len()
            );
        }
    }
}
