use crate::domain::errors::RetryError;
use crate::domain::types::{CorrelationId, NotifyEvent, ReceiptStatus, RetryOutcome};
use crate::features::submitter::ConfirmationSubmitter;
use crate::notify::NotificationSink;
use crate::storage::ledger::InvocationLedger;
use crate::timing::current_time_ns;
use canlog::{log, GetLogFilter, LogFilter, LogPriorityLevels};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, LogPriorityLevels)]
enum RetryLogPriority {
    #[log_level(capacity = 1000, name = "RETRY_INFO")]
    Info,
    #[log_level(capacity = 500, name = "RETRY_ERROR")]
    Error,
}

impl GetLogFilter for RetryLogPriority {
    fn get_log_filter() -> LogFilter {
        LogFilter::ShowAll
    }
}

const ABANDONED: &str = "retry abandoned before its receipt was handled";

fn id_hex(correlation_id: &CorrelationId) -> String {
    format!("0x{}", hex::encode(correlation_id.as_slice()))
}

/// Re-issues the confirmation step for a stalled invocation.
///
/// Only the entry's `retry` sub-state is written here. `status` still moves
/// exclusively through confirmations arriving on the event stream. The set of
/// correlation ids with a retry outstanding is kept here rather than on the
/// entry, so it survives the entry being evicted and re-created.
pub struct RetryController {
    ledger: Rc<RefCell<InvocationLedger>>,
    sink: Rc<dyn NotificationSink>,
    submitter: Rc<dyn ConfirmationSubmitter>,
    in_flight: RefCell<HashSet<CorrelationId>>,
}

/// Held for the lifetime of one `retry` call. Dropping it releases the id;
/// dropping it unsettled (the caller discarded the future) marks the attempt
/// failed so the entry does not stay `InFlight`.
struct InFlightClaim<'a> {
    controller: &'a RetryController,
    correlation_id: CorrelationId,
    attempt: u32,
    settled: bool,
}

impl InFlightClaim<'_> {
    fn settle(&mut self, outcome: Result<(), String>) -> bool {
        self.settled = true;
        self.controller.ledger.borrow_mut().finish_retry(
            &self.correlation_id,
            self.attempt,
            outcome,
            current_time_ns(),
        )
    }
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.controller
            .in_flight
            .borrow_mut()
            .remove(&self.correlation_id);
        if self.settled {
            return;
        }
        let recorded = match self.controller.ledger.try_borrow_mut() {
            Ok(mut ledger) => ledger.finish_retry(
                &self.correlation_id,
                self.attempt,
                Err(ABANDONED.to_string()),
                current_time_ns(),
            ),
            Err(_) => false,
        };
        log!(
            RetryLogPriority::Info,
            "retry_abandoned id={} attempt={} recorded={}",
            id_hex(&self.correlation_id),
            self.attempt,
            recorded
        );
    }
}

impl RetryController {
    pub fn new(
        ledger: Rc<RefCell<InvocationLedger>>,
        sink: Rc<dyn NotificationSink>,
        submitter: Rc<dyn ConfirmationSubmitter>,
    ) -> Self {
        Self {
            ledger,
            sink,
            submitter,
            in_flight: RefCell::new(HashSet::new()),
        }
    }

    pub fn is_in_flight(&self, correlation_id: &CorrelationId) -> bool {
        self.in_flight.borrow().contains(correlation_id)
    }

    /// Caller errors (`InvalidState`, `AlreadyInFlight`) return before any
    /// state change or notification. Environment errors are recorded on the
    /// entry and notified before being returned.
    pub async fn retry(&self, correlation_id: CorrelationId) -> Result<RetryOutcome, RetryError> {
        if self.is_in_flight(&correlation_id) {
            return Err(RetryError::AlreadyInFlight { correlation_id });
        }
        let attempt = self
            .ledger
            .borrow_mut()
            .begin_retry(&correlation_id, current_time_ns())?;
        self.in_flight.borrow_mut().insert(correlation_id);
        let mut claim = InFlightClaim {
            controller: self,
            correlation_id,
            attempt,
            settled: false,
        };
        log!(
            RetryLogPriority::Info,
            "retry_begin id={} attempt={}",
            id_hex(&correlation_id),
            attempt
        );

        let submitted = match self.submitter.submit_confirmation(&correlation_id).await {
            Ok(submitted) => submitted,
            Err(error) => {
                return Err(self.fail(&mut claim, RetryError::Submission(error)));
            }
        };
        log!(
            RetryLogPriority::Info,
            "retry_submitted id={} attempt={} tx=0x{}",
            id_hex(&correlation_id),
            attempt,
            hex::encode(submitted.tx_hash.as_slice())
        );
        self.sink.notify(NotifyEvent::RetrySubmitted {
            correlation_id,
            tx_hash: submitted.tx_hash,
        });

        let receipt = match self.submitter.wait_for_receipt(&submitted.tx_hash).await {
            Ok(receipt) => receipt,
            Err(error) => {
                return Err(self.fail(&mut claim, RetryError::ReceiptFailure(error)));
            }
        };
        if receipt.status == ReceiptStatus::Reverted {
            let error = format!(
                "transaction 0x{} reverted",
                hex::encode(receipt.tx_hash.as_slice())
            );
            return Err(self.fail(&mut claim, RetryError::ReceiptFailure(error)));
        }

        if !claim.settle(Ok(())) {
            log!(
                RetryLogPriority::Info,
                "retry_outcome_discarded id={} attempt={} reason=evicted",
                id_hex(&correlation_id),
                attempt
            );
        }
        log!(
            RetryLogPriority::Info,
            "retry_confirmed id={} attempt={} tx=0x{}",
            id_hex(&correlation_id),
            attempt,
            hex::encode(receipt.tx_hash.as_slice())
        );
        self.sink.notify(NotifyEvent::RetryConfirmed {
            correlation_id,
            tx_hash: receipt.tx_hash,
        });

        Ok(RetryOutcome {
            correlation_id,
            attempt,
            tx_hash: receipt.tx_hash,
        })
    }

    fn fail(&self, claim: &mut InFlightClaim<'_>, error: RetryError) -> RetryError {
        let message = error.to_string();
        let recorded = claim.settle(Err(message.clone()));
        log!(
            RetryLogPriority::Error,
            "retry_failed id={} attempt={} recorded={} err={}",
            id_hex(&claim.correlation_id),
            claim.attempt,
            recorded,
            message
        );
        self.sink.notify(NotifyEvent::RetryError {
            correlation_id: claim.correlation_id,
            error: message,
        });
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::InvalidStateReason;
    use crate::domain::types::{InvocationStatus, NotificationClass, RetryPhase};
    use crate::features::submitter::MockConfirmationSubmitter;
    use crate::test_support::{
        block_on_with_spin, confirmed, corr, invoked, poll_once, tx, RecordingSink,
    };
    use std::pin::pin;

    struct Harness {
        ledger: Rc<RefCell<InvocationLedger>>,
        sink: Rc<RecordingSink>,
        submitter: MockConfirmationSubmitter,
        controller: RetryController,
    }

    fn harness() -> Harness {
        let ledger = Rc::new(RefCell::new(InvocationLedger::new(10)));
        let sink = Rc::new(RecordingSink::default());
        let submitter = MockConfirmationSubmitter::new();
        let controller = RetryController::new(
            ledger.clone(),
            sink.clone(),
            Rc::new(submitter.clone()),
        );
        Harness {
            ledger,
            sink,
            submitter,
            controller,
        }
    }

    fn classes(sink: &RecordingSink) -> Vec<NotificationClass> {
        sink.notifications()
            .into_iter()
            .map(|note| note.class)
            .collect()
    }

    #[test]
    fn pending_retry_goes_idle_in_flight_succeeded() {
        let h = harness();
        h.ledger
            .borrow_mut()
            .upsert(invoked(0xc0, 2, 10, 0x01).to_candidate(), 1);
        assert_eq!(
            h.ledger
                .borrow()
                .get_by_correlation(&corr(0xc0))
                .map(|entry| entry.retry.phase),
            Some(RetryPhase::Idle)
        );

        let outcome = block_on_with_spin(h.controller.retry(corr(0xc0)))
            .expect("retry against the mock should succeed");
        assert_eq!(outcome.attempt, 1);

        let ledger = h.ledger.borrow();
        let entry = ledger.get_by_correlation(&corr(0xc0)).expect("entry");
        assert_eq!(entry.retry.phase, RetryPhase::Succeeded);
        assert_eq!(entry.retry.attempt, 1);
        assert_eq!(entry.status, InvocationStatus::Pending);
        assert_eq!(
            classes(&h.sink),
            vec![NotificationClass::Informational, NotificationClass::Positive]
        );
        assert_eq!(h.submitter.submitted(), vec![corr(0xc0)]);
    }

    #[test]
    fn terminal_or_unknown_entries_are_invalid_state() {
        let h = harness();
        h.ledger
            .borrow_mut()
            .upsert(confirmed(0xc1, true, 0x02).to_candidate(), 1);

        let terminal = block_on_with_spin(h.controller.retry(corr(0xc1)));
        assert_eq!(
            terminal,
            Err(RetryError::InvalidState {
                correlation_id: corr(0xc1),
                reason: InvalidStateReason::AlreadyTerminal(InvocationStatus::Succeeded),
            })
        );
        let unknown = block_on_with_spin(h.controller.retry(corr(0xff)));
        assert!(matches!(
            unknown,
            Err(RetryError::InvalidState {
                reason: InvalidStateReason::NotTracked,
                ..
            })
        ));
        assert!(h.sink.events.borrow().is_empty());
        assert!(h.submitter.submitted().is_empty());
    }

    #[test]
    fn second_retry_while_in_flight_is_rejected() {
        let h = harness();
        h.ledger
            .borrow_mut()
            .upsert(invoked(0xc2, 2, 10, 0x01).to_candidate(), 1);
        h.submitter.hold_receipts();

        let mut first = pin!(h.controller.retry(corr(0xc2)));
        assert!(poll_once(first.as_mut()).is_pending());
        assert_eq!(
            h.ledger
                .borrow()
                .get_by_correlation(&corr(0xc2))
                .map(|entry| entry.retry.phase),
            Some(RetryPhase::InFlight)
        );

        let second = block_on_with_spin(h.controller.retry(corr(0xc2)));
        assert_eq!(
            second,
            Err(RetryError::AlreadyInFlight {
                correlation_id: corr(0xc2)
            })
        );
        assert_eq!(h.submitter.submitted().len(), 1);

        h.submitter.release_receipts();
        let outcome = block_on_with_spin(first);
        assert!(outcome.is_ok());
    }

    #[test]
    fn submission_rejection_is_recorded_and_notified() {
        let h = harness();
        h.ledger
            .borrow_mut()
            .upsert(invoked(0xc3, 2, 10, 0x01).to_candidate(), 1);
        h.submitter
            .push_submission(Err("User rejected the request.".to_string()));

        let result = block_on_with_spin(h.controller.retry(corr(0xc3)));
        assert_eq!(
            result,
            Err(RetryError::Submission("User rejected the request.".to_string()))
        );

        let ledger = h.ledger.borrow();
        let entry = ledger.get_by_correlation(&corr(0xc3)).expect("entry");
        assert_eq!(entry.retry.phase, RetryPhase::Failed);
        assert!(entry
            .retry
            .last_error
            .as_deref()
            .is_some_and(|error| error.contains("User rejected")));
        assert_eq!(entry.status, InvocationStatus::Pending);
        assert_eq!(classes(&h.sink), vec![NotificationClass::Error]);
    }

    #[test]
    fn reverted_receipt_is_a_receipt_failure_and_retry_can_be_reissued() {
        let h = harness();
        h.ledger
            .borrow_mut()
            .upsert(invoked(0xc4, 2, 10, 0x01).to_candidate(), 1);
        h.submitter.push_submission(Ok(tx(0x44)));
        h.submitter.push_receipt(Ok(ReceiptStatus::Reverted));

        let result = block_on_with_spin(h.controller.retry(corr(0xc4)));
        assert!(matches!(result, Err(RetryError::ReceiptFailure(_))));
        assert_eq!(
            classes(&h.sink),
            vec![NotificationClass::Informational, NotificationClass::Error]
        );

        let outcome = block_on_with_spin(h.controller.retry(corr(0xc4)))
            .expect("an explicit second retry is allowed after failure");
        assert_eq!(outcome.attempt, 2);
    }

    #[test]
    fn confirmation_during_retry_wins_and_retry_still_settles() {
        let h = harness();
        h.ledger
            .borrow_mut()
            .upsert(invoked(0xc5, 2, 10, 0x01).to_candidate(), 1);
        h.submitter.hold_receipts();

        let mut retry = pin!(h.controller.retry(corr(0xc5)));
        assert!(poll_once(retry.as_mut()).is_pending());

        h.ledger
            .borrow_mut()
            .upsert(confirmed(0xc5, false, 0x02).to_candidate(), 2);
        h.submitter.release_receipts();
        block_on_with_spin(retry).expect("retry transaction still settles");

        let ledger = h.ledger.borrow();
        let entry = ledger.get_by_correlation(&corr(0xc5)).expect("entry");
        assert_eq!(entry.status, InvocationStatus::Failed);
        assert_eq!(entry.retry.phase, RetryPhase::Succeeded);
    }

    #[test]
    fn eviction_during_retry_discards_the_outcome() {
        let ledger = Rc::new(RefCell::new(InvocationLedger::new(1)));
        let sink = Rc::new(RecordingSink::default());
        let submitter = MockConfirmationSubmitter::new();
        let controller =
            RetryController::new(ledger.clone(), sink.clone(), Rc::new(submitter.clone()));
        ledger
            .borrow_mut()
            .upsert(invoked(0xc6, 2, 10, 0x01).to_candidate(), 1);
        submitter.hold_receipts();

        let mut retry = pin!(controller.retry(corr(0xc6)));
        assert!(poll_once(retry.as_mut()).is_pending());
        ledger
            .borrow_mut()
            .upsert(invoked(0xc7, 2, 10, 0x02).to_candidate(), 2);
        assert!(ledger.borrow().get_by_correlation(&corr(0xc6)).is_none());

        submitter.release_receipts();
        assert!(block_on_with_spin(retry).is_ok());
        assert_eq!(ledger.borrow().len(), 1);
    }

    #[test]
    fn recreated_entry_cannot_start_a_parallel_retry() {
        let ledger = Rc::new(RefCell::new(InvocationLedger::new(1)));
        let sink = Rc::new(RecordingSink::default());
        let submitter = MockConfirmationSubmitter::new();
        let controller =
            RetryController::new(ledger.clone(), sink.clone(), Rc::new(submitter.clone()));
        ledger
            .borrow_mut()
            .upsert(invoked(0xc8, 2, 10, 0x01).to_candidate(), 1);
        submitter.hold_receipts();

        let mut first = pin!(controller.retry(corr(0xc8)));
        assert!(poll_once(first.as_mut()).is_pending());

        // evicted by a newer invocation, then re-created by a redelivery
        ledger
            .borrow_mut()
            .upsert(invoked(0xc9, 2, 10, 0x02).to_candidate(), 2);
        ledger
            .borrow_mut()
            .upsert(invoked(0xc8, 2, 10, 0x01).to_candidate(), 3);
        assert!(controller.is_in_flight(&corr(0xc8)));

        let second = block_on_with_spin(controller.retry(corr(0xc8)));
        assert_eq!(
            second,
            Err(RetryError::AlreadyInFlight {
                correlation_id: corr(0xc8)
            })
        );
        assert_eq!(submitter.submitted(), vec![corr(0xc8)]);

        submitter.release_receipts();
        assert!(block_on_with_spin(first).is_ok());
        assert!(!controller.is_in_flight(&corr(0xc8)));
        {
            let ledger = ledger.borrow();
            let entry = ledger.get_by_correlation(&corr(0xc8)).expect("re-created entry");
            assert_eq!(entry.retry.phase, RetryPhase::Idle);
            assert_eq!(entry.retry.attempt, 0);
        }

        let outcome = block_on_with_spin(controller.retry(corr(0xc8)))
            .expect("re-created entry retries once the first retry settled");
        assert_eq!(outcome.attempt, 1);
    }

    #[test]
    fn dropped_retry_releases_the_entry() {
        let h = harness();
        h.ledger
            .borrow_mut()
            .upsert(invoked(0xca, 2, 10, 0x01).to_candidate(), 1);
        h.submitter.hold_receipts();

        {
            let mut abandoned = pin!(h.controller.retry(corr(0xca)));
            assert!(poll_once(abandoned.as_mut()).is_pending());
            assert!(h.controller.is_in_flight(&corr(0xca)));
        }
        assert!(!h.controller.is_in_flight(&corr(0xca)));
        {
            let ledger = h.ledger.borrow();
            let entry = ledger.get_by_correlation(&corr(0xca)).expect("entry");
            assert_eq!(entry.retry.phase, RetryPhase::Failed);
            assert_eq!(entry.retry.last_error.as_deref(), Some(ABANDONED));
            assert_eq!(entry.status, InvocationStatus::Pending);
        }

        h.submitter.release_receipts();
        let outcome = block_on_with_spin(h.controller.retry(corr(0xca)))
            .expect("abandoned retry does not block the next one");
        assert_eq!(outcome.attempt, 2);
        assert_eq!(h.submitter.submitted(), vec![corr(0xca), corr(0xca)]);
    }
}
