use crate::domain::types::{
    ConfirmationReceipt, CorrelationId, ReceiptStatus, SubmittedConfirmation, TxHash,
};
use alloy_primitives::keccak256;
use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::poll_fn;
use std::rc::Rc;
use std::task::Poll;

/// Call-submission collaborator used to re-issue a confirmation on chain.
#[async_trait(?Send)]
pub trait ConfirmationSubmitter {
    async fn submit_confirmation(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<SubmittedConfirmation, String>;

    async fn wait_for_receipt(&self, tx_hash: &TxHash) -> Result<ConfirmationReceipt, String>;
}

#[derive(Default)]
struct MockScript {
    submissions: VecDeque<Result<TxHash, String>>,
    receipts: VecDeque<Result<ReceiptStatus, String>>,
    submitted: Vec<CorrelationId>,
    awaited: Vec<TxHash>,
}

/// Scripted submitter. Unscripted submissions succeed with a hash derived from
/// the correlation id and unscripted receipts report `Success`. Receipts can be
/// held back so a caller stays suspended at the receipt wait.
#[derive(Clone, Default)]
pub struct MockConfirmationSubmitter {
    script: Rc<RefCell<MockScript>>,
    hold_receipts: Rc<Cell<bool>>,
}

impl MockConfirmationSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_submission(&self, result: Result<TxHash, String>) {
        self.script.borrow_mut().submissions.push_back(result);
    }

    pub fn push_receipt(&self, result: Result<ReceiptStatus, String>) {
        self.script.borrow_mut().receipts.push_back(result);
    }

    pub fn hold_receipts(&self) {
        self.hold_receipts.set(true);
    }

    pub fn release_receipts(&self) {
        self.hold_receipts.set(false);
    }

    pub fn submitted(&self) -> Vec<CorrelationId> {
        self.script.borrow().submitted.clone()
    }

    pub fn awaited(&self) -> Vec<TxHash> {
        self.script.borrow().awaited.clone()
    }
}

#[async_trait(?Send)]
impl ConfirmationSubmitter for MockConfirmationSubmitter {
    async fn submit_confirmation(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<SubmittedConfirmation, String> {
        let scripted = {
            let mut script = self.script.borrow_mut();
            script.submitted.push(*correlation_id);
            script.submissions.pop_front()
        };
        let tx_hash = scripted.unwrap_or_else(|| Ok(keccak256(correlation_id.as_slice())))?;
        Ok(SubmittedConfirmation { tx_hash })
    }

    async fn wait_for_receipt(&self, tx_hash: &TxHash) -> Result<ConfirmationReceipt, String> {
        self.script.borrow_mut().awaited.push(*tx_hash);
        let hold = Rc::clone(&self.hold_receipts);
        poll_fn(move |_| {
            if hold.get() {
                Poll::Pending
            } else {
                Poll::Ready(())
            }
        })
        .await;

        let scripted = self.script.borrow_mut().receipts.pop_front();
        let status = scripted.unwrap_or(Ok(ReceiptStatus::Success))?;
        Ok(ConfirmationReceipt {
            status,
            tx_hash: *tx_hash,
        })
    }
}
