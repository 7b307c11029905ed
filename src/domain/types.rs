use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier linking an invocation to its eventual confirmation.
pub type CorrelationId = B256;

/// Hash of the transaction that emitted a record.
pub type TxHash = B256;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Invoked,
    Confirmed,
}

impl EventKind {
    pub fn event_name(self) -> &'static str {
        match self {
            EventKind::Invoked => "AgentInvoked",
            EventKind::Confirmed => "ResultConfirmed",
        }
    }
}

/// Ledger identity of a tracked invocation.
///
/// `InvokeTx` is a synthetic key used while an invocation has been observed
/// without its correlation id; it is re-keyed once the id becomes known.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LedgerKey {
    Correlation(CorrelationId),
    InvokeTx(TxHash),
}

impl LedgerKey {
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            LedgerKey::Correlation(id) => Some(*id),
            LedgerKey::InvokeTx(_) => None,
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerKey::Correlation(id) => write!(f, "corr:0x{}", hex::encode(id.as_slice())),
            LedgerKey::InvokeTx(tx) => write!(f, "invoke_tx:0x{}", hex::encode(tx.as_slice())),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvocationStatus {
    Pending,
    Succeeded,
    Failed,
}

impl InvocationStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub const fn from_success(success: bool) -> Self {
        if success {
            Self::Succeeded
        } else {
            Self::Failed
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RetryPhase {
    #[default]
    Idle,
    InFlight,
    Succeeded,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct RetryState {
    pub attempt: u32,
    pub phase: RetryPhase,
    pub last_error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TrackedInvocation {
    pub key: LedgerKey,
    pub agent_id: Option<u64>,
    pub caller: Option<Address>,
    pub paid_amount: Option<U256>,
    pub status: InvocationStatus,
    pub source_tx_invoke: Option<TxHash>,
    pub source_tx_confirm: Option<TxHash>,
    pub result_reference: Option<String>,
    pub first_seen_at_ns: u64,
    pub last_updated_at_ns: u64,
    /// Ledger-wide mutation counter; breaks `last_updated_at_ns` ties.
    pub update_seq: u64,
    pub retry: RetryState,
}

impl TrackedInvocation {
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.key.correlation_id()
    }

    /// Sort key for most-recently-updated-first presentation.
    pub fn recency(&self) -> (u64, u64) {
        (self.last_updated_at_ns, self.update_seq)
    }
}

/// Partial view of an invocation built from a single record, merged into the
/// ledger by `InvocationLedger::upsert`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvocationCandidate {
    pub key: LedgerKey,
    pub agent_id: Option<u64>,
    pub caller: Option<Address>,
    pub paid_amount: Option<U256>,
    pub status: InvocationStatus,
    pub source_tx_invoke: Option<TxHash>,
    pub source_tx_confirm: Option<TxHash>,
    pub result_reference: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct InvokedRecord {
    pub correlation_id: Option<CorrelationId>,
    pub agent_id: u64,
    pub caller: Address,
    pub paid_amount: U256,
    pub tx_hash: TxHash,
}

impl InvokedRecord {
    pub fn to_candidate(&self) -> InvocationCandidate {
        InvocationCandidate {
            key: match self.correlation_id {
                Some(id) => LedgerKey::Correlation(id),
                None => LedgerKey::InvokeTx(self.tx_hash),
            },
            agent_id: Some(self.agent_id),
            caller: Some(self.caller),
            paid_amount: Some(self.paid_amount),
            status: InvocationStatus::Pending,
            source_tx_invoke: Some(self.tx_hash),
            source_tx_confirm: None,
            result_reference: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ConfirmedRecord {
    pub correlation_id: CorrelationId,
    pub agent_id: Option<u64>,
    pub success: bool,
    pub result_reference: Option<String>,
    pub tx_hash: TxHash,
}

impl ConfirmedRecord {
    pub fn to_candidate(&self) -> InvocationCandidate {
        InvocationCandidate {
            key: LedgerKey::Correlation(self.correlation_id),
            agent_id: self.agent_id,
            caller: None,
            paid_amount: None,
            status: InvocationStatus::from_success(self.success),
            source_tx_invoke: None,
            source_tx_confirm: Some(self.tx_hash),
            result_reference: self.result_reference.clone(),
        }
    }
}

/// Decoded-but-untyped contract log as delivered by the event source.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RawEventLog {
    #[serde(default, rename = "eventName")]
    pub event_name: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default, rename = "transactionHash")]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SubmittedConfirmation {
    pub tx_hash: TxHash,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ConfirmationReceipt {
    pub status: ReceiptStatus,
    pub tx_hash: TxHash,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RetryOutcome {
    pub correlation_id: CorrelationId,
    pub attempt: u32,
    pub tx_hash: TxHash,
}

/// Side effect requested from the notification sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotifyEvent {
    Invoked {
        agent_id: Option<u64>,
        caller: Option<Address>,
    },
    Confirmed {
        agent_id: Option<u64>,
        success: bool,
    },
    RetrySubmitted {
        correlation_id: CorrelationId,
        tx_hash: TxHash,
    },
    RetryConfirmed {
        correlation_id: CorrelationId,
        tx_hash: TxHash,
    },
    RetryError {
        correlation_id: CorrelationId,
        error: String,
    },
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NotificationClass {
    Informational,
    Positive,
    Cautionary,
    Error,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub class: NotificationClass,
    pub title: String,
    pub message: String,
    pub ttl_ms: u64,
}

/// Connected account and active chain, supplied by the wallet collaborator.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalletContext {
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct InvocationRow {
    pub invocation: TrackedInvocation,
    pub stalled: bool,
    pub retry_eligible: bool,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectionSummary {
    pub total: usize,
    pub shown: usize,
    pub pending: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub stalled: usize,
    pub retrying: usize,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectionView {
    pub agent_filter: Option<u64>,
    pub rows: Vec<InvocationRow>,
    pub summary: ProjectionSummary,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    pub invoked_seen: u64,
    pub confirmed_seen: u64,
    pub inserted: u64,
    pub merged: u64,
    pub noop_merges: u64,
    pub evicted: u64,
    pub conflicts_ignored: u64,
    pub malformed_dropped: u64,
    pub stream_errors: u64,
}
