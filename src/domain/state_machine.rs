use crate::domain::types::{InvocationStatus, RetryPhase};

/// Result of offering a candidate status to an existing entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusTransition {
    Unchanged,
    Advanced(InvocationStatus),
    /// A different terminal status arrived after the first one; it is dropped.
    ConflictIgnored {
        kept: InvocationStatus,
        offered: InvocationStatus,
    },
}

/// Monotonic status guard: only `Pending -> Succeeded|Failed`, first terminal wins.
pub fn transition_status(
    current: InvocationStatus,
    offered: InvocationStatus,
) -> StatusTransition {
    match (current, offered) {
        (InvocationStatus::Pending, InvocationStatus::Pending) => StatusTransition::Unchanged,
        (InvocationStatus::Pending, terminal) => StatusTransition::Advanced(terminal),
        (_, InvocationStatus::Pending) => StatusTransition::Unchanged,
        (kept, offered) if kept == offered => StatusTransition::Unchanged,
        (kept, offered) => StatusTransition::ConflictIgnored { kept, offered },
    }
}

/// Retry phases a new `retry()` call may start from.
pub fn can_begin_retry(phase: RetryPhase) -> bool {
    match phase {
        RetryPhase::Idle | RetryPhase::Succeeded | RetryPhase::Failed => true,
        RetryPhase::InFlight => false,
    }
}
