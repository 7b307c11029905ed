use crate::domain::types::{
    InvocationRow, InvocationStatus, ProjectionSummary, ProjectionView, RetryPhase,
    TrackedInvocation,
};
use crate::storage::ledger::InvocationLedger;
use crate::timing::{DEFAULT_DISPLAY_LIMIT, DEFAULT_STALL_AFTER_NS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProjectionSettings {
    pub display_limit: usize,
    pub stall_after_ns: u64,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            display_limit: DEFAULT_DISPLAY_LIMIT,
            stall_after_ns: DEFAULT_STALL_AFTER_NS,
        }
    }
}

pub fn is_stalled(entry: &TrackedInvocation, now_ns: u64, stall_after_ns: u64) -> bool {
    entry.status == InvocationStatus::Pending
        && now_ns.saturating_sub(entry.first_seen_at_ns) >= stall_after_ns
}

/// Entries still under a synthetic key have no correlation id to retry by.
pub fn is_retry_eligible(entry: &TrackedInvocation) -> bool {
    entry.status == InvocationStatus::Pending
        && entry.retry.phase != RetryPhase::InFlight
        && entry.correlation_id().is_some()
}

/// Read-only view: rows most-recently-updated first, capped at the display
/// limit. The summary counts the whole filtered set, not just shown rows.
pub fn project(
    ledger: &InvocationLedger,
    agent_filter: Option<u64>,
    settings: &ProjectionSettings,
    now_ns: u64,
) -> ProjectionView {
    let mut summary = ProjectionSummary::default();
    let mut rows = Vec::new();

    for entry in ledger.by_recency() {
        if agent_filter.is_some() && entry.agent_id != agent_filter {
            continue;
        }
        let stalled = is_stalled(entry, now_ns, settings.stall_after_ns);

        summary.total += 1;
        match entry.status {
            InvocationStatus::Pending => summary.pending += 1,
            InvocationStatus::Succeeded => summary.succeeded += 1,
            InvocationStatus::Failed => summary.failed += 1,
        }
        if stalled {
            summary.stalled += 1;
        }
        if entry.retry.phase == RetryPhase::InFlight {
            summary.retrying += 1;
        }

        if rows.len() < settings.display_limit {
            rows.push(InvocationRow {
                invocation: entry.clone(),
                stalled,
                retry_eligible: is_retry_eligible(entry),
            });
        }
    }

    summary.shown = rows.len();
    ProjectionView {
        agent_filter,
        rows,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{confirmed, corr, invoked};

    fn settings(display_limit: usize, stall_after_ns: u64) -> ProjectionSettings {
        ProjectionSettings {
            display_limit,
            stall_after_ns,
        }
    }

    fn seeded() -> InvocationLedger {
        let mut ledger = InvocationLedger::new(10);
        ledger.upsert(invoked(0x01, 7, 1, 0x11).to_candidate(), 100);
        ledger.upsert(invoked(0x02, 8, 1, 0x12).to_candidate(), 200);
        ledger.upsert(invoked(0x03, 7, 1, 0x13).to_candidate(), 300);
        ledger.upsert(confirmed(0x03, true, 0x23).to_candidate(), 400);
        ledger
    }

    #[test]
    fn rows_are_most_recent_first_with_summary() {
        let view = project(&seeded(), None, &settings(50, 1_000), 500);
        let order: Vec<_> = view
            .rows
            .iter()
            .filter_map(|row| row.invocation.correlation_id())
            .collect();
        assert_eq!(order, vec![corr(0x03), corr(0x02), corr(0x01)]);
        assert_eq!(
            view.summary,
            ProjectionSummary {
                total: 3,
                shown: 3,
                pending: 2,
                succeeded: 1,
                failed: 0,
                stalled: 0,
                retrying: 0,
            }
        );
    }

    #[test]
    fn agent_filter_scopes_rows_without_touching_the_ledger() {
        let ledger = seeded();
        let view = project(&ledger, Some(7), &settings(50, 1_000), 500);
        assert_eq!(view.agent_filter, Some(7));
        assert_eq!(view.summary.total, 2);
        assert!(view
            .rows
            .iter()
            .all(|row| row.invocation.agent_id == Some(7)));
        assert_eq!(ledger.len(), 3);

        // a confirmation with no invocation yet has no agent and is unscoped only
        let mut ledger = seeded();
        ledger.upsert(confirmed(0x04, false, 0x24).to_candidate(), 600);
        assert_eq!(project(&ledger, Some(7), &settings(50, 1), 700).summary.total, 2);
        assert_eq!(project(&ledger, None, &settings(50, 1), 700).summary.total, 4);
    }

    #[test]
    fn cap_limits_rows_but_not_summary() {
        let view = project(&seeded(), None, &settings(1, 1_000), 500);
        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.summary.shown, 1);
        assert_eq!(view.summary.total, 3);
    }

    #[test]
    fn stall_flags_follow_first_seen_and_retry_phase() {
        let mut ledger = seeded();
        let view = project(&ledger, None, &settings(50, 250), 400);
        let stalled: Vec<_> = view
            .rows
            .iter()
            .filter(|row| row.stalled)
            .filter_map(|row| row.invocation.correlation_id())
            .collect();
        // 0x01 first seen at 100 is stalled at 400; 0x02 (200) is not yet; 0x03 is terminal
        assert_eq!(stalled, vec![corr(0x01)]);
        assert_eq!(view.summary.stalled, 1);

        ledger.begin_retry(&corr(0x01), 450).expect("pending entry");
        let view = project(&ledger, None, &settings(50, 250), 500);
        let row = view
            .rows
            .iter()
            .find(|row| row.invocation.correlation_id() == Some(corr(0x01)))
            .expect("row");
        assert!(row.stalled);
        assert!(!row.retry_eligible);
        assert_eq!(view.summary.retrying, 1);
    }

    #[test]
    fn synthetic_key_rows_are_not_retry_eligible() {
        let mut ledger = InvocationLedger::new(10);
        let mut idless = invoked(0x05, 9, 1, 0x15);
        idless.correlation_id = None;
        ledger.upsert(idless.to_candidate(), 100);

        let view = project(&ledger, None, &settings(50, 10), 500);
        assert_eq!(view.rows[0].invocation.correlation_id(), None);
        assert!(view.rows[0].stalled);
        assert!(!view.rows[0].retry_eligible);

        // once the correlation id is learned the row becomes retryable
        ledger.upsert(invoked(0x05, 9, 1, 0x15).to_candidate(), 200);
        let view = project(&ledger, None, &settings(50, 10), 500);
        assert_eq!(view.rows.len(), 1);
        assert!(view.rows[0].retry_eligible);
    }

    #[test]
    fn view_serializes_for_rendering() {
        let view = project(&seeded(), Some(8), &settings(50, 1_000), 500);
        let json = serde_json::to_value(&view).expect("view serializes");
        assert_eq!(json["summary"]["total"], 1);
        assert_eq!(json["rows"][0]["invocation"]["agent_id"], 8);
        assert_eq!(json["rows"][0]["retry_eligible"], true);
    }
}
