use crate::domain::types::{EventKind, RawEventLog};
use alloy_primitives::Address;
use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Chain-side narrowing applied by the source. Agent scoping never goes here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub contract: Option<Address>,
}

/// Cancellation flag shared between a subscription and whoever tears it down.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionHandle {
    cancelled: Rc<Cell<bool>>,
}

impl SubscriptionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unsubscribe(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

#[async_trait(?Send)]
pub trait EventStream {
    /// Next batch of raw logs; empty when nothing new has been observed.
    async fn next_batch(&mut self) -> Result<Vec<RawEventLog>, String>;
}

pub trait EventSource {
    fn subscribe(
        &self,
        kind: EventKind,
        filter: &SubscriptionFilter,
    ) -> Result<Box<dyn EventStream>, String>;
}

#[derive(Default)]
struct MockQueues {
    invoked: VecDeque<Result<Vec<RawEventLog>, String>>,
    confirmed: VecDeque<Result<Vec<RawEventLog>, String>>,
    subscriptions: Vec<(EventKind, SubscriptionFilter)>,
}

impl MockQueues {
    fn queue_mut(&mut self, kind: EventKind) -> &mut VecDeque<Result<Vec<RawEventLog>, String>> {
        match kind {
            EventKind::Invoked => &mut self.invoked,
            EventKind::Confirmed => &mut self.confirmed,
        }
    }
}

/// Queue-backed source; clones share the same queues so a test or host can
/// keep feeding batches after handing the source to a reconciler.
#[derive(Clone, Default)]
pub struct MockEventSource {
    queues: Rc<RefCell<MockQueues>>,
}

impl MockEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, kind: EventKind, logs: Vec<RawEventLog>) {
        self.queues.borrow_mut().queue_mut(kind).push_back(Ok(logs));
    }

    pub fn push_error(&self, kind: EventKind, error: impl Into<String>) {
        self.queues
            .borrow_mut()
            .queue_mut(kind)
            .push_back(Err(error.into()));
    }

    pub fn pending_batches(&self, kind: EventKind) -> usize {
        self.queues.borrow_mut().queue_mut(kind).len()
    }

    pub fn subscriptions(&self) -> Vec<(EventKind, SubscriptionFilter)> {
        self.queues.borrow().subscriptions.clone()
    }
}

impl EventSource for MockEventSource {
    fn subscribe(
        &self,
        kind: EventKind,
        filter: &SubscriptionFilter,
    ) -> Result<Box<dyn EventStream>, String> {
        self.queues.borrow_mut().subscriptions.push((kind, *filter));
        Ok(Box::new(MockEventStream {
            kind,
            queues: Rc::clone(&self.queues),
        }))
    }
}

struct MockEventStream {
    kind: EventKind,
    queues: Rc<RefCell<MockQueues>>,
}

#[async_trait(?Send)]
impl EventStream for MockEventStream {
    async fn next_batch(&mut self) -> Result<Vec<RawEventLog>, String> {
        let next = self.queues.borrow_mut().queue_mut(self.kind).pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::block_on_with_spin;

    fn named(name: &str) -> RawEventLog {
        RawEventLog {
            event_name: Some(name.to_string()),
            ..RawEventLog::default()
        }
    }

    #[test]
    fn mock_streams_drain_their_own_queue_in_order() {
        let source = MockEventSource::new();
        let filter = SubscriptionFilter {
            contract: Some(Address::repeat_byte(0x22)),
        };
        let mut invoked = source
            .subscribe(EventKind::Invoked, &filter)
            .expect("mock subscribe should succeed");
        let mut confirmed = source
            .subscribe(EventKind::Confirmed, &filter)
            .expect("mock subscribe should succeed");

        source.push_batch(EventKind::Invoked, vec![named("first")]);
        source.push_error(EventKind::Invoked, "rpc timeout");
        source.push_batch(EventKind::Invoked, vec![named("second")]);

        let first = block_on_with_spin(invoked.next_batch()).expect("first batch");
        assert_eq!(first, vec![named("first")]);
        assert_eq!(
            block_on_with_spin(invoked.next_batch()),
            Err("rpc timeout".to_string())
        );
        assert_eq!(
            block_on_with_spin(confirmed.next_batch()),
            Ok(Vec::new()),
            "confirmed stream must not see invoked batches"
        );
        assert_eq!(source.pending_batches(EventKind::Invoked), 1);
        assert_eq!(
            source.subscriptions(),
            vec![(EventKind::Invoked, filter), (EventKind::Confirmed, filter)]
        );
    }

    #[test]
    fn subscription_handle_clones_share_cancellation() {
        let handle = SubscriptionHandle::new();
        let observer = handle.clone();
        assert!(!observer.is_cancelled());
        handle.unsubscribe();
        assert!(observer.is_cancelled());
    }
}
