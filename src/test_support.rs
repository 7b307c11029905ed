use crate::domain::types::{
    ConfirmedRecord, CorrelationId, InvokedRecord, Notification, NotifyEvent, TxHash,
};
use crate::notify::{classify, NotificationSink};
use crate::timing::DEFAULT_TOAST_TTL_MS;
use alloy_primitives::{Address, B256, U256};
use std::cell::RefCell;
use std::future::Future;
use std::sync::{Mutex, OnceLock};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

pub(crate) fn corr(byte: u8) -> CorrelationId {
    B256::repeat_byte(byte)
}

pub(crate) fn tx(byte: u8) -> TxHash {
    B256::repeat_byte(byte)
}

pub(crate) fn invoked(corr_byte: u8, agent_id: u64, paid: u64, tx_byte: u8) -> InvokedRecord {
    InvokedRecord {
        correlation_id: Some(corr(corr_byte)),
        agent_id,
        caller: Address::repeat_byte(0x11),
        paid_amount: U256::from(paid),
        tx_hash: tx(tx_byte),
    }
}

pub(crate) fn confirmed(corr_byte: u8, success: bool, tx_byte: u8) -> ConfirmedRecord {
    ConfirmedRecord {
        correlation_id: corr(corr_byte),
        agent_id: None,
        success,
        result_reference: Some("ipfs://result".to_string()),
        tx_hash: tx(tx_byte),
    }
}

/// Sink that keeps every event and its classification for assertions.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub events: RefCell<Vec<NotifyEvent>>,
}

impl RecordingSink {
    pub fn notifications(&self) -> Vec<Notification> {
        self.events
            .borrow()
            .iter()
            .map(|event| classify(event, DEFAULT_TOAST_TTL_MS))
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, event: NotifyEvent) {
        self.events.borrow_mut().push(event);
    }
}

fn noop_waker() -> Waker {
    unsafe fn clone(_ptr: *const ()) -> RawWaker {
        dummy_raw_waker()
    }
    unsafe fn wake(_ptr: *const ()) {}
    unsafe fn wake_by_ref(_ptr: *const ()) {}
    unsafe fn drop(_ptr: *const ()) {}

    fn dummy_raw_waker() -> RawWaker {
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }

    unsafe { Waker::from_raw(dummy_raw_waker()) }
}

pub(crate) fn block_on_with_spin<F: Future>(future: F) -> F::Output {
    let waker = noop_waker();
    let mut context = Context::from_waker(&waker);
    let mut future = Box::pin(future);

    for _ in 0..10_000 {
        match future.as_mut().poll(&mut context) {
            Poll::Ready(output) => return output,
            Poll::Pending => std::hint::spin_loop(),
        }
    }

    panic!("future did not complete in test polling loop");
}

/// Polls a pinned future once; used to park a retry at its suspension point.
pub(crate) fn poll_once<F: Future + ?Sized>(future: std::pin::Pin<&mut F>) -> Poll<F::Output> {
    let waker = noop_waker();
    let mut context = Context::from_waker(&waker);
    future.poll(&mut context)
}

/// Runs `f` with temporary environment variable overrides under a global
/// process-wide lock to avoid cross-test races.
pub(crate) fn with_locked_host_env<T>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> T) -> T {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .expect("host env lock should not be poisoned");

    let previous = vars
        .iter()
        .map(|(name, _)| ((*name).to_string(), std::env::var(name).ok()))
        .collect::<Vec<_>>();

    for (name, value) in vars {
        match value {
            Some(v) => {
                #[allow(unused_unsafe)]
                unsafe {
                    std::env::set_var(name, v);
                }
            }
            None => {
                #[allow(unused_unsafe)]
                unsafe {
                    std::env::remove_var(name);
                }
            }
        }
    }

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

    for (name, value) in previous {
        match value {
            Some(v) => {
                #[allow(unused_unsafe)]
                unsafe {
                    std::env::set_var(name, v);
                }
            }
            None => {
                #[allow(unused_unsafe)]
                unsafe {
                    std::env::remove_var(name);
                }
            }
        }
    }

    match result {
        Ok(output) => output,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}
