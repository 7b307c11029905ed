#![allow(dead_code)]

use agentfi_dashboard::RawEventLog;
use serde_json::json;
use std::future::Future;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

pub const CALLER: &str = "0x1111111111111111111111111111111111111111";
pub const MANAGER: &str = "0x2222222222222222222222222222222222222222";

pub fn hex32(byte: u8) -> String {
    format!("0x{}", hex::encode([byte; 32]))
}

pub fn agent_invoked(corr: u8, agent_id: u64, paid_wei: &str, tx: u8) -> RawEventLog {
    RawEventLog {
        event_name: Some("AgentInvoked".to_string()),
        topics: Vec::new(),
        transaction_hash: Some(hex32(tx)),
        args: json!({
            "invocationId": hex32(corr),
            "agentId": agent_id,
            "caller": CALLER,
            "value": paid_wei,
        }),
    }
}

pub fn result_confirmed(corr: u8, success: bool, tx: u8) -> RawEventLog {
    RawEventLog {
        event_name: Some("ResultConfirmed".to_string()),
        topics: Vec::new(),
        transaction_hash: Some(hex32(tx)),
        args: json!({
            "invocationId": hex32(corr),
            "success": success,
            "resultURI": format!("ipfs://result-{corr}"),
        }),
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

pub fn block_on_with_spin<F: Future>(future: F) -> F::Output {
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

pub fn poll_once<F: Future + ?Sized>(future: std::pin::Pin<&mut F>) -> Poll<F::Output> {
    let waker = noop_waker();
    let mut context = Context::from_waker(&waker);
    future.poll(&mut context)
}
