//! Notification classification, fan-out, and the transient toast tray.

use crate::domain::types::{Notification, NotificationClass, NotifyEvent};
use crate::sanitize::{display_text, short_hex};
use crate::timing::{current_time_ms, MAX_NOTIFICATION_MESSAGE_CHARS};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Side-effect boundary used by the reconciler and the retry controller.
pub trait NotificationSink {
    fn notify(&self, event: NotifyEvent);
}

fn agent_label(agent_id: Option<u64>) -> String {
    match agent_id {
        Some(id) => format!("Agent #{id}"),
        None => "Agent #?".to_string(),
    }
}

fn hex_label(bytes: &[u8]) -> String {
    short_hex(&format!("0x{}", hex::encode(bytes)))
}

pub fn classify(event: &NotifyEvent, ttl_ms: u64) -> Notification {
    let (class, title, message) = match event {
        NotifyEvent::Invoked { agent_id, caller } => (
            NotificationClass::Informational,
            "Agent Invoked".to_string(),
            match caller {
                Some(caller) => format!(
                    "{} invoked by {}",
                    agent_label(*agent_id),
                    hex_label(caller.as_slice())
                ),
                None => format!("{} invoked", agent_label(*agent_id)),
            },
        ),
        NotifyEvent::Confirmed {
            agent_id,
            success: true,
        } => (
            NotificationClass::Positive,
            "Result succeeded".to_string(),
            format!("{} execution succeeded", agent_label(*agent_id)),
        ),
        NotifyEvent::Confirmed {
            agent_id,
            success: false,
        } => (
            NotificationClass::Cautionary,
            "Result failed".to_string(),
            format!("{} execution failed", agent_label(*agent_id)),
        ),
        NotifyEvent::RetrySubmitted { tx_hash, .. } => (
            NotificationClass::Informational,
            "Retry sent".to_string(),
            format!("Transaction submitted: {}", hex_label(tx_hash.as_slice())),
        ),
        NotifyEvent::RetryConfirmed { correlation_id, .. } => (
            NotificationClass::Positive,
            "Retry confirmed".to_string(),
            format!(
                "Confirmation for {} settled",
                hex_label(correlation_id.as_slice())
            ),
        ),
        NotifyEvent::RetryError { error, .. } => (
            NotificationClass::Error,
            "Retry failed".to_string(),
            display_text(error, MAX_NOTIFICATION_MESSAGE_CHARS),
        ),
    };
    Notification {
        class,
        title,
        message,
        ttl_ms,
    }
}

pub type ToastId = u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toast {
    pub id: ToastId,
    pub notification: Notification,
    consumed_ms: u64,
    /// `None` while paused.
    running_since_ms: Option<u64>,
}

impl Toast {
    pub fn is_paused(&self) -> bool {
        self.running_since_ms.is_none()
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        let running = self
            .running_since_ms
            .map(|since| now_ms.saturating_sub(since))
            .unwrap_or(0);
        self.consumed_ms.saturating_add(running)
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.notification
            .ttl_ms
            .saturating_sub(self.elapsed_ms(now_ms))
    }

    /// Remaining lifetime in percent, for the countdown bar.
    pub fn progress_pct(&self, now_ms: u64) -> u8 {
        let ttl = self.notification.ttl_ms.max(1);
        let remaining = self.remaining_ms(now_ms).min(ttl);
        u8::try_from(remaining.saturating_mul(100) / ttl).unwrap_or(100)
    }
}

/// Concurrently displayed notifications, newest first.
#[derive(Debug)]
pub struct ToastTray {
    max_visible: usize,
    next_id: ToastId,
    toasts: VecDeque<Toast>,
}

impl ToastTray {
    pub fn new(max_visible: usize) -> Self {
        Self {
            max_visible: max_visible.max(1),
            next_id: 0,
            toasts: VecDeque::new(),
        }
    }

    /// Shows a notification; returns its id and the id dropped to make room.
    pub fn push(&mut self, notification: Notification, now_ms: u64) -> (ToastId, Option<ToastId>) {
        self.next_id = self.next_id.saturating_add(1);
        let id = self.next_id;
        self.toasts.push_front(Toast {
            id,
            notification,
            consumed_ms: 0,
            running_since_ms: Some(now_ms),
        });
        let dropped = if self.toasts.len() > self.max_visible {
            self.toasts.pop_back().map(|toast| toast.id)
        } else {
            None
        };
        (id, dropped)
    }

    pub fn visible(&self) -> impl Iterator<Item = &Toast> {
        self.toasts.iter()
    }

    pub fn len(&self) -> usize {
        self.toasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toasts.is_empty()
    }

    pub fn get(&self, id: ToastId) -> Option<&Toast> {
        self.toasts.iter().find(|toast| toast.id == id)
    }

    /// Pointer entered the toast: freeze its countdown.
    pub fn pause(&mut self, id: ToastId, now_ms: u64) -> bool {
        let Some(toast) = self.toasts.iter_mut().find(|toast| toast.id == id) else {
            return false;
        };
        if let Some(since) = toast.running_since_ms.take() {
            toast.consumed_ms = toast
                .consumed_ms
                .saturating_add(now_ms.saturating_sub(since));
        }
        true
    }

    /// Pointer left the toast: continue from the time already consumed.
    pub fn resume(&mut self, id: ToastId, now_ms: u64) -> bool {
        let Some(toast) = self.toasts.iter_mut().find(|toast| toast.id == id) else {
            return false;
        };
        if toast.running_since_ms.is_none() {
            toast.running_since_ms = Some(now_ms);
        }
        true
    }

    pub fn dismiss(&mut self, id: ToastId) -> bool {
        let before = self.toasts.len();
        self.toasts.retain(|toast| toast.id != id);
        self.toasts.len() != before
    }

    /// Drops every toast whose lifetime is used up and returns their ids.
    pub fn tick(&mut self, now_ms: u64) -> Vec<ToastId> {
        let expired: Vec<ToastId> = self
            .toasts
            .iter()
            .filter(|toast| toast.remaining_ms(now_ms) == 0)
            .map(|toast| toast.id)
            .collect();
        self.toasts.retain(|toast| !expired.contains(&toast.id));
        expired
    }
}

pub type HandlerId = u64;

type Handler = Rc<dyn Fn(&Notification)>;

/// Default sink: classifies each event, hands it to `on_notification`
/// subscribers, and shows it in the toast tray.
pub struct NotificationHub {
    ttl_ms: u64,
    handlers: RefCell<Vec<(HandlerId, Handler)>>,
    next_handler_id: Cell<HandlerId>,
    tray: RefCell<ToastTray>,
}

impl NotificationHub {
    pub fn new(ttl_ms: u64, max_visible: usize) -> Self {
        Self {
            ttl_ms,
            handlers: RefCell::new(Vec::new()),
            next_handler_id: Cell::new(0),
            tray: RefCell::new(ToastTray::new(max_visible)),
        }
    }

    pub fn on_notification(&self, handler: impl Fn(&Notification) + 'static) -> HandlerId {
        let id = self.next_handler_id.get().saturating_add(1);
        self.next_handler_id.set(id);
        self.handlers.borrow_mut().push((id, Rc::new(handler)));
        id
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    pub fn tray(&self) -> std::cell::Ref<'_, ToastTray> {
        self.tray.borrow()
    }

    pub fn tray_mut(&self) -> std::cell::RefMut<'_, ToastTray> {
        self.tray.borrow_mut()
    }

    pub fn publish(&self, notification: Notification, now_ms: u64) -> ToastId {
        // snapshot so handlers may register or remove handlers re-entrantly
        let handlers: Vec<Handler> = self
            .handlers
            .borrow()
            .iter()
            .map(|(_, handler)| Rc::clone(handler))
            .collect();
        for handler in handlers {
            handler(&notification);
        }
        let (id, _) = self.tray.borrow_mut().push(notification, now_ms);
        id
    }
}

impl NotificationSink for NotificationHub {
    fn notify(&self, event: NotifyEvent) {
        let notification = classify(&event, self.ttl_ms);
        self.publish(notification, current_time_ms());
    }
}
