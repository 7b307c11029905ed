pub mod event_source;
pub mod normalize;
pub mod submitter;

pub use event_source::{
    EventSource, EventStream, MockEventSource, SubscriptionFilter, SubscriptionHandle,
};
pub use normalize::{normalize_confirmed, normalize_invoked};
pub use submitter::{ConfirmationSubmitter, MockConfirmationSubmitter};
