pub mod config;
pub mod domain;
pub mod features;
pub mod invoke;
pub mod notify;
pub mod reconciler;
pub mod retry;
pub mod sanitize;
pub mod storage;
pub mod timing;

#[cfg(test)]
mod test_support;

pub use crate::config::{DashboardConfig, Explorer};
pub use crate::domain::errors::{ConfigError, InvokeError, NormalizeError, RetryError};
pub use crate::domain::types::{
    ConfirmedRecord, CorrelationId, EventKind, InvocationStatus, InvokedRecord, Notification,
    NotificationClass, ProjectionView, RawEventLog, ReconcilerStats, RetryOutcome, RetryPhase,
    TrackedInvocation, TxHash, WalletContext,
};
pub use crate::features::{
    ConfirmationSubmitter, EventSource, EventStream, MockConfirmationSubmitter, MockEventSource,
    SubscriptionFilter, SubscriptionHandle,
};
pub use crate::invoke::{InvocationForm, InvocationRequest};
pub use crate::notify::{HandlerId, NotificationHub, NotificationSink, ToastId, ToastTray};
pub use crate::reconciler::{PumpReport, Reconciler};
pub use crate::retry::RetryController;
pub use crate::storage::InvocationLedger;

use crate::storage::projection::project;
use crate::timing::current_time_ns;
use canlog::{log, GetLogFilter, LogFilter, LogPriorityLevels};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

#[derive(Clone, Copy, Debug, LogPriorityLevels)]
enum DashboardLogPriority {
    #[log_level(capacity = 500, name = "DASHBOARD_INFO")]
    Info,
}

impl GetLogFilter for DashboardLogPriority {
    fn get_log_filter() -> LogFilter {
        LogFilter::ShowAll
    }
}

/// Reconciliation session for one dashboard: a shared ledger fed by the
/// reconciler, retried through the retry controller, read via projections,
/// and reported through the notification hub.
pub struct Dashboard {
    config: DashboardConfig,
    explorer: Explorer,
    ledger: Rc<RefCell<InvocationLedger>>,
    hub: Rc<NotificationHub>,
    reconciler: Reconciler,
    retry: RetryController,
}

impl Dashboard {
    pub fn new(
        config: DashboardConfig,
        submitter: Rc<dyn ConfirmationSubmitter>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let ledger = Rc::new(RefCell::new(InvocationLedger::new(config.ledger_capacity)));
        let hub = Rc::new(NotificationHub::new(
            config.toast_ttl_ms,
            config.max_visible_toasts,
        ));
        let reconciler = Reconciler::new(Rc::clone(&ledger), hub.clone());
        let retry = RetryController::new(Rc::clone(&ledger), hub.clone(), submitter);
        log!(
            DashboardLogPriority::Info,
            "dashboard_init chain_id={} network={} capacity={} manager={:?}",
            config.target_chain_id,
            config.network,
            config.ledger_capacity,
            config.manager_address
        );

        Ok(Self {
            explorer: config.explorer(),
            config,
            ledger,
            hub,
            reconciler,
            retry,
        })
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn explorer(&self) -> &Explorer {
        &self.explorer
    }

    /// Subscribes to both event kinds on the configured manager contract.
    pub fn connect(
        &mut self,
        source: &dyn EventSource,
    ) -> Result<(SubscriptionHandle, SubscriptionHandle), String> {
        let filter = self.config.subscription_filter();
        self.reconciler.connect(source, &filter)
    }

    pub fn disconnect(&mut self) {
        self.reconciler.disconnect();
    }

    pub async fn pump(&mut self) -> PumpReport {
        self.reconciler.pump().await
    }

    pub fn stats(&self) -> &ReconcilerStats {
        self.reconciler.stats()
    }

    pub fn get_projection(&self, agent_filter: Option<u64>) -> ProjectionView {
        self.projection_at(agent_filter, current_time_ns())
    }

    pub fn projection_at(&self, agent_filter: Option<u64>, now_ns: u64) -> ProjectionView {
        project(
            &self.ledger.borrow(),
            agent_filter,
            &self.config.projection_settings(),
            now_ns,
        )
    }

    pub async fn retry(&self, correlation_id: CorrelationId) -> Result<RetryOutcome, RetryError> {
        self.retry.retry(correlation_id).await
    }

    pub fn on_notification(&self, handler: impl Fn(&Notification) + 'static) -> HandlerId {
        self.hub.on_notification(handler)
    }

    pub fn remove_notification_handler(&self, id: HandlerId) -> bool {
        self.hub.remove_handler(id)
    }

    pub fn notifications(&self) -> Ref<'_, ToastTray> {
        self.hub.tray()
    }

    /// Tray access for pause/resume/dismiss/tick driven by the rendering layer.
    pub fn notifications_mut(&self) -> RefMut<'_, ToastTray> {
        self.hub.tray_mut()
    }

    pub fn prepare_invocation(
        &self,
        form: &InvocationForm,
        wallet: &WalletContext,
    ) -> Result<InvocationRequest, InvokeError> {
        invoke::prepare_invocation(form, wallet, &self.config)
    }

    /// Split borrow so a host can keep pumping events while a retry is
    /// suspended on its receipt.
    pub fn parts(&mut self) -> (&mut Reconciler, &RetryController) {
        (&mut self.reconciler, &self.retry)
    }
}
