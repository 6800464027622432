use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::scheduler::Scheduler;
use crate::services::notify::{self, Notifier};
use crate::services::payments::PaymentGateway;

pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub config: AppConfig,
    pub gateway: Box<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    /// Starts forwarding the scheduler's domain events to `notifier`.
    pub fn spawn_notifications(&self) -> JoinHandle<()> {
        tokio::spawn(notify::run_forwarder(
            self.scheduler.events().subscribe(),
            self.notifier.clone(),
        ))
    }
}
