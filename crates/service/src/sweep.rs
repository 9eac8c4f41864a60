//! Background sweep that expires unverified bank-transfer payments.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use store::{OrderRepository, RefundLedger, StockLedger};

use crate::catalog::Catalog;
use crate::orders::OrderService;

/// Spawns a task that periodically cancels BANK orders whose slip was
/// never verified within `verification_window`.
///
/// The sweep runs every `interval` and logs its work; individual order
/// failures are handled inside the service and do not stop the task.
pub fn spawn_bank_expiry_sweep<R, S, L, C>(
    service: Arc<OrderService<R, S, L, C>>,
    interval: Duration,
    verification_window: chrono::Duration,
) -> JoinHandle<()>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - verification_window;
            match service.expire_unverified_bank_payments(cutoff).await {
                Ok(0) => {}
                Ok(expired) => {
                    tracing::info!(expired, "bank expiry sweep completed");
                }
                Err(err) => {
                    tracing::error!(error = %err, "bank expiry sweep failed");
                }
            }
        }
    })
}
