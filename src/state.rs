use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::error::AppError;
use crate::models::driver::Driver;
use crate::models::order::Order;
use crate::observability::metrics::Metrics;
use crate::store::drivers::DriverStateStore;
use crate::store::orders::OrderLedger;

pub struct AppState {
    pub config: Config,
    pub drivers: DriverStateStore,
    pub orders: OrderLedger,
    pub broadcaster: Broadcaster,
    pub dispatch_tx: mpsc::Sender<Uuid>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> (Self, mpsc::Receiver<Uuid>) {
        Self::with_records(config, Vec::new(), Vec::new())
    }

    /// Builds the state around records recovered from a snapshot store.
    pub fn with_records(
        config: Config,
        drivers: Vec<Driver>,
        orders: Vec<Order>,
    ) -> (Self, mpsc::Receiver<Uuid>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_size);
        let broadcaster = Broadcaster::new(config.event_buffer_size);

        (
            Self {
                drivers: DriverStateStore::restore(drivers),
                orders: OrderLedger::restore(orders),
                broadcaster,
                dispatch_tx,
                metrics: Metrics::new(),
                config,
            },
            dispatch_rx,
        )
    }

    /// Hands an order to the dispatch loop.
    pub async fn enqueue_dispatch(&self, order_id: Uuid) -> Result<(), AppError> {
        self.dispatch_tx
            .send(order_id)
            .await
            .map_err(|err| AppError::Internal(format!("dispatch queue send failed: {err}")))?;

        self.metrics.orders_in_queue.inc();
        Ok(())
    }
}
