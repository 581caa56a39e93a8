//! Dependency-injection container wiring the engine for one process.

use std::sync::Arc;

use sqlx::PgPool;
use strata_core::clock::{Clock, SystemClock};
use strata_core::error::DomainError;
use strata_core::outbox::{MessagePublisher, OutboxRelay, OutboxStore};
use strata_core::projection::{CheckpointStore, ProjectionManager, Projector};
use strata_core::repository::Repository;
use strata_core::snapshot::SnapshotStore;
use strata_core::store::EventStore;
use strata_core::worker::WorkerHandle;
use strata_event_store::{PgCheckpointStore, PgEventStore, PgOutboxStore, PgSnapshotStore};
use strata_orders::application::projections::OrderSummaryProjector;
use strata_orders::application::read_model::OrderSummaryStore;
use strata_orders::domain::aggregates::Order;
use tracing::{error, info};

use crate::config::WorkerConfig;
use crate::publisher::LogPublisher;
use crate::summary_store::PgOrderSummaryStore;

/// The storage ports a process runs against.
pub struct Adapters {
    /// Event log.
    pub event_store: Arc<dyn EventStore>,
    /// Aggregate snapshots.
    pub snapshots: Arc<dyn SnapshotStore>,
    /// Projection positions and errors.
    pub checkpoints: Arc<dyn CheckpointStore>,
    /// Staged outbound messages.
    pub outbox: Arc<dyn OutboxStore>,
    /// Order summary read model.
    pub order_summaries: Arc<dyn OrderSummaryStore>,
}

impl Adapters {
    /// `PostgreSQL` adapters sharing `pool`.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            event_store: Arc::new(PgEventStore::new(pool.clone())),
            snapshots: Arc::new(PgSnapshotStore::new(pool.clone())),
            checkpoints: Arc::new(PgCheckpointStore::new(pool.clone())),
            outbox: Arc::new(PgOutboxStore::new(pool.clone())),
            order_summaries: Arc::new(PgOrderSummaryStore::new(pool.clone())),
        }
    }
}

/// Every long-lived component of the worker, built once at startup.
pub struct Services {
    /// Projection positions and errors.
    pub checkpoints: Arc<dyn CheckpointStore>,
    /// Staged outbound messages.
    pub outbox: Arc<dyn OutboxStore>,
    /// Order summary read model.
    pub order_summaries: Arc<dyn OrderSummaryStore>,
    /// Order repository with snapshots and outbox staging.
    pub orders: Arc<Repository<Order>>,
    /// Projection manager over every registered projector.
    pub projections: Arc<ProjectionManager>,
    /// Outbox relay.
    pub relay: Arc<OutboxRelay>,
}

impl Services {
    /// Wires `adapters` into repositories, the projection manager and the
    /// relay.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if two projectors share a name.
    pub fn new(
        adapters: Adapters,
        publisher: Arc<dyn MessagePublisher>,
        clock: Arc<dyn Clock>,
        config: &WorkerConfig,
    ) -> Result<Self, DomainError> {
        let orders = Repository::new(Arc::clone(&adapters.event_store))
            .with_snapshots(Arc::clone(&adapters.snapshots), config.snapshot_policy())
            .with_outbox()
            .with_clock(Arc::clone(&clock));

        let projectors: Vec<Arc<dyn Projector>> = vec![Arc::new(OrderSummaryProjector::new(
            Arc::clone(&adapters.order_summaries),
        ))];
        let projections = ProjectionManager::new(
            Arc::clone(&adapters.event_store),
            Arc::clone(&adapters.checkpoints),
            projectors,
            Arc::clone(&clock),
            config.projection_config(),
        )?;

        let relay = OutboxRelay::new(
            Arc::clone(&adapters.outbox),
            publisher,
            clock,
            config.relay_config(),
        );

        Ok(Self {
            checkpoints: adapters.checkpoints,
            outbox: adapters.outbox,
            order_summaries: adapters.order_summaries,
            orders: Arc::new(orders),
            projections: Arc::new(projections),
            relay: Arc::new(relay),
        })
    }

    /// Production wiring: `PostgreSQL` adapters, the system clock and the
    /// log publisher.
    ///
    /// # Errors
    ///
    /// See [`Services::new`].
    pub fn postgres(pool: &PgPool, config: &WorkerConfig) -> Result<Self, DomainError> {
        Self::new(
            Adapters::postgres(pool),
            Arc::new(LogPublisher),
            Arc::new(SystemClock),
            config,
        )
    }

    /// Starts the projection loop, the retry sweep and the relay loop.
    #[must_use]
    pub fn spawn_workers(&self, config: &WorkerConfig) -> Workers {
        let handles = vec![
            Arc::clone(&self.projections).spawn(config.projection_poll_interval),
            Arc::clone(&self.projections).spawn_retry_sweep(config.retry_sweep_interval),
            Arc::clone(&self.relay).spawn(config.outbox_poll_interval),
        ];
        info!(count = handles.len(), "background workers started");
        Workers { handles }
    }
}

/// The running background loops.
pub struct Workers {
    handles: Vec<WorkerHandle>,
}

impl Workers {
    /// Names of the running loops.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.handles.iter().map(WorkerHandle::name).collect()
    }

    /// Stops every loop, letting in-flight passes finish.
    pub async fn shutdown(self) {
        for handle in self.handles {
            let name = handle.name();
            if let Err(e) = handle.shutdown().await {
                error!(worker = name, error = %e, "worker did not stop cleanly");
            }
        }
    }
}
