pub mod memory;
pub mod models;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub use memory::MemoryStore;
pub use models::{
    ActionFailure, FailureCode, FailureContext, FailureContextValue, Machine, MachineProviderRecord,
    MachineState, MessageState, StateCategory,
};
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Create a connection pool to PostgreSQL.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ── Store traits ────────────────────────────────────────────────────

/// Persistence for machine records, provider associations and failures.
#[async_trait]
pub trait MachineStore: Send + Sync {
    async fn find_machine(&self, id: &str) -> Result<Option<Machine>>;

    /// Insert or overwrite the whole record.
    async fn store_machine(&self, machine: &Machine) -> Result<()>;

    async fn find_provider(&self, machine_id: &str) -> Result<Option<MachineProviderRecord>>;

    async fn store_provider(&self, record: &MachineProviderRecord) -> Result<()>;

    async fn find_failure(&self, machine_id: &str) -> Result<Option<ActionFailure>>;

    /// Returns `false` when a failure was already recorded; the existing
    /// record is left untouched.
    async fn create_failure_if_absent(&self, failure: &ActionFailure) -> Result<bool>;

    async fn remove_failure(&self, machine_id: &str) -> Result<()>;
}

/// Lifecycle tracking for queued messages, used to size the queue.
#[async_trait]
pub trait MessageStateStore: Send + Sync {
    /// Advance a message's state. Writes that would move it backwards are
    /// ignored, so a fast worker can never be overtaken by its dispatcher.
    async fn set_message_state(&self, unique_id: &str, state: MessageState) -> Result<()>;

    async fn count_outstanding_messages(&self) -> Result<u64>;

    /// Forget messages handled more than `older_than` ago. Returns how many
    /// were removed.
    async fn prune_handled_messages(&self, older_than: Duration) -> Result<u64>;
}
