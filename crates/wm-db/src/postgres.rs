use std::time::Duration;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::debug;

use crate::models::{
    ActionFailure, FailureCode, FailureContext, Machine, MachineProviderRecord, MessageState,
};
use crate::{Error, MachineStore, MessageStateStore, Result};

/// PostgreSQL-backed store. Tables are created by [`crate::run_migrations`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct ActionFailureRow {
    machine_id: String,
    code: i32,
    context: Json<FailureContext>,
}

impl TryFrom<ActionFailureRow> for ActionFailure {
    type Error = Error;

    fn try_from(row: ActionFailureRow) -> Result<Self> {
        let code = FailureCode::from_code(row.code).ok_or_else(|| {
            Error::InvalidRecord(format!(
                "failure code {} for machine {}",
                row.code, row.machine_id
            ))
        })?;

        Ok(ActionFailure {
            machine_id: row.machine_id,
            code,
            context: row.context.0,
        })
    }
}

#[async_trait]
impl MachineStore for PgStore {
    async fn find_machine(&self, id: &str) -> Result<Option<Machine>> {
        let machine = sqlx::query_as(
            "SELECT id, state, remote_id, ip_addresses FROM machines WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(machine)
    }

    async fn store_machine(&self, machine: &Machine) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO machines (id, state, remote_id, ip_addresses)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (id) DO UPDATE
               SET state = EXCLUDED.state,
                   remote_id = EXCLUDED.remote_id,
                   ip_addresses = EXCLUDED.ip_addresses,
                   updated_at = now()"#,
        )
        .bind(&machine.id)
        .bind(machine.state)
        .bind(machine.remote_id)
        .bind(machine.ip_addresses())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_provider(&self, machine_id: &str) -> Result<Option<MachineProviderRecord>> {
        let record = sqlx::query_as(
            "SELECT machine_id, provider FROM machine_providers WHERE machine_id = $1",
        )
        .bind(machine_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn store_provider(&self, record: &MachineProviderRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO machine_providers (machine_id, provider)
               VALUES ($1, $2)
               ON CONFLICT (machine_id) DO UPDATE SET provider = EXCLUDED.provider"#,
        )
        .bind(&record.machine_id)
        .bind(&record.provider)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_failure(&self, machine_id: &str) -> Result<Option<ActionFailure>> {
        let row: Option<ActionFailureRow> = sqlx::query_as(
            "SELECT machine_id, code, context FROM action_failures WHERE machine_id = $1",
        )
        .bind(machine_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ActionFailure::try_from).transpose()
    }

    async fn create_failure_if_absent(&self, failure: &ActionFailure) -> Result<bool> {
        let result = sqlx::query(
            r#"INSERT INTO action_failures (machine_id, code, context)
               VALUES ($1, $2, $3)
               ON CONFLICT DO NOTHING"#,
        )
        .bind(&failure.machine_id)
        .bind(failure.code.code())
        .bind(Json(&failure.context))
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            debug!(machine_id = %failure.machine_id, "failure already recorded");
        }
        Ok(inserted)
    }

    async fn remove_failure(&self, machine_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM action_failures WHERE machine_id = $1")
            .bind(machine_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStateStore for PgStore {
    async fn set_message_state(&self, unique_id: &str, state: MessageState) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO message_states (unique_id, state)
               VALUES ($1, $2)
               ON CONFLICT (unique_id) DO UPDATE SET state = EXCLUDED.state, updated_at = now()
               WHERE message_states.state < EXCLUDED.state"#,
        )
        .bind(unique_id)
        .bind(state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_outstanding_messages(&self) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM message_states WHERE state <> 'handled'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn prune_handled_messages(&self, older_than: Duration) -> Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM message_states
               WHERE state = 'handled' AND updated_at < now() - make_interval(secs => $1)"#,
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            debug!(pruned, "pruned handled messages");
        }
        Ok(pruned)
    }
}
