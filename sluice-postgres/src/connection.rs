//! PostgreSQL connection wrapper.

use async_trait::async_trait;
use sluice_migrate::{Connection, MigrateResult, Row};
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

use crate::error::{PgError, PgResult};

/// A single PostgreSQL session driving migrations.
///
/// Statements go through the simple query protocol, so multi-statement
/// strings and `BEGIN`/`COMMIT` behave as they would in `psql`.
pub struct PgConnection {
    client: Client,
}

impl PgConnection {
    /// Wrap an already connected client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect without TLS and drive the connection on a background task.
    pub async fn connect(url: &str) -> PgResult<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection closed with error");
            }
        });
        debug!("postgres connection established");
        Ok(Self::new(client))
    }

    /// The underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Give back the client.
    pub fn into_inner(self) -> Client {
        self.client
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        debug!(sql = %sql, "Executing statement");
        self.client
            .batch_execute(sql)
            .await
            .map_err(PgError::from)?;
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> MigrateResult<Vec<Row>> {
        debug!(sql = %sql, "Executing query");
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(PgError::from)?;

        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let mut out = Row::new();
                for (i, column) in row.columns().iter().enumerate() {
                    out.push(column.name(), row.get(i).map(str::to_string));
                }
                rows.push(out);
            }
        }
        Ok(rows)
    }
}
