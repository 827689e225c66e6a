//! Database connection abstraction.

use async_trait::async_trait;

use crate::error::MigrateResult;

/// One result row: ordered, named, nullable text columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, Option<String>)>,
}

impl Row {
    /// An empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column.
    pub fn with(mut self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        self.push(name, value.map(Into::into));
        self
    }

    /// Append a column in place.
    pub fn push(&mut self, name: impl Into<String>, value: Option<String>) {
        self.columns.push((name.into(), value));
    }

    /// Value of the named column. `None` for NULL or a missing column.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Value at a position.
    pub fn get_at(&self, index: usize) -> Option<&str> {
        self.columns.get(index).and_then(|(_, v)| v.as_deref())
    }

    /// Required column value.
    pub fn require(&self, name: &str) -> MigrateResult<&str> {
        self.get(name).ok_or_else(|| {
            crate::error::MigrationError::database(format!("missing column '{}' in result row", name))
        })
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A live database session.
///
/// Statements run one at a time in call order. Transactions are plain
/// statements issued by the caller.
#[async_trait]
pub trait Connection: Send {
    /// Execute a statement that returns no rows.
    async fn execute(&mut self, sql: &str) -> MigrateResult<()>;

    /// Run a query, returning every row as text.
    async fn query(&mut self, sql: &str) -> MigrateResult<Vec<Row>>;
}

#[async_trait]
impl<C: Connection + ?Sized> Connection for Box<C> {
    async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        (**self).execute(sql).await
    }

    async fn query(&mut self, sql: &str) -> MigrateResult<Vec<Row>> {
        (**self).query(sql).await
    }
}
