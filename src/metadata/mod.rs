//! Read-only catalog introspection layered above a [`Pool`].
//!
//! [`MetaData`] exposes virtual catalog views (`schemas`, `tables`,
//! `columns`, `primary_keys`, `foreign_keys`) queryable with equality
//! filters, and materializes a lazy Schema -> Table -> Column/Key hierarchy.
//! Every read runs on a transient pool lease, so the pool's acquired count
//! returns to its pre-call value after each metadata call.

pub mod objects;
pub mod queries;

pub use objects::{
    ColumnMeta, ForeignKeyMeta, PrimaryKeyMeta, Schema, SchemaMeta, Table, TableMeta,
};

use crate::config::{ExecuteOptions, NamingConvention};
use crate::error::{DriverError, DriverResult};
use crate::params::QueryParam;
use crate::pool::Pool;
use crate::row::{QueryResult, Row};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A virtual, read-only metadata source queried like a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogView {
    Schemas,
    Tables,
    Columns,
    PrimaryKeys,
    ForeignKeys,
}

impl CatalogView {
    fn base_sql(&self) -> &'static str {
        match self {
            Self::Schemas => queries::SCHEMAS,
            Self::Tables => queries::TABLES,
            Self::Columns => queries::COLUMNS,
            Self::PrimaryKeys => queries::PRIMARY_KEYS,
            Self::ForeignKeys => queries::FOREIGN_KEYS,
        }
    }

    fn order_by(&self) -> &'static str {
        match self {
            Self::Schemas => "m.schema_name",
            Self::Tables => "m.table_name",
            Self::Columns => "m.ordinal_position",
            Self::PrimaryKeys => "m.table_name",
            Self::ForeignKeys => "m.constraint_name",
        }
    }

    /// Whether rows of this view are scoped to a single table.
    fn table_scoped(&self) -> bool {
        !matches!(self, Self::Schemas)
    }
}

impl std::fmt::Display for CatalogView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Schemas => "schemas",
            Self::Tables => "tables",
            Self::Columns => "columns",
            Self::PrimaryKeys => "primary_keys",
            Self::ForeignKeys => "foreign_keys",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for CatalogView {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schemas" => Ok(Self::Schemas),
            "tables" => Ok(Self::Tables),
            "columns" => Ok(Self::Columns),
            "primary_keys" => Ok(Self::PrimaryKeys),
            "foreign_keys" => Ok(Self::ForeignKeys),
            other => Err(DriverError::unsupported(
                format!("catalog view '{}'", other),
                "expected one of: schemas, tables, columns, primary_keys, foreign_keys",
            )),
        }
    }
}

/// Build the catalog query for a view plus optional equality filters.
pub(crate) fn build_catalog_query(
    view: CatalogView,
    schema_name: Option<&str>,
    table_name: Option<&str>,
) -> DriverResult<(String, Vec<QueryParam>)> {
    if table_name.is_some() && !view.table_scoped() {
        return Err(DriverError::unsupported(
            format!("table_name filter on '{}' view", view),
            "this view is not scoped to tables",
        ));
    }

    let mut sql = format!("SELECT * FROM ({}) m", view.base_sql());
    let mut params = Vec::new();
    if let Some(schema) = schema_name {
        params.push(QueryParam::String(schema.to_string()));
        sql.push_str(&format!(" WHERE m.schema_name = ${}", params.len()));
    }
    if let Some(table) = table_name {
        params.push(QueryParam::String(table.to_string()));
        let keyword = if params.len() == 1 { "WHERE" } else { "AND" };
        sql.push_str(&format!(" {} m.table_name = ${}", keyword, params.len()));
    }
    sql.push_str(&format!(" ORDER BY {}", view.order_by()));

    Ok((sql, params))
}

/// Deserialize one keyed row into a metadata struct.
pub(crate) fn from_row<T: DeserializeOwned>(row: Row) -> DriverResult<T> {
    serde_json::from_value(row.into_json())
        .map_err(|e| DriverError::decode(format!("Malformed catalog row: {}", e)))
}

/// A pending catalog query against one view.
#[derive(Debug)]
pub struct MetaSelect {
    metadata: MetaData,
    view: CatalogView,
    schema_name: Option<String>,
    table_name: Option<String>,
}

impl MetaSelect {
    /// Filter by `schema_name` equality.
    pub fn schema_name(mut self, name: impl Into<String>) -> Self {
        self.schema_name = Some(name.into());
        self
    }

    /// Filter by `table_name` equality.
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    /// Run the catalog query on a transient lease.
    pub async fn execute(self) -> DriverResult<QueryResult<'static>> {
        let (sql, params) = build_catalog_query(
            self.view,
            self.schema_name.as_deref(),
            self.table_name.as_deref(),
        )?;
        debug!(view = %self.view, "Catalog query");
        // Catalog rows are always keyed; consumers address them by name.
        let options = ExecuteOptions::new()
            .object_rows(true)
            .naming(NamingConvention::Original)
            .auto_commit(true);
        self.metadata.pool.execute(&sql, &params, &options).await
    }
}

/// Introspection entry point bound to a [`Pool`].
#[derive(Clone)]
pub struct MetaData {
    pool: Pool,
    /// Schema snapshots keyed by filter, cleared by `invalidate`.
    schemas: Arc<RwLock<HashMap<String, Vec<SchemaMeta>>>>,
}

impl std::fmt::Debug for MetaData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaData").field("pool", &self.pool).finish()
    }
}

impl MetaData {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            schemas: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a catalog query against one virtual view.
    pub fn select(&self, view: CatalogView) -> MetaSelect {
        MetaSelect {
            metadata: self.clone(),
            view,
            schema_name: None,
            table_name: None,
        }
    }

    /// Clear the cached hierarchy; the next access re-queries the catalogs.
    /// Previously handed-out Schema/Table snapshots keep their own caches.
    pub async fn invalidate(&self) {
        let mut schemas = self.schemas.write().await;
        schemas.clear();
        debug!("Metadata cache invalidated");
    }

    /// Materialize schema objects, optionally filtered by name.
    pub async fn get_schemas(&self, filter: Option<&str>) -> DriverResult<Vec<Schema>> {
        let key = filter.unwrap_or("*").to_string();
        {
            let cached = self.schemas.read().await;
            if let Some(metas) = cached.get(&key) {
                return Ok(metas
                    .iter()
                    .cloned()
                    .map(|meta| Schema::new(meta, self.clone()))
                    .collect());
            }
        }

        let mut select = self.select(CatalogView::Schemas);
        if let Some(name) = filter {
            select = select.schema_name(name);
        }
        let result = select.execute().await?;

        let mut metas = Vec::new();
        for row in result.rows.unwrap_or_default() {
            metas.push(from_row::<SchemaMeta>(row)?);
        }

        {
            let mut cached = self.schemas.write().await;
            cached.insert(key, metas.clone());
        }

        Ok(metas
            .into_iter()
            .map(|meta| Schema::new(meta, self.clone()))
            .collect())
    }

    /// Table lookup is only valid scoped to a specific schema; use
    /// [`Schema::get_tables`] instead.
    pub async fn get_tables(&self, _name: &str) -> DriverResult<Vec<Table>> {
        Err(DriverError::unsupported(
            "MetaData::get_tables",
            "table lookup must be scoped to a schema; use Schema::get_tables",
        ))
    }
}
