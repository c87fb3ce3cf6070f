//! Materialized metadata objects: Schema, Table and their key/column meta.
//!
//! These are read-only snapshots of catalog rows. A [`Table`] carries the
//! name of its owning schema for navigation only; it does not keep the
//! schema alive. Each object caches its children lazily and re-queries only
//! after [`MetaData::invalidate`](super::MetaData::invalidate) produced a
//! fresh snapshot.

use crate::error::DriverResult;
use crate::metadata::{CatalogView, MetaData, from_row};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// One row of the `schemas` catalog view.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SchemaMeta {
    pub schema_name: String,
    #[serde(default)]
    pub schema_owner: Option<String>,
}

/// One row of the `tables` catalog view.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TableMeta {
    pub schema_name: String,
    pub table_name: String,
    #[serde(default)]
    pub table_type: Option<String>,
}

/// One row of the `columns` catalog view.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnMeta {
    pub column_name: String,
    pub data_type: String,
    #[serde(default)]
    pub is_nullable: Option<bool>,
    #[serde(default)]
    pub column_default: Option<String>,
    #[serde(default)]
    pub character_maximum_length: Option<i64>,
    #[serde(default)]
    pub ordinal_position: Option<i64>,
}

/// One row of the `primary_keys` catalog view. `column_names` is the key
/// columns comma-joined in key order.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PrimaryKeyMeta {
    pub constraint_name: String,
    pub column_names: String,
}

/// One row of the `foreign_keys` catalog view.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ForeignKeyMeta {
    pub constraint_name: String,
    pub column_name: String,
    pub foreign_table_name: String,
    pub foreign_column_name: String,
    #[serde(default)]
    pub update_rule: Option<String>,
    #[serde(default)]
    pub delete_rule: Option<String>,
}

/// A database schema snapshot.
#[derive(Clone)]
pub struct Schema {
    meta: SchemaMeta,
    metadata: MetaData,
    tables: Arc<RwLock<Option<Vec<Table>>>>,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema").field("meta", &self.meta).finish()
    }
}

impl Schema {
    pub(crate) fn new(meta: SchemaMeta, metadata: MetaData) -> Self {
        Self {
            meta,
            metadata,
            tables: Arc::new(RwLock::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.schema_name
    }

    pub fn meta(&self) -> &SchemaMeta {
        &self.meta
    }

    /// Tables of this schema, lazily queried and cached.
    pub async fn get_tables(&self) -> DriverResult<Vec<Table>> {
        {
            let cached = self.tables.read().await;
            if let Some(tables) = cached.as_ref() {
                return Ok(tables.clone());
            }
        }

        let result = self
            .metadata
            .select(CatalogView::Tables)
            .schema_name(self.name())
            .execute()
            .await?;
        let mut tables = Vec::new();
        for row in result.rows.unwrap_or_default() {
            let meta: TableMeta = from_row(row)?;
            tables.push(Table::new(meta, self.name().to_string(), self.metadata.clone()));
        }
        debug!(schema = %self.name(), count = tables.len(), "Materialized tables");

        let mut cached = self.tables.write().await;
        *cached = Some(tables.clone());
        Ok(tables)
    }
}

/// A table snapshot within one schema.
#[derive(Clone)]
pub struct Table {
    meta: TableMeta,
    /// Navigational back-reference to the owning schema, by name.
    schema_name: String,
    metadata: MetaData,
    columns: Arc<RwLock<Option<BTreeMap<String, ColumnMeta>>>>,
    primary_key: Arc<RwLock<Option<Option<PrimaryKeyMeta>>>>,
    foreign_keys: Arc<RwLock<Option<Vec<ForeignKeyMeta>>>>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("meta", &self.meta)
            .field("schema_name", &self.schema_name)
            .finish()
    }
}

impl Table {
    pub(crate) fn new(meta: TableMeta, schema_name: String, metadata: MetaData) -> Self {
        Self {
            meta,
            schema_name,
            metadata,
            columns: Arc::new(RwLock::new(None)),
            primary_key: Arc::new(RwLock::new(None)),
            foreign_keys: Arc::new(RwLock::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.table_name
    }

    /// Name of the owning schema.
    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    /// Columns keyed by column name, lazily queried and cached.
    pub async fn get_columns(&self) -> DriverResult<BTreeMap<String, ColumnMeta>> {
        {
            let cached = self.columns.read().await;
            if let Some(columns) = cached.as_ref() {
                return Ok(columns.clone());
            }
        }

        let result = self
            .metadata
            .select(CatalogView::Columns)
            .schema_name(&self.schema_name)
            .table_name(self.name())
            .execute()
            .await?;
        let mut columns = BTreeMap::new();
        for row in result.rows.unwrap_or_default() {
            let meta: ColumnMeta = from_row(row)?;
            columns.insert(meta.column_name.clone(), meta);
        }

        let mut cached = self.columns.write().await;
        *cached = Some(columns.clone());
        Ok(columns)
    }

    /// Primary key of this table, if any. Lazily queried and cached.
    pub async fn get_primary_key(&self) -> DriverResult<Option<PrimaryKeyMeta>> {
        {
            let cached = self.primary_key.read().await;
            if let Some(pk) = cached.as_ref() {
                return Ok(pk.clone());
            }
        }

        let result = self
            .metadata
            .select(CatalogView::PrimaryKeys)
            .schema_name(&self.schema_name)
            .table_name(self.name())
            .execute()
            .await?;
        let pk = match result.rows.unwrap_or_default().into_iter().next() {
            Some(row) => Some(from_row::<PrimaryKeyMeta>(row)?),
            None => None,
        };

        let mut cached = self.primary_key.write().await;
        *cached = Some(pk.clone());
        Ok(pk)
    }

    /// Foreign keys declared on this table. Lazily queried and cached.
    pub async fn get_foreign_keys(&self) -> DriverResult<Vec<ForeignKeyMeta>> {
        {
            let cached = self.foreign_keys.read().await;
            if let Some(fks) = cached.as_ref() {
                return Ok(fks.clone());
            }
        }

        let result = self
            .metadata
            .select(CatalogView::ForeignKeys)
            .schema_name(&self.schema_name)
            .table_name(self.name())
            .execute()
            .await?;
        let mut fks = Vec::new();
        for row in result.rows.unwrap_or_default() {
            fks.push(from_row::<ForeignKeyMeta>(row)?);
        }

        let mut cached = self.foreign_keys.write().await;
        *cached = Some(fks.clone());
        Ok(fks)
    }
}
