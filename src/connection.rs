//! A single logical database session.
//!
//! [`Connection`] wraps one native PostgreSQL session and owns its
//! transaction state. Transaction nesting is an explicit depth counter with
//! saturating commit/rollback at zero: starting a transaction at depth > 0
//! only bumps the counter, and committing or rolling back at depth 0 with no
//! open backend transaction is a silent no-op, never an error.

use crate::config::{ExecuteDefaults, ExecuteOptions, ResolvedOptions};
use crate::cursor::Cursor;
use crate::error::{DriverError, DriverResult};
use crate::params::{QueryParam, bind_param};
use crate::row::{QueryResult, decode_pg_row, field_names};
use futures_util::StreamExt;
use sqlx::postgres::PgConnection;
use sqlx::{Connection as SqlxConnection, Either, Executor};
use tracing::{debug, warn};
use uuid::Uuid;

// =============================================================================
// Transaction State Machine
// =============================================================================

/// Backend command required by a transaction-state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxnAction {
    None,
    Begin,
    Commit,
    Rollback,
}

/// Pure transaction-depth state machine.
///
/// Tracks the explicit nesting depth and whether a backend transaction is
/// open. An implicit transaction (opened by a statement under
/// `auto_commit = false`) keeps depth at 0 with the backend flag set.
#[derive(Debug, Default, Clone)]
pub(crate) struct TxnState {
    depth: u32,
    backend_open: bool,
}

impl TxnState {
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn backend_open(&self) -> bool {
        self.backend_open
    }

    /// Explicit `startTransaction`: BEGIN only when nothing is open yet.
    pub fn on_start(&mut self) -> TxnAction {
        self.depth += 1;
        if self.backend_open {
            TxnAction::None
        } else {
            self.backend_open = true;
            TxnAction::Begin
        }
    }

    /// Before executing a statement: implicit BEGIN under auto_commit=false.
    pub fn on_execute(&mut self, auto_commit: bool) -> TxnAction {
        if !auto_commit && !self.backend_open {
            self.backend_open = true;
            TxnAction::Begin
        } else {
            TxnAction::None
        }
    }

    /// `commit`: saturating decrement; backend COMMIT only when the
    /// outermost level (or an implicit transaction) is being closed.
    pub fn on_commit(&mut self) -> TxnAction {
        if self.depth > 1 {
            self.depth -= 1;
            return TxnAction::None;
        }
        self.depth = 0;
        if self.backend_open {
            self.backend_open = false;
            TxnAction::Commit
        } else {
            TxnAction::None
        }
    }

    /// `rollback`: same saturation rules as commit.
    pub fn on_rollback(&mut self) -> TxnAction {
        if self.depth > 1 {
            self.depth -= 1;
            return TxnAction::None;
        }
        self.depth = 0;
        if self.backend_open {
            self.backend_open = false;
            TxnAction::Rollback
        } else {
            TxnAction::None
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

/// A single leased database session.
///
/// Owned exclusively by one lease at a time; obtained from
/// [`Pool::acquire`](crate::Pool::acquire).
pub struct Connection {
    /// None once closed.
    native: Option<PgConnection>,
    txn: TxnState,
    defaults: ExecuteDefaults,
    /// Per-lease auto-commit override from `acquire`.
    auto_commit_override: Option<bool>,
    id: Uuid,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.native.is_none())
            .field("transaction_depth", &self.txn.depth())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(native: PgConnection, defaults: ExecuteDefaults) -> Self {
        Self {
            native: Some(native),
            txn: TxnState::default(),
            defaults,
            auto_commit_override: None,
            id: Uuid::new_v4(),
        }
    }

    pub(crate) fn set_auto_commit_override(&mut self, auto_commit: Option<bool>) {
        self.auto_commit_override = auto_commit;
    }

    /// Stable identifier of this session, for logging and lease tracking.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Resolve per-call options against the pool defaults and the lease-level
    /// auto-commit override.
    pub(crate) fn resolve_options(&self, options: &ExecuteOptions) -> ResolvedOptions {
        let mut resolved = options.resolve(&self.defaults);
        if options.auto_commit.is_none() {
            if let Some(auto_commit) = self.auto_commit_override {
                resolved.auto_commit = auto_commit;
            }
        }
        resolved
    }

    pub fn is_closed(&self) -> bool {
        self.native.is_none()
    }

    /// Current explicit transaction nesting depth.
    pub fn transaction_depth(&self) -> u32 {
        self.txn.depth()
    }

    /// Whether a backend transaction (explicit or implicit) is open.
    pub fn in_transaction(&self) -> bool {
        self.txn.backend_open()
    }

    fn native_mut(&mut self) -> DriverResult<&mut PgConnection> {
        self.native.as_mut().ok_or(DriverError::ConnectionClosed)
    }

    /// Run one statement.
    ///
    /// Under `auto_commit = false` a backend transaction is opened implicitly
    /// if none is active; an explicit `rollback` then reverts the statement.
    /// With the `cursor` option the result carries a [`Cursor`] that borrows
    /// this session's row stream for its lifetime; otherwise the rows are
    /// materialized.
    pub async fn execute<'c>(
        &'c mut self,
        sql: &'c str,
        params: &'c [QueryParam],
        options: &ExecuteOptions,
    ) -> DriverResult<QueryResult<'c>> {
        let resolved = self.resolve_options(options);
        if resolved.cursor {
            return self.stream_cursor(sql, params, resolved).await;
        }
        self.execute_resolved(sql, params, &resolved).await
    }

    /// Open a streamed fetch whose cursor borrows this session.
    async fn stream_cursor<'c>(
        &'c mut self,
        sql: &'c str,
        params: &'c [QueryParam],
        resolved: ResolvedOptions,
    ) -> DriverResult<QueryResult<'c>> {
        if self.is_closed() {
            return Err(DriverError::ConnectionClosed);
        }
        let action = self.txn.on_execute(resolved.auto_commit);
        self.run_txn_action(action).await?;

        debug!(
            connection_id = %self.id,
            sql = %sql,
            fetch_rows = resolved.fetch_rows,
            "Opening streamed fetch"
        );

        let native = self.native_mut()?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        let cursor = Cursor::over_stream(query.fetch(native), resolved);
        Ok(QueryResult {
            fields: Vec::new(),
            rows: None,
            rows_affected: None,
            cursor: Some(cursor),
        })
    }

    pub(crate) async fn execute_resolved(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        resolved: &ResolvedOptions,
    ) -> DriverResult<QueryResult<'static>> {
        if self.is_closed() {
            return Err(DriverError::ConnectionClosed);
        }

        let action = self.txn.on_execute(resolved.auto_commit);
        self.run_txn_action(action).await?;

        debug!(
            connection_id = %self.id,
            sql = %sql,
            params = params.len(),
            object_rows = resolved.object_rows,
            "Executing statement"
        );

        let native = self.native_mut()?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }

        let mut fields: Vec<String> = Vec::new();
        let mut rows = Vec::new();
        let mut rows_affected: u64 = 0;
        {
            let mut stream = native.fetch_many(query);
            while let Some(step) = stream.next().await {
                match step.map_err(DriverError::from)? {
                    Either::Left(done) => rows_affected += done.rows_affected(),
                    Either::Right(row) => {
                        if fields.is_empty() {
                            fields = field_names(&row, resolved.naming);
                        }
                        rows.push(decode_pg_row(&row, resolved));
                    }
                }
            }
        }

        debug!(
            connection_id = %self.id,
            rows = rows.len(),
            rows_affected = rows_affected,
            "Statement complete"
        );

        Ok(QueryResult {
            fields,
            rows: Some(rows),
            rows_affected: Some(rows_affected),
            cursor: None,
        })
    }

    /// Begin a transaction, or deepen an already-open one.
    pub async fn start_transaction(&mut self) -> DriverResult<()> {
        if self.is_closed() {
            return Err(DriverError::ConnectionClosed);
        }
        let action = self.txn.on_start();
        self.run_txn_action(action).await
    }

    /// Commit the outermost transaction level. No-op at depth 0 with no
    /// open transaction; repeated calls are safe.
    pub async fn commit(&mut self) -> DriverResult<()> {
        let action = self.txn.on_commit();
        self.run_txn_action(action).await
    }

    /// Roll back the outermost transaction level. Same saturation rules
    /// as [`commit`](Self::commit).
    pub async fn rollback(&mut self) -> DriverResult<()> {
        let action = self.txn.on_rollback();
        self.run_txn_action(action).await
    }

    async fn run_txn_action(&mut self, action: TxnAction) -> DriverResult<()> {
        let command = match action {
            TxnAction::None => return Ok(()),
            TxnAction::Begin => "BEGIN",
            TxnAction::Commit => "COMMIT",
            TxnAction::Rollback => "ROLLBACK",
        };
        if self.is_closed() {
            return Err(DriverError::ConnectionClosed);
        }
        debug!(connection_id = %self.id, command = command, "Transaction control");
        let native = self.native_mut()?;
        native.execute(command).await.map_err(DriverError::from)?;
        Ok(())
    }

    /// Roll back any open backend transaction, forgetting the depth.
    /// Used by the pool when a lease is released.
    pub(crate) async fn reset(&mut self) -> DriverResult<()> {
        if self.txn.backend_open() {
            warn!(
                connection_id = %self.id,
                depth = self.txn.depth(),
                "Rolling back open transaction on lease release"
            );
            self.txn = TxnState::default();
            if let Some(native) = self.native.as_mut() {
                native.execute("ROLLBACK").await.map_err(DriverError::from)?;
            }
        } else {
            self.txn = TxnState::default();
        }
        self.auto_commit_override = None;
        Ok(())
    }

    /// Direct access to the native session for streaming fetches.
    pub(crate) fn native_stream(&mut self) -> Option<&mut PgConnection> {
        self.native.as_mut()
    }

    /// Validation probe used by the pool before handing out an idle session.
    pub(crate) async fn ping(&mut self) -> DriverResult<()> {
        let native = self.native_mut()?;
        native.ping().await.map_err(DriverError::from)
    }

    /// Close the native session. Idempotent: closing an already-closed
    /// connection is a silent no-op.
    pub async fn close(&mut self) -> DriverResult<()> {
        if let Some(native) = self.native.take() {
            debug!(connection_id = %self.id, "Closing connection");
            native.close().await.map_err(DriverError::from)?;
        }
        Ok(())
    }
}
