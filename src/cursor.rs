//! Streaming cursors.
//!
//! A cursor is a lazy row-fetching handle bound to one executed query,
//! pulling batches of `fetch_rows` rows on demand. It has two sources:
//!
//! - Pool-created (`Pool::execute` with the cursor option): the pool lease
//!   moves into a worker task that holds the native row stream open, and the
//!   handle talks to it over a command channel. The lease is released when
//!   the cursor is closed or its result set is exhausted, so an open cursor
//!   counts as one acquired connection until then.
//! - Connection-created (`Connection::execute` with the cursor option): the
//!   cursor borrows the session's row stream directly and holds the mutable
//!   borrow of the connection for its lifetime.

use crate::config::ResolvedOptions;
use crate::error::{DriverError, DriverResult};
use crate::params::{QueryParam, bind_param};
use crate::pool::PooledConnection;
use crate::row::{Row, decode_pg_row};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use sqlx::postgres::PgRow;
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

enum CursorCommand {
    Fetch {
        max: usize,
        reply: oneshot::Sender<DriverResult<Vec<Row>>>,
    },
    Close,
}

enum CursorSource<'c> {
    /// Worker task owning a pool lease and its row stream.
    Leased { commands: mpsc::Sender<CursorCommand> },
    /// Row stream borrowing the session that produced it.
    Borrowed {
        stream: BoxStream<'c, Result<PgRow, sqlx::Error>>,
        options: ResolvedOptions,
    },
}

/// Lazy row-fetching handle over one executed query.
pub struct Cursor<'c> {
    source: CursorSource<'c>,
    batch: VecDeque<Row>,
    fetch_rows: u32,
    exhausted: bool,
    closed: bool,
    current: Option<Row>,
    id: Uuid,
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("id", &self.id)
            .field("buffered", &self.batch.len())
            .field("exhausted", &self.exhausted)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Cursor<'static> {
    /// Open a cursor over `sql`, taking ownership of the lease.
    pub(crate) async fn open(
        lease: PooledConnection,
        sql: String,
        params: Vec<QueryParam>,
        options: ResolvedOptions,
    ) -> DriverResult<Self> {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(stream_worker(lease, sql, params, options, rx, id));

        debug!(cursor_id = %id, fetch_rows = options.fetch_rows, "Cursor opened");
        Ok(Self {
            source: CursorSource::Leased { commands: tx },
            batch: VecDeque::new(),
            fetch_rows: options.fetch_rows,
            exhausted: false,
            closed: false,
            current: None,
            id,
        })
    }
}

impl<'c> Cursor<'c> {
    /// Wrap a row stream borrowed from a live session.
    pub(crate) fn over_stream(
        stream: BoxStream<'c, Result<PgRow, sqlx::Error>>,
        options: ResolvedOptions,
    ) -> Self {
        let id = Uuid::new_v4();
        debug!(cursor_id = %id, fetch_rows = options.fetch_rows, "Cursor opened over session stream");
        Self {
            source: CursorSource::Borrowed { stream, options },
            batch: VecDeque::new(),
            fetch_rows: options.fetch_rows,
            exhausted: false,
            closed: false,
            current: None,
            id,
        }
    }

    /// Fetch the next row, pulling a new batch from the backend when the
    /// in-memory batch is exhausted. Returns `Ok(None)` at end of data.
    pub async fn next(&mut self) -> DriverResult<Option<Row>> {
        if self.batch.is_empty() && !self.exhausted && !self.closed {
            let max = self.fetch_rows as usize;
            let rows = match &mut self.source {
                CursorSource::Leased { commands } => fetch_from_worker(commands, max).await?,
                CursorSource::Borrowed { stream, options } => {
                    fetch_from_stream(stream, options, max).await?
                }
            };
            if rows.len() < max {
                self.exhausted = true;
            }
            self.batch.extend(rows);
        }

        match self.batch.pop_front() {
            Some(row) => {
                self.current = Some(row.clone());
                Ok(Some(row))
            }
            None => {
                self.current = None;
                // End of data releases the backing resources without an
                // explicit close.
                self.shutdown();
                Ok(None)
            }
        }
    }

    /// The most recently returned row, until the next `next()` call.
    pub fn row(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release backend resources tied to the open result set.
    ///
    /// Idempotent: closing twice, or after natural exhaustion, is a no-op.
    pub async fn close(&mut self) -> DriverResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.batch.clear();
        match &mut self.source {
            // Worker gone already (exhausted) is fine.
            CursorSource::Leased { commands } => {
                let _ = commands.send(CursorCommand::Close).await;
            }
            CursorSource::Borrowed { stream, .. } => {
                *stream = futures_util::stream::empty().boxed();
            }
        }
        debug!(cursor_id = %self.id, "Cursor closed");
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            match &mut self.source {
                CursorSource::Leased { commands } => {
                    let _ = commands.try_send(CursorCommand::Close);
                }
                CursorSource::Borrowed { stream, .. } => {
                    *stream = futures_util::stream::empty().boxed();
                }
            }
        }
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let CursorSource::Leased { commands } = &self.source {
                warn!(cursor_id = %self.id, "Cursor dropped without close - releasing lease");
                let _ = commands.try_send(CursorCommand::Close);
            }
        }
    }
}

/// Pull up to `max` rows out of the worker.
async fn fetch_from_worker(
    commands: &mpsc::Sender<CursorCommand>,
    max: usize,
) -> DriverResult<Vec<Row>> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let sent = commands
        .send(CursorCommand::Fetch {
            max,
            reply: reply_tx,
        })
        .await;
    if sent.is_err() {
        // Worker gone; the short batch marks the cursor exhausted.
        return Ok(Vec::new());
    }
    match reply_rx.await {
        Ok(result) => result,
        Err(_) => Ok(Vec::new()),
    }
}

/// Pull up to `max` rows out of a borrowed session stream.
async fn fetch_from_stream(
    stream: &mut BoxStream<'_, Result<PgRow, sqlx::Error>>,
    options: &ResolvedOptions,
    max: usize,
) -> DriverResult<Vec<Row>> {
    let mut rows = Vec::with_capacity(max);
    while rows.len() < max {
        match stream.next().await {
            Some(Ok(row)) => rows.push(decode_pg_row(&row, options)),
            Some(Err(e)) => return Err(DriverError::from(e)),
            None => break,
        }
    }
    Ok(rows)
}

/// Worker owning the lease and the open row stream.
async fn stream_worker(
    mut lease: PooledConnection,
    sql: String,
    params: Vec<QueryParam>,
    options: ResolvedOptions,
    mut commands: mpsc::Receiver<CursorCommand>,
    id: Uuid,
) {
    match lease.native_stream() {
        None => {
            while let Some(command) = commands.recv().await {
                match command {
                    CursorCommand::Fetch { reply, .. } => {
                        let _ = reply.send(Err(DriverError::ConnectionClosed));
                    }
                    CursorCommand::Close => break,
                }
            }
        }
        Some(native) => {
            let mut query = sqlx::query(&sql);
            for param in &params {
                query = bind_param(query, param);
            }

            let mut stream = query.fetch(native);
            let mut done = false;

            while let Some(command) = commands.recv().await {
                match command {
                    CursorCommand::Fetch { max, reply } => {
                        let mut rows = Vec::with_capacity(max);
                        let mut failure = None;
                        while rows.len() < max && !done {
                            match stream.next().await {
                                Some(Ok(row)) => rows.push(decode_pg_row(&row, &options)),
                                Some(Err(e)) => {
                                    failure = Some(DriverError::from(e));
                                    done = true;
                                }
                                None => done = true,
                            }
                        }
                        let result = match failure {
                            Some(e) => Err(e),
                            None => Ok(rows),
                        };
                        // Receiver may have been dropped mid-fetch.
                        let _ = reply.send(result);
                    }
                    CursorCommand::Close => break,
                }
            }
        }
    }

    debug!(cursor_id = %id, "Cursor worker finished - releasing lease");
    lease.release().await;
}
