//! SQLite sink for numbered lines: one transaction per batch, WAL journal, a small pool of
//! connections shared by the workers.

use anyhow::{Context, Result};
use log::debug;
use rusqlite::{Connection, ErrorCode, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::engine::{AttemptsExecutor, BatchJob, TaskContext};
use crate::error::BatchError;
use crate::pipeline::Line;

/// WAL tuning pragmas. Use after `PRAGMA journal_mode = WAL`.
const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        "#;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS lines (
    line_no INTEGER PRIMARY KEY,
    text TEXT NOT NULL,
    hash BLOB NOT NULL
);
"#;

const INSERT_LINE_SQL: &str =
    "INSERT OR REPLACE INTO lines (line_no, text, hash) VALUES (?1, ?2, ?3)";

/// How long SQLite itself waits on a locked database before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Row as stored: (line number, text, blake3 digest of the text).
pub type StoredLine = (u64, String, Vec<u8>);

pub struct SqliteSink {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
    retry: AttemptsExecutor,
}

fn open_conn(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).context("open database")?;
    conn.busy_timeout(BUSY_TIMEOUT).context("set busy timeout")?;
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .context("enable WAL")?;
    conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
    Ok(conn)
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Write all lines in one transaction.
fn insert_lines(conn: &mut Connection, lines: &[Line]) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(INSERT_LINE_SQL)?;
        for line in lines {
            let hash = blake3::hash(line.text.as_bytes());
            stmt.execute(params![
                line.number as i64,
                line.text,
                hash.as_bytes().as_slice()
            ])?;
        }
    }
    tx.commit()?;
    Ok(lines.len())
}

impl SqliteSink {
    /// Open or create the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_conn(path)
            .with_context(|| format!("Failed to open sink database {}", path.display()))?;
        conn.execute_batch(SCHEMA).context("create schema")?;
        Ok(Self {
            path: path.to_path_buf(),
            idle: Mutex::new(vec![conn]),
            retry: AttemptsExecutor::new(
                5,
                Duration::from_millis(10),
                Duration::from_millis(100),
            )?,
        })
    }

    pub fn with_retry(mut self, retry: AttemptsExecutor) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn checkout(&self) -> Result<Connection> {
        let pooled = self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => open_conn(&self.path),
        }
    }

    fn checkin(&self, conn: Connection) {
        self.idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(conn);
    }

    /// Persist `lines`, retrying while the database is busy. Exhausted retries surface as
    /// `BatchError::Overloaded` so a dynamic rate executor backs off.
    pub fn write_lines(&self, lines: &[Line]) -> Result<usize> {
        let mut conn = self.checkout()?;
        let res = self.retry.run(|| insert_lines(&mut conn, lines), is_busy);
        self.checkin(conn);
        match res {
            Ok(n) => {
                debug!("Stored {} lines", n);
                Ok(n)
            }
            Err(e) if is_busy(&e) => {
                Err(anyhow::Error::new(BatchError::overloaded(e.to_string())))
            }
            Err(e) => Err(e).context("insert lines"),
        }
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.checkout()?;
        let n: Result<i64> = conn
            .query_row("SELECT COUNT(*) FROM lines", [], |row| row.get(0))
            .context("count lines");
        let n = n.map(|n| n.max(0) as usize);
        self.checkin(conn);
        n
    }

    /// Every stored row, ordered by line number.
    pub fn load(&self) -> Result<Vec<StoredLine>> {
        let conn = self.checkout()?;
        let rows = Self::load_rows(&conn);
        self.checkin(conn);
        rows
    }

    fn load_rows(conn: &Connection) -> Result<Vec<StoredLine>> {
        let mut stmt = conn.prepare("SELECT line_no, text, hash FROM lines ORDER BY line_no")?;
        let rows = stmt.query_map([], |row| {
            let no: i64 = row.get(0)?;
            Ok((no.max(0) as u64, row.get(1)?, row.get(2)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl BatchJob<Vec<Line>> for SqliteSink {
    fn process(&self, batch: Vec<Line>, ctx: &TaskContext) -> Result<()> {
        ctx.ensure_active()?;
        self.write_lines(&batch)
            .with_context(|| format!("batch {}", ctx.seq()))?;
        Ok(())
    }
}
