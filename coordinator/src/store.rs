//! Durable state behind the coordinator: best scores, active sessions, and
//! closed rounds, all in one SQLite database.
//!
//! Correctness under concurrent submissions comes from the store's own
//! primitives rather than application locks: the score upsert only replaces a
//! row when the new value is strictly larger, session creation is
//! replace-on-conflict keyed by wallet, and round closure is an insert-once
//! write.

use holdout_types::{RoundClosure, ScoreRow, Session, Wallet};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS scores (
                round_id INTEGER NOT NULL,
                wallet TEXT NOT NULL,
                best_score_ms INTEGER NOT NULL,
                achieved_at_ms INTEGER NOT NULL,
                PRIMARY KEY (round_id, wallet)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                wallet TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                round_id INTEGER NOT NULL,
                started_at_ms INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS rounds (
                round_id INTEGER PRIMARY KEY,
                winner TEXT NOT NULL,
                closing_pot_wei TEXT NOT NULL,
                closed_at_ms INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create or replace the wallet's session. One session per wallet; a new
    /// attempt silently supersedes an unconsumed one.
    pub fn put_session(&self, session: &Session) -> Result<()> {
        self.lock().execute(
            "INSERT INTO sessions (wallet, token, round_id, started_at_ms)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(wallet) DO UPDATE SET
                 token = excluded.token,
                 round_id = excluded.round_id,
                 started_at_ms = excluded.started_at_ms",
            params![
                session.wallet.to_string(),
                session.token,
                session.round_id,
                session.started_at_ms
            ],
        )?;
        Ok(())
    }

    /// Remove and return the wallet's session, if any. Consumption happens
    /// before the caller judges the token, so a session can never be used
    /// twice whatever the outcome.
    pub fn take_session(&self, wallet: &Wallet) -> Result<Option<Session>> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let row = tx
            .query_row(
                "SELECT token, round_id, started_at_ms FROM sessions WHERE wallet = ?1",
                params![wallet.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u64>(1)?,
                        row.get::<_, u64>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((token, round_id, started_at_ms)) = row else {
            return Ok(None);
        };
        tx.execute(
            "DELETE FROM sessions WHERE wallet = ?1",
            params![wallet.to_string()],
        )?;
        tx.commit()?;
        Ok(Some(Session {
            wallet: *wallet,
            token,
            round_id,
            started_at_ms,
        }))
    }

    /// Keep-the-maximum score write. A single conditional upsert, so two
    /// concurrent submissions cannot both win from stale reads. Returns the
    /// value now stored, which is the previous best when the update loses.
    pub fn record_if_best(
        &self,
        round_id: u64,
        wallet: &Wallet,
        score_ms: u64,
        now_ms: u64,
    ) -> Result<u64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO scores (round_id, wallet, best_score_ms, achieved_at_ms)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(round_id, wallet) DO UPDATE SET
                 best_score_ms = excluded.best_score_ms,
                 achieved_at_ms = excluded.achieved_at_ms
             WHERE excluded.best_score_ms > scores.best_score_ms",
            params![round_id, wallet.to_string(), score_ms, now_ms],
        )?;
        let best = conn.query_row(
            "SELECT best_score_ms FROM scores WHERE round_id = ?1 AND wallet = ?2",
            params![round_id, wallet.to_string()],
            |row| row.get(0),
        )?;
        Ok(best)
    }

    /// Ranked scores for a round: descending by score, ties to the earliest
    /// achiever.
    pub fn leaderboard(&self, round_id: u64, limit: usize) -> Result<Vec<ScoreRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT wallet, best_score_ms, achieved_at_ms FROM scores
             WHERE round_id = ?1
             ORDER BY best_score_ms DESC, achieved_at_ms ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![round_id, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u64>(1)?,
                row.get::<_, u64>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (wallet, best_score_ms, achieved_at_ms) = row?;
            let wallet = Wallet::from_str(&wallet)
                .map_err(|err| StoreError::Corrupt(format!("wallet {wallet}: {err}")))?;
            out.push(ScoreRow {
                wallet,
                best_score_ms,
                achieved_at_ms,
            });
        }
        Ok(out)
    }

    pub fn top_score(&self, round_id: u64) -> Result<Option<ScoreRow>> {
        Ok(self.leaderboard(round_id, 1)?.into_iter().next())
    }

    /// Close-once write. Returns whether this call recorded the closure;
    /// false means another writer already did.
    pub fn close_round(
        &self,
        round_id: u64,
        winner: &Wallet,
        closing_pot_wei: u128,
        now_ms: u64,
    ) -> Result<bool> {
        let changed = self.lock().execute(
            "INSERT OR IGNORE INTO rounds (round_id, winner, closing_pot_wei, closed_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                round_id,
                winner.to_string(),
                closing_pot_wei.to_string(),
                now_ms
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn round_closure(&self, round_id: u64) -> Result<Option<RoundClosure>> {
        let row = self
            .lock()
            .query_row(
                "SELECT winner, closing_pot_wei, closed_at_ms FROM rounds WHERE round_id = ?1",
                params![round_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u64>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((winner, closing_pot_wei, closed_at_ms)) = row else {
            return Ok(None);
        };
        let winner = Wallet::from_str(&winner)
            .map_err(|err| StoreError::Corrupt(format!("winner {winner}: {err}")))?;
        let closing_pot_wei = closing_pot_wei
            .parse::<u128>()
            .map_err(|err| StoreError::Corrupt(format!("pot {closing_pot_wei}: {err}")))?;
        Ok(Some(RoundClosure {
            round_id,
            winner,
            closing_pot_wei,
            closed_at_ms,
        }))
    }
}
