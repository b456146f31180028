use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::QueueError;
use crate::model::{Message, MessageStatus, NewMessage, NewResponse, QueueStats, Response, ResponseStatus};
use crate::store::{QueueStore, MAX_RETRIES};
use async_trait::async_trait;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id     TEXT NOT NULL UNIQUE,
    channel         TEXT NOT NULL,
    sender          TEXT NOT NULL,
    sender_address  TEXT,
    body            TEXT NOT NULL,
    files           TEXT,
    agent           TEXT,
    conversation_id TEXT,
    from_agent      TEXT,
    status          TEXT NOT NULL,
    retry_count     INTEGER NOT NULL DEFAULT 0,
    last_error      TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    claimed_by      TEXT
);
CREATE INDEX IF NOT EXISTS idx_messages_status_agent_created
    ON messages (status, agent, created_at);

CREATE TABLE IF NOT EXISTS responses (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id       TEXT NOT NULL,
    channel          TEXT NOT NULL,
    sender           TEXT NOT NULL,
    sender_address   TEXT,
    body             TEXT NOT NULL,
    original_message TEXT NOT NULL,
    from_agent       TEXT,
    files            TEXT,
    status           TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    acked_at         TEXT
);
CREATE INDEX IF NOT EXISTS idx_responses_channel_status ON responses (channel, status);
CREATE INDEX IF NOT EXISTS idx_responses_agent_created ON responses (from_agent, created_at);
"#;

/// `QueueStore` backed by a single SQLite connection, WAL mode, behind a
/// mutex so every write is serialized and claims are atomic by construction
/// (spec.md §4.1 durability requirement).
pub struct SqliteQueueStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteQueueStore {
    pub fn open(path: &Path) -> Result<Self, QueueError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, QueueError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, QueueError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap();
            f(&guard)
        })
        .await?
        .map_err(QueueError::from)
    }
}

fn encode_files(files: &Option<Vec<String>>) -> Option<String> {
    files.as_ref().map(|f| serde_json::to_string(f).unwrap())
}

fn decode_files(raw: Option<String>) -> Option<Vec<String>> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get("id")?,
        external_id: row.get("external_id")?,
        channel: row.get("channel")?,
        sender: row.get("sender")?,
        sender_address: row.get("sender_address")?,
        body: row.get("body")?,
        files: decode_files(row.get("files")?),
        agent: row.get("agent")?,
        conversation_id: row.get("conversation_id")?,
        from_agent: row.get("from_agent")?,
        status: MessageStatus::parse(&row.get::<_, String>("status")?),
        retry_count: row.get::<_, i64>("retry_count")? as u32,
        last_error: row.get("last_error")?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?),
        updated_at: parse_dt(&row.get::<_, String>("updated_at")?),
        claimed_by: row.get("claimed_by")?,
    })
}

fn row_to_response(row: &Row) -> rusqlite::Result<Response> {
    Ok(Response {
        id: row.get("id")?,
        message_id: row.get("message_id")?,
        channel: row.get("channel")?,
        sender: row.get("sender")?,
        sender_address: row.get("sender_address")?,
        body: row.get("body")?,
        original_message: row.get("original_message")?,
        from_agent: row.get("from_agent")?,
        files: decode_files(row.get("files")?),
        status: ResponseStatus::parse(&row.get::<_, String>("status")?),
        created_at: parse_dt(&row.get::<_, String>("created_at")?),
        acked_at: row
            .get::<_, Option<String>>("acked_at")?
            .map(|s| parse_dt(&s)),
    })
}

const MESSAGE_COLUMNS: &str = "id, external_id, channel, sender, sender_address, body, files, \
    agent, conversation_id, from_agent, status, retry_count, last_error, created_at, updated_at, claimed_by";

const RESPONSE_COLUMNS: &str = "id, message_id, channel, sender, sender_address, body, \
    original_message, from_agent, files, status, created_at, acked_at";

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn enqueue_message(&self, data: NewMessage) -> Result<i64, QueueError> {
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO messages
                    (external_id, channel, sender, sender_address, body, files, agent,
                     conversation_id, from_agent, status, retry_count, last_error,
                     created_at, updated_at, claimed_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', 0, NULL, ?10, ?10, NULL)",
                params![
                    data.external_id,
                    data.channel,
                    data.sender,
                    data.sender_address,
                    data.body,
                    encode_files(&data.files),
                    data.agent,
                    data.conversation_id,
                    data.from_agent,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn claim_next_message(&self, agent_id: &str) -> Result<Option<Message>, QueueError> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            // Ties broken by oldest created_at, then lowest id (spec.md §4.1).
            let id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM messages
                     WHERE status = 'pending'
                       AND (agent = ?1 OR (agent IS NULL AND ?1 = 'default'))
                     ORDER BY created_at ASC, id ASC
                     LIMIT 1",
                    params![agent_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(id) = id else {
                tx.commit()?;
                return Ok(None);
            };
            let now = Utc::now().to_rfc3339();
            tx.execute(
                "UPDATE messages SET status = 'processing', claimed_by = ?1, updated_at = ?2 WHERE id = ?3",
                params![agent_id, now, id],
            )?;
            let msg = tx.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )?;
            tx.commit()?;
            Ok(Some(msg))
        })
        .await
    }

    async fn complete_message(&self, id: i64) -> Result<(), QueueError> {
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE messages SET status = 'completed', updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn fail_message(&self, id: i64, error: &str) -> Result<(), QueueError> {
        let error = error.to_string();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let retry_count: i64 =
                tx.query_row("SELECT retry_count FROM messages WHERE id = ?1", params![id], |r| r.get(0))?;
            let retry_count = retry_count + 1;
            let now = Utc::now().to_rfc3339();
            if retry_count as u32 >= MAX_RETRIES {
                tx.execute(
                    "UPDATE messages SET status = 'dead', retry_count = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
                    params![retry_count, error, now, id],
                )?;
            } else {
                tx.execute(
                    "UPDATE messages SET status = 'pending', claimed_by = NULL, retry_count = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
                    params![retry_count, error, now, id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn dead_letter_message(&self, id: i64, reason: &str) -> Result<(), QueueError> {
        let reason = reason.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE messages SET status = 'dead', last_error = ?1, updated_at = ?2 WHERE id = ?3",
                params![reason, now, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn enqueue_response(&self, data: NewResponse) -> Result<i64, QueueError> {
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO responses
                    (message_id, channel, sender, sender_address, body, original_message,
                     from_agent, files, status, created_at, acked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, NULL)",
                params![
                    data.message_id,
                    data.channel,
                    data.sender,
                    data.sender_address,
                    data.body,
                    data.original_message,
                    data.from_agent,
                    encode_files(&data.files),
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn ack_response(&self, id: i64) -> Result<(), QueueError> {
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            // Idempotent: acking an already-acked response is a no-op update,
            // not an error (spec.md §8 law).
            conn.execute(
                "UPDATE responses SET status = 'acked', acked_at = COALESCE(acked_at, ?1) WHERE id = ?2",
                params![now, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn recover_stale_messages(&self, threshold_ms: i64) -> Result<usize, QueueError> {
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let cutoff = Utc::now() - chrono::Duration::milliseconds(threshold_ms);
            let cutoff_s = cutoff.to_rfc3339();
            let ids: Vec<i64> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM messages WHERE status = 'processing' AND updated_at < ?1",
                )?;
                let rows = stmt.query_map(params![cutoff_s], |r| r.get(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            let now = Utc::now().to_rfc3339();
            for id in &ids {
                let retry_count: i64 =
                    tx.query_row("SELECT retry_count FROM messages WHERE id = ?1", params![id], |r| r.get(0))?;
                let retry_count = retry_count + 1;
                if retry_count as u32 >= MAX_RETRIES {
                    tx.execute(
                        "UPDATE messages SET status = 'dead', retry_count = ?1, updated_at = ?2 WHERE id = ?3",
                        params![retry_count, now, id],
                    )?;
                } else {
                    tx.execute(
                        "UPDATE messages SET status = 'pending', claimed_by = NULL, retry_count = ?1, \
                         last_error = 'recovered from stale claim', updated_at = ?2 WHERE id = ?3",
                        params![retry_count, now, id],
                    )?;
                }
            }
            tx.commit()?;
            Ok(ids.len())
        })
        .await
    }

    async fn prune_acked_responses(&self, older_than_ms: i64) -> Result<usize, QueueError> {
        self.with_conn(move |conn| {
            let cutoff = (Utc::now() - chrono::Duration::milliseconds(older_than_ms)).to_rfc3339();
            let n = conn.execute(
                "DELETE FROM responses WHERE status = 'acked' AND acked_at < ?1",
                params![cutoff],
            )?;
            Ok(n)
        })
        .await
    }

    async fn prune_completed_messages(&self, older_than_ms: i64) -> Result<usize, QueueError> {
        self.with_conn(move |conn| {
            let cutoff = (Utc::now() - chrono::Duration::milliseconds(older_than_ms)).to_rfc3339();
            let n = conn.execute(
                "DELETE FROM messages WHERE status = 'completed' AND updated_at < ?1",
                params![cutoff],
            )?;
            Ok(n)
        })
        .await
    }

    async fn get_pending_agents(&self) -> Result<Vec<String>, QueueError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT agent FROM messages WHERE status = 'pending'")?;
            let rows = stmt.query_map([], |r| r.get::<_, Option<String>>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?.unwrap_or_else(|| "default".to_string()));
            }
            Ok(out)
        })
        .await
    }

    async fn pending_responses_for_channel(&self, channel: &str) -> Result<Vec<Response>, QueueError> {
        let channel = channel.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RESPONSE_COLUMNS} FROM responses WHERE channel = ?1 AND status = 'pending' ORDER BY created_at ASC"
            ))?;
            let rows = stmt.query_map(params![channel], row_to_response)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    async fn recent_responses(
        &self,
        agents: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Response>, QueueError> {
        let agents = agents.map(|a| a.to_vec());
        self.with_conn(move |conn| {
            let sql = match &agents {
                Some(a) if !a.is_empty() => {
                    let placeholders = a.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                    format!(
                        "SELECT {RESPONSE_COLUMNS} FROM responses WHERE from_agent IN ({placeholders}) \
                         ORDER BY created_at DESC LIMIT ?"
                    )
                }
                _ => format!("SELECT {RESPONSE_COLUMNS} FROM responses ORDER BY created_at DESC LIMIT ?"),
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows: Vec<Response> = match &agents {
                Some(a) if !a.is_empty() => {
                    let mut p: Vec<&dyn rusqlite::ToSql> = a.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
                    let limit_i = limit as i64;
                    p.push(&limit_i);
                    stmt.query_map(p.as_slice(), row_to_response)?
                        .collect::<Result<Vec<_>, _>>()?
                }
                _ => stmt
                    .query_map(params![limit as i64], row_to_response)?
                    .collect::<Result<Vec<_>, _>>()?,
            };
            Ok(rows)
        })
        .await
    }

    async fn recent_sent_messages(
        &self,
        agents: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Message>, QueueError> {
        let agents = agents.map(|a| a.to_vec());
        self.with_conn(move |conn| {
            let sql = match &agents {
                Some(a) if !a.is_empty() => {
                    let placeholders = a.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                    format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE from_agent IS NULL AND agent IN ({placeholders}) \
                         ORDER BY created_at DESC LIMIT ?"
                    )
                }
                _ => format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE from_agent IS NULL ORDER BY created_at DESC LIMIT ?"
                ),
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows: Vec<Message> = match &agents {
                Some(a) if !a.is_empty() => {
                    let mut p: Vec<&dyn rusqlite::ToSql> = a.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
                    let limit_i = limit as i64;
                    p.push(&limit_i);
                    stmt.query_map(p.as_slice(), row_to_message)?
                        .collect::<Result<Vec<_>, _>>()?
                }
                _ => stmt
                    .query_map(params![limit as i64], row_to_message)?
                    .collect::<Result<Vec<_>, _>>()?,
            };
            Ok(rows)
        })
        .await
    }

    async fn queue_stats(&self) -> Result<QueueStats, QueueError> {
        self.with_conn(|conn| {
            let count = |status: &str| -> rusqlite::Result<u64> {
                conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE status = ?1",
                    params![status],
                    |r| r.get::<_, i64>(0),
                )
                .map(|n| n as u64)
            };
            let responses_pending: u64 = conn.query_row(
                "SELECT COUNT(*) FROM responses WHERE status = 'pending'",
                [],
                |r| r.get::<_, i64>(0),
            )? as u64;
            Ok(QueueStats {
                pending: count("pending")?,
                processing: count("processing")?,
                completed: count("completed")?,
                dead: count("dead")?,
                responses_pending,
            })
        })
        .await
    }

    async fn get_message(&self, id: i64) -> Result<Option<Message>, QueueError> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .optional()
        })
        .await
    }

    async fn dead_messages(&self, limit: usize) -> Result<Vec<Message>, QueueError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE status = 'dead' ORDER BY updated_at DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit as i64], row_to_message)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    async fn delete_message(&self, id: i64) -> Result<(), QueueError> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn retry_dead_message(&self, id: i64) -> Result<(), QueueError> {
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE messages SET status = 'pending', retry_count = 0, claimed_by = NULL, \
                 last_error = NULL, updated_at = ?1 WHERE id = ?2 AND status = 'dead'",
                params![now, id],
            )?;
            Ok(())
        })
        .await
    }
}
