//! Durable message storage on sqlite.
//!
//! A single connection lives on its own task; the trait methods send it
//! requests over a channel and await the answer. WAL mode keeps the
//! engine's save-before-write on the fast path.

use crate::fix::store::{Direction, MessageStorage, StorageError};

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use tokio_rusqlite::Connection;

const SQL_ENTER_WAL_MODE: &str = "PRAGMA journal_mode=WAL;";
const SQL_VACUUM: &str = "VACUUM;";
const SQL_CREATE_MESSAGES: &str = "CREATE TABLE IF NOT EXISTS messages (key INTEGER PRIMARY KEY AUTOINCREMENT, session_id VARCHAR, direction VARCHAR, msg_seq_num INT, message BLOB);";
const SQL_CREATE_SEQUENCES: &str =
    "CREATE TABLE IF NOT EXISTS sequences (session_id VARCHAR, next_incoming INTEGER, next_outgoing INTEGER);";
const SQL_ENSURE_SEQUENCE_ROW: &str = "INSERT INTO sequences(session_id, next_incoming, next_outgoing) SELECT ?1,1,1 WHERE NOT EXISTS (SELECT * FROM sequences WHERE session_id = ?1);";
const SQL_INSERT_MESSAGE: &str =
    "INSERT INTO messages (session_id, direction, msg_seq_num, message) VALUES (?,?,?,?);";
const SQL_SELECT_RANGE: &str = "SELECT msg_seq_num, message FROM messages WHERE session_id = ?1 AND direction = 'out' AND msg_seq_num BETWEEN ?2 AND ?3 ORDER BY msg_seq_num ASC;";
const SQL_SELECT_SEQUENCES: &str =
    "SELECT next_incoming, next_outgoing FROM sequences WHERE session_id = ?;";
const SQL_UPDATE_SEQUENCES: &str =
    "UPDATE sequences SET next_incoming = ?1, next_outgoing = ?2 WHERE session_id = ?3;";
const SQL_DELETE_MESSAGES: &str = "DELETE FROM messages WHERE session_id = ?;";
const SQL_RESET_SEQUENCES: &str =
    "UPDATE sequences SET next_incoming = 1, next_outgoing = 1 WHERE session_id = ?;";

enum StoreRequest {
    Save(
        String,
        Direction,
        u32,
        Vec<u8>,
        oneshot::Sender<Result<(), StorageError>>,
    ),
    #[allow(clippy::type_complexity)]
    Messages(
        String,
        u32,
        u32,
        oneshot::Sender<Result<Vec<(u32, Vec<u8>)>, StorageError>>,
    ),
    Reset(String, oneshot::Sender<Result<(), StorageError>>),
    Sequences(String, oneshot::Sender<Result<(u32, u32), StorageError>>),
    StoreSequences(String, u32, u32, oneshot::Sender<Result<(), StorageError>>),
    Close(oneshot::Sender<Result<(), StorageError>>),
}

pub struct SqliteStorage {
    sender: mpsc::UnboundedSender<StoreRequest>,
}

impl SqliteStorage {
    pub async fn build(store_path: &Path) -> Result<SqliteStorage, StorageError> {
        let conn = Connection::open(store_path.to_path_buf())
            .await
            .map_err(to_backend_err)?;
        setup(&conn).await?;
        let (sender, mut receiver) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(req) = receiver.recv().await {
                match req {
                    StoreRequest::Save(session_id, direction, seq, msg, resp) => {
                        let _ = resp.send(save(&conn, session_id, direction, seq, msg).await);
                    }
                    StoreRequest::Messages(session_id, from, to, resp) => {
                        let _ = resp.send(messages(&conn, session_id, from, to).await);
                    }
                    StoreRequest::Reset(session_id, resp) => {
                        let _ = resp.send(reset(&conn, session_id).await);
                    }
                    StoreRequest::Sequences(session_id, resp) => {
                        let _ = resp.send(sequences(&conn, session_id).await);
                    }
                    StoreRequest::StoreSequences(session_id, incoming, outgoing, resp) => {
                        let _ =
                            resp.send(store_sequences(&conn, session_id, incoming, outgoing).await);
                    }
                    StoreRequest::Close(resp) => {
                        let _ = resp.send(vacuum(&conn).await);
                        drop(conn);
                        break;
                    }
                }
            }
        });

        Ok(SqliteStorage { sender })
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, StorageError>>) -> StoreRequest,
    ) -> Result<T, StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(make(sender))
            .map_err(|_| StorageError::Disconnected)?;
        receiver.await.map_err(|_| StorageError::Disconnected)?
    }
}

#[async_trait]
impl MessageStorage for SqliteStorage {
    async fn save(
        &self,
        session_id: &str,
        direction: Direction,
        seq_num: u32,
        raw: &[u8],
    ) -> Result<(), StorageError> {
        let session_id = session_id.to_string();
        let raw = raw.to_vec();
        self.request(move |resp| StoreRequest::Save(session_id, direction, seq_num, raw, resp))
            .await
    }

    async fn messages(
        &self,
        session_id: &str,
        from_seq: u32,
        to_seq: u32,
    ) -> Result<Vec<(u32, Vec<u8>)>, StorageError> {
        let session_id = session_id.to_string();
        self.request(move |resp| StoreRequest::Messages(session_id, from_seq, to_seq, resp))
            .await
    }

    async fn reset(&self, session_id: &str) -> Result<(), StorageError> {
        let session_id = session_id.to_string();
        self.request(move |resp| StoreRequest::Reset(session_id, resp))
            .await
    }

    async fn sequences(&self, session_id: &str) -> Result<(u32, u32), StorageError> {
        let session_id = session_id.to_string();
        self.request(move |resp| StoreRequest::Sequences(session_id, resp))
            .await
    }

    async fn store_sequences(
        &self,
        session_id: &str,
        next_incoming: u32,
        next_outgoing: u32,
    ) -> Result<(), StorageError> {
        let session_id = session_id.to_string();
        self.request(move |resp| {
            StoreRequest::StoreSequences(session_id, next_incoming, next_outgoing, resp)
        })
        .await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.request(StoreRequest::Close).await
    }
}

fn direction_str(direction: Direction) -> &'static str {
    match direction {
        Direction::Inbound => "in",
        Direction::Outbound => "out",
    }
}

fn to_backend_err<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Backend(e.to_string())
}

async fn setup(conn: &Connection) -> Result<(), StorageError> {
    conn.call(move |conn| {
        conn.query_row(SQL_ENTER_WAL_MODE, (), |_| Ok(()))?;
        conn.execute(SQL_CREATE_MESSAGES, ())?;
        conn.execute(SQL_CREATE_SEQUENCES, ())?;
        Ok(())
    })
    .await
    .map_err(to_backend_err::<rusqlite::Error>)
}

async fn vacuum(conn: &Connection) -> Result<(), StorageError> {
    conn.call(move |conn| conn.execute(SQL_VACUUM, []))
        .await
        .map(|_| ())
        .map_err(to_backend_err)
}

async fn save(
    conn: &Connection,
    session_id: String,
    direction: Direction,
    seq: u32,
    msg: Vec<u8>,
) -> Result<(), StorageError> {
    conn.call(move |conn| {
        conn.execute(
            SQL_INSERT_MESSAGE,
            (session_id, direction_str(direction), seq, msg),
        )
    })
    .await
    .map(|_| ())
    .map_err(to_backend_err)
}

async fn messages(
    conn: &Connection,
    session_id: String,
    from_seq: u32,
    to_seq: u32,
) -> Result<Vec<(u32, Vec<u8>)>, StorageError> {
    conn.call(move |conn| -> rusqlite::Result<Vec<(u32, Vec<u8>)>> {
        let mut stmt = conn.prepare(SQL_SELECT_RANGE)?;
        let rows = stmt.query_map(rusqlite::params![session_id, from_seq, to_seq], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        let mut output = Vec::new();
        for row in rows {
            output.push(row?);
        }
        Ok(output)
    })
    .await
    .map_err(to_backend_err)
}

async fn reset(conn: &Connection, session_id: String) -> Result<(), StorageError> {
    conn.call(move |conn| {
        conn.execute(SQL_DELETE_MESSAGES, (session_id.clone(),))?;
        conn.execute(SQL_ENSURE_SEQUENCE_ROW, (session_id.clone(),))?;
        conn.execute(SQL_RESET_SEQUENCES, (session_id,))
    })
    .await
    .map(|_| ())
    .map_err(to_backend_err)
}

async fn sequences(conn: &Connection, session_id: String) -> Result<(u32, u32), StorageError> {
    conn.call(move |conn| {
        conn.execute(SQL_ENSURE_SEQUENCE_ROW, (session_id.clone(),))?;
        conn.query_row(SQL_SELECT_SEQUENCES, (session_id,), |r| {
            let next_incoming: u32 = r.get(0)?;
            let next_outgoing: u32 = r.get(1)?;
            Ok((next_incoming, next_outgoing))
        })
    })
    .await
    .map_err(to_backend_err)
}

async fn store_sequences(
    conn: &Connection,
    session_id: String,
    next_incoming: u32,
    next_outgoing: u32,
) -> Result<(), StorageError> {
    conn.call(move |conn| {
        conn.execute(SQL_ENSURE_SEQUENCE_ROW, (session_id.clone(),))?;
        conn.execute(
            SQL_UPDATE_SEQUENCES,
            (next_incoming, next_outgoing, session_id),
        )
    })
    .await
    .map(|_| ())
    .map_err(to_backend_err)
}
