//! Message persistence.
//!
//! Every outbound message is saved with its sequence number before it is
//! written to the socket; that is what makes a ResendRequest answerable
//! after a crash or reconnect. Inbound messages are kept as well for
//! audit. The engine only ever talks to the [`MessageStorage`] trait;
//! [`MemoryStorage`] lives here and the sqlite backend sits behind the
//! `sqlite` feature.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("storage task is gone")]
    Disconnected,
}

/// Which way a stored message traveled, relative to this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// The persistence contract of a FIX session.
///
/// Sequence numbers survive reconnects, so the store also keeps the
/// next-incoming/next-outgoing counters per session id. `reset` drops
/// everything for a session; it backs ResetSeqNumFlag=Y logons.
#[async_trait]
pub trait MessageStorage: Send + Sync {
    async fn save(
        &self,
        session_id: &str,
        direction: Direction,
        seq_num: u32,
        raw: &[u8],
    ) -> Result<(), StorageError>;

    /// Outbound messages with `from_seq <= seq <= to_seq`, ascending.
    async fn messages(
        &self,
        session_id: &str,
        from_seq: u32,
        to_seq: u32,
    ) -> Result<Vec<(u32, Vec<u8>)>, StorageError>;

    async fn reset(&self, session_id: &str) -> Result<(), StorageError>;

    /// `(next_incoming, next_outgoing)` for the session, starting at (1, 1).
    async fn sequences(&self, session_id: &str) -> Result<(u32, u32), StorageError>;

    async fn store_sequences(
        &self,
        session_id: &str,
        next_incoming: u32,
        next_outgoing: u32,
    ) -> Result<(), StorageError>;

    /// Called once at session teardown. Backends flush here.
    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[derive(Default)]
struct SessionRecord {
    outgoing: Vec<(u32, Vec<u8>)>,
    incoming: Vec<(u32, Vec<u8>)>,
    next_incoming: u32,
    next_outgoing: u32,
}

impl SessionRecord {
    fn new() -> SessionRecord {
        SessionRecord {
            outgoing: Vec::new(),
            incoming: Vec::new(),
            next_incoming: 1,
            next_outgoing: 1,
        }
    }
}

/// Keeps everything in process memory. Sessions do not survive a restart,
/// which is fine for tests and for counterparties that reset sequence
/// numbers at every logon.
#[derive(Default)]
pub struct MemoryStorage {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        Default::default()
    }
}

#[async_trait]
impl MessageStorage for MemoryStorage {
    async fn save(
        &self,
        session_id: &str,
        direction: Direction,
        seq_num: u32,
        raw: &[u8],
    ) -> Result<(), StorageError> {
        let mut sessions = self.sessions.lock().unwrap();
        let record = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionRecord::new);
        match direction {
            Direction::Outbound => record.outgoing.push((seq_num, raw.to_vec())),
            Direction::Inbound => record.incoming.push((seq_num, raw.to_vec())),
        }
        Ok(())
    }

    async fn messages(
        &self,
        session_id: &str,
        from_seq: u32,
        to_seq: u32,
    ) -> Result<Vec<(u32, Vec<u8>)>, StorageError> {
        let sessions = self.sessions.lock().unwrap();
        let mut found: Vec<(u32, Vec<u8>)> = sessions
            .get(session_id)
            .map(|record| {
                record
                    .outgoing
                    .iter()
                    .filter(|(seq, _)| (from_seq..=to_seq).contains(seq))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by_key(|(seq, _)| *seq);
        Ok(found)
    }

    async fn reset(&self, session_id: &str) -> Result<(), StorageError> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(session_id.to_string(), SessionRecord::new());
        Ok(())
    }

    async fn sequences(&self, session_id: &str) -> Result<(u32, u32), StorageError> {
        let mut sessions = self.sessions.lock().unwrap();
        let record = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionRecord::new);
        Ok((record.next_incoming, record.next_outgoing))
    }

    async fn store_sequences(
        &self,
        session_id: &str,
        next_incoming: u32,
        next_outgoing: u32,
    ) -> Result<(), StorageError> {
        let mut sessions = self.sessions.lock().unwrap();
        let record = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionRecord::new);
        record.next_incoming = next_incoming;
        record.next_outgoing = next_outgoing;
        Ok(())
    }
}
