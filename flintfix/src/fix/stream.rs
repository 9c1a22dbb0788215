//! Framing: cutting a byte stream into complete FIX messages.
//!
//! A frame is located by its envelope alone: `8=FIX.4.4<SOH>9=<len><SOH>`
//! up front and the seven-byte `10=ccc<SOH>` at the back. The [`Framer`]
//! accumulates bytes until a whole frame is buffered, hands it out, and
//! keeps whatever followed for the next call. When the front of the buffer
//! is not a valid envelope, bytes are shed up to the next plausible frame
//! start, so one corrupt message costs at most the junk before the next
//! `8=F`.

use crate::fix::log::Logger;
use crate::fix::mem::MsgBuf;
use crate::fix::{decode, GarbledMessageType, SessionError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// Enough buffered bytes to hold BeginString, BodyLength and MsgType.
pub(super) const ENVELOPE_LEN: usize = 32;

const FRAME_MARKER: &[u8] = b"8=F";
const READ_CHUNK: usize = 4096;

/// A restartable frame cutter over an async byte source. All buffering
/// lives here; after any frame or any error the framer is ready for the
/// next call.
pub(super) struct Framer<R> {
    source: R,
    buffered: Vec<u8>,
}

impl<R> Framer<R>
where
    R: AsyncRead + Unpin,
{
    pub(super) fn new(source: R) -> Framer<R> {
        Framer {
            source,
            buffered: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Yields the next complete frame.
    ///
    /// On garbled input the bytes up to the next plausible frame start are
    /// logged and dropped before the error is reported; calling again
    /// resumes from the surviving bytes. A clean end of stream surfaces as
    /// [`SessionError::TcpDisconnection`].
    pub(super) async fn next_frame(
        &mut self,
        logger: &mut impl Logger,
    ) -> Result<MsgBuf, SessionError> {
        self.buffer_at_least(ENVELOPE_LEN).await?;

        let total = match decode::parse_peeked_prefix(&self.buffered[..ENVELOPE_LEN]) {
            Ok(peek) if peek.msg_length >= ENVELOPE_LEN => peek.msg_length,
            Ok(_) => {
                self.shed_garbage(logger)?;
                return Err(SessionError::new_garbled_message(
                    String::from("BodyLength shorter than the fixed header"),
                    GarbledMessageType::BodyLengthIssue,
                ));
            }
            Err(e) => {
                self.shed_garbage(logger)?;
                return Err(e);
            }
        };

        self.buffer_at_least(total).await?;
        let frame: Vec<u8> = self.buffered.drain(..total).collect();

        // BodyLength must land the checksum field exactly at the tail
        if !frame_ends_with_checksum(&frame) {
            logger.log_message(&frame.into())?;
            return Err(SessionError::new_garbled_message(
                String::from("BodyLength(9) was incorrect"),
                GarbledMessageType::BodyLengthIssue,
            ));
        }

        let msg: MsgBuf = frame.into();
        logger.log_message(&msg)?;
        Ok(msg)
    }

    async fn buffer_at_least(&mut self, want: usize) -> Result<(), SessionError> {
        let mut chunk = [0u8; READ_CHUNK];
        while self.buffered.len() < want {
            let n = self.source.read(&mut chunk).await?;
            if n == 0 {
                return Err(SessionError::TcpDisconnection);
            }
            self.buffered.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    // The front of the buffer is not a frame. Drop at least one byte and
    // everything further up to the next frame marker. With no marker in
    // sight the whole buffer is junk, except that a torn `8=` at the very
    // end survives for the next read to complete.
    fn shed_garbage(&mut self, logger: &mut impl Logger) -> Result<(), SessionError> {
        let junk_len = match find_marker(&self.buffered[1..]) {
            Some(at) => at + 1,
            None => self.buffered.len() - torn_marker_len(&self.buffered),
        };
        let junk: Vec<u8> = self.buffered.drain(..junk_len).collect();
        logger.log_message(&junk.into())
    }
}

fn find_marker(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(FRAME_MARKER.len())
        .position(|window| window == FRAME_MARKER)
}

// Length of a partial frame marker dangling at the end of the buffer.
fn torn_marker_len(bytes: &[u8]) -> usize {
    if bytes.ends_with(b"8=") {
        2
    } else if bytes.ends_with(b"8") {
        1
    } else {
        0
    }
}

fn frame_ends_with_checksum(frame: &[u8]) -> bool {
    frame.len() >= 7 && &frame[frame.len() - 7..frame.len() - 4] == b"10="
}

/// Puts one frame on the wire and logs it. A broken pipe means the peer
/// hung up, which the session treats as a disconnection rather than an
/// ordinary I/O failure.
pub(super) async fn write_frame<W: AsyncWrite + Unpin>(
    sink: &mut W,
    frame: &MsgBuf,
    logger: &mut impl Logger,
) -> Result<(), SessionError> {
    match sink.write_all(frame.as_slice()).await {
        Ok(()) => logger.log_message(frame),
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            Err(SessionError::TcpDisconnection)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fix::log::NullLogger;
    use crate::fix::GarbledMessageType;
    use std::io::Cursor;

    const LOGON: &[u8] = b"8=FIX.4.4\x019=67\x0135=A\x0134=1\x0149=ISLD\x0152=20240506-13:59:15.021\x0156=TW\x0198=0\x01108=30\x01141=Y\x0110=003\x01";

    #[tokio::test]
    async fn test_one_frame() {
        let mut logger = NullLogger;
        let mut framer = Framer::new(Cursor::new(LOGON));
        let msg = framer.next_frame(&mut logger).await.unwrap();
        assert_eq!(msg.as_slice(), LOGON);
        assert!(framer.buffered.is_empty());
    }

    #[tokio::test]
    async fn test_back_to_back_frames() {
        let mut stream = LOGON.to_vec();
        stream.extend_from_slice(LOGON);
        let mut logger = NullLogger;
        let mut framer = Framer::new(Cursor::new(stream));

        let first = framer.next_frame(&mut logger).await.unwrap();
        let second = framer.next_frame(&mut logger).await.unwrap();
        assert_eq!(first.as_slice(), LOGON);
        assert_eq!(second.as_slice(), LOGON);
        assert!(matches!(
            framer.next_frame(&mut logger).await,
            Err(SessionError::TcpDisconnection)
        ));
    }

    #[tokio::test]
    async fn test_wrong_begin_string_is_shed_and_next_frame_survives() {
        let mut stream = b"8=FIX.4.2\x019=67\x0135=A\x01plus some trailing junk".to_vec();
        stream.extend_from_slice(LOGON);
        let mut logger = NullLogger;
        let mut framer = Framer::new(Cursor::new(stream));

        assert!(matches!(
            framer.next_frame(&mut logger).await,
            Err(SessionError::GarbledMessage {
                garbled_msg_type: GarbledMessageType::BeginStringIssue,
                ..
            })
        ));
        // everything before the next frame marker is gone; the good frame
        // comes out whole
        let msg = framer.next_frame(&mut logger).await.unwrap();
        assert_eq!(msg.as_slice(), LOGON);
    }

    #[tokio::test]
    async fn test_junk_without_marker_keeps_torn_tail() {
        let stream = b"9=FIX.4.4\x01xxxxxxxxxxxxxxxxxxxxxxxxxxxxx8=";
        let mut logger = NullLogger;
        let mut framer = Framer::new(Cursor::new(&stream[..]));

        assert!(framer.next_frame(&mut logger).await.is_err());
        assert_eq!(framer.buffered, b"8=");
        // nothing more arrives to complete the marker
        assert!(matches!(
            framer.next_frame(&mut logger).await,
            Err(SessionError::TcpDisconnection)
        ));
    }

    #[tokio::test]
    async fn test_undersized_body_length_is_garbled() {
        // 9=2 puts the whole frame inside the envelope prefix
        let stream = b"8=FIX.4.4\x019=2\x0135=A\x0134=1\x0149=X\x0156=Y\x0110=000\x01";
        let mut logger = NullLogger;
        let mut framer = Framer::new(Cursor::new(&stream[..]));
        assert!(matches!(
            framer.next_frame(&mut logger).await,
            Err(SessionError::GarbledMessage {
                garbled_msg_type: GarbledMessageType::BodyLengthIssue,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_body_length_must_end_at_checksum() {
        // declares 40 but the real body is 67 bytes, so the cut lands
        // somewhere inside the message
        let mut frame = LOGON.to_vec();
        frame[12..14].copy_from_slice(b"40");
        frame.extend_from_slice(LOGON);
        let mut logger = NullLogger;
        let mut framer = Framer::new(Cursor::new(frame));
        assert!(matches!(
            framer.next_frame(&mut logger).await,
            Err(SessionError::GarbledMessage {
                garbled_msg_type: GarbledMessageType::BodyLengthIssue,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let mut logger = NullLogger;
        let mut framer = Framer::new(Cursor::new(&b""[..]));
        assert!(matches!(
            framer.next_frame(&mut logger).await,
            Err(SessionError::TcpDisconnection)
        ));
    }

    #[test]
    fn test_torn_marker_len() {
        assert_eq!(torn_marker_len(b"xxx8="), 2);
        assert_eq!(torn_marker_len(b"xxx8"), 1);
        assert_eq!(torn_marker_len(b"xxx"), 0);
        assert_eq!(torn_marker_len(b"xxx8=x"), 0);
    }

    #[test]
    fn test_find_marker() {
        assert_eq!(find_marker(b"xx8=Fxxx"), Some(2));
        assert_eq!(find_marker(b"8=F"), Some(0));
        assert_eq!(find_marker(b"xx8=xxx"), None);
        assert_eq!(find_marker(b""), None);
    }
}
