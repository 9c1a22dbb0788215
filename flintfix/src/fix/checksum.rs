use std::io::Write;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// Wraps a [`Write`] and keeps a running byte sum of everything written.
/// The FIX CheckSum(10) is that sum modulo 256.
pub struct ChecksumWriter<W> {
    inner: W,
    sum: usize,
}

impl<W> Write for ChecksumWriter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        for c in &buf[..written] {
            self.sum += (*c) as usize;
        }
        Ok(written)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<W> ChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        ChecksumWriter { inner, sum: 0 }
    }
    pub fn checksum(&self) -> usize {
        self.sum % 256
    }
}

/// Async flavor of [`ChecksumWriter`] for the engine's socket path.
pub struct AsyncChecksumWriter<W> {
    inner: W,
    sum: usize,
}

impl<W> AsyncWrite for AsyncChecksumWriter<W>
where
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        let me = self.get_mut();
        match Pin::new(&mut me.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                for c in &buf[..n] {
                    me.sum += (*c) as usize;
                }
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }
    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<W> AsyncChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        AsyncChecksumWriter { inner, sum: 0 }
    }
    pub fn checksum(&self) -> usize {
        self.sum % 256
    }
}

pub fn calc_checksum(bytes: &[u8]) -> u32 {
    bytes.iter().map(|c| *c as u32).sum::<u32>() % 256
}

/// Checks the `10=ccc<SOH>` trailer of a complete framed message against the
/// sum of every byte before it.
pub fn checksum_is_valid(msg_buf: &[u8]) -> bool {
    if let Some(checksum) = parse_checksum(msg_buf) {
        return calc_checksum(&msg_buf[..msg_buf.len() - 7]) == checksum;
    }
    false
}

fn parse_checksum(msg_buf: &[u8]) -> Option<u32> {
    if msg_buf.len() < 7 {
        return None;
    }
    let tail = &msg_buf[msg_buf.len() - 7..];
    if &tail[0..3] != b"10="
        || !tail[3..6].iter().all(|&byte| byte.is_ascii_digit())
        || tail[6] != b'\x01'
    {
        return None;
    }
    std::str::from_utf8(&tail[3..6]).ok()?.parse().ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_calc_checksum() {
        let tests: Vec<(&[u8], u32)> = vec![
            (b"8=FIX.4.4\x019=5\x0135=0\x01", 163),
            (b"", 0),
        ];
        for (bytes, want) in tests {
            assert_eq!(calc_checksum(bytes), want);
        }
    }

    #[test]
    fn test_checksum_writer_tracks_all_writes() {
        let mut buf: Vec<u8> = Vec::new();
        let mut w = ChecksumWriter::new(std::io::Cursor::new(&mut buf));
        w.write_all(b"8=FIX.4.4\x01").unwrap();
        w.write_all(b"9=5\x0135=0\x01").unwrap();
        assert_eq!(w.checksum(), 163);
    }

    #[test]
    fn test_checksum_is_valid() {
        let good = b"8=FIX.4.4\x019=56\x0135=A\x0134=1\x0149=CLIENT\x0152=20240101-00:00:00.000\x0156=SERVER\x0198=0\x01108=30\x0110=103\x01";
        let sum = calc_checksum(&good[..good.len() - 7]);
        let mut msg = good[..good.len() - 7].to_vec();
        msg.extend_from_slice(format!("10={:0>3}\x01", sum).as_bytes());
        assert!(checksum_is_valid(&msg));

        // corrupt a body byte without touching the trailer
        let mut bad = msg.clone();
        bad[20] = bad[20].wrapping_add(1);
        assert!(!checksum_is_valid(&bad));
    }

    #[test]
    fn test_parse_checksum_shapes() {
        let tests: Vec<(&[u8], bool)> = vec![
            (b"aaaaaaaaaaaaaaaa10=123\x01", true),
            (b"aaaaaaaa10=43\x01", false),
            (b"aaaaaaaa10=123", false),
            (b"aaaaaaaa11=123\x01", false),
            (b"10=12", false),
        ];
        for (bytes, ok) in tests {
            assert_eq!(parse_checksum(bytes).is_some(), ok);
        }
    }
}
