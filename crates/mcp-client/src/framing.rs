//! Message framing for byte-stream transports.
//!
//! Outgoing messages use the connection's configured [`Framing`]. The
//! reader accepts both forms regardless:
//!
//! ```text
//! Content-Length: 52\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":1,"result":{...}}
//! ```
//!
//! or a bare JSON object terminated by `\n`. Anything else on the stream
//! (servers that log to stdout) is discarded one line at a time.

pub use mh_domain::config::Framing;

/// Largest body accepted from a server.
pub const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

/// Header blocks longer than this without a terminator are garbage.
const MAX_HEADER_BYTES: usize = 8 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    TooLarge(usize),
}

/// Encode one message body for the wire.
pub fn encode(framing: Framing, body: &[u8]) -> Vec<u8> {
    match framing {
        Framing::ContentLength => {
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            let mut out = Vec::with_capacity(header.len() + body.len());
            out.extend_from_slice(header.as_bytes());
            out.extend_from_slice(body);
            out
        }
        Framing::Newline => {
            let mut out = Vec::with_capacity(body.len() + 1);
            out.extend_from_slice(body);
            out.push(b'\n');
            out
        }
    }
}

/// Accumulates reads and yields complete message bodies.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    /// Leading bytes already searched for a line end.
    scanned: usize,
    discarded_lines: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Non-message lines dropped so far.
    pub fn discarded_lines(&self) -> usize {
        self.discarded_lines
    }

    /// Pop the next complete body, if one is buffered.
    ///
    /// Call repeatedly after each [`extend`](Self::extend): a single read
    /// may carry several frames.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        loop {
            let start = self
                .buf
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .unwrap_or(self.buf.len());
            self.consume(start);
            if self.buf.is_empty() {
                return Ok(None);
            }

            if starts_with_ignore_case(&self.buf, b"content-") {
                match self.take_length_prefixed()? {
                    Step::Frame(body) => return Ok(Some(body)),
                    Step::Incomplete => return Ok(None),
                    Step::Skipped => continue,
                }
            }

            let Some(eol) = self.find_eol() else {
                if self.buf.len() > MAX_FRAME_BYTES {
                    return Err(FrameError::TooLarge(self.buf.len()));
                }
                return Ok(None);
            };
            let line: Vec<u8> = self.buf[..=eol].to_vec();
            self.consume(eol + 1);
            let trimmed = trim_ascii(&line);
            if trimmed.first() == Some(&b'{') {
                return Ok(Some(trimmed.to_vec()));
            }
            self.discarded_lines += 1;
            tracing::debug!(
                line = %String::from_utf8_lossy(trimmed),
                "skipping non-JSON line on server stdout"
            );
        }
    }

    fn take_length_prefixed(&mut self) -> Result<Step, FrameError> {
        let Some((header_len, sep_len)) = find_header_end(&self.buf) else {
            if self.buf.len() > MAX_HEADER_BYTES {
                self.drop_first_line();
                return Ok(Step::Skipped);
            }
            return Ok(Step::Incomplete);
        };

        let content_length = String::from_utf8_lossy(&self.buf[..header_len])
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok());

        let Some(length) = content_length else {
            tracing::debug!("discarding header block without a valid Content-Length");
            self.consume(header_len + sep_len);
            self.discarded_lines += 1;
            return Ok(Step::Skipped);
        };
        if length > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge(length));
        }

        let body_start = header_len + sep_len;
        if self.buf.len() < body_start + length {
            return Ok(Step::Incomplete);
        }
        let body = self.buf[body_start..body_start + length].to_vec();
        self.consume(body_start + length);
        Ok(Step::Frame(body))
    }

    fn drop_first_line(&mut self) {
        let end = self.find_eol().map(|p| p + 1).unwrap_or(self.buf.len());
        self.consume(end);
        self.discarded_lines += 1;
    }

    /// Position of the first `\n`, resuming where the last search stopped.
    fn find_eol(&mut self) -> Option<usize> {
        let found = self.buf[self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| self.scanned + p);
        self.scanned = found.unwrap_or(self.buf.len());
        found
    }

    fn consume(&mut self, n: usize) {
        self.buf.drain(..n);
        self.scanned = self.scanned.saturating_sub(n);
    }
}

enum Step {
    Frame(Vec<u8>),
    Incomplete,
    Skipped,
}

/// Locate the blank line ending a header block. Returns the header length
/// and the separator length (`\r\n\r\n` or `\n\n`).
///
/// Only the first [`MAX_HEADER_BYTES`] are searched, so a partially
/// received body is never rescanned.
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let buf = &buf[..buf.len().min(MAX_HEADER_BYTES + 4)];
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn starts_with_ignore_case(buf: &[u8], prefix: &[u8]) -> bool {
    buf.len() >= prefix.len() && buf[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |p| p + 1);
    &bytes[start..end]
}
