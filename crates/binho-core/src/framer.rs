//! Line framing for the ASCII command protocol
//!
//! Commands go out as ASCII text terminated by `\n`. Replies come back as
//! `\n`-terminated lines, optionally with a trailing `\r` which is stripped.

use crate::error::{Error, Result};

/// Line terminator used in both directions
pub const TERMINATOR: u8 = b'\n';

/// Longest partial line kept while waiting for a terminator
pub const MAX_LINE_LEN: usize = 4096;

/// Encode a command into its wire form
///
/// Fails if the command contains the terminator (or a carriage return) or
/// any non-ASCII character.
pub fn encode(command: &str) -> Result<Vec<u8>> {
    if let Some(pos) = command.bytes().position(|b| b == TERMINATOR || b == b'\r') {
        return Err(Error::Encoding(format!(
            "line break at offset {} in '{}'",
            pos,
            command.escape_debug()
        )));
    }
    if !command.is_ascii() {
        return Err(Error::Encoding(format!(
            "non-ASCII character in '{}'",
            command
        )));
    }

    let mut frame = Vec::with_capacity(command.len() + 1);
    frame.extend_from_slice(command.as_bytes());
    frame.push(TERMINATOR);
    Ok(frame)
}

/// Split one complete line off the front of `buffer`
///
/// Returns the line (terminator and trailing `\r` removed) and the
/// unconsumed remainder, or `None` if no terminator is buffered yet.
pub fn decode(buffer: &[u8]) -> Option<(String, &[u8])> {
    let end = buffer.iter().position(|&b| b == TERMINATOR)?;
    let mut line = &buffer[..end];
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    Some((
        String::from_utf8_lossy(line).into_owned(),
        &buffer[end + 1..],
    ))
}

/// Accumulates raw bytes from the transport and yields complete lines
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
        }
    }

    /// Append bytes read from the transport
    ///
    /// If the unterminated tail grows past [`MAX_LINE_LEN`] it is discarded.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        let tail = match self.buffer.iter().rposition(|&b| b == TERMINATOR) {
            Some(end) => self.buffer.len() - end - 1,
            None => self.buffer.len(),
        };
        if tail > MAX_LINE_LEN {
            log::warn!(
                "framer: no line terminator in {} bytes, discarding partial line",
                tail
            );
            self.buffer.truncate(self.buffer.len() - tail);
        }
    }

    /// Take the next complete line, if any
    pub fn next_line(&mut self) -> Option<String> {
        let (line, rest) = decode(&self.buffer)?;
        let consumed = self.buffer.len() - rest.len();
        self.buffer.drain(..consumed);
        Some(line)
    }

    /// Number of bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_appends_terminator() {
        assert_eq!(encode("SPI0 CLK ?").unwrap(), b"SPI0 CLK ?\n");
    }

    #[test]
    fn test_encode_rejects_embedded_terminator() {
        assert!(matches!(encode("SPI0 BEGIN\nSPI0 END"), Err(Error::Encoding(_))));
        assert!(matches!(encode("IO0 VALUE 1\r"), Err(Error::Encoding(_))));
        assert!(matches!(encode("I2C0 FREQ \u{00b5}"), Err(Error::Encoding(_))));
    }

    #[test]
    fn test_decode_incomplete() {
        assert!(decode(b"-SPI0 CLK 10").is_none());
        assert!(decode(b"").is_none());
    }

    #[test]
    fn test_decode_returns_remainder() {
        let (line, rest) = decode(b"-OK\r\n-SPI0 RXD 0A").unwrap();
        assert_eq!(line, "-OK");
        assert_eq!(rest, b"-SPI0 RXD 0A");
    }

    #[test]
    fn test_framer_split_chunks() {
        let mut framer = LineFramer::new();
        framer.push(b"-SPI0 CL");
        assert!(framer.next_line().is_none());
        assert_eq!(framer.pending(), 8);

        framer.push(b"K 1000000\n!IO1 1\n-O");
        assert_eq!(framer.next_line().as_deref(), Some("-SPI0 CLK 1000000"));
        assert_eq!(framer.next_line().as_deref(), Some("!IO1 1"));
        assert!(framer.next_line().is_none());

        framer.push(b"K\n");
        assert_eq!(framer.next_line().as_deref(), Some("-OK"));
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_framer_discards_overlong_line() {
        let mut framer = LineFramer::new();
        framer.push(b"-OK\n");
        framer.push(&[b'A'; MAX_LINE_LEN]);
        assert_eq!(framer.pending(), 4 + MAX_LINE_LEN);

        framer.push(b"AA");
        assert_eq!(framer.pending(), 4);
        assert_eq!(framer.next_line().as_deref(), Some("-OK"));

        framer.push(b"!IO2 1\n");
        assert_eq!(framer.next_line().as_deref(), Some("!IO2 1"));
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_framer_empty_lines() {
        let mut framer = LineFramer::new();
        framer.push(b"\n\r\n");
        assert_eq!(framer.next_line().as_deref(), Some(""));
        assert_eq!(framer.next_line().as_deref(), Some(""));
        assert!(framer.next_line().is_none());
    }
}
