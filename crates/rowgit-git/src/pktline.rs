//! Git pkt-line framing.
//!
//! Each unit is a 4-hex-digit length prefix (counting itself) followed by
//! that many payload bytes, or a zero-payload control unit: `0000` (flush)
//! and `0001` (delimiter). Declared lengths 2 and 3 are invalid. Decoding
//! is a restartable pass over a byte buffer; there is no hidden state, so
//! two decodes of the same bytes yield the same units.

use crate::{GitError, Result};

/// Largest payload a single pkt-line can carry.
pub const MAX_PAYLOAD: usize = 0xffff - 4;

/// One decoded pkt-line unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data unit with its payload.
    Data(Vec<u8>),
    /// Flush unit (`0000`).
    Flush,
    /// Delimiter unit (`0001`).
    Delimiter,
}

impl PktLine {
    /// The payload, or `None` for control units.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    /// The payload as text, trailing newline trimmed.
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.trim_end_matches('\n'))
    }
}

/// Frames a payload as a single pkt-line.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
    let framed = payload.len() + 4;
    if framed > 0xffff {
        return Err(GitError::InvalidPktLine(format!(
            "payload of {} bytes exceeds pkt-line maximum",
            payload.len()
        )));
    }
    let mut out = format!("{:04x}", framed).into_bytes();
    out.extend_from_slice(payload);
    Ok(out)
}

/// Restartable pkt-line decoder over a byte buffer.
///
/// Yields units until the end of the buffer or the first framing error;
/// [`Decoder::offset`] after any yielded unit is a valid restart point.
pub struct Decoder<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Decoder<'a> {
    /// Starts decoding `buf` at `offset`.
    pub fn new(buf: &'a [u8], offset: usize) -> Self {
        Self {
            buf,
            offset,
            failed: false,
        }
    }

    /// The offset of the next undecoded byte.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn decode_next(&mut self) -> Result<PktLine> {
        let remaining = self.buf.len() - self.offset;
        if remaining < 4 {
            return Err(GitError::InvalidPktLine(format!(
                "truncated length prefix at offset {}",
                self.offset
            )));
        }
        let prefix = &self.buf[self.offset..self.offset + 4];
        let prefix = std::str::from_utf8(prefix)
            .map_err(|_| GitError::InvalidPktLine("non-ascii length prefix".to_string()))?;
        // from_str_radix alone would also accept a leading sign.
        if !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(GitError::InvalidPktLine(format!(
                "non-hex length prefix {:?}",
                prefix
            )));
        }
        let declared = usize::from_str_radix(prefix, 16).map_err(|_| {
            GitError::InvalidPktLine(format!("non-hex length prefix {:?}", prefix))
        })?;

        match declared {
            0 => {
                self.offset += 4;
                Ok(PktLine::Flush)
            }
            1 => {
                self.offset += 4;
                Ok(PktLine::Delimiter)
            }
            2 | 3 => Err(GitError::InvalidPktLine(format!(
                "invalid declared length {}",
                declared
            ))),
            _ => {
                if declared > remaining {
                    return Err(GitError::InvalidPktLine(format!(
                        "declared length {} exceeds {} remaining bytes",
                        declared, remaining
                    )));
                }
                let payload = self.buf[self.offset + 4..self.offset + declared].to_vec();
                self.offset += declared;
                Ok(PktLine::Data(payload))
            }
        }
    }
}

impl Iterator for Decoder<'_> {
    type Item = Result<PktLine>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        let result = self.decode_next();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

/// Collects data payloads up to (and consuming) the first flush unit.
///
/// Returns the payloads and the offset just past the flush. Fails if the
/// buffer ends before a flush appears.
pub fn read_until_flush(buf: &[u8], offset: usize) -> Result<(Vec<Vec<u8>>, usize)> {
    let mut decoder = Decoder::new(buf, offset);
    let mut payloads = Vec::new();
    for unit in decoder.by_ref() {
        match unit? {
            PktLine::Data(payload) => payloads.push(payload),
            PktLine::Flush => return Ok((payloads, decoder.offset())),
            PktLine::Delimiter => {}
        }
    }
    Err(GitError::InvalidPktLine(
        "stream ended before flush".to_string(),
    ))
}

/// Builds a pkt-line stream into an in-memory buffer.
#[derive(Debug, Default)]
pub struct PktWriter {
    buf: Vec<u8>,
}

impl PktWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a data unit.
    pub fn write_data(&mut self, payload: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(&encode(payload)?);
        Ok(())
    }

    /// Writes a text line, appending a newline when missing.
    pub fn write_text(&mut self, line: &str) -> Result<()> {
        let mut payload = line.as_bytes().to_vec();
        if !line.ends_with('\n') {
            payload.push(b'\n');
        }
        self.write_data(&payload)
    }

    /// Writes a flush unit.
    pub fn flush_pkt(&mut self) {
        self.buf.extend_from_slice(b"0000");
    }

    /// Consumes the writer, returning the framed bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
