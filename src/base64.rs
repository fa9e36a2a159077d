//! Base64 Codec
//!
//! Encoding and decoding between raw bytes and the RFC 2045 Base64 alphabet.
//!
//! The decoder is tolerant: any byte outside the alphabet (whitespace, line
//! breaks, stray punctuation, non-ASCII text) is skipped rather than
//! rejected, so wrapped or indented payloads decode cleanly. The only errors
//! surfaced are I/O failures of the byte sink.
//!
//! [`Base64Decoder`] keeps the partially assembled quantum between calls so
//! that text arriving in arbitrary fragments (as it does from a streaming XML
//! tokenizer) decodes exactly as if it had been supplied in one piece.

use std::io::{self, Read, Write};

const ENCODE_MAP: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Decode table entry for bytes that are not part of the alphabet
const SKIP: u8 = 64;

const PAD: u8 = b'=';

/// Number of 4-symbol groups per encoded line (76 characters)
const GROUPS_PER_LINE: usize = 19;

/// Raw bytes consumed per encoded line
const LINE_BYTES: usize = 3 * GROUPS_PER_LINE;

const DECODE_MAP: [u8; 256] = build_decode_map();

const fn build_decode_map() -> [u8; 256] {
    let mut map = [SKIP; 256];
    let mut i = 0;
    while i < ENCODE_MAP.len() {
        map[ENCODE_MAP[i] as usize] = i as u8;
        i += 1;
    }
    // Padding decodes as a zero symbol; the pad count decides how many
    // bytes of the final quantum are emitted.
    map[PAD as usize] = 0;
    map
}

fn encode_group(input: &[u8], out: &mut [u8; 4]) {
    let b0 = input[0];
    let b1 = input.get(1).copied().unwrap_or(0);
    let b2 = input.get(2).copied().unwrap_or(0);

    out[0] = ENCODE_MAP[(b0 >> 2) as usize];
    out[1] = ENCODE_MAP[(((b0 & 0x03) << 4) | (b1 >> 4)) as usize];
    out[2] = if input.len() > 1 {
        ENCODE_MAP[(((b1 & 0x0f) << 2) | (b2 >> 6)) as usize]
    } else {
        PAD
    };
    out[3] = if input.len() > 2 {
        ENCODE_MAP[(b2 & 0x3f) as usize]
    } else {
        PAD
    };
}

fn encode_line(line: &[u8], out: &mut Vec<u8>) {
    let mut quad = [0u8; 4];
    for group in line.chunks(3) {
        encode_group(group, &mut quad);
        out.extend_from_slice(&quad);
    }
    out.push(b'\n');
}

/// Encode a byte slice, breaking lines every 76 characters.
///
/// Every line, including the last, is terminated by `\n`. An empty slice
/// encodes to an empty string.
pub fn encode(input: &[u8]) -> String {
    let groups = input.len().div_ceil(3);
    let mut out = Vec::with_capacity(groups * 4 + groups / GROUPS_PER_LINE + 1);
    for line in input.chunks(LINE_BYTES) {
        encode_line(line, &mut out);
    }
    // The alphabet, padding and line breaks are all ASCII.
    out.into_iter().map(char::from).collect()
}

/// Encode the UTF-8 bytes of a string.
pub fn encode_str(input: &str) -> String {
    encode(input.as_bytes())
}

/// Encode everything read from `reader` into `writer`.
///
/// Output uses the same 76-character lines as [`encode`]. The output always
/// ends with a line break, so empty input produces a single `\n`.
///
/// Returns the number of raw bytes consumed from the reader.
pub fn encode_to_writer<R: Read, W: Write>(mut reader: R, mut writer: W) -> io::Result<u64> {
    let mut line = [0u8; LINE_BYTES];
    let mut encoded = Vec::with_capacity(4 * GROUPS_PER_LINE + 1);
    let mut consumed = 0u64;

    loop {
        let n = read_full(&mut reader, &mut line)?;
        if n == 0 {
            break;
        }
        consumed += n as u64;

        encoded.clear();
        encode_line(&line[..n], &mut encoded);
        writer.write_all(&encoded)?;

        if n < LINE_BYTES {
            break;
        }
    }

    if consumed == 0 {
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(consumed)
}

/// Read until `buf` is full or the reader is exhausted
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Decode a Base64 string, skipping anything outside the alphabet.
pub fn decode(input: &str) -> Vec<u8> {
    decode_bytes(input.as_bytes())
}

/// Decode Base64 text held as raw bytes.
pub fn decode_bytes(input: &[u8]) -> Vec<u8> {
    let mut decoder = Base64Decoder::new();
    let mut out = Vec::with_capacity(input.len() / 4 * 3);
    decoder.decode_into(input, &mut out);
    out
}

/// Decode everything read from `reader` into `writer`.
///
/// Returns the number of decoded bytes written.
pub fn decode_to_writer<R: Read, W: Write>(mut reader: R, writer: W) -> io::Result<u64> {
    let mut decoder = Base64Decoder::new();
    let mut writer = io::BufWriter::new(writer);
    let mut buf = [0u8; 8192];
    let mut written = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        written += decoder.feed_bytes(&buf[..n], &mut writer)? as u64;
    }

    writer.flush()?;
    Ok(written)
}

/// Incremental Base64 decoder.
///
/// Holds up to three pending symbols and the padding seen in the current
/// quantum between calls. Each logical stream needs its own decoder (or a
/// [`reset`](Self::reset) before reuse); state never carries over implicitly.
///
/// Padding is counted per quantum: a `=` only shortens the group it belongs
/// to, so concatenated padded blocks and padding split across fragments both
/// decode correctly.
#[derive(Debug, Clone, Default)]
pub struct Base64Decoder {
    quantum: [u8; 4],
    filled: usize,
    pad: usize,
}

impl Base64Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard any partially assembled quantum
    pub fn reset(&mut self) {
        self.filled = 0;
        self.pad = 0;
    }

    /// Number of symbols waiting for the rest of their quantum (0-3)
    pub fn pending_symbols(&self) -> usize {
        self.filled
    }

    /// True when no partial quantum is pending
    pub fn is_aligned(&self) -> bool {
        self.filled == 0
    }

    /// Decode a fragment of Base64 text into `out`.
    ///
    /// Returns the number of bytes written. The fragment may end anywhere,
    /// including in the middle of a quantum.
    pub fn feed<W: Write + ?Sized>(&mut self, input: &str, out: &mut W) -> io::Result<usize> {
        self.feed_bytes(input.as_bytes(), out)
    }

    /// Byte-oriented form of [`feed`](Self::feed).
    pub fn feed_bytes<W: Write + ?Sized>(&mut self, input: &[u8], out: &mut W) -> io::Result<usize> {
        let mut written = 0;
        for &c in input {
            if let Some((bytes, len)) = self.push(c) {
                out.write_all(&bytes[..len])?;
                written += len;
            }
        }
        Ok(written)
    }

    /// Decode into an in-memory buffer; cannot fail
    pub fn decode_into(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &c in input {
            if let Some((bytes, len)) = self.push(c) {
                out.extend_from_slice(&bytes[..len]);
            }
        }
    }

    /// Accept one input byte, returning the decoded group once a quantum completes
    #[inline]
    fn push(&mut self, c: u8) -> Option<([u8; 3], usize)> {
        let value = DECODE_MAP[c as usize];
        if value == SKIP {
            return None;
        }
        if c == PAD {
            self.pad += 1;
        }
        self.quantum[self.filled] = value;
        self.filled += 1;
        if self.filled < 4 {
            return None;
        }

        let [b0, b1, b2, b3] = self.quantum;
        let bytes = [(b0 << 2) | (b1 >> 4), (b1 << 4) | (b2 >> 2), (b2 << 6) | b3];
        let len = match self.pad {
            0 => 3,
            1 => 2,
            _ => 1,
        };
        self.reset();
        Some((bytes, len))
    }
}
