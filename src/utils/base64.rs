//! Decoding and encoding of Base 64.
//!
//! The KSR interchange format carries DNSKEY public keys and RRSIG data as
//! *base64* per [RFC 4648]. Emission wraps payloads at a fixed column so
//! that documents diff cleanly between ceremonies; the decoder therefore
//! skips ASCII whitespace.
//!
//! [RFC 4648]: https://tools.ietf.org/html/rfc4648

use bytes::Bytes;
use std::fmt;

//------------ Convenience Functions -----------------------------------------

/// Decodes a string with *base64* encoded data.
///
/// ASCII whitespace between groups is ignored. The function attempts to
/// decode the entire string and returns the result as a `Bytes` value.
pub fn decode(s: &str) -> Result<Bytes, DecodeError> {
    let mut decoder = Decoder::new();
    for ch in s.chars() {
        if ch.is_ascii_whitespace() {
            continue;
        }
        decoder.push(ch)?;
    }
    decoder.finalize()
}

/// Encodes binary data in *base64* and writes it into a format stream.
pub fn display<B, W>(bytes: &B, f: &mut W) -> fmt::Result
where
    B: AsRef<[u8]> + ?Sized,
    W: fmt::Write,
{
    fn ch(i: u8) -> char {
        ENCODE_ALPHABET[i as usize]
    }

    for chunk in bytes.as_ref().chunks(3) {
        match chunk.len() {
            1 => {
                f.write_char(ch(chunk[0] >> 2))?;
                f.write_char(ch((chunk[0] & 0x03) << 4))?;
                f.write_char('=')?;
                f.write_char('=')?;
            }
            2 => {
                f.write_char(ch(chunk[0] >> 2))?;
                f.write_char(ch((chunk[0] & 0x03) << 4 | chunk[1] >> 4))?;
                f.write_char(ch((chunk[1] & 0x0F) << 2))?;
                f.write_char('=')?;
            }
            3 => {
                f.write_char(ch(chunk[0] >> 2))?;
                f.write_char(ch((chunk[0] & 0x03) << 4 | chunk[1] >> 4))?;
                f.write_char(ch((chunk[1] & 0x0F) << 2 | chunk[2] >> 6))?;
                f.write_char(ch(chunk[2] & 0x3F))?;
            }
            _ => unreachable!(),
        }
    }
    Ok(())
}

/// Encodes binary data in *base64* and returns the result as a string.
pub fn encode_string<B: AsRef<[u8]> + ?Sized>(bytes: &B) -> String {
    let mut res = String::with_capacity((bytes.as_ref().len() / 3 + 1) * 4);
    display(bytes, &mut res).unwrap();
    res
}

/// Encodes binary data in *base64* wrapped at `width` columns.
///
/// Continuation lines are prefixed with `indent`. This is the form used for
/// `PublicKey` and `SignatureData` payloads in emitted documents.
pub fn encode_wrapped<B: AsRef<[u8]> + ?Sized>(
    bytes: &B,
    width: usize,
    indent: &str,
) -> String {
    let encoded = encode_string(bytes);
    let mut res = String::with_capacity(
        encoded.len() + encoded.len() / width * (indent.len() + 1),
    );
    let mut first = true;
    for chunk in encoded.as_bytes().chunks(width) {
        if !first {
            res.push('\n');
            res.push_str(indent);
        }
        first = false;
        // Chunks of an ASCII string are ASCII.
        res.push_str(std::str::from_utf8(chunk).unwrap());
    }
    res
}

//------------ Decoder -------------------------------------------------------

/// A Base 64 decoder.
pub struct Decoder {
    /// A buffer for up to four characters.
    ///
    /// We only keep `u8`s here because only ASCII characters are used by
    /// Base64.
    buf: [u8; 4],

    /// The index in `buf` where we place the next character.
    ///
    /// We also abuse this to mark when we are done (because there was
    /// padding, in which case we set it to 0xF0).
    next: usize,

    /// The target or an error if something went wrong.
    target: Result<Vec<u8>, DecodeError>,
}

impl Decoder {
    pub fn new() -> Self {
        Decoder {
            buf: [0; 4],
            next: 0,
            target: Ok(Vec::new()),
        }
    }

    /// Feeds a character to the decoder.
    pub fn push(&mut self, ch: char) -> Result<(), DecodeError> {
        if self.next == 0xF0 {
            self.target = Err(DecodeError::TrailingInput);
            return Err(DecodeError::TrailingInput);
        }
        if !ch.is_ascii() {
            self.target = Err(DecodeError::IllegalChar(ch));
            return Err(DecodeError::IllegalChar(ch));
        }
        self.buf[self.next] = ch as u8;
        self.next += 1;
        if self.next == 4 {
            self.flush()?;
        }
        Ok(())
    }

    /// Finalizes decoding and returns the decoded data.
    pub fn finalize(self) -> Result<Bytes, DecodeError> {
        let Decoder { next, target, .. } = self;
        if next != 0 && next != 0xF0 {
            return Err(DecodeError::ShortInput);
        }
        target.map(Into::into)
    }

    /// Decodes a full buffer of four characters.
    fn flush(&mut self) -> Result<(), DecodeError> {
        let target = match self.target.as_mut() {
            Ok(target) => target,
            Err(err) => return Err(err.clone()),
        };

        let mut vals = [0u8; 4];
        let mut pad = 0;
        for (i, &ch) in self.buf.iter().enumerate() {
            if ch == b'=' {
                // Padding may only appear in the last two positions and
                // must run to the end of the group.
                if i < 2 || self.buf[3] != b'=' {
                    let err = DecodeError::IllegalChar(ch as char);
                    self.target = Err(err.clone());
                    return Err(err);
                }
                pad += 1;
                vals[i] = 0;
                continue;
            }
            if pad > 0 {
                let err = DecodeError::IllegalChar(ch as char);
                self.target = Err(err.clone());
                return Err(err);
            }
            match decode_char(ch) {
                Some(val) => vals[i] = val,
                None => {
                    let err = DecodeError::IllegalChar(ch as char);
                    self.target = Err(err.clone());
                    return Err(err);
                }
            }
        }

        target.push(vals[0] << 2 | vals[1] >> 4);
        if pad < 2 {
            target.push(vals[1] << 4 | vals[2] >> 2);
        }
        if pad < 1 {
            target.push(vals[2] << 6 | vals[3]);
        }

        self.next = if pad > 0 { 0xF0 } else { 0 };
        Ok(())
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_char(ch: u8) -> Option<u8> {
    match ch {
        b'A'..=b'Z' => Some(ch - b'A'),
        b'a'..=b'z' => Some(ch - b'a' + 26),
        b'0'..=b'9' => Some(ch - b'0' + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

//------------ Constants -----------------------------------------------------

/// The alphabet used for encoding.
const ENCODE_ALPHABET: [char; 64] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', // 0x00 .. 0x07
    'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', // 0x08 .. 0x0F
    'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', // 0x10 .. 0x17
    'Y', 'Z', 'a', 'b', 'c', 'd', 'e', 'f', // 0x18 .. 0x1F
    'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', // 0x20 .. 0x27
    'o', 'p', 'q', 'r', 's', 't', 'u', 'v', // 0x28 .. 0x2F
    'w', 'x', 'y', 'z', '0', '1', '2', '3', // 0x30 .. 0x37
    '4', '5', '6', '7', '8', '9', '+', '/', // 0x38 .. 0x3F
];

//============ Error Types ===================================================

//------------ DecodeError ---------------------------------------------------

/// An error happened while decoding a base64 string.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// A character that is not a valid base64 character in its position.
    IllegalChar(char),

    /// The input ended before a full group of four characters was read.
    ShortInput,

    /// More characters were found after padding ended a group.
    TrailingInput,
}

//--- Display and Error

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DecodeError::IllegalChar(ch) => {
                write!(f, "illegal character '{}'", ch)
            }
            DecodeError::ShortInput => f.write_str("incomplete input"),
            DecodeError::TrailingInput => {
                f.write_str("trailing input after padding")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

//============ Test ==========================================================
