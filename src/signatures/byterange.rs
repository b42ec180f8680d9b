//! ByteRange calculation for document signatures.
//!
//! A signature covers two byte ranges around its own `/Contents` value:
//! `[offset1, length1, offset2, length2]` where
//!
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset where the `<` of the contents value begins
//! - `offset2` = byte offset just after the closing `>`
//! - `length2` = bytes from there to the end of the signing revision
//!
//! The array is written with fixed-width numbers so it can be filled in after
//! the revision has been laid out without shifting any offsets.

use super::types::Coverage;
use crate::error::{Error, Result};

const FIELD_WIDTH: usize = 10;

/// The two signed ranges of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// Start of the first range (always 0 when well formed)
    pub offset1: usize,
    /// Length of the first range
    pub length1: usize,
    /// Start of the second range
    pub offset2: usize,
    /// Length of the second range
    pub length2: usize,
}

impl ByteRange {
    /// Build from the four integers of a `/ByteRange` array.
    pub fn from_array(values: [i64; 4]) -> Result<Self> {
        let mut out = [0usize; 4];
        for (slot, value) in out.iter_mut().zip(values) {
            *slot = usize::try_from(value).map_err(|_| Error::InvalidDocument {
                reason: format!("negative ByteRange entry {}", value),
            })?;
        }
        Ok(Self {
            offset1: out[0],
            length1: out[1],
            offset2: out[2],
            length2: out[3],
        })
    }

    /// The four integers as written in the document.
    pub fn to_array(&self) -> [i64; 4] {
        [
            self.offset1 as i64,
            self.length1 as i64,
            self.offset2 as i64,
            self.length2 as i64,
        ]
    }

    /// Offset just past the last signed byte.
    pub fn signed_end(&self) -> usize {
        self.offset2 + self.length2
    }

    /// Fixed-width PDF array text.
    pub fn format_fixed(&self) -> String {
        format!(
            "[{:0w$} {:0w$} {:0w$} {:0w$}]",
            self.offset1,
            self.length1,
            self.offset2,
            self.length2,
            w = FIELD_WIDTH
        )
    }

    /// Length of [`ByteRange::format_fixed`] output.
    pub fn formatted_len() -> usize {
        4 * FIELD_WIDTH + 5
    }

    /// Concatenation of the two ranges.
    pub fn extract(&self, data: &[u8]) -> Result<Vec<u8>> {
        if self.offset1 + self.length1 > data.len() {
            return Err(Error::InvalidDocument {
                reason: format!(
                    "ByteRange first range exceeds file size: {} + {} > {}",
                    self.offset1,
                    self.length1,
                    data.len()
                ),
            });
        }
        if self.signed_end() > data.len() {
            return Err(Error::InvalidDocument {
                reason: format!(
                    "ByteRange second range exceeds file size: {} + {} > {}",
                    self.offset2,
                    self.length2,
                    data.len()
                ),
            });
        }

        let mut signed = Vec::with_capacity(self.length1 + self.length2);
        signed.extend_from_slice(&data[self.offset1..self.offset1 + self.length1]);
        signed.extend_from_slice(&data[self.offset2..self.signed_end()]);
        Ok(signed)
    }

    /// Check the shape of the ranges against a file of `file_len` bytes.
    ///
    /// The first range must start at 0 and end no later than the second
    /// begins; the second must end inside the file.
    pub fn check_structure(&self, file_len: usize) -> Result<()> {
        if self.offset1 != 0 {
            return Err(Error::InvalidDocument {
                reason: format!("ByteRange must start at 0, got {}", self.offset1),
            });
        }
        if self.length1 > self.offset2 {
            return Err(Error::InvalidDocument {
                reason: format!(
                    "ByteRange first range ({}) overlaps with second range start ({})",
                    self.length1, self.offset2
                ),
            });
        }
        if self.signed_end() > file_len {
            return Err(Error::InvalidDocument {
                reason: format!(
                    "ByteRange ends at {} beyond file size {}",
                    self.signed_end(),
                    file_len
                ),
            });
        }
        Ok(())
    }

    /// Coverage of a file of `file_len` bytes whose contents value occupies
    /// `contents` (offset, length including the angle brackets).
    pub fn coverage(&self, file_len: usize, contents: Option<(usize, usize)>) -> Coverage {
        if self.check_structure(file_len).is_err() {
            return Coverage::None;
        }
        match contents {
            Some((offset, len)) if offset == self.length1 && offset + len == self.offset2 => {},
            _ => return Coverage::None,
        }
        if self.signed_end() == file_len {
            Coverage::Full
        } else {
            Coverage::Partial
        }
    }
}

/// Sizes the contents placeholder and writes the signature into it.
#[derive(Debug)]
pub struct ByteRangeCalculator {
    /// Size of the placeholder for the contents value (hex digits + 2 for angle brackets)
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Calculator for a record of up to `estimated_signature_size` bytes.
    ///
    /// The placeholder holds `(estimated_signature_size * 2) + 2` characters
    /// because the record is hex-encoded and enclosed in angle brackets.
    pub fn new(estimated_signature_size: usize) -> Self {
        Self {
            placeholder_size: estimated_signature_size * 2 + 2,
        }
    }

    /// Calculator with an explicit placeholder size.
    pub fn with_placeholder_size(placeholder_size: usize) -> Self {
        Self { placeholder_size }
    }

    /// Placeholder size in characters.
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// `<000...000>` of the placeholder size.
    pub fn generate_placeholder(&self) -> String {
        format!("<{}>", "0".repeat(self.placeholder_size.saturating_sub(2)))
    }

    /// Byte range for a revision ending at `revision_end` whose contents
    /// value starts at `contents_offset`.
    pub fn calculate_byte_range(&self, revision_end: usize, contents_offset: usize) -> ByteRange {
        let after = contents_offset + self.placeholder_size;
        ByteRange {
            offset1: 0,
            length1: contents_offset,
            offset2: after,
            length2: revision_end.saturating_sub(after),
        }
    }

    /// Replace the placeholder at `contents_offset` with `signature`, hex
    /// encoded and zero padded.
    pub fn insert_signature(
        &self,
        data: &mut [u8],
        contents_offset: usize,
        signature: &[u8],
    ) -> Result<()> {
        let signature_hex = bytes_to_hex(signature);
        let needed = signature_hex.len() + 2;
        if needed > self.placeholder_size {
            return Err(Error::SignatureTooLarge {
                needed,
                available: self.placeholder_size,
            });
        }

        if contents_offset + self.placeholder_size > data.len() {
            return Err(Error::InvalidDocument {
                reason: "signature insertion would exceed file bounds".to_string(),
            });
        }

        let mut value = String::with_capacity(self.placeholder_size);
        value.push('<');
        value.push_str(&signature_hex);
        value.push_str(&"0".repeat(self.placeholder_size - needed));
        value.push('>');

        data[contents_offset..contents_offset + self.placeholder_size]
            .copy_from_slice(value.as_bytes());
        Ok(())
    }
}

impl Default for ByteRangeCalculator {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SIGNATURE_SIZE)
    }
}

/// Convert bytes to uppercase hex string.
pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8] = b"0123456789ABCDEF";
    let mut hex = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
        hex.push(HEX_CHARS[(byte & 0x0F) as usize] as char);
    }
    hex
}

/// Decode hex digits; an odd trailing digit is treated as if followed by 0.
pub(crate) fn hex_to_bytes(hex: &[u8]) -> Result<Vec<u8>> {
    fn nibble(c: u8) -> Result<u8> {
        match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => Err(Error::InvalidDocument {
                reason: format!("invalid hex digit 0x{:02X}", c),
            }),
        }
    }
    hex.chunks(2)
        .map(|pair| {
            let high = nibble(pair[0])?;
            let low = match pair.get(1) {
                Some(c) => nibble(*c)?,
                None => 0,
            };
            Ok(high << 4 | low)
        })
        .collect()
}
