//! Low-level byte stream parser for metadata signature blobs.
//!
//! This module provides the [`crate::parser::Parser`] type, a cursor-based binary reader used
//! when decoding raw field signature blobs fetched from the target image. It offers
//! bounds-checked access to the underlying bytes together with the compressed integer and
//! token encodings defined by ECMA-335 II.23.2, which is all the signature fallback path of
//! field resolution needs.
//!
//! # Usage Examples
//!
//! ```rust
//! use clrscope::Parser;
//!
//! let data = [0x06, 0x08]; // FIELD calling convention, ELEMENT_TYPE_I4
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_u8()?, 0x06);
//! assert_eq!(parser.read_u8()?, 0x08);
//! # Ok::<(), clrscope::Error>(())
//! ```

use crate::{token::Token, Result};

/// A cursor-based parser for binary metadata blobs.
///
/// `Parser` maintains a position within a byte slice and provides bounds-checked
/// primitive reads plus the variable-length encodings used by .NET signatures.
/// It is deliberately small: the core only ever decodes short field signature
/// blobs with it, never whole metadata streams.
///
/// # Examples
///
/// ```rust
/// use clrscope::Parser;
///
/// // Compressed uint, 2-byte form
/// let data = [0x80, 0x80];
/// let mut parser = Parser::new(&data);
/// assert_eq!(parser.read_compressed_uint()?, 128);
/// # Ok::<(), clrscope::Error>(())
/// ```
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser over the provided bytes.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Current position within the data.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Number of bytes left to read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// `true` if at least one more byte can be read.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Peek at the current byte without advancing.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if no data remains.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or(crate::Error::OutOfBounds)
    }

    /// Read a single byte and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if no data remains.
    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.peek_byte()?;
        self.position += 1;
        Ok(value)
    }

    /// Read a little-endian `u16` and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than two bytes remain.
    pub fn read_u16(&mut self) -> Result<u16> {
        let end = self.position.checked_add(2).ok_or(crate::Error::OutOfBounds)?;
        let bytes = self
            .data
            .get(self.position..end)
            .ok_or(crate::Error::OutOfBounds)?;
        self.position = end;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a little-endian `u32` and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than four bytes remain.
    pub fn read_u32(&mut self) -> Result<u32> {
        let end = self.position.checked_add(4).ok_or(crate::Error::OutOfBounds)?;
        let bytes = self
            .data
            .get(self.position..end)
            .ok_or(crate::Error::OutOfBounds)?;
        self.position = end;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a compressed unsigned integer as defined in ECMA-335 II.23.2.
    ///
    /// Values below 0x80 occupy one byte, below 0x4000 two bytes, everything
    /// else four bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length or
    /// [`crate::Error::Malformed`] for an invalid encoding prefix.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use clrscope::Parser;
    ///
    /// let data = [0x7F]; // 127, single byte form
    /// let mut parser = Parser::new(&data);
    /// assert_eq!(parser.read_compressed_uint()?, 127);
    /// # Ok::<(), clrscope::Error>(())
    /// ```
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_u8()?;

        // 1-byte encoding: 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        // 2-byte encoding: 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_u8()?;
            return Ok(((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte));
        }

        // 4-byte encoding: 11xxxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_u8()?);
            let b2 = u32::from(self.read_u8()?);
            let b3 = u32::from(self.read_u8()?);
            return Ok(((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read a compressed token as defined in ECMA-335 II.23.2.4 (TypeDefOrRefOrSpecEncoded).
    ///
    /// The 2 lowest bits select the table (TypeDef/TypeRef/TypeSpec), the rest
    /// is the row index. Tag 0x3 is reserved and rejected.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length or
    /// [`crate::Error::Malformed`] if the reserved tag is encountered.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let compressed_token = self.read_compressed_uint()?;

        let table: u32 = match compressed_token & 0x3 {
            0x0 => 0x0200_0000, // TypeDef
            0x1 => 0x0100_0000, // TypeRef
            0x2 => 0x1B00_0000, // TypeSpec
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token - {}",
                    compressed_token
                ))
            }
        };

        Ok(Token::new(table + (compressed_token >> 2)))
    }
}
