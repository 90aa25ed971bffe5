//! Byte-level reader and writer for the cache formats.
//!
//! [`Parser`] is a bounds-checked cursor over a byte slice; [`Writer`] is its
//! counterpart appending to a `Vec<u8>`. Both share the [`ByteIO`] trait for
//! fixed-size little-endian primitives. Counts and indices are written as 7-bit
//! encoded integers; signed values use zig-zag encoding on top of that.
//!
//! A truncated buffer is reported as [`crate::Error::Malformed`], which the disk
//! cache turns into a miss.

use crate::Result;

/// A primitive with a fixed-size little-endian byte representation.
pub trait ByteIO: Sized {
    /// The byte array holding one value.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Decodes a value from little-endian bytes.
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encodes a value as little-endian bytes.
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_byte_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl ByteIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_byte_io!(
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f32 => 4,
    f64 => 8,
);

/// Cursor over encoded bytes.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Creates a parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Current offset.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Returns `true` while unread bytes remain.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Returns the next `len` bytes and advances past them.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                malformed_error!(
                    "unexpected end of data: {} bytes at offset {} of {}",
                    len,
                    self.position,
                    self.data.len()
                )
            })?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Reads one little-endian primitive.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on truncated data.
    pub fn read_le<T: ByteIO>(&mut self) -> Result<T> {
        let bytes = self.read_bytes(std::mem::size_of::<T::Bytes>())?;
        let array = <T::Bytes>::try_from(bytes)
            .map_err(|_| malformed_error!("invalid primitive at offset {}", self.position))?;
        Ok(T::from_le_bytes(array))
    }

    /// Reads an unsigned integer stored 7 bits per byte, low bits first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on truncated data or when the value does
    /// not fit a `u32`.
    pub fn read_7bit_encoded_int(&mut self) -> Result<u32> {
        let mut value = 0u32;
        let mut shift = 0;
        loop {
            let byte = self.read_le::<u8>()?;
            if shift == 28 && byte > 0x0F {
                return Err(malformed_error!(
                    "7-bit encoded integer overflow at offset {}",
                    self.position
                ));
            }
            value |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Reads a 7-bit encoded count or index.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on truncated data.
    pub fn read_index(&mut self) -> Result<usize> {
        Ok(self.read_7bit_encoded_int()? as usize)
    }

    /// Reads an optional index written by [`Writer::write_optional_index`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on truncated data.
    pub fn read_optional_index(&mut self) -> Result<Option<usize>> {
        Ok(self.read_index()?.checked_sub(1))
    }

    /// Reads a zig-zag encoded signed integer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on truncated data.
    pub fn read_compressed_int(&mut self) -> Result<i32> {
        let unsigned = self.read_7bit_encoded_int()?;
        #[allow(clippy::cast_possible_wrap)]
        let signed = ((unsigned >> 1) as i32) ^ -((unsigned & 1) as i32);
        Ok(signed)
    }

    /// Reads a length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on truncated data or invalid UTF-8.
    pub fn read_prefixed_string_utf8(&mut self) -> Result<String> {
        let len = self.read_index()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| malformed_error!("invalid UTF-8 string at offset {}", self.position))
    }
}

/// Growable output buffer.
#[derive(Debug, Default)]
pub struct Writer {
    data: Vec<u8>,
}

impl Writer {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the written bytes.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Appends raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Appends one little-endian primitive.
    pub fn write_le<T: ByteIO>(&mut self, value: T)
    where
        T::Bytes: AsRef<[u8]>,
    {
        self.data.extend_from_slice(value.to_le_bytes().as_ref());
    }

    /// Appends an unsigned integer 7 bits per byte.
    pub fn write_7bit_encoded_int(&mut self, mut value: u32) {
        while value >= 0x80 {
            self.data.push((value as u8 & 0x7F) | 0x80);
            value >>= 7;
        }
        self.data.push(value as u8);
    }

    /// Appends a count or index.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when the value does not fit the format.
    pub fn write_index(&mut self, value: usize) -> Result<()> {
        let value = u32::try_from(value)
            .map_err(|_| malformed_error!("index {} does not fit the cache format", value))?;
        self.write_7bit_encoded_int(value);
        Ok(())
    }

    /// Appends an optional index; `None` is stored as zero and values are shifted
    /// by one.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when the value does not fit the format.
    pub fn write_optional_index(&mut self, value: Option<usize>) -> Result<()> {
        match value {
            Some(value) => self.write_index(value + 1),
            None => self.write_index(0),
        }
    }

    /// Appends a zig-zag encoded signed integer.
    pub fn write_compressed_int(&mut self, value: i32) {
        #[allow(clippy::cast_sign_loss)]
        let unsigned = ((value << 1) ^ (value >> 31)) as u32;
        self.write_7bit_encoded_int(unsigned);
    }

    /// Appends a length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for strings longer than the format allows.
    pub fn write_prefixed_string_utf8(&mut self, value: &str) -> Result<()> {
        self.write_index(value.len())?;
        self.write_bytes(value.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_7bit_encoding_boundaries() {
        let values = [0u32, 1, 0x7F, 0x80, 0x3FFF, 0x4000, u32::MAX];
        let mut writer = Writer::new();
        for value in values {
            writer.write_7bit_encoded_int(value);
        }
        let data = writer.into_inner();
        assert_eq!(&data[..3], &[0x00, 0x01, 0x7F]);

        let mut parser = Parser::new(&data);
        for value in values {
            assert_eq!(parser.read_7bit_encoded_int().unwrap(), value);
        }
        assert!(!parser.has_more_data());
    }

    #[test]
    fn test_compressed_int_sign() {
        let mut writer = Writer::new();
        writer.write_compressed_int(-1);
        writer.write_compressed_int(i32::MIN);
        writer.write_compressed_int(i32::MAX);
        let data = writer.into_inner();
        assert_eq!(data[0], 0x01);

        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_compressed_int().unwrap(), -1);
        assert_eq!(parser.read_compressed_int().unwrap(), i32::MIN);
        assert_eq!(parser.read_compressed_int().unwrap(), i32::MAX);
    }

    #[test]
    fn test_truncated_input_is_malformed() {
        let mut parser = Parser::new(&[0x80, 0x80]);
        assert!(matches!(
            parser.read_7bit_encoded_int(),
            Err(crate::Error::Malformed { .. })
        ));

        let mut parser = Parser::new(&[0x01, 0x02]);
        assert!(parser.read_le::<u32>().is_err());
    }

    #[test]
    fn test_overlong_varint_is_rejected() {
        let mut parser = Parser::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x7F]);
        assert!(parser.read_7bit_encoded_int().is_err());
    }

    #[test]
    fn test_strings_and_optionals() {
        let mut writer = Writer::new();
        writer.write_prefixed_string_utf8("héllo").unwrap();
        writer.write_optional_index(None).unwrap();
        writer.write_optional_index(Some(7)).unwrap();
        writer.write_le(2.5f64);
        let data = writer.into_inner();

        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_prefixed_string_utf8().unwrap(), "héllo");
        assert_eq!(parser.read_optional_index().unwrap(), None);
        assert_eq!(parser.read_optional_index().unwrap(), Some(7));
        assert_eq!(parser.read_le::<f64>().unwrap(), 2.5);
    }
}
