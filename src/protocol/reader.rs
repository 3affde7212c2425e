//! Bounds-checked cursor over a received datagram.

use super::ProtocolError;

/// Scan a null-terminated string starting at `offset`.
///
/// Reads until a zero byte or the end of the buffer. The returned length
/// excludes the terminator; callers advance their offset by `len + 1`.
/// An `offset` past the end yields an empty string of length 0.
pub fn read_cstring(buf: &[u8], offset: usize) -> (String, usize) {
    let tail = buf.get(offset..).unwrap_or_default();
    let len = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    (String::from_utf8_lossy(&tail[..len]).into_owned(), len)
}

/// Sequential little-endian reader that never indexes out of bounds.
///
/// Every accessor returns [`ProtocolError::MalformedResponse`] naming the
/// field that ran past the end of the buffer.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize, field: &str) -> Result<&'a [u8], ProtocolError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                ProtocolError::malformed(format!(
                    "{} needs {} bytes at offset {}, buffer is {} bytes",
                    field,
                    n,
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self, field: &str) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    /// Consume an exact byte sequence.
    pub fn expect(&mut self, expected: &[u8], field: &str) -> Result<(), ProtocolError> {
        let got = self.take(expected.len(), field)?;
        if got == expected {
            Ok(())
        } else {
            Err(ProtocolError::malformed(format!(
                "{}: expected {:02X?}, got {:02X?}",
                field, expected, got
            )))
        }
    }

    pub fn u8(&mut self, field: &str) -> Result<u8, ProtocolError> {
        Ok(self.take(1, field)?[0])
    }

    pub fn u16_le(&mut self, field: &str) -> Result<u16, ProtocolError> {
        self.array(field).map(u16::from_le_bytes)
    }

    pub fn i32_le(&mut self, field: &str) -> Result<i32, ProtocolError> {
        self.array(field).map(i32::from_le_bytes)
    }

    pub fn u32_le(&mut self, field: &str) -> Result<u32, ProtocolError> {
        self.array(field).map(u32::from_le_bytes)
    }

    pub fn f32_le(&mut self, field: &str) -> Result<f32, ProtocolError> {
        self.array(field).map(f32::from_le_bytes)
    }

    pub fn u64_le(&mut self, field: &str) -> Result<u64, ProtocolError> {
        self.array(field).map(u64::from_le_bytes)
    }

    /// Null-terminated string. A missing terminator is malformed input.
    pub fn cstring(&mut self, field: &str) -> Result<String, ProtocolError> {
        let (value, len) = read_cstring(self.buf, self.pos);
        if self.pos + len >= self.buf.len() {
            return Err(ProtocolError::malformed(format!(
                "{} at offset {} is not null-terminated",
                field, self.pos
            )));
        }
        self.pos += len + 1;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_cstring_excludes_terminator() {
        let buf = b"abc\0def\0";
        assert_eq!(read_cstring(buf, 0), ("abc".to_string(), 3));
        assert_eq!(read_cstring(buf, 4), ("def".to_string(), 3));
    }

    #[test]
    fn test_read_cstring_stops_at_buffer_end() {
        assert_eq!(read_cstring(b"abc", 0), ("abc".to_string(), 3));
        assert_eq!(read_cstring(b"abc", 10), (String::new(), 0));
    }

    #[test]
    fn test_reader_cstring_requires_terminator() {
        let mut r = ByteReader::new(b"name\0map");
        assert_eq!(r.cstring("name").unwrap(), "name");
        assert!(matches!(
            r.cstring("map"),
            Err(ProtocolError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_reader_numeric_bounds() {
        let mut r = ByteReader::new(&[0x01, 0x02, 0x03]);
        assert_eq!(r.u16_le("a").unwrap(), 0x0201);
        assert!(r.u16_le("b").is_err());
        // A failed read does not consume the remaining byte
        assert_eq!(r.remaining(), 1);
        assert_eq!(r.u8("c").unwrap(), 0x03);
    }
}
