//! Consensus serialization and deserialization.

use crate::{PsetError, Result};
use std::io::{Read, Write};

pub trait Encodable {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize>;

    fn consensus_encode_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.consensus_encode(&mut buf)?;
        Ok(buf)
    }
}

pub trait Decodable: Sized {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self>;

    fn consensus_decode_from_slice(data: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let decoded = Self::consensus_decode(&mut cursor)?;
        if (cursor.position() as usize) != data.len() {
            return Err(PsetError::Encode("trailing bytes after decode".to_string()));
        }
        Ok(decoded)
    }
}

// Helper for writing a variable-length integer (CompactSize).
pub fn write_varint<W: Write>(writer: &mut W, n: u64) -> Result<usize> {
    let mut written = 0;
    if n < 0xfd {
        written += writer.write(&[n as u8])?;
    } else if n <= 0xffff {
        written += writer.write(&[0xfd])?;
        written += writer.write(&u16::to_le_bytes(n as u16))?;
    } else if n <= 0xffffffff {
        written += writer.write(&[0xfe])?;
        written += writer.write(&u32::to_le_bytes(n as u32))?;
    } else {
        written += writer.write(&[0xff])?;
        written += writer.write(&u64::to_le_bytes(n))?;
    }
    Ok(written)
}

// Helper for reading a variable-length integer (CompactSize).
pub fn read_varint<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;

    match buf[0] {
        0xfd => {
            let mut buf = [0u8; 2];
            reader.read_exact(&mut buf)?;
            Ok(u16::from_le_bytes(buf) as u64)
        }
        0xfe => {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf)?;
            Ok(u32::from_le_bytes(buf) as u64)
        }
        0xff => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf)?;
            Ok(u64::from_le_bytes(buf))
        }
        n => Ok(n as u64),
    }
}

impl Encodable for u8 {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        Ok(writer.write(&[*self])?)
    }
}

impl Decodable for u8 {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }
}

impl Encodable for u32 {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        Ok(writer.write(&self.to_le_bytes())?)
    }
}

impl Decodable for u32 {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}

impl Encodable for i32 {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        Ok(writer.write(&self.to_le_bytes())?)
    }
}

impl Decodable for i32 {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }
}

impl Encodable for u64 {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        Ok(writer.write(&self.to_le_bytes())?)
    }
}

impl Decodable for u64 {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut written = write_varint(writer, self.len() as u64)?;
        for item in self {
            written += item.consensus_encode(writer)?;
        }
        Ok(written)
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let len = read_varint(reader)?;
        let mut vec = Vec::with_capacity(len.min(1024) as usize);
        for _ in 0..len {
            vec.push(T::consensus_decode(reader)?);
        }
        Ok(vec)
    }
}

impl Encodable for [u8; 32] {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        Ok(writer.write(self)?)
    }
}

impl Decodable for [u8; 32] {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; 32];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl Encodable for [u8; 33] {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        Ok(writer.write(self)?)
    }
}

impl Decodable for [u8; 33] {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; 33];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Length-prefixed byte blob (CompactSize length followed by raw bytes).
pub fn write_bytes<W: Write>(writer: &mut W, data: &[u8]) -> Result<usize> {
    let mut written = write_varint(writer, data.len() as u64)?;
    written += writer.write(data)?;
    Ok(written)
}

/// Read a length-prefixed byte blob.
pub fn read_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let len = read_varint(reader)?;
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_boundaries() {
        for n in [0u64, 1, 0xfc, 0xfd, 0xffff, 0x10000, 0xffffffff, 0x100000000] {
            let mut buf = Vec::new();
            write_varint(&mut buf, n).unwrap();
            let decoded = read_varint(&mut std::io::Cursor::new(&buf)).unwrap();
            assert_eq!(decoded, n);
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut buf = 5u32.consensus_encode_to_vec().unwrap();
        buf.push(0xab);
        assert!(u32::consensus_decode_from_slice(&buf).is_err());
    }
}
