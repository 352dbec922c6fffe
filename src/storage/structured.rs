//! Checksummed binary I/O.
//!
//! [`StructWriter`] writes little-endian primitives and length-prefixed
//! blobs while feeding every byte into a CRC32. [`StructWriter::finish`]
//! appends the checksum. [`StructReader`] mirrors the layout and
//! [`StructReader::finish`] verifies the trailer.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{Result, SagittaError};

/// Upper bound on a single length-prefixed blob, to reject garbage lengths
/// before allocating.
const MAX_BLOB_LEN: u64 = 1 << 40;

/// A checksumming writer for binary data.
pub struct StructWriter<W: Write> {
    writer: W,
    hasher: Hasher,
    position: u64,
}

impl<W: Write> StructWriter<W> {
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: Hasher::new(),
            position: 0,
        }
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.track(&[value]);
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.writer.write_u16::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write a string with a u64 length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write raw bytes with a u64 length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_u64(value.len() as u64)?;
        self.write_raw(value)
    }

    /// Write raw bytes without a length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.track(value);
        Ok(())
    }

    /// Bytes written so far, excluding the trailer.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Append the CRC32 trailer and hand back the inner writer.
    pub fn finish(mut self) -> Result<W> {
        let checksum = self.hasher.finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn track(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }
}

/// A checksumming reader for data produced by [`StructWriter`].
pub struct StructReader<R: Read> {
    reader: R,
    hasher: Hasher,
    position: u64,
}

impl<R: Read> StructReader<R> {
    pub fn new(reader: R) -> Self {
        StructReader {
            reader,
            hasher: Hasher::new(),
            position: 0,
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.reader.read_u8().map_err(truncated)?;
        self.track(&[value]);
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let value = self.reader.read_u16::<LittleEndian>().map_err(truncated)?;
        self.track(&value.to_le_bytes());
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.reader.read_u32::<LittleEndian>().map_err(truncated)?;
        self.track(&value.to_le_bytes());
        Ok(value)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let value = self.reader.read_u64::<LittleEndian>().map_err(truncated)?;
        self.track(&value.to_le_bytes());
        Ok(value)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| SagittaError::corrupted(format!("Invalid UTF-8 string: {e}")))
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u64()?;
        if len > MAX_BLOB_LEN {
            return Err(SagittaError::corrupted(format!(
                "Blob length {len} is out of range"
            )));
        }
        self.read_raw(len as usize)
    }

    /// Read exactly `length` raw bytes.
    pub fn read_raw(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let read = (&mut self.reader)
            .take(length as u64)
            .read_to_end(&mut bytes)?;
        if read != length {
            return Err(SagittaError::corrupted("Unexpected end of index data"));
        }
        self.track(&bytes);
        Ok(bytes)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the trailer and compare it with the checksum of everything read.
    pub fn finish(mut self) -> Result<R> {
        let computed = self.hasher.clone().finalize();
        let stored = self.reader.read_u32::<LittleEndian>().map_err(truncated)?;
        if stored != computed {
            return Err(SagittaError::corrupted(format!(
                "Checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }
        Ok(self.reader)
    }

    fn track(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }
}

fn truncated(e: std::io::Error) -> SagittaError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        SagittaError::corrupted("Unexpected end of index data")
    } else {
        SagittaError::Io(e)
    }
}
