//! Serialized index envelope.
//!
//! ```text
//! magic "SGTA" | version u16 | backend name | metric u8 | dimension u64 |
//! count u64 | attributes (bincode) | backend payload | crc32
//! ```
//!
//! Strings and blobs carry a u64 length prefix; integers are little-endian.
//! The trailer covers every preceding byte, so a truncated or partially
//! written file never opens.

use std::io::{Read, Write};

use crate::backend::BackendKind;
use crate::core::distance::DistanceType;
use crate::core::types::{AttributeStore, Dimension};
use crate::error::{Result, SagittaError};
use crate::storage::structured::{StructReader, StructWriter};

pub const MAGIC: &[u8; 4] = b"SGTA";
pub const FORMAT_VERSION: u16 = 1;

/// Metadata stored in front of the backend payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub kind: BackendKind,
    pub metric: DistanceType,
    pub dimension: Dimension,
    pub count: u64,
}

/// A fully decoded index file.
#[derive(Debug)]
pub struct IndexFile {
    pub header: IndexHeader,
    pub attributes: AttributeStore,
    pub payload: Vec<u8>,
}

/// Write the envelope and return the inner writer.
pub fn write_index<W: Write>(writer: W, file: &IndexFile) -> Result<W> {
    let attributes = bincode::serialize(&file.attributes)?;

    let mut writer = StructWriter::new(writer);
    writer.write_raw(MAGIC)?;
    writer.write_u16(FORMAT_VERSION)?;
    writer.write_string(file.header.kind.name())?;
    writer.write_u8(file.header.metric.code())?;
    writer.write_u64(file.header.dimension as u64)?;
    writer.write_u64(file.header.count)?;
    writer.write_bytes(&attributes)?;
    writer.write_bytes(&file.payload)?;
    writer.finish()
}

/// Read and verify an envelope.
pub fn read_index<R: Read>(reader: R) -> Result<IndexFile> {
    let mut reader = StructReader::new(reader);

    let magic = reader.read_raw(MAGIC.len())?;
    if magic.as_slice() != MAGIC {
        return Err(SagittaError::corrupted("Not a Sagitta index file"));
    }
    let version = reader.read_u16()?;
    if version != FORMAT_VERSION {
        return Err(SagittaError::corrupted(format!(
            "Unsupported index format version {version}"
        )));
    }

    let name = reader.read_string()?;
    let kind = BackendKind::from_name(&name)
        .ok_or_else(|| SagittaError::corrupted(format!("Unknown backend in index file: {name}")))?;
    let code = reader.read_u8()?;
    let metric = DistanceType::from_code(code)
        .ok_or_else(|| SagittaError::corrupted(format!("Unknown metric code {code}")))?;
    let dimension = reader.read_u64()? as Dimension;
    let count = reader.read_u64()?;
    let attributes = reader.read_bytes()?;
    let payload = reader.read_bytes()?;
    reader.finish()?;

    let mut attributes: AttributeStore = bincode::deserialize(&attributes)?;
    attributes.rebuild_index()?;

    Ok(IndexFile {
        header: IndexHeader {
            kind,
            metric,
            dimension,
            count,
        },
        attributes,
        payload,
    })
}
