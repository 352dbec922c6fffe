//! Vector encoding strategies.
//!
//! A backend stores vectors in whatever representation its [`EncoderModel`]
//! produces. Encoders are deterministic: the same model and input always
//! produce byte-identical output, so rebuilding an index from the same data
//! reproduces the same file.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::core::types::VectorId;
use crate::error::{Result, SagittaError};

/// Destination for one encoded row.
pub struct EncodedRow<'a> {
    pub data: &'a mut [u8],
    pub aux: &'a mut [u8],
}

/// A strided block of encoded rows plus their auxiliary payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodedBatch {
    pub data: Vec<u8>,
    pub aux: Vec<u8>,
    pub rows: usize,
    pub stride: usize,
    pub aux_stride: usize,
}

impl EncodedBatch {
    /// Empty batch laid out for `encoder`.
    pub fn for_encoder(encoder: &dyn VectorEncoder) -> Self {
        Self {
            stride: encoder.code_size(),
            aux_stride: encoder.aux_size(),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Code bytes of row `i`.
    pub fn row(&self, i: usize) -> &[u8] {
        &self.data[i * self.stride..(i + 1) * self.stride]
    }

    /// Auxiliary bytes of row `i` (empty when the encoder has none).
    pub fn aux_row(&self, i: usize) -> &[u8] {
        &self.aux[i * self.aux_stride..(i + 1) * self.aux_stride]
    }

    /// Append the rows of `other`, which must share this layout.
    pub fn append(&mut self, other: &EncodedBatch) -> Result<()> {
        if other.stride != self.stride || other.aux_stride != self.aux_stride {
            return Err(SagittaError::internal("Encoded batch layouts differ"));
        }
        self.data.extend_from_slice(&other.data);
        self.aux.extend_from_slice(&other.aux);
        self.rows += other.rows;
        Ok(())
    }

    pub fn memory_usage(&self) -> usize {
        self.data.capacity() + self.aux.capacity()
    }

    /// Check the buffers agree with the declared layout after decoding.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.data.len() != self.rows * self.stride || self.aux.len() != self.rows * self.aux_stride {
            return Err(SagittaError::corrupted("Encoded batch length mismatch"));
        }
        Ok(())
    }
}

/// Encoding strategy used by a backend.
pub trait VectorEncoder: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn dimension(&self) -> usize;

    /// Bytes per encoded row.
    fn code_size(&self) -> usize;

    /// Bytes of auxiliary payload per row.
    fn aux_size(&self) -> usize {
        0
    }

    /// Encode one vector into `row`.
    fn encode(&self, src: &[f32], row: EncodedRow<'_>) -> Result<()>;

    /// Reconstruct an approximation of the original vector.
    fn decode(&self, code: &[u8], out: &mut [f32]);

    /// Encode a row-major block of vectors and append it to `batch`.
    fn encode_batch(&self, src: &[f32], batch: &mut EncodedBatch) -> Result<()> {
        let dim = self.dimension();
        if dim == 0 || src.len() % dim != 0 {
            return Err(SagittaError::invalid_argument(format!(
                "{} floats do not form whole vectors of dimension {dim}",
                src.len()
            )));
        }
        if batch.stride != self.code_size() || batch.aux_stride != self.aux_size() {
            return Err(SagittaError::internal(format!(
                "Batch layout does not match the {} encoder",
                self.name()
            )));
        }

        let n = src.len() / dim;
        let data_start = batch.data.len();
        let aux_start = batch.aux.len();
        batch.data.resize(data_start + n * batch.stride, 0);
        batch.aux.resize(aux_start + n * batch.aux_stride, 0);

        for (i, vector) in src.chunks_exact(dim).enumerate() {
            let data = &mut batch.data
                [data_start + i * batch.stride..data_start + (i + 1) * batch.stride];
            let aux = &mut batch.aux
                [aux_start + i * batch.aux_stride..aux_start + (i + 1) * batch.aux_stride];
            self.encode(vector, EncodedRow { data, aux })?;
        }
        batch.rows += n;
        Ok(())
    }
}

/// Stores full-precision little-endian floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Float32Encoder {
    dimension: usize,
}

impl Float32Encoder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl VectorEncoder for Float32Encoder {
    fn name(&self) -> &'static str {
        "float32"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn code_size(&self) -> usize {
        self.dimension * 4
    }

    fn encode(&self, src: &[f32], row: EncodedRow<'_>) -> Result<()> {
        if src.len() != self.dimension {
            return Err(SagittaError::dimension_mismatch(self.dimension, src.len()));
        }
        LittleEndian::write_f32_into(src, row.data);
        Ok(())
    }

    fn decode(&self, code: &[u8], out: &mut [f32]) {
        LittleEndian::read_f32_into(code, out);
    }
}

/// 8-bit scalar quantization with per-dimension min/max ranges.
///
/// The auxiliary payload holds the squared norm of the original vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scalar8Encoder {
    min_values: Vec<f32>,
    max_values: Vec<f32>,
}

impl Scalar8Encoder {
    /// Learn per-dimension ranges from a row-major block of vectors.
    pub fn train(dimension: usize, vectors: &[f32]) -> Result<Self> {
        if dimension == 0 || vectors.is_empty() || vectors.len() % dimension != 0 {
            return Err(SagittaError::invalid_argument(
                "Scalar quantizer needs at least one complete training vector",
            ));
        }

        let mut min_values = vec![f32::INFINITY; dimension];
        let mut max_values = vec![f32::NEG_INFINITY; dimension];
        for vector in vectors.chunks_exact(dimension) {
            for (i, &value) in vector.iter().enumerate() {
                min_values[i] = min_values[i].min(value);
                max_values[i] = max_values[i].max(value);
            }
        }

        Ok(Self {
            min_values,
            max_values,
        })
    }

    pub fn ranges(&self) -> (&[f32], &[f32]) {
        (&self.min_values, &self.max_values)
    }
}

impl VectorEncoder for Scalar8Encoder {
    fn name(&self) -> &'static str {
        "sq8"
    }

    fn dimension(&self) -> usize {
        self.min_values.len()
    }

    fn code_size(&self) -> usize {
        self.min_values.len()
    }

    fn aux_size(&self) -> usize {
        4
    }

    fn encode(&self, src: &[f32], row: EncodedRow<'_>) -> Result<()> {
        if src.len() != self.dimension() {
            return Err(SagittaError::dimension_mismatch(self.dimension(), src.len()));
        }

        for (i, (&value, code)) in src.iter().zip(row.data.iter_mut()).enumerate() {
            let range = self.max_values[i] - self.min_values[i];
            *code = if range > 0.0 {
                (((value - self.min_values[i]) / range) * 255.0)
                    .round()
                    .clamp(0.0, 255.0) as u8
            } else {
                0
            };
        }

        let norm_sq: f32 = src.iter().map(|v| v * v).sum();
        LittleEndian::write_f32(row.aux, norm_sq);
        Ok(())
    }

    fn decode(&self, code: &[u8], out: &mut [f32]) {
        for (i, (&q, value)) in code.iter().zip(out.iter_mut()).enumerate() {
            let range = self.max_values[i] - self.min_values[i];
            *value = self.min_values[i] + (q as f32 / 255.0) * range;
        }
    }
}

/// Encoding selected by configuration (`ivf.encoding`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EncodingKind {
    #[default]
    Float32,
    Sq8,
}

impl EncodingKind {
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "float32" | "f32" | "flat" => Ok(EncodingKind::Float32),
            "sq8" | "scalar8" => Ok(EncodingKind::Sq8),
            _ => Err(SagittaError::invalid_argument(format!(
                "Unknown vector encoding: {s}"
            ))),
        }
    }
}

/// A trained, serializable encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EncoderModel {
    Float32(Float32Encoder),
    Scalar8(Scalar8Encoder),
}

impl EncoderModel {
    /// Build the model for `kind`, training on `sample` when needed.
    pub fn train(kind: EncodingKind, dimension: usize, sample: &[f32]) -> Result<Self> {
        match kind {
            EncodingKind::Float32 => Ok(EncoderModel::Float32(Float32Encoder::new(dimension))),
            EncodingKind::Sq8 => Ok(EncoderModel::Scalar8(Scalar8Encoder::train(
                dimension, sample,
            )?)),
        }
    }

    pub fn encoder(&self) -> &dyn VectorEncoder {
        match self {
            EncoderModel::Float32(e) => e,
            EncoderModel::Scalar8(e) => e,
        }
    }
}

/// Encoded vectors with their ids, stored row by row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedVectors {
    model: EncoderModel,
    ids: Vec<VectorId>,
    codes: EncodedBatch,
}

impl EncodedVectors {
    pub fn new(model: EncoderModel) -> Self {
        let codes = EncodedBatch::for_encoder(model.encoder());
        Self {
            model,
            ids: Vec::new(),
            codes,
        }
    }

    pub fn model(&self) -> &EncoderModel {
        &self.model
    }

    pub fn encoder(&self) -> &dyn VectorEncoder {
        self.model.encoder()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[VectorId] {
        &self.ids
    }

    pub fn id(&self, row: usize) -> VectorId {
        self.ids[row]
    }

    /// Encode and append a row-major block of vectors.
    pub fn push_batch(&mut self, ids: &[VectorId], vectors: &[f32]) -> Result<()> {
        let dim = self.model.encoder().dimension();
        if ids.len() * dim != vectors.len() {
            return Err(SagittaError::invalid_argument(format!(
                "{} ids do not match {} floats of dimension {dim}",
                ids.len(),
                vectors.len()
            )));
        }
        self.model.encoder().encode_batch(vectors, &mut self.codes)?;
        self.ids.extend_from_slice(ids);
        Ok(())
    }

    /// Decode row `row` into `out`.
    #[inline]
    pub fn decode_into(&self, row: usize, out: &mut [f32]) {
        self.model.encoder().decode(self.codes.row(row), out);
    }

    pub fn memory_usage(&self) -> usize {
        self.ids.capacity() * std::mem::size_of::<VectorId>() + self.codes.memory_usage()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.codes.validate()?;
        if self.codes.rows != self.ids.len() {
            return Err(SagittaError::corrupted("Encoded rows do not match ids"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float32_encoder_is_lossless() {
        let encoder = Float32Encoder::new(3);
        let mut batch = EncodedBatch::for_encoder(&encoder);
        encoder
            .encode_batch(&[1.0, -2.5, 3.25, 0.0, 0.5, 7.0], &mut batch)
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.stride, 12);

        let mut out = [0.0; 3];
        encoder.decode(batch.row(1), &mut out);
        assert_eq!(out, [0.0, 0.5, 7.0]);
    }

    #[test]
    fn test_scalar8_encoder_is_deterministic() {
        let training = [0.0, 10.0, 1.0, 20.0, 0.5, 15.0];
        let a = Scalar8Encoder::train(2, &training).unwrap();
        let b = Scalar8Encoder::train(2, &training).unwrap();

        let mut first = EncodedBatch::for_encoder(&a);
        let mut second = EncodedBatch::for_encoder(&b);
        a.encode_batch(&training, &mut first).unwrap();
        b.encode_batch(&training, &mut second).unwrap();
        assert_eq!(first, second);

        assert_eq!(first.row(0), &[0, 0]);
        assert_eq!(first.row(1), &[255, 255]);
        assert_eq!(first.row(2), &[128, 128]);
        assert_eq!(LittleEndian::read_f32(first.aux_row(1)), 401.0);

        let mut out = [0.0; 2];
        a.decode(first.row(1), &mut out);
        assert_eq!(out, [1.0, 20.0]);
    }

    #[test]
    fn test_scalar8_clamps_out_of_range_values() {
        let encoder = Scalar8Encoder::train(1, &[0.0, 1.0]).unwrap();
        let mut batch = EncodedBatch::for_encoder(&encoder);
        encoder.encode_batch(&[-5.0, 5.0], &mut batch).unwrap();
        assert_eq!(batch.data, vec![0, 255]);
    }

    #[test]
    fn test_encoder_rejects_ragged_input() {
        let encoder = Float32Encoder::new(4);
        let mut batch = EncodedBatch::for_encoder(&encoder);
        assert!(encoder.encode_batch(&[1.0, 2.0, 3.0], &mut batch).is_err());
        assert!(Scalar8Encoder::train(2, &[]).is_err());
    }

    #[test]
    fn test_encoded_vectors() {
        let model = EncoderModel::train(EncodingKind::Float32, 2, &[]).unwrap();
        let mut vectors = EncodedVectors::new(model);
        vectors.push_batch(&[10, 20], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(vectors.push_batch(&[30], &[1.0]).is_err());

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors.id(1), 20);
        let mut out = [0.0; 2];
        vectors.decode_into(1, &mut out);
        assert_eq!(out, [3.0, 4.0]);

        let bytes = bincode::serialize(&vectors).unwrap();
        let decoded: EncodedVectors = bincode::deserialize(&bytes).unwrap();
        decoded.validate().unwrap();
        assert_eq!(decoded, vectors);
    }

    #[test]
    fn test_encoding_kind_parse() {
        assert_eq!(EncodingKind::parse_str("SQ8").unwrap(), EncodingKind::Sq8);
        assert_eq!(EncodingKind::parse_str("float32").unwrap(), EncodingKind::Float32);
        assert!(EncodingKind::parse_str("pq").is_err());
    }
}
