//! Payload representations and the closed registry that maps a
//! `(DataType, Representation)` pair to its on-disk format.

use std::fmt;

use camino::Utf8Path;
use serde::Serialize;

use crate::domain::{DataType, check_sampling_rate};
use crate::error::ExpdbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Representation {
    /// Multi-channel signal with channel names and a sampling frequency.
    RawSignal,
    /// Named, typed, equal-length columns.
    Table,
    /// N-dimensional numeric array.
    Array,
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Representation::RawSignal => write!(f, "raw-signal"),
            Representation::Table => write!(f, "table"),
            Representation::Array => write!(f, "array"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    RawSignal(RawSignal),
    Table(Table),
    Array(NdArray),
}

impl Payload {
    pub fn representation(&self) -> Representation {
        match self {
            Payload::RawSignal(_) => Representation::RawSignal,
            Payload::Table(_) => Representation::Table,
            Payload::Array(_) => Representation::Array,
        }
    }
}

impl From<RawSignal> for Payload {
    fn from(value: RawSignal) -> Self {
        Payload::RawSignal(value)
    }
}

impl From<Table> for Payload {
    fn from(value: Table) -> Self {
        Payload::Table(value)
    }
}

impl From<NdArray> for Payload {
    fn from(value: NdArray) -> Self {
        Payload::Array(value)
    }
}

/// Channels x samples, stored channel-major.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSignal {
    sampling_rate: f64,
    channels: Vec<String>,
    samples: usize,
    data: Vec<f32>,
}

impl RawSignal {
    pub fn new(
        sampling_rate: f64,
        channels: Vec<String>,
        data: Vec<Vec<f32>>,
    ) -> Result<Self, ExpdbError> {
        if channels.len() != data.len() {
            return Err(ExpdbError::Shape(format!(
                "{} channel names for {} channels",
                channels.len(),
                data.len()
            )));
        }
        let samples = data.first().map(Vec::len).unwrap_or(0);
        if data.iter().any(|channel| channel.len() != samples) {
            return Err(ExpdbError::Shape(
                "channels have different sample counts".to_string(),
            ));
        }
        Self::from_flat(
            sampling_rate,
            channels,
            samples,
            data.into_iter().flatten().collect(),
        )
    }

    pub fn from_flat(
        sampling_rate: f64,
        channels: Vec<String>,
        samples: usize,
        data: Vec<f32>,
    ) -> Result<Self, ExpdbError> {
        let sampling_rate = check_sampling_rate(sampling_rate)?;
        if channels.len() * samples != data.len() {
            return Err(ExpdbError::Shape(format!(
                "expected {} values for {} channels x {} samples, got {}",
                channels.len() * samples,
                channels.len(),
                samples,
                data.len()
            )));
        }
        Ok(Self {
            sampling_rate,
            channels,
            samples,
            data,
        })
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        (index < self.channels.len())
            .then(|| &self.data[index * self.samples..(index + 1) * self.samples])
    }

    pub fn channel_by_name(&self, name: &str) -> Option<&[f32]> {
        let index = self.channels.iter().position(|channel| channel == name)?;
        self.channel(index)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Float64(Vec<f64>),
    Int64(Vec<i64>),
    Utf8(Vec<String>),
    Bool(Vec<bool>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Float64(values) => values.len(),
            ColumnValues::Int64(values) => values.len(),
            ColumnValues::Utf8(values) => values.len(),
            ColumnValues::Bool(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: ColumnValues,
}

impl Column {
    pub fn new(name: impl Into<String>, values: ColumnValues) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, ExpdbError> {
        let rows = columns.first().map(|column| column.values.len());
        if let Some(rows) = rows
            && columns.iter().any(|column| column.values.len() != rows)
        {
            return Err(ExpdbError::Shape(
                "table columns have different lengths".to_string(),
            ));
        }
        for (index, column) in columns.iter().enumerate() {
            if columns[..index].iter().any(|other| other.name == column.name) {
                return Err(ExpdbError::Shape(format!(
                    "duplicate column name: {}",
                    column.name
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn rows(&self) -> usize {
        self.columns
            .first()
            .map(|column| column.values.len())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    F32,
    F64,
}

impl DType {
    pub fn size(&self) -> usize {
        match self {
            DType::U8 => 1,
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::U8 => write!(f, "uint8"),
            DType::F32 => write!(f, "float32"),
            DType::F64 => write!(f, "float64"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    U8(Vec<u8>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl ArrayData {
    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::U8(_) => DType::U8,
            ArrayData::F32(_) => DType::F32,
            ArrayData::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::U8(values) => values.len(),
            ArrayData::F32(values) => values.len(),
            ArrayData::F64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Product of `shape`, or `None` when it overflows `usize`.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |count, &dim| count.checked_mul(dim))
}

/// C-ordered n-dimensional array.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    data: ArrayData,
}

impl NdArray {
    pub fn new(shape: Vec<usize>, data: ArrayData) -> Result<Self, ExpdbError> {
        let expected = element_count(&shape)
            .ok_or_else(|| ExpdbError::Shape(format!("shape {shape:?} is too large")))?;
        if expected != data.len() {
            return Err(ExpdbError::Shape(format!(
                "shape {shape:?} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }
}

/// A registered on-disk format. Each variant owns exactly one codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    Fif,
    Npz,
    Parquet,
    Mp4,
    Mp3,
}

/// Every registered `(kind, representation)` pair, in registration order.
pub const REGISTRY: [(DataType, Representation, PayloadFormat); 6] = [
    (DataType::Eeg, Representation::RawSignal, PayloadFormat::Fif),
    (DataType::Fmri, Representation::Array, PayloadFormat::Npz),
    (
        DataType::InputResponse,
        Representation::Table,
        PayloadFormat::Parquet,
    ),
    (
        DataType::VisualPrompt,
        Representation::Array,
        PayloadFormat::Mp4,
    ),
    (
        DataType::AuditoryPrompt,
        Representation::Array,
        PayloadFormat::Mp3,
    ),
    (DataType::Video, Representation::Array, PayloadFormat::Mp4),
];

impl PayloadFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            PayloadFormat::Fif => "fif",
            PayloadFormat::Npz => "npz",
            PayloadFormat::Parquet => "parquet",
            PayloadFormat::Mp4 => "mp4",
            PayloadFormat::Mp3 => "mp3",
        }
    }

    pub fn representation(&self) -> Representation {
        match self {
            PayloadFormat::Fif => Representation::RawSignal,
            PayloadFormat::Parquet => Representation::Table,
            PayloadFormat::Npz | PayloadFormat::Mp4 | PayloadFormat::Mp3 => Representation::Array,
        }
    }

    pub fn resolve(kind: DataType, representation: Representation) -> Result<Self, ExpdbError> {
        match (kind, representation) {
            (DataType::Eeg, Representation::RawSignal) => Ok(PayloadFormat::Fif),
            (DataType::Fmri, Representation::Array) => Ok(PayloadFormat::Npz),
            (DataType::InputResponse, Representation::Table) => Ok(PayloadFormat::Parquet),
            (DataType::VisualPrompt | DataType::Video, Representation::Array) => {
                Ok(PayloadFormat::Mp4)
            }
            (DataType::AuditoryPrompt, Representation::Array) => Ok(PayloadFormat::Mp3),
            (kind, representation) => Err(ExpdbError::UnsupportedPayload(format!(
                "{kind} as {representation}"
            ))),
        }
    }

    /// Reverse lookup used when only a path suffix is known. `mp4` resolves to
    /// `VIDEO`.
    pub fn from_extension(extension: &str) -> Result<(DataType, Representation), ExpdbError> {
        match extension {
            "fif" => Ok((DataType::Eeg, Representation::RawSignal)),
            "npz" => Ok((DataType::Fmri, Representation::Array)),
            "parquet" => Ok((DataType::InputResponse, Representation::Table)),
            "mp4" => Ok((DataType::Video, Representation::Array)),
            "mp3" => Ok((DataType::AuditoryPrompt, Representation::Array)),
            other => Err(ExpdbError::UnsupportedPayload(format!(
                "extension .{other}"
            ))),
        }
    }

    pub fn from_path(path: &str) -> Result<Self, ExpdbError> {
        let extension = Utf8Path::new(path).extension().unwrap_or_default();
        let (kind, representation) = Self::from_extension(extension)?;
        Self::resolve(kind, representation)
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn registry_matches_resolve() {
        for (kind, representation, format) in REGISTRY {
            assert_eq!(PayloadFormat::resolve(kind, representation).unwrap(), format);
            assert_eq!(format.representation(), representation);
        }
    }

    #[test]
    fn reverse_map_agrees_on_representation() {
        for (_, representation, format) in REGISTRY {
            let (kind, reversed) = PayloadFormat::from_extension(format.extension()).unwrap();
            assert_eq!(reversed, representation);
            assert_eq!(PayloadFormat::resolve(kind, reversed).unwrap(), format);
        }
    }

    #[test]
    fn unregistered_pair_is_rejected() {
        let err = PayloadFormat::resolve(DataType::Eeg, Representation::Table).unwrap_err();
        assert_matches!(err, ExpdbError::UnsupportedPayload(_));
        let err = PayloadFormat::resolve(DataType::Unknown, Representation::Array).unwrap_err();
        assert_matches!(err, ExpdbError::UnsupportedPayload(_));
    }

    #[test]
    fn array_shape_must_match_data() {
        let err = NdArray::new(vec![2, 3], ArrayData::F64(vec![0.0; 5])).unwrap_err();
        assert_matches!(err, ExpdbError::Shape(_));
    }

    #[test]
    fn overflowing_shape_is_rejected() {
        assert_eq!(element_count(&[]), Some(1));
        assert_eq!(element_count(&[usize::MAX, 2]), None);
        let err = NdArray::new(vec![usize::MAX, 2], ArrayData::U8(Vec::new())).unwrap_err();
        assert_matches!(err, ExpdbError::Shape(_));
    }
}
