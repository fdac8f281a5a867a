use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ExpdbError;

/// Storage format for `date_collected` and `created_at` columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[value(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Unknown,
    /// Stimulus presented to the subject: video, event records, prompts.
    Stimulus,
    /// The subject's behavioral response: button presses, task performance.
    Behavioral,
    /// Brain data such as EEG or fMRI.
    Imaging,
}

impl Modality {
    pub const ALL: [Modality; 4] = [
        Modality::Unknown,
        Modality::Stimulus,
        Modality::Behavioral,
        Modality::Imaging,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Unknown => "UNKNOWN",
            Modality::Stimulus => "STIMULUS",
            Modality::Behavioral => "BEHAVIORAL",
            Modality::Imaging => "IMAGING",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = ExpdbError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Modality::ALL
            .into_iter()
            .find(|modality| modality.as_str() == value)
            .ok_or_else(|| ExpdbError::InvalidModality(value.to_string()))
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[value(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Unknown,
    Eeg,
    Fmri,
    InputResponse,
    VisualPrompt,
    Video,
    AuditoryPrompt,
}

impl DataType {
    pub const ALL: [DataType; 7] = [
        DataType::Unknown,
        DataType::Eeg,
        DataType::Fmri,
        DataType::InputResponse,
        DataType::VisualPrompt,
        DataType::Video,
        DataType::AuditoryPrompt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Unknown => "UNKNOWN",
            DataType::Eeg => "EEG",
            DataType::Fmri => "FMRI",
            DataType::InputResponse => "INPUT_RESPONSE",
            DataType::VisualPrompt => "VISUAL_PROMPT",
            DataType::Video => "VIDEO",
            DataType::AuditoryPrompt => "AUDITORY_PROMPT",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = ExpdbError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .into_iter()
            .find(|data_type| data_type.as_str() == value)
            .ok_or_else(|| ExpdbError::InvalidDataType(value.to_string()))
    }
}

/// Rejects rates that are not a positive, finite frequency in Hz.
pub fn check_sampling_rate(sampling_rate: f64) -> Result<f64, ExpdbError> {
    if sampling_rate.is_finite() && sampling_rate > 0.0 {
        Ok(sampling_rate)
    } else {
        Err(ExpdbError::InvalidSamplingRate(sampling_rate))
    }
}

/// What was recorded and how fast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DataFields")]
pub struct Data {
    sampling_rate: f64,
    modality: Modality,
    #[serde(rename = "type")]
    data_type: DataType,
}

#[derive(Deserialize)]
struct DataFields {
    sampling_rate: f64,
    modality: Modality,
    #[serde(rename = "type")]
    data_type: DataType,
}

impl TryFrom<DataFields> for Data {
    type Error = ExpdbError;

    fn try_from(fields: DataFields) -> Result<Self, Self::Error> {
        Self::new(fields.sampling_rate, fields.modality, fields.data_type)
    }
}

impl Data {
    pub fn new(
        sampling_rate: f64,
        modality: Modality,
        data_type: DataType,
    ) -> Result<Self, ExpdbError> {
        Ok(Self {
            sampling_rate: check_sampling_rate(sampling_rate)?,
            modality,
            data_type,
        })
    }

    /// Builds from the textual column values used by the catalog and the CLI.
    pub fn parse(sampling_rate: f64, modality: &str, data_type: &str) -> Result<Self, ExpdbError> {
        Self::new(sampling_rate, modality.parse()?, data_type.parse()?)
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Data({}, {}, {})",
            self.data_type, self.modality, self.sampling_rate
        )
    }
}

/// How a timecourse was produced: the transform chain, one parameter object per
/// transform, and the source revision of the code that ran it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformData {
    transform_names: Vec<String>,
    transform_params: Vec<Map<String, Value>>,
    git_commit: String,
}

impl TransformData {
    pub fn new(
        transform_names: Vec<String>,
        transform_params: Vec<Map<String, Value>>,
        git_commit: impl Into<String>,
    ) -> Result<Self, ExpdbError> {
        if transform_names.len() != transform_params.len() {
            return Err(ExpdbError::TransformLength {
                names: transform_names.len(),
                params: transform_params.len(),
            });
        }
        Ok(Self {
            transform_names,
            transform_params,
            git_commit: git_commit.into(),
        })
    }

    pub fn from_json(
        names_json: &str,
        params_json: &str,
        git_commit: impl Into<String>,
    ) -> Result<Self, ExpdbError> {
        let names: Vec<String> = serde_json::from_str(names_json)
            .map_err(|err| ExpdbError::TransformJson(err.to_string()))?;
        let params: Vec<Map<String, Value>> = serde_json::from_str(params_json)
            .map_err(|err| ExpdbError::TransformJson(err.to_string()))?;
        Self::new(names, params, git_commit)
    }

    pub fn names(&self) -> &[String] {
        &self.transform_names
    }

    pub fn params(&self) -> &[Map<String, Value>] {
        &self.transform_params
    }

    pub fn git_commit(&self) -> &str {
        &self.git_commit
    }

    pub fn names_json(&self) -> String {
        Value::from(self.transform_names.clone()).to_string()
    }

    pub fn params_json(&self) -> String {
        Value::from(
            self.transform_params
                .iter()
                .cloned()
                .map(Value::Object)
                .collect::<Vec<_>>(),
        )
        .to_string()
    }
}

impl fmt::Display for TransformData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transform({},#{})",
            self.transform_names.join("->"),
            self.git_commit
        )
    }
}

macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(StudyId);
id_type!(SubjectId);
id_type!(TimecourseId);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Study {
    pub id: StudyId,
    pub name: String,
    pub description: Option<String>,
    pub github_repo: String,
    pub created_at: NaiveDateTime,
}

impl Study {
    pub fn to_ref(&self) -> StudyRef {
        StudyRef {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subject {
    pub id: SubjectId,
    /// Short code such as "JH"; unique across the catalog.
    pub code: String,
    pub name: Option<String>,
    pub age: Option<u32>,
    /// Years of practice.
    pub meditation_experience: Option<u32>,
}

impl Subject {
    pub fn to_ref(&self) -> SubjectRef {
        SubjectRef {
            id: self.id,
            code: self.code.clone(),
        }
    }
}

/// Demographics for a subject that does not exist yet.
#[derive(Debug, Clone, Default)]
pub struct NewSubject {
    pub code: String,
    pub name: Option<String>,
    pub age: Option<u32>,
    pub meditation_experience: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StudyRef {
    pub id: StudyId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SubjectRef {
    pub id: SubjectId,
    pub code: String,
}

/// A catalogued recording or derived dataset. Lineage edges live in
/// [`crate::graph::LineageGraph`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timecourse {
    pub id: TimecourseId,
    pub data: Data,
    pub transform: TransformData,
    pub path: String,
    pub description: Option<String>,
    pub date_collected: NaiveDateTime,
    pub is_pilot: bool,
    pub study: StudyRef,
    pub subject: SubjectRef,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_enums_roundtrip_text() {
        for modality in Modality::ALL {
            assert_eq!(modality.as_str().parse::<Modality>().unwrap(), modality);
        }
        for data_type in DataType::ALL {
            assert_eq!(data_type.as_str().parse::<DataType>().unwrap(), data_type);
        }
    }

    #[test]
    fn parse_modality_is_case_sensitive() {
        let err = "imaging".parse::<Modality>().unwrap_err();
        assert_matches!(err, ExpdbError::InvalidModality(_));
    }

    #[test]
    fn serde_applies_rate_check() {
        for rate in [-1.0, 0.0] {
            let err = serde_json::from_value::<Data>(json!({
                "sampling_rate": rate,
                "modality": "IMAGING",
                "type": "EEG",
            }));
            assert!(err.is_err(), "{rate}");
        }
        let data = serde_json::from_value::<Data>(json!({
            "sampling_rate": 256.0,
            "modality": "IMAGING",
            "type": "EEG",
        }))
        .unwrap();
        assert_eq!(data, Data::new(256.0, Modality::Imaging, DataType::Eeg).unwrap());
    }

    #[test]
    fn serde_rejects_unknown_variant() {
        let err = serde_json::from_value::<Data>(json!({
            "sampling_rate": 1.0,
            "modality": "INVALID",
            "type": "EEG",
        }));
        assert!(err.is_err());
    }

    #[test]
    fn transform_display() {
        let xfm = TransformData::new(
            vec!["RawDataUpload".to_string(), "Decimate".to_string()],
            vec![Map::new(), Map::new()],
            "abc123",
        )
        .unwrap();
        assert_eq!(xfm.to_string(), "Transform(RawDataUpload->Decimate,#abc123)");
    }
}
