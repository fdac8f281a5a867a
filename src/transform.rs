//! Transforms turn stored timecourses into new ones. A transform moves
//! through `PendingTransform` (inputs bound) to `AppliedTransform` (output
//! computed, node built) and is consumed by `commit`.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use tracing::info;

use crate::catalog::Catalog;
use crate::domain::{
    Data, Study, StudyRef, Subject, SubjectRef, Timecourse, TimecourseId, TransformData,
};
use crate::error::ExpdbError;
use crate::format::Payload;
use crate::provenance::{self, Clock, SourceControl};
use crate::store::StorageManager;

/// A computation from one or more input payloads to one output payload.
pub trait Transform {
    fn name(&self) -> String;

    /// Parameters recorded in provenance.
    fn params(&self) -> Map<String, Value>;

    /// Name chain recorded in provenance; composites override this.
    fn names(&self) -> Vec<String> {
        vec![self.name()]
    }

    fn param_list(&self) -> Vec<Map<String, Value>> {
        vec![self.params()]
    }

    /// Required kind of every input, when the transform is picky.
    fn input_data(&self) -> Option<Data> {
        None
    }

    fn output_data(&self, inputs: &[Data]) -> Result<Data, ExpdbError>;

    fn transform(&self, inputs: Vec<Payload>) -> Result<Payload, ExpdbError>;
}

impl<T: Transform + ?Sized> Transform for Box<T> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn params(&self) -> Map<String, Value> {
        (**self).params()
    }

    fn names(&self) -> Vec<String> {
        (**self).names()
    }

    fn param_list(&self) -> Vec<Map<String, Value>> {
        (**self).param_list()
    }

    fn input_data(&self) -> Option<Data> {
        (**self).input_data()
    }

    fn output_data(&self, inputs: &[Data]) -> Result<Data, ExpdbError> {
        (**self).output_data(inputs)
    }

    fn transform(&self, inputs: Vec<Payload>) -> Result<Payload, ExpdbError> {
        (**self).transform(inputs)
    }
}

/// Collaborators a transform runs against.
pub struct TransformContext<'a> {
    pub storage: &'a StorageManager,
    pub source_control: &'a dyn SourceControl,
    pub clock: &'a dyn Clock,
    /// Tolerate a dirty source tree.
    pub debug: bool,
}

fn transform_data<T: Transform + ?Sized>(
    transform: &T,
    git_commit: String,
) -> Result<TransformData, ExpdbError> {
    TransformData::new(transform.names(), transform.param_list(), git_commit)
}

pub struct PendingTransform<T: Transform> {
    transform: T,
    inputs: Vec<TimecourseId>,
    description: Option<String>,
}

impl<T: Transform> PendingTransform<T> {
    pub fn new(transform: T, inputs: Vec<TimecourseId>) -> Self {
        Self {
            transform,
            inputs,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Runs the transform. The source tree is checked before any payload is
    /// read. The new node takes its study, subject and pilot flag from the
    /// first input.
    pub fn apply(
        self,
        catalog: &mut Catalog,
        ctx: &TransformContext<'_>,
    ) -> Result<AppliedTransform, ExpdbError> {
        let git_commit = provenance::capture(ctx.source_control, ctx.debug)?;

        if self.inputs.is_empty() {
            return Err(ExpdbError::Validation(
                "a transform needs at least one input".to_string(),
            ));
        }
        let inputs = self
            .inputs
            .iter()
            .map(|&id| catalog.timecourse(id).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(expected) = self.transform.input_data()
            && let Some(input) = inputs.iter().find(|input| input.data != expected)
        {
            return Err(ExpdbError::Validation(format!(
                "{} expects {expected} but timecourse {} is {}",
                self.transform.name(),
                input.id,
                input.data
            )));
        }

        let payloads = inputs
            .iter()
            .map(|input| ctx.storage.retrieve(input))
            .collect::<Result<Vec<_>, _>>()?;
        let payload = self.transform.transform(payloads)?;

        let input_data: Vec<Data> = inputs.iter().map(|input| input.data).collect();
        let data = self.transform.output_data(&input_data)?;
        let transform = transform_data(&self.transform, git_commit)?;
        let first = &inputs[0];
        let timecourse = Timecourse {
            id: catalog.next_timecourse_id()?,
            data,
            transform,
            path: String::new(),
            description: self.description,
            date_collected: ctx.clock.now(),
            is_pilot: first.is_pilot,
            study: first.study.clone(),
            subject: first.subject.clone(),
        };
        AppliedTransform::new(timecourse, self.inputs, payload, ctx.storage)
    }
}

/// Ingests a local file as a new root timecourse. The payload is passed
/// through unchanged.
#[derive(Debug, Clone)]
pub struct RawDataUpload {
    data: Data,
    study: StudyRef,
    subject: SubjectRef,
    is_pilot: bool,
    source: Utf8PathBuf,
    date_collected: Option<NaiveDateTime>,
    description: Option<String>,
}

impl RawDataUpload {
    pub fn new(
        data: Data,
        study: &Study,
        subject: &Subject,
        is_pilot: bool,
        source: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            data,
            study: study.to_ref(),
            subject: subject.to_ref(),
            is_pilot,
            source: source.into(),
            date_collected: None,
            description: None,
        }
    }

    pub fn with_date_collected(mut self, date_collected: NaiveDateTime) -> Self {
        self.date_collected = Some(date_collected);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn source(&self) -> &Utf8Path {
        &self.source
    }

    pub fn apply(
        self,
        catalog: &mut Catalog,
        ctx: &TransformContext<'_>,
    ) -> Result<AppliedTransform, ExpdbError> {
        let git_commit = provenance::capture(ctx.source_control, ctx.debug)?;
        let payload = ctx.storage.codecs().decode_path(&self.source)?;
        let transform = transform_data(&self, git_commit)?;
        let timecourse = Timecourse {
            id: catalog.next_timecourse_id()?,
            data: self.data,
            transform,
            path: String::new(),
            description: self.description,
            date_collected: self.date_collected.unwrap_or_else(|| ctx.clock.now()),
            is_pilot: self.is_pilot,
            study: self.study,
            subject: self.subject,
        };
        AppliedTransform::new(timecourse, Vec::new(), payload, ctx.storage)
    }
}

impl Transform for RawDataUpload {
    fn name(&self) -> String {
        "RawDataUpload".to_string()
    }

    fn params(&self) -> Map<String, Value> {
        Map::new()
    }

    fn output_data(&self, _inputs: &[Data]) -> Result<Data, ExpdbError> {
        Ok(self.data)
    }

    fn transform(&self, inputs: Vec<Payload>) -> Result<Payload, ExpdbError> {
        inputs
            .into_iter()
            .next()
            .ok_or_else(|| ExpdbError::Validation("nothing to upload".to_string()))
    }
}

/// A computed timecourse that is not yet stored or catalogued.
#[derive(Debug)]
pub struct AppliedTransform {
    timecourse: Timecourse,
    derived_from: Vec<TimecourseId>,
    payload: Payload,
}

impl AppliedTransform {
    fn new(
        mut timecourse: Timecourse,
        derived_from: Vec<TimecourseId>,
        payload: Payload,
        storage: &StorageManager,
    ) -> Result<Self, ExpdbError> {
        timecourse.path = storage.uri_for(&timecourse, &payload)?;
        Ok(Self {
            timecourse,
            derived_from,
            payload,
        })
    }

    pub fn timecourse(&self) -> &Timecourse {
        &self.timecourse
    }

    pub fn derived_from(&self) -> &[TimecourseId] {
        &self.derived_from
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Stores the payload, then catalogs the node. If cataloguing fails the
    /// stored payload is left in place with nothing referencing it.
    pub fn commit(
        self,
        catalog: &mut Catalog,
        storage: &StorageManager,
    ) -> Result<Timecourse, ExpdbError> {
        storage.store(&self.timecourse, &self.payload)?;
        let id = self.timecourse.id;
        let path = self.timecourse.path.clone();
        catalog.insert_timecourse(self.timecourse, &self.derived_from)?;
        info!(%id, %path, transform = %catalog.timecourse(id)?.transform, "committed timecourse");
        catalog.timecourse(id).cloned()
    }
}
