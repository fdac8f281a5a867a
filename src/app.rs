use camino::Utf8PathBuf;
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::info;

use crate::builtin::{Chain, Decimate, SelectChannels};
use crate::catalog::Catalog;
use crate::domain::{Data, Modality, NewSubject, Study, Subject, Timecourse, TimecourseId};
use crate::error::ExpdbError;
use crate::provenance::{Clock, SourceControl};
use crate::store::StorageManager;
use crate::transform::{PendingTransform, RawDataUpload, Transform, TransformContext};

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub data: Data,
    pub study: String,
    pub subject: String,
    pub is_pilot: bool,
    pub source: Utf8PathBuf,
    pub date_collected: Option<NaiveDateTime>,
    pub description: Option<String>,
}

/// One step of a built-in derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeriveStep {
    SelectChannels(Vec<String>),
    Decimate(usize),
}

impl DeriveStep {
    fn build(&self) -> Result<Box<dyn Transform>, ExpdbError> {
        Ok(match self {
            DeriveStep::SelectChannels(channels) => Box::new(SelectChannels::new(channels.clone())?),
            DeriveStep::Decimate(factor) => Box::new(Decimate::new(*factor)?),
        })
    }
}

/// Composes steps left to right into one transform.
pub fn build_transform(steps: &[DeriveStep]) -> Result<Box<dyn Transform>, ExpdbError> {
    let (first, rest) = steps
        .split_first()
        .ok_or_else(|| ExpdbError::Validation("no derivation steps given".to_string()))?;
    rest.iter()
        .try_fold(first.build()?, |chain, step| -> Result<Box<dyn Transform>, ExpdbError> {
            Ok(Box::new(Chain::new(chain, step.build()?)))
        })
}

#[derive(Debug, Clone, Serialize)]
pub struct TimecourseDetail {
    #[serde(flatten)]
    pub timecourse: Timecourse,
    pub derived_from: Vec<TimecourseId>,
    pub derived_timecourses: Vec<TimecourseId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PilotResult {
    pub id: TimecourseId,
    pub is_pilot: bool,
    pub changed: Vec<TimecourseId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatestResult {
    pub subject: String,
    pub modality: Modality,
    pub timecourses: Vec<Timecourse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DescendantResult {
    pub id: TimecourseId,
    pub latest: Option<Timecourse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudyDetail {
    #[serde(flatten)]
    pub study: Study,
    pub subjects: Vec<Subject>,
}

pub struct App<S: SourceControl, C: Clock> {
    catalog: Catalog,
    storage: StorageManager,
    source_control: S,
    clock: C,
    debug: bool,
}

impl<S: SourceControl, C: Clock> App<S, C> {
    pub fn new(
        catalog: Catalog,
        storage: StorageManager,
        source_control: S,
        clock: C,
        debug: bool,
    ) -> Self {
        Self {
            catalog,
            storage,
            source_control,
            clock,
            debug,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn create_study(
        &mut self,
        name: &str,
        description: Option<&str>,
        github_repo: &str,
    ) -> Result<Study, ExpdbError> {
        self.catalog.create_study(name, description, github_repo)
    }

    pub fn create_subject(&mut self, subject: NewSubject) -> Result<Subject, ExpdbError> {
        self.catalog.create_subject(subject)
    }

    pub fn enroll(&mut self, study: &str, subject: &str) -> Result<StudyDetail, ExpdbError> {
        let study = self.catalog.study_by_name(study)?;
        let subject = self.catalog.subject_by_code(subject)?;
        self.catalog.enroll(study.id, subject.id)?;
        self.study(&study.name)
    }

    pub fn study(&self, name: &str) -> Result<StudyDetail, ExpdbError> {
        let study = self.catalog.study_by_name(name)?;
        let subjects = self.catalog.subjects_in_study(study.id)?;
        Ok(StudyDetail { study, subjects })
    }

    pub fn studies(&self) -> Result<Vec<Study>, ExpdbError> {
        self.catalog.studies()
    }

    pub fn upload(&mut self, request: UploadRequest) -> Result<TimecourseDetail, ExpdbError> {
        let study = self.catalog.study_by_name(&request.study)?;
        let subject = self.catalog.subject_by_code(&request.subject)?;
        let enrolled = self
            .catalog
            .subjects_in_study(study.id)?
            .iter()
            .any(|member| member.id == subject.id);
        if !enrolled {
            return Err(ExpdbError::Validation(format!(
                "subject {} is not enrolled in study {}",
                subject.code, study.name
            )));
        }
        let mut upload = RawDataUpload::new(
            request.data,
            &study,
            &subject,
            request.is_pilot,
            request.source,
        );
        if let Some(date_collected) = request.date_collected {
            upload = upload.with_date_collected(date_collected);
        }
        if let Some(description) = request.description {
            upload = upload.with_description(description);
        }
        let ctx = TransformContext {
            storage: &self.storage,
            source_control: &self.source_control,
            clock: &self.clock,
            debug: self.debug,
        };
        let applied = upload.apply(&mut self.catalog, &ctx)?;
        let timecourse = applied.commit(&mut self.catalog, &self.storage)?;
        info!(id = %timecourse.id, path = %timecourse.path, "uploaded");
        self.show(timecourse.id)
    }

    pub fn derive(
        &mut self,
        steps: &[DeriveStep],
        inputs: Vec<TimecourseId>,
        description: Option<String>,
    ) -> Result<TimecourseDetail, ExpdbError> {
        let mut pending = PendingTransform::new(build_transform(steps)?, inputs);
        if let Some(description) = description {
            pending = pending.with_description(description);
        }
        let ctx = TransformContext {
            storage: &self.storage,
            source_control: &self.source_control,
            clock: &self.clock,
            debug: self.debug,
        };
        let applied = pending.apply(&mut self.catalog, &ctx)?;
        let timecourse = applied.commit(&mut self.catalog, &self.storage)?;
        self.show(timecourse.id)
    }

    pub fn set_pilot(&mut self, id: TimecourseId, is_pilot: bool) -> Result<PilotResult, ExpdbError> {
        let changed = self.catalog.set_is_pilot(id, is_pilot)?;
        Ok(PilotResult {
            id,
            is_pilot,
            changed,
        })
    }

    pub fn latest(&self, subject: &str, modality: Modality) -> Result<LatestResult, ExpdbError> {
        let found = self.catalog.subject_by_code(subject)?;
        let timecourses = self
            .catalog
            .graph()
            .latest_by_modality(found.id, modality)
            .into_iter()
            .cloned()
            .collect();
        Ok(LatestResult {
            subject: found.code,
            modality,
            timecourses,
        })
    }

    pub fn origin(&self, id: TimecourseId) -> Result<Timecourse, ExpdbError> {
        self.catalog.graph().find_original_upload(id).cloned()
    }

    pub fn descendant(&self, id: TimecourseId) -> Result<DescendantResult, ExpdbError> {
        let latest = self.catalog.graph().find_latest_derived(id)?.cloned();
        Ok(DescendantResult { id, latest })
    }

    pub fn show(&self, id: TimecourseId) -> Result<TimecourseDetail, ExpdbError> {
        let graph = self.catalog.graph();
        let timecourse = self.catalog.timecourse(id)?.clone();
        let derived_from = graph.parents(id)?.iter().map(|parent| parent.id).collect();
        let derived_timecourses = graph.children(id)?.iter().map(|child| child.id).collect();
        Ok(TimecourseDetail {
            timecourse,
            derived_from,
            derived_timecourses,
        })
    }
}
