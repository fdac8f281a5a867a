#![allow(dead_code)]

use camino::Utf8PathBuf;
use chrono::{NaiveDate, NaiveDateTime};
use tempfile::TempDir;

use expdb::catalog::Catalog;
use expdb::codec::fif;
use expdb::domain::{NewSubject, Study, Subject};
use expdb::error::ExpdbError;
use expdb::format::RawSignal;
use expdb::provenance::SourceControl;

/// Source control with a fixed head and cleanliness.
pub struct FakeGit {
    pub head: Option<String>,
    pub clean: bool,
}

impl FakeGit {
    pub fn clean(head: &str) -> Self {
        Self {
            head: Some(head.to_string()),
            clean: true,
        }
    }

    pub fn dirty(head: &str) -> Self {
        Self {
            head: Some(head.to_string()),
            clean: false,
        }
    }
}

impl SourceControl for FakeGit {
    fn head_commit(&self) -> Result<String, ExpdbError> {
        self.head
            .clone()
            .ok_or_else(|| ExpdbError::SourceControl("not a git repository".to_string()))
    }

    fn is_clean(&self) -> Result<bool, ExpdbError> {
        Ok(self.clean)
    }
}

pub fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

pub fn scratch() -> (TempDir, Utf8PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, root)
}

pub fn eeg_signal() -> RawSignal {
    RawSignal::new(
        256.0,
        vec!["Fz".to_string(), "Cz".to_string(), "Pz".to_string()],
        vec![
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            vec![10.0, 11.0, 12.0, 13.0, 14.0, 15.0],
            vec![20.0, 21.0, 22.0, 23.0, 24.0, 25.0],
        ],
    )
    .unwrap()
}

/// Writes [`eeg_signal`] to `dir/name.fif` for upload.
pub fn eeg_file(dir: &Utf8PathBuf, name: &str) -> Utf8PathBuf {
    let path = dir.join(format!("{name}.fif"));
    fif::write(&eeg_signal(), &path).unwrap();
    path
}

pub fn seeded_catalog() -> (Catalog, Study, Subject) {
    let mut catalog = Catalog::open_in_memory().unwrap();
    let study = catalog
        .create_study("Test Study", Some("fixture"), "https://github.com/lab/test-study")
        .unwrap();
    let subject = catalog
        .create_subject(NewSubject {
            code: "TS".to_string(),
            name: Some("Test Subject".to_string()),
            age: Some(30),
            meditation_experience: Some(2),
        })
        .unwrap();
    catalog.enroll(study.id, subject.id).unwrap();
    (catalog, study, subject)
}
