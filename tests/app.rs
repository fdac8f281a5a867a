mod common;

use assert_matches::assert_matches;
use chrono::Duration;

use expdb::app::{App, DeriveStep, UploadRequest, build_transform};
use expdb::catalog::Catalog;
use expdb::codec::Codecs;
use expdb::domain::{Data, DataType, Modality, NewSubject, TimecourseId};
use expdb::error::ExpdbError;
use expdb::output::JsonOutput;
use expdb::provenance::FixedClock;
use expdb::store::StorageManager;
use expdb::transform::Transform;

use common::{FakeGit, base_time, eeg_file, scratch};

fn app(root: &camino::Utf8PathBuf) -> App<FakeGit, FixedClock> {
    let catalog = Catalog::open(&root.join("expdb.sqlite")).unwrap();
    let storage = StorageManager::local(root.join("data"), Codecs::system());
    App::new(
        catalog,
        storage,
        FakeGit::clean("0123abcd"),
        FixedClock(base_time() + Duration::hours(1)),
        false,
    )
}

fn upload_request(root: &camino::Utf8PathBuf, name: &str, hours: i64) -> UploadRequest {
    UploadRequest {
        data: Data::new(256.0, Modality::Imaging, DataType::Eeg).unwrap(),
        study: "Attention".to_string(),
        subject: "JH".to_string(),
        is_pilot: false,
        source: eeg_file(root, name),
        date_collected: Some(base_time() + Duration::minutes(hours * 60 - 30)),
        description: None,
    }
}

#[test]
fn build_transform_composes_steps() {
    let transform = build_transform(&[
        DeriveStep::SelectChannels(vec!["Cz".to_string()]),
        DeriveStep::Decimate(2),
    ])
    .unwrap();
    assert_eq!(transform.names(), vec!["SelectChannels", "Decimate"]);
    assert_matches!(build_transform(&[]).err(), Some(ExpdbError::Validation(_)));
    assert_matches!(
        build_transform(&[DeriveStep::Decimate(0)]).err(),
        Some(ExpdbError::Validation(_))
    );
}

#[test]
fn upload_derive_and_query() {
    let (_dir, root) = scratch();
    let mut app = app(&root);
    app.create_study("Attention", None, "https://github.com/lab/attention")
        .unwrap();
    app.create_subject(NewSubject {
        code: "JH".to_string(),
        age: Some(41),
        ..NewSubject::default()
    })
    .unwrap();
    let study = app.enroll("Attention", "JH").unwrap();
    assert_eq!(study.subjects.len(), 1);

    let first = app.upload(upload_request(&root, "first", 0)).unwrap();
    let second = app.upload(upload_request(&root, "second", 2)).unwrap();
    assert!(first.derived_from.is_empty());

    let derived = app
        .derive(
            &[DeriveStep::SelectChannels(vec!["Fz".to_string()])],
            vec![first.timecourse.id],
            Some("frontal".to_string()),
        )
        .unwrap();
    assert_eq!(derived.derived_from, vec![first.timecourse.id]);
    assert_eq!(derived.timecourse.transform.git_commit(), "0123abcd");
    assert_eq!(
        app.show(first.timecourse.id).unwrap().derived_timecourses,
        vec![derived.timecourse.id]
    );

    let latest = app.latest("JH", Modality::Imaging).unwrap();
    let ids: Vec<TimecourseId> = latest.timecourses.iter().map(|tc| tc.id).collect();
    assert_eq!(ids, vec![derived.timecourse.id, second.timecourse.id]);

    assert_eq!(
        app.origin(derived.timecourse.id).unwrap().id,
        first.timecourse.id
    );
    let descendant = app.descendant(first.timecourse.id).unwrap();
    assert_eq!(descendant.latest.unwrap().id, derived.timecourse.id);
    assert!(app.descendant(second.timecourse.id).unwrap().latest.is_none());

    let pilot = app.set_pilot(derived.timecourse.id, true).unwrap();
    assert_eq!(pilot.changed, vec![first.timecourse.id, derived.timecourse.id]);
    assert!(!app.show(second.timecourse.id).unwrap().timecourse.is_pilot);

    let rendered = JsonOutput::render(&derived).unwrap();
    let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
    assert_eq!(value["data"]["type"], "EEG");
    assert_eq!(value["derived_from"][0], first.timecourse.id.0);
}

#[test]
fn unknown_names_are_not_found() {
    let (_dir, root) = scratch();
    let mut app = app(&root);
    assert_matches!(app.study("Nope").err(), Some(ExpdbError::NotFound(_)));
    assert_matches!(
        app.upload(upload_request(&root, "orphan", 0)).err(),
        Some(ExpdbError::NotFound(_))
    );
    assert_matches!(
        app.latest("JH", Modality::Imaging).err(),
        Some(ExpdbError::NotFound(_))
    );
    assert_matches!(
        app.show(TimecourseId(1)).err(),
        Some(ExpdbError::NotFound(_))
    );
    assert!(app.studies().unwrap().is_empty());
}

#[test]
fn upload_requires_enrollment() {
    let (_dir, root) = scratch();
    let mut app = app(&root);
    app.create_study("Attention", None, "https://github.com/lab/attention")
        .unwrap();
    app.create_subject(NewSubject {
        code: "JH".to_string(),
        ..NewSubject::default()
    })
    .unwrap();

    assert_matches!(
        app.upload(upload_request(&root, "early", 0)).err(),
        Some(ExpdbError::Validation(message)) if message.contains("not enrolled")
    );
    assert!(!root.join("data").exists());

    app.enroll("Attention", "JH").unwrap();
    let uploaded = app.upload(upload_request(&root, "late", 0)).unwrap();
    assert_eq!(uploaded.timecourse.id, TimecourseId(1));
}
