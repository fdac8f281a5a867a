use assert_matches::assert_matches;
use serde_json::{Map, json};

use expdb::domain::{Data, DataType, Modality, TransformData, check_sampling_rate};
use expdb::error::ExpdbError;
use expdb::format::RawSignal;

#[test]
fn parse_enums() {
    assert_eq!("IMAGING".parse::<Modality>().unwrap(), Modality::Imaging);
    assert_eq!(
        "INPUT_RESPONSE".parse::<DataType>().unwrap(),
        DataType::InputResponse
    );
    assert_matches!(
        "imaging".parse::<Modality>(),
        Err(ExpdbError::InvalidModality(_))
    );
    assert_matches!("MEG".parse::<DataType>(), Err(ExpdbError::InvalidDataType(_)));
}

#[test]
fn enum_names_round_trip() {
    for modality in Modality::ALL {
        assert_eq!(modality.to_string().parse::<Modality>().unwrap(), modality);
    }
    for data_type in DataType::ALL {
        assert_eq!(data_type.to_string().parse::<DataType>().unwrap(), data_type);
    }
}

#[test]
fn data_rejects_non_positive_rate() {
    assert_matches!(
        Data::new(-1.0, Modality::Imaging, DataType::Eeg),
        Err(ExpdbError::InvalidSamplingRate(_))
    );
    assert_matches!(
        Data::new(0.0, Modality::Stimulus, DataType::Video),
        Err(ExpdbError::InvalidSamplingRate(_))
    );
    assert_matches!(
        Data::new(f64::NAN, Modality::Imaging, DataType::Eeg),
        Err(ExpdbError::InvalidSamplingRate(_))
    );
    let data = Data::parse(30.0, "STIMULUS", "VIDEO").unwrap();
    assert_eq!(data.data_type(), DataType::Video);
    assert_eq!(data.to_string(), "Data(VIDEO, STIMULUS, 30)");
}

#[test]
fn data_serializes_type_field() {
    let data = Data::new(256.0, Modality::Imaging, DataType::Eeg).unwrap();
    assert_eq!(
        serde_json::to_value(data).unwrap(),
        json!({"sampling_rate": 256.0, "modality": "IMAGING", "type": "EEG"})
    );
}

#[test]
fn transform_data_lengths_must_match() {
    assert_matches!(
        TransformData::new(vec!["A".to_string(), "B".to_string()], vec![Map::new()], "abc"),
        Err(ExpdbError::TransformLength {
            names: 2,
            params: 1
        })
    );
}

#[test]
fn transform_data_json_columns() {
    let mut params = Map::new();
    params.insert("factor".to_string(), json!(2));
    let transform = TransformData::new(
        vec!["RawDataUpload".to_string(), "Decimate".to_string()],
        vec![Map::new(), params],
        "deadbeef",
    )
    .unwrap();
    assert_eq!(transform.names_json(), r#"["RawDataUpload","Decimate"]"#);
    assert_eq!(transform.params_json(), r#"[{},{"factor":2}]"#);
    assert_eq!(transform.to_string(), "Transform(RawDataUpload->Decimate,#deadbeef)");

    let parsed =
        TransformData::from_json(&transform.names_json(), &transform.params_json(), "deadbeef")
            .unwrap();
    assert_eq!(parsed, transform);
    assert_matches!(
        TransformData::from_json("not json", "[]", "x"),
        Err(ExpdbError::TransformJson(_))
    );
}

#[test]
fn signals_and_data_share_the_rate_rule() {
    for rate in [0.0, -2.0, f64::INFINITY] {
        assert_matches!(check_sampling_rate(rate), Err(ExpdbError::InvalidSamplingRate(_)));
        assert_matches!(
            RawSignal::from_flat(rate, vec!["Cz".to_string()], 1, vec![0.0]),
            Err(ExpdbError::InvalidSamplingRate(_))
        );
        assert!(Data::new(rate, Modality::Imaging, DataType::Eeg).is_err());
    }
    let signal = RawSignal::from_flat(0.5, vec!["Cz".to_string()], 1, vec![0.0]).unwrap();
    assert_eq!(signal.sampling_rate(), 0.5);
    assert_eq!(
        Data::new(0.5, Modality::Imaging, DataType::Eeg).unwrap().sampling_rate(),
        0.5
    );
}
