use std::fs;
use std::io::Write;
use std::sync::Arc;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;
use tempfile::TempDir;

use expdb::codec::{Codecs, Transcoder, VideoGeometry};
use expdb::error::ExpdbError;
use expdb::format::{
    ArrayData, Column, ColumnValues, NdArray, Payload, PayloadFormat, RawSignal, Table,
};

/// Lossless stand-in for ffmpeg: writes the buffers as JSON.
struct JsonTranscoder;

impl Transcoder for JsonTranscoder {
    fn encode_video(
        &self,
        geometry: VideoGeometry,
        rgb: &[u8],
        destination: &Utf8Path,
    ) -> Result<(), ExpdbError> {
        let body = json!({
            "frames": geometry.frames,
            "height": geometry.height,
            "width": geometry.width,
            "rgb": rgb,
        });
        fs::write(destination, body.to_string()).map_err(|err| ExpdbError::Filesystem(err.to_string()))
    }

    fn decode_video(&self, source: &Utf8Path) -> Result<(VideoGeometry, Vec<u8>), ExpdbError> {
        let body: serde_json::Value = serde_json::from_str(&fs::read_to_string(source).unwrap()).unwrap();
        let geometry = VideoGeometry {
            frames: body["frames"].as_u64().unwrap() as usize,
            height: body["height"].as_u64().unwrap() as usize,
            width: body["width"].as_u64().unwrap() as usize,
        };
        Ok((geometry, serde_json::from_value(body["rgb"].clone()).unwrap()))
    }

    fn encode_audio(
        &self,
        channels: usize,
        samples: &[f32],
        destination: &Utf8Path,
    ) -> Result<(), ExpdbError> {
        let body = json!({"channels": channels, "samples": samples});
        fs::write(destination, body.to_string()).map_err(|err| ExpdbError::Filesystem(err.to_string()))
    }

    fn decode_audio(&self, source: &Utf8Path) -> Result<(usize, Vec<f32>), ExpdbError> {
        let body: serde_json::Value = serde_json::from_str(&fs::read_to_string(source).unwrap()).unwrap();
        Ok((
            body["channels"].as_u64().unwrap() as usize,
            serde_json::from_value(body["samples"].clone()).unwrap(),
        ))
    }
}

fn codecs() -> Codecs {
    Codecs::new(Arc::new(JsonTranscoder))
}

fn scratch() -> (TempDir, Utf8PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, root)
}

fn eeg() -> RawSignal {
    RawSignal::new(
        256.0,
        vec!["Fz".to_string(), "Cz".to_string()],
        vec![vec![0.5, -1.25, 3.0], vec![1e-6, 2e-6, -3e-6]],
    )
    .unwrap()
}

#[test]
fn fif_round_trip() {
    let (_dir, root) = scratch();
    let path = root.join("signal.fif");
    let payload = Payload::from(eeg());
    codecs().encode(PayloadFormat::Fif, &payload, &path).unwrap();
    assert_eq!(codecs().decode_path(&path).unwrap(), payload);
}

#[test]
fn npz_round_trip() {
    let (_dir, root) = scratch();
    let path = root.join("volume.npz");
    let data: Vec<f64> = (0..24).map(|value| value as f64 * 0.5).collect();
    let payload = Payload::from(NdArray::new(vec![2, 3, 4], ArrayData::F64(data)).unwrap());
    codecs().encode(PayloadFormat::Npz, &payload, &path).unwrap();
    assert_eq!(codecs().decode(PayloadFormat::Npz, &path).unwrap(), payload);
}

#[test]
fn parquet_round_trip() {
    let (_dir, root) = scratch();
    let path = root.join("responses.parquet");
    let table = Table::new(vec![
        Column::new("trial", ColumnValues::Int64(vec![1, 2, 3])),
        Column::new("rt", ColumnValues::Float64(vec![0.41, 0.38, 0.52])),
        Column::new(
            "key",
            ColumnValues::Utf8(vec!["f".to_string(), "j".to_string(), "f".to_string()]),
        ),
        Column::new("correct", ColumnValues::Bool(vec![true, false, true])),
    ])
    .unwrap();
    let payload = Payload::from(table);
    codecs().encode(PayloadFormat::Parquet, &payload, &path).unwrap();

    let Payload::Table(decoded) = codecs().decode(PayloadFormat::Parquet, &path).unwrap() else {
        panic!("expected table");
    };
    assert_eq!(decoded.rows(), 3);
    assert_eq!(
        decoded.column("key").unwrap().values,
        ColumnValues::Utf8(vec!["f".to_string(), "j".to_string(), "f".to_string()])
    );
    assert_eq!(Payload::Table(decoded), payload);
}

#[test]
fn parquet_rejects_empty_table() {
    let (_dir, root) = scratch();
    let payload = Payload::from(Table::new(Vec::new()).unwrap());
    assert_matches!(
        codecs().encode(PayloadFormat::Parquet, &payload, &root.join("empty.parquet")),
        Err(ExpdbError::Shape(_))
    );
}

#[test]
fn video_round_trip_through_transcoder() {
    let (_dir, root) = scratch();
    let path = root.join("clip.mp4");
    let rgb: Vec<u8> = (0..2 * 2 * 3 * 3).map(|value| value as u8).collect();
    let payload = Payload::from(NdArray::new(vec![2, 2, 3, 3], ArrayData::U8(rgb)).unwrap());
    codecs().encode(PayloadFormat::Mp4, &payload, &path).unwrap();
    assert_eq!(codecs().decode_path(&path).unwrap(), payload);
}

#[test]
fn audio_round_trip_through_transcoder() {
    let (_dir, root) = scratch();
    let path = root.join("tone.mp3");
    let samples = vec![0.0, 0.25, -0.25, 0.5, -0.5, 1.0];
    let payload = Payload::from(NdArray::new(vec![3, 2], ArrayData::F32(samples)).unwrap());
    codecs().encode(PayloadFormat::Mp3, &payload, &path).unwrap();
    assert_eq!(codecs().decode(PayloadFormat::Mp3, &path).unwrap(), payload);
}

#[test]
fn video_shape_is_checked() {
    let (_dir, root) = scratch();
    let gray = Payload::from(NdArray::new(vec![2, 2, 2], ArrayData::U8(vec![0; 8])).unwrap());
    assert_matches!(
        codecs().encode(PayloadFormat::Mp4, &gray, &root.join("gray.mp4")),
        Err(ExpdbError::Shape(_))
    );
    let float = Payload::from(NdArray::new(vec![1, 1, 1, 3], ArrayData::F32(vec![0.0; 3])).unwrap());
    assert_matches!(
        codecs().encode(PayloadFormat::Mp4, &float, &root.join("float.mp4")),
        Err(ExpdbError::Shape(_))
    );
    assert!(!root.join("gray.mp4").exists());
}

#[test]
fn extension_must_match_format() {
    let (_dir, root) = scratch();
    assert_matches!(
        codecs().encode(PayloadFormat::Fif, &Payload::from(eeg()), &root.join("signal.npz")),
        Err(ExpdbError::ExtensionMismatch { expected, actual })
            if expected == "fif" && actual == "npz"
    );
    assert_matches!(
        codecs().decode(PayloadFormat::Parquet, &root.join("table")),
        Err(ExpdbError::ExtensionMismatch { .. })
    );
}

#[test]
fn payload_must_match_format() {
    let (_dir, root) = scratch();
    assert_matches!(
        codecs().encode(PayloadFormat::Npz, &Payload::from(eeg()), &root.join("signal.npz")),
        Err(ExpdbError::UnsupportedPayload(_))
    );
    assert_matches!(
        codecs().decode_path(&root.join("notes.txt")),
        Err(ExpdbError::UnsupportedPayload(_))
    );
}

#[test]
fn garbage_fails_to_decode() {
    let (_dir, root) = scratch();
    for name in ["bad.fif", "bad.npz", "bad.parquet"] {
        let path = root.join(name);
        fs::write(&path, b"definitely not a payload").unwrap();
        assert_matches!(codecs().decode_path(&path), Err(ExpdbError::Decode { .. }));
    }
}

#[test]
fn oversized_npy_shape_fails_to_decode() {
    let (_dir, root) = scratch();
    let header = "{'descr': '<f8', 'fortran_order': False, 'shape': (4294967296, 4294967296, 4294967296), }\n";
    let mut npy = Vec::new();
    npy.extend_from_slice(b"\x93NUMPY");
    npy.extend_from_slice(&[1, 0]);
    npy.extend_from_slice(&(header.len() as u16).to_le_bytes());
    npy.extend_from_slice(header.as_bytes());
    npy.extend_from_slice(&[0; 8]);

    let path = root.join("huge.npz");
    let mut zip = zip::ZipWriter::new(fs::File::create(&path).unwrap());
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    zip.start_file("arr_0.npy", options).unwrap();
    zip.write_all(&npy).unwrap();
    zip.finish().unwrap();

    assert_matches!(
        codecs().decode(PayloadFormat::Npz, &path),
        Err(ExpdbError::Decode { .. })
    );
}
