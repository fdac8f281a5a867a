//! Video (`mp4`) and audio (`mp3`) arrays. The container formats are handled
//! by an external transcoder; this module owns the array shape contracts.
//!
//! Video arrays are `(frames, height, width, 3)` `u8` RGB. Audio arrays are
//! `(samples, channels)` `f32` with one or two channels.

use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8Path;
use serde::Deserialize;

use super::decode_error;
use crate::error::ExpdbError;
use crate::format::{ArrayData, NdArray};
use crate::tool::{find_in_path, run_cmd};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoGeometry {
    pub frames: usize,
    pub height: usize,
    pub width: usize,
}

impl VideoGeometry {
    pub fn frame_len(&self) -> usize {
        self.height * self.width * 3
    }
}

/// Converts raw pixel and sample buffers to and from media containers.
pub trait Transcoder: Send + Sync {
    /// `rgb` holds `frames * height * width * 3` bytes, frame-major.
    fn encode_video(
        &self,
        geometry: VideoGeometry,
        rgb: &[u8],
        destination: &Utf8Path,
    ) -> Result<(), ExpdbError>;

    fn decode_video(&self, source: &Utf8Path) -> Result<(VideoGeometry, Vec<u8>), ExpdbError>;

    /// `samples` is interleaved across `channels`.
    fn encode_audio(
        &self,
        channels: usize,
        samples: &[f32],
        destination: &Utf8Path,
    ) -> Result<(), ExpdbError>;

    fn decode_audio(&self, source: &Utf8Path) -> Result<(usize, Vec<f32>), ExpdbError>;
}

pub fn write_video(
    transcoder: &dyn Transcoder,
    array: &NdArray,
    destination: &Utf8Path,
) -> Result<(), ExpdbError> {
    let [frames, height, width, depth] = array.shape() else {
        return Err(ExpdbError::Shape(format!(
            "video must be (frames, height, width, 3), got {:?}",
            array.shape()
        )));
    };
    if *depth != 3 {
        return Err(ExpdbError::Shape(format!(
            "video frames must have 3 color channels, got {depth}"
        )));
    }
    if *frames == 0 || *height == 0 || *width == 0 {
        return Err(ExpdbError::Shape("video has an empty dimension".to_string()));
    }
    let ArrayData::U8(rgb) = array.data() else {
        return Err(ExpdbError::Shape(format!(
            "video must be uint8, got {}",
            array.dtype()
        )));
    };
    let geometry = VideoGeometry {
        frames: *frames,
        height: *height,
        width: *width,
    };
    transcoder.encode_video(geometry, rgb, destination)
}

pub fn read_video(transcoder: &dyn Transcoder, source: &Utf8Path) -> Result<NdArray, ExpdbError> {
    let (geometry, rgb) = transcoder.decode_video(source)?;
    NdArray::new(
        vec![geometry.frames, geometry.height, geometry.width, 3],
        ArrayData::U8(rgb),
    )
    .map_err(|err| decode_error(source, err.to_string()))
}

pub fn write_audio(
    transcoder: &dyn Transcoder,
    array: &NdArray,
    destination: &Utf8Path,
) -> Result<(), ExpdbError> {
    let [_, channels] = array.shape() else {
        return Err(ExpdbError::Shape(format!(
            "audio must be (samples, channels), got {:?}",
            array.shape()
        )));
    };
    if !(1..=2).contains(channels) {
        return Err(ExpdbError::Shape(format!(
            "audio must have 1 or 2 channels, got {channels}"
        )));
    }
    let ArrayData::F32(samples) = array.data() else {
        return Err(ExpdbError::Shape(format!(
            "audio must be float32, got {}",
            array.dtype()
        )));
    };
    transcoder.encode_audio(*channels, samples, destination)
}

pub fn read_audio(transcoder: &dyn Transcoder, source: &Utf8Path) -> Result<NdArray, ExpdbError> {
    let (channels, samples) = transcoder.decode_audio(source)?;
    if channels == 0 || samples.len() % channels != 0 {
        return Err(decode_error(
            source,
            format!("{} samples across {channels} channels", samples.len()),
        ));
    }
    NdArray::new(vec![samples.len() / channels, channels], ArrayData::F32(samples))
        .map_err(|err| decode_error(source, err.to_string()))
}

/// Transcoder backed by the `ffmpeg` and `ffprobe` executables.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: Option<PathBuf>,
    ffprobe: Option<PathBuf>,
    frame_rate: u32,
    sample_rate: u32,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self {
            ffmpeg: find_in_path("ffmpeg"),
            ffprobe: find_in_path("ffprobe"),
            frame_rate: 30,
            sample_rate: 44_100,
        }
    }

    fn ffmpeg(&self) -> Result<&Path, ExpdbError> {
        self.ffmpeg
            .as_deref()
            .ok_or_else(|| ExpdbError::MissingTool("ffmpeg".to_string()))
    }

    fn ffprobe(&self) -> Result<&Path, ExpdbError> {
        self.ffprobe
            .as_deref()
            .ok_or_else(|| ExpdbError::MissingTool("ffprobe".to_string()))
    }

    fn probe(&self, source: &Utf8Path, selector: &str, entries: &str) -> Result<ProbeStream, ExpdbError> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-select_streams".to_string(),
            selector.to_string(),
            "-show_entries".to_string(),
            format!("stream={entries}"),
            "-of".to_string(),
            "json".to_string(),
            source.to_string(),
        ];
        let stdout = run_cmd(self.ffprobe()?, &args, None).map_err(ExpdbError::Transcode)?;
        let probe: Probe = serde_json::from_slice(&stdout)
            .map_err(|err| decode_error(source, format!("unreadable probe output: {err}")))?;
        probe
            .streams
            .into_iter()
            .next()
            .ok_or_else(|| decode_error(source, format!("no {selector} stream")))
    }
}

#[derive(Deserialize)]
struct Probe {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<usize>,
    height: Option<usize>,
    channels: Option<usize>,
}

fn scratch() -> Result<tempfile::TempDir, ExpdbError> {
    tempfile::tempdir().map_err(|err| ExpdbError::Filesystem(err.to_string()))
}

impl Transcoder for FfmpegTranscoder {
    fn encode_video(
        &self,
        geometry: VideoGeometry,
        rgb: &[u8],
        destination: &Utf8Path,
    ) -> Result<(), ExpdbError> {
        let scratch = scratch()?;
        let raw = scratch.path().join("frames.rgb");
        fs::write(&raw, rgb).map_err(|err| ExpdbError::Filesystem(err.to_string()))?;
        let args = vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-s".to_string(),
            format!("{}x{}", geometry.width, geometry.height),
            "-r".to_string(),
            self.frame_rate.to_string(),
            "-i".to_string(),
            raw.display().to_string(),
            "-c:v".to_string(),
            "libx264rgb".to_string(),
            "-qp".to_string(),
            "0".to_string(),
            destination.to_string(),
        ];
        run_cmd(self.ffmpeg()?, &args, None).map_err(ExpdbError::Transcode)?;
        Ok(())
    }

    fn decode_video(&self, source: &Utf8Path) -> Result<(VideoGeometry, Vec<u8>), ExpdbError> {
        let stream = self.probe(source, "v:0", "width,height")?;
        let (Some(width), Some(height)) = (stream.width, stream.height) else {
            return Err(decode_error(source, "video stream has no dimensions"));
        };
        let scratch = scratch()?;
        let raw = scratch.path().join("frames.rgb");
        let args = vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            source.to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            raw.display().to_string(),
        ];
        run_cmd(self.ffmpeg()?, &args, None).map_err(ExpdbError::Transcode)?;
        let rgb = fs::read(&raw).map_err(|err| ExpdbError::Filesystem(err.to_string()))?;
        let frame_len = width * height * 3;
        if frame_len == 0 || rgb.len() % frame_len != 0 {
            return Err(decode_error(source, "decoded frames are truncated"));
        }
        let geometry = VideoGeometry {
            frames: rgb.len() / frame_len,
            height,
            width,
        };
        Ok((geometry, rgb))
    }

    fn encode_audio(
        &self,
        channels: usize,
        samples: &[f32],
        destination: &Utf8Path,
    ) -> Result<(), ExpdbError> {
        let scratch = scratch()?;
        let raw = scratch.path().join("samples.f32");
        let bytes: Vec<u8> = samples
            .iter()
            .flat_map(|sample| sample.to_le_bytes())
            .collect();
        fs::write(&raw, bytes).map_err(|err| ExpdbError::Filesystem(err.to_string()))?;
        let args = vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "f32le".to_string(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-ac".to_string(),
            channels.to_string(),
            "-i".to_string(),
            raw.display().to_string(),
            "-c:a".to_string(),
            "libmp3lame".to_string(),
            destination.to_string(),
        ];
        run_cmd(self.ffmpeg()?, &args, None).map_err(ExpdbError::Transcode)?;
        Ok(())
    }

    fn decode_audio(&self, source: &Utf8Path) -> Result<(usize, Vec<f32>), ExpdbError> {
        let stream = self.probe(source, "a:0", "channels")?;
        let channels = stream
            .channels
            .ok_or_else(|| decode_error(source, "audio stream has no channel count"))?;
        let scratch = scratch()?;
        let raw = scratch.path().join("samples.f32");
        let args = vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            source.to_string(),
            "-f".to_string(),
            "f32le".to_string(),
            "-acodec".to_string(),
            "pcm_f32le".to_string(),
            raw.display().to_string(),
        ];
        run_cmd(self.ffmpeg()?, &args, None).map_err(ExpdbError::Transcode)?;
        let bytes = fs::read(&raw).map_err(|err| ExpdbError::Filesystem(err.to_string()))?;
        let samples = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok((channels, samples))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    struct Unreachable;

    impl Transcoder for Unreachable {
        fn encode_video(&self, _: VideoGeometry, _: &[u8], _: &Utf8Path) -> Result<(), ExpdbError> {
            panic!("shape check should fail first")
        }

        fn decode_video(&self, _: &Utf8Path) -> Result<(VideoGeometry, Vec<u8>), ExpdbError> {
            panic!("not used")
        }

        fn encode_audio(&self, _: usize, _: &[f32], _: &Utf8Path) -> Result<(), ExpdbError> {
            panic!("shape check should fail first")
        }

        fn decode_audio(&self, _: &Utf8Path) -> Result<(usize, Vec<f32>), ExpdbError> {
            panic!("not used")
        }
    }

    #[test]
    fn video_needs_three_color_channels() {
        let array = NdArray::new(vec![1, 2, 2, 4], ArrayData::U8(vec![0; 16])).unwrap();
        let err = write_video(&Unreachable, &array, Utf8Path::new("clip.mp4")).unwrap_err();
        assert_matches!(err, ExpdbError::Shape(_));
    }

    #[test]
    fn audio_rejects_three_channels() {
        let array = NdArray::new(vec![4, 3], ArrayData::F32(vec![0.0; 12])).unwrap();
        let err = write_audio(&Unreachable, &array, Utf8Path::new("tone.mp3")).unwrap_err();
        assert_matches!(err, ExpdbError::Shape(_));
    }
}
