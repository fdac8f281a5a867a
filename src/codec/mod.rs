//! Encode/decode of payloads to single files, one module per [`PayloadFormat`].

pub mod fif;
pub mod media;
pub mod npz;
pub mod parquet;

use std::sync::Arc;

use camino::Utf8Path;
use tracing::debug;

use crate::error::ExpdbError;
use crate::format::{Payload, PayloadFormat};

pub use media::{FfmpegTranscoder, Transcoder, VideoGeometry};

/// Codec dispatch. Holds the media transcoder used by the mp4/mp3 codecs; the
/// other codecs are stateless.
#[derive(Clone)]
pub struct Codecs {
    transcoder: Arc<dyn Transcoder>,
}

impl Codecs {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self { transcoder }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(FfmpegTranscoder::new()))
    }

    pub fn encode(
        &self,
        format: PayloadFormat,
        payload: &Payload,
        destination: &Utf8Path,
    ) -> Result<(), ExpdbError> {
        check_extension(format, destination)?;
        debug!(%format, path = %destination, "encoding payload");
        match (format, payload) {
            (PayloadFormat::Fif, Payload::RawSignal(signal)) => fif::write(signal, destination),
            (PayloadFormat::Npz, Payload::Array(array)) => npz::write(array, destination),
            (PayloadFormat::Parquet, Payload::Table(table)) => parquet::write(table, destination),
            (PayloadFormat::Mp4, Payload::Array(array)) => {
                media::write_video(self.transcoder.as_ref(), array, destination)
            }
            (PayloadFormat::Mp3, Payload::Array(array)) => {
                media::write_audio(self.transcoder.as_ref(), array, destination)
            }
            (format, payload) => Err(ExpdbError::UnsupportedPayload(format!(
                "{} payload as .{format}",
                payload.representation()
            ))),
        }
    }

    pub fn decode(&self, format: PayloadFormat, source: &Utf8Path) -> Result<Payload, ExpdbError> {
        check_extension(format, source)?;
        debug!(%format, path = %source, "decoding payload");
        match format {
            PayloadFormat::Fif => fif::read(source).map(Payload::RawSignal),
            PayloadFormat::Npz => npz::read(source).map(Payload::Array),
            PayloadFormat::Parquet => parquet::read(source).map(Payload::Table),
            PayloadFormat::Mp4 => media::read_video(self.transcoder.as_ref(), source).map(Payload::Array),
            PayloadFormat::Mp3 => media::read_audio(self.transcoder.as_ref(), source).map(Payload::Array),
        }
    }

    /// Decodes a file whose format is implied by its extension.
    pub fn decode_path(&self, source: &Utf8Path) -> Result<Payload, ExpdbError> {
        let format = PayloadFormat::from_path(source.as_str())?;
        self.decode(format, source)
    }
}

pub fn check_extension(format: PayloadFormat, path: &Utf8Path) -> Result<(), ExpdbError> {
    let actual = path.extension().unwrap_or_default();
    if actual != format.extension() {
        return Err(ExpdbError::ExtensionMismatch {
            expected: format.extension().to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn decode_error(path: &Utf8Path, message: impl Into<String>) -> ExpdbError {
    ExpdbError::Decode {
        path: path.to_string(),
        message: message.into(),
    }
}

pub(crate) fn encode_error(path: &Utf8Path, message: impl Into<String>) -> ExpdbError {
    ExpdbError::Encode {
        path: path.to_string(),
        message: message.into(),
    }
}
