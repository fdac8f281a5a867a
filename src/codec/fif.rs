//! Raw EEG signals as a tag-structured FIF subset.
//!
//! Each tag is a big-endian `(kind, type, size, next)` header followed by
//! `size` bytes. The file holds a file-id tag, a directory pointer, and a
//! measurement block containing the info block (channel count, sampling
//! frequency, channel names) and a raw-data block with one float buffer laid
//! out sample-major.

use std::fs;

use camino::Utf8Path;

use super::{decode_error, encode_error};
use crate::error::ExpdbError;
use crate::format::RawSignal;

const FIFF_FILE_ID: i32 = 100;
const FIFF_DIR_POINTER: i32 = 101;
const FIFF_BLOCK_START: i32 = 104;
const FIFF_BLOCK_END: i32 = 105;
const FIFF_NCHAN: i32 = 200;
const FIFF_SFREQ: i32 = 201;
const FIFF_DATA_BUFFER: i32 = 300;
const FIFF_CH_NAME_LIST: i32 = 3507;

const FIFFB_MEAS: i32 = 100;
const FIFFB_MEAS_INFO: i32 = 101;
const FIFFB_RAW_DATA: i32 = 102;

const FIFFT_INT: i32 = 3;
const FIFFT_FLOAT: i32 = 4;
const FIFFT_DOUBLE: i32 = 5;
const FIFFT_STRING: i32 = 10;
const FIFFT_ID_STRUCT: i32 = 31;

const FIFFV_NEXT_SEQ: i32 = 0;
const FIFF_FILE_VERSION: i32 = 0x0001_0003;
const TAG_HEADER_LEN: usize = 16;

pub fn write(signal: &RawSignal, destination: &Utf8Path) -> Result<(), ExpdbError> {
    if let Some(name) = signal.channels().iter().find(|name| name.contains(':')) {
        return Err(ExpdbError::Shape(format!(
            "channel name may not contain ':': {name}"
        )));
    }
    let nchan = i32::try_from(signal.channels().len())
        .map_err(|_| ExpdbError::Shape("too many channels".to_string()))?;

    let mut out = Vec::new();
    let mut file_id = Vec::with_capacity(20);
    file_id.extend_from_slice(&FIFF_FILE_VERSION.to_be_bytes());
    file_id.extend_from_slice(&[0u8; 16]);
    put_tag(&mut out, FIFF_FILE_ID, FIFFT_ID_STRUCT, &file_id);
    put_tag(&mut out, FIFF_DIR_POINTER, FIFFT_INT, &(-1i32).to_be_bytes());

    put_tag(&mut out, FIFF_BLOCK_START, FIFFT_INT, &FIFFB_MEAS.to_be_bytes());
    put_tag(&mut out, FIFF_BLOCK_START, FIFFT_INT, &FIFFB_MEAS_INFO.to_be_bytes());
    put_tag(&mut out, FIFF_NCHAN, FIFFT_INT, &nchan.to_be_bytes());
    put_tag(
        &mut out,
        FIFF_SFREQ,
        FIFFT_DOUBLE,
        &signal.sampling_rate().to_be_bytes(),
    );
    put_tag(
        &mut out,
        FIFF_CH_NAME_LIST,
        FIFFT_STRING,
        signal.channels().join(":").as_bytes(),
    );
    put_tag(&mut out, FIFF_BLOCK_END, FIFFT_INT, &FIFFB_MEAS_INFO.to_be_bytes());

    put_tag(&mut out, FIFF_BLOCK_START, FIFFT_INT, &FIFFB_RAW_DATA.to_be_bytes());
    let channels = signal.channels().len();
    let mut buffer = Vec::with_capacity(signal.data().len() * 4);
    for sample in 0..signal.samples() {
        for channel in 0..channels {
            let value = signal.data()[channel * signal.samples() + sample];
            buffer.extend_from_slice(&value.to_be_bytes());
        }
    }
    put_tag(&mut out, FIFF_DATA_BUFFER, FIFFT_FLOAT, &buffer);
    put_tag(&mut out, FIFF_BLOCK_END, FIFFT_INT, &FIFFB_RAW_DATA.to_be_bytes());
    put_tag(&mut out, FIFF_BLOCK_END, FIFFT_INT, &FIFFB_MEAS.to_be_bytes());

    fs::write(destination.as_std_path(), &out)
        .map_err(|err| encode_error(destination, err.to_string()))
}

pub fn read(source: &Utf8Path) -> Result<RawSignal, ExpdbError> {
    let bytes = fs::read(source.as_std_path())
        .map_err(|err| ExpdbError::Filesystem(format!("read {source}: {err}")))?;

    let mut offset = 0;
    let mut first = true;
    let mut blocks = Vec::new();
    let mut nchan = None;
    let mut sfreq = None;
    let mut names = None;
    let mut values = Vec::new();

    while offset < bytes.len() {
        let tag = next_tag(&bytes, &mut offset).map_err(|message| decode_error(source, message))?;
        if first {
            if tag.kind != FIFF_FILE_ID {
                return Err(decode_error(source, "missing FIFF file id"));
            }
            first = false;
            continue;
        }
        match tag.kind {
            FIFF_BLOCK_START => blocks.push(tag.int().map_err(|m| decode_error(source, m))?),
            FIFF_BLOCK_END => {
                let kind = tag.int().map_err(|m| decode_error(source, m))?;
                if blocks.pop() != Some(kind) {
                    return Err(decode_error(source, "unbalanced block end"));
                }
            }
            FIFF_NCHAN => nchan = Some(tag.int().map_err(|m| decode_error(source, m))?),
            FIFF_SFREQ => sfreq = Some(tag.real().map_err(|m| decode_error(source, m))?),
            FIFF_CH_NAME_LIST => {
                let text = std::str::from_utf8(tag.data)
                    .map_err(|_| decode_error(source, "channel names are not UTF-8"))?;
                names = Some(text.to_string());
            }
            FIFF_DATA_BUFFER => {
                if !blocks.contains(&FIFFB_RAW_DATA) {
                    return Err(decode_error(source, "data buffer outside raw data block"));
                }
                if tag.data_type != FIFFT_FLOAT || tag.data.len() % 4 != 0 {
                    return Err(decode_error(source, "data buffer must hold 32-bit floats"));
                }
                values.extend(
                    tag.data
                        .chunks_exact(4)
                        .map(|chunk| f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
                );
            }
            _ => {}
        }
    }

    if first {
        return Err(decode_error(source, "empty file"));
    }
    if !blocks.is_empty() {
        return Err(decode_error(source, "unterminated block"));
    }
    let nchan = nchan.ok_or_else(|| decode_error(source, "missing channel count"))?;
    let nchan = usize::try_from(nchan).map_err(|_| decode_error(source, "negative channel count"))?;
    let sfreq = sfreq.ok_or_else(|| decode_error(source, "missing sampling frequency"))?;
    if nchan > values.len() && !values.is_empty() {
        return Err(decode_error(
            source,
            format!("{nchan} channels but only {} values", values.len()),
        ));
    }
    if nchan > 0 && values.len() % nchan != 0 {
        return Err(decode_error(source, "data buffer is not a whole number of samples"));
    }
    if nchan > 0 && values.is_empty() && names.is_none() {
        return Err(decode_error(source, "no channel names and no data"));
    }
    let channels: Vec<String> = match names {
        Some(_) if nchan == 0 => Vec::new(),
        Some(text) => text.split(':').map(str::to_string).collect(),
        None => (1..=nchan).map(|index| format!("CH{index:03}")).collect(),
    };
    if channels.len() != nchan {
        return Err(decode_error(
            source,
            format!("{} channel names for {nchan} channels", channels.len()),
        ));
    }

    let samples = if nchan == 0 {
        if !values.is_empty() {
            return Err(decode_error(source, "data without channels"));
        }
        0
    } else {
        values.len() / nchan
    };
    let mut data = vec![0f32; values.len()];
    for (index, value) in values.into_iter().enumerate() {
        let (sample, channel) = (index / nchan.max(1), index % nchan.max(1));
        data[channel * samples + sample] = value;
    }

    RawSignal::from_flat(sfreq, channels, samples, data)
        .map_err(|err| decode_error(source, err.to_string()))
}

struct Tag<'a> {
    kind: i32,
    data_type: i32,
    data: &'a [u8],
}

impl Tag<'_> {
    fn int(&self) -> Result<i32, String> {
        match (self.data_type, self.data) {
            (FIFFT_INT, [a, b, c, d]) => Ok(i32::from_be_bytes([*a, *b, *c, *d])),
            _ => Err(format!("tag {} is not a single int", self.kind)),
        }
    }

    fn real(&self) -> Result<f64, String> {
        match (self.data_type, self.data.len()) {
            (FIFFT_DOUBLE, 8) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(self.data);
                Ok(f64::from_be_bytes(raw))
            }
            (FIFFT_FLOAT, 4) => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(self.data);
                Ok(f32::from_be_bytes(raw) as f64)
            }
            _ => Err(format!("tag {} is not a real number", self.kind)),
        }
    }
}

fn put_tag(out: &mut Vec<u8>, kind: i32, data_type: i32, data: &[u8]) {
    out.extend_from_slice(&kind.to_be_bytes());
    out.extend_from_slice(&data_type.to_be_bytes());
    out.extend_from_slice(&(data.len() as i32).to_be_bytes());
    out.extend_from_slice(&FIFFV_NEXT_SEQ.to_be_bytes());
    out.extend_from_slice(data);
}

fn next_tag<'a>(bytes: &'a [u8], offset: &mut usize) -> Result<Tag<'a>, String> {
    let header = bytes
        .get(*offset..*offset + TAG_HEADER_LEN)
        .ok_or_else(|| "truncated tag header".to_string())?;
    let field = |index: usize| {
        i32::from_be_bytes([
            header[index * 4],
            header[index * 4 + 1],
            header[index * 4 + 2],
            header[index * 4 + 3],
        ])
    };
    let (kind, data_type, size) = (field(0), field(1), field(2));
    let size = usize::try_from(size).map_err(|_| format!("negative size in tag {kind}"))?;
    let start = *offset + TAG_HEADER_LEN;
    let data = bytes
        .get(start..start + size)
        .ok_or_else(|| format!("truncated data in tag {kind}"))?;
    *offset = start + size;
    Ok(Tag {
        kind,
        data_type,
        data,
    })
}
