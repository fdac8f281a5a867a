//! Numeric arrays as `.npz`: a zip archive holding one NPY v1.0 member named
//! `arr_0.npy`, the layout `numpy.savez(path, array)` produces.

use std::fs;
use std::io::{Read, Write};
use std::sync::OnceLock;

use camino::Utf8Path;
use regex::Regex;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{decode_error, encode_error};
use crate::error::ExpdbError;
use crate::format::{ArrayData, DType, NdArray, element_count};

const MEMBER: &str = "arr_0.npy";
const MAGIC: &[u8] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;

pub fn write(array: &NdArray, destination: &Utf8Path) -> Result<(), ExpdbError> {
    let npy = to_npy(array);
    let file = fs::File::create(destination.as_std_path())
        .map_err(|err| encode_error(destination, err.to_string()))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    zip.start_file(MEMBER, options)
        .map_err(|err| encode_error(destination, err.to_string()))?;
    zip.write_all(&npy)
        .map_err(|err| encode_error(destination, err.to_string()))?;
    zip.finish()
        .map_err(|err| encode_error(destination, err.to_string()))?;
    Ok(())
}

pub fn read(source: &Utf8Path) -> Result<NdArray, ExpdbError> {
    let file = fs::File::open(source.as_std_path())
        .map_err(|err| ExpdbError::Filesystem(format!("open {source}: {err}")))?;
    let mut archive = ZipArchive::new(file).map_err(|err| decode_error(source, err.to_string()))?;
    let index = match archive.index_for_name(MEMBER) {
        Some(index) => index,
        None if archive.len() == 1 => 0,
        None => return Err(decode_error(source, format!("archive has no {MEMBER}"))),
    };
    let mut entry = archive
        .by_index(index)
        .map_err(|err| decode_error(source, err.to_string()))?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|err| decode_error(source, err.to_string()))?;
    from_npy(&bytes).map_err(|message| decode_error(source, message))
}

fn descr(dtype: DType) -> &'static str {
    match dtype {
        DType::U8 => "|u1",
        DType::F32 => "<f4",
        DType::F64 => "<f8",
    }
}

fn to_npy(array: &NdArray) -> Vec<u8> {
    let shape = match array.shape() {
        [single] => format!("({single},)"),
        dims => format!(
            "({})",
            dims.iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {shape}, }}",
        descr(array.dtype())
    );
    // magic(6) + version(2) + header length(2) + header, newline-terminated
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + array.data().len() * 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    match array.data() {
        ArrayData::U8(values) => out.extend_from_slice(values),
        ArrayData::F32(values) => values
            .iter()
            .for_each(|value| out.extend_from_slice(&value.to_le_bytes())),
        ArrayData::F64(values) => values
            .iter()
            .for_each(|value| out.extend_from_slice(&value.to_le_bytes())),
    }
    out
}

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"'descr':\s*'(?P<descr>[^']+)'|'fortran_order':\s*(?P<fortran>True|False)|'shape':\s*\((?P<shape>[^)]*)\)",
        )
        .expect("valid npy header regex")
    })
}

fn from_npy(bytes: &[u8]) -> Result<NdArray, String> {
    if !bytes.starts_with(MAGIC) || bytes.len() < MAGIC.len() + 4 {
        return Err("not an NPY member".to_string());
    }
    let major = bytes[MAGIC.len()];
    let (header_len, header_start) = match major {
        1 => (
            u16::from_le_bytes([bytes[8], bytes[9]]) as usize,
            MAGIC.len() + 4,
        ),
        2 | 3 => {
            let raw = bytes
                .get(8..12)
                .ok_or_else(|| "truncated NPY header".to_string())?;
            (
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize,
                MAGIC.len() + 6,
            )
        }
        other => return Err(format!("unsupported NPY version {other}")),
    };
    let header = bytes
        .get(header_start..header_start + header_len)
        .ok_or_else(|| "truncated NPY header".to_string())?;
    let header = std::str::from_utf8(header).map_err(|_| "NPY header is not text".to_string())?;

    let mut dtype = None;
    let mut fortran = None;
    let mut shape = None;
    for caps in header_pattern().captures_iter(header) {
        if let Some(value) = caps.name("descr") {
            dtype = Some(match value.as_str() {
                "|u1" | "<u1" => DType::U8,
                "<f4" => DType::F32,
                "<f8" => DType::F64,
                other => return Err(format!("unsupported dtype {other}")),
            });
        } else if let Some(value) = caps.name("fortran") {
            fortran = Some(value.as_str() == "True");
        } else if let Some(value) = caps.name("shape") {
            let dims = value
                .as_str()
                .split(',')
                .map(str::trim)
                .filter(|dim| !dim.is_empty())
                .map(|dim| dim.parse::<usize>().map_err(|_| format!("bad dimension {dim}")))
                .collect::<Result<Vec<_>, _>>()?;
            shape = Some(dims);
        }
    }
    let dtype = dtype.ok_or_else(|| "NPY header missing descr".to_string())?;
    if fortran.ok_or_else(|| "NPY header missing fortran_order".to_string())? {
        return Err("fortran-ordered arrays are not supported".to_string());
    }
    let shape = shape.ok_or_else(|| "NPY header missing shape".to_string())?;

    let body = &bytes[header_start + header_len..];
    let expected = element_count(&shape)
        .and_then(|count| count.checked_mul(dtype.size()))
        .ok_or_else(|| format!("shape {shape:?} is too large"))?;
    if body.len() != expected {
        return Err(format!("expected {expected} data bytes, found {}", body.len()));
    }
    let data = match dtype {
        DType::U8 => ArrayData::U8(body.to_vec()),
        DType::F32 => ArrayData::F32(
            body.chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect(),
        ),
        DType::F64 => ArrayData::F64(
            body.chunks_exact(8)
                .map(|chunk| {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(chunk);
                    f64::from_le_bytes(raw)
                })
                .collect(),
        ),
    };
    NdArray::new(shape, data).map_err(|err| err.to_string())
}
