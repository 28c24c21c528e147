//! Low-level byte reading utilities

use std::io::{ErrorKind, Read, Seek, SeekFrom};
use byteorder::{BigEndian, ReadBytesExt};
use encoding_rs::{Encoding, UTF_16LE};

use crate::mdict::types::error::{MdictError, Result};

fn truncated(err: std::io::Error, what: &str) -> MdictError {
    if err.kind() == ErrorKind::UnexpectedEof {
        MdictError::InvalidFormat(format!("Truncated {}", what))
    } else {
        MdictError::Io(err)
    }
}

/// Read a 4 or 8 byte big-endian number.
///
/// Used throughout MDict format for size and count fields.
/// Width depends on format version (v1.x uses 4 bytes, v2.x/v3.x use 8 bytes).
pub fn read_number(reader: &mut impl Read, number_width: usize) -> Result<u64> {
    match number_width {
        8 => reader.read_u64::<BigEndian>().map_err(|e| truncated(e, "number field")),
        4 => reader
            .read_u32::<BigEndian>()
            .map(u64::from)
            .map_err(|e| truncated(e, "number field")),
        _ => Err(MdictError::InvalidFormat(format!("Invalid number width: {}", number_width))),
    }
}

/// Read a 1 or 2 byte big-endian number.
///
/// Used for text length prefixes in MDict format.
pub fn read_small_number(reader: &mut impl Read, number_width: usize) -> Result<u64> {
    match number_width {
        2 => reader
            .read_u16::<BigEndian>()
            .map(u64::from)
            .map_err(|e| truncated(e, "length prefix")),
        1 => reader
            .read_u8()
            .map(u64::from)
            .map_err(|e| truncated(e, "length prefix")),
        _ => Err(MdictError::InvalidFormat(format!("Invalid small number width: {}", number_width))),
    }
}

/// Total length of the stream. The position is left unchanged.
pub fn stream_len<R: Seek>(file: &mut R) -> Result<u64> {
    let position = file.stream_position()?;
    let len = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(position))?;
    Ok(len)
}

/// Reads a section whose length comes from an unchecked size field.
///
/// The length is checked against the rest of the stream before anything is allocated.
pub fn read_declared<R: Read + Seek>(file: &mut R, len: u64, what: &str) -> Result<Vec<u8>> {
    let remaining = stream_len(file)?.saturating_sub(file.stream_position()?);
    if len > remaining {
        return Err(MdictError::InvalidFormat(format!(
            "Declared {} length {} exceeds the remaining {} bytes",
            what, len, remaining
        )));
    }
    let mut data = vec![0u8; len as usize];
    file.read_exact(&mut data).map_err(|e| truncated(e, what))?;
    Ok(data)
}

/// Maps a header `Encoding` label onto the supported encodings.
///
/// An empty label means UTF-8. GBK and GB2312 are read as GB18030, which is a superset.
pub fn parse_encoding(label: &str) -> Result<&'static Encoding> {
    let encoding = match label.trim().to_ascii_uppercase().as_str() {
        "" | "UTF-8" | "UTF8" => encoding_rs::UTF_8,
        "UTF-16" | "UTF-16LE" | "UTF16" => encoding_rs::UTF_16LE,
        "GBK" | "GB2312" | "GB18030" | "CP936" => encoding_rs::GB18030,
        "BIG5" | "BIG5-HKSCS" => encoding_rs::BIG5,
        "SHIFT_JIS" | "SHIFT-JIS" | "SJIS" => encoding_rs::SHIFT_JIS,
        "EUC-JP" => encoding_rs::EUC_JP,
        "EUC-KR" | "CP949" => encoding_rs::EUC_KR,
        "ISO-8859-1" | "LATIN1" | "WINDOWS-1252" => encoding_rs::WINDOWS_1252,
        _ => return Err(MdictError::UnknownEncoding(label.to_string())),
    };
    Ok(encoding)
}

/// Width in bytes of one text unit (and of the terminator) for `encoding`.
pub fn unit_width(encoding: &'static Encoding) -> usize {
    if encoding == UTF_16LE { 2 } else { 1 }
}
