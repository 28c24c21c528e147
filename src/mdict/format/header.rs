//! The leading attribute block of an MDict file.
//!
//! ```text
//! u32 BE     length of the attribute text
//! [length]   text: UTF-16LE ending in 00 00 (v1/v2), UTF-8 (v3)
//! u32 LE     Adler-32 of the text
//! ```
//!
//! The text is a single XML element whose attributes carry the version,
//! encoding, encryption flags and display metadata.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};

use adler2::adler32_slice;
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use encoding_rs::UTF_16LE;
use log::{debug, info, trace, warn};
use quick_xml::{events::Event, Reader};

use crate::mdict::codec::crypto;
use crate::mdict::types::{
    error::{MdictError, Result},
    models::{
        EncryptionFlags, MasterKey, MdictEncoding, MdictHeader, MdictMetadata, MdictVersion,
        StyleSheet,
    },
};
use crate::mdict::utils;

/// Reads and validates the header, leaving `file` at the first byte of the key section.
///
/// `passcode` is `(regcode_hex, user_email)`; without it, only v3 files get a
/// master key (from their UUID).
pub fn parse<R: Read + Seek>(file: &mut R, passcode: Option<(&str, &str)>) -> Result<MdictHeader> {
    info!("Reading header");

    let start = file.stream_position()?;
    let stream_len = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(start))?;

    let text_len = file
        .read_u32::<BigEndian>()
        .map_err(|_| MdictError::MalformedHeader("File too short for header length".to_string()))?;
    trace!("Header text: {} bytes", text_len);

    let available = stream_len.saturating_sub(start + 4);
    if u64::from(text_len) + 4 > available {
        return Err(MdictError::MalformedHeader(format!(
            "Declared header length {} exceeds remaining {} bytes",
            text_len, available
        )));
    }

    let mut raw_text = vec![0u8; text_len as usize];
    file.read_exact(&mut raw_text)?;

    let stored = file.read_u32::<LittleEndian>()?;
    let computed = adler32_slice(&raw_text);
    trace!("Header Adler-32: stored={:#010x}, computed={:#010x}", stored, computed);
    if computed != stored {
        return Err(MdictError::MalformedHeader(format!(
            "Header checksum mismatch: expected {:#010x}, got {:#010x}",
            stored, computed
        )));
    }

    let utf16 = raw_text.ends_with(&[0, 0]);
    let text = if utf16 {
        debug!("Header text is UTF-16LE");
        let (decoded, _, _) = UTF_16LE.decode(&raw_text[..raw_text.len() - 2]);
        decoded.into_owned()
    } else {
        debug!("Header text is UTF-8");
        String::from_utf8_lossy(&raw_text).into_owned()
    };

    // Some writers leave stray control characters in attribute values.
    let text: String = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();

    let attrs = parse_xml_attributes(&text)?;
    let (version, encoding, encryption_flags, metadata) = build_header_from_attributes(attrs)?;

    if (version == MdictVersion::V3) == utf16 {
        warn!(
            "Header text encoding does not match engine version {}; the file may not be parsed correctly",
            metadata.engine_version
        );
    }

    let master_key = try_derive_master_key(passcode, metadata.uuid.as_deref(), version)?;

    info!(
        "Header: engine {}, title {:?}, encoding {}, encrypted records={} index={}",
        metadata.engine_version,
        metadata.title,
        encoding.name(),
        encryption_flags.encrypt_record_blocks,
        encryption_flags.encrypt_key_index
    );

    Ok(MdictHeader {
        version,
        encoding,
        encryption_flags,
        master_key,
        metadata,
    })
}

/// Collects the attributes of the first element.
fn parse_xml_attributes(xml: &str) -> Result<BTreeMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return e
                    .attributes()
                    .map(|attr_result| {
                        let attr = attr_result.map_err(|e| {
                            MdictError::MalformedHeader(format!("Failed to parse XML attribute: {}", e))
                        })?;
                        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                        let value = attr
                            .unescape_value()
                            .map_err(|e| {
                                MdictError::MalformedHeader(format!("Failed to decode XML value: {}", e))
                            })?
                            .into_owned();
                        Ok((key, value))
                    })
                    .collect();
            }
            Ok(Event::Eof) => {
                return Err(MdictError::MalformedHeader("No root element found in header XML".to_string()))
            }
            Err(e) => {
                return Err(MdictError::MalformedHeader(format!("Failed to read header XML: {}", e)))
            }
            _ => {}
        }
        buf.clear();
    }
}

/// Missing attributes fall back to engine 1.0, UTF-8, no encryption.
fn build_header_from_attributes(
    attrs: BTreeMap<String, String>,
) -> Result<(MdictVersion, MdictEncoding, EncryptionFlags, MdictMetadata)> {
    let version_str = attrs
        .get("GeneratedByEngineVersion")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "1.0".to_string());
    let version_f32: f32 = version_str.parse().map_err(|e| {
        MdictError::MalformedHeader(format!(
            "Could not parse 'GeneratedByEngineVersion' {:?}: {}",
            version_str, e
        ))
    })?;
    let version = MdictVersion::try_from(version_f32)?;
    debug!("MDict version: {} (parsed as {:?})", version_str, version);

    let encoding = match attrs.get("Encoding") {
        Some(label) => utils::parse_encoding(label)?,
        None => encoding_rs::UTF_8,
    };
    debug!("Text encoding: {}", encoding.name());

    let encryption_flags = attrs
        .get("Encrypted")
        .map(|raw| parse_encryption_flags(raw))
        .unwrap_or_default();

    let title = attrs
        .get("Title")
        .cloned()
        .unwrap_or_else(|| "Untitled Dictionary".to_string());
    let description = attrs.get("Description").cloned();
    let stylesheet = attrs
        .get("StyleSheet")
        .map(|raw| parse_stylesheet(raw))
        .unwrap_or_default();
    let uuid = attrs.get("UUID").map(|s| s.as_bytes().to_vec());

    let metadata = MdictMetadata {
        title,
        engine_version: version_str,
        description,
        stylesheet,
        uuid,
        attributes: attrs,
    };

    Ok((version, encoding, encryption_flags, metadata))
}

/// Interprets the `Encrypted` attribute: `Yes`, `No`, or an integer bitmask.
fn parse_encryption_flags(raw: &str) -> EncryptionFlags {
    let value = raw.trim();
    let bits = if value.eq_ignore_ascii_case("no") || value.is_empty() {
        0
    } else if value.eq_ignore_ascii_case("yes") {
        1
    } else {
        value.parse::<u8>().unwrap_or_else(|_| {
            warn!("Unrecognized 'Encrypted' attribute {:?}, assuming unencrypted", raw);
            0
        })
    };
    debug!("Encryption flags: {:#04x}", bits);
    EncryptionFlags {
        encrypt_record_blocks: bits & 0x01 != 0,
        encrypt_key_index: bits & 0x02 != 0,
    }
}

/// Parses the `StyleSheet` attribute: lines grouped in threes (number, opening tags, closing tags).
fn parse_stylesheet(raw: &str) -> StyleSheet {
    let lines: Vec<&str> = raw.lines().collect();
    let mut styles = StyleSheet::new();
    for group in lines.chunks(3) {
        let [id, open, close] = group else {
            if !group.iter().all(|line| line.trim().is_empty()) {
                warn!("Ignoring incomplete stylesheet entry: {:?}", group);
            }
            continue;
        };
        match id.trim().parse::<u8>() {
            Ok(style_id) => {
                styles.insert(style_id, (open.to_string(), close.to_string()));
            }
            Err(_) => warn!("Ignoring stylesheet entry with invalid number {:?}", id),
        }
    }
    debug!("Parsed {} stylesheet entries", styles.len());
    styles
}

/// A passcode wins over the v3 UUID.
fn try_derive_master_key(
    passcode: Option<(&str, &str)>,
    uuid: Option<&[u8]>,
    version: MdictVersion,
) -> Result<MasterKey> {
    if let Some((reg_code_hex, user_email)) = passcode {
        info!("Deriving master key from passcode");
        let reg_code = hex::decode(reg_code_hex.trim())
            .map_err(|e| MdictError::DecryptionError(format!("Invalid regcode hex: {}", e)))?;
        let master_key = crypto::derive_master_key(&reg_code, user_email.trim().as_bytes())?;
        return Ok(Some(master_key));
    }

    match (version, uuid) {
        (MdictVersion::V3, Some(uuid_bytes)) => {
            info!("Deriving master key from UUID (v3.0)");
            Ok(Some(crypto::derive_key_from_uuid(uuid_bytes)))
        }
        _ => Ok(None),
    }
}
