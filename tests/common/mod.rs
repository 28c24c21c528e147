//! Builds small MDict files in memory for integration tests.
#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

use adler2::adler32_slice;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use mdict_bundler::mdict::codec::crypto;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V1,
    V2,
    V3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    Stored,
    Lzo,
    Zlib,
}

/// `(offset, length)` of every raw block in the built file.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub key_blocks: Vec<(usize, usize)>,
    pub record_blocks: Vec<(usize, usize)>,
    /// Start of the v1/v2 record section info.
    pub record_section: usize,
}

#[derive(Debug, Clone)]
pub struct MdictBuilder {
    version: Version,
    utf16: bool,
    mdd: bool,
    title: String,
    stylesheet: Option<String>,
    packing: Packing,
    obfuscate_index: bool,
    master_key: Option<[u8; 16]>,
    uuid: Option<String>,
    keys_per_block: usize,
    records_per_block: usize,
    entries: Vec<(String, Vec<u8>)>,
}

impl MdictBuilder {
    pub fn mdx(version: Version) -> Self {
        Self {
            version,
            utf16: false,
            mdd: false,
            title: "Test Dictionary".to_string(),
            stylesheet: None,
            packing: Packing::Zlib,
            obfuscate_index: false,
            master_key: None,
            uuid: None,
            keys_per_block: 2,
            records_per_block: 2,
            entries: Vec::new(),
        }
    }

    /// Resource files always use UTF-16LE keys.
    pub fn mdd(version: Version) -> Self {
        Self {
            utf16: true,
            mdd: true,
            ..Self::mdx(version)
        }
    }

    pub fn utf16(mut self) -> Self {
        self.utf16 = true;
        self
    }

    pub fn stored(mut self) -> Self {
        self.packing = Packing::Stored;
        self
    }

    /// Blocks become single LZO literal runs, so each must hold 4 to 238 bytes.
    pub fn lzo(mut self) -> Self {
        self.packing = Packing::Lzo;
        self
    }

    /// Encrypts record data for the owner of `reg_code` and `email`.
    ///
    /// The header is marked `Encrypted="1"`: the key section info and every
    /// block are Salsa20/8 encrypted with the master key the pair derives.
    pub fn passcode(mut self, reg_code: &[u8; 16], email: &str) -> Self {
        self.master_key = Some(crypto::derive_master_key(reg_code, email.as_bytes()).unwrap());
        self
    }

    /// v3 only: blocks are encrypted with the key derived from the header `UUID`.
    pub fn uuid(mut self, uuid: &str) -> Self {
        self.master_key = Some(crypto::derive_key_from_uuid(uuid.as_bytes()));
        self.uuid = Some(uuid.to_string());
        self
    }

    pub fn obfuscate_index(mut self) -> Self {
        self.obfuscate_index = true;
        self
    }

    pub fn stylesheet(mut self, raw: &str) -> Self {
        self.stylesheet = Some(raw.to_string());
        self
    }

    pub fn blocks(mut self, keys_per_block: usize, records_per_block: usize) -> Self {
        self.keys_per_block = keys_per_block.max(1);
        self.records_per_block = records_per_block.max(1);
        self
    }

    /// Adds an MDX entry; the record is stored as text with a terminator.
    pub fn entry(mut self, key: &str, html: &str) -> Self {
        let mut record = self.text(html);
        record.extend_from_slice(&self.terminator());
        self.entries.push((key.to_string(), record));
        self
    }

    /// Adds an MDD resource with raw bytes.
    pub fn resource(mut self, key: &str, bytes: &[u8]) -> Self {
        self.entries.push((key.to_string(), bytes.to_vec()));
        self
    }

    /// Adds an MDD alias record pointing at `target`.
    pub fn resource_alias(mut self, key: &str, target: &str) -> Self {
        let record = self.text(&format!("@@@LINK={}", target));
        self.entries.push((key.to_string(), record));
        self
    }

    fn width(&self) -> usize {
        match self.version {
            Version::V1 => 4,
            Version::V2 | Version::V3 => 8,
        }
    }

    fn number(&self, out: &mut Vec<u8>, n: u64) {
        match self.version {
            Version::V1 => out.extend_from_slice(&(n as u32).to_be_bytes()),
            Version::V2 | Version::V3 => out.extend_from_slice(&n.to_be_bytes()),
        }
    }

    fn text(&self, s: &str) -> Vec<u8> {
        if self.utf16 {
            s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
        } else {
            s.as_bytes().to_vec()
        }
    }

    fn terminator(&self) -> Vec<u8> {
        vec![0; if self.utf16 { 2 } else { 1 }]
    }

    /// Length prefix plus text of a first/last key in the key index.
    fn index_text(&self, out: &mut Vec<u8>, s: &str) {
        let bytes = self.text(s);
        let units = if self.utf16 { bytes.len() / 2 } else { bytes.len() };
        match self.version {
            Version::V1 => out.push(units as u8),
            Version::V2 | Version::V3 => out.extend_from_slice(&(units as u16).to_be_bytes()),
        }
        out.extend_from_slice(&bytes);
        if self.version != Version::V1 {
            out.extend_from_slice(&self.terminator());
        }
    }

    /// Prefix, checksum, and payload of one block.
    ///
    /// The checksum covers the plain data for v1/v2 and the compressed
    /// payload for v3.
    fn encode_block(&self, data: &[u8]) -> Vec<u8> {
        let (tag, mut payload) = match self.packing {
            Packing::Stored => (0u32, data.to_vec()),
            Packing::Lzo => (1u32, lzo_literals(data)),
            Packing::Zlib => (2u32, zlib(data)),
        };
        let checksum = if self.version == Version::V3 {
            adler32_slice(&payload)
        } else {
            adler32_slice(data)
        };

        let mut info = tag;
        if let Some(key) = &self.master_key {
            let encrypted_len = payload.len().min(0xFF);
            crypto::salsa_decrypt(&mut payload[..encrypted_len], key);
            info |= 2 << 4 | (encrypted_len as u32) << 8;
        }

        let mut raw = info.to_le_bytes().to_vec();
        raw.extend_from_slice(&checksum.to_be_bytes());
        raw.extend_from_slice(&payload);
        raw
    }

    fn header(&self) -> Vec<u8> {
        let version = match self.version {
            Version::V1 => "1.2",
            Version::V2 => "2.0",
            Version::V3 => "3.0",
        };
        let passcode = self.master_key.is_some() && self.uuid.is_none();
        let encrypted = u8::from(passcode) | if self.obfuscate_index { 2 } else { 0 };
        let encoding = if self.mdd {
            ""
        } else if self.utf16 {
            "UTF-16"
        } else {
            "UTF-8"
        };
        let mut style = self
            .stylesheet
            .as_deref()
            .map(|s| format!(" StyleSheet=\"{}\"", xml_attr(s)))
            .unwrap_or_default();
        if let Some(uuid) = &self.uuid {
            style.push_str(&format!(" UUID=\"{}\"", uuid));
        }
        let xml = format!(
            "<{} GeneratedByEngineVersion=\"{}\" RequiredEngineVersion=\"{}\" Encrypted=\"{}\" \
             Encoding=\"{}\" Format=\"Html\" Title=\"{}\"{}/>\r\n",
            if self.mdd { "Library_Data" } else { "Dictionary" },
            version,
            version,
            encrypted,
            encoding,
            xml_attr(&self.title),
            style
        );
        // v3 headers are UTF-8, older ones UTF-16LE with a terminator
        let text: Vec<u8> = if self.version == Version::V3 {
            xml.into_bytes()
        } else {
            let mut text: Vec<u8> = xml.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
            text.extend_from_slice(&[0, 0]);
            text
        };

        let mut out = (text.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(&text);
        out.extend_from_slice(&adler32_slice(&text).to_le_bytes());
        out
    }

    /// Record stream offset of every entry.
    fn record_ids(&self) -> Vec<u64> {
        let mut ids = Vec::with_capacity(self.entries.len());
        let mut offset = 0u64;
        for (_, record) in &self.entries {
            ids.push(offset);
            offset += record.len() as u64;
        }
        ids
    }

    /// Plain key block contents, one per chunk of `keys_per_block` entries.
    fn key_block_data(&self) -> Vec<(&[(String, Vec<u8>)], Vec<u8>)> {
        let ids = self.record_ids();
        self.entries
            .chunks(self.keys_per_block)
            .enumerate()
            .map(|(chunk_no, chunk)| {
                let mut data = Vec::new();
                for (i, (key, _)) in chunk.iter().enumerate() {
                    self.number(&mut data, ids[chunk_no * self.keys_per_block + i]);
                    data.extend_from_slice(&self.text(key));
                    data.extend_from_slice(&self.terminator());
                }
                (chunk, data)
            })
            .collect()
    }

    /// Serializes the file and reports where each block landed.
    pub fn build(&self) -> (Vec<u8>, Layout) {
        if self.version == Version::V3 {
            return self.build_v3();
        }
        let mut layout = Layout::default();

        let mut key_blocks = Vec::new();
        let mut key_index = Vec::new();
        for (chunk, data) in self.key_block_data() {
            let raw = self.encode_block(&data);

            self.number(&mut key_index, chunk.len() as u64);
            self.index_text(&mut key_index, &chunk[0].0);
            self.index_text(&mut key_index, &chunk[chunk.len() - 1].0);
            self.number(&mut key_index, raw.len() as u64);
            self.number(&mut key_index, data.len() as u64);
            key_blocks.push(raw);
        }

        let mut record_blocks = Vec::new();
        for chunk in self.entries.chunks(self.records_per_block) {
            let data: Vec<u8> = chunk.iter().flat_map(|(_, r)| r.iter().copied()).collect();
            record_blocks.push((self.encode_block(&data), data.len()));
        }

        let mut out = self.header();
        let key_blocks_len: usize = key_blocks.iter().map(Vec::len).sum();
        let num_key_blocks = key_blocks.len() as u64;
        let num_entries = self.entries.len() as u64;

        match self.version {
            Version::V1 => {
                let mut info = Vec::new();
                self.number(&mut info, num_key_blocks);
                self.number(&mut info, num_entries);
                self.number(&mut info, key_index.len() as u64);
                self.number(&mut info, key_blocks_len as u64);
                self.encrypt_section_info(&mut info);
                out.extend_from_slice(&info);
                out.extend_from_slice(&key_index);
            }
            Version::V2 | Version::V3 => {
                let mut raw_index = 2u32.to_le_bytes().to_vec();
                raw_index.extend_from_slice(&adler32_slice(&key_index).to_be_bytes());
                raw_index.extend_from_slice(&zlib(&key_index));
                if self.obfuscate_index {
                    let key = crypto::derive_key_for_v2_index(&raw_index).unwrap();
                    crypto::fast_encrypt(&mut raw_index[8..], &key);
                }

                let mut info = Vec::new();
                self.number(&mut info, num_key_blocks);
                self.number(&mut info, num_entries);
                self.number(&mut info, key_index.len() as u64);
                self.number(&mut info, raw_index.len() as u64);
                self.number(&mut info, key_blocks_len as u64);
                let checksum = adler32_slice(&info);
                self.encrypt_section_info(&mut info);
                out.extend_from_slice(&info);
                out.extend_from_slice(&checksum.to_be_bytes());
                out.extend_from_slice(&raw_index);
            }
        }

        for raw in &key_blocks {
            layout.key_blocks.push((out.len(), raw.len()));
            out.extend_from_slice(raw);
        }

        let record_blocks_len: usize = record_blocks.iter().map(|(raw, _)| raw.len()).sum();
        layout.record_section = out.len();
        self.number(&mut out, record_blocks.len() as u64);
        self.number(&mut out, num_entries);
        self.number(&mut out, (record_blocks.len() * 2 * self.width()) as u64);
        self.number(&mut out, record_blocks_len as u64);
        for (raw, decompressed_len) in &record_blocks {
            self.number(&mut out, raw.len() as u64);
            self.number(&mut out, *decompressed_len as u64);
        }
        for (raw, _) in &record_blocks {
            layout.record_blocks.push((out.len(), raw.len()));
            out.extend_from_slice(raw);
        }

        (out, layout)
    }

    fn encrypt_section_info(&self, info: &mut [u8]) {
        if let Some(key) = &self.master_key {
            crypto::salsa_decrypt(info, key);
        }
    }

    /// Writes the sections in the order record index, key data, record data, key index.
    fn build_v3(&self) -> (Vec<u8>, Layout) {
        let mut layout = Layout::default();

        let mut key_blocks = Vec::new();
        let mut key_index = Vec::new();
        for (chunk, data) in self.key_block_data() {
            let raw = self.encode_block(&data);
            key_index.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
            self.index_text(&mut key_index, &chunk[0].0);
            self.index_text(&mut key_index, &chunk[chunk.len() - 1].0);
            // Stored size counts the inline size header.
            key_index.extend_from_slice(&(raw.len() as u32 + 8).to_be_bytes());
            key_index.extend_from_slice(&(data.len() as u32).to_be_bytes());
            key_blocks.push((raw, data.len()));
        }

        let mut record_blocks = Vec::new();
        let mut record_index = Vec::new();
        for chunk in self.entries.chunks(self.records_per_block) {
            let data: Vec<u8> = chunk.iter().flat_map(|(_, r)| r.iter().copied()).collect();
            let raw = self.encode_block(&data);
            record_index.extend_from_slice(&(raw.len() as u64 + 8).to_be_bytes());
            record_index.extend_from_slice(&(data.len() as u64).to_be_bytes());
            record_blocks.push((raw, data.len()));
        }

        let mut out = self.header();
        v3_section(&mut out, 0x0200_0000, &self.v3_index_body(&record_index));
        layout.key_blocks = v3_section(&mut out, 0x0300_0000, &v3_data_body(&key_blocks));
        layout.record_blocks = v3_section(&mut out, 0x0100_0000, &v3_data_body(&record_blocks));
        v3_section(&mut out, 0x0400_0000, &self.v3_index_body(&key_index));
        (out, layout)
    }

    /// One compressed sub-block: `[count][total]` then `[decompressed][stored][block]`.
    fn v3_index_body(&self, index: &[u8]) -> Vec<u8> {
        let raw = self.encode_block(index);
        let mut body = 1u32.to_be_bytes().to_vec();
        body.extend_from_slice(&(raw.len() as u64 + 8).to_be_bytes());
        body.extend_from_slice(&(index.len() as u32).to_be_bytes());
        body.extend_from_slice(&(raw.len() as u32).to_be_bytes());
        body.extend_from_slice(&raw);
        body
    }

    pub fn write_to(&self, path: &Path) -> Layout {
        let (bytes, layout) = self.build();
        std::fs::write(path, bytes).unwrap();
        layout
    }
}

/// Appends a v3 section and returns the offsets of the blocks in a data section body.
fn v3_section(out: &mut Vec<u8>, tag: u32, body: &[u8]) -> Vec<(usize, usize)> {
    out.extend_from_slice(&tag.to_be_bytes());
    out.extend_from_slice(&(body.len() as u64).to_be_bytes());
    let start = out.len();
    out.extend_from_slice(body);
    let mut offsets = Vec::new();
    if tag == 0x0100_0000 || tag == 0x0300_0000 {
        let mut pos = start + 12;
        while pos < out.len() {
            let len = u32::from_be_bytes(out[pos + 4..pos + 8].try_into().unwrap()) as usize;
            offsets.push((pos + 8, len));
            pos += 8 + len;
        }
    }
    offsets
}

fn v3_data_body(blocks: &[(Vec<u8>, usize)]) -> Vec<u8> {
    let mut body = (blocks.len() as u32).to_be_bytes().to_vec();
    let total: usize = blocks.iter().map(|(raw, _)| raw.len() + 8).sum();
    body.extend_from_slice(&(total as u64).to_be_bytes());
    for (raw, decompressed_len) in blocks {
        body.extend_from_slice(&(*decompressed_len as u32).to_be_bytes());
        body.extend_from_slice(&(raw.len() as u32).to_be_bytes());
        body.extend_from_slice(raw);
    }
    body
}

/// LZO1X stream holding `data` as one literal run.
fn lzo_literals(data: &[u8]) -> Vec<u8> {
    assert!((4..=238).contains(&data.len()), "LZO fixture blocks hold 4 to 238 bytes");
    let mut out = vec![17 + data.len() as u8];
    out.extend_from_slice(data);
    out.extend_from_slice(&[0x11, 0x00, 0x00]);
    out
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn xml_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\n', "&#10;")
}

/// Flips a byte of the stored checksum of block `(offset, len)`.
pub fn corrupt_checksum(bytes: &mut [u8], block: (usize, usize)) {
    bytes[block.0 + 4] ^= 0xFF;
}

/// Names of `.mdict-bundle-*` staging directories left in `dir`.
pub fn staging_leftovers(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".mdict-bundle-"))
        .collect()
}

/// `bank`, `apple`, `zoo` in one stored record block, in that on-disk order.
pub fn bank_apple_zoo() -> MdictBuilder {
    MdictBuilder::mdx(Version::V2)
        .stored()
        .blocks(3, 3)
        .entry("bank", "<b>bank</b> a financial institution")
        .entry("apple", "a fruit")
        .entry("zoo", "a place with animals")
}
