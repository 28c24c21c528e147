mod common;

use std::fs;
use std::path::{Path, PathBuf};

use common::{corrupt_checksum, staging_leftovers, MdictBuilder, Version};
use mdict_bundler::transform::MarkupAnomaly;
use mdict_bundler::{convert, BundleIndex, ConvertConfig, ErrorClass, MddSource, Stage};

fn resources(bundle: &Path) -> PathBuf {
    bundle.join("Contents").join("Resources")
}

fn read_index(bundle: &Path) -> (BundleIndex, Vec<u8>) {
    let index = BundleIndex::parse(fs::read(resources(bundle).join("KeyText.index")).unwrap()).unwrap();
    let body = fs::read(resources(bundle).join("Body.data")).unwrap();
    (index, body)
}

fn slice<'a>(body: &'a [u8], range: (u64, u32)) -> &'a str {
    let start = range.0 as usize;
    std::str::from_utf8(&body[start..start + range.1 as usize]).unwrap()
}

#[test]
fn sorted_index_partitions_the_body() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dict.mdx");
    common::bank_apple_zoo().write_to(&input);

    let report = convert(&ConvertConfig::new(&input).with_workers(2)).unwrap();
    assert_eq!(report.output, dir.path().join("dict.dictionary"));
    assert_eq!(report.entries, 3);
    assert!(report.anomalies.is_empty());

    let bundle = &report.output;
    assert!(bundle.join("Contents/Info.plist").is_file());
    assert!(resources(bundle).join("DefaultStyle.css").is_file());

    let (index, body) = read_index(bundle);
    let words: Vec<String> = index.iter().map(|(word, _, _)| word).collect();
    assert_eq!(words, ["apple", "bank", "zoo"]);

    let mut expected_offset = 0u64;
    for (word, offset, length) in index.iter() {
        assert_eq!(offset, expected_offset, "gap before {}", word);
        expected_offset += u64::from(length);
        let fragment = slice(&body, (offset, length));
        assert!(fragment.starts_with("<d:entry id=\"entry_"));
        assert!(fragment.contains(&format!("d:title=\"{}\"", word)));
    }
    assert_eq!(expected_offset, body.len() as u64);
    assert_eq!(index.body_len(), body.len() as u64);

    let bank = slice(&body, index.lookup("bank").unwrap());
    assert!(bank.contains("<b>bank</b> a financial institution"));
    assert!(bank.contains("entry_0_bank"));
    assert!(slice(&body, index.lookup("apple").unwrap()).contains("a fruit"));
    assert!(leftovers_clean(dir.path()));
}

fn leftovers_clean(dir: &Path) -> bool {
    staging_leftovers(dir).is_empty()
}

#[test]
fn conversion_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dict.mdx");
    let mut builder = MdictBuilder::mdx(Version::V2).blocks(3, 2);
    for i in (0..40).rev() {
        builder = builder.entry(&format!("w{:03}", i % 25), &format!("<p>sense {}</p>", i));
    }
    builder.write_to(&input);

    let one = convert(&ConvertConfig::new(&input).with_output(dir.path().join("a.dictionary")).with_workers(1)).unwrap();
    let many = convert(&ConvertConfig::new(&input).with_output(dir.path().join("b.dictionary")).with_workers(4)).unwrap();

    for file in ["Body.data", "KeyText.index"] {
        assert_eq!(
            fs::read(resources(&one.output).join(file)).unwrap(),
            fs::read(resources(&many.output).join(file)).unwrap(),
            "{} differs",
            file
        );
    }
    // Duplicate headwords share one slot.
    assert_eq!(one.entries, 40);
    assert_eq!(one.index_slots, 25);
}

#[test]
fn corrupt_key_block_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dict.mdx");
    let (mut bytes, layout) = common::bank_apple_zoo().blocks(1, 3).build();
    corrupt_checksum(&mut bytes, layout.key_blocks[2]);
    fs::write(&input, bytes).unwrap();

    let err = convert(&ConvertConfig::new(&input)).unwrap_err();
    assert_eq!(err.stage(), Stage::KeyIndex);
    assert_eq!(err.class(), ErrorClass::KeyBlockCorrupt);
    assert_eq!(err.exit_code(), 3);
    assert!(!dir.path().join("dict.dictionary").exists());
    assert!(leftovers_clean(dir.path()));
}

#[test]
fn corrupt_record_block_stops_the_workers() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dict.mdx");
    let (mut bytes, layout) = common::bank_apple_zoo().blocks(3, 1).build();
    corrupt_checksum(&mut bytes, layout.record_blocks[1]);
    fs::write(&input, bytes).unwrap();

    let err = convert(&ConvertConfig::new(&input).with_workers(3)).unwrap_err();
    assert_eq!(err.stage(), Stage::Records);
    assert_eq!(err.exit_code(), 4);
    assert!(err.to_string().contains("Record block 1"), "{}", err);
    assert!(!dir.path().join("dict.dictionary").exists());
    assert!(leftovers_clean(dir.path()));
}

#[test]
fn unknown_tags_survive_with_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dict.mdx");
    MdictBuilder::mdx(Version::V2)
        .entry("bank", "<foo class=\"x\">river side</foo> see <a href=\"entry://zoo\">zoo</a>")
        .entry("zoo", "animals")
        .write_to(&input);

    let report = convert(&ConvertConfig::new(&input)).unwrap();
    assert_eq!(
        report.anomalies,
        vec![("bank".to_string(), MarkupAnomaly::UnknownTag { tag: "foo".to_string() })]
    );

    let (index, body) = read_index(&report.output);
    let bank = slice(&body, index.lookup("bank").unwrap());
    assert!(bank.contains("<foo class=\"x\">river side</foo>"));
    assert!(bank.contains("href=\"x-dictionary:r:entry_1_zoo\""));
}

#[test]
fn mdd_resources_are_copied_into_media() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dict.mdx");
    MdictBuilder::mdx(Version::V2)
        .entry("apple", "<img src=\"img/apple.png\"><a href=\"sound://snd/apple.mp3\">play</a>")
        .write_to(&input);
    MdictBuilder::mdd(Version::V2)
        .resource("\\img\\apple.png", b"PNG")
        .resource("\\snd\\apple.mp3", b"MP3")
        .write_to(&dir.path().join("dict.mdd"));
    fs::write(dir.path().join("dict.css"), "h1 { color: red; }").unwrap();

    let report = convert(&ConvertConfig::new(&input)).unwrap();
    assert_eq!(report.resources, 2);
    let media = resources(&report.output).join("media");
    assert_eq!(fs::read(media.join("img/apple.png")).unwrap(), b"PNG");
    assert_eq!(fs::read(media.join("snd/apple.mp3")).unwrap(), b"MP3");
    assert_eq!(
        fs::read_to_string(resources(&report.output).join("DefaultStyle.css")).unwrap(),
        "h1 { color: red; }"
    );

    let (index, body) = read_index(&report.output);
    let apple = slice(&body, index.lookup("apple").unwrap());
    assert!(apple.contains("<img src=\"media/img/apple.png\" />"));
    assert!(apple.contains("href=\"media/snd/apple.mp3\""));

    let without = convert(
        &ConvertConfig::new(&input)
            .with_output(dir.path().join("plain.dictionary"))
            .with_mdd(MddSource::Disabled),
    )
    .unwrap();
    assert_eq!(without.resources, 0);
    assert!(!resources(&without.output).join("media").exists());
}

#[test]
fn existing_output_needs_force() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dict.mdx");
    common::bank_apple_zoo().write_to(&input);
    fs::create_dir(dir.path().join("dict.dictionary")).unwrap();

    let err = convert(&ConvertConfig::new(&input)).unwrap_err();
    assert_eq!(err.class(), ErrorClass::PackagingIo);
    assert_eq!(err.exit_code(), 6);

    let report = convert(&ConvertConfig::new(&input).with_overwrite(true)).unwrap();
    assert!(resources(&report.output).join("Body.data").is_file());
    assert!(leftovers_clean(dir.path()));
}

#[test]
fn ddk_project_mirrors_the_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dict.mdx");
    common::bank_apple_zoo().write_to(&input);
    let project = dir.path().join("ddk");

    let report = convert(&ConvertConfig::new(&input).with_ddk_project(&project)).unwrap();
    assert_eq!(report.ddk_project.as_deref(), Some(project.as_path()));

    let xml = fs::read_to_string(project.join("Dictionary.xml")).unwrap();
    let body = fs::read_to_string(resources(&report.output).join("Body.data")).unwrap();
    assert!(xml.contains(&body));
    assert!(xml.find("d:title=\"apple\"").unwrap() < xml.find("d:title=\"zoo\"").unwrap());
    for file in ["DictInfo.plist", "Dictionary.css", "Makefile"] {
        assert!(project.join(file).is_file(), "missing {}", file);
    }
}

#[test]
fn ddk_failure_withholds_the_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dict.mdx");
    common::bank_apple_zoo().write_to(&input);
    let project = dir.path().join("ddk");
    fs::create_dir(&project).unwrap();
    fs::write(project.join("keep.txt"), "user file").unwrap();

    let err = convert(&ConvertConfig::new(&input).with_ddk_project(&project)).unwrap_err();
    assert_eq!(err.stage(), Stage::Package);
    assert_eq!(err.exit_code(), 6);
    assert!(!dir.path().join("dict.dictionary").exists());
    assert_eq!(fs::read_to_string(project.join("keep.txt")).unwrap(), "user file");
    assert!(leftovers_clean(dir.path()));
}

#[test]
fn mdd_aliases_are_written_as_copies() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dict.mdx");
    MdictBuilder::mdx(Version::V2)
        .entry("apple", "<img src=\"img/b.png\"><img src=\"img/c.png\">")
        .write_to(&input);
    MdictBuilder::mdd(Version::V2)
        .resource("\\img\\a.png", b"PNG a")
        .resource_alias("\\img\\b.png", "\\img\\a.png")
        .resource_alias("\\img\\c.png", "\\img\\gone.png")
        .write_to(&dir.path().join("dict.mdd"));

    let report = convert(&ConvertConfig::new(&input)).unwrap();
    assert_eq!(report.resources, 2);

    let media = resources(&report.output).join("media").join("img");
    assert_eq!(fs::read(media.join("a.png")).unwrap(), b"PNG a");
    assert_eq!(fs::read(media.join("b.png")).unwrap(), b"PNG a");
    assert!(!fs::symlink_metadata(media.join("b.png")).unwrap().file_type().is_symlink());
    assert!(!media.join("c.png").exists());
}

#[test]
fn whitespace_only_entries_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dict.mdx");
    MdictBuilder::mdx(Version::V2)
        .entry("bank", " ")
        .entry("", "orphan")
        .entry("zoo", "")
        .entry("apple", "a fruit")
        .write_to(&input);

    let report = convert(&ConvertConfig::new(&input)).unwrap();
    assert_eq!(report.entries, 2);
    assert_eq!(report.skipped, 2);
    let (index, _) = read_index(&report.output);
    assert!(index.lookup("bank").is_some());
    assert!(index.lookup("zoo").is_none());
}

#[test]
fn decoded_v3_and_passcode_dictionaries_convert() {
    let dir = tempfile::tempdir().unwrap();
    let v3 = dir.path().join("v3.mdx");
    MdictBuilder::mdx(Version::V3)
        .blocks(2, 1)
        .entry("bank", "a shore")
        .entry("apple", "a fruit")
        .write_to(&v3);
    let report = convert(&ConvertConfig::new(&v3)).unwrap();
    let (index, body) = read_index(&report.output);
    assert!(slice(&body, index.lookup("apple").unwrap()).contains("a fruit"));

    let reg_code = *b"fedcba9876543210";
    let locked = dir.path().join("locked.mdx");
    common::bank_apple_zoo().passcode(&reg_code, "me@example.com").write_to(&locked);
    let err = convert(&ConvertConfig::new(&locked)).unwrap_err();
    assert_eq!(err.stage(), Stage::Header);
    assert!(!dir.path().join("locked.dictionary").exists());

    let report = convert(&ConvertConfig::new(&locked).with_passcode(hex::encode(reg_code), "me@example.com")).unwrap();
    assert_eq!(report.entries, 3);
    let (index, body) = read_index(&report.output);
    assert!(slice(&body, index.lookup("zoo").unwrap()).contains("a place with animals"));
}

#[test]
fn record_locations_fail_in_the_records_stage() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dict.mdx");
    let (mut bytes, layout) = common::bank_apple_zoo().build();
    // Shrink the decompressed size of the only record block below the key offsets.
    let at = layout.record_section + 40;
    bytes[at..at + 8].copy_from_slice(&10u64.to_be_bytes());
    fs::write(&input, bytes).unwrap();

    let err = convert(&ConvertConfig::new(&input)).unwrap_err();
    assert_eq!(err.stage(), Stage::Records, "{}", err);
    assert!(!dir.path().join("dict.dictionary").exists());
}
