//! Property list output for `Info.plist` and the DDK `DictInfo.plist`.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::{BundleIdentity, PackagingError, Result};

const PLIST_DOCTYPE: &str =
    r#"plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd""#;

/// Key/value pairs of the bundle descriptor, in output order.
pub fn info_entries(identity: &BundleIdentity) -> Vec<(&'static str, String)> {
    vec![
        ("CFBundleDevelopmentRegion", identity.development_region.clone()),
        ("CFBundleIdentifier", identity.identifier.clone()),
        ("CFBundleName", identity.name.clone()),
        ("CFBundleDisplayName", identity.display_name.clone()),
        ("CFBundleShortVersionString", identity.version.clone()),
        ("CFBundleInfoDictionaryVersion", "6.0".to_string()),
        ("CFBundlePackageType", "DICT".to_string()),
        ("DCSDictionaryCopyright", identity.copyright.clone()),
        ("DCSDictionaryManufacturerName", identity.manufacturer.clone()),
        ("DCSDictionaryFrontMatterReferenceID", identity.front_matter_id.clone()),
    ]
}

fn plist_error(e: impl std::fmt::Display) -> PackagingError {
    PackagingError::Plist(e.to_string())
}

/// Renders a flat `<dict>` of string values.
pub fn render(entries: &[(&str, String)]) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(plist_error)?;
    writer
        .write_event(Event::DocType(BytesText::from_escaped(PLIST_DOCTYPE)))
        .map_err(plist_error)?;
    writer
        .write_event(Event::Start(BytesStart::new("plist").with_attributes([("version", "1.0")])))
        .map_err(plist_error)?;
    writer
        .write_event(Event::Start(BytesStart::new("dict")))
        .map_err(plist_error)?;

    for (key, value) in entries {
        for (tag, text) in [("key", *key), ("string", value.as_str())] {
            writer.write_event(Event::Start(BytesStart::new(tag))).map_err(plist_error)?;
            writer.write_event(Event::Text(BytesText::new(text))).map_err(plist_error)?;
            writer.write_event(Event::End(BytesEnd::new(tag))).map_err(plist_error)?;
        }
    }

    writer.write_event(Event::End(BytesEnd::new("dict"))).map_err(plist_error)?;
    writer.write_event(Event::End(BytesEnd::new("plist"))).map_err(plist_error)?;

    let mut out = writer.into_inner();
    out.push(b'\n');
    Ok(out)
}
