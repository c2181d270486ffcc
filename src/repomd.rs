/*
 * repofetch - Mirror-aware repository metadata and package downloader.
 * Copyright (C) 2025  repofetch contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Parser for the repository manifest (repomd.xml).
//!
//! The manifest enumerates the repository's content files by logical
//! name (`primary`, `filelists`, ...) with location, size, and checksum.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};

/// One `<data>` record of the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepomdRecord {
    /// Logical name from the `type` attribute.
    pub name: String,
    /// Path relative to the repository base URL.
    pub location: String,
    pub size: Option<i64>,
    pub open_size: Option<i64>,
    pub checksum: Option<(String, String)>,
    pub open_checksum: Option<(String, String)>,
    pub timestamp: Option<i64>,
}

/// Parsed manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Repomd {
    pub revision: Option<String>,
    pub records: Vec<RepomdRecord>,
}

fn parse_err(e: impl std::fmt::Display) -> Error {
    Error::Parse(format!("repomd: {}", e))
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(parse_err)?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value().map_err(parse_err)?.into_owned()));
        }
    }
    Ok(None)
}

impl Repomd {
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut repomd = Repomd::default();
        let mut record: Option<RepomdRecord> = None;
        let mut element: Vec<u8> = Vec::new();
        let mut pending_hash_kind: Option<String> = None;
        let mut seen_root = false;

        loop {
            match reader.read_event().map_err(parse_err)? {
                Event::Start(e) => {
                    let name = e.name().as_ref().to_vec();
                    match name.as_slice() {
                        b"repomd" => seen_root = true,
                        b"data" => {
                            record = Some(RepomdRecord {
                                name: attr_value(&e, b"type")?.unwrap_or_default(),
                                ..Default::default()
                            });
                        }
                        b"checksum" | b"open-checksum" if record.is_some() => {
                            pending_hash_kind = attr_value(&e, b"type")?;
                        }
                        b"location" => {
                            if let Some(rec) = record.as_mut() {
                                rec.location = attr_value(&e, b"href")?.unwrap_or_default();
                            }
                        }
                        _ => {}
                    }
                    element = name;
                }
                Event::Empty(e) => {
                    if e.name().as_ref() == b"location" {
                        if let Some(rec) = record.as_mut() {
                            rec.location = attr_value(&e, b"href")?.unwrap_or_default();
                        }
                    }
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(parse_err)?;
                    let text = text.trim();
                    if let Some(rec) = record.as_mut() {
                        match element.as_slice() {
                            b"size" => rec.size = text.parse().ok(),
                            b"open-size" => rec.open_size = text.parse().ok(),
                            b"timestamp" => rec.timestamp = text.parse().ok(),
                            b"checksum" => {
                                if let Some(kind) = pending_hash_kind.take() {
                                    rec.checksum = Some((kind, text.to_ascii_lowercase()));
                                }
                            }
                            b"open-checksum" => {
                                if let Some(kind) = pending_hash_kind.take() {
                                    rec.open_checksum = Some((kind, text.to_ascii_lowercase()));
                                }
                            }
                            _ => {}
                        }
                    } else if element.as_slice() == b"revision" {
                        repomd.revision = Some(text.to_string());
                    }
                }
                Event::End(e) => {
                    if e.name().as_ref() == b"data" {
                        if let Some(rec) = record.take() {
                            if rec.location.is_empty() {
                                return Err(Error::Parse(format!(
                                    "repomd: record '{}' has no location",
                                    rec.name
                                )));
                            }
                            repomd.records.push(rec);
                        }
                    }
                    element.clear();
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !seen_root {
            return Err(Error::Parse("repomd: missing <repomd> root".to_string()));
        }

        Ok(repomd)
    }

    /// Look up a record by its logical name.
    pub fn record(&self, name: &str) -> Option<&RepomdRecord> {
        self.records.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <revision>1337987569</revision>
  <data type="primary">
    <checksum type="sha256">a1b2c3D4</checksum>
    <open-checksum type="sha256">ffee</open-checksum>
    <location href="repodata/primary.xml.gz"/>
    <timestamp>1337987569</timestamp>
    <size>2022</size>
    <open-size>12344</open-size>
  </data>
  <data type="filelists">
    <checksum type="sha1">0011</checksum>
    <location href="repodata/filelists.xml.gz"/>
    <size>1234</size>
  </data>
</repomd>"#;

    #[test]
    fn test_parse_sample() {
        let repomd = Repomd::parse(SAMPLE).unwrap();
        assert_eq!(repomd.revision.as_deref(), Some("1337987569"));
        assert_eq!(repomd.records.len(), 2);

        let primary = repomd.record("primary").unwrap();
        assert_eq!(primary.location, "repodata/primary.xml.gz");
        assert_eq!(primary.size, Some(2022));
        assert_eq!(primary.open_size, Some(12344));
        assert_eq!(
            primary.checksum,
            Some(("sha256".to_string(), "a1b2c3d4".to_string()))
        );
        assert_eq!(primary.timestamp, Some(1337987569));

        let filelists = repomd.record("filelists").unwrap();
        assert_eq!(filelists.checksum, Some(("sha1".to_string(), "0011".to_string())));
        assert_eq!(filelists.open_size, None);
    }

    #[test]
    fn test_record_without_location_rejected() {
        let xml = r#"<repomd><data type="primary"><size>1</size></data></repomd>"#;
        assert!(matches!(Repomd::parse(xml), Err(Error::Parse(_))));
    }

    #[test]
    fn test_not_repomd_rejected() {
        assert!(matches!(Repomd::parse("<html></html>"), Err(Error::Parse(_))));
        assert!(matches!(Repomd::parse("not xml <"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_unknown_record_lookup() {
        let repomd = Repomd::parse(SAMPLE).unwrap();
        assert!(repomd.record("group").is_none());
    }
}
