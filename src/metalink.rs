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

//! Parser for metalink v3 documents.
//!
//! A metalink names one repository manifest and the set of mirrors that
//! carry it, together with content hashes used to verify the download.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{Error, Result};

/// One `<url>` entry of a metalink `<resources>` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetalinkUrl {
    pub protocol: String,
    pub kind: String,
    pub location: Option<String>,
    /// 1..=100, higher is preferred. Defaults to 100 when absent.
    pub preference: u8,
    pub url: String,
}

/// One `<hash>` entry. Unknown hash types are retained here and filtered
/// by the checksum verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetalinkHash {
    pub kind: String,
    pub hex: String,
}

/// Parsed metalink record for a single file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metalink {
    pub filename: String,
    pub timestamp: i64,
    pub size: i64,
    pub hashes: Vec<MetalinkHash>,
    pub urls: Vec<MetalinkUrl>,
}

fn parse_err(e: impl std::fmt::Display) -> Error {
    Error::Parse(format!("metalink: {}", e))
}

impl Metalink {
    /// Parse a metalink document.
    ///
    /// Picks the `<file>` whose `name` attribute equals `filename` when
    /// one is given, otherwise the first `<file>`. Missing structure or
    /// malformed XML is a parse error.
    pub fn parse(xml: &str, filename: Option<&str>) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut result: Option<Metalink> = None;
        // Set while the cursor is inside the selected <file> element.
        let mut current: Option<Metalink> = None;
        let mut element: Vec<u8> = Vec::new();
        let mut pending_hash: Option<String> = None;
        let mut pending_url: Option<MetalinkUrl> = None;

        loop {
            match reader.read_event().map_err(parse_err)? {
                Event::Start(e) => {
                    let name = e.name().as_ref().to_vec();
                    match name.as_slice() {
                        b"file" if result.is_none() && current.is_none() => {
                            let mut file_name = String::new();
                            for attr in e.attributes() {
                                let attr = attr.map_err(parse_err)?;
                                if attr.key.as_ref() == b"name" {
                                    file_name =
                                        attr.unescape_value().map_err(parse_err)?.into_owned();
                                }
                            }
                            let wanted = filename.map_or(true, |f| f == file_name);
                            if wanted {
                                current = Some(Metalink {
                                    filename: file_name,
                                    ..Default::default()
                                });
                            }
                        }
                        b"hash" if current.is_some() => {
                            let mut kind = String::new();
                            for attr in e.attributes() {
                                let attr = attr.map_err(parse_err)?;
                                if attr.key.as_ref() == b"type" {
                                    kind = attr.unescape_value().map_err(parse_err)?.into_owned();
                                }
                            }
                            pending_hash = Some(kind);
                        }
                        b"url" if current.is_some() => {
                            let mut url = MetalinkUrl {
                                protocol: String::new(),
                                kind: String::new(),
                                location: None,
                                preference: 100,
                                url: String::new(),
                            };
                            for attr in e.attributes() {
                                let attr = attr.map_err(parse_err)?;
                                let value = attr.unescape_value().map_err(parse_err)?;
                                match attr.key.as_ref() {
                                    b"protocol" => url.protocol = value.into_owned(),
                                    b"type" => url.kind = value.into_owned(),
                                    b"location" => url.location = Some(value.into_owned()),
                                    b"preference" => {
                                        url.preference =
                                            value.parse::<i64>().unwrap_or(100).clamp(1, 100) as u8;
                                    }
                                    _ => {}
                                }
                            }
                            pending_url = Some(url);
                        }
                        _ => {}
                    }
                    element = name;
                }
                Event::Text(t) => {
                    let Some(file) = current.as_mut() else {
                        continue;
                    };
                    let text = t.unescape().map_err(parse_err)?;
                    let text = text.trim();
                    match element.as_slice() {
                        b"timestamp" => file.timestamp = text.parse().unwrap_or(0),
                        b"size" => file.size = text.parse().unwrap_or(0),
                        b"hash" => {
                            if let Some(kind) = pending_hash.take() {
                                file.hashes.push(MetalinkHash {
                                    kind,
                                    hex: text.to_ascii_lowercase(),
                                });
                            }
                        }
                        b"url" => {
                            if let Some(url) = pending_url.as_mut() {
                                url.url = text.to_string();
                            }
                        }
                        _ => {}
                    }
                }
                Event::End(e) => {
                    match e.name().as_ref() {
                        b"file" => {
                            if let Some(file) = current.take() {
                                result = Some(file);
                            }
                        }
                        b"url" => {
                            if let (Some(file), Some(url)) = (current.as_mut(), pending_url.take())
                            {
                                file.urls.push(url);
                            }
                        }
                        _ => {}
                    }
                    element.clear();
                }
                Event::Eof => break,
                _ => {}
            }
        }

        match result {
            Some(ml) => Ok(ml),
            None => Err(Error::Parse(match filename {
                Some(f) => format!("metalink: no <file> element named '{}'", f),
                None => "metalink: no <file> element".to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<metalink version="3.0" xmlns="http://www.metalinker.org/">
 <files>
  <file name="repomd.xml">
   <timestamp>1337987522</timestamp>
   <size>4309</size>
   <verification>
    <hash type="md5">20b6d77930574ae541108e8e7987ad3f</hash>
    <hash type="sha256">4D92491Bab9D1D2A78A9E86fBaf9bcA0CD1C3fd2c5E8bd5a4bD3C137Fb1f8A26</hash>
    <hash type="whirlpool">deadbeef</hash>
   </verification>
   <resources maxconnections="1">
    <url protocol="http" type="http" location="CZ" preference="100">http://foo/repodata/repomd.xml</url>
    <url protocol="rsync" type="rsync" location="US" preference="50"></url>
    <url protocol="ftp" type="ftp" location="US" preference="95">ftp://bar/repodata/repomd.xml</url>
   </resources>
  </file>
 </files>
</metalink>"#;

    #[test]
    fn test_parse_sample() {
        let ml = Metalink::parse(SAMPLE, Some("repomd.xml")).unwrap();
        assert_eq!(ml.filename, "repomd.xml");
        assert_eq!(ml.timestamp, 1337987522);
        assert_eq!(ml.size, 4309);

        assert_eq!(ml.hashes.len(), 3);
        assert_eq!(ml.hashes[0].kind, "md5");
        // Digest hex is lowercased on the way in.
        assert_eq!(
            ml.hashes[1].hex,
            "4d92491bab9d1d2a78a9e86fbaf9bca0cd1c3fd2c5e8bd5a4bd3c137fb1f8a26"
        );
        // Unknown hash types survive parsing.
        assert_eq!(ml.hashes[2].kind, "whirlpool");

        assert_eq!(ml.urls.len(), 3);
        assert_eq!(ml.urls[0].url, "http://foo/repodata/repomd.xml");
        assert_eq!(ml.urls[0].preference, 100);
        assert_eq!(ml.urls[0].location.as_deref(), Some("CZ"));
        // The empty rsync entry is kept here; mirror-list ingestion drops it.
        assert_eq!(ml.urls[1].url, "");
        assert_eq!(ml.urls[2].preference, 95);
    }

    #[test]
    fn test_first_file_when_unnamed() {
        let ml = Metalink::parse(SAMPLE, None).unwrap();
        assert_eq!(ml.filename, "repomd.xml");
    }

    #[test]
    fn test_wrong_filename_rejected() {
        assert!(matches!(
            Metalink::parse(SAMPLE, Some("other.xml")),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_malformed_xml_rejected() {
        assert!(matches!(
            Metalink::parse("<metalink><files><file", Some("x")),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_preference_clamped_and_defaulted() {
        let xml = r#"<metalink><files><file name="f">
            <resources>
              <url preference="500">http://a</url>
              <url>http://b</url>
            </resources>
        </file></files></metalink>"#;
        let ml = Metalink::parse(xml, None).unwrap();
        assert_eq!(ml.urls[0].preference, 100);
        assert_eq!(ml.urls[1].preference, 100);
    }
}
