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

//! Parser for plain-text mirrorlist files.

use std::io::BufRead;
use std::path::Path;

use crate::error::{Error, Result};

/// Longest accepted line. Longer lines are dropped whole.
const MAX_LINE_LEN: usize = 4096;

/// URLs read from one mirrorlist file, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mirrorlist {
    pub urls: Vec<String>,
}

impl Mirrorlist {
    /// Parse a mirrorlist from any buffered reader.
    ///
    /// One URL per line; surrounding whitespace is stripped, blank lines
    /// and `#` comments are skipped. A line counts as a URL iff it
    /// contains `://` or starts with `/`. Anything else is ignored, and
    /// scheme validation is left to the transfer layer.
    pub fn parse(reader: impl BufRead) -> Result<Self> {
        let mut urls = Vec::new();

        for line in reader.split(b'\n') {
            let line = line.map_err(|e| Error::io("<mirrorlist>", e))?;
            if line.len() > MAX_LINE_LEN {
                tracing::debug!(len = line.len(), "skipping overlong mirrorlist line");
                continue;
            }

            let line = String::from_utf8_lossy(&line);
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if trimmed.contains("://") || trimmed.starts_with('/') {
                urls.push(trimmed.to_string());
            }
        }

        Ok(Self { urls })
    }

    pub fn parse_str(content: &str) -> Result<Self> {
        Self::parse(content.as_bytes())
    }

    pub fn parse_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| Error::io(path.display().to_string(), e))?;
        Self::parse(std::io::BufReader::new(file))
    }

    /// Render back to the one-URL-per-line text form.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for url in &self.urls {
            out.push_str(url);
            out.push('\n');
        }
        out
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_parse() {
        let input = "http://foo/linux/$releasever\nftp://bar/linux\n/srv/local/repo\n";
        let ml = Mirrorlist::parse_str(input).unwrap();
        assert_eq!(
            ml.urls,
            vec!["http://foo/linux/$releasever", "ftp://bar/linux", "/srv/local/repo"]
        );
    }

    #[test]
    fn test_comments_and_whitespace() {
        let input = "\n# comment\n   # indented comment\n  http://foo  \n\t\nhttp://bar\t\n";
        let ml = Mirrorlist::parse_str(input).unwrap();
        assert_eq!(ml.urls, vec!["http://foo", "http://bar"]);
    }

    #[test]
    fn test_non_url_lines_ignored() {
        let input = "not a url\nServer\nhttp://ok\nrelative/path\n";
        let ml = Mirrorlist::parse_str(input).unwrap();
        assert_eq!(ml.urls, vec!["http://ok"]);
    }

    #[test]
    fn test_missing_final_newline() {
        let ml = Mirrorlist::parse_str("http://foo\nhttp://bar").unwrap();
        assert_eq!(ml.len(), 2);
    }

    #[test]
    fn test_overlong_line_rejected() {
        let long = format!("http://foo/{}", "a".repeat(MAX_LINE_LEN));
        let input = format!("{}\nhttp://short\n", long);
        let ml = Mirrorlist::parse_str(&input).unwrap();
        assert_eq!(ml.urls, vec!["http://short"]);
    }

    #[test]
    fn test_line_at_cap_accepted() {
        let url = format!("http://foo/{}", "a".repeat(MAX_LINE_LEN - 11));
        assert_eq!(url.len(), MAX_LINE_LEN);
        let ml = Mirrorlist::parse_str(&format!("{}\n", url)).unwrap();
        assert_eq!(ml.urls, vec![url]);
    }

    #[test]
    fn test_round_trip() {
        let input = "# header\nhttp://foo\n\nftp://bar\n/local/path\n";
        let ml = Mirrorlist::parse_str(input).unwrap();
        let reparsed = Mirrorlist::parse_str(&ml.to_text()).unwrap();
        assert_eq!(ml, reparsed);
    }
}
