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

//! URL variable substitution for repository base URLs.

/// Ordered table of `$name` substitutions applied to every ingested URL.
///
/// Later entries with the same name shadow earlier ones; among different
/// names the longest match wins, so `$releasever_major` is not clobbered
/// by a `releasever` entry.
#[derive(Debug, Clone, Default)]
pub struct UrlVars {
    vars: Vec<(String, String)>,
}

impl UrlVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.vars.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.vars.push((name, value));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Expand `$name` and `${name}` occurrences in `url`.
    ///
    /// Variable names are alphanumeric plus underscore. An unmatched
    /// `$name` stays literal, including a bare trailing `$`.
    pub fn substitute(&self, url: &str) -> String {
        if self.vars.is_empty() || !url.contains('$') {
            return url.to_string();
        }

        let mut out: Vec<u8> = Vec::with_capacity(url.len());
        let bytes = url.as_bytes();
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] != b'$' {
                out.push(bytes[i]);
                i += 1;
                continue;
            }

            let braced = bytes.get(i + 1) == Some(&b'{');
            let name_start = if braced { i + 2 } else { i + 1 };
            let mut name_end = name_start;
            while name_end < bytes.len()
                && (bytes[name_end].is_ascii_alphanumeric() || bytes[name_end] == b'_')
            {
                name_end += 1;
            }

            let token = &url[name_start..name_end];
            let matched = self.lookup(token).filter(|(name, _)| {
                // The braces form substitutes whole names only.
                !braced || (name.len() == token.len() && bytes.get(name_end) == Some(&b'}'))
            });

            match matched {
                Some((name, value)) => {
                    out.extend_from_slice(value.as_bytes());
                    i = if braced { name_end + 1 } else { name_start + name.len() };
                }
                None => {
                    out.push(b'$');
                    i += 1;
                }
            }
        }

        // Only ASCII '$' runs are rewritten, so boundaries stay valid.
        String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
    }

    /// Longest defined name that prefixes `token`.
    fn lookup(&self, token: &str) -> Option<(&str, &str)> {
        self.vars
            .iter()
            .filter(|(n, _)| token.starts_with(n.as_str()))
            .max_by_key(|(n, _)| n.len())
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }
}
