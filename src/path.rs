// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Mapping between request URLs and normalized storage paths.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::error::{DavError, DavResult};

/// Bytes escaped inside a single href segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// A mount prefix, always `""` (whole server) or `/segment[/segment..]`
/// without a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPrefix(String);

impl MountPrefix {
    pub fn new(prefix: &str) -> Self {
        let trimmed = prefix.trim_end_matches('/');
        if trimmed.is_empty() {
            MountPrefix(String::new())
        } else if trimmed.starts_with('/') {
            MountPrefix(trimmed.to_string())
        } else {
            MountPrefix(format!("/{}", trimmed))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a raw URL path falls under this mount.
    pub fn contains(&self, raw: &str) -> bool {
        match raw.strip_prefix(self.0.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Strips the mount from `raw` and normalizes the remainder: empty becomes
    /// `"/"`, and trailing slashes are removed from anything but the root.
    pub fn resolve(&self, raw: &str) -> Option<String> {
        if !self.contains(raw) {
            return None;
        }
        let suffix = &raw[self.0.len()..];
        let trimmed = suffix.trim_end_matches('/');
        if trimmed.is_empty() {
            Some("/".to_string())
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Builds the percent-encoded href of a storage path under this mount.
    pub fn href(&self, path: &str, is_dir: bool) -> String {
        let mut href = self.0.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            href.push('/');
            href.extend(utf8_percent_encode(segment, SEGMENT));
        }
        if is_dir || href.is_empty() {
            href.push('/');
        }
        href
    }
}

/// Percent-decodes a normalized path and rejects anything that could step
/// outside the mount. Empty and `.` segments collapse away.
pub fn sanitize(path: &str) -> DavResult<String> {
    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| DavError::BadPath(path.to_string()))?;

    let mut clean = String::with_capacity(decoded.len());
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(DavError::BadPath(path.to_string())),
            s if s.contains('\0') || s.contains('\\') => {
                return Err(DavError::BadPath(path.to_string()))
            }
            s => {
                clean.push('/');
                clean.push_str(s);
            }
        }
    }
    if clean.is_empty() {
        clean.push('/');
    }
    Ok(clean)
}

/// Resolves a `Destination` header value to a sanitized storage path.
///
/// Absolute URLs contribute only their path. Destinations outside the mount
/// resolve to `None`.
pub fn destination(prefix: &MountPrefix, value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let raw = if value.starts_with("http://") || value.starts_with("https://") {
        Url::parse(value).ok()?.path().to_string()
    } else {
        value.to_string()
    };
    let normalized = prefix.resolve(&raw)?;
    sanitize(&normalized).ok()
}
