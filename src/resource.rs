// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

use std::io::ErrorKind;

use http::HeaderValue;

use crate::api::{StorageApi, StorageEntry};

/// What a normalized path points at right now.
///
/// Derived fresh for every request; other clients may change the tree
/// between two requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Absent,
    File(StorageEntry),
    Dir(StorageEntry),
}

impl Resource {
    /// Probes `path` on the storage.
    ///
    /// Lookup failures other than "not found" are logged and classify as
    /// absent, like a missing entry.
    pub async fn classify(api: &dyn StorageApi, path: &str) -> Resource {
        match api.metadata(path).await {
            Ok(entry) if entry.is_dir => Resource::Dir(entry),
            Ok(entry) => Resource::File(entry),
            Err(e) if e.kind() == ErrorKind::NotFound => Resource::Absent,
            Err(e) => {
                warn!("DAV: cannot classify {:?}: {}", path, e);
                Resource::Absent
            }
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Resource::Absent)
    }

    pub fn entry(&self) -> Option<&StorageEntry> {
        match self {
            Resource::Absent => None,
            Resource::File(entry) | Resource::Dir(entry) => Some(entry),
        }
    }
}

/// Listing scope requested through the `Depth` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Depth {
    pub fn from_header(value: Option<&HeaderValue>) -> Depth {
        match value.and_then(|v| v.to_str().ok()).map(str::trim) {
            Some("1") => Depth::One,
            Some(v) if v.eq_ignore_ascii_case("infinity") => Depth::Infinity,
            _ => Depth::Zero,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LocalApi;

    #[test]
    fn depth_parsing() {
        let one = HeaderValue::from_static("1");
        let inf = HeaderValue::from_static("infinity");
        let zero = HeaderValue::from_static("0");
        let junk = HeaderValue::from_static("2");
        assert_eq!(Depth::from_header(Some(&one)), Depth::One);
        assert_eq!(Depth::from_header(Some(&inf)), Depth::Infinity);
        assert_eq!(Depth::from_header(Some(&zero)), Depth::Zero);
        assert_eq!(Depth::from_header(Some(&junk)), Depth::Zero);
        assert_eq!(Depth::from_header(None), Depth::Zero);
    }

    #[tokio::test]
    async fn classifies_storage_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let api = LocalApi::new(dir.path()).unwrap();

        assert!(matches!(Resource::classify(api.as_ref(), "/a.txt").await, Resource::File(e) if e.size == 5));
        assert!(matches!(Resource::classify(api.as_ref(), "/sub").await, Resource::Dir(_)));
        assert!(matches!(Resource::classify(api.as_ref(), "/").await, Resource::Dir(_)));
        assert_eq!(Resource::classify(api.as_ref(), "/missing").await, Resource::Absent);
        assert_eq!(Resource::classify(api.as_ref(), "/sub/missing/deeper").await, Resource::Absent);
    }
}
