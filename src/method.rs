// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

use http::header::HeaderName;
use http::{HeaderMap, Method};

pub const DEPTH: &str = "depth";
pub const DESTINATION: &str = "destination";
pub const LOCK_TOKEN: &str = "lock-token";

/// Methods claimed by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DavMethod {
    PropFind,
    PropPatch,
    Get,
    Head,
    Options,
    Put,
    Lock,
    Unlock,
    MkCol,
    Delete,
    Move,
    Copy,
}

impl DavMethod {
    pub fn from_http(method: &Method) -> Option<DavMethod> {
        let m = match *method {
            Method::GET => DavMethod::Get,
            Method::HEAD => DavMethod::Head,
            Method::OPTIONS => DavMethod::Options,
            Method::PUT => DavMethod::Put,
            Method::DELETE => DavMethod::Delete,
            _ => match method.as_str() {
                "PROPFIND" => DavMethod::PropFind,
                "PROPPATCH" => DavMethod::PropPatch,
                "LOCK" => DavMethod::Lock,
                "UNLOCK" => DavMethod::Unlock,
                "MKCOL" => DavMethod::MkCol,
                "MOVE" => DavMethod::Move,
                "COPY" => DavMethod::Copy,
                _ => return None,
            },
        };
        Some(m)
    }

    /// Request headers a method reads. Collaborators that filter headers must
    /// deliver at least these.
    pub fn interesting_headers(self) -> &'static [&'static str] {
        match self {
            DavMethod::PropFind | DavMethod::PropPatch => &[DEPTH],
            DavMethod::Move => &[DESTINATION],
            DavMethod::Lock => &["host"],
            DavMethod::Unlock => &[LOCK_TOKEN],
            DavMethod::Put => &["content-length"],
            _ => &[],
        }
    }

    /// Copies the interesting headers out of a full header map.
    pub fn capture(self, headers: &HeaderMap) -> HeaderMap {
        let mut captured = HeaderMap::new();
        for &name in self.interesting_headers() {
            let name = HeaderName::from_static(name);
            if let Some(value) = headers.get(&name) {
                captured.insert(name, value.clone());
            }
        }
        captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn maps_dav_methods() {
        let propfind = Method::from_bytes(b"PROPFIND").unwrap();
        let mkcol = Method::from_bytes(b"MKCOL").unwrap();
        assert_eq!(DavMethod::from_http(&propfind), Some(DavMethod::PropFind));
        assert_eq!(DavMethod::from_http(&mkcol), Some(DavMethod::MkCol));
        assert_eq!(DavMethod::from_http(&Method::GET), Some(DavMethod::Get));
        assert_eq!(DavMethod::from_http(&Method::POST), None);
        assert_eq!(DavMethod::from_http(&Method::from_bytes(b"REPORT").unwrap()), None);
    }

    #[test]
    fn captures_only_registered_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("depth", HeaderValue::from_static("1"));
        headers.insert("destination", HeaderValue::from_static("/drive/b"));

        let captured = DavMethod::PropFind.capture(&headers);
        assert_eq!(captured.get(DEPTH).unwrap(), "1");
        assert!(captured.get(DESTINATION).is_none());

        let captured = DavMethod::Move.capture(&headers);
        assert_eq!(captured.get(DESTINATION).unwrap(), "/drive/b");
        assert!(captured.get(DEPTH).is_none());

        assert!(DavMethod::Get.capture(&headers).is_empty());
    }
}
