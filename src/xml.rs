// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! XML bodies: multistatus property listings and lock discovery.

use std::io::Write;
use std::time::Duration;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use sha2::{Digest, Sha256};

use crate::api::StorageEntry;
use crate::error::DavResult;
use crate::path::MountPrefix;

/// Incrementally built `<d:multistatus>` document.
pub(crate) struct Multistatus {
    writer: Writer<Vec<u8>>,
    responses: usize,
}

impl Multistatus {
    pub(crate) fn new() -> DavResult<Self> {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        let mut elem = BytesStart::new("d:multistatus");
        elem.push_attribute(("xmlns:d", "DAV:"));
        writer.write_event(Event::Start(elem))?;
        Ok(Self {
            writer,
            responses: 0,
        })
    }

    /// Appends one `<d:response>` describing `entry`.
    pub(crate) fn push(&mut self, prefix: &MountPrefix, entry: &StorageEntry) -> DavResult<()> {
        write_response(&mut self.writer, prefix, entry)?;
        self.responses += 1;
        Ok(())
    }

    pub(crate) fn responses(&self) -> usize {
        self.responses
    }

    pub(crate) fn finish(mut self) -> DavResult<Vec<u8>> {
        self.writer.write_event(Event::End(BytesEnd::new("d:multistatus")))?;
        Ok(self.writer.into_inner())
    }
}

/// Entity tag for an entry: a digest of its href and modification time.
///
/// Changes whenever the file is rewritten or moved, which is all discovery
/// clients need; it says nothing about the content itself.
pub(crate) fn etag(href: &str, modified: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(href.as_bytes());
    hasher.update(modified.as_bytes());
    format!("\"{}\"", hex::encode(&hasher.finalize()[..20]))
}

fn write_response<W: Write>(
    writer: &mut Writer<W>, prefix: &MountPrefix, entry: &StorageEntry,
) -> DavResult<()> {
    let href = prefix.href(&entry.path, entry.is_dir);
    let modified = httpdate::fmt_http_date(entry.mtime);

    writer.write_event(Event::Start(BytesStart::new("d:response")))?;
    write_text_element(writer, "d:href", &href)?;
    writer.write_event(Event::Start(BytesStart::new("d:propstat")))?;
    writer.write_event(Event::Start(BytesStart::new("d:prop")))?;

    write_text_element(writer, "d:getlastmodified", &modified)?;
    if entry.is_dir {
        writer.write_event(Event::Start(BytesStart::new("d:resourcetype")))?;
        writer.write_event(Event::Empty(BytesStart::new("d:collection")))?;
        writer.write_event(Event::End(BytesEnd::new("d:resourcetype")))?;
    } else {
        write_text_element(writer, "d:getetag", &etag(&href, &modified))?;
        writer.write_event(Event::Empty(BytesStart::new("d:resourcetype")))?;
        write_text_element(writer, "d:getcontentlength", &entry.size.to_string())?;
        write_text_element(writer, "d:getcontenttype", "text/plain")?;
    }

    writer.write_event(Event::End(BytesEnd::new("d:prop")))?;
    write_text_element(writer, "d:status", "HTTP/1.1 200 OK")?;
    writer.write_event(Event::End(BytesEnd::new("d:propstat")))?;
    writer.write_event(Event::End(BytesEnd::new("d:response")))?;
    Ok(())
}

/// Body of a LOCK response.
pub(crate) fn lock_discovery(token: &str, root: &str, timeout: Duration) -> DavResult<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    let mut elem = BytesStart::new("D:prop");
    elem.push_attribute(("xmlns:D", "DAV:"));
    writer.write_event(Event::Start(elem))?;
    writer.write_event(Event::Start(BytesStart::new("D:lockdiscovery")))?;
    writer.write_event(Event::Start(BytesStart::new("D:activelock")))?;

    writer.write_event(Event::Start(BytesStart::new("D:locktype")))?;
    writer.write_event(Event::Empty(BytesStart::new("D:write")))?;
    writer.write_event(Event::End(BytesEnd::new("D:locktype")))?;
    writer.write_event(Event::Start(BytesStart::new("D:lockscope")))?;
    writer.write_event(Event::Empty(BytesStart::new("D:exclusive")))?;
    writer.write_event(Event::End(BytesEnd::new("D:lockscope")))?;
    write_text_element(&mut writer, "D:depth", "infinity")?;
    write_text_element(&mut writer, "D:timeout", &format!("Second-{}", timeout.as_secs()))?;
    write_href_element(&mut writer, "D:locktoken", token)?;
    write_href_element(&mut writer, "D:lockroot", root)?;

    writer.write_event(Event::End(BytesEnd::new("D:activelock")))?;
    writer.write_event(Event::End(BytesEnd::new("D:lockdiscovery")))?;
    writer.write_event(Event::End(BytesEnd::new("D:prop")))?;
    Ok(writer.into_inner())
}

fn write_text_element<W: Write>(writer: &mut Writer<W>, name: &str, text: &str) -> DavResult<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_href_element<W: Write>(writer: &mut Writer<W>, name: &str, href: &str) -> DavResult<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    write_text_element(writer, "D:href", href)?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn entry(path: &str, is_dir: bool, size: u64) -> StorageEntry {
        StorageEntry {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap().to_string(),
            mtime: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            is_dir,
            is_link: false,
            size,
        }
    }

    fn render(entries: &[StorageEntry]) -> String {
        let prefix = MountPrefix::new("/drive");
        let mut ms = Multistatus::new().unwrap();
        for e in entries {
            ms.push(&prefix, e).unwrap();
        }
        assert_eq!(ms.responses(), entries.len());
        String::from_utf8(ms.finish().unwrap()).unwrap()
    }

    #[test]
    fn file_response_has_length_and_etag() {
        let xml = render(&[entry("/a.txt", false, 5)]);
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(xml.contains("<d:multistatus xmlns:d=\"DAV:\">"));
        assert!(xml.contains("<d:href>/drive/a.txt</d:href>"));
        assert!(xml.contains("<d:getcontentlength>5</d:getcontentlength>"));
        assert!(xml.contains("<d:getcontenttype>text/plain</d:getcontenttype>"));
        assert!(xml.contains("<d:getetag>"));
        assert!(xml.contains("<d:resourcetype/>"));
        assert!(!xml.contains("<d:collection/>"));
        assert!(xml.contains("<d:getlastmodified>Tue, 14 Nov 2023 22:13:20 GMT</d:getlastmodified>"));
        assert!(xml.contains("<d:status>HTTP/1.1 200 OK</d:status>"));
        assert!(xml.ends_with("</d:multistatus>"));
    }

    #[test]
    fn directory_response_is_a_collection() {
        let xml = render(&[entry("/my docs", true, 0)]);
        assert!(xml.contains("<d:href>/drive/my%20docs/</d:href>"));
        assert!(xml.contains("<d:resourcetype><d:collection/></d:resourcetype>"));
        assert!(!xml.contains("getcontentlength"));
        assert!(!xml.contains("getetag"));
    }

    #[test]
    fn markup_in_names_is_escaped() {
        let xml = render(&[entry("/a&b.txt", false, 1)]);
        assert!(xml.contains("<d:href>/drive/a&amp;b.txt</d:href>"));
    }

    #[test]
    fn etag_tracks_href_and_time() {
        let a = etag("/drive/a.txt", "Tue, 14 Nov 2023 22:13:20 GMT");
        assert_eq!(a, etag("/drive/a.txt", "Tue, 14 Nov 2023 22:13:20 GMT"));
        assert_ne!(a, etag("/drive/b.txt", "Tue, 14 Nov 2023 22:13:20 GMT"));
        assert_ne!(a, etag("/drive/a.txt", "Tue, 14 Nov 2023 22:13:21 GMT"));
        assert_eq!(a.len(), 42);
    }

    #[test]
    fn lock_discovery_embeds_token_and_root() {
        let body = lock_discovery(
            "urn:uuid:1234",
            "http://esp.local/drive/a.txt",
            Duration::from_secs(3600),
        )
        .unwrap();
        let xml = String::from_utf8(body).unwrap();
        assert!(xml.contains("<D:locktoken><D:href>urn:uuid:1234</D:href></D:locktoken>"));
        assert!(xml.contains("<D:lockroot><D:href>http://esp.local/drive/a.txt</D:href></D:lockroot>"));
        assert!(xml.contains("<D:lockscope><D:exclusive/></D:lockscope>"));
        assert!(xml.contains("<D:timeout>Second-3600</D:timeout>"));
    }
}
