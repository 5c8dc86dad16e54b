// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

use crate::api::StorageFile;
use crate::error::{DavError, DavResult};

/// Identifies one in-flight PUT body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadId(u64);

#[derive(Debug)]
struct UploadSession {
    path: String,
    file: Box<dyn StorageFile>,
    written: u64,
    total: Option<u64>,
}

/// Open upload handles, keyed by request.
///
/// A session is taken out of the map while a chunk is written, so a single
/// upload never sees two writers at once. Any failed write drops the session
/// together with its handle.
#[derive(Debug, Default, Clone)]
pub(crate) struct UploadSessions {
    next: Arc<AtomicU64>,
    sessions: Arc<Mutex<HashMap<UploadId, UploadSession>>>,
}

impl UploadSessions {
    pub(crate) fn open(&self, path: &str, file: Box<dyn StorageFile>, total: Option<u64>) -> UploadId {
        let id = UploadId(self.next.fetch_add(1, Ordering::Relaxed));
        trace!("UPL: open {:?} for {:?} (total {:?})", id, path, total);
        self.put(
            id,
            UploadSession {
                path: path.to_string(),
                file,
                written: 0,
                total,
            },
        );
        id
    }

    /// Appends one chunk. `index` is the byte offset of the chunk within the
    /// body and must match what has been written so far.
    pub(crate) async fn write(
        &self, id: UploadId, data: Bytes, index: u64, total: Option<u64>,
    ) -> DavResult<u64> {
        let mut session = self.take(id)?;
        if index != session.written {
            warn!("UPL: {:?} out of order chunk for {:?}", id, session.path);
            return Err(DavError::UploadOffset {
                id,
                expected: session.written,
                actual: index,
            });
        }
        if total.is_some() {
            session.total = total;
        }
        let len = data.len() as u64;
        session.file.write_bytes(data).await?;
        session.written += len;
        if session.total == Some(session.written) {
            debug!("UPL: {:?} received all {} bytes of {:?}", id, session.written, session.path);
        }
        let written = session.written;
        self.put(id, session);
        Ok(written)
    }

    /// Flushes and closes the handle, returning the number of bytes written.
    pub(crate) async fn finish(&self, id: UploadId) -> DavResult<u64> {
        let mut session = self.take(id)?;
        session.file.flush().await?;
        if let Some(total) = session.total.filter(|&t| t != session.written) {
            warn!(
                "UPL: {:?} closed {:?} after {} of {} bytes",
                id, session.path, session.written, total
            );
        }
        trace!("UPL: finish {:?} ({} bytes)", id, session.written);
        Ok(session.written)
    }

    /// Drops an upload without flushing. Returns whether it was open.
    pub(crate) fn abort(&self, id: UploadId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn take(&self, id: UploadId) -> DavResult<UploadSession> {
        self.lock().remove(&id).ok_or(DavError::UnknownUpload(id))
    }

    fn put(&self, id: UploadId, session: UploadSession) {
        self.lock().insert(id, session);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<UploadId, UploadSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{LocalApi, StorageApi};

    #[tokio::test]
    async fn chunks_are_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let api = LocalApi::new(dir.path()).unwrap();
        let uploads = UploadSessions::default();

        let file = api.open_write("/a.txt", false).await.unwrap();
        let id = uploads.open("/a.txt", file, Some(5));
        assert_eq!(uploads.write(id, Bytes::from_static(b"hel"), 0, Some(5)).await.unwrap(), 3);
        assert_eq!(uploads.write(id, Bytes::from_static(b"lo"), 3, Some(5)).await.unwrap(), 5);
        assert_eq!(uploads.finish(id).await.unwrap(), 5);
        assert_eq!(uploads.len(), 0);

        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn out_of_order_chunk_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let api = LocalApi::new(dir.path()).unwrap();
        let uploads = UploadSessions::default();

        let file = api.open_write("/a.txt", false).await.unwrap();
        let id = uploads.open("/a.txt", file, None);
        let err = uploads.write(id, Bytes::from_static(b"x"), 7, None).await.unwrap_err();
        assert!(matches!(err, DavError::UploadOffset { expected: 0, actual: 7, .. }));
        assert!(matches!(uploads.finish(id).await, Err(DavError::UnknownUpload(_))));
    }

    #[tokio::test]
    async fn empty_upload_still_finishes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"old contents").unwrap();
        let api = LocalApi::new(dir.path()).unwrap();
        let uploads = UploadSessions::default();

        let file = api.open_write("/a.txt", false).await.unwrap();
        let id = uploads.open("/a.txt", file, Some(0));
        assert_eq!(uploads.finish(id).await.unwrap(), 0);
        assert_eq!(std::fs::metadata(dir.path().join("a.txt")).unwrap().len(), 0);
        assert!(!uploads.abort(id));
    }
}
