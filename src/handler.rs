// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::header::{ALLOW, CONTENT_LENGTH};
use http::request::Parts;
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use hyper::Body;

use crate::api::StorageApi;
use crate::config::DavConfig;
use crate::error::{DavError, DavResult};
use crate::locks::LockTable;
use crate::method::DavMethod;
use crate::path::{sanitize, MountPrefix};
use crate::resource::Resource;
use crate::upload::{UploadId, UploadSessions};

/// WebDAV request handler over a [`StorageApi`].
///
/// Cheap to clone; clones share storage, locks and open uploads.
#[derive(Debug, Clone)]
pub struct DavHandler {
    pub(crate) inner: Arc<Inner>,
}

#[derive(Debug)]
pub(crate) struct Inner {
    pub(crate) api: Box<dyn StorageApi>,
    pub(crate) prefix: MountPrefix,
    pub(crate) config: DavConfig,
    pub(crate) locks: LockTable,
    pub(crate) uploads: UploadSessions,
}

/// Builder for [`DavHandler`].
pub struct DavBuilder {
    api: Box<dyn StorageApi>,
    config: DavConfig,
}

/// Outcome of the routing phase of a request.
///
/// For a PUT, `upload` names the session the request body must be fed into
/// (see [`DavHandler::handle_body`]) before the response is sent.
#[derive(Debug)]
pub struct Dispatched {
    pub response: Response<Body>,
    pub upload: Option<UploadId>,
}

impl From<Response<Body>> for Dispatched {
    fn from(response: Response<Body>) -> Self {
        Dispatched {
            response,
            upload: None,
        }
    }
}

impl DavBuilder {
    pub fn config(mut self, config: DavConfig) -> Self {
        self.config = config;
        self
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.config.prefix = prefix.to_string();
        self
    }

    pub fn infinite_depth(mut self, enabled: bool) -> Self {
        self.config.infinite_depth = enabled;
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size.max(1);
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    pub fn build_handler(self) -> DavHandler {
        DavHandler::new(self.api, self.config)
    }
}

impl DavHandler {
    pub fn builder(api: Box<dyn StorageApi>) -> DavBuilder {
        DavBuilder {
            api,
            config: DavConfig::default(),
        }
    }

    pub fn new(api: Box<dyn StorageApi>, mut config: DavConfig) -> DavHandler {
        config.read_chunk_size = config.read_chunk_size.max(1);
        let prefix = MountPrefix::new(&config.prefix);
        info!("DAV: serving {:?} at {:?}", api, prefix.as_str());
        DavHandler {
            inner: Arc::new(Inner {
                api,
                prefix,
                locks: LockTable::new(config.lock_timeout),
                uploads: UploadSessions::default(),
                config,
            }),
        }
    }

    /// The normalized mount prefix (`""` when mounted at the server root).
    pub fn prefix(&self) -> &str {
        self.inner.prefix.as_str()
    }

    pub fn config(&self) -> &DavConfig {
        &self.inner.config
    }

    /// Whether this handler claims a request at all.
    pub fn can_handle(&self, method: &Method, path: &str) -> bool {
        self.inner.prefix.contains(path) && DavMethod::from_http(method).is_some()
    }

    /// Serves a complete request, feeding a PUT body into storage before the
    /// response is returned.
    pub async fn handle<B, E>(&self, req: Request<B>) -> Response<Body>
    where
        B: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let (parts, mut body) = req.into_parts();
        let Dispatched { response, upload } = self.dispatch(&parts).await;
        let id = match upload {
            Some(id) => id,
            None => return response,
        };

        let total = content_length(&parts.headers);
        let result = match self.drain(id, &mut body, total).await {
            Ok(_) => self.finish_upload(id).await,
            Err(e) => {
                self.abort_upload(id);
                Err(e)
            }
        };
        match result {
            Ok(written) => {
                debug!("DAV: stored {} bytes at {:?}", written, parts.uri.path());
                response
            }
            Err(e) => {
                error!("DAV: upload to {:?} failed: {}", parts.uri.path(), e);
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Routing phase: classifies the target and runs exactly one operation.
    pub async fn dispatch(&self, parts: &Parts) -> Dispatched {
        let raw = parts.uri.path();
        debug!("DAV: {} {}", parts.method, raw);

        let method = match DavMethod::from_http(&parts.method) {
            Some(method) => method,
            None => {
                let mut res = status_response(StatusCode::METHOD_NOT_ALLOWED);
                res.headers_mut().insert(ALLOW, HeaderValue::from_static(crate::ops::ALLOW_ALL));
                return res.into();
            }
        };
        let path = match self.inner.prefix.resolve(raw).map(|p| sanitize(&p)) {
            Some(Ok(path)) => path,
            Some(Err(e)) => {
                warn!("DAV: rejecting {:?}: {}", raw, e);
                return status_response(StatusCode::BAD_REQUEST).into();
            }
            None => return status_response(StatusCode::NOT_FOUND).into(),
        };

        let headers = method.capture(&parts.headers);
        let resource = Resource::classify(self.inner.api.as_ref(), &path).await;
        trace!("DAV: {:?} {:?} is {:?}", method, path, resource);

        match method {
            DavMethod::PropFind | DavMethod::PropPatch => {
                self.handle_propfind(&path, &resource, &headers).await.into()
            }
            DavMethod::Get => self.handle_get(&path, &resource).into(),
            DavMethod::Head | DavMethod::Options => self.handle_head(&resource).into(),
            DavMethod::Put => self.handle_put(&path, &resource, &headers).await,
            DavMethod::Lock => {
                let host = headers
                    .get(http::header::HOST)
                    .and_then(|h| h.to_str().ok())
                    .map(str::to_string)
                    .or_else(|| parts.uri.authority().map(|a| a.to_string()));
                self.handle_lock(&path, &resource, host.as_deref()).into()
            }
            DavMethod::Unlock => self.handle_unlock(&path, &resource, &headers).into(),
            DavMethod::MkCol => self.handle_mkcol(&path, &resource).await.into(),
            DavMethod::Move => self.handle_move(&path, &resource, &headers).await.into(),
            DavMethod::Delete => self.handle_delete(&path, &resource).await.into(),
            DavMethod::Copy => crate::ops::not_found().into(),
        }
    }

    /// Body phase: writes one chunk of a PUT body. `index` is the chunk's byte
    /// offset in the body, `total` the announced body length if known.
    pub async fn handle_body(
        &self, id: UploadId, data: Bytes, index: u64, total: Option<u64>,
    ) -> DavResult<u64> {
        self.inner.uploads.write(id, data, index, total).await
    }

    /// Flushes and closes an upload. Required even for empty bodies.
    pub async fn finish_upload(&self, id: UploadId) -> DavResult<u64> {
        self.inner.uploads.finish(id).await
    }

    pub fn abort_upload(&self, id: UploadId) -> bool {
        self.inner.uploads.abort(id)
    }

    /// Number of uploads that have been dispatched but not finished.
    pub fn open_uploads(&self) -> usize {
        self.inner.uploads.len()
    }

    /// Forgets every issued lock token.
    pub fn clear_locks(&self) {
        self.inner.locks.clear();
    }

    async fn drain<B, E>(&self, id: UploadId, body: &mut B, total: Option<u64>) -> DavResult<u64>
    where
        B: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let mut index = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| DavError::Body(e.to_string()))?;
            if chunk.is_empty() {
                continue;
            }
            let len = chunk.len() as u64;
            self.handle_body(id, chunk, index, total).await?;
            index += len;
        }
        Ok(index)
    }
}

/// Announced body length, if the header is present and well formed.
pub(crate) fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

pub(crate) fn status_response(status: StatusCode) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = status;
    res
}
