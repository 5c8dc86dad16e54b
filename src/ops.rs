// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! The per-method operations. Each one sends exactly one response.

use std::io::{self, ErrorKind};

use futures::stream;
use http::header::{HeaderName, ALLOW, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use hyper::Body;

use crate::api::StorageEntry;
use crate::error::DavResult;
use crate::handler::{content_length, status_response, DavHandler, Dispatched};
use crate::method::{DEPTH, DESTINATION, LOCK_TOKEN};
use crate::path::destination;
use crate::resource::{Depth, Resource};
use crate::xml::{self, Multistatus};

pub(crate) const ALLOW_ALL: &str =
    "PROPPATCH,PROPFIND,OPTIONS,DELETE,UNLOCK,COPY,LOCK,MOVE,HEAD,PUT,GET,MKCOL";
const ALLOW_FILE: &str = "PROPFIND,OPTIONS,DELETE,COPY,MOVE,HEAD,PUT,GET";
const ALLOW_DIR: &str = "PROPFIND,OPTIONS,DELETE,COPY,MOVE";
const ALLOW_LOCKED: &str = "PROPPATCH,PROPFIND,OPTIONS,DELETE,UNLOCK,COPY,LOCK,MOVE,HEAD,PUT,GET";
const ALLOW_CREATED: &str = "OPTIONS,MKCOL,LOCK,PUT";
const ALLOW_MISSING: &str = "OPTIONS,MKCOL,PUT";

const XML_CONTENT: &str = "application/xml; charset=utf-8";

/// Deepest level a `Depth: infinity` listing descends to.
const MAX_DEPTH: usize = 32;

/// What happened to a DELETE target.
#[derive(Debug)]
pub(crate) enum DeleteOutcome {
    Removed,
    NotFound,
    Failed(io::Error),
}

/// The shared response for missing resources. Carries the DAV headers so
/// clients can still discover capabilities on a miss.
pub(crate) fn not_found() -> Response<Body> {
    let mut res = status_response(StatusCode::NOT_FOUND);
    let headers = res.headers_mut();
    headers.insert(ALLOW, HeaderValue::from_static(ALLOW_MISSING));
    insert_dav_headers(headers);
    res
}

impl DavHandler {
    pub(crate) async fn handle_propfind(
        &self, path: &str, resource: &Resource, headers: &HeaderMap,
    ) -> Response<Body> {
        let entry = match resource.entry() {
            Some(entry) => entry,
            None => return not_found(),
        };
        let depth = Depth::from_header(headers.get(DEPTH));
        match self.list_properties(entry, depth).await {
            Ok(body) => {
                let mut res = Response::new(Body::from(body));
                *res.status_mut() = StatusCode::MULTI_STATUS;
                res.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT));
                res
            }
            Err(e) => {
                error!("DAV: propfind {:?} failed: {}", path, e);
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    async fn list_properties(
        &self, entry: &StorageEntry, depth: Depth,
    ) -> DavResult<Vec<u8>> {
        let inner = &self.inner;
        let mut ms = Multistatus::new()?;
        ms.push(&inner.prefix, entry)?;

        if entry.is_dir && depth != Depth::Zero {
            let recursive = depth == Depth::Infinity && inner.config.infinite_depth;
            let mut pending = vec![(entry.path.clone(), 1)];
            while let Some((dir, level)) = pending.pop() {
                let children = match inner.api.read_dir(&dir).await {
                    Ok(children) => children,
                    Err(e) => {
                        warn!("DAV: cannot list {:?}: {}", dir, e);
                        continue;
                    }
                };
                for child in children {
                    ms.push(&inner.prefix, &child)?;
                    if !recursive || !child.is_dir {
                        continue;
                    }
                    if child.is_link {
                        debug!("DAV: not descending into link {:?}", child.path);
                    } else if level >= MAX_DEPTH {
                        warn!("DAV: listing of {:?} cut at depth {}", entry.path, MAX_DEPTH);
                    } else {
                        pending.push((child.path, level + 1));
                    }
                }
            }
        }
        debug!("DAV: propfind {:?} depth {:?}: {} responses", entry.path, depth, ms.responses());
        ms.finish()
    }

    pub(crate) fn handle_get(&self, path: &str, resource: &Resource) -> Response<Body> {
        let entry = match resource {
            Resource::File(entry) => entry.clone(),
            _ => return not_found(),
        };

        let inner = self.inner.clone();
        let chunk = inner.config.read_chunk_size;
        let size = entry.size;
        let file = path.to_string();
        let body = stream::try_unfold(0u64, move |offset| {
            let inner = inner.clone();
            let file = file.clone();
            async move {
                if offset >= size {
                    return Ok::<_, io::Error>(None);
                }
                let count = chunk.min((size - offset) as usize);
                let data = inner.api.read(&file, offset, count).await?;
                if data.is_empty() {
                    warn!("DAV: {:?} shrank while being read", file);
                    return Ok(None);
                }
                let next = offset + data.len() as u64;
                Ok(Some((data, next)))
            }
        });

        let href = self.inner.prefix.href(&entry.path, false);
        let modified = httpdate::fmt_http_date(entry.mtime);
        let mut res = Response::new(Body::wrap_stream(body));
        let headers = res.headers_mut();
        headers.insert(ALLOW, HeaderValue::from_static(ALLOW_FILE));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
        insert_header(headers, LAST_MODIFIED, &modified);
        insert_header(headers, ETAG, &xml::etag(&href, &modified));
        res
    }

    pub(crate) fn handle_head(&self, resource: &Resource) -> Response<Body> {
        let allow = match resource {
            Resource::Absent => return not_found(),
            Resource::File(_) => ALLOW_FILE,
            Resource::Dir(_) => ALLOW_DIR,
        };
        let mut res = status_response(StatusCode::OK);
        let headers = res.headers_mut();
        insert_dav_headers(headers);
        headers.insert(ALLOW, HeaderValue::from_static(allow));
        res
    }

    /// Opens the upload session; the body is written afterwards. An existing
    /// file is truncated and answered with 200, a new one with 201.
    pub(crate) async fn handle_put(
        &self, path: &str, resource: &Resource, headers: &HeaderMap,
    ) -> Dispatched {
        let status = match resource {
            Resource::Dir(_) => return not_found().into(),
            Resource::File(_) => StatusCode::OK,
            Resource::Absent => StatusCode::CREATED,
        };
        let total = content_length(headers);

        match self.inner.api.open_write(path, false).await {
            Ok(file) => Dispatched {
                response: status_response(status),
                upload: Some(self.inner.uploads.open(path, file, total)),
            },
            Err(e) => {
                error!("DAV: cannot create {:?}: {}", path, e);
                status_response(StatusCode::INTERNAL_SERVER_ERROR).into()
            }
        }
    }

    /// Issues an advisory lock token. Nothing stops other clients from
    /// writing while it is held.
    pub(crate) fn handle_lock(
        &self, path: &str, resource: &Resource, host: Option<&str>,
    ) -> Response<Body> {
        let entry = match resource.entry() {
            Some(entry) => entry,
            None => return not_found(),
        };
        let locks = &self.inner.locks;
        let token = locks.lock(path);
        let href = self.inner.prefix.href(path, entry.is_dir);
        let root = match host {
            Some(host) => format!("http://{}{}", host, href),
            None => href,
        };
        debug!("DAV: lock {:?} -> {} ({} held)", path, token, locks.len());

        match xml::lock_discovery(&token, &root, locks.timeout()) {
            Ok(body) => {
                let mut res = Response::new(Body::from(body));
                let headers = res.headers_mut();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT));
                headers.insert(ALLOW, HeaderValue::from_static(ALLOW_LOCKED));
                insert_header(headers, HeaderName::from_static(LOCK_TOKEN), &format!("<{}>", token));
                res
            }
            Err(e) => {
                error!("DAV: lock {:?} failed: {}", path, e);
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    pub(crate) fn handle_unlock(
        &self, path: &str, resource: &Resource, headers: &HeaderMap,
    ) -> Response<Body> {
        if resource.is_absent() {
            return not_found();
        }
        let presented = headers.get(LOCK_TOKEN).and_then(|v| v.to_str().ok());
        let token = self.inner.locks.unlock(path, presented);
        debug!("DAV: unlock {:?} ({:?})", path, token);

        let mut res = status_response(StatusCode::OK);
        let headers = res.headers_mut();
        headers.insert(ALLOW, HeaderValue::from_static(ALLOW_LOCKED));
        if let Some(token) = token {
            insert_header(headers, HeaderName::from_static(LOCK_TOKEN), &format!("<{}>", token));
        }
        res
    }

    pub(crate) async fn handle_mkcol(&self, path: &str, resource: &Resource) -> Response<Body> {
        if !resource.is_absent() {
            return status_response(StatusCode::METHOD_NOT_ALLOWED);
        }
        match self.inner.api.mkdir(path).await {
            Ok(()) => status_response(StatusCode::CREATED),
            Err(e) => {
                warn!("DAV: mkcol {:?} failed: {}", path, e);
                status_response(StatusCode::METHOD_NOT_ALLOWED)
            }
        }
    }

    pub(crate) async fn handle_move(
        &self, path: &str, resource: &Resource, headers: &HeaderMap,
    ) -> Response<Body> {
        if resource.is_absent() {
            return not_found();
        }
        let dest = headers
            .get(DESTINATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| destination(&self.inner.prefix, v));
        let dest = match dest {
            Some(dest) => dest,
            None => return not_found(),
        };

        match self.inner.api.rename(path, &dest).await {
            Ok(()) => {
                debug!("DAV: moved {:?} to {:?}", path, dest);
                self.inner.locks.forget(path);
                let mut res = status_response(StatusCode::CREATED);
                res.headers_mut().insert(ALLOW, HeaderValue::from_static(ALLOW_CREATED));
                res
            }
            Err(e) => {
                warn!("DAV: move {:?} to {:?} failed: {}", path, dest, e);
                let mut res = Response::new(Body::from("Unable to move"));
                *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                res.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
                res
            }
        }
    }

    pub(crate) async fn handle_delete(&self, path: &str, resource: &Resource) -> Response<Body> {
        match self.remove_resource(path, resource).await {
            DeleteOutcome::Removed => {
                self.inner.locks.forget(path);
                let mut res = status_response(StatusCode::OK);
                res.headers_mut().insert(ALLOW, HeaderValue::from_static(ALLOW_CREATED));
                res
            }
            DeleteOutcome::NotFound => not_found(),
            DeleteOutcome::Failed(e) => {
                warn!("DAV: delete {:?} failed: {}", path, e);
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Files are removed, directories only when empty.
    async fn remove_resource(&self, path: &str, resource: &Resource) -> DeleteOutcome {
        let result = match resource {
            Resource::Absent => return DeleteOutcome::NotFound,
            Resource::File(_) => self.inner.api.remove(path).await,
            Resource::Dir(_) => self.inner.api.rmdir(path).await,
        };
        match result {
            Ok(()) => DeleteOutcome::Removed,
            Err(e) if e.kind() == ErrorKind::NotFound => DeleteOutcome::NotFound,
            Err(e) => DeleteOutcome::Failed(e),
        }
    }
}

fn insert_dav_headers(headers: &mut HeaderMap) {
    headers.insert(HeaderName::from_static("dav"), HeaderValue::from_static("1,2"));
    headers.insert(HeaderName::from_static("ms-author-via"), HeaderValue::from_static("DAV"));
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => warn!("DAV: dropping invalid {} header {:?}", name, value),
    }
}
