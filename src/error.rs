// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

use std::io;

use thiserror::Error;

use crate::upload::UploadId;

/// Errors raised while serving a WebDAV request.
#[derive(Debug, Error)]
pub enum DavError {
    #[error("storage error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid request path: {0}")]
    BadPath(String),

    #[error("upload {id:?} expected offset {expected}, got {actual}")]
    UploadOffset {
        id: UploadId,
        expected: u64,
        actual: u64,
    },

    #[error("no open upload with id {0:?}")]
    UnknownUpload(UploadId),

    #[error("request body failed: {0}")]
    Body(String),
}

pub type DavResult<T> = Result<T, DavError>;
