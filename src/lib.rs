// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! A WebDAV handler that maps a mount prefix of the URL space onto a storage
//! tree, enough for Explorer, Finder, cadaver or rclone to browse, read,
//! write, lock and rearrange files.

#[macro_use]
extern crate log;

pub use hyper::Body;

pub use crate::config::DavConfig;
pub use crate::error::{DavError, DavResult};
pub use crate::handler::{DavBuilder, DavHandler, Dispatched};
pub use crate::method::DavMethod;
pub use crate::resource::{Depth, Resource};
pub use crate::upload::UploadId;

pub mod api;
pub mod path;

mod config;
mod error;
mod handler;
mod locks;
mod method;
mod ops;
mod resource;
mod upload;
mod xml;

/// Creates a WebDAV handler serving `api` under `prefix`.
pub fn make_server(prefix: &str, api: Box<dyn api::StorageApi>) -> DavHandler {
    DavHandler::builder(api).prefix(prefix).build_handler()
}
