// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Serves a local directory over WebDAV.
//!
//! ```text
//! WEBDAV_PREFIX=/drive cargo run --example serve -- ./share 127.0.0.1:4918
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;

use drive_webdav::api::LocalApi;
use drive_webdav::{DavConfig, DavHandler};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let root = args.next().unwrap_or_else(|| ".".to_string());
    let addr: SocketAddr = args.next().unwrap_or_else(|| "127.0.0.1:4918".to_string()).parse()?;

    let config = DavConfig::from_env();
    let dav = DavHandler::builder(LocalApi::new(&root)?).config(config).build_handler();
    log::info!("listening on http://{}{}/", addr, dav.prefix());

    let make_service = make_service_fn(move |_| {
        let dav = dav.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let dav = dav.clone();
                async move {
                    if !dav.can_handle(req.method(), req.uri().path()) {
                        let mut res = Response::new(Body::empty());
                        *res.status_mut() = StatusCode::NOT_FOUND;
                        return Ok::<_, Infallible>(res);
                    }
                    Ok(dav.handle(req).await)
                }
            }))
        }
    });

    Server::bind(&addr).serve(make_service).await?;
    Ok(())
}
