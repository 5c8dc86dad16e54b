// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Handler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavConfig {
    /// URL path the storage root is mounted at.
    pub prefix: String,

    /// Honor `Depth: infinity` with a full recursive listing. When off, such
    /// requests list one level like `Depth: 1`.
    pub infinite_depth: bool,

    /// Size of the pieces a GET body is read in.
    pub read_chunk_size: usize,

    /// Lifetime advertised for (and applied to) issued lock tokens.
    pub lock_timeout: Duration,
}

impl Default for DavConfig {
    fn default() -> Self {
        Self {
            prefix: "/".to_string(),
            infinite_depth: false,
            read_chunk_size: 64 * 1024,
            lock_timeout: Duration::from_secs(3600),
        }
    }
}

impl DavConfig {
    /// Reads `WEBDAV_PREFIX`, `WEBDAV_INFINITE_DEPTH`, `WEBDAV_READ_CHUNK` and
    /// `WEBDAV_LOCK_TIMEOUT` (seconds), keeping defaults for unset or
    /// unparsable values.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(prefix) = env::var("WEBDAV_PREFIX") {
            config.prefix = prefix;
        }
        if let Some(flag) = parse_var::<bool>("WEBDAV_INFINITE_DEPTH") {
            config.infinite_depth = flag;
        }
        if let Some(size) = parse_var::<usize>("WEBDAV_READ_CHUNK").filter(|&s| s > 0) {
            config.read_chunk_size = size;
        }
        if let Some(secs) = parse_var::<u64>("WEBDAV_LOCK_TIMEOUT") {
            config.lock_timeout = Duration::from_secs(secs);
        }
        config
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring invalid {}={:?}", name, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DavConfig::default();
        assert_eq!(config.prefix, "/");
        assert!(!config.infinite_depth);
        assert_eq!(config.read_chunk_size, 65536);
        assert_eq!(config.lock_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn reads_environment() {
        env::set_var("WEBDAV_PREFIX", "/drive");
        env::set_var("WEBDAV_INFINITE_DEPTH", "true");
        env::set_var("WEBDAV_READ_CHUNK", "zero");
        env::set_var("WEBDAV_LOCK_TIMEOUT", " 90 ");
        let config = DavConfig::from_env();
        env::remove_var("WEBDAV_PREFIX");
        env::remove_var("WEBDAV_INFINITE_DEPTH");
        env::remove_var("WEBDAV_READ_CHUNK");
        env::remove_var("WEBDAV_LOCK_TIMEOUT");

        assert_eq!(config.prefix, "/drive");
        assert!(config.infinite_depth);
        assert_eq!(config.read_chunk_size, 65536);
        assert_eq!(config.lock_timeout, Duration::from_secs(90));
    }
}
