//! Remote mirrors of the backup tree.

pub mod conf;
pub mod ftp;
pub mod replication;

use crate::backup::layout::parse_archive_time;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::result::Result;
use crate::backup::retention::{ArchiveStore, ItemWithDateTime};
use bon::Builder;
use getset::{CopyGetters, Getters};
use std::io::Read;
use std::path::{Component, Path};
use validator::Validate;

pub static DEFAULT_KEEP_FACTOR: u32 = 4;

/// One remote destination. Remote retention is the local one multiplied by
/// `keep_factor`.
#[derive(Clone, Debug, PartialEq, Eq, Builder, Getters, CopyGetters, Validate)]
pub struct RemoteTarget {
    #[builder(into)]
    #[validate(length(min = 1))]
    #[getset(get = "pub")]
    host: String,
    #[builder(into, default)]
    #[getset(get = "pub")]
    user: String,
    #[builder(into, default)]
    #[getset(get = "pub")]
    password: RedactedString,
    #[builder(default = DEFAULT_KEEP_FACTOR)]
    #[validate(range(min = 1))]
    #[getset(get_copy = "pub")]
    keep_factor: u32,
}

/// An authenticated connection to a remote target. Paths are absolute and
/// `/`-separated.
pub trait RemoteSession {
    fn make_dir(&mut self, path: &str) -> Result<()>;

    /// Stores everything `reader` yields at `path`, returning the byte count.
    fn upload(&mut self, path: &str, reader: &mut dyn Read) -> Result<u64>;

    /// Entries of `dir`. Servers may answer with bare names or full paths.
    fn list_names(&mut self, dir: &str) -> Result<Vec<String>>;

    fn delete(&mut self, path: &str) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

pub trait RemoteConnector {
    type Session: RemoteSession;

    /// Connects and authenticates.
    fn connect(&self, target: &RemoteTarget) -> Result<Self::Session>;
}

/// `relative` placed under `remote_root`, `/`-separated.
pub fn remote_path(remote_root: &str, relative: &Path) -> String {
    let mut path = remote_root.trim_end_matches('/').to_string();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            path.push('/');
            path.push_str(&part.to_string_lossy());
        }
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

/// Every directory leading to `path`, outermost first, excluding `/` and
/// `path` itself.
pub fn parent_dirs(path: &str) -> Vec<String> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    (1..parts.len())
        .map(|n| format!("/{}", parts[..n].join("/")))
        .collect()
}

fn base_name(entry: &str) -> &str {
    entry.rsplit('/').next().unwrap_or(entry)
}

/// A remote directory seen through an open session. Archive timestamps come
/// from the file names.
pub struct RemoteArchiveDir<'a, S: RemoteSession> {
    session: &'a mut S,
    host: String,
    dir: String,
}

impl<'a, S: RemoteSession> RemoteArchiveDir<'a, S> {
    pub fn new<H: Into<String>, D: Into<String>>(session: &'a mut S, host: H, dir: D) -> Self {
        Self {
            session,
            host: host.into(),
            dir: dir.into(),
        }
    }
}

impl<S: RemoteSession> ArchiveStore for RemoteArchiveDir<'_, S> {
    fn location(&self) -> String {
        format!("{}:{}", self.host, self.dir)
    }

    fn list_archives(&mut self) -> Result<Vec<ItemWithDateTime<String>>> {
        Ok(self
            .session
            .list_names(&self.dir)?
            .iter()
            .map(|entry| base_name(entry))
            .filter_map(|name| {
                let time = parse_archive_time(name)?;
                Some(ItemWithDateTime::from((name.to_string(), time)))
            })
            .collect())
    }

    fn delete_archive(&mut self, name: &str) -> Result<()> {
        let path = format!("{}/{}", self.dir.trim_end_matches('/'), name);
        self.session.delete(&path)
    }
}
