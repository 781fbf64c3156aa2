//! Credential file with one block per remote target:
//!
//! ```text
//! # primary
//! FTP_HOST=ftp1.example.com
//! FTP_USER=backup
//! FTP_PASS=secret
//!
//! FTP_HOST=ftp2.example.com
//! ...
//! ```
//!
//! A new `FTP_HOST` line starts a new block. Blocks missing any of the three
//! keys are dropped.

use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::remote::RemoteTarget;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use std::path::Path;

#[derive(Default)]
struct Block {
    host: String,
    user: String,
    password: RedactedString,
}

impl Block {
    fn commit(&mut self, keep_factor: u32, targets: &mut Vec<RemoteTarget>) {
        let block = std::mem::take(self);
        if block.host.is_empty() || block.user.is_empty() || block.password.is_empty() {
            if !block.host.is_empty() {
                tracing::warn!("Ignoring incomplete credentials for {}", block.host);
            }
            return;
        }
        targets.push(
            RemoteTarget::builder()
                .host(block.host)
                .user(block.user)
                .password(block.password)
                .keep_factor(keep_factor)
                .build(),
        );
    }
}

/// Targets in file order, each carrying `keep_factor`.
pub fn parse_credentials(text: &str, keep_factor: u32) -> Vec<RemoteTarget> {
    let mut targets = Vec::new();
    let mut current = Block::default();

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "FTP_HOST" => {
                if !current.host.is_empty() {
                    current.commit(keep_factor, &mut targets);
                }
                current.host = value.to_string();
            }
            "FTP_USER" => current.user = value.to_string(),
            "FTP_PASS" => current.password = value.into(),
            other => tracing::trace!("Ignoring credential key {}", other),
        }
    }
    current.commit(keep_factor, &mut targets);
    targets
}

/// Parses `path`, or returns no targets when it does not exist.
#[named]
pub fn read_credentials_file<P: AsRef<Path>>(path: P, keep_factor: u32) -> Result<Vec<RemoteTarget>> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::debug!("No credential file at {:?}", path);
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)
        .map_err(Error::from)
        .add_msg(format!("Cannot read credential file {:?}", path))
        .add_fn_name(function_path!())?;
    Ok(parse_credentials(&text, keep_factor))
}
