use crate::backup::layout::Tier;
use crate::backup::remote::{
    parent_dirs, remote_path, RemoteArchiveDir, RemoteConnector, RemoteSession, RemoteTarget,
};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::retention::{enforce, RetentionPolicy, RetentionReport};
use bon::Builder;
use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, PartialEq, Eq)]
pub struct UploadReport {
    pub remote_path: String,
    pub bytes: u64,
    /// `None` when the upload was not into a daily tier or retention could
    /// not list the remote directory.
    pub retention: Option<RetentionReport>,
}

#[derive(Debug)]
pub struct TargetOutcome {
    pub host: String,
    pub result: Result<UploadReport>,
}

/// Mirrors archives to every remote target, one target at a time.
#[derive(Clone, Debug, Builder, Getters, CopyGetters)]
pub struct ReplicationManager {
    #[builder(into, default = "/".to_string())]
    #[getset(get = "pub")]
    remote_root: String,
    /// Local daily policy; each target amplifies it by its keep factor.
    #[getset(get_copy = "pub")]
    policy: RetentionPolicy,
}

impl ReplicationManager {
    /// Uploads `archive` to `relative` (its path under the backup root) on
    /// every target in order. A failing target is logged and never stops
    /// the ones after it.
    pub fn replicate<C: RemoteConnector>(
        &self,
        connector: &C,
        archive: &Path,
        relative: &Path,
        targets: &[RemoteTarget],
        now: DateTime<Utc>,
    ) -> Vec<TargetOutcome> {
        let destination = remote_path(&self.remote_root, relative);
        let in_daily = relative
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|dir| dir.to_string_lossy() == Tier::Daily.to_string());

        targets
            .iter()
            .map(|target| {
                let result =
                    self.replicate_to(connector, target, archive, &destination, in_daily, now);
                match &result {
                    Ok(report) => info!(
                        "Uploaded {} bytes to {}:{}",
                        report.bytes,
                        target.host(),
                        report.remote_path
                    ),
                    Err(e) => warn!("Replication to {} failed: {}", target.host(), e),
                }
                TargetOutcome {
                    host: target.host().clone(),
                    result,
                }
            })
            .collect()
    }

    fn replicate_to<C: RemoteConnector>(
        &self,
        connector: &C,
        target: &RemoteTarget,
        archive: &Path,
        destination: &str,
        in_daily: bool,
        now: DateTime<Utc>,
    ) -> Result<UploadReport> {
        let mut session = connector
            .connect(target)
            .add_msg(format!("Cannot open session to {}", target.host()))?;
        let result = self.push(&mut session, target, archive, destination, in_daily, now);
        if let Err(e) = session.close() {
            debug!("Closing session to {} failed: {}", target.host(), e);
        }
        result
    }

    fn push<S: RemoteSession>(
        &self,
        session: &mut S,
        target: &RemoteTarget,
        archive: &Path,
        destination: &str,
        in_daily: bool,
        now: DateTime<Utc>,
    ) -> Result<UploadReport> {
        for dir in parent_dirs(destination) {
            if let Err(e) = session.make_dir(&dir) {
                debug!("mkdir {} on {}: {}", dir, target.host(), e);
            }
        }

        let mut file = File::open(archive)
            .map_err(Error::from)
            .add_msg(format!("Cannot open {:?}", archive))?;
        info!("Uploading to {}: {}", target.host(), destination);
        let bytes = session
            .upload(destination, &mut file)
            .add_msg(format!("Upload of {} failed", destination))?;

        let retention = match destination.rsplit_once('/') {
            Some((dir, _)) if in_daily => {
                let policy = self.policy.amplified(target.keep_factor());
                debug!("Remote retention on {}:{} is {:?}", target.host(), dir, policy);
                let mut store = RemoteArchiveDir::new(session, target.host().clone(), dir);
                match enforce(&mut store, policy, now) {
                    Ok(report) => Some(report),
                    Err(e) => {
                        warn!("Remote retention on {} failed: {}", target.host(), e);
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(UploadReport {
            remote_path: destination.to_string(),
            bytes,
            retention,
        })
    }
}
