//! One backup run: layout, bracketed archive, tiers, local retention and
//! replication, in that order.

use crate::backup::archive::{ArchiveSummary, Archiver};
use crate::backup::backup_config::BackupConfig;
use crate::backup::function_path;
use crate::backup::layout::Tier;
use crate::backup::remote::replication::{ReplicationManager, TargetOutcome};
use crate::backup::remote::RemoteConnector;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use crate::backup::retention::{enforce, LocalArchiveDir, RetentionReport};
use crate::backup::session::{run_bracketed, HotBackupSource};
use crate::backup::tier::promote;
use chrono::{DateTime, Local};
use function_name::named;
use getset::Getters;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct RunReport {
    pub start_lsn: String,
    pub data_directory: PathBuf,
    /// `None` when archiving failed; nothing after it ran.
    pub archive: Option<ArchiveSummary>,
    /// Whether the source confirmed the end of backup mode.
    pub stopped: bool,
    pub tier_copies: Vec<PathBuf>,
    pub retention: Option<RetentionReport>,
    pub replication: Vec<TargetOutcome>,
}

#[derive(Clone, Debug, Getters)]
#[getset(get = "pub")]
pub struct BackupRunner {
    config: Arc<BackupConfig>,
}

impl BackupRunner {
    pub fn new(config: Arc<BackupConfig>) -> Self {
        Self { config }
    }

    /// Runs the pipeline once with `now` as the backup time.
    ///
    /// Returns `Err` only for conditions that must abort the run: the local
    /// tree cannot be created, the backup cannot begin or the data directory
    /// is unknown. Everything after the backup has begun is logged and
    /// reported in the [`RunReport`].
    #[named]
    pub fn run<S: HotBackupSource, C: RemoteConnector>(
        &self,
        source: &mut S,
        connector: &C,
        now: DateTime<Local>,
    ) -> Result<RunReport> {
        let layout = self.config.layout();
        layout.create_all().add_fn_name(function_path!())?;

        let archive_path = layout.daily_archive_path(now);
        let archiver = Archiver::builder()
            .compressor(self.config.compression())
            .build();
        let outcome = run_bracketed(source, |data_directory| {
            archiver.archive(data_directory, &archive_path)
        })
        .add_fn_name(function_path!())?;
        if !outcome.stopped {
            error!("Source did not confirm the end of the backup, check it manually");
        }

        let mut report = RunReport {
            start_lsn: outcome.start_lsn,
            data_directory: outcome.data_directory,
            archive: None,
            stopped: outcome.stopped,
            tier_copies: Vec::new(),
            retention: None,
            replication: Vec::new(),
        };

        let summary = match outcome.archive {
            Ok(summary) => summary,
            Err(e) => {
                error!("Archiving failed, skipping tiers and replication: {}", e);
                return Ok(report);
            }
        };
        info!(
            "Archive ready: {:?} ({:.2} MB)",
            summary.path(),
            summary.size_mb()
        );

        report.tier_copies = promote(&layout, summary.path(), now.date_naive());

        let policy = self.config.retention_policy();
        let mut daily = LocalArchiveDir::new(layout.tier_dir(Tier::Daily));
        report.retention = match enforce(&mut daily, policy, now.to_utc()) {
            Ok(retention) => Some(retention),
            Err(e) => {
                warn!("Local retention failed: {}", e);
                None
            }
        };

        let targets = self.config.remote_targets();
        if targets.is_empty() {
            tracing::debug!("No remote targets configured");
        } else {
            match layout.relative_to_root(summary.path()) {
                Ok(relative) => {
                    let manager = ReplicationManager::builder()
                        .remote_root(self.config.remote_root().clone())
                        .policy(policy)
                        .build();
                    report.replication = manager.replicate(
                        connector,
                        summary.path(),
                        relative,
                        targets,
                        now.to_utc(),
                    );
                }
                Err(e) => warn!("Skipping replication: {}", e),
            }
        }

        report.archive = Some(summary);
        Ok(report)
    }
}
