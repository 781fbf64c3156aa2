//! Hot backup bracketing.
//!
//! A [`BackupSession`] puts the source into backup mode, discovers its data
//! directory, lets the caller copy it and then takes the source out of backup
//! mode again. Every step is expressed as a [`Capability`]: the source lists
//! candidate calls for it, preferred first, and the session tries them in
//! order until one succeeds. That is how newer and older server versions are
//! supported without looking at version strings.

pub mod postgres;

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use derive_more::Display;
use function_name::named;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Capability {
    #[display("begin hot backup")]
    BeginBackup,
    #[display("retrieve data directory")]
    DataDirectory,
    #[display("end hot backup")]
    EndBackup,
}

/// One way of performing a [`Capability`] on the source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceCall {
    pub name: &'static str,
    pub statement: &'static str,
}

pub trait HotBackupSource {
    /// Candidate calls for `capability`, preferred first.
    fn candidates(&self, capability: Capability) -> &'static [SourceCall];

    /// Runs `call`, returning the first value it produced as text.
    fn invoke(&mut self, call: &SourceCall) -> Result<Option<String>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Started,
    Archived,
    Stopped,
    /// Every end-backup candidate failed.
    Failed,
}

pub struct BackupSession<'a, S: HotBackupSource> {
    source: &'a mut S,
    state: SessionState,
    start_lsn: Option<String>,
    data_directory: Option<PathBuf>,
}

/// Result of a bracketed backup whose start succeeded.
#[derive(Debug)]
pub struct BracketOutcome<T> {
    pub start_lsn: String,
    pub data_directory: PathBuf,
    pub archive: Result<T>,
    pub stopped: bool,
}

impl<'a, S: HotBackupSource> BackupSession<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        Self {
            source,
            state: SessionState::Idle,
            start_lsn: None,
            data_directory: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn start_lsn(&self) -> Option<&str> {
        self.start_lsn.as_deref()
    }

    pub fn data_directory(&self) -> Option<&Path> {
        self.data_directory.as_deref()
    }

    /// Idle -> Started. Returns the start LSN reported by the source.
    #[named]
    pub fn start(&mut self) -> Result<String> {
        self.expect_state(&[SessionState::Idle], "start")?;
        let (_, lsn) = invoke_first_success(self.source, Capability::BeginBackup)
            .add_fn_name(function_path!())?;
        let lsn = lsn.unwrap_or_default();
        info!("Backup started at LSN {}", lsn);
        self.state = SessionState::Started;
        self.start_lsn = Some(lsn.clone());
        Ok(lsn)
    }

    #[named]
    pub fn discover_data_directory(&mut self) -> Result<PathBuf> {
        self.expect_state(&[SessionState::Started], "discover data directory")?;
        let (_, dir) = invoke_first_success(self.source, Capability::DataDirectory)
            .add_fn_name(function_path!())?;
        let dir = dir
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| Error::InvalidConfig("source reported no data directory".into()))
            .add_msg("Cannot determine data_directory")?;
        info!("Data directory: {:?}", dir);
        self.data_directory = Some(dir.clone());
        Ok(dir)
    }

    pub fn mark_archived(&mut self) -> Result<()> {
        self.expect_state(&[SessionState::Started], "mark archived")?;
        self.state = SessionState::Archived;
        Ok(())
    }

    /// Takes the source out of backup mode. Never fails: if no end-backup
    /// candidate succeeds the session ends in [`SessionState::Failed`] and
    /// the failure is logged. Returns whether the source confirmed the stop.
    pub fn stop(&mut self) -> bool {
        if !matches!(self.state, SessionState::Started | SessionState::Archived) {
            warn!("Ignoring stop request in state {:?}", self.state);
            return self.state == SessionState::Stopped;
        }

        match invoke_first_success(self.source, Capability::EndBackup) {
            Ok((call, _)) => {
                info!("Backup finished ({})", call.name);
                self.state = SessionState::Stopped;
                true
            }
            Err(e) => {
                error!(
                    "CANNOT STOP HOT BACKUP, the server may keep WAL until the backup is ended manually: {}",
                    e
                );
                self.state = SessionState::Failed;
                false
            }
        }
    }

    fn expect_state(&self, allowed: &[SessionState], action: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidSessionState(format!(
                "cannot {} in state {:?}",
                action, self.state
            )))
        }
    }
}

impl<S: HotBackupSource> Drop for BackupSession<'_, S> {
    fn drop(&mut self) {
        if matches!(self.state, SessionState::Started | SessionState::Archived) {
            warn!("Backup session dropped while the source is in backup mode, stopping");
            self.stop();
        }
    }
}

/// Brackets `archive` with begin/end hot backup calls.
///
/// Failing to begin the backup or to find the data directory is returned as
/// `Err`. Once the backup has begun the end call is always attempted, whatever
/// `archive` returns; its result is handed back in [`BracketOutcome::archive`].
pub fn run_bracketed<S, T, F>(source: &mut S, archive: F) -> Result<BracketOutcome<T>>
where
    S: HotBackupSource,
    F: FnOnce(&Path) -> Result<T>,
{
    let mut session = BackupSession::new(source);
    let start_lsn = session.start()?;
    let data_directory = match session.discover_data_directory() {
        Ok(dir) => dir,
        Err(e) => {
            session.stop();
            return Err(e);
        }
    };

    let archive = archive(&data_directory);
    if archive.is_ok() {
        session.mark_archived()?;
    }
    let stopped = session.stop();

    Ok(BracketOutcome {
        start_lsn,
        data_directory,
        archive,
        stopped,
    })
}

fn invoke_first_success<S: HotBackupSource + ?Sized>(
    source: &mut S,
    capability: Capability,
) -> Result<(&'static SourceCall, Option<String>)> {
    let mut errors = Vec::new();
    for call in source.candidates(capability) {
        match source.invoke(call) {
            Ok(value) => return Ok((call, value)),
            Err(e) => {
                warn!("{} via {} failed: {}", capability, call.name, e);
                errors.push(e.add_msg(call.name));
            }
        }
    }
    Err(Error::AllCandidatesFailed {
        operation: capability.to_string(),
        errors,
    })
}
