//! Single-instance guard backed by a lock file holding the owner's PID.

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use getset::Getters;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub static DEFAULT_LOCK_FILE: &str = "/tmp/postgresql_backup.lock";

/// Held lock file; removed on `release` or drop.
#[derive(Debug, Getters)]
#[getset(get = "pub")]
pub struct LockGuard {
    path: PathBuf,
    #[getset(skip)]
    released: bool,
}

impl LockGuard {
    /// Takes the lock, reclaiming it once if the recorded owner is gone.
    ///
    /// Fails with [`Error::LockHeld`] when another live process owns it.
    #[named]
    pub fn acquire<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        match try_create(&path) {
            Ok(()) => return Ok(Self::new(path)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(Error::from(e)
                    .add_msg(format!("Cannot create lock file {:?}", path))
                    .add_fn_name(function_path!()))
            }
        }

        if let Some(pid) = read_owner(&path) {
            if is_process_alive(pid) {
                return Err(Error::LockHeld { pid, path });
            }
            warn!("Reclaiming stale lock {:?} left by PID {}", path, pid);
        } else {
            warn!("Reclaiming unreadable lock {:?}", path);
        }

        remove_lock_file(&path);
        try_create(&path)
            .map_err(Error::from)
            .add_msg(format!("Cannot create lock file {:?}", path))
            .add_fn_name(function_path!())?;
        Ok(Self::new(path))
    }

    fn new(path: PathBuf) -> Self {
        tracing::debug!("Acquired lock {:?}", path);
        Self {
            path,
            released: false,
        }
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            remove_lock_file(&self.path);
            self.released = true;
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn try_create(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(std::process::id().to_string().as_bytes())
}

/// PID recorded in the lock file, `None` when missing or not a positive number.
pub fn read_owner<P: AsRef<Path>>(path: P) -> Option<i32> {
    std::fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|pid| *pid > 0)
}

/// Liveness check via signal 0. EPERM means the process exists under another user.
pub fn is_process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

pub fn remove_lock_file<P: AsRef<Path>>(path: P) {
    let path = path.as_ref();
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!("Cannot remove lock file {:?}: {}", path, e);
        }
    }
}

/// Removes the lock and exits on SIGINT/SIGTERM.
///
/// Whatever is in flight (a partially written archive, a partial upload) is
/// left as is.
pub fn release_on_signal<P: Into<PathBuf>>(path: P) -> Result<()> {
    let path = path.into();
    ctrlc::set_handler(move || {
        error!("Termination signal received, releasing lock {:?} and exiting", path);
        remove_lock_file(&path);
        std::process::exit(1);
    })?;
    info!("Installed SIGINT/SIGTERM handler");
    Ok(())
}
