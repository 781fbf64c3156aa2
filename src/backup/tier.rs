//! Promotion of the daily archive into the weekly, monthly and yearly tiers.

use crate::backup::layout::{BackupLayout, Tier};
use chrono::{Datelike, NaiveDate, Weekday};
use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

static COPY_FILE_MODE: u32 = 0o644;

/// Tiers that also receive a copy of an archive taken on `date`.
///
/// Weeks start on Sunday. The checks are independent, so a Sunday that is
/// also January 1st lands in all three.
pub fn promotion_tiers(date: NaiveDate) -> Vec<Tier> {
    let mut tiers = Vec::new();
    if date.weekday() == Weekday::Sun {
        tiers.push(Tier::Weekly);
    }
    if date.day() == 1 {
        tiers.push(Tier::Monthly);
    }
    if date.ordinal() == 1 {
        tiers.push(Tier::Yearly);
    }
    tiers
}

/// Copies `archive` byte for byte into every tier due on `date`. Copy
/// failures are logged and skipped. Returns the copies that were made.
pub fn promote(layout: &BackupLayout, archive: &Path, date: NaiveDate) -> Vec<PathBuf> {
    let Some(file_name) = archive.file_name() else {
        warn!("Cannot promote {:?}: no file name", archive);
        return Vec::new();
    };

    promotion_tiers(date)
        .into_iter()
        .filter_map(|tier| {
            let dst = layout.tier_dir(tier).join(file_name);
            match copy_archive(archive, &dst) {
                Ok(()) => {
                    info!("Copied archive to {} tier: {:?}", tier, dst);
                    Some(dst)
                }
                Err(e) => {
                    warn!("Copy {:?} -> {:?} failed: {}", archive, dst, e);
                    None
                }
            }
        })
        .collect()
}

fn copy_archive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::copy(src, dst)?;
    std::fs::set_permissions(dst, Permissions::from_mode(COPY_FILE_MODE))
}
