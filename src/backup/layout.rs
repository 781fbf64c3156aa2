//! On-disk layout of the backup tree and archive file naming.
//!
//! ```text
//! <backup-root>/<hostname>/<product>/cluster/{daily,weekly,monthly,yearly}/
//!     YYYY-MM-DD_HH-MM-SS_cluster.tar.gz
//! ```

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use derive_more::Display;
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

pub static PRODUCT_DIR: &str = "postgresql-backup";
pub static CLUSTER_DIR: &str = "cluster";
pub static ARCHIVE_SUFFIX: &str = "_cluster.tar.gz";
pub static TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
static DIR_MODE: u32 = 0o755;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    #[display("daily")]
    Daily,
    #[display("weekly")]
    Weekly,
    #[display("monthly")]
    Monthly,
    #[display("yearly")]
    Yearly,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Daily, Tier::Weekly, Tier::Monthly, Tier::Yearly];
}

#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct BackupLayout {
    root: PathBuf,
    cluster_dir: PathBuf,
}

impl BackupLayout {
    pub fn new<P: Into<PathBuf>>(root: P, hostname: &str, product: &str) -> Self {
        let root = root.into();
        let cluster_dir = root.join(hostname).join(product).join(CLUSTER_DIR);
        Self { root, cluster_dir }
    }

    pub fn tier_dir(&self, tier: Tier) -> PathBuf {
        self.cluster_dir.join(tier.to_string())
    }

    pub fn daily_archive_path(&self, dt: DateTime<Local>) -> PathBuf {
        self.tier_dir(Tier::Daily).join(archive_file_name(dt))
    }

    /// Creates every tier directory (mode 0755), including missing parents.
    #[named]
    pub fn create_all(&self) -> Result<()> {
        let mut builder = DirBuilder::new();
        builder.recursive(true).mode(DIR_MODE);
        for tier in Tier::ALL {
            let dir = self.tier_dir(tier);
            builder
                .create(&dir)
                .map_err(Error::from)
                .add_msg(format!("mkdir {:?}", dir))
                .add_fn_name(function_path!())?;
        }
        Ok(())
    }

    /// Path of `path` relative to the backup root, as mirrored on remote targets.
    pub fn relative_to_root<'a>(&self, path: &'a Path) -> Result<&'a Path> {
        path.strip_prefix(&self.root).map_err(|_| {
            Error::InvalidConfig(format!(
                "{:?} is not inside backup root {:?}",
                path, self.root
            ))
        })
    }
}

pub fn archive_file_name(dt: DateTime<Local>) -> String {
    format!("{}{}", dt.format(TIME_FORMAT), ARCHIVE_SUFFIX)
}

/// Start time encoded in an archive file name, `None` when the name does not
/// follow the archive naming pattern.
pub fn parse_archive_time(file_name: &str) -> Option<DateTime<Utc>> {
    let time_string = file_name.strip_suffix(ARCHIVE_SUFFIX)?;
    let naive = NaiveDateTime::parse_from_str(time_string, TIME_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.to_utc())
}

pub fn is_archive_name(file_name: &str) -> bool {
    parse_archive_time(file_name).is_some()
}

/// File names in `dir`, sorted.
#[named]
pub fn list_file_names<P: AsRef<Path>>(dir: P) -> Result<Vec<String>> {
    let dir = dir.as_ref();
    let names = std::fs::read_dir(dir)
        .map_err(Error::from)
        .add_msg(format!("Cannot open {:?}", dir))
        .add_fn_name(function_path!())?
        .filter_map(|r| r.ok())
        .map(|de| de.file_name().to_string_lossy().into_owned())
        .sorted()
        .collect();
    Ok(names)
}
