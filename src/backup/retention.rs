use crate::backup::function_path;
use crate::backup::layout::is_archive_name;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use chrono::{DateTime, Duration, Utc};
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use std::cmp::Reverse;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Which daily archives survive a rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep the newest `n` archives.
    CountBased(usize),
    /// Delete archives older than this many days. `0` keeps everything.
    AgeBased(u32),
}

impl RetentionPolicy {
    /// A nonzero copy count wins over the day count.
    pub fn from_settings(max_copies: u32, keep_days: u32) -> Self {
        if max_copies > 0 {
            Self::CountBased(max_copies as usize)
        } else {
            Self::AgeBased(keep_days)
        }
    }

    /// The same kind of policy with its quantity multiplied by `factor`.
    pub fn amplified(self, factor: u32) -> Self {
        match self {
            Self::CountBased(n) => Self::CountBased(n.saturating_mul(factor as usize)),
            Self::AgeBased(days) => Self::AgeBased(days.saturating_mul(factor)),
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Self::AgeBased(0))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemWithDateTime<R> {
    pub item: R,
    pub date_time: DateTime<Utc>,
}

impl<R> From<(R, DateTime<Utc>)> for ItemWithDateTime<R> {
    fn from(value: (R, DateTime<Utc>)) -> Self {
        Self {
            item: value.0,
            date_time: value.1,
        }
    }
}

/// Items `policy` removes. Under [`RetentionPolicy::CountBased`] everything
/// but the newest `n` goes; under [`RetentionPolicy::AgeBased`] everything
/// strictly older than `now - days`, or nothing when that date is out of
/// range.
pub fn select_for_deletion<R>(
    items: Vec<ItemWithDateTime<R>>,
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<ItemWithDateTime<R>> {
    match policy {
        RetentionPolicy::CountBased(n) => {
            if items.len() <= n {
                return Vec::new();
            }
            items
                .into_iter()
                .sorted_by_key(|i| Reverse(i.date_time))
                .skip(n)
                .collect()
        }
        RetentionPolicy::AgeBased(0) => Vec::new(),
        RetentionPolicy::AgeBased(days) => {
            let Some(cutoff) =
                Duration::try_days(days as i64).and_then(|age| now.checked_sub_signed(age))
            else {
                debug!("Cutoff of {} days is out of range, keeping everything", days);
                return Vec::new();
            };
            items
                .into_iter()
                .filter(|i| i.date_time < cutoff)
                .collect()
        }
    }
}

/// A flat directory of archives, local or remote.
pub trait ArchiveStore {
    /// Human readable location for log lines.
    fn location(&self) -> String;

    /// Every file named like an archive, with its timestamp.
    fn list_archives(&mut self) -> Result<Vec<ItemWithDateTime<String>>>;

    fn delete_archive(&mut self, name: &str) -> Result<()>;
}

/// Local directory; timestamps are file modification times.
#[derive(Clone, Debug, Getters)]
#[getset(get = "pub")]
pub struct LocalArchiveDir {
    dir: PathBuf,
}

impl LocalArchiveDir {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }
}

impl ArchiveStore for LocalArchiveDir {
    fn location(&self) -> String {
        format!("{:?}", self.dir)
    }

    #[named]
    fn list_archives(&mut self) -> Result<Vec<ItemWithDateTime<String>>> {
        let mut archives = Vec::new();
        let read_dir = std::fs::read_dir(&self.dir)
            .map_err(Error::from)
            .add_msg(format!("Cannot list {:?}", self.dir))
            .add_fn_name(function_path!())?;
        for entry in read_dir {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_archive_name(&name) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = metadata.modified()?.into();
            archives.push(ItemWithDateTime::from((name, modified)));
        }
        Ok(archives)
    }

    fn delete_archive(&mut self, name: &str) -> Result<()> {
        std::fs::remove_file(self.dir.join(name))?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Applies `policy` to `store`. Listing errors are returned; a failed delete
/// is logged and the remaining candidates are still processed.
#[named]
pub fn enforce<S: ArchiveStore + ?Sized>(
    store: &mut S,
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<RetentionReport> {
    let mut report = RetentionReport::default();
    if policy.is_noop() {
        tracing::debug!("Retention disabled for {}", store.location());
        return Ok(report);
    }

    let candidates = store.list_archives().add_fn_name(function_path!())?;
    for doomed in select_for_deletion(candidates, policy, now) {
        match store.delete_archive(&doomed.item) {
            Ok(()) => {
                info!(
                    "Deleted out of retention archive {} in {}",
                    doomed.item,
                    store.location()
                );
                report.deleted.push(doomed.item);
            }
            Err(e) => {
                warn!(
                    "Cannot delete {} in {}: {}",
                    doomed.item,
                    store.location(),
                    e
                );
                report.failed.push(doomed.item);
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backup::layout::archive_file_name;
    use chrono::{Local, TimeZone};
    use std::collections::{BTreeMap, HashSet};
    use std::fs::{File, FileTimes};
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn items(ages_in_hours: &[i64]) -> Vec<ItemWithDateTime<i64>> {
        ages_in_hours
            .iter()
            .map(|h| ItemWithDateTime::from((*h, now() - Duration::hours(*h))))
            .collect()
    }

    fn deleted_ids(deleted: Vec<ItemWithDateTime<i64>>) -> Vec<i64> {
        deleted.into_iter().map(|i| i.item).sorted().collect()
    }

    /// In-memory store with names as timestamps; can refuse chosen deletes.
    pub(crate) struct MemoryStore {
        pub files: BTreeMap<String, DateTime<Utc>>,
        pub undeletable: HashSet<String>,
    }

    impl ArchiveStore for MemoryStore {
        fn location(&self) -> String {
            "memory".to_string()
        }

        fn list_archives(&mut self) -> Result<Vec<ItemWithDateTime<String>>> {
            Ok(self
                .files
                .iter()
                .map(|(n, t)| ItemWithDateTime::from((n.clone(), *t)))
                .collect())
        }

        fn delete_archive(&mut self, name: &str) -> Result<()> {
            if self.undeletable.contains(name) {
                return Err(std::io::Error::other("permission denied").into());
            }
            self.files.remove(name);
            Ok(())
        }
    }

    #[test]
    fn test_from_settings_precedence() {
        assert_eq!(
            RetentionPolicy::from_settings(3, 30),
            RetentionPolicy::CountBased(3)
        );
        assert_eq!(
            RetentionPolicy::from_settings(0, 30),
            RetentionPolicy::AgeBased(30)
        );
        assert!(RetentionPolicy::from_settings(0, 0).is_noop());
    }

    #[test]
    fn test_amplified() {
        assert_eq!(
            RetentionPolicy::CountBased(1).amplified(4),
            RetentionPolicy::CountBased(4)
        );
        assert_eq!(
            RetentionPolicy::AgeBased(30).amplified(4),
            RetentionPolicy::AgeBased(120)
        );
        assert_eq!(
            RetentionPolicy::CountBased(7).amplified(2),
            RetentionPolicy::CountBased(14)
        );
        assert!(RetentionPolicy::AgeBased(0).amplified(4).is_noop());
    }

    #[test]
    fn test_count_keeps_newest() {
        let deleted = select_for_deletion(
            items(&[5, 1, 72, 24, 48]),
            RetentionPolicy::CountBased(2),
            now(),
        );
        assert_eq!(deleted_ids(deleted), vec![24, 48, 72]);
    }

    #[test]
    fn test_count_leaves_min_n_candidates() {
        for n in 0..7usize {
            let all = items(&[1, 2, 3, 4, 5]);
            let deleted = select_for_deletion(all, RetentionPolicy::CountBased(n), now());
            assert_eq!(5 - deleted.len(), n.min(5));
        }
    }

    #[test]
    fn test_age_cutoff_is_exclusive() {
        let at_cutoff = ItemWithDateTime::from((0, now() - Duration::days(7)));
        let just_older = ItemWithDateTime::from((1, now() - Duration::days(7) - Duration::seconds(1)));
        let newer = ItemWithDateTime::from((2, now() - Duration::days(6)));

        let deleted = select_for_deletion(
            vec![at_cutoff, just_older, newer],
            RetentionPolicy::AgeBased(7),
            now(),
        );
        assert_eq!(deleted_ids(deleted), vec![1]);
    }

    #[test]
    fn test_age_zero_deletes_nothing() {
        let deleted = select_for_deletion(
            items(&[1, 10_000, 100_000]),
            RetentionPolicy::AgeBased(0),
            now(),
        );
        assert!(deleted.is_empty());
    }

    #[test]
    fn test_age_beyond_calendar_deletes_nothing() {
        let policy = RetentionPolicy::AgeBased(30).amplified(4_000_000);
        let deleted = select_for_deletion(items(&[1, 10_000, 100_000]), policy, now());
        assert!(deleted.is_empty());

        let mut store = MemoryStore {
            files: (1..=3)
                .map(|d| (format!("f{d}"), now() - Duration::days(d * 1000)))
                .collect(),
            undeletable: HashSet::new(),
        };
        let report = enforce(&mut store, policy, now()).unwrap();
        assert_eq!(report, RetentionReport::default());
        assert_eq!(store.files.len(), 3);

        let widest = RetentionPolicy::AgeBased(u32::MAX);
        assert!(select_for_deletion(items(&[1]), widest, now()).is_empty());
    }

    #[test]
    fn test_enforce_is_idempotent() {
        let mut store = MemoryStore {
            files: (1..=5)
                .map(|d| (format!("f{d}"), now() - Duration::days(d)))
                .collect(),
            undeletable: HashSet::new(),
        };

        let first = enforce(&mut store, RetentionPolicy::CountBased(2), now()).unwrap();
        assert_eq!(first.deleted.len(), 3);
        assert_eq!(
            store.files.keys().cloned().collect::<Vec<_>>(),
            vec!["f1", "f2"]
        );

        let second = enforce(&mut store, RetentionPolicy::CountBased(2), now()).unwrap();
        assert_eq!(second, RetentionReport::default());
    }

    #[test]
    fn test_enforce_continues_after_failed_delete() {
        let mut store = MemoryStore {
            files: (1..=4)
                .map(|d| (format!("f{d}"), now() - Duration::days(d * 10)))
                .collect(),
            undeletable: HashSet::from(["f2".to_string()]),
        };

        let report = enforce(&mut store, RetentionPolicy::AgeBased(5), now()).unwrap();
        assert_eq!(report.failed, vec!["f2"]);
        assert_eq!(report.deleted.into_iter().sorted().collect_vec(), vec!["f1", "f3", "f4"]);
        assert_eq!(store.files.keys().cloned().collect::<Vec<_>>(), vec!["f2"]);
    }

    fn touch(dir: &std::path::Path, name: &str, mtime: DateTime<Utc>) {
        let file = File::create(dir.join(name)).unwrap();
        file.set_times(FileTimes::new().set_modified(SystemTime::from(mtime)))
            .unwrap();
    }

    #[test]
    fn test_local_dir_uses_mtime_and_ignores_other_files() {
        let temp_dir = TempDir::new().unwrap();
        let real_now = Utc::now();
        // Name says "today", mtime says 3 days ago: mtime decides locally.
        let old_name = archive_file_name(Local::now());
        touch(temp_dir.path(), &old_name, real_now - Duration::days(3));
        let new_name = archive_file_name(Local.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());
        touch(temp_dir.path(), &new_name, real_now - Duration::hours(1));
        touch(temp_dir.path(), "notes.txt", real_now - Duration::days(30));
        touch(temp_dir.path(), ".tmpABC.tmp", real_now - Duration::days(30));

        let mut store = LocalArchiveDir::new(temp_dir.path());
        let report = enforce(&mut store, RetentionPolicy::AgeBased(2), real_now).unwrap();
        assert_eq!(report.deleted, vec![old_name]);
        assert!(temp_dir.path().join(&new_name).exists());
        assert!(temp_dir.path().join("notes.txt").exists());
        assert!(temp_dir.path().join(".tmpABC.tmp").exists());
    }

    #[test]
    fn test_local_dir_count_based() {
        let temp_dir = TempDir::new().unwrap();
        let real_now = Utc::now();
        let names: Vec<String> = (0..4)
            .map(|i| archive_file_name(Local.with_ymd_and_hms(2024, 1, 1 + i, 0, 0, 0).unwrap()))
            .collect();
        for (i, name) in names.iter().enumerate() {
            touch(temp_dir.path(), name, real_now - Duration::hours(10 - i as i64));
        }

        let mut store = LocalArchiveDir::new(temp_dir.path());
        enforce(&mut store, RetentionPolicy::CountBased(1), real_now).unwrap();
        let left = store.list_archives().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].item, names[3]);
    }

    #[test]
    fn test_local_dir_missing_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = LocalArchiveDir::new(temp_dir.path().join("missing"));
        assert!(enforce(&mut store, RetentionPolicy::CountBased(1), Utc::now()).is_err());
    }
}
