use crate::backup::archive::ArchiveEntry;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use dyn_iter::{DynIter, IntoDynIterator};
use function_name::named;
use walkdir::{DirEntry, WalkDir};

use std::path::Path;

/// Every regular file under `src_dir`, recursively, with its path inside the
/// archive relative to `src_dir`. Symlinks are followed; directories and
/// special files are skipped.
#[named]
pub fn archive_entries<'a>(src_dir: &Path) -> Result<DynIter<'a, Result<ArchiveEntry>>> {
    if !src_dir.is_dir() {
        tracing::error!(
            "Source directory does not exist or is not a directory: {:?}",
            src_dir
        );
        return Err(Error::from(std::io::Error::other(format!(
            "{:?} is not a directory",
            src_dir
        )))
        .add_fn_name(function_path!()));
    }

    tracing::debug!("Scanning directory {:?}", src_dir);
    let base = src_dir.to_path_buf();
    let entries = WalkDir::new(src_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(move |res| match res {
            Ok(de) => process_dir_entry(de, &base),
            Err(e) => Some(Err(e.into())),
        })
        .map(move |res| res.add_fn_name(function_path!()));

    Ok(entries.into_dyn_iter())
}

fn process_dir_entry(de: DirEntry, base_src_dir: &Path) -> Option<Result<ArchiveEntry>> {
    if !de.file_type().is_file() {
        tracing::trace!("Skipping {:?} not a file", de.path());
        return None;
    }

    let p = de.into_path();
    let res = match p.strip_prefix(base_src_dir) {
        Ok(stripped_path) => Ok(ArchiveEntry::new(&p, stripped_path)),
        Err(e) => Err(Error::from(std::io::Error::other(e)).add_msg(format!(
            "Stripping {:?} from {:?} failed",
            base_src_dir, p
        ))),
    };

    if let Ok(entry) = &res {
        tracing::trace!("Including file: {:?} -> {:?}", entry.src, entry.dst);
    }
    Some(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_files(dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir.join("base/1"))?;
        std::fs::create_dir_all(dir.join("pg_wal/archive_status"))?;
        std::fs::write(dir.join("PG_VERSION"), "16\n")?;
        std::fs::write(dir.join("base/1/1259"), "relation")?;
        std::fs::write(dir.join("pg_wal/000000010000000000000001"), "wal")?;
        Ok(())
    }

    fn collect_dst(dir: &Path) -> Vec<PathBuf> {
        let mut dst: Vec<_> = archive_entries(dir)
            .unwrap()
            .map(|e| e.unwrap().dst)
            .collect();
        dst.sort();
        dst
    }

    #[test]
    fn test_only_regular_files_relative_paths() {
        let temp_dir = TempDir::new().unwrap();
        create_test_files(temp_dir.path()).unwrap();

        assert_eq!(
            collect_dst(temp_dir.path()),
            vec![
                PathBuf::from("PG_VERSION"),
                PathBuf::from("base/1/1259"),
                PathBuf::from("pg_wal/000000010000000000000001"),
            ]
        );
    }

    #[test]
    fn test_symlinked_directory_is_followed() {
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("data");
        let wal = temp_dir.path().join("wal");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::create_dir_all(&wal).unwrap();
        std::fs::write(wal.join("segment"), "wal").unwrap();
        std::os::unix::fs::symlink(&wal, data.join("pg_wal")).unwrap();

        assert_eq!(collect_dst(&data), vec![PathBuf::from("pg_wal/segment")]);
    }

    #[test]
    fn test_empty_directory_has_no_entries() {
        let temp_dir = TempDir::new().unwrap();
        assert!(collect_dst(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_missing_directory_is_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(archive_entries(&temp_dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_file_as_src_dir_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("not_a_directory");
        std::fs::write(&file_path, "content").unwrap();
        assert!(archive_entries(&file_path).is_err());
    }
}
