pub mod walk;

use crate::backup::compress::GzipConfig;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use bon::Builder;
use function_name::named;
use getset::Getters;
use std::fs::{File, Permissions};
use std::io::{BufWriter, IntoInnerError, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tar::{Header, HeaderMode};

static ARCHIVE_FILE_MODE: u32 = 0o644;

/// A single file to be written into the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Source file on the filesystem
    pub src: PathBuf,
    /// Path inside the archive
    pub dst: PathBuf,
}

impl ArchiveEntry {
    pub fn new<A: Into<PathBuf>, B: Into<PathBuf>>(src: A, dst: B) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct ArchiveSummary {
    path: PathBuf,
    size_bytes: u64,
    file_count: usize,
}

impl ArchiveSummary {
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Packs a directory tree into a tar + gzip archive.
#[derive(Clone, Debug, Default, Builder, Getters)]
#[getset(get = "pub")]
pub struct Archiver {
    #[builder(default)]
    compressor: GzipConfig,
}

impl Archiver {
    /// Writes every regular file under `src_dir` into a new archive at `dst`.
    ///
    /// The archive is written to a temporary file next to `dst`, flushed to
    /// disk and renamed into place, so `dst` only ever appears complete. Any
    /// I/O error aborts and leaves nothing behind.
    #[named]
    pub fn archive<P1: AsRef<Path>, P2: AsRef<Path>>(
        &self,
        src_dir: P1,
        dst: P2,
    ) -> Result<ArchiveSummary> {
        let src_dir = src_dir.as_ref();
        let dst = dst.as_ref();
        let parent = dst
            .parent()
            .ok_or_else(|| Error::InvalidConfig(format!("{:?} has no parent directory", dst)))?;

        tracing::info!("Archiving {:?} into {:?}", src_dir, dst);
        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(parent)?;

        let file_count = self
            .write_archive(src_dir, tmp.as_file_mut())
            .add_msg(format!("Archive error for {:?}", src_dir))
            .add_fn_name(function_path!())?;

        tmp.as_file()
            .set_permissions(Permissions::from_mode(ARCHIVE_FILE_MODE))?;
        tmp.as_file().sync_all()?;
        let file = tmp.persist(dst)?;
        let size_bytes = file.metadata()?.len();

        let summary = ArchiveSummary {
            path: dst.to_path_buf(),
            size_bytes,
            file_count,
        };
        tracing::info!(
            "Archived {} files, archive size: {:.2} MB",
            summary.file_count,
            summary.size_mb()
        );
        Ok(summary)
    }

    fn write_archive(&self, src_dir: &Path, out: &mut File) -> Result<usize> {
        let compressor = self.compressor.build_compressor(BufWriter::new(out));
        let mut builder = tar::Builder::new(compressor);
        builder.mode(HeaderMode::Complete);

        let mut entry_count = 0;
        for entry in walk::archive_entries(src_dir)? {
            append_entry(&mut builder, &entry?)?;
            entry_count += 1;
        }
        tracing::debug!("Processed {} archive entries", entry_count);

        builder
            .into_inner()?
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?;
        Ok(entry_count)
    }
}

/// Appends one file with owner, group, mode and mtime taken from its metadata.
///
/// Exactly the size recorded in the header is written even if the file
/// changes while it is read: files in a live cluster do, and WAL replay
/// repairs them on restore.
fn append_entry<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    entry: &ArchiveEntry,
) -> Result<()> {
    let file = File::open(&entry.src)
        .map_err(Error::from)
        .add_msg(format!("open {:?}", entry.src))?;
    let metadata = file.metadata()?;
    let size = metadata.len();

    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(&metadata, HeaderMode::Complete);
    header.set_size(size);

    let data = (&file).take(size).chain(std::io::repeat(0)).take(size);
    builder
        .append_data(&mut header, &entry.dst, data)
        .map_err(Error::from)
        .add_msg(format!("append {:?}", entry.src))?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::collections::BTreeMap;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Eq)]
    pub(crate) struct TarEntryInfo {
        pub size: u64,
        pub uid: u64,
        pub gid: u64,
        pub mode: u32,
        pub mtime: u64,
        pub content: Vec<u8>,
    }

    pub(crate) fn read_archive(path: &Path) -> BTreeMap<PathBuf, TarEntryInfo> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let header = e.header().clone();
                let mut content = Vec::new();
                e.read_to_end(&mut content).unwrap();
                (
                    e.path().unwrap().into_owned(),
                    TarEntryInfo {
                        size: header.size().unwrap(),
                        uid: header.uid().unwrap(),
                        gid: header.gid().unwrap(),
                        mode: header.mode().unwrap(),
                        mtime: header.mtime().unwrap(),
                        content,
                    },
                )
            })
            .collect()
    }

    pub(crate) fn create_data_dir(dir: &Path) {
        std::fs::create_dir_all(dir.join("base/1")).unwrap();
        std::fs::create_dir_all(dir.join("global")).unwrap();
        std::fs::write(dir.join("PG_VERSION"), "16\n").unwrap();
        std::fs::write(dir.join("base/1/1259"), vec![7u8; 8192]).unwrap();
        std::fs::write(dir.join("global/pg_control"), vec![1u8; 300]).unwrap();
        std::fs::set_permissions(dir.join("global/pg_control"), Permissions::from_mode(0o600))
            .unwrap();
    }

    #[test]
    fn test_archive_preserves_content_and_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("data");
        create_data_dir(&data);
        let dst = temp_dir.path().join("out.tar.gz");

        let summary = Archiver::default().archive(&data, &dst).unwrap();
        assert_eq!(summary.path(), &dst);
        assert_eq!(*summary.file_count(), 3);
        assert_eq!(*summary.size_bytes(), std::fs::metadata(&dst).unwrap().len());

        let entries = read_archive(&dst);
        assert_eq!(
            entries.keys().cloned().collect::<Vec<_>>(),
            vec![
                PathBuf::from("PG_VERSION"),
                PathBuf::from("base/1/1259"),
                PathBuf::from("global/pg_control"),
            ]
        );

        let total: u64 = entries.values().map(|e| e.size).sum();
        assert_eq!(total, 3 + 8192 + 300);

        for (rel, info) in &entries {
            let md = std::fs::metadata(data.join(rel)).unwrap();
            assert_eq!(info.uid, md.uid() as u64);
            assert_eq!(info.gid, md.gid() as u64);
            assert_eq!(info.mode & 0o7777, md.mode() & 0o7777);
            assert_eq!(info.mtime, md.mtime() as u64);
            assert_eq!(info.content, std::fs::read(data.join(rel)).unwrap());
        }
        assert_eq!(entries[Path::new("global/pg_control")].mode & 0o7777, 0o600);
    }

    #[test]
    fn test_archive_file_mode_and_no_temp_left() {
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("data");
        create_data_dir(&data);
        let out_dir = temp_dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();
        let dst = out_dir.join("a.tar.gz");

        Archiver::default().archive(&data, &dst).unwrap();
        let mode = std::fs::metadata(&dst).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
        assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 1);
    }

    #[test]
    fn test_archive_missing_source_leaves_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let out_dir = temp_dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();
        let dst = out_dir.join("a.tar.gz");

        let res = Archiver::default().archive(temp_dir.path().join("missing"), &dst);
        assert!(res.is_err());
        assert!(!dst.exists());
        assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_archive_missing_destination_dir_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("data");
        create_data_dir(&data);

        let res = Archiver::default().archive(&data, temp_dir.path().join("nope/a.tar.gz"));
        assert!(res.is_err());
    }

    #[test]
    fn test_append_entry_writes_exact_content() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("seg");
        std::fs::write(&src, b"abcdef").unwrap();
        let entry = ArchiveEntry::new(&src, "seg");

        let mut builder = tar::Builder::new(Vec::new());
        append_entry(&mut builder, &entry).unwrap();
        let bytes = builder.into_inner().unwrap();

        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut e = archive.entries().unwrap().next().unwrap().unwrap();
        let mut content = Vec::new();
        e.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"abcdef");
    }
}
