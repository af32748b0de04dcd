//! Archive extraction into the feature store.
//!
//! Extraction unpacks into a sibling staging directory and renames it into place,
//! so a populated destination is always a complete extraction. A destination that
//! already holds entries is left untouched.

mod guard;

use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::IngestError;

pub use guard::{resolve_link_target, sanitize_entry_path};

/// Supported container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarZst,
}

impl ArchiveFormat {
    /// Sniff the format from magic bytes, falling back to the file extension.
    pub fn detect(path: &Path) -> Result<Self, IngestError> {
        let file = File::open(path).map_err(|e| IngestError::io(path, e))?;
        let mut head = Vec::with_capacity(512);
        file.take(512)
            .read_to_end(&mut head)
            .map_err(|e| IngestError::io(path, e))?;

        if let Some(format) = Self::from_magic(&head) {
            return Ok(format);
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        Self::from_extension(&name)
            .ok_or_else(|| IngestError::corrupt(path, "unrecognized archive format"))
    }

    fn from_magic(head: &[u8]) -> Option<Self> {
        if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") {
            Some(Self::Zip)
        } else if head.starts_with(&[0x1f, 0x8b]) {
            Some(Self::TarGz)
        } else if head.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Some(Self::TarZst)
        } else if head.len() >= 262 && &head[257..262] == b"ustar" {
            Some(Self::Tar)
        } else {
            None
        }
    }

    fn from_extension(name: &str) -> Option<Self> {
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(Self::TarZst)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// Outcome of a single extract call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractResult {
    pub dest_dir: PathBuf,
    /// Regular files under `dest_dir` after the call.
    pub file_count: usize,
    /// True when `dest_dir` was already populated and nothing was unpacked.
    pub skipped: bool,
}

/// Unpacks zip, tar, tar.gz and tar.zst archives with path-traversal protection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract on the blocking pool.
    pub async fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<ExtractResult, IngestError> {
        let archive_owned = archive.to_path_buf();
        let dest_owned = dest.to_path_buf();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            Self::extract_blocking(&archive_owned, &dest_owned, &cancel)
        })
        .await
        .map_err(|e| IngestError::io(dest, std::io::Error::other(e)))?
    }

    /// `Some(regular file count)` when `dest` already holds an extraction.
    pub async fn existing_file_count(&self, dest: &Path) -> Result<Option<usize>, IngestError> {
        let dest_owned = dest.to_path_buf();
        tokio::task::spawn_blocking(move || populated_file_count(&dest_owned))
            .await
            .map_err(|e| IngestError::io(dest, std::io::Error::other(e)))?
    }

    pub fn extract_blocking(
        archive: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<ExtractResult, IngestError> {
        if let Some(file_count) = populated_file_count(dest)? {
            debug!(dest = %dest.display(), file_count, "feature store already populated");
            return Ok(ExtractResult {
                dest_dir: dest.to_path_buf(),
                file_count,
                skipped: true,
            });
        }

        let format = ArchiveFormat::detect(archive)?;
        let staging = staging_dir(dest);
        if let Some(parent) = staging.parent() {
            fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
        }
        fs::create_dir(&staging).map_err(|e| IngestError::io(&staging, e))?;

        let outcome = unpack(format, archive, &staging, cancel)
            .and_then(|()| verify_symlinks(&staging))
            .and_then(|()| count_files(&staging))
            .and_then(|count| promote(&staging, dest).map(|()| count));

        match outcome {
            Ok(file_count) => {
                info!(
                    archive = %archive.display(),
                    dest = %dest.display(),
                    ?format,
                    file_count,
                    "archive extracted"
                );
                Ok(ExtractResult {
                    dest_dir: dest.to_path_buf(),
                    file_count,
                    skipped: false,
                })
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!(staging = %staging.display(), error = %cleanup, "failed to remove staging dir");
                }
                Err(e)
            }
        }
    }
}

// ── Destination handling ────────────────────────────────────────────

/// `Some(file count)` if `dest` is a directory with at least one entry.
fn populated_file_count(dest: &Path) -> Result<Option<usize>, IngestError> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => {
            let mut entries = fs::read_dir(dest).map_err(|e| IngestError::io(dest, e))?;
            if entries.next().is_none() {
                Ok(None)
            } else {
                count_files(dest).map(Some)
            }
        }
        Ok(_) => Err(IngestError::io(
            dest,
            std::io::Error::other("feature store path exists and is not a directory"),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(IngestError::io(dest, e)),
    }
}

fn count_files(dir: &Path) -> Result<usize, IngestError> {
    let mut count = 0;
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            IngestError::io(path, std::io::Error::other(e))
        })?;
        if entry.file_type().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

fn staging_dir(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "extract".into());
    let suffix = Uuid::new_v4().simple().to_string();
    name.push(format!(".partial-{}", &suffix[..8]));
    dest.with_file_name(name)
}

fn promote(staging: &Path, dest: &Path) -> Result<(), IngestError> {
    // Only an empty directory can be here; populated ones returned early.
    match fs::remove_dir(dest) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(IngestError::io(dest, e)),
    }
    fs::rename(staging, dest).map_err(|e| IngestError::io(dest, e))
}

// ── Unpacking ───────────────────────────────────────────────────────

fn unpack(
    format: ArchiveFormat,
    archive: &Path,
    staging: &Path,
    cancel: &CancellationToken,
) -> Result<(), IngestError> {
    let file = File::open(archive).map_err(|e| IngestError::io(archive, e))?;
    let reader = BufReader::new(file);
    match format {
        ArchiveFormat::Zip => unpack_zip(reader, archive, staging, cancel),
        ArchiveFormat::Tar => unpack_tar(reader, archive, staging, cancel),
        ArchiveFormat::TarGz => {
            unpack_tar(flate2::read::GzDecoder::new(reader), archive, staging, cancel)
        }
        ArchiveFormat::TarZst => {
            let decoder = zstd::stream::read::Decoder::with_buffer(reader)
                .map_err(|e| IngestError::corrupt(archive, e))?;
            unpack_tar(decoder, archive, staging, cancel)
        }
    }
}

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

fn unpack_zip(
    reader: BufReader<File>,
    archive: &Path,
    staging: &Path,
    cancel: &CancellationToken,
) -> Result<(), IngestError> {
    let mut zip = zip::ZipArchive::new(reader).map_err(|e| IngestError::corrupt(archive, e))?;

    for i in 0..zip.len() {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        let mut entry = zip
            .by_index(i)
            .map_err(|e| IngestError::corrupt(archive, e))?;
        let name = entry.name().to_string();
        let Some(rel) = sanitize_entry_path(&name)? else {
            continue;
        };
        ensure_no_symlink_ancestors(staging, &rel, &name)?;
        let out = staging.join(&rel);

        if entry.is_dir() {
            fs::create_dir_all(&out).map_err(|e| IngestError::io(&out, e))?;
            continue;
        }
        create_parent(&out)?;

        let is_symlink = entry
            .unix_mode()
            .is_some_and(|mode| mode & S_IFMT == S_IFLNK);
        if is_symlink {
            let mut target = String::new();
            entry
                .read_to_string(&mut target)
                .map_err(|e| IngestError::corrupt(archive, e))?;
            place_symlink(staging, &rel, &target, &name)?;
        } else {
            copy_entry(&mut entry, &out, archive)?;
        }
    }
    Ok(())
}

fn unpack_tar<R: Read>(
    reader: R,
    archive: &Path,
    staging: &Path,
    cancel: &CancellationToken,
) -> Result<(), IngestError> {
    use tar::EntryType;

    let mut tar = tar::Archive::new(reader);
    let entries = tar.entries().map_err(|e| IngestError::corrupt(archive, e))?;

    for entry in entries {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        let mut entry = entry.map_err(|e| IngestError::corrupt(archive, e))?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let Some(rel) = sanitize_entry_path(&name)? else {
            continue;
        };
        ensure_no_symlink_ancestors(staging, &rel, &name)?;
        let out = staging.join(&rel);

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&out).map_err(|e| IngestError::io(&out, e))?;
            }
            EntryType::Regular | EntryType::Continuous => {
                create_parent(&out)?;
                copy_entry(&mut entry, &out, archive)?;
            }
            EntryType::Symlink => {
                let target = link_target(&entry, archive, &name)?;
                create_parent(&out)?;
                place_symlink(staging, &rel, &target, &name)?;
            }
            EntryType::Link => {
                // Hard link targets name another entry, relative to the archive root.
                let target = link_target(&entry, archive, &name)?;
                let resolved = resolve_link_target(Path::new(""), &target, &name)?;
                ensure_no_symlink_ancestors(staging, &resolved, &name)?;
                create_parent(&out)?;
                let src = staging.join(&resolved);
                remove_existing_symlink(&out)?;
                fs::hard_link(&src, &out).map_err(|e| IngestError::io(&out, e))?;
            }
            other => {
                debug!(entry = %name, entry_type = ?other, "skipping unsupported tar entry");
            }
        }
    }
    Ok(())
}

fn link_target<R: Read>(
    entry: &tar::Entry<'_, R>,
    archive: &Path,
    name: &str,
) -> Result<String, IngestError> {
    entry
        .link_name_bytes()
        .map(|raw| String::from_utf8_lossy(&raw).into_owned())
        .ok_or_else(|| IngestError::corrupt(archive, format!("link entry '{name}' has no target")))
}

/// Stream one entry to `out`. Read failures mean a damaged archive; write failures are local I/O.
fn copy_entry(reader: &mut dyn Read, out: &Path, archive: &Path) -> Result<u64, IngestError> {
    remove_existing_symlink(out)?;
    let mut file = File::create(out).map_err(|e| IngestError::io(out, e))?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| IngestError::corrupt(archive, e))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .map_err(|e| IngestError::io(out, e))?;
        written += n as u64;
    }
    file.flush().map_err(|e| IngestError::io(out, e))?;
    Ok(written)
}

fn place_symlink(staging: &Path, rel: &Path, target: &str, name: &str) -> Result<(), IngestError> {
    let base = rel.parent().unwrap_or_else(|| Path::new(""));
    resolve_link_target(base, target, name)?;
    // Lexical resolution cannot see links already on disk: `d/l/..` is not `d` when `d/l` is a link.
    let unresolved = base.join(target.replace('\\', "/"));
    ensure_no_symlink_ancestors(staging, &unresolved, name)?;
    let out = staging.join(rel);
    remove_existing_symlink(&out)?;

    #[cfg(unix)]
    {
        let target = target.replace('\\', "/");
        std::os::unix::fs::symlink(&target, &out).map_err(|e| IngestError::io(&out, e))?;
    }
    #[cfg(not(unix))]
    {
        debug!(entry = %name, "symlinks unsupported on this platform, skipping");
    }
    Ok(())
}

/// Refuse to write through a symlink an earlier entry placed in the tree.
fn ensure_no_symlink_ancestors(staging: &Path, rel: &Path, name: &str) -> Result<(), IngestError> {
    let mut current = staging.to_path_buf();
    let Some(parent) = rel.parent() else {
        return Ok(());
    };
    for component in parent.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(IngestError::PathTraversal {
                    entry: name.to_string(),
                });
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(IngestError::io(&current, e)),
        }
    }
    Ok(())
}

/// Every symlink in the finished tree must resolve to a path inside it.
///
/// Per-entry checks depend on entry order; a link placed before the links it
/// runs through are created is only caught here.
fn verify_symlinks(staging: &Path) -> Result<(), IngestError> {
    let root = staging
        .canonicalize()
        .map_err(|e| IngestError::io(staging, e))?;
    for entry in WalkDir::new(staging).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(staging).to_path_buf();
            IngestError::io(path, std::io::Error::other(e))
        })?;
        if !entry.path_is_symlink() {
            continue;
        }
        let inside = entry
            .path()
            .canonicalize()
            .is_ok_and(|resolved| resolved.starts_with(&root));
        if !inside {
            let rel = entry.path().strip_prefix(staging).unwrap_or(entry.path());
            warn!(entry = %rel.display(), "symlink resolves outside the feature store");
            return Err(IngestError::PathTraversal {
                entry: rel.display().to_string(),
            });
        }
    }
    Ok(())
}

fn remove_existing_symlink(out: &Path) -> Result<(), IngestError> {
    match fs::symlink_metadata(out) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(out).map_err(|e| IngestError::io(out, e))
        }
        _ => Ok(()),
    }
}

fn create_parent(out: &Path) -> Result<(), IngestError> {
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
    }
    Ok(())
}
