//! Firmware bundle ingestion
//!
//! A bundle is one `.zip` archive holding a right and a left image. The
//! archive is extracted into a scratch directory owned by the bundle; the
//! directory is removed when the bundle is dropped.
//!
//! ## Selecting images
//!
//! Every extracted `.uf2` file is a candidate. For the right slot, then the
//! left, the first remaining candidate whose file name contains the slot
//! name as a whole word (`kb_right-v1.uf2`, `Left.uf2`, but not
//! `copyright.uf2`) is claimed and removed from the pool. Candidates left
//! over are reported but not used.

use crate::error::{Error, Result};
use crate::slot::{Slot, SlotMap};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Prefix of bundle scratch directories
const BUNDLE_DIR_PREFIX: &str = "splitflasher-";

/// Prefix of scratch directories for archives received as bytes
const UPLOAD_DIR_PREFIX: &str = "splitflasher-upload-";

/// Sub-directory of the bundle scratch directory archives are extracted to
const EXTRACT_DIR: &str = "extracted";

/// Accepted archive extension
const ARCHIVE_EXTENSION: &str = "zip";

/// Image chosen for a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareFile {
    /// Slot the image is for
    pub slot: Slot,
    /// Absolute path inside the bundle scratch directory
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// File name, reused on the target volume
    pub file_name: String,
}

/// Image file found in an extracted archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Absolute path
    pub path: PathBuf,
    /// File name
    pub name: String,
}

/// Where a firmware archive comes from
#[derive(Debug, Clone)]
pub enum IngestRequest {
    /// Archive on disk
    Path(PathBuf),
    /// Archive contents received in memory, with a suggested file name
    Buffer {
        /// Suggested file name, must end in `.zip`
        name: String,
        /// Archive bytes
        data: Vec<u8>,
    },
}

/// Unpacks an archive and lists the image files inside it
#[cfg_attr(test, mockall::automock)]
pub trait Extractor: Send {
    /// Extract `archive` into `dest` and return the image candidates found.
    ///
    /// Finding no candidates is not an error here.
    fn extract(&self, archive: &Path, dest: &Path) -> Result<Vec<Candidate>>;
}

/// Extractor that unpacks archives in-process with the `zip` crate
#[derive(Debug, Clone)]
pub struct ZipExtractor {
    extension: String,
}

impl Default for ZipExtractor {
    fn default() -> Self {
        Self {
            extension: crate::config::DEFAULT_IMAGE_EXTENSION.to_string(),
        }
    }
}

impl ZipExtractor {
    /// Create an extractor collecting `.uf2` files
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect files with this extension instead
    pub fn extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = ext.into().trim_start_matches('.').to_string();
        self
    }
}

impl Extractor for ZipExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<Vec<Candidate>> {
        let file = File::open(archive)?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| {
            Error::Extraction(format!("{} is not a readable zip archive: {e}", archive.display()))
        })?;
        tracing::debug!("Extracting {} entries from {:?}", zip.len(), archive);

        // Entries with absolute or `..` paths are rejected by the crate
        zip.extract(dest).map_err(|e| {
            Error::Extraction(format!("failed to extract {}: {e}", archive.display()))
        })?;

        collect_candidates(dest, &self.extension)
    }
}

/// Recursively list files under `root` with the given extension (case-insensitive)
pub fn collect_candidates(root: &Path, extension: &str) -> Result<Vec<Candidate>> {
    let mut stack = vec![root.to_path_buf()];
    let mut found = Vec::new();

    while let Some(dir) = stack.pop() {
        let mut entries = fs::read_dir(&dir)?.collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by_key(fs::DirEntry::file_name);

        for entry in entries {
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() && has_extension(&path, extension) {
                let name = entry.file_name().to_string_lossy().into_owned();
                found.push(Candidate { path, name });
            }
        }
    }

    Ok(found)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Whether `file_name` contains the slot name as a whole word
///
/// Matching ignores ASCII case; the characters around the match must not
/// be ASCII letters.
pub fn matches_slot(file_name: &str, slot: Slot) -> bool {
    let haystack = file_name.to_ascii_lowercase();
    let bytes = haystack.as_bytes();
    let needle = slot.name();

    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before_ok = start == 0 || !bytes[start - 1].is_ascii_alphabetic();
        let after_ok = end == bytes.len() || !bytes[end].is_ascii_alphabetic();
        before_ok && after_ok
    })
}

/// Assign candidates to slots
///
/// Returns the chosen candidate per slot and the unused leftovers.
pub fn select_slot_files(candidates: Vec<Candidate>) -> Result<(SlotMap<Candidate>, Vec<Candidate>)> {
    if candidates.is_empty() {
        return Err(Error::NoFirmwareFiles);
    }

    let found = candidates
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let mut pool = candidates;
    let mut take = |slot: Slot| {
        pool.iter()
            .position(|c| matches_slot(&c.name, slot))
            .map(|index| pool.remove(index))
    };

    let right = take(Slot::Right);
    let left = take(Slot::Left);

    match (right, left) {
        (Some(right), Some(left)) => Ok((SlotMap { right, left }, pool)),
        _ => Err(Error::UnmatchedSlots {
            found: if found.is_empty() {
                "none".to_string()
            } else {
                found
            },
        }),
    }
}

/// Archive ready for extraction
///
/// Holds the upload scratch directory (if any) so it is removed when the
/// archive is dropped.
#[derive(Debug)]
pub struct ResolvedArchive {
    path: PathBuf,
    upload_dir: Option<TempDir>,
}

impl ResolvedArchive {
    /// Path of the archive on disk
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ResolvedArchive {
    fn drop(&mut self) {
        if let Some(dir) = self.upload_dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!("Failed to remove upload directory {:?}: {}", path, e);
            }
        }
    }
}

fn is_zip_name(name: &str) -> bool {
    has_extension(Path::new(name), ARCHIVE_EXTENSION)
}

/// Validate a request and make its archive available on disk
pub fn resolve_archive(request: IngestRequest) -> Result<ResolvedArchive> {
    match request {
        IngestRequest::Path(path) => {
            if !is_zip_name(&path.to_string_lossy()) {
                return Err(Error::InvalidArchive("Please choose a .zip file.".to_string()));
            }
            fs::File::open(&path).map_err(|e| {
                Error::InvalidArchive(format!("Cannot read {}: {e}", path.display()))
            })?;
            Ok(ResolvedArchive {
                path,
                upload_dir: None,
            })
        }
        IngestRequest::Buffer { name, data } => {
            if !is_zip_name(&name) {
                return Err(Error::InvalidArchive("Please choose a .zip file.".to_string()));
            }
            let file_name = Path::new(name.trim())
                .file_name()
                .map_or_else(|| PathBuf::from("firmware.zip"), PathBuf::from);

            let upload_dir = tempfile::Builder::new()
                .prefix(UPLOAD_DIR_PREFIX)
                .tempdir()?;
            let path = upload_dir.path().join(file_name);
            fs::write(&path, data)?;

            Ok(ResolvedArchive {
                path,
                upload_dir: Some(upload_dir),
            })
        }
    }
}

/// The loaded firmware for one session
#[derive(Debug)]
pub struct FirmwareBundle {
    temp_dir: Option<TempDir>,
    temp_path: PathBuf,
    files: SlotMap<FirmwareFile>,
}

impl FirmwareBundle {
    /// Extract `archive` into a fresh scratch directory and pick the images
    ///
    /// Returns the bundle and the candidates that were not used. On error
    /// the scratch directory is removed.
    pub fn prepare(archive: &Path, extractor: &dyn Extractor) -> Result<(Self, Vec<Candidate>)> {
        let temp_dir = tempfile::Builder::new()
            .prefix(BUNDLE_DIR_PREFIX)
            .tempdir()?;
        let extracted = temp_dir.path().join(EXTRACT_DIR);
        fs::create_dir_all(&extracted)?;

        let candidates = extractor.extract(archive, &extracted)?;
        tracing::debug!("Found {} candidate image(s) in {:?}", candidates.len(), archive);

        let (chosen, leftovers) = select_slot_files(candidates)?;

        let to_file = |slot: Slot, candidate: &Candidate| -> Result<FirmwareFile> {
            let size = fs::metadata(&candidate.path)?.len();
            Ok(FirmwareFile {
                slot,
                path: candidate.path.clone(),
                size,
                file_name: candidate.name.clone(),
            })
        };

        let files = SlotMap {
            right: to_file(Slot::Right, &chosen.right)?,
            left: to_file(Slot::Left, &chosen.left)?,
        };

        Ok((
            Self {
                temp_path: temp_dir.path().to_path_buf(),
                temp_dir: Some(temp_dir),
                files,
            },
            leftovers,
        ))
    }

    /// Scratch directory owned by the bundle
    pub fn temp_dir(&self) -> &Path {
        &self.temp_path
    }

    /// Images for both slots
    pub fn files(&self) -> &SlotMap<FirmwareFile> {
        &self.files
    }

    /// Image for `slot`
    pub fn file(&self, slot: Slot) -> &FirmwareFile {
        self.files.get(slot)
    }
}

impl Drop for FirmwareBundle {
    fn drop(&mut self) {
        if let Some(dir) = self.temp_dir.take() {
            match dir.close() {
                Ok(()) => tracing::debug!("Removed bundle directory {:?}", self.temp_path),
                Err(e) => {
                    tracing::warn!("Failed to remove bundle directory {:?}: {}", self.temp_path, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str) -> Candidate {
        Candidate {
            path: PathBuf::from("/tmp/extracted").join(name),
            name: name.to_string(),
        }
    }

    fn write_file(dir: &Path, rel: &str, size: usize) -> Candidate {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, vec![0u8; size]).unwrap();
        Candidate {
            name: path.file_name().unwrap().to_string_lossy().into_owned(),
            path,
        }
    }

    // -------------------------------------------------------------------------
    // matches_slot tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_matches_slot_whole_word() {
        assert!(matches_slot("kb_right-v1.uf2", Slot::Right));
        assert!(matches_slot("RIGHT.uf2", Slot::Right));
        assert!(matches_slot("corne left.uf2", Slot::Left));
        assert!(matches_slot("left", Slot::Left));
        assert!(matches_slot("kb-left2.uf2", Slot::Left));
    }

    #[test]
    fn test_matches_slot_rejects_embedded() {
        assert!(!matches_slot("copyright.uf2", Slot::Right));
        assert!(!matches_slot("brightness.uf2", Slot::Right));
        assert!(!matches_slot("leftover.uf2", Slot::Left));
        assert!(!matches_slot("kb_right.uf2", Slot::Left));
    }

    #[test]
    fn test_matches_slot_second_occurrence() {
        assert!(matches_slot("copyright_right.uf2", Slot::Right));
    }

    #[test]
    fn test_matches_slot_non_ascii_neighbours() {
        assert!(matches_slot("éright.uf2", Slot::Right));
    }

    // -------------------------------------------------------------------------
    // select_slot_files tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_select_slot_files() {
        let (chosen, leftovers) =
            select_slot_files(vec![candidate("kb_left-v1.uf2"), candidate("kb_right-v1.uf2")])
                .unwrap();
        assert_eq!(chosen.right.name, "kb_right-v1.uf2");
        assert_eq!(chosen.left.name, "kb_left-v1.uf2");
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_select_first_match_wins_and_reports_leftovers() {
        let (chosen, leftovers) = select_slot_files(vec![
            candidate("a_right.uf2"),
            candidate("b_right.uf2"),
            candidate("left.uf2"),
        ])
        .unwrap();
        assert_eq!(chosen.right.name, "a_right.uf2");
        assert_eq!(chosen.left.name, "left.uf2");
        assert_eq!(leftovers, vec![candidate("b_right.uf2")]);
    }

    #[test]
    fn test_claimed_file_cannot_fill_both_slots() {
        let result = select_slot_files(vec![candidate("right_left.uf2")]);
        match result {
            Err(Error::UnmatchedSlots { found }) => assert_eq!(found, "right_left.uf2"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_select_unmatched_lists_files() {
        let result = select_slot_files(vec![candidate("main.uf2"), candidate("kb_left.uf2")]);
        match result {
            Err(Error::UnmatchedSlots { found }) => assert_eq!(found, "main.uf2, kb_left.uf2"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_select_empty() {
        assert!(matches!(
            select_slot_files(Vec::new()),
            Err(Error::NoFirmwareFiles)
        ));
    }

    // -------------------------------------------------------------------------
    // collect_candidates tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_collect_candidates_recursive() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "kb_right.UF2", 10);
        write_file(dir.path(), "nested/deeper/kb_left.uf2", 10);
        write_file(dir.path(), "README.md", 10);
        fs::create_dir_all(dir.path().join("empty.uf2")).unwrap();

        let mut names: Vec<_> = collect_candidates(dir.path(), "uf2")
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["kb_left.uf2", "kb_right.UF2"]);
    }

    #[test]
    fn test_collect_candidates_empty_is_ok() {
        let dir = TempDir::new().unwrap();
        assert!(collect_candidates(dir.path(), "uf2").unwrap().is_empty());
    }

    // -------------------------------------------------------------------------
    // resolve_archive tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_resolve_rejects_non_zip() {
        let result = resolve_archive(IngestRequest::Path(PathBuf::from("/tmp/firmware.tar")));
        assert!(matches!(result, Err(Error::InvalidArchive(_))));

        let result = resolve_archive(IngestRequest::Buffer {
            name: String::new(),
            data: vec![1, 2, 3],
        });
        assert!(matches!(result, Err(Error::InvalidArchive(_))));
    }

    #[test]
    fn test_resolve_missing_path() {
        let result = resolve_archive(IngestRequest::Path(PathBuf::from(
            "/nonexistent/firmware.zip",
        )));
        assert!(matches!(result, Err(Error::InvalidArchive(_))));
    }

    #[test]
    fn test_resolve_path_accepts_uppercase_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("FIRMWARE.ZIP");
        fs::write(&path, b"PK").unwrap();

        let resolved = resolve_archive(IngestRequest::Path(path.clone())).unwrap();
        assert_eq!(resolved.path(), path);
    }

    #[test]
    fn test_resolve_buffer_writes_and_cleans_up() {
        let resolved = resolve_archive(IngestRequest::Buffer {
            name: "corne.zip".to_string(),
            data: b"PK\x03\x04".to_vec(),
        })
        .unwrap();

        let path = resolved.path().to_path_buf();
        assert_eq!(path.file_name().unwrap(), "corne.zip");
        assert_eq!(fs::read(&path).unwrap(), b"PK\x03\x04");

        let upload_dir = path.parent().unwrap().to_path_buf();
        assert!(
            upload_dir
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("splitflasher-upload-")
        );

        drop(resolved);
        assert!(!upload_dir.exists());
    }

    #[test]
    fn test_resolve_buffer_strips_directories_from_name() {
        let resolved = resolve_archive(IngestRequest::Buffer {
            name: "../../evil.zip".to_string(),
            data: Vec::new(),
        })
        .unwrap();
        assert_eq!(resolved.path().file_name().unwrap(), "evil.zip");
    }

    // -------------------------------------------------------------------------
    // FirmwareBundle tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_prepare_bundle_with_mock_extractor() {
        let mut extractor = MockExtractor::new();
        extractor.expect_extract().times(1).returning(|_, dest| {
            Ok(vec![
                write_file(dest, "kb_left-v1.uf2", 100_000),
                write_file(dest, "kb_right-v1.uf2", 90_000),
            ])
        });

        let (bundle, leftovers) =
            FirmwareBundle::prepare(Path::new("/tmp/fw.zip"), &extractor).unwrap();
        assert!(leftovers.is_empty());
        assert_eq!(bundle.file(Slot::Left).size, 100_000);
        assert_eq!(bundle.file(Slot::Right).size, 90_000);
        assert_eq!(bundle.file(Slot::Right).file_name, "kb_right-v1.uf2");
        assert!(bundle.file(Slot::Right).path.starts_with(bundle.temp_dir()));

        let temp = bundle.temp_dir().to_path_buf();
        assert!(temp.join("extracted").is_dir());
        drop(bundle);
        assert!(!temp.exists());
    }

    #[test]
    fn test_prepare_failure_removes_scratch_dir() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        let seen_clone = seen.clone();

        let mut extractor = MockExtractor::new();
        extractor.expect_extract().returning(move |_, dest| {
            *seen_clone.lock().unwrap() = Some(dest.to_path_buf());
            Ok(vec![write_file(dest, "main.uf2", 10)])
        });

        let result = FirmwareBundle::prepare(Path::new("/tmp/fw.zip"), &extractor);
        assert!(matches!(result, Err(Error::UnmatchedSlots { .. })));

        let dest = seen.lock().unwrap().clone().unwrap();
        assert!(!dest.exists());
    }

    #[test]
    fn test_prepare_propagates_extraction_error() {
        let mut extractor = MockExtractor::new();
        extractor
            .expect_extract()
            .returning(|_, _| Err(Error::Extraction("corrupt".to_string())));

        let result = FirmwareBundle::prepare(Path::new("/tmp/fw.zip"), &extractor);
        assert!(matches!(result, Err(Error::Extraction(_))));
    }

    fn write_archive(path: &Path, entries: &[(&str, usize)]) {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default();
        for (name, size) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(&vec![0x55u8; *size]).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_zip_extractor_prepares_bundle_from_nested_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("corne.zip");
        write_archive(
            &archive,
            &[
                ("README.txt", 12),
                ("firmware/", 0),
                ("firmware/nested/", 0),
                ("firmware/kb_right-v1.uf2", 4096),
                ("firmware/nested/kb_left-v1.uf2", 8192),
            ],
        );

        let (bundle, leftovers) = FirmwareBundle::prepare(&archive, &ZipExtractor::new()).unwrap();
        assert!(leftovers.is_empty());

        let right = bundle.file(Slot::Right);
        assert_eq!(right.file_name, "kb_right-v1.uf2");
        assert_eq!(right.size, 4096);
        assert!(right.path.starts_with(bundle.temp_dir().join("extracted").join("firmware")));

        let left = bundle.file(Slot::Left);
        assert_eq!(left.file_name, "kb_left-v1.uf2");
        assert_eq!(left.size, 8192);
        assert!(left.path.ends_with("firmware/nested/kb_left-v1.uf2"));

        // Non-image entries are unpacked but never offered
        assert!(bundle.temp_dir().join("extracted/README.txt").is_file());
    }

    #[test]
    fn test_zip_extractor_reports_leftover_images() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("fw.zip");
        write_archive(
            &archive,
            &[
                ("kb_left-v1.uf2", 10),
                ("kb_right-v1.uf2", 10),
                ("settings_reset.UF2", 10),
            ],
        );

        let (_bundle, leftovers) = FirmwareBundle::prepare(&archive, &ZipExtractor::new()).unwrap();
        assert_eq!(leftovers.len(), 1);
        assert_eq!(leftovers[0].name, "settings_reset.UF2");
    }

    #[test]
    fn test_zip_extractor_custom_extension() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("fw.zip");
        write_archive(&archive, &[("left.bin", 4), ("right.bin", 4), ("left.uf2", 4)]);
        let dest = dir.path().join("out");
        fs::create_dir(&dest).unwrap();

        let mut names: Vec<_> = ZipExtractor::new()
            .extension(".bin")
            .extract(&archive, &dest)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["left.bin", "right.bin"]);
    }

    #[test]
    fn test_zip_extractor_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"not a zip archive").unwrap();
        let dest = dir.path().join("out");
        fs::create_dir(&dest).unwrap();

        let result = ZipExtractor::new().extract(&archive, &dest);
        assert!(matches!(result, Err(Error::Extraction(_))));
    }

    #[test]
    fn test_zip_extractor_missing_archive() {
        let dir = TempDir::new().unwrap();
        let result = ZipExtractor::new().extract(&dir.path().join("gone.zip"), dir.path());
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
