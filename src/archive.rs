//! Invoice archive on the local filesystem.
//!
//! Layout:
//!
//! ```text
//! <root>/<year>/<n-2-2> - <Client>.pdf
//! <root>/._invoice_data/<year>/<n-2-2> - <Client>.json   context snapshot
//! <root>/._invoice_data/<year>/<n-2-2> - <Client>.odt    merged document
//! <root>/._invoice_data/<year>.lock                       numbering lock
//! ```
//!
//! The dot-prefixed metadata tree is skipped by [`ArchiveWriter::list`].

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use utoipa::ToSchema;

use crate::generators::common::{sanitize_client_name, sanitize_invoice_number};
use crate::generators::convert::TARGET_EXTENSION;
use crate::invoice::models::InvoiceContext;
use crate::invoice::numbering::is_valid_year;

/// Metadata tree kept next to the user-facing year folders.
pub const METADATA_DIR: &str = "._invoice_data";
const SNAPSHOT_EXTENSION: &str = "json";
const INTERMEDIATE_EXTENSION: &str = "odt";
/// Longest file name common filesystems accept, in bytes.
const MAX_FILE_NAME_BYTES: usize = 255;
/// Stem budget leaving room for `.` and the longest extension in use.
const MAX_STEM_BYTES: usize = MAX_FILE_NAME_BYTES - 1 - SNAPSHOT_EXTENSION.len();

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid archive year '{0}'")]
    InvalidYear(String),
    #[error("invalid archive file name '{0}'")]
    InvalidFileName(String),
    #[error("generated artifact not found: {0}")]
    ArtifactMissing(PathBuf),
    #[error("an invoice is already archived at {0}")]
    AlreadyExists(PathBuf),
    #[error("not found in archive: {0}")]
    NotFound(PathBuf),
    #[error("failed to (de)serialize invoice data: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("archive I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Data stored alongside an archived invoice.
pub struct Sidecar<'a> {
    pub context: &'a InvoiceContext,
    /// Merged ODT document, copied into the metadata tree when present.
    pub intermediate: Option<&'a Path>,
}

/// One archived invoice document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct ArchivedInvoice {
    pub year: String,
    pub file_name: String,
    pub size_bytes: u64,
    /// Whether a context snapshot exists for this document.
    pub has_data: bool,
}

/// Exclusive lock on numbering and archiving for one year.
///
/// Released when dropped.
#[derive(Debug)]
pub struct YearLock {
    file: File,
}

impl Drop for YearLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    root: PathBuf,
}

impl ArchiveWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File stem shared by the archived PDF and its sidecar files.
    ///
    /// The client part is shortened so every file sharing the stem stays
    /// within the file name limit.
    pub fn file_stem(invoice_number: &str, client_name: &str) -> String {
        let prefix = format!("{} - ", sanitize_invoice_number(invoice_number));
        let client = sanitize_client_name(client_name);
        let room = MAX_STEM_BYTES.saturating_sub(prefix.len());

        let stem = format!("{}{}", prefix, truncate_to_bytes(&client, room));
        truncate_to_bytes(&stem, MAX_STEM_BYTES).trim_end().to_string()
    }

    /// Final location of the PDF for the given invoice.
    pub fn final_path(&self, year: &str, invoice_number: &str, client_name: &str) -> PathBuf {
        self.root.join(year).join(format!(
            "{}.{}",
            Self::file_stem(invoice_number, client_name),
            TARGET_EXTENSION
        ))
    }

    fn metadata_dir(&self, year: &str) -> PathBuf {
        self.root.join(METADATA_DIR).join(year)
    }

    /// Block until the numbering lock for `year` is held.
    pub fn lock_year(&self, year: &str) -> Result<YearLock, ArchiveError> {
        check_year(year)?;
        let dir = self.root.join(METADATA_DIR);
        fs::create_dir_all(&dir)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(dir.join(format!("{}.lock", year)))?;
        file.lock_exclusive()?;

        Ok(YearLock { file })
    }

    /// Move a converted artifact into the archive.
    ///
    /// Sidecar data is written first; if the move fails it is removed again,
    /// so the archive never holds a partial entry. An existing invoice file
    /// is never overwritten.
    pub fn archive(
        &self,
        artifact: &Path,
        year: &str,
        invoice_number: &str,
        client_name: &str,
        sidecar: Option<Sidecar<'_>>,
    ) -> Result<PathBuf, ArchiveError> {
        check_year(year)?;
        if !artifact.is_file() {
            return Err(ArchiveError::ArtifactMissing(artifact.to_path_buf()));
        }

        let final_path = self.final_path(year, invoice_number, client_name);
        if final_path.exists() {
            return Err(ArchiveError::AlreadyExists(final_path));
        }
        fs::create_dir_all(self.root.join(year))?;

        let stem = Self::file_stem(invoice_number, client_name);
        let written = match sidecar {
            Some(sidecar) => self.write_sidecar(year, &stem, &sidecar)?,
            None => Vec::new(),
        };

        if let Err(e) = move_file(artifact, &final_path) {
            for path in &written {
                let _ = fs::remove_file(path);
            }
            return Err(e.into());
        }

        log::info!("Invoice archived to {}", final_path.display());
        Ok(final_path)
    }

    fn write_sidecar(
        &self,
        year: &str,
        stem: &str,
        sidecar: &Sidecar<'_>,
    ) -> Result<Vec<PathBuf>, ArchiveError> {
        let dir = self.metadata_dir(year);
        fs::create_dir_all(&dir)?;

        let mut written = Vec::new();
        let snapshot_path = dir.join(format!("{}.{}", stem, SNAPSHOT_EXTENSION));
        fs::write(&snapshot_path, serde_json::to_vec_pretty(sidecar.context)?)?;
        written.push(snapshot_path);

        if let Some(intermediate) = sidecar.intermediate {
            let copy_path = dir.join(format!("{}.{}", stem, INTERMEDIATE_EXTENSION));
            if let Err(e) = fs::copy(intermediate, &copy_path) {
                for path in &written {
                    let _ = fs::remove_file(path);
                }
                return Err(e.into());
            }
            written.push(copy_path);
        }

        log::debug!("Sidecar data written to {}", dir.display());
        Ok(written)
    }

    /// List archived PDFs, optionally for one year, sorted by year and name.
    pub fn list(&self, year: Option<&str>) -> Result<Vec<ArchivedInvoice>, ArchiveError> {
        if let Some(year) = year {
            check_year(year)?;
        }

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut years = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || !is_valid_year(&name) {
                continue;
            }
            if year.is_some_and(|wanted| wanted != name) {
                continue;
            }
            years.push(name);
        }
        years.sort();

        let mut invoices = Vec::new();
        for year in years {
            let mut files = Vec::new();
            for entry in fs::read_dir(self.root.join(&year))? {
                let entry = entry?;
                let metadata = entry.metadata()?;
                if !metadata.is_file() {
                    continue;
                }
                let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if !has_extension(&file_name, TARGET_EXTENSION) {
                    continue;
                }
                let has_data = self.snapshot_path(&year, &file_name).is_file();
                files.push(ArchivedInvoice {
                    year: year.clone(),
                    file_name,
                    size_bytes: metadata.len(),
                    has_data,
                });
            }
            files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
            invoices.extend(files);
        }

        Ok(invoices)
    }

    /// Path of an archived PDF, checking the name cannot escape the archive.
    pub fn resolve(&self, year: &str, file_name: &str) -> Result<PathBuf, ArchiveError> {
        check_year(year)?;
        check_file_name(file_name)?;

        let path = self.root.join(year).join(file_name);
        if !path.is_file() {
            return Err(ArchiveError::NotFound(path));
        }
        Ok(path)
    }

    /// Read back the context snapshot stored for an archived PDF.
    pub fn load_snapshot(&self, year: &str, file_name: &str) -> Result<InvoiceContext, ArchiveError> {
        check_year(year)?;
        check_file_name(file_name)?;

        let path = self.snapshot_path(year, file_name);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArchiveError::NotFound(path))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::from_slice(&data)?)
    }

    fn snapshot_path(&self, year: &str, file_name: &str) -> PathBuf {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.metadata_dir(year)
            .join(format!("{}.{}", stem, SNAPSHOT_EXTENSION))
    }
}

fn check_year(year: &str) -> Result<(), ArchiveError> {
    if is_valid_year(year) {
        Ok(())
    } else {
        Err(ArchiveError::InvalidYear(year.to_string()))
    }
}

fn check_file_name(file_name: &str) -> Result<(), ArchiveError> {
    let invalid = file_name.is_empty()
        || file_name.starts_with('.')
        || file_name.contains(['/', '\\'])
        || file_name.contains("..");
    if invalid {
        return Err(ArchiveError::InvalidFileName(file_name.to_string()));
    }
    Ok(())
}

/// Longest prefix of `value` within `max` bytes, cut at a char boundary.
fn truncate_to_bytes(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

fn has_extension(file_name: &str, extension: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

/// Move a file, falling back to copy and delete across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            log::debug!(
                "Rename of {} failed ({}), copying instead",
                from.display(),
                rename_err
            );
            if let Err(e) = fs::copy(from, to) {
                let _ = fs::remove_file(to);
                return Err(e);
            }
            fs::remove_file(from)
        }
    }
}
