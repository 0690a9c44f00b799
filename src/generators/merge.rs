//! ODT template merging.
//!
//! An ODT file is a zip container whose `content.xml` carries the document
//! body. The invoice template's `content.xml` uses Jinja syntax; merging
//! unpacks the container into a scratch workspace, renders `content.xml`
//! against the invoice context and packs the workspace back up.

use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::common::escape_xml;

/// Primary markup file inside the container.
pub const CONTENT_FILE: &str = "content.xml";
/// OpenDocument media type entry; must be the first, uncompressed entry.
const MIMETYPE_FILE: &str = "mimetype";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("template not found: {0}")]
    TemplateMissing(PathBuf),
    #[error("failed to prepare scratch workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to unpack template: {0}")]
    Unpack(#[source] zip::result::ZipError),
    #[error("template has no content.xml")]
    MissingContent,
    #[error("failed to render content.xml: {0}")]
    Render(#[source] minijinja::Error),
    #[error("failed to repack document: {0}")]
    Repack(#[source] zip::result::ZipError),
    #[error("I/O error while merging: {0}")]
    Io(#[from] io::Error),
}

/// Scratch directory that is removed when dropped.
struct ScratchWorkspace {
    path: PathBuf,
}

impl ScratchWorkspace {
    /// Create the workspace, clearing whatever a previous run left behind.
    fn create(path: PathBuf) -> io::Result<Self> {
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchWorkspace {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!(
                    "Failed to remove scratch workspace {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

/// Scratch workspace used while producing `output_path`.
pub fn workspace_path_for(output_path: &Path) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let parent = output_path.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{}.merge", stem))
}

/// Merge `context` into the template at `template_path`, writing the result
/// to `output_path`.
///
/// The scratch workspace is removed on every exit path, and a failed merge
/// leaves nothing at `output_path`.
pub fn merge<S: Serialize>(
    template_path: &Path,
    output_path: &Path,
    context: &S,
) -> Result<(), MergeError> {
    if !template_path.is_file() {
        return Err(MergeError::TemplateMissing(template_path.to_path_buf()));
    }

    let workspace_path = workspace_path_for(output_path);
    let workspace =
        ScratchWorkspace::create(workspace_path.clone()).map_err(|source| MergeError::Workspace {
            path: workspace_path,
            source,
        })?;

    log::debug!("Unpacking template {}", template_path.display());
    unpack(template_path, workspace.path())?;

    let content_path = workspace.path().join(CONTENT_FILE);
    if !content_path.is_file() {
        return Err(MergeError::MissingContent);
    }

    let markup = fs::read_to_string(&content_path)?;
    let rendered = render_markup(&markup, context)?;
    fs::write(&content_path, rendered)?;

    repack(workspace.path(), output_path)?;
    log::info!("Merged invoice document written to {}", output_path.display());

    Ok(())
}

/// Render template markup against `context`.
///
/// Referencing a value the context does not provide is an error. String
/// values are XML-escaped on output.
pub fn render_markup<S: Serialize>(markup: &str, context: S) -> Result<String, MergeError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_formatter(|out, state, value| {
        if value.is_safe() {
            return minijinja::escape_formatter(out, state, value);
        }
        match value.as_str() {
            Some(text) => out.write_str(&escape_xml(text)).map_err(|_| {
                minijinja::Error::new(ErrorKind::WriteFailure, "failed to write rendered value")
            }),
            None => minijinja::escape_formatter(out, state, value),
        }
    });

    env.render_str(markup, context).map_err(MergeError::Render)
}

fn unpack(template_path: &Path, workspace: &Path) -> Result<(), MergeError> {
    let file = File::open(template_path)?;
    let mut archive = ZipArchive::new(file).map_err(MergeError::Unpack)?;
    archive.extract(workspace).map_err(MergeError::Unpack)
}

/// Pack `workspace` into a container at `output_path`.
///
/// The container is written to a `.zip.part` sibling first and renamed into
/// place once complete.
fn repack(workspace: &Path, output_path: &Path) -> Result<(), MergeError> {
    let part_path = output_path.with_extension("zip.part");

    let result = write_container(workspace, &part_path)
        .and_then(|()| fs::rename(&part_path, output_path).map_err(MergeError::Io));

    if result.is_err() {
        let _ = fs::remove_file(&part_path);
    }
    result
}

fn write_container(workspace: &Path, part_path: &Path) -> Result<(), MergeError> {
    let mut zip = ZipWriter::new(File::create(part_path)?);

    // Fixed timestamps keep repeated merges byte-identical.
    let stored = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(zip::DateTime::default());
    let deflated = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mimetype_path = workspace.join(MIMETYPE_FILE);
    if mimetype_path.is_file() {
        zip.start_file(MIMETYPE_FILE, stored)
            .map_err(MergeError::Repack)?;
        zip.write_all(&fs::read(&mimetype_path)?)?;
    }

    for entry in WalkDir::new(workspace).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let name = entry_name(workspace, entry.path())?;
        if name == MIMETYPE_FILE {
            continue;
        }

        if entry.file_type().is_dir() {
            zip.add_directory(name, deflated)
                .map_err(MergeError::Repack)?;
        } else {
            zip.start_file(name, deflated).map_err(MergeError::Repack)?;
            let mut source = File::open(entry.path())?;
            io::copy(&mut source, &mut zip)?;
        }
    }

    zip.finish().map_err(MergeError::Repack)?;
    Ok(())
}

/// Container entry name of `path`: relative to the workspace, `/`-separated.
fn entry_name(workspace: &Path, path: &Path) -> io::Result<String> {
    let relative = path
        .strip_prefix(workspace)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_markup_loops_and_escapes() {
        let markup = "<t>{{ client_name }}</t>{% for item in items %}<row>{{ item.name }}</row>{% endfor %}";
        let context = json!({
            "client_name": "Tom & Jerry",
            "items": [{ "name": "A<B" }, { "name": "C" }]
        });

        let rendered = render_markup(markup, &context).unwrap();
        assert_eq!(
            rendered,
            "<t>Tom &amp; Jerry</t><row>A&lt;B</row><row>C</row>"
        );
    }

    #[test]
    fn test_render_markup_rejects_undefined_placeholder() {
        let result = render_markup("<t>{{ missing_field }}</t>", json!({ "client_name": "x" }));
        assert!(matches!(result, Err(MergeError::Render(_))));
    }

    #[test]
    fn test_render_markup_rejects_syntax_error() {
        let result = render_markup("<t>{% for item in %}</t>", json!({}));
        assert!(matches!(result, Err(MergeError::Render(_))));
    }

    #[test]
    fn test_workspace_path_for() {
        let path = workspace_path_for(Path::new("/tmp/job/invoice.odt"));
        assert_eq!(path, PathBuf::from("/tmp/job/.invoice.merge"));
    }
}
