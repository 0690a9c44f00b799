#![allow(dead_code)]

use async_trait::async_trait;
use racun_server::config::AppConfig;
use racun_server::generators::convert::expected_output_path;
use racun_server::generators::{ConversionError, DocumentConverter, InvoicePipeline};
use racun_server::invoice::models::{InvoiceRequest, LineItemInput};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const ODT_MIMETYPE: &str = "application/vnd.oasis.opendocument.text";

/// content.xml of the test template; references the header, every item and
/// the total.
pub const INVOICE_CONTENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<office:document-content><client>{{ client_name }}</client><number>{{ invoice_number }}</number><date>{{ invoice_date }}</date>{% for item in items %}<row>{{ item.name }}|{{ item.quantity }}|{{ item.formatted_unit_price }}|{{ item.formatted_line_total }}</row>{% endfor %}<total>{{ formatted_total }}</total></office:document-content>"#;

pub const STYLES_XML: &str = "<office:document-styles>{{ not_a_placeholder }}</office:document-styles>";
pub const MANIFEST_XML: &str = r#"<manifest:manifest><manifest:file-entry manifest:full-path="/"/></manifest:manifest>"#;

/// Write a minimal ODT container with the given `content.xml`.
pub fn write_template(path: &Path, content_xml: &str) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);

    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    zip.start_file("mimetype", stored).unwrap();
    zip.write_all(ODT_MIMETYPE.as_bytes()).unwrap();

    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file("content.xml", deflated).unwrap();
    zip.write_all(content_xml.as_bytes()).unwrap();
    zip.start_file("styles.xml", deflated).unwrap();
    zip.write_all(STYLES_XML.as_bytes()).unwrap();
    zip.add_directory("META-INF/", deflated).unwrap();
    zip.start_file("META-INF/manifest.xml", deflated).unwrap();
    zip.write_all(MANIFEST_XML.as_bytes()).unwrap();

    zip.finish().unwrap();
}

/// Read one entry of a zip container as text.
pub fn read_entry(path: &Path, name: &str) -> String {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = ZipArchive::new(file).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut text = String::new();
    entry.read_to_string(&mut text).unwrap();
    text
}

/// Entry names of a zip container in stored order.
pub fn entry_names(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let archive = ZipArchive::new(file).unwrap();
    archive.file_names().map(str::to_string).collect()
}

/// How a [`FakeConverter`] behaves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FakeMode {
    /// Copy the input to the expected PDF path.
    Succeed,
    /// Exit with an error.
    Fail,
    /// Report success without producing a file.
    NoOutput,
}

/// In-process converter that copies the merged document instead of running
/// LibreOffice.
pub struct FakeConverter {
    mode: FakeMode,
    calls: AtomicUsize,
}

impl FakeConverter {
    pub fn new(mode: FakeMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentConverter for FakeConverter {
    async fn convert(&self, input: &Path, output_dir: &Path) -> Result<PathBuf, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            FakeMode::Succeed => {
                let output = expected_output_path(input, output_dir);
                std::fs::copy(input, &output).map_err(ConversionError::Spawn)?;
                Ok(output)
            }
            FakeMode::Fail => Err(ConversionError::ConverterFailed {
                code: Some(1),
                stderr: "source file could not be loaded".to_string(),
            }),
            FakeMode::NoOutput => Err(ConversionError::OutputMissing(expected_output_path(
                input, output_dir,
            ))),
        }
    }

    async fn check_available(&self) -> Result<String, ConversionError> {
        Ok("FakeOffice 1.0".to_string())
    }
}

/// Temporary template, archive and scratch locations for one test.
pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub config: AppConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_content(INVOICE_CONTENT)
    }

    pub fn with_content(content_xml: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("invoice_template.odt");
        write_template(&template, content_xml);

        let mut config = AppConfig::with_paths(template, dir.path().join("archive"));
        config.temp_dir = Some(dir.path().join("scratch"));
        Self { dir, config }
    }

    pub fn archive_root(&self) -> PathBuf {
        self.config.archive_root.clone()
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    pub fn pipeline(&self, converter: Arc<FakeConverter>) -> InvoicePipeline {
        InvoicePipeline::new(self.config.clone(), converter)
    }
}

/// Files directly inside `dir`, sorted; empty when `dir` does not exist.
pub fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

pub fn sample_request() -> InvoiceRequest {
    InvoiceRequest {
        client_name: "John Doe".to_string(),
        oib: "12345678901".to_string(),
        address: "Korzo 1".to_string(),
        postal_code: "51000".to_string(),
        city: "Rijeka".to_string(),
        items: vec![
            LineItemInput::new("Web Design", "1", "500.00"),
            LineItemInput::new("Logo Design", "1", "200.00"),
            LineItemInput::new("Business Cards", "100", "2.50"),
        ],
        ..InvoiceRequest::default()
    }
}

/// Write an executable shell script standing in for `soffice`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Script body answering `--version` and then running `convert`.
pub fn soffice_script(convert: &str) -> String {
    format!(
        r#"if [ "$1" = "--version" ]; then
  echo "FakeOffice 7.6"
  exit 0
fi
{}"#,
        convert
    )
}

/// Conversion that copies the input to `<outdir>/<stem>.pdf`.
pub const COPY_TO_PDF: &str = r#"outdir=""
input=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outdir) outdir="$2"; shift 2 ;;
    --convert-to) shift 2 ;;
    --headless) shift ;;
    *) input="$1"; shift ;;
  esac
done
name=$(basename "$input")
cp "$input" "$outdir/${name%.*}.pdf""#;
