//! Conversion of merged ODT documents to PDF through LibreOffice.
//!
//! Success means the converter exited cleanly AND the expected PDF exists in
//! the output directory. Conversion is never retried here.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Extension of converted documents.
pub const TARGET_EXTENSION: &str = "pdf";
pub const DEFAULT_CONVERTER_BIN: &str = "soffice";
pub const DEFAULT_CONVERSION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("input document not found: {0}")]
    InputMissing(PathBuf),
    #[error("converter '{binary}' is not installed or not runnable: {reason}")]
    ConverterMissing { binary: String, reason: String },
    #[error("failed to start converter: {0}")]
    Spawn(#[source] io::Error),
    #[error("converter exited with status {code:?}: {stderr}")]
    ConverterFailed { code: Option<i32>, stderr: String },
    #[error("converter timed out after {0:?}")]
    Timeout(Duration),
    #[error("converter reported success but produced no output at {0}")]
    OutputMissing(PathBuf),
}

/// Converts an intermediate document into its final distributable form.
#[async_trait]
pub trait DocumentConverter {
    /// Convert `input` into `output_dir`, returning the produced file.
    async fn convert(&self, input: &Path, output_dir: &Path) -> Result<PathBuf, ConversionError>;

    /// Describe the converter if it can run at all.
    async fn check_available(&self) -> Result<String, ConversionError>;
}

/// LibreOffice headless converter.
#[derive(Debug, Clone)]
pub struct SofficeConverter {
    binary: String,
    timeout: Duration,
}

impl Default for SofficeConverter {
    fn default() -> Self {
        Self::new(DEFAULT_CONVERTER_BIN, DEFAULT_CONVERSION_TIMEOUT)
    }
}

impl SofficeConverter {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Run `<binary> --version`, returning its output on success.
    pub async fn check_available(&self) -> Result<String, ConversionError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--version");

        let output = match self.run(&mut cmd).await {
            Ok(output) => output,
            Err(ConversionError::Spawn(e)) => {
                return Err(ConversionError::ConverterMissing {
                    binary: self.binary.clone(),
                    reason: e.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        if !output.status.success() {
            return Err(ConversionError::ConverterMissing {
                binary: self.binary.clone(),
                reason: format!("--version exited with {}", output.status),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a command under the configured timeout. The child is killed when
    /// the timeout elapses.
    async fn run(&self, cmd: &mut Command) -> Result<Output, ConversionError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ConversionError::Timeout(self.timeout))?
            .map_err(ConversionError::Spawn)
    }
}

/// Path of the file the converter is expected to produce for `input`.
pub fn expected_output_path(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{}.{}", stem, TARGET_EXTENSION))
}

#[async_trait]
impl DocumentConverter for SofficeConverter {
    async fn convert(&self, input: &Path, output_dir: &Path) -> Result<PathBuf, ConversionError> {
        log::info!("Converting {} to PDF", input.display());

        if !input.is_file() {
            return Err(ConversionError::InputMissing(input.to_path_buf()));
        }

        let version = self.check_available().await?;
        log::debug!("Using converter: {}", version);

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--headless")
            .arg("--convert-to")
            .arg(TARGET_EXTENSION)
            .arg("--outdir")
            .arg(output_dir)
            .arg(input);

        let output = self.run(&mut cmd).await.map_err(|e| {
            log::error!("Converter invocation failed: {}", e);
            e
        })?;

        log::info!("Converter exit status: {}", output.status);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            log::debug!("Converter stdout: {}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            log::debug!("Converter stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            log::error!("Converter failed: {}", stderr.trim());
            return Err(ConversionError::ConverterFailed {
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        let pdf_path = expected_output_path(input, output_dir);
        if !pdf_path.is_file() {
            log::error!("PDF was not created: {}", pdf_path.display());
            return Err(ConversionError::OutputMissing(pdf_path));
        }

        log::info!("PDF created: {}", pdf_path.display());
        Ok(pdf_path)
    }

    async fn check_available(&self) -> Result<String, ConversionError> {
        SofficeConverter::check_available(self).await
    }
}
