//! Generators module - turns invoice requests into archived PDF documents.
//!
//! - `merge` - renders the ODT template with the invoice context
//! - `convert` - converts the merged ODT to PDF with LibreOffice
//! - `pipeline` - runs validation, numbering, merge, conversion and archiving

pub mod common;
pub mod convert;
pub mod merge;
pub mod pipeline;

pub use convert::{ConversionError, DocumentConverter, SofficeConverter};
pub use merge::{merge, MergeError};
pub use pipeline::InvoicePipeline;

use std::path::PathBuf;
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::invoice::models::{InvoiceContext, RejectedItem};
use crate::invoice::validation::ValidationErrors;

/// Errors that can occur during invoice generation.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("{0}")]
    Validation(ValidationErrors),
    #[error("no valid invoice items ({} rejected)", .0.len())]
    NoValidItems(Vec<RejectedItem>),
    #[error("failed to determine the next invoice number: {0}")]
    Numbering(#[source] std::io::Error),
    #[error("failed to create scratch directory: {0}")]
    TempDir(#[source] std::io::Error),
    #[error("failed to render invoice template: {0}")]
    Merge(#[from] MergeError),
    #[error("PDF conversion failed: {0}")]
    Conversion(#[from] ConversionError),
    #[error("failed to archive invoice: {0}")]
    Archive(#[from] ArchiveError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result of a successful generation request.
#[derive(Debug)]
pub struct GeneratedInvoice {
    pub invoice_number: String,
    pub year: String,
    /// Final location of the PDF in the archive.
    pub path: PathBuf,
    pub file_name: String,
    pub context: InvoiceContext,
    /// Items that were dropped from the request.
    pub rejected: Vec<RejectedItem>,
}
