//! End-to-end invoice generation.
//!
//! One request runs sequentially: validate, partition items, lock the year,
//! assign a number, merge the template, convert to PDF, archive. Blocking
//! filesystem and zip work runs on the blocking thread pool; the converter is
//! an async child process with a timeout.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::path::PathBuf;
use std::sync::Arc;

use super::common::{
    default_due_date, format_display_date, format_display_date_time, parse_form_date,
    parse_form_time, round_down_hour, DISPLAY_TIME_FORMAT, FORM_DATE_FORMAT,
};
use super::convert::{DocumentConverter, SofficeConverter};
use super::merge::merge;
use super::{GeneratedInvoice, GeneratorError};
use crate::archive::{ArchiveWriter, Sidecar};
use crate::config::AppConfig;
use crate::invoice::models::{InvoiceContext, InvoiceHeader, InvoiceMeta, InvoiceRequest};
use crate::invoice::numbering::{format_invoice_number, next_number};
use crate::invoice::validation::{partition_items, ValidationError, ValidationErrors};

const INTERMEDIATE_FILE: &str = "invoice.odt";

/// Issue and due dates resolved from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceSchedule {
    pub issued_at: NaiveDateTime,
    pub due_date: NaiveDate,
}

impl InvoiceSchedule {
    /// Resolve the request's dates, defaulting to `now` rounded down to the
    /// hour and a due date `due_days` later. Unparseable values fall back to
    /// the defaults; requests are validated before this is called.
    ///
    /// Fails when the default due date cannot be represented.
    pub fn resolve(
        request: &InvoiceRequest,
        now: NaiveDateTime,
        due_days: i64,
    ) -> Result<Self, ValidationErrors> {
        let rounded = round_down_hour(now);

        let date = request
            .invoice_date
            .as_deref()
            .and_then(parse_form_date)
            .unwrap_or(rounded.date());
        let time = request
            .invoice_time
            .as_deref()
            .and_then(parse_form_time)
            .unwrap_or(rounded.time());
        let issued_at = date.and_time(time);

        let due_date = match request.due_date.as_deref().and_then(parse_form_date) {
            Some(due_date) => due_date,
            None => default_due_date(date, due_days).ok_or_else(|| {
                let mut errors = ValidationErrors::new();
                errors.add(
                    ValidationError::new(
                        "due_date",
                        format!("No due date {} days after {}", due_days, date),
                    )
                    .with_suggestion("Enter the due date explicitly"),
                );
                errors
            })?,
        };

        Ok(Self {
            issued_at,
            due_date,
        })
    }

    /// Archive year of the invoice.
    pub fn year(&self) -> String {
        format!("{:04}", self.issued_at.year())
    }
}

pub struct InvoicePipeline {
    config: AppConfig,
    archive: ArchiveWriter,
    converter: Arc<dyn DocumentConverter + Send + Sync>,
}

impl InvoicePipeline {
    pub fn new(config: AppConfig, converter: Arc<dyn DocumentConverter + Send + Sync>) -> Self {
        let archive = ArchiveWriter::new(config.archive_root.clone());
        Self {
            config,
            archive,
            converter,
        }
    }

    /// Pipeline using LibreOffice as configured.
    pub fn from_config(config: AppConfig) -> Self {
        let converter = SofficeConverter::new(config.converter_bin.clone(), config.converter_timeout);
        Self::new(config, Arc::new(converter))
    }

    pub fn archive(&self) -> &ArchiveWriter {
        &self.archive
    }

    pub fn converter(&self) -> &(dyn DocumentConverter + Send + Sync) {
        self.converter.as_ref()
    }

    /// Defaults for a new invoice form: next number, current hour, due date.
    pub fn invoice_meta(&self, now: NaiveDateTime) -> Result<InvoiceMeta, GeneratorError> {
        let schedule = InvoiceSchedule::resolve(&InvoiceRequest::default(), now, self.config.due_days)
            .map_err(GeneratorError::Validation)?;
        let sequence =
            next_number(self.archive.root(), &schedule.year()).map_err(GeneratorError::Numbering)?;

        Ok(InvoiceMeta {
            invoice_number: format_invoice_number(sequence),
            invoice_date: schedule.issued_at.format(FORM_DATE_FORMAT).to_string(),
            invoice_time: schedule.issued_at.format(DISPLAY_TIME_FORMAT).to_string(),
            due_date: schedule.due_date.format(FORM_DATE_FORMAT).to_string(),
        })
    }

    /// Generate, convert and archive one invoice.
    pub async fn generate(
        &self,
        request: InvoiceRequest,
        now: NaiveDateTime,
    ) -> Result<GeneratedInvoice, GeneratorError> {
        request.validate().map_err(GeneratorError::Validation)?;

        let partition = partition_items(&request.items);
        if partition.valid.is_empty() {
            return Err(GeneratorError::NoValidItems(partition.rejected));
        }

        let schedule = InvoiceSchedule::resolve(&request, now, self.config.due_days)
            .map_err(GeneratorError::Validation)?;
        let year = schedule.year();

        // Held until the invoice is archived so concurrent requests cannot
        // take the same number.
        let archive = self.archive.clone();
        let lock_year = year.clone();
        let _lock = tokio::task::spawn_blocking(move || archive.lock_year(&lock_year)).await??;

        let invoice_number = match request
            .invoice_number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
        {
            Some(number) => number.to_string(),
            None => {
                let sequence =
                    next_number(self.archive.root(), &year).map_err(GeneratorError::Numbering)?;
                format_invoice_number(sequence)
            }
        };

        let header = self.build_header(&request, &schedule, &invoice_number);
        let context = InvoiceContext::new(header, partition.valid);
        log::info!(
            "Generating invoice {} for {} ({} items, total {} EUR)",
            invoice_number,
            context.header.client_name,
            context.items().len(),
            context.formatted_total()
        );

        let scratch = self.scratch_dir()?;
        let intermediate = scratch.path().join(INTERMEDIATE_FILE);

        let template_path = self.config.template_path.clone();
        let merge_output = intermediate.clone();
        let merge_context = context.clone();
        tokio::task::spawn_blocking(move || merge(&template_path, &merge_output, &merge_context))
            .await??;

        let pdf = self
            .converter
            .convert(&intermediate, scratch.path())
            .await
            .map_err(|e| {
                log::error!("Conversion of invoice {} failed: {}", invoice_number, e);
                e
            })?;

        let archive = self.archive.clone();
        let archive_year = year.clone();
        let archive_number = invoice_number.clone();
        let archive_context = context.clone();
        let final_path: PathBuf = tokio::task::spawn_blocking(move || {
            archive.archive(
                &pdf,
                &archive_year,
                &archive_number,
                &archive_context.header.client_name,
                Some(Sidecar {
                    context: &archive_context,
                    intermediate: Some(&intermediate),
                }),
            )
        })
        .await??;

        if let Err(e) = scratch.close() {
            log::warn!("Failed to remove scratch directory: {}", e);
        }

        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(GeneratedInvoice {
            invoice_number,
            year,
            path: final_path,
            file_name,
            context,
            rejected: partition.rejected,
        })
    }

    fn build_header(
        &self,
        request: &InvoiceRequest,
        schedule: &InvoiceSchedule,
        invoice_number: &str,
    ) -> InvoiceHeader {
        let due_date = format_display_date(schedule.due_date);
        let location = request
            .location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.config.location);

        InvoiceHeader {
            client_name: request.client_name.trim().to_string(),
            oib: request.oib.trim().to_string(),
            address: request.address.trim().to_string(),
            postal_code: request.postal_code.trim().to_string(),
            city: request.city.trim().to_string(),
            invoice_type: request.invoice_type,
            invoice_number: invoice_number.to_string(),
            invoice_date: format_display_date_time(schedule.issued_at),
            invoice_time: schedule.issued_at.format(DISPLAY_TIME_FORMAT).to_string(),
            due_date: due_date.clone(),
            due_date_desc: due_date,
            location: location.to_string(),
        }
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir, GeneratorError> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("invoice-");
            builder
        };
        let scratch = match &self.config.temp_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(GeneratorError::TempDir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        };
        scratch.map_err(GeneratorError::TempDir)
    }
}
