//! Validation of invoice form input.
//!
//! Request-level problems (missing client name, malformed dates) are
//! collected into [`ValidationErrors`] and abort the request. Item-level
//! problems only reject the offending item, see [`partition_items`].

use std::fmt;

use super::format::parse_amount;
use super::models::{InvoiceLineItem, InvoiceRequest, ItemPartition, LineItemInput, RejectedItem};
use crate::generators::common::{parse_form_date, parse_form_time};

/// Upper bound on the number of items in one invoice.
pub const MAX_ITEMS: usize = 500;
/// Upper bound on the length of a caller-supplied invoice number.
pub const MAX_INVOICE_NUMBER_LEN: usize = 32;

/// Validation error with a user-facing message.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The field that failed validation
    pub field: String,
    pub message: String,
    /// Suggestion for how to fix the error
    pub suggestion: Option<String>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn empty_field(field: &str, label: &str) -> Self {
        Self::new(field, format!("{} must not be empty", label))
    }

    pub fn invalid_oib(field: &str) -> Self {
        Self::new(field, "OIB must consist of 11 digits")
            .with_suggestion("Check the tax id, e.g. 12345678901")
    }

    pub fn invalid_date(field: &str, value: &str) -> Self {
        Self::new(field, format!("Date '{}' is not valid", value))
            .with_suggestion("Use YYYY-MM-DD or DD.MM.YYYY")
    }

    pub fn invalid_time(field: &str, value: &str) -> Self {
        Self::new(field, format!("Time '{}' is not valid", value)).with_suggestion("Use HH:MM")
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, ". {}", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn add(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Numbered, multi-line message for API responses.
    pub fn to_message(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }

        let mut parts = vec![format!(
            "Validation failed: {} error(s) found",
            self.errors.len()
        )];
        for (i, error) in self.errors.iter().enumerate() {
            parts.push(format!("{}. {}", i + 1, error));
        }
        parts.join("\n")
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_message())
    }
}

impl std::error::Error for ValidationErrors {}

pub fn validate_required(value: &str, field: &str, label: &str, errors: &mut ValidationErrors) {
    if value.trim().is_empty() {
        errors.add(ValidationError::empty_field(field, label));
    }
}

/// OIB is optional; when given it must be 11 digits.
pub fn validate_oib_optional(value: &str, field: &str, errors: &mut ValidationErrors) {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return;
    }

    if trimmed.len() != 11 || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        errors.add(ValidationError::invalid_oib(field));
    }
}

pub fn validate_date_optional(value: Option<&str>, field: &str, errors: &mut ValidationErrors) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        if parse_form_date(value).is_none() {
            errors.add(ValidationError::invalid_date(field, value));
        }
    }
}

pub fn validate_time_optional(value: Option<&str>, field: &str, errors: &mut ValidationErrors) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        if parse_form_time(value).is_none() {
            errors.add(ValidationError::invalid_time(field, value));
        }
    }
}

impl InvoiceRequest {
    /// Validate the request-level fields. Items are checked separately.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        validate_required(&self.client_name, "client_name", "Client name", &mut errors);
        validate_oib_optional(&self.oib, "oib", &mut errors);
        validate_date_optional(self.invoice_date.as_deref(), "invoice_date", &mut errors);
        validate_time_optional(self.invoice_time.as_deref(), "invoice_time", &mut errors);
        validate_date_optional(self.due_date.as_deref(), "due_date", &mut errors);

        if let Some(number) = self.invoice_number.as_deref() {
            if number.trim().chars().count() > MAX_INVOICE_NUMBER_LEN {
                errors.add(
                    ValidationError::new(
                        "invoice_number",
                        format!("At most {} characters are allowed", MAX_INVOICE_NUMBER_LEN),
                    )
                    .with_suggestion("Use the form n/2/2"),
                );
            }
        }

        if self.items.len() > MAX_ITEMS {
            errors.add(ValidationError::new(
                "items",
                format!("At most {} items are allowed", MAX_ITEMS),
            ));
        }

        errors.into_result()
    }
}

/// Split submitted items into valid line items and rejections.
pub fn partition_items(inputs: &[LineItemInput]) -> ItemPartition {
    let mut partition = ItemPartition::default();

    for (index, input) in inputs.iter().enumerate() {
        let name = input.name.trim();
        match line_item_from_input(input) {
            Ok(item) => partition.valid.push(item),
            Err(reason) => {
                log::warn!("Rejected item {} ('{}'): {}", index + 1, name, reason);
                partition.rejected.push(RejectedItem {
                    index,
                    name: name.to_string(),
                    reason,
                });
            }
        }
    }

    partition
}

fn line_item_from_input(input: &LineItemInput) -> Result<InvoiceLineItem, String> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err("item name must not be empty".to_string());
    }

    let quantity = parse_amount(&input.quantity).map_err(|e| format!("invalid quantity: {}", e))?;
    let unit_price =
        parse_amount(&input.unit_price).map_err(|e| format!("invalid unit price: {}", e))?;

    InvoiceLineItem::new(name, quantity, unit_price)
        .ok_or_else(|| "line total is out of range".to_string())
}
