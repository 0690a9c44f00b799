use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use utoipa::ToSchema;

use super::format::format_currency;

/// Kind of invoice printed on the document.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceType {
    /// Plain invoice ("obican").
    #[default]
    Obican,
    /// Taxed R1 invoice.
    R1,
}

impl fmt::Display for InvoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Obican => f.write_str("obican"),
            Self::R1 => f.write_str("r1"),
        }
    }
}

/// One priced line of an invoice.
///
/// The totals and display strings are derived on construction, so an item is
/// never mutated in place; an edit builds a new item.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(try_from = "LineItemRecord")]
pub struct InvoiceLineItem {
    name: String,
    #[schema(value_type = String)]
    quantity: Decimal,
    #[schema(value_type = String)]
    unit_price: Decimal,
    #[schema(value_type = String)]
    line_total: Decimal,
    formatted_unit_price: String,
    formatted_line_total: String,
}

impl InvoiceLineItem {
    /// Build an item. Returns `None` when the line total does not fit a decimal.
    pub fn new(name: impl Into<String>, quantity: Decimal, unit_price: Decimal) -> Option<Self> {
        let line_total = quantity.checked_mul(unit_price)?;
        Some(Self {
            name: name.into(),
            quantity,
            unit_price,
            line_total,
            formatted_unit_price: format_currency(unit_price),
            formatted_line_total: format_currency(line_total),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    pub fn line_total(&self) -> Decimal {
        self.line_total
    }

    pub fn formatted_unit_price(&self) -> &str {
        &self.formatted_unit_price
    }

    pub fn formatted_line_total(&self) -> &str {
        &self.formatted_line_total
    }
}

/// Stored shape of a line item; totals are recomputed when reading it back.
#[derive(Deserialize)]
struct LineItemRecord {
    name: String,
    quantity: Decimal,
    unit_price: Decimal,
}

impl TryFrom<LineItemRecord> for InvoiceLineItem {
    type Error = String;

    fn try_from(record: LineItemRecord) -> Result<Self, Self::Error> {
        InvoiceLineItem::new(record.name, record.quantity, record.unit_price)
            .ok_or_else(|| "line total is out of range".to_string())
    }
}

/// Client and invoice metadata, already in display form.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default, ToSchema)]
pub struct InvoiceHeader {
    pub client_name: String,
    /// Client tax id (OIB).
    pub oib: String,
    pub address: String,
    pub postal_code: String,
    pub city: String,
    pub invoice_type: InvoiceType,
    pub invoice_number: String,
    /// Issue date and time, e.g. `19/10/26 14:00`.
    pub invoice_date: String,
    pub invoice_time: String,
    pub due_date: String,
    pub due_date_desc: String,
    pub location: String,
}

/// Everything the invoice template can reference.
///
/// `total` is always the sum of the items' line totals. It is derived by
/// [`InvoiceContext::new`] and recomputed when a stored snapshot is read back.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(from = "ContextRecord")]
pub struct InvoiceContext {
    #[serde(flatten)]
    pub header: InvoiceHeader,
    items: Vec<InvoiceLineItem>,
    #[schema(value_type = String)]
    total: Decimal,
    formatted_total: String,
}

impl InvoiceContext {
    pub fn new(header: InvoiceHeader, items: Vec<InvoiceLineItem>) -> Self {
        let total: Decimal = items.iter().map(InvoiceLineItem::line_total).sum();
        Self {
            header,
            formatted_total: format_currency(total),
            items,
            total,
        }
    }

    pub fn items(&self) -> &[InvoiceLineItem] {
        &self.items
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn formatted_total(&self) -> &str {
        &self.formatted_total
    }
}

#[derive(Deserialize)]
struct ContextRecord {
    #[serde(flatten)]
    header: InvoiceHeader,
    #[serde(default)]
    items: Vec<InvoiceLineItem>,
}

impl From<ContextRecord> for InvoiceContext {
    fn from(record: ContextRecord) -> Self {
        InvoiceContext::new(record.header, record.items)
    }
}

/// Raw line item as typed into the form.
#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
pub struct LineItemInput {
    #[serde(default)]
    pub name: String,
    /// Quantity; decimal comma or point, JSON numbers are accepted too.
    #[serde(default, deserialize_with = "text_or_number")]
    pub quantity: String,
    /// Unit price in EUR; decimal comma or point, JSON numbers are accepted too.
    #[serde(default, deserialize_with = "text_or_number")]
    pub unit_price: String,
}

impl LineItemInput {
    pub fn new(
        name: impl Into<String>,
        quantity: impl Into<String>,
        unit_price: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            quantity: quantity.into(),
            unit_price: unit_price.into(),
        }
    }
}

/// Invoice form payload.
///
/// Only `client_name` and at least one valid item are required. Missing dates
/// default to the current hour, the due date to the configured number of days
/// later, the invoice number to the next free sequence number.
#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
pub struct InvoiceRequest {
    pub client_name: String,
    #[serde(default)]
    pub oib: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub invoice_type: InvoiceType,
    /// e.g. `3/2/2`; assigned automatically when absent.
    #[serde(default)]
    pub invoice_number: Option<String>,
    /// `YYYY-MM-DD` or `DD.MM.YYYY`.
    #[serde(default)]
    pub invoice_date: Option<String>,
    /// `HH:MM`.
    #[serde(default)]
    pub invoice_time: Option<String>,
    /// `YYYY-MM-DD` or `DD.MM.YYYY`.
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub items: Vec<LineItemInput>,
}

/// A form item that could not be used, with the reason.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct RejectedItem {
    /// Zero-based position in the submitted list.
    pub index: usize,
    pub name: String,
    pub reason: String,
}

/// Summary of a generated invoice, returned instead of the PDF on request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct InvoiceReceipt {
    pub invoice_number: String,
    pub year: String,
    /// Archived PDF, downloadable from `/api/invoices/{year}/{file_name}`.
    pub file_name: String,
    pub formatted_total: String,
    /// Submitted items left off the invoice, with the reason for each.
    pub rejected: Vec<RejectedItem>,
}

/// Submitted items split into usable and rejected ones.
#[derive(Debug, Clone, Default)]
pub struct ItemPartition {
    pub valid: Vec<InvoiceLineItem>,
    pub rejected: Vec<RejectedItem>,
}

/// Defaults suggested to a form before the user fills it in.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct InvoiceMeta {
    pub invoice_number: String,
    /// `YYYY-MM-DD`
    pub invoice_date: String,
    /// `HH:MM`
    pub invoice_time: String,
    /// `YYYY-MM-DD`
    pub due_date: String,
}

fn text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrNumber {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match TextOrNumber::deserialize(deserializer)? {
        TextOrNumber::Text(text) => text,
        TextOrNumber::Number(number) => number.to_string(),
    })
}
