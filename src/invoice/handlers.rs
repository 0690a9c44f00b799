use actix_files::NamedFile;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::Local;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::archive::{ArchiveError, ArchivedInvoice};
use crate::generators::{GeneratedInvoice, GeneratorError};
use crate::invoice::models::{InvoiceContext, InvoiceMeta, InvoiceReceipt, InvoiceRequest};
use crate::{AppState, ErrorResponse};

pub const INVOICE_NUMBER_HEADER: &str = "X-Invoice-Number";
pub const REJECTED_ITEMS_HEADER: &str = "X-Rejected-Items";

/// What `POST /api/invoices` answers with.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// The generated PDF as an attachment.
    #[default]
    Pdf,
    /// An [`InvoiceReceipt`] listing rejected items.
    Json,
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CreateInvoiceQuery {
    #[serde(default)]
    pub format: ResponseFormat,
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListInvoicesQuery {
    /// Four digit year; all years when absent.
    pub year: Option<String>,
}

fn generator_error_response(err: &GeneratorError) -> HttpResponse {
    match err {
        GeneratorError::Validation(errors) => {
            HttpResponse::BadRequest().json(ErrorResponse::bad_request(&errors.to_message()))
        }
        GeneratorError::NoValidItems(rejected) => {
            let details: Vec<String> = rejected
                .iter()
                .map(|r| format!("item {} ('{}'): {}", r.index + 1, r.name, r.reason))
                .collect();
            let message = if details.is_empty() {
                "At least one invoice item is required".to_string()
            } else {
                format!("No valid invoice items. {}", details.join("; "))
            };
            HttpResponse::BadRequest().json(ErrorResponse::bad_request(&message))
        }
        GeneratorError::Conversion(_) => HttpResponse::BadGateway().json(ErrorResponse::new(
            "ConversionFailed",
            "PDF conversion failed",
        )),
        GeneratorError::Archive(ArchiveError::AlreadyExists(path)) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            HttpResponse::Conflict().json(ErrorResponse::conflict(&format!(
                "Invoice '{}' is already archived",
                name
            )))
        }
        GeneratorError::Merge(_) => HttpResponse::InternalServerError().json(
            ErrorResponse::internal_error("Failed to render invoice template"),
        ),
        other => HttpResponse::InternalServerError()
            .json(ErrorResponse::internal_error(&other.to_string())),
    }
}

fn archive_error_response(err: &ArchiveError) -> HttpResponse {
    match err {
        ArchiveError::InvalidYear(_) | ArchiveError::InvalidFileName(_) => {
            HttpResponse::BadRequest().json(ErrorResponse::bad_request(&err.to_string()))
        }
        ArchiveError::NotFound(_) => {
            HttpResponse::NotFound().json(ErrorResponse::not_found("Invoice not found"))
        }
        _ => HttpResponse::InternalServerError()
            .json(ErrorResponse::internal_error(&err.to_string())),
    }
}

#[utoipa::path(
    get,
    path = "/api/invoices/meta",
    tag = "Invoices",
    responses(
        (status = 200, description = "Defaults for a new invoice", body = InvoiceMeta),
        (status = 500, description = "Archive could not be read", body = ErrorResponse)
    )
)]
pub async fn get_invoice_meta(state: web::Data<AppState>) -> impl Responder {
    let now = Local::now().naive_local();
    let state = state.clone();

    match web::block(move || state.pipeline.invoice_meta(now)).await {
        Ok(Ok(meta)) => HttpResponse::Ok().json(meta),
        Ok(Err(e)) => {
            log::error!("Failed to compute invoice meta: {}", e);
            generator_error_response(&e)
        }
        Err(e) => HttpResponse::InternalServerError()
            .json(ErrorResponse::internal_error(&e.to_string())),
    }
}

fn receipt(generated: &GeneratedInvoice) -> InvoiceReceipt {
    InvoiceReceipt {
        invoice_number: generated.invoice_number.clone(),
        year: generated.year.clone(),
        file_name: generated.file_name.clone(),
        formatted_total: generated.context.formatted_total().to_string(),
        rejected: generated.rejected.clone(),
    }
}

#[utoipa::path(
    post,
    path = "/api/invoices",
    tag = "Invoices",
    params(CreateInvoiceQuery),
    request_body = InvoiceRequest,
    responses(
        (status = 200, description = "Generated invoice PDF", body = Vec<u8>, content_type = "application/pdf"),
        (status = 201, description = "Invoice summary when `format=json`", body = InvoiceReceipt),
        (status = 400, description = "Invalid request or no valid items", body = ErrorResponse),
        (status = 409, description = "Invoice number already archived", body = ErrorResponse),
        (status = 502, description = "PDF conversion failed", body = ErrorResponse)
    )
)]
pub async fn create_invoice(
    state: web::Data<AppState>,
    query: web::Query<CreateInvoiceQuery>,
    request: web::Json<InvoiceRequest>,
) -> impl Responder {
    let request = request.into_inner();
    log::info!(
        "Invoice request for '{}' with {} items",
        request.client_name,
        request.items.len()
    );

    let now = Local::now().naive_local();
    let generated = match state.pipeline.generate(request, now).await {
        Ok(generated) => generated,
        Err(e) => {
            log::error!("Invoice generation failed: {}", e);
            return generator_error_response(&e);
        }
    };

    if query.format == ResponseFormat::Json {
        return HttpResponse::Created()
            .insert_header((INVOICE_NUMBER_HEADER, generated.invoice_number.clone()))
            .insert_header((REJECTED_ITEMS_HEADER, generated.rejected.len().to_string()))
            .json(receipt(&generated));
    }

    let path = generated.path.clone();
    let pdf = match web::block(move || std::fs::read(path)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            log::error!("Failed to read archived invoice: {}", e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error("Failed to read generated invoice"));
        }
        Err(e) => {
            log::error!("Blocking read failed: {}", e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error("Failed to read generated invoice"));
        }
    };

    HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(generated.file_name.clone())],
        })
        .insert_header((INVOICE_NUMBER_HEADER, generated.invoice_number.clone()))
        .insert_header((REJECTED_ITEMS_HEADER, generated.rejected.len().to_string()))
        .body(pdf)
}

#[utoipa::path(
    get,
    path = "/api/invoices",
    tag = "Invoices",
    params(ListInvoicesQuery),
    responses(
        (status = 200, description = "Archived invoices", body = Vec<ArchivedInvoice>),
        (status = 400, description = "Invalid year", body = ErrorResponse)
    )
)]
pub async fn list_invoices(
    state: web::Data<AppState>,
    query: web::Query<ListInvoicesQuery>,
) -> impl Responder {
    let archive = state.pipeline.archive().clone();
    let year = query.into_inner().year;

    match web::block(move || archive.list(year.as_deref())).await {
        Ok(Ok(invoices)) => HttpResponse::Ok().json(invoices),
        Ok(Err(e)) => archive_error_response(&e),
        Err(e) => HttpResponse::InternalServerError()
            .json(ErrorResponse::internal_error(&e.to_string())),
    }
}

#[utoipa::path(
    get,
    path = "/api/invoices/{year}/{file_name}",
    tag = "Invoices",
    params(
        ("year" = String, Path, description = "Archive year"),
        ("file_name" = String, Path, description = "Archived PDF file name")
    ),
    responses(
        (status = 200, description = "Archived invoice PDF", body = Vec<u8>, content_type = "application/pdf"),
        (status = 404, description = "Invoice not found", body = ErrorResponse)
    )
)]
pub async fn get_invoice_file(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (year, file_name) = path.into_inner();
    let resolved = match state.pipeline.archive().resolve(&year, &file_name) {
        Ok(path) => path,
        Err(e) => return archive_error_response(&e),
    };

    match NamedFile::open_async(&resolved).await {
        Ok(file) => file
            .set_content_disposition(ContentDisposition {
                disposition: DispositionType::Attachment,
                parameters: vec![DispositionParam::Filename(file_name)],
            })
            .into_response(&req),
        Err(e) => {
            log::error!("Failed to open {}: {}", resolved.display(), e);
            HttpResponse::NotFound().json(ErrorResponse::not_found("Invoice not found"))
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/invoices/{year}/{file_name}/data",
    tag = "Invoices",
    params(
        ("year" = String, Path, description = "Archive year"),
        ("file_name" = String, Path, description = "Archived PDF file name")
    ),
    responses(
        (status = 200, description = "Stored invoice data", body = InvoiceContext),
        (status = 404, description = "No stored data for this invoice", body = ErrorResponse)
    )
)]
pub async fn get_invoice_data(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (year, file_name) = path.into_inner();
    let archive = state.pipeline.archive().clone();

    match web::block(move || archive.load_snapshot(&year, &file_name)).await {
        Ok(Ok(context)) => HttpResponse::Ok().json(context),
        Ok(Err(e)) => archive_error_response(&e),
        Err(e) => HttpResponse::InternalServerError()
            .json(ErrorResponse::internal_error(&e.to_string())),
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/invoices/meta").route(web::get().to(get_invoice_meta)))
        .service(
            web::resource("/invoices")
                .route(web::get().to(list_invoices))
                .route(web::post().to(create_invoice)),
        )
        .service(
            web::resource("/invoices/{year}/{file_name}/data")
                .route(web::get().to(get_invoice_data)),
        )
        .service(
            web::resource("/invoices/{year}/{file_name}").route(web::get().to(get_invoice_file)),
        );
}
