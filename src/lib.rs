use actix_cors::Cors;
use actix_web::middleware::Compress;
use actix_web::{http::header, web, App, HttpServer};
use actix_web_prometheus::PrometheusMetricsBuilder;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub mod archive;
pub mod config;
pub mod generators;
pub mod invoice;

use crate::config::AppConfig;
use crate::generators::{DocumentConverter, InvoicePipeline};

/// Shared state handed to every request handler.
pub struct AppState {
    pub pipeline: InvoicePipeline,
}

impl AppState {
    pub fn new(pipeline: InvoicePipeline) -> Self {
        Self { pipeline }
    }

    pub fn from_config(config: AppConfig) -> Self {
        Self::new(InvoicePipeline::from_config(config))
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error: error_type.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn not_found(message: &str) -> Self {
        Self::new("NotFound", message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new("BadRequest", message)
    }

    pub fn conflict(message: &str) -> Self {
        Self::new("Conflict", message)
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new("InternalServerError", message)
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::invoice::handlers::get_invoice_meta,
        crate::invoice::handlers::create_invoice,
        crate::invoice::handlers::list_invoices,
        crate::invoice::handlers::get_invoice_file,
        crate::invoice::handlers::get_invoice_data
    ),
    components(
        schemas(
            invoice::models::InvoiceType,
            invoice::models::InvoiceLineItem,
            invoice::models::InvoiceHeader,
            invoice::models::InvoiceContext,
            invoice::models::LineItemInput,
            invoice::models::InvoiceRequest,
            invoice::models::RejectedItem,
            invoice::models::InvoiceMeta,
            invoice::models::InvoiceReceipt,
            invoice::handlers::ResponseFormat,
            archive::ArchivedInvoice,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Invoices", description = "Invoice generation and archive endpoints.")
    )
)]
pub struct ApiDoc;

/// Register every API route under `/api`.
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/api").configure(invoice::config));
}

pub async fn run() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e));
        }
    };

    if !config.template_path.is_file() {
        log::warn!(
            "Invoice template {} does not exist; generation requests will fail",
            config.template_path.display()
        );
    }

    let bind = (config.bind_address.clone(), config.port);
    let app_state = web::Data::new(AppState::from_config(config));

    if let Err(e) = app_state
        .pipeline
        .converter()
        .check_available()
        .await
    {
        log::warn!("PDF converter is not available: {}", e);
    }

    let prometheus = PrometheusMetricsBuilder::new("racun_server")
        .endpoint("/metrics")
        .build()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    log::info!("Starting server at http://{}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        let app_state = app_state.clone();
        let prometheus = prometheus.clone();
        let cors = Cors::default()
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://localhost:3000")
            .allowed_origin("http://localhost:8080")
            .allowed_origin("http://127.0.0.1:8080")
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
            .expose_headers(vec![
                header::CONTENT_DISPOSITION,
                header::HeaderName::from_static("x-invoice-number"),
                header::HeaderName::from_static("x-rejected-items"),
            ])
            .max_age(3600);

        App::new()
            .wrap(Compress::default())
            .wrap(prometheus)
            .wrap(cors)
            .app_data(app_state)
            .configure(configure_api)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
    })
    .keep_alive(actix_web::http::KeepAlive::Os)
    .bind(bind)?
    .run()
    .await
}
