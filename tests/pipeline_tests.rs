mod common;

use chrono::{NaiveDate, NaiveDateTime};
use common::{list_dir, read_entry, sample_request, FakeConverter, FakeMode, TestEnv};
use pretty_assertions::assert_eq;
use racun_server::archive::{ArchiveError, METADATA_DIR};
use racun_server::generators::GeneratorError;
use racun_server::invoice::models::{InvoiceRequest, LineItemInput};
use rust_decimal::Decimal;
use std::sync::Arc;

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, 14)
        .unwrap()
        .and_hms_opt(15, 20, 0)
        .unwrap()
}

#[tokio::test]
async fn test_generate_archives_single_pdf() {
    let env = TestEnv::new();
    let converter = Arc::new(FakeConverter::new(FakeMode::Succeed));
    let pipeline = env.pipeline(converter.clone());

    let generated = pipeline.generate(sample_request(), now()).await.unwrap();

    assert_eq!(generated.invoice_number, "1/2/2");
    assert_eq!(generated.year, "2025");
    assert_eq!(generated.file_name, "1-2-2 - JohnDoe.pdf");
    assert_eq!(generated.context.total(), Decimal::new(95000, 2));
    assert_eq!(generated.context.formatted_total(), "950,00");
    assert!(generated.rejected.is_empty());
    assert_eq!(converter.calls(), 1);

    let year_dir = env.archive_root().join("2025");
    assert_eq!(list_dir(&year_dir), vec!["1-2-2 - JohnDoe.pdf".to_string()]);
    assert_eq!(generated.path, year_dir.join("1-2-2 - JohnDoe.pdf"));

    // The fake converter copies the merged document, so the archived file
    // carries the rendered content.
    let content = read_entry(&generated.path, "content.xml");
    assert!(content.contains("<client>John Doe</client>"));
    assert!(content.contains("<date>14/03/25 15:00</date>"));
    assert!(content.contains("<total>950,00</total>"));

    // Sidecar data, and no scratch directories left behind.
    let metadata = env.archive_root().join(METADATA_DIR).join("2025");
    assert!(metadata.join("1-2-2 - JohnDoe.json").is_file());
    assert!(list_dir(&env.scratch_root()).is_empty());
}

#[tokio::test]
async fn test_generate_numbers_sequentially() {
    let env = TestEnv::new();
    let pipeline = env.pipeline(Arc::new(FakeConverter::new(FakeMode::Succeed)));

    let first = pipeline.generate(sample_request(), now()).await.unwrap();
    let mut request = sample_request();
    request.client_name = "Acme".to_string();
    let second = pipeline.generate(request, now()).await.unwrap();

    assert_eq!(first.invoice_number, "1/2/2");
    assert_eq!(second.invoice_number, "2/2/2");
    assert_eq!(
        pipeline.invoice_meta(now()).unwrap().invoice_number,
        "3/2/2"
    );
}

#[tokio::test]
async fn test_concurrent_requests_get_distinct_numbers() {
    let env = TestEnv::new();
    let pipeline = Arc::new(env.pipeline(Arc::new(FakeConverter::new(FakeMode::Succeed))));

    let mut handles = Vec::new();
    for i in 0..4 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            let mut request = sample_request();
            request.client_name = format!("Client {}", i);
            pipeline.generate(request, now()).await
        }));
    }

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap().unwrap().invoice_number);
    }
    numbers.sort();

    assert_eq!(numbers, vec!["1/2/2", "2/2/2", "3/2/2", "4/2/2"]);
    assert_eq!(list_dir(&env.archive_root().join("2025")).len(), 4);
}

#[tokio::test]
async fn test_existing_invoice_is_not_overwritten() {
    let env = TestEnv::new();
    let pipeline = env.pipeline(Arc::new(FakeConverter::new(FakeMode::Succeed)));
    let first = pipeline.generate(sample_request(), now()).await.unwrap();
    let original = std::fs::read(&first.path).unwrap();

    let mut again = sample_request();
    again.invoice_number = Some("1/2/2".to_string());
    again.items = vec![LineItemInput::new("Hosting", "12", "10.00")];
    let result = pipeline.generate(again, now()).await;

    assert!(matches!(
        result,
        Err(GeneratorError::Archive(ArchiveError::AlreadyExists(_)))
    ));
    assert_eq!(std::fs::read(&first.path).unwrap(), original);
    assert!(list_dir(&env.scratch_root()).is_empty());
}

#[tokio::test]
async fn test_conversion_failure_leaves_no_artifact() {
    for mode in [FakeMode::Fail, FakeMode::NoOutput] {
        let env = TestEnv::new();
        let pipeline = env.pipeline(Arc::new(FakeConverter::new(mode)));

        let result = pipeline.generate(sample_request(), now()).await;

        assert!(matches!(result, Err(GeneratorError::Conversion(_))));
        assert!(list_dir(&env.archive_root().join("2025")).is_empty());
        assert!(!env
            .archive_root()
            .join(METADATA_DIR)
            .join("2025")
            .join("1-2-2 - JohnDoe.json")
            .exists());
        assert!(list_dir(&env.scratch_root()).is_empty());
    }
}

#[tokio::test]
async fn test_merge_failure_skips_conversion() {
    let env = TestEnv::with_content("<doc>{{ bank_account }}</doc>");
    let converter = Arc::new(FakeConverter::new(FakeMode::Succeed));
    let pipeline = env.pipeline(converter.clone());

    let result = pipeline.generate(sample_request(), now()).await;

    assert!(matches!(result, Err(GeneratorError::Merge(_))));
    assert_eq!(converter.calls(), 0);
    assert!(list_dir(&env.archive_root().join("2025")).is_empty());
    assert!(list_dir(&env.scratch_root()).is_empty());
}

#[tokio::test]
async fn test_invalid_items_are_reported_and_skipped() {
    let env = TestEnv::new();
    let pipeline = env.pipeline(Arc::new(FakeConverter::new(FakeMode::Succeed)));
    let mut request = sample_request();
    request.items.push(LineItemInput::new("Broken", "two", "5"));
    request.items.push(LineItemInput::new("", "1", "5"));

    let generated = pipeline.generate(request, now()).await.unwrap();

    assert_eq!(generated.context.items().len(), 3);
    assert_eq!(generated.context.formatted_total(), "950,00");
    let rejected: Vec<usize> = generated.rejected.iter().map(|r| r.index).collect();
    assert_eq!(rejected, vec![3, 4]);
}

#[tokio::test]
async fn test_request_without_valid_items_is_rejected() {
    let env = TestEnv::new();
    let converter = Arc::new(FakeConverter::new(FakeMode::Succeed));
    let pipeline = env.pipeline(converter.clone());
    let request = InvoiceRequest {
        client_name: "John Doe".to_string(),
        items: vec![LineItemInput::new("Web Design", "1", "abc")],
        ..InvoiceRequest::default()
    };

    let result = pipeline.generate(request, now()).await;

    match result {
        Err(GeneratorError::NoValidItems(rejected)) => assert_eq!(rejected.len(), 1),
        other => panic!("expected NoValidItems, got {:?}", other),
    }
    assert_eq!(converter.calls(), 0);
    assert!(!env.archive_root().join("2025").exists());
}

#[tokio::test]
async fn test_invalid_request_is_rejected_before_numbering() {
    let env = TestEnv::new();
    let pipeline = env.pipeline(Arc::new(FakeConverter::new(FakeMode::Succeed)));
    let mut request = sample_request();
    request.client_name = "  ".to_string();
    request.invoice_date = Some("31.02.2025".to_string());

    let result = pipeline.generate(request, now()).await;

    match result {
        Err(GeneratorError::Validation(errors)) => assert_eq!(errors.len(), 2),
        other => panic!("expected Validation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invoice_date_selects_archive_year() {
    let env = TestEnv::new();
    let pipeline = env.pipeline(Arc::new(FakeConverter::new(FakeMode::Succeed)));
    let mut request = sample_request();
    request.invoice_date = Some("2024-12-31".to_string());

    let generated = pipeline.generate(request, now()).await.unwrap();

    assert_eq!(generated.year, "2024");
    assert!(env
        .archive_root()
        .join("2024")
        .join("1-2-2 - JohnDoe.pdf")
        .is_file());
}

#[tokio::test]
async fn test_archived_snapshot_round_trips() {
    let env = TestEnv::new();
    let pipeline = env.pipeline(Arc::new(FakeConverter::new(FakeMode::Succeed)));
    let generated = pipeline.generate(sample_request(), now()).await.unwrap();

    let snapshot = pipeline
        .archive()
        .load_snapshot(&generated.year, &generated.file_name)
        .unwrap();

    assert_eq!(snapshot, generated.context);
    let listed = pipeline.archive().list(Some("2025")).unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].has_data);
}

#[tokio::test]
async fn test_dates_outside_four_digit_years_are_validation_errors() {
    let env = TestEnv::new();
    let converter = Arc::new(FakeConverter::new(FakeMode::Succeed));
    let pipeline = env.pipeline(converter.clone());

    for date in ["+262142-12-31", "+10000-01-01", "-0001-01-01"] {
        let mut request = sample_request();
        request.invoice_date = Some(date.to_string());

        let result = pipeline.generate(request, now()).await;

        match result {
            Err(GeneratorError::Validation(errors)) => {
                assert_eq!(errors.errors()[0].field, "invoice_date", "{date}");
            }
            other => panic!("expected Validation for {}, got {:?}", date, other),
        }
    }
    assert_eq!(converter.calls(), 0);
    assert!(list_dir(&env.archive_root()).is_empty());
}

#[tokio::test]
async fn test_last_supported_year_gets_a_due_date() {
    let env = TestEnv::new();
    let pipeline = env.pipeline(Arc::new(FakeConverter::new(FakeMode::Succeed)));
    let mut request = sample_request();
    request.invoice_date = Some("9999-12-31".to_string());

    let generated = pipeline.generate(request, now()).await.unwrap();

    assert_eq!(generated.year, "9999");
    assert_eq!(generated.context.header.due_date, "07/01/00");
}
