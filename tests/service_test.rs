use big_export::{
    BrowserAutomation, BrowserConfig, Context, ErrorType, ExportFormat, ExportOptions,
    ExportResult, ExportService, ImagesRenderer, PdfRenderer, Presentation, Renderer, RetryConfig,
    Slide,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Fails `failures` times with `message`, then writes a small file and succeeds.
struct FlakyRenderer {
    failures: usize,
    message: &'static str,
    attempts: AtomicUsize,
}

impl FlakyRenderer {
    fn new(failures: usize, message: &'static str) -> Arc<Self> {
        Arc::new(Self {
            failures,
            message,
            attempts: AtomicUsize::new(0),
        })
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Renderer for FlakyRenderer {
    fn render(
        &self,
        _ctx: &Context,
        _presentation: &Presentation,
        options: &ExportOptions,
    ) -> anyhow::Result<ExportResult> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            anyhow::bail!("{}", self.message);
        }
        fs::write(&options.output_path, b"ok")?;
        let mut result = ExportResult::success(options.format, &options.output_path);
        result.file_size = 2;
        Ok(result)
    }

    fn supports(&self, format: ExportFormat) -> bool {
        format == ExportFormat::Html
    }

    fn mime_type(&self) -> &'static str {
        "text/html"
    }
}

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        ..RetryConfig::default()
    }
}

fn service_with(temp: &Path, retry: RetryConfig, renderer: Arc<FlakyRenderer>) -> ExportService {
    let _ = env_logger::builder().is_test(true).try_init();
    let service = ExportService::empty(temp, retry);
    service.register_renderer(ExportFormat::Html, renderer);
    service
}

fn deck() -> Presentation {
    Presentation::new("Deck").with_slide(Slide::new("<h1>One</h1>"))
}

#[test]
fn test_retries_until_success() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let renderer = FlakyRenderer::new(2, "chrome crashed");
    let service = service_with(temp.path(), fast_retry(3), renderer.clone());
    let options = ExportOptions::new(ExportFormat::Html, temp.path().join("out.html"));

    let result = service
        .export(&Context::background(), &deck(), &options)
        .expect("third attempt succeeds");

    assert!(result.success);
    assert_eq!(renderer.attempts(), 3);
    let metrics = result.metadata.export_metrics.as_ref().expect("metrics embedded");
    assert_eq!(metrics.retry_count, 2);
    assert_eq!(result.warnings.len(), 2);
    assert!(result.warnings[0].starts_with("attempt 1 failed, retrying"));
    assert!(!result.duration.is_empty());
    assert_eq!(service.export_statistics().active_exports, 0);
}

#[test]
fn test_gives_up_after_max_retries() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let renderer = FlakyRenderer::new(5, "render step timeout");
    let service = service_with(temp.path(), fast_retry(1), renderer.clone());
    let options = ExportOptions::new(ExportFormat::Html, temp.path().join("out.html"));

    let failure = service
        .export(&Context::background(), &deck(), &options)
        .unwrap_err();

    assert_eq!(renderer.attempts(), 2);
    assert_eq!(failure.error.kind, ErrorType::Timeout);
    assert!(failure.error.message.contains("render step timeout"));
    assert!(!failure.result.success);
    assert_eq!(
        failure.result.error,
        "timeout error: render step timeout".to_string()
    );
    let meta = failure.result.metadata.error.as_ref().expect("error metadata");
    assert_eq!(meta.retry_count, 1);
    assert!(meta.retryable);
}

#[test]
fn test_non_retryable_error_makes_one_attempt() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let renderer = FlakyRenderer::new(1, "open output: permission denied");
    let service = service_with(temp.path(), fast_retry(5), renderer.clone());
    let options = ExportOptions::new(ExportFormat::Html, temp.path().join("out.html"));

    let failure = service
        .export(&Context::background(), &deck(), &options)
        .unwrap_err();

    assert_eq!(renderer.attempts(), 1);
    assert_eq!(failure.error.kind, ErrorType::Filesystem);
    assert!(!failure.error.retryable);
}

#[test]
fn test_allow_list_can_disable_retrying_a_class() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let renderer = FlakyRenderer::new(1, "headless browser crashed");
    let retry = RetryConfig {
        retryable_errors: vec![ErrorType::Timeout],
        ..fast_retry(3)
    };
    let service = service_with(temp.path(), retry, renderer.clone());
    let options = ExportOptions::new(ExportFormat::Html, temp.path().join("out.html"));

    let failure = service
        .export(&Context::background(), &deck(), &options)
        .unwrap_err();
    assert_eq!(renderer.attempts(), 1);
    assert_eq!(failure.error.kind, ErrorType::Browser);
}

#[test]
fn test_cancel_during_backoff_returns_promptly() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let renderer = FlakyRenderer::new(10, "chrome crashed");
    let retry = RetryConfig {
        max_retries: 3,
        initial_delay: Duration::from_secs(10),
        max_delay: Duration::from_secs(30),
        ..RetryConfig::default()
    };
    let service = service_with(temp.path(), retry, renderer.clone());
    let options = ExportOptions::new(ExportFormat::Html, temp.path().join("out.html"));

    let ctx = Context::background();
    let canceller = ctx.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        canceller.cancel();
    });

    let started = Instant::now();
    let failure = service.export(&ctx, &deck(), &options).unwrap_err();
    let elapsed = started.elapsed();
    handle.join().unwrap();

    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    assert_eq!(renderer.attempts(), 1);
    assert_eq!(failure.error.kind, ErrorType::Timeout);
    assert_eq!(failure.error.code, "CANCELLED");
    assert!(!failure.error.retryable);
}

#[test]
fn test_deadline_during_backoff_is_terminal() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let renderer = FlakyRenderer::new(10, "chrome crashed");
    let retry = RetryConfig {
        initial_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(10),
        ..fast_retry(3)
    };
    let service = service_with(temp.path(), retry, renderer);
    let options = ExportOptions::new(ExportFormat::Html, temp.path().join("out.html"));

    let ctx = Context::with_deadline_in(Duration::from_millis(150));
    let failure = service.export(&ctx, &deck(), &options).unwrap_err();
    assert_eq!(failure.error.code, "DEADLINE_EXCEEDED");
}

#[test]
fn test_oversized_image_dimensions_are_rejected() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let service = ExportService::empty(temp.path(), fast_retry(0));
    service.register_renderer(
        ExportFormat::Images,
        Arc::new(ImagesRenderer::new(None, temp.path())),
    );
    let mut options = ExportOptions::new(ExportFormat::Images, temp.path().join("slides"));
    options.width = Some(u32::MAX);
    options.height = Some(u32::MAX);

    let failure = service
        .export(&Context::background(), &deck(), &options)
        .unwrap_err();
    assert_eq!(failure.error.kind, ErrorType::Validation);
    assert_eq!(failure.error.code, "INVALID_WIDTH");
    assert!(!failure.result.success);
    assert!(!temp.path().join("slides").exists());
}

#[test]
fn test_reserved_metadata_keys_are_rejected() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let renderer = FlakyRenderer::new(0, "unused");
    let service = service_with(temp.path(), fast_retry(0), renderer.clone());
    let mut options = ExportOptions::new(ExportFormat::Html, temp.path().join("out.html"));
    options
        .metadata
        .insert("error_type".to_string(), "mine".to_string());

    let failure = service
        .export(&Context::background(), &deck(), &options)
        .unwrap_err();
    assert_eq!(failure.error.code, "INVALID_METADATA");
    assert_eq!(renderer.attempts(), 0);

    let json = serde_json::to_value(&*failure.result).expect("result serializes");
    assert_eq!(json["metadata"]["error_type"], "validation");
}

#[test]
fn test_fallback_is_recorded_not_raised() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let service = ExportService::empty(temp.path(), fast_retry(3));
    service.register_renderer(ExportFormat::Pdf, Arc::new(PdfRenderer::new(None)));
    let options = ExportOptions::new(ExportFormat::Pdf, temp.path().join("deck.pdf"));

    let result = service
        .export(&Context::background(), &deck(), &options)
        .expect("fallback succeeds");

    let metrics = result.metadata.export_metrics.as_ref().unwrap();
    assert_eq!(metrics.retry_count, 0);
    assert_eq!(metrics.fallbacks_used.len(), 1);
    assert_eq!(metrics.temp_files_created.len(), 1);
    assert!(!metrics.temp_files_created[0].exists());
    assert!(result.warnings.is_empty());
    assert_eq!(result.metadata.extra["mime_type"], "application/pdf");
}

#[test]
fn test_browser_registry_and_cleanup() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let service = ExportService::empty(temp.path(), RetryConfig::default());
    let config = BrowserConfig {
        temp_dir: temp.path().to_path_buf(),
        ..BrowserConfig::default()
    };
    service.register_browser_automation(
        "first",
        Arc::new(BrowserAutomation::new("/nonexistent/chrome", config.clone())),
    );
    service.register_browser_automation(
        "second",
        Arc::new(BrowserAutomation::new("/nonexistent/chrome", config)),
    );
    assert_eq!(service.export_statistics().registered_browsers, 2);

    service.unregister_browser_automation("first").expect("cleanup ok");
    service.unregister_browser_automation("missing").expect("unknown id is fine");
    assert_eq!(service.export_statistics().registered_browsers, 1);

    service.kill_all_browser_processes().expect("nothing to kill");

    let fresh = temp.path().join("big-export-pdf-fresh.html");
    let unrelated = temp.path().join("keep-me.txt");
    fs::write(&fresh, "x").unwrap();
    fs::write(&unrelated, "x").unwrap();

    assert_eq!(service.cleanup().expect("cleanup succeeds"), 0);
    assert!(fresh.exists());

    assert_eq!(service.sweep_temp_files(Duration::ZERO).unwrap(), 1);
    assert!(!fresh.exists());
    assert!(unrelated.exists());
}
