// ABOUTME: Export orchestration for the big-export pipeline
// ABOUTME: Validates requests, dispatches to renderers with retry and backoff, and owns shutdown

use crate::automation::BrowserAutomation;
use crate::config::{Config, RetryConfig};
use crate::context::Context;
use crate::errors::{BrowserError, ErrorType, ExportError, Result};
use crate::model::{
    ErrorMetadata, ExportFormat, ExportMetrics, ExportOptions, ExportResult, PageSize, Presentation,
    RESERVED_METADATA_KEYS,
};
use crate::renderers::{HtmlRenderer, ImagesRenderer, MarkdownRenderer, PdfRenderer, Renderer};
use crate::utils::{ensure_directory_exists, ensure_parent_directory_exists, format_duration, validate_safe_path, TEMP_PREFIX};
use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Temp files older than this are swept by [`ExportService::cleanup`].
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Largest accepted raster width or height, in pixels.
pub const MAX_IMAGE_DIMENSION: u32 = 16384;

/// Registry key of the browser discovered at construction.
pub const DEFAULT_BROWSER_ID: &str = "default";

/// A terminal export failure. Carries the classified error and the failed result.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct ExportFailure {
    pub result: Box<ExportResult>,
    pub error: ExportError,
}

/// Aggregate view across the service and its registered browsers.
#[derive(Debug, Clone, Serialize)]
pub struct ExportStatistics {
    pub active_exports: usize,
    pub retry_config: RetryConfig,
    pub supported_formats: Vec<ExportFormat>,
    pub registered_browsers: usize,
    pub total_browser_processes: usize,
}

/// Classify an opaque renderer error.
///
/// An `ExportError` passes through unchanged. Anything else is bucketed by
/// case-insensitive keywords in its full message chain.
pub fn categorize_error(err: anyhow::Error) -> ExportError {
    let err = match err.downcast::<ExportError>() {
        Ok(classified) => return classified,
        Err(err) => err,
    };

    let message = format!("{:#}", err);
    let lower = message.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    let kind = if has(&["timeout", "deadline"]) {
        ErrorType::Timeout
    } else if has(&["chrome", "browser", "headless"]) {
        ErrorType::Browser
    } else if has(&["memory", "out of memory"]) {
        ErrorType::Memory
    } else if has(&["permission", "access"]) {
        ErrorType::Filesystem
    } else if has(&["network", "connection"]) {
        ErrorType::Network
    } else {
        ErrorType::Renderer
    };

    ExportError::new(kind, message).with_cause(err)
}

pub struct ExportService {
    renderers: RwLock<HashMap<ExportFormat, Arc<dyn Renderer>>>,
    temp_dir: PathBuf,
    retry: RetryConfig,
    browsers: RwLock<HashMap<String, Arc<BrowserAutomation>>>,
    active: Mutex<HashMap<String, ExportMetrics>>,
}

impl ExportService {
    /// A service with the built-in renderers. The browser is located once here;
    /// when none is found the PDF and image renderers use their local fallbacks.
    pub fn new(config: &Config) -> Result<Self> {
        let service = Self::empty(config.temp_dir.clone(), config.get_retry_config());

        let browser = match BrowserAutomation::discover(config.get_browser_config()) {
            Ok(browser) => {
                info!("Using browser at {:?}", browser.executable());
                let browser = Arc::new(browser);
                service.register_browser_automation(DEFAULT_BROWSER_ID, Arc::clone(&browser));
                Some(browser)
            }
            Err(e) => {
                warn!("No headless browser available, local fallbacks will be used: {}", e);
                None
            }
        };

        service.register_renderer(ExportFormat::Html, Arc::new(HtmlRenderer::new()));
        service.register_renderer(ExportFormat::Pdf, Arc::new(PdfRenderer::new(browser.clone())));
        service.register_renderer(
            ExportFormat::Images,
            Arc::new(
                ImagesRenderer::new(browser, config.temp_dir.clone())
                    .with_font_path(config.font_path.clone()),
            ),
        );
        service.register_renderer(ExportFormat::Markdown, Arc::new(MarkdownRenderer::new()?));
        Ok(service)
    }

    /// A service with no renderers or browsers registered.
    pub fn empty(temp_dir: impl Into<PathBuf>, retry: RetryConfig) -> Self {
        Self {
            renderers: RwLock::new(HashMap::new()),
            temp_dir: temp_dir.into(),
            retry,
            browsers: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_renderer(&self, format: ExportFormat, renderer: Arc<dyn Renderer>) {
        debug!("Registering renderer for {} ({})", format, renderer.mime_type());
        self.renderers.write().insert(format, renderer);
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Export a presentation. On failure the error carries a result with
    /// `success == false` and structured error metadata.
    pub fn export(
        &self,
        ctx: &Context,
        presentation: &Presentation,
        options: &ExportOptions,
    ) -> std::result::Result<ExportResult, ExportFailure> {
        let operation_id = self.allocate_operation(options.format);
        info!(
            "Export {} started: {} slide(s) as {} to {:?}",
            operation_id,
            presentation.slides.len(),
            options.format,
            options.output_path
        );

        let outcome = self.run_export(ctx, &operation_id, presentation, options);

        let mut metrics = self
            .active
            .lock()
            .remove(&operation_id)
            .unwrap_or_else(|| ExportMetrics::start(&operation_id));
        metrics.finish();
        let duration = format_duration(metrics.duration.unwrap_or_default());

        match outcome {
            Ok(mut result) => {
                result.duration = duration;
                result.generated_at = metrics.end_time.unwrap_or_else(Utc::now);
                result.warnings.extend(metrics.warnings.iter().cloned());
                info!(
                    "Export {} finished in {} ({} retries, {} fallback(s))",
                    operation_id,
                    result.duration,
                    metrics.retry_count,
                    metrics.fallbacks_used.len()
                );
                result.metadata.export_metrics = Some(metrics);
                Ok(result)
            }
            Err(error) => {
                error!("Export {} failed: {}", operation_id, error);
                let mut result = ExportResult::failure(options, &error);
                result.duration = duration;
                result.generated_at = metrics.end_time.unwrap_or_else(Utc::now);
                result.warnings = metrics.warnings.clone();
                result.metadata.error = Some(ErrorMetadata {
                    error_type: error.kind,
                    error_code: error.code.clone(),
                    retryable: error.retryable,
                    retry_count: metrics.retry_count,
                });
                result.metadata.export_metrics = Some(metrics);
                Err(ExportFailure {
                    result: Box::new(result),
                    error,
                })
            }
        }
    }

    fn allocate_operation(&self, format: ExportFormat) -> String {
        let mut active = self.active.lock();
        let base = format!(
            "{}-{}",
            format,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        let mut id = base.clone();
        let mut n = 1;
        while active.contains_key(&id) {
            id = format!("{}-{}", base, n);
            n += 1;
        }
        active.insert(id.clone(), ExportMetrics::start(&id));
        id
    }

    fn update_metrics(&self, operation_id: &str, update: impl FnOnce(&mut ExportMetrics)) {
        if let Some(metrics) = self.active.lock().get_mut(operation_id) {
            update(metrics);
        }
    }

    fn run_export(
        &self,
        ctx: &Context,
        operation_id: &str,
        presentation: &Presentation,
        options: &ExportOptions,
    ) -> Result<ExportResult> {
        self.validate_options_detailed(options)?;

        let renderer = self
            .renderers
            .read()
            .get(&options.format)
            .cloned()
            .ok_or_else(|| {
                ExportError::configuration(format!(
                    "no renderer registered for format {}",
                    options.format
                ))
                .with_code("UNSUPPORTED_FORMAT")
            })?;

        if options.format == ExportFormat::Images {
            ensure_directory_exists(&options.output_path)?;
        } else {
            ensure_parent_directory_exists(&options.output_path)?;
        }

        let mut result =
            self.execute_with_retry(ctx, operation_id, renderer.as_ref(), presentation, options)?;
        result
            .metadata
            .extra
            .entry("mime_type".to_string())
            .or_insert_with(|| renderer.mime_type().to_string());
        for (key, value) in &options.metadata {
            result
                .metadata
                .extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        Ok(result)
    }

    /// Reject options the renderers cannot act on. Never retried.
    pub fn validate_options_detailed(&self, options: &ExportOptions) -> Result<()> {
        if options.output_path.as_os_str().is_empty() {
            return Err(ExportError::validation("output_path", "output path is required"));
        }
        validate_safe_path(&options.output_path, "output_path")?;

        if options.page_size == Some(PageSize::Custom) {
            if let Some(page) = options.custom_page {
                if page.width_mm.is_nan() || page.height_mm.is_nan() || page.width_mm <= 0.0 || page.height_mm <= 0.0 {
                    return Err(ExportError::validation(
                        "page_size",
                        format!(
                            "custom page dimensions must be positive, got {}x{}mm",
                            page.width_mm, page.height_mm
                        ),
                    ));
                }
            }
        }
        if let Some(margin) = options.margin_mm {
            if margin.is_nan() || margin < 0.0 {
                return Err(ExportError::validation(
                    "margin",
                    format!("margin must not be negative, got {}mm", margin),
                ));
            }
        }
        for (field, value) in [("width", options.width), ("height", options.height)] {
            match value {
                Some(0) => {
                    return Err(ExportError::validation(
                        field,
                        format!("{} must be greater than zero", field),
                    ));
                }
                Some(pixels) if pixels > MAX_IMAGE_DIMENSION => {
                    return Err(ExportError::validation(
                        field,
                        format!(
                            "{} must be at most {} pixels, got {}",
                            field, MAX_IMAGE_DIMENSION, pixels
                        ),
                    ));
                }
                _ => {}
            }
        }
        if let Some(key) = options
            .metadata
            .keys()
            .find(|key| RESERVED_METADATA_KEYS.contains(&key.as_str()))
        {
            return Err(ExportError::validation(
                "metadata",
                format!("metadata key {:?} is reserved", key),
            ));
        }
        Ok(())
    }

    fn execute_with_retry(
        &self,
        ctx: &Context,
        operation_id: &str,
        renderer: &dyn Renderer,
        presentation: &Presentation,
        options: &ExportOptions,
    ) -> Result<ExportResult> {
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt);
                debug!(
                    "Export {} waiting {} before retry {}",
                    operation_id,
                    format_duration(delay),
                    attempt
                );
                ctx.sleep(delay)
                    .map_err(|e| ExportError::from_context(e, "while waiting to retry"))?;
                self.update_metrics(operation_id, |m| m.retry_count = attempt);
            } else if let Some(e) = ctx.err() {
                return Err(ExportError::from_context(e, "before rendering"));
            }

            match renderer.render(ctx, presentation, options) {
                Ok(mut result) => {
                    let report = std::mem::take(&mut result.report);
                    for fallback in &report.fallbacks {
                        info!(
                            "Export {} used {}: {}",
                            operation_id, fallback.fallback_used, fallback.reason
                        );
                    }
                    self.update_metrics(operation_id, |m| {
                        m.fallbacks_used.extend(report.fallbacks);
                        m.temp_files_created.extend(report.temp_files);
                    });
                    return Ok(result);
                }
                Err(err) => {
                    let error = categorize_error(err);
                    let will_retry =
                        attempt < self.retry.max_retries && self.retry.should_retry(&error);
                    warn!(
                        "Export {} attempt {} failed ({}, {}): {}",
                        operation_id,
                        attempt + 1,
                        error.kind,
                        if will_retry { "retrying" } else { "giving up" },
                        error
                    );
                    if !will_retry {
                        return Err(error);
                    }
                    let warning = format!("attempt {} failed, retrying: {}", attempt + 1, error);
                    self.update_metrics(operation_id, |m| m.warnings.push(warning));
                    attempt += 1;
                }
            }
        }
    }

    pub fn register_browser_automation(&self, id: impl Into<String>, browser: Arc<BrowserAutomation>) {
        let id = id.into();
        debug!("Registering browser automation {}", id);
        self.browsers.write().insert(id, browser);
    }

    /// Remove a browser from the registry and clean it up.
    pub fn unregister_browser_automation(&self, id: &str) -> std::result::Result<(), BrowserError> {
        let removed = self.browsers.write().remove(id);
        match removed {
            Some(browser) => {
                debug!("Unregistered browser automation {}", id);
                browser.cleanup()
            }
            None => Ok(()),
        }
    }

    pub fn export_statistics(&self) -> ExportStatistics {
        let mut supported_formats: Vec<ExportFormat> =
            self.renderers.read().keys().copied().collect();
        supported_formats.sort_by_key(|f| f.as_str());

        let browsers = self.browsers.read();
        ExportStatistics {
            active_exports: self.active.lock().len(),
            retry_config: self.retry.clone(),
            supported_formats,
            registered_browsers: browsers.len(),
            total_browser_processes: browsers.values().map(|b| b.active_process_count()).sum(),
        }
    }

    fn snapshot_browsers(&self) -> Vec<(String, Arc<BrowserAutomation>)> {
        self.browsers
            .read()
            .iter()
            .map(|(id, browser)| (id.clone(), Arc::clone(browser)))
            .collect()
    }

    /// Clean up every registered browser, reporting all failures together.
    pub fn cleanup_all_browsers(&self) -> std::result::Result<(), BrowserError> {
        let mut failures = Vec::new();
        for (id, browser) in self.snapshot_browsers() {
            if let Err(e) = browser.cleanup() {
                failures.push(format!("{}: {}", id, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(BrowserError::Cleanup(failures))
        }
    }

    /// Force-kill every process tracked by every registered browser.
    pub fn kill_all_browser_processes(&self) -> std::result::Result<(), BrowserError> {
        let mut failures = Vec::new();
        for (id, browser) in self.snapshot_browsers() {
            if let Err(e) = browser.kill_active_processes() {
                failures.push(format!("{}: {}", id, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(BrowserError::Cleanup(failures))
        }
    }

    /// Remove this service's temp files older than `max_age`. Returns how many were removed.
    pub fn sweep_temp_files(&self, max_age: Duration) -> std::result::Result<usize, Vec<String>> {
        let pattern = self.temp_dir.join(format!("{}*", TEMP_PREFIX));
        let pattern = pattern.to_string_lossy();
        let entries = match glob::glob(&pattern) {
            Ok(entries) => entries,
            Err(e) => return Err(vec![format!("invalid temp pattern {}: {}", pattern, e)]),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        let mut failures = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    failures.push(e.to_string());
                    continue;
                }
            };
            let age = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if !matches!(age, Some(age) if age >= max_age) || !path.is_file() {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed stale temp file {:?}", path);
                    removed += 1;
                }
                Err(e) => failures.push(format!("{:?}: {}", path, e)),
            }
        }

        if failures.is_empty() {
            Ok(removed)
        } else {
            Err(failures)
        }
    }

    /// Shut down: clean every browser, sweep stale temp files, forget in-flight metrics.
    pub fn cleanup(&self) -> Result<usize> {
        let mut failures = Vec::new();
        if let Err(e) = self.cleanup_all_browsers() {
            failures.push(e.to_string());
        }
        let removed = match self.sweep_temp_files(STALE_TEMP_AGE) {
            Ok(removed) => removed,
            Err(errors) => {
                failures.extend(errors);
                0
            }
        };
        self.active.lock().clear();

        info!(
            "Service cleanup removed {} stale temp file(s) with {} failure(s)",
            removed,
            failures.len()
        );
        if failures.is_empty() {
            Ok(removed)
        } else {
            Err(ExportError::new(
                ErrorType::Filesystem,
                format!("cleanup finished with {} failure(s)", failures.len()),
            )
            .with_details(failures.join("; ")))
        }
    }
}
