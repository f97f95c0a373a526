// ABOUTME: PDF renderer for the big-export pipeline
// ABOUTME: Prints the HTML intermediate through headless Chrome, falling back to the local PDF writer

use super::html::HtmlRenderer;
use super::Renderer;
use crate::automation::{BrowserAutomation, PdfOptions};
use crate::context::Context;
use crate::errors::{ErrorType, ExportError};
use crate::fallback::{parse_slides_or_default, render_pdf, PdfLayout};
use crate::model::{ExportFormat, ExportOptions, ExportResult, FallbackInfo, Presentation};
use crate::utils::{file_size, temp_file_path, TempFileGuard};
use log::{info, warn};
use std::fs;
use std::path::Path;
use std::sync::Arc;

const FALLBACK_NAME: &str = "local PDF writer";

pub struct PdfRenderer {
    html: HtmlRenderer,
    browser: Option<Arc<BrowserAutomation>>,
}

impl PdfRenderer {
    pub fn new(browser: Option<Arc<BrowserAutomation>>) -> Self {
        Self {
            html: HtmlRenderer::new(),
            browser,
        }
    }

    /// Print through the browser. `Err` carries the reason the fallback is needed.
    fn print_with_browser(&self, ctx: &Context, html_path: &Path, out_path: &Path) -> Result<(), String> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| "no browser automation configured".to_string())?;
        browser
            .is_available(ctx)
            .map_err(|e| format!("browser unavailable: {}", e))?;
        browser
            .convert_html_to_pdf(ctx, html_path, out_path, &PdfOptions::default())
            .map_err(|e| format!("browser conversion failed: {}", e))
    }

    fn write_locally(
        &self,
        presentation: &Presentation,
        options: &ExportOptions,
        document: &str,
    ) -> Result<usize, ExportError> {
        let outlines = if presentation.slides.is_empty() {
            Vec::new()
        } else {
            parse_slides_or_default(document, &presentation.title)
        };
        let layout = PdfLayout::new(options.page_dimensions(), options.margin_mm);
        let pdf = render_pdf(
            &presentation.title,
            &presentation.author,
            &outlines,
            layout,
            options.compression,
        )
        .map_err(|e| ExportError::new(ErrorType::Renderer, e.to_string()).with_cause(e))?;

        fs::write(&options.output_path, &pdf.bytes).map_err(|e| {
            ExportError::filesystem(
                format!("failed to write PDF to {:?}", options.output_path),
                e,
            )
        })?;
        Ok(pdf.page_count)
    }
}

impl Renderer for PdfRenderer {
    fn render(
        &self,
        ctx: &Context,
        presentation: &Presentation,
        options: &ExportOptions,
    ) -> anyhow::Result<ExportResult> {
        let output = &options.output_path;
        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };

        let document = self.html.render_document(presentation, options);
        let temp = TempFileGuard::new(temp_file_path(&dir, "pdf", "html"));
        fs::write(temp.path(), &document).map_err(|e| {
            ExportError::filesystem(format!("failed to write temp HTML {:?}", temp.path()), e)
        })?;

        let mut result = ExportResult::success(ExportFormat::Pdf, output);
        result.report.temp_files.push(temp.path().to_path_buf());

        match self.print_with_browser(ctx, temp.path(), output) {
            Ok(()) => {
                info!("PDF generated with browser at {:?}", output);
                result.page_count = presentation.slides.len().max(1);
            }
            Err(reason) => {
                if let Some(err) = ctx.err() {
                    return Err(ExportError::from_context(err, "during PDF generation").into());
                }
                warn!("Falling back to {}: {}", FALLBACK_NAME, reason);
                result.page_count = self.write_locally(presentation, options, &document)?;
                result
                    .report
                    .fallbacks
                    .push(FallbackInfo::new(reason, FALLBACK_NAME));
            }
        }

        result.file_size = file_size(output);
        Ok(result)
    }

    fn supports(&self, format: ExportFormat) -> bool {
        format == ExportFormat::Pdf
    }

    fn mime_type(&self) -> &'static str {
        "application/pdf"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Slide;
    use tempfile::TempDir;

    #[test]
    fn test_fallback_without_browser() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let out = dir.path().join("deck.pdf");
        let presentation = Presentation::new("Deck")
            .with_slide(Slide::new("<h1>One</h1><p>Body</p>"))
            .with_slide(Slide::new("<h1>Two</h1><pre><code>x = 1</code></pre>"));
        let options = ExportOptions::new(ExportFormat::Pdf, &out);

        let result = PdfRenderer::new(None)
            .render(&Context::background(), &presentation, &options)
            .expect("fallback should succeed");

        assert!(result.success);
        assert_eq!(result.page_count, 2);
        assert!(result.file_size > 0);
        assert_eq!(result.report.fallbacks.len(), 1);
        assert_eq!(result.report.fallbacks[0].fallback_used, FALLBACK_NAME);

        let bytes = fs::read(&out).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
        let parsed = printpdf::lopdf::Document::load_mem(&bytes).expect("valid PDF");
        assert_eq!(parsed.get_pages().len(), 2);

        // The temp HTML beside the output is gone.
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "html").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_compression_option_reaches_local_writer() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let body: String = (0..60)
            .map(|i| format!("<p>paragraph {} with enough words to fill a line</p>", i))
            .collect();
        let presentation =
            Presentation::new("Deck").with_slide(Slide::new(format!("<h1>One</h1>{}", body)));

        let plain = ExportOptions::new(ExportFormat::Pdf, dir.path().join("plain.pdf"));
        let mut packed = ExportOptions::new(ExportFormat::Pdf, dir.path().join("packed.pdf"));
        packed.compression = true;

        let renderer = PdfRenderer::new(None);
        let ctx = Context::background();
        let plain = renderer.render(&ctx, &presentation, &plain).expect("plain render");
        let packed = renderer.render(&ctx, &presentation, &packed).expect("packed render");

        assert!(packed.file_size < plain.file_size);
        let bytes = fs::read(&packed.output_path).unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("/FlateDecode"));
    }

    #[test]
    fn test_cancelled_context_is_terminal() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let options = ExportOptions::new(ExportFormat::Pdf, dir.path().join("deck.pdf"));
        let ctx = Context::background();
        ctx.cancel();

        let err = PdfRenderer::new(None)
            .render(&ctx, &Presentation::new("Deck"), &options)
            .unwrap_err();
        let export_err = err.downcast_ref::<ExportError>().expect("typed error");
        assert_eq!(export_err.code, "CANCELLED");
        assert!(!export_err.retryable);
    }

    #[test]
    fn test_mime_and_support() {
        let renderer = PdfRenderer::new(None);
        assert!(renderer.supports(ExportFormat::Pdf));
        assert!(!renderer.supports(ExportFormat::Html));
        assert_eq!(renderer.mime_type(), "application/pdf");
    }
}
