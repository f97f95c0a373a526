// ABOUTME: Slide image renderer for the big-export pipeline
// ABOUTME: Screenshots one single-slide document per slide, drawing locally when Chrome cannot

use super::html::HtmlRenderer;
use super::Renderer;
use crate::automation::{BrowserAutomation, ImageOptions};
use crate::context::Context;
use crate::errors::{ErrorType, ExportError};
use crate::fallback::{
    parse_slides_or_default, recompress_image, render_slide, save_image, ContentLine, Palette,
    SlideOutline, Typeface,
};
use crate::model::{ExportFormat, ExportOptions, ExportResult, FallbackInfo, Presentation};
use crate::utils::{ensure_directory_exists, file_size, temp_file_path, TempFileGuard};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

const FALLBACK_NAME: &str = "local raster renderer";

/// File name for the slide at zero-based `index`.
pub fn slide_file_name(index: usize, extension: &str) -> String {
    format!("slide-{:03}.{}", index + 1, extension)
}

/// MIME type of a slide image with the given extension.
pub fn mime_type_for_extension(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        _ => "image/png",
    }
}

pub struct ImagesRenderer {
    html: HtmlRenderer,
    browser: Option<Arc<BrowserAutomation>>,
    temp_dir: PathBuf,
    font_path: Option<PathBuf>,
    typeface: OnceLock<Typeface>,
}

impl ImagesRenderer {
    pub fn new(browser: Option<Arc<BrowserAutomation>>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            html: HtmlRenderer::new(),
            browser,
            temp_dir: temp_dir.into(),
            font_path: None,
            typeface: OnceLock::new(),
        }
    }

    /// Prefer this TrueType font for locally drawn slides.
    pub fn with_font_path(mut self, font_path: Option<PathBuf>) -> Self {
        self.font_path = font_path;
        self
    }

    fn typeface(&self) -> &Typeface {
        self.typeface
            .get_or_init(|| Typeface::load(self.font_path.as_deref()))
    }

    fn ready_browser(&self, ctx: &Context) -> Result<&BrowserAutomation, String> {
        let browser = self
            .browser
            .as_deref()
            .ok_or_else(|| "no browser automation configured".to_string())?;
        browser
            .is_available(ctx)
            .map_err(|e| format!("browser unavailable: {}", e))?;
        Ok(browser)
    }

    fn draw_locally(
        &self,
        outline: &SlideOutline,
        options: &ExportOptions,
        theme: &str,
        out_path: &Path,
    ) -> Result<(), ExportError> {
        let (width, height) = options.image_dimensions();
        let canvas = render_slide(outline, self.typeface(), width, height, Palette::for_theme(theme));
        save_image(&canvas, out_path, options.compression).map_err(|e| {
            ExportError::new(
                ErrorType::Renderer,
                format!("failed to save slide image {:?}", out_path),
            )
            .with_cause(e)
        })
    }

    fn capture_slide(
        &self,
        ctx: &Context,
        browser: &BrowserAutomation,
        document: &str,
        options: &ExportOptions,
        out_path: &Path,
        result: &mut ExportResult,
    ) -> Result<(), String> {
        let temp = TempFileGuard::new(temp_file_path(&self.temp_dir, "slide", "html"));
        fs::write(temp.path(), document)
            .map_err(|e| format!("failed to write slide HTML {:?}: {}", temp.path(), e))?;
        result.report.temp_files.push(temp.path().to_path_buf());

        let (width, height) = options.image_dimensions();
        let image_options = ImageOptions {
            width,
            height,
            quality: options.quality(),
        };
        browser
            .convert_html_to_image(ctx, temp.path(), out_path, &image_options)
            .map_err(|e| format!("browser conversion failed: {}", e))?;
        if options.compression {
            recompress_image(out_path)
                .map_err(|e| format!("failed to recompress {:?}: {}", out_path, e))?;
        }
        Ok(())
    }
}

impl Renderer for ImagesRenderer {
    fn render(
        &self,
        ctx: &Context,
        presentation: &Presentation,
        options: &ExportOptions,
    ) -> anyhow::Result<ExportResult> {
        let out_dir = options.output_path.clone();
        ensure_directory_exists(&out_dir)?;
        ensure_directory_exists(&self.temp_dir)?;

        let extension = options.quality().image_extension();
        let (width, height) = options.image_dimensions();
        let theme = if options.theme.is_empty() {
            presentation.theme.as_str()
        } else {
            options.theme.as_str()
        };
        info!(
            "Rendering {} slide image(s) at {}x{} into {:?}",
            presentation.slides.len(),
            width,
            height,
            out_dir
        );

        let mut result = ExportResult::success(ExportFormat::Images, &out_dir);
        result.metadata.extra.insert(
            "mime_type".to_string(),
            mime_type_for_extension(extension).to_string(),
        );

        let browser = match self.ready_browser(ctx) {
            Ok(browser) => Some(browser),
            Err(reason) => {
                if let Some(err) = ctx.err() {
                    return Err(ExportError::from_context(err, "during image generation").into());
                }
                warn!("Falling back to {}: {}", FALLBACK_NAME, reason);
                result
                    .report
                    .fallbacks
                    .push(FallbackInfo::new(reason, FALLBACK_NAME));
                None
            }
        };

        if presentation.slides.is_empty() {
            let out_path = out_dir.join(slide_file_name(0, extension));
            let mut placeholder = SlideOutline::titled(if presentation.title.trim().is_empty() {
                "Presentation"
            } else {
                presentation.title.as_str()
            });
            placeholder.content.push(ContentLine {
                text: "This presentation has no slides.".to_string(),
                is_code: false,
            });
            self.draw_locally(&placeholder, options, theme, &out_path)?;
            result.file_size = file_size(&out_path);
            result.files.push(out_path);
            result.page_count = 1;
            return Ok(result);
        }

        for index in 0..presentation.slides.len() {
            if let Some(err) = ctx.err() {
                return Err(ExportError::from_context(err, "during image generation").into());
            }

            let out_path = out_dir.join(slide_file_name(index, extension));
            let document = self
                .html
                .render_slide_document(presentation, index, options, width, height);

            let captured = match browser {
                Some(browser) => {
                    match self.capture_slide(ctx, browser, &document, options, &out_path, &mut result) {
                        Ok(()) => true,
                        Err(reason) => {
                            if let Some(err) = ctx.err() {
                                return Err(ExportError::from_context(err, "during image generation").into());
                            }
                            warn!("Slide {} falling back to {}: {}", index + 1, FALLBACK_NAME, reason);
                            result
                                .report
                                .fallbacks
                                .push(FallbackInfo::new(reason, FALLBACK_NAME));
                            false
                        }
                    }
                }
                None => false,
            };

            if !captured {
                let fallback_title = format!("Slide {}", index + 1);
                let outline = parse_slides_or_default(&document, &fallback_title)
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| SlideOutline::titled(fallback_title));
                self.draw_locally(&outline, options, theme, &out_path)?;
            }

            debug!("Wrote slide image {:?}", out_path);
            result.file_size += file_size(&out_path);
            result.files.push(out_path);
        }

        result.page_count = result.files.len();
        Ok(result)
    }

    fn supports(&self, format: ExportFormat) -> bool {
        format == ExportFormat::Images
    }

    fn mime_type(&self) -> &'static str {
        "image/png"
    }
}
