// ABOUTME: HTML renderer for the big-export pipeline
// ABOUTME: Wraps pre-rendered slide HTML into a themed document, also used as the PDF/image intermediate

use super::Renderer;
use crate::context::Context;
use crate::errors::ExportError;
use crate::model::{ExportFormat, ExportOptions, ExportResult, Presentation};
use crate::utils::file_size;
use log::info;
use std::fs;

const BASE_CSS: &str = r#"
* { box-sizing: border-box; }
body { margin: 0; font-family: "Helvetica Neue", Arial, sans-serif; }
.deck-meta { padding: 2em; }
.slide { padding: 3em 4em; min-height: 100vh; page-break-after: always; break-after: page; }
.slide:last-child { page-break-after: auto; break-after: auto; }
.slide h1, .slide h2 { margin-top: 0; }
.slide pre { padding: 1em; border-radius: 4px; overflow-x: auto; }
.notes { margin-top: 2em; font-size: 0.8em; opacity: 0.7; border-top: 1px solid; }
"#;

const DEFAULT_THEME_CSS: &str = r#"
body { background: #ffffff; color: #222222; }
.slide pre { background: #f4f4f4; }
a { color: #0066cc; }
"#;

const DARK_THEME_CSS: &str = r#"
body { background: #1e1e24; color: #e8e8e8; }
.slide pre { background: #30303a; }
a { color: #7fb8ff; }
"#;

const LIGHT_THEME_CSS: &str = r#"
body { background: #fbfaf7; color: #333333; font-family: Georgia, serif; }
.slide pre { background: #efede6; }
a { color: #8a4b08; }
"#;

/// Escape text for inclusion in HTML
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Renders presentations into standalone HTML documents.
#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer;

impl HtmlRenderer {
    pub fn new() -> Self {
        Self
    }

    fn theme_name<'a>(presentation: &'a Presentation, options: &'a ExportOptions) -> &'a str {
        let theme = if options.theme.is_empty() {
            presentation.theme.as_str()
        } else {
            options.theme.as_str()
        };
        match theme {
            "dark" | "light" => theme,
            _ => "default",
        }
    }

    fn theme_css(theme: &str) -> &'static str {
        match theme {
            "dark" => DARK_THEME_CSS,
            "light" => LIGHT_THEME_CSS,
            _ => DEFAULT_THEME_CSS,
        }
    }

    fn head(&self, title: &str, theme: &str, extra_css: &str) -> String {
        let mut head = String::from("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
        head.push_str("<meta charset=\"UTF-8\">\n");
        head.push_str(
            "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
        );
        head.push_str(&format!("<title>{}</title>\n", escape_html(title)));
        head.push_str("<style>");
        head.push_str(BASE_CSS);
        head.push_str(Self::theme_css(theme));
        head.push_str(extra_css);
        head.push_str("</style>\n</head>\n");
        head.push_str(&format!("<body class=\"theme-{}\">\n", theme));
        head
    }

    fn slide_block(&self, presentation: &Presentation, index: usize, options: &ExportOptions) -> String {
        let slide = &presentation.slides[index];
        let mut block = format!(
            "<div class=\"slide\" id=\"slide-{n}\" data-index=\"{n}\">\n",
            n = index + 1
        );
        block.push_str(slide.html.trim());
        block.push('\n');
        if options.include_notes {
            if let Some(notes) = slide.notes.as_deref().filter(|n| !n.trim().is_empty()) {
                block.push_str(&format!(
                    "<aside class=\"notes\"><p>{}</p></aside>\n",
                    escape_html(notes.trim())
                ));
            }
        }
        block.push_str("</div>\n");
        block
    }

    /// CSS `@page` rule carrying page size, orientation and margins to the browser's print path.
    fn page_css(options: &ExportOptions) -> String {
        let page = options.page_dimensions();
        format!(
            "\n@page {{ size: {:.1}mm {:.1}mm; margin: {:.1}mm; }}\n",
            page.width_mm,
            page.height_mm,
            options.margin_mm.unwrap_or(0.0)
        )
    }

    /// The whole presentation as one document.
    pub fn render_document(&self, presentation: &Presentation, options: &ExportOptions) -> String {
        let theme = Self::theme_name(presentation, options);
        let mut doc = self.head(&presentation.title, theme, &Self::page_css(options));

        if options.include_metadata {
            doc.push_str("<header class=\"deck-meta\">\n");
            doc.push_str(&format!("<h1>{}</h1>\n", escape_html(&presentation.title)));
            if !presentation.author.is_empty() {
                doc.push_str(&format!(
                    "<p class=\"author\">{}</p>\n",
                    escape_html(&presentation.author)
                ));
            }
            if !presentation.date.is_empty() {
                doc.push_str(&format!(
                    "<p class=\"date\">{}</p>\n",
                    escape_html(&presentation.date)
                ));
            }
            doc.push_str("</header>\n");
        }

        doc.push_str("<div class=\"presentation\">\n");
        for index in 0..presentation.slides.len() {
            doc.push_str(&self.slide_block(presentation, index, options));
        }
        doc.push_str("</div>\n</body>\n</html>\n");
        doc
    }

    /// A document holding only slide `index`, sized to a fixed viewport for screenshots.
    pub fn render_slide_document(
        &self,
        presentation: &Presentation,
        index: usize,
        options: &ExportOptions,
        width: u32,
        height: u32,
    ) -> String {
        let theme = Self::theme_name(presentation, options);
        let viewport_css = format!(
            "\nhtml, body {{ width: {w}px; height: {h}px; overflow: hidden; }}\n.slide {{ width: {w}px; height: {h}px; min-height: 0; }}\n",
            w = width,
            h = height
        );
        let mut doc = self.head(&presentation.title, theme, &viewport_css);
        if index < presentation.slides.len() {
            doc.push_str(&self.slide_block(presentation, index, options));
        }
        doc.push_str("</body>\n</html>\n");
        doc
    }
}

impl Renderer for HtmlRenderer {
    fn render(
        &self,
        _ctx: &Context,
        presentation: &Presentation,
        options: &ExportOptions,
    ) -> anyhow::Result<ExportResult> {
        info!("Rendering HTML to {:?}", options.output_path);
        let document = self.render_document(presentation, options);
        fs::write(&options.output_path, document).map_err(|e| {
            ExportError::filesystem(
                format!("failed to write HTML to {:?}", options.output_path),
                e,
            )
        })?;

        let mut result = ExportResult::success(ExportFormat::Html, &options.output_path);
        result.file_size = file_size(&options.output_path);
        result.page_count = presentation.slides.len();
        Ok(result)
    }

    fn supports(&self, format: ExportFormat) -> bool {
        format == ExportFormat::Html
    }

    fn mime_type(&self) -> &'static str {
        "text/html"
    }
}
