// ABOUTME: Browser-free PDF writer used when Chrome is unavailable
// ABOUTME: Lays slide outlines out one per page and emits them with printpdf's built-in fonts

use super::outline::SlideOutline;
use crate::model::PageDimensions;
use printpdf::lopdf;
use printpdf::{BuiltinFont, IndirectFontRef, Mm};
use thiserror::Error;

const TITLE_SIZE: f64 = 22.0;
const BODY_SIZE: f64 = 12.0;
const CODE_SIZE: f64 = 10.0;
const BODY_LEADING: f64 = 16.0;
const CODE_LEADING: f64 = 13.0;
const DEFAULT_MARGIN_MM: f64 = 20.0;
const POINTS_PER_MM: f64 = 2.83465;

pub const EMPTY_NOTICE: &str = "This document was generated with no slide content.";

#[derive(Error, Debug)]
pub enum PdfWriteError {
    #[error("failed to build PDF: {0}")]
    Build(#[from] printpdf::Error),
    #[error("failed to compress PDF streams: {0}")]
    Compress(#[from] lopdf::Error),
}

/// A finished PDF.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

/// Page geometry in points plus derived wrap widths.
#[derive(Debug, Clone, Copy)]
pub struct PdfLayout {
    pub width: f64,
    pub height: f64,
    pub margin: f64,
}

impl PdfLayout {
    pub fn new(page: PageDimensions, margin_mm: Option<f64>) -> Self {
        let (width, height) = page.to_points();
        let margin = margin_mm.unwrap_or(DEFAULT_MARGIN_MM).max(0.0) * POINTS_PER_MM;
        Self {
            width,
            height,
            margin: margin.min(width / 4.0).min(height / 4.0),
        }
    }

    /// Characters per line for a font size, using an average glyph width of half an em.
    fn wrap_chars(&self, font_size: f64) -> usize {
        let usable = (self.width - 2.0 * self.margin).max(font_size);
        ((usable / (font_size * 0.5)) as usize).max(10)
    }
}

fn mm(points: f64) -> Mm {
    Mm((points / POINTS_PER_MM) as f32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FontStyle {
    Regular,
    Bold,
    Mono,
}

impl FontStyle {
    const ALL: [FontStyle; 3] = [FontStyle::Regular, FontStyle::Bold, FontStyle::Mono];

    fn builtin(self) -> BuiltinFont {
        match self {
            FontStyle::Regular => BuiltinFont::Helvetica,
            FontStyle::Bold => BuiltinFont::HelveticaBold,
            FontStyle::Mono => BuiltinFont::Courier,
        }
    }
}

/// One line of text at a baseline position, in points from the bottom-left corner.
#[derive(Debug, Clone)]
struct PlacedLine {
    style: FontStyle,
    size: f64,
    x: f64,
    y: f64,
    text: String,
}

struct PageWriter {
    layout: PdfLayout,
    pages: Vec<Vec<PlacedLine>>,
    current: Vec<PlacedLine>,
    y: f64,
}

impl PageWriter {
    fn new(layout: PdfLayout) -> Self {
        Self {
            layout,
            pages: Vec::new(),
            current: Vec::new(),
            y: layout.height - layout.margin,
        }
    }

    fn new_page(&mut self) {
        if !self.current.is_empty() {
            self.pages.push(std::mem::take(&mut self.current));
        }
        self.y = self.layout.height - self.layout.margin;
    }

    fn line(&mut self, style: FontStyle, size: f64, leading: f64, text: &str) {
        if self.y - leading < self.layout.margin {
            self.new_page();
        }
        self.y -= leading;
        if text.trim().is_empty() {
            return;
        }
        self.current.push(PlacedLine {
            style,
            size,
            x: self.layout.margin,
            y: self.y,
            text: text.replace('\t', "    "),
        });
    }

    fn gap(&mut self, points: f64) {
        self.y -= points;
    }

    fn finish(mut self) -> Vec<Vec<PlacedLine>> {
        self.new_page();
        if self.pages.is_empty() {
            self.pages.push(Vec::new());
        }
        self.pages
    }
}

/// Place every line: bold title at the top of a page, wrapped body below, code in Courier.
/// Overlong slides continue on the next page. No slides gives a single notice page.
fn lay_out(title: &str, slides: &[SlideOutline], layout: PdfLayout) -> Vec<Vec<PlacedLine>> {
    let mut writer = PageWriter::new(layout);
    let title_chars = layout.wrap_chars(TITLE_SIZE);
    let body_chars = layout.wrap_chars(BODY_SIZE);
    let code_chars = layout.wrap_chars(CODE_SIZE * 1.2);

    if slides.is_empty() {
        let heading = if title.trim().is_empty() { "Presentation" } else { title };
        for line in word_wrap(heading, title_chars) {
            writer.line(FontStyle::Bold, TITLE_SIZE, TITLE_SIZE * 1.3, &line);
        }
        writer.gap(BODY_LEADING);
        writer.line(FontStyle::Regular, BODY_SIZE, BODY_LEADING, EMPTY_NOTICE);
    }

    for (index, slide) in slides.iter().enumerate() {
        if index > 0 {
            writer.new_page();
        }
        for line in word_wrap(&slide.title, title_chars) {
            writer.line(FontStyle::Bold, TITLE_SIZE, TITLE_SIZE * 1.3, &line);
        }
        writer.gap(BODY_LEADING / 2.0);

        for content in &slide.content {
            if content.is_code {
                for chunk in hard_wrap(&content.text, code_chars) {
                    writer.line(FontStyle::Mono, CODE_SIZE, CODE_LEADING, &chunk);
                }
            } else {
                for line in word_wrap(&content.text, body_chars) {
                    writer.line(FontStyle::Regular, BODY_SIZE, BODY_LEADING, &line);
                }
                writer.gap(BODY_LEADING / 4.0);
            }
        }
    }

    writer.finish()
}

/// Write one PDF page per laid-out page with Helvetica, Helvetica-Bold and Courier.
///
/// The built-in fonts use WinAnsi encoding, so Latin-1 text such as accented letters
/// survives while characters outside that set are dropped. With `compress` every stream
/// is Flate-encoded; without it every stream is left uncompressed.
pub fn render_pdf(
    title: &str,
    author: &str,
    slides: &[SlideOutline],
    layout: PdfLayout,
    compress: bool,
) -> Result<PdfDocument, PdfWriteError> {
    let pages = lay_out(title, slides, layout);
    let (width, height) = (mm(layout.width), mm(layout.height));

    let (doc, first_page, first_layer) = printpdf::PdfDocument::new(title, width, height, "Page 1");
    let doc = doc.with_author(author).with_producer("big-export");
    let fonts = FontStyle::ALL
        .iter()
        .map(|style| doc.add_builtin_font(style.builtin()))
        .collect::<Result<Vec<IndirectFontRef>, _>>()?;

    for (index, lines) in pages.iter().enumerate() {
        let layer = if index == 0 {
            doc.get_page(first_page).get_layer(first_layer)
        } else {
            let (page, layer) = doc.add_page(width, height, format!("Page {}", index + 1));
            doc.get_page(page).get_layer(layer)
        };
        for line in lines {
            let font = &fonts[line.style as usize];
            layer.use_text(line.text.as_str(), line.size as f32, mm(line.x), mm(line.y), font);
        }
    }

    let bytes = set_stream_compression(&doc.save_to_bytes()?, compress)?;
    Ok(PdfDocument {
        bytes,
        page_count: pages.len(),
    })
}

fn set_stream_compression(bytes: &[u8], compress: bool) -> Result<Vec<u8>, lopdf::Error> {
    let mut doc = lopdf::Document::load_mem(bytes)?;
    if compress {
        doc.compress();
    } else {
        doc.decompress();
    }
    let mut out = Vec::with_capacity(bytes.len());
    doc.save_to(&mut out)?;
    Ok(out)
}

/// Word wrap text to fit within max characters per line
pub fn word_wrap(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current = word.to_string();
        } else if current.chars().count() + 1 + word.chars().count() <= max_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Split a code line at exactly `max_chars`, keeping indentation.
fn hard_wrap(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(max_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::outline::ContentLine;

    fn layout() -> PdfLayout {
        PdfLayout::new(PageDimensions::A4, None)
    }

    /// Shown strings on one page, one per line, decoded as WinAnsi.
    fn page_text(bytes: &[u8], page: u32) -> String {
        let doc = lopdf::Document::load_mem(bytes).expect("valid PDF");
        let page_id = doc.get_pages()[&page];
        let content = doc
            .get_and_decode_page_content(page_id)
            .expect("page content");
        content
            .operations
            .iter()
            .filter(|op| op.operator == "Tj")
            .filter_map(|op| op.operands.first())
            .filter_map(|operand| operand.as_str().ok())
            .map(|raw| lopdf::Document::decode_text(Some("WinAnsiEncoding"), raw))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn body(text: &str) -> ContentLine {
        ContentLine {
            text: text.to_string(),
            is_code: false,
        }
    }

    #[test]
    fn test_zero_slides_gives_notice_page() {
        let doc = render_pdf("Empty", "", &[], layout(), false).expect("render failed");
        assert_eq!(doc.page_count, 1);
        assert!(doc.bytes.starts_with(b"%PDF-"));
        let text = page_text(&doc.bytes, 1);
        assert!(text.contains("Empty"));
        assert!(text.contains(EMPTY_NOTICE));
    }

    #[test]
    fn test_one_page_per_slide() {
        let slides = vec![
            SlideOutline::titled("One"),
            SlideOutline {
                title: "Two".to_string(),
                content: vec![ContentLine {
                    text: "let x = (1);".to_string(),
                    is_code: true,
                }],
            },
        ];
        let doc = render_pdf("Deck", "Me", &slides, layout(), false).expect("render failed");
        assert_eq!(doc.page_count, 2);

        let parsed = lopdf::Document::load_mem(&doc.bytes).unwrap();
        assert_eq!(parsed.get_pages().len(), 2);
        assert!(page_text(&doc.bytes, 1).contains("One"));
        let second = page_text(&doc.bytes, 2);
        assert!(second.contains("Two"));
        assert!(second.contains("let x = (1);"));
    }

    #[test]
    fn test_latin_text_survives_and_unmappable_is_dropped() {
        let slides = vec![SlideOutline {
            title: "Café 日本語".to_string(),
            content: vec![body("naïve façade Über")],
        }];
        let doc = render_pdf("Deck", "", &slides, layout(), false).expect("render failed");
        let text = page_text(&doc.bytes, 1);
        assert!(text.contains("Café"), "got {:?}", text);
        assert!(text.contains("naïve façade Über"), "got {:?}", text);
        assert!(!text.contains('?'));
        assert!(!text.contains('日'));
    }

    #[test]
    fn test_page_box_follows_layout() {
        let landscape = PageDimensions {
            width_mm: 297.0,
            height_mm: 210.0,
        };
        let doc = render_pdf("Deck", "", &[], PdfLayout::new(landscape, None), false)
            .expect("render failed");
        let parsed = lopdf::Document::load_mem(&doc.bytes).unwrap();
        let page_id = parsed.get_pages()[&1];
        let media_box = parsed
            .get_dictionary(page_id)
            .and_then(|page| page.get(b"MediaBox"))
            .and_then(lopdf::Object::as_array)
            .expect("page has a MediaBox");
        let width = media_box[2].as_float().unwrap();
        let height = media_box[3].as_float().unwrap();
        assert!((width - 841.89).abs() < 0.5, "width {}", width);
        assert!((height - 595.28).abs() < 0.5, "height {}", height);
    }

    #[test]
    fn test_compression_shrinks_content_and_keeps_text() {
        let content: Vec<ContentLine> = (0..120)
            .map(|i| body(&format!("repeated body line number {}", i)))
            .collect();
        let slides = vec![SlideOutline {
            title: "Dense".to_string(),
            content,
        }];
        let plain = render_pdf("Deck", "", &slides, layout(), false).expect("render failed");
        let packed = render_pdf("Deck", "", &slides, layout(), true).expect("render failed");

        assert_eq!(plain.page_count, packed.page_count);
        assert!(packed.bytes.len() < plain.bytes.len());
        assert!(!String::from_utf8_lossy(&plain.bytes).contains("/FlateDecode"));
        assert!(String::from_utf8_lossy(&packed.bytes).contains("/FlateDecode"));
        assert!(page_text(&packed.bytes, 1).contains("repeated body line number 0"));
    }

    #[test]
    fn test_long_slide_continues_on_next_page() {
        let content = (0..200).map(|i| body(&format!("line {}", i))).collect();
        let slides = vec![SlideOutline {
            title: "Long".to_string(),
            content,
        }];
        let doc = render_pdf("Deck", "", &slides, layout(), false).expect("render failed");
        assert!(doc.page_count > 1);
        assert!(page_text(&doc.bytes, 2).contains("line"));
    }

    #[test]
    fn test_word_wrap() {
        assert_eq!(
            word_wrap("the quick brown fox", 10),
            vec!["the quick", "brown fox"]
        );
        assert!(word_wrap("   ", 10).is_empty());
        assert_eq!(hard_wrap("abcdef", 4), vec!["abcd", "ef"]);
    }
}
