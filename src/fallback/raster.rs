// ABOUTME: Browser-free slide image renderer used when Chrome is unavailable
// ABOUTME: Draws slide outlines onto a canvas, wrapping text by measured glyph widths

use super::outline::SlideOutline;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::io::Reader as ImageReader;
use image::{ColorType, ImageEncoder, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use log::{debug, info};
use rusttype::{point, Font, Scale};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

const JPEG_QUALITY: u8 = 85;
const COMPRESSED_JPEG_QUALITY: u8 = 70;

/// Fonts tried, in order, when no font path is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    r"C:\Windows\Fonts\arial.ttf",
];

/// Light or dark slide palette.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub background: Rgb<u8>,
    pub title: Rgb<u8>,
    pub body: Rgb<u8>,
    pub code_background: Rgb<u8>,
}

impl Palette {
    pub fn for_theme(theme: &str) -> Self {
        if theme.eq_ignore_ascii_case("dark") {
            Self {
                background: Rgb([30, 30, 36]),
                title: Rgb([245, 245, 245]),
                body: Rgb([210, 210, 215]),
                code_background: Rgb([48, 48, 56]),
            }
        } else {
            Self {
                background: Rgb([255, 255, 255]),
                title: Rgb([20, 20, 20]),
                body: Rgb([60, 60, 60]),
                code_background: Rgb([238, 238, 238]),
            }
        }
    }
}

/// The typeface the canvas measures and draws with.
pub enum Typeface {
    Loaded(Font<'static>),
    /// No font file available: glyphs are drawn as blocks of a fixed advance.
    Blocks,
}

impl Typeface {
    /// Load `preferred`, or the first system font that parses.
    pub fn load(preferred: Option<&Path>) -> Self {
        let candidates = preferred
            .map(Path::to_path_buf)
            .into_iter()
            .chain(SYSTEM_FONTS.iter().map(PathBuf::from));
        for path in candidates {
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            if let Some(font) = Font::try_from_vec(bytes) {
                debug!("Loaded raster font {:?}", path);
                return Typeface::Loaded(font);
            }
        }
        info!("No TrueType font found; slide images will use block glyphs");
        Typeface::Blocks
    }

    /// Rendered width of `text` at `size` pixels.
    pub fn measure(&self, text: &str, size: f32) -> f32 {
        match self {
            Typeface::Loaded(font) => {
                let scale = Scale::uniform(size);
                font.layout(text, scale, point(0.0, 0.0))
                    .map(|glyph| {
                        glyph.position().x + glyph.unpositioned().h_metrics().advance_width
                    })
                    .fold(0.0, f32::max)
            }
            Typeface::Blocks => text.chars().count() as f32 * size * 0.55,
        }
    }

    fn draw(&self, canvas: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, size: f32, text: &str) {
        match self {
            Typeface::Loaded(font) => {
                draw_text_mut(canvas, color, x, y, Scale::uniform(size), font, text);
            }
            Typeface::Blocks => {
                let advance = size * 0.55;
                let glyph_w = (advance * 0.8).max(1.0) as u32;
                let glyph_h = (size * 0.7).max(1.0) as u32;
                for (i, c) in text.chars().enumerate() {
                    if c.is_whitespace() {
                        continue;
                    }
                    let gx = x + (i as f32 * advance) as i32;
                    let gy = y + (size * 0.2) as i32;
                    draw_filled_rect_mut(canvas, Rect::at(gx, gy).of_size(glyph_w, glyph_h), color);
                }
            }
        }
    }

    /// Break `text` into lines no wider than `max_width` pixels.
    pub fn wrap(&self, text: &str, size: f32, max_width: f32) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current = String::new();
        for word in text.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };
            if current.is_empty() || self.measure(&candidate, size) <= max_width {
                current = candidate;
            } else {
                lines.push(std::mem::replace(&mut current, word.to_string()));
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
        lines
    }
}

/// Draw one slide: background, centred title near the top, left-aligned wrapped body.
pub fn render_slide(slide: &SlideOutline, typeface: &Typeface, width: u32, height: u32, palette: Palette) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(width.max(1), height.max(1), palette.background);

    let margin = width as f32 * 0.06;
    let usable = (width as f32 - 2.0 * margin).max(1.0);
    let title_size = (height as f32 / 12.0).max(8.0);
    let body_size = (height as f32 / 27.0).max(6.0);
    let code_size = body_size * 0.85;

    let mut y = height as f32 * 0.08;
    for line in typeface.wrap(&slide.title, title_size, usable) {
        let line_width = typeface.measure(&line, title_size);
        let x = ((width as f32 - line_width) / 2.0).max(margin);
        typeface.draw(&mut canvas, palette.title, x as i32, y as i32, title_size, &line);
        y += title_size * 1.2;
    }
    y += body_size;

    for content in &slide.content {
        if y + body_size > height as f32 - margin / 2.0 {
            break;
        }
        if content.is_code {
            let line_height = code_size * 1.3;
            draw_filled_rect_mut(
                &mut canvas,
                Rect::at(margin as i32, y as i32).of_size(usable as u32, line_height.max(1.0) as u32),
                palette.code_background,
            );
            typeface.draw(&mut canvas, palette.body, (margin + code_size * 0.5) as i32, y as i32, code_size, &content.text);
            y += line_height;
        } else {
            for line in typeface.wrap(&content.text, body_size, usable) {
                if y + body_size > height as f32 - margin / 2.0 {
                    break;
                }
                typeface.draw(&mut canvas, palette.body, margin as i32, y as i32, body_size, &line);
                y += body_size * 1.35;
            }
            y += body_size * 0.3;
        }
    }

    canvas
}

/// Save as JPEG or PNG depending on the path extension.
///
/// With `compress`, PNGs use the slowest deflate level and JPEGs a lower quality.
pub fn save_image(canvas: &RgbImage, path: &Path, compress: bool) -> image::ImageResult<()> {
    let is_jpeg = path
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            ext == "jpg" || ext == "jpeg"
        })
        .unwrap_or(false);

    let mut writer = BufWriter::new(File::create(path)?);
    if is_jpeg {
        let quality = if compress { COMPRESSED_JPEG_QUALITY } else { JPEG_QUALITY };
        JpegEncoder::new_with_quality(&mut writer, quality).encode_image(canvas)
    } else {
        let level = if compress {
            CompressionType::Best
        } else {
            CompressionType::Default
        };
        PngEncoder::new_with_quality(&mut writer, level, FilterType::Adaptive).write_image(
            canvas.as_raw(),
            canvas.width(),
            canvas.height(),
            ColorType::Rgb8,
        )
    }
}

/// Re-encode an existing image file in place with compression.
pub fn recompress_image(path: &Path) -> image::ImageResult<()> {
    let canvas = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?
        .to_rgb8();
    debug!("Recompressing {:?}", path);
    save_image(&canvas, path, true)
}
