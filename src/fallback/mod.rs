// ABOUTME: Local best-effort renderers used when the headless browser cannot be
// ABOUTME: Shared outline parsing plus PDF and raster writers that never spawn a process

pub mod outline;
pub mod pdf;
pub mod raster;

pub use outline::{parse_slides, parse_slides_or_default, ContentLine, SlideOutline};
pub use pdf::{render_pdf, PdfDocument, PdfLayout};
pub use raster::{recompress_image, render_slide, save_image, Palette, Typeface};
