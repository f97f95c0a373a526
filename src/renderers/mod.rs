// ABOUTME: Format renderers for the big-export pipeline
// ABOUTME: One strategy per output format behind a common Renderer trait

pub mod html;
pub mod images;
pub mod markdown;
pub mod pdf;

use crate::context::Context;
use crate::model::{ExportFormat, ExportOptions, ExportResult, Presentation};

pub use html::HtmlRenderer;
pub use images::ImagesRenderer;
pub use markdown::MarkdownRenderer;
pub use pdf::PdfRenderer;

/// Turns a presentation into bytes on disk for one output format.
///
/// Failures are returned as `anyhow::Error`. A renderer that knows what went
/// wrong returns an [`ExportError`](crate::errors::ExportError) inside it; anything
/// else is classified by the service from its message.
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        ctx: &Context,
        presentation: &Presentation,
        options: &ExportOptions,
    ) -> anyhow::Result<ExportResult>;

    fn supports(&self, format: ExportFormat) -> bool;

    fn mime_type(&self) -> &'static str;
}
