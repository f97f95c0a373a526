// ABOUTME: Library module for the big-export pipeline.
// ABOUTME: Turns presentations into PDF, HTML, slide images and Markdown through headless Chrome with local fallbacks.

pub mod automation;
pub mod config;
pub mod context;
pub mod errors;
pub mod fallback;
pub mod loader;
pub mod locator;
pub mod model;
pub mod process;
pub mod renderers;
pub mod service;
pub mod utils;

// Reexport common types and functions
pub use automation::{BrowserAutomation, ImageOptions, PdfOptions, ProcessKind, ResourceUsage};
pub use config::{BrowserConfig, Config, RetryConfig};
pub use context::Context;
pub use errors::{BrowserError, ContextError, ErrorType, ExportError, Result};
pub use loader::{load_presentation, parse_presentation};
pub use locator::BrowserLocator;
pub use model::{
    ExportFormat, ExportMetrics, ExportOptions, ExportResult, FallbackInfo, Orientation,
    PageDimensions, PageSize, Presentation, Quality, Slide,
};
pub use process::{ProcessHandle, ProcessState, Termination};
pub use renderers::{HtmlRenderer, ImagesRenderer, MarkdownRenderer, PdfRenderer, Renderer};
pub use service::{categorize_error, ExportFailure, ExportService, ExportStatistics};
