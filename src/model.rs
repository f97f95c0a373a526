// ABOUTME: Data model for the export pipeline
// ABOUTME: Presentations, export options, results, metrics and fallback bookkeeping

use crate::errors::{ErrorType, ExportError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// A single slide as produced upstream: rendered HTML plus optional speaker notes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slide {
    pub html: String,
    pub notes: Option<String>,
}

impl Slide {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// The presentation handed to the export pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Presentation {
    pub title: String,
    pub author: String,
    pub date: String,
    pub theme: String,
    pub slides: Vec<Slide>,
}

impl Presentation {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_slide(mut self, slide: Slide) -> Self {
        self.slides.push(slide);
        self
    }
}

macro_rules! closed_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ExportError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(ExportError::validation(
                        $field,
                        format!(
                            "invalid {} '{}', expected one of: {}",
                            $field,
                            other,
                            [$($text),+].join(", ")
                        ),
                    )),
                }
            }
        }
    };
}

closed_enum!(
    /// Output formats. `Pptx` is reserved: it validates but has no renderer.
    ExportFormat, "format", {
        Pdf => "pdf",
        Html => "html",
        Images => "images",
        Markdown => "markdown",
        Pptx => "pptx",
    }
);

closed_enum!(
    /// Raster quality tier; drives resolution and JPEG vs PNG.
    Quality, "quality", {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

closed_enum!(
    PageSize, "page_size", {
        A4 => "a4",
        Letter => "letter",
        Custom => "custom",
    }
);

closed_enum!(
    Orientation, "orientation", {
        Portrait => "portrait",
        Landscape => "landscape",
    }
);

impl Quality {
    /// Viewport for a slide rendered at this tier.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Quality::Low => (1280, 720),
            Quality::Medium | Quality::High => (1920, 1080),
        }
    }

    /// Device scale factor passed to the browser, if any.
    pub fn device_scale_factor(&self) -> Option<f32> {
        match self {
            Quality::High => Some(2.0),
            _ => None,
        }
    }

    pub fn image_extension(&self) -> &'static str {
        match self {
            Quality::Low => "jpg",
            _ => "png",
        }
    }
}

/// Page dimensions in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageDimensions {
    pub width_mm: f64,
    pub height_mm: f64,
}

impl PageDimensions {
    pub const A4: PageDimensions = PageDimensions {
        width_mm: 210.0,
        height_mm: 297.0,
    };
    pub const LETTER: PageDimensions = PageDimensions {
        width_mm: 215.9,
        height_mm: 279.4,
    };

    pub fn to_points(self) -> (f64, f64) {
        (self.width_mm * 2.83465, self.height_mm * 2.83465)
    }
}

/// Immutable per-call export request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub output_path: PathBuf,
    pub theme: String,
    pub include_notes: bool,
    pub include_metadata: bool,
    pub quality: Option<Quality>,
    pub page_size: Option<PageSize>,
    /// Used when `page_size` is `Custom`; A4 otherwise.
    pub custom_page: Option<PageDimensions>,
    pub orientation: Option<Orientation>,
    pub margin_mm: Option<f64>,
    /// Explicit raster size for the images format, overriding the quality tier.
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub compression: bool,
    pub metadata: BTreeMap<String, String>,
}

impl ExportOptions {
    pub fn new(format: ExportFormat, output_path: impl Into<PathBuf>) -> Self {
        Self {
            format,
            output_path: output_path.into(),
            theme: String::new(),
            include_notes: false,
            include_metadata: false,
            quality: None,
            page_size: None,
            custom_page: None,
            orientation: None,
            margin_mm: None,
            width: None,
            height: None,
            compression: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn quality(&self) -> Quality {
        self.quality.unwrap_or(Quality::Medium)
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation.unwrap_or(Orientation::Portrait)
    }

    /// Page dimensions after applying page size and orientation.
    pub fn page_dimensions(&self) -> PageDimensions {
        let base = match self.page_size.unwrap_or(PageSize::A4) {
            PageSize::A4 => PageDimensions::A4,
            PageSize::Letter => PageDimensions::LETTER,
            PageSize::Custom => self.custom_page.unwrap_or(PageDimensions::A4),
        };
        match self.orientation() {
            Orientation::Portrait => base,
            Orientation::Landscape => PageDimensions {
                width_mm: base.height_mm,
                height_mm: base.width_mm,
            },
        }
    }

    /// Raster size for one slide image.
    pub fn image_dimensions(&self) -> (u32, u32) {
        let (w, h) = self.quality().dimensions();
        (self.width.unwrap_or(w), self.height.unwrap_or(h))
    }
}

/// A fallback taken by a renderer instead of failing.
#[derive(Debug, Clone, Serialize)]
pub struct FallbackInfo {
    pub reason: String,
    pub fallback_used: String,
    pub timestamp: DateTime<Utc>,
}

impl FallbackInfo {
    pub fn new(reason: impl Into<String>, fallback_used: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            fallback_used: fallback_used.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Per-operation bookkeeping, live for the duration of one export call.
#[derive(Debug, Clone, Serialize)]
pub struct ExportMetrics {
    pub operation_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(serialize_with = "serialize_duration_ms")]
    pub duration: Option<Duration>,
    pub retry_count: u32,
    pub fallbacks_used: Vec<FallbackInfo>,
    pub warnings: Vec<String>,
    pub temp_files_created: Vec<PathBuf>,
}

fn serialize_duration_ms<S: serde::Serializer>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match duration {
        Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

impl ExportMetrics {
    pub fn start(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            retry_count: 0,
            fallbacks_used: Vec::new(),
            warnings: Vec::new(),
            temp_files_created: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        let end = Utc::now();
        self.duration = (end - self.start_time).to_std().ok();
        self.end_time = Some(end);
    }
}

/// Things a renderer did on the side that the service folds into its metrics.
#[derive(Debug, Clone, Default)]
pub struct RenderReport {
    pub fallbacks: Vec<FallbackInfo>,
    pub temp_files: Vec<PathBuf>,
}

/// Structured failure fields for programmatic consumers.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMetadata {
    pub error_type: ErrorType,
    pub error_code: String,
    pub retryable: bool,
    pub retry_count: u32,
}

/// Keys [`ResultMetadata`] serializes itself. Caller metadata may not use them.
pub const RESERVED_METADATA_KEYS: &[&str] = &[
    "export_metrics",
    "error_type",
    "error_code",
    "retryable",
    "retry_count",
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_metrics: Option<ExportMetrics>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorMetadata>,
    /// Free-form values that round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// Outcome of one export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub success: bool,
    pub format: ExportFormat,
    pub output_path: PathBuf,
    pub file_size: u64,
    pub duration: String,
    pub page_count: usize,
    /// Per-file outputs for multi-file formats, in presentation order.
    pub files: Vec<PathBuf>,
    pub error: String,
    pub warnings: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub metadata: ResultMetadata,
    #[serde(skip)]
    pub report: RenderReport,
}

impl ExportResult {
    /// A successful single-file result; renderers fill in the rest.
    pub fn success(format: ExportFormat, output_path: impl Into<PathBuf>) -> Self {
        Self {
            success: true,
            format,
            output_path: output_path.into(),
            file_size: 0,
            duration: String::new(),
            page_count: 0,
            files: Vec::new(),
            error: String::new(),
            warnings: Vec::new(),
            generated_at: Utc::now(),
            metadata: ResultMetadata::default(),
            report: RenderReport::default(),
        }
    }

    pub fn failure(options: &ExportOptions, error: &ExportError) -> Self {
        Self {
            success: false,
            error: error.to_string(),
            ..Self::success(options.format, options.output_path.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_set_parsing() {
        assert_eq!("PDF".parse::<ExportFormat>().unwrap(), ExportFormat::Pdf);
        assert_eq!(" landscape ".parse::<Orientation>().unwrap(), Orientation::Landscape);
        assert_eq!("letter".parse::<PageSize>().unwrap(), PageSize::Letter);

        let err = "ultra".parse::<Quality>().unwrap_err();
        assert_eq!(err.kind, ErrorType::Validation);
        assert!(err.message.contains("quality"));
        assert_eq!(err.code, "INVALID_QUALITY");
    }

    #[test]
    fn test_quality_tiers() {
        assert_eq!(Quality::Low.image_extension(), "jpg");
        assert_eq!(Quality::High.image_extension(), "png");
        assert_eq!(Quality::High.device_scale_factor(), Some(2.0));
        assert_eq!(Quality::Low.dimensions(), (1280, 720));
    }

    #[test]
    fn test_explicit_image_dimensions_override_tier() {
        let mut options = ExportOptions::new(ExportFormat::Images, "out");
        options.quality = Some(Quality::Low);
        options.width = Some(800);
        assert_eq!(options.image_dimensions(), (800, 720));
    }

    #[test]
    fn test_landscape_swaps_page_dimensions() {
        let mut options = ExportOptions::new(ExportFormat::Pdf, "out.pdf");
        options.page_size = Some(PageSize::Letter);
        options.orientation = Some(Orientation::Landscape);
        let dims = options.page_dimensions();
        assert_eq!(dims.width_mm, PageDimensions::LETTER.height_mm);
        assert_eq!(dims.height_mm, PageDimensions::LETTER.width_mm);
    }

    #[test]
    fn test_custom_page_without_dimensions_uses_a4() {
        let mut options = ExportOptions::new(ExportFormat::Pdf, "out.pdf");
        options.page_size = Some(PageSize::Custom);
        assert_eq!(options.page_dimensions(), PageDimensions::A4);
    }
}
