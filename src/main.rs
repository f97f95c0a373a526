// ABOUTME: Main entry point for the big-export program.
// ABOUTME: Provides CLI interface for exporting decks and managing the headless browser.

use anyhow::Context as _;
use big_export::{
    load_presentation, BrowserAutomation, Config, Context, ExportFormat, ExportOptions,
    ExportService, Orientation, PageDimensions, PageSize, Quality,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a markdown deck to pdf, html, images or markdown
    Export(ExportArgs),

    /// Show which browser would be used and its version
    Browser,

    /// Sweep stale temp files and leftover browser processes
    Cleanup,
}

#[derive(Args)]
struct ExportArgs {
    /// Path to the markdown deck
    #[arg(short, long)]
    input: PathBuf,

    /// Output file, or directory for the images format
    #[arg(short, long)]
    output: PathBuf,

    /// Output format: pdf, html, images, markdown
    #[arg(short, long, default_value = "pdf")]
    format: String,

    /// Image quality tier: low, medium, high
    #[arg(long)]
    quality: Option<String>,

    /// Page size: a4, letter, custom
    #[arg(long)]
    page_size: Option<String>,

    /// Custom page width in millimetres (with --page-size custom)
    #[arg(long)]
    page_width_mm: Option<f64>,

    /// Custom page height in millimetres (with --page-size custom)
    #[arg(long)]
    page_height_mm: Option<f64>,

    /// Page orientation: portrait, landscape
    #[arg(long)]
    orientation: Option<String>,

    /// Uniform page margin in millimetres
    #[arg(long)]
    margin_mm: Option<f64>,

    /// Theme name: default, dark, light
    #[arg(long, default_value = "")]
    theme: String,

    /// Include speaker notes
    #[arg(long)]
    notes: bool,

    /// Include title, author and date metadata
    #[arg(long)]
    metadata: bool,

    /// Image width in pixels, overriding the quality tier
    #[arg(long)]
    width: Option<u32>,

    /// Image height in pixels, overriding the quality tier
    #[arg(long)]
    height: Option<u32>,

    /// Compress output: Flate streams for PDF, smaller PNG/JPEG for images
    #[arg(long)]
    compress: bool,

    /// Overall time limit in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the export result as JSON
    #[arg(long)]
    json: bool,
}

impl ExportArgs {
    fn to_options(&self) -> anyhow::Result<ExportOptions> {
        let format: ExportFormat = self.format.parse()?;
        let mut options = ExportOptions::new(format, self.output.clone());
        options.theme = self.theme.clone();
        options.include_notes = self.notes;
        options.include_metadata = self.metadata;
        options.quality = self.quality.as_deref().map(str::parse::<Quality>).transpose()?;
        options.page_size = self.page_size.as_deref().map(str::parse::<PageSize>).transpose()?;
        options.orientation = self
            .orientation
            .as_deref()
            .map(str::parse::<Orientation>)
            .transpose()?;
        if let (Some(width_mm), Some(height_mm)) = (self.page_width_mm, self.page_height_mm) {
            options.custom_page = Some(PageDimensions {
                width_mm,
                height_mm,
            });
        }
        options.margin_mm = self.margin_mm;
        options.width = self.width;
        options.height = self.height;
        options.compression = self.compress;
        Ok(options)
    }
}

fn run_export(args: &ExportArgs) -> anyhow::Result<()> {
    let options = args.to_options()?;
    let presentation = load_presentation(&args.input)?;
    let service = ExportService::new(&Config::from_env())?;

    let ctx = match args.timeout {
        Some(secs) => Context::with_deadline_in(Duration::from_secs(secs)),
        None => Context::background(),
    };

    let outcome = service.export(&ctx, &presentation, &options);
    let result = match &outcome {
        Ok(result) => result,
        Err(failure) => failure.result.as_ref(),
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(result).context("Failed to serialize export result")?
        );
    } else if result.success {
        println!(
            "Exported {} ({} page(s), {} bytes) to {:?} in {}",
            result.format, result.page_count, result.file_size, result.output_path, result.duration
        );
        for file in &result.files {
            println!("  {}", file.display());
        }
    }

    outcome.map(|_| ()).map_err(|failure| failure.error.into())
}

fn run_browser() -> anyhow::Result<()> {
    let config = Config::from_env();
    let browser = BrowserAutomation::discover(config.get_browser_config())?;
    let version = browser.chrome_version(&Context::with_deadline_in(Duration::from_secs(10)))?;
    println!("Browser: {}", browser.executable().display());
    println!("Version: {}", version);
    Ok(())
}

fn run_cleanup() -> anyhow::Result<()> {
    let service = ExportService::new(&Config::from_env())?;
    let removed = service.cleanup()?;
    println!("Removed {} stale temp file(s)", removed);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Some(Commands::Export(args)) => run_export(args),
        Some(Commands::Browser) => run_browser(),
        Some(Commands::Cleanup) => run_cleanup(),
        None => {
            println!("No command specified. Use --help for usage information.");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
