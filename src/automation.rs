// ABOUTME: Headless browser automation for the big-export pipeline
// ABOUTME: Converts HTML files to PDF and images by running Chrome and tracks the child processes

use crate::config::BrowserConfig;
use crate::context::Context;
use crate::errors::{BrowserError, ContextError};
use crate::locator::BrowserLocator;
use crate::model::Quality;
use crate::process::{ChildProcess, ProcessHandle, Termination};
use crate::utils::{get_absolute_path, has_traversal};
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const PROCESS_POLL: Duration = Duration::from_millis(25);
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// Files and profile directories headless Chrome leaves in the temp dir.
const BROWSER_TEMP_PATTERNS: &[&str] = &[
    ".org.chromium.Chromium.*",
    ".com.google.Chrome.*",
    ".com.microsoft.Edge.*",
];

/// What a tracked process is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Pdf,
    Image,
}

impl ProcessKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            ProcessKind::Pdf => "pdf",
            ProcessKind::Image => "image",
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            ProcessKind::Pdf => "chrome PDF generation",
            ProcessKind::Image => "chrome screenshot generation",
        }
    }
}

/// Options for `--print-to-pdf`. Page size, orientation and margins travel as CSS `@page`
/// rules inside the HTML, which Chrome honours when printing.
#[derive(Debug, Clone, Default)]
pub struct PdfOptions {
    pub virtual_time_budget_ms: Option<u64>,
}

/// Options for `--screenshot`.
#[derive(Debug, Clone)]
pub struct ImageOptions {
    pub width: u32,
    pub height: u32,
    pub quality: Quality,
}

/// Snapshot of what a runner currently holds.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceUsage {
    pub active_processes: usize,
    pub pdf_processes: usize,
    pub image_processes: usize,
    pub executable: PathBuf,
    pub temp_dir: PathBuf,
    pub timeout_ms: u64,
}

struct TrackedProcess {
    handle: Arc<dyn ProcessHandle>,
    started: Instant,
}

/// Drives a headless browser executable and owns the processes it spawns.
pub struct BrowserAutomation {
    executable: PathBuf,
    config: BrowserConfig,
    processes: RwLock<HashMap<String, TrackedProcess>>,
}

/// Deregisters a tracked process when the invocation returns.
struct TrackingGuard<'a> {
    runner: &'a BrowserAutomation,
    id: String,
}

impl Drop for TrackingGuard<'_> {
    fn drop(&mut self) {
        self.runner.untrack(&self.id);
    }
}

impl BrowserAutomation {
    pub fn new(executable: impl Into<PathBuf>, config: BrowserConfig) -> Self {
        Self {
            executable: executable.into(),
            config,
            processes: RwLock::new(HashMap::new()),
        }
    }

    /// Locate a browser using the configured path first.
    pub fn discover(config: BrowserConfig) -> Result<Self, BrowserError> {
        let executable = BrowserLocator::new(config.browser_path.clone()).find()?;
        Ok(Self::new(executable, config))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// Print `html_path` to a PDF at `out_path`.
    pub fn convert_html_to_pdf(
        &self,
        ctx: &Context,
        html_path: &Path,
        out_path: &Path,
        options: &PdfOptions,
    ) -> Result<(), BrowserError> {
        let (url, out_abs) = self.prepare(html_path, out_path)?;
        let budget = options
            .virtual_time_budget_ms
            .unwrap_or(self.config.virtual_time_budget_ms);

        let mut args = self.base_args(budget);
        args.push("--no-pdf-header-footer".to_string());
        args.push(format!("--print-to-pdf={}", out_abs.display()));
        args.push(url);

        info!("Generating PDF {:?} from {:?}", out_abs, html_path);
        self.run(ctx, Some(ProcessKind::Pdf), ProcessKind::Pdf.operation(), &args)?;
        verify_output(ProcessKind::Pdf, &out_abs)
    }

    /// Screenshot `html_path` into an image at `out_path`.
    pub fn convert_html_to_image(
        &self,
        ctx: &Context,
        html_path: &Path,
        out_path: &Path,
        options: &ImageOptions,
    ) -> Result<(), BrowserError> {
        let (url, out_abs) = self.prepare(html_path, out_path)?;

        let mut args = self.base_args(self.config.virtual_time_budget_ms);
        args.push(format!("--window-size={},{}", options.width, options.height));
        if let Some(scale) = options.quality.device_scale_factor() {
            args.push(format!("--force-device-scale-factor={}", scale));
        }
        args.push(format!("--screenshot={}", out_abs.display()));
        args.push(url);

        info!(
            "Capturing {}x{} screenshot {:?} from {:?}",
            options.width, options.height, out_abs, html_path
        );
        self.run(ctx, Some(ProcessKind::Image), ProcessKind::Image.operation(), &args)?;
        verify_output(ProcessKind::Image, &out_abs)
    }

    /// Check that the executable exists and answers `--version`.
    pub fn is_available(&self, ctx: &Context) -> Result<(), BrowserError> {
        if !self.executable.is_file() {
            return Err(BrowserError::NotFound(format!("{:?}", self.executable)));
        }
        self.run(ctx, None, "chrome version probe", &["--version".to_string()])
            .map(|_| ())
            .map_err(|e| BrowserError::Unavailable(e.to_string()))
    }

    pub fn chrome_version(&self, ctx: &Context) -> Result<String, BrowserError> {
        let output = self.run(ctx, None, "chrome version probe", &["--version".to_string()])?;
        Ok(output.trim().to_string())
    }

    /// Interrupt, then kill, every tracked process and sweep browser temp files.
    ///
    /// Failures are collected and reported together; one stubborn process never
    /// stops the rest from being cleaned up.
    pub fn cleanup(&self) -> Result<(), BrowserError> {
        let mut failures = Vec::new();
        let mut terminated = 0;

        {
            let mut processes = self.processes.write();
            for (id, tracked) in processes.drain() {
                match Termination::new(tracked.handle.as_ref()).run(self.config.kill_grace) {
                    Ok(state) => {
                        debug!(
                            "Process {} stopped as {:?} after {:?}",
                            id,
                            state,
                            tracked.started.elapsed()
                        );
                        terminated += 1;
                    }
                    Err(e) => failures.push(format!("{}: {}", id, e)),
                }
            }
        }

        let removed = self.sweep_browser_temp_files(&mut failures);
        info!(
            "Browser cleanup: {} process(es) stopped, {} temp path(s) removed, {} failure(s)",
            terminated,
            removed,
            failures.len()
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BrowserError::Cleanup(failures))
        }
    }

    /// Kill every tracked process without the graceful step.
    pub fn kill_active_processes(&self) -> Result<(), BrowserError> {
        let mut failures = Vec::new();
        let mut processes = self.processes.write();
        for (id, tracked) in processes.drain() {
            if matches!(tracked.handle.has_exited(), Ok(true)) {
                continue;
            }
            match tracked.handle.kill() {
                Ok(()) => debug!("Killed process {}", id),
                Err(e) => failures.push(format!("{}: {}", id, e)),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            warn!("Failed to kill {} browser process(es)", failures.len());
            Err(BrowserError::Cleanup(failures))
        }
    }

    pub fn active_process_count(&self) -> usize {
        self.processes.read().len()
    }

    pub fn resource_usage(&self) -> ResourceUsage {
        let processes = self.processes.read();
        let count = |kind: ProcessKind| {
            let prefix = format!("{}-", kind.prefix());
            processes.keys().filter(|id| id.starts_with(&prefix)).count()
        };
        ResourceUsage {
            active_processes: processes.len(),
            pdf_processes: count(ProcessKind::Pdf),
            image_processes: count(ProcessKind::Image),
            executable: self.executable.clone(),
            temp_dir: self.config.temp_dir.clone(),
            timeout_ms: self.config.timeout.as_millis() as u64,
        }
    }

    /// Register a process under a fresh `<kind>-<nanos>` ID.
    pub fn track(&self, kind: ProcessKind, handle: Arc<dyn ProcessHandle>) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let mut processes = self.processes.write();
        let mut id = format!("{}-{}", kind.prefix(), nanos);
        let mut suffix = 1;
        while processes.contains_key(&id) {
            id = format!("{}-{}-{}", kind.prefix(), nanos, suffix);
            suffix += 1;
        }
        debug!("Tracking process {} (pid {:?})", id, handle.pid());
        processes.insert(
            id.clone(),
            TrackedProcess {
                handle,
                started: Instant::now(),
            },
        );
        id
    }

    fn untrack(&self, id: &str) {
        if self.processes.write().remove(id).is_some() {
            debug!("Released process {}", id);
        }
    }

    fn prepare(&self, html_path: &Path, out_path: &Path) -> Result<(String, PathBuf), BrowserError> {
        for path in [html_path, out_path] {
            if has_traversal(path) {
                return Err(BrowserError::InvalidPath(path.to_path_buf()));
            }
        }

        let out_abs = get_absolute_path(out_path)?;
        if let Some(parent) = out_abs.parent() {
            fs::create_dir_all(parent)?;
        }

        let html_abs = get_absolute_path(html_path)?;
        let url = url::Url::from_file_path(&html_abs)
            .map_err(|_| BrowserError::InvalidPath(html_abs.clone()))?;
        Ok((url.to_string(), out_abs))
    }

    fn base_args(&self, virtual_time_budget_ms: u64) -> Vec<String> {
        vec![
            "--headless".to_string(),
            "--disable-gpu".to_string(),
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-extensions".to_string(),
            "--disable-background-networking".to_string(),
            "--hide-scrollbars".to_string(),
            "--run-all-compositor-stages-before-draw".to_string(),
            format!("--virtual-time-budget={}", virtual_time_budget_ms),
        ]
    }

    /// Run the browser under a context bounded by the configured timeout.
    fn run(
        &self,
        ctx: &Context,
        kind: Option<ProcessKind>,
        operation: &'static str,
        args: &[String],
    ) -> Result<String, BrowserError> {
        let ctx = ctx.with_timeout(self.config.timeout);
        if let Some(err) = ctx.err() {
            return Err(context_failure(err, operation, String::new()));
        }

        debug!("Launching {:?} {}", self.executable, args.join(" "));
        let mut child = Command::new(&self.executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BrowserError::LaunchFailed { source })?;

        let output = OutputCollector::start(&mut child);
        let process = Arc::new(ChildProcess::new(child));
        let _tracking = kind.map(|kind| TrackingGuard {
            runner: self,
            id: self.track(kind, process.clone()),
        });

        let status = loop {
            match process.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    process.kill_and_reap();
                    return Err(BrowserError::Io(e));
                }
            }
            if let Some(err) = ctx.err() {
                warn!("{} aborted ({}), killing browser process", operation, err);
                process.kill_and_reap();
                return Err(context_failure(err, operation, output.collect()));
            }
            // Wakes early if the context is cancelled; the check above handles it.
            let _ = ctx.sleep(PROCESS_POLL);
        };

        let output = output.collect();
        if !status.success() {
            return Err(BrowserError::CommandFailed {
                operation,
                status: status.to_string(),
                output,
            });
        }
        Ok(output)
    }

    fn sweep_browser_temp_files(&self, failures: &mut Vec<String>) -> usize {
        let mut removed = 0;
        for pattern in BROWSER_TEMP_PATTERNS {
            let glob_pattern = format!("{}/{}", self.config.temp_dir.to_string_lossy(), pattern);
            let entries = match glob::glob(&glob_pattern) {
                Ok(entries) => entries,
                Err(e) => {
                    failures.push(format!("invalid glob pattern {}: {}", glob_pattern, e));
                    continue;
                }
            };
            for entry in entries.flatten() {
                let result = if entry.is_dir() {
                    fs::remove_dir_all(&entry)
                } else {
                    fs::remove_file(&entry)
                };
                match result {
                    Ok(()) => removed += 1,
                    Err(e) => failures.push(format!("{:?}: {}", entry, e)),
                }
            }
        }
        removed
    }
}

impl Drop for BrowserAutomation {
    fn drop(&mut self) {
        if self.active_process_count() > 0 {
            if let Err(e) = self.kill_active_processes() {
                warn!("Browser processes outlived their runner: {}", e);
            }
        }
    }
}

fn context_failure(err: ContextError, operation: &'static str, output: String) -> BrowserError {
    match err {
        ContextError::DeadlineExceeded => BrowserError::Timeout { operation, output },
        ContextError::Canceled => BrowserError::Canceled { operation, output },
    }
}

fn verify_output(kind: ProcessKind, path: &Path) -> Result<(), BrowserError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(BrowserError::OutputMissing {
            operation: kind.operation(),
            path: path.to_path_buf(),
        })
    }
}

/// Reads stdout and stderr on helper threads so the child never blocks on a full pipe.
struct OutputCollector {
    rx: mpsc::Receiver<(usize, String)>,
    expected: usize,
}

impl OutputCollector {
    fn start(child: &mut Child) -> Self {
        let (tx, rx) = mpsc::channel();
        let mut expected = 0;

        let streams: [Option<Box<dyn Read + Send>>; 2] = [
            child.stdout.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
            child.stderr.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
        ];
        for (slot, stream) in streams.into_iter().enumerate() {
            if let Some(mut stream) = stream {
                expected += 1;
                let tx = tx.clone();
                thread::spawn(move || {
                    let mut buf = Vec::new();
                    let _ = stream.read_to_end(&mut buf);
                    let _ = tx.send((slot, String::from_utf8_lossy(&buf).into_owned()));
                });
            }
        }

        Self { rx, expected }
    }

    /// Combined output. Streams still held open by grandchildren are abandoned.
    fn collect(self) -> String {
        let mut parts = [String::new(), String::new()];
        for _ in 0..self.expected {
            match self.rx.recv_timeout(OUTPUT_DRAIN) {
                Ok((slot, text)) => parts[slot] = text,
                Err(_) => break,
            }
        }
        parts
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessState;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubbornProcess {
        exited: AtomicBool,
        kill_fails: bool,
    }

    impl ProcessHandle for StubbornProcess {
        fn pid(&self) -> Option<u32> {
            None
        }
        fn interrupt(&self) -> io::Result<()> {
            Ok(())
        }
        fn kill(&self) -> io::Result<()> {
            if self.kill_fails {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "refused"));
            }
            self.exited.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn has_exited(&self) -> io::Result<bool> {
            Ok(self.exited.load(Ordering::SeqCst))
        }
    }

    fn stubborn(kill_fails: bool) -> Arc<StubbornProcess> {
        Arc::new(StubbornProcess {
            exited: AtomicBool::new(false),
            kill_fails,
        })
    }

    fn runner(temp_dir: &Path) -> BrowserAutomation {
        BrowserAutomation::new(
            "/nonexistent/chrome",
            BrowserConfig {
                temp_dir: temp_dir.to_path_buf(),
                kill_grace: Duration::from_millis(20),
                ..BrowserConfig::default()
            },
        )
    }

    #[test]
    fn test_track_and_usage_counts_by_prefix() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let runner = runner(dir.path());
        let a = runner.track(ProcessKind::Pdf, stubborn(false));
        let b = runner.track(ProcessKind::Pdf, stubborn(false));
        runner.track(ProcessKind::Image, stubborn(false));

        assert_ne!(a, b);
        assert!(a.starts_with("pdf-"));
        let usage = runner.resource_usage();
        assert_eq!(usage.active_processes, 3);
        assert_eq!(usage.pdf_processes, 2);
        assert_eq!(usage.image_processes, 1);
        assert_eq!(usage.timeout_ms, 30000);
        runner.kill_active_processes().expect("kill should succeed");
    }

    #[test]
    fn test_cleanup_clears_map_even_when_kills_fail() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let runner = runner(dir.path());
        let good = stubborn(false);
        runner.track(ProcessKind::Pdf, good.clone());
        runner.track(ProcessKind::Image, stubborn(true));
        runner.track(ProcessKind::Pdf, stubborn(false));

        let result = runner.cleanup();

        assert!(matches!(result, Err(BrowserError::Cleanup(ref f)) if f.len() == 1));
        assert_eq!(runner.active_process_count(), 0);
        assert!(good.has_exited().unwrap());
    }

    #[test]
    fn test_cleanup_sweeps_browser_temp_files() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let leftover = dir.path().join(".org.chromium.Chromium.abc123");
        let unrelated = dir.path().join("keep-me.txt");
        fs::create_dir(&leftover).expect("Failed to create dir");
        fs::write(leftover.join("Singleton"), "x").expect("Failed to write");
        fs::write(&unrelated, "x").expect("Failed to write");

        runner(dir.path()).cleanup().expect("cleanup should succeed");

        assert!(!leftover.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_traversal_rejected_before_launch() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let runner = runner(dir.path());
        let ctx = Context::background();
        let err = runner
            .convert_html_to_pdf(&ctx, Path::new("../deck.html"), &dir.path().join("o.pdf"), &PdfOptions::default())
            .unwrap_err();
        assert!(matches!(err, BrowserError::InvalidPath(_)));

        let options = ImageOptions {
            width: 10,
            height: 10,
            quality: Quality::Low,
        };
        let err = runner
            .convert_html_to_image(&ctx, &dir.path().join("d.html"), Path::new("out/../../x.png"), &options)
            .unwrap_err();
        assert!(matches!(err, BrowserError::InvalidPath(_)));
    }

    #[test]
    fn test_missing_executable_is_not_available() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let err = runner(dir.path())
            .is_available(&Context::background())
            .unwrap_err();
        assert!(matches!(err, BrowserError::NotFound(_)));
    }

    #[test]
    fn test_state_machine_reports_kill_path() {
        let process = stubborn(false);
        let state = Termination::new(process.as_ref()).run(Duration::from_millis(10));
        assert_eq!(state, Ok(ProcessState::Killed));
    }
}
