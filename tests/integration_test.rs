use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn run_command(args: &[&str], temp_dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_big-export"))
        .args(args)
        .env("EXPORT_TEMP_DIR", temp_dir)
        .output()
        .expect("Failed to execute command")
}

fn write_deck(dir: &Path) -> String {
    let markdown_path = dir.join("deck.md");
    let markdown_content =
        "% CLI Deck\n% Tester\n% 2024-05-01\n\n# First\n\nHello from the CLI.\n\nNotes: mention the weather\n\n# Second\n\n- one\n- two\n";
    fs::write(&markdown_path, markdown_content).expect("Failed to write markdown file");
    markdown_path.to_str().unwrap().to_string()
}

#[test]
fn test_export_html_command() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let input = write_deck(temp_dir.path());
    let output_path = temp_dir.path().join("out").join("deck.html");

    let output = run_command(
        &[
            "export",
            "-i",
            &input,
            "-o",
            output_path.to_str().unwrap(),
            "--format",
            "html",
            "--theme",
            "dark",
            "--notes",
        ],
        temp_dir.path(),
    );

    assert!(
        output.status.success(),
        "Command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let html = fs::read_to_string(&output_path).expect("Failed to read output HTML");
    assert!(html.contains("<title>CLI Deck</title>"));
    assert!(html.contains("theme-dark"));
    assert!(html.contains("<h1>First</h1>"));
    assert!(html.contains("mention the weather"));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Exported html (2 page(s)"));
}

#[test]
fn test_export_markdown_command_json() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let input = write_deck(temp_dir.path());
    let output_path = temp_dir.path().join("deck-out.md");

    let output = run_command(
        &[
            "export",
            "-i",
            &input,
            "-o",
            output_path.to_str().unwrap(),
            "--format",
            "markdown",
            "--json",
        ],
        temp_dir.path(),
    );

    assert!(output.status.success());
    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(json["success"], true);
    assert_eq!(json["format"], "markdown");
    assert_eq!(json["page_count"], 2);
    assert_eq!(json["metadata"]["mime_type"], "text/markdown");

    let md = fs::read_to_string(&output_path).unwrap();
    assert!(md.starts_with("---\ntitle: \"CLI Deck\"\n"));
    assert!(md.contains("- one\n- two"));
}

#[test]
fn test_invalid_format_is_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let input = write_deck(temp_dir.path());

    let output = run_command(
        &["export", "-i", &input, "-o", "x.doc", "--format", "docx"],
        temp_dir.path(),
    );

    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid format 'docx'"));
}

#[test]
fn test_pptx_fails_with_structured_result() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let input = write_deck(temp_dir.path());
    let output_path = temp_dir.path().join("deck.pptx");

    let output = run_command(
        &[
            "export",
            "-i",
            &input,
            "-o",
            output_path.to_str().unwrap(),
            "--format",
            "pptx",
            "--json",
        ],
        temp_dir.path(),
    );

    assert_eq!(output.status.code(), Some(1));
    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(json["success"], false);
    assert_eq!(json["metadata"]["error_type"], "configuration");
    assert!(String::from_utf8_lossy(&output.stderr).contains("configuration error"));
}

#[test]
fn test_missing_input_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let output = run_command(
        &["export", "-i", "/no/such/deck.md", "-o", "out.html", "--format", "html"],
        temp_dir.path(),
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to read deck"));
}

#[test]
fn test_huge_timeout_means_no_deadline() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let input = write_deck(temp_dir.path());
    let output_path = temp_dir.path().join("deck.html");
    let max = u64::MAX.to_string();

    let output = run_command(
        &[
            "export",
            "-i",
            &input,
            "-o",
            output_path.to_str().unwrap(),
            "--format",
            "html",
            "--timeout",
            &max,
        ],
        temp_dir.path(),
    );

    assert!(
        output.status.success(),
        "Command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(output_path.exists());
}

#[test]
fn test_oversized_image_width_fails_cleanly() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let input = write_deck(temp_dir.path());
    let output_path = temp_dir.path().join("slides");
    let max = u32::MAX.to_string();

    let output = run_command(
        &[
            "export",
            "-i",
            &input,
            "-o",
            output_path.to_str().unwrap(),
            "--format",
            "images",
            "--width",
            &max,
            "--json",
        ],
        temp_dir.path(),
    );

    assert_eq!(output.status.code(), Some(1));
    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(json["success"], false);
    assert_eq!(json["metadata"]["error_code"], "INVALID_WIDTH");
    assert!(!output_path.exists());
}
