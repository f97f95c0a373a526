// ABOUTME: Markdown deck loader for the big-export command line
// ABOUTME: Reads a deck, splits it into slides and renders each slide's HTML with comrak

use crate::errors::{ExportError, Result};
use crate::model::{Presentation, Slide};
use comrak::{markdown_to_html, ComrakOptions};
use log::{debug, info};
use std::fs;
use std::path::Path;

const NOTES_MARKER: &str = "Notes:";

/// Load a Markdown deck from disk.
pub fn load_presentation(path: &Path) -> Result<Presentation> {
    info!("Loading presentation from {:?}", path);
    let source = fs::read_to_string(path)
        .map_err(|e| ExportError::filesystem(format!("failed to read deck {:?}", path), e))?;
    Ok(parse_presentation(&source))
}

/// Parse Markdown source into a presentation.
pub fn parse_presentation(source: &str) -> Presentation {
    let (title, author, date, content) = parse_frontmatter(source);

    let mut options = ComrakOptions::default();
    options.render.unsafe_ = true;
    options.extension.strikethrough = true;
    options.extension.table = true;

    let slides: Vec<Slide> = split_slides(&content)
        .into_iter()
        .map(|chunk| {
            let (body, notes) = split_notes(&chunk);
            let slide = Slide::new(markdown_to_html(&body, &options));
            match notes {
                Some(notes) => slide.with_notes(notes),
                None => slide,
            }
        })
        .collect();
    debug!("Parsed {} slide(s) for {:?}", slides.len(), title);

    Presentation {
        title,
        author,
        date,
        theme: "default".to_string(),
        slides,
    }
}

/// Parse frontmatter in the format: % Title\n% Author\n% Date
///
/// Each line is optional but they must come in that order.
fn parse_frontmatter(source: &str) -> (String, String, String, String) {
    let lines: Vec<&str> = source.lines().collect();
    let mut fields = Vec::new();
    for line in &lines {
        match line.strip_prefix("% ") {
            Some(value) if fields.len() < 3 => fields.push(value.trim().to_string()),
            _ => break,
        }
    }

    let mut start = fields.len();
    while start < lines.len() && lines[start].trim().is_empty() {
        start += 1;
    }
    let body = if fields.is_empty() {
        source.to_string()
    } else {
        lines[start..].join("\n")
    };

    let mut fields = fields.into_iter();
    let title = fields.next().unwrap_or_else(|| "Presentation".to_string());
    let author = fields.next().unwrap_or_default();
    let date = fields.next().unwrap_or_default();
    (title, author, date, body)
}

fn is_slide_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    let mut chars = trimmed.chars();
    match (chars.next(), chars.next()) {
        (Some('#'), None) => true,
        (Some('#'), Some(next)) => next != '#',
        _ => false,
    }
}

/// Split on `---` lines and top-level `#` headings. `\#` stays a literal hash.
fn split_slides(content: &str) -> Vec<String> {
    let mut slides = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }

        if !in_fence && trimmed == "---" {
            slides.push(std::mem::take(&mut current));
            continue;
        }

        if !in_fence && is_slide_heading(line) {
            if !current.trim().is_empty() {
                slides.push(std::mem::take(&mut current));
            }
            // "#Title" is accepted as shorthand for "# Title".
            let text = trimmed.trim_start_matches('#').trim();
            current.push_str("# ");
            current.push_str(text);
            current.push('\n');
            continue;
        }

        current.push_str(line);
        current.push('\n');
    }
    slides.push(current);

    slides
        .into_iter()
        .filter(|chunk| !chunk.trim().is_empty())
        .collect()
}

/// Separate a trailing `Notes:` paragraph from the slide body.
fn split_notes(chunk: &str) -> (String, Option<String>) {
    let mut body = Vec::new();
    let mut notes: Option<Vec<&str>> = None;

    for line in chunk.lines() {
        if let Some(collected) = notes.as_mut() {
            collected.push(line.trim());
        } else if let Some(rest) = line.trim_start().strip_prefix(NOTES_MARKER) {
            notes = Some(vec![rest.trim()]);
        } else {
            body.push(line);
        }
    }

    let notes = notes
        .map(|lines| lines.join(" ").trim().to_string())
        .filter(|n| !n.is_empty());
    (body.join("\n"), notes)
}
