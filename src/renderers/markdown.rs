// ABOUTME: Markdown renderer for the big-export pipeline
// ABOUTME: Turns rendered slide HTML back into Markdown with a fixed set of tag substitutions

use super::Renderer;
use crate::context::Context;
use crate::errors::ExportError;
use crate::model::{ExportFormat, ExportOptions, ExportResult, Presentation};
use crate::utils::file_size;
use chrono::Utc;
use log::info;
use regex::{Captures, Regex};
use std::fs;

/// Separator between slides in the generated document.
pub const SLIDE_SEPARATOR: &str = "\n\n---\n\n";

struct Rules {
    code_block: Regex,
    heading: Regex,
    strong: Regex,
    emphasis: Regex,
    inline_code: Regex,
    link: Regex,
    image: Regex,
    attr_src: Regex,
    attr_alt: Regex,
    ordered_list: Regex,
    unordered_list: Regex,
    list_item: Regex,
    blockquote: Regex,
    rule: Regex,
    line_break: Regex,
    paragraph_open: Regex,
    paragraph_close: Regex,
    any_tag: Regex,
    blank_lines: Regex,
}

impl Rules {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            code_block: Regex::new(
                r#"(?is)<pre[^>]*>\s*<code(?:\s+class="language-([^"]*)")?[^>]*>(.*?)</code>\s*</pre>"#,
            )?,
            heading: Regex::new(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]>")?,
            strong: Regex::new(r"(?is)<(?:strong|b)(?:\s[^>]*)?>(.*?)</(?:strong|b)>")?,
            emphasis: Regex::new(r"(?is)<(?:em|i)(?:\s[^>]*)?>(.*?)</(?:em|i)>")?,
            inline_code: Regex::new(r"(?is)<code[^>]*>(.*?)</code>")?,
            link: Regex::new(r#"(?is)<a\s[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#)?,
            image: Regex::new(r"(?is)<img\b[^>]*>")?,
            attr_src: Regex::new(r#"(?i)\ssrc="([^"]*)""#)?,
            attr_alt: Regex::new(r#"(?i)\salt="([^"]*)""#)?,
            ordered_list: Regex::new(r"(?is)<ol[^>]*>(.*?)</ol>")?,
            unordered_list: Regex::new(r"(?is)<ul[^>]*>(.*?)</ul>")?,
            list_item: Regex::new(r"(?is)<li[^>]*>(.*?)</li>")?,
            blockquote: Regex::new(r"(?is)<blockquote[^>]*>(.*?)</blockquote>")?,
            rule: Regex::new(r"(?i)<hr\s*/?>")?,
            line_break: Regex::new(r"(?i)<br\s*/?>")?,
            paragraph_open: Regex::new(r"(?i)<p(?:\s[^>]*)?>")?,
            paragraph_close: Regex::new(r"(?i)</p>")?,
            any_tag: Regex::new(r"<[^>]+>")?,
            blank_lines: Regex::new(r"\n{3,}")?,
        })
    }
}

/// Renders presentations as a Markdown document with frontmatter.
pub struct MarkdownRenderer {
    rules: Rules,
}

impl MarkdownRenderer {
    pub fn new() -> Result<Self, ExportError> {
        let rules = Rules::compile().map_err(|e| {
            ExportError::configuration("failed to compile markdown conversion rules").with_cause(e)
        })?;
        Ok(Self { rules })
    }

    /// Convert one slide's HTML to Markdown.
    pub fn html_to_markdown(&self, html: &str) -> String {
        let r = &self.rules;

        let text = r.code_block.replace_all(html, |caps: &Captures| {
            let lang = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            format!("\n```{}\n{}\n```\n", lang, caps[2].trim_end_matches('\n'))
        });
        let text = r.heading.replace_all(&text, |caps: &Captures| {
            let level: usize = caps[1].parse().unwrap_or(1);
            format!("\n{} {}\n\n", "#".repeat(level), caps[2].trim())
        });
        let text = r.strong.replace_all(&text, "**${1}**");
        let text = r.emphasis.replace_all(&text, "*${1}*");
        let text = r.inline_code.replace_all(&text, "`${1}`");
        let text = r.link.replace_all(&text, "[${2}](${1})");
        let text = r.image.replace_all(&text, |caps: &Captures| {
            let tag = &caps[0];
            let src = r.attr_src.captures(tag).map(|c| c[1].to_string()).unwrap_or_default();
            let alt = r.attr_alt.captures(tag).map(|c| c[1].to_string()).unwrap_or_default();
            format!("![{}]({})", alt, src)
        });
        let text = r.ordered_list.replace_all(&text, |caps: &Captures| {
            let items: Vec<String> = r
                .list_item
                .captures_iter(&caps[1])
                .enumerate()
                .map(|(i, item)| format!("{}. {}", i + 1, item[1].trim()))
                .collect();
            format!("\n{}\n\n", items.join("\n"))
        });
        let text = r.unordered_list.replace_all(&text, |caps: &Captures| {
            let items: Vec<String> = r
                .list_item
                .captures_iter(&caps[1])
                .map(|item| format!("- {}", item[1].trim()))
                .collect();
            format!("\n{}\n\n", items.join("\n"))
        });
        let text = r.blockquote.replace_all(&text, |caps: &Captures| {
            let inner = r.paragraph_open.replace_all(&caps[1], "");
            let inner = r.paragraph_close.replace_all(&inner, "\n");
            let quoted: Vec<String> = inner
                .trim()
                .lines()
                .map(|line| format!("> {}", line.trim()))
                .collect();
            format!("\n{}\n\n", quoted.join("\n"))
        });
        let text = r.rule.replace_all(&text, "\n---\n");
        let text = r.line_break.replace_all(&text, "  \n");
        let text = r.paragraph_open.replace_all(&text, "");
        let text = r.paragraph_close.replace_all(&text, "\n\n");
        let text = r.any_tag.replace_all(&text, "");
        let text = decode_entities(&text);
        let text = r.blank_lines.replace_all(&text, "\n\n");
        text.trim().to_string()
    }

    fn frontmatter(&self, presentation: &Presentation, options: &ExportOptions) -> String {
        let mut front = String::from("---\n");
        front.push_str(&format!("title: {}\n", yaml_string(&presentation.title)));
        if !presentation.author.is_empty() {
            front.push_str(&format!("author: {}\n", yaml_string(&presentation.author)));
        }
        if !presentation.date.is_empty() {
            front.push_str(&format!("date: {}\n", yaml_string(&presentation.date)));
        }
        if !presentation.theme.is_empty() {
            front.push_str(&format!("theme: {}\n", yaml_string(&presentation.theme)));
        }
        front.push_str(&format!("slides: {}\n", presentation.slides.len()));
        if options.include_metadata {
            front.push_str(&format!("generated: {}\n", Utc::now().to_rfc3339()));
            for (key, value) in &options.metadata {
                front.push_str(&format!("{}: {}\n", key, yaml_string(value)));
            }
        }
        front.push_str("---\n\n");
        front
    }

    pub fn render_document(&self, presentation: &Presentation, options: &ExportOptions) -> String {
        let mut doc = self.frontmatter(presentation, options);
        let slides: Vec<String> = presentation
            .slides
            .iter()
            .map(|slide| {
                let mut body = self.html_to_markdown(&slide.html);
                if options.include_notes {
                    if let Some(notes) = slide.notes.as_deref().filter(|n| !n.trim().is_empty()) {
                        body.push_str(&format!("\n\nNotes: {}", notes.trim()));
                    }
                }
                body
            })
            .collect();
        doc.push_str(&slides.join(SLIDE_SEPARATOR));
        doc.push('\n');
        doc
    }
}

impl Renderer for MarkdownRenderer {
    fn render(
        &self,
        _ctx: &Context,
        presentation: &Presentation,
        options: &ExportOptions,
    ) -> anyhow::Result<ExportResult> {
        info!("Rendering Markdown to {:?}", options.output_path);
        let document = self.render_document(presentation, options);
        fs::write(&options.output_path, document).map_err(|e| {
            ExportError::filesystem(
                format!("failed to write Markdown to {:?}", options.output_path),
                e,
            )
        })?;

        let mut result = ExportResult::success(ExportFormat::Markdown, &options.output_path);
        result.file_size = file_size(&options.output_path);
        result.page_count = presentation.slides.len();
        Ok(result)
    }

    fn supports(&self, format: ExportFormat) -> bool {
        format == ExportFormat::Markdown
    }

    fn mime_type(&self) -> &'static str {
        "text/markdown"
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn yaml_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
