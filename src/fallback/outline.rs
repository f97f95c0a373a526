// ABOUTME: Tolerant structural reader for slide HTML
// ABOUTME: Recovers titles and content lines per slide, even from malformed markup

use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// One line of slide body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLine {
    pub text: String,
    pub is_code: bool,
}

/// What the local renderers draw for one slide.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlideOutline {
    pub title: String,
    pub content: Vec<ContentLine>,
}

impl SlideOutline {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: Vec::new(),
        }
    }

    pub fn has_code(&self) -> bool {
        self.content.iter().any(|line| line.is_code)
    }

    fn is_empty(&self) -> bool {
        self.title.is_empty() && self.content.is_empty()
    }
}

struct Capture {
    tag: String,
    text: String,
    is_code: bool,
    is_heading: bool,
}

#[derive(Default)]
struct OutlineBuilder {
    slides: Vec<SlideOutline>,
    current: Option<SlideOutline>,
    loose: SlideOutline,
    capture: Option<Capture>,
    skip_depth: usize,
    saw_slide_div: bool,
}

impl OutlineBuilder {
    fn start(&mut self, e: &BytesStart<'_>) {
        let tag = tag_name(e.name().as_ref());
        match tag.as_str() {
            "style" | "script" | "title" | "head" => self.skip_depth += 1,
            "div" if class_of(e).contains("slide") => {
                self.flush();
                if let Some(done) = self.current.take() {
                    self.slides.push(done);
                }
                self.current = Some(SlideOutline::default());
                self.saw_slide_div = true;
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "p" | "li" | "pre" | "blockquote" => {
                self.begin(tag);
            }
            // Inline code inside a paragraph stays part of the paragraph.
            "code" if self.capture.is_none() => self.begin(tag),
            "br" => self.push_text("\n"),
            _ => {}
        }
    }

    fn begin(&mut self, tag: String) {
        if self.capture.as_ref().map_or(false, |c| c.is_code) {
            return;
        }
        self.flush();
        let is_code = tag == "pre" || tag == "code";
        let is_heading = tag.len() == 2 && tag.starts_with('h');
        self.capture = Some(Capture {
            tag,
            text: String::new(),
            is_code,
            is_heading,
        });
    }

    fn end(&mut self, name: &[u8]) {
        let tag = tag_name(name);
        match tag.as_str() {
            "style" | "script" | "title" | "head" => {
                self.skip_depth = self.skip_depth.saturating_sub(1);
            }
            _ if self.capture.as_ref().map_or(false, |c| c.tag == tag) => self.flush(),
            _ => {}
        }
    }

    fn push_text(&mut self, text: &str) {
        if self.skip_depth > 0 {
            return;
        }
        if let Some(capture) = self.capture.as_mut() {
            capture.text.push_str(text);
        }
    }

    fn flush(&mut self) {
        let Some(capture) = self.capture.take() else {
            return;
        };
        let target = match self.current.as_mut() {
            Some(slide) => slide,
            None => &mut self.loose,
        };

        if capture.is_code {
            let code = capture.text.trim_matches('\n');
            for line in code.lines() {
                target.content.push(ContentLine {
                    text: line.trim_end().to_string(),
                    is_code: true,
                });
            }
            return;
        }

        let text = collapse_whitespace(&capture.text);
        if text.is_empty() {
            return;
        }
        if capture.is_heading && target.title.is_empty() {
            target.title = text;
        } else {
            target.content.push(ContentLine {
                text,
                is_code: false,
            });
        }
    }

    fn finish(mut self) -> Vec<SlideOutline> {
        self.flush();
        if let Some(done) = self.current.take() {
            self.slides.push(done);
        }
        if !self.saw_slide_div && !self.loose.is_empty() {
            self.slides.push(self.loose);
        }
        for (index, slide) in self.slides.iter_mut().enumerate() {
            if slide.title.is_empty() {
                slide.title = format!("Slide {}", index + 1);
            }
        }
        self.slides
    }
}

/// Read slides out of an HTML document.
///
/// Slide boundaries are `div`s whose class contains `slide`. Headings become
/// titles; paragraphs, list items, quotes and code blocks become content. When
/// the markup has no slide divs, anything readable becomes a single slide.
/// Parsing stops quietly at the first syntax error, keeping what was read.
pub fn parse_slides(html: &str) -> Vec<SlideOutline> {
    let mut reader = Reader::from_str(html);
    reader.trim_text(false);
    reader.check_end_names(false);

    let mut builder = OutlineBuilder::default();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => builder.start(&e),
            Ok(Event::Empty(e)) => {
                if e.name().as_ref().eq_ignore_ascii_case(b"br") {
                    builder.push_text("\n");
                }
            }
            Ok(Event::End(e)) => builder.end(e.name().as_ref()),
            Ok(Event::Text(e)) => {
                let text = match e.unescape() {
                    Ok(text) => text.into_owned(),
                    Err(_) => decode_entities(&String::from_utf8_lossy(&e)),
                };
                builder.push_text(&text);
            }
            Ok(Event::CData(e)) => builder.push_text(&String::from_utf8_lossy(&e)),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(
                    "Stopped reading slide HTML at byte {}: {}",
                    reader.buffer_position(),
                    e
                );
                break;
            }
        }
    }
    builder.finish()
}

/// Like [`parse_slides`], but never empty: unrecoverable input yields one slide titled `title`.
pub fn parse_slides_or_default(html: &str, title: &str) -> Vec<SlideOutline> {
    let slides = parse_slides(html);
    if slides.is_empty() {
        let title = if title.trim().is_empty() {
            "Untitled"
        } else {
            title
        };
        vec![SlideOutline::titled(title)]
    } else {
        slides
    }
}

fn tag_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).to_ascii_lowercase()
}

fn class_of(e: &BytesStart<'_>) -> String {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref().eq_ignore_ascii_case(b"class"))
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string())
        .unwrap_or_default()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode the handful of HTML entities XML does not know about.
fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&mdash;", "-")
        .replace("&ndash;", "-")
        .replace("&hellip;", "...")
        .replace("&amp;", "&")
}
