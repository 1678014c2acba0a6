//! HTML → Markdown transform: raw-content fast path, readability-style
//! extraction with a quality gate, and YAML frontmatter normalization.

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use superfetch_core::ContentBlock;
use url::Url;

use crate::transform::blocks::html_to_blocks;

const QUALITY_GATE_RATIO: f64 = 0.3;
const SHORT_DOCUMENT_THRESHOLD: usize = 100;
const ARTICLE_CANDIDATE_SELECTORS: &[&str] =
    &["article", "main", "[role=main]", "#content", ".content", ".post", ".article-body"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkdownResult {
    pub title: Option<String>,
    pub markdown: String,
    pub extraction_accepted: bool,
}

/// True when `url` or `body` looks like it is already Markdown rather
/// than HTML: an explicit `.md`/`.markdown` extension, or a body
/// lacking an HTML doctype/tag that carries YAML frontmatter or
/// Markdown-like signals (ATX headings, list markers, fenced blocks).
pub fn looks_like_raw_markdown(url: &Url, body: &str) -> bool {
    let path = url.path().to_ascii_lowercase();
    if path.ends_with(".md") || path.ends_with(".markdown") {
        return true;
    }

    let trimmed = body.trim_start();
    let lower_prefix: String = trimmed.chars().take(20).collect::<String>().to_ascii_lowercase();
    if lower_prefix.starts_with("<!doctype") || lower_prefix.starts_with("<html") {
        return false;
    }

    if trimmed.starts_with("---\n") || trimmed.starts_with("---\r\n") {
        return true;
    }

    let html_tag_count = count_html_tags(body);
    if html_tag_count > 2 {
        return false;
    }

    has_markdown_signals(body)
}

fn count_html_tags(body: &str) -> usize {
    let selector = Selector::parse("*").expect("static selector");
    Html::parse_fragment(body).select(&selector).count()
}

fn has_markdown_signals(body: &str) -> bool {
    let has_atx_heading = body.lines().any(|l| l.trim_start().starts_with('#'));
    let has_list_marker =
        body.lines().any(|l| { let t = l.trim_start(); t.starts_with("- ") || t.starts_with("* ") || t.starts_with("+ ") });
    let fenced_count = body.matches("```").count();
    let has_paired_fence = fenced_count >= 2 && fenced_count % 2 == 0;

    has_atx_heading || has_list_marker || has_paired_fence
}

/// Extract `title`/`name` from YAML frontmatter, if present.
fn frontmatter_title(body: &str) -> Option<String> {
    let (frontmatter, _) = split_frontmatter(body)?;
    frontmatter.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let key = key.trim();
        if key == "title" || key == "name" {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn split_frontmatter(body: &str) -> Option<(&str, &str)> {
    let trimmed = body.trim_start();
    let rest = trimmed.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;
    let end = rest.find("\n---")?;
    Some((&rest[..end], &rest[end + 4..]))
}

/// Inject `source: "{url}"` into YAML frontmatter, creating the block
/// if absent and leaving it untouched if a `source` key already
/// exists.
pub fn inject_source_frontmatter(body: &str, url: &Url) -> String {
    match split_frontmatter(body) {
        Some((frontmatter, rest)) => {
            if frontmatter.lines().any(|l| l.split_once(':').map(|(k, _)| k.trim()) == Some("source")) {
                body.to_string()
            } else {
                let rest = rest.strip_prefix('\n').unwrap_or(rest);
                format!("---\n{frontmatter}\nsource: \"{}\"\n---\n{rest}", url.as_str())
            }
        }
        None => format!("---\nsource: \"{}\"\n---\n{}", url.as_str(), body.trim_start()),
    }
}

/// Render the raw-markdown fast path: pass the body through, taking
/// the title from frontmatter and optionally injecting `source`.
pub fn transform_raw_markdown(body: &str, url: &Url, include_metadata: bool) -> MarkdownResult {
    let title = frontmatter_title(body);
    let markdown = if include_metadata { inject_source_frontmatter(body, url) } else { body.to_string() };
    MarkdownResult { title, markdown, extraction_accepted: true }
}

/// Pick the HTML subtree most likely to be the article body: the
/// longest-text match among common content-container selectors, or
/// the whole document if none match or the quality gate rejects it.
fn select_article_html(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let mut best: Option<(usize, String)> = None;

    for selector_str in ARTICLE_CANDIDATE_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else { continue };
        for el in document.select(&selector) {
            let text_len = el.text().collect::<String>().len();
            let candidate_html = el.html();
            if best.as_ref().map(|(len, _)| text_len > *len).unwrap_or(true) {
                best = Some((text_len, candidate_html));
            }
        }
    }

    best.map(|(_, html)| html)
}

fn stripped_text_len(html: &str) -> usize {
    Html::parse_document(html).root_element().text().collect::<String>().len()
}

fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let title_selector = Selector::parse("title").ok()?;
    let og_selector = Selector::parse(r#"meta[property="og:title"]"#).ok()?;
    let twitter_selector = Selector::parse(r#"meta[name="twitter:title"]"#).ok()?;

    document
        .select(&og_selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .or_else(|| document.select(&twitter_selector).next().and_then(|el| el.value().attr("content")))
        .map(str::to_string)
        .or_else(|| document.select(&title_selector).next().map(|el| el.text().collect::<String>().trim().to_string()))
}

/// Run readability-style extraction with the quality gate, then
/// render the chosen HTML as Markdown.
pub fn transform_extracted_markdown(html: &str, url: &Url, include_metadata: bool, fetched_at: DateTime<Utc>) -> MarkdownResult {
    let full_text_len = stripped_text_len(html);
    let title = extract_title(html);

    let (chosen_html, accepted) = match select_article_html(html) {
        Some(candidate) if full_text_len < SHORT_DOCUMENT_THRESHOLD => (candidate, true),
        Some(candidate) => {
            let candidate_len = stripped_text_len(&candidate);
            if full_text_len == 0 || (candidate_len as f64) >= QUALITY_GATE_RATIO * (full_text_len as f64) {
                (candidate, true)
            } else {
                (html.to_string(), false)
            }
        }
        None => (html.to_string(), full_text_len < SHORT_DOCUMENT_THRESHOLD),
    };

    let body_markdown = blocks_to_markdown(&html_to_blocks(&chosen_html, None));

    let markdown = if include_metadata {
        format!(
            "---\ntitle: {}\nsource: \"{}\"\nfetched_at: {}\n---\n{}",
            title.as_deref().unwrap_or("Untitled"),
            url.as_str(),
            fetched_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            body_markdown.trim()
        )
    } else {
        body_markdown
    };

    MarkdownResult { title, markdown, extraction_accepted: accepted }
}

/// Select the likely article subtree and page title without rendering
/// to Markdown, for callers that want raw HTML blocks (e.g. the JSONL
/// tool) rather than the quality-gate's Markdown formatting.
pub fn select_content_and_title(html: &str, extract_main_content: bool) -> (String, Option<String>) {
    let title = extract_title(html);
    if !extract_main_content {
        return (html.to_string(), title);
    }

    let full_text_len = stripped_text_len(html);
    let chosen = match select_article_html(html) {
        Some(candidate) if full_text_len < SHORT_DOCUMENT_THRESHOLD => candidate,
        Some(candidate) => {
            let candidate_len = stripped_text_len(&candidate);
            if full_text_len == 0 || (candidate_len as f64) >= QUALITY_GATE_RATIO * (full_text_len as f64) {
                candidate
            } else {
                html.to_string()
            }
        }
        None => html.to_string(),
    };
    (chosen, title)
}

fn blocks_to_markdown(blocks: &[ContentBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        match block {
            ContentBlock::Heading { level, text } => {
                out.push_str(&"#".repeat(*level as usize));
                out.push(' ');
                out.push_str(text);
                out.push_str("\n\n");
            }
            ContentBlock::Paragraph { text } => {
                out.push_str(text);
                out.push_str("\n\n");
            }
            ContentBlock::List { items, .. } => {
                for item in items {
                    out.push_str("- ");
                    out.push_str(item);
                    out.push('\n');
                }
                out.push('\n');
            }
            ContentBlock::Code { language, text } => {
                out.push_str("```");
                out.push_str(language.as_deref().unwrap_or(""));
                out.push('\n');
                out.push_str(text);
                out.push_str("\n```\n\n");
            }
            ContentBlock::Blockquote { text } => {
                for line in text.lines() {
                    out.push_str("> ");
                    out.push_str(line);
                    out.push('\n');
                }
                out.push('\n');
            }
            ContentBlock::Image { src, alt } => {
                out.push_str(&format!("![{}]({})\n\n", alt.as_deref().unwrap_or(""), src));
            }
            ContentBlock::Table { headers, rows } => {
                if let Some(headers) = headers {
                    out.push_str(&format!("| {} |\n", headers.join(" | ")));
                    out.push_str(&format!("|{}|\n", " --- |".repeat(headers.len())));
                }
                for row in rows {
                    out.push_str(&format!("| {} |\n", row.join(" | ")));
                }
                out.push('\n');
            }
            ContentBlock::Metadata { .. } => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_markdown_by_extension() {
        let url = Url::parse("https://example.com/doc.md").unwrap();
        assert!(looks_like_raw_markdown(&url, "anything"));
    }

    #[test]
    fn test_raw_markdown_rejected_for_html_doctype() {
        let url = Url::parse("https://example.com/page").unwrap();
        assert!(!looks_like_raw_markdown(&url, "<!doctype html><html></html>"));
    }

    #[test]
    fn test_raw_markdown_detected_via_frontmatter() {
        let url = Url::parse("https://example.com/page").unwrap();
        assert!(looks_like_raw_markdown(&url, "---\ntitle: X\n---\n# Heading"));
    }

    #[test]
    fn test_raw_markdown_detected_via_atx_heading() {
        let url = Url::parse("https://example.com/page").unwrap();
        assert!(looks_like_raw_markdown(&url, "# Heading\n\nSome text"));
    }

    #[test]
    fn test_raw_markdown_rejected_for_rich_html() {
        let url = Url::parse("https://example.com/page").unwrap();
        let html = "<div><span><p><a>x</a></p></span></div>";
        assert!(!looks_like_raw_markdown(&url, html));
    }

    #[test]
    fn test_frontmatter_title_extracted() {
        assert_eq!(frontmatter_title("---\ntitle: \"Doc\"\n---\nbody"), Some("Doc".to_string()));
    }

    #[test]
    fn test_inject_source_creates_frontmatter() {
        let url = Url::parse("https://example.com/doc.md").unwrap();
        let result = inject_source_frontmatter("# Heading", &url);
        assert!(result.starts_with("---\nsource: \"https://example.com/doc.md\"\n---\n"));
    }

    #[test]
    fn test_inject_source_into_existing_frontmatter() {
        let url = Url::parse("https://example.com/doc.md").unwrap();
        let result = inject_source_frontmatter("---\ntitle: \"Doc\"\n---\n# Heading", &url);
        assert!(result.contains("source: \"https://example.com/doc.md\""));
        assert!(result.contains("title: \"Doc\""));
    }

    #[test]
    fn test_inject_source_skipped_if_present() {
        let url = Url::parse("https://example.com/doc.md").unwrap();
        let original = "---\nsource: \"https://other.com\"\n---\nbody";
        assert_eq!(inject_source_frontmatter(original, &url), original);
    }

    #[test]
    fn test_transform_raw_markdown_passthrough() {
        let url = Url::parse("https://example.com/doc.md").unwrap();
        let result = transform_raw_markdown("---\ntitle: \"Doc\"\n---\n# Heading", &url, true);
        assert_eq!(result.title, Some("Doc".to_string()));
        assert!(result.markdown.contains("source:"));
    }

    #[test]
    fn test_quality_gate_accepts_short_document() {
        let html = "<html><body><p>hi</p></body></html>";
        let url = Url::parse("https://example.com").unwrap();
        let result = transform_extracted_markdown(html, &url, false, Utc::now());
        assert!(result.extraction_accepted);
    }

    #[test]
    fn test_quality_gate_rejects_thin_extraction() {
        let filler = "filler text ".repeat(200);
        let html = format!(
            "<html><body><nav>nav</nav>{filler}<article><p>short</p></article></body></html>"
        );
        let url = Url::parse("https://example.com").unwrap();
        let result = transform_extracted_markdown(&html, &url, false, Utc::now());
        assert!(!result.extraction_accepted);
    }

    #[test]
    fn test_extract_title_prefers_og() {
        let html = r#"<html><head><title>Plain</title><meta property="og:title" content="OG Title"></head></html>"#;
        assert_eq!(extract_title(html), Some("OG Title".to_string()));
    }

    #[test]
    fn test_extract_title_falls_back_to_title_tag() {
        let html = "<html><head><title>Plain</title></head></html>";
        assert_eq!(extract_title(html), Some("Plain".to_string()));
    }

    #[test]
    fn test_select_content_and_title_returns_full_doc_when_not_extracting() {
        let html = "<html><head><title>T</title></head><body><p>x</p></body></html>";
        let (content, title) = select_content_and_title(html, false);
        assert_eq!(title, Some("T".to_string()));
        assert!(content.contains("<head>"));
    }

    #[test]
    fn test_blocks_to_markdown_heading_and_paragraph() {
        let blocks = vec![
            ContentBlock::Heading { level: 1, text: "Hello".into() },
            ContentBlock::Paragraph { text: "World".into() },
        ];
        let md = blocks_to_markdown(&blocks);
        assert!(md.starts_with("# Hello\n\n"));
        assert!(md.contains("World"));
    }
}
