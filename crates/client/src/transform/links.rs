//! Link harvesting, classification, and filtering.

use std::collections::HashSet;

use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::url_validator::is_internal_url;

const MAX_FILTER_PATTERN_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Internal,
    External,
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ExtractedLink {
    pub text: String,
    pub href: String,
    pub kind: LinkKind,
}

#[derive(Debug, Clone)]
pub struct LinkExtractOptions {
    pub include_internal: bool,
    pub include_external: bool,
    pub include_images: bool,
    pub max_links: Option<usize>,
    pub filter_pattern: Option<String>,
}

impl Default for LinkExtractOptions {
    fn default() -> Self {
        Self {
            include_internal: true,
            include_external: true,
            include_images: false,
            max_links: None,
            filter_pattern: None,
        }
    }
}

#[derive(Debug)]
pub struct LinkExtractResult {
    pub links: Vec<ExtractedLink>,
    pub truncated: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FilterPatternError {
    #[error("filter pattern exceeds {MAX_FILTER_PATTERN_LEN} characters")]
    TooLong,
    #[error("filter pattern is not a valid regex: {0}")]
    Invalid(String),
}

/// Compile a caller-supplied filter regex, rejecting patterns long
/// enough to pose a practical ReDoS risk. `regex`'s linear-time engine
/// already rules out catastrophic backtracking; the length cap keeps
/// compile time itself bounded.
fn compile_filter(pattern: &str) -> Result<Regex, FilterPatternError> {
    if pattern.len() > MAX_FILTER_PATTERN_LEN {
        return Err(FilterPatternError::TooLong);
    }
    Regex::new(pattern).map_err(|e| FilterPatternError::Invalid(e.to_string()))
}

/// Reject a caller-supplied filter pattern before it reaches the fetch
/// pipeline, so an invalid regex surfaces as a validation error rather
/// than a transform-stage failure swallowed after the network round trip.
pub fn validate_filter_pattern(pattern: &str) -> Result<(), FilterPatternError> {
    compile_filter(pattern).map(|_| ())
}

/// Extract and classify links from `html`, relative to `base_url`.
pub fn extract_links(
    html: &str, base_url: &Url, options: &LinkExtractOptions,
) -> Result<LinkExtractResult, FilterPatternError> {
    let filter = options.filter_pattern.as_deref().map(compile_filter).transpose()?;

    let document = Html::parse_document(html);
    let anchor_selector = Selector::parse("a[href]").expect("static selector");
    let image_selector = Selector::parse("img[src]").expect("static selector");

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&anchor_selector) {
        let Some(href) = element.value().attr("href") else { continue };
        let Ok(resolved) = base_url.join(href) else { continue };
        let resolved_str = resolved.to_string();
        if !seen.insert(resolved_str.clone()) {
            continue;
        }

        let kind = if is_internal_url(&resolved, base_url) { LinkKind::Internal } else { LinkKind::External };
        if kind == LinkKind::Internal && !options.include_internal {
            continue;
        }
        if kind == LinkKind::External && !options.include_external {
            continue;
        }
        if let Some(re) = &filter
            && !re.is_match(&resolved_str)
        {
            continue;
        }

        let text = element.text().collect::<Vec<_>>().join(" ").trim().to_string();
        let text = if text.is_empty() { "[link]".to_string() } else { text };
        links.push(ExtractedLink { text, href: resolved_str, kind });
    }

    if options.include_images {
        for element in document.select(&image_selector) {
            let Some(src) = element.value().attr("src") else { continue };
            let Ok(resolved) = base_url.join(src) else { continue };
            let resolved_str = resolved.to_string();
            if !seen.insert(resolved_str.clone()) {
                continue;
            }
            if let Some(re) = &filter
                && !re.is_match(&resolved_str)
            {
                continue;
            }
            let alt = element.value().attr("alt").unwrap_or("[image]").to_string();
            links.push(ExtractedLink { text: alt, href: resolved_str, kind: LinkKind::Image });
        }
    }

    let truncated = match options.max_links {
        Some(max) if links.len() > max => {
            links.truncate(max);
            true
        }
        _ => false,
    };

    Ok(LinkExtractResult { links, truncated })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/path/").unwrap()
    }

    #[test]
    fn test_extract_links_classifies_internal_external() {
        let html = r#"
            <a href="/about">About</a>
            <a href="https://other.com">Other</a>
        "#;
        let result = extract_links(html, &base(), &LinkExtractOptions::default()).unwrap();
        assert_eq!(result.links.len(), 2);
        assert_eq!(result.links[0].kind, LinkKind::Internal);
        assert_eq!(result.links[1].kind, LinkKind::External);
    }

    #[test]
    fn test_extract_links_dedup() {
        let html = r#"<a href="https://example.com/path/">A</a><a href="/path/">B</a>"#;
        let result = extract_links(html, &base(), &LinkExtractOptions::default()).unwrap();
        assert_eq!(result.links.len(), 1);
    }

    #[test]
    fn test_extract_links_exclude_external() {
        let html = r#"<a href="/about">About</a><a href="https://other.com">Other</a>"#;
        let options = LinkExtractOptions { include_external: false, ..Default::default() };
        let result = extract_links(html, &base(), &options).unwrap();
        assert_eq!(result.links.len(), 1);
        assert_eq!(result.links[0].kind, LinkKind::Internal);
    }

    #[test]
    fn test_extract_links_includes_images_when_requested() {
        let html = r#"<img src="/a.png" alt="A"><a href="/about">About</a>"#;
        let options = LinkExtractOptions { include_images: true, ..Default::default() };
        let result = extract_links(html, &base(), &options).unwrap();
        assert!(result.links.iter().any(|l| l.kind == LinkKind::Image));
    }

    #[test]
    fn test_extract_links_images_excluded_by_default() {
        let html = r#"<img src="/a.png" alt="A">"#;
        let result = extract_links(html, &base(), &LinkExtractOptions::default()).unwrap();
        assert!(result.links.is_empty());
    }

    #[test]
    fn test_extract_links_max_links_truncates() {
        let html = r#"<a href="/a">A</a><a href="/b">B</a><a href="/c">C</a>"#;
        let options = LinkExtractOptions { max_links: Some(2), ..Default::default() };
        let result = extract_links(html, &base(), &options).unwrap();
        assert_eq!(result.links.len(), 2);
        assert!(result.truncated);
    }

    #[test]
    fn test_extract_links_filter_pattern() {
        let html = r#"<a href="/blog/post">Post</a><a href="/about">About</a>"#;
        let options = LinkExtractOptions { filter_pattern: Some("blog".into()), ..Default::default() };
        let result = extract_links(html, &base(), &options).unwrap();
        assert_eq!(result.links.len(), 1);
        assert!(result.links[0].href.contains("blog"));
    }

    #[test]
    fn test_filter_pattern_too_long_rejected() {
        let pattern = "a".repeat(201);
        let options = LinkExtractOptions { filter_pattern: Some(pattern), ..Default::default() };
        let result = extract_links("<a href='/a'>A</a>", &base(), &options);
        assert!(matches!(result, Err(FilterPatternError::TooLong)));
    }

    #[test]
    fn test_filter_pattern_invalid_regex_rejected() {
        let options = LinkExtractOptions { filter_pattern: Some("(unclosed".into()), ..Default::default() };
        let result = extract_links("<a href='/a'>A</a>", &base(), &options);
        assert!(matches!(result, Err(FilterPatternError::Invalid(_))));
    }

    #[test]
    fn test_extract_links_empty_text_placeholder() {
        let html = r#"<a href="/a"></a>"#;
        let result = extract_links(html, &base(), &LinkExtractOptions::default()).unwrap();
        assert_eq!(result.links[0].text, "[link]");
    }
}
