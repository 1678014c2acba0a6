//! Fetch→transform→cache orchestration shared by every tool handler.
//!
//! `execute_fetch_pipeline` factors the teacher's `web_open::open_impl`
//! (check cache → fetch → extract → upsert → respond, all inlined into
//! one function) into reusable stages, so each tool supplies only the
//! `transform` step.

pub mod batch;
pub mod blocks;
pub mod links;
pub mod markdown;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use superfetch_core::{CacheEntryMeta, ContentCache, PipelineResult};

use crate::fetch::{FetchOptions, Fetcher};
use crate::url_validator::validate_and_normalize_url;

pub use batch::{BatchItem, BatchItemStatus, BatchSummary, run_batch};
pub use links::{
    ExtractedLink, FilterPatternError, LinkExtractOptions, LinkExtractResult, LinkKind, extract_links,
    validate_filter_pattern,
};
pub use markdown::{
    MarkdownResult, looks_like_raw_markdown, select_content_and_title, transform_extracted_markdown,
    transform_raw_markdown,
};

const DEFAULT_MAX_INLINE_CONTENT_CHARS: usize = 20_000;

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub title: Option<String>,
}

/// Run the fetch pipeline for `url` under `namespace`, returning a
/// cached hit or a freshly fetched-and-transformed result.
pub async fn execute_fetch_pipeline<T, F>(
    fetcher: &Fetcher, cache: &ContentCache, namespace: &str, url: &str, fetch_options: &FetchOptions,
    pipeline_options: PipelineOptions, transform: F,
) -> Result<PipelineResult<T>, superfetch_core::Error>
where
    T: Serialize + DeserializeOwned + Clone,
    F: FnOnce(&str, &url::Url) -> T,
{
    let normalized = validate_and_normalize_url(url).map_err(|e| superfetch_core::Error::UrlValidation(e.to_string()))?;
    let cache_key = superfetch_core::cache::create_cache_key(namespace, normalized.as_str(), None);

    if cache.is_enabled()
        && let Some(entry) = cache.get(&cache_key).await
        && let Ok(data) = serde_json::from_str::<T>(&entry.content)
    {
        return Ok(PipelineResult {
            data,
            from_cache: true,
            url: normalized.to_string(),
            fetched_at: entry.fetched_at,
            cache_key: Some(cache_key),
        });
    }

    let response = fetcher.fetch(normalized.as_str(), fetch_options).await?;
    let data = transform(&response.body, &response.final_url);

    let fetched_at = Utc::now();
    if cache.is_enabled()
        && let Ok(serialized) = serde_json::to_string(&data)
    {
        let meta = CacheEntryMeta { title: pipeline_options.title.clone() };
        cache.set(&cache_key, serialized, meta, normalized.as_str()).await;
    }

    Ok(PipelineResult {
        data,
        from_cache: false,
        url: normalized.to_string(),
        fetched_at,
        cache_key: Some(cache_key),
    })
}

#[derive(Debug, Clone)]
pub enum InlineDecision {
    Inline(String),
    Resource { resource_uri: String, resource_mime_type: String },
    Truncated { content: String },
}

/// Decide whether `content` should be returned inline, as a resource
/// reference, or truncated with a marker.
pub fn apply_inline_content_limit(
    content: &str, cache_key: Option<&str>, mime_type: &str, max_inline_chars: Option<usize>,
) -> InlineDecision {
    let limit = max_inline_chars.unwrap_or(DEFAULT_MAX_INLINE_CONTENT_CHARS);
    if content.chars().count() <= limit {
        return InlineDecision::Inline(content.to_string());
    }

    if let Some(key) = cache_key
        && let Some(uri) = superfetch_core::cache::to_resource_uri(key)
    {
        return InlineDecision::Resource { resource_uri: uri, resource_mime_type: mime_type.to_string() };
    }

    let mut truncated: String = content.chars().take(limit.saturating_sub(3)).collect();
    truncated.push_str("...");
    InlineDecision::Truncated { content: truncated }
}
