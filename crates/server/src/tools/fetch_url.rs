//! `fetch-url` tool: fetch a URL and return its content as JSONL blocks.

use std::collections::HashMap;
use std::sync::Arc;

use rmcp::ErrorData as McpError;
use rmcp::model::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use superfetch_client::transform::blocks::{blocks_to_jsonl, html_to_blocks};
use superfetch_client::{Fetcher, PipelineOptions, apply_inline_content_limit, execute_fetch_pipeline, select_content_and_title};
use superfetch_core::{ContentCache, Error};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchUrlParams {
    /// The URL to fetch.
    pub url: String,
    /// Extra headers to send with the outbound request.
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
    /// Retry attempts for transient failures (default 2).
    #[serde(default)]
    pub retries: Option<u32>,
    /// Request timeout in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Apply readability-style main-content extraction (default true).
    #[serde(default = "default_true")]
    pub extract_main_content: bool,
    /// Include a metadata block with title/url (default true).
    #[serde(default = "default_true")]
    pub include_metadata: bool,
    /// Inline content above this character count is returned as a resource
    /// reference instead.
    #[serde(default)]
    pub max_content_length: Option<usize>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedContent {
    title: Option<String>,
    jsonl: String,
    block_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchUrlOutput {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content_blocks: usize,
    pub fetched_at: String,
    pub format: String,
    pub content: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
}

pub async fn fetch_url_impl(
    fetcher: &Fetcher, cache: &ContentCache, params: FetchUrlParams,
) -> Result<CallToolResult, McpError> {
    if params.url.is_empty() {
        return Err(Error::Validation("url cannot be empty".into()).into());
    }

    let mut fetch_options = superfetch_client::FetchOptions::default();
    if !params.custom_headers.is_empty() {
        fetch_options.extra_headers = superfetch_client::sanitize_custom_headers(&params.custom_headers);
    }
    if let Some(retries) = params.retries {
        fetch_options.max_retries = retries;
    }
    if let Some(timeout_ms) = params.timeout {
        fetch_options.timeout = std::time::Duration::from_millis(timeout_ms);
    }
    if let Some(max_bytes) = params.max_content_length {
        fetch_options.max_bytes = max_bytes;
    }

    let extract_main_content = params.extract_main_content;
    let include_metadata = params.include_metadata;

    let pipeline = execute_fetch_pipeline(
        fetcher,
        cache,
        "jsonl",
        &params.url,
        &fetch_options,
        PipelineOptions::default(),
        move |html, url| {
            let (content_html, title) = select_content_and_title(html, extract_main_content);
            let blocks = html_to_blocks(&content_html, None);
            let meta_title = include_metadata.then(|| title.clone()).flatten();
            let jsonl = blocks_to_jsonl(&blocks, meta_title.as_deref(), Some(url.as_str()));
            CachedContent { title, jsonl, block_count: blocks.len() }
        },
    )
    .await
    .map_err(McpError::from)?;

    let decision = apply_inline_content_limit(
        &pipeline.data.jsonl,
        pipeline.cache_key.as_deref(),
        "application/x-ndjson",
        None,
    );

    let (content, truncated) = match decision {
        superfetch_client::InlineDecision::Inline(text) => (text, None),
        superfetch_client::InlineDecision::Resource { resource_uri, .. } => (resource_uri, Some(false)),
        superfetch_client::InlineDecision::Truncated { content } => (content, Some(true)),
    };

    let output = FetchUrlOutput {
        url: pipeline.url,
        title: pipeline.data.title,
        content_blocks: pipeline.data.block_count,
        fetched_at: pipeline.fetched_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        format: "jsonl".into(),
        content,
        cached: pipeline.from_cache,
        truncated,
    };

    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&output).unwrap_or_default(),
    )]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_url_rejects_empty_url() {
        let fetcher = Fetcher::new().unwrap();
        let cache = ContentCache::new(true, std::time::Duration::from_secs(60), 10);
        let params = FetchUrlParams {
            url: String::new(),
            custom_headers: HashMap::new(),
            retries: None,
            timeout: None,
            extract_main_content: true,
            include_metadata: true,
            max_content_length: None,
        };
        let result = fetch_url_impl(&fetcher, &cache, params).await;
        assert!(result.is_err());
    }
}
