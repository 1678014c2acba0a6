//! `fetch-markdown` tool: fetch a URL and return its content as Markdown.

use std::collections::HashMap;

use chrono::Utc;
use rmcp::ErrorData as McpError;
use rmcp::model::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use superfetch_client::{
    Fetcher, MarkdownResult, PipelineOptions, apply_inline_content_limit, execute_fetch_pipeline,
    looks_like_raw_markdown, transform_extracted_markdown, transform_raw_markdown,
};
use superfetch_core::{ContentCache, Error};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchMarkdownParams {
    pub url: String,
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default = "default_true")]
    pub extract_main_content: bool,
    #[serde(default = "default_true")]
    pub include_metadata: bool,
    #[serde(default)]
    pub max_content_length: Option<usize>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DownloadInfo {
    pub download_url: String,
    pub file_name: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchMarkdownOutput {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub fetched_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<DownloadInfo>,
}

pub async fn fetch_markdown_impl(
    fetcher: &Fetcher, cache: &ContentCache, params: FetchMarkdownParams,
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
    let fetched_at = Utc::now();

    let pipeline = execute_fetch_pipeline(
        fetcher,
        cache,
        "markdown",
        &params.url,
        &fetch_options,
        PipelineOptions::default(),
        move |body, url| {
            if looks_like_raw_markdown(url, body) {
                transform_raw_markdown(body, url, include_metadata)
            } else if extract_main_content {
                transform_extracted_markdown(body, url, include_metadata, fetched_at)
            } else {
                MarkdownResult { title: None, markdown: body.to_string(), extraction_accepted: true }
            }
        },
    )
    .await
    .map_err(McpError::from)?;

    let MarkdownResult { title, markdown, .. } = pipeline.data;

    let decision = apply_inline_content_limit(&markdown, pipeline.cache_key.as_deref(), "text/markdown", None);

    let (markdown_out, resource_uri, resource_mime_type, truncated) = match decision {
        superfetch_client::InlineDecision::Inline(text) => (Some(text), None, None, None),
        superfetch_client::InlineDecision::Resource { resource_uri, resource_mime_type } => {
            (None, Some(resource_uri), Some(resource_mime_type), Some(false))
        }
        superfetch_client::InlineDecision::Truncated { content } => (Some(content), None, None, Some(true)),
    };

    let file = match &pipeline.cache_key {
        Some(key) if resource_uri.is_some() => download_info(cache, key, title.as_deref()).await,
        _ => None,
    };

    let output = FetchMarkdownOutput {
        url: pipeline.url,
        title,
        fetched_at: pipeline.fetched_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        markdown: markdown_out,
        resource_uri,
        resource_mime_type,
        truncated,
        cached: pipeline.from_cache,
        file,
    };

    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&output).unwrap_or_default(),
    )]))
}

/// Build the `GET /mcp/downloads/markdown/{hash}` link for content that
/// spilled out of the inline response, reusing the cache entry's own
/// expiry so the link never outlives what it points to.
async fn download_info(cache: &ContentCache, cache_key: &str, title: Option<&str>) -> Option<DownloadInfo> {
    let entry = cache.get(cache_key).await?;
    let hash = cache_key.split_once(':').map(|(_, h)| h)?;
    let slug: String = title
        .unwrap_or("document")
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();

    Some(DownloadInfo {
        download_url: format!("/mcp/downloads/markdown/{hash}"),
        file_name: format!("{}.md", slug.trim_matches('-')),
        expires_at: entry.expires_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_markdown_rejects_empty_url() {
        let fetcher = Fetcher::new().unwrap();
        let cache = ContentCache::new(true, std::time::Duration::from_secs(60), 10);
        let params = FetchMarkdownParams {
            url: String::new(),
            custom_headers: HashMap::new(),
            retries: None,
            timeout: None,
            extract_main_content: true,
            include_metadata: true,
            max_content_length: None,
        };
        let result = fetch_markdown_impl(&fetcher, &cache, params).await;
        assert!(result.is_err());
    }
}
