//! `fetch-urls` tool: bounded-concurrency batch fetch.

use std::sync::Arc;

use rmcp::ErrorData as McpError;
use rmcp::model::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use superfetch_client::transform::batch::{DEFAULT_BATCH_CONCURRENCY, MAX_BATCH_CONCURRENCY};
use superfetch_client::{BatchItem, Fetcher, run_batch};
use superfetch_core::{ContentCache, Error};

use crate::tools::fetch_markdown::{FetchMarkdownOutput, FetchMarkdownParams, fetch_markdown_impl};
use crate::tools::fetch_url::{FetchUrlOutput, FetchUrlParams, fetch_url_impl};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BatchFormat {
    Jsonl,
    Markdown,
}

impl Default for BatchFormat {
    fn default() -> Self {
        Self::Jsonl
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchUrlsParams {
    /// 1 to 10 URLs to fetch.
    pub urls: Vec<String>,
    /// Bounded by MAX_BATCH_CONCURRENCY (5).
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Keep processing remaining URLs after a failure (default true).
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
    #[serde(default)]
    pub format: BatchFormat,
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
#[serde(untagged)]
pub enum BatchResultData {
    Jsonl(FetchUrlOutput),
    Markdown(FetchMarkdownOutput),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchUrlsOutput {
    pub results: Vec<BatchItem<BatchResultData>>,
    pub summary: ExtendedBatchSummary,
    pub fetched_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtendedBatchSummary {
    pub total: u32,
    pub successful: u32,
    pub failed: u32,
    pub cached: u32,
    pub total_content_blocks: usize,
}

/// `fetcher`/`cache` are taken by `Arc` (rather than `&`) because
/// `run_batch`'s spawned tasks require `'static` futures; each task
/// clones its own handle.
pub async fn fetch_urls_impl(
    fetcher: Arc<Fetcher>, cache: Arc<ContentCache>, params: FetchUrlsParams,
) -> Result<CallToolResult, McpError> {
    if params.urls.is_empty() {
        return Err(Error::Validation("urls cannot be empty".into()).into());
    }

    let concurrency = params.concurrency.unwrap_or(DEFAULT_BATCH_CONCURRENCY).clamp(1, MAX_BATCH_CONCURRENCY);
    let format = params.format;
    let extract_main_content = params.extract_main_content;
    let include_metadata = params.include_metadata;
    let max_content_length = params.max_content_length;
    let retries = params.retries;
    let timeout = params.timeout;

    let (results, summary) = run_batch(params.urls, concurrency, params.continue_on_error, move |url| {
        let fetcher = Arc::clone(&fetcher);
        let cache = Arc::clone(&cache);
        let format = format.clone();
        async move {
            let tool_result = match &format {
                BatchFormat::Jsonl => {
                    let p = FetchUrlParams {
                        url: url.clone(),
                        custom_headers: Default::default(),
                        retries,
                        timeout,
                        extract_main_content,
                        include_metadata,
                        max_content_length,
                    };
                    fetch_url_impl(&fetcher, &cache, p).await
                }
                BatchFormat::Markdown => {
                    let p = FetchMarkdownParams {
                        url: url.clone(),
                        custom_headers: Default::default(),
                        retries,
                        timeout,
                        extract_main_content,
                        include_metadata,
                        max_content_length,
                    };
                    fetch_markdown_impl(&fetcher, &cache, p).await
                }
            };

            decode_tool_result(format, tool_result).map_err(|e| e.to_string())
        }
    })
    .await;

    let total_content_blocks = results
        .iter()
        .filter_map(|item| item.result.as_ref())
        .map(|data| match data {
            BatchResultData::Jsonl(o) => o.content_blocks,
            BatchResultData::Markdown(_) => 0,
        })
        .sum();

    let output = FetchUrlsOutput {
        summary: ExtendedBatchSummary {
            total: summary.total,
            successful: summary.successful,
            failed: summary.failed,
            cached: summary.cached,
            total_content_blocks,
        },
        results,
        fetched_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    };

    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&output).unwrap_or_default(),
    )]))
}

/// Returns `(data, from_cache)` so `run_batch` can report `BatchItemStatus::Cached`.
fn decode_tool_result(
    format: BatchFormat, tool_result: Result<CallToolResult, McpError>,
) -> Result<(BatchResultData, bool), McpError> {
    let result = tool_result?;
    let text = result
        .content
        .first()
        .and_then(|c| c.as_text())
        .map(|t| t.text.clone())
        .ok_or_else(|| Error::Internal("tool returned no content".into()))?;

    match format {
        BatchFormat::Jsonl => {
            let parsed: FetchUrlOutput =
                serde_json::from_str(&text).map_err(|e| Error::Internal(format!("failed to parse result: {e}")))?;
            let cached = parsed.cached;
            Ok((BatchResultData::Jsonl(parsed), cached))
        }
        BatchFormat::Markdown => {
            let parsed: FetchMarkdownOutput =
                serde_json::from_str(&text).map_err(|e| Error::Internal(format!("failed to parse result: {e}")))?;
            let cached = parsed.cached;
            Ok((BatchResultData::Markdown(parsed), cached))
        }
    }
}
