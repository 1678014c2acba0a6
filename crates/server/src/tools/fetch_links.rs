//! `fetch-links` tool: harvest and classify links from a page.

use rmcp::ErrorData as McpError;
use rmcp::model::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use superfetch_client::{
    ExtractedLink, Fetcher, LinkExtractOptions, PipelineOptions, execute_fetch_pipeline, extract_links,
    validate_filter_pattern,
};
use superfetch_core::{ContentCache, Error};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchLinksParams {
    pub url: String,
    #[serde(default = "default_true")]
    pub include_internal: bool,
    #[serde(default = "default_true")]
    pub include_external: bool,
    #[serde(default)]
    pub include_images: bool,
    #[serde(default)]
    pub max_links: Option<usize>,
    /// Regex applied to resolved link URLs; rejected above 200 characters.
    #[serde(default)]
    pub filter_pattern: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchLinksOutput {
    pub links: Vec<ExtractedLink>,
    pub link_count: usize,
    pub filtered: bool,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct CachedLinks {
    links: Vec<ExtractedLink>,
    truncated: bool,
}

pub async fn fetch_links_impl(
    fetcher: &Fetcher, cache: &ContentCache, params: FetchLinksParams,
) -> Result<CallToolResult, McpError> {
    if params.url.is_empty() {
        return Err(Error::Validation("url cannot be empty".into()).into());
    }

    if let Some(pattern) = &params.filter_pattern {
        validate_filter_pattern(pattern).map_err(|e| Error::Validation(e.to_string()))?;
    }

    let filtered = params.filter_pattern.is_some();
    let options = LinkExtractOptions {
        include_internal: params.include_internal,
        include_external: params.include_external,
        include_images: params.include_images,
        max_links: params.max_links,
        filter_pattern: params.filter_pattern.clone(),
    };

    let fetch_options = superfetch_client::FetchOptions::default();

    let pipeline = execute_fetch_pipeline(
        fetcher,
        cache,
        "links",
        &params.url,
        &fetch_options,
        PipelineOptions::default(),
        move |html, url| {
            let result = extract_links(html, url, &options).expect("filter pattern validated above");
            CachedLinks { links: result.links, truncated: result.truncated }
        },
    )
    .await
    .map_err(McpError::from)?;

    let output = FetchLinksOutput {
        link_count: pipeline.data.links.len(),
        links: pipeline.data.links,
        filtered,
        truncated: pipeline.data.truncated,
    };

    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&output).unwrap_or_default(),
    )]))
}
