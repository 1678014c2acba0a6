//! MCP server handler implementation.
//!
//! Routes tool calls to the four fetch tools and serves cached content
//! through the `superfetch://cache/{namespace}/{urlHash}` resource
//! template. Cache-update-to-notification relay lives in `main.rs`,
//! where the running service's `Peer` handle is available.

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        AnnotateAble, CallToolRequestParam, CallToolResult, Implementation, ListResourceTemplatesResult,
        ListResourcesResult, ListToolsResult, PaginatedRequestParam, ProtocolVersion, RawResource,
        RawResourceTemplate, ReadResourceRequestParam, ReadResourceResult, ResourceContents, ServerCapabilities,
        ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use superfetch_core::{AppConfig, ContentCache, cache::parse_cache_key};

use crate::http::RateLimiter;
use crate::session::SessionManager;
use crate::tools::{
    FetchLinksParams, FetchMarkdownParams, FetchUrlParams, FetchUrlsParams, fetch_links::fetch_links_impl,
    fetch_markdown::fetch_markdown_impl, fetch_url::fetch_url_impl, fetch_urls::fetch_urls_impl,
};

const RESOURCE_URI_TEMPLATE: &str = "superfetch://cache/{namespace}/{urlHash}";

/// Shared state behind the MCP tool router, the HTTP middleware stack,
/// and resource reads.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<superfetch_client::Fetcher>,
    pub cache: Arc<ContentCache>,
    pub sessions: Arc<SessionManager>,
    pub config: Arc<AppConfig>,
    pub rate_limiter: Arc<RateLimiter>,
    pub started_at: std::time::Instant,
}

/// The main MCP server handler for superfetch.
#[derive(Clone)]
pub struct SuperfetchServer {
    state: AppState,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl SuperfetchServer {
    pub fn new(state: AppState) -> Self {
        Self { state, tool_router: Self::tool_router() }
    }

    /// Fetch a URL and return its content as tagged JSONL blocks.
    #[tool(description = "Fetch a URL and return its content as a sequence of tagged JSONL blocks \
        (headings, paragraphs, lists, code, tables, images, blockquotes).")]
    async fn fetch_url(&self, params: Parameters<FetchUrlParams>) -> Result<CallToolResult, McpError> {
        fetch_url_impl(&self.state.fetcher, &self.state.cache, params.0).await
    }

    /// Fetch a URL and return its content as Markdown.
    #[tool(description = "Fetch a URL and return its content as Markdown, with readability-style \
        main-content extraction and YAML frontmatter metadata.")]
    async fn fetch_markdown(&self, params: Parameters<FetchMarkdownParams>) -> Result<CallToolResult, McpError> {
        fetch_markdown_impl(&self.state.fetcher, &self.state.cache, params.0).await
    }

    /// Fetch up to 10 URLs concurrently.
    #[tool(description = "Fetch up to 10 URLs concurrently (bounded concurrency, default 3, max 5), \
        returning per-URL status and a summary.")]
    async fn fetch_urls(&self, params: Parameters<FetchUrlsParams>) -> Result<CallToolResult, McpError> {
        fetch_urls_impl(Arc::clone(&self.state.fetcher), Arc::clone(&self.state.cache), params.0).await
    }

    /// Harvest and classify links from a page.
    #[tool(description = "Fetch a URL and harvest its links, classified as internal, external, or \
        image, with optional regex filtering.")]
    async fn fetch_links(&self, params: Parameters<FetchLinksParams>) -> Result<CallToolResult, McpError> {
        fetch_links_impl(&self.state.fetcher, &self.state.cache, params.0).await
    }
}

impl ServerHandler for SuperfetchServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "superfetch".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().enable_resources().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }

    async fn list_resources(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let keys = self.state.cache.keys().await;
        let resources = keys
            .into_iter()
            .filter_map(|key| {
                let parts = parse_cache_key(&key)?;
                let uri = superfetch_core::cache::to_resource_uri(&key)?;
                Some(
                    RawResource {
                        uri,
                        name: format!("{}/{}", parts.namespace, parts.url_hash),
                        title: None,
                        description: None,
                        mime_type: Some(mime_type_for_namespace(&parts.namespace)),
                        size: None,
                        icons: None,
                        meta: None,
                    }
                    .no_annotation(),
                )
            })
            .collect();

        Ok(ListResourcesResult { resources, next_cursor: None, meta: None })
    }

    async fn list_resource_templates(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        let template = RawResourceTemplate {
            uri_template: RESOURCE_URI_TEMPLATE.to_string(),
            name: "cached-fetch".into(),
            title: None,
            description: Some("A previously fetched and transformed document, by namespace and URL hash.".into()),
            mime_type: None,
            icons: None,
        }
        .no_annotation();

        Ok(ListResourceTemplatesResult { resource_templates: vec![template], next_cursor: None, meta: None })
    }

    async fn read_resource(
        &self, request: ReadResourceRequestParam, _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let key = cache_key_from_uri(&request.uri).ok_or_else(|| McpError {
            code: rmcp::model::ErrorCode(-32602),
            message: "not a superfetch cache resource URI".into(),
            data: None,
        })?;

        let entry = self.state.cache.get(&key).await.ok_or_else(|| McpError {
            code: rmcp::model::ErrorCode(-32002),
            message: format!("no cached entry for {}", request.uri).into(),
            data: None,
        })?;

        let namespace = parse_cache_key(&key).map(|p| p.namespace).unwrap_or_default();
        let mime_type = mime_type_for_namespace(&namespace);

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::TextResourceContents {
                uri: request.uri,
                mime_type: Some(mime_type),
                text: entry.content,
                meta: None,
            }],
        })
    }
}

fn mime_type_for_namespace(namespace: &str) -> String {
    match namespace {
        "markdown" => "text/markdown",
        "jsonl" => "application/x-ndjson",
        "links" => "application/json",
        _ => "text/plain",
    }
    .to_string()
}

/// Parse `superfetch://cache/{namespace}/{urlHash}[.{varyHash}]` back
/// into the flat `{namespace}:{urlHash}[.{varyHash}]` cache key.
fn cache_key_from_uri(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix("superfetch://cache/")?;
    let (namespace, hash) = rest.split_once('/')?;
    if namespace.is_empty() || hash.is_empty() {
        return None;
    }
    Some(format!("{namespace}:{hash}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_from_uri_round_trips_to_resource_uri() {
        let key = superfetch_core::cache::create_cache_key("markdown", "https://example.com", None);
        let uri = superfetch_core::cache::to_resource_uri(&key).unwrap();
        assert_eq!(cache_key_from_uri(&uri), Some(key));
    }

    #[test]
    fn test_cache_key_from_uri_rejects_malformed() {
        assert_eq!(cache_key_from_uri("not-a-resource-uri"), None);
        assert_eq!(cache_key_from_uri("superfetch://cache/markdown"), None);
    }

    #[test]
    fn test_mime_type_for_namespace() {
        assert_eq!(mime_type_for_namespace("markdown"), "text/markdown");
        assert_eq!(mime_type_for_namespace("jsonl"), "application/x-ndjson");
        assert_eq!(mime_type_for_namespace("unknown"), "text/plain");
    }
}
