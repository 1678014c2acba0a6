//! Client code for superfetch.
//!
//! This crate provides the SSRF-safe URL validator, the outbound
//! fetcher, and the fetch→transform→cache pipeline shared by the
//! server's tool handlers.

pub mod fetch;
pub mod transform;
pub mod url_validator;

pub use fetch::{FetchEvent, FetchOptions, FetchResponse, Fetcher, sanitize_custom_headers};
pub use transform::{
    BatchItem, BatchItemStatus, BatchSummary, ExtractedLink, FilterPatternError, InlineDecision, LinkExtractOptions,
    LinkExtractResult, LinkKind, MarkdownResult, PipelineOptions, apply_inline_content_limit, execute_fetch_pipeline,
    extract_links, looks_like_raw_markdown, run_batch, select_content_and_title, transform_extracted_markdown,
    transform_raw_markdown, validate_filter_pattern,
};
pub use url_validator::{UrlValidationError, is_internal_url, validate_and_normalize_url};
