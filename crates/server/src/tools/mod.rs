//! MCP tool implementations.
//!
//! This module contains the four tools exposed by the superfetch server.

pub mod fetch_links;
pub mod fetch_markdown;
pub mod fetch_url;
pub mod fetch_urls;

pub use fetch_links::{FetchLinksOutput, FetchLinksParams};
pub use fetch_markdown::{FetchMarkdownOutput, FetchMarkdownParams};
pub use fetch_url::{FetchUrlOutput, FetchUrlParams};
pub use fetch_urls::{FetchUrlsOutput, FetchUrlsParams};
