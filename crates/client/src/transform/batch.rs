//! Bounded-concurrency batch fetch orchestration.
//!
//! Generalizes `web_batch_open`'s `JoinSet` pattern: each URL is
//! isolated so one failure doesn't sink the batch unless the caller
//! asks for `continue_on_error = false`, in which case the first
//! failure stops further dispatch and only already in-flight tasks
//! are allowed to drain.

use std::collections::VecDeque;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

pub const MAX_BATCH_URLS: usize = 10;
pub const DEFAULT_BATCH_CONCURRENCY: usize = 3;
pub const MAX_BATCH_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    Success,
    Cached,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BatchItem<T> {
    pub url: String,
    pub status: BatchItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BatchSummary {
    pub total: u32,
    pub successful: u32,
    pub failed: u32,
    pub cached: u32,
}

/// Run `fetch_one` over `urls` with bounded concurrency, isolating
/// per-URL failures unless `continue_on_error` is false. Dispatch is
/// incremental — at most `concurrency` tasks are ever in flight, and a
/// failure seen while `continue_on_error` is false stops further URLs
/// from being dispatched at all (already-running tasks still drain).
pub async fn run_batch<T, Fut, F>(
    urls: Vec<String>, concurrency: usize, continue_on_error: bool, fetch_one: F,
) -> (Vec<BatchItem<T>>, BatchSummary)
where
    T: Send + 'static,
    Fut: Future<Output = Result<(T, bool), String>> + Send + 'static,
    F: Fn(String) -> Fut,
{
    let mut pending: VecDeque<String> = urls.into_iter().take(MAX_BATCH_URLS).collect();
    let permits = concurrency.clamp(1, MAX_BATCH_CONCURRENCY);

    let mut join_set: JoinSet<(String, Result<(T, bool), String>)> = JoinSet::new();
    let mut results = Vec::new();
    let mut successful = 0u32;
    let mut cached = 0u32;
    let mut failed = 0u32;
    let mut stop_dispatch = false;

    loop {
        while !stop_dispatch && join_set.len() < permits {
            let Some(url) = pending.pop_front() else { break };
            let fut = fetch_one(url.clone());
            join_set.spawn(async move { (url, fut.await) });
        }

        let Some(joined) = join_set.join_next().await else { break };
        let (url, outcome) = match joined {
            Ok(pair) => pair,
            Err(join_err) => (String::new(), Err(join_err.to_string())),
        };

        let item = match outcome {
            Ok((data, from_cache)) => {
                if from_cache {
                    cached += 1;
                } else {
                    successful += 1;
                }
                BatchItem {
                    url,
                    status: if from_cache { BatchItemStatus::Cached } else { BatchItemStatus::Success },
                    result: Some(data),
                    error: None,
                }
            }
            Err(message) => {
                failed += 1;
                BatchItem { url, status: BatchItemStatus::Failed, result: None, error: Some(message) }
            }
        };

        if !continue_on_error && item.status == BatchItemStatus::Failed {
            stop_dispatch = true;
            pending.clear();
        }

        results.push(item);
    }

    let summary = BatchSummary { total: results.len() as u32, successful, failed, cached };
    (results, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_run_batch_all_succeed() {
        let urls = vec!["https://a".to_string(), "https://b".to_string()];
        let (results, summary) =
            run_batch(urls, 2, true, |url| async move { Ok::<_, String>((url.len(), false)) }).await;
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.total, 2);
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_run_batch_isolates_failure() {
        let urls = vec!["https://a".to_string(), "https://fail".to_string()];
        let (results, summary) = run_batch(urls, 2, true, |url| async move {
            if url.contains("fail") { Err("boom".to_string()) } else { Ok((1usize, false)) }
        })
        .await;
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_run_batch_short_circuits_on_fail_fast() {
        let calls = Arc::new(AtomicUsize::new(0));
        let urls = vec!["https://fail".to_string(), "https://b".to_string(), "https://c".to_string()];
        let calls_clone = calls.clone();
        let (results, summary) = run_batch(urls, 1, false, move |url| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async move { if url.contains("fail") { Err("boom".to_string()) } else { Ok((1usize, false)) } }
        })
        .await;
        assert_eq!(summary.failed, 1);
        assert_eq!(results.len(), 1, "b and c must never be dispatched after the first failure");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "fetch_one must only run once before short-circuiting");
    }

    #[tokio::test]
    async fn test_run_batch_caps_at_max_urls() {
        let urls: Vec<String> = (0..20).map(|i| format!("https://{i}")).collect();
        let (results, summary) = run_batch(urls, 5, true, |_| async move { Ok::<_, String>((1usize, false)) }).await;
        assert_eq!(summary.total, MAX_BATCH_URLS as u32);
        assert_eq!(results.len(), MAX_BATCH_URLS);
    }

    #[tokio::test]
    async fn test_run_batch_tracks_cached_status() {
        let urls = vec!["https://a".to_string()];
        let (results, summary) = run_batch(urls, 1, true, |_| async move { Ok::<_, String>((1usize, true)) }).await;
        assert_eq!(summary.cached, 1);
        assert_eq!(results[0].status, BatchItemStatus::Cached);
    }
}
