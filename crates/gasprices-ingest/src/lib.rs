//! Concurrent page fetching and per-URL ingestion orchestration.
//!
//! One GET per configured URL, bounded by a semaphore so large URL lists
//! cannot exhaust sockets. Failures are isolated per URL: a transport
//! error yields an empty record set for that URL, a page-level extraction
//! error is collected for the run outcome, and siblings always finish.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use gasprices_core::StationRecord;
use gasprices_scrape::{extract_records, ExtractError, TitleMode};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "gasprices-ingest";

/// Pipeline configuration, resolved from the environment.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub dsn: String,
    pub urls_file: String,
    pub concurrency: usize,
    pub http_timeout: Duration,
    pub user_agent: String,
    pub title_mode: TitleMode,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let title_mode = match std::env::var("TITLE_MODE").as_deref() {
            Ok("whole") => TitleMode::WholeName,
            _ => TitleMode::SplitBrand,
        };
        Self {
            dsn: std::env::var("DSN").unwrap_or_default(),
            urls_file: std::env::var("URLS_FILE").unwrap_or_else(|_| "urls.txt".to_string()),
            concurrency: std::env::var("FETCH_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
            http_timeout: Duration::from_secs(
                std::env::var("HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
            ),
            user_agent: std::env::var("USER_AGENT")
                .unwrap_or_else(|_| "gasprices-bot/0.1".to_string()),
            title_mode,
        }
    }
}

/// Reads the URL list file: one URL per line, `#` lines are comments,
/// blank lines are skipped, surrounding whitespace is trimmed.
pub fn read_url_list(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading url list {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Bounded-concurrency HTTP page fetcher.
#[derive(Debug)]
pub struct PageFetcher {
    client: reqwest::Client,
    limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl PageFetcher {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        Self::with_backoff(config, BackoffPolicy::default())
    }

    pub fn with_backoff(config: &IngestConfig, backoff: BackoffPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.http_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            client,
            limit: Arc::new(Semaphore::new(config.concurrency.max(1))),
            backoff,
        })
    }

    /// Fetches one page body, retrying transient failures with exponential
    /// backoff. 5xx and 429 responses and connect/timeout errors retry;
    /// anything else fails immediately.
    pub async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let _permit = self.limit.acquire().await.expect("semaphore not closed");

        let mut last_request_error: Option<reqwest::Error> = None;
        for attempt in 0..=self.backoff.max_retries {
            debug!(url, attempt, "fetching page");
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    if status.is_success() {
                        return Ok(resp.text().await?);
                    }
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}

/// Page-level extraction failure for one URL, kept for the run outcome so
/// layout drift terminates the run visibly after committed work is kept.
#[derive(Debug)]
pub struct PageFailure {
    pub url: String,
    pub error: ExtractError,
}

/// Union of all per-URL results for one ingestion run.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub records: Vec<StationRecord>,
    pub failures: Vec<PageFailure>,
    pub pages_fetched: usize,
    pub fetch_errors: usize,
}

/// Fetches every URL concurrently and extracts records from each page.
///
/// Order across URLs is not significant; duplicate URLs are fetched twice
/// and deduplicated later by the store's uniqueness constraint.
pub async fn ingest_urls(
    fetcher: Arc<PageFetcher>,
    urls: Vec<String>,
    mode: TitleMode,
) -> IngestOutcome {
    let run_id = Uuid::new_v4();
    info!(%run_id, urls = urls.len(), "starting ingest run");

    let mut handles = Vec::with_capacity(urls.len());
    for url in urls {
        let fetcher = Arc::clone(&fetcher);
        let task_url = url.clone();
        let handle = tokio::spawn(async move {
            let body = match fetcher.fetch_page(&task_url).await {
                Ok(body) => body,
                Err(err) => {
                    warn!(url = %task_url, error = %err, "fetch failed, skipping url");
                    return (false, Ok(Vec::new()));
                }
            };
            (true, extract_records(&body, mode))
        });
        handles.push((url, handle));
    }

    let mut outcome = IngestOutcome::default();
    for (url, handle) in handles {
        absorb_page_result(&mut outcome, url, handle.await);
    }

    info!(
        %run_id,
        records = outcome.records.len(),
        pages_fetched = outcome.pages_fetched,
        fetch_errors = outcome.fetch_errors,
        page_failures = outcome.failures.len(),
        "ingest run finished"
    );
    outcome
}

/// Result of fetching and extracting one page: whether the fetch itself
/// succeeded, plus the extraction outcome for a fetched body.
type PageResult = (bool, Result<Vec<StationRecord>, ExtractError>);

/// Folds one joined per-URL task into the run outcome. A panicked task is
/// a fetch error for that URL only and must not take down its siblings,
/// but the URL and join error are still logged for operators.
fn absorb_page_result(
    outcome: &mut IngestOutcome,
    url: String,
    joined: Result<PageResult, tokio::task::JoinError>,
) {
    match joined {
        Ok((fetched, result)) => {
            if fetched {
                outcome.pages_fetched += 1;
            } else {
                outcome.fetch_errors += 1;
            }
            match result {
                Ok(mut records) => outcome.records.append(&mut records),
                Err(error) => {
                    warn!(%url, %error, "page layout mismatch");
                    outcome.failures.push(PageFailure { url, error });
                }
            }
        }
        Err(join_error) => {
            warn!(%url, error = %join_error, "ingest task panicked");
            outcome.fetch_errors += 1;
        }
    }
}
