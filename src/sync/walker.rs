//! Page-by-page scan of a remote collection, newest first.
//!
//! [`pages`] is the lazy page sequence: a page is only requested when the
//! consumer polls for it, so dropping the stream is enough to guarantee no
//! further requests. [`walk`] drives that stream for an [`Endpoint`],
//! evaluating each item's [`Verdict`] strictly in page-then-item order and
//! folding the per-item results into a [`BatchResult`].
use anyhow::Result;
use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::model::Record;
use crate::sync::filter::{SkipReason, Verdict};
use crate::sync::report::{BatchResult, Retention};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub number: u32,
    pub items: Vec<T>,
}

#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: Record + Clone + Serialize + Send + Sync;

    async fn fetch_page(&self, page: u32) -> Result<Vec<Self::Item>>;
}

/// One instantiation of the sync pipeline.
#[async_trait]
pub trait Endpoint: PageSource {
    fn name(&self) -> &'static str;

    /// Decide, without any I/O, whether the item is processed, skipped, or
    /// ends the scan.
    fn verdict(&self, item: &Self::Item) -> Verdict;

    /// Resolve, download and store one accepted item. Never fails the batch.
    async fn process(&self, item: &Self::Item) -> ItemResult;
}

/// Result of processing one item that passed its verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemResult {
    Accepted,
    Skipped(SkipReason),
    Failed(String),
}

impl ItemResult {
    pub fn failed(err: &anyhow::Error) -> Self {
        ItemResult::Failed(format!("{:#}", err))
    }
}

/// Why a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum WalkEnd {
    /// An item older than the boundary was reached.
    Cutoff { page: u32, index: usize },
    /// The remote collection ran out of items.
    Exhausted,
    /// `max_pages` were scanned without reaching the boundary.
    PageCap,
    /// The run deadline expired.
    Deadline,
}

impl WalkEnd {
    /// Older qualifying items may exist that were never looked at.
    pub fn incomplete(&self) -> bool {
        matches!(self, WalkEnd::PageCap | WalkEnd::Deadline)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WalkPlan {
    pub start_page: u32,
    pub max_pages: u32,
    /// The collection is served by one call; running out of pages is then
    /// exhaustion rather than hitting the cap.
    pub single_call: bool,
    pub deadline: Instant,
    pub item_timeout: Duration,
}

impl WalkPlan {
    pub fn paged(max_pages: u32, run_deadline: Duration, item_timeout: Duration) -> Self {
        Self {
            start_page: 1,
            max_pages,
            single_call: false,
            deadline: Instant::now() + run_deadline,
            item_timeout,
        }
    }

    pub fn single(run_deadline: Duration, item_timeout: Duration) -> Self {
        Self {
            single_call: true,
            ..Self::paged(1, run_deadline, item_timeout)
        }
    }
}

/// Whichever comes first: the per-item timeout or the run deadline.
fn item_deadline(plan: &WalkPlan) -> Instant {
    std::cmp::min(plan.deadline, Instant::now() + plan.item_timeout)
}

/// Lazily request pages `start..start + max_pages`. A failed request is
/// yielded once and ends the sequence.
pub fn pages<S>(source: &S, start: u32, max_pages: u32) -> impl Stream<Item = Result<Page<S::Item>>> + '_
where
    S: PageSource + ?Sized,
{
    let end = start.saturating_add(max_pages);
    stream::unfold(Some(start), move |next| async move {
        let Some(number) = next.filter(|n| *n < end) else {
            return None;
        };
        match source.fetch_page(number).await {
            Ok(items) => Some((Ok(Page { number, items }), Some(number + 1))),
            Err(err) => Some((Err(err.context(format!("page {} request failed", number))), None)),
        }
    })
}

/// Scan `endpoint` according to `plan`.
///
/// Only a failed page request is an error; every per-item problem is folded
/// into the result. An expired deadline ends the walk with a partial result.
#[instrument(skip_all, fields(endpoint = endpoint.name()))]
pub async fn walk<E>(endpoint: &E, plan: &WalkPlan, retention: Retention) -> Result<BatchResult<E::Item>>
where
    E: Endpoint + ?Sized,
{
    let mut batch = BatchResult::new(endpoint.name(), retention);
    let pages = pages(endpoint, plan.start_page, plan.max_pages);
    futures::pin_mut!(pages);

    loop {
        let next = match timeout_at(plan.deadline, pages.next()).await {
            Ok(next) => next,
            Err(_) => {
                warn!(pages = batch.pages_fetched, "run deadline expired while fetching a page");
                return Ok(batch.finish(WalkEnd::Deadline));
            }
        };
        let page = match next {
            Some(Ok(page)) => page,
            Some(Err(err)) => {
                error!(?err, "page request failed; aborting walk");
                return Err(err);
            }
            None if plan.single_call => return Ok(batch.finish(WalkEnd::Exhausted)),
            None => {
                warn!(max_pages = plan.max_pages, "page cap reached; scan may be incomplete");
                return Ok(batch.finish(WalkEnd::PageCap));
            }
        };

        batch.pages_fetched += 1;
        if page.items.is_empty() {
            info!(page = page.number, "empty page; collection exhausted");
            return Ok(batch.finish(WalkEnd::Exhausted));
        }
        info!(page = page.number, items = page.items.len(), "processing page");

        for (index, item) in page.items.iter().enumerate() {
            if Instant::now() >= plan.deadline {
                warn!(page = page.number, index, "run deadline expired; stopping walk");
                return Ok(batch.finish(WalkEnd::Deadline));
            }

            let result = match endpoint.verdict(item) {
                Verdict::Stop => {
                    info!(page = page.number, index, id = item.id(), "cutoff reached");
                    return Ok(batch.finish(WalkEnd::Cutoff {
                        page: page.number,
                        index,
                    }));
                }
                Verdict::Exclude(reason) => {
                    debug!(page = page.number, index, id = item.id(), %reason, "item excluded");
                    ItemResult::Skipped(reason)
                }
                Verdict::Take => match timeout_at(item_deadline(plan), endpoint.process(item)).await {
                    Ok(result) => {
                        match &result {
                            ItemResult::Accepted => {
                                debug!(page = page.number, index, id = item.id(), "item stored")
                            }
                            ItemResult::Skipped(reason) => {
                                warn!(page = page.number, index, id = item.id(), %reason, "item skipped")
                            }
                            ItemResult::Failed(error) => {
                                warn!(page = page.number, index, id = item.id(), %error, "item failed")
                            }
                        }
                        result
                    }
                    Err(_) if Instant::now() >= plan.deadline => {
                        // The in-flight item is dropped with its temp file and not counted.
                        warn!(page = page.number, index, id = item.id(), "run deadline expired during item");
                        return Ok(batch.finish(WalkEnd::Deadline));
                    }
                    Err(_) => {
                        warn!(page = page.number, index, id = item.id(), "item timed out");
                        ItemResult::Failed(format!("timed out after {:?}", plan.item_timeout))
                    }
                },
            };
            batch.record(item, result);
        }

        if plan.single_call {
            return Ok(batch.finish(WalkEnd::Exhausted));
        }
    }
}
