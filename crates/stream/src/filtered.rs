//! Read-side filtered view over a stream.
//!
//! A [`FilteredStream`] applies an asynchronous predicate to each item
//! before including it in paginated results. Filtering shrinks the
//! result, so a page may need more underlying items than requested; the
//! view keeps pulling unfiltered chunks until the page is full or the
//! stream is exhausted. Output is always an order-preserving subsequence
//! of what the unfiltered stream would return.
//!
//! There is no inherent bound on how many underlying reads one request
//! needs (a predicate that rejects everything forces a full scan), so
//! every call caps the total items scanned and fails with
//! [`Error::ScanLimitExceeded`] past the cap.

use std::future::Future;

use bytes::Bytes;
use futures::future::try_join_all;
use rill_locks::LockManager;
use rill_store::Store;

use crate::error::{Error, StreamResult};
use crate::Stream;

/// Default cap on underlying items scanned per filtered call.
pub const DEFAULT_MAX_SCAN: usize = 100_000;

/// A stream wrapped with a per-item asynchronous predicate.
///
/// The predicate receives an item and resolves to whether it should be
/// included. Predicate errors abort the call.
pub struct FilteredStream<S, L, P, F>
where
    S: Store,
    L: LockManager,
    P: Fn(Bytes) -> F,
    F: Future<Output = StreamResult<bool>> + Send,
{
    stream: Stream<S, L>,
    predicate: P,
    max_scan: usize,
}

impl<S, L, P, F> FilteredStream<S, L, P, F>
where
    S: Store,
    L: LockManager,
    P: Fn(Bytes) -> F,
    F: Future<Output = StreamResult<bool>> + Send,
{
    /// Wraps `stream` with `predicate`.
    pub const fn new(stream: Stream<S, L>, predicate: P) -> Self {
        Self {
            stream,
            predicate,
            max_scan: DEFAULT_MAX_SCAN,
        }
    }

    /// Overrides the scan cap.
    #[must_use]
    pub const fn with_max_scan(mut self, max_scan: usize) -> Self {
        self.max_scan = max_scan;
        self
    }

    /// The underlying stream.
    #[must_use]
    pub const fn stream(&self) -> &Stream<S, L> {
        &self.stream
    }

    /// Returns the accepted items at filtered positions `[start, end)`,
    /// newest first.
    ///
    /// The underlying fetch starts from `[0, end)` rather than
    /// `[start, end)`: filtering shrinks the result, so earlier items may
    /// be needed even for a small `start`. The resume cursor is the last
    /// unfiltered item of each chunk, chosen before its own filter
    /// verdict is known; that only affects where the next pull starts,
    /// never what is accepted.
    pub async fn get_ids(&self, start: usize, end: usize) -> StreamResult<Vec<Bytes>> {
        if start > end {
            return Err(Error::BadParameters { start, end });
        }
        if start == end {
            return Ok(Vec::new());
        }

        let chunk = self.stream.get_items(0, end).await?;
        let mut scanned = chunk.len();
        let mut exhausted = chunk.len() < end;
        let mut cursor = chunk.last().cloned();
        let mut accepted = self.filter_chunk(chunk).await?;

        while accepted.len() < end && !exhausted {
            if scanned >= self.max_scan {
                return Err(Error::ScanLimitExceeded {
                    max_scan: self.max_scan,
                });
            }
            let Some(last) = cursor else { break };
            let chunk = self.stream.get_items_less_than(&last, end).await?;
            if chunk.is_empty() {
                break;
            }
            scanned += chunk.len();
            exhausted = chunk.len() < end;
            cursor = chunk.last().cloned();
            accepted.extend(self.filter_chunk(chunk).await?);
        }

        let lo = start.min(accepted.len());
        let hi = end.min(accepted.len());
        Ok(accepted[lo..hi].to_vec())
    }

    /// Returns up to `count` accepted items strictly older than `item`,
    /// newest first. `item` must be present in the underlying stream but
    /// need not pass the filter itself.
    pub async fn get_ids_less_than(&self, item: &Bytes, count: usize) -> StreamResult<Vec<Bytes>> {
        let step = count.max(1);
        let mut accepted = Vec::new();
        let mut scanned = 0usize;
        let mut cursor = item.clone();

        while accepted.len() < count {
            if scanned >= self.max_scan {
                return Err(Error::ScanLimitExceeded {
                    max_scan: self.max_scan,
                });
            }
            let chunk = self.stream.get_items_less_than(&cursor, step).await?;
            if chunk.is_empty() {
                break;
            }
            scanned += chunk.len();
            let exhausted = chunk.len() < step;
            cursor = chunk[chunk.len() - 1].clone();
            accepted.extend(self.filter_chunk(chunk).await?);
            if exhausted {
                break;
            }
        }

        accepted.truncate(count);
        Ok(accepted)
    }

    /// Returns up to `count` accepted items strictly newer than `item`,
    /// newest first; the accepted items nearest `item` are the ones kept.
    pub async fn get_ids_greater_than(
        &self,
        item: &Bytes,
        count: usize,
    ) -> StreamResult<Vec<Bytes>> {
        let step = count.max(1);
        let mut accepted: Vec<Bytes> = Vec::new();
        let mut scanned = 0usize;
        let mut cursor = item.clone();

        while accepted.len() < count {
            if scanned >= self.max_scan {
                return Err(Error::ScanLimitExceeded {
                    max_scan: self.max_scan,
                });
            }
            let chunk = self.stream.get_items_greater_than(&cursor, step).await?;
            if chunk.is_empty() {
                break;
            }
            scanned += chunk.len();
            let newest_reached = chunk.len() < step;
            cursor = chunk[0].clone();
            // Newer chunks go in front to keep the newest-first order.
            let mut next = self.filter_chunk(chunk).await?;
            next.extend(accepted);
            accepted = next;
            if newest_reached {
                break;
            }
        }

        let keep_from = accepted.len().saturating_sub(count);
        Ok(accepted[keep_from..].to_vec())
    }

    /// Applies the predicate to every item of `chunk` in parallel,
    /// keeping relative order among accepted items.
    async fn filter_chunk(&self, chunk: Vec<Bytes>) -> StreamResult<Vec<Bytes>> {
        let verdicts =
            try_join_all(chunk.iter().map(|item| (self.predicate)(item.clone()))).await?;
        Ok(chunk
            .into_iter()
            .zip(verdicts)
            .filter_map(|(item, keep)| keep.then_some(item))
            .collect())
    }
}
