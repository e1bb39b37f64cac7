use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::error::FetchError;
use crate::fetch_pool::with_fetch_pool;
use crate::model::{MatchPage, PageRequest, Subject};
use crate::upstream::StatsApi;

/// Largest page the match history endpoint will serve.
pub const PAGE_SIZE: usize = 25;

/// Splits `min(total, cap)` items into `PAGE_SIZE` requests.
pub fn page_requests(subject: &Subject, total: usize, cap: usize) -> Vec<PageRequest<'_>> {
    let wanted = total.min(cap);
    (0..wanted.div_ceil(PAGE_SIZE))
        .map(|idx| {
            let start = idx * PAGE_SIZE;
            PageRequest {
                subject,
                start,
                count: PAGE_SIZE.min(wanted - start),
            }
        })
        .collect()
}

/// Fetches every page concurrently. Pages come back in no particular order.
///
/// The first failing page fails the batch. It also raises a shared flag so
/// pages that have not started yet skip their request; pages already in
/// flight finish and are discarded.
pub fn fetch_match_pages(
    api: &dyn StatsApi,
    subject: &Subject,
    total: usize,
    cap: usize,
    parallelism: usize,
) -> Result<Vec<MatchPage>, FetchError> {
    let requests = page_requests(subject, total, cap);
    if requests.is_empty() {
        return Ok(Vec::new());
    }
    info!(
        "fetching {} match pages for {} ({} items)",
        requests.len(),
        subject.id,
        total.min(cap)
    );

    let cancelled = AtomicBool::new(false);
    let first_error: Mutex<Option<FetchError>> = Mutex::new(None);

    let pages: Vec<MatchPage> = with_fetch_pool(parallelism, || {
        requests
            .par_iter()
            .filter_map(|request| {
                if cancelled.load(Ordering::Acquire) {
                    debug!("skipping page at {} after earlier failure", request.start);
                    return None;
                }
                match api.match_page(request) {
                    Ok(page) if !cancelled.load(Ordering::Acquire) => Some(page),
                    Ok(_) => None,
                    Err(err) => {
                        if !cancelled.swap(true, Ordering::AcqRel) {
                            warn!("match page at {} failed: {err}", request.start);
                            *first_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(err);
                        }
                        None
                    }
                }
            })
            .collect()
    });

    if let Some(err) = first_error
        .into_inner()
        .unwrap_or_else(|e| e.into_inner())
    {
        return Err(err);
    }
    Ok(pages)
}
