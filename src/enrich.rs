use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::cache::{CachePolicy, Caches};
use crate::fetch_pool::with_fetch_pool;
use crate::model::{EnrichedMatch, MatchInfo, MatchPage, MatchSummary, Subject, SubjectMatch};
use crate::upstream::StatsApi;

pub const MATCHES: &str = "matches";
pub const MAPS: &str = "maps";
pub const PLAYLISTS: &str = "playlists";
pub const SUBJECT_MATCHES: &str = "subject_matches";

const DISPLAY_TIME_FORMAT: &str = "%b %-d, %Y %-I:%M %p UTC";

/// Enriched matches gathered by one run, at most one per match id.
#[derive(Debug, Default)]
pub struct Accumulator {
    inner: Mutex<AccumulatorInner>,
}

#[derive(Debug, Default)]
struct AccumulatorInner {
    matches: Vec<EnrichedMatch>,
    ids: HashSet<String>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends unless the match id is already present.
    pub fn push(&self, enriched: EnrichedMatch) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.ids.insert(enriched.summary.match_id.clone()) {
            return false;
        }
        inner.matches.push(enriched);
        true
    }

    pub fn contains(&self, match_id: &str) -> bool {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.ids.contains(match_id)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_matches(self) -> Vec<EnrichedMatch> {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .matches
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichSummary {
    pub dispatched: usize,
    pub enriched: usize,
    pub reused: usize,
    pub failed: usize,
}

enum ItemOutcome {
    Enriched,
    Reused,
    Duplicate,
    Failed,
}

/// Expands every summary in `pages` into an enriched match on `accumulator`.
///
/// Blocks until every item has finished. Item failures are logged and show
/// up only as missing or partially enriched matches.
pub fn enrich_matches(
    api: &dyn StatsApi,
    caches: &Caches,
    subject: &Subject,
    pages: &[MatchPage],
    accumulator: &Accumulator,
    parallelism: usize,
) -> EnrichSummary {
    let mut seen = HashSet::new();
    let items: Vec<&MatchSummary> = pages
        .iter()
        .flat_map(|page| page.results.iter())
        .filter(|s| !s.match_id.is_empty() && seen.insert(s.match_id.as_str()))
        .filter(|s| !accumulator.contains(&s.match_id))
        .collect();

    let outcomes: Vec<ItemOutcome> = with_fetch_pool(parallelism, || {
        items
            .par_iter()
            .map(|summary| enrich_one(api, caches, subject, summary, accumulator))
            .collect()
    });

    let mut summary = EnrichSummary {
        dispatched: items.len(),
        ..EnrichSummary::default()
    };
    for outcome in outcomes {
        match outcome {
            ItemOutcome::Enriched => summary.enriched += 1,
            ItemOutcome::Reused => summary.reused += 1,
            ItemOutcome::Duplicate => {}
            ItemOutcome::Failed => summary.failed += 1,
        }
    }
    info!(
        "enriched {} matches for {} ({} reused, {} failed)",
        summary.enriched, subject.id, summary.reused, summary.failed
    );
    summary
}

fn enrich_one(
    api: &dyn StatsApi,
    caches: &Caches,
    subject: &Subject,
    summary: &MatchSummary,
    accumulator: &Accumulator,
) -> ItemOutcome {
    let match_id = summary.match_id.as_str();
    remember_summary(caches, subject, summary);

    // Finished matches never change, so a stored record only needs this
    // subject's summary swapped in and any failed lookups retried.
    match caches.durable.get::<EnrichedMatch>(MATCHES, match_id) {
        Ok(Some(mut stored)) => {
            stored.summary = summary.clone();
            if stored.missing_lookups() {
                debug!("match {match_id} stored with missing lookups, retrying");
                fill_lookups(api, caches, subject, &mut stored);
                persist(caches, &stored);
            }
            return if accumulator.push(stored) {
                ItemOutcome::Reused
            } else {
                ItemOutcome::Duplicate
            };
        }
        Ok(None) => {}
        Err(err) => warn!("stored match {match_id} unreadable, refetching: {err}"),
    }

    let detail = match api.match_stats(subject, match_id) {
        Ok(detail) => detail,
        Err(err) => {
            warn!("match {match_id} stats failed: {err}");
            return ItemOutcome::Failed;
        }
    };
    let mut enriched = EnrichedMatch::new(summary.clone(), detail);

    if let Err(err) = format_match_times(&mut enriched.match_info) {
        warn!("match {match_id} timestamps unparsable: {err}");
    }
    fill_lookups(api, caches, subject, &mut enriched);
    persist(caches, &enriched);

    if accumulator.push(enriched) {
        ItemOutcome::Enriched
    } else {
        ItemOutcome::Duplicate
    }
}

/// Map and playlist lookups for whichever of the two is still empty.
fn fill_lookups(
    api: &dyn StatsApi,
    caches: &Caches,
    subject: &Subject,
    enriched: &mut EnrichedMatch,
) {
    let match_id = enriched.summary.match_id.clone();

    if enriched.map.is_none() {
        if let Some((asset, version)) = enriched.match_info.map_variant.ids() {
            let key = format!("{asset}:{version}");
            match caches.read_through(CachePolicy::Persisted, MAPS, &key, || {
                api.map(subject, asset, version)
            }) {
                Ok(map) => enriched.map = Some(map),
                Err(err) => warn!("match {match_id} map lookup failed: {err}"),
            }
        } else {
            debug!("match {match_id} has no map ids");
        }
    }

    if enriched.playlist.is_none()
        && let Some((asset, version)) = enriched.match_info.playlist.ids()
    {
        let key = format!("{asset}:{version}");
        match caches.read_through(CachePolicy::Persisted, PLAYLISTS, &key, || {
            api.playlist(subject, asset, version)
        }) {
            Ok(playlist) => enriched.playlist = Some(playlist),
            Err(err) => warn!("match {match_id} playlist lookup failed: {err}"),
        }
    }
}

fn persist(caches: &Caches, enriched: &EnrichedMatch) {
    let match_id = enriched.match_id();
    if let Err(err) = caches.durable.upsert(MATCHES, match_id, enriched) {
        warn!("match {match_id} not persisted: {err}");
    }
}

fn remember_summary(caches: &Caches, subject: &Subject, summary: &MatchSummary) {
    let key = subject_match_key(&subject.id, &summary.match_id);
    let record = SubjectMatch {
        subject_id: subject.id.clone(),
        summary: summary.clone(),
    };
    if let Err(err) = caches.durable.upsert(SUBJECT_MATCHES, &key, &record) {
        warn!("summary {key} not persisted: {err}");
    }
}

pub fn subject_match_key(subject_id: &str, match_id: &str) -> String {
    format!("{subject_id}:{match_id}")
}

/// Fills the display times, or leaves both untouched if either fails to parse.
pub fn format_match_times(info: &mut MatchInfo) -> Result<(), chrono::ParseError> {
    let start = format_timestamp(&info.start_time)?;
    let end = info
        .end_time
        .as_deref()
        .map(format_timestamp)
        .transpose()?;
    info.formatted_start_time = Some(start);
    info.formatted_end_time = end;
    Ok(())
}

pub fn format_timestamp(raw: &str) -> Result<String, chrono::ParseError> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim())?;
    Ok(parsed
        .with_timezone(&Utc)
        .format(DISPLAY_TIME_FORMAT)
        .to_string())
}
