use std::collections::HashMap;
use std::io::Write;
use std::sync::mpsc;
use std::thread;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Datelike, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cache::Caches;
use crate::error::FetchError;
use crate::fetch_pool::with_fetch_pool;
use crate::model::{ItemMetadata, RewardItem, RewardSet, RewardTrack, Subject};
use crate::upstream::StatsApi;

pub const ITEMS: &str = "items";
pub const REWARD_TRACKS: &str = "reward_tracks";

/// One fan-out result. Both fields are `None` when the item failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemResult {
    pub path: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub metadata: Option<ItemMetadata>,
}

impl ItemResult {
    fn placeholder(path: &str) -> Self {
        Self {
            path: path.to_string(),
            image: None,
            metadata: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.image.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Free,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Inventory,
    Currency,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    rank: usize,
    tier: Tier,
    kind: Kind,
    index: usize,
}

/// Item path to every place in the track that references it.
#[derive(Debug, Default)]
pub struct RewardIndex {
    slots: HashMap<String, Vec<Slot>>,
    order: Vec<String>,
}

impl RewardIndex {
    pub fn build(track: &RewardTrack) -> Self {
        let mut index = Self::default();
        for (rank, r) in track.ranks.iter().enumerate() {
            index.add_set(rank, Tier::Free, &r.free_rewards);
            index.add_set(rank, Tier::Paid, &r.paid_rewards);
        }
        index
    }

    fn add_set(&mut self, rank: usize, tier: Tier, set: &RewardSet) {
        let lists = [
            (Kind::Inventory, &set.inventory_rewards),
            (Kind::Currency, &set.currency_rewards),
        ];
        for (kind, items) in lists {
            for (index, item) in items.iter().enumerate() {
                let path = item.item_path.trim();
                if path.is_empty() {
                    continue;
                }
                let slots = self.slots.entry(path.to_string()).or_insert_with(|| {
                    self.order.push(path.to_string());
                    Vec::new()
                });
                slots.push(Slot {
                    rank,
                    tier,
                    kind,
                    index,
                });
            }
        }
    }

    /// Distinct non-empty paths in first-seen order.
    pub fn paths(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Writes `result` into every slot for its path; returns slots touched.
    pub fn apply(&self, track: &mut RewardTrack, result: &ItemResult) -> usize {
        let Some(slots) = self.slots.get(&result.path) else {
            return 0;
        };
        let mut touched = 0;
        for slot in slots {
            let Some(item) = slot_item(track, slot) else {
                continue;
            };
            item.image = result.image.clone();
            item.metadata = result.metadata.clone();
            touched += 1;
        }
        touched
    }
}

fn slot_item<'a>(track: &'a mut RewardTrack, slot: &Slot) -> Option<&'a mut RewardItem> {
    let rank = track.ranks.get_mut(slot.rank)?;
    let set = match slot.tier {
        Tier::Free => &mut rank.free_rewards,
        Tier::Paid => &mut rank.paid_rewards,
    };
    let items = match slot.kind {
        Kind::Inventory => &mut set.inventory_rewards,
        Kind::Currency => &mut set.currency_rewards,
    };
    items.get_mut(slot.index)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewardImageSummary {
    pub dispatched: usize,
    pub received: usize,
    pub resolved: usize,
}

/// Fetches and compresses the icon of every distinct item in `track`, then
/// patches results back in place.
///
/// Every dispatched path sends exactly one result, failures included, so the
/// collector always receives `dispatched` results before returning.
pub fn enrich_reward_images(
    api: &dyn StatsApi,
    caches: &Caches,
    subject: &Subject,
    track: &mut RewardTrack,
    parallelism: usize,
) -> RewardImageSummary {
    let index = RewardIndex::build(track);
    let mut summary = RewardImageSummary {
        dispatched: index.len(),
        ..RewardImageSummary::default()
    };
    if index.is_empty() {
        return summary;
    }

    let (tx, rx) = mpsc::channel::<ItemResult>();
    let paths = index.paths();

    thread::scope(|scope| {
        scope.spawn(move || {
            with_fetch_pool(parallelism, || {
                paths.par_iter().for_each_with(tx, |tx, path| {
                    let result = resolve_item(api, caches, subject, path);
                    if tx.send(result).is_err() {
                        debug!("collector gone before {path} reported");
                    }
                });
            });
        });

        for _ in 0..summary.dispatched {
            let Ok(result) = rx.recv() else {
                break;
            };
            summary.received += 1;
            if result.is_resolved() {
                summary.resolved += 1;
            }
            index.apply(track, &result);
        }
    });

    info!(
        "track {}: {}/{} reward images resolved",
        track.track_id, summary.resolved, summary.dispatched
    );
    summary
}

/// Cache-aside for one item: ephemeral hash, durable store, then upstream.
fn resolve_item(api: &dyn StatsApi, caches: &Caches, subject: &Subject, path: &str) -> ItemResult {
    if let Some(value) = caches.ephemeral.get_field(ITEMS, path)
        && let Ok(hit) = serde_json::from_value::<ItemResult>(value)
    {
        return hit;
    }
    match caches.durable.get::<ItemResult>(ITEMS, path) {
        Ok(Some(hit)) => {
            remember_item(caches, &hit);
            return hit;
        }
        Ok(None) => {}
        Err(err) => warn!("stored item {path} unreadable: {err}"),
    }

    match fetch_item(api, subject, path) {
        Ok(result) => {
            if let Err(err) = caches.durable.upsert(ITEMS, path, &result) {
                warn!("item {path} not persisted: {err}");
            }
            remember_item(caches, &result);
            result
        }
        Err(err) => {
            warn!("item {path} image fetch failed: {err}");
            ItemResult::placeholder(path)
        }
    }
}

fn remember_item(caches: &Caches, result: &ItemResult) {
    if let Ok(value) = serde_json::to_value(result) {
        caches.ephemeral.set_field(ITEMS, &result.path, value);
    }
}

fn fetch_item(api: &dyn StatsApi, subject: &Subject, path: &str) -> Result<ItemResult, FetchError> {
    let metadata = api.item(subject, path)?;
    let url = display_image_url(&metadata).ok_or(FetchError::Empty("item image path"))?;
    let bytes = api.image(subject, &url)?;
    let compressed = compress_image(&bytes).map_err(|err| FetchError::Client(err.to_string()))?;
    Ok(ItemResult {
        path: path.to_string(),
        image: Some(BASE64.encode(compressed)),
        metadata: Some(metadata),
    })
}

/// Icon URL for an item; relative paths are resolved by the client.
pub fn display_image_url(metadata: &ItemMetadata) -> Option<String> {
    let path = metadata.image_path.as_deref()?.trim();
    if path.is_empty() {
        return None;
    }
    if path.starts_with("http://") || path.starts_with("https://") {
        return Some(path.to_string());
    }
    Some(format!("images/file/{}", path.trim_start_matches('/')))
}

pub fn compress_image(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::best());
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Cache key that rolls over every ISO week, bounding reward staleness.
pub fn weekly_track_key(track_id: &str, at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{track_id}:{}-W{:02}", week.year(), week.week())
}

/// Reward track with images, served from this week's stored copy when present.
///
/// A stored copy with unresolved items goes through the image fan-out again;
/// items that resolved before come straight from the item caches.
pub fn load_reward_track(
    api: &dyn StatsApi,
    caches: &Caches,
    subject: &Subject,
    track_id: &str,
    now: DateTime<Utc>,
    parallelism: usize,
) -> Result<RewardTrack, FetchError> {
    let key = format!("{}:{}", subject.id, weekly_track_key(track_id, now));
    let stored = caches
        .durable
        .get::<RewardTrack>(REWARD_TRACKS, &key)
        .unwrap_or_else(|err| {
            warn!("stored reward track {key} unreadable: {err}");
            None
        });

    let mut track = match stored {
        Some(track) if unresolved_items(&track) == 0 => {
            debug!("reward track {key} served from store");
            return Ok(track);
        }
        Some(track) => {
            debug!(
                "reward track {key} has {} unresolved items, retrying",
                unresolved_items(&track)
            );
            track
        }
        None => api.reward_track(subject, track_id)?,
    };

    enrich_reward_images(api, caches, subject, &mut track, parallelism);
    if let Err(err) = caches.durable.upsert(REWARD_TRACKS, &key, &track) {
        warn!("reward track {key} not persisted: {err}");
    }
    Ok(track)
}

/// Reward slots with an item path but no image yet.
pub fn unresolved_items(track: &RewardTrack) -> usize {
    track
        .ranks
        .iter()
        .flat_map(|rank| [&rank.free_rewards, &rank.paid_rewards])
        .flat_map(|set| set.inventory_rewards.iter().chain(&set.currency_rewards))
        .filter(|item| !item.item_path.trim().is_empty() && item.image.is_none())
        .count()
}
