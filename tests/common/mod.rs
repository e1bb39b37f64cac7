#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use service_record::error::FetchError;
use service_record::model::{
    AssetRef, CoreStats, ItemMetadata, MapInfo, MatchDetail, MatchInfo, MatchPage, MatchSummary,
    PageRequest, PlayerStats, PlayerTeamStats, PlaylistInfo, Profile, RewardItem, RewardRank,
    RewardSet, RewardTrack, Season, SeasonCalendar, Subject,
};
use service_record::upstream::StatsApi;

pub const PLAYER: &str = "xuid(1001)";
pub const TEAMMATE: &str = "xuid(2002)";

pub fn subject() -> Subject {
    Subject::new(PLAYER, "test-token")
}

pub fn teammate() -> Subject {
    Subject::new(TEAMMATE, "teammate-token")
}

pub fn match_id(n: usize) -> String {
    format!("match-{n:04}")
}

/// In-process upstream serving `total` generated matches.
#[derive(Default)]
pub struct FakeApi {
    pub total: usize,
    pub fail_page_starts: HashSet<usize>,
    pub fail_matches: HashSet<String>,
    pub no_map_ids: HashSet<String>,
    pub bad_timestamps: HashSet<String>,
    pub fail_playlist: bool,
    pub fail_items: HashSet<String>,
    /// Subjects whose summaries report them gone before the match ended.
    pub absent_players: HashSet<String>,
    pub track: RewardTrack,
    pub page_calls: AtomicUsize,
    pub stats_calls: AtomicUsize,
    pub map_calls: AtomicUsize,
    pub playlist_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
    pub calendar_calls: AtomicUsize,
    pub track_calls: AtomicUsize,
    pub item_calls: AtomicUsize,
    pub image_calls: AtomicUsize,
}

impl FakeApi {
    pub fn with_matches(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

fn http_error(url: &str, status: u16) -> FetchError {
    FetchError::Status {
        url: url.to_string(),
        status,
        body: "{\"error\":\"boom\"}".to_string(),
    }
}

impl StatsApi for FakeApi {
    fn match_count(&self, _subject: &Subject) -> Result<usize, FetchError> {
        Ok(self.total)
    }

    fn match_page(&self, request: &PageRequest<'_>) -> Result<MatchPage, FetchError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_page_starts.contains(&request.start) {
            return Err(http_error("/matches", 503));
        }
        let end = (request.start + request.count).min(self.total);
        let present = !self.absent_players.contains(&request.subject.id);
        let results = (request.start..end)
            .map(|n| MatchSummary {
                match_id: match_id(n),
                outcome: 2,
                rank: 1,
                last_team_id: Some(0),
                present_at_end_of_match: present,
            })
            .collect();
        Ok(MatchPage {
            start: request.start,
            results,
        })
    }

    fn match_stats(&self, _subject: &Subject, id: &str) -> Result<MatchDetail, FetchError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_matches.contains(id) {
            return Err(http_error("/matches/stats", 500));
        }
        let map_variant = if self.no_map_ids.contains(id) {
            AssetRef {
                asset_id: Some("map-asset".to_string()),
                version_id: None,
            }
        } else {
            AssetRef {
                asset_id: Some("map-asset".to_string()),
                version_id: Some("map-v1".to_string()),
            }
        };
        let start_time = if self.bad_timestamps.contains(id) {
            "not a time".to_string()
        } else {
            "2023-05-01T18:30:00.1234567Z".to_string()
        };
        Ok(MatchDetail {
            match_id: id.to_string(),
            match_info: MatchInfo {
                start_time,
                end_time: Some("2023-05-01T18:40:30.5Z".to_string()),
                duration: "PT10M30.5S".to_string(),
                map_variant,
                playlist: AssetRef {
                    asset_id: Some("playlist-asset".to_string()),
                    version_id: Some("playlist-v1".to_string()),
                },
                ..MatchInfo::default()
            },
            teams: Vec::new(),
            players: [PLAYER, TEAMMATE]
                .into_iter()
                .map(|player| PlayerStats {
                    player_id: player.to_string(),
                    last_team_id: Some(0),
                    player_team_stats: vec![PlayerTeamStats {
                        team_id: 0,
                        core_stats: CoreStats {
                            personal_score: 1000,
                            kills: 10,
                            ..CoreStats::default()
                        },
                    }],
                })
                .collect(),
        })
    }

    fn map(&self, _subject: &Subject, asset: &str, version: &str) -> Result<MapInfo, FetchError> {
        self.map_calls.fetch_add(1, Ordering::SeqCst);
        Ok(MapInfo {
            asset_id: asset.to_string(),
            version_id: version.to_string(),
            public_name: "Streets".to_string(),
            ..MapInfo::default()
        })
    }

    fn playlist(
        &self,
        _subject: &Subject,
        asset: &str,
        version: &str,
    ) -> Result<PlaylistInfo, FetchError> {
        self.playlist_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_playlist {
            return Err(http_error("/playlists", 404));
        }
        Ok(PlaylistInfo {
            asset_id: asset.to_string(),
            version_id: version.to_string(),
            public_name: "Big Team Battle".to_string(),
            ..PlaylistInfo::default()
        })
    }

    fn profile(&self, subject: &Subject) -> Result<Profile, FetchError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Profile {
            player_id: subject.id.clone(),
            gamertag: "Chief".to_string(),
            emblem_path: None,
        })
    }

    fn season_calendar(&self, _subject: &Subject) -> Result<SeasonCalendar, FetchError> {
        self.calendar_calls.fetch_add(1, Ordering::SeqCst);
        let start = chrono::DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .expect("valid")
            .to_utc();
        let end = chrono::DateTime::parse_from_rfc3339("2099-01-01T00:00:00Z")
            .expect("valid")
            .to_utc();
        Ok(SeasonCalendar {
            seasons: vec![Season {
                season_id: "s1".to_string(),
                name: "Forever Season".to_string(),
                start_date: start,
                end_date: end,
            }],
        })
    }

    fn reward_track(&self, _subject: &Subject, _track: &str) -> Result<RewardTrack, FetchError> {
        self.track_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.track.clone())
    }

    fn item(&self, _subject: &Subject, path: &str) -> Result<ItemMetadata, FetchError> {
        self.item_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_items.contains(path) {
            return Err(http_error("/items", 404));
        }
        Ok(ItemMetadata {
            title: format!("Item {path}"),
            image_path: Some(format!("icons/{path}.png")),
            ..ItemMetadata::default()
        })
    }

    fn image(&self, _subject: &Subject, url: &str) -> Result<Vec<u8>, FetchError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        Ok(url.as_bytes().repeat(4))
    }
}

pub fn reward(path: &str) -> RewardItem {
    RewardItem {
        item_path: path.to_string(),
        amount: 1,
        ..RewardItem::default()
    }
}

/// Three ranks sharing some paths, plus one empty path.
pub fn sample_track() -> RewardTrack {
    RewardTrack {
        track_id: "op-1".to_string(),
        ranks: vec![
            RewardRank {
                rank: 1,
                free_rewards: RewardSet {
                    inventory_rewards: vec![reward("armor/helmet")],
                    currency_rewards: vec![reward("currency/xp-boost")],
                },
                paid_rewards: RewardSet {
                    inventory_rewards: vec![reward("armor/visor"), reward("")],
                    currency_rewards: Vec::new(),
                },
            },
            RewardRank {
                rank: 2,
                free_rewards: RewardSet {
                    inventory_rewards: vec![reward("armor/helmet")],
                    currency_rewards: Vec::new(),
                },
                paid_rewards: RewardSet {
                    inventory_rewards: vec![reward("weapon/coating")],
                    currency_rewards: vec![reward("currency/xp-boost")],
                },
            },
            RewardRank {
                rank: 3,
                free_rewards: RewardSet::default(),
                paid_rewards: RewardSet {
                    inventory_rewards: vec![reward("emblem/nameplate")],
                    currency_rewards: Vec::new(),
                },
            },
        ],
    }
}
