use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::PlaylistAverages;

/// The player a pipeline run acts on behalf of.
#[derive(Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    pub credential: String,
}

impl Subject {
    pub fn new(id: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            credential: credential.into(),
        }
    }
}

impl fmt::Debug for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("id", &self.id)
            .field("credential", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub subject: &'a Subject,
    pub start: usize,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchSummary {
    pub match_id: String,
    #[serde(default)]
    pub outcome: u8,
    #[serde(default)]
    pub rank: u32,
    #[serde(default)]
    pub last_team_id: Option<u32>,
    #[serde(default)]
    pub present_at_end_of_match: bool,
}

impl MatchSummary {
    pub fn outcome_label(&self) -> &'static str {
        match self.outcome {
            1 => "Tie",
            2 => "Win",
            3 => "Loss",
            4 => "Left",
            _ => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchPage {
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub results: Vec<MatchSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssetRef {
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub version_id: Option<String>,
}

impl AssetRef {
    /// Both halves of the key, when the upstream supplied them.
    pub fn ids(&self) -> Option<(&str, &str)> {
        let asset = self.asset_id.as_deref().filter(|s| !s.is_empty())?;
        let version = self.version_id.as_deref().filter(|s| !s.is_empty())?;
        Some((asset, version))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchInfo {
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub map_variant: AssetRef,
    #[serde(default)]
    pub playlist: AssetRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_end_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CoreStats {
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub personal_score: i64,
    #[serde(default)]
    pub kills: u32,
    #[serde(default)]
    pub deaths: u32,
    #[serde(default)]
    pub assists: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TeamStats {
    pub team_id: u32,
    #[serde(default)]
    pub outcome: u8,
    #[serde(default)]
    pub rank: u32,
    #[serde(default)]
    pub core_stats: CoreStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerTeamStats {
    pub team_id: u32,
    #[serde(default)]
    pub core_stats: CoreStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerStats {
    pub player_id: String,
    #[serde(default)]
    pub last_team_id: Option<u32>,
    #[serde(default)]
    pub player_team_stats: Vec<PlayerTeamStats>,
}

/// Full match detail as returned by the stats endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchDetail {
    pub match_id: String,
    pub match_info: MatchInfo,
    #[serde(default)]
    pub teams: Vec<TeamStats>,
    #[serde(default)]
    pub players: Vec<PlayerStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapInfo {
    pub asset_id: String,
    pub version_id: String,
    pub public_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaylistInfo {
    pub asset_id: String,
    pub version_id: String,
    pub public_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub ranked: bool,
}

/// One subject's view of a match. Outcome, rank and presence differ per
/// player, so they are stored apart from the shared match record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubjectMatch {
    pub subject_id: String,
    #[serde(flatten)]
    pub summary: MatchSummary,
}

/// A match summary grown with detail, map and playlist lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnrichedMatch {
    #[serde(flatten)]
    pub summary: MatchSummary,
    pub match_info: MatchInfo,
    #[serde(default)]
    pub teams: Vec<TeamStats>,
    #[serde(default)]
    pub players: Vec<PlayerStats>,
    #[serde(default)]
    pub map: Option<MapInfo>,
    #[serde(default)]
    pub playlist: Option<PlaylistInfo>,
}

impl EnrichedMatch {
    pub fn new(summary: MatchSummary, detail: MatchDetail) -> Self {
        Self {
            summary,
            match_info: detail.match_info,
            teams: detail.teams,
            players: detail.players,
            map: None,
            playlist: None,
        }
    }

    pub fn match_id(&self) -> &str {
        &self.summary.match_id
    }

    pub fn playlist_name(&self) -> Option<&str> {
        self.playlist
            .as_ref()
            .map(|p| p.public_name.as_str())
            .filter(|name| !name.is_empty())
    }

    /// True when a lookup that had ids to go on came back empty.
    pub fn missing_lookups(&self) -> bool {
        (self.map.is_none() && self.match_info.map_variant.ids().is_some())
            || (self.playlist.is_none() && self.match_info.playlist.ids().is_some())
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.players.iter().any(|p| p.player_id == player_id)
    }

    /// Personal score summed over every team the player appeared on.
    pub fn personal_score(&self, player_id: &str) -> Option<i64> {
        let player = self.players.iter().find(|p| p.player_id == player_id)?;
        if player.player_team_stats.is_empty() {
            return None;
        }
        Some(
            player
                .player_team_stats
                .iter()
                .map(|t| t.core_stats.personal_score)
                .sum(),
        )
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.match_info.start_time)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Profile {
    pub player_id: String,
    pub gamertag: String,
    #[serde(default)]
    pub emblem_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Season {
    pub season_id: String,
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SeasonCalendar {
    #[serde(default)]
    pub seasons: Vec<Season>,
}

impl SeasonCalendar {
    pub fn season_at(&self, at: DateTime<Utc>) -> Option<&Season> {
        self.seasons
            .iter()
            .find(|s| s.start_date <= at && at < s.end_date)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemMetadata {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RewardItem {
    #[serde(default)]
    pub item_path: String,
    #[serde(default)]
    pub amount: u32,
    #[serde(default)]
    pub item_type: Option<String>,
    /// Gzip-compressed image bytes, base64 encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ItemMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RewardSet {
    #[serde(default)]
    pub inventory_rewards: Vec<RewardItem>,
    #[serde(default)]
    pub currency_rewards: Vec<RewardItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RewardRank {
    pub rank: u32,
    #[serde(default)]
    pub free_rewards: RewardSet,
    #[serde(default)]
    pub paid_rewards: RewardSet,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RewardTrack {
    pub track_id: String,
    #[serde(default)]
    pub ranks: Vec<RewardRank>,
}

/// The composite persisted per subject after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerReport {
    pub subject_id: String,
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub season: Option<String>,
    pub matches: Vec<EnrichedMatch>,
    pub averages: PlaylistAverages,
    pub generated_at: DateTime<Utc>,
}
