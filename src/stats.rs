use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::EnrichedMatch;

pub const BIG_TEAM_MULTIPLIER: f64 = 1.8;

// Objective-heavy playlists score lower per match than slayer ones.
const NAMED_MULTIPLIERS: &[(&str, f64)] = &[
    ("Ranked Arena", 1.2),
    ("Ranked Slayer", 1.1),
    ("Quick Play", 1.0),
    ("Fiesta", 0.9),
    ("Squad Battle", 1.3),
];

#[derive(Debug, Clone)]
pub struct MultiplierPolicy {
    named: HashMap<String, f64>,
}

impl Default for MultiplierPolicy {
    fn default() -> Self {
        Self::new(
            NAMED_MULTIPLIERS
                .iter()
                .map(|(name, m)| ((*name).to_string(), *m)),
        )
    }
}

impl MultiplierPolicy {
    pub fn new(named: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            named: named.into_iter().collect(),
        }
    }

    /// Big team playlists always get the big team multiplier, even when named.
    pub fn multiplier_for(&self, playlist: &str) -> f64 {
        if playlist.contains("BTB") || playlist.contains("Big Team") {
            return BIG_TEAM_MULTIPLIER;
        }
        self.named.get(playlist).copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaylistAverages {
    pub scores: BTreeMap<String, i64>,
    pub durations: BTreeMap<String, String>,
}

#[derive(Default)]
struct PlaylistTotals {
    score: i64,
    duration: Duration,
    count: u32,
}

/// Per-playlist adjusted average score and "MM:SS" average duration for
/// `subject_id`, over matches they finished on or after `cutoff`.
pub fn playlist_averages(
    matches: &[EnrichedMatch],
    subject_id: &str,
    cutoff: DateTime<Utc>,
    policy: &MultiplierPolicy,
) -> PlaylistAverages {
    let mut totals: HashMap<&str, PlaylistTotals> = HashMap::new();

    for m in matches {
        if !m.summary.present_at_end_of_match {
            continue;
        }
        let Some(start) = m.start_time() else {
            continue;
        };
        if start < cutoff {
            continue;
        }
        let Some(duration) = parse_match_duration(&m.match_info.duration) else {
            continue;
        };
        let Some(playlist) = m.playlist_name() else {
            continue;
        };
        let Some(score) = m.personal_score(subject_id) else {
            continue;
        };
        let entry = totals.entry(playlist).or_default();
        entry.score += score;
        entry.duration += duration;
        entry.count += 1;
    }

    let mut out = PlaylistAverages::default();
    for (playlist, t) in totals {
        let mean = t.score as f64 / f64::from(t.count);
        let adjusted = (mean * policy.multiplier_for(playlist)) as i64;
        out.scores.insert(playlist.to_string(), adjusted);
        out.durations
            .insert(playlist.to_string(), format_mm_ss(t.duration / t.count));
    }
    out
}

/// Parses `PT<minutes>M<seconds>S`, seconds optionally fractional.
pub fn parse_match_duration(raw: &str) -> Option<Duration> {
    let rest = raw.trim().strip_prefix("PT")?;
    let (minutes, rest) = rest.split_once('M')?;
    let seconds = rest.strip_suffix('S')?;
    if minutes.is_empty() || !minutes.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let minutes: u64 = minutes.parse().ok()?;

    let (whole, fraction) = seconds.split_once('.').unwrap_or((seconds, ""));
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: u64 = whole.parse().ok()?;
    let nanos = fraction_to_nanos(fraction)?;

    Some(Duration::from_secs(minutes * 60 + whole) + Duration::from_nanos(nanos))
}

fn fraction_to_nanos(fraction: &str) -> Option<u64> {
    if fraction.is_empty() {
        return Some(0);
    }
    let digits: String = fraction.chars().take(9).collect();
    let scale = 10u64.pow(9 - digits.len() as u32);
    digits.parse::<u64>().ok().map(|n| n * scale)
}

pub fn format_mm_ss(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{MultiplierPolicy, format_mm_ss, parse_match_duration};

    #[test]
    fn parses_fractional_seconds() {
        let d = parse_match_duration("PT10M18.3751314S").expect("valid");
        assert_eq!(d, Duration::new(618, 375_131_400));
    }

    #[test]
    fn rejects_other_shapes() {
        assert!(parse_match_duration("PT45.2S").is_none());
        assert!(parse_match_duration("PT1H2M3S").is_none());
        assert!(parse_match_duration("10:18").is_none());
        assert!(parse_match_duration("PTM5S").is_none());
        assert!(parse_match_duration("PT5M-1S").is_none());
    }

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_mm_ss(Duration::new(618, 999_000_000)), "10:18");
        assert_eq!(format_mm_ss(Duration::from_secs(59)), "00:59");
    }

    #[test]
    fn big_team_overrides_named_entry() {
        let policy = MultiplierPolicy::new([("Big Team Battle".to_string(), 0.5)]);
        assert_eq!(policy.multiplier_for("Big Team Battle"), 1.8);
        assert_eq!(policy.multiplier_for("BTB Heavies"), 1.8);
        assert_eq!(policy.multiplier_for("Team Doubles"), 1.0);
    }
}
