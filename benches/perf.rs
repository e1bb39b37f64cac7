use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use chrono::{DateTime, Utc};
use service_record::model::{
    CoreStats, EnrichedMatch, MatchInfo, MatchSummary, PlayerStats, PlayerTeamStats, PlaylistInfo,
    RewardItem, RewardRank, RewardSet, RewardTrack,
};
use service_record::rewards::{ItemResult, RewardIndex};
use service_record::stats::{MultiplierPolicy, parse_match_duration, playlist_averages};

const PLAYER: &str = "xuid(1001)";
const PLAYLISTS: [&str; 5] = [
    "Quick Play",
    "Big Team Battle",
    "Ranked Arena",
    "Fiesta",
    "Team Doubles",
];

fn sample_matches(n: usize) -> Vec<EnrichedMatch> {
    (0..n)
        .map(|i| EnrichedMatch {
            summary: MatchSummary {
                match_id: format!("match-{i:05}"),
                outcome: (i % 4) as u8,
                rank: 1 + (i % 8) as u32,
                last_team_id: Some(0),
                present_at_end_of_match: i % 17 != 0,
            },
            match_info: MatchInfo {
                start_time: format!("2023-{:02}-{:02}T18:30:00.1234567Z", 1 + i % 12, 1 + i % 28),
                duration: format!("PT{}M{}.25S", 5 + i % 10, i % 60),
                ..MatchInfo::default()
            },
            teams: Vec::new(),
            players: vec![PlayerStats {
                player_id: PLAYER.to_string(),
                last_team_id: Some(0),
                player_team_stats: vec![PlayerTeamStats {
                    team_id: 0,
                    core_stats: CoreStats {
                        personal_score: 500 + (i as i64 * 37) % 2000,
                        ..CoreStats::default()
                    },
                }],
            }],
            map: None,
            playlist: Some(PlaylistInfo {
                public_name: PLAYLISTS[i % PLAYLISTS.len()].to_string(),
                ..PlaylistInfo::default()
            }),
        })
        .collect()
}

fn sample_track(ranks: usize) -> RewardTrack {
    let item = |path: String| RewardItem {
        item_path: path,
        amount: 1,
        ..RewardItem::default()
    };
    RewardTrack {
        track_id: "op-bench".to_string(),
        ranks: (0..ranks)
            .map(|r| RewardRank {
                rank: r as u32 + 1,
                free_rewards: RewardSet {
                    inventory_rewards: vec![item(format!("armor/{}", r % 40))],
                    currency_rewards: vec![item("currency/xp-boost".to_string())],
                },
                paid_rewards: RewardSet {
                    inventory_rewards: vec![item(format!("weapon/{r}")), item(String::new())],
                    currency_rewards: Vec::new(),
                },
            })
            .collect(),
    }
}

fn bench_playlist_averages(c: &mut Criterion) {
    let matches = sample_matches(500);
    let cutoff: DateTime<Utc> = DateTime::parse_from_rfc3339("2021-11-15T00:00:00Z")
        .expect("valid")
        .with_timezone(&Utc);
    let policy = MultiplierPolicy::default();
    c.bench_function("playlist_averages_500", |b| {
        b.iter(|| {
            let out = playlist_averages(black_box(&matches), PLAYER, cutoff, &policy);
            black_box(out.scores.len());
        })
    });
    c.bench_function("parse_match_duration", |b| {
        b.iter(|| black_box(parse_match_duration(black_box("PT10M18.3751314S"))))
    });
}

fn bench_reward_index(c: &mut Criterion) {
    let track = sample_track(100);
    c.bench_function("reward_index_build_100", |b| {
        b.iter(|| black_box(RewardIndex::build(black_box(&track)).len()))
    });

    let index = RewardIndex::build(&track);
    let results: Vec<ItemResult> = index
        .paths()
        .iter()
        .map(|path| ItemResult {
            path: path.clone(),
            image: Some("H4sIAAAAAAAA/w==".to_string()),
            metadata: None,
        })
        .collect();
    c.bench_function("reward_index_apply_100", |b| {
        b.iter(|| {
            let mut patched = track.clone();
            let touched: usize = results.iter().map(|r| index.apply(&mut patched, r)).sum();
            black_box(touched);
        })
    });
}

criterion_group!(benches, bench_playlist_averages, bench_reward_index);
criterion_main!(benches);
