use anyhow::{Context, Result, anyhow};
use chrono::Utc;

use service_record::cache::Caches;
use service_record::config::PipelineConfig;
use service_record::model::{RewardSet, Subject};
use service_record::rewards::load_reward_track;
use service_record::upstream::HttpStatsApi;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    env_logger::init();

    let config = PipelineConfig::from_env();
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let player = flag(&args, "--player")
        .or_else(|| std::env::var("STATS_PLAYER_ID").ok())
        .ok_or_else(|| anyhow!("no player id (pass --player or set STATS_PLAYER_ID)"))?;
    let track_id = flag(&args, "--track").ok_or_else(|| anyhow!("missing --track <id>"))?;

    let db_path = config
        .db_path
        .clone()
        .context("unable to resolve sqlite path")?;
    let caches = Caches::open(&db_path)
        .with_context(|| format!("open store {}", db_path.display()))?;
    let api = HttpStatsApi::new(&config).context("build stats client")?;
    let subject = Subject::new(player, std::env::var("STATS_API_TOKEN").unwrap_or_default());

    let track = load_reward_track(
        &api,
        &caches,
        &subject,
        &track_id,
        Utc::now(),
        config.fetch_parallelism,
    )
    .with_context(|| format!("reward track {track_id}"))?;

    println!("Reward track {} ({} ranks)", track.track_id, track.ranks.len());
    for rank in &track.ranks {
        let (free_total, free_done) = image_counts(&rank.free_rewards);
        let (paid_total, paid_done) = image_counts(&rank.paid_rewards);
        println!(
            "rank {:>3}: free {free_done}/{free_total}  paid {paid_done}/{paid_total}",
            rank.rank
        );
    }
    Ok(())
}

fn image_counts(set: &RewardSet) -> (usize, usize) {
    let items = set.inventory_rewards.iter().chain(set.currency_rewards.iter());
    items.fold((0, 0), |(total, done), item| {
        (total + 1, done + usize::from(item.image.is_some()))
    })
}

fn flag(args: &[String], name: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == name)
        .map(|w| w[1].trim().to_string())
        .filter(|s| !s.is_empty())
}
