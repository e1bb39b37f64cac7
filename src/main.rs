use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use service_record::cache::Caches;
use service_record::config::PipelineConfig;
use service_record::model::Subject;
use service_record::pipeline::Pipeline;
use service_record::upstream::HttpStatsApi;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    env_logger::init();

    let mut config = PipelineConfig::from_env();
    if let Some(path) = arg_value("--db").map(PathBuf::from) {
        config.db_path = Some(path);
    }
    let player = arg_value("--player")
        .or_else(|| std::env::var("STATS_PLAYER_ID").ok())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| anyhow!("no player id (pass --player or set STATS_PLAYER_ID)"))?;
    let requested = match arg_value("--count") {
        Some(raw) => Some(
            raw.parse::<usize>()
                .with_context(|| format!("invalid --count {raw}"))?,
        ),
        None => None,
    };
    let offline = std::env::args().any(|a| a == "--offline");

    let db_path = config
        .db_path
        .clone()
        .context("unable to resolve sqlite path")?;
    let caches = Caches::open(&db_path)
        .with_context(|| format!("open store {}", db_path.display()))?;
    let api = HttpStatsApi::new(&config).context("build stats client")?;
    let credential = std::env::var("STATS_API_TOKEN").unwrap_or_default();
    let subject = Subject::new(player, credential);

    let pipeline = Pipeline::new(&api, &caches, &config);
    pipeline.prepare_store().context("prepare store indexes")?;

    let report = if offline {
        pipeline.stored_report(&subject).context("stored report")?
    } else {
        let outcome = pipeline.run(&subject, requested)?;
        println!(
            "Pages: {}  enriched: {}  reused: {}  failed: {}",
            outcome.pages, outcome.enrich.enriched, outcome.enrich.reused, outcome.enrich.failed
        );
        outcome.report
    };

    println!("Service record for {}", report.subject_id);
    if let Some(profile) = &report.profile {
        println!("Gamertag: {}", profile.gamertag);
    }
    println!("Season: {}", report.season.as_deref().unwrap_or("n/a"));
    println!("DB: {}", db_path.display());
    println!("Matches: {}", report.matches.len());
    for (playlist, score) in &report.averages.scores {
        let duration = report
            .averages
            .durations
            .get(playlist)
            .map(String::as_str)
            .unwrap_or("--:--");
        println!("  {playlist:<28} avg score {score:>6}  avg length {duration}");
    }
    Ok(())
}

fn arg_value(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}
