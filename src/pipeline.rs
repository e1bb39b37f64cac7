use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::cache::{CachePolicy, Caches};
use crate::config::PipelineConfig;
use crate::enrich::{Accumulator, EnrichSummary, MATCHES, SUBJECT_MATCHES, enrich_matches};
use crate::error::{PipelineError, StoreError};
use crate::model::{EnrichedMatch, PlayerReport, Profile, Subject, SubjectMatch};
use crate::page_fetch::fetch_match_pages;
use crate::stats::{MultiplierPolicy, playlist_averages};
use crate::upstream::StatsApi;

pub const PROFILES: &str = "profiles";
pub const REPORTS: &str = "reports";
const SEASON_CALENDAR: &str = "season_calendar";

/// Ties the upstream API and both cache tiers into one report per subject.
pub struct Pipeline<'a> {
    api: &'a dyn StatsApi,
    caches: &'a Caches,
    config: &'a PipelineConfig,
    policy: MultiplierPolicy,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: PlayerReport,
    pub pages: usize,
    pub enrich: EnrichSummary,
}

impl<'a> Pipeline<'a> {
    pub fn new(api: &'a dyn StatsApi, caches: &'a Caches, config: &'a PipelineConfig) -> Self {
        Self {
            api,
            caches,
            config,
            policy: MultiplierPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: MultiplierPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Indexes used by `stored_report`; safe to call on every startup.
    pub fn prepare_store(&self) -> Result<(), StoreError> {
        self.caches
            .durable
            .ensure_index(MATCHES, "MatchInfo.StartTime")?;
        self.caches
            .durable
            .ensure_index(SUBJECT_MATCHES, "SubjectId")?;
        self.caches.durable.ensure_index(REPORTS, "SubjectId")?;
        Ok(())
    }

    /// Fetches, enriches and aggregates up to `requested` recent matches (all
    /// of them when `None`, subject to the history cap) and stores the report.
    pub fn run(
        &self,
        subject: &Subject,
        requested: Option<usize>,
    ) -> Result<RunOutcome, PipelineError> {
        let total = match requested {
            Some(n) => n,
            None => self
                .api
                .match_count(subject)
                .map_err(PipelineError::History)?,
        };

        let pages = fetch_match_pages(
            self.api,
            subject,
            total,
            self.config.match_history_cap,
            self.config.fetch_parallelism,
        )
        .map_err(PipelineError::History)?;

        let accumulator = Accumulator::new();
        let enrich = enrich_matches(
            self.api,
            self.caches,
            subject,
            &pages,
            &accumulator,
            self.config.fetch_parallelism,
        );

        let report = self.build_report(subject, accumulator.into_matches(), Utc::now());
        self.caches.durable.upsert(REPORTS, &subject.id, &report)?;
        info!(
            "report for {} stored: {} matches over {} pages",
            subject.id,
            report.matches.len(),
            pages.len()
        );

        Ok(RunOutcome {
            report,
            pages: pages.len(),
            enrich,
        })
    }

    /// Rebuilds a report from stored matches without touching match history.
    ///
    /// Only matches this subject has seen in a previous run are included, each
    /// with the subject's own summary rather than whoever stored it.
    pub fn stored_report(&self, subject: &Subject) -> Result<PlayerReport, StoreError> {
        let seen: Vec<SubjectMatch> = self
            .caches
            .durable
            .find(SUBJECT_MATCHES, |s: &SubjectMatch| s.subject_id == subject.id)?
            .collect();

        let mut matches = Vec::with_capacity(seen.len());
        for SubjectMatch { summary, .. } in seen {
            let Some(mut stored) = self
                .caches
                .durable
                .get::<EnrichedMatch>(MATCHES, &summary.match_id)?
            else {
                continue;
            };
            stored.summary = summary;
            matches.push(stored);
        }
        Ok(self.build_report(subject, matches, Utc::now()))
    }

    fn build_report(
        &self,
        subject: &Subject,
        mut matches: Vec<EnrichedMatch>,
        now: DateTime<Utc>,
    ) -> PlayerReport {
        let averages = playlist_averages(
            &matches,
            &subject.id,
            self.config.stats_cutoff,
            &self.policy,
        );
        // Newest first; unparsable start times sink to the end.
        matches.sort_by(|a, b| b.start_time().cmp(&a.start_time()));

        PlayerReport {
            subject_id: subject.id.clone(),
            profile: self.profile(subject),
            season: self.season_name(subject, now),
            matches,
            averages,
            generated_at: now,
        }
    }

    fn profile(&self, subject: &Subject) -> Option<Profile> {
        self.caches
            .read_through(CachePolicy::Persisted, PROFILES, &subject.id, || {
                self.api.profile(subject)
            })
            .map_err(|err| warn!("profile for {} unavailable: {err}", subject.id))
            .ok()
    }

    fn season_name(&self, subject: &Subject, now: DateTime<Utc>) -> Option<String> {
        let calendar = self
            .caches
            .read_through(CachePolicy::Shared, SEASON_CALENDAR, "all", || {
                self.api.season_calendar(subject)
            })
            .map_err(|err| warn!("season calendar unavailable: {err}"))
            .ok()?;
        calendar.season_at(now).map(|s| s.name.clone())
    }
}
