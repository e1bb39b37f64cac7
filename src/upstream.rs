use std::thread;
use std::time::Duration;

use log::{debug, warn};
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::PipelineConfig;
use crate::error::FetchError;
use crate::http_client::http_client;
use crate::model::{
    ItemMetadata, MapInfo, MatchDetail, MatchPage, PageRequest, PlaylistInfo, Profile,
    RewardTrack, SeasonCalendar, Subject,
};

const RETRY_BACKOFF_MS: u64 = 300;

/// Everything the pipeline reads from upstream. One call is one round trip.
pub trait StatsApi: Send + Sync {
    fn match_count(&self, subject: &Subject) -> Result<usize, FetchError>;

    fn match_page(&self, request: &PageRequest<'_>) -> Result<MatchPage, FetchError>;

    fn match_stats(&self, subject: &Subject, match_id: &str) -> Result<MatchDetail, FetchError>;

    fn map(&self, subject: &Subject, asset_id: &str, version_id: &str)
    -> Result<MapInfo, FetchError>;

    fn playlist(
        &self,
        subject: &Subject,
        asset_id: &str,
        version_id: &str,
    ) -> Result<PlaylistInfo, FetchError>;

    fn profile(&self, subject: &Subject) -> Result<Profile, FetchError>;

    fn season_calendar(&self, subject: &Subject) -> Result<SeasonCalendar, FetchError>;

    fn reward_track(&self, subject: &Subject, track_id: &str) -> Result<RewardTrack, FetchError>;

    fn item(&self, subject: &Subject, item_path: &str) -> Result<ItemMetadata, FetchError>;

    fn image(&self, subject: &Subject, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpStatsApi {
    client: Client,
    stats_base: String,
    content_base: String,
    retries: u32,
}

impl HttpStatsApi {
    pub fn new(config: &PipelineConfig) -> Result<Self, FetchError> {
        let client = http_client(config.request_timeout)?.clone();
        Ok(Self {
            client,
            stats_base: config.stats_api_base.clone(),
            content_base: config.content_api_base.clone(),
            retries: config.fetch_retries,
        })
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        subject: &Subject,
        url: &str,
        what: &'static str,
    ) -> Result<T, FetchError> {
        let body = self.with_retries(url, || {
            let resp = self.send(subject, url)?;
            resp.text().map_err(|err| transport_error(url, err))
        })?;
        decode_json(&body, what)
    }

    fn get_bytes(&self, subject: &Subject, url: &str) -> Result<Vec<u8>, FetchError> {
        self.with_retries(url, || {
            let resp = self.send(subject, url)?;
            resp.bytes()
                .map(|b| b.to_vec())
                .map_err(|err| transport_error(url, err))
        })
    }

    fn send(&self, subject: &Subject, url: &str) -> Result<Response, FetchError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&subject.credential)
            .send()
            .map_err(|err| transport_error(url, err))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    fn with_retries<T>(
        &self,
        url: &str,
        mut attempt: impl FnMut() -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let mut tries = 0;
        loop {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && tries < self.retries => {
                    tries += 1;
                    debug!("retrying {url} ({tries}/{}): {err}", self.retries);
                    thread::sleep(Duration::from_millis(RETRY_BACKOFF_MS));
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Image paths in item metadata are usually relative to the content host.
    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.content_base, url.trim_start_matches('/'))
        }
    }
}

impl StatsApi for HttpStatsApi {
    fn match_count(&self, subject: &Subject) -> Result<usize, FetchError> {
        let url = format!("{}/players/{}/matches/count", self.stats_base, subject.id);
        let parsed: MatchCountResponse = self.get_json(subject, &url, "match count")?;
        Ok(parsed.matches_played_count)
    }

    fn match_page(&self, request: &PageRequest<'_>) -> Result<MatchPage, FetchError> {
        let url = format!(
            "{}/players/{}/matches?start={}&count={}",
            self.stats_base, request.subject.id, request.start, request.count
        );
        let mut page: MatchPage = self.get_json(request.subject, &url, "match page")?;
        page.start = request.start;
        Ok(page)
    }

    fn match_stats(&self, subject: &Subject, match_id: &str) -> Result<MatchDetail, FetchError> {
        let url = format!("{}/matches/{match_id}/stats", self.stats_base);
        self.get_json(subject, &url, "match stats")
    }

    fn map(
        &self,
        subject: &Subject,
        asset_id: &str,
        version_id: &str,
    ) -> Result<MapInfo, FetchError> {
        let url = format!(
            "{}/maps/{asset_id}/versions/{version_id}",
            self.content_base
        );
        self.get_json(subject, &url, "map")
    }

    fn playlist(
        &self,
        subject: &Subject,
        asset_id: &str,
        version_id: &str,
    ) -> Result<PlaylistInfo, FetchError> {
        let url = format!(
            "{}/playlists/{asset_id}/versions/{version_id}",
            self.content_base
        );
        self.get_json(subject, &url, "playlist")
    }

    fn profile(&self, subject: &Subject) -> Result<Profile, FetchError> {
        let url = format!("{}/profiles/{}", self.content_base, subject.id);
        self.get_json(subject, &url, "profile")
    }

    fn season_calendar(&self, subject: &Subject) -> Result<SeasonCalendar, FetchError> {
        let url = format!("{}/calendar/seasons", self.content_base);
        self.get_json(subject, &url, "season calendar")
    }

    fn reward_track(&self, subject: &Subject, track_id: &str) -> Result<RewardTrack, FetchError> {
        let url = format!(
            "{}/players/{}/reward-tracks/{track_id}",
            self.stats_base, subject.id
        );
        self.get_json(subject, &url, "reward track")
    }

    fn item(&self, subject: &Subject, item_path: &str) -> Result<ItemMetadata, FetchError> {
        let url = format!(
            "{}/items/{}",
            self.content_base,
            item_path.trim_start_matches('/')
        );
        self.get_json(subject, &url, "item")
    }

    fn image(&self, subject: &Subject, url: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.resolve_url(url);
        let bytes = self.get_bytes(subject, &url)?;
        if bytes.is_empty() {
            warn!("image at {url} came back empty");
            return Err(FetchError::Empty("image"));
        }
        Ok(bytes)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MatchCountResponse {
    #[serde(default)]
    matches_played_count: usize,
}

pub fn decode_json<T: DeserializeOwned>(raw: &str, what: &'static str) -> Result<T, FetchError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Err(FetchError::Empty(what));
    }
    serde_json::from_str(trimmed).map_err(|source| FetchError::Decode { what, source })
}

fn transport_error(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            source: err,
        }
    }
}
