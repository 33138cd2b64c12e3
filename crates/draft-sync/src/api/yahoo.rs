// Yahoo Fantasy Sports v2 client over reqwest.

use std::future::Future;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::extract::{extract_opt, lookup, lookup_path, records};
use super::{with_retry, ApiError, DraftApi, RetryPolicy};
use crate::config::Config;

pub const YAHOO_API_BASE: &str = "https://fantasysports.yahooapis.com/fantasy/v2";

/// Players per draft-analysis page (the service maximum).
pub const PAGE_SIZE: u32 = 25;
/// Upper bound on draft-analysis pages (1000 players).
pub const MAX_PAGES: u32 = 40;

// ---------------------------------------------------------------------------
// YahooClient
// ---------------------------------------------------------------------------

/// Authenticated client for one league.
///
/// Every request goes through [`with_retry`]. The game key is resolved on
/// first use and reused for the life of the client.
pub struct YahooClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    game_code: String,
    league_id: String,
    retry: RetryPolicy,
    game_key: OnceCell<String>,
}

impl YahooClient {
    pub fn new(
        access_token: impl Into<String>,
        game_code: impl Into<String>,
        league_id: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: YAHOO_API_BASE.to_string(),
            access_token: access_token.into(),
            game_code: game_code.into(),
            league_id: league_id.into(),
            retry: RetryPolicy::default(),
            game_key: OnceCell::new(),
        }
    }

    /// Build a client from loaded configuration. A missing access token is an
    /// authentication error: nothing can be fetched without one.
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let token = config
            .credentials
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ApiError::auth(
                    "no access token; set access_token in config/credentials.toml \
                     or YAHOO_ACCESS_TOKEN",
                )
            })?;

        Ok(
            Self::new(token, &config.league.game_code, &config.league.league_id)
                .with_base_url(&config.api.base_url)
                .with_retry_policy(config.retry_policy()),
        )
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The season's game key (e.g. `"453"`), fetched once.
    pub async fn game_key(&self) -> Result<&str, ApiError> {
        self.game_key
            .get_or_try_init(|| async {
                let path = format!("game/{}", self.game_code);
                let data = self.get_json(&path).await?;
                let key = lookup_path(&data, &["fantasy_content", "game"])
                    .and_then(|game| extract_opt::<String>(game, "game_key"))
                    .ok_or_else(|| ApiError::Decode {
                        url: path.clone(),
                        message: "response carries no game_key".into(),
                    })?;
                debug!(game_key = %key, "resolved game key");
                Ok::<_, ApiError>(key)
            })
            .await
            .map(String::as_str)
    }

    /// `{game_key}.l.{league_id}`
    pub async fn league_key(&self) -> Result<String, ApiError> {
        let game_key = self.game_key().await?;
        Ok(format!("{game_key}.l.{}", self.league_id))
    }

    /// GET `{base_url}/{path}?format=json` with retry.
    async fn get_json(&self, path: &str) -> Result<Value, ApiError> {
        let url = format!("{}/{}", self.base_url, path);
        with_retry(&self.retry, path, || self.get_once(&url)).await
    }

    async fn get_once(&self, url: &str) -> Result<Value, ApiError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[("format", "json")])
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| transport_error(url, e))?;
        if !status.is_success() {
            return Err(classify_status(url, status, &body));
        }

        serde_json::from_str(&body).map_err(|e| ApiError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// The `league` node of a league sub-resource response.
    async fn league_resource(&self, resource: &str) -> Result<Value, ApiError> {
        let path = format!("league/{}/{resource}", self.league_key().await?);
        let data = self.get_json(&path).await?;
        lookup_path(&data, &["fantasy_content", "league"])
            .cloned()
            .ok_or_else(|| ApiError::Decode {
                url: path,
                message: "response carries no league node".into(),
            })
    }
}

#[async_trait]
impl DraftApi for YahooClient {
    async fn fetch_draft_results(&self) -> Result<Vec<Value>, ApiError> {
        let league = self.league_resource("draftresults").await?;
        let Some(results) = lookup(&league, "draft_results") else {
            debug!("league has no draft_results yet");
            return Ok(Vec::new());
        };
        Ok(records(results, "draft_result").into_iter().cloned().collect())
    }

    async fn fetch_player(&self, player_key: &str) -> Result<Value, ApiError> {
        let path = format!("player/{player_key}");
        let data = self.get_json(&path).await?;
        let content = lookup(&data, "fantasy_content").unwrap_or(&Value::Null);
        lookup(content, "player")
            .or_else(|| {
                lookup(content, "players")
                    .and_then(|players| records(players, "player").into_iter().next())
            })
            .cloned()
            .ok_or_else(|| ApiError::Decode {
                url: path,
                message: "response carries no player node".into(),
            })
    }

    async fn fetch_league_settings(&self) -> Result<Value, ApiError> {
        self.league_resource("settings").await
    }

    async fn fetch_teams(&self) -> Result<Vec<Value>, ApiError> {
        let league = self.league_resource("teams").await?;
        Ok(lookup(&league, "teams")
            .map(|teams| records(teams, "team").into_iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_draft_analysis(&self) -> Result<Vec<Value>, ApiError> {
        let league_key = self.league_key().await?;
        collect_pages(PAGE_SIZE, MAX_PAGES, |start| {
            let path = format!(
                "league/{league_key}/players;position=ALL;sort=average_pick;\
                 start={start};count={PAGE_SIZE};\
                 out=auction_values,ranks;ranks=season;ranks_by_position=season/draft_analysis"
            );
            async move {
                let data = self.get_json(&path).await?;
                Ok(lookup_path(&data, &["fantasy_content", "league"])
                    .and_then(|league| lookup(league, "players"))
                    .map(|players| records(players, "player").into_iter().cloned().collect())
                    .unwrap_or_default())
            }
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a non-success response to the error taxonomy.
pub fn classify_status(url: &str, status: StatusCode, body: &str) -> ApiError {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        || body.contains("token_expired")
    {
        return ApiError::auth(format!("{url} returned {status}"));
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return ApiError::transient(format!("{url} returned {status}"));
    }
    ApiError::Status {
        url: url.to_string(),
        status: status.as_u16(),
    }
}

fn transport_error(url: &str, err: reqwest::Error) -> ApiError {
    if err.is_builder() {
        ApiError::Request {
            url: url.to_string(),
            message: err.to_string(),
        }
    } else if err.is_decode() {
        ApiError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        }
    } else {
        ApiError::transient(format!("{url}: {err}"))
    }
}

/// Fetch pages of `page_size` records starting at offset 0 until a short or
/// empty page, or `max_pages` pages.
///
/// An auth failure on any page, or any failure on the first page, is
/// returned. Later non-auth failures end pagination early with the records
/// collected so far.
pub(crate) async fn collect_pages<F, Fut>(
    page_size: u32,
    max_pages: u32,
    mut fetch_page: F,
) -> Result<Vec<Value>, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<Value>, ApiError>>,
{
    let mut all = Vec::new();
    for page in 0..max_pages {
        let start = page * page_size;
        let batch = match fetch_page(start).await {
            Ok(batch) => batch,
            Err(e) if page > 0 && !e.is_auth() => {
                warn!(start, "stopping pagination early: {e}");
                break;
            }
            Err(e) => return Err(e),
        };
        let len = batch.len();
        all.extend(batch);
        debug!(start, got = len, total = all.len(), "fetched page");
        if len < page_size as usize {
            break;
        }
    }
    Ok(all)
}
