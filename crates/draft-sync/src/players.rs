// Player identity cache: player_key -> display name and positions, filled
// lazily from the API and kept for the life of the monitor.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::api::extract::{extract_opt, lookup, player_full_name, text_list};
use crate::api::{ApiError, DraftApi};

/// Display name used when the service returns a player without a name.
pub const UNKNOWN_PLAYER: &str = "(unknown)";

/// Default number of concurrent fetches while warming the cache.
pub const WARM_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerRecord {
    pub player_key: String,
    pub display_name: String,
    /// Eligible positions, in service order.
    pub positions: Vec<String>,
    pub team_abbr: String,
    /// "P" (skater/batter), "G" (goalie), "B"; absent when not reported.
    pub position_type: Option<String>,
}

impl PlayerRecord {
    pub fn unknown(player_key: &str) -> Self {
        Self {
            player_key: player_key.to_string(),
            display_name: UNKNOWN_PLAYER.to_string(),
            positions: Vec::new(),
            team_abbr: String::new(),
            position_type: None,
        }
    }

    /// Read a raw player node. Never fails: missing fields fall back to
    /// `(unknown)` / empty.
    pub fn from_payload(player_key: &str, raw: &Value) -> Self {
        let mut positions = lookup(raw, "eligible_positions")
            .map(|eligible| text_list(eligible, "position"))
            .unwrap_or_default();
        if positions.is_empty() {
            positions = extract_opt::<String>(raw, "display_position")
                .map(|display| {
                    display
                        .split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or_default();
        }

        Self {
            player_key: player_key.to_string(),
            display_name: player_full_name(raw).unwrap_or_else(|| UNKNOWN_PLAYER.to_string()),
            positions,
            team_abbr: extract_opt(raw, "editorial_team_abbr").unwrap_or_default(),
            position_type: extract_opt(raw, "position_type"),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.display_name == UNKNOWN_PLAYER
    }

    /// Positions as a single cell value: `"C,LW"`.
    pub fn position_label(&self) -> String {
        self.positions.join(",")
    }
}

// ---------------------------------------------------------------------------
// PlayerCache
// ---------------------------------------------------------------------------

/// Never-evicting cache over [`DraftApi::fetch_player`].
///
/// Each key owns a `OnceCell`, so concurrent lookups of the same uncached key
/// share one in-flight fetch. A failed fetch leaves the cell empty and the
/// next lookup tries again.
pub struct PlayerCache<A: ?Sized> {
    api: Arc<A>,
    entries: Mutex<HashMap<String, Arc<OnceCell<PlayerRecord>>>>,
    fetches: AtomicUsize,
}

impl<A: DraftApi + ?Sized> PlayerCache<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            entries: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<OnceCell<PlayerRecord>>>> {
        self.entries.lock().expect("player cache lock poisoned")
    }

    fn slot(&self, player_key: &str) -> Arc<OnceCell<PlayerRecord>> {
        Arc::clone(self.entries().entry(player_key.to_string()).or_default())
    }

    /// The record for `player_key`, fetching it on first use.
    pub async fn get_player(&self, player_key: &str) -> Result<PlayerRecord, ApiError> {
        if player_key.trim().is_empty() {
            return Ok(PlayerRecord::unknown(player_key));
        }

        let slot = self.slot(player_key);
        slot.get_or_try_init(|| async {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            let raw = self.api.fetch_player(player_key).await?;
            let record = PlayerRecord::from_payload(player_key, &raw);
            if record.is_unknown() {
                warn!(player_key, "player payload carries no name");
            } else {
                debug!(player_key, name = %record.display_name, "cached player");
            }
            Ok::<_, ApiError>(record)
        })
        .await
        .cloned()
    }

    pub async fn get_player_name(&self, player_key: &str) -> Result<String, ApiError> {
        Ok(self.get_player(player_key).await?.display_name)
    }

    /// The cached record, without fetching.
    pub fn cached(&self, player_key: &str) -> Option<PlayerRecord> {
        self.entries()
            .get(player_key)
            .and_then(|cell| cell.get().cloned())
    }

    /// Number of players resolved so far.
    pub fn len(&self) -> usize {
        self.entries()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `fetch_player` calls issued.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Resolve `keys` with up to `concurrency` fetches in flight. Returns the
    /// number of players newly resolved.
    ///
    /// Individual failures are logged and skipped (the key will be fetched
    /// again on demand), except authentication failures, which are returned.
    pub async fn warm<'k, I>(&self, keys: I, concurrency: usize) -> Result<usize, ApiError>
    where
        I: IntoIterator<Item = &'k str>,
    {
        let mut seen = HashSet::new();
        let pending: Vec<&str> = keys
            .into_iter()
            .filter(|key| !key.trim().is_empty())
            .filter(|key| seen.insert(*key))
            .filter(|key| self.cached(key).is_none())
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let results: Vec<(&str, Result<PlayerRecord, ApiError>)> = stream::iter(pending)
            .map(|key| async move { (key, self.get_player(key).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut warmed = 0;
        let mut auth_error = None;
        for (key, result) in results {
            match result {
                Ok(_) => warmed += 1,
                Err(e) if e.is_auth() => auth_error = Some(e),
                Err(e) => warn!(player_key = key, "failed to warm player: {e}"),
            }
        }
        if let Some(e) = auth_error {
            return Err(e);
        }

        debug!(warmed, total = self.len(), "warmed player cache");
        Ok(warmed)
    }
}
