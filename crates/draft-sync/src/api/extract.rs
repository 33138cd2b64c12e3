// Field extraction from Yahoo Fantasy payloads.
//
// Yahoo's `format=json` responses wrap a single record in a list of one-key
// fragments (`[{"player_key": ..}, {"name": {..}}, ..]`), index collections by
// numeric-string keys (`{"0": {..}, "1": {..}, "count": 2}`) and simply omit
// keys that have no value. The older XML-derived shape wraps scalars as
// `{"#text": ..}`. Every function in here is total: missing or oddly shaped
// data degrades to a default, it never produces an error.

use serde::Serialize;
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Lookup primitives
// ---------------------------------------------------------------------------

/// Find `key` in `container`.
///
/// Objects are searched directly. Arrays are treated as fragment lists and
/// searched element by element (recursively, since Yahoo nests fragment lists
/// inside lists). Explicit `null` values count as absent.
pub fn lookup<'a>(container: &'a Value, key: &str) -> Option<&'a Value> {
    match container {
        Value::Object(map) => map.get(key).filter(|v| !v.is_null()),
        Value::Array(items) => items.iter().find_map(|item| lookup(item, key)),
        _ => None,
    }
}

/// Follow a sequence of keys with [`lookup`] at each step.
pub fn lookup_path<'a>(container: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(container, |current, key| lookup(current, key))
}

/// Render a scalar as text. Unwraps `{"#text": ..}` wrappers; returns `None`
/// for objects, arrays, null and blank strings.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => map.get("#text").and_then(scalar_text),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Typed extraction
// ---------------------------------------------------------------------------

/// Conversion from a raw payload value to a typed scalar.
///
/// Implementations accept both native JSON scalars and their string forms,
/// since Yahoo sends most numbers as strings (and `"-"` when unknown).
pub trait FromField: Sized {
    fn from_field(value: &Value) -> Option<Self>;
}

impl FromField for String {
    fn from_field(value: &Value) -> Option<Self> {
        scalar_text(value)
    }
}

impl FromField for u32 {
    fn from_field(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            _ => scalar_text(value)?.parse().ok(),
        }
    }
}

impl FromField for i64 {
    fn from_field(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64(),
            _ => scalar_text(value)?.parse().ok(),
        }
    }
}

impl FromField for f64 {
    fn from_field(value: &Value) -> Option<Self> {
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            _ => scalar_text(value)?.parse::<f64>().ok(),
        };
        parsed.filter(|v| v.is_finite())
    }
}

impl FromField for bool {
    fn from_field(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|v| v != 0),
            _ => match scalar_text(value)?.as_str() {
                "1" | "true" => Some(true),
                "0" | "false" => Some(false),
                _ => None,
            },
        }
    }
}

/// Extract `key` from `container` as `T`, or `default` when the key is
/// absent, the container is not indexable, or the value does not convert.
pub fn extract_value<T: FromField>(container: &Value, key: &str, default: T) -> T {
    extract_opt(container, key).unwrap_or(default)
}

/// Like [`extract_value`] but reports absence as `None`.
pub fn extract_opt<T: FromField>(container: &Value, key: &str) -> Option<T> {
    lookup(container, key).and_then(T::from_field)
}

// ---------------------------------------------------------------------------
// Shape normalisation
// ---------------------------------------------------------------------------

/// Normalise any shape into a sequence.
///
/// - `null` becomes an empty list
/// - an array yields its elements
/// - an object keyed by numeric strings (`{"0": .., "1": .., "count": 2}`)
///   yields its indexed values in numeric order
/// - anything else (a single object or a bare scalar) becomes a one-element list
pub fn ensure_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) if is_indexed(map) => {
            let mut entries: Vec<(usize, &Value)> = map
                .iter()
                .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v)))
                .collect();
            entries.sort_by_key(|(i, _)| *i);
            entries.into_iter().map(|(_, v)| v).collect()
        }
        other => vec![other],
    }
}

fn is_indexed(map: &Map<String, Value>) -> bool {
    map.keys().any(|k| k.parse::<usize>().is_ok())
        && map
            .keys()
            .all(|k| k == "count" || k.parse::<usize>().is_ok())
}

/// Collect the records of a collection node, whatever its shape.
///
/// `item_key` names the wrapper of each record (`"draft_result"` inside
/// `draft_results`, `"player"` inside `players`, ...). Handles the JSON shape
/// (`{"0": {"player": ..}, "count": 1}`), lists of wrappers
/// (`[{"stat": ..}, {"stat": ..}]`), and the XML shape where the wrapper key
/// holds either one record or a list (`{"stat": [..]}`).
pub fn records<'a>(collection: &'a Value, item_key: &str) -> Vec<&'a Value> {
    match collection {
        Value::Object(map) if is_indexed(map) => ensure_list(collection)
            .into_iter()
            .filter_map(|entry| lookup(entry, item_key))
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| match item {
                Value::Object(map) => map.get(item_key).unwrap_or(item),
                _ => item,
            })
            .collect(),
        Value::Object(_) => lookup(collection, item_key)
            .map(ensure_list)
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Collect every text value found under `key` across the records of a
/// collection (e.g. the `position` entries of `eligible_positions`).
pub fn text_list(collection: &Value, item_key: &str) -> Vec<String> {
    records(collection, item_key)
        .into_iter()
        .flat_map(ensure_list)
        .filter_map(scalar_text)
        .collect()
}

// ---------------------------------------------------------------------------
// Player payload helpers
// ---------------------------------------------------------------------------

/// A player's full display name: `name.full`, falling back to
/// `"first last"`, then to a bare `name` scalar.
pub fn player_full_name(raw_player: &Value) -> Option<String> {
    let name = lookup(raw_player, "name")?;
    if let Some(full) = extract_opt::<String>(name, "full") {
        return Some(full);
    }
    let first = extract_opt::<String>(name, "first");
    let last = extract_opt::<String>(name, "last");
    match (first, last) {
        (Some(f), Some(l)) => Some(format!("{f} {l}")),
        (Some(one), None) | (None, Some(one)) => Some(one),
        (None, None) => scalar_text(name),
    }
}

/// Draft-analysis fields for one player. Every field is optional because the
/// service omits them inconsistently.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerDraftInfo {
    pub player_key: Option<String>,
    pub name: Option<String>,
    pub team_abbr: Option<String>,
    pub display_position: Option<String>,
    pub average_pick: Option<f64>,
    pub average_round: Option<f64>,
    pub percent_drafted: Option<f64>,
    pub preseason_average_pick: Option<f64>,
    pub preseason_percent_drafted: Option<f64>,
    pub projected_auction_value: Option<f64>,
    pub average_auction_cost: Option<f64>,
    /// Overall rank for the latest season the service reports.
    pub season_rank: Option<u32>,
    /// Rank within the player's position for that season.
    pub position_rank: Option<u32>,
}

/// Pull the draft-analysis record out of a raw player payload.
pub fn extract_player_draft_info(raw_player: &Value) -> PlayerDraftInfo {
    let analysis = lookup(raw_player, "draft_analysis").unwrap_or(&Value::Null);
    let (season_rank, position_rank) = season_ranks(raw_player);

    PlayerDraftInfo {
        player_key: extract_opt(raw_player, "player_key"),
        name: player_full_name(raw_player),
        team_abbr: extract_opt(raw_player, "editorial_team_abbr"),
        display_position: extract_opt(raw_player, "display_position"),
        average_pick: extract_opt(analysis, "average_pick"),
        average_round: extract_opt(analysis, "average_round"),
        percent_drafted: extract_opt(analysis, "percent_drafted"),
        preseason_average_pick: extract_opt(analysis, "preseason_average_pick"),
        preseason_percent_drafted: extract_opt(analysis, "preseason_percent_drafted"),
        projected_auction_value: extract_opt(raw_player, "projected_auction_value"),
        average_auction_cost: extract_opt(raw_player, "average_auction_cost"),
        season_rank,
        position_rank,
    }
}

/// Season ranks (`rank_type` "S") of the most recent season present, as
/// `(overall, by position)`. A rank carrying a `rank_position` is the
/// position rank.
fn season_ranks(raw_player: &Value) -> (Option<u32>, Option<u32>) {
    let ranks: Vec<&Value> = lookup(raw_player, "player_ranks")
        .map(|ranks| records(ranks, "player_rank"))
        .unwrap_or_default()
        .into_iter()
        .filter(|rank| extract_opt::<String>(rank, "rank_type").as_deref() == Some("S"))
        .collect();
    let latest = ranks
        .iter()
        .filter_map(|rank| extract_opt::<u32>(rank, "rank_season"))
        .max();

    let mut overall = None;
    let mut by_position = None;
    for rank in ranks {
        if extract_opt::<u32>(rank, "rank_season") != latest {
            continue;
        }
        let value = extract_opt::<u32>(rank, "rank_value");
        if extract_opt::<String>(rank, "rank_position").is_some() {
            by_position = by_position.or(value);
        } else {
            overall = overall.or(value);
        }
    }
    (overall, by_position)
}
