// League settings and stat modifiers (points per stat).

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::api::extract::{extract_opt, extract_value, lookup, records};

// ---------------------------------------------------------------------------
// League settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatCategory {
    pub stat_id: u32,
    pub name: String,
    pub display_name: String,
    pub position_type: Option<String>,
    /// Points per unit; 0.0 when the league declares no modifier.
    pub weight: f64,
}

impl StatCategory {
    /// Preferred column label: display name, else name, else the id.
    pub fn label(&self) -> String {
        [&self.display_name, &self.name]
            .into_iter()
            .find(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| self.stat_id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterPosition {
    pub position: String,
    pub count: u32,
    pub position_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LeagueSettings {
    pub name: String,
    pub draft_type: String,
    pub scoring_type: String,
    pub max_teams: Option<u32>,
    pub num_playoff_teams: Option<u32>,
    pub playoff_start_week: Option<u32>,
    pub roster_positions: Vec<RosterPosition>,
    pub stat_categories: Vec<StatCategory>,
}

impl LeagueSettings {
    /// Categories whose label, name or id matches `header` (case-insensitive).
    pub fn categories_matching(&self, header: &str) -> Vec<&StatCategory> {
        let header = header.trim();
        if header.is_empty() {
            return Vec::new();
        }
        let by_id = header.parse::<u32>().ok();
        self.stat_categories
            .iter()
            .filter(|cat| {
                Some(cat.stat_id) == by_id
                    || cat.display_name.eq_ignore_ascii_case(header)
                    || cat.name.eq_ignore_ascii_case(header)
            })
            .collect()
    }
}

/// The `settings` node of a league (or the node itself if it already is one).
fn settings_node(raw: &Value) -> &Value {
    lookup(raw, "settings").unwrap_or(raw)
}

/// Read league settings from a raw league node. Missing pieces degrade to
/// empty values.
pub fn parse_league_settings(raw_league: &Value) -> LeagueSettings {
    let settings = settings_node(raw_league);
    let table = build_modifier_table(raw_league);

    let roster_positions = lookup(settings, "roster_positions")
        .map(|positions| records(positions, "roster_position"))
        .unwrap_or_default()
        .into_iter()
        .filter_map(|pos| {
            Some(RosterPosition {
                position: extract_opt(pos, "position")?,
                count: extract_value(pos, "count", 0),
                position_type: extract_opt(pos, "position_type"),
            })
        })
        .collect();

    let stat_categories = lookup(settings, "stat_categories")
        .and_then(|cats| lookup(cats, "stats"))
        .map(|stats| records(stats, "stat"))
        .unwrap_or_default()
        .into_iter()
        .filter_map(|stat| {
            let stat_id = extract_opt::<u32>(stat, "stat_id")?;
            Some(StatCategory {
                stat_id,
                name: extract_value(stat, "name", String::new()),
                display_name: extract_value(stat, "display_name", String::new()),
                position_type: extract_opt(stat, "position_type"),
                weight: table.weights.get(&stat_id).copied().unwrap_or(0.0),
            })
        })
        .collect();

    LeagueSettings {
        name: extract_value(raw_league, "name", String::new()),
        draft_type: extract_value(settings, "draft_type", String::new()),
        scoring_type: extract_value(settings, "scoring_type", String::new()),
        max_teams: extract_opt(settings, "max_teams"),
        num_playoff_teams: extract_opt(settings, "num_playoff_teams"),
        playoff_start_week: extract_opt(settings, "playoff_start_week"),
        roster_positions,
        stat_categories,
    }
}

// ---------------------------------------------------------------------------
// Stat modifier table
// ---------------------------------------------------------------------------

/// stat_id -> points per unit. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatModifierTable {
    weights: HashMap<u32, f64>,
    position_types: HashMap<u32, String>,
}

impl StatModifierTable {
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn contains(&self, stat_id: u32) -> bool {
        self.weights.contains_key(&stat_id)
    }
}

/// Whose stats are being weighed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifierContext {
    /// "P", "G" or "B"; `None` accepts every stat.
    pub position_type: Option<String>,
}

impl ModifierContext {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn for_position_type(position_type: Option<&str>) -> Self {
        Self {
            position_type: position_type
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        }
    }
}

/// Build the modifier table from a raw league (or settings) node, reading
/// `stat_modifiers.stats[].stat{stat_id, value}` and each stat's position
/// type from `stat_categories`.
pub fn build_modifier_table(raw_league_settings: &Value) -> StatModifierTable {
    let settings = settings_node(raw_league_settings);

    let weights: HashMap<u32, f64> = lookup(settings, "stat_modifiers")
        .and_then(|mods| lookup(mods, "stats"))
        .map(|stats| records(stats, "stat"))
        .unwrap_or_default()
        .into_iter()
        .filter_map(|stat| {
            Some((
                extract_opt::<u32>(stat, "stat_id")?,
                extract_opt::<f64>(stat, "value")?,
            ))
        })
        .collect();

    let position_types: HashMap<u32, String> = lookup(settings, "stat_categories")
        .and_then(|cats| lookup(cats, "stats"))
        .map(|stats| records(stats, "stat"))
        .unwrap_or_default()
        .into_iter()
        .filter_map(|stat| {
            Some((
                extract_opt::<u32>(stat, "stat_id")?,
                extract_opt::<String>(stat, "position_type")?,
            ))
        })
        .collect();

    debug!(
        modifiers = weights.len(),
        categories = position_types.len(),
        "built stat modifier table"
    );
    StatModifierTable {
        weights,
        position_types,
    }
}

/// Weight of `stat_id` in `context`: 0.0 for stats the table does not know,
/// and for stats declared for a different position type than the context's.
pub fn get_stat_modifier_value(
    table: &StatModifierTable,
    stat_id: u32,
    context: &ModifierContext,
) -> f64 {
    let Some(&weight) = table.weights.get(&stat_id) else {
        return 0.0;
    };
    match (&context.position_type, table.position_types.get(&stat_id)) {
        (Some(wanted), Some(declared)) if !wanted.eq_ignore_ascii_case(declared) => 0.0,
        _ => weight,
    }
}

/// Σ value × weight over `stats`.
pub fn projected_score<'a, I>(stats: I, table: &StatModifierTable, context: &ModifierContext) -> f64
where
    I: IntoIterator<Item = &'a (u32, f64)>,
{
    stats
        .into_iter()
        .map(|&(stat_id, value)| value * get_stat_modifier_value(table, stat_id, context))
        .sum()
}
