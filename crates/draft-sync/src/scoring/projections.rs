// Projections CSV loading and projected point totals.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use tracing::{debug, info, warn};

use super::modifiers::{get_stat_modifier_value, projected_score, LeagueSettings, ModifierContext, StatModifierTable};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("validation error: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// ProjectionSet
// ---------------------------------------------------------------------------

/// A stat column of the projections file and the league stats it maps to.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionColumn {
    pub header: String,
    pub stat_ids: Vec<u32>,
}

/// Projected stat lines keyed by normalised player name.
#[derive(Debug, Clone, Default)]
pub struct ProjectionSet {
    columns: Vec<ProjectionColumn>,
    players: HashMap<String, Vec<Option<f64>>>,
}

impl ProjectionSet {
    pub fn columns(&self) -> &[ProjectionColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn contains(&self, player_name: &str) -> bool {
        self.players.contains_key(&normalize_name(player_name))
    }

    /// The player's projected `(stat_id, value)` pairs. A column shared by
    /// several stats (same display name) counts once, for the first stat that
    /// carries weight in `context`.
    pub fn stats_for(
        &self,
        player_name: &str,
        table: &StatModifierTable,
        context: &ModifierContext,
    ) -> Option<Vec<(u32, f64)>> {
        let values = self.players.get(&normalize_name(player_name))?;
        Some(
            self.columns
                .iter()
                .zip(values)
                .filter_map(|(column, value)| {
                    let value = (*value)?;
                    let stat_id = column
                        .stat_ids
                        .iter()
                        .copied()
                        .find(|&id| get_stat_modifier_value(table, id, context) != 0.0)
                        .or_else(|| column.stat_ids.first().copied())?;
                    Some((stat_id, value))
                })
                .collect(),
        )
    }

    /// Projected points for `player_name`, or `None` when the player has no
    /// projection line.
    pub fn projected_points(
        &self,
        player_name: &str,
        table: &StatModifierTable,
        context: &ModifierContext,
    ) -> Option<f64> {
        let stats = self.stats_for(player_name, table, context)?;
        Some(projected_score(&stats, table, context))
    }
}

/// Lowercase, trimmed, single-spaced.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

fn is_name_header(header: &str) -> bool {
    let h = header.trim();
    h.eq_ignore_ascii_case("playerName") || h.eq_ignore_ascii_case("name")
}

/// Parse projections from CSV. Headers are matched against the league's stat
/// categories; unmatched columns are ignored. Unparseable values count as
/// absent (one warning per column).
pub fn parse_projections<R: Read>(rdr: R, settings: &LeagueSettings) -> Result<ProjectionSet, ProjectionError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(rdr);
    let csv_err = |source| ProjectionError::Csv {
        path: "<reader>".into(),
        source,
    };
    let headers = reader.headers().map_err(csv_err)?.clone();

    let name_idx = headers.iter().position(is_name_header).ok_or_else(|| {
        ProjectionError::Validation("projections file has no playerName or name column".into())
    })?;

    // (csv column index, column)
    let mut stat_columns: Vec<(usize, ProjectionColumn)> = Vec::new();
    for (idx, header) in headers.iter().enumerate() {
        if idx == name_idx {
            continue;
        }
        let stat_ids: Vec<u32> = settings
            .categories_matching(header)
            .into_iter()
            .map(|cat| cat.stat_id)
            .collect();
        if stat_ids.is_empty() {
            debug!(header, "projections column matches no league stat; ignored");
            continue;
        }
        stat_columns.push((
            idx,
            ProjectionColumn {
                header: header.trim().to_string(),
                stat_ids,
            },
        ));
    }

    let mut players = HashMap::new();
    let mut warned: HashSet<usize> = HashSet::new();
    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!("skipping malformed projections row: {}", e);
                continue;
            }
        };
        let name = normalize_name(record.get(name_idx).unwrap_or_default());
        if name.is_empty() {
            continue;
        }

        let values: Vec<Option<f64>> = stat_columns
            .iter()
            .map(|(idx, column)| {
                let raw = record.get(*idx).unwrap_or_default().trim();
                if raw.is_empty() {
                    return None;
                }
                match raw.parse::<f64>() {
                    Ok(v) if v.is_finite() => Some(v),
                    _ => {
                        if warned.insert(*idx) {
                            warn!(column = %column.header, value = raw, "unparseable projection value treated as absent");
                        }
                        None
                    }
                }
            })
            .collect();

        if players.insert(name.clone(), values).is_some() {
            warn!("duplicate projection for '{}', using latest", name);
        }
    }

    Ok(ProjectionSet {
        columns: stat_columns.into_iter().map(|(_, column)| column).collect(),
        players,
    })
}

/// Load a projections CSV from disk.
pub fn load_projections(path: &Path, settings: &LeagueSettings) -> Result<ProjectionSet, ProjectionError> {
    let path_str = path.display().to_string();
    let file = std::fs::File::open(path).map_err(|e| ProjectionError::Io {
        path: path_str.clone(),
        source: e,
    })?;
    let set = parse_projections(file, settings).map_err(|e| match e {
        ProjectionError::Csv { source, .. } => ProjectionError::Csv {
            path: path_str.clone(),
            source,
        },
        other => other,
    })?;
    info!(
        "Loaded {} projections ({} stat columns) from {}",
        set.len(),
        set.columns().len(),
        path_str
    );
    Ok(set)
}
