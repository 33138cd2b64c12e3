// Draft picks as observed from the service, and the Draft Results row they
// become.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::extract::{extract_opt, extract_value};
use crate::sheet::{CellValue, Row};

/// A single draft selection. Unique by `pick_number` within a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pick {
    /// Sequential pick number (1-indexed).
    pub pick_number: u32,
    pub round: u32,
    pub team_key: String,
    pub player_key: String,
}

/// Outcome of reading one raw draft-result record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPick {
    Ready(Pick),
    /// The slot exists but the service has not attached a player to it.
    MissingPlayer {
        pick_number: u32,
        round: u32,
        team_key: String,
    },
    /// No usable pick number; nothing can be done with the record.
    Invalid,
}

impl ParsedPick {
    pub fn pick_number(&self) -> Option<u32> {
        match self {
            ParsedPick::Ready(pick) => Some(pick.pick_number),
            ParsedPick::MissingPlayer { pick_number, .. } => Some(*pick_number),
            ParsedPick::Invalid => None,
        }
    }
}

/// Read a raw `draft_result` record.
pub fn parse_pick(raw: &Value) -> ParsedPick {
    let Some(pick_number) = extract_opt::<u32>(raw, "pick").filter(|&n| n > 0) else {
        return ParsedPick::Invalid;
    };
    let round = extract_value(raw, "round", 0u32);
    let team_key = extract_value(raw, "team_key", String::new());

    match extract_opt::<String>(raw, "player_key") {
        Some(player_key) => ParsedPick::Ready(Pick {
            pick_number,
            round,
            team_key,
            player_key,
        }),
        None => ParsedPick::MissingPlayer {
            pick_number,
            round,
            team_key,
        },
    }
}

// ---------------------------------------------------------------------------
// Draft Results row
// ---------------------------------------------------------------------------

/// A fully resolved pick, in Draft Results column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftRow {
    pub round: u32,
    pub pick_number: u32,
    pub player_key: String,
    pub player_name: String,
    pub position: String,
    pub team_key: String,
    pub team_name: String,
    pub manager: String,
    pub projected_points: Option<f64>,
}

impl DraftRow {
    pub fn to_row(&self) -> Row {
        vec![
            CellValue::from(self.round),
            CellValue::from(self.pick_number),
            CellValue::from(self.player_key.as_str()),
            CellValue::from(self.player_name.as_str()),
            CellValue::from(self.position.as_str()),
            CellValue::from(self.team_key.as_str()),
            CellValue::from(self.team_name.as_str()),
            CellValue::from(self.manager.as_str()),
            CellValue::from(self.projected_points.map(round_points)),
        ]
    }
}

/// Operator-facing one-liner: `Pick 12: Connor McDavid (Team Awesome)`.
impl fmt::Display for DraftRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pick {}: {} ({})",
            self.pick_number, self.player_name, self.team_name
        )
    }
}

fn round_points(points: f64) -> f64 {
    (points * 100.0).round() / 100.0
}
