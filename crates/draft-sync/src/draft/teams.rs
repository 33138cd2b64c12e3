// Team and manager lookup for resolving a pick's team_key.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::api::extract::{extract_opt, extract_value, lookup, records};
use crate::sheet::{CellValue, Row};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamInfo {
    pub team_key: String,
    pub team_id: String,
    pub name: String,
    /// Nickname of the first manager listed.
    pub manager: String,
}

impl TeamInfo {
    /// Placeholder for a team the lookup does not know.
    pub fn unknown(team_key: &str) -> Self {
        Self {
            team_key: team_key.to_string(),
            team_id: String::new(),
            name: team_key.to_string(),
            manager: String::new(),
        }
    }

    pub fn to_row(&self) -> Row {
        vec![
            CellValue::from(self.team_key.as_str()),
            CellValue::from(self.team_id.as_str()),
            CellValue::from(self.name.as_str()),
            CellValue::from(self.manager.as_str()),
        ]
    }
}

/// Read one raw team record. Records without a team key are dropped.
pub fn parse_team(raw: &Value) -> Option<TeamInfo> {
    let team_key = extract_opt::<String>(raw, "team_key")?;
    let manager = lookup(raw, "managers")
        .and_then(|managers| records(managers, "manager").into_iter().next())
        .and_then(|manager| extract_opt::<String>(manager, "nickname"))
        .unwrap_or_default();

    Some(TeamInfo {
        team_id: extract_value(raw, "team_id", String::new()),
        name: extract_opt(raw, "name").unwrap_or_else(|| team_key.clone()),
        manager,
        team_key,
    })
}

/// Teams of one league, keyed by team key, in service order.
#[derive(Debug, Clone, Default)]
pub struct TeamLookup {
    teams: Vec<TeamInfo>,
    by_key: HashMap<String, usize>,
}

impl TeamLookup {
    pub fn new(teams: Vec<TeamInfo>) -> Self {
        let by_key = teams
            .iter()
            .enumerate()
            .map(|(i, team)| (team.team_key.clone(), i))
            .collect();
        Self { teams, by_key }
    }

    pub fn from_payloads(raw: &[Value]) -> Self {
        Self::new(raw.iter().filter_map(parse_team).collect())
    }

    pub fn get(&self, team_key: &str) -> Option<&TeamInfo> {
        self.by_key.get(team_key).map(|&i| &self.teams[i])
    }

    /// The team for `team_key`, or a placeholder named after the key.
    pub fn resolve(&self, team_key: &str) -> TeamInfo {
        self.get(team_key)
            .cloned()
            .unwrap_or_else(|| TeamInfo::unknown(team_key))
    }

    pub fn teams(&self) -> &[TeamInfo] {
        &self.teams
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    /// Rows for the Teams sheet.
    pub fn to_rows(&self) -> Vec<Row> {
        self.teams.iter().map(TeamInfo::to_row).collect()
    }
}
