// One-time document setup: fetch the league's static data and lay out every
// sheet the monitor and the user's formulas read from.

use thiserror::Error;
use tracing::{info, warn};

use crate::api::extract::{extract_player_draft_info, PlayerDraftInfo};
use crate::api::{ApiError, DraftApi};
use crate::draft::teams::TeamLookup;
use crate::row;
use crate::scoring::{parse_league_settings, LeagueSettings};
use crate::sheet::{
    CellValue, DocumentWriter, Row, WriteError, DRAFT_RESULTS, DRAFT_RESULTS_HEADERS,
    LEAGUE_SETTINGS, LEAGUE_SETTINGS_HEADERS, PRE_DRAFT_ANALYSIS, PRE_DRAFT_ANALYSIS_HEADERS,
    TEAMS, TEAMS_HEADERS,
};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl SetupError {
    pub fn is_auth(&self) -> bool {
        matches!(self, SetupError::Api(e) if e.is_auth())
    }
}

/// What setup wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    pub league_name: String,
    pub teams: usize,
    pub settings_rows: usize,
    pub analysis_players: usize,
    pub skipped_players: usize,
}

// ---------------------------------------------------------------------------
// Row builders
// ---------------------------------------------------------------------------

fn stats_heading(position_type: Option<&str>) -> String {
    match position_type {
        Some("P") => "SKATER STATS".to_string(),
        Some("G") => "GOALIE STATS".to_string(),
        Some("B") => "BATTER STATS".to_string(),
        Some(other) => format!("{} STATS", other.to_uppercase()),
        None => "STATS".to_string(),
    }
}

/// League Settings rows: general settings, roster positions, then one block
/// of stat weights per position type. Blocks are separated by a blank row.
pub fn league_settings_rows(settings: &LeagueSettings) -> Vec<Row> {
    let mut rows = vec![
        row!["League Name", settings.name.as_str()],
        row!["Draft Type", settings.draft_type.as_str()],
        row!["Scoring Type", settings.scoring_type.as_str()],
        row!["Max Teams", settings.max_teams],
        row!["Playoff Teams", settings.num_playoff_teams],
        row!["Playoff Start Week", settings.playoff_start_week],
        row!["", ""],
        row!["ROSTER POSITIONS", "COUNT"],
    ];
    for pos in &settings.roster_positions {
        rows.push(row![pos.position.as_str(), pos.count]);
    }

    let mut position_types: Vec<Option<&str>> = Vec::new();
    for cat in &settings.stat_categories {
        let pt = cat.position_type.as_deref();
        if !position_types.contains(&pt) {
            position_types.push(pt);
        }
    }

    for pt in position_types {
        rows.push(row!["", ""]);
        rows.push(row![stats_heading(pt), "VALUE"]);
        for cat in settings
            .stat_categories
            .iter()
            .filter(|cat| cat.position_type.as_deref() == pt)
        {
            let weight = (cat.weight != 0.0).then_some(cat.weight);
            rows.push(row![cat.label(), weight]);
        }
    }
    rows
}

/// A Pre-Draft Analysis row, or `None` when the player has no key.
pub fn draft_analysis_row(info: &PlayerDraftInfo) -> Option<Row> {
    let player_key = info.player_key.as_deref()?;
    Some(vec![
        CellValue::from(player_key),
        CellValue::from(info.name.clone()),
        CellValue::from(info.team_abbr.clone()),
        CellValue::from(info.display_position.clone()),
        CellValue::from(info.average_pick),
        CellValue::from(info.average_round),
        CellValue::from(info.percent_drafted),
        CellValue::from(info.projected_auction_value),
        CellValue::from(info.average_auction_cost),
        CellValue::from(info.season_rank),
        CellValue::from(info.position_rank),
        CellValue::from(info.preseason_average_pick),
        CellValue::from(info.preseason_percent_drafted),
    ])
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Fetch league settings, teams and draft analysis, then write every sheet.
///
/// Everything is fetched before the first write, so a failed fetch leaves
/// the document untouched. The settings request goes first and doubles as
/// the credential check.
pub async fn run_setup<A, W>(api: &A, writer: &mut W) -> Result<SetupReport, SetupError>
where
    A: DraftApi + ?Sized,
    W: DocumentWriter + ?Sized,
{
    info!("Fetching league settings...");
    let raw_settings = api.fetch_league_settings().await?;
    let settings = parse_league_settings(&raw_settings);

    info!("Fetching teams...");
    let teams = TeamLookup::from_payloads(&api.fetch_teams().await?);

    info!("Fetching draft analysis...");
    let raw_players = api.fetch_draft_analysis().await?;

    let mut analysis_rows = Vec::with_capacity(raw_players.len());
    let mut skipped_players = 0;
    for raw in &raw_players {
        let info = extract_player_draft_info(raw);
        match draft_analysis_row(&info) {
            Some(row) => analysis_rows.push(row),
            None => {
                skipped_players += 1;
                warn!(
                    "Skipping draft analysis entry without a player key ({})",
                    info.name.as_deref().unwrap_or("unnamed")
                );
            }
        }
    }
    let settings_rows = league_settings_rows(&settings);

    writer.ensure_sheet(DRAFT_RESULTS, DRAFT_RESULTS_HEADERS).await?;

    writer.ensure_sheet(TEAMS, TEAMS_HEADERS).await?;
    writer.replace_rows(TEAMS, &teams.to_rows()).await?;

    writer
        .ensure_sheet(LEAGUE_SETTINGS, LEAGUE_SETTINGS_HEADERS)
        .await?;
    writer.replace_rows(LEAGUE_SETTINGS, &settings_rows).await?;

    writer
        .ensure_sheet(PRE_DRAFT_ANALYSIS, PRE_DRAFT_ANALYSIS_HEADERS)
        .await?;
    writer
        .replace_rows(PRE_DRAFT_ANALYSIS, &analysis_rows)
        .await?;

    let report = SetupReport {
        league_name: settings.name,
        teams: teams.len(),
        settings_rows: settings_rows.len(),
        analysis_players: analysis_rows.len(),
        skipped_players,
    };
    info!(
        "Setup complete: {} teams, {} players in draft analysis ({} skipped)",
        report.teams, report.analysis_players, report.skipped_players
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::{CellRef, WriteSummary};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    struct FakeApi {
        auth_fails: bool,
    }

    #[async_trait]
    impl DraftApi for FakeApi {
        async fn fetch_draft_results(&self) -> Result<Vec<Value>, ApiError> {
            Ok(vec![])
        }

        async fn fetch_player(&self, _: &str) -> Result<Value, ApiError> {
            Ok(Value::Null)
        }

        async fn fetch_league_settings(&self) -> Result<Value, ApiError> {
            if self.auth_fails {
                return Err(ApiError::auth("token_expired"));
            }
            Ok(league())
        }

        async fn fetch_teams(&self) -> Result<Vec<Value>, ApiError> {
            Ok(vec![json!({
                "team_key": "453.l.1.t.1",
                "team_id": "1",
                "name": "Ice Cold",
                "managers": {"manager": {"nickname": "Sam"}}
            })])
        }

        async fn fetch_draft_analysis(&self) -> Result<Vec<Value>, ApiError> {
            Ok(vec![
                json!({
                    "player_key": "453.p.6743",
                    "name": {"full": "Connor McDavid"},
                    "editorial_team_abbr": "EDM",
                    "display_position": "C",
                    "draft_analysis": {"average_pick": "1.3", "percent_drafted": "1.00"}
                }),
                json!({"name": {"full": "Ghost"}}),
            ])
        }
    }

    fn league() -> Value {
        json!({
            "name": "Test League",
            "settings": {
                "draft_type": "live",
                "scoring_type": "point",
                "max_teams": "12",
                "roster_positions": [
                    {"roster_position": {"position": "C", "count": 2, "position_type": "P"}},
                    {"roster_position": {"position": "G", "count": 2, "position_type": "G"}}
                ],
                "stat_categories": {"stats": [
                    {"stat": {"stat_id": 1, "name": "Goals", "display_name": "G", "position_type": "P"}},
                    {"stat": {"stat_id": 2, "name": "Assists", "display_name": "A", "position_type": "P"}},
                    {"stat": {"stat_id": 19, "name": "Wins", "display_name": "W", "position_type": "G"}}
                ]},
                "stat_modifiers": {"stats": [
                    {"stat": {"stat_id": 1, "value": "3"}},
                    {"stat": {"stat_id": 19, "value": "4.5"}}
                ]}
            }
        })
    }

    #[derive(Default)]
    struct RecordingWriter {
        headers: HashMap<String, Vec<String>>,
        sheets: HashMap<String, Vec<Row>>,
        write_calls: usize,
    }

    #[async_trait]
    impl DocumentWriter for RecordingWriter {
        async fn ensure_sheet(&mut self, sheet: &str, headers: &[&str]) -> Result<(), WriteError> {
            self.headers
                .entry(sheet.to_string())
                .or_insert_with(|| headers.iter().map(|h| h.to_string()).collect());
            Ok(())
        }

        async fn write_rows(&mut self, _: &str, _: &[Row], _: usize) -> Result<WriteSummary, WriteError> {
            self.write_calls += 1;
            Ok(WriteSummary::default())
        }

        async fn write_named_cell(&mut self, _: &str, _: CellRef, _: CellValue) -> Result<(), WriteError> {
            self.write_calls += 1;
            Ok(())
        }

        async fn replace_rows(&mut self, sheet: &str, rows: &[Row]) -> Result<(), WriteError> {
            self.write_calls += 1;
            self.sheets.insert(sheet.to_string(), rows.to_vec());
            Ok(())
        }
    }

    fn first_column(rows: &[Row]) -> Vec<String> {
        rows.iter().map(|r| r[0].to_string()).collect()
    }

    #[test]
    fn settings_rows_are_grouped_by_section() {
        let settings = parse_league_settings(&league());
        let rows = league_settings_rows(&settings);
        let labels = first_column(&rows);

        assert_eq!(labels[0], "League Name");
        assert_eq!(rows[0][1], CellValue::from("Test League"));
        assert_eq!(rows[3][1], CellValue::Integer(12));
        assert_eq!(rows[4][1], CellValue::Empty);

        let roster = labels.iter().position(|l| l == "ROSTER POSITIONS").unwrap();
        assert_eq!(labels[roster + 1], "C");
        assert_eq!(rows[roster + 1][1], CellValue::Integer(2));

        let skater = labels.iter().position(|l| l == "SKATER STATS").unwrap();
        let goalie = labels.iter().position(|l| l == "GOALIE STATS").unwrap();
        assert!(roster < skater && skater < goalie);
        assert_eq!(labels[skater + 1], "G");
        assert_eq!(rows[skater + 1][1], CellValue::Number(3.0));
        // Assists carry no modifier.
        assert_eq!(rows[skater + 2][1], CellValue::Empty);
        assert_eq!(labels[goalie - 1], "");
        assert_eq!(rows[goalie + 1][1], CellValue::Number(4.5));
    }

    #[test]
    fn settings_rows_for_empty_league_keep_roster_heading() {
        let rows = league_settings_rows(&LeagueSettings::default());
        assert_eq!(rows.len(), 8);
        assert!(!first_column(&rows).iter().any(|l| l.ends_with("STATS")));
    }

    #[test]
    fn analysis_row_requires_player_key() {
        assert!(draft_analysis_row(&PlayerDraftInfo::default()).is_none());

        let info = PlayerDraftInfo {
            player_key: Some("453.p.1".into()),
            name: Some("A Player".into()),
            average_pick: Some(12.5),
            season_rank: Some(40),
            ..PlayerDraftInfo::default()
        };
        let row = draft_analysis_row(&info).unwrap();
        assert_eq!(row.len(), PRE_DRAFT_ANALYSIS_HEADERS.len());
        assert_eq!(row[0], CellValue::from("453.p.1"));
        assert_eq!(row[2], CellValue::Empty);
        assert_eq!(row[4], CellValue::Number(12.5));
        assert_eq!(row[9], CellValue::Integer(40));
        assert_eq!(row[10], CellValue::Empty);
    }

    #[tokio::test]
    async fn setup_writes_every_sheet() {
        let mut writer = RecordingWriter::default();
        let report = run_setup(&FakeApi { auth_fails: false }, &mut writer)
            .await
            .unwrap();

        assert_eq!(report.league_name, "Test League");
        assert_eq!(report.teams, 1);
        assert_eq!(report.analysis_players, 1);
        assert_eq!(report.skipped_players, 1);

        for sheet in [DRAFT_RESULTS, TEAMS, LEAGUE_SETTINGS, PRE_DRAFT_ANALYSIS] {
            assert!(writer.headers.contains_key(sheet), "missing {sheet}");
        }
        assert!(!writer.sheets.contains_key(DRAFT_RESULTS));
        assert_eq!(writer.sheets[TEAMS][0][2], CellValue::from("Ice Cold"));
        assert_eq!(writer.sheets[TEAMS][0][3], CellValue::from("Sam"));
        assert_eq!(writer.sheets[LEAGUE_SETTINGS].len(), report.settings_rows);
        assert_eq!(
            writer.sheets[PRE_DRAFT_ANALYSIS][0][1],
            CellValue::from("Connor McDavid")
        );
    }

    #[tokio::test]
    async fn auth_failure_writes_nothing() {
        let mut writer = RecordingWriter::default();
        let err = run_setup(&FakeApi { auth_fails: true }, &mut writer)
            .await
            .unwrap_err();
        assert!(err.is_auth());
        assert!(writer.headers.is_empty());
        assert_eq!(writer.write_calls, 0);
    }
}
