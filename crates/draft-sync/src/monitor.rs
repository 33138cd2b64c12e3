// Draft reconciliation loop: poll the pick list, diff it against what has
// been written, resolve the new picks and hand them to the document writer.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, DraftApi};
use crate::draft::pick::{parse_pick, DraftRow, ParsedPick, Pick};
use crate::draft::teams::TeamLookup;
use crate::players::{PlayerCache, PlayerRecord, UNKNOWN_PLAYER, WARM_CONCURRENCY};
use crate::scoring::{
    build_modifier_table, load_projections, parse_league_settings, ModifierContext,
    ProjectionSet, StatModifierTable,
};
use crate::sheet::{
    CellValue, DocumentWriter, Row, WriteError, WriteSummary, DRAFT_RESULTS,
    DRAFT_RESULTS_HEADERS, LAST_UPDATED_CELL, PICK_COLUMN,
};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Polling,
    Reconciling,
    Writing,
    Stopped,
}

/// What has been written so far. Lives only as long as the process; a
/// restart starts from the default and relies on the writer's dedupe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationState {
    pub last_written_pick_number: u32,
    pub written_player_keys: HashSet<String>,
    /// Picks seen without a player key; re-examined every tick.
    pub pending_picks: BTreeSet<u32>,
    /// Picks skipped because their player was already written.
    pub skipped_picks: BTreeSet<u32>,
}

impl ReconciliationState {
    /// State as if every pick up to `pick_number` had been written.
    pub fn starting_after(pick_number: u32) -> Self {
        Self {
            last_written_pick_number: pick_number,
            ..Self::default()
        }
    }

    fn wants(&self, pick_number: u32) -> bool {
        (pick_number > self.last_written_pick_number || self.pending_picks.contains(&pick_number))
            && !self.skipped_picks.contains(&pick_number)
    }
}

// ---------------------------------------------------------------------------
// Batch planning
// ---------------------------------------------------------------------------

/// The work one tick derives from a fetched pick list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    /// Picks to resolve and write, in increasing pick number.
    pub picks: Vec<Pick>,
    /// Wanted pick numbers that have no player key yet.
    pub missing_player: Vec<u32>,
    /// Wanted picks whose player was already written (or appears earlier in
    /// this batch).
    pub duplicate_players: Vec<Pick>,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.picks.is_empty() && self.missing_player.is_empty() && self.duplicate_players.is_empty()
    }
}

/// Diff `raw_picks` against `state`. Pure: does not touch `state`.
///
/// Records without a pick number are logged and ignored; a repeated pick
/// number keeps its first record.
pub fn plan_batch(raw_picks: &[Value], state: &ReconciliationState) -> BatchPlan {
    let mut by_number: BTreeMap<u32, ParsedPick> = BTreeMap::new();
    for raw in raw_picks {
        let parsed = parse_pick(raw);
        match parsed.pick_number() {
            Some(number) if state.wants(number) => {
                by_number.entry(number).or_insert(parsed);
            }
            Some(_) => {}
            None => warn!("Ignoring draft result without a pick number: {}", raw),
        }
    }

    let mut plan = BatchPlan::default();
    let mut batch_keys: HashSet<String> = HashSet::new();
    for (number, parsed) in by_number {
        match parsed {
            ParsedPick::Ready(pick) => {
                if state.written_player_keys.contains(&pick.player_key)
                    || !batch_keys.insert(pick.player_key.clone())
                {
                    plan.duplicate_players.push(pick);
                } else {
                    plan.picks.push(pick);
                }
            }
            ParsedPick::MissingPlayer { .. } => plan.missing_player.push(number),
            ParsedPick::Invalid => {}
        }
    }
    plan
}

// ---------------------------------------------------------------------------
// Reports and errors
// ---------------------------------------------------------------------------

/// Outcome of one successful tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub written: Vec<DraftRow>,
    pub summary: WriteSummary,
    pub missing_player: Vec<u32>,
    pub duplicate_players: Vec<u32>,
    /// Picks left for the next tick after a transient resolution failure.
    pub deferred: usize,
    /// Picks written with a placeholder player because the service could
    /// not describe the player.
    pub unresolved: Vec<u32>,
}

/// Totals over a monitor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub picks_written: usize,
}

#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl TickError {
    pub fn is_auth(&self) -> bool {
        matches!(self, TickError::Api(e) if e.is_auth())
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Owns the reconciliation state, the player cache and the writer for one
/// league's draft.
pub struct Reconciler<A: ?Sized, W> {
    api: Arc<A>,
    players: PlayerCache<A>,
    writer: W,
    teams: TeamLookup,
    modifiers: StatModifierTable,
    projections: Option<ProjectionSet>,
    state: ReconciliationState,
    phase: watch::Sender<LoopPhase>,
    echo_picks: bool,
}

impl<A, W> Reconciler<A, W>
where
    A: DraftApi + ?Sized,
    W: DocumentWriter,
{
    pub fn new(api: Arc<A>, writer: W) -> Self {
        let (phase, _) = watch::channel(LoopPhase::Idle);
        Self {
            players: PlayerCache::new(Arc::clone(&api)),
            api,
            writer,
            teams: TeamLookup::default(),
            modifiers: StatModifierTable::default(),
            projections: None,
            state: ReconciliationState::default(),
            phase,
            echo_picks: false,
        }
    }

    pub fn with_teams(mut self, teams: TeamLookup) -> Self {
        self.teams = teams;
        self
    }

    pub fn with_modifiers(mut self, modifiers: StatModifierTable) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_projections(mut self, projections: Option<ProjectionSet>) -> Self {
        self.projections = projections;
        self
    }

    pub fn with_state(mut self, state: ReconciliationState) -> Self {
        self.state = state;
        self
    }

    /// Print `Pick N: Player (Team)` to stdout for every written pick.
    pub fn with_pick_echo(mut self, echo: bool) -> Self {
        self.echo_picks = echo;
        self
    }

    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    pub fn players(&self) -> &PlayerCache<A> {
        &self.players
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    pub fn phase(&self) -> LoopPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<LoopPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, next: LoopPhase) {
        let prev = self.phase.send_replace(next);
        if prev != next {
            debug!(?prev, ?next, "loop phase");
        }
    }

    /// Load teams, scoring settings and (optionally) projections. Only an
    /// authentication failure is returned; anything else degrades to empty
    /// lookups with a warning.
    pub async fn load_league_context(&mut self, projections_path: Option<&Path>) -> Result<(), ApiError> {
        match self.api.fetch_teams().await {
            Ok(raw) => {
                self.teams = TeamLookup::from_payloads(&raw);
                info!("Loaded {} teams", self.teams.len());
            }
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => warn!("Failed to load teams; team names fall back to keys: {}", e),
        }

        let settings = match self.api.fetch_league_settings().await {
            Ok(raw) => {
                self.modifiers = build_modifier_table(&raw);
                Some(parse_league_settings(&raw))
            }
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                warn!("Failed to load league settings; projected points disabled: {}", e);
                None
            }
        };

        if let (Some(path), Some(settings)) = (projections_path, settings.as_ref()) {
            match load_projections(path, settings) {
                Ok(set) => self.projections = Some(set),
                Err(e) => warn!("Failed to load projections: {}", e),
            }
        }
        Ok(())
    }

    /// Make sure the Draft Results sheet exists.
    pub async fn prepare_document(&mut self) -> Result<(), WriteError> {
        self.writer
            .ensure_sheet(DRAFT_RESULTS, DRAFT_RESULTS_HEADERS)
            .await
    }

    /// Resolve the players of every pick made so far. Only an authentication
    /// failure is returned.
    pub async fn warm_cache(&mut self) -> Result<usize, ApiError> {
        let raw = match self.api.fetch_draft_results().await {
            Ok(raw) => raw,
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                warn!("Skipping cache warm-up: {}", e);
                return Ok(0);
            }
        };

        let keys: Vec<String> = raw
            .iter()
            .filter_map(|r| match parse_pick(r) {
                ParsedPick::Ready(pick) => Some(pick.player_key),
                _ => None,
            })
            .collect();
        let warmed = self
            .players
            .warm(keys.iter().map(String::as_str), WARM_CONCURRENCY)
            .await?;
        if warmed > 0 {
            info!("Warmed player cache with {} players", warmed);
        }
        Ok(warmed)
    }

    async fn resolve(&self, pick: &Pick) -> Result<DraftRow, ApiError> {
        let player = self.players.get_player(&pick.player_key).await?;
        Ok(self.draft_row(pick, player))
    }

    fn draft_row(&self, pick: &Pick, player: PlayerRecord) -> DraftRow {
        let team = self.teams.resolve(&pick.team_key);
        let context = ModifierContext::for_position_type(player.position_type.as_deref());
        let projected_points = self
            .projections
            .as_ref()
            .and_then(|p| p.projected_points(&player.display_name, &self.modifiers, &context));

        DraftRow {
            round: pick.round,
            pick_number: pick.pick_number,
            position: player.position_label(),
            player_name: player.display_name,
            player_key: pick.player_key.clone(),
            team_key: pick.team_key.clone(),
            team_name: team.name,
            manager: team.manager,
            projected_points,
        }
    }

    /// One poll-diff-resolve-write pass.
    ///
    /// State only advances after the batch is written. A fetch or write
    /// failure leaves it untouched.
    pub async fn tick(&mut self) -> Result<TickReport, TickError> {
        self.set_phase(LoopPhase::Polling);
        let raw = self.api.fetch_draft_results().await?;

        self.set_phase(LoopPhase::Reconciling);
        let plan = plan_batch(&raw, &self.state);
        let mut report = TickReport {
            missing_player: plan.missing_player.clone(),
            duplicate_players: plan.duplicate_players.iter().map(|p| p.pick_number).collect(),
            ..TickReport::default()
        };

        for &number in &plan.missing_player {
            if self.state.pending_picks.insert(number) {
                warn!("Pick {} has no player key yet; will retry", number);
            }
        }
        for pick in &plan.duplicate_players {
            warn!(
                "Pick {}: player {} already written; skipping",
                pick.pick_number, pick.player_key
            );
            self.state.skipped_picks.insert(pick.pick_number);
            self.state.pending_picks.remove(&pick.pick_number);
        }

        let mut rows: Vec<DraftRow> = Vec::with_capacity(plan.picks.len());
        for (i, pick) in plan.picks.iter().enumerate() {
            match self.resolve(pick).await {
                Ok(row) => rows.push(row),
                Err(e) if e.is_auth() => return Err(e.into()),
                Err(e) if e.is_retryable() => {
                    report.deferred = plan.picks.len() - i;
                    warn!(
                        "Could not resolve pick {}: {}; deferring {} pick(s) to next tick",
                        pick.pick_number, e, report.deferred
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        "Pick {}: player {} cannot be resolved ({}); writing it as {}",
                        pick.pick_number, pick.player_key, e, UNKNOWN_PLAYER
                    );
                    report.unresolved.push(pick.pick_number);
                    rows.push(self.draft_row(pick, PlayerRecord::unknown(&pick.player_key)));
                }
            }
        }

        if rows.is_empty() {
            self.set_phase(LoopPhase::Idle);
            return Ok(report);
        }

        self.set_phase(LoopPhase::Writing);
        let table: Vec<Row> = rows.iter().map(DraftRow::to_row).collect();
        report.summary = self
            .writer
            .write_rows(DRAFT_RESULTS, &table, PICK_COLUMN)
            .await?;

        for row in &rows {
            info!("Recording pick #{}: {} -> {}", row.pick_number, row.player_name, row.team_name);
            if self.echo_picks {
                println!("{row}");
            }
            self.state.written_player_keys.insert(row.player_key.clone());
            self.state.pending_picks.remove(&row.pick_number);
            self.state.last_written_pick_number =
                self.state.last_written_pick_number.max(row.pick_number);
        }

        let stamp = format!(
            "Last updated: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        if let Err(e) = self
            .writer
            .write_named_cell(DRAFT_RESULTS, LAST_UPDATED_CELL, CellValue::from(stamp))
            .await
        {
            warn!("Failed to write timestamp: {}", e);
        }

        report.written = rows;
        self.set_phase(LoopPhase::Idle);
        Ok(report)
    }

    /// Tick every `interval` until `stop` turns true (or its sender goes
    /// away). A tick in progress always finishes; only the sleep between
    /// ticks is interrupted.
    ///
    /// Returns `Err` only when the service rejects the credentials.
    pub async fn run(
        &mut self,
        interval: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> Result<RunSummary, ApiError> {
        let mut summary = RunSummary::default();
        info!("Monitoring draft every {}s", interval.as_secs_f64());

        loop {
            if *stop.borrow_and_update() {
                break;
            }

            summary.ticks += 1;
            match self.tick().await {
                Ok(report) => summary.picks_written += report.written.len(),
                Err(TickError::Api(e)) if e.is_auth() => {
                    self.set_phase(LoopPhase::Stopped);
                    error!("Authentication failed; re-authorize and restart: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    summary.failed_ticks += 1;
                    self.set_phase(LoopPhase::Idle);
                    warn!("Tick failed, retrying next interval: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        info!("Stop channel closed, shutting down");
                        break;
                    }
                }
            }
        }

        self.set_phase(LoopPhase::Stopped);
        info!(
            "Monitor stopped after {} ticks ({} picks written)",
            summary.ticks, summary.picks_written
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::CellRef;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    // -- Fakes ---------------------------------------------------------------

    #[derive(Default)]
    struct FakeApi {
        picks: Mutex<Vec<Value>>,
        /// Errors returned by upcoming `fetch_draft_results` calls, in order.
        draft_errors: Mutex<VecDeque<ApiError>>,
        /// Player keys whose fetch fails (once each) with the given error.
        player_errors: Mutex<HashMap<String, ApiError>>,
        /// Player keys the service never describes (404 on every fetch).
        missing_players: Mutex<Vec<String>>,
        draft_calls: Mutex<usize>,
    }

    impl FakeApi {
        fn with_picks(picks: &[(u32, &str, &str)]) -> Self {
            let api = Self::default();
            api.set_picks(picks);
            api
        }

        fn set_picks(&self, picks: &[(u32, &str, &str)]) {
            *self.picks.lock().unwrap() = picks
                .iter()
                .map(|&(n, team, player)| {
                    json!({"pick": n, "round": (n + 1) / 2, "team_key": team, "player_key": player})
                })
                .collect();
        }
    }

    #[async_trait]
    impl DraftApi for FakeApi {
        async fn fetch_draft_results(&self) -> Result<Vec<Value>, ApiError> {
            *self.draft_calls.lock().unwrap() += 1;
            if let Some(e) = self.draft_errors.lock().unwrap().pop_front() {
                return Err(e);
            }
            Ok(self.picks.lock().unwrap().clone())
        }

        async fn fetch_player(&self, player_key: &str) -> Result<Value, ApiError> {
            if let Some(e) = self.player_errors.lock().unwrap().remove(player_key) {
                return Err(e);
            }
            if self.missing_players.lock().unwrap().iter().any(|k| k == player_key) {
                return Err(ApiError::Status {
                    url: format!("player/{player_key}"),
                    status: 404,
                });
            }
            Ok(json!({
                "player_key": player_key,
                "name": {"full": format!("Name {player_key}")},
                "display_position": "C",
                "position_type": "P"
            }))
        }

        async fn fetch_league_settings(&self) -> Result<Value, ApiError> {
            Ok(json!({"settings": {"stat_modifiers": {"stats": [
                {"stat": {"stat_id": 1, "value": "3"}}
            ]}}}))
        }

        async fn fetch_teams(&self) -> Result<Vec<Value>, ApiError> {
            Ok(vec![
                json!({"team_key": "T1", "team_id": "1", "name": "Team One", "managers": {"manager": {"nickname": "Ann"}}}),
                json!({"team_key": "T2", "team_id": "2", "name": "Team Two", "managers": {"manager": {"nickname": "Bo"}}}),
            ])
        }
    }

    /// In-memory writer with the same dedupe contract as the real backends.
    #[derive(Default)]
    struct MemoryWriter {
        rows: Vec<Row>,
        named: HashMap<CellRef, CellValue>,
        write_calls: usize,
        fail_next: Option<WriteError>,
    }

    impl MemoryWriter {
        fn pick_numbers(&self) -> Vec<i64> {
            self.rows
                .iter()
                .map(|r| match r[PICK_COLUMN] {
                    CellValue::Integer(n) => n,
                    ref other => panic!("unexpected pick cell {other:?}"),
                })
                .collect()
        }
    }

    #[async_trait]
    impl DocumentWriter for MemoryWriter {
        async fn ensure_sheet(&mut self, _: &str, _: &[&str]) -> Result<(), WriteError> {
            Ok(())
        }

        async fn write_rows(
            &mut self,
            _: &str,
            rows: &[Row],
            dedupe_column: usize,
        ) -> Result<WriteSummary, WriteError> {
            self.write_calls += 1;
            if let Some(e) = self.fail_next.take() {
                return Err(e);
            }
            let mut summary = WriteSummary::default();
            for row in rows {
                let key = row[dedupe_column].key();
                match self.rows.iter().position(|r| r[dedupe_column].key() == key) {
                    Some(i) => {
                        self.rows[i] = row.clone();
                        summary.updated += 1;
                    }
                    None => {
                        self.rows.push(row.clone());
                        summary.appended += 1;
                    }
                }
            }
            Ok(summary)
        }

        async fn write_named_cell(
            &mut self,
            _: &str,
            cell: CellRef,
            value: CellValue,
        ) -> Result<(), WriteError> {
            self.named.insert(cell, value);
            Ok(())
        }

        async fn replace_rows(&mut self, _: &str, rows: &[Row]) -> Result<(), WriteError> {
            self.rows = rows.to_vec();
            Ok(())
        }
    }

    fn three_picks() -> FakeApi {
        FakeApi::with_picks(&[(1, "T1", "P100"), (2, "T2", "P101"), (3, "T1", "P102")])
    }

    // -- plan_batch ------------------------------------------------------------

    #[test]
    fn plan_selects_picks_after_watermark_in_order() {
        let raw = vec![
            json!({"pick": 3, "round": 1, "team_key": "T1", "player_key": "P102"}),
            json!({"pick": 1, "round": 1, "team_key": "T1", "player_key": "P100"}),
            json!({"pick": 2, "round": 1, "team_key": "T2", "player_key": "P101"}),
        ];
        let plan = plan_batch(&raw, &ReconciliationState::starting_after(1));
        let numbers: Vec<u32> = plan.picks.iter().map(|p| p.pick_number).collect();
        assert_eq!(numbers, vec![2, 3]);
    }

    #[test]
    fn plan_reports_missing_and_duplicate_players() {
        let raw = vec![
            json!({"pick": 1, "team_key": "T1", "player_key": "P100"}),
            json!({"pick": 2, "team_key": "T2"}),
            json!({"pick": 3, "team_key": "T1", "player_key": "P100"}),
            json!({"pick": 4, "team_key": "T2", "player_key": "P050"}),
            json!({"round": 9}),
        ];
        let mut state = ReconciliationState::default();
        state.written_player_keys.insert("P050".into());
        let plan = plan_batch(&raw, &state);

        assert_eq!(plan.picks.len(), 1);
        assert_eq!(plan.missing_player, vec![2]);
        let dups: Vec<u32> = plan.duplicate_players.iter().map(|p| p.pick_number).collect();
        assert_eq!(dups, vec![3, 4]);
    }

    #[test]
    fn plan_revisits_pending_picks_below_watermark() {
        let raw = vec![
            json!({"pick": 2, "team_key": "T2", "player_key": "P101"}),
            json!({"pick": 5, "team_key": "T1", "player_key": "P104"}),
        ];
        let mut state = ReconciliationState::starting_after(4);
        state.pending_picks.insert(2);
        let plan = plan_batch(&raw, &state);
        let numbers: Vec<u32> = plan.picks.iter().map(|p| p.pick_number).collect();
        assert_eq!(numbers, vec![2, 5]);
    }

    #[test]
    fn plan_is_empty_when_nothing_new() {
        let raw = vec![json!({"pick": 1, "player_key": "P1"})];
        assert!(plan_batch(&raw, &ReconciliationState::starting_after(1)).is_empty());
        assert!(plan_batch(&[], &ReconciliationState::default()).is_empty());
    }

    // -- tick ------------------------------------------------------------------

    #[tokio::test]
    async fn tick_writes_new_picks_in_order_and_advances_state() {
        let mut monitor = Reconciler::new(Arc::new(three_picks()), MemoryWriter::default())
            .with_state(ReconciliationState::starting_after(1));
        monitor.load_league_context(None).await.unwrap();

        let report = monitor.tick().await.unwrap();
        let numbers: Vec<u32> = report.written.iter().map(|r| r.pick_number).collect();
        assert_eq!(numbers, vec![2, 3]);
        assert_eq!(report.summary, WriteSummary { appended: 2, updated: 0 });
        assert_eq!(monitor.state().last_written_pick_number, 3);
        assert!(monitor.state().written_player_keys.contains("P101"));
        assert!(monitor.state().written_player_keys.contains("P102"));

        assert_eq!(report.written[0].player_name, "Name P101");
        assert_eq!(report.written[0].team_name, "Team Two");
        assert_eq!(report.written[0].manager, "Bo");
        assert_eq!(report.written[1].position, "C");

        let writer = monitor.writer();
        assert_eq!(writer.pick_numbers(), vec![2, 3]);
        assert!(matches!(
            writer.named.get(&LAST_UPDATED_CELL),
            Some(CellValue::Text(s)) if s.starts_with("Last updated: ")
        ));
        assert_eq!(monitor.phase(), LoopPhase::Idle);
    }

    #[tokio::test]
    async fn tick_with_nothing_new_writes_nothing() {
        let mut monitor = Reconciler::new(Arc::new(three_picks()), MemoryWriter::default())
            .with_state(ReconciliationState::starting_after(3));
        let report = monitor.tick().await.unwrap();
        assert!(report.written.is_empty());
        assert_eq!(monitor.writer().write_calls, 0);
        assert!(monitor.writer().named.is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_leaves_state_unchanged() {
        let api = three_picks();
        api.draft_errors
            .lock()
            .unwrap()
            .push_back(ApiError::transient("retries exhausted"));
        let initial = ReconciliationState::starting_after(1);
        let mut monitor = Reconciler::new(Arc::new(api), MemoryWriter::default())
            .with_state(initial.clone());

        let err = monitor.tick().await.unwrap_err();
        assert!(!err.is_auth());
        assert_eq!(monitor.state(), &initial);
        assert_eq!(monitor.writer().write_calls, 0);
    }

    #[tokio::test]
    async fn write_conflict_leaves_state_unchanged_and_retries() {
        let writer = MemoryWriter {
            fail_next: Some(WriteError::Conflict {
                message: "locked".into(),
            }),
            ..MemoryWriter::default()
        };
        let mut monitor = Reconciler::new(Arc::new(three_picks()), writer);

        let err = monitor.tick().await.unwrap_err();
        assert!(matches!(err, TickError::Write(ref w) if w.is_conflict()));
        assert_eq!(monitor.state(), &ReconciliationState::default());

        let report = monitor.tick().await.unwrap();
        assert_eq!(report.written.len(), 3);
        assert_eq!(monitor.state().last_written_pick_number, 3);
    }

    #[tokio::test]
    async fn resolution_failure_writes_prefix_and_defers_rest() {
        let api = three_picks();
        api.player_errors
            .lock()
            .unwrap()
            .insert("P101".into(), ApiError::transient("timeout"));
        let mut monitor = Reconciler::new(Arc::new(api), MemoryWriter::default());

        let report = monitor.tick().await.unwrap();
        assert_eq!(report.written.len(), 1);
        assert_eq!(report.deferred, 2);
        assert_eq!(monitor.state().last_written_pick_number, 1);

        let report = monitor.tick().await.unwrap();
        let numbers: Vec<u32> = report.written.iter().map(|r| r.pick_number).collect();
        assert_eq!(numbers, vec![2, 3]);
        assert_eq!(monitor.writer().pick_numbers(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unresolvable_player_is_written_as_unknown_and_later_picks_flow() {
        let api = FakeApi::with_picks(&[
            (1, "T1", "P100"),
            (2, "T2", "P101"),
            (3, "T1", "P102"),
            (4, "T2", "P103"),
        ]);
        api.missing_players.lock().unwrap().push("P101".into());
        let mut monitor = Reconciler::new(Arc::new(api), MemoryWriter::default());

        let report = monitor.tick().await.unwrap();
        assert_eq!(report.deferred, 0);
        assert_eq!(report.unresolved, vec![2]);
        assert_eq!(report.written.len(), 4);
        assert_eq!(report.written[1].player_name, UNKNOWN_PLAYER);
        assert_eq!(report.written[1].player_key, "P101");
        assert_eq!(report.written[1].team_name, "T2");
        assert_eq!(monitor.state().last_written_pick_number, 4);
        assert_eq!(monitor.writer().pick_numbers(), vec![1, 2, 3, 4]);

        // Nothing left to retry.
        let report = monitor.tick().await.unwrap();
        assert!(report.written.is_empty());
        assert!(report.unresolved.is_empty());
        assert_eq!(monitor.writer().rows.len(), 4);
    }

    #[test]
    fn plan_skips_records_without_pick_number() {
        let raw = vec![
            json!({"round": 1, "player_key": "P1"}),
            json!({"pick": "soon", "player_key": "P2"}),
            json!({"pick": 1, "player_key": "P3"}),
        ];
        let plan = plan_batch(&raw, &ReconciliationState::default());
        assert_eq!(plan.picks.len(), 1);
        assert_eq!(plan.picks[0].player_key, "P3");
    }

    #[tokio::test]
    async fn auth_failure_during_resolution_is_returned() {
        let api = three_picks();
        api.player_errors
            .lock()
            .unwrap()
            .insert("P100".into(), ApiError::auth("token_expired"));
        let mut monitor = Reconciler::new(Arc::new(api), MemoryWriter::default());

        let err = monitor.tick().await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(monitor.writer().write_calls, 0);
    }

    #[tokio::test]
    async fn keyless_pick_is_pending_until_resolved() {
        let api = Arc::new(FakeApi::with_picks(&[(1, "T1", "P100"), (2, "T2", ""), (3, "T1", "P102")]));
        let mut monitor = Reconciler::new(Arc::clone(&api), MemoryWriter::default());

        let report = monitor.tick().await.unwrap();
        assert_eq!(report.missing_player, vec![2]);
        assert_eq!(monitor.state().last_written_pick_number, 3);
        assert!(monitor.state().pending_picks.contains(&2));

        api.set_picks(&[(1, "T1", "P100"), (2, "T2", "P101"), (3, "T1", "P102")]);
        let report = monitor.tick().await.unwrap();
        let numbers: Vec<u32> = report.written.iter().map(|r| r.pick_number).collect();
        assert_eq!(numbers, vec![2]);
        assert!(monitor.state().pending_picks.is_empty());
        assert_eq!(monitor.writer().rows.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_player_is_skipped_once() {
        let api = Arc::new(FakeApi::with_picks(&[(1, "T1", "P100"), (2, "T2", "P100")]));
        let mut monitor = Reconciler::new(api, MemoryWriter::default());

        let report = monitor.tick().await.unwrap();
        assert_eq!(report.written.len(), 1);
        assert_eq!(report.duplicate_players, vec![2]);

        let report = monitor.tick().await.unwrap();
        assert!(report.duplicate_players.is_empty());
        assert_eq!(monitor.writer().rows.len(), 1);
    }

    #[tokio::test]
    async fn restart_from_scratch_does_not_duplicate_rows() {
        let api = Arc::new(three_picks());
        let mut first = Reconciler::new(Arc::clone(&api), MemoryWriter::default())
            .with_state(ReconciliationState::starting_after(1));
        first.tick().await.unwrap();
        let writer = first.into_writer();

        let mut restarted = Reconciler::new(api, writer);
        let report = restarted.tick().await.unwrap();
        assert_eq!(report.summary, WriteSummary { appended: 1, updated: 2 });
        assert_eq!(restarted.writer().pick_numbers(), vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn warm_cache_resolves_existing_picks() {
        let mut monitor = Reconciler::new(Arc::new(three_picks()), MemoryWriter::default());
        assert_eq!(monitor.warm_cache().await.unwrap(), 3);
        assert_eq!(monitor.players().len(), 3);

        monitor.tick().await.unwrap();
        assert_eq!(monitor.players().fetch_count(), 3);
    }

    // -- run -------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn run_continues_after_transient_failure_and_stops_on_signal() {
        let api = Arc::new(three_picks());
        api.draft_errors
            .lock()
            .unwrap()
            .push_back(ApiError::transient("503"));
        let mut monitor = Reconciler::new(Arc::clone(&api), MemoryWriter::default());
        let (stop_tx, stop_rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            let _ = stop_tx.send(true);
        });

        let summary = monitor.run(Duration::from_secs(10), stop_rx).await.unwrap();
        stopper.await.unwrap();

        // Ticks at t=0 (fails), t=10, t=20; stop arrives at t=25.
        assert_eq!(summary.ticks, 3);
        assert_eq!(summary.failed_ticks, 1);
        assert_eq!(summary.picks_written, 3);
        assert_eq!(monitor.phase(), LoopPhase::Stopped);
        assert_eq!(monitor.writer().rows.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_auth_failure() {
        let api = three_picks();
        api.draft_errors
            .lock()
            .unwrap()
            .push_back(ApiError::auth("token_expired"));
        let mut monitor = Reconciler::new(Arc::new(api), MemoryWriter::default());
        let (_stop_tx, stop_rx) = watch::channel(false);

        let err = monitor.run(Duration::from_secs(10), stop_rx).await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(monitor.phase(), LoopPhase::Stopped);
    }

    #[tokio::test]
    async fn run_returns_immediately_when_already_stopped() {
        let api = Arc::new(three_picks());
        let mut monitor = Reconciler::new(Arc::clone(&api), MemoryWriter::default());
        let (_stop_tx, stop_rx) = watch::channel(true);

        let summary = monitor.run(Duration::from_secs(10), stop_rx).await.unwrap();
        assert_eq!(summary.ticks, 0);
        assert_eq!(*api.draft_calls.lock().unwrap(), 0);
    }
}
