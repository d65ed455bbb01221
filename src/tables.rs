use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use chrono::NaiveDate;
use csv::StringRecord;

use crate::backtest::{BacktestReport, SliceMetrics, SummaryRow};
use crate::error::{EngineError, Result};
use crate::predict::Prediction;
use crate::prob::Prob3;
use crate::records::{
    AuxSignals, CompetitionBucket, FinalScore, MatchRecord, Odds, UpcomingFixture, derive_fixture_id,
};
use crate::staking::{StakeCandidate, StakeDecision, VetoSet};

pub const DEFAULT_LEAGUE: &str = "GLOBAL";

const HOME_ODDS: &[&str] = &["home_odds", "home_odds_dec"];
const DRAW_ODDS: &[&str] = &["draw_odds", "draw_odds_dec"];
const AWAY_ODDS: &[&str] = &["away_odds", "away_odds_dec"];

const FIXTURE_CORE: &[&str] = &[
    "fixture_id",
    "date",
    "league",
    "competition",
    "home_team",
    "away_team",
    "home_odds",
    "home_odds_dec",
    "draw_odds",
    "draw_odds_dec",
    "away_odds",
    "away_odds_dec",
    "ou_main_total",
    "over_price",
    "under_price",
    "btts_yes_price",
    "btts_no_price",
    "bookmaker_count",
    "has_opening_odds",
    "has_closing_odds",
    "liquidity_tier",
    "home_xg",
    "away_xg",
    "contradiction_flags",
];

/// Header lookup by name, tolerant of case and surrounding whitespace.
struct Columns {
    index: HashMap<String, usize>,
    names: Vec<String>,
}

impl Columns {
    fn new(headers: &StringRecord) -> Self {
        let names: Vec<String> = headers.iter().map(|h| h.trim().to_ascii_lowercase()).collect();
        let index = names
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), i))
            .collect();
        Self { index, names }
    }

    fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn require(&self, table: &str, name: &str) -> Result<()> {
        if self.has(name) {
            Ok(())
        } else {
            Err(EngineError::MissingColumn {
                table: table.to_string(),
                column: name.to_string(),
            })
        }
    }

    /// First non-empty value among the aliases.
    fn get<'r>(&self, rec: &'r StringRecord, aliases: &[&str]) -> Option<&'r str> {
        aliases.iter().find_map(|name| {
            let idx = *self.index.get(*name)?;
            let v = rec.get(idx)?.trim();
            (!v.is_empty()).then_some(v)
        })
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn parse_f64(raw: Option<&str>) -> Option<f64> {
    raw?.parse::<f64>().ok().filter(|v| !v.is_nan())
}

fn parse_goals(raw: Option<&str>) -> Option<u32> {
    let v = parse_f64(raw)?;
    (v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64).then_some(v as u32)
}

fn parse_bool(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|s| s.to_ascii_lowercase()).as_deref(),
        Some("1" | "1.0" | "true" | "yes" | "y" | "t")
    )
}

fn read_odds(cols: &Columns, rec: &StringRecord) -> Odds {
    Odds {
        home: parse_f64(cols.get(rec, HOME_ODDS)),
        draw: parse_f64(cols.get(rec, DRAW_ODDS)),
        away: parse_f64(cols.get(rec, AWAY_ODDS)),
    }
}

fn read_competition(cols: &Columns, rec: &StringRecord, league: &str) -> CompetitionBucket {
    cols.get(rec, &["competition"])
        .and_then(CompetitionBucket::from_tag)
        .unwrap_or_else(|| CompetitionBucket::from_league_name(league))
}

/// Undecodable rows are skipped with a warning; I/O failures stay fatal.
fn decoded(table: &str, row: usize, rec: csv::Result<StringRecord>) -> Result<Option<StringRecord>> {
    match rec {
        Ok(rec) => Ok(Some(rec)),
        Err(e) if e.is_io_error() => Err(e.into()),
        Err(e) => {
            tracing::warn!(table, row, error = %e, "undecodable row; skipped");
            Ok(None)
        }
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| EngineError::io(path, e))
}

fn create(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    }
    File::create(path).map_err(|e| EngineError::io(path, e))
}

/// Parses the historical matches table. Rows with an unreadable date or
/// missing teams are skipped with a warning; they never abort the load.
pub fn read_history_from<R: Read>(reader: R) -> Result<Vec<MatchRecord>> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let cols = Columns::new(rdr.headers()?);
    for name in ["date", "home_team", "away_team", "home_goals", "away_goals"] {
        cols.require("history", name)?;
    }

    let mut out = Vec::new();
    let mut skipped = 0usize;
    for (row, rec) in rdr.records().enumerate() {
        let Some(rec) = decoded("history", row, rec)? else {
            skipped += 1;
            continue;
        };
        let Some(date) = cols.get(&rec, &["date"]).and_then(parse_date) else {
            tracing::warn!(row, "history row has no readable date; skipped");
            skipped += 1;
            continue;
        };
        let (Some(home), Some(away)) = (cols.get(&rec, &["home_team"]), cols.get(&rec, &["away_team"])) else {
            tracing::warn!(row, "history row is missing a team; skipped");
            skipped += 1;
            continue;
        };
        let league = cols.get(&rec, &["league"]).unwrap_or(DEFAULT_LEAGUE).to_string();
        let hg = parse_goals(cols.get(&rec, &["home_goals"]));
        let ag = parse_goals(cols.get(&rec, &["away_goals"]));
        let result = match (hg, ag) {
            (Some(h), Some(a)) => Some(FinalScore { home: h, away: a }),
            (None, None) => None,
            _ => {
                tracing::warn!(row, %date, home, away, "only one goal column present; treated as unresolved");
                None
            }
        };

        out.push(MatchRecord {
            row,
            date,
            competition: read_competition(&cols, &rec, &league),
            league,
            home_team: home.to_string(),
            away_team: away.to_string(),
            result,
            odds: read_odds(&cols, &rec),
        });
    }
    if skipped > 0 {
        tracing::warn!(skipped, kept = out.len(), "history rows skipped");
    }
    Ok(out)
}

pub fn read_history(path: &Path) -> Result<Vec<MatchRecord>> {
    read_history_from(open(path)?)
}

pub fn read_fixtures_from<R: Read>(reader: R) -> Result<Vec<UpcomingFixture>> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let cols = Columns::new(rdr.headers()?);
    for name in ["date", "home_team", "away_team"] {
        cols.require("fixtures", name)?;
    }

    let mut out = Vec::new();
    for (row, rec) in rdr.records().enumerate() {
        let Some(rec) = decoded("fixtures", row, rec)? else {
            continue;
        };
        let Some(date) = cols.get(&rec, &["date"]).and_then(parse_date) else {
            tracing::warn!(row, "fixture row has no readable date; skipped");
            continue;
        };
        let (Some(home), Some(away)) = (cols.get(&rec, &["home_team"]), cols.get(&rec, &["away_team"])) else {
            tracing::warn!(row, "fixture row is missing a team; skipped");
            continue;
        };
        let league = cols.get(&rec, &["league"]).unwrap_or(DEFAULT_LEAGUE).to_string();
        let fixture_id = cols
            .get(&rec, &["fixture_id"])
            .map(str::to_string)
            .unwrap_or_else(|| derive_fixture_id(date, home, away));

        let mut extra = BTreeMap::new();
        for (i, name) in cols.names.iter().enumerate() {
            if FIXTURE_CORE.contains(&name.as_str()) {
                continue;
            }
            if let Some(v) = rec.get(i) {
                extra.insert(name.clone(), v.to_string());
            }
        }
        let aux = AuxSignals {
            ou_main_total: parse_f64(cols.get(&rec, &["ou_main_total"])),
            over_price: parse_f64(cols.get(&rec, &["over_price"])),
            under_price: parse_f64(cols.get(&rec, &["under_price"])),
            btts_yes_price: parse_f64(cols.get(&rec, &["btts_yes_price"])),
            btts_no_price: parse_f64(cols.get(&rec, &["btts_no_price"])),
            bookmaker_count: parse_goals(cols.get(&rec, &["bookmaker_count"])),
            has_opening_odds: parse_bool(cols.get(&rec, &["has_opening_odds"])),
            has_closing_odds: parse_bool(cols.get(&rec, &["has_closing_odds"])),
            liquidity_tier: parse_goals(cols.get(&rec, &["liquidity_tier"])).map(|t| t.min(u8::MAX as u32) as u8),
            home_xg: parse_f64(cols.get(&rec, &["home_xg"])),
            away_xg: parse_f64(cols.get(&rec, &["away_xg"])),
            contradiction_flags: parse_goals(cols.get(&rec, &["contradiction_flags"])).unwrap_or(0),
            extra,
        };

        out.push(UpcomingFixture {
            fixture_id,
            date,
            competition: read_competition(&cols, &rec, &league),
            league,
            home_team: home.to_string(),
            away_team: away.to_string(),
            odds: read_odds(&cols, &rec),
            aux,
        });
    }
    Ok(out)
}

pub fn read_fixtures(path: &Path) -> Result<Vec<UpcomingFixture>> {
    read_fixtures_from(open(path)?)
}

fn num(v: f64) -> String {
    if v.is_finite() { format!("{v:.6}") } else { String::new() }
}

fn opt_num(v: Option<f64>) -> String {
    v.map(num).unwrap_or_default()
}

fn na(v: Option<f64>) -> String {
    match v {
        Some(x) if x.is_finite() => format!("{x:.6}"),
        _ => "NA".to_string(),
    }
}

pub const PREDICTION_HEADER: [&str; 14] = [
    "fixture_id",
    "date",
    "league",
    "home_team",
    "away_team",
    "pH",
    "pD",
    "pA",
    "oddsH",
    "oddsD",
    "oddsA",
    "kelly_H",
    "kelly_D",
    "kelly_A",
];

pub fn write_predictions_to<W: Write>(writer: W, predictions: &[Prediction]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(PREDICTION_HEADER)?;
    for p in predictions {
        wtr.write_record([
            p.fixture_id.clone(),
            p.date.to_string(),
            p.league.clone(),
            p.home_team.clone(),
            p.away_team.clone(),
            num(p.probs.home),
            num(p.probs.draw),
            num(p.probs.away),
            opt_num(p.odds.home),
            opt_num(p.odds.draw),
            opt_num(p.odds.away),
            num(p.display_kelly.home),
            num(p.display_kelly.draw),
            num(p.display_kelly.away),
        ])?;
    }
    wtr.flush().map_err(|e| EngineError::io("predictions", e))?;
    Ok(())
}

pub fn write_predictions(path: &Path, predictions: &[Prediction]) -> Result<()> {
    write_predictions_to(create(path)?, predictions)
}

/// A predictions table row read back for staking.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub fixture_id: String,
    pub league: String,
    pub probs: Prob3,
    pub odds: Odds,
}

impl PredictionRow {
    pub fn into_candidate(self, aux: AuxSignals) -> StakeCandidate {
        StakeCandidate {
            fixture_id: self.fixture_id,
            league: self.league,
            probs: self.probs,
            odds: self.odds,
            aux,
        }
    }
}

pub fn read_predictions_from<R: Read>(reader: R) -> Result<Vec<PredictionRow>> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let cols = Columns::new(rdr.headers()?);
    for name in ["fixture_id", "ph", "pd", "pa"] {
        cols.require("predictions", name)?;
    }
    let mut out = Vec::new();
    for (row, rec) in rdr.records().enumerate() {
        let Some(rec) = decoded("predictions", row, rec)? else {
            continue;
        };
        let Some(fixture_id) = cols.get(&rec, &["fixture_id"]) else {
            tracing::warn!(row, "prediction row without fixture_id; skipped");
            continue;
        };
        let prob = |name: &str| parse_f64(cols.get(&rec, &[name])).unwrap_or(f64::NAN);
        out.push(PredictionRow {
            fixture_id: fixture_id.to_string(),
            league: cols.get(&rec, &["league"]).unwrap_or(DEFAULT_LEAGUE).to_string(),
            probs: Prob3::new(prob("ph"), prob("pd"), prob("pa")),
            odds: Odds {
                home: parse_f64(cols.get(&rec, &["oddsh", "home_odds", "home_odds_dec"])),
                draw: parse_f64(cols.get(&rec, &["oddsd", "draw_odds", "draw_odds_dec"])),
                away: parse_f64(cols.get(&rec, &["oddsa", "away_odds", "away_odds_dec"])),
            },
        });
    }
    Ok(out)
}

pub fn read_predictions(path: &Path) -> Result<Vec<PredictionRow>> {
    read_predictions_from(open(path)?)
}

pub fn write_stakes_to<W: Write>(writer: W, decisions: &[StakeDecision]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "fixture_id",
        "selection",
        "league",
        "base_kelly",
        "stake_factor",
        "final_stake",
        "reasons",
    ])?;
    for d in decisions {
        wtr.write_record([
            d.fixture_id.clone(),
            d.selection.label().to_string(),
            d.league.clone(),
            num(d.base_kelly),
            num(d.risk_factor),
            num(d.final_stake),
            d.reasons_joined(),
        ])?;
    }
    wtr.flush().map_err(|e| EngineError::io("stakes", e))?;
    Ok(())
}

pub fn write_stakes(path: &Path, decisions: &[StakeDecision]) -> Result<()> {
    write_stakes_to(create(path)?, decisions)
}

/// Accepts the detailed layout (`league, odds_bucket, ..., veto`) keeping
/// rows marked `Y`, or the compact `slice` layout
/// (`<league> :: odds_bucket=<bucket>`).
pub fn read_vetoes_from<R: Read>(reader: R) -> Result<VetoSet> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let cols = Columns::new(rdr.headers()?);
    let mut set = VetoSet::new();
    for (row, rec) in rdr.records().enumerate() {
        let Some(rec) = decoded("vetoes", row, rec)? else {
            continue;
        };
        if let Some(slice) = cols.get(&rec, &["slice"]) {
            if let Some((league, bucket)) = slice.split_once(" :: odds_bucket=") {
                set.insert(league.trim(), bucket.trim());
            }
            continue;
        }
        let (Some(league), Some(bucket)) = (cols.get(&rec, &["league"]), cols.get(&rec, &["odds_bucket"])) else {
            continue;
        };
        let vetoed = match cols.get(&rec, &["veto"]) {
            Some(flag) => flag.eq_ignore_ascii_case("y"),
            None => true,
        };
        if vetoed {
            set.insert(league, bucket);
        }
    }
    Ok(set)
}

pub fn read_vetoes(path: &Path) -> Result<VetoSet> {
    read_vetoes_from(open(path)?)
}

fn write_slices<W: Write>(writer: W, slices: &[SliceMetrics]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "variant",
        "league",
        "week",
        "odds_bucket",
        "n",
        "log_loss",
        "brier",
        "ece",
        "accuracy",
    ])?;
    for s in slices {
        wtr.write_record([
            s.variant.as_str().to_string(),
            s.league.clone(),
            s.week.clone(),
            s.odds_bucket.clone(),
            s.n.to_string(),
            na(s.log_loss),
            na(s.brier),
            na(s.ece),
            na(s.accuracy),
        ])?;
    }
    wtr.flush().map_err(|e| EngineError::io("slices", e))?;
    Ok(())
}

fn write_summary<W: Write>(writer: W, rows: &[SummaryRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "variant", "league", "folds", "n", "log_loss", "brier", "ece", "accuracy",
    ])?;
    for r in rows {
        wtr.write_record([
            r.variant.as_str().to_string(),
            r.league.clone(),
            r.folds.to_string(),
            r.n.to_string(),
            na(r.log_loss),
            na(r.brier),
            na(r.ece),
            na(r.accuracy),
        ])?;
    }
    wtr.flush().map_err(|e| EngineError::io("summary", e))?;
    Ok(())
}

/// Writes `slices.csv`, `summary.csv`, `roi_by_slice.csv` and `vetoes.csv`
/// into `dir`.
pub fn write_backtest(dir: &Path, report: &BacktestReport) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| EngineError::io(dir, e))?;
    write_slices(create(&dir.join("slices.csv"))?, &report.slices)?;
    write_summary(create(&dir.join("summary.csv"))?, &report.summary)?;

    let mut roi = csv::Writer::from_writer(create(&dir.join("roi_by_slice.csv"))?);
    roi.write_record(["league", "odds_bucket", "n_bets", "turnover", "pnl", "roi", "hit_rate"])?;
    for r in &report.roi {
        roi.write_record([
            r.league.clone(),
            r.odds_bucket.clone(),
            r.bets.to_string(),
            num(r.turnover),
            num(r.pnl),
            na(r.roi),
            na(r.hit_rate),
        ])?;
    }
    roi.flush().map_err(|e| EngineError::io(dir, e))?;

    let mut vetoes = csv::Writer::from_writer(create(&dir.join("vetoes.csv"))?);
    vetoes.write_record(["league", "odds_bucket", "n_bets", "roi", "veto"])?;
    for v in &report.vetoes {
        vetoes.write_record([
            v.league.clone(),
            v.odds_bucket.clone(),
            v.bets.to_string(),
            na(v.roi),
            v.status.as_str().to_string(),
        ])?;
    }
    vetoes.flush().map_err(|e| EngineError::io(dir, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_accepts_dec_aliases_and_datetime_dates() {
        let csv = "date,league,home_team,away_team,home_goals,away_goals,home_odds_dec,draw_odds_dec,away_odds_dec\n\
                   2024-08-10T15:00:00Z,EPL,A,B,2,1,2.1,3.4,3.6\n";
        let rows = read_history_from(csv.as_bytes()).expect("parses");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 8, 10).expect("valid date"));
        assert_eq!(rows[0].odds.home, Some(2.1));
        assert_eq!(rows[0].result, Some(FinalScore { home: 2, away: 1 }));
    }

    #[test]
    fn half_present_score_is_unresolved() {
        let csv = "date,home_team,away_team,home_goals,away_goals\n2024-01-01,A,B,1,\n";
        let rows = read_history_from(csv.as_bytes()).expect("parses");
        assert_eq!(rows[0].result, None);
        assert_eq!(rows[0].league, DEFAULT_LEAGUE);
    }

    #[test]
    fn missing_required_column_is_an_error() {
        let csv = "date,home_team,away_team,home_goals\n";
        let err = read_history_from(csv.as_bytes()).expect_err("no away_goals");
        assert!(matches!(err, EngineError::MissingColumn { .. }));
    }

    #[test]
    fn unknown_fixture_columns_are_kept() {
        let csv = "date,league,home_team,away_team,home_odds,draw_odds,away_odds,bookmaker_count,has_opening_odds,weather\n\
                   2025-03-01,EPL,Man City,Arsenal,1.9,3.6,4.2,14,0,rain\n";
        let fixtures = read_fixtures_from(csv.as_bytes()).expect("parses");
        let f = &fixtures[0];
        assert_eq!(f.fixture_id, "20250301__man_city__vs__arsenal");
        assert_eq!(f.aux.bookmaker_count, Some(14));
        assert!(!f.aux.has_opening_odds);
        assert_eq!(f.aux.extra.get("weather").map(String::as_str), Some("rain"));
    }

    #[test]
    fn undecodable_fixture_row_is_skipped() {
        let mut bytes = b"date,league,home_team,away_team\n2025-03-01,EPL,Alpha,Beta\n2025-03-01,EPL,".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(b",Delta\n2025-03-02,EPL,Gamma,Epsilon\n");
        let fixtures = read_fixtures_from(bytes.as_slice()).expect("bad row does not fail the table");
        let homes: Vec<&str> = fixtures.iter().map(|f| f.home_team.as_str()).collect();
        assert_eq!(homes, vec!["Alpha", "Gamma"]);
    }

    #[test]
    fn undecodable_history_and_prediction_rows_are_skipped() {
        let mut history = b"date,home_team,away_team,home_goals,away_goals\n".to_vec();
        history.extend_from_slice(b"2024-01-01,A,B,1,0\n2024-01-02,");
        history.extend_from_slice(&[0xc3, 0x28]);
        history.extend_from_slice(b",D,2,2\n2024-01-03,E,F,0,1\n");
        let rows = read_history_from(history.as_slice()).expect("parses");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].home_team, "E");

        let mut preds = b"fixture_id,league,pH,pD,pA\nf1,EPL,0.5,0.3,0.2\n".to_vec();
        preds.extend_from_slice(&[0xff]);
        preds.extend_from_slice(b",EPL,0.4,0.3,0.3\nf3,EPL,0.2,0.3,0.5\n");
        let rows = read_predictions_from(preds.as_slice()).expect("parses");
        let ids: Vec<&str> = rows.iter().map(|r| r.fixture_id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f3"]);
    }

    #[test]
    fn vetoes_read_both_layouts() {
        let detailed = "league,odds_bucket,n_bets,roi,veto\nEPL,<=1.8,40,-0.1,Y\nEPL,10+,5,NA,NA\n";
        let set = read_vetoes_from(detailed.as_bytes()).expect("parses");
        assert!(set.is_vetoed("EPL", "<=1.8"));
        assert!(!set.is_vetoed("EPL", "10+"));

        let compact = "slice,reason\n\"La Liga :: odds_bucket=(2.2,3.0]\",ROI -0.050 < -0.02 on 44 bets\n";
        let set = read_vetoes_from(compact.as_bytes()).expect("parses");
        assert!(set.is_vetoed("La Liga", "(2.2,3.0]"));
    }
}
