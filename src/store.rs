//! SQLite copy of the match history. Rows keep their first-insert order so
//! same-date matches replay the same way every time.

use std::path::Path;

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, params};

use crate::artifacts::TrainedArtifacts;
use crate::error::{EngineError, Result};
use crate::records::{CompetitionBucket, FinalScore, MatchRecord, Odds};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRun {
    pub fingerprint: String,
    pub rows_total: usize,
    pub rows_resolved: usize,
    pub rows_with_market: usize,
    pub global_weight: f64,
    pub league_overrides: usize,
    pub model_only_leagues: usize,
    pub calibrated_leagues: usize,
}

impl From<&TrainedArtifacts> for TrainingRun {
    fn from(a: &TrainedArtifacts) -> Self {
        Self {
            fingerprint: a.fingerprint.clone(),
            rows_total: a.rows_total,
            rows_resolved: a.rows_resolved,
            rows_with_market: a.rows_with_market,
            global_weight: a.blend.global,
            league_overrides: a.blend.leagues.len(),
            model_only_leagues: a.blend.model_only.len(),
            calibrated_leagues: a.calibrators.leagues.len(),
        }
    }
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    }
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS matches (
            row_id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            league TEXT NOT NULL,
            competition TEXT NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            home_goals INTEGER,
            away_goals INTEGER,
            home_odds REAL,
            draw_odds REAL,
            away_odds REAL,
            updated_at TEXT NOT NULL,
            UNIQUE(date, league, home_team, away_team)
        );
        CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(date, row_id);
        CREATE INDEX IF NOT EXISTS idx_matches_league ON matches(league, date);

        CREATE TABLE IF NOT EXISTS training_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            rows_total INTEGER NOT NULL,
            rows_resolved INTEGER NOT NULL,
            rows_with_market INTEGER NOT NULL,
            global_weight REAL NOT NULL,
            league_overrides INTEGER NOT NULL,
            model_only_leagues INTEGER NOT NULL,
            calibrated_leagues INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

/// Inserts new matches and refreshes scores and prices of known ones.
/// A known match keeps its `row_id`.
pub fn upsert_matches(conn: &mut Connection, matches: &[MatchRecord]) -> Result<UpsertSummary> {
    let now = Utc::now().to_rfc3339();
    let before = count_matches(conn)?;
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            r#"
            INSERT INTO matches (
                date, league, competition, home_team, away_team,
                home_goals, away_goals, home_odds, draw_odds, away_odds, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(date, league, home_team, away_team) DO UPDATE SET
                competition = excluded.competition,
                home_goals = excluded.home_goals,
                away_goals = excluded.away_goals,
                home_odds = excluded.home_odds,
                draw_odds = excluded.draw_odds,
                away_odds = excluded.away_odds,
                updated_at = excluded.updated_at
            "#,
        )?;
        for m in matches {
            let (hg, ag) = match m.result {
                Some(s) => (Some(i64::from(s.home)), Some(i64::from(s.away))),
                None => (None, None),
            };
            stmt.execute(params![
                m.date.format("%Y-%m-%d").to_string(),
                m.league,
                m.competition.as_str(),
                m.home_team,
                m.away_team,
                hg,
                ag,
                m.odds.home,
                m.odds.draw,
                m.odds.away,
                now,
            ])?;
        }
    }
    tx.commit()?;
    let after = count_matches(conn)?;
    let inserted = after.saturating_sub(before);
    let summary = UpsertSummary {
        inserted,
        updated: matches.len().saturating_sub(inserted),
    };
    tracing::info!(
        inserted = summary.inserted,
        updated = summary.updated,
        "history upserted"
    );
    Ok(summary)
}

pub fn count_matches(conn: &Connection) -> Result<usize> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM matches", [], |row| row.get(0))?;
    Ok(usize::try_from(n).unwrap_or(0))
}

struct RawMatch {
    row_id: i64,
    date: String,
    league: String,
    competition: String,
    home_team: String,
    away_team: String,
    home_goals: Option<i64>,
    away_goals: Option<i64>,
    odds: Odds,
}

/// Full history in replay order, `row` renumbered from zero.
pub fn load_history(conn: &Connection) -> Result<Vec<MatchRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT
            row_id, date, league, competition, home_team, away_team,
            home_goals, away_goals, home_odds, draw_odds, away_odds
        FROM matches
        ORDER BY date ASC, row_id ASC
        "#,
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(RawMatch {
            row_id: row.get(0)?,
            date: row.get(1)?,
            league: row.get(2)?,
            competition: row.get(3)?,
            home_team: row.get(4)?,
            away_team: row.get(5)?,
            home_goals: row.get(6)?,
            away_goals: row.get(7)?,
            odds: Odds {
                home: row.get(8)?,
                draw: row.get(9)?,
                away: row.get(10)?,
            },
        })
    })?;

    let mut out = Vec::new();
    for raw in rows {
        let raw = raw?;
        let date = NaiveDate::parse_from_str(&raw.date, "%Y-%m-%d").map_err(|e| {
            EngineError::InvalidRow {
                row: usize::try_from(raw.row_id).unwrap_or(0),
                reason: format!("bad stored date {:?}: {e}", raw.date),
            }
        })?;
        let result = match (raw.home_goals, raw.away_goals) {
            (Some(h), Some(a)) => match (u32::try_from(h), u32::try_from(a)) {
                (Ok(home), Ok(away)) => Some(FinalScore { home, away }),
                _ => None,
            },
            _ => None,
        };
        let competition = CompetitionBucket::from_tag(&raw.competition)
            .unwrap_or_else(|| CompetitionBucket::from_league_name(&raw.league));
        out.push(MatchRecord {
            row: out.len(),
            date,
            league: raw.league,
            competition,
            home_team: raw.home_team,
            away_team: raw.away_team,
            result,
            odds: raw.odds,
        });
    }
    Ok(out)
}

pub fn record_training_run(conn: &Connection, run: &TrainingRun) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO training_runs (
            created_at, fingerprint, rows_total, rows_resolved,
            rows_with_market, global_weight, league_overrides,
            model_only_leagues, calibrated_leagues
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            Utc::now().to_rfc3339(),
            run.fingerprint,
            run.rows_total as i64,
            run.rows_resolved as i64,
            run.rows_with_market as i64,
            run.global_weight,
            run.league_overrides as i64,
            run.model_only_leagues as i64,
            run.calibrated_leagues as i64,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn latest_training_fingerprint(conn: &Connection) -> Result<Option<String>> {
    let mut stmt =
        conn.prepare("SELECT fingerprint FROM training_runs ORDER BY run_id DESC LIMIT 1")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(date: &str, home: &str, away: &str, result: Option<(u32, u32)>) -> MatchRecord {
        MatchRecord {
            row: 0,
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("date"),
            league: "Premier League".to_string(),
            competition: CompetitionBucket::Domestic,
            home_team: home.to_string(),
            away_team: away.to_string(),
            result: result.map(|(home, away)| FinalScore { home, away }),
            odds: Odds::new(2.0, 3.4, 4.0),
        }
    }

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn upsert_keeps_insert_order_within_a_date() {
        let mut conn = memory_db();
        let batch = vec![
            record("2024-03-02", "Zeta", "Alpha", Some((1, 0))),
            record("2024-03-02", "Beta", "Gamma", Some((2, 2))),
            record("2024-03-01", "Delta", "Eps", None),
        ];
        let summary = upsert_matches(&mut conn, &batch).expect("upsert");
        assert_eq!(summary, UpsertSummary { inserted: 3, updated: 0 });

        let loaded = load_history(&conn).expect("load");
        let order: Vec<&str> = loaded.iter().map(|m| m.home_team.as_str()).collect();
        assert_eq!(order, ["Delta", "Zeta", "Beta"]);
        assert!(loaded.iter().enumerate().all(|(i, m)| m.row == i));
        assert_eq!(loaded[0].result, None);
        assert_eq!(loaded[2].result, Some(FinalScore { home: 2, away: 2 }));
    }

    #[test]
    fn reingest_updates_score_without_moving_row() {
        let mut conn = memory_db();
        upsert_matches(
            &mut conn,
            &[
                record("2024-03-02", "Zeta", "Alpha", None),
                record("2024-03-02", "Beta", "Gamma", None),
            ],
        )
        .expect("first");
        let summary = upsert_matches(&mut conn, &[record("2024-03-02", "Zeta", "Alpha", Some((0, 3)))])
            .expect("second");
        assert_eq!(summary, UpsertSummary { inserted: 0, updated: 1 });

        let loaded = load_history(&conn).expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].home_team, "Zeta");
        assert_eq!(loaded[0].result, Some(FinalScore { home: 0, away: 3 }));
    }

    #[test]
    fn training_runs_are_logged() {
        let conn = memory_db();
        assert_eq!(latest_training_fingerprint(&conn).expect("query"), None);
        let run = TrainingRun {
            fingerprint: "abc".to_string(),
            rows_total: 10,
            rows_resolved: 8,
            rows_with_market: 6,
            global_weight: 0.85,
            league_overrides: 1,
            model_only_leagues: 0,
            calibrated_leagues: 2,
        };
        record_training_run(&conn, &run).expect("insert");
        record_training_run(
            &conn,
            &TrainingRun {
                fingerprint: "def".to_string(),
                ..run
            },
        )
        .expect("insert");
        assert_eq!(
            latest_training_fingerprint(&conn).expect("query").as_deref(),
            Some("def")
        );
    }

    #[test]
    fn open_db_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a").join("history.sqlite");
        let conn = open_db(&path).expect("open");
        assert_eq!(count_matches(&conn).expect("count"), 0);
        assert!(path.exists());
    }
}
