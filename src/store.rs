use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};

const BUSY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer already committed a row with the same natural key.
    #[error("uniqueness conflict on {0}")]
    Conflict(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Natural keys of the reference entities the registry manages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NaturalKey<'a> {
    Category(&'a str),
    Metric { name: &'a str, category_id: i64 },
    Organization(&'a str),
}

impl fmt::Display for NaturalKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NaturalKey::Category(name) => write!(f, "category {name:?}"),
            NaturalKey::Metric { name, category_id } => {
                write!(f, "metric {name:?} in category {category_id}")
            }
            NaturalKey::Organization(name) => write!(f, "team {name:?}"),
        }
    }
}

/// Lookup and insert by natural key. `insert` must report a lost race as
/// [`StoreError::Conflict`] and nothing else.
pub trait ReferenceStore {
    fn find_id(&self, key: &NaturalKey<'_>) -> Result<Option<i64>, StoreError>;
    fn insert(&self, key: &NaturalKey<'_>) -> Result<i64, StoreError>;
}

impl ReferenceStore for Connection {
    fn find_id(&self, key: &NaturalKey<'_>) -> Result<Option<i64>, StoreError> {
        let id = match key {
            NaturalKey::Category(name) => self
                .query_row(
                    "SELECT id FROM metric_categories WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?,
            NaturalKey::Metric { name, category_id } => self
                .query_row(
                    "SELECT id FROM metric_definitions WHERE name = ?1 AND category_id = ?2",
                    params![name, category_id],
                    |row| row.get(0),
                )
                .optional()?,
            NaturalKey::Organization(name) => self
                .query_row(
                    "SELECT id FROM teams WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?,
        };
        Ok(id)
    }

    fn insert(&self, key: &NaturalKey<'_>) -> Result<i64, StoreError> {
        let res = match key {
            NaturalKey::Category(name) => self.execute(
                "INSERT INTO metric_categories(name) VALUES (?1)",
                params![name],
            ),
            NaturalKey::Metric { name, category_id } => self.execute(
                "INSERT INTO metric_definitions(name, category_id) VALUES (?1, ?2)",
                params![name, category_id],
            ),
            NaturalKey::Organization(name) => {
                self.execute("INSERT INTO teams(name) VALUES (?1)", params![name])
            }
        };
        match res {
            Ok(_) => Ok(self.last_insert_rowid()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict(key.to_string())),
            Err(err) => Err(err.into()),
        }
    }
}

pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => {
            code.code == ErrorCode::ConstraintViolation
                && matches!(
                    code.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create db directory {}", parent.display()))?;
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))
        .context("set sqlite busy timeout")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS metric_categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL COLLATE NOCASE UNIQUE
        );
        CREATE TABLE IF NOT EXISTS metric_definitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL COLLATE NOCASE,
            category_id INTEGER NOT NULL REFERENCES metric_categories(id),
            UNIQUE(name, category_id)
        );
        CREATE TABLE IF NOT EXISTS teams (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL COLLATE NOCASE UNIQUE
        );
        CREATE TABLE IF NOT EXISTS players (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            team_id INTEGER NOT NULL REFERENCES teams(id),
            external_id TEXT NULL UNIQUE,
            name TEXT NOT NULL,
            name_key TEXT NOT NULL,
            position TEXT NULL,
            status TEXT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_players_name_key ON players(name_key);

        CREATE TABLE IF NOT EXISTS team_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            team_id INTEGER NOT NULL REFERENCES teams(id),
            metric_id INTEGER NOT NULL REFERENCES metric_definitions(id),
            perspective TEXT NOT NULL DEFAULT 'own',
            aggregate REAL NULL,
            current_avg REAL NULL,
            last3_avg REAL NULL,
            last1_avg REAL NULL,
            home_avg REAL NULL,
            away_avg REAL NULL,
            prior_avg REAL NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(team_id, metric_id, perspective)
        );
        CREATE TABLE IF NOT EXISTS player_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            player_id INTEGER NOT NULL REFERENCES players(id),
            metric_id INTEGER NOT NULL REFERENCES metric_definitions(id),
            perspective TEXT NOT NULL DEFAULT 'own',
            aggregate REAL NULL,
            current_avg REAL NULL,
            last3_avg REAL NULL,
            last1_avg REAL NULL,
            home_avg REAL NULL,
            away_avg REAL NULL,
            prior_avg REAL NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(player_id, metric_id, perspective)
        );

        CREATE TABLE IF NOT EXISTS ingest_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            season INTEGER NOT NULL,
            units_total INTEGER NOT NULL,
            units_succeeded INTEGER NOT NULL,
            values_upserted INTEGER NOT NULL,
            errors_json TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Whose behavior a metric value describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Perspective {
    Own,
    Against,
}

impl Perspective {
    pub fn as_str(self) -> &'static str {
        match self {
            Perspective::Own => "own",
            Perspective::Against => "against",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    Team,
    Player,
}

impl SubjectKind {
    fn table(self) -> &'static str {
        match self {
            SubjectKind::Team => "team_stats",
            SubjectKind::Player => "player_stats",
        }
    }

    fn subject_column(self) -> &'static str {
        match self {
            SubjectKind::Team => "team_id",
            SubjectKind::Player => "player_id",
        }
    }
}

/// One metric value row. Absent fields never clobber stored ones on upsert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricValue {
    pub aggregate: Option<f64>,
    pub current: Option<f64>,
    pub last3: Option<f64>,
    pub last1: Option<f64>,
    pub home: Option<f64>,
    pub away: Option<f64>,
    pub prior: Option<f64>,
}

impl MetricValue {
    pub fn aggregate(value: f64) -> Self {
        Self {
            aggregate: Some(value),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub fn upsert_metric_value(
    conn: &Connection,
    kind: SubjectKind,
    subject_id: i64,
    metric_id: i64,
    perspective: Perspective,
    value: &MetricValue,
) -> Result<(), StoreError> {
    let sql = format!(
        r#"
        INSERT INTO {table} (
            {subject}, metric_id, perspective,
            aggregate, current_avg, last3_avg, last1_avg, home_avg, away_avg, prior_avg,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT({subject}, metric_id, perspective) DO UPDATE SET
            aggregate = COALESCE(excluded.aggregate, aggregate),
            current_avg = COALESCE(excluded.current_avg, current_avg),
            last3_avg = COALESCE(excluded.last3_avg, last3_avg),
            last1_avg = COALESCE(excluded.last1_avg, last1_avg),
            home_avg = COALESCE(excluded.home_avg, home_avg),
            away_avg = COALESCE(excluded.away_avg, away_avg),
            prior_avg = COALESCE(excluded.prior_avg, prior_avg),
            updated_at = excluded.updated_at
        "#,
        table = kind.table(),
        subject = kind.subject_column(),
    );
    conn.execute(
        &sql,
        params![
            subject_id,
            metric_id,
            perspective.as_str(),
            value.aggregate,
            value.current,
            value.last3,
            value.last1,
            value.home,
            value.away,
            value.prior,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn load_metric_value(
    conn: &Connection,
    kind: SubjectKind,
    subject_id: i64,
    metric_id: i64,
    perspective: Perspective,
) -> Result<Option<MetricValue>, StoreError> {
    let sql = format!(
        "SELECT aggregate, current_avg, last3_avg, last1_avg, home_avg, away_avg, prior_avg
         FROM {table}
         WHERE {subject} = ?1 AND metric_id = ?2 AND perspective = ?3",
        table = kind.table(),
        subject = kind.subject_column(),
    );
    let value = conn
        .query_row(
            &sql,
            params![subject_id, metric_id, perspective.as_str()],
            |row| {
                Ok(MetricValue {
                    aggregate: row.get(0)?,
                    current: row.get(1)?,
                    last3: row.get(2)?,
                    last1: row.get(3)?,
                    home: row.get(4)?,
                    away: row.get(5)?,
                    prior: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(value)
}

/// Team stat rows of a category that carry a current-period average.
#[derive(Debug, Clone)]
pub struct AverageRow {
    pub team_id: i64,
    pub metric_id: i64,
    pub metric_name: String,
    pub perspective: Perspective,
    pub current: f64,
}

pub fn team_average_rows(conn: &Connection, category_id: i64) -> Result<Vec<AverageRow>, StoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT s.team_id, s.metric_id, d.name, s.perspective, s.current_avg
        FROM team_stats s
        JOIN metric_definitions d ON d.id = s.metric_id
        WHERE d.category_id = ?1 AND s.current_avg IS NOT NULL
        ORDER BY s.team_id, d.name, s.perspective
        "#,
    )?;
    let rows = stmt.query_map(params![category_id], |row| {
        let perspective: String = row.get(3)?;
        Ok(AverageRow {
            team_id: row.get(0)?,
            metric_id: row.get(1)?,
            metric_name: row.get(2)?,
            perspective: if perspective == "against" {
                Perspective::Against
            } else {
                Perspective::Own
            },
            current: row.get(4)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn set_team_aggregate(
    conn: &Connection,
    team_id: i64,
    metric_id: i64,
    perspective: Perspective,
    aggregate: f64,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE team_stats SET aggregate = ?1, updated_at = ?2
         WHERE team_id = ?3 AND metric_id = ?4 AND perspective = ?5",
        params![
            aggregate,
            Utc::now().to_rfc3339(),
            team_id,
            metric_id,
            perspective.as_str()
        ],
    )?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PlayerRecord<'a> {
    pub team_id: i64,
    pub external_id: Option<&'a str>,
    pub name: &'a str,
    pub name_key: &'a str,
    pub position: Option<&'a str>,
    pub status: Option<&'a str>,
}

/// Upserts by external id when there is one, otherwise by name key within the
/// team. Returns the player row id.
pub fn upsert_player(conn: &Connection, player: &PlayerRecord<'_>) -> Result<i64, StoreError> {
    let now = Utc::now().to_rfc3339();
    if let Some(external_id) = player.external_id {
        let id = conn.query_row(
            r#"
            INSERT INTO players (team_id, external_id, name, name_key, position, status, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(external_id) DO UPDATE SET
                team_id = excluded.team_id,
                name = excluded.name,
                name_key = excluded.name_key,
                position = COALESCE(excluded.position, position),
                status = COALESCE(excluded.status, status),
                updated_at = excluded.updated_at
            RETURNING id
            "#,
            params![
                player.team_id,
                external_id,
                player.name,
                player.name_key,
                player.position,
                player.status,
                now
            ],
            |row| row.get(0),
        )?;
        return Ok(id);
    }

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM players WHERE team_id = ?1 AND name_key = ?2 ORDER BY id LIMIT 1",
            params![player.team_id, player.name_key],
            |row| row.get(0),
        )
        .optional()?;
    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE players
                 SET name = ?1,
                     position = COALESCE(?2, position),
                     status = COALESCE(?3, status),
                     updated_at = ?4
                 WHERE id = ?5",
                params![player.name, player.position, player.status, now, id],
            )?;
            Ok(id)
        }
        None => {
            conn.execute(
                "INSERT INTO players (team_id, external_id, name, name_key, position, status, updated_at)
                 VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6)",
                params![
                    player.team_id,
                    player.name,
                    player.name_key,
                    player.position,
                    player.status,
                    now
                ],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }
}

#[derive(Debug, Clone)]
pub struct RosterPlayer {
    pub id: i64,
    pub team_id: i64,
    pub team_name: String,
    pub external_id: Option<String>,
    pub name: String,
    pub name_key: String,
    pub position: Option<String>,
}

pub fn load_roster(conn: &Connection) -> Result<Vec<RosterPlayer>, StoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT p.id, p.team_id, t.name, p.external_id, p.name, p.name_key, p.position
        FROM players p
        JOIN teams t ON t.id = p.team_id
        ORDER BY p.id
        "#,
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(RosterPlayer {
            id: row.get(0)?,
            team_id: row.get(1)?,
            team_name: row.get(2)?,
            external_id: row.get(3)?,
            name: row.get(4)?,
            name_key: row.get(5)?,
            position: row.get(6)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn start_run(conn: &Connection, season: i32, units_total: usize) -> Result<i64> {
    conn.execute(
        "INSERT INTO ingest_runs(started_at, finished_at, season, units_total, units_succeeded, values_upserted, errors_json)
         VALUES (?1, NULL, ?2, ?3, 0, 0, '[]')",
        params![Utc::now().to_rfc3339(), season, units_total as i64],
    )
    .context("insert ingest run")?;
    Ok(conn.last_insert_rowid())
}

pub fn finish_run(
    conn: &Connection,
    run_id: i64,
    units_succeeded: usize,
    values_upserted: usize,
    errors: &[String],
) -> Result<()> {
    let errors_json = serde_json::to_string(errors).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "UPDATE ingest_runs
         SET finished_at = ?1, units_succeeded = ?2, values_upserted = ?3, errors_json = ?4
         WHERE run_id = ?5",
        params![
            Utc::now().to_rfc3339(),
            units_succeeded as i64,
            values_upserted as i64,
            errors_json,
            run_id
        ],
    )
    .context("update ingest run")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_db_reports_an_unusable_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, b"not a directory").expect("write");
        let err = open_db(&blocker.join("stats.db")).expect_err("parent is a file");
        assert!(format!("{err:#}").contains("create db directory"));
    }

    #[test]
    fn duplicate_insert_reports_conflict() {
        let conn = open_in_memory().expect("db");
        let key = NaturalKey::Category("Team Batting");
        let id = conn.insert(&key).expect("first insert");
        let err = conn.insert(&key).expect_err("second insert must conflict");
        assert!(err.is_conflict());
        assert_eq!(conn.find_id(&key).expect("find"), Some(id));
    }

    #[test]
    fn category_lookup_is_case_insensitive() {
        let conn = open_in_memory().expect("db");
        let id = conn.insert(&NaturalKey::Category("Team Batting")).expect("insert");
        let found = conn
            .find_id(&NaturalKey::Category("team batting"))
            .expect("find");
        assert_eq!(found, Some(id));
    }

    #[test]
    fn upsert_keeps_prior_values_when_new_fields_absent() {
        let conn = open_in_memory().expect("db");
        let category = conn.insert(&NaturalKey::Category("Team Batting")).expect("cat");
        let metric = conn
            .insert(&NaturalKey::Metric {
                name: "R",
                category_id: category,
            })
            .expect("metric");
        let team = conn.insert(&NaturalKey::Organization("Toronto Blue Jays")).expect("team");

        upsert_metric_value(&conn, SubjectKind::Team, team, metric, Perspective::Own, &MetricValue::aggregate(700.0))
            .expect("aggregate");
        let averages = MetricValue {
            current: Some(4.5),
            home: Some(4.8),
            ..MetricValue::default()
        };
        upsert_metric_value(&conn, SubjectKind::Team, team, metric, Perspective::Own, &averages)
            .expect("averages");

        let stored = load_metric_value(&conn, SubjectKind::Team, team, metric, Perspective::Own)
            .expect("load")
            .expect("row");
        assert_eq!(stored.aggregate, Some(700.0));
        assert_eq!(stored.current, Some(4.5));
        assert_eq!(stored.home, Some(4.8));
        assert_eq!(stored.away, None);
    }

    #[test]
    fn player_upsert_by_external_id_is_idempotent() {
        let conn = open_in_memory().expect("db");
        let team = conn.insert(&NaturalKey::Organization("Toronto Blue Jays")).expect("team");
        let record = PlayerRecord {
            team_id: team,
            external_id: Some("666182"),
            name: "Bo Bichette",
            name_key: "bo bichette",
            position: Some("SS"),
            status: Some("Active"),
        };
        let first = upsert_player(&conn, &record).expect("first");
        let second = upsert_player(&conn, &PlayerRecord { position: None, ..record.clone() })
            .expect("second");
        assert_eq!(first, second);
        let roster = load_roster(&conn).expect("roster");
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].position.as_deref(), Some("SS"));
    }
}
