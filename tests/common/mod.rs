#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use rusqlite::{Connection, OptionalExtension, params};

pub const SEASON: i32 = 2025;

pub fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

/// `(aggregate, current_avg)` for one team metric row.
pub fn team_value(
    conn: &Connection,
    team: &str,
    category: &str,
    metric: &str,
    perspective: &str,
) -> Option<(Option<f64>, Option<f64>)> {
    conn.query_row(
        r#"
        SELECT s.aggregate, s.current_avg
        FROM team_stats s
        JOIN teams t ON t.id = s.team_id
        JOIN metric_definitions d ON d.id = s.metric_id
        JOIN metric_categories c ON c.id = d.category_id
        WHERE t.name = ?1 AND c.name = ?2 AND d.name = ?3 AND s.perspective = ?4
        "#,
        params![team, category, metric, perspective],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
    .expect("team value query")
}

pub fn player_aggregate(conn: &Connection, player: &str, metric: &str) -> Option<f64> {
    conn.query_row(
        r#"
        SELECT s.aggregate
        FROM player_stats s
        JOIN players p ON p.id = s.player_id
        JOIN metric_definitions d ON d.id = s.metric_id
        WHERE p.name = ?1 AND d.name = ?2
        "#,
        params![player, metric],
        |row| row.get::<_, Option<f64>>(0),
    )
    .optional()
    .expect("player value query")
    .flatten()
}

pub fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0))
        .expect("count query")
}

pub fn approx(actual: Option<f64>, expected: f64) -> bool {
    actual.is_some_and(|v| (v - expected).abs() < 1e-9)
}
