mod common;

use statline::ingest::{FieldingStats, ingest_fielding_html, ingest_roster_body};
use statline::names::OrgAliases;
use statline::registry::ReferenceRegistry;
use statline::sources::SourceCatalog;
use statline::store::open_in_memory;

use common::{SEASON, approx, count, player_aggregate, read_fixture};

fn ingest_fixtures() -> (rusqlite::Connection, FieldingStats) {
    let mut conn = open_in_memory().expect("db");
    let mut registry = ReferenceRegistry::new();
    let aliases = OrgAliases::mlb_default();
    let catalog = SourceCatalog::mlb(SEASON);

    ingest_roster_body(&mut conn, &mut registry, &aliases, &read_fixture("roster.json"))
        .expect("roster");
    let stats = ingest_fielding_html(
        &mut conn,
        &mut registry,
        &aliases,
        &catalog,
        &read_fixture("fielding.html"),
    )
    .expect("fielding");
    (conn, stats)
}

#[test]
fn every_compatible_player_gets_one_row() {
    let (_, stats) = ingest_fixtures();
    assert_eq!(
        stats,
        FieldingStats {
            matched: 7,
            skipped: 1,
            unresolved: 1,
            upserted: 56,
        }
    );
}

#[test]
fn specific_position_picks_its_own_row() {
    let (conn, _) = ingest_fixtures();
    // Listed in left first; the roster says center.
    assert!(approx(player_aggregate(&conn, "Daulton Varsho", "G"), 110.0));
    assert!(approx(player_aggregate(&conn, "Daulton Varsho", "FPCT"), 0.993));
}

#[test]
fn broad_outfield_role_skips_infield_rows() {
    let (conn, _) = ingest_fixtures();
    assert!(approx(player_aggregate(&conn, "George Springer", "G"), 90.0));
    assert!(approx(player_aggregate(&conn, "George Springer", "INN"), 760.0));
}

#[test]
fn utility_player_takes_the_first_row() {
    let (conn, _) = ingest_fixtures();
    assert!(approx(player_aggregate(&conn, "Davis Schneider", "G"), 40.0));
}

#[test]
fn incompatible_player_is_left_alone() {
    let (conn, _) = ingest_fixtures();
    let rows = count(
        &conn,
        "SELECT COUNT(*) FROM player_stats s JOIN players p ON p.id = s.player_id
         WHERE p.name = 'Alejandro Kirk'",
    );
    assert_eq!(rows, 0);
}

#[test]
fn names_match_across_accents_and_suffixes() {
    let (conn, _) = ingest_fixtures();
    assert!(approx(player_aggregate(&conn, "José Berríos", "G"), 32.0));
    assert!(approx(player_aggregate(&conn, "Vladimir Guerrero Jr.", "PO"), 1150.0));
    assert!(approx(player_aggregate(&conn, "Rafael Devers", "E"), 18.0));
}

#[test]
fn fielding_metrics_live_in_their_own_category() {
    let (conn, _) = ingest_fixtures();
    let categories = count(
        &conn,
        "SELECT COUNT(DISTINCT c.id) FROM player_stats s
         JOIN metric_definitions d ON d.id = s.metric_id
         JOIN metric_categories c ON c.id = d.category_id
         WHERE c.name = 'Player Fielding'",
    );
    assert_eq!(categories, 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM players"), 8);
}

const NAMESAKES: &str = r#"{"people": [
    {"id": 669257, "fullName": "Will Smith", "currentTeam": {"name": "Los Angeles Dodgers"}, "primaryPosition": {"abbreviation": "C"}},
    {"id": 519293, "fullName": "Will Smith", "currentTeam": {"name": "Texas Rangers"}}
]}"#;

fn fielding_for_namesakes(html: &str) -> (rusqlite::Connection, FieldingStats) {
    let mut conn = open_in_memory().expect("db");
    let mut registry = ReferenceRegistry::new();
    let aliases = OrgAliases::mlb_default();
    let catalog = SourceCatalog::mlb(SEASON);
    ingest_roster_body(&mut conn, &mut registry, &aliases, NAMESAKES).expect("roster");
    let stats =
        ingest_fielding_html(&mut conn, &mut registry, &aliases, &catalog, html).expect("fielding");
    (conn, stats)
}

fn stat_rows(conn: &rusqlite::Connection) -> Vec<(String, String, f64)> {
    let mut stmt = conn
        .prepare(
            "SELECT p.external_id, d.name, s.aggregate FROM player_stats s
             JOIN players p ON p.id = s.player_id
             JOIN metric_definitions d ON d.id = s.metric_id
             ORDER BY p.external_id, d.name",
        )
        .expect("prepare");
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("rows")
}

#[test]
fn linked_id_beats_a_shared_name() {
    let html = r#"<table>
        <tr><th>Player</th><th>Tm</th><th>Pos</th><th>G</th><th>PO</th></tr>
        <tr><td><a href="/player/669257/will-smith">Will Smith</a></td><td>LAD</td><td>C</td><td>120</td><td>900</td></tr>
    </table>"#;
    let (conn, stats) = fielding_for_namesakes(html);

    assert_eq!(stats.matched, 1);
    assert_eq!(
        stat_rows(&conn),
        vec![
            ("669257".to_string(), "G".to_string(), 120.0),
            ("669257".to_string(), "PO".to_string(), 900.0),
        ]
    );
}

#[test]
fn shared_name_without_a_linked_id_is_narrowed_by_team() {
    let html = r#"<table>
        <tr><th>Player</th><th>Tm</th><th>Pos</th><th>G</th><th>PO</th></tr>
        <tr><td><a href="/players/s/smithwi05.shtml">Will Smith</a></td><td>TEX</td><td>P</td><td>60</td><td>4</td></tr>
    </table>"#;
    let (conn, stats) = fielding_for_namesakes(html);

    assert_eq!(stats.matched, 1);
    assert_eq!(
        stat_rows(&conn),
        vec![
            ("519293".to_string(), "G".to_string(), 60.0),
            ("519293".to_string(), "PO".to_string(), 4.0),
        ]
    );
}
