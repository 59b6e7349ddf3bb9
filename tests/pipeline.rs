mod common;

use rusqlite::Connection;

use statline::ingest::{
    UnitError, ingest_authoritative_body, ingest_per_unit_page_html, ingest_roster_body,
};
use statline::merge::{MergeStats, backfill_derived};
use statline::names::OrgAliases;
use statline::registry::ReferenceRegistry;
use statline::sources::{SourceCatalog, TEAM_BATTING};
use statline::store::open_in_memory;

use common::{SEASON, approx, count, read_fixture, team_value};

struct Harness {
    conn: Connection,
    registry: ReferenceRegistry,
    aliases: OrgAliases,
    catalog: SourceCatalog,
}

impl Harness {
    fn new() -> Self {
        Self {
            conn: open_in_memory().expect("db"),
            registry: ReferenceRegistry::new(),
            aliases: OrgAliases::mlb_default(),
            catalog: SourceCatalog::mlb(SEASON),
        }
    }

    fn totals(&mut self, index: usize, fixture: &str) -> MergeStats {
        let src = self.catalog.authoritative[index];
        ingest_authoritative_body(
            &mut self.conn,
            &mut self.registry,
            &self.aliases,
            &src,
            &read_fixture(fixture),
        )
        .expect("season totals ingest")
    }

    fn page_html(&mut self, slug: &str, html: &str) -> Result<MergeStats, UnitError> {
        let page = *self.catalog.page(slug).expect("known slug");
        ingest_per_unit_page_html(
            &mut self.conn,
            &mut self.registry,
            &self.aliases,
            &self.catalog,
            &page,
            html,
        )
    }

    fn page(&mut self, slug: &str, fixture: &str) -> MergeStats {
        self.page_html(slug, &read_fixture(fixture))
            .expect("per-game page ingest")
    }
}

#[test]
fn per_game_page_derives_season_total_from_games_played() {
    let mut h = Harness::new();
    h.totals(0, "season_hitting.json");
    let stats = h.page("singles-per-game", "singles_per_game.html");

    assert_eq!(stats.upserted, 3);
    assert_eq!(stats.derived, 2);
    assert_eq!(stats.underived, 1);

    let (aggregate, current) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "S", "own").expect("row");
    assert!(approx(current, 4.5));
    assert!(approx(aggregate, 675.0));

    let (aggregate, _) =
        team_value(&h.conn, "Boston Red Sox", "Team Batting", "S", "own").expect("row");
    assert!(approx(aggregate, 619.1));

    // No season totals for Seattle: averages land, the total waits.
    let (aggregate, current) =
        team_value(&h.conn, "Seattle Mariners", "Team Batting", "S", "own").expect("row");
    assert_eq!(aggregate, None);
    assert!(approx(current, 3.8));
}

#[test]
fn decoy_and_trailing_rows_never_become_teams() {
    let mut h = Harness::new();
    h.page("singles-per-game", "singles_per_game.html");
    assert_eq!(count(&h.conn, "SELECT COUNT(*) FROM teams"), 3);
    assert_eq!(
        count(&h.conn, "SELECT COUNT(*) FROM teams WHERE name = 'Colorado Rockies'"),
        0
    );
}

#[test]
fn season_totals_win_over_per_game_rows() {
    let mut h = Harness::new();
    h.totals(0, "season_hitting.json");
    let stats = h.page("runs-per-game", "runs_per_game.html");
    assert_eq!(stats.derived, 0);

    let (aggregate, current) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "R", "own").expect("row");
    assert!(approx(aggregate, 720.0));
    assert!(approx(current, 4.8));
}

#[test]
fn opponent_page_shares_the_metric_definition() {
    let mut h = Harness::new();
    h.page("runs-per-game", "runs_per_game.html");
    h.page("opponent-runs-per-game", "opponent_runs_per_game.html");

    let definitions = count(
        &h.conn,
        "SELECT COUNT(*) FROM metric_definitions d
         JOIN metric_categories c ON c.id = d.category_id
         WHERE c.name = 'Team Batting' AND d.name IN ('R', 'OR')",
    );
    assert_eq!(definitions, 1);

    let rows = count(
        &h.conn,
        "SELECT COUNT(*) FROM team_stats s
         JOIN teams t ON t.id = s.team_id
         JOIN metric_definitions d ON d.id = s.metric_id
         WHERE t.name = 'Toronto Blue Jays' AND d.name = 'R'",
    );
    assert_eq!(rows, 2);

    let (_, own) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "R", "own").expect("own");
    let (_, against) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "R", "against").expect("against");
    assert!(approx(own, 4.8));
    assert!(approx(against, 3.9));
}

#[test]
fn same_abbreviation_stays_separate_per_category() {
    let mut h = Harness::new();
    h.totals(0, "season_hitting.json");
    h.totals(1, "season_pitching.json");

    let definitions = count(
        &h.conn,
        "SELECT COUNT(*) FROM metric_definitions WHERE name = 'SO'",
    );
    assert_eq!(definitions, 2);

    let (batting, _) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "SO", "own").expect("batting");
    let (pitching, _) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Pitching", "SO", "own").expect("pitching");
    assert!(approx(batting, 1100.0));
    assert!(approx(pitching, 1380.0));
}

#[test]
fn repeating_a_run_changes_nothing() {
    let mut h = Harness::new();
    h.totals(0, "season_hitting.json");
    h.page("singles-per-game", "singles_per_game.html");
    let rows_before = count(&h.conn, "SELECT COUNT(*) FROM team_stats");
    let defs_before = count(&h.conn, "SELECT COUNT(*) FROM metric_definitions");

    h.totals(0, "season_hitting.json");
    h.page("singles-per-game", "singles_per_game.html");

    assert_eq!(count(&h.conn, "SELECT COUNT(*) FROM team_stats"), rows_before);
    assert_eq!(count(&h.conn, "SELECT COUNT(*) FROM metric_definitions"), defs_before);
    assert_eq!(count(&h.conn, "SELECT COUNT(*) FROM teams"), 3);
    let (aggregate, _) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "S", "own").expect("row");
    assert!(approx(aggregate, 675.0));
}

#[test]
fn missing_cells_keep_stored_values() {
    let mut h = Harness::new();
    h.page("singles-per-game", "singles_per_game.html");

    let sparse = r#"<table>
        <tr><th>Team</th><th>2025</th><th>Home</th></tr>
        <tr><td>Toronto</td><td>4.6</td><td>--</td></tr>
    </table>"#;
    h.page_html("singles-per-game", sparse).expect("sparse page");

    let (_, current) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "S", "own").expect("row");
    assert!(approx(current, 4.6));
    let home: Option<f64> = h
        .conn
        .query_row(
            "SELECT s.home_avg FROM team_stats s JOIN teams t ON t.id = s.team_id
             JOIN metric_definitions d ON d.id = s.metric_id
             WHERE t.name = 'Toronto Blue Jays' AND d.name = 'S'",
            [],
            |row| row.get(0),
        )
        .expect("home");
    assert!(approx(home, 4.8));
}

#[test]
fn totals_arriving_late_are_backfilled() {
    let mut h = Harness::new();
    let stats = h.page("singles-per-game", "singles_per_game.html");
    assert_eq!(stats.derived, 0);
    assert_eq!(stats.underived, 3);

    h.totals(0, "season_hitting.json");
    let filled = backfill_derived(&mut h.conn, &mut h.registry, &TEAM_BATTING).expect("backfill");
    assert_eq!(filled, 2);

    let (aggregate, _) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "S", "own").expect("row");
    assert!(approx(aggregate, 675.0));
    // Covered metrics keep the feed's totals.
    let (runs, _) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "R", "own").expect("runs");
    assert!(approx(runs, 720.0));
}

#[test]
fn opponent_totals_are_derived_even_when_the_feed_covers_the_metric() {
    let mut h = Harness::new();
    h.totals(0, "season_hitting.json");
    let stats = h.page("opponent-runs-per-game", "opponent_runs_per_game.html");
    assert_eq!(stats.derived, 2);

    let (against, current) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "R", "against").expect("against");
    assert!(approx(current, 3.9));
    assert!(approx(against, 585.0));
    let (own, _) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "R", "own").expect("own");
    assert!(approx(own, 720.0));
}

#[test]
fn opponent_totals_are_backfilled_once_games_are_known() {
    let mut h = Harness::new();
    h.page("opponent-runs-per-game", "opponent_runs_per_game.html");
    h.totals(0, "season_hitting.json");
    backfill_derived(&mut h.conn, &mut h.registry, &TEAM_BATTING).expect("backfill");

    let (against, _) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "R", "against").expect("against");
    assert!(approx(against, 585.0));
    let (own, _) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "R", "own").expect("own");
    assert!(approx(own, 720.0));
}

#[test]
fn failed_page_leaves_earlier_pages_committed() {
    let mut h = Harness::new();
    h.page("singles-per-game", "singles_per_game.html");
    let rows_before = count(&h.conn, "SELECT COUNT(*) FROM team_stats");

    let err = h
        .page_html("runs-per-game", "<html><body>maintenance</body></html>")
        .expect_err("no table");
    assert!(matches!(err, UnitError::Parse(_)));

    assert_eq!(count(&h.conn, "SELECT COUNT(*) FROM team_stats"), rows_before);
    let (_, current) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "S", "own").expect("row");
    assert!(approx(current, 4.5));
}

#[test]
fn page_without_a_table_is_a_parse_failure() {
    let mut h = Harness::new();
    let err = h
        .page_html("runs-per-game", "<html><body><p>Access denied</p></body></html>")
        .expect_err("no table");
    assert!(matches!(err, UnitError::Parse(_)));
    assert!(!err.is_fatal());
    assert_eq!(count(&h.conn, "SELECT COUNT(*) FROM teams"), 0);
}

#[test]
fn roster_is_upserted_once_per_player() {
    let mut h = Harness::new();
    let raw = read_fixture("roster.json");
    let first = ingest_roster_body(&mut h.conn, &mut h.registry, &h.aliases, &raw).expect("roster");
    let second =
        ingest_roster_body(&mut h.conn, &mut h.registry, &h.aliases, &raw).expect("roster again");

    assert_eq!(first, 8);
    assert_eq!(second, 8);
    assert_eq!(count(&h.conn, "SELECT COUNT(*) FROM players"), 8);
    assert_eq!(count(&h.conn, "SELECT COUNT(*) FROM teams"), 2);
    assert_eq!(
        count(
            &h.conn,
            "SELECT COUNT(*) FROM players WHERE name_key = 'vladimir guerrero'"
        ),
        1
    );
}

#[test]
fn toronto_singles_scenario() {
    let mut h = Harness::new();
    let src = h.catalog.authoritative[0];
    ingest_authoritative_body(
        &mut h.conn,
        &mut h.registry,
        &h.aliases,
        &src,
        r#"[{"teamName": "Toronto Blue Jays", "gamesPlayed": 150, "atBats": "5000"}]"#,
    )
    .expect("season totals");

    let html = r#"<table>
        <tr><th>Rank</th><th>Team</th><th>2025</th><th>Last 3</th><th>Last 1</th><th>Home</th><th>Away</th><th>2024</th></tr>
        <tr><td>1</td><td>Toronto Blue Jays</td><td>4.5</td><td>4.2</td><td>5.0</td><td>4.8</td><td>4.1</td><td>4.3</td></tr>
    </table>"#;
    h.page_html("singles-per-game", html).expect("page");

    let (aggregate, current) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "S", "own").expect("row");
    assert!(approx(current, 4.5));
    assert!(approx(aggregate, 675.0));
    let (at_bats, _) =
        team_value(&h.conn, "Toronto Blue Jays", "Team Batting", "AB", "own").expect("at bats");
    assert!(approx(at_bats, 5000.0));
}
