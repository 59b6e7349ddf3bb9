mod common;

use statline::merge::columns;
use statline::sources::{FIELDING_ROLE_KEY, FIELDING_TEAM_KEY, SourceCatalog};
use statline::table_locator::{ColumnSpec, TableQuery, locate_rows, locate_table};

use common::{SEASON, read_fixture};

#[test]
fn widest_table_wins_over_decoys() {
    let catalog = SourceCatalog::mlb(SEASON);
    let html = read_fixture("singles_per_game.html");
    let table = locate_table(&html, &catalog.per_unit_query).expect("table");

    assert_eq!(table.score, 6);
    let identities = table
        .rows
        .iter()
        .map(|row| row.identity.as_str())
        .collect::<Vec<_>>();
    assert_eq!(identities, vec!["Toronto", "Boston", "Seattle"]);
}

#[test]
fn row_cells_follow_headers_not_positions() {
    let catalog = SourceCatalog::mlb(SEASON);
    let rows = locate_rows(&read_fixture("singles_per_game.html"), &catalog.per_unit_query);

    let toronto = &rows[0];
    assert_eq!(toronto.link.as_deref(), Some("/mlb/team/toronto-blue-jays"));
    assert_eq!(toronto.number(columns::CURRENT), Some(4.5));
    assert_eq!(toronto.number(columns::LAST3), Some(4.2));
    assert_eq!(toronto.number(columns::LAST1), Some(5.0));
    assert_eq!(toronto.number(columns::HOME), Some(4.8));
    assert_eq!(toronto.number(columns::AWAY), Some(4.1));
    assert_eq!(toronto.number(columns::PRIOR), Some(4.3));

    let seattle = &rows[2];
    assert_eq!(seattle.number(columns::LAST3), None);
    assert_eq!(seattle.number(columns::CURRENT), Some(3.8));
}

#[test]
fn prior_season_column_moves_with_the_season() {
    // Next season the "2025" header is the prior year.
    let catalog = SourceCatalog::mlb(SEASON + 1);
    let rows = locate_rows(&read_fixture("singles_per_game.html"), &catalog.per_unit_query);
    assert_eq!(rows[0].number(columns::PRIOR), Some(4.5));
    assert_eq!(rows[0].number(columns::CURRENT), None);
}

#[test]
fn fielding_rows_keep_links_and_roles() {
    let catalog = SourceCatalog::mlb(SEASON);
    let rows = locate_rows(&read_fixture("fielding.html"), &catalog.fielding_query);

    assert_eq!(rows.len(), 12);
    assert_eq!(rows[0].identity, "Bo Bichette");
    assert_eq!(rows[0].link.as_deref(), Some("/players/b/bichebo01.shtml"));
    assert_eq!(rows[0].text(FIELDING_ROLE_KEY), Some("SS"));
    assert_eq!(rows[0].text(FIELDING_TEAM_KEY), Some("TOR"));
    assert_eq!(rows[0].number("INN"), Some(1201.1));
    assert_eq!(rows[0].number("FPCT"), Some(0.979));
    assert!(rows.iter().all(|row| row.identity != "League Totals"));
}

#[test]
fn five_of_five_beats_three_of_five() {
    let query = TableQuery::new(
        &["Team"],
        ["a", "b", "c", "d", "e"]
            .iter()
            .map(|h| ColumnSpec::new(h, &[h.to_uppercase().as_str()]))
            .collect(),
    );
    let html = r#"
        <table><tr><th>Team</th><th>A</th><th>B</th><th>C</th></tr>
               <tr><td>Partial</td><td>1</td><td>2</td><td>3</td></tr></table>
        <table><tr><th>Team</th><th>A</th><th>B</th><th>C</th><th>D</th><th>E</th></tr>
               <tr><td>Full</td><td>1</td><td>2</td><td>3</td><td>4</td><td>5</td></tr></table>"#;
    let table = locate_table(html, &query).expect("table");
    assert_eq!(table.score, 5);
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows[0].identity, "Full");
    assert_eq!(table.rows[0].number("e"), Some(5.0));
}
