//! What each upstream source looks like: JSON field names, ranking page slugs
//! and the header spellings used to find columns. Built once per run.

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::config::IngestConfig;
use crate::merge::{FieldMap, columns};
use crate::table_locator::{ColumnSpec, TableQuery};

pub const TEAM_BATTING: FieldMap = FieldMap {
    category: "Team Batting",
    subject_field: "teamName",
    unit_count_field: "gamesPlayed",
    fields: &[
        ("atBats", "AB"),
        ("plateAppearances", "PA"),
        ("runs", "R"),
        ("hits", "H"),
        ("doubles", "2B"),
        ("triples", "3B"),
        ("homeRuns", "HR"),
        ("rbi", "RBI"),
        ("baseOnBalls", "BB"),
        ("strikeOuts", "SO"),
        ("stolenBases", "SB"),
        ("caughtStealing", "CS"),
        ("leftOnBase", "LOB"),
        ("avg", "AVG"),
        ("obp", "OBP"),
        ("slg", "SLG"),
        ("ops", "OPS"),
    ],
};

pub const TEAM_PITCHING: FieldMap = FieldMap {
    category: "Team Pitching",
    subject_field: "teamName",
    unit_count_field: "gamesPlayed",
    fields: &[
        ("inningsPitched", "IP"),
        ("wins", "W"),
        ("losses", "L"),
        ("saves", "SV"),
        ("hits", "H"),
        ("runs", "R"),
        ("earnedRuns", "ER"),
        ("homeRuns", "HR"),
        ("baseOnBalls", "BB"),
        ("strikeOuts", "SO"),
        ("era", "ERA"),
        ("whip", "WHIP"),
        ("avg", "AVG"),
    ],
};

/// Season-totals endpoint and the stats group it is requested with.
#[derive(Debug, Clone, Copy)]
pub struct AuthoritativeSource {
    pub map: FieldMap,
    pub group: &'static str,
}

/// One per-game ranking page; `label` carries the opponent marker when
/// `opponent` is set.
#[derive(Debug, Clone, Copy)]
pub struct PerUnitPage {
    pub slug: &'static str,
    pub category: &'static str,
    pub label: &'static str,
    pub opponent: bool,
}

const PER_UNIT_PAGES: &[PerUnitPage] = &[
    PerUnitPage { slug: "runs-per-game", category: "Team Batting", label: "R", opponent: false },
    PerUnitPage { slug: "hits-per-game", category: "Team Batting", label: "H", opponent: false },
    PerUnitPage { slug: "singles-per-game", category: "Team Batting", label: "S", opponent: false },
    PerUnitPage { slug: "doubles-per-game", category: "Team Batting", label: "2B", opponent: false },
    PerUnitPage { slug: "home-runs-per-game", category: "Team Batting", label: "HR", opponent: false },
    PerUnitPage { slug: "walks-per-game", category: "Team Batting", label: "BB", opponent: false },
    PerUnitPage { slug: "strikeouts-per-game", category: "Team Batting", label: "SO", opponent: false },
    PerUnitPage { slug: "total-bases-per-game", category: "Team Batting", label: "TB", opponent: false },
    PerUnitPage { slug: "hit-by-pitch-per-game", category: "Team Batting", label: "HBP", opponent: false },
    PerUnitPage { slug: "opponent-runs-per-game", category: "Team Batting", label: "OR", opponent: true },
    PerUnitPage { slug: "opponent-hits-per-game", category: "Team Batting", label: "OH", opponent: true },
    PerUnitPage { slug: "opponent-singles-per-game", category: "Team Batting", label: "OS", opponent: true },
    PerUnitPage { slug: "opponent-home-runs-per-game", category: "Team Batting", label: "OHR", opponent: true },
    PerUnitPage { slug: "strikeouts-per-game-pitching", category: "Team Pitching", label: "SO", opponent: false },
    PerUnitPage { slug: "walks-per-game-pitching", category: "Team Pitching", label: "BB", opponent: false },
    PerUnitPage { slug: "earned-runs-per-game", category: "Team Pitching", label: "ER", opponent: false },
];

pub const FIELDING_CATEGORY: &str = "Player Fielding";
pub const FIELDING_ROLE_KEY: &str = "pos";
pub const FIELDING_TEAM_KEY: &str = "team";
/// Column key and metric abbreviation are the same for fielding stats.
pub const FIELDING_METRICS: &[(&str, &[&str])] = &[
    ("G", &["G", "Games"]),
    ("GS", &["GS"]),
    ("INN", &["Inn", "INN", "Innings"]),
    ("PO", &["PO", "Putouts"]),
    ("A", &["A", "Assists"]),
    ("E", &["E", "Errors"]),
    ("DP", &["DP"]),
    ("FPCT", &["FPCT", "Fld%", "FP"]),
];

#[derive(Debug, Clone)]
pub struct SourceCatalog {
    pub season: i32,
    pub authoritative: Vec<AuthoritativeSource>,
    pub pages: Vec<PerUnitPage>,
    pub perspective_marker: String,
    pub per_unit_query: TableQuery,
    pub fielding_query: TableQuery,
}

impl SourceCatalog {
    pub fn mlb(season: i32) -> Self {
        Self {
            season,
            authoritative: vec![
                AuthoritativeSource {
                    map: TEAM_BATTING,
                    group: "hitting",
                },
                AuthoritativeSource {
                    map: TEAM_PITCHING,
                    group: "pitching",
                },
            ],
            pages: PER_UNIT_PAGES.to_vec(),
            perspective_marker: "O".to_string(),
            per_unit_query: per_unit_query(season),
            fielding_query: fielding_query(),
        }
    }

    pub fn field_map(&self, category: &str) -> Option<&FieldMap> {
        self.authoritative
            .iter()
            .map(|src| &src.map)
            .find(|map| map.category.eq_ignore_ascii_case(category))
    }

    pub fn page(&self, slug: &str) -> Option<&PerUnitPage> {
        self.pages.iter().find(|p| p.slug == slug)
    }

    pub fn authoritative_url(&self, cfg: &IngestConfig, src: &AuthoritativeSource) -> String {
        format!(
            "{}/teams/stats?season={}&group={}&stats=season&sportIds=1",
            cfg.stats_api.trim_end_matches('/'),
            self.season,
            src.group
        )
    }

    pub fn roster_url(&self, cfg: &IngestConfig) -> String {
        format!(
            "{}/sports/1/players?season={}",
            cfg.stats_api.trim_end_matches('/'),
            self.season
        )
    }

    pub fn page_url(&self, cfg: &IngestConfig, page: &PerUnitPage) -> String {
        format!("{}/{}", cfg.rankings_base.trim_end_matches('/'), page.slug)
    }
}

fn per_unit_query(season: i32) -> TableQuery {
    let current = season.to_string();
    let prior = (season - 1).to_string();
    TableQuery::new(
        &["Team"],
        vec![
            ColumnSpec::new(columns::CURRENT, &[current.as_str(), "Current", "This Season"]),
            ColumnSpec::new(columns::LAST3, &["Last 3", "L3"]),
            ColumnSpec::new(columns::LAST1, &["Last 1", "L1"]),
            ColumnSpec::new(columns::HOME, &["Home"]),
            ColumnSpec::new(columns::AWAY, &["Away"]),
            ColumnSpec::new(columns::PRIOR, &[prior.as_str(), "Prior", "Last Season"]),
        ],
    )
}

fn fielding_query() -> TableQuery {
    let mut cols = vec![
        ColumnSpec::new(FIELDING_ROLE_KEY, &["Pos", "Position"]),
        ColumnSpec::new(FIELDING_TEAM_KEY, &["Team", "Tm"]),
    ];
    cols.extend(
        FIELDING_METRICS
            .iter()
            .map(|(key, synonyms)| ColumnSpec::new(key, synonyms)),
    );
    TableQuery::new(&["Player", "Name"], cols)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub external_id: Option<String>,
    pub name: String,
    pub team: String,
    pub position: Option<String>,
    pub status: Option<String>,
}

/// Decodes the roster feed. Entries without a name or team are dropped.
pub fn decode_roster(raw: &str) -> Result<Vec<RosterEntry>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let v: Value = serde_json::from_str(trimmed).context("invalid roster json")?;
    let items = v
        .as_array()
        .or_else(|| v.get("people").and_then(|x| x.as_array()))
        .ok_or_else(|| anyhow!("roster payload is not an array"))?;

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let name = item
            .get("fullName")
            .or_else(|| item.get("name"))
            .and_then(|x| x.as_str())
            .map(str::trim)
            .unwrap_or_default();
        let team = item
            .get("teamName")
            .or_else(|| item.get("currentTeam").and_then(|t| t.get("name")))
            .and_then(|x| x.as_str())
            .map(str::trim)
            .unwrap_or_default();
        if name.is_empty() || team.is_empty() {
            continue;
        }
        let external_id = item.get("id").and_then(id_string);
        let position = item
            .get("position")
            .or_else(|| item.get("primaryPosition"))
            .and_then(|p| p.as_str().or_else(|| p.get("abbreviation").and_then(|x| x.as_str())))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let status = item
            .get("status")
            .and_then(|s| s.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        out.push(RosterEntry {
            external_id,
            name: name.to_string(),
            team: team.to_string(),
            position,
            status,
        });
    }
    Ok(out)
}

fn id_string(v: &Value) -> Option<String> {
    if let Some(n) = v.as_u64() {
        return Some(n.to_string());
    }
    let s = v.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Player id from a profile link such as `/players/b/bichebo01.shtml` or
/// `/player/666182/bo-bichette` or `?id=666182`.
pub fn external_id_from_link(href: &str) -> Option<String> {
    if let Some((_, query)) = href.split_once('?') {
        for pair in query.split('&') {
            if let Some(id) = pair.strip_prefix("id=").or_else(|| pair.strip_prefix("playerid=")) {
                let id = id.trim();
                if !id.is_empty() {
                    return Some(id.to_string());
                }
            }
        }
    }
    let path = href.split(['?', '#']).next().unwrap_or_default();
    let segments = path.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>();
    if let Some(numeric) = segments
        .iter()
        .find(|s| s.chars().all(|ch| ch.is_ascii_digit()))
    {
        return Some(numeric.to_string());
    }
    let last = segments.last()?;
    let stem = last.strip_suffix(".shtml").or_else(|| last.strip_suffix(".html"))?;
    (!stem.is_empty()).then(|| stem.to_string())
}
