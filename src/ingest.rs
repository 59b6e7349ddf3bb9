//! One ingest run: season totals, roster, per-game pages, fielding.
//!
//! Every source page or endpoint is its own unit of work with its own commit.
//! A unit that cannot be fetched or parsed is skipped and reported; a store
//! failure stops the run.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use rayon::prelude::*;
use reqwest::blocking::Client;
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::http_client::{RequestHeaders, fetch_text, http_client};
use crate::merge::{self, MergeStats, PerUnitTarget};
use crate::names::{OrgAliases, normalize_individual};
use crate::positions::{group_by_identity, select_row};
use crate::registry::ReferenceRegistry;
use crate::sources::{
    self, AuthoritativeSource, FIELDING_CATEGORY, FIELDING_METRICS, FIELDING_ROLE_KEY,
    FIELDING_TEAM_KEY, PerUnitPage, SourceCatalog,
};
use crate::store::{
    self, MetricValue, Perspective, PlayerRecord, RosterPlayer, StoreError, SubjectKind,
};
use crate::table_locator::{LocatedRow, locate_rows};

#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error("fetch failed: {0:#}")]
    Transport(anyhow::Error),
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("store unavailable: {0:#}")]
    Unavailable(anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl UnitError {
    /// Store problems end the run; everything else skips the unit.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UnitError::Store(_) | UnitError::Unavailable(_))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub db_path: PathBuf,
    pub season: i32,
    pub units_total: usize,
    pub units_succeeded: usize,
    pub values_upserted: usize,
    pub derived: usize,
    pub underived: usize,
    pub backfilled: usize,
    pub players_upserted: usize,
    pub fielding_matched: usize,
    pub fielding_skipped: usize,
    pub unresolved: usize,
    pub errors: Vec<String>,
}

impl IngestSummary {
    fn absorb(&mut self, stats: &MergeStats) {
        self.values_upserted += stats.upserted;
        self.derived += stats.derived;
        self.underived += stats.underived;
        self.unresolved += stats.unresolved;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldingStats {
    pub matched: usize,
    /// Players on the page whose rows were all incompatible with the roster.
    pub skipped: usize,
    /// Page identities with no roster player.
    pub unresolved: usize,
    pub upserted: usize,
}

pub fn run_ingest(
    cfg: &IngestConfig,
    catalog: &SourceCatalog,
    aliases: &OrgAliases,
) -> Result<IngestSummary> {
    let mut conn = store::open_db(&cfg.db_path)?;
    let client = http_client()?;
    let headers = RequestHeaders {
        user_agent: &cfg.user_agent,
        referer: &cfg.referer,
    };

    let units_total = catalog.authoritative.len() + catalog.pages.len() + 2;
    let run_id = store::start_run(&conn, catalog.season, units_total)?;
    let mut summary = IngestSummary {
        db_path: cfg.db_path.clone(),
        season: catalog.season,
        units_total,
        ..IngestSummary::default()
    };
    let mut registry = ReferenceRegistry::new();

    let outcome = run_units(
        &mut conn,
        &mut registry,
        cfg,
        catalog,
        aliases,
        client,
        headers,
        &mut summary,
    );

    // Record what happened even when a store failure cut the run short.
    if let Err(err) = &outcome {
        summary.errors.push(format!("aborted: {err:#}"));
    }
    let finished = store::finish_run(
        &conn,
        run_id,
        summary.units_succeeded,
        summary.values_upserted,
        &summary.errors,
    );
    outcome?;
    finished?;

    info!(
        units = summary.units_succeeded,
        total = summary.units_total,
        values = summary.values_upserted,
        "ingest run finished"
    );
    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
fn run_units(
    conn: &mut Connection,
    registry: &mut ReferenceRegistry,
    cfg: &IngestConfig,
    catalog: &SourceCatalog,
    aliases: &OrgAliases,
    client: &Client,
    headers: RequestHeaders<'_>,
    summary: &mut IngestSummary,
) -> Result<()> {
    for src in &catalog.authoritative {
        let unit = format!("season totals ({})", src.map.category);
        let url = catalog.authoritative_url(cfg, src);
        let result = fetch_text(client, &url, headers)
            .map_err(UnitError::Transport)
            .and_then(|body| ingest_authoritative_body(conn, registry, aliases, src, &body));
        if let Some(stats) = settle(summary, &unit, result)? {
            summary.absorb(&stats);
            summary.units_succeeded += 1;
        }
    }

    let roster_url = catalog.roster_url(cfg);
    let result = fetch_text(client, &roster_url, headers)
        .map_err(UnitError::Transport)
        .and_then(|body| ingest_roster_body(conn, registry, aliases, &body));
    if let Some(count) = settle(summary, "roster", result)? {
        summary.players_upserted += count;
        summary.units_succeeded += 1;
    }

    let results = with_fetch_pool(cfg.fetch_parallelism, || {
        catalog
            .pages
            .par_iter()
            .map(|page| {
                let unit = format!("page {}", page.slug);
                (unit, run_page_unit(cfg, catalog, aliases, client, headers, page))
            })
            .collect::<Vec<_>>()
    });
    let mut fatal = None;
    for (unit, result) in results {
        match settle(summary, &unit, result) {
            Ok(Some(stats)) => {
                summary.absorb(&stats);
                summary.units_succeeded += 1;
            }
            Ok(None) => {}
            Err(err) => {
                fatal.get_or_insert(err);
            }
        }
    }
    if let Some(err) = fatal {
        return Err(err);
    }

    for src in &catalog.authoritative {
        let filled = merge::backfill_derived(conn, registry, &src.map)
            .with_context(|| format!("backfill derived totals for {}", src.map.category))?;
        summary.backfilled += filled;
    }

    let result = fetch_text(client, &cfg.fielding_url, headers)
        .map_err(UnitError::Transport)
        .and_then(|html| ingest_fielding_html(conn, registry, aliases, catalog, &html));
    if let Some(stats) = settle(summary, "fielding", result)? {
        summary.values_upserted += stats.upserted;
        summary.fielding_matched += stats.matched;
        summary.fielding_skipped += stats.skipped;
        summary.unresolved += stats.unresolved;
        summary.units_succeeded += 1;
    }
    Ok(())
}

/// Skippable failures are logged and collected; fatal ones become the error.
fn settle<T>(
    summary: &mut IngestSummary,
    unit: &str,
    result: Result<T, UnitError>,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_fatal() => Err(anyhow!("{unit}: {err}")),
        Err(err) => {
            warn!(unit, error = %err, "skipping unit");
            summary.errors.push(format!("{unit}: {err}"));
            Ok(None)
        }
    }
}

fn run_page_unit(
    cfg: &IngestConfig,
    catalog: &SourceCatalog,
    aliases: &OrgAliases,
    client: &Client,
    headers: RequestHeaders<'_>,
    page: &PerUnitPage,
) -> Result<MergeStats, UnitError> {
    let url = catalog.page_url(cfg, page);
    let html = fetch_text(client, &url, headers).map_err(UnitError::Transport)?;
    // Workers never share a connection or a cache.
    let mut conn = store::open_db(&cfg.db_path).map_err(UnitError::Unavailable)?;
    let mut registry = ReferenceRegistry::new();
    ingest_per_unit_page_html(&mut conn, &mut registry, aliases, catalog, page, &html)
}

fn with_fetch_pool<T>(threads: usize, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(action),
        Err(_) => action(),
    }
}

pub fn ingest_authoritative_body(
    conn: &mut Connection,
    registry: &mut ReferenceRegistry,
    aliases: &OrgAliases,
    src: &AuthoritativeSource,
    body: &str,
) -> Result<MergeStats, UnitError> {
    let records = merge::decode_authoritative(body, &src.map)
        .map_err(|err| UnitError::Parse(format!("{err:#}")))?;
    if records.is_empty() {
        return Err(UnitError::Parse("no season records".to_string()));
    }
    let stats = merge::merge_authoritative(conn, registry, aliases, &src.map, &records)?;
    info!(category = src.map.category, values = stats.upserted, "season totals stored");
    Ok(stats)
}

pub fn ingest_roster_body(
    conn: &mut Connection,
    registry: &mut ReferenceRegistry,
    aliases: &OrgAliases,
    body: &str,
) -> Result<usize, UnitError> {
    let entries = sources::decode_roster(body).map_err(|err| UnitError::Parse(format!("{err:#}")))?;
    if entries.is_empty() {
        return Err(UnitError::Parse("empty roster".to_string()));
    }

    let mut resolved = Vec::with_capacity(entries.len());
    for entry in &entries {
        let Some(team_id) = registry.ensure_organization(&*conn, aliases, &entry.team)? else {
            continue;
        };
        resolved.push((team_id, entry, normalize_individual(&entry.name)));
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(StoreError::from)?;
    let mut count = 0usize;
    for (team_id, entry, name_key) in &resolved {
        store::upsert_player(
            &tx,
            &PlayerRecord {
                team_id: *team_id,
                external_id: entry.external_id.as_deref(),
                name: &entry.name,
                name_key,
                position: entry.position.as_deref(),
                status: entry.status.as_deref(),
            },
        )?;
        count += 1;
    }
    tx.commit().map_err(StoreError::from)?;
    info!(players = count, "roster stored");
    Ok(count)
}

pub fn ingest_per_unit_page_html(
    conn: &mut Connection,
    registry: &mut ReferenceRegistry,
    aliases: &OrgAliases,
    catalog: &SourceCatalog,
    page: &PerUnitPage,
    html: &str,
) -> Result<MergeStats, UnitError> {
    let rows = locate_rows(html, &catalog.per_unit_query);
    if rows.is_empty() {
        return Err(UnitError::Parse(format!("no team table on {}", page.slug)));
    }
    let target = PerUnitTarget {
        category: page.category,
        label: page.label,
        opponent: page.opponent,
        marker: &catalog.perspective_marker,
        authoritative: catalog.field_map(page.category),
    };
    let stats = merge::merge_per_unit(conn, registry, aliases, &target, &rows)?;
    info!(page = page.slug, rows = rows.len(), values = stats.upserted, "per-game page stored");
    Ok(stats)
}

pub fn ingest_fielding_html(
    conn: &mut Connection,
    registry: &mut ReferenceRegistry,
    aliases: &OrgAliases,
    catalog: &SourceCatalog,
    html: &str,
) -> Result<FieldingStats, UnitError> {
    let rows = locate_rows(html, &catalog.fielding_query);
    if rows.is_empty() {
        return Err(UnitError::Parse("no player table on fielding page".to_string()));
    }

    let roster = store::load_roster(&*conn)?;
    let mut by_key: HashMap<&str, Vec<&RosterPlayer>> = HashMap::new();
    let mut by_external: HashMap<&str, &RosterPlayer> = HashMap::new();
    for player in &roster {
        by_key.entry(player.name_key.as_str()).or_default().push(player);
        if let Some(ext) = player.external_id.as_deref() {
            by_external.insert(ext, player);
        }
    }

    let category_id = registry.ensure_category(&*conn, FIELDING_CATEGORY)?;
    let mut metric_ids = Vec::with_capacity(FIELDING_METRICS.len());
    for (metric, _) in FIELDING_METRICS {
        metric_ids.push((*metric, registry.ensure_metric(&*conn, category_id, metric)?));
    }

    // A link that resolves to a roster id decides the player outright.
    let linked_ids = rows
        .iter()
        .filter_map(|row| linked_player(row, &by_external))
        .map(|player| player.id)
        .collect::<HashSet<_>>();

    let mut stats = FieldingStats::default();
    let mut writes: Vec<(i64, &LocatedRow)> = Vec::new();
    for group in group_by_identity(&rows) {
        for (linked, part) in split_by_link(&group.rows, &by_external) {
            let candidates = match linked {
                Some(player) => vec![player],
                None => {
                    let same_name = by_key.get(group.key.as_str()).map_or(&[][..], Vec::as_slice);
                    name_candidates(same_name, &part, aliases, &linked_ids)
                }
            };
            if candidates.is_empty() {
                stats.unresolved += 1;
                continue;
            }

            for player in candidates {
                let team_rows = rows_for_team(&part, aliases, &player.team_name);
                match select_row(player.position.as_deref(), &team_rows, FIELDING_ROLE_KEY) {
                    Some(row) => {
                        stats.matched += 1;
                        writes.push((player.id, row));
                    }
                    None => {
                        stats.skipped += 1;
                        warn!(
                            player = %player.name,
                            position = player.position.as_deref().unwrap_or("-"),
                            "no fielding row compatible with roster position"
                        );
                    }
                }
            }
        }
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(StoreError::from)?;
    for (player_id, row) in &writes {
        for (metric, metric_id) in &metric_ids {
            let Some(value) = row.number(metric) else {
                continue;
            };
            store::upsert_metric_value(
                &tx,
                SubjectKind::Player,
                *player_id,
                *metric_id,
                Perspective::Own,
                &MetricValue::aggregate(value),
            )?;
            stats.upserted += 1;
        }
    }
    tx.commit().map_err(StoreError::from)?;
    Ok(stats)
}

fn linked_player<'p>(
    row: &LocatedRow,
    by_external: &HashMap<&str, &'p RosterPlayer>,
) -> Option<&'p RosterPlayer> {
    let id = row.link.as_deref().and_then(sources::external_id_from_link)?;
    by_external.get(id.as_str()).copied()
}

/// Splits one name's rows by the roster player their link resolves to, in
/// first-seen order. Rows without a resolvable link share the `None` part.
fn split_by_link<'a, 'p>(
    rows: &[&'a LocatedRow],
    by_external: &HashMap<&str, &'p RosterPlayer>,
) -> Vec<(Option<&'p RosterPlayer>, Vec<&'a LocatedRow>)> {
    let mut parts: Vec<(Option<&'p RosterPlayer>, Vec<&'a LocatedRow>)> = Vec::new();
    for row in rows {
        let linked = linked_player(row, by_external);
        let id = linked.map(|p| p.id);
        match parts.iter_mut().find(|(p, _)| p.map(|p| p.id) == id) {
            Some((_, part)) => part.push(*row),
            None => parts.push((linked, vec![*row])),
        }
    }
    parts
}

/// Roster players a name-only match may use. Players claimed by a link
/// elsewhere on the page are out; several namesakes are narrowed by team.
fn name_candidates<'p>(
    same_name: &[&'p RosterPlayer],
    rows: &[&LocatedRow],
    aliases: &OrgAliases,
    linked_ids: &HashSet<i64>,
) -> Vec<&'p RosterPlayer> {
    let free = same_name
        .iter()
        .copied()
        .filter(|player| !linked_ids.contains(&player.id))
        .collect::<Vec<_>>();
    if free.len() < 2 {
        return free;
    }
    let teams = rows
        .iter()
        .filter_map(|row| row.text(FIELDING_TEAM_KEY))
        .map(|team| aliases.normalize(team))
        .collect::<Vec<_>>();
    free.into_iter()
        .filter(|player| teams.iter().any(|t| t.eq_ignore_ascii_case(&player.team_name)))
        .collect()
}

/// Narrows a player's rows to the roster team when the page names teams.
/// Rows without a team cell always stay in.
fn rows_for_team<'a>(
    rows: &[&'a LocatedRow],
    aliases: &OrgAliases,
    team_name: &str,
) -> Vec<&'a LocatedRow> {
    let filtered = rows
        .iter()
        .copied()
        .filter(|row| {
            row.text(FIELDING_TEAM_KEY)
                .is_none_or(|team| aliases.normalize(team).eq_ignore_ascii_case(team_name))
        })
        .collect::<Vec<_>>();
    // Traded players show a combined "2TM" line or the old club only.
    if filtered.is_empty() {
        rows.to_vec()
    } else {
        filtered
    }
}
