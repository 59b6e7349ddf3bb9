//! Reconciles season totals with per-game splits.
//!
//! The JSON feed owns `aggregate`; ranking pages own the average columns. A
//! metric that only the ranking pages publish gets its aggregate derived from
//! games played once that count is on file.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, TransactionBehavior};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::names::OrgAliases;
use crate::registry::ReferenceRegistry;
use crate::store::{
    self, MetricValue, Perspective, StoreError, SubjectKind, load_metric_value,
    upsert_metric_value,
};
use crate::table_locator::LocatedRow;
use crate::text::parse_number;

/// Games played, stored as the aggregate of this metric in each category.
pub const UNIT_COUNT_METRIC: &str = "G";
pub const DERIVED_PRECISION: i32 = 2;

/// JSON field names of one authoritative endpoint and the metric each feeds.
#[derive(Debug, Clone, Copy)]
pub struct FieldMap {
    pub category: &'static str,
    pub subject_field: &'static str,
    pub unit_count_field: &'static str,
    pub fields: &'static [(&'static str, &'static str)],
}

impl FieldMap {
    pub fn metric_for(&self, field: &str) -> Option<&'static str> {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, metric)| *metric)
    }

    /// True when the feed publishes an exact total for `metric`.
    pub fn covers(&self, metric: &str) -> bool {
        metric.eq_ignore_ascii_case(UNIT_COUNT_METRIC)
            || self
                .fields
                .iter()
                .any(|(_, m)| m.eq_ignore_ascii_case(metric))
    }

    /// The feed only reports a club's own totals, never what it allowed.
    pub fn holds_total(&self, metric: &str, perspective: Perspective) -> bool {
        perspective == Perspective::Own && self.covers(metric)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthoritativeRecord {
    pub subject: String,
    pub unit_count: Option<f64>,
    pub totals: BTreeMap<String, f64>,
}

pub fn decode_authoritative(raw: &str, map: &FieldMap) -> Result<Vec<AuthoritativeRecord>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let v: Value = serde_json::from_str(trimmed).context("invalid season totals json")?;
    let items = v
        .as_array()
        .or_else(|| v.get("stats").and_then(|x| x.as_array()))
        .ok_or_else(|| anyhow!("season totals payload is not an array"))?;

    let mut flat = Vec::with_capacity(items.len());
    for item in items {
        match item.get("splits").and_then(|x| x.as_array()) {
            Some(splits) => flat.extend(splits.iter().filter_map(|s| flatten_split(s, map))),
            None => flat.extend(item.as_object().cloned()),
        }
    }

    let mut out = Vec::with_capacity(flat.len());
    for obj in &flat {
        let Some(subject) = obj
            .get(map.subject_field)
            .and_then(|x| x.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            continue;
        };
        let unit_count = obj.get(map.unit_count_field).and_then(as_f64_any);
        let mut totals = BTreeMap::new();
        for (field, value) in obj {
            let Some(metric) = map.metric_for(field) else {
                continue;
            };
            if let Some(n) = as_f64_any(value) {
                totals.insert(metric.to_string(), n);
            }
        }
        out.push(AuthoritativeRecord {
            subject: subject.to_string(),
            unit_count,
            totals,
        });
    }
    Ok(out)
}

/// The stats API nests each team as `{"team": {"name"}, "stat": {...}}`.
fn flatten_split(split: &Value, map: &FieldMap) -> Option<Map<String, Value>> {
    let mut obj = split.get("stat")?.as_object()?.clone();
    if let Some(name) = split.get("team").and_then(|t| t.get("name")) {
        obj.entry(map.subject_field.to_string())
            .or_insert_with(|| name.clone());
    }
    Some(obj)
}

fn as_f64_any(v: &Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return n.is_finite().then_some(n);
    }
    parse_number(v.as_str()?)
}

/// Column keys a per-game ranking page is mapped onto.
pub mod columns {
    pub const CURRENT: &str = "current";
    pub const LAST3: &str = "last3";
    pub const LAST1: &str = "last1";
    pub const HOME: &str = "home";
    pub const AWAY: &str = "away";
    pub const PRIOR: &str = "prior";
}

pub fn unit_averages(row: &LocatedRow) -> MetricValue {
    MetricValue {
        aggregate: None,
        current: row.number(columns::CURRENT),
        last3: row.number(columns::LAST3),
        last1: row.number(columns::LAST1),
        home: row.number(columns::HOME),
        away: row.number(columns::AWAY),
        prior: row.number(columns::PRIOR),
    }
}

/// A page label split into the shared metric name and its perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricLabel {
    pub base: String,
    pub perspective: Perspective,
}

impl MetricLabel {
    /// Opponent pages carry `marker` in front of the base name ("OR" for
    /// runs allowed); the marker is only stripped on pages flagged opponent so
    /// names like "OBP" survive untouched elsewhere.
    pub fn parse(label: &str, opponent: bool, marker: &str) -> Self {
        let label = label.trim();
        if opponent {
            if let Some(base) = label.strip_prefix(marker).filter(|b| !b.is_empty()) {
                return Self {
                    base: base.to_string(),
                    perspective: Perspective::Against,
                };
            }
            return Self {
                base: label.to_string(),
                perspective: Perspective::Against,
            };
        }
        Self {
            base: label.to_string(),
            perspective: Perspective::Own,
        }
    }
}

pub fn derive_aggregate(unit_count: Option<f64>, current: Option<f64>) -> Option<f64> {
    let units = unit_count.filter(|n| *n > 0.0)?;
    let avg = current?;
    Some(round_to(units * avg, DERIVED_PRECISION))
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub upserted: usize,
    pub unresolved: usize,
    pub derived: usize,
    pub underived: usize,
}

/// Writes one season-totals payload. Teams and metrics are resolved first,
/// then every value lands in one transaction.
pub fn merge_authoritative(
    conn: &mut Connection,
    registry: &mut ReferenceRegistry,
    aliases: &OrgAliases,
    map: &FieldMap,
    records: &[AuthoritativeRecord],
) -> Result<MergeStats, StoreError> {
    let mut stats = MergeStats::default();
    let category_id = registry.ensure_category(&*conn, map.category)?;
    let unit_metric_id = registry.ensure_metric(&*conn, category_id, UNIT_COUNT_METRIC)?;

    let mut metric_ids: HashMap<String, i64> = HashMap::new();
    let mut writes: Vec<(i64, i64, MetricValue)> = Vec::new();
    for record in records {
        let Some(team_id) = registry.ensure_organization(&*conn, aliases, &record.subject)? else {
            stats.unresolved += 1;
            continue;
        };
        if let Some(units) = record.unit_count {
            writes.push((team_id, unit_metric_id, MetricValue::aggregate(units)));
        }
        for (metric, value) in &record.totals {
            let metric_id = match metric_ids.get(metric) {
                Some(id) => *id,
                None => {
                    let id = registry.ensure_metric(&*conn, category_id, metric)?;
                    metric_ids.insert(metric.clone(), id);
                    id
                }
            };
            writes.push((team_id, metric_id, MetricValue::aggregate(*value)));
        }
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for (team_id, metric_id, value) in &writes {
        upsert_metric_value(&tx, SubjectKind::Team, *team_id, *metric_id, Perspective::Own, value)?;
        stats.upserted += 1;
    }
    tx.commit()?;
    Ok(stats)
}

/// Where a per-game page writes.
#[derive(Debug, Clone, Copy)]
pub struct PerUnitTarget<'a> {
    pub category: &'a str,
    pub label: &'a str,
    pub opponent: bool,
    pub marker: &'a str,
    /// Field map of the same category, if the JSON feed covers it.
    pub authoritative: Option<&'a FieldMap>,
}

pub fn merge_per_unit(
    conn: &mut Connection,
    registry: &mut ReferenceRegistry,
    aliases: &OrgAliases,
    target: &PerUnitTarget<'_>,
    rows: &[LocatedRow],
) -> Result<MergeStats, StoreError> {
    let mut stats = MergeStats::default();
    let label = MetricLabel::parse(target.label, target.opponent, target.marker);
    let category_id = registry.ensure_category(&*conn, target.category)?;
    let metric_id = registry.ensure_metric(&*conn, category_id, &label.base)?;
    let unit_metric_id = registry.ensure_metric(&*conn, category_id, UNIT_COUNT_METRIC)?;
    let derive = !target
        .authoritative
        .is_some_and(|map| map.holds_total(&label.base, label.perspective));

    let mut writes: Vec<(i64, MetricValue)> = Vec::new();
    for row in rows {
        let Some(team_id) = registry.ensure_organization(&*conn, aliases, &row.identity)? else {
            stats.unresolved += 1;
            continue;
        };
        let mut value = unit_averages(row);
        if value.is_empty() {
            debug!(team = %row.identity, metric = %label.base, "row has no usable averages");
            continue;
        }
        if derive {
            let units = load_metric_value(
                &*conn,
                SubjectKind::Team,
                team_id,
                unit_metric_id,
                Perspective::Own,
            )?
            .and_then(|v| v.aggregate);
            value.aggregate = derive_aggregate(units, value.current);
            if value.aggregate.is_some() {
                stats.derived += 1;
            } else {
                stats.underived += 1;
                warn!(
                    team = %row.identity,
                    metric = %label.base,
                    games = ?units,
                    "games played unknown, leaving season total empty"
                );
            }
        }
        writes.push((team_id, value));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for (team_id, value) in &writes {
        upsert_metric_value(&tx, SubjectKind::Team, *team_id, metric_id, label.perspective, value)?;
        stats.upserted += 1;
    }
    tx.commit()?;
    Ok(stats)
}

/// Fills derived totals for per-game-only metrics whose averages were stored
/// before games played was known. Returns the number of rows updated.
pub fn backfill_derived(
    conn: &mut Connection,
    registry: &mut ReferenceRegistry,
    map: &FieldMap,
) -> Result<usize, StoreError> {
    let category_id = registry.ensure_category(&*conn, map.category)?;
    let unit_metric_id = registry.ensure_metric(&*conn, category_id, UNIT_COUNT_METRIC)?;
    let rows = store::team_average_rows(&*conn, category_id)?;

    let mut games: HashMap<i64, Option<f64>> = HashMap::new();
    let mut updates = Vec::new();
    for row in rows
        .iter()
        .filter(|r| !map.holds_total(&r.metric_name, r.perspective))
    {
        let units = match games.get(&row.team_id) {
            Some(units) => *units,
            None => {
                let units = load_metric_value(
                    &*conn,
                    SubjectKind::Team,
                    row.team_id,
                    unit_metric_id,
                    Perspective::Own,
                )?
                .and_then(|v| v.aggregate);
                games.insert(row.team_id, units);
                units
            }
        };
        if let Some(aggregate) = derive_aggregate(units, Some(row.current)) {
            updates.push((row, aggregate));
        }
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for (row, aggregate) in &updates {
        store::set_team_aggregate(&tx, row.team_id, row.metric_id, row.perspective, *aggregate)?;
    }
    tx.commit()?;
    Ok(updates.len())
}
