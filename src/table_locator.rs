//! Finds the data table on a stats page and maps its headers to metric keys.
//!
//! Ranking sites shuffle columns between metric pages and wrap the real table
//! in layout tables, so nothing here trusts positions: the table is picked by
//! how many wanted headers it exposes.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};

use crate::text::{clean_text, parse_number};

const DEFAULT_SENTINELS: &[&str] = &["Totals", "Total", "League Average", "League Totals"];

/// Header spellings accepted for one column, compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct Synonyms(Vec<String>);

impl Synonyms {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            items
                .into_iter()
                .map(|s| clean_text(s.as_ref()).to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    pub fn matches(&self, header: &str) -> bool {
        let needle = clean_text(header).to_lowercase();
        !needle.is_empty() && self.0.iter().any(|s| *s == needle)
    }
}

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub key: String,
    pub synonyms: Synonyms,
}

impl ColumnSpec {
    pub fn new(key: &str, synonyms: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            synonyms: Synonyms::new(synonyms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableQuery {
    pub identity: Synonyms,
    pub columns: Vec<ColumnSpec>,
    pub sentinels: Synonyms,
}

impl TableQuery {
    pub fn new(identity: &[&str], columns: Vec<ColumnSpec>) -> Self {
        Self {
            identity: Synonyms::new(identity),
            columns,
            sentinels: Synonyms::new(DEFAULT_SENTINELS),
        }
    }
}

/// One data row, keyed by canonical column key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocatedRow {
    pub identity: String,
    pub link: Option<String>,
    pub cells: BTreeMap<String, String>,
}

impl LocatedRow {
    pub fn number(&self, key: &str) -> Option<f64> {
        self.cells.get(key).and_then(|v| parse_number(v))
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.cells
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocatedTable {
    /// Number of wanted columns the table exposes.
    pub score: usize,
    pub columns: BTreeMap<String, usize>,
    pub rows: Vec<LocatedRow>,
}

pub fn locate_rows(html: &str, query: &TableQuery) -> Vec<LocatedRow> {
    locate_table(html, query)
        .map(|table| table.rows)
        .unwrap_or_default()
}

pub fn locate_table(html: &str, query: &TableQuery) -> Option<LocatedTable> {
    let sel = Selectors::new()?;
    let doc = Html::parse_document(html);

    let mut best: Option<(Vec<ElementRef<'_>>, Header)> = None;
    for table in doc.select(&sel.table) {
        let rows = direct_rows(table, &sel.row);
        let Some(header) = find_header(&rows, query) else {
            continue;
        };
        // Strictly greater, so ties keep the first table on the page.
        let better = best
            .as_ref()
            .is_none_or(|(_, current)| header.columns.len() > current.columns.len());
        if better {
            best = Some((rows, header));
        }
    }

    let (rows, header) = best?;
    let mut out = Vec::new();
    for row in rows.iter().skip(header.row_index + 1) {
        let cells = row_cells(*row);
        let Some(identity_cell) = cells.get(header.identity_col) else {
            break;
        };
        let (identity, link) = identity_text(*identity_cell, &sel.anchor);
        if identity.is_empty()
            || query.identity.matches(&identity)
            || query.sentinels.matches(&identity)
        {
            break;
        }
        let mut values = BTreeMap::new();
        for (key, idx) in &header.columns {
            if let Some(cell) = cells.get(*idx) {
                values.insert(key.clone(), cell_text(*cell));
            }
        }
        out.push(LocatedRow {
            identity,
            link,
            cells: values,
        });
    }

    Some(LocatedTable {
        score: header.columns.len(),
        columns: header.columns,
        rows: out,
    })
}

struct Selectors {
    table: Selector,
    row: Selector,
    anchor: Selector,
}

impl Selectors {
    fn new() -> Option<Self> {
        Some(Self {
            table: Selector::parse("table").ok()?,
            row: Selector::parse("tr").ok()?,
            anchor: Selector::parse("a").ok()?,
        })
    }
}

struct Header {
    row_index: usize,
    identity_col: usize,
    columns: BTreeMap<String, usize>,
}

fn find_header(rows: &[ElementRef<'_>], query: &TableQuery) -> Option<Header> {
    for (row_index, row) in rows.iter().enumerate() {
        let texts = row_cells(*row)
            .into_iter()
            .map(cell_text)
            .collect::<Vec<_>>();
        let Some(identity_col) = texts.iter().position(|t| query.identity.matches(t)) else {
            continue;
        };
        let mut columns = BTreeMap::new();
        for spec in &query.columns {
            let found = texts
                .iter()
                .enumerate()
                .find(|(idx, t)| *idx != identity_col && spec.synonyms.matches(t));
            if let Some((idx, _)) = found {
                columns.insert(spec.key.clone(), idx);
            }
        }
        return Some(Header {
            row_index,
            identity_col,
            columns,
        });
    }
    None
}

/// Rows that belong to `table` itself, not to a table nested inside it.
fn direct_rows<'a>(table: ElementRef<'a>, row_sel: &Selector) -> Vec<ElementRef<'a>> {
    table
        .select(row_sel)
        .filter(|row| {
            row.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "table")
                .is_some_and(|owner| owner.id() == table.id())
        })
        .collect()
}

fn row_cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .collect()
}

fn cell_text(cell: ElementRef<'_>) -> String {
    clean_text(&cell.text().collect::<String>())
}

fn identity_text(cell: ElementRef<'_>, anchor_sel: &Selector) -> (String, Option<String>) {
    if let Some(anchor) = cell.select(anchor_sel).next() {
        let text = clean_text(&anchor.text().collect::<String>());
        if !text.is_empty() {
            let href = anchor.value().attr("href").map(|h| h.to_string());
            return (text, href);
        }
    }
    (cell_text(cell), None)
}
