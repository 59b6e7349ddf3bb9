//! Picks the one fielding row that matches a player's roster position.
//!
//! Fielding pages list a utility player once per position played; the roster
//! holds a single position, so rows are filtered through a fixed role relation.

use std::collections::HashMap;

use crate::names::normalize_individual;
use crate::table_locator::LocatedRow;

const OUTFIELD: &[&str] = &["LF", "CF", "RF"];
const INFIELD: &[&str] = &["1B", "2B", "3B", "SS"];
const PITCHER: &[&str] = &["SP", "RP"];

fn broad_group(role: &str) -> Option<&'static [&'static str]> {
    match role {
        "OF" => Some(OUTFIELD),
        "IF" => Some(INFIELD),
        "P" => Some(PITCHER),
        _ => None,
    }
}

fn single_role_compatible(canonical: &str, reported: &str) -> bool {
    if canonical == reported {
        return true;
    }
    broad_group(canonical).is_some_and(|group| group.contains(&reported))
        || broad_group(reported).is_some_and(|group| group.contains(&canonical))
}

/// `reported` may list several roles ("LF/RF"); any one of them is enough.
pub fn roles_compatible(canonical: &str, reported: &str) -> bool {
    let canonical = canonical.trim().to_ascii_uppercase();
    if canonical == "UT" {
        return true;
    }
    reported
        .split('/')
        .map(|r| r.trim().to_ascii_uppercase())
        .filter(|r| !r.is_empty())
        .any(|r| single_role_compatible(&canonical, &r))
}

/// Rows sharing a player key, in first-seen order.
#[derive(Debug, Clone)]
pub struct IdentityGroup<'a> {
    pub key: String,
    pub rows: Vec<&'a LocatedRow>,
}

pub fn group_by_identity(rows: &[LocatedRow]) -> Vec<IdentityGroup<'_>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<IdentityGroup<'_>> = Vec::new();
    for row in rows {
        let key = normalize_individual(&row.identity);
        if key.is_empty() {
            continue;
        }
        match index.get(&key) {
            Some(idx) => out[*idx].rows.push(row),
            None => {
                index.insert(key.clone(), out.len());
                out.push(IdentityGroup {
                    key,
                    rows: vec![row],
                });
            }
        }
    }
    out
}

/// Chooses the row for a player whose roster position is `canonical`.
///
/// Without a roster position the first row wins. With one, only a compatible
/// row is accepted; `None` means the player is skipped this pass.
pub fn select_row<'a>(
    canonical: Option<&str>,
    rows: &[&'a LocatedRow],
    role_key: &str,
) -> Option<&'a LocatedRow> {
    let canonical = canonical.map(str::trim).filter(|c| !c.is_empty());
    let Some(canonical) = canonical else {
        return rows.first().copied();
    };
    rows.iter()
        .copied()
        .find(|row| roles_compatible(canonical, row.text(role_key).unwrap_or_default()))
}
