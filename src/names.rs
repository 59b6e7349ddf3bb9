//! Canonical names for teams and players.
//!
//! Teams go through a static alias table. Players get a matching key that is
//! only ever used to join rows across sources, never shown.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::text::clean_text;

/// Canonical club names with the shorthand and historical labels seen in feeds.
const MLB_TEAM_ALIASES: &[(&str, &[&str])] = &[
    ("Arizona Diamondbacks", &["ARI", "AZ", "Arizona", "D-backs", "Diamondbacks"]),
    ("Athletics", &["ATH", "OAK", "Oakland", "Oakland Athletics", "Oakland A's", "Sacramento"]),
    ("Atlanta Braves", &["ATL", "Atlanta", "Braves"]),
    ("Baltimore Orioles", &["BAL", "Baltimore", "Orioles"]),
    ("Boston Red Sox", &["BOS", "Boston", "Red Sox"]),
    ("Chicago Cubs", &["CHC", "Chi Cubs", "Chicago (NL)", "Cubs"]),
    ("Chicago White Sox", &["CHW", "CWS", "Chi White Sox", "Chicago (AL)", "White Sox"]),
    ("Cincinnati Reds", &["CIN", "Cincinnati", "Reds"]),
    ("Cleveland Guardians", &["CLE", "Cleveland", "Cleveland Indians", "Guardians"]),
    ("Colorado Rockies", &["COL", "Colorado", "Rockies"]),
    ("Detroit Tigers", &["DET", "Detroit", "Tigers"]),
    ("Houston Astros", &["HOU", "Houston", "Astros"]),
    ("Kansas City Royals", &["KC", "KCR", "Kansas City", "Royals"]),
    ("Los Angeles Angels", &["LAA", "LA Angels", "Anaheim", "Anaheim Angels", "Los Angeles Angels of Anaheim", "Angels"]),
    ("Los Angeles Dodgers", &["LAD", "LA Dodgers", "Dodgers"]),
    ("Miami Marlins", &["MIA", "Miami", "Florida Marlins", "Marlins"]),
    ("Milwaukee Brewers", &["MIL", "Milwaukee", "Brewers"]),
    ("Minnesota Twins", &["MIN", "Minnesota", "Twins"]),
    ("New York Mets", &["NYM", "NY Mets", "Mets"]),
    ("New York Yankees", &["NYY", "NY Yankees", "Yankees"]),
    ("Philadelphia Phillies", &["PHI", "Philadelphia", "Phillies"]),
    ("Pittsburgh Pirates", &["PIT", "Pittsburgh", "Pirates"]),
    ("San Diego Padres", &["SD", "SDP", "San Diego", "Padres"]),
    ("San Francisco Giants", &["SF", "SFG", "San Francisco", "SF Giants", "Giants"]),
    ("Seattle Mariners", &["SEA", "Seattle", "Mariners"]),
    ("St. Louis Cardinals", &["STL", "St Louis", "St. Louis", "Saint Louis Cardinals", "Cardinals"]),
    ("Tampa Bay Rays", &["TB", "TBR", "Tampa Bay", "Tampa Bay Devil Rays", "Rays"]),
    ("Texas Rangers", &["TEX", "Texas", "Rangers"]),
    ("Toronto Blue Jays", &["TOR", "Toronto", "Blue Jays"]),
    ("Washington Nationals", &["WSH", "WSN", "Washington", "Montreal Expos", "Nationals"]),
];

const GENERATIONAL_SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv", "v"];

#[derive(Debug, Default, Deserialize)]
struct AliasFile {
    #[serde(default)]
    teams: HashMap<String, Vec<String>>,
    #[serde(default)]
    renamed: HashMap<String, String>,
}

/// Immutable alias table for organization names.
#[derive(Debug, Clone, Default)]
pub struct OrgAliases {
    by_key: HashMap<String, String>,
}

impl OrgAliases {
    pub fn mlb_default() -> Self {
        let mut out = Self::default();
        for (canonical, aliases) in MLB_TEAM_ALIASES {
            out.insert(canonical, canonical);
            for alias in *aliases {
                out.insert(alias, canonical);
            }
        }
        out
    }

    /// Layers an alias file over the current table. Later entries win.
    ///
    /// ```json
    /// { "teams": { "Athletics": ["Las Vegas", "LV"] }, "renamed": { "Expos": "Washington Nationals" } }
    /// ```
    pub fn extend_from_json(&mut self, path: &Path) -> Result<()> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read alias file {}", path.display()))?;
        let file: AliasFile = serde_json::from_str(&raw).context("invalid alias json")?;
        for (canonical, aliases) in &file.teams {
            let canonical = clean_text(canonical);
            if canonical.is_empty() {
                continue;
            }
            self.insert(&canonical, &canonical);
            for alias in aliases {
                self.insert(alias, &canonical);
            }
        }
        for (alias, canonical) in &file.renamed {
            let canonical = clean_text(canonical);
            if !canonical.is_empty() {
                self.insert(alias, &canonical);
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, alias: &str, canonical: &str) {
        let key = alias_key(alias);
        if !key.is_empty() {
            self.by_key.insert(key, canonical.to_string());
        }
    }

    /// Maps any known spelling to its canonical name; unknown names come back
    /// cleaned but otherwise untouched.
    pub fn normalize(&self, raw: &str) -> String {
        let cleaned = clean_text(raw);
        match self.by_key.get(&cleaned.to_lowercase()) {
            Some(canonical) => canonical.clone(),
            None => cleaned,
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_key.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn alias_key(raw: &str) -> String {
    clean_text(raw).to_lowercase()
}

/// Matching key for a player name.
///
/// Runs the cleanup passes until nothing changes, so feeding a key back in
/// returns it unchanged.
pub fn normalize_individual(raw: &str) -> String {
    let mut current = individual_pass(raw);
    // Every pass either shrinks the key or leaves it alone.
    loop {
        let next = individual_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn individual_pass(raw: &str) -> String {
    let reordered = reorder_last_first(raw);
    let unsuffixed = strip_generational_suffixes(&reordered);
    let folded = strip_diacritics(&unsuffixed);
    let letters: String = folded
        .chars()
        .filter(|ch| ch.is_alphanumeric() || ch.is_whitespace())
        .collect();
    // Suffix tokens can surface only once punctuation is gone ("I.I." -> "ii").
    let lowered = strip_generational_suffixes(&letters.to_lowercase());
    let tokens = lowered
        .split_whitespace()
        .map(collapse_doubled_token)
        .collect::<Vec<_>>();

    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if out.last() != Some(&token) {
            out.push(token);
        }
    }
    strip_generational_suffixes(&out.join(" "))
}

fn reorder_last_first(raw: &str) -> String {
    let mut parts = raw.split(',');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(last), Some(first), None) => {
            let first = first.trim();
            let last = last.trim();
            if first.is_empty() {
                last.to_string()
            } else {
                format!("{first} {last}")
            }
        }
        _ => raw.to_string(),
    }
}

fn strip_generational_suffixes(raw: &str) -> String {
    let mut tokens = raw.split_whitespace().collect::<Vec<_>>();
    while tokens.len() > 1 {
        let Some(last) = tokens.last() else {
            break;
        };
        let bare = last
            .trim_matches(|ch: char| ch == '.' || ch == ',')
            .to_lowercase();
        if GENERATIONAL_SUFFIXES.contains(&bare.as_str()) {
            tokens.pop();
        } else {
            break;
        }
    }
    tokens.join(" ")
}

fn strip_diacritics(raw: &str) -> String {
    raw.nfd().filter(|ch| !is_combining_mark(*ch)).collect()
}

fn collapse_doubled_token(token: &str) -> String {
    let chars = token.chars().collect::<Vec<_>>();
    if chars.len() >= 2 && chars.len() % 2 == 0 {
        let (head, tail) = chars.split_at(chars.len() / 2);
        if head == tail {
            return head.iter().collect();
        }
    }
    token.to_string()
}
