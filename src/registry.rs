//! Get-or-create for categories, metric definitions and teams.
//!
//! Safe to run from several workers at once without a lock: the store's
//! uniqueness constraint picks one winner and losers re-read the winner's row.

use std::collections::HashMap;

use tracing::debug;

use crate::names::OrgAliases;
use crate::store::{NaturalKey, ReferenceStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Category(String),
    Metric(String, i64),
    Organization(String),
}

impl CacheKey {
    fn of(key: &NaturalKey<'_>) -> Self {
        match key {
            NaturalKey::Category(name) => CacheKey::Category(name.to_lowercase()),
            NaturalKey::Metric { name, category_id } => {
                CacheKey::Metric(name.to_lowercase(), *category_id)
            }
            NaturalKey::Organization(name) => CacheKey::Organization(name.to_lowercase()),
        }
    }
}

#[derive(Debug, Default)]
pub struct ReferenceRegistry {
    cache: HashMap<CacheKey, i64>,
    created: usize,
    conflicts: usize,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_id<S>(&mut self, store: &S, key: &NaturalKey<'_>) -> Result<i64, StoreError>
    where
        S: ReferenceStore + ?Sized,
    {
        let cache_key = CacheKey::of(key);
        if let Some(id) = self.cache.get(&cache_key) {
            return Ok(*id);
        }

        let id = match store.find_id(key)? {
            Some(id) => id,
            None => match store.insert(key) {
                Ok(id) => {
                    self.created += 1;
                    debug!(%key, id, "created reference row");
                    id
                }
                Err(StoreError::Conflict(what)) => {
                    self.conflicts += 1;
                    debug!(%key, "lost insert race, re-reading");
                    store.find_id(key)?.ok_or(StoreError::Conflict(what))?
                }
                Err(err) => return Err(err),
            },
        };
        self.cache.insert(cache_key, id);
        Ok(id)
    }

    pub fn ensure_category<S>(&mut self, store: &S, name: &str) -> Result<i64, StoreError>
    where
        S: ReferenceStore + ?Sized,
    {
        self.ensure_id(store, &NaturalKey::Category(name))
    }

    pub fn ensure_metric<S>(
        &mut self,
        store: &S,
        category_id: i64,
        name: &str,
    ) -> Result<i64, StoreError>
    where
        S: ReferenceStore + ?Sized,
    {
        self.ensure_id(store, &NaturalKey::Metric { name, category_id })
    }

    /// Resolves a raw team label through the alias table first, so every
    /// spelling of a club lands on one row.
    pub fn ensure_organization<S>(
        &mut self,
        store: &S,
        aliases: &OrgAliases,
        raw_name: &str,
    ) -> Result<Option<i64>, StoreError>
    where
        S: ReferenceStore + ?Sized,
    {
        let canonical = aliases.normalize(raw_name);
        if canonical.is_empty() {
            return Ok(None);
        }
        self.ensure_id(store, &NaturalKey::Organization(&canonical))
            .map(Some)
    }

    /// Rows this registry inserted itself.
    pub fn created(&self) -> usize {
        self.created
    }

    /// Inserts that lost to a concurrent writer and were recovered.
    pub fn conflicts(&self) -> usize {
        self.conflicts
    }
}
