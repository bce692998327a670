use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;

use log::{debug, info, warn};
use serde::Serialize;

use crate::data::model::{DecodedResult, FileRecord};
use crate::error::{Result, SpmError};

pub const DEFAULT_CACHE_CAPACITY: usize = 20;

// ---------------------------------------------------------------------------
// Cache diagnostics
// ---------------------------------------------------------------------------

/// Snapshot of one manager's cache state and counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheDiagnostics {
    pub cache_size: usize,
    pub max_cache_size: usize,
    pub cached_keys: Vec<String>,
    /// Least-recently-used first.
    pub access_order: Vec<String>,
    pub load_count: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
}

// ---------------------------------------------------------------------------
// TypeManager – registry + bounded LRU cache + analyzer memoization
// ---------------------------------------------------------------------------

/// Manages every registered file of one dataset kind: file records, lazily
/// decoded results in a bounded LRU cache, and one memoized analyzer per
/// cached key.
///
/// The manager is kind-agnostic; the session passes in the decode and
/// analyzer-construction closures selected at registration time, so there is
/// no runtime type probing.
pub struct TypeManager<P, A> {
    label: &'static str,
    capacity: usize,
    records: BTreeMap<String, FileRecord>,
    cache: HashMap<String, DecodedResult<P>>,
    analyzers: HashMap<String, A>,
    /// LRU bookkeeping, least-recently-used first.
    access_order: Vec<String>,
    load_count: u64,
    hit_count: u64,
    miss_count: u64,
}

impl<P, A> TypeManager<P, A> {
    pub fn new(label: &'static str, capacity: usize) -> Self {
        TypeManager {
            label,
            capacity: capacity.max(1),
            records: BTreeMap::new(),
            cache: HashMap::new(),
            analyzers: HashMap::new(),
            access_order: Vec::new(),
            load_count: 0,
            hit_count: 0,
            miss_count: 0,
        }
    }

    pub fn register(&mut self, key: &str, record: FileRecord) {
        debug!("{}: registered '{key}' ({})", self.label, record.kind);
        self.records.insert(key.to_string(), record);
    }

    pub fn has_file(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    pub fn record(&self, key: &str) -> Option<&FileRecord> {
        self.records.get(key)
    }

    pub fn records(&self) -> &BTreeMap<String, FileRecord> {
        &self.records
    }

    pub fn loaded_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.cache.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Load a key, decoding on a cache miss.
    ///
    /// Never fails outward: an unregistered key or a decode problem comes
    /// back as a failed [`DecodedResult`]. Only successful results enter the
    /// cache; the least-recently-used entry (and its analyzer) is evicted
    /// when the cache exceeds capacity.
    pub fn load_with<D>(&mut self, key: &str, force_reload: bool, decode: D) -> DecodedResult<P>
    where
        D: FnOnce(&FileRecord) -> DecodedResult<P>,
    {
        if !self.records.contains_key(key) {
            let mut result = DecodedResult::failure(format!(
                "file key '{key}' not found in {} manager",
                self.label
            ));
            result.insert_metadata("key", key);
            return result;
        }

        if !force_reload {
            if let Some(cached) = self.cache.get(key) {
                let result = cached.clone();
                self.touch(key);
                self.hit_count += 1;
                debug!("{}: cache hit for '{key}'", self.label);
                return result;
            }
        }

        self.miss_count += 1;
        let result = match self.records.get(key) {
            Some(record) => decode(record),
            None => DecodedResult::failure(format!("file key '{key}' vanished during load")),
        };

        if result.success() {
            self.insert_into_cache(key, result.clone());
            if let Some(record) = self.records.get_mut(key) {
                record.loaded = true;
                record.loaded_at = Some(SystemTime::now());
            }
            self.load_count += 1;
            info!("{}: loaded '{key}'", self.label);
        } else {
            warn!(
                "{}: load of '{key}' failed: {}",
                self.label,
                result.errors.join("; ")
            );
        }
        result
    }

    /// Get the memoized analyzer for a key, loading the data first if
    /// needed. Unlike [`Self::load_with`], this surfaces the recorded decode
    /// errors, since an analyzer cannot be built on absent data.
    pub fn analyzer_with<D, B>(&mut self, key: &str, decode: D, build: B) -> Result<&mut A>
    where
        D: FnOnce(&FileRecord) -> DecodedResult<P>,
        B: FnOnce(std::sync::Arc<P>) -> A,
    {
        if !self.analyzers.contains_key(key) {
            let result = self.load_with(key, false, decode);
            if !result.success() {
                return Err(SpmError::ParseFailure(format!(
                    "cannot build analyzer for '{key}': {}",
                    result.errors.join("; ")
                )));
            }
            let Some(payload) = result.payload else {
                return Err(SpmError::ParseFailure(format!(
                    "decode of '{key}' produced no payload"
                )));
            };
            self.analyzers.insert(key.to_string(), build(payload));
        }
        self.analyzers.get_mut(key).ok_or_else(|| {
            SpmError::ParseFailure(format!("analyzer for '{key}' missing after construction"))
        })
    }

    /// Drop a key's cached result, analyzer and LRU slot. Returns whether a
    /// cached result was actually removed.
    pub fn unload(&mut self, key: &str) -> bool {
        let removed = self.cache.remove(key).is_some();
        self.analyzers.remove(key);
        self.access_order.retain(|k| k != key);
        if let Some(record) = self.records.get_mut(key) {
            record.loaded = false;
            record.loaded_at = None;
        }
        if removed {
            info!("{}: unloaded '{key}'", self.label);
        }
        removed
    }

    /// Drop every cached result and analyzer; reset all loaded flags.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.analyzers.clear();
        self.access_order.clear();
        for record in self.records.values_mut() {
            record.loaded = false;
            record.loaded_at = None;
        }
        info!("{}: cache cleared", self.label);
    }

    pub fn diagnostics(&self) -> CacheDiagnostics {
        let attempts = self.hit_count + self.miss_count;
        CacheDiagnostics {
            cache_size: self.cache.len(),
            max_cache_size: self.capacity,
            cached_keys: self.loaded_keys(),
            access_order: self.access_order.clone(),
            load_count: self.load_count,
            hit_count: self.hit_count,
            miss_count: self.miss_count,
            hit_rate: if attempts > 0 {
                self.hit_count as f64 / attempts as f64
            } else {
                0.0
            },
        }
    }

    fn insert_into_cache(&mut self, key: &str, result: DecodedResult<P>) {
        if self.cache.len() >= self.capacity && !self.cache.contains_key(key) {
            if !self.access_order.is_empty() {
                let lru_key = self.access_order.remove(0);
                self.cache.remove(&lru_key);
                self.analyzers.remove(&lru_key);
                if let Some(record) = self.records.get_mut(&lru_key) {
                    record.loaded = false;
                    record.loaded_at = None;
                }
                debug!("{}: evicted LRU entry '{lru_key}'", self.label);
            }
        }
        self.cache.insert(key.to_string(), result);
        self.touch(key);
    }

    /// Promote a key to most-recently-used.
    fn touch(&mut self, key: &str) {
        self.access_order.retain(|k| k != key);
        self.access_order.push(key.to_string());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
