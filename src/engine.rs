//! The velocity engine.
//!
//! A [`Velocity`] owns one [`Store`] and answers windowed count/value queries
//! against it. Every update is a read-modify-write of one key under a striped
//! lock, so concurrent updates to a key never lose increments.
//!
//! Query methods (`vel_*`, `get_*`) never fail: internal errors are logged and
//! a safe default is returned. Counts and values fall back to zero; the
//! threshold checks `vel_or` and `vel_and` fall back to `true` ("not
//! exceeded").

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use regex::Regex;

use crate::config::VelocityConfig;
use crate::error::Result;
use crate::hasher::dense_key;
use crate::record::{from_fix, to_fix, Record};
use crate::store::Store;
use crate::text::{self, WireLine};
use crate::time::{Unit, When};
use crate::window::{self, Update};

const STRIPES: usize = 64;

/// The identifier a query is about.
///
/// With a pattern, every key that fully matches it shares one counter, stored
/// under the pattern itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject<'a> {
    pub key: &'a str,
    pub pattern: Option<&'a str>,
}

impl<'a> Subject<'a> {
    pub fn new(key: &'a str) -> Self {
        Self { key, pattern: None }
    }

    pub fn matching(key: &'a str, pattern: &'a str) -> Self {
        Self {
            key,
            pattern: Some(pattern),
        }
    }
}

impl<'a> From<&'a str> for Subject<'a> {
    fn from(key: &'a str) -> Self {
        Subject::new(key)
    }
}

impl<'a> From<(&'a str, &'a str)> for Subject<'a> {
    fn from((key, pattern): (&'a str, &'a str)) -> Self {
        Subject::matching(key, pattern)
    }
}

/// Runtime counters of one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub name: String,
    pub records: usize,
    pub uptime_minutes: u64,
    /// Records removed by purges since start.
    pub purged: u64,
    pub purge_runs: u64,
    /// Accesses since the last purge check.
    pub accesses: u64,
    /// The store's own statistics.
    pub store: String,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|{}|{}",
            self.name,
            self.records,
            self.uptime_minutes,
            self.purged,
            self.purge_runs,
            self.accesses,
            self.store
        )
    }
}

/// Windowed counters over one store.
pub struct Velocity {
    name: String,
    store: Box<dyn Store>,
    config: RwLock<VelocityConfig>,
    stripes: Box<[Mutex<()>]>,
    patterns: RwLock<HashMap<String, Regex>>,
    accesses: AtomicU64,
    next_purge: Mutex<Instant>,
    purged: AtomicU64,
    purge_runs: AtomicU64,
    started: Instant,
}

impl Velocity {
    pub fn new(name: impl Into<String>, store: Box<dyn Store>, config: VelocityConfig) -> Self {
        Self {
            name: name.into(),
            store,
            config: RwLock::new(config),
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
            patterns: RwLock::new(HashMap::new()),
            accesses: AtomicU64::new(0),
            next_purge: Mutex::new(Instant::now()),
            purged: AtomicU64::new(0),
            purge_runs: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Like [`Velocity::new`], overlaying thresholds from the store's property
    /// file when one exists.
    pub fn open(
        name: impl Into<String>,
        store: Box<dyn Store>,
        mut config: VelocityConfig,
    ) -> Result<Self> {
        let name = name.into();
        config.load_properties(&name)?;
        Ok(Self::new(name, store, config))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> VelocityConfig {
        self.config.read().clone()
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    fn reconfigure(&self, apply: impl FnOnce(&mut VelocityConfig) -> bool) {
        let mut config = self.config.write();
        if !apply(&mut config) || !config.persist {
            return;
        }
        if let Err(e) = config.save_properties(&self.name) {
            log::warn!("{}: cannot save properties: {e}", self.name);
        }
    }

    pub fn set_hit_max(&self, hit_max: i32) -> &Self {
        self.reconfigure(|c| std::mem::replace(&mut c.hit_max, hit_max) != hit_max);
        self
    }

    pub fn set_val_max(&self, val_max: f64) -> &Self {
        self.reconfigure(|c| std::mem::replace(&mut c.val_max, val_max) != val_max);
        self
    }

    pub fn set_vel_dur(&self, vel_dur: i32) -> &Self {
        self.reconfigure(|c| std::mem::replace(&mut c.vel_dur, vel_dur) != vel_dur);
        self
    }

    pub fn set_max(&self, max: usize) -> &Self {
        self.reconfigure(|c| std::mem::replace(&mut c.max, max) != max);
        self
    }

    pub fn set_persist(&self, persist: bool) -> &Self {
        self.config.write().persist = persist;
        self
    }

    /// Default window and history bound for an update of `dur` minutes. With
    /// persistence on, a positive `dur` that differs from the default becomes
    /// the new default.
    fn window_params(&self, dur: i32) -> (i32, usize) {
        {
            let c = self.config.read();
            if !c.persist || dur <= 0 || dur == c.vel_dur {
                return (c.vel_dur, c.max);
            }
        }
        self.set_vel_dur(dur);
        let c = self.config.read();
        (c.vel_dur, c.max)
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn stripe(&self, key: u64) -> &Mutex<()> {
        &self.stripes[(key ^ (key >> 32)) as usize % STRIPES]
    }

    fn full_match(&self, pattern: &str, text: &str) -> Result<bool> {
        if let Some(re) = self.patterns.read().get(pattern) {
            return Ok(re.is_match(text));
        }
        let re = Regex::new(&format!("^(?:{pattern})$"))?;
        let hit = re.is_match(text);
        self.patterns.write().insert(pattern.to_owned(), re);
        Ok(hit)
    }

    /// The string a subject is counted under.
    fn resolve<'s>(&self, subject: Subject<'s>) -> Result<&'s str> {
        match subject.pattern {
            Some(pattern) if self.full_match(pattern, subject.key)? => Ok(pattern),
            _ => Ok(subject.key),
        }
    }

    fn key_of(&self, subject: Subject<'_>) -> Result<u64> {
        Ok(dense_key(self.resolve(subject)?))
    }

    fn change_key(&self, subject: Subject<'_>, value: Subject<'_>) -> Result<u64> {
        let key = self.resolve(subject)?;
        let value = self.resolve(value)?;
        Ok(dense_key(&format!("{key}|{value}")))
    }

    fn guarded<T>(&self, op: &str, fallback: T, f: impl FnOnce() -> Result<T>) -> T {
        self.tick();
        match f() {
            Ok(v) => v,
            Err(e) => {
                log::error!("{}: {op} failed: {e}", self.name);
                fallback
            }
        }
    }

    /// Count a keyed access. Once more than `purge_threshold` accesses have
    /// piled up and the purge deadline has passed, purge at the current minute
    /// and start a new interval. Queries, `record`, `remove_key`,
    /// `merge_record` and `import` all count.
    fn tick(&self) {
        let threshold = self.config.read().purge_threshold;
        if self.accesses.fetch_add(1, Ordering::Relaxed) <= threshold {
            return;
        }
        let Some(mut next) = self.next_purge.try_lock() else {
            return;
        };

        let now = Instant::now();
        if now < *next {
            return;
        }
        if let Err(e) = self.purge(When::Now) {
            log::error!("{}: purge failed: {e}", self.name);
        }
        *next = now + self.config.read().purge_interval;
        self.accesses.store(0, Ordering::Relaxed);
    }

    /// Fold one event into `key` and return the stored result.
    fn update(&self, key: u64, val: i32, dur: i32, now: u32) -> Result<Record> {
        let (default_dur, max) = self.window_params(dur);
        let up = Update {
            val,
            dur,
            now,
            default_dur,
            max,
        };

        let _guard = self.stripe(key).lock();
        let next = window::advance(self.store.get(key)?, &up);
        self.store.set(key, &next)?;
        log::debug!("{}: {key} -> {next}", self.name);
        Ok(next)
    }

    fn read(&self, key: u64) -> Result<Option<Record>> {
        self.store.get(key)
    }

    // =========================================================================
    // Windowed updates
    // =========================================================================

    /// Record one hit and return the hit total over the window.
    pub fn vel_count<'a>(
        &self,
        subject: impl Into<Subject<'a>>,
        dur: i32,
        when: impl Into<When<'a>>,
    ) -> i64 {
        let (subject, when) = (subject.into(), when.into());
        self.guarded("vel_count", 0, || {
            let key = self.key_of(subject)?;
            Ok(self.update(key, 1, dur, when.minute()?)?.total())
        })
    }

    /// Add a raw integer value and return the raw total over the window.
    pub fn vel_value<'a>(
        &self,
        subject: impl Into<Subject<'a>>,
        v: i32,
        dur: i32,
        when: impl Into<When<'a>>,
    ) -> i64 {
        let (subject, when) = (subject.into(), when.into());
        self.guarded("vel_value", 0, || {
            let key = self.key_of(subject)?;
            Ok(self.update(key, v, dur, when.minute()?)?.total())
        })
    }

    /// Add a monetary amount and return the amount total over the window.
    pub fn vel_amount<'a>(
        &self,
        subject: impl Into<Subject<'a>>,
        v: f64,
        dur: i32,
        when: impl Into<When<'a>>,
    ) -> f64 {
        let (subject, when) = (subject.into(), when.into());
        self.guarded("vel_amount", 0.0, || {
            let key = self.key_of(subject)?;
            Ok(from_fix(self.update(key, to_fix(v), dur, when.minute()?)?.total()))
        })
    }

    /// Add `v` and check both thresholds. Returns `false` once the number of
    /// windows held reaches `hit_max` *or* the amount total reaches `val_max`.
    ///
    /// `hit_max` of 0 or -1 and `val_max <= 0` disable their check.
    pub fn vel_or<'a>(
        &self,
        subject: impl Into<Subject<'a>>,
        hit_max: i32,
        v: f64,
        val_max: f64,
        dur: i32,
        when: impl Into<When<'a>>,
    ) -> bool {
        let (subject, when) = (subject.into(), when.into());
        self.guarded("vel_or", true, || {
            let (hits, value) = self.thresholds(subject, hit_max, v, val_max, dur, when)?;
            Ok(!(hits || value))
        })
    }

    /// As [`Velocity::vel_or`], but `false` only once *both* thresholds are
    /// reached.
    pub fn vel_and<'a>(
        &self,
        subject: impl Into<Subject<'a>>,
        hit_max: i32,
        v: f64,
        val_max: f64,
        dur: i32,
        when: impl Into<When<'a>>,
    ) -> bool {
        let (subject, when) = (subject.into(), when.into());
        self.guarded("vel_and", true, || {
            let (hits, value) = self.thresholds(subject, hit_max, v, val_max, dur, when)?;
            Ok(!(hits && value))
        })
    }

    fn thresholds(
        &self,
        subject: Subject<'_>,
        hit_max: i32,
        v: f64,
        val_max: f64,
        dur: i32,
        when: When<'_>,
    ) -> Result<(bool, bool)> {
        let key = self.key_of(subject)?;
        let record = self.update(key, to_fix(v), dur, when.minute()?)?;

        let hits = hit_max > 0 && record.len() >= hit_max as usize;
        let value = val_max > 0.0 && from_fix(record.total()) >= val_max;
        Ok((hits, value))
    }

    /// Touch the `subject|value` pair and return how many distinct amounts its
    /// history holds. Pairs only ever add zero, so this is the number of
    /// windows in which the pair was seen.
    pub fn vel_change<'a>(
        &self,
        subject: impl Into<Subject<'a>>,
        value: impl Into<Subject<'a>>,
        dur: i32,
        when: impl Into<When<'a>>,
    ) -> usize {
        let (subject, value, when) = (subject.into(), value.into(), when.into());
        self.guarded("vel_change", 0, || {
            let key = self.change_key(subject, value)?;
            Ok(self.update(key, 0, dur, when.minute()?)?.distinct_amounts())
        })
    }

    /// [`Velocity::vel_change`] with an empty key.
    pub fn vel_diff<'a>(
        &self,
        value: impl Into<Subject<'a>>,
        dur: i32,
        when: impl Into<When<'a>>,
    ) -> usize {
        self.vel_change("", value, dur, when)
    }

    // =========================================================================
    // Read-only queries
    // =========================================================================

    /// Number of windows currently held for `subject`.
    pub fn get_count<'a>(&self, subject: impl Into<Subject<'a>>) -> usize {
        let subject = subject.into();
        self.guarded("get_count", 0, || {
            Ok(self.read(self.key_of(subject)?)?.map_or(0, |r| r.len()))
        })
    }

    /// Raw total held for `subject`.
    pub fn get_value<'a>(&self, subject: impl Into<Subject<'a>>) -> i64 {
        let subject = subject.into();
        self.guarded("get_value", 0, || {
            Ok(self.read(self.key_of(subject)?)?.map_or(0, |r| r.total()))
        })
    }

    /// Amount total held for `subject`.
    pub fn get_amount<'a>(&self, subject: impl Into<Subject<'a>>) -> f64 {
        let subject = subject.into();
        self.guarded("get_amount", 0.0, || {
            Ok(self
                .read(self.key_of(subject)?)?
                .map_or(0.0, |r| from_fix(r.total())))
        })
    }

    pub fn get_change<'a>(
        &self,
        subject: impl Into<Subject<'a>>,
        value: impl Into<Subject<'a>>,
    ) -> usize {
        let (subject, value) = (subject.into(), value.into());
        self.guarded("get_change", 0, || {
            let key = self.change_key(subject, value)?;
            Ok(self.read(key)?.map_or(0, |r| r.distinct_amounts()))
        })
    }

    pub fn get_diff<'a>(&self, value: impl Into<Subject<'a>>) -> usize {
        self.get_change("", value)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn record<'a>(&self, subject: impl Into<Subject<'a>>) -> Result<Option<Record>> {
        self.tick();
        self.read(self.key_of(subject.into())?)
    }

    /// `ts|amount,ts|amount` form of one record.
    pub fn show<'a>(&self, subject: impl Into<Subject<'a>>) -> Result<Option<String>> {
        Ok(self.record(subject)?.map(|r| r.to_string()))
    }

    /// Remove one record, returning its `show` form.
    pub fn remove_key<'a>(&self, subject: impl Into<Subject<'a>>) -> Result<Option<String>> {
        self.tick();
        let key = self.key_of(subject.into())?;
        let _guard = self.stripe(key).lock();
        Ok(self.store.remove(key)?.map(|r| r.to_string()))
    }

    /// Start minute of every window held, newest first, assuming each was
    /// opened with the default window length.
    pub fn window_starts<'a>(&self, subject: impl Into<Subject<'a>>) -> Result<Vec<u32>> {
        let vel_dur = self.config.read().vel_dur.max(0) as u32;
        let Some(record) = self.record(subject)? else {
            return Ok(Vec::new());
        };
        Ok(record
            .slots()
            .iter()
            .filter(|s| s.expiry != 0)
            .map(|s| s.expiry.saturating_sub(vel_dur))
            .collect())
    }

    /// Window starts bucketed by `unit`: bucket start minute -> windows opened
    /// in it.
    pub fn histogram<'a>(
        &self,
        subject: impl Into<Subject<'a>>,
        unit: Unit,
    ) -> Result<BTreeMap<u32, usize>> {
        let mut buckets = BTreeMap::new();
        for start in self.window_starts(subject)? {
            *buckets.entry(unit.floor(start)).or_insert(0) += 1;
        }
        Ok(buckets)
    }

    /// Count records, logging every `every`-th one.
    pub fn sample(&self, every: usize) -> Result<usize> {
        let every = every.max(1);
        let mut count = 0;
        self.store.for_each(&mut |key, record| {
            if count % every == 0 {
                log::info!("{}: {count} : {}", self.name, text::dump_entry(key, &record));
            }
            count += 1;
        })?;
        Ok(count)
    }

    /// `{key=date|amount;...,key=...}` over the whole store.
    pub fn dump(&self) -> Result<String> {
        let mut entries = Vec::new();
        self.store
            .for_each(&mut |key, record| entries.push(text::dump_entry(key, &record)))?;
        Ok(format!("{{{}}}", entries.join(",")))
    }

    pub fn stats(&self) -> Stats {
        Stats {
            name: self.name.clone(),
            records: self.store.len(),
            uptime_minutes: self.started.elapsed().as_secs() / 60,
            purged: self.purged.load(Ordering::Relaxed),
            purge_runs: self.purge_runs.load(Ordering::Relaxed),
            accesses: self.accesses.load(Ordering::Relaxed),
            store: self.store.stats(),
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Remove every record whose newest window has passed at `when`.
    pub fn purge<'a>(&self, when: impl Into<When<'a>>) -> Result<usize> {
        let now = when.into().minute()?;
        let removed = self.store.purge(now)?;
        self.purged.fetch_add(removed as u64, Ordering::Relaxed);
        self.purge_runs.fetch_add(1, Ordering::Relaxed);
        log::info!("{}: purged {removed} records", self.name);
        Ok(removed)
    }

    /// Merge a record from elsewhere into `key`: stored as is when absent,
    /// untouched when equal, merged otherwise.
    ///
    /// Returns whether the stored record changed.
    pub fn merge_record(&self, key: u64, remote: &Record) -> Result<bool> {
        self.tick();
        let max = self.config.read().max;
        let _guard = self.stripe(key).lock();

        let merged = match self.store.get(key)? {
            None => remote.clone(),
            Some(local) if local == *remote => return Ok(false),
            Some(local) => match window::merge(&local, remote, max) {
                Some(merged) if merged != local => merged,
                _ => return Ok(false),
            },
        };
        self.store.set(key, &merged)?;
        Ok(true)
    }

    /// Merge a parsed wire line into this store, ignoring its routing fields.
    pub fn merge_wire(&self, line: &WireLine<'_>) -> Result<bool> {
        self.merge_record(line.key, &line.record)
    }

    /// Copy every record into `target`, either overwriting or merging.
    /// Returns the number of records copied.
    pub fn copy_into(&self, target: &Velocity, merge: bool) -> Result<usize> {
        if std::ptr::eq(self, target) {
            return Ok(0);
        }

        let mut copied = 0;
        let mut failed = None;
        self.store.for_each(&mut |key, record| {
            if failed.is_some() {
                return;
            }
            let done = if merge {
                target.merge_record(key, &record).map(|_| ())
            } else {
                target.store.set(key, &record)
            };
            match done {
                Ok(()) => copied += 1,
                Err(e) => failed = Some(e),
            }
        })?;

        match failed {
            Some(e) => Err(e),
            None => Ok(copied),
        }
    }

    /// Load `key:ts|amount,...` lines, overwriting existing records.
    /// Malformed lines are logged and skipped. Returns the number loaded.
    pub fn import(&self, reader: impl BufRead) -> Result<usize> {
        let mut loaded = 0;
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match text::parse_import_line(&line) {
                Ok((key, record)) => {
                    self.tick();
                    let _guard = self.stripe(key).lock();
                    self.store.set(key, &record)?;
                    loaded += 1;
                }
                Err(e) => log::error!("{}: import line {}: {e}", self.name, n + 1),
            }
        }
        log::info!("{}: imported {loaded} records", self.name);
        Ok(loaded)
    }

    pub fn import_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        self.import(BufReader::new(File::open(path)?))
    }

    /// Write every record as an import line. Returns the number written.
    pub fn export(&self, mut writer: impl Write) -> Result<usize> {
        let mut written = 0;
        let mut failed = None;
        self.store.for_each(&mut |key, record| {
            if failed.is_some() {
                return;
            }
            match writeln!(writer, "{}", text::format_import_line(key, &record)) {
                Ok(()) => written += 1,
                Err(e) => failed = Some(e),
            }
        })?;

        if let Some(e) = failed {
            return Err(e.into());
        }
        writer.flush()?;
        Ok(written)
    }

    pub fn export_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        self.export(BufWriter::new(File::create(path)?))
    }

    /// Flush the store and, with persistence on, save the thresholds.
    pub fn close(&self) -> Result<()> {
        self.store.close()?;
        let config = self.config.read();
        if config.persist {
            config.save_properties(&self.name)?;
        }
        Ok(())
    }
}

impl fmt::Display for Velocity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dump() {
            Ok(dump) => f.write_str(&dump),
            Err(e) => {
                log::error!("{}: dump failed: {e}", self.name);
                f.write_str("{}")
            }
        }
    }
}

impl fmt::Debug for Velocity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Velocity")
            .field("name", &self.name)
            .field("kind", &self.store.kind())
            .field("records", &self.store.len())
            .finish()
    }
}
