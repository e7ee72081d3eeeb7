//! Per-store thresholds and their property file.
//!
//! The property file is `<dir>/<name>.prp`: a `#` comment header naming the
//! store, then `hitMax`, `valMax`, `velDur` and `max` as `key=value` lines.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::record::DEFAULT_MAX_HISTORY;

const KEY_HIT_MAX: &str = "hitMax";
const KEY_VAL_MAX: &str = "valMax";
const KEY_VEL_DUR: &str = "velDur";
const KEY_MAX: &str = "max";

/// Configuration for one velocity store.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityConfig {
    /// Hit count at which a velocity match is deemed to have occurred.
    pub hit_max: i32,
    /// Value at which a velocity match is deemed to have occurred. `0` ignores
    /// value.
    pub val_max: f64,
    /// Default window length in minutes.
    pub vel_dur: i32,
    /// Most recent windows kept per key.
    pub max: usize,
    /// Directory holding property files.
    pub dir: PathBuf,
    /// Write the property file whenever a threshold changes.
    pub persist: bool,
    /// Store accesses between purge checks.
    pub purge_threshold: u64,
    /// Minimum time between purges.
    pub purge_interval: Duration,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            hit_max: 3,
            val_max: 0.0,
            vel_dur: 60,
            max: DEFAULT_MAX_HISTORY,
            dir: PathBuf::from("veldb"),
            persist: false,
            purge_threshold: 100_000,
            purge_interval: Duration::from_secs(60),
        }
    }
}

impl VelocityConfig {
    pub fn with_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn property_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.prp"))
    }

    /// Overlay thresholds from `key=value` text. Unknown keys are ignored;
    /// values that do not parse keep the current setting.
    pub fn apply_properties(&mut self, text: &str) {
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once(['=', ':']) else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            let ok = match key {
                KEY_HIT_MAX => value.parse::<i32>().map(|v| self.hit_max = v).is_ok(),
                KEY_VAL_MAX => value.parse::<f64>().map(|v| self.val_max = v).is_ok(),
                KEY_VEL_DUR => value.parse::<i32>().map(|v| self.vel_dur = v).is_ok(),
                KEY_MAX => value.parse::<usize>().map(|v| self.max = v).is_ok(),
                _ => true,
            };
            if !ok {
                log::warn!("ignoring property {key}={value:?}");
            }
        }
    }

    pub fn to_properties(&self, name: &str) -> String {
        format!(
            "#{name}\n{KEY_HIT_MAX}={}\n{KEY_VAL_MAX}={:?}\n{KEY_VEL_DUR}={}\n{KEY_MAX}={}\n",
            self.hit_max, self.val_max, self.vel_dur, self.max
        )
    }

    /// Load `<dir>/<name>.prp` over the current settings. A missing file
    /// changes nothing.
    ///
    /// Returns whether a file was read.
    pub fn load_properties(&mut self, name: &str) -> Result<bool> {
        let path = self.property_path(name);
        match fs::read_to_string(&path) {
            Ok(text) => {
                self.apply_properties(&text);
                log::debug!("loaded {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_properties(&self, name: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.property_path(name), self.to_properties(name))?;
        Ok(())
    }
}
