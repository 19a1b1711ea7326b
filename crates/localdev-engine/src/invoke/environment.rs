//! Environment layering for invocations.
//!
//! Resolution order, later layers winning: the process environment captured
//! at startup (plus `IS_LOCAL=true`), the function record's declared
//! environment, then the local override files in the service directory.
//! Override files are re-read on every invocation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Override files, lowest precedence first.
pub const OVERRIDE_FILES: [&str; 3] = [".env.local", ".local.env", "local.env"];

#[derive(Debug, Clone)]
pub struct EnvironmentLayers {
    baseline: Arc<BTreeMap<String, String>>,
    override_dir: Option<PathBuf>,
}

impl EnvironmentLayers {
    /// Snapshot the current process environment as the baseline.
    pub fn capture(override_dir: Option<PathBuf>) -> Self {
        Self::with_baseline(std::env::vars().collect(), override_dir)
    }

    pub fn with_baseline(
        mut baseline: BTreeMap<String, String>,
        override_dir: Option<PathBuf>,
    ) -> Self {
        baseline.insert("IS_LOCAL".into(), "true".into());
        Self {
            baseline: Arc::new(baseline),
            override_dir,
        }
    }

    pub fn resolve(&self, declared: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = (*self.baseline).clone();
        env.extend(declared.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(dir) = &self.override_dir {
            for name in OVERRIDE_FILES {
                env.extend(read_override_file(&dir.join(name)));
            }
        }
        env
    }
}

/// Parse one dotenv-style file. Missing files yield nothing; unreadable
/// files are logged and skipped.
fn read_override_file(path: &Path) -> BTreeMap<String, String> {
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) if e.not_found() => return BTreeMap::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to read override file: {e}");
            return BTreeMap::new();
        }
    };

    let mut values = BTreeMap::new();
    for item in iter {
        match item {
            Ok((key, value)) => {
                values.insert(key, value);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "skipping malformed override file: {e}");
                return BTreeMap::new();
            }
        }
    }
    values
}
