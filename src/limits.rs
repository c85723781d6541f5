// src/limits.rs
//
// Per-limit stubs over the limit service, plus tracked edits to the shared
// limits metadata table so teardown can put back exactly what it touched.

use log::debug;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::services::{LimitService, Seam};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    #[serde(default)]
    pub allowlist: Vec<String>,
}

pub type LimitsMap = BTreeMap<String, LimitConfig>;

/// The limit service's metadata table, shared by handle.
///
/// `None` means the table was never initialised, which is distinct from an
/// initialised but empty table.
#[derive(Debug, Clone, Default)]
pub struct LimitsTable {
    inner: Arc<RwLock<Option<LimitsMap>>>,
}

impl LimitsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: LimitsMap) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(limits))),
        }
    }

    pub fn snapshot(&self) -> Option<LimitsMap> {
        self.inner.read().clone()
    }

    pub fn replace(&self, limits: Option<LimitsMap>) {
        *self.inner.write() = limits;
    }

    pub fn is_initialised(&self) -> bool {
        self.inner.read().is_some()
    }

    pub fn get(&self, name: &str) -> Option<LimitConfig> {
        self.inner.read().as_ref().and_then(|m| m.get(name).cloned())
    }

    /// Inserts `name`, initialising the table first if needed.
    pub fn insert(&self, name: &str, config: LimitConfig) {
        self.inner
            .write()
            .get_or_insert_with(BTreeMap::new)
            .insert(name.to_string(), config);
    }

    pub fn remove(&self, name: &str) -> Option<LimitConfig> {
        self.inner.write().as_mut().and_then(|m| m.remove(name))
    }

    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .as_ref()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().as_ref().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Simulated outcomes for one named limit.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LimitOptions {
    pub is_limited: bool,
    pub is_disabled: bool,
    pub would_go_over_limit: bool,
    pub allowlist: Vec<String>,
    pub error_if_would_go_over_limit: bool,
}

impl LimitOptions {
    pub fn limited() -> Self {
        Self {
            is_limited: true,
            ..Self::default()
        }
    }

    pub fn over_limit() -> Self {
        Self {
            is_limited: true,
            would_go_over_limit: true,
            error_if_would_go_over_limit: true,
            ..Self::default()
        }
    }

    pub fn with_allowlist<I, S>(mut self, allowlist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowlist = allowlist.into_iter().map(Into::into).collect();
        self
    }
}

/// Limit service answering from configured outcomes, keyed by limit name.
/// Names never configured reach the real service.
pub struct LimitStub {
    outcomes: RwLock<HashMap<String, LimitOptions>>,
    real: Arc<dyn LimitService>,
}

impl LimitStub {
    pub fn new(real: Arc<dyn LimitService>) -> Self {
        Self {
            outcomes: RwLock::new(HashMap::new()),
            real,
        }
    }

    pub fn configure(&self, limit: &str, options: LimitOptions) {
        self.outcomes.write().insert(limit.to_string(), options);
    }

    fn outcome(&self, limit: &str) -> Option<LimitOptions> {
        self.outcomes.read().get(limit).cloned()
    }
}

impl LimitService for LimitStub {
    fn is_limited(&self, limit: &str) -> bool {
        match self.outcome(limit) {
            Some(o) => o.is_limited,
            None => self.real.is_limited(limit),
        }
    }

    fn is_disabled(&self, limit: &str) -> bool {
        match self.outcome(limit) {
            Some(o) => o.is_disabled,
            None => self.real.is_disabled(limit),
        }
    }

    fn check_would_go_over_limit(&self, limit: &str) -> Result<bool> {
        match self.outcome(limit) {
            Some(o) => Ok(o.would_go_over_limit),
            None => self.real.check_would_go_over_limit(limit),
        }
    }

    fn error_if_would_go_over_limit(&self, limit: &str) -> Result<()> {
        match self.outcome(limit) {
            Some(o) if o.error_if_would_go_over_limit => Err(Error::HostLimit {
                limit: limit.to_string(),
                message: format!("Upgrade to use {} feature.", limit),
            }),
            Some(_) => Ok(()),
            None => self.real.error_if_would_go_over_limit(limit),
        }
    }
}

struct LimitMockState {
    stub: Arc<LimitStub>,
    original: Option<LimitsMap>,
    mocked: BTreeSet<String>,
}

pub struct LimitOverride {
    seam: Arc<Seam<dyn LimitService>>,
    table: LimitsTable,
    state: Mutex<Option<LimitMockState>>,
}

impl LimitOverride {
    pub fn new(seam: Arc<Seam<dyn LimitService>>, table: LimitsTable) -> Self {
        Self {
            seam,
            table,
            state: Mutex::new(None),
        }
    }

    /// Configures `limit`. The first call of a session installs the stub and
    /// snapshots the metadata table; later calls reuse both.
    /// Returns the active stub.
    pub fn mock(&self, limit: &str, options: LimitOptions) -> Arc<LimitStub> {
        let mut state = self.state.lock();
        let state = state.get_or_insert_with(|| {
            let stub = Arc::new(LimitStub::new(self.seam.real()));
            self.seam.intercept(stub.clone());
            LimitMockState {
                stub,
                original: self.table.snapshot(),
                mocked: BTreeSet::new(),
            }
        });

        debug!("Mocking limit '{}' with {:?}", limit, options);
        self.table.insert(
            limit,
            LimitConfig {
                allowlist: options.allowlist.clone(),
            },
        );
        state.stub.configure(limit, options);
        state.mocked.insert(limit.to_string());
        Arc::clone(&state.stub)
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().is_some()
    }

    pub fn mocked_limits(&self) -> Vec<String> {
        self.state
            .lock()
            .as_ref()
            .map(|s| s.mocked.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Uninstalls the stub, then reverts only the tracked table entries.
    /// Returns whether anything was mocked.
    pub fn restore(&self) -> bool {
        let Some(state) = self.state.lock().take() else {
            return false;
        };

        self.seam.restore();

        for name in &state.mocked {
            match state.original.as_ref().and_then(|m| m.get(name)) {
                Some(config) => self.table.insert(name, config.clone()),
                None => {
                    self.table.remove(name);
                }
            }
        }

        let originally_empty = state.original.as_ref().map_or(true, |m| m.is_empty());
        if originally_empty && self.table.is_empty() {
            self.table.replace(state.original);
        }

        debug!("Restored limit service ({} limits)", state.mocked.len());
        true
    }
}
