//! In-flight alias registry.
//!
//! At most one mutating or signing request runs per alias. A second request
//! on a busy alias fails immediately with `AliasBusy` instead of queueing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::HardwareCryptoError;

/// Set of aliases with a request in progress.
#[derive(Debug, Clone, Default)]
pub struct AliasRegistry {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl AliasRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `alias` until the returned guard is dropped.
    pub fn acquire(&self, alias: &str) -> Result<AliasGuard, HardwareCryptoError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| HardwareCryptoError::platform("Lock poisoned"))?;

        if !in_flight.insert(alias.to_string()) {
            debug!(alias = %alias, "acquire: alias busy");
            return Err(HardwareCryptoError::AliasBusy {
                alias: alias.to_string(),
            });
        }

        Ok(AliasGuard {
            alias: alias.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Whether a request on `alias` is in progress.
    pub fn is_busy(&self, alias: &str) -> bool {
        self.in_flight
            .lock()
            .map(|in_flight| in_flight.contains(alias))
            .unwrap_or(false)
    }
}

/// Releases its alias when dropped.
#[derive(Debug)]
pub struct AliasGuard {
    alias: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl AliasGuard {
    /// The claimed alias.
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

impl Drop for AliasGuard {
    fn drop(&mut self) {
        // Release even if the set is poisoned.
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        in_flight.remove(&self.alias);
    }
}
