//! Conflict resolution strategies.

use crate::conflict::Conflict;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tiersync_codec::{Payload, Value};
use tracing::warn;

/// Resolved values by key. `None` means the key ends up deleted.
pub type ResolvedValues = BTreeMap<String, Option<Payload>>;

/// A user-supplied resolver. It receives every conflict of one reconcile
/// pass and returns a value (or deletion) for each key.
pub type CustomResolveFn = dyn Fn(&[Conflict]) -> Result<ResolvedValues, String> + Send + Sync;

/// How conflicts are settled.
#[derive(Clone, Default)]
pub enum ResolutionStrategy {
    /// Newest timestamp wins; ties go to the greater device id.
    #[default]
    LastWriteWins,
    /// Field-level merge of CBOR maps, last-write-wins for everything else.
    Merge,
    /// Defer to the caller.
    Manual,
    /// An injected function. Failures fall back to last-write-wins.
    Custom(Arc<CustomResolveFn>),
}

impl ResolutionStrategy {
    /// Wraps a closure as a [`ResolutionStrategy::Custom`] strategy.
    pub fn custom<F>(resolve: F) -> Self
    where
        F: Fn(&[Conflict]) -> Result<ResolvedValues, String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(resolve))
    }

    /// Returns the strategy name.
    pub fn name(&self) -> &'static str {
        match self {
            ResolutionStrategy::LastWriteWins => "last_write_wins",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::Manual => "manual",
            ResolutionStrategy::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Keys a custom resolver failed to settle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("custom resolver failed for {keys:?}: {message}")]
pub struct ResolutionFailure {
    /// Keys that were settled by last-write-wins instead.
    pub keys: Vec<String>,
    /// What went wrong.
    pub message: String,
}

/// Outcome of [`ConflictResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Every conflict has a value to apply.
    Resolved {
        /// Resolved value per key.
        values: ResolvedValues,
        /// Set when a custom resolver failed and some keys fell back to
        /// last-write-wins.
        failure: Option<ResolutionFailure>,
    },
    /// Nothing was applied; the caller must supply resolutions.
    Pending(Vec<Conflict>),
}

impl Resolution {
    /// Returns true if resolution was deferred.
    pub fn is_pending(&self) -> bool {
        matches!(self, Resolution::Pending(_))
    }
}

/// Applies a [`ResolutionStrategy`] to detected conflicts.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    strategy: ResolutionStrategy,
}

impl ConflictResolver {
    /// Creates a resolver using `strategy`.
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self { strategy }
    }

    /// Returns the strategy.
    pub fn strategy(&self) -> &ResolutionStrategy {
        &self.strategy
    }

    /// Resolves a set of conflicts.
    pub fn resolve(&self, conflicts: &[Conflict]) -> Resolution {
        if conflicts.is_empty() {
            return Resolution::Resolved {
                values: ResolvedValues::new(),
                failure: None,
            };
        }
        match &self.strategy {
            ResolutionStrategy::LastWriteWins => Resolution::Resolved {
                values: resolve_each(conflicts, last_write_wins),
                failure: None,
            },
            ResolutionStrategy::Merge => Resolution::Resolved {
                values: resolve_each(conflicts, merge),
                failure: None,
            },
            ResolutionStrategy::Manual => Resolution::Pending(conflicts.to_vec()),
            ResolutionStrategy::Custom(resolve) => resolve_custom(resolve.as_ref(), conflicts),
        }
    }
}

fn resolve_each(conflicts: &[Conflict], rule: fn(&Conflict) -> Option<Payload>) -> ResolvedValues {
    conflicts
        .iter()
        .map(|conflict| (conflict.key.clone(), rule(conflict)))
        .collect()
}

fn resolve_custom(resolve: &CustomResolveFn, conflicts: &[Conflict]) -> Resolution {
    let outcome = catch_unwind(AssertUnwindSafe(|| resolve(conflicts)))
        .unwrap_or_else(|panic| Err(format!("resolver panicked: {}", panic_message(&*panic))));

    let mut resolved = match outcome {
        Ok(values) => values,
        Err(message) => {
            let keys: Vec<String> = conflicts.iter().map(|c| c.key.clone()).collect();
            warn!(keys = ?keys, error = %message, "custom resolver failed, using last-write-wins");
            return Resolution::Resolved {
                values: resolve_each(conflicts, last_write_wins),
                failure: Some(ResolutionFailure { keys, message }),
            };
        }
    };

    let mut values = ResolvedValues::new();
    let mut missing = Vec::new();
    for conflict in conflicts {
        match resolved.remove(&conflict.key) {
            Some(value) => {
                values.insert(conflict.key.clone(), value);
            }
            None => {
                values.insert(conflict.key.clone(), last_write_wins(conflict));
                missing.push(conflict.key.clone());
            }
        }
    }
    if !resolved.is_empty() {
        warn!(keys = ?resolved.keys().collect::<Vec<_>>(), "custom resolver returned unknown keys, ignoring them");
    }

    let failure = (!missing.is_empty()).then(|| {
        warn!(keys = ?missing, "custom resolver omitted keys, using last-write-wins");
        ResolutionFailure {
            keys: missing,
            message: "resolver returned no value".to_string(),
        }
    });
    Resolution::Resolved { values, failure }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn local_wins(conflict: &Conflict) -> bool {
    let local = (
        conflict.local_timestamp,
        conflict.local_origin,
        &conflict.local_value,
    );
    let remote = (
        conflict.remote_timestamp,
        conflict.remote_origin,
        &conflict.remote_value,
    );
    local >= remote
}

/// Last-write-wins for one conflict.
///
/// The greater timestamp wins. Equal timestamps go to the greater device id,
/// and a conflict between two changes from the same device at the same
/// instant goes to the greater value (any value beats a deletion). The rule
/// is symmetric, so both devices pick the same winner.
pub fn last_write_wins(conflict: &Conflict) -> Option<Payload> {
    if local_wins(conflict) {
        conflict.local_value.clone()
    } else {
        conflict.remote_value.clone()
    }
}

/// Field-level merge for one conflict.
///
/// When both sides hold CBOR maps, fields present on one side are kept and
/// fields present on both follow last-write-wins, recursing into nested
/// maps. Anything else is settled by [`last_write_wins`].
pub fn merge(conflict: &Conflict) -> Option<Payload> {
    let (Some(local), Some(remote)) = (&conflict.local_value, &conflict.remote_value) else {
        return last_write_wins(conflict);
    };
    let (Some(local_map), Some(remote_map)) = (local.as_map(), remote.as_map()) else {
        return last_write_wins(conflict);
    };

    let merged = merge_maps(local_map, remote_map, local_wins(conflict));
    match Payload::from_map(merged) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(key = %conflict.key, error = %e, "merged map failed to encode, using last-write-wins");
            last_write_wins(conflict)
        }
    }
}

fn merge_maps(
    local: Vec<(Value, Value)>,
    remote: Vec<(Value, Value)>,
    local_wins: bool,
) -> Vec<(Value, Value)> {
    let mut merged = local;
    for (key, remote_value) in remote {
        match merged.iter_mut().find(|(k, _)| *k == key) {
            None => merged.push((key, remote_value)),
            Some((_, slot)) => {
                let local_value = std::mem::replace(slot, Value::Null);
                *slot = match (local_value, remote_value) {
                    (Value::Map(l), Value::Map(r)) => Value::Map(merge_maps(l, r, local_wins)),
                    (l, _) if local_wins => l,
                    (_, r) => r,
                };
            }
        }
    }
    merged
}
