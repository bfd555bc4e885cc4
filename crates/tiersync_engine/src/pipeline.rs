//! Outbound delta transforms.
//!
//! A pipeline is an ordered list of pure functions. Each one takes a delta
//! and returns a new one (or an error that stops the send); they run left to
//! right on every outbound delta. Pipelines are immutable: adding a stage
//! returns a new pipeline.

use crate::error::SyncResult;
use std::fmt;
use std::sync::Arc;
use tiersync_protocol::Delta;

/// One transform stage.
pub type DeltaTransform = dyn Fn(Delta) -> SyncResult<Delta> + Send + Sync;

/// An ordered, immutable chain of [`DeltaTransform`]s.
#[derive(Clone, Default)]
pub struct OutboundPipeline {
    stages: Arc<[Arc<DeltaTransform>]>,
}

impl OutboundPipeline {
    /// Creates an empty pipeline, which passes deltas through unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new pipeline with `stage` appended.
    #[must_use]
    pub fn with_stage<F>(&self, stage: F) -> Self
    where
        F: Fn(Delta) -> SyncResult<Delta> + Send + Sync + 'static,
    {
        let mut stages: Vec<Arc<DeltaTransform>> = self.stages.iter().cloned().collect();
        stages.push(Arc::new(stage));
        Self {
            stages: stages.into(),
        }
    }

    /// Runs every stage in order.
    ///
    /// # Errors
    ///
    /// Returns the first error a stage reports.
    pub fn apply(&self, delta: Delta) -> SyncResult<Delta> {
        self.stages.iter().try_fold(delta, |delta, stage| stage(delta))
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for OutboundPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundPipeline")
            .field("stages", &self.stages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use tiersync_codec::Payload;
    use tiersync_protocol::DeviceId;

    fn delta() -> Delta {
        let mut delta = Delta::new(DeviceId::from_bytes([1; 16]), 0, 0);
        delta.add("a", Payload::text("1"));
        delta.add("secret", Payload::text("2"));
        delta
    }

    #[test]
    fn empty_pipeline_is_identity() {
        assert_eq!(OutboundPipeline::new().apply(delta()).unwrap(), delta());
    }

    #[test]
    fn stages_run_in_order() {
        let pipeline = OutboundPipeline::new()
            .with_stage(|mut d| {
                d.modify("a", Payload::text("first"));
                Ok(d)
            })
            .with_stage(|mut d| {
                d.modify("a", Payload::text("second"));
                Ok(d)
            });

        let out = pipeline.apply(delta()).unwrap();
        assert_eq!(out.modified()["a"], Payload::text("second"));
    }

    #[test]
    fn adding_a_stage_leaves_the_original_untouched() {
        let base = OutboundPipeline::new();
        let redacting = base.with_stage(|mut d| {
            d.forget("secret");
            Ok(d)
        });

        assert!(base.is_empty());
        assert_eq!(redacting.len(), 1);
        assert!(redacting.apply(delta()).unwrap().change_for("secret").is_none());
    }

    #[test]
    fn failing_stage_stops_the_chain() {
        let pipeline = OutboundPipeline::new()
            .with_stage(|_| Err(SyncError::Transform("rejected".into())))
            .with_stage(|_| panic!("must not run"));

        assert!(matches!(
            pipeline.apply(delta()),
            Err(SyncError::Transform(_))
        ));
    }
}
