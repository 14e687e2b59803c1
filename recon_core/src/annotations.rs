//! Debug annotations for selected targets.
//!
//! The calculator only creates sinks for targets matching the debug
//! selectors; everything recorded is handed out by
//! [`ReferenceCalculator::take_annotations`](crate::ReferenceCalculator::take_annotations).

use crate::{
    error::KalmanError,
    types::{KalmanUpdate, Measurement, TargetId},
};
use serde::{Deserialize, Serialize};

/// Processing stage an annotated sequence was captured at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Updates,
    Smoothed,
    Resampled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Annotation {
    Measurements {
        measurements: Vec<Measurement>,
    },
    Updates {
        stage: Stage,
        updates: Vec<KalmanUpdate>,
    },
    /// Filter position before a rejected step
    FailedStep {
        t: f64,
        position: (f64, f64),
        cause: KalmanError,
    },
    /// Filter position before a skipped step
    SkippedStep {
        t: f64,
        position: (f64, f64),
    },
}

pub trait AnnotationSink: Send {
    fn record(&mut self, annotation: Annotation);

    /// Hand out what has been recorded so far.
    fn drain(&mut self) -> Vec<Annotation> {
        Vec::new()
    }
}

pub trait AnnotationFactory: Send + Sync {
    fn create(&self, target: TargetId) -> Box<dyn AnnotationSink>;
}

/// Keeps annotations in memory.
#[derive(Clone, Debug, Default)]
pub struct AnnotationRecorder {
    annotations: Vec<Annotation>,
}

impl AnnotationSink for AnnotationRecorder {
    fn record(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    fn drain(&mut self) -> Vec<Annotation> {
        std::mem::take(&mut self.annotations)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RecorderFactory;

impl AnnotationFactory for RecorderFactory {
    fn create(&self, _target: TargetId) -> Box<dyn AnnotationSink> {
        Box::<AnnotationRecorder>::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_drains_in_order() {
        let mut sink = RecorderFactory.create(TargetId(1));
        sink.record(Annotation::SkippedStep {
            t: 1.0,
            position: (0.0, 0.0),
        });
        sink.record(Annotation::FailedStep {
            t: 2.0,
            position: (1.0, 0.0),
            cause: KalmanError::Numeric,
        });
        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], Annotation::SkippedStep { .. }));
        assert!(sink.drain().is_empty());
    }
}
