use std::sync::Arc;
use std::time::Duration;

use crate::pacer::{ConstantPacer, Pacer, PacerError, RampPacer, Rate};

/// Defines how the hit rate evolves over a run.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadModel {
    /// One fixed rate for the whole run.
    Constant { rate: Rate },

    /// Linear ramp from `start` to `target` over `ramp_up`, then `target`.
    Linear {
        start: Rate,
        target: Rate,
        ramp_up: Duration,
    },

    /// Requests per minute at given minutes, interpolated in between.
    Steps { points: Vec<(u32, u64)> },
}

impl LoadModel {
    pub fn to_pacer(&self) -> Result<Arc<dyn Pacer>, PacerError> {
        Ok(match self {
            LoadModel::Constant { rate } => Arc::new(ConstantPacer::new(*rate)),
            LoadModel::Linear {
                start,
                target,
                ramp_up,
            } => Arc::new(RampPacer::linear(*start, *target, *ramp_up)?),
            LoadModel::Steps { points } => Arc::new(RampPacer::from_rpm_steps(points)?),
        })
    }

    /// Integer RPM for every minute up to the last step, for step models.
    pub fn step_schedule(&self) -> Result<Option<Vec<(u32, u64)>>, PacerError> {
        let LoadModel::Steps { points } = self else {
            return Ok(None);
        };

        let ramp = RampPacer::from_rpm_steps(points)?;
        let last = points.iter().map(|&(minute, _)| minute).max().unwrap_or(0);
        Ok(Some(
            (0..=last)
                .map(|minute| (minute, ramp.rpm_at_minute(minute)))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_model() {
        let pacer = LoadModel::Constant {
            rate: Rate::per_second(4),
        }
        .to_pacer()
        .unwrap();
        assert_eq!(pacer.rate(Duration::from_secs(100)), 4.0);
    }

    #[test]
    fn test_linear_model() {
        let pacer = LoadModel::Linear {
            start: Rate::per_second(0),
            target: Rate::per_second(10),
            ramp_up: Duration::from_secs(10),
        }
        .to_pacer()
        .unwrap();
        assert!((pacer.rate(Duration::from_secs(5)) - 5.0).abs() < 1e-9);
        assert_eq!(pacer.rate(Duration::from_secs(60)), 10.0);
    }

    #[test]
    fn test_steps_model_rejects_unsorted() {
        let model = LoadModel::Steps {
            points: vec![(5, 10), (1, 20)],
        };
        assert!(matches!(
            model.to_pacer(),
            Err(PacerError::UnsortedPoints { .. })
        ));
    }

    #[test]
    fn test_step_schedule() {
        let model = LoadModel::Steps {
            points: vec![(2, 10), (3, 12), (6, 16), (8, 20)],
        };
        let schedule = model.step_schedule().unwrap().unwrap();
        let rpms: Vec<u64> = schedule.iter().map(|&(_, rpm)| rpm).collect();
        assert_eq!(rpms, vec![10, 10, 10, 12, 13, 14, 16, 18, 20]);

        let constant = LoadModel::Constant {
            rate: Rate::per_minute(10),
        };
        assert!(constant.step_schedule().unwrap().is_none());
    }
}
