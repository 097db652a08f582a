use crate::{common::*, config::LearningRateSchedule};

#[derive(Debug, Clone)]
pub enum LrScheduler {
    Constant {
        lr: R64,
    },
    StepWise {
        lr_cache: f64,
        step: usize,
        index: usize,
        steps: Vec<(usize, R64)>,
    },
}

impl LrScheduler {
    pub fn new(config: &LearningRateSchedule, init_step: impl Into<Option<usize>>) -> Result<Self> {
        let init_step = init_step.into();

        let mut scheduler = match *config {
            LearningRateSchedule::Constant { lr } => {
                ensure!(lr > 0.0, "the lr must be positive");
                Self::Constant { lr }
            }
            LearningRateSchedule::StepWise { ref steps } => {
                ensure!(
                    !steps.is_empty() && steps[0].0 == 0,
                    "the steps must start from zero"
                );

                steps.iter().try_fold(None, |prev_step, (curr_step, lr)| {
                    if let Some(prev_step) = prev_step {
                        ensure!(curr_step > prev_step, "the steps must be monotonic");
                    }
                    ensure!(lr.raw() > 0.0, "lr must be positive");
                    Ok(Some(curr_step))
                })?;

                Self::StepWise {
                    lr_cache: steps[0].1.raw(),
                    step: 0,
                    index: 0,
                    steps: steps.clone(),
                }
            }
        };

        if let Some(init_step) = init_step {
            scheduler.set_step(init_step);
        }

        Ok(scheduler)
    }

    pub fn set_step(&mut self, new_step: usize) {
        if let Self::StepWise {
            step,
            index,
            steps,
            lr_cache,
        } = self
        {
            *step = new_step;
            let new_index = match steps.binary_search_by_key(&new_step, |(step_thresh, _lr)| *step_thresh)
            {
                Ok(new_index) => new_index,
                Err(new_index) => new_index.saturating_sub(1),
            };
            *index = new_index;
            *lr_cache = steps[new_index].1.raw();
        }
    }

    pub fn lr(&self) -> f64 {
        match self {
            Self::Constant { lr } => lr.raw(),
            Self::StepWise { lr_cache, .. } => *lr_cache,
        }
    }

    /// Returns the lr of the current step and advances by one step.
    pub fn next(&mut self) -> f64 {
        match self {
            Self::Constant { lr } => lr.raw(),
            Self::StepWise {
                step,
                index,
                steps,
                lr_cache,
            } => {
                let lr = steps[*index].1.raw();
                *step += 1;
                let next_index = *index + 1;
                if next_index < steps.len() && *step == steps[next_index].0 {
                    *index = next_index;
                }
                *lr_cache = lr;
                lr
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_wise_schedule() -> Result<()> {
        let config = LearningRateSchedule::StepWise {
            steps: vec![(0, r64(0.1)), (2, r64(0.01)), (4, r64(0.001))],
        };

        let mut scheduler = LrScheduler::new(&config, None)?;
        let lrs: Vec<_> = (0..5).map(|_| scheduler.next()).collect();
        assert_eq!(lrs, vec![0.1, 0.1, 0.01, 0.01, 0.001]);

        let mut resumed = LrScheduler::new(&config, 3)?;
        assert_eq!(resumed.lr(), 0.01);
        assert_eq!(resumed.next(), 0.01);
        assert_eq!(resumed.next(), 0.001);
        Ok(())
    }

    #[test]
    fn reject_bad_schedules() {
        let unordered = LearningRateSchedule::StepWise {
            steps: vec![(0, r64(0.1)), (5, r64(0.01)), (3, r64(0.001))],
        };
        assert!(LrScheduler::new(&unordered, None).is_err());

        let late_start = LearningRateSchedule::StepWise {
            steps: vec![(1, r64(0.1))],
        };
        assert!(LrScheduler::new(&late_start, None).is_err());

        let zero = LearningRateSchedule::Constant { lr: r64(0.0) };
        assert!(LrScheduler::new(&zero, None).is_err());
    }
}
