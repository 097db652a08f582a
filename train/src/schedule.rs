//! The sequence of training tasks.

use crate::{common::*, config::ScheduleConfig};
use dwd::loss::DwdLossOutput;

/// The objective optimized during one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// The loss of a single assignment.
    Single { assign: usize },
    /// A weighted sum of several assignment losses.
    Combined {
        assigns: Vec<usize>,
        loss_factors: Vec<R64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub task: Task,
    pub iterations: usize,
}

/// Phases laid out on the global step axis.
#[derive(Debug, Clone)]
pub struct Schedule {
    phases: Vec<Phase>,
    /// The first step of each phase.
    starts: Vec<usize>,
    total_steps: usize,
}

impl Task {
    pub fn loss(&self, losses: &DwdLossOutput) -> Result<Tensor> {
        match self {
            Self::Single { assign } => Ok(losses.task_loss(*assign)?.shallow_clone()),
            Self::Combined {
                assigns,
                loss_factors,
            } => losses.combined(assigns, loss_factors),
        }
    }

    /// Assignment indexes this task trains.
    pub fn assigns(&self) -> Vec<usize> {
        match self {
            Self::Single { assign } => vec![*assign],
            Self::Combined { assigns, .. } => assigns.clone(),
        }
    }

    /// A short name used in logs.
    pub fn name(&self) -> String {
        match self {
            Self::Single { assign } => format!("assign_{}", assign),
            Self::Combined { assigns, .. } => {
                format!("combined_{}", assigns.iter().join("_"))
            }
        }
    }
}

impl Schedule {
    pub fn new(config: &ScheduleConfig, num_assignments: usize) -> Result<Self> {
        config.validate(num_assignments)?;

        let singles = config
            .do_assign
            .iter()
            .filter(|_| !config.train_only_combined)
            .map(|phase| Phase {
                task: Task::Single {
                    assign: phase.assign,
                },
                iterations: phase.iterations,
            });
        let combined = config.combined.iter().map(|phase| Phase {
            task: Task::Combined {
                assigns: phase.assigns.clone(),
                loss_factors: phase.loss_factors.clone(),
            },
            iterations: phase.iterations,
        });
        let phases: Vec<_> = singles
            .chain(combined)
            .filter(|phase| phase.iterations > 0)
            .collect();
        ensure!(!phases.is_empty(), "the training schedule has no iterations");

        let starts: Vec<_> = phases
            .iter()
            .scan(0, |start, phase| {
                let curr = *start;
                *start += phase.iterations;
                Some(curr)
            })
            .collect();
        let total_steps = phases.iter().map(|phase| phase.iterations).sum();

        Ok(Self {
            phases,
            starts,
            total_steps,
        })
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// The index of the phase the step belongs to, or `None` past the end.
    pub fn phase_index_at(&self, step: usize) -> Option<usize> {
        if step >= self.total_steps {
            return None;
        }
        let index = match self.starts.binary_search(&step) {
            Ok(index) => index,
            Err(index) => index - 1,
        };
        Some(index)
    }

    pub fn phase_at(&self, step: usize) -> Option<&Phase> {
        self.phase_index_at(step).map(|index| &self.phases[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AssignPhase, CombinedPhase};

    fn config(train_only_combined: bool) -> ScheduleConfig {
        ScheduleConfig {
            do_assign: vec![
                AssignPhase {
                    assign: 0,
                    iterations: 3,
                },
                AssignPhase {
                    assign: 1,
                    iterations: 0,
                },
                AssignPhase {
                    assign: 2,
                    iterations: 2,
                },
            ],
            combined: vec![CombinedPhase {
                assigns: vec![0, 1, 2],
                loss_factors: vec![r64(1.0), r64(1.0), r64(0.5)],
                iterations: 4,
            }],
            train_only_combined,
        }
    }

    #[test]
    fn phases_on_step_axis() -> Result<()> {
        let schedule = Schedule::new(&config(false), 3)?;
        assert_eq!(schedule.total_steps(), 9);
        assert_eq!(schedule.phases().len(), 3);

        let tasks: Vec<_> = (0..10)
            .map(|step| schedule.phase_at(step).map(|phase| phase.task.name()))
            .collect();
        assert_eq!(tasks[0].as_deref(), Some("assign_0"));
        assert_eq!(tasks[2].as_deref(), Some("assign_0"));
        assert_eq!(tasks[3].as_deref(), Some("assign_2"));
        assert_eq!(tasks[5].as_deref(), Some("combined_0_1_2"));
        assert_eq!(tasks[8].as_deref(), Some("combined_0_1_2"));
        assert_eq!(tasks[9], None);
        Ok(())
    }

    #[test]
    fn only_combined_phases() -> Result<()> {
        let schedule = Schedule::new(&config(true), 3)?;
        assert_eq!(schedule.total_steps(), 4);
        assert_eq!(schedule.phase_index_at(0), Some(0));
        Ok(())
    }

    #[test]
    fn reject_invalid_schedules() {
        assert!(Schedule::new(&config(false), 2).is_err());

        let empty = ScheduleConfig {
            do_assign: vec![],
            combined: vec![],
            train_only_combined: false,
        };
        assert!(Schedule::new(&empty, 1).is_err());
    }
}
