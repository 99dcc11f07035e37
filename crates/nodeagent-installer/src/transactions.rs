use std::fmt;

use nodeagent_core::{AgentError, AgentResult};
use thiserror::Error;

type StageFn<'a, C> = Box<dyn FnMut(&mut C) -> AgentResult<()> + 'a>;

struct TransactionStage<'a, C> {
    name: String,
    execute: StageFn<'a, C>,
    rollback: Option<StageFn<'a, C>>,
}

/// A rollback that failed, kept next to the stage it belongs to.
#[derive(Debug)]
pub struct StageError {
    pub stage: String,
    pub error: AgentError,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.error)
    }
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("{operation} failed at stage '{stage}': {error}")]
    StageExecutionFailed {
        operation: String,
        stage: String,
        error: AgentError,
    },

    #[error(
        "{operation} failed at stage '{stage}': {error}; rollback errors: {}",
        join_errors(rollback_errors)
    )]
    RollbackFailed {
        operation: String,
        stage: String,
        error: AgentError,
        rollback_errors: Vec<StageError>,
    },

    #[error("{operation} rollback incomplete: {}", join_errors(errors))]
    RollbackIncomplete {
        operation: String,
        errors: Vec<StageError>,
    },
}

impl TransactionError {
    /// The error that stopped the transaction, if a stage failed.
    pub fn error(&self) -> Option<&AgentError> {
        match self {
            Self::StageExecutionFailed { error, .. } | Self::RollbackFailed { error, .. } => {
                Some(error)
            }
            Self::RollbackIncomplete { .. } => None,
        }
    }

    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageExecutionFailed { stage, .. } | Self::RollbackFailed { stage, .. } => {
                Some(stage)
            }
            Self::RollbackIncomplete { .. } => None,
        }
    }

    pub fn rollback_errors(&self) -> &[StageError] {
        match self {
            Self::StageExecutionFailed { .. } => &[],
            Self::RollbackFailed {
                rollback_errors, ..
            } => rollback_errors,
            Self::RollbackIncomplete { errors, .. } => errors,
        }
    }
}

fn join_errors(errors: &[StageError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Runs named stages in order against one shared context, unwinding the
/// attempted stages in reverse when one of them fails.
pub struct TransactionManager<'a, C> {
    operation: String,
    stages: Vec<TransactionStage<'a, C>>,
}

impl<'a, C> TransactionManager<'a, C> {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            stages: Vec::new(),
        }
    }

    pub fn stage<E>(mut self, name: impl Into<String>, execute: E) -> Self
    where
        E: FnMut(&mut C) -> AgentResult<()> + 'a,
    {
        self.stages.push(TransactionStage {
            name: name.into(),
            execute: Box::new(execute),
            rollback: None,
        });
        self
    }

    pub fn stage_with_rollback<E, R>(mut self, name: impl Into<String>, execute: E, rollback: R) -> Self
    where
        E: FnMut(&mut C) -> AgentResult<()> + 'a,
        R: FnMut(&mut C) -> AgentResult<()> + 'a,
    {
        self.stages.push(TransactionStage {
            name: name.into(),
            execute: Box::new(execute),
            rollback: Some(Box::new(rollback)),
        });
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name.as_str()).collect()
    }

    pub fn execute(&mut self, context: &mut C) -> Result<(), TransactionError> {
        for index in 0..self.stages.len() {
            let stage = &mut self.stages[index];
            tracing::info!(operation = %self.operation, stage = %stage.name, "executing stage");

            if let Err(error) = (stage.execute)(context) {
                let stage_name = stage.name.clone();
                tracing::error!(
                    operation = %self.operation,
                    stage = %stage_name,
                    error = %error,
                    "stage failed"
                );

                let rollback_errors = self.unwind(index, context);
                return Err(if rollback_errors.is_empty() {
                    TransactionError::StageExecutionFailed {
                        operation: self.operation.clone(),
                        stage: stage_name,
                        error,
                    }
                } else {
                    TransactionError::RollbackFailed {
                        operation: self.operation.clone(),
                        stage: stage_name,
                        error,
                        rollback_errors,
                    }
                });
            }

            tracing::info!(operation = %self.operation, stage = %self.stages[index].name, "stage completed");
        }

        Ok(())
    }

    /// Rolls back every registered stage in reverse order, whether or not it
    /// ever ran.
    pub fn rollback(&mut self, context: &mut C) -> Result<(), TransactionError> {
        let Some(last) = self.stages.len().checked_sub(1) else {
            return Ok(());
        };
        let errors = self.unwind(last, context);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TransactionError::RollbackIncomplete {
                operation: self.operation.clone(),
                errors,
            })
        }
    }

    /// Runs the rollbacks of stages `0..=through` in reverse order and
    /// collects their errors.
    fn unwind(&mut self, through: usize, context: &mut C) -> Vec<StageError> {
        let mut errors = Vec::new();
        let attempted = &mut self.stages[..=through];
        if attempted.iter().all(|stage| stage.rollback.is_none()) {
            return errors;
        }

        for stage in attempted.iter_mut().rev() {
            let Some(rollback) = stage.rollback.as_mut() else {
                continue;
            };
            tracing::info!(operation = %self.operation, stage = %stage.name, "rolling back stage");
            if let Err(error) = rollback(context) {
                tracing::error!(
                    operation = %self.operation,
                    stage = %stage.name,
                    error = %error,
                    "rollback failed"
                );
                errors.push(StageError {
                    stage: stage.name.clone(),
                    error,
                });
            }
        }
        errors
    }
}
