//! Recursive access-control evaluation over `all_of` / `any_of` / `not` trees.

use cohort_core::experiment::Condition;
use cohort_core::types::Properties;
use std::future::Future;
use std::pin::Pin;

use crate::rules::RuleChecker;

type EvalFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Evaluates condition trees, delegating leaves to a [`RuleChecker`].
#[derive(Debug, Clone)]
pub struct ConditionEvaluator {
    checker: RuleChecker,
}

impl ConditionEvaluator {
    pub fn new(checker: RuleChecker) -> Self {
        Self { checker }
    }

    /// `all_of([])` is true, `any_of([])` is false. Both short-circuit.
    pub fn evaluate<'a>(
        &'a self,
        condition: &'a Condition,
        properties: &'a Properties,
    ) -> EvalFuture<'a> {
        Box::pin(async move {
            match condition {
                Condition::AllOf { all_of } => {
                    for child in all_of {
                        if !self.evaluate(child, properties).await {
                            return false;
                        }
                    }
                    true
                }
                Condition::AnyOf { any_of } => {
                    for child in any_of {
                        if self.evaluate(child, properties).await {
                            return true;
                        }
                    }
                    false
                }
                Condition::Not { not } => !self.evaluate(not, properties).await,
                Condition::Rule(rule) => self.checker.check(rule, properties).await,
            }
        })
    }
}
