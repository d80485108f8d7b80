//! Weighted executor selection.
//!
//! Each executor owns a contiguous integer interval whose length is its
//! effective weight. Intervals are laid out in registration order and
//! partition `[1, total]`, so a uniform draw in that range picks every
//! executor with probability `weight / total`.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::executor::ExecutorRef;

/// Errors raised while building a chooser. Not retryable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChooserError {
    #[error("at least one executor is required")]
    NoExecutors,

    #[error("executor names can't be empty")]
    EmptyName,

    #[error("executor '{0}' is registered more than once")]
    DuplicateName(String),

    #[error("executor '{0}' has an effective weight of zero")]
    ZeroWeight(String),

    #[error("total executor weight overflows")]
    WeightOverflow,
}

/// Picks executors proportionally to their effective weight.
///
/// Built once per run and shared read-only by every worker. The random
/// source is supplied per call so tests can use a seeded generator.
#[derive(Clone)]
pub struct WeightedChooser {
    executors: Vec<ExecutorRef>,
    /// Inclusive upper bound of each executor's interval.
    upper_bounds: Vec<u64>,
    total: u64,
}

impl WeightedChooser {
    /// Builds the chooser. `overrides` replaces the configured weight of the
    /// executor with the same name.
    pub fn new(
        executors: &[ExecutorRef],
        overrides: &HashMap<String, u32>,
    ) -> Result<Self, ChooserError> {
        if executors.is_empty() {
            return Err(ChooserError::NoExecutors);
        }

        let mut seen = HashSet::with_capacity(executors.len());
        let mut upper_bounds = Vec::with_capacity(executors.len());
        let mut total: u64 = 0;

        for executor in executors {
            let name = executor.name();
            if name.is_empty() {
                return Err(ChooserError::EmptyName);
            }
            if !seen.insert(name) {
                return Err(ChooserError::DuplicateName(name.to_string()));
            }

            let weight = overrides
                .get(name)
                .copied()
                .unwrap_or_else(|| executor.options().weight);
            if weight == 0 {
                return Err(ChooserError::ZeroWeight(name.to_string()));
            }

            total = total
                .checked_add(u64::from(weight))
                .ok_or(ChooserError::WeightOverflow)?;
            upper_bounds.push(total);

            debug!(
                executor = name,
                weight = weight,
                overridden = overrides.contains_key(name),
                "Registered executor weight"
            );
        }

        Ok(Self {
            executors: executors.to_vec(),
            upper_bounds,
            total,
        })
    }

    /// Picks one executor.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> &ExecutorRef {
        self.pick_at(rng.gen_range(1..=self.total))
    }

    /// Returns the executor whose interval contains `n` (1-based).
    fn pick_at(&self, n: u64) -> &ExecutorRef {
        let index = self
            .upper_bounds
            .iter()
            .position(|&upper| n <= upper)
            .unwrap_or(self.upper_bounds.len() - 1);
        &self.executors[index]
    }

    pub fn total_weight(&self) -> u64 {
        self.total
    }

    /// Effective weight per executor, in registration order.
    pub fn weights(&self) -> Vec<(&str, u64)> {
        let mut lower = 0;
        self.executors
            .iter()
            .zip(&self.upper_bounds)
            .map(|(executor, &upper)| {
                let weight = upper - lower;
                lower = upper;
                (executor.name(), weight)
            })
            .collect()
    }

    pub fn executors(&self) -> impl Iterator<Item = &ExecutorRef> {
        self.executors.iter()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
