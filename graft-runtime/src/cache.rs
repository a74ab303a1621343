//! Operation plan memoization.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::PlanError;
use crate::plan::OperationPlan;

/// Caches plans for one loaded supergraph, keyed by the operation
/// document text and operation name.
///
/// The cache lives and dies with its supergraph: a hot reload swaps in a
/// fresh one, so plans never outlive the schema they were planned
/// against. Hit and miss counts make re-planning cost observable.
#[derive(Default)]
pub struct PlanCache {
    plans: DashMap<PlanKey, Arc<OperationPlan>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

type PlanKey = (String, Option<String>);

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached plan for the keyed operation, planning it with
    /// `plan_fn` on a miss. Failed plans are not cached.
    pub(crate) fn get_or_plan(
        &self,
        query: &str,
        operation_name: Option<&str>,
        plan_fn: impl FnOnce() -> Result<OperationPlan, PlanError>,
    ) -> Result<Arc<OperationPlan>, PlanError> {
        let key = (query.to_string(), operation_name.map(str::to_string));
        if let Some(plan) = self.plans.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(plan.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let plan = Arc::new(plan_fn()?);
        // two planners racing the same key both produce a valid plan;
        // last insert wins
        self.plans.insert(key, plan.clone());
        Ok(plan)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}
