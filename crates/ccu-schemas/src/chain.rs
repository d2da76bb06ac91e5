//! Ordered step arena for one order.
//!
//! Steps are kept in execution order. Two indexes sit beside the vector:
//! id → position, and id → id of the step that depends on it. Both are
//! rebuilt after every structural change, so lookups on the scheduling path
//! never scan the chain.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Step, StepState};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Step>", into = "Vec<Step>")]
pub struct StepChain {
    steps: Vec<Step>,
    position: HashMap<String, usize>,
    dependents: HashMap<String, String>,
}

impl From<Vec<Step>> for StepChain {
    fn from(steps: Vec<Step>) -> Self {
        Self::new(steps)
    }
}

impl From<StepChain> for Vec<Step> {
    fn from(chain: StepChain) -> Self {
        chain.steps
    }
}

impl StepChain {
    pub fn new(steps: Vec<Step>) -> Self {
        let mut chain = Self {
            steps,
            position: HashMap::new(),
            dependents: HashMap::new(),
        };
        chain.reindex();
        chain
    }

    fn reindex(&mut self) {
        self.position.clear();
        self.dependents.clear();
        for (i, step) in self.steps.iter().enumerate() {
            self.position.insert(step.id.clone(), i);
            if let Some(dep) = &step.dependent_action_id {
                self.dependents.insert(dep.clone(), step.id.clone());
            }
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.position.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&Step> {
        self.position(id).map(|i| &self.steps[i])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Step> {
        let i = self.position(id)?;
        Some(&mut self.steps[i])
    }

    /// The step that waits on `id`, if any.
    pub fn dependent_of(&self, id: &str) -> Option<&Step> {
        self.dependents.get(id).and_then(|d| self.get(d))
    }

    /// The in-chain step `id` waits on. External predecessors yield `None`.
    pub fn predecessor(&self, id: &str) -> Option<&Step> {
        let dep = self.get(id)?.dependent_action_id.as_deref()?;
        self.get(dep)
    }

    pub fn is_last(&self, id: &str) -> bool {
        self.position(id)
            .map(|i| i + 1 == self.steps.len())
            .unwrap_or(false)
    }

    /// Whether every predecessor of `id` is satisfied: no dependency, a
    /// dependency outside this chain, or a finished in-chain dependency.
    pub fn is_unblocked(&self, id: &str) -> bool {
        match self.get(id).and_then(|s| s.dependent_action_id.as_deref()) {
            None => true,
            Some(dep) => self
                .get(dep)
                .map(|d| d.state == StepState::Finished)
                .unwrap_or(true),
        }
    }

    /// Ids of enqueued steps whose dependency is absent or lies outside the chain.
    pub fn independent_ids(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| s.state == StepState::Enqueued)
            .filter(|s| match &s.dependent_action_id {
                None => true,
                Some(dep) => !self.position.contains_key(dep),
            })
            .map(|s| s.id.clone())
            .collect()
    }

    /// Splice `step` directly in front of `before_id`: the new step inherits
    /// the old dependency and `before_id` is re-pointed at the new step.
    ///
    /// Returns `false` (and leaves the chain untouched) when `before_id` is unknown.
    pub fn insert_before(&mut self, before_id: &str, mut step: Step) -> bool {
        let Some(i) = self.position(before_id) else {
            return false;
        };
        step.dependent_action_id = self.steps[i].dependent_action_id.take();
        self.steps[i].dependent_action_id = Some(step.id.clone());
        self.steps.insert(i, step);
        self.reindex();
        true
    }

    /// Force every enqueued or running step to `Cancelled`. Returns their ids.
    pub fn cancel_open(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut cancelled = Vec::new();
        for step in self.steps.iter_mut().filter(|s| s.is_open()) {
            step.state = StepState::Cancelled;
            step.stopped_at = Some(now);
            cancelled.push(step.id.clone());
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Command, ModuleType, NavigationSource};

    fn three_step_chain() -> StepChain {
        let a = Step::navigation(NavigationSource::Start, ModuleType::Hbw, None);
        let b = Step::manufacture(ModuleType::Hbw, Command::Drop, Some(a.id.clone()));
        let c = Step::navigation(
            NavigationSource::Module(ModuleType::Hbw),
            ModuleType::Mill,
            Some(b.id.clone()),
        );
        StepChain::new(vec![a, b, c])
    }

    #[test]
    fn dependents_and_predecessors_resolve_through_index() {
        let chain = three_step_chain();
        let ids: Vec<String> = chain.iter().map(|s| s.id.clone()).collect();
        assert_eq!(chain.dependent_of(&ids[0]).unwrap().id, ids[1]);
        assert_eq!(chain.predecessor(&ids[2]).unwrap().id, ids[1]);
        assert!(chain.predecessor(&ids[0]).is_none());
        assert!(chain.is_last(&ids[2]));
        assert_eq!(chain.independent_ids(), vec![ids[0].clone()]);
    }

    #[test]
    fn insert_before_repoints_dependencies() {
        let mut chain = three_step_chain();
        let ids: Vec<String> = chain.iter().map(|s| s.id.clone()).collect();
        let extra = Step::navigation(
            NavigationSource::Module(ModuleType::Hbw),
            ModuleType::Hbw,
            None,
        );
        let extra_id = extra.id.clone();

        assert!(chain.insert_before(&ids[1], extra));
        assert_eq!(chain.len(), 4);
        assert_eq!(chain.position(&extra_id), Some(1));
        assert_eq!(
            chain.get(&extra_id).unwrap().dependent_action_id.as_deref(),
            Some(ids[0].as_str())
        );
        assert_eq!(
            chain.get(&ids[1]).unwrap().dependent_action_id.as_deref(),
            Some(extra_id.as_str())
        );
        assert_eq!(chain.dependent_of(&ids[0]).unwrap().id, extra_id);
    }

    #[test]
    fn external_dependency_counts_as_independent() {
        let a = Step::navigation(
            NavigationSource::Start,
            ModuleType::Hbw,
            Some("step-from-another-order".to_string()),
        );
        let id = a.id.clone();
        let chain = StepChain::new(vec![a]);
        assert_eq!(chain.independent_ids(), vec![id.clone()]);
        assert!(chain.is_unblocked(&id));
    }

    #[test]
    fn serializes_as_plain_array() {
        let chain = three_step_chain();
        let v = serde_json::to_value(&chain).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 3);
        let back: StepChain = serde_json::from_value(v).unwrap();
        assert_eq!(back.len(), 3);
        assert!(back.dependent_of(&chain.steps()[1].id).is_some());
    }
}
