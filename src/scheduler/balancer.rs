//! Load balancer: pick one agent from the available candidates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::agent::Agent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    LeastLoaded,
}

/// Stateless per call except for the round-robin cursor.
pub struct LoadBalancer {
    strategy: Strategy,
    cursor: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Selecting from an empty list returns None; the caller leaves the
    /// task queued and tries again on a later pass.
    pub fn pick(
        &self,
        candidates: &[Agent],
        running_index: &HashMap<String, Vec<String>>,
    ) -> Option<Agent> {
        if candidates.is_empty() {
            return None;
        }

        let chosen = match self.strategy {
            Strategy::RoundRobin => {
                let i = self.cursor.fetch_add(1, Ordering::Relaxed);
                &candidates[i % candidates.len()]
            }
            Strategy::LeastLoaded => {
                // min_by_key keeps the first minimum, which preserves the
                // input-order tiebreak.
                candidates
                    .iter()
                    .min_by_key(|agent| {
                        running_index.get(&agent.id).map_or(0, |ids| ids.len())
                    })?
            }
        };
        Some(chosen.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentKind, AgentRuntimeConfig};
    use std::collections::BTreeSet;

    fn agent(name: &str) -> Agent {
        Agent::new(
            name.to_string(),
            AgentKind::Claude,
            BTreeSet::new(),
            AgentRuntimeConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_round_robin_cycles_in_order() {
        let balancer = LoadBalancer::new(Strategy::RoundRobin);
        let candidates = vec![agent("a"), agent("b"), agent("c")];
        let running = HashMap::new();

        for i in 0..9 {
            let picked = balancer.pick(&candidates, &running).unwrap();
            assert_eq!(picked.id, candidates[i % 3].id, "dispatch {}", i);
        }
    }

    #[test]
    fn test_least_loaded_picks_minimum() {
        let balancer = LoadBalancer::new(Strategy::LeastLoaded);
        let candidates = vec![agent("a"), agent("b"), agent("c")];

        let mut running = HashMap::new();
        running.insert(candidates[0].id.clone(), vec!["t1".to_string(), "t2".to_string()]);
        running.insert(candidates[1].id.clone(), vec!["t3".to_string()]);

        let picked = balancer.pick(&candidates, &running).unwrap();
        assert_eq!(picked.id, candidates[2].id);
    }

    #[test]
    fn test_least_loaded_tie_breaks_by_input_order() {
        let balancer = LoadBalancer::new(Strategy::LeastLoaded);
        let candidates = vec![agent("a"), agent("b")];

        let picked = balancer.pick(&candidates, &HashMap::new()).unwrap();
        assert_eq!(picked.id, candidates[0].id);
    }

    #[test]
    fn test_empty_candidates_yield_none() {
        let balancer = LoadBalancer::new(Strategy::RoundRobin);
        assert!(balancer.pick(&[], &HashMap::new()).is_none());
    }
}
