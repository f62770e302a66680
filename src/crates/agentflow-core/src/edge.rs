//! Edge groups: routing rules between executors
//!
//! ```text
//! Single      a ──▶ b                 (optional condition)
//! FanOut      a ──▶ {b, c, d}         (all targets, or the subset a selector picks)
//! SwitchCase  a ──▶ first matching case, else default
//! FanIn       {a, b, c} ──▶ d         (one batch once every producer contributed)
//! ```
//!
//! Predicates and selectors are pure functions of the payload. Every group has a stable id
//! derived from its endpoints; fan-in buffers are keyed by it in checkpoints.

use crate::message::Payload;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

pub type EdgeCondition = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;

/// Picks a subset of the candidate targets for a payload.
pub type EdgeSelector = Arc<dyn Fn(&Payload, &[String]) -> Vec<String> + Send + Sync>;

/// One branch of a switch-case group.
#[derive(Clone)]
pub struct Case {
    pub target: String,
    pub predicate: EdgeCondition,
}

impl Case {
    pub fn new<F>(target: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        Self {
            target: target.into(),
            predicate: Arc::new(predicate),
        }
    }
}

#[derive(Clone)]
pub enum EdgeGroup {
    Single {
        source: String,
        target: String,
        condition: Option<EdgeCondition>,
    },
    FanOut {
        source: String,
        targets: Vec<String>,
        selector: Option<EdgeSelector>,
    },
    SwitchCase {
        source: String,
        cases: Vec<Case>,
        default: Option<String>,
    },
    FanIn {
        sources: Vec<String>,
        target: String,
    },
}

impl EdgeGroup {
    pub fn id(&self) -> String {
        match self {
            Self::Single { source, target, .. } => format!("single:{}->{}", source, target),
            Self::FanOut { source, targets, .. } => {
                format!("fan_out:{}->[{}]", source, targets.join(","))
            }
            Self::SwitchCase { source, .. } => {
                format!("switch:{}->[{}]", source, self.targets().join(","))
            }
            Self::FanIn { sources, target } => {
                format!("fan_in:[{}]->{}", sources.join(","), target)
            }
        }
    }

    pub fn sources(&self) -> Vec<&str> {
        match self {
            Self::Single { source, .. }
            | Self::FanOut { source, .. }
            | Self::SwitchCase { source, .. } => vec![source.as_str()],
            Self::FanIn { sources, .. } => sources.iter().map(String::as_str).collect(),
        }
    }

    /// Every executor this group can deliver to, in declaration order.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Self::Single { target, .. } | Self::FanIn { target, .. } => vec![target.as_str()],
            Self::FanOut { targets, .. } => targets.iter().map(String::as_str).collect(),
            Self::SwitchCase { cases, default, .. } => {
                let mut targets: Vec<&str> = cases.iter().map(|c| c.target.as_str()).collect();
                if let Some(default) = default {
                    targets.push(default.as_str());
                }
                targets
            }
        }
    }

    pub fn has_source(&self, source: &str) -> bool {
        self.sources().contains(&source)
    }

    pub fn is_fan_in(&self) -> bool {
        matches!(self, Self::FanIn { .. })
    }

    /// Targets a payload from `source` is routed to. Fan-in groups are handled by the runner.
    pub fn select_targets(&self, payload: &Payload) -> Vec<String> {
        match self {
            Self::Single {
                target, condition, ..
            } => match condition {
                Some(condition) if !condition(payload) => Vec::new(),
                _ => vec![target.clone()],
            },
            Self::FanOut {
                targets, selector, ..
            } => match selector {
                Some(selector) => {
                    let chosen = selector(payload, targets);
                    // Keep declaration order and drop anything that is not a declared target.
                    targets
                        .iter()
                        .filter(|t| chosen.contains(t))
                        .cloned()
                        .collect()
                }
                None => targets.clone(),
            },
            Self::SwitchCase { cases, default, .. } => cases
                .iter()
                .find(|case| (case.predicate)(payload))
                .map(|case| case.target.clone())
                .or_else(|| default.clone())
                .into_iter()
                .collect(),
            Self::FanIn { target, .. } => vec![target.clone()],
        }
    }
}

impl fmt::Debug for EdgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// Contributions waiting at a fan-in group, per producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FanInBuffer {
    pending: BTreeMap<String, VecDeque<Payload>>,
}

impl FanInBuffer {
    pub fn push(&mut self, source: &str, payload: Payload) {
        self.pending
            .entry(source.to_string())
            .or_default()
            .push_back(payload);
    }

    /// Take one contribution from every producer, in declared order, once all have one.
    pub fn take_batch(&mut self, sources: &[String]) -> Option<Payload> {
        let ready = sources
            .iter()
            .all(|s| self.pending.get(s).map_or(false, |q| !q.is_empty()));
        if !ready {
            return None;
        }

        let items = sources
            .iter()
            .filter_map(|s| self.pending.get_mut(s).and_then(VecDeque::pop_front))
            .collect();
        self.pending.retain(|_, q| !q.is_empty());
        Some(Payload::batch(items))
    }

    pub fn is_empty(&self) -> bool {
        self.pending.values().all(VecDeque::is_empty)
    }

    pub fn buffered(&self, source: &str) -> usize {
        self.pending.get(source).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn int(n: i64) -> Payload {
        Payload::new(&n).unwrap()
    }

    #[test]
    fn test_group_ids_are_stable() {
        let fan_in = EdgeGroup::FanIn {
            sources: vec!["a".into(), "b".into()],
            target: "c".into(),
        };
        assert_eq!(fan_in.id(), "fan_in:[a,b]->c");

        let switch = EdgeGroup::SwitchCase {
            source: "a".into(),
            cases: vec![Case::new("b", |_| true)],
            default: Some("c".into()),
        };
        assert_eq!(switch.id(), "switch:a->[b,c]");
        assert_eq!(format!("{:?}", switch), "switch:a->[b,c]");
    }

    #[test]
    fn test_conditional_single() {
        let edge = EdgeGroup::Single {
            source: "a".into(),
            target: "b".into(),
            condition: Some(Arc::new(|p: &Payload| p.data.as_i64() > Some(10))),
        };
        assert!(edge.select_targets(&int(5)).is_empty());
        assert_eq!(edge.select_targets(&int(50)), vec!["b"]);
    }

    #[test]
    fn test_fan_out_selector_keeps_declared_order() {
        let edge = EdgeGroup::FanOut {
            source: "a".into(),
            targets: vec!["x".into(), "y".into(), "z".into()],
            selector: Some(Arc::new(|_: &Payload, _: &[String]| {
                vec!["z".into(), "x".into(), "nope".into()]
            })),
        };
        assert_eq!(edge.select_targets(&int(1)), vec!["x", "z"]);
    }

    #[test]
    fn test_switch_case_first_match_then_default() {
        let edge = EdgeGroup::SwitchCase {
            source: "a".into(),
            cases: vec![
                Case::new("small", |p| p.data.as_i64() < Some(10)),
                Case::new("medium", |p| p.data.as_i64() < Some(100)),
            ],
            default: Some("large".into()),
        };
        assert_eq!(edge.select_targets(&int(1)), vec!["small"]);
        assert_eq!(edge.select_targets(&int(50)), vec!["medium"]);
        assert_eq!(edge.select_targets(&int(500)), vec!["large"]);
    }

    #[test]
    fn test_fan_in_waits_for_every_producer() {
        let sources = vec!["a".to_string(), "b".to_string()];
        let mut buffer = FanInBuffer::default();

        buffer.push("a", int(1));
        buffer.push("a", int(2));
        assert!(buffer.take_batch(&sources).is_none());

        buffer.push("b", int(10));
        let batch = buffer.take_batch(&sources).unwrap();
        assert_eq!(batch.kind, "list<int>");
        assert_eq!(batch.data, json!([1, 10]));

        // The second contribution from `a` waits for the next batch.
        assert!(buffer.take_batch(&sources).is_none());
        assert_eq!(buffer.buffered("a"), 1);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_fan_in_buffer_serializes() {
        let mut buffer = FanInBuffer::default();
        buffer.push("a", int(1));
        let value = serde_json::to_value(&buffer).unwrap();
        let restored: FanInBuffer = serde_json::from_value(value).unwrap();
        assert_eq!(restored, buffer);
    }
}
