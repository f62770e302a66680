//! Build-time graph validation

use crate::edge::EdgeGroup;
use crate::error::ValidationError;
use crate::executor::Executor;
use crate::message::{kind_accepts, list_kind, ANY_LIST_KIND};
use std::collections::{HashMap, HashSet, VecDeque};

type Result<T> = std::result::Result<T, ValidationError>;

pub(crate) fn validate(
    start: Option<&str>,
    executors: &[Box<dyn Executor>],
    edge_groups: &[EdgeGroup],
) -> Result<()> {
    let mut kinds: HashMap<&str, (Vec<String>, Vec<String>)> = HashMap::new();
    for executor in executors {
        let previous = kinds.insert(
            executor.id(),
            (executor.input_kinds(), executor.output_kinds()),
        );
        if previous.is_some() {
            return Err(ValidationError::DuplicateExecutorId(executor.id().to_string()));
        }
    }

    let start = start.ok_or(ValidationError::MissingStartExecutor)?;
    if !kinds.contains_key(start) {
        return Err(ValidationError::UnknownStartExecutor(start.to_string()));
    }

    let mut seen = HashSet::new();
    for group in edge_groups {
        let edge = group.id();
        check_shape(group, &edge)?;

        for endpoint in group.sources().into_iter().chain(group.targets()) {
            if !kinds.contains_key(endpoint) {
                return Err(ValidationError::DanglingEdge {
                    edge,
                    executor_id: endpoint.to_string(),
                });
            }
        }

        if !seen.insert(edge.clone()) {
            return Err(ValidationError::DuplicateEdge(edge));
        }

        check_types(group, &edge, &kinds)?;
    }

    warn_unreachable(start, executors, edge_groups);
    Ok(())
}

fn check_shape(group: &EdgeGroup, edge: &str) -> Result<()> {
    let reason = match group {
        EdgeGroup::FanOut { targets, .. } if targets.len() < 2 => {
            Some("a fan-out needs at least two targets")
        }
        EdgeGroup::FanIn { sources, .. } if sources.len() < 2 => {
            Some("a fan-in needs at least two sources")
        }
        EdgeGroup::FanIn { sources, .. }
            if sources.iter().collect::<HashSet<_>>().len() != sources.len() =>
        {
            Some("fan-in sources must be distinct")
        }
        EdgeGroup::SwitchCase { cases, .. } if cases.is_empty() => {
            Some("a switch-case needs at least one case")
        }
        _ => None,
    };

    match reason {
        Some(reason) => Err(ValidationError::InvalidEdgeGroup {
            edge: edge.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Declared outputs of every source must be acceptable to every target.
fn check_types(
    group: &EdgeGroup,
    edge: &str,
    kinds: &HashMap<&str, (Vec<String>, Vec<String>)>,
) -> Result<()> {
    for source in group.sources() {
        let produced = &kinds[source].1;
        if produced.is_empty() {
            continue;
        }

        let delivered: Vec<String> = if group.is_fan_in() {
            produced
                .iter()
                .map(|k| list_kind(k))
                .chain(std::iter::once(ANY_LIST_KIND.to_string()))
                .collect()
        } else {
            produced.clone()
        };

        for target in group.targets() {
            let accepted = &kinds[target].0;
            let compatible = delivered
                .iter()
                .any(|kind| accepted.iter().any(|h| kind_accepts(h, kind)));
            if !compatible {
                return Err(ValidationError::TypeIncompatibility {
                    edge: edge.to_string(),
                    source_id: source.to_string(),
                    target: target.to_string(),
                    produced: produced.clone(),
                });
            }
        }
    }
    Ok(())
}

fn warn_unreachable(start: &str, executors: &[Box<dyn Executor>], edge_groups: &[EdgeGroup]) {
    let mut reachable = HashSet::from([start.to_string()]);
    let mut queue = VecDeque::from([start.to_string()]);

    while let Some(current) = queue.pop_front() {
        for group in edge_groups.iter().filter(|g| g.has_source(&current)) {
            for target in group.targets() {
                if reachable.insert(target.to_string()) {
                    queue.push_back(target.to_string());
                }
            }
        }
    }

    for executor in executors {
        if !reachable.contains(executor.id()) {
            tracing::warn!(executor = %executor.id(), "Executor is unreachable from the start executor");
        }
    }
}
