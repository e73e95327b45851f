//! DAG validation and ordering: run validation before persisting or
//! scheduling a workflow.
//!
//! Rules enforced on a definition:
//! 1. At least one task is declared, and task names are unique.
//! 2. Every dependency of an enabled task names another *enabled* task.
//! 3. The dependency graph restricted to enabled tasks is acyclic.
//!
//! Triggers are checked separately: the schedule must be present and parse.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::models::{Schedule, Workflow, WorkflowTask, WorkflowTrigger};
use crate::schedule::parse_cron;
use crate::ValidationError;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited,
}

/// Validate a workflow definition's task graph.
pub fn validate_workflow(workflow: &Workflow) -> Result<(), ValidationError> {
    if workflow.tasks.is_empty() {
        return Err(ValidationError::MissingTasks(workflow.id().to_string()));
    }

    let mut by_name: HashMap<&str, &WorkflowTask> = HashMap::with_capacity(workflow.tasks.len());
    for task in &workflow.tasks {
        if by_name.insert(task.name.as_str(), task).is_some() {
            return Err(ValidationError::DuplicateTask(task.name.clone()));
        }
    }

    for task in workflow.enabled_tasks() {
        for dep in &task.depends_on {
            match by_name.get(dep.as_str()) {
                None => {
                    return Err(ValidationError::UnknownDependency {
                        task: task.name.clone(),
                        dependency: dep.clone(),
                    })
                }
                Some(target) if !target.enabled => {
                    return Err(ValidationError::DisabledTaskDependency {
                        task: task.name.clone(),
                        dependency: dep.clone(),
                    })
                }
                Some(_) => {}
            }
        }
    }

    detect_cycle(workflow)
}

/// Depth-first search over the enabled tasks in declaration order. The
/// traversal keeps an explicit stack so deep graphs cannot overflow.
fn detect_cycle(workflow: &Workflow) -> Result<(), ValidationError> {
    let enabled: HashMap<&str, &WorkflowTask> = workflow
        .enabled_tasks()
        .map(|t| (t.name.as_str(), t))
        .collect();
    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(enabled.len());

    for root in workflow.enabled_tasks() {
        if marks.contains_key(root.name.as_str()) {
            continue;
        }

        // (task name, index of the next dependency to explore)
        let mut stack: Vec<(&str, usize)> = vec![(root.name.as_str(), 0)];
        marks.insert(root.name.as_str(), Mark::Visiting);

        while let Some(&(name, cursor)) = stack.last() {
            let next = enabled
                .get(name)
                .and_then(|task| task.depends_on.get(cursor))
                .map(String::as_str);

            let Some(dep) = next else {
                marks.insert(name, Mark::Visited);
                stack.pop();
                continue;
            };

            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            match marks.get(dep) {
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|(n, _)| n.to_string()).collect();
                    cycle.push(dep.to_string());
                    return Err(ValidationError::CyclicDependency(cycle));
                }
                Some(Mark::Visited) => {}
                None => {
                    marks.insert(dep, Mark::Visiting);
                    stack.push((dep, 0));
                }
            }
        }
    }

    Ok(())
}

/// Validate a trigger's schedule.
pub fn validate_trigger(trigger: &WorkflowTrigger) -> Result<(), ValidationError> {
    let id = trigger.id().to_string();
    match &trigger.schedule {
        None => return Err(ValidationError::MissingSchedule(id)),
        Some(Schedule::Cron { expression }) => {
            parse_cron(expression)
                .map_err(|reason| ValidationError::InvalidSchedule { trigger: id.clone(), reason })?;
        }
        Some(Schedule::Fixed { .. }) => {}
    }

    if let (Some(start), Some(end)) = (trigger.start_at, trigger.end_at) {
        if start > end {
            return Err(ValidationError::InvalidSchedule {
                trigger: id,
                reason: format!("start_at {start} is after end_at {end}"),
            });
        }
    }

    Ok(())
}

/// Order `tasks` so every task follows all of its dependencies.
///
/// Among tasks whose dependencies are all resolved, the one declared first
/// goes next, so the result is deterministic for a given definition.
pub fn resolve_order(tasks: &[WorkflowTask]) -> Result<Vec<&WorkflowTask>, ValidationError> {
    let index: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    let mut unresolved: Vec<usize> = vec![0; tasks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];

    for (i, task) in tasks.iter().enumerate() {
        let mut seen: HashSet<&str> = HashSet::new();
        for dep in &task.depends_on {
            if !seen.insert(dep.as_str()) {
                continue;
            }
            let &d = index.get(dep.as_str()).ok_or_else(|| ValidationError::UnknownDependency {
                task: task.name.clone(),
                dependency: dep.clone(),
            })?;
            unresolved[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = unresolved
        .iter()
        .enumerate()
        .filter(|(_, &n)| n == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut ordered = Vec::with_capacity(tasks.len());
    while let Some(Reverse(i)) = ready.pop() {
        ordered.push(&tasks[i]);
        for &dependent in &dependents[i] {
            unresolved[dependent] -= 1;
            if unresolved[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if ordered.len() != tasks.len() {
        let stuck = tasks
            .iter()
            .enumerate()
            .filter(|(i, _)| unresolved[*i] > 0)
            .map(|(_, t)| t.name.clone())
            .collect();
        return Err(ValidationError::CyclicDependency(stuck));
    }

    Ok(ordered)
}
