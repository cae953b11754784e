//! Dependency graph over the task types of a template.
//!
//! Design:
//! - Forward edges: task -> types it depends on (waits for)
//! - Reverse edges: task -> types that depend on it (waiting tasks)
//! - Invariant: edges and reverse_edges must be kept in sync

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::task::{Task, TaskType};
use crate::error::TemplateError;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Every declared node, including ones with no edges.
    nodes: BTreeSet<TaskType>,

    edges: BTreeMap<TaskType, BTreeSet<TaskType>>,

    reverse_edges: BTreeMap<TaskType, BTreeSet<TaskType>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut graph = Self::new();
        for task in tasks {
            graph.add_node(task.task_type.clone());
            for dep in &task.depends_on {
                graph.add_dependency(task.task_type.clone(), dep.clone());
            }
        }
        graph
    }

    pub fn add_node(&mut self, task: TaskType) {
        self.nodes.insert(task);
    }

    /// `task` waits for `depends_on`. Both become nodes.
    pub fn add_dependency(&mut self, task: TaskType, depends_on: TaskType) {
        self.nodes.insert(task.clone());
        self.nodes.insert(depends_on.clone());
        self.edges
            .entry(task.clone())
            .or_default()
            .insert(depends_on.clone());
        self.reverse_edges.entry(depends_on).or_default().insert(task);
    }

    pub fn dependencies_of(&self, task: &TaskType) -> Vec<TaskType> {
        self.edges
            .get(task)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Types that wait for `task`.
    pub fn dependents_of(&self, task: &TaskType) -> Vec<TaskType> {
        self.reverse_edges
            .get(task)
            .map(|waiting| waiting.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Kahn's algorithm. Returns the types in an order where every type
    /// comes after its dependencies, or `Err` with a type that sits on a cycle.
    pub fn topological_order(&self) -> Result<Vec<TaskType>, TaskType> {
        let mut in_degree: BTreeMap<&TaskType, usize> = self
            .nodes
            .iter()
            .map(|n| (n, self.edges.get(n).map_or(0, BTreeSet::len)))
            .collect();

        let mut ready: VecDeque<&TaskType> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node) = ready.pop_front() {
            order.push(node.clone());
            for waiting in self.reverse_edges.get(node).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(waiting) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(waiting);
                    }
                }
            }
        }

        // Whatever still has unmet edges sits on (or behind) a cycle.
        match in_degree.into_iter().find(|(_, d)| *d > 0) {
            Some((node, _)) => Err(node.clone()),
            None => Ok(order),
        }
    }
}

/// Check that a template can seed work orders: at least one task, unique
/// non-empty types, dependencies that name declared types, no cycles.
pub fn validate_template(tasks: &[Task]) -> Result<(), TemplateError> {
    if tasks.is_empty() {
        return Err(TemplateError::NoSteps);
    }

    let mut declared = BTreeSet::new();
    for task in tasks {
        if task.task_type.as_str().trim().is_empty() {
            return Err(TemplateError::EmptyType);
        }
        if !declared.insert(&task.task_type) {
            return Err(TemplateError::DuplicateType(task.task_type.clone()));
        }
    }

    for task in tasks {
        for dep in &task.depends_on {
            if dep == &task.task_type {
                return Err(TemplateError::SelfDependency(task.task_type.clone()));
            }
            if !declared.contains(dep) {
                return Err(TemplateError::UnknownDependency {
                    task: task.task_type.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    DependencyGraph::from_tasks(tasks)
        .topological_order()
        .map(|_| ())
        .map_err(TemplateError::Cycle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(name: &str) -> TaskType {
        TaskType::new(name)
    }

    fn task(name: &str, deps: &[&str]) -> Task {
        Task::pending(t(name), deps.iter().map(|d| t(d)).collect())
    }

    #[test]
    fn add_dependency_keeps_both_directions() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(t("B"), t("A")); // B depends on A

        assert_eq!(graph.dependencies_of(&t("B")), vec![t("A")]);
        assert!(graph.dependencies_of(&t("A")).is_empty());
        assert_eq!(graph.dependents_of(&t("A")), vec![t("B")]);
    }

    #[test]
    fn topological_order_puts_dependencies_first() {
        let graph = DependencyGraph::from_tasks(&[
            task("CLEANUP", &["VOD_PACKAGE"]),
            task("VOD_PACKAGE", &["ABR_TRANSCODE", "TRANSCRIBE"]),
            task("ABR_TRANSCODE", &[]),
            task("TRANSCRIBE", &[]),
        ]);
        let order = graph.topological_order().unwrap();
        let pos = |name: &str| order.iter().position(|x| x.as_str() == name).unwrap();
        assert!(pos("ABR_TRANSCODE") < pos("VOD_PACKAGE"));
        assert!(pos("TRANSCRIBE") < pos("VOD_PACKAGE"));
        assert!(pos("VOD_PACKAGE") < pos("CLEANUP"));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        // A -> B -> D, A -> C -> D, plus shortcut A -> D
        let graph = DependencyGraph::from_tasks(&[
            task("A", &[]),
            task("B", &["A"]),
            task("C", &["A"]),
            task("D", &["B", "C", "A"]),
        ]);
        assert!(graph.topological_order().is_ok());
    }

    #[test]
    fn longer_cycle_is_detected() {
        // B -> C -> D -> B
        let graph = DependencyGraph::from_tasks(&[
            task("A", &[]),
            task("B", &["A", "D"]),
            task("C", &["B"]),
            task("D", &["C"]),
        ]);
        let on_cycle = graph.topological_order().unwrap_err();
        assert!(["B", "C", "D"].contains(&on_cycle.as_str()));
    }

    #[test]
    fn validate_accepts_media_pipeline() {
        let tasks = [
            task("ABR_TRANSCODE", &[]),
            task("TRANSCRIBE", &[]),
            task("VOD_PACKAGE", &["ABR_TRANSCODE", "TRANSCRIBE"]),
            task("CLEANUP", &["VOD_PACKAGE"]),
        ];
        assert_eq!(validate_template(&tasks), Ok(()));
    }

    #[test]
    fn validate_rejects_bad_templates() {
        assert_eq!(validate_template(&[]), Err(TemplateError::NoSteps));
        assert_eq!(
            validate_template(&[task("A", &[]), task("A", &[])]),
            Err(TemplateError::DuplicateType(t("A")))
        );
        assert_eq!(
            validate_template(&[task("A", &["A"])]),
            Err(TemplateError::SelfDependency(t("A")))
        );
        assert_eq!(
            validate_template(&[task("A", &["Z"])]),
            Err(TemplateError::UnknownDependency {
                task: t("A"),
                dependency: t("Z")
            })
        );
        assert!(matches!(
            validate_template(&[task("A", &["B"]), task("B", &["A"])]),
            Err(TemplateError::Cycle(_))
        ));
        assert_eq!(
            validate_template(&[task(" ", &[])]),
            Err(TemplateError::EmptyType)
        );
    }
}
