use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::models::{SessionMode, Stage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    pub stage: Stage,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Subtask {
    pub fn new(id: impl Into<String>, description: impl Into<String>, stage: Stage) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            stage,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}

/// Display record of how a task was split up. Nothing reads it for control
/// flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub task: String,
    pub mode: SessionMode,
    pub subtasks: Vec<Subtask>,
    pub execution_order: Vec<String>,
    pub rationale: Vec<String>,
}

impl Decomposition {
    pub fn for_task(task: &str, mode: SessionMode) -> Self {
        let (subtasks, rationale) = match mode {
            SessionMode::Single => (
                vec![Subtask::new("respond", "Answer the task directly", Stage::Act)],
                vec!["Single-stage mode: one direct gateway call answers the task".to_string()],
            ),
            SessionMode::TwoStage => (
                vec![
                    Subtask::new("plan", "Analyse the task and outline the approach", Stage::Plan),
                    Subtask::new("act", "Carry out the plan and produce the answer", Stage::Act)
                        .depends_on("plan"),
                ],
                vec![
                    "Two-stage mode: the plan stage analyses the task first".to_string(),
                    "The act stage receives the plan output alongside the task".to_string(),
                ],
            ),
        };

        Self::new(task, mode, subtasks, rationale)
    }

    pub fn new(
        task: impl Into<String>,
        mode: SessionMode,
        subtasks: Vec<Subtask>,
        rationale: Vec<String>,
    ) -> Self {
        let execution_order = execution_order(&subtasks);
        Self {
            task: task.into(),
            mode,
            subtasks,
            execution_order,
            rationale,
        }
    }
}

/// Order subtasks so each runs after the ones it depends on.
///
/// Uses Kahn's algorithm, breaking ties by declaration order. References
/// to unknown ids are ignored. When the dependencies contain a cycle the
/// declaration order is returned unchanged.
pub fn execution_order(subtasks: &[Subtask]) -> Vec<String> {
    let position: HashMap<&str, usize> = subtasks
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; subtasks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); subtasks.len()];

    for (i, subtask) in subtasks.iter().enumerate() {
        for dep in &subtask.depends_on {
            if let Some(&d) = position.get(dep.as_str()) {
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..subtasks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(subtasks.len());

    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if order.len() < subtasks.len() {
        return subtasks.iter().map(|s| s.id.clone()).collect();
    }

    order.into_iter().map(|i| subtasks[i].id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Subtask {
        Subtask::new(id, id, Stage::Act)
    }

    #[test]
    fn test_dependencies_come_first() {
        let subtasks = vec![
            task("deploy").depends_on("test"),
            task("build"),
            task("test").depends_on("build"),
        ];
        assert_eq!(execution_order(&subtasks), vec!["build", "test", "deploy"]);
    }

    #[test]
    fn test_cycle_falls_back_to_declaration_order() {
        let subtasks = vec![task("a").depends_on("b"), task("b").depends_on("a")];
        assert_eq!(execution_order(&subtasks), vec!["a", "b"]);
    }

    #[test]
    fn test_partial_cycle_falls_back_too() {
        let subtasks = vec![
            task("x"),
            task("a").depends_on("b"),
            task("b").depends_on("a"),
        ];
        assert_eq!(execution_order(&subtasks), vec!["x", "a", "b"]);
    }

    #[test]
    fn test_unknown_dependency_ignored() {
        let subtasks = vec![task("a").depends_on("ghost"), task("b")];
        assert_eq!(execution_order(&subtasks), vec!["a", "b"]);
    }

    #[test]
    fn test_two_stage_decomposition() {
        let decomposition = Decomposition::for_task("write a parser", SessionMode::TwoStage);
        assert_eq!(decomposition.execution_order, vec!["plan", "act"]);
        assert_eq!(decomposition.rationale.len(), 2);

        let single = Decomposition::for_task("hi", SessionMode::Single);
        assert_eq!(single.subtasks.len(), 1);
    }
}
