//! 流程步骤图
//!
//! 用邻接表描述步骤之间的出边（next_step + 分支目标），在注册时做结构校验：
//! 引用完整性、默认分支位置、「变更前必须确认」、以及非阻塞步骤组成的死循环。

use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::ProcessError;
use crate::process::types::*;

/// 流程步骤图
pub struct StepGraph {
    /// 邻接表：步骤 ID -> 后继步骤列表
    pub adjacency: HashMap<StepId, Vec<StepId>>,
}

impl StepGraph {
    pub fn new(definition: &ProcessDefinition) -> Self {
        let adjacency = definition
            .steps
            .iter()
            .map(|step| {
                let next = step.successors().into_iter().map(str::to_string).collect();
                (step.id.clone(), next)
            })
            .collect();
        Self { adjacency }
    }

    pub fn successors(&self, step_id: &str) -> &[StepId] {
        self.adjacency.get(step_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 从 start 可达的全部步骤（含 start）
    pub fn reachable_from(&self, start: &str) -> HashSet<StepId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start.to_string()]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            for next in self.successors(&id) {
                queue.push_back(next.clone());
            }
        }
        seen
    }

    /// 不经过任何 confirm 步骤即可到达的变更型 execute 步骤（按定义顺序返回第一个）
    pub fn find_unconfirmed_mutation(&self, definition: &ProcessDefinition) -> Option<StepId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([definition.initial_step.clone()]);
        let mut hits = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(step) = definition.step(&id) else {
                continue;
            };
            match &step.kind {
                StepKind::Confirm { .. } => continue,
                StepKind::Execute { mutates: true, .. } => {
                    hits.insert(id.clone());
                }
                _ => {}
            }
            for next in self.successors(&id) {
                queue.push_back(next.clone());
            }
        }
        definition
            .step_ids()
            .find(|id| hits.contains(*id))
            .map(str::to_string)
    }

    /// 只由非阻塞步骤（execute / branch / respond）组成的环，返回环上的一个步骤
    pub fn find_non_blocking_cycle(&self, definition: &ProcessDefinition) -> Option<StepId> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            id: &str,
            graph: &StepGraph,
            definition: &ProcessDefinition,
            marks: &mut HashMap<String, Mark>,
        ) -> Option<StepId> {
            match marks.get(id) {
                Some(Mark::Visiting) => return Some(id.to_string()),
                Some(Mark::Done) => return None,
                None => {}
            }
            marks.insert(id.to_string(), Mark::Visiting);
            for next in graph.successors(id) {
                let non_blocking = definition
                    .step(next)
                    .is_some_and(|s| !s.kind.may_block());
                if non_blocking {
                    if let Some(hit) = visit(next, graph, definition, marks) {
                        return Some(hit);
                    }
                }
            }
            marks.insert(id.to_string(), Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        for step in &definition.steps {
            if step.kind.may_block() || marks.contains_key(&step.id) {
                continue;
            }
            if let Some(hit) = visit(&step.id, self, definition, &mut marks) {
                return Some(hit);
            }
        }
        None
    }
}

/// 结构校验；错误信息只面向开发者
pub fn validate(definition: &ProcessDefinition) -> Result<(), ProcessError> {
    let pid = definition.id.as_str();

    if definition.steps.is_empty() {
        return Err(ProcessError::invalid(pid, "process has no steps"));
    }
    if definition.step_index.len() != definition.steps.len() {
        return Err(ProcessError::invalid(pid, "duplicate step ids"));
    }
    if definition.step(&definition.initial_step).is_none() {
        return Err(ProcessError::invalid(
            pid,
            format!("initial step '{}' does not exist", definition.initial_step),
        ));
    }

    for step in &definition.steps {
        for target in step.successors() {
            if definition.step(target).is_none() {
                return Err(ProcessError::invalid(
                    pid,
                    format!("step '{}' points to unknown step '{target}'", step.id),
                ));
            }
        }
        match &step.kind {
            StepKind::Collect { slots } => {
                if let Some(missing) = slots.iter().find(|s| definition.slot(s).is_none()) {
                    return Err(ProcessError::invalid(
                        pid,
                        format!("collect step '{}' references undeclared slot '{missing}'", step.id),
                    ));
                }
                if step.next_step.is_none() {
                    return Err(ProcessError::invalid(
                        pid,
                        format!("collect step '{}' has no next step", step.id),
                    ));
                }
            }
            StepKind::Branch { branches } => {
                let default_at = branches.iter().position(|b| b.is_default);
                match default_at {
                    None => {
                        return Err(ProcessError::invalid(
                            pid,
                            format!("branch step '{}' has no default branch", step.id),
                        ))
                    }
                    Some(i) if i + 1 != branches.len() => {
                        return Err(ProcessError::invalid(
                            pid,
                            format!("default branch of '{}' must be last", step.id),
                        ))
                    }
                    Some(_) => {}
                }
            }
            StepKind::Execute { .. } | StepKind::Confirm { .. } => {
                if step.next_step.is_none() {
                    return Err(ProcessError::invalid(
                        pid,
                        format!("{} step '{}' has no next step", step.kind.label(), step.id),
                    ));
                }
            }
            StepKind::Respond { .. } => {}
        }
    }

    let graph = StepGraph::new(definition);

    if definition.config.requires_confirmation {
        if let Some(step) = graph.find_unconfirmed_mutation(definition) {
            return Err(ProcessError::invalid(
                pid,
                format!("mutating step '{step}' is reachable without confirmation"),
            ));
        }
    }

    if let Some(step) = graph.find_non_blocking_cycle(definition) {
        return Err(ProcessError::invalid(
            pid,
            format!("step '{step}' is part of a cycle without a blocking step"),
        ));
    }

    let reachable = graph.reachable_from(&definition.initial_step);
    if let Some(orphan) = definition.step_ids().find(|id| !reachable.contains(*id)) {
        tracing::debug!(process = pid, step = orphan, "Unreachable step");
    }

    Ok(())
}
