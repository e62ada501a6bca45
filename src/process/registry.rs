//! 流程注册表
//!
//! 显式构造、注入到编排器与执行器（不是全局单例）；保留注册顺序，意图匹配平局时以此决胜。

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::ProcessError;
use crate::process::graph;
use crate::process::types::ProcessDefinition;

#[derive(Default)]
pub struct ProcessRegistry {
    processes: Vec<Arc<ProcessDefinition>>,
    index: HashMap<String, usize>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册流程；重复 id 或结构不合法时报错
    pub fn register(&mut self, definition: ProcessDefinition) -> Result<(), ProcessError> {
        if self.index.contains_key(&definition.id) {
            return Err(ProcessError::invalid(&definition.id, "process id already registered"));
        }
        graph::validate(&definition)?;
        tracing::debug!(process = %definition.id, steps = definition.steps.len(), "Registered process");
        self.index.insert(definition.id.clone(), self.processes.len());
        self.processes.push(Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<ProcessDefinition>> {
        self.index.get(id).and_then(|i| self.processes.get(*i)).cloned()
    }

    /// 按注册顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProcessDefinition>> {
        self.processes.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.processes.iter().map(|p| p.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
