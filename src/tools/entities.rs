//! 实体工具：基于 Workspace 的客户 / 任务 / 团队工具
//!
//! 返回形状刻意保持外部系统的原样（裸数组、`{tasks}`、`{data}`、单对象），由 ToolExecutor 统一归一化。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::workspace::{NewTask, TaskPriority, TaskQuery, TaskStatus, Workspace};
use crate::tools::{Tool, ToolRegistry};

const DEFAULT_LIMIT: usize = 20;

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn limit_arg(args: &Value) -> usize {
    args.get("limit")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_LIMIT)
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

/// 在注册表中注册全部工作区工具
pub fn register_workspace_tools(registry: &mut ToolRegistry, workspace: &Workspace) {
    registry.register(SearchClientsTool::new(workspace.clone()));
    registry.register(CreateClientTool::new(workspace.clone()));
    registry.register(SearchTasksTool::new(workspace.clone()));
    registry.register(CreateTaskTool::new(workspace.clone()));
    registry.register(UpdateTaskTool::new(workspace.clone()));
    registry.register(ArchiveTaskTool::new(workspace.clone()));
    registry.register(TeamWorkloadTool::new(workspace.clone()));
}

macro_rules! workspace_tool {
    ($name:ident) => {
        pub struct $name {
            workspace: Workspace,
        }

        impl $name {
            pub fn new(workspace: Workspace) -> Self {
                Self { workspace }
            }
        }
    };
}

workspace_tool!(SearchClientsTool);
workspace_tool!(CreateClientTool);
workspace_tool!(SearchTasksTool);
workspace_tool!(CreateTaskTool);
workspace_tool!(UpdateTaskTool);
workspace_tool!(ArchiveTaskTool);
workspace_tool!(TeamWorkloadTool);

#[async_trait]
impl Tool for SearchClientsTool {
    fn name(&self) -> &str {
        "search_clients"
    }

    fn description(&self) -> &str {
        "Search clients by name. Args: {\"query\": \"Acme\", \"limit\": 5}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let query = str_arg(&args, "query").unwrap_or_default();
        let clients = self.workspace.search_clients(query, limit_arg(&args)).await;
        to_value(clients)
    }
}

#[async_trait]
impl Tool for CreateClientTool {
    fn name(&self) -> &str {
        "create_client"
    }

    fn description(&self) -> &str {
        "Create a client. Args: {\"name\": \"Acme\"}"
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let name = str_arg(&args, "name").ok_or("missing 'name'")?;
        let client = self.workspace.create_client(name).await?;
        to_value(client)
    }
}

#[async_trait]
impl Tool for SearchTasksTool {
    fn name(&self) -> &str {
        "search_tasks"
    }

    fn description(&self) -> &str {
        "Search tasks. Args: {\"query\"?, \"clientId\"?, \"clientName\"?, \"status\"?, \"priority\"?, \"onlyActive\"?, \"limit\"?}"
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let query = TaskQuery {
            text: str_arg(&args, "query").map(str::to_string),
            client_id: str_arg(&args, "clientId").map(str::to_string),
            client_name: str_arg(&args, "clientName").map(str::to_string),
            status: str_arg(&args, "status").and_then(TaskStatus::parse),
            priority: str_arg(&args, "priority").and_then(TaskPriority::parse),
            only_active: args.get("onlyActive").and_then(Value::as_bool).unwrap_or(false),
            limit: limit_arg(&args),
        };
        let tasks = self.workspace.search_tasks(&query).await;
        let total = tasks.len();
        Ok(json!({ "tasks": to_value(tasks)?, "total": total }))
    }
}

#[async_trait]
impl Tool for CreateTaskTool {
    fn name(&self) -> &str {
        "create_task"
    }

    fn description(&self) -> &str {
        "Create a task. Args: {\"title\", \"clientId\"?, \"priority\"?, \"assignee\"?, \"createdBy\"?}"
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let title = str_arg(&args, "title").ok_or("missing 'title'")?;
        let new_task = NewTask {
            title: title.to_string(),
            client_id: str_arg(&args, "clientId").map(str::to_string),
            priority: str_arg(&args, "priority")
                .and_then(TaskPriority::parse)
                .unwrap_or(TaskPriority::Medium),
            assignee: str_arg(&args, "assignee").map(str::to_string),
            created_by: str_arg(&args, "createdBy").map(str::to_string),
        };
        let task = self.workspace.create_task(new_task).await?;
        to_value(task)
    }
}

#[async_trait]
impl Tool for UpdateTaskTool {
    fn name(&self) -> &str {
        "update_task"
    }

    fn description(&self) -> &str {
        "Update task status/priority. Args: {\"taskId\", \"status\"?, \"priority\"?}"
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let task_id = str_arg(&args, "taskId").ok_or("missing 'taskId'")?;
        let status = match str_arg(&args, "status") {
            Some(s) => Some(TaskStatus::parse(s).ok_or_else(|| format!("invalid status '{s}'"))?),
            None => None,
        };
        let priority = match str_arg(&args, "priority") {
            Some(p) => Some(TaskPriority::parse(p).ok_or_else(|| format!("invalid priority '{p}'"))?),
            None => None,
        };
        let task = self.workspace.update_task(task_id, status, priority).await?;
        to_value(task)
    }
}

#[async_trait]
impl Tool for ArchiveTaskTool {
    fn name(&self) -> &str {
        "archive_task"
    }

    fn description(&self) -> &str {
        "Archive a task. Args: {\"taskId\", \"archivedBy\"?}"
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let task_id = str_arg(&args, "taskId").ok_or("missing 'taskId'")?;
        let by = str_arg(&args, "archivedBy").map(str::to_string);
        let task = self.workspace.archive_task(task_id, by).await?;
        Ok(json!({ "success": true, "data": [to_value(task)?] }))
    }
}

#[async_trait]
impl Tool for TeamWorkloadTool {
    fn name(&self) -> &str {
        "get_team_workload"
    }

    fn description(&self) -> &str {
        "Per-member active/completed task counts. No args."
    }

    async fn execute(&self, _args: Value) -> Result<Value, String> {
        let load = self.workspace.team_workload().await;
        Ok(json!({ "data": to_value(load)? }))
    }
}
