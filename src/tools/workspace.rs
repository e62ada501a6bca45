//! 内存工作区：客户、任务、团队成员
//!
//! 作为实体解析层的默认后端（二进制与测试共用）。id 按计数器顺序生成，保证同一输入序列的结果可复现。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

/// 任务优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee: Option<String>,
    pub archived: bool,
    pub created_by: Option<String>,
    pub archived_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TaskRecord {
    pub fn is_active(&self) -> bool {
        !self.archived && self.status != TaskStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub id: String,
    pub name: String,
}

/// 每位成员的任务负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberWorkload {
    pub member_id: String,
    pub name: String,
    pub active_tasks: usize,
    pub completed_tasks: usize,
}

/// 任务查询条件
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub text: Option<String>,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub only_active: bool,
    pub limit: usize,
}

/// 新建任务参数
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub client_id: Option<String>,
    pub priority: TaskPriority,
    pub assignee: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Default)]
struct WorkspaceData {
    clients: Vec<Client>,
    tasks: Vec<TaskRecord>,
    members: Vec<TeamMember>,
    next_id: u64,
}

impl WorkspaceData {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// 内存工作区（可克隆，内部共享）
#[derive(Clone, Default)]
pub struct Workspace {
    inner: Arc<RwLock<WorkspaceData>>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// 带示例数据的工作区（REPL 演示用）
    pub async fn with_sample_data() -> Self {
        let ws = Self::new();
        let ana = ws.add_member("Ana").await;
        let luis = ws.add_member("Luis").await;
        let acme = ws.create_client("Acme").await.ok();
        let globex = ws.create_client("Globex").await.ok();
        let samples = [
            ("Revisión de contrato", acme.as_ref(), TaskPriority::High, &ana),
            ("Diseño de landing", acme.as_ref(), TaskPriority::Medium, &luis),
            ("Informe trimestral", globex.as_ref(), TaskPriority::Low, &ana),
        ];
        for (title, client, priority, member) in samples {
            let _ = ws
                .create_task(NewTask {
                    title: title.to_string(),
                    client_id: client.map(|c| c.id.clone()),
                    priority,
                    assignee: Some(member.id.clone()),
                    created_by: None,
                })
                .await;
        }
        ws
    }

    pub async fn add_member(&self, name: &str) -> TeamMember {
        let mut data = self.inner.write().await;
        let member = TeamMember {
            id: data.next_id("member"),
            name: name.to_string(),
        };
        data.members.push(member.clone());
        member
    }

    pub async fn search_clients(&self, query: &str, limit: usize) -> Vec<Client> {
        let needle = query.trim().to_lowercase();
        self.inner
            .read()
            .await
            .clients
            .iter()
            .filter(|c| needle.is_empty() || c.name.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn create_client(&self, name: &str) -> Result<Client, String> {
        let name = name.trim();
        if name.is_empty() {
            return Err("client name is empty".to_string());
        }
        let mut data = self.inner.write().await;
        if data.clients.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
            return Err(format!("client '{name}' already exists"));
        }
        let client = Client {
            id: data.next_id("client"),
            name: name.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        data.clients.push(client.clone());
        Ok(client)
    }

    pub async fn search_tasks(&self, query: &TaskQuery) -> Vec<TaskRecord> {
        let text = query.text.as_ref().map(|t| t.trim().to_lowercase());
        let client_name = query.client_name.as_ref().map(|c| c.trim().to_lowercase());
        self.inner
            .read()
            .await
            .tasks
            .iter()
            .filter(|t| !t.archived)
            .filter(|t| !query.only_active || t.is_active())
            .filter(|t| match &text {
                Some(needle) => t.title.to_lowercase().contains(needle.as_str()),
                None => true,
            })
            .filter(|t| match &query.client_id {
                Some(id) => t.client_id.as_deref() == Some(id.as_str()),
                None => true,
            })
            .filter(|t| match &client_name {
                Some(needle) => t
                    .client_name
                    .as_ref()
                    .is_some_and(|n| n.to_lowercase().contains(needle.as_str())),
                None => true,
            })
            .filter(|t| query.status.map_or(true, |s| t.status == s))
            .filter(|t| query.priority.map_or(true, |p| t.priority == p))
            .take(query.limit)
            .cloned()
            .collect()
    }

    pub async fn create_task(&self, new_task: NewTask) -> Result<TaskRecord, String> {
        let title = new_task.title.trim();
        if title.is_empty() {
            return Err("task title is empty".to_string());
        }
        let mut data = self.inner.write().await;
        let client_name = match &new_task.client_id {
            Some(id) => Some(
                data.clients
                    .iter()
                    .find(|c| &c.id == id)
                    .map(|c| c.name.clone())
                    .ok_or_else(|| format!("client '{id}' not found"))?,
            ),
            None => None,
        };
        let now = chrono::Utc::now().timestamp_millis();
        let task = TaskRecord {
            id: data.next_id("task"),
            title: title.to_string(),
            client_id: new_task.client_id,
            client_name,
            status: TaskStatus::Pending,
            priority: new_task.priority,
            assignee: new_task.assignee,
            archived: false,
            created_by: new_task.created_by,
            archived_by: None,
            created_at: now,
            updated_at: now,
        };
        data.tasks.push(task.clone());
        Ok(task)
    }

    pub async fn update_task(
        &self,
        task_id: &str,
        status: Option<TaskStatus>,
        priority: Option<TaskPriority>,
    ) -> Result<TaskRecord, String> {
        let mut data = self.inner.write().await;
        let task = data
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id && !t.archived)
            .ok_or_else(|| format!("task '{task_id}' not found"))?;
        if let Some(status) = status {
            task.status = status;
        }
        if let Some(priority) = priority {
            task.priority = priority;
        }
        task.updated_at = chrono::Utc::now().timestamp_millis();
        Ok(task.clone())
    }

    pub async fn archive_task(&self, task_id: &str, archived_by: Option<String>) -> Result<TaskRecord, String> {
        let mut data = self.inner.write().await;
        let task = data
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| format!("task '{task_id}' not found"))?;
        if task.archived {
            return Err(format!("task '{task_id}' is already archived"));
        }
        task.archived = true;
        task.archived_by = archived_by;
        task.updated_at = chrono::Utc::now().timestamp_millis();
        Ok(task.clone())
    }

    pub async fn team_workload(&self) -> Vec<MemberWorkload> {
        let data = self.inner.read().await;
        data.members
            .iter()
            .map(|m| {
                let owned = data
                    .tasks
                    .iter()
                    .filter(|t| !t.archived && t.assignee.as_deref() == Some(m.id.as_str()));
                let (active, completed) = owned.fold((0, 0), |(a, c), t| {
                    if t.status == TaskStatus::Completed {
                        (a, c + 1)
                    } else {
                        (a + 1, c)
                    }
                });
                MemberWorkload {
                    member_id: m.id.clone(),
                    name: m.name.clone(),
                    active_tasks: active,
                    completed_tasks: completed,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task(title: &str, client_id: Option<String>) -> NewTask {
        NewTask {
            title: title.to_string(),
            client_id,
            priority: TaskPriority::Medium,
            assignee: None,
            created_by: Some("u1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_client_search_is_case_insensitive() {
        let ws = Workspace::new();
        ws.create_client("Acme Corp").await.unwrap();
        ws.create_client("Globex").await.unwrap();
        let found = ws.search_clients("acme", 5).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Acme Corp");
        assert!(ws.create_client("ACME CORP").await.is_err());
    }

    #[tokio::test]
    async fn test_only_active_and_archived_filters() {
        let ws = Workspace::new();
        let a = ws.create_task(new_task("Alpha", None)).await.unwrap();
        let b = ws.create_task(new_task("Beta", None)).await.unwrap();
        ws.create_task(new_task("Gamma", None)).await.unwrap();
        ws.update_task(&a.id, Some(TaskStatus::Completed), None).await.unwrap();
        ws.archive_task(&b.id, None).await.unwrap();

        let all = ws.search_tasks(&TaskQuery { limit: 20, ..Default::default() }).await;
        assert_eq!(all.len(), 2);
        let active = ws
            .search_tasks(&TaskQuery { only_active: true, limit: 20, ..Default::default() })
            .await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "Gamma");
    }

    #[tokio::test]
    async fn test_create_task_resolves_client_name() {
        let ws = Workspace::new();
        let client = ws.create_client("Acme").await.unwrap();
        let task = ws.create_task(new_task("Diseño", Some(client.id))).await.unwrap();
        assert_eq!(task.client_name.as_deref(), Some("Acme"));
        assert!(ws.create_task(new_task("X", Some("client-99".into()))).await.is_err());
    }

    #[tokio::test]
    async fn test_team_workload_counts() {
        let ws = Workspace::new();
        let ana = ws.add_member("Ana").await;
        let mut t = new_task("Uno", None);
        t.assignee = Some(ana.id.clone());
        let first = ws.create_task(t.clone()).await.unwrap();
        ws.create_task(t).await.unwrap();
        ws.update_task(&first.id, Some(TaskStatus::Completed), None).await.unwrap();

        let load = ws.team_workload().await;
        assert_eq!(load.len(), 1);
        assert_eq!(load[0].active_tasks, 1);
        assert_eq!(load[0].completed_tasks, 1);
    }
}
