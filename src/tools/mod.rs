//! 工具层（实体解析）：工具 trait、注册表、带超时的执行器、结果归一化与内存工作区

pub mod entities;
pub mod executor;
pub mod output;
pub mod registry;
pub mod workspace;

pub use entities::register_workspace_tools;
pub use executor::ToolExecutor;
pub use output::{value_id, value_label, ToolOutput};
pub use registry::{Tool, ToolRegistry};
pub use workspace::{TaskPriority, TaskStatus, Workspace};
