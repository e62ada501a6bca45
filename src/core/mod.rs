//! 核心层：错误类型与恢复策略

pub mod error;
pub mod recovery;

pub use error::{ProcessError, RecoveryAction};
pub use recovery::{RecoveryEngine, GENERIC_FAILURE, RETRY_PROMPT};
