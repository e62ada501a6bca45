//! 会话上下文存储
//!
//! 每个会话至多一个进行中的流程上下文。过期判定以最后一次用户输入为准：
//! get 时惰性清除，cleanup_expired 做批量清扫。
//! lock(session_id) 提供按会话的串行化，编排器在「读取 -> 推进 -> 写回」期间持有它。
//! 守卫释放时，若没有其他人在等同一把锁，锁表里的条目随之移除。

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::process::context::ProcessContext;

/// 会话上下文存储接口
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// 获取会话当前的流程上下文；已过期则清除并返回 None
    async fn get(&self, session_id: &str) -> Option<ProcessContext>;

    /// 写入 / 覆盖会话的流程上下文
    async fn set(&self, session_id: &str, context: ProcessContext);

    /// 删除会话的流程上下文；不存在时无操作
    async fn clear(&self, session_id: &str);

    /// 获取会话级互斥锁，同一会话的消息按到达顺序依次处理
    async fn lock(&self, session_id: &str) -> SessionGuard;

    /// 清理所有过期上下文，返回清理数量
    async fn cleanup_expired(&self) -> usize;

    /// 当前保存的上下文数量
    async fn active_count(&self) -> usize;
}

type LockTable = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// 会话锁守卫；drop 时释放锁并回收无人等待的锁表条目
pub struct SessionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    session_id: String,
    table: LockTable,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // 表里那一份是唯一引用 = 没有其他持有者或等待者
        if locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.session_id);
        }
    }
}

/// 内存实现（进程退出即丢失）
#[derive(Default)]
pub struct MemoryContextStore {
    contexts: RwLock<HashMap<String, ProcessContext>>,
    locks: LockTable,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn get(&self, session_id: &str) -> Option<ProcessContext> {
        {
            let contexts = self.contexts.read().await;
            match contexts.get(session_id) {
                None => return None,
                Some(ctx) if !ctx.is_expired() => return Some(ctx.clone()),
                Some(_) => {}
            }
        }

        let mut contexts = self.contexts.write().await;
        if let Some(ctx) = contexts.get(session_id) {
            if ctx.is_expired() {
                tracing::info!(
                    session_id,
                    process_id = %ctx.process_id,
                    "Process context expired"
                );
                contexts.remove(session_id);
                return None;
            }
            return Some(ctx.clone());
        }
        None
    }

    async fn set(&self, session_id: &str, context: ProcessContext) {
        self.contexts
            .write()
            .await
            .insert(session_id.to_string(), context);
    }

    async fn clear(&self, session_id: &str) {
        self.contexts.write().await.remove(session_id);
    }

    async fn lock(&self, session_id: &str) -> SessionGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        SessionGuard {
            guard: Some(lock.lock_owned().await),
            session_id: session_id.to_string(),
            table: self.locks.clone(),
        }
    }

    async fn cleanup_expired(&self) -> usize {
        let mut contexts = self.contexts.write().await;
        let before = contexts.len();
        contexts.retain(|_, ctx| !ctx.is_expired());
        let removed = before - contexts.len();
        if removed > 0 {
            tracing::info!(removed, "Cleaned up expired process contexts");
        }
        removed
    }

    async fn active_count(&self) -> usize {
        self.contexts.read().await.len()
    }
}
