//! 可观测性
//!
//! 统一的 tracing 订阅器：默认 info，RUST_LOG 可覆盖（如 `RUST_LOG=kanbot=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化日志；重复调用时保留第一次的订阅器
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let result = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
