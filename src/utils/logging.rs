use std::env;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEBUG_ENV: &str = "AGENTLOOM_DEBUG";

/// 日志配置
pub struct LoggingConfig;

impl LoggingConfig {
    /// 初始化日志系统
    ///
    /// 支持通过环境变量配置：
    /// - RUST_LOG: 设置日志级别（error, warn, info, debug, trace）
    /// - AGENTLOOM_DEBUG: 启用详细调试输出（文件、行号、线程 ID）
    ///
    /// 重复调用不会 panic，已安装的 subscriber 保持不变。
    ///
    /// ```no_run
    /// use agentloom::utils::LoggingConfig;
    ///
    /// LoggingConfig::init();
    /// tracing::info!("ready");
    /// ```
    pub fn init() {
        let is_debug = Self::is_debug();

        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => {
                if is_debug {
                    EnvFilter::new("agentloom=debug,info")
                } else {
                    EnvFilter::new("agentloom=info,warn")
                }
            }
        };

        let fmt_layer = fmt::layer()
            .with_target(is_debug)
            .with_file(is_debug)
            .with_line_number(is_debug)
            .with_thread_ids(is_debug);

        let installed = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .is_ok();

        if installed && is_debug {
            tracing::debug!("debug logging enabled");
        }
    }

    /// 初始化日志系统（带自定义过滤器）
    pub fn init_with_filter(filter: &str) {
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::new(filter))
            .with(fmt::layer())
            .try_init();
    }

    pub fn is_debug() -> bool {
        env::var(DEBUG_ENV).is_ok()
    }
}
