use crate::error::{LoomError, Result};
use std::env;
use std::str::FromStr;

pub const MAX_ITERATIONS_ENV: &str = "AGENTLOOM_MAX_ITERATIONS";
pub const MAX_HISTORY_ENV: &str = "AGENTLOOM_MAX_HISTORY";
pub const RUN_TIMEOUT_ENV: &str = "AGENTLOOM_RUN_TIMEOUT_MS";
pub const MAX_CONCURRENT_ENV: &str = "AGENTLOOM_MAX_CONCURRENT_EXECUTIONS";

/// 环境变量配置管理
pub struct EnvConfig;

impl EnvConfig {
    /// 从环境变量获取值
    pub fn get_env(key: &str) -> Result<String> {
        env::var(key).map_err(|_| {
            LoomError::Configuration(format!("environment variable `{key}` is not set"))
        })
    }

    /// 获取可选的环境变量
    pub fn get_env_optional(key: &str) -> Option<String> {
        env::var(key).ok()
    }

    /// 读取并解析数值型环境变量；未设置时返回 None
    pub fn parse_optional<T: FromStr>(key: &str) -> Result<Option<T>> {
        match Self::get_env_optional(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                LoomError::Configuration(format!(
                    "environment variable `{key}` has invalid value `{raw}`"
                ))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_optional() {
        env::set_var("AGENTLOOM_TEST_NUMBER", "42");
        assert_eq!(EnvConfig::parse_optional::<u32>("AGENTLOOM_TEST_NUMBER").unwrap(), Some(42));

        env::set_var("AGENTLOOM_TEST_NUMBER", "forty-two");
        assert!(EnvConfig::parse_optional::<u32>("AGENTLOOM_TEST_NUMBER").is_err());

        env::remove_var("AGENTLOOM_TEST_NUMBER");
        assert_eq!(EnvConfig::parse_optional::<u32>("AGENTLOOM_TEST_NUMBER").unwrap(), None);
    }

    #[test]
    fn test_get_env_missing() {
        assert!(EnvConfig::get_env("AGENTLOOM_TEST_SURELY_MISSING").is_err());
    }
}
