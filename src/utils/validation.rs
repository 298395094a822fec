use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]{0,63}$").expect("identifier pattern"));

static FLOW_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("flow id pattern"));

static VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+\.\d+\.\d+(-[0-9A-Za-z.-]+)?$").expect("version pattern")
});

/// 工具 / 插件名称：字母或下划线开头，最长 64 字符
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Flow 与 Step 的 ID：仅字母、数字、下划线和短横线
pub fn is_valid_flow_id(id: &str) -> bool {
    FLOW_ID.is_match(id)
}

/// 语义化版本号 MAJOR.MINOR.PATCH（可带预发布后缀）
pub fn is_valid_version(version: &str) -> bool {
    VERSION.is_match(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier() {
        assert!(is_valid_identifier("search"));
        assert!(is_valid_identifier("_private"));
        assert!(is_valid_identifier("web.search-v2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1tool"));
        assert!(!is_valid_identifier("has space"));
        assert!(!is_valid_identifier(&"a".repeat(65)));
    }

    #[test]
    fn test_flow_id() {
        assert!(is_valid_flow_id("order-sync_1"));
        assert!(!is_valid_flow_id(""));
        assert!(!is_valid_flow_id("node@1"));
        assert!(!is_valid_flow_id("a.b"));
    }

    #[test]
    fn test_version() {
        assert!(is_valid_version("1.0.0"));
        assert!(is_valid_version("2.10.3-beta.1"));
        assert!(!is_valid_version("1.0"));
        assert!(!is_valid_version("v1.0.0"));
    }
}
