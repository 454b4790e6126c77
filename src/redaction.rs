//! 展示层脱敏策略
//!
//! `redacted_snippet` 只用于展示。source_hash 永远基于原始字段计算，
//! 所以更换脱敏策略不会影响任何哈希。

use regex::Regex;
use std::sync::LazyLock;

struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

// 顺序有意义：邮箱必须先于 @handle 处理
static STANDARD_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    [
        (r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}", "[email]"),
        (r"(https?://[^\s?#]+)\?[^\s#]*", "${1}?[redacted]"),
        (r"\+?\d[\d\s().-]{7,}\d", "[phone]"),
        (r"(^|[^\w@\[])@[A-Za-z0-9_]{2,30}", "${1}[handle]"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| Rule {
        pattern: Regex::new(pattern).expect("static redaction pattern"),
        replacement,
    })
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedactionPolicy {
    /// 邮箱、电话、@账号、URL 查询串
    #[default]
    Standard,
    /// 不脱敏 (内部审阅)
    None,
}

impl RedactionPolicy {
    pub fn apply(&self, raw: &str) -> String {
        match self {
            RedactionPolicy::None => raw.to_string(),
            RedactionPolicy::Standard => STANDARD_RULES.iter().fold(raw.to_string(), |text, rule| {
                rule.pattern.replace_all(&text, rule.replacement).into_owned()
            }),
        }
    }
}
