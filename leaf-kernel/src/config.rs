//! # Config 模块
//!
//! 词法分析、解析与求值共用的配置。
//!
//! ## 配置来源
//!
//! 1. 调用方显式构造并传入（推荐）
//! 2. 配置文件（JSON，缺失字段使用默认值）
//! 3. [`LeafConfiguration::default`]，仅供最外层便捷入口使用
//!
//! 内核中不存在任何进程级可变配置。

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::LeafData;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("读取配置文件失败: {0}")]
    Io(#[from] std::io::Error),

    /// 配置格式无效
    #[error("配置格式无效: {0}")]
    Json(#[from] serde_json::Error),

    /// 标签标记字符不可用
    #[error("标签标记字符 '{0}' 不可用")]
    InvalidTagIndicator(char),
}

/// 标量格式化函数集合
///
/// 由调用方提供，决定表达式结果写入输出时的文本形式。
#[derive(Clone, Copy)]
pub struct Formatters {
    pub nil: fn() -> String,
    pub boolean: fn(bool) -> String,
    pub int: fn(i64) -> String,
    pub double: fn(f64) -> String,
    pub string: fn(&str) -> String,
}

impl Default for Formatters {
    fn default() -> Self {
        Self {
            nil: String::new,
            boolean: |b| b.to_string(),
            int: |i| i.to_string(),
            double: |d| format!("{:?}", d),
            string: |s| s.to_string(),
        }
    }
}

impl fmt::Debug for Formatters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formatters").finish_non_exhaustive()
    }
}

impl Formatters {
    /// 格式化一个数据值
    ///
    /// 集合按 `[a, b]` / `[key: value]` 形式展开；错误值输出为空。
    pub fn format(&self, data: &LeafData) -> String {
        match data {
            LeafData::Nil => (self.nil)(),
            LeafData::Bool(b) => (self.boolean)(*b),
            LeafData::Int(i) => (self.int)(*i),
            LeafData::Double(d) => (self.double)(*d),
            LeafData::String(s) => (self.string)(s),
            LeafData::Array(items) => {
                let parts: Vec<String> = items.iter().map(|item| self.format(item)).collect();
                format!("[{}]", parts.join(", "))
            }
            LeafData::Dictionary(map) => {
                if map.is_empty() {
                    return "[:]".to_string();
                }
                let parts: Vec<String> = map
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key, self.format(value)))
                    .collect();
                format!("[{}]", parts.join(", "))
            }
            LeafData::Error(_) => String::new(),
        }
    }
}

/// 内核配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeafConfiguration {
    /// 标签标记字符
    pub tag_indicator: char,

    /// 引用未设置的变量时是否报错（严格模式）
    ///
    /// 为 `false` 时未设置的变量按 nil 输出。
    pub missing_variable_throws: bool,

    /// 输出中出现的带内错误是否导致整次渲染失败
    pub errors_are_fatal: bool,

    /// 是否裁剪块标签独占行所产生的空行
    pub trim_block_lines: bool,

    /// 不定次数块（如 `while`）的最大执行次数
    pub max_loop_passes: usize,

    /// 标量格式化函数
    #[serde(skip)]
    pub formatters: Formatters,
}

impl Default for LeafConfiguration {
    fn default() -> Self {
        Self {
            tag_indicator: '#',
            missing_variable_throws: false,
            errors_are_fatal: true,
            trim_block_lines: true,
            max_loop_passes: 10_000,
            formatters: Formatters::default(),
        }
    }
}

impl LeafConfiguration {
    /// 从 JSON 文本加载
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从配置文件加载
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// 严格模式的便捷构造
    pub fn strict() -> Self {
        Self {
            missing_variable_throws: true,
            ..Self::default()
        }
    }

    /// 检查配置是否可用
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = self.tag_indicator;
        if c.is_alphanumeric() || c.is_whitespace() || matches!(c, '\\' | '(' | ')' | ':' | '_') {
            return Err(ConfigError::InvalidTagIndicator(c));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_defaults() {
        let config = LeafConfiguration::default();
        assert_eq!(config.tag_indicator, '#');
        assert!(!config.missing_variable_throws);
        assert!(config.errors_are_fatal);
        assert!(config.trim_block_lines);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = LeafConfiguration::from_json(r#"{"missing_variable_throws": true}"#).unwrap();
        assert!(config.missing_variable_throws);
        assert_eq!(config.tag_indicator, '#');
        assert_eq!(config.max_loop_passes, 10_000);
    }

    #[test]
    fn test_invalid_tag_indicator_rejected() {
        let result = LeafConfiguration::from_json(r#"{"tag_indicator": "a"}"#);
        assert!(matches!(result, Err(ConfigError::InvalidTagIndicator('a'))));
    }

    #[test]
    fn test_default_formatting() {
        let formatters = Formatters::default();
        assert_eq!(formatters.format(&LeafData::Nil), "");
        assert_eq!(formatters.format(&LeafData::Double(2.0)), "2.0");
        assert_eq!(formatters.format(&LeafData::from(vec![1, 2])), "[1, 2]");

        let mut map = BTreeMap::new();
        map.insert("a".to_string(), LeafData::from(true));
        assert_eq!(formatters.format(&LeafData::Dictionary(map)), "[a: true]");
    }

    #[test]
    fn test_custom_formatter() {
        let mut formatters = Formatters::default();
        formatters.boolean = |b| if b { "yes".into() } else { "no".into() };
        assert_eq!(formatters.format(&LeafData::from(false)), "no");
    }
}
