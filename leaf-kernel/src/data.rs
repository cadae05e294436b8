//! # Data 模块
//!
//! 模板求值过程中流动的数据值。
//!
//! ## 设计说明
//!
//! - 渲染上下文可以直接从 JSON 反序列化（无标签表示）
//! - 求值错误以 [`LeafData::Error`] 的形式留在数据流中，
//!   是否致命由渲染结束后的策略统一决定

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// 模板数据值
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LeafData {
    /// 空值
    #[default]
    Nil,
    /// 布尔值
    Bool(bool),
    /// 整数
    Int(i64),
    /// 浮点数
    Double(f64),
    /// 字符串
    String(String),
    /// 数组
    Array(Vec<LeafData>),
    /// 字典（键有序）
    Dictionary(BTreeMap<String, LeafData>),
    /// 带内错误
    #[serde(skip)]
    Error(EvalError),
}

/// 数据的具体类型，用于签名匹配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LeafDataType {
    Void,
    Bool,
    Int,
    Double,
    String,
    Array,
    Dictionary,
}

impl fmt::Display for LeafDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Void => "Void",
            Self::Bool => "Bool",
            Self::Int => "Int",
            Self::Double => "Double",
            Self::String => "String",
            Self::Array => "Array",
            Self::Dictionary => "Dictionary",
        };
        f.write_str(name)
    }
}

impl LeafData {
    /// 从 JSON 文本构造
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// 具体类型，错误值没有类型
    pub fn data_type(&self) -> Option<LeafDataType> {
        match self {
            Self::Nil => Some(LeafDataType::Void),
            Self::Bool(_) => Some(LeafDataType::Bool),
            Self::Int(_) => Some(LeafDataType::Int),
            Self::Double(_) => Some(LeafDataType::Double),
            Self::String(_) => Some(LeafDataType::String),
            Self::Array(_) => Some(LeafDataType::Array),
            Self::Dictionary(_) => Some(LeafDataType::Dictionary),
            Self::Error(_) => None,
        }
    }

    /// 用于错误消息的类型名
    pub fn type_name(&self) -> String {
        match self.data_type() {
            Some(t) => t.to_string(),
            None => "Error".to_string(),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// 取出带内错误
    pub fn as_error(&self) -> Option<&EvalError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    /// 条件判断使用的真值
    ///
    /// nil、false、0、空字符串、空集合以及错误值都为假。
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Nil | Self::Error(_) => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Double(d) => *d != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::Array(a) => !a.is_empty(),
            Self::Dictionary(d) => !d.is_empty(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// 数值视图，整数会提升为浮点数
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[LeafData]> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_dictionary(&self) -> Option<&BTreeMap<String, LeafData>> {
        match self {
            Self::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// 按成员名取值，仅对字典有效
    pub fn member(&self, key: &str) -> Option<&LeafData> {
        self.as_dictionary().and_then(|d| d.get(key))
    }
}

impl From<bool> for LeafData {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for LeafData {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for LeafData {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<usize> for LeafData {
    fn from(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for LeafData {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for LeafData {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for LeafData {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<LeafData>> From<Vec<T>> for LeafData {
    fn from(value: Vec<T>) -> Self {
        Self::Array(value.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, LeafData>> for LeafData {
    fn from(value: BTreeMap<String, LeafData>) -> Self {
        Self::Dictionary(value)
    }
}

impl<T: Into<LeafData>> From<Option<T>> for LeafData {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Nil)
    }
}

impl From<EvalError> for LeafData {
    fn from(value: EvalError) -> Self {
        Self::Error(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!LeafData::Nil.is_truthy());
        assert!(!LeafData::from(false).is_truthy());
        assert!(!LeafData::from(0).is_truthy());
        assert!(!LeafData::from("").is_truthy());
        assert!(!LeafData::Array(vec![]).is_truthy());
        assert!(!LeafData::Error(EvalError::raised("boom")).is_truthy());

        assert!(LeafData::from(true).is_truthy());
        assert!(LeafData::from(-3).is_truthy());
        assert!(LeafData::from("x").is_truthy());
        assert!(LeafData::from(vec!["a"]).is_truthy());
    }

    #[test]
    fn test_json_context_deserialization() {
        let data = LeafData::from_json(
            r#"{"name": "tanner", "age": 3, "ratio": 1.5, "tags": ["a", "b"], "none": null, "ok": true}"#,
        )
        .unwrap();

        assert_eq!(data.member("name"), Some(&LeafData::from("tanner")));
        assert_eq!(data.member("age"), Some(&LeafData::Int(3)));
        assert_eq!(data.member("ratio"), Some(&LeafData::Double(1.5)));
        assert_eq!(data.member("tags"), Some(&LeafData::from(vec!["a", "b"])));
        assert_eq!(data.member("none"), Some(&LeafData::Nil));
        assert_eq!(data.member("ok"), Some(&LeafData::Bool(true)));
    }

    #[test]
    fn test_serialization_round_trip() {
        let mut map = BTreeMap::new();
        map.insert("count".to_string(), LeafData::Int(2));
        map.insert("title".to_string(), LeafData::from("Welcome"));
        let data = LeafData::Dictionary(map);

        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, r#"{"count":2,"title":"Welcome"}"#);
        assert_eq!(LeafData::from_json(&json).unwrap(), data);
    }

    #[test]
    fn test_data_types() {
        assert_eq!(LeafData::Nil.data_type(), Some(LeafDataType::Void));
        assert_eq!(LeafData::from(1.0).data_type(), Some(LeafDataType::Double));
        assert_eq!(
            LeafData::Error(EvalError::raised("x")).data_type(),
            None
        );
        assert_eq!(LeafData::from(2).as_double(), Some(2.0));
    }
}
