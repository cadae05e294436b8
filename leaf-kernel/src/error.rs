//! # Error 模块
//!
//! 定义 leaf-kernel 中使用的错误类型。
//!
//! - [`LexError`]：词法错误，立即终止解析
//! - [`ParseError`]：解析错误，立即终止解析，不返回部分 AST
//! - [`EvalError`]：求值错误，通常以带内值（[`LeafData::Error`](crate::LeafData::Error)）的形式参与后续求值
//! - [`LeafError`]：统一错误类型

use std::fmt;

use thiserror::Error;

use crate::diagnostic::render_source_window;

/// 源码位置
///
/// `line` 与 `column` 从 1 开始，`offset` 为字节偏移。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }

    /// 源码起点
    pub fn start() -> Self {
        Self::new(1, 1, 0)
    }
}

impl Default for SourceLocation {
    fn default() -> Self {
        Self::start()
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "第 {} 行第 {} 列", self.line, self.column)
    }
}

/// 词法错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    /// 字符串字面量在换行或文件结尾之前没有闭合
    #[error("{location}：字符串字面量未闭合")]
    UnterminatedStringLiteral { location: SourceLocation },

    /// 参数列表中出现无法识别的内容
    #[error("{location}：意外的内容 '{found}'")]
    UnexpectedToken {
        location: SourceLocation,
        found: String,
    },
}

impl LexError {
    pub fn location(&self) -> SourceLocation {
        match self {
            Self::UnterminatedStringLiteral { location } => *location,
            Self::UnexpectedToken { location, .. } => *location,
        }
    }
}

/// 解析错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// 表达式结构无效
    #[error("{location}：标签 '{name}' 中的表达式无效 - {message}")]
    MalformedExpression {
        location: SourceLocation,
        name: String,
        message: String,
    },

    /// 块的开闭不匹配
    #[error("{location}：块 '{name}' 不匹配 - {message}")]
    UnmatchedBlock {
        location: SourceLocation,
        name: String,
        message: String,
    },

    /// 到达输入结尾时仍有未闭合的块
    #[error("{location}：模板结束时仍有未闭合的块: {}", .names.join(", "))]
    UnclosedBlocks {
        location: SourceLocation,
        names: Vec<String>,
    },

    /// 变量使用无效（未赋值即使用、重复声明、给常量赋值等）
    #[error("{location}：变量 '{variable}' 使用无效 - {message}")]
    InvalidVariableUse {
        location: SourceLocation,
        variable: String,
        message: String,
    },

    /// 参数与声明的签名不符
    #[error("{location}：'{name}' 的签名无效 - {message}")]
    InvalidSignature {
        location: SourceLocation,
        name: String,
        message: String,
    },

    /// 多个重载同时匹配常量参数
    #[error("{location}：'{name}' 的调用存在歧义，{candidates} 个重载同时匹配")]
    AmbiguousOverload {
        location: SourceLocation,
        name: String,
        candidates: usize,
    },
}

impl ParseError {
    pub fn location(&self) -> SourceLocation {
        match self {
            Self::MalformedExpression { location, .. }
            | Self::UnmatchedBlock { location, .. }
            | Self::UnclosedBlocks { location, .. }
            | Self::InvalidVariableUse { location, .. }
            | Self::InvalidSignature { location, .. }
            | Self::AmbiguousOverload { location, .. } => *location,
        }
    }

    /// 出错的标签/函数/变量名称
    pub fn subject(&self) -> &str {
        match self {
            Self::MalformedExpression { name, .. }
            | Self::UnmatchedBlock { name, .. }
            | Self::InvalidSignature { name, .. }
            | Self::AmbiguousOverload { name, .. } => name,
            Self::InvalidVariableUse { variable, .. } => variable,
            Self::UnclosedBlocks { names, .. } => names.first().map(String::as_str).unwrap_or(""),
        }
    }
}

/// 求值错误
///
/// 可以作为带内数据值存在，因此必须可克隆、可比较。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// 严格模式下引用了未设置的变量
    #[error("变量 '{name}' 未定义")]
    MissingVariable { name: String },

    /// 类型不匹配
    #[error("'{name}' 类型不匹配: {message}")]
    TypeMismatch { name: String, message: String },

    /// 由函数主动抛出的错误
    #[error("{message}")]
    UserRaised { message: String },

    /// 引用的外部模板尚未被拼接进 AST
    #[error("内联模板 '{name}' 尚未解析")]
    UnresolvedInline { name: String },

    /// 无限循环保护
    #[error("'{name}' 超过了最大执行次数 {limit}")]
    PassLimitExceeded { name: String, limit: usize },
}

impl EvalError {
    /// 创建类型不匹配错误
    pub fn mismatch(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            message: message.into(),
        }
    }

    /// 创建用户错误
    pub fn raised(message: impl Into<String>) -> Self {
        Self::UserRaised {
            message: message.into(),
        }
    }
}

/// leaf-kernel 统一错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LeafError {
    /// 词法错误
    #[error("词法错误: {0}")]
    Lex(#[from] LexError),

    /// 解析错误
    #[error("解析错误: {0}")]
    Parse(#[from] ParseError),

    /// 求值错误
    #[error("求值错误: {0}")]
    Eval(#[from] EvalError),
}

impl LeafError {
    /// 出错位置（求值错误没有位置）
    pub fn location(&self) -> Option<SourceLocation> {
        match self {
            Self::Lex(e) => Some(e.location()),
            Self::Parse(e) => Some(e.location()),
            Self::Eval(_) => None,
        }
    }

    /// 生成带 `^~~~` 标记的诊断文本
    ///
    /// 没有位置信息时只返回错误消息。
    pub fn render_diagnostic(&self, source: &str) -> String {
        let Some(location) = self.location() else {
            return self.to_string();
        };
        format!(
            "{}\n{}",
            self,
            render_source_window(source, location, self.marker_width())
        )
    }

    /// `^~~~` 标记的宽度：解析错误覆盖标签名，其余为 1
    pub(crate) fn marker_width(&self) -> usize {
        match self {
            Self::Parse(e) => e.subject().chars().count().max(1),
            _ => 1,
        }
    }
}

/// Result 类型别名
pub type LeafResult<T> = Result<T, LeafError>;
