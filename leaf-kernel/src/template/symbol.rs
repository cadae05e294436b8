//! # Symbol 模块
//!
//! 参数层面的基础符号：关键字、运算符与变量。

use std::fmt;

/// 参数关键字
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafKeyword {
    /// `in`，只出现在块的自定义语法中（如 `for(x in xs)`）
    In,
    True,
    False,
    Nil,
    /// `self`，根上下文作用域
    SelfScope,
    /// `var`，可变变量声明
    Var,
    /// `let`，常量声明
    Let,
}

impl LeafKeyword {
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        match identifier {
            "in" => Some(Self::In),
            "true" => Some(Self::True),
            "false" => Some(Self::False),
            "nil" => Some(Self::Nil),
            "self" => Some(Self::SelfScope),
            "var" => Some(Self::Var),
            "let" => Some(Self::Let),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::True => "true",
            Self::False => "false",
            Self::Nil => "nil",
            Self::SelfScope => "self",
            Self::Var => "var",
            Self::Let => "let",
        }
    }
}

impl fmt::Display for LeafKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 运算符的形态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorForm {
    /// 前缀一元运算符
    Prefix,
    /// 中缀二元运算符
    Infix,
    /// 三元运算符的占位（`?` 与 `:`）
    Ternary,
    /// 赋值
    Assignment,
    /// 结构性符号（`.`、`[`、`]`），由参数解析器直接处理
    Structural,
}

/// 运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafOperator {
    Not,
    /// 一元负号，词法阶段统一为 [`LeafOperator::Minus`]，由解析器区分
    Negate,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Equal,
    Unequal,
    Greater,
    GreaterOrEqual,
    Lesser,
    LesserOrEqual,
    And,
    Or,
    NilCoalesce,
    TernaryTrue,
    TernaryFalse,
    Assignment,
    CompoundPlus,
    CompoundMinus,
    CompoundMultiply,
    CompoundDivide,
    CompoundModulo,
    ScopeMember,
    SubOpen,
    SubClose,
    /// 下标访问 `a[b]`，由 `[` `]` 折叠而成
    Subscript,
}

impl LeafOperator {
    /// 词法分析使用的运算符表，长符号在前
    pub const LEXABLE: [LeafOperator; 26] = [
        Self::Equal,
        Self::Unequal,
        Self::GreaterOrEqual,
        Self::LesserOrEqual,
        Self::And,
        Self::Or,
        Self::NilCoalesce,
        Self::CompoundPlus,
        Self::CompoundMinus,
        Self::CompoundMultiply,
        Self::CompoundDivide,
        Self::CompoundModulo,
        Self::Not,
        Self::Plus,
        Self::Minus,
        Self::Multiply,
        Self::Divide,
        Self::Modulo,
        Self::Greater,
        Self::Lesser,
        Self::TernaryTrue,
        Self::TernaryFalse,
        Self::Assignment,
        Self::ScopeMember,
        Self::SubOpen,
        Self::SubClose,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Not => "!",
            Self::Negate | Self::Minus => "-",
            Self::Plus => "+",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Equal => "==",
            Self::Unequal => "!=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Lesser => "<",
            Self::LesserOrEqual => "<=",
            Self::And => "&&",
            Self::Or => "||",
            Self::NilCoalesce => "??",
            Self::TernaryTrue => "?",
            Self::TernaryFalse => ":",
            Self::Assignment => "=",
            Self::CompoundPlus => "+=",
            Self::CompoundMinus => "-=",
            Self::CompoundMultiply => "*=",
            Self::CompoundDivide => "/=",
            Self::CompoundModulo => "%=",
            Self::ScopeMember => ".",
            Self::SubOpen => "[",
            Self::SubClose => "]",
            Self::Subscript => "[]",
        }
    }

    pub fn form(self) -> OperatorForm {
        match self {
            Self::Not | Self::Negate => OperatorForm::Prefix,
            Self::TernaryTrue | Self::TernaryFalse => OperatorForm::Ternary,
            Self::Assignment
            | Self::CompoundPlus
            | Self::CompoundMinus
            | Self::CompoundMultiply
            | Self::CompoundDivide
            | Self::CompoundModulo => OperatorForm::Assignment,
            Self::ScopeMember | Self::SubOpen | Self::SubClose => OperatorForm::Structural,
            _ => OperatorForm::Infix,
        }
    }

    /// 优先级，数值越大结合越紧
    pub fn precedence(self) -> u8 {
        match self {
            Self::Subscript => 11,
            Self::Not | Self::Negate => 10,
            Self::Multiply | Self::Divide | Self::Modulo => 8,
            Self::Plus | Self::Minus => 7,
            Self::Greater | Self::GreaterOrEqual | Self::Lesser | Self::LesserOrEqual => 6,
            Self::Equal | Self::Unequal => 5,
            Self::And => 4,
            Self::Or => 3,
            Self::NilCoalesce => 2,
            Self::TernaryTrue | Self::TernaryFalse => 1,
            _ => 0,
        }
    }

    /// 复合赋值对应的中缀运算符
    pub fn compound_base(self) -> Option<LeafOperator> {
        match self {
            Self::CompoundPlus => Some(Self::Plus),
            Self::CompoundMinus => Some(Self::Minus),
            Self::CompoundMultiply => Some(Self::Multiply),
            Self::CompoundDivide => Some(Self::Divide),
            Self::CompoundModulo => Some(Self::Modulo),
            _ => None,
        }
    }
}

impl fmt::Display for LeafOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// 根上下文的作用域名
pub const SELF_SCOPE: &str = "self";

/// 变量引用
///
/// 由可选的作用域名、成员名与可选的子路径组成：
/// `name`、`user.name`、`self.name`、`$app.version`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafVariable {
    scope: Option<String>,
    member: String,
    path: Vec<String>,
}

impl LeafVariable {
    /// 无作用域的原子变量
    pub fn new(member: impl Into<String>) -> Self {
        Self {
            scope: None,
            member: member.into(),
            path: Vec::new(),
        }
    }

    /// 指定作用域的变量
    pub fn scoped(scope: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            member: member.into(),
            path: Vec::new(),
        }
    }

    /// 追加一级路径
    pub fn extended(&self, component: impl Into<String>) -> Self {
        let mut variable = self.clone();
        variable.path.push(component.into());
        variable
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// 无作用域且无路径，可以用于声明
    pub fn is_atomic(&self) -> bool {
        self.scope.is_none() && self.path.is_empty()
    }

    /// 是否指向根上下文（`self.x`）
    pub fn is_self_scoped(&self) -> bool {
        self.scope.as_deref() == Some(SELF_SCOPE)
    }

    /// 归一化的根键，用于记录模板所需的上下文变量
    ///
    /// `user.name` 与 `self.user` 都归一为 `user`，`$app.version` 为 `$app.version`。
    pub fn root_key(&self) -> String {
        match self.scope.as_deref() {
            None | Some(SELF_SCOPE) => self.member.clone(),
            Some(scope) => format!("${}.{}", scope, self.member),
        }
    }
}

impl fmt::Display for LeafVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope.as_deref() {
            None => {}
            Some(SELF_SCOPE) => write!(f, "{}.", SELF_SCOPE)?,
            Some(scope) => write!(f, "${}.", scope)?,
        }
        f.write_str(&self.member)?;
        for component in &self.path {
            write!(f, ".{}", component)?;
        }
        Ok(())
    }
}
