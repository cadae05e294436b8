//! # 表达式模块
//!
//! 定义解析器构建的参数节点与求值器。
//!
//! ## 设计原则
//!
//! - 每个节点缓存 `resolved`（不含自由变量）与 `invariant`（结果与上下文无关）两个标志，
//!   由子节点自底向上传播，驱动解析期的常量折叠
//! - 求值不会中断：错误以 [`LeafData::Error`] 的形式向上传播，由外层结构决定如何处理
//! - 整数运算使用带检查的算术，溢出与除零都是求值错误

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::data::LeafData;
use crate::entity::{ArgumentSlot, LeafFunction};
use crate::error::EvalError;

use super::symbol::{LeafKeyword, LeafOperator, LeafVariable};

/// 参数节点
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    kind: ParameterKind,
    resolved: bool,
    invariant: bool,
}

/// 参数节点的种类
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterKind {
    /// 字面量值
    Value(LeafData),
    /// 关键字
    Keyword(LeafKeyword),
    /// 尚未折叠的运算符
    Operator(LeafOperator),
    /// 变量引用
    Variable(LeafVariable),
    /// 表达式
    Expression(Box<LeafExpression>),
    /// 集合字面量（无标签为数组，有标签为字典）
    Tuple(LeafTuple),
    /// 已确定目标的函数调用
    Function(Box<FunctionCall>),
    /// 待定重载调用，求值时按实参类型选择
    Dynamic(Box<OverloadCall>),
}

/// 已确定目标的函数调用
#[derive(Clone)]
pub struct FunctionCall {
    pub name: String,
    /// 以方法语法调用（`a.m()`），第一个实参为接收者
    pub method: bool,
    pub function: Arc<dyn LeafFunction>,
    pub args: LeafTuple,
    /// 解析期完成的参数绑定
    pub slots: Vec<ArgumentSlot>,
}

/// 待定重载调用
#[derive(Clone)]
pub struct OverloadCall {
    pub name: String,
    pub method: bool,
    pub candidates: Vec<Arc<dyn LeafFunction>>,
    pub args: LeafTuple,
}

impl fmt::Debug for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCall")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for OverloadCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverloadCall")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("candidates", &self.candidates.len())
            .field("args", &self.args)
            .finish()
    }
}

impl PartialEq for FunctionCall {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.method == other.method
            && Arc::ptr_eq(&self.function, &other.function)
            && self.args == other.args
    }
}

impl PartialEq for OverloadCall {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.method == other.method
            && self.candidates.len() == other.candidates.len()
            && self.args == other.args
    }
}

/// 表达式节点，最多三个操作数
#[derive(Debug, Clone, PartialEq)]
pub enum LeafExpression {
    /// 前缀运算（`!a`、`-a`）
    Prefix { op: LeafOperator, operand: Parameter },
    /// 中缀运算，包括下标 `a[b]`
    Infix {
        op: LeafOperator,
        lhs: Parameter,
        rhs: Parameter,
    },
    /// 三元运算 `c ? a : b`
    Ternary {
        condition: Parameter,
        when_true: Parameter,
        when_false: Parameter,
    },
    /// 宽松模式下未折叠的元素序列，交给块的解析签名匹配
    Custom(Vec<Parameter>),
}

/// 参数元组
///
/// 有序的参数列表，附带按位置记录的标签。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafTuple {
    values: Vec<Parameter>,
    labels: BTreeMap<String, usize>,
}

/// 求值上下文
///
/// 提供变量查找能力
pub trait EvalContext {
    /// 获取变量值（包括子路径）
    fn get_var(&self, variable: &LeafVariable) -> Option<LeafData>;

    /// 变量不存在时的结果
    fn missing_variable(&self, _variable: &LeafVariable) -> LeafData {
        LeafData::Nil
    }
}

/// 不含任何变量的上下文，用于常量折叠
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyContext;

impl EvalContext for EmptyContext {
    fn get_var(&self, _variable: &LeafVariable) -> Option<LeafData> {
        None
    }
}

impl Parameter {
    fn new(kind: ParameterKind, resolved: bool, invariant: bool) -> Self {
        Self {
            kind,
            resolved,
            invariant,
        }
    }

    /// 字面量
    pub fn value(data: impl Into<LeafData>) -> Self {
        Self::new(ParameterKind::Value(data.into()), true, true)
    }

    pub fn keyword(keyword: LeafKeyword) -> Self {
        Self::new(ParameterKind::Keyword(keyword), true, true)
    }

    pub fn operator(op: LeafOperator) -> Self {
        Self::new(ParameterKind::Operator(op), true, true)
    }

    /// 变量引用，既不是已解析的也不是不变的
    pub fn variable(variable: LeafVariable) -> Self {
        Self::new(ParameterKind::Variable(variable), false, false)
    }

    pub fn expression(expression: LeafExpression) -> Self {
        let parts = expression.operands();
        let resolved = parts.iter().all(|p| p.resolved);
        let invariant = parts.iter().all(|p| p.invariant);
        Self::new(
            ParameterKind::Expression(Box::new(expression)),
            resolved,
            invariant,
        )
    }

    /// 集合字面量
    pub fn tuple(tuple: LeafTuple) -> Self {
        let resolved = tuple.is_resolved();
        let invariant = tuple.is_invariant();
        Self::new(ParameterKind::Tuple(tuple), resolved, invariant)
    }

    pub fn function(call: FunctionCall) -> Self {
        let resolved = call.args.is_resolved();
        let invariant = call.function.invariant() && call.args.is_invariant();
        Self::new(ParameterKind::Function(Box::new(call)), resolved, invariant)
    }

    pub fn dynamic(call: OverloadCall) -> Self {
        let resolved = call.args.is_resolved();
        let invariant =
            call.candidates.iter().all(|c| c.invariant()) && call.args.is_invariant();
        Self::new(ParameterKind::Dynamic(Box::new(call)), resolved, invariant)
    }

    pub fn kind(&self) -> &ParameterKind {
        &self.kind
    }

    pub fn into_kind(self) -> ParameterKind {
        self.kind
    }

    /// 不含自由变量
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// 每次求值结果相同
    pub fn is_invariant(&self) -> bool {
        self.invariant
    }

    /// 可以在解析期直接求值
    pub fn is_constant(&self) -> bool {
        self.resolved && self.invariant && self.is_valued()
    }

    /// 能否产生一个值
    ///
    /// 运算符、`in`/`var`/`let`/`self` 关键字以及自定义序列都不能。
    pub fn is_valued(&self) -> bool {
        match &self.kind {
            ParameterKind::Keyword(k) => {
                matches!(k, LeafKeyword::True | LeafKeyword::False | LeafKeyword::Nil)
            }
            ParameterKind::Operator(_) => false,
            ParameterKind::Expression(e) => !matches!(e.as_ref(), LeafExpression::Custom(_)),
            _ => true,
        }
    }

    pub fn as_value(&self) -> Option<&LeafData> {
        match &self.kind {
            ParameterKind::Value(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&LeafVariable> {
        match &self.kind {
            ParameterKind::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_operator(&self) -> Option<LeafOperator> {
        match &self.kind {
            ParameterKind::Operator(op) => Some(*op),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<LeafKeyword> {
        match &self.kind {
            ParameterKind::Keyword(k) => Some(*k),
            _ => None,
        }
    }

    /// 收集引用到的全部变量（深度优先，按出现顺序）
    pub fn variables(&self) -> Vec<&LeafVariable> {
        let mut found = Vec::new();
        self.collect_variables(&mut found);
        found
    }

    fn collect_variables<'a>(&'a self, found: &mut Vec<&'a LeafVariable>) {
        match &self.kind {
            ParameterKind::Variable(v) => found.push(v),
            ParameterKind::Expression(e) => {
                for operand in e.operands() {
                    operand.collect_variables(found);
                }
            }
            ParameterKind::Tuple(t) => t.collect_variables(found),
            ParameterKind::Function(call) => call.args.collect_variables(found),
            ParameterKind::Dynamic(call) => call.args.collect_variables(found),
            ParameterKind::Value(_) | ParameterKind::Keyword(_) | ParameterKind::Operator(_) => {}
        }
    }

    /// 对参数求值
    ///
    /// 错误以 [`LeafData::Error`] 返回。
    pub fn evaluate(&self, ctx: &dyn EvalContext) -> LeafData {
        match &self.kind {
            ParameterKind::Value(data) => data.clone(),
            ParameterKind::Keyword(LeafKeyword::True) => LeafData::Bool(true),
            ParameterKind::Keyword(LeafKeyword::False) => LeafData::Bool(false),
            ParameterKind::Keyword(LeafKeyword::Nil) => LeafData::Nil,
            ParameterKind::Keyword(k) => {
                EvalError::mismatch(k.as_str(), "关键字不能作为值使用").into()
            }
            ParameterKind::Operator(op) => {
                EvalError::mismatch(op.symbol(), "运算符缺少操作数").into()
            }
            ParameterKind::Variable(v) => {
                ctx.get_var(v).unwrap_or_else(|| ctx.missing_variable(v))
            }
            ParameterKind::Expression(e) => e.evaluate(ctx),
            ParameterKind::Tuple(t) => t.evaluate_collection(ctx),
            ParameterKind::Function(call) => call.evaluate(ctx),
            ParameterKind::Dynamic(call) => call.evaluate(ctx),
        }
    }
}

impl From<LeafData> for Parameter {
    fn from(data: LeafData) -> Self {
        Self::value(data)
    }
}

impl FunctionCall {
    fn evaluate(&self, ctx: &dyn EvalContext) -> LeafData {
        let values = match self.args.evaluate_all(ctx) {
            Ok(values) => values,
            Err(error) => return error,
        };
        match self.function.signature().resolve(&self.slots, &values) {
            Ok(call_values) => self.function.evaluate(&call_values),
            Err(message) => EvalError::mismatch(&self.name, message).into(),
        }
    }
}

impl OverloadCall {
    fn evaluate(&self, ctx: &dyn EvalContext) -> LeafData {
        let values = match self.args.evaluate_all(ctx) {
            Ok(values) => values,
            Err(error) => return error,
        };
        let labels = self.args.labels();
        let matching: Vec<&Arc<dyn LeafFunction>> = self
            .candidates
            .iter()
            .filter(|candidate| candidate.signature().accepts(&values, labels))
            .collect();
        let [function] = matching.as_slice() else {
            let types: Vec<String> = values.iter().map(LeafData::type_name).collect();
            return EvalError::mismatch(
                &self.name,
                format!(
                    "实参类型 ({}) 匹配到 {} 个重载",
                    types.join(", "),
                    matching.len()
                ),
            )
            .into();
        };
        let signature = function.signature();
        match signature
            .bind(values.len(), labels)
            .and_then(|slots| signature.resolve(&slots, &values))
        {
            Ok(call_values) => function.evaluate(&call_values),
            Err(message) => EvalError::mismatch(&self.name, message).into(),
        }
    }
}

impl LeafExpression {
    /// 全部操作数
    pub fn operands(&self) -> Vec<&Parameter> {
        match self {
            Self::Prefix { operand, .. } => vec![operand],
            Self::Infix { lhs, rhs, .. } => vec![lhs, rhs],
            Self::Ternary {
                condition,
                when_true,
                when_false,
            } => vec![condition, when_true, when_false],
            Self::Custom(items) => items.iter().collect(),
        }
    }

    pub fn evaluate(&self, ctx: &dyn EvalContext) -> LeafData {
        match self {
            Self::Prefix { op, operand } => {
                let value = operand.evaluate(ctx);
                if value.is_error() {
                    return value;
                }
                evaluate_prefix(*op, value)
            }
            Self::Infix { op, lhs, rhs } => evaluate_infix(*op, lhs, rhs, ctx),
            Self::Ternary {
                condition,
                when_true,
                when_false,
            } => {
                let value = condition.evaluate(ctx);
                if value.is_error() {
                    return value;
                }
                if value.is_truthy() {
                    when_true.evaluate(ctx)
                } else {
                    when_false.evaluate(ctx)
                }
            }
            Self::Custom(_) => {
                EvalError::mismatch("表达式", "自定义语法序列不能直接求值").into()
            }
        }
    }
}

fn evaluate_prefix(op: LeafOperator, value: LeafData) -> LeafData {
    match (op, &value) {
        (LeafOperator::Not, _) => LeafData::Bool(!value.is_truthy()),
        (LeafOperator::Negate, LeafData::Int(i)) => match i.checked_neg() {
            Some(negated) => LeafData::Int(negated),
            None => EvalError::mismatch(op.symbol(), "整数溢出").into(),
        },
        (LeafOperator::Negate, LeafData::Double(d)) => LeafData::Double(-d),
        _ => EvalError::mismatch(
            op.symbol(),
            format!("不能用于 {}", value.type_name()),
        )
        .into(),
    }
}

fn evaluate_infix(
    op: LeafOperator,
    lhs: &Parameter,
    rhs: &Parameter,
    ctx: &dyn EvalContext,
) -> LeafData {
    let left = lhs.evaluate(ctx);

    // 短路与空值合并
    match op {
        LeafOperator::NilCoalesce => {
            return if left.is_nil() || left.is_error() {
                rhs.evaluate(ctx)
            } else {
                left
            };
        }
        LeafOperator::And | LeafOperator::Or => {
            if left.is_error() {
                return left;
            }
            let truthy = left.is_truthy();
            if truthy != (op == LeafOperator::And) {
                return LeafData::Bool(truthy);
            }
            let right = rhs.evaluate(ctx);
            if right.is_error() {
                return right;
            }
            return LeafData::Bool(right.is_truthy());
        }
        _ => {}
    }

    if left.is_error() {
        return left;
    }
    let right = rhs.evaluate(ctx);
    if right.is_error() {
        return right;
    }
    binary(op, &left, &right)
}

/// 对两个具体值应用中缀运算符
pub fn binary(op: LeafOperator, left: &LeafData, right: &LeafData) -> LeafData {
    match op {
        LeafOperator::Equal => LeafData::Bool(values_equal(left, right)),
        LeafOperator::Unequal => LeafData::Bool(!values_equal(left, right)),
        LeafOperator::Greater
        | LeafOperator::GreaterOrEqual
        | LeafOperator::Lesser
        | LeafOperator::LesserOrEqual => compare(op, left, right),
        LeafOperator::Plus
        | LeafOperator::Minus
        | LeafOperator::Multiply
        | LeafOperator::Divide
        | LeafOperator::Modulo => arithmetic(op, left, right),
        LeafOperator::Subscript => subscript(left, right),
        LeafOperator::And => LeafData::Bool(left.is_truthy() && right.is_truthy()),
        LeafOperator::Or => LeafData::Bool(left.is_truthy() || right.is_truthy()),
        LeafOperator::NilCoalesce => {
            if left.is_nil() {
                right.clone()
            } else {
                left.clone()
            }
        }
        _ => EvalError::mismatch(op.symbol(), "不是中缀运算符").into(),
    }
}

/// 判断两个值是否相等
///
/// 整数与浮点数按数值比较，其余不同类型的值永远不相等
fn values_equal(left: &LeafData, right: &LeafData) -> bool {
    match (left, right) {
        (LeafData::Int(a), LeafData::Double(b)) | (LeafData::Double(b), LeafData::Int(a)) => {
            *a as f64 == *b
        }
        _ => left == right,
    }
}

fn mismatch_pair(op: LeafOperator, left: &LeafData, right: &LeafData) -> LeafData {
    EvalError::mismatch(
        op.symbol(),
        format!("不能用于 {} 与 {}", left.type_name(), right.type_name()),
    )
    .into()
}

fn compare(op: LeafOperator, left: &LeafData, right: &LeafData) -> LeafData {
    let ordering = match (left, right) {
        (LeafData::Int(a), LeafData::Int(b)) => a.partial_cmp(b),
        (LeafData::String(a), LeafData::String(b)) => a.partial_cmp(b),
        _ => match (left.as_double(), right.as_double()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => return mismatch_pair(op, left, right),
        },
    };
    let Some(ordering) = ordering else {
        return LeafData::Bool(false);
    };
    LeafData::Bool(match op {
        LeafOperator::Greater => ordering.is_gt(),
        LeafOperator::GreaterOrEqual => ordering.is_ge(),
        LeafOperator::Lesser => ordering.is_lt(),
        _ => ordering.is_le(),
    })
}

fn arithmetic(op: LeafOperator, left: &LeafData, right: &LeafData) -> LeafData {
    match (left, right) {
        (LeafData::Int(a), LeafData::Int(b)) => {
            if matches!(op, LeafOperator::Divide | LeafOperator::Modulo) && *b == 0 {
                return EvalError::mismatch(op.symbol(), "除数为零").into();
            }
            let result = match op {
                LeafOperator::Plus => a.checked_add(*b),
                LeafOperator::Minus => a.checked_sub(*b),
                LeafOperator::Multiply => a.checked_mul(*b),
                LeafOperator::Divide => a.checked_div(*b),
                _ => a.checked_rem(*b),
            };
            match result {
                Some(value) => LeafData::Int(value),
                None => EvalError::mismatch(op.symbol(), "整数溢出").into(),
            }
        }
        (LeafData::String(a), LeafData::String(b)) if op == LeafOperator::Plus => {
            LeafData::String(format!("{}{}", a, b))
        }
        (LeafData::Array(a), LeafData::Array(b)) if op == LeafOperator::Plus => {
            LeafData::Array(a.iter().chain(b).cloned().collect())
        }
        (LeafData::Dictionary(a), LeafData::Dictionary(b)) if op == LeafOperator::Plus => {
            let mut merged = a.clone();
            merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
            LeafData::Dictionary(merged)
        }
        _ => match (left.as_double(), right.as_double()) {
            (Some(a), Some(b)) => LeafData::Double(match op {
                LeafOperator::Plus => a + b,
                LeafOperator::Minus => a - b,
                LeafOperator::Multiply => a * b,
                LeafOperator::Divide => a / b,
                _ => a % b,
            }),
            _ => mismatch_pair(op, left, right),
        },
    }
}

fn subscript(container: &LeafData, key: &LeafData) -> LeafData {
    match (container, key) {
        (LeafData::Array(items), LeafData::Int(index)) => usize::try_from(*index)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or_else(|| {
                EvalError::mismatch(
                    LeafOperator::Subscript.symbol(),
                    format!("下标 {} 超出范围（长度 {}）", index, items.len()),
                )
                .into()
            }),
        (LeafData::Dictionary(map), LeafData::String(key)) => {
            map.get(key).cloned().unwrap_or_default()
        }
        _ => mismatch_pair(LeafOperator::Subscript, container, key),
    }
}

impl LeafTuple {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个值，标签不能重复
    pub fn push(&mut self, value: Parameter, label: Option<String>) -> Result<(), String> {
        if let Some(label) = label {
            if self.labels.contains_key(&label) {
                return Err(format!("标签 '{}' 重复", label));
            }
            self.labels.insert(label, self.values.len());
        }
        self.values.push(value);
        Ok(())
    }

    /// 在最前面插入一个无标签值（方法调用的接收者）
    pub fn insert_front(&mut self, value: Parameter) {
        self.values.insert(0, value);
        for index in self.labels.values_mut() {
            *index += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Parameter] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [Parameter] {
        &mut self.values
    }

    pub fn into_values(self) -> Vec<Parameter> {
        self.values
    }

    pub fn labels(&self) -> &BTreeMap<String, usize> {
        &self.labels
    }

    pub fn get(&self, index: usize) -> Option<&Parameter> {
        self.values.get(index)
    }

    /// 某个位置的标签
    pub fn label_of(&self, index: usize) -> Option<&str> {
        self.labels
            .iter()
            .find(|(_, i)| **i == index)
            .map(|(label, _)| label.as_str())
    }

    /// 作为集合字面量是否合法（全无标签或全有标签）
    pub fn is_valid_collection(&self) -> bool {
        self.labels.is_empty() || self.labels.len() == self.values.len()
    }

    pub fn is_dictionary(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn is_resolved(&self) -> bool {
        self.values.iter().all(Parameter::is_resolved)
    }

    pub fn is_invariant(&self) -> bool {
        self.values.iter().all(Parameter::is_invariant)
    }

    fn collect_variables<'a>(&'a self, found: &mut Vec<&'a LeafVariable>) {
        for value in &self.values {
            value.collect_variables(found);
        }
    }

    /// 对每个值求值，遇到错误立即返回该错误
    pub fn evaluate_all(&self, ctx: &dyn EvalContext) -> Result<Vec<LeafData>, LeafData> {
        let mut values = Vec::with_capacity(self.values.len());
        for parameter in &self.values {
            let value = parameter.evaluate(ctx);
            if value.is_error() {
                return Err(value);
            }
            values.push(value);
        }
        Ok(values)
    }

    /// 作为集合字面量求值
    pub fn evaluate_collection(&self, ctx: &dyn EvalContext) -> LeafData {
        let values = match self.evaluate_all(ctx) {
            Ok(values) => values,
            Err(error) => return error,
        };
        if !self.is_dictionary() {
            return LeafData::Array(values);
        }
        let map: BTreeMap<String, LeafData> = self
            .labels
            .iter()
            .map(|(label, index)| (label.clone(), values[*index].clone()))
            .collect();
        LeafData::Dictionary(map)
    }

    fn fmt_items(&self, f: &mut fmt::Formatter<'_>, quote_labels: bool) -> fmt::Result {
        for (index, value) in self.values.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            if let Some(label) = self.label_of(index) {
                if quote_labels {
                    write!(f, "\"{}\": ", label)?;
                } else {
                    write!(f, "{}: ", label)?;
                }
            }
            write!(f, "{}", value)?;
        }
        Ok(())
    }
}

/// 词法分析器能读回的小数：不使用指数，整数值补 `.0`
fn fmt_double(value: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if value.is_nan() {
        return f.write_str("(0.0 / 0.0)");
    }
    if value.is_infinite() {
        let sign = if value < 0.0 { "-" } else { "" };
        return write!(f, "({}1.0 / 0.0)", sign);
    }
    let text = value.to_string();
    if text.contains('.') {
        f.write_str(&text)
    } else {
        write!(f, "{}.0", text)
    }
}

/// 以模板源码形式输出字面量
fn fmt_literal(data: &LeafData, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match data {
        LeafData::Nil | LeafData::Error(_) => f.write_str("nil"),
        LeafData::Bool(b) => write!(f, "{}", b),
        LeafData::Int(i) => write!(f, "{}", i),
        LeafData::Double(d) => fmt_double(*d, f),
        LeafData::String(s) => write!(f, "\"{}\"", s),
        LeafData::Array(items) => {
            f.write_str("[")?;
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    f.write_str(", ")?;
                }
                fmt_literal(item, f)?;
            }
            f.write_str("]")
        }
        LeafData::Dictionary(map) if map.is_empty() => f.write_str("[:]"),
        LeafData::Dictionary(map) => {
            f.write_str("[")?;
            for (index, (key, value)) in map.iter().enumerate() {
                if index > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "\"{}\": ", key)?;
                fmt_literal(value, f)?;
            }
            f.write_str("]")
        }
    }
}

impl fmt::Display for LeafTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        self.fmt_items(f, false)?;
        f.write_str(")")
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ParameterKind::Value(data) => fmt_literal(data, f),
            ParameterKind::Keyword(k) => write!(f, "{}", k),
            ParameterKind::Operator(op) => write!(f, "{}", op),
            ParameterKind::Variable(v) => write!(f, "{}", v),
            ParameterKind::Expression(e) => write!(f, "{}", e),
            ParameterKind::Tuple(t) if t.is_empty() => f.write_str("[]"),
            ParameterKind::Tuple(t) => {
                f.write_str("[")?;
                t.fmt_items(f, true)?;
                f.write_str("]")
            }
            ParameterKind::Function(call) => fmt_call(f, &call.name, call.method, &call.args),
            ParameterKind::Dynamic(call) => fmt_call(f, &call.name, call.method, &call.args),
        }
    }
}

fn fmt_call(f: &mut fmt::Formatter<'_>, name: &str, method: bool, args: &LeafTuple) -> fmt::Result {
    let Some((receiver, rest)) = args.values.split_first().filter(|_| method) else {
        return write!(f, "{}{}", name, args);
    };
    match receiver.kind() {
        ParameterKind::Variable(_) | ParameterKind::Function(_) | ParameterKind::Dynamic(_) => {
            write!(f, "{}.{}(", receiver, name)?
        }
        _ => write!(f, "({}).{}(", receiver, name)?,
    }
    for (offset, value) in rest.iter().enumerate() {
        if offset > 0 {
            f.write_str(", ")?;
        }
        if let Some(label) = args.label_of(offset + 1) {
            write!(f, "{}: ", label)?;
        }
        write!(f, "{}", value)?;
    }
    f.write_str(")")
}

impl fmt::Display for LeafExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefix { op, operand } => write!(f, "({}{})", op, operand),
            Self::Infix {
                op: LeafOperator::Subscript,
                lhs,
                rhs,
            } => write!(f, "({}[{}])", lhs, rhs),
            Self::Infix { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op, rhs),
            Self::Ternary {
                condition,
                when_true,
                when_false,
            } => write!(f, "({} ? {} : {})", condition, when_true, when_false),
            Self::Custom(items) => {
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// 测试用的简单上下文
    struct TestContext {
        vars: HashMap<String, LeafData>,
    }

    impl TestContext {
        fn new() -> Self {
            Self {
                vars: HashMap::new(),
            }
        }

        fn with_var(mut self, name: &str, value: impl Into<LeafData>) -> Self {
            self.vars.insert(name.to_string(), value.into());
            self
        }
    }

    impl EvalContext for TestContext {
        fn get_var(&self, variable: &LeafVariable) -> Option<LeafData> {
            self.vars.get(variable.member()).cloned()
        }
    }

    fn infix(op: LeafOperator, lhs: Parameter, rhs: Parameter) -> Parameter {
        Parameter::expression(LeafExpression::Infix { op, lhs, rhs })
    }

    fn var(name: &str) -> Parameter {
        Parameter::variable(LeafVariable::new(name))
    }

    #[test]
    fn test_flags_propagate() {
        let constant = infix(LeafOperator::Plus, Parameter::value(1), Parameter::value(1));
        assert!(constant.is_resolved());
        assert!(constant.is_invariant());
        assert!(constant.is_constant());

        let free = infix(LeafOperator::Plus, var("x"), Parameter::value(1));
        assert!(!free.is_resolved());
        assert!(!free.is_invariant());
        assert_eq!(free.variables().len(), 1);
    }

    #[test]
    fn test_arithmetic() {
        let ctx = EmptyContext;
        assert_eq!(
            infix(LeafOperator::Minus, Parameter::value(7), Parameter::value(10)).evaluate(&ctx),
            LeafData::Int(-3)
        );
        assert_eq!(
            infix(LeafOperator::Divide, Parameter::value(7), Parameter::value(2.0)).evaluate(&ctx),
            LeafData::Double(3.5)
        );
        assert_eq!(
            infix(LeafOperator::Plus, Parameter::value("a"), Parameter::value("b")).evaluate(&ctx),
            LeafData::from("ab")
        );
    }

    #[test]
    fn test_division_by_zero_is_error() {
        let result =
            infix(LeafOperator::Divide, Parameter::value(1), Parameter::value(0)).evaluate(&EmptyContext);
        assert!(matches!(
            result.as_error(),
            Some(EvalError::TypeMismatch { name, .. }) if name == "/"
        ));
    }

    #[test]
    fn test_mixed_equality() {
        assert_eq!(
            binary(LeafOperator::Equal, &LeafData::Int(2), &LeafData::Double(2.0)),
            LeafData::Bool(true)
        );
        assert_eq!(
            binary(LeafOperator::Equal, &LeafData::Int(2), &LeafData::from("2")),
            LeafData::Bool(false)
        );
    }

    #[test]
    fn test_short_circuit_and_coalesce() {
        let ctx = TestContext::new().with_var("flag", false);
        let error = infix(LeafOperator::Divide, Parameter::value(1), Parameter::value(0));

        // 右侧的错误不会被求值
        let and = infix(LeafOperator::And, var("flag"), error.clone());
        assert_eq!(and.evaluate(&ctx), LeafData::Bool(false));

        // 错误与 nil 都被 ?? 吸收
        let coalesce = infix(LeafOperator::NilCoalesce, error, Parameter::value("fallback"));
        assert_eq!(coalesce.evaluate(&ctx), LeafData::from("fallback"));
        let missing = infix(LeafOperator::NilCoalesce, var("missing"), Parameter::value(1));
        assert_eq!(missing.evaluate(&ctx), LeafData::Int(1));
    }

    #[test]
    fn test_error_propagates_through_operators() {
        let error = infix(LeafOperator::Minus, Parameter::value("a"), Parameter::value(1));
        let outer = infix(LeafOperator::Multiply, error, Parameter::value(2));
        let result = outer.evaluate(&EmptyContext);
        assert!(matches!(
            result.as_error(),
            Some(EvalError::TypeMismatch { name, .. }) if name == "-"
        ));
    }

    #[test]
    fn test_ternary_and_subscript() {
        let ctx = TestContext::new()
            .with_var("names", vec!["tanner", "ziz"])
            .with_var("ok", true);
        let ternary = Parameter::expression(LeafExpression::Ternary {
            condition: var("ok"),
            when_true: infix(LeafOperator::Subscript, var("names"), Parameter::value(1)),
            when_false: Parameter::value("none"),
        });
        assert_eq!(ternary.evaluate(&ctx), LeafData::from("ziz"));

        let out_of_range = infix(LeafOperator::Subscript, var("names"), Parameter::value(5));
        assert!(out_of_range.evaluate(&ctx).is_error());
    }

    #[test]
    fn test_collection_literal() {
        let mut tuple = LeafTuple::new();
        tuple.push(Parameter::value(1), Some("a".into())).unwrap();
        tuple.push(var("x"), Some("b".into())).unwrap();
        assert!(tuple.push(Parameter::value(2), Some("a".into())).is_err());

        let ctx = TestContext::new().with_var("x", "y");
        let dict = Parameter::tuple(tuple).evaluate(&ctx);
        assert_eq!(dict.member("a"), Some(&LeafData::Int(1)));
        assert_eq!(dict.member("b"), Some(&LeafData::from("y")));
    }

    #[test]
    fn test_display_is_fully_parenthesized() {
        let expr = infix(
            LeafOperator::Plus,
            Parameter::value(1),
            infix(LeafOperator::Multiply, var("x"), Parameter::value(2.0)),
        );
        assert_eq!(expr.to_string(), "(1 + (x * 2.0))");

        let negate = Parameter::expression(LeafExpression::Prefix {
            op: LeafOperator::Negate,
            operand: var("x"),
        });
        assert_eq!(negate.to_string(), "(-x)");
    }

    #[test]
    fn test_double_literals_print_without_exponent() {
        assert_eq!(Parameter::value(1e16).to_string(), "10000000000000000.0");
        assert_eq!(Parameter::value(1e-7).to_string(), "0.0000001");
        assert_eq!(Parameter::value(2.5).to_string(), "2.5");
        assert_eq!(Parameter::value(f64::NAN).to_string(), "(0.0 / 0.0)");
        assert_eq!(Parameter::value(f64::NEG_INFINITY).to_string(), "(-1.0 / 0.0)");
    }
}
