//! # 运算符折叠
//!
//! 把一个层级内收集到的操作数与运算符序列折叠为单个参数节点。
//!
//! 每一步找出可应用的优先级最高的运算符，与相邻操作数包装为一个节点：
//!
//! - 前缀运算符只包装其后的操作数，同优先级时从右向左
//! - 中缀运算符同优先级时从左向右（`a - b - c` 为 `(a - b) - c`）
//! - 没有可应用的运算符时，折叠最右侧的 `v ? v : v`
//! - 赋值运算符从不折叠，由调用方识别 `变量 = 值` 的形式
//!
//! 每个新节点如果已解析且不变，立即求值为字面量。

use tracing::trace;

use crate::data::LeafData;
use crate::template::{
    EmptyContext, LeafExpression, LeafOperator, OperatorForm, Parameter, ParameterKind,
};

/// 折叠模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ParseMode {
    /// 放宽检查：允许关键字与相邻操作数，剩余不超过三个元素时返回自定义序列
    pub relaxed: bool,
    /// 允许顶层的 `变量 = 值`
    pub assignment: bool,
}

impl ParseMode {
    pub fn strict() -> Self {
        Self {
            relaxed: false,
            assignment: false,
        }
    }

    pub fn relaxed() -> Self {
        Self {
            relaxed: true,
            assignment: false,
        }
    }

    pub fn assignment() -> Self {
        Self {
            relaxed: false,
            assignment: true,
        }
    }

    /// 嵌套层级使用的模式
    pub fn nested(self) -> Self {
        Self::strict()
    }
}

/// 折叠一个元素序列
pub(crate) fn fold(mut items: Vec<Parameter>, mode: ParseMode) -> Result<Parameter, String> {
    if items.is_empty() {
        return Err("缺少表达式".to_string());
    }
    if !mode.relaxed {
        check_sanity(&items)?;
    }

    while items.len() > 1 {
        if let Some(index) = best_operator(&items) {
            apply_operator(&mut items, index)?;
        } else if let Some(index) = ternary_position(&items) {
            let mut parts = items.drain(index - 1..=index + 3);
            let (Some(condition), _, Some(when_true), _, Some(when_false)) = (
                parts.next(),
                parts.next(),
                parts.next(),
                parts.next(),
                parts.next(),
            ) else {
                return Err("三元表达式不完整".to_string());
            };
            drop(parts);
            let node = constant_fold(Parameter::expression(LeafExpression::Ternary {
                condition,
                when_true,
                when_false,
            }))?;
            items.insert(index - 1, node);
        } else {
            break;
        }
    }

    if items.len() == 1 && items[0].is_valued() {
        return Ok(items.remove(0));
    }
    if mode.assignment && is_assignment(&items) {
        return Ok(Parameter::expression(LeafExpression::Custom(items)));
    }
    if mode.relaxed && items.len() <= 3 {
        return Ok(Parameter::expression(LeafExpression::Custom(items)));
    }
    if !mode.assignment && items.iter().any(is_assignment_operator) {
        return Err("赋值只能出现在匿名标签的顶层".to_string());
    }
    let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
    Err(format!("无法折叠为单个表达式: {}", rendered.join(" ")))
}

/// 已解析且不变的节点立即求值为字面量
pub(crate) fn constant_fold(parameter: Parameter) -> Result<Parameter, String> {
    if !parameter.is_constant() || parameter.as_value().is_some() {
        return Ok(parameter);
    }
    let value = parameter.evaluate(&EmptyContext);
    if let Some(error) = value.as_error() {
        return Err(format!("常量求值失败: {}", error));
    }
    // NaN 与无穷没有字面量形式，保留表达式
    if !is_finite(&value) {
        return Ok(parameter);
    }
    trace!(expression = %parameter, "常量折叠");
    Ok(Parameter::value(value))
}

fn is_finite(value: &LeafData) -> bool {
    match value {
        LeafData::Double(d) => d.is_finite(),
        LeafData::Array(items) => items.iter().all(is_finite),
        LeafData::Dictionary(map) => map.values().all(is_finite),
        _ => true,
    }
}

fn is_assignment_operator(item: &Parameter) -> bool {
    item.as_operator()
        .is_some_and(|op| op.form() == OperatorForm::Assignment)
}

/// `变量 赋值运算符 值`
pub(crate) fn is_assignment(items: &[Parameter]) -> bool {
    matches!(items, [target, op, value]
        if target.as_variable().is_some() && is_assignment_operator(op) && value.is_valued())
}

/// 严格模式的检查
fn check_sanity(items: &[Parameter]) -> Result<(), String> {
    for item in items {
        if let ParameterKind::Keyword(keyword) = item.kind()
            && !item.is_valued()
        {
            return Err(format!("关键字 '{}' 不能出现在表达式中", keyword));
        }
        if let ParameterKind::Expression(expression) = item.kind()
            && matches!(expression.as_ref(), LeafExpression::Custom(_))
        {
            return Err("自定义语法不能出现在表达式中".to_string());
        }
    }
    for pair in items.windows(2) {
        if pair[0].is_valued() && pair[1].is_valued() {
            return Err(format!("操作数 '{}' 与 '{}' 相邻", pair[0], pair[1]));
        }
    }
    let open = count_operator(items, LeafOperator::TernaryTrue);
    let close = count_operator(items, LeafOperator::TernaryFalse);
    if open != close {
        return Err("三元运算符 '?' 与 ':' 不成对".to_string());
    }
    Ok(())
}

fn count_operator(items: &[Parameter], op: LeafOperator) -> usize {
    items
        .iter()
        .filter(|item| item.as_operator() == Some(op))
        .count()
}

fn is_valued_at(items: &[Parameter], index: usize) -> bool {
    items.get(index).is_some_and(Parameter::is_valued)
}

/// 可应用的优先级最高的运算符位置
fn best_operator(items: &[Parameter]) -> Option<usize> {
    let mut best: Option<(usize, u8)> = None;
    for (index, item) in items.iter().enumerate() {
        let Some(op) = item.as_operator() else {
            continue;
        };
        let applicable = match op.form() {
            OperatorForm::Prefix => {
                is_valued_at(items, index + 1) && (index == 0 || !is_valued_at(items, index - 1))
            }
            OperatorForm::Infix => {
                index > 0 && is_valued_at(items, index - 1) && is_valued_at(items, index + 1)
            }
            _ => false,
        };
        if !applicable {
            continue;
        }
        let precedence = op.precedence();
        let replace = match best {
            None => true,
            Some((_, current)) if precedence > current => true,
            // 前缀运算符同级时取最右侧
            Some((_, current)) => precedence == current && op.form() == OperatorForm::Prefix,
        };
        if replace {
            best = Some((index, precedence));
        }
    }
    best.map(|(index, _)| index)
}

fn apply_operator(items: &mut Vec<Parameter>, index: usize) -> Result<(), String> {
    let Some(op) = items[index].as_operator() else {
        return Err("期望运算符".to_string());
    };
    if op.form() == OperatorForm::Prefix {
        let operand = items.remove(index + 1);
        items[index] = constant_fold(Parameter::expression(LeafExpression::Prefix { op, operand }))?;
    } else {
        let rhs = items.remove(index + 1);
        items.remove(index);
        let lhs = items.remove(index - 1);
        let node = constant_fold(Parameter::expression(LeafExpression::Infix { op, lhs, rhs }))?;
        items.insert(index - 1, node);
    }
    Ok(())
}

/// 最右侧可折叠的 `v ? v : v` 中 `?` 的位置
fn ternary_position(items: &[Parameter]) -> Option<usize> {
    (1..items.len()).rev().find(|&index| {
        items[index].as_operator() == Some(LeafOperator::TernaryTrue)
            && is_valued_at(items, index - 1)
            && is_valued_at(items, index + 1)
            && items.get(index + 2).and_then(Parameter::as_operator)
                == Some(LeafOperator::TernaryFalse)
            && is_valued_at(items, index + 3)
    })
}
