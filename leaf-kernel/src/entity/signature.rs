//! # Signature 模块
//!
//! 函数调用签名与块的自定义解析签名。
//!
//! ## 参数绑定规则
//!
//! - 无标签参数按顺序由位置实参填充
//! - 有标签参数只能由同名标签实参填充
//! - 缺失的参数使用默认值，没有默认值则绑定失败
//! - 多余的位置实参或未知标签都会导致绑定失败

use std::collections::BTreeMap;
use std::ops::Index;

use crate::data::{LeafData, LeafDataType};
use crate::template::{LeafExpression, LeafKeyword, LeafTuple, Parameter, ParameterKind};

/// 签名中的单个参数
#[derive(Debug, Clone, PartialEq)]
pub struct CallParameter {
    /// 参数标签
    pub label: Option<String>,
    /// 接受的类型，为空表示接受任意值
    pub types: Vec<LeafDataType>,
    /// 默认值
    pub default: Option<LeafData>,
}

impl CallParameter {
    /// 接受任意值的位置参数
    pub fn any() -> Self {
        Self {
            label: None,
            types: Vec::new(),
            default: None,
        }
    }

    /// 指定类型的位置参数
    pub fn typed(types: &[LeafDataType]) -> Self {
        Self {
            label: None,
            types: types.to_vec(),
            default: None,
        }
    }

    /// 设置标签
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// 设置默认值
    pub fn with_default(mut self, default: impl Into<LeafData>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// 按参数类型转换实参，无法接受时返回 `None`
    ///
    /// 整数可以提升为浮点数。
    fn coerce(&self, value: &LeafData) -> Option<LeafData> {
        if self.types.is_empty() {
            return Some(value.clone());
        }
        let data_type = value.data_type()?;
        if self.types.contains(&data_type) {
            return Some(value.clone());
        }
        match value {
            LeafData::Int(i) if self.types.contains(&LeafDataType::Double) => {
                Some(LeafData::Double(*i as f64))
            }
            _ => None,
        }
    }
}

/// 参数绑定结果中的一个槽位
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentSlot {
    /// 来自第 n 个实参
    Argument(usize),
    /// 使用默认值
    Default(LeafData),
}

/// 函数调用签名
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallSignature {
    params: Vec<CallParameter>,
}

impl CallSignature {
    pub fn new(params: Vec<CallParameter>) -> Self {
        Self { params }
    }

    /// 不接受任何参数
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn params(&self) -> &[CallParameter] {
        &self.params
    }

    /// 按实参数量与标签绑定参数（只检查形状，不检查类型）
    pub fn bind(
        &self,
        count: usize,
        labels: &BTreeMap<String, usize>,
    ) -> Result<Vec<ArgumentSlot>, String> {
        let labeled: Vec<usize> = labels.values().copied().collect();
        let positional: Vec<usize> = (0..count).filter(|i| !labeled.contains(i)).collect();
        if let (Some(last_positional), Some(first_labeled)) =
            (positional.last(), labeled.iter().min())
            && last_positional > first_labeled
        {
            return Err("位置参数必须位于标签参数之前".to_string());
        }

        let mut slots = Vec::with_capacity(self.params.len());
        let mut next_positional = 0;
        let mut used_labels = 0;
        for param in &self.params {
            let slot = match &param.label {
                Some(label) => match labels.get(label) {
                    Some(index) => {
                        used_labels += 1;
                        Some(ArgumentSlot::Argument(*index))
                    }
                    None => None,
                },
                None if next_positional < positional.len() => {
                    next_positional += 1;
                    Some(ArgumentSlot::Argument(positional[next_positional - 1]))
                }
                None => None,
            };
            match (slot, &param.default) {
                (Some(slot), _) => slots.push(slot),
                (None, Some(default)) => slots.push(ArgumentSlot::Default(default.clone())),
                (None, None) => {
                    return Err(match &param.label {
                        Some(label) => format!("缺少参数 '{}'", label),
                        None => format!("缺少第 {} 个参数", next_positional + 1),
                    });
                }
            }
        }

        if next_positional < positional.len() {
            return Err(format!(
                "最多接受 {} 个位置参数，实际 {} 个",
                next_positional,
                positional.len()
            ));
        }
        if used_labels < labels.len() {
            let unknown: Vec<&str> = labels
                .keys()
                .filter(|label| {
                    !self
                        .params
                        .iter()
                        .any(|p| p.label.as_deref() == Some(label.as_str()))
                })
                .map(String::as_str)
                .collect();
            return Err(format!("未知的参数标签: {}", unknown.join(", ")));
        }
        Ok(slots)
    }

    /// 按槽位取出实参并检查类型
    pub fn resolve(&self, slots: &[ArgumentSlot], values: &[LeafData]) -> Result<CallValues, String> {
        let mut resolved = Vec::with_capacity(slots.len());
        for (param, slot) in self.params.iter().zip(slots) {
            let value = match slot {
                ArgumentSlot::Argument(index) => &values[*index],
                ArgumentSlot::Default(default) => default,
            };
            let coerced = param.coerce(value).ok_or_else(|| {
                let expected: Vec<String> = param.types.iter().map(ToString::to_string).collect();
                format!("期望 {}，实际 {}", expected.join(" | "), value.type_name())
            })?;
            resolved.push(coerced);
        }
        Ok(CallValues(resolved))
    }

    /// 检查具体实参是否满足签名
    pub fn accepts(&self, values: &[LeafData], labels: &BTreeMap<String, usize>) -> bool {
        self.bind(values.len(), labels)
            .and_then(|slots| self.resolve(&slots, values))
            .is_ok()
    }
}

/// 已绑定并完成类型检查的实参列表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallValues(Vec<LeafData>);

impl CallValues {
    pub fn new(values: Vec<LeafData>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LeafData> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LeafData> {
        self.0.iter()
    }

    /// 第一个带内错误
    pub fn first_error(&self) -> Option<&LeafData> {
        self.0.iter().find(|value| value.is_error())
    }
}

impl Index<usize> for CallValues {
    type Output = LeafData;

    fn index(&self, index: usize) -> &LeafData {
        &self.0[index]
    }
}

/// 自定义解析签名中的元素
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseSlot {
    /// 声明一个新变量（必须是原子变量）
    Declare,
    /// 固定关键字
    Keyword(LeafKeyword),
    /// 任意求值表达式
    Expression,
}

/// 块的命名替代语法
///
/// `params` 的每一项对应参数元组中的一个值，值本身是一串元素
/// （例如 `for(x in xs)` 为 `[[Declare, Keyword(In), Expression]]`）。
#[derive(Debug, Clone, PartialEq)]
pub struct ParseSignature {
    pub name: &'static str,
    pub params: Vec<Vec<ParseSlot>>,
}

/// 自定义语法匹配结果
#[derive(Debug, Clone)]
pub struct ParsedArguments {
    /// 匹配到的签名名称
    pub signature: &'static str,
    /// 声明的变量名，按出现顺序
    pub declared: Vec<String>,
    /// 需要求值的表达式，按出现顺序
    pub expressions: Vec<Parameter>,
}

impl ParseSignature {
    pub fn new(name: &'static str, params: Vec<Vec<ParseSlot>>) -> Self {
        Self { name, params }
    }

    /// 尝试匹配参数元组
    pub fn matches(&self, tuple: &LeafTuple) -> Option<ParsedArguments> {
        if tuple.len() != self.params.len() || !tuple.labels().is_empty() {
            return None;
        }
        let mut parsed = ParsedArguments {
            signature: self.name,
            declared: Vec::new(),
            expressions: Vec::new(),
        };
        for (value, slots) in tuple.values().iter().zip(&self.params) {
            let elements: Vec<&Parameter> = match value.kind() {
                ParameterKind::Expression(expression) => match expression.as_ref() {
                    LeafExpression::Custom(items) => items.iter().collect(),
                    _ => vec![value],
                },
                _ => vec![value],
            };
            if elements.len() != slots.len() {
                return None;
            }
            for (element, slot) in elements.into_iter().zip(slots) {
                match (slot, element.kind()) {
                    (ParseSlot::Declare, ParameterKind::Variable(variable))
                        if variable.is_atomic() =>
                    {
                        parsed.declared.push(variable.member().to_string());
                    }
                    (ParseSlot::Keyword(expected), ParameterKind::Keyword(found))
                        if expected == found => {}
                    (ParseSlot::Expression, _) if element.is_valued() => {
                        parsed.expressions.push(element.clone());
                    }
                    _ => return None,
                }
            }
        }
        Some(parsed)
    }
}
