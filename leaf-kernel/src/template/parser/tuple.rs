//! # 参数元组解析
//!
//! 用显式的层级栈解析 `( ... )` 内的参数，不使用递归。
//!
//! 每遇到 `(`、`[` 或函数调用就压入一层，闭合时把该层折叠后的结果
//! 作为一个操作数交给上一层。

use std::collections::BTreeMap;
use std::mem;

use crate::data::LeafData;
use crate::error::ParseError;
use crate::template::lexer::{LeafToken, ParamToken};
use crate::template::{
    LeafExpression, LeafKeyword, LeafOperator, LeafTuple, LeafVariable, Parameter,
    ParameterKind, SELF_SCOPE,
};

use super::LeafParser;
use super::fold::{ParseMode, constant_fold, fold};

#[derive(Debug)]
enum LevelKind {
    /// 标签的参数列表
    Top,
    /// 函数或方法调用
    Call { name: String, method: bool },
    /// 括号分组
    Group,
    /// 数组或字典字面量
    Collection,
    /// 下标
    Subscript,
}

#[derive(Debug, Clone, PartialEq)]
enum LevelState {
    Start,
    /// 读到作用域，等待 `.成员`
    VariableOpen { scope: String, dotted: bool },
    /// 读到操作数后的 `.`，等待成员名
    MethodChain,
}

#[derive(Debug)]
struct Level {
    kind: LevelKind,
    tuple: LeafTuple,
    label: Option<String>,
    complex: Vec<Parameter>,
    state: LevelState,
    after_delimiter: bool,
    empty_dictionary: bool,
}

impl Level {
    fn new(kind: LevelKind) -> Self {
        Self {
            kind,
            tuple: LeafTuple::new(),
            label: None,
            complex: Vec::new(),
            state: LevelState::Start,
            after_delimiter: false,
            empty_dictionary: false,
        }
    }

    fn last_is_valued(&self) -> bool {
        self.complex.last().is_some_and(Parameter::is_valued)
    }

    /// 当前元素能否作为标签
    fn label_candidate(&self) -> Option<String> {
        if self.label.is_some() || self.complex.len() != 1 {
            return None;
        }
        match (&self.kind, self.complex[0].kind()) {
            (LevelKind::Top | LevelKind::Call { .. } | LevelKind::Collection, ParameterKind::Variable(v))
                if v.is_atomic() =>
            {
                Some(v.member().to_string())
            }
            (LevelKind::Collection, ParameterKind::Value(LeafData::String(s))) => Some(s.clone()),
            _ => None,
        }
    }
}

impl LeafParser<'_> {
    /// 解析以 `(` 开头的参数列表
    pub(super) fn parse_tuple(&mut self, mode: ParseMode) -> Result<LeafTuple, ParseError> {
        match self.next_token() {
            Some(LeafToken::ParamsStart) => self.parse_tuple_body(mode),
            _ => Err(self.malformed("缺少参数列表")),
        }
    }

    /// 解析 `(` 之后的内容，直到与之配对的 `)`
    pub(super) fn parse_tuple_body(&mut self, mode: ParseMode) -> Result<LeafTuple, ParseError> {
        let mut levels = vec![Level::new(LevelKind::Top)];

        loop {
            let Some(token) = self.next_token() else {
                return Err(self.malformed("参数列表没有闭合"));
            };
            let Some(level) = levels.last_mut() else {
                return Err(self.malformed("参数层级为空"));
            };

            match (&level.state, &token) {
                (
                    LevelState::VariableOpen { dotted: false, .. },
                    LeafToken::Param(ParamToken::Operator(LeafOperator::ScopeMember)),
                ) => {
                    if let LevelState::VariableOpen { dotted, .. } = &mut level.state {
                        *dotted = true;
                    }
                    continue;
                }
                (
                    LevelState::VariableOpen { dotted: true, scope },
                    LeafToken::Param(ParamToken::Identifier(member)),
                ) => {
                    let variable = LeafVariable::scoped(scope.clone(), member.clone());
                    level.complex.push(Parameter::variable(variable));
                    level.state = LevelState::Start;
                    continue;
                }
                (LevelState::VariableOpen { .. }, _) => {
                    return Err(self.malformed("作用域之后需要 `.成员`"));
                }
                (LevelState::MethodChain, LeafToken::Param(ParamToken::Identifier(member))) => {
                    let member = member.clone();
                    level.state = LevelState::Start;
                    let Some(receiver) = level.complex.pop() else {
                        return Err(self.malformed("`.` 之前缺少操作数"));
                    };
                    if matches!(self.peek_token(), Some(LeafToken::ParamsStart)) {
                        self.pos += 1;
                        let mut call = Level::new(LevelKind::Call {
                            name: member,
                            method: true,
                        });
                        call.tuple.insert_front(receiver);
                        levels.push(call);
                    } else {
                        let access = self.member_access(receiver, member)?;
                        level.complex.push(access);
                    }
                    continue;
                }
                (LevelState::MethodChain, _) => {
                    return Err(self.malformed("`.` 之后需要成员名"));
                }
                (LevelState::Start, _) => {}
            }

            match token {
                LeafToken::ParamsStart => levels.push(Level::new(LevelKind::Group)),
                LeafToken::ParamsEnd => {
                    let Some(mut closed) = levels.pop() else {
                        return Err(self.malformed("括号不匹配"));
                    };
                    self.finish_element(&mut closed, mode)?;
                    let value = match closed.kind {
                        LevelKind::Top => return Ok(closed.tuple),
                        LevelKind::Group => self.single(closed.tuple)?,
                        LevelKind::Call { name, method } => {
                            self.resolve_call(&name, method, closed.tuple)?
                        }
                        LevelKind::Collection | LevelKind::Subscript => {
                            return Err(self.malformed("`[` 与 `)` 不匹配"));
                        }
                    };
                    self.push_operand(&mut levels, value)?;
                }
                LeafToken::ParamDelimit => {
                    if matches!(level.kind, LevelKind::Group | LevelKind::Subscript) {
                        return Err(self.malformed("此处不能使用 ','"));
                    }
                    if level.complex.is_empty() {
                        return Err(self.malformed("参数为空"));
                    }
                    self.finish_element(level, mode)?;
                    level.after_delimiter = true;
                }
                LeafToken::Param(ParamToken::Operator(LeafOperator::SubOpen)) => {
                    let kind = if level.last_is_valued() {
                        LevelKind::Subscript
                    } else {
                        LevelKind::Collection
                    };
                    levels.push(Level::new(kind));
                }
                LeafToken::Param(ParamToken::Operator(LeafOperator::SubClose)) => {
                    let Some(mut closed) = levels.pop() else {
                        return Err(self.malformed("括号不匹配"));
                    };
                    self.finish_element(&mut closed, mode)?;
                    match closed.kind {
                        LevelKind::Subscript => {
                            let key = self.single(closed.tuple)?;
                            let Some(parent) = levels.last_mut() else {
                                return Err(self.malformed("括号不匹配"));
                            };
                            let Some(container) = parent.complex.pop() else {
                                return Err(self.malformed("下标缺少容器"));
                            };
                            let value = self.fold_node(LeafExpression::Infix {
                                op: LeafOperator::Subscript,
                                lhs: container,
                                rhs: key,
                            })?;
                            parent.complex.push(value);
                        }
                        LevelKind::Collection => {
                            let value = if closed.empty_dictionary {
                                Parameter::value(LeafData::Dictionary(BTreeMap::new()))
                            } else if !closed.tuple.is_valid_collection() {
                                return Err(self.malformed("集合字面量不能混用有标签与无标签的元素"));
                            } else {
                                constant_fold(Parameter::tuple(closed.tuple))
                                    .map_err(|message| self.malformed(message))?
                            };
                            self.push_operand(&mut levels, value)?;
                        }
                        _ => return Err(self.malformed("`(` 与 `]` 不匹配")),
                    }
                }
                LeafToken::Param(ParamToken::Operator(LeafOperator::TernaryFalse))
                    if level.label_candidate().is_some() =>
                {
                    level.label = level.label_candidate();
                    level.complex.clear();
                }
                LeafToken::Param(ParamToken::Operator(LeafOperator::TernaryFalse))
                    if matches!(level.kind, LevelKind::Collection)
                        && level.complex.is_empty()
                        && level.tuple.is_empty() =>
                {
                    level.empty_dictionary = true;
                }
                LeafToken::Param(ParamToken::Operator(LeafOperator::ScopeMember)) => {
                    if !level.last_is_valued() {
                        return Err(self.malformed("`.` 之前缺少操作数"));
                    }
                    level.state = LevelState::MethodChain;
                }
                LeafToken::Param(ParamToken::Operator(LeafOperator::Minus))
                    if !level.last_is_valued() =>
                {
                    level.complex.push(Parameter::operator(LeafOperator::Negate));
                }
                LeafToken::Param(ParamToken::Operator(op)) => {
                    level.complex.push(Parameter::operator(op));
                }
                LeafToken::Param(ParamToken::Identifier(name)) => {
                    if matches!(self.peek_token(), Some(LeafToken::ParamsStart)) {
                        self.pos += 1;
                        levels.push(Level::new(LevelKind::Call {
                            name,
                            method: false,
                        }));
                    } else {
                        level.complex.push(Parameter::variable(LeafVariable::new(name)));
                    }
                }
                LeafToken::Param(ParamToken::Scope(scope)) => {
                    level.state = LevelState::VariableOpen {
                        scope,
                        dotted: false,
                    };
                }
                LeafToken::Param(ParamToken::Keyword(keyword)) => {
                    let parameter = match keyword {
                        LeafKeyword::SelfScope => {
                            level.state = LevelState::VariableOpen {
                                scope: SELF_SCOPE.to_string(),
                                dotted: false,
                            };
                            continue;
                        }
                        LeafKeyword::True => Parameter::value(true),
                        LeafKeyword::False => Parameter::value(false),
                        LeafKeyword::Nil => Parameter::value(LeafData::Nil),
                        other => Parameter::keyword(other),
                    };
                    level.complex.push(parameter);
                }
                LeafToken::Param(ParamToken::Literal(data)) => {
                    level.complex.push(Parameter::value(data));
                }
                other => {
                    return Err(self.malformed(format!("参数列表中出现意外的 {}", other)));
                }
            }
        }
    }

    /// 把闭合层级的结果作为操作数交给上一层
    fn push_operand(&self, levels: &mut [Level], value: Parameter) -> Result<(), ParseError> {
        let Some(parent) = levels.last_mut() else {
            return Err(self.malformed("括号不匹配"));
        };
        parent.complex.push(value);
        Ok(())
    }

    /// 折叠当前元素并追加到该层元组
    fn finish_element(&self, level: &mut Level, mode: ParseMode) -> Result<(), ParseError> {
        if level.state != LevelState::Start {
            return Err(self.malformed("成员访问不完整"));
        }
        let complex = mem::take(&mut level.complex);
        let label = level.label.take();
        if complex.is_empty() {
            if let Some(label) = label {
                return Err(self.malformed(format!("标签 '{}' 缺少值", label)));
            }
            if level.after_delimiter {
                return Err(self.malformed("多余的 ','"));
            }
            return Ok(());
        }
        if level.empty_dictionary {
            return Err(self.malformed("`[:]` 之后不能再有元素"));
        }
        let mode = match level.kind {
            LevelKind::Top => mode,
            _ => mode.nested(),
        };
        let value = fold(complex, mode).map_err(|message| self.malformed(message))?;
        level
            .tuple
            .push(value, label)
            .map_err(|message| self.malformed(message))
    }

    /// 分组与下标只能包含一个无标签的值
    fn single(&self, tuple: LeafTuple) -> Result<Parameter, ParseError> {
        if tuple.len() != 1 || !tuple.labels().is_empty() {
            return Err(self.malformed("括号内只能有一个表达式"));
        }
        tuple
            .into_values()
            .pop()
            .ok_or_else(|| self.malformed("括号内只能有一个表达式"))
    }

    /// `a.b`：变量延长路径，其余值转为字符串下标
    fn member_access(&self, receiver: Parameter, member: String) -> Result<Parameter, ParseError> {
        if let Some(variable) = receiver.as_variable() {
            return Ok(Parameter::variable(variable.extended(member)));
        }
        self.fold_node(LeafExpression::Infix {
            op: LeafOperator::Subscript,
            lhs: receiver,
            rhs: Parameter::value(member),
        })
    }

    fn fold_node(&self, expression: LeafExpression) -> Result<Parameter, ParseError> {
        constant_fold(Parameter::expression(expression)).map_err(|message| self.malformed(message))
    }
}
