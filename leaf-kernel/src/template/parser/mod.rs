//! # Parser 模块
//!
//! 把 token 序列解析为 [`LeafAst`]。
//!
//! ## 解析流程
//!
//! 1. 原始文本直接进入当前作用域表（相邻的合并）
//! 2. 标签按名称分派：匿名标签、结束标签、元块、注册的块、函数调用
//! 3. 块打开一个新的作用域表，结束标签关闭它；链式块先关闭前驱的作用域
//! 4. 参数列表由 [`tuple`] 子模块解析，运算符由 [`fold`] 子模块折叠
//!
//! ## 重试
//!
//! 带解析签名的块先按严格模式解析参数，失败时回退到参数开头，
//! 以宽松模式重新解析并尝试匹配解析签名。都不匹配时报告严格模式的错误。

mod fold;
mod tuple;

#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::LeafConfiguration;
use crate::data::LeafData;
use crate::entity::{BlockArguments, BlockFactory, LeafEntities};
use crate::error::{ParseError, SourceLocation};

use super::ast::{AstParts, LeafAst, MetaBlock, Syntax};
use super::lexer::{LeafToken, ParamToken, Token};
use super::{
    FunctionCall, LeafExpression, LeafKeyword, LeafOperator, LeafTuple, OverloadCall, Parameter,
    ParameterKind,
};

use fold::ParseMode;

/// 声明过的局部变量
#[derive(Debug, Clone, Copy)]
struct Declared {
    constant: bool,
    assigned: bool,
}

#[derive(Debug)]
enum OpenKind {
    /// 普通块，记录整条链上的块名
    Block { chain: Vec<String> },
    Define,
    Raw,
}

/// 尚未闭合的块
#[derive(Debug)]
struct OpenBlock {
    name: String,
    kind: OpenKind,
    location: SourceLocation,
}

impl OpenBlock {
    /// `#end<name>` 能否闭合该块
    fn closes(&self, name: &str) -> bool {
        match &self.kind {
            OpenKind::Block { chain } => chain.iter().any(|n| n == name),
            OpenKind::Define => name == "define",
            OpenKind::Raw => name == "raw",
        }
    }

    /// 链首的块名
    fn head(&self) -> &str {
        match &self.kind {
            OpenKind::Block { chain } => chain.first().map(String::as_str).unwrap_or(&self.name),
            _ => &self.name,
        }
    }
}

/// 模板解析器
pub struct LeafParser<'a> {
    name: String,
    entities: &'a LeafEntities,
    config: &'a LeafConfiguration,
    tokens: Vec<Token>,
    pos: usize,

    /// 当前标签，用于错误报告
    tag_name: String,
    tag_location: SourceLocation,

    tables: Vec<Vec<Syntax>>,
    scope_stack: Vec<usize>,
    open_blocks: Vec<OpenBlock>,
    declared: Vec<HashMap<String, Declared>>,
    raw_handlers: Vec<String>,

    required_variables: BTreeSet<String>,
    required_templates: BTreeSet<String>,
    required_raws: BTreeSet<String>,
}

impl<'a> LeafParser<'a> {
    pub fn new(
        name: impl Into<String>,
        tokens: Vec<Token>,
        entities: &'a LeafEntities,
        config: &'a LeafConfiguration,
    ) -> Self {
        Self {
            name: name.into(),
            entities,
            config,
            tokens,
            pos: 0,
            tag_name: String::new(),
            tag_location: SourceLocation::start(),
            tables: vec![Vec::new()],
            scope_stack: vec![0],
            open_blocks: Vec::new(),
            declared: vec![HashMap::new()],
            raw_handlers: Vec::new(),
            required_variables: BTreeSet::new(),
            required_templates: BTreeSet::new(),
            required_raws: BTreeSet::new(),
        }
    }

    /// 执行解析
    pub fn parse(mut self) -> Result<LeafAst, ParseError> {
        debug!(template = %self.name, tokens = self.tokens.len(), "开始解析模板");

        while let Some(Token { token, location }) = self.next() {
            match token {
                LeafToken::Raw(text) => self.append_raw(&text),
                LeafToken::Tag(name) => {
                    self.tag_name = name.clone();
                    self.tag_location = location;
                    self.parse_tag(name)?;
                }
                // 不属于任何块的 `:` 是普通文本
                LeafToken::BlockMark => self.append_raw(":"),
                other => {
                    return Err(ParseError::MalformedExpression {
                        location,
                        name: self.tag_name.clone(),
                        message: format!("意外的 {}", other),
                    });
                }
            }
        }

        if let Some(first) = self.open_blocks.first() {
            return Err(ParseError::UnclosedBlocks {
                location: first.location,
                names: self.open_blocks.iter().map(|b| b.name.clone()).collect(),
            });
        }

        let ast = LeafAst::from_parts(AstParts {
            name: self.name,
            indicator: self.config.tag_indicator,
            tables: self.tables,
            required_variables: self.required_variables,
            required_templates: self.required_templates,
            required_raws: self.required_raws,
        });
        debug!(
            template = %ast.name(),
            tables = ast.tables().len(),
            resolved = ast.is_resolved(),
            "模板解析完成"
        );
        Ok(ast)
    }

    // ========== token 游标 ==========

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn next_token(&mut self) -> Option<LeafToken> {
        self.next().map(|t| t.token)
    }

    fn peek_token(&self) -> Option<&LeafToken> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_token_at(&self, offset: usize) -> Option<&LeafToken> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    /// 消耗一个 `:`
    fn take_block_mark(&mut self) -> bool {
        if matches!(self.peek_token(), Some(LeafToken::BlockMark)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // ========== 输出 ==========

    fn current_table(&mut self) -> &mut Vec<Syntax> {
        let index = self.scope_stack.last().copied().unwrap_or(0);
        &mut self.tables[index]
    }

    fn push_syntax(&mut self, syntax: Syntax) {
        self.current_table().push(syntax);
    }

    fn append_raw(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let table = self.current_table();
        if let Some(Syntax::Raw(previous)) = table.last_mut() {
            previous.push_str(text);
        } else {
            table.push(Syntax::Raw(text.to_string()));
        }
    }

    /// 标签退化为普通文本
    fn decay_to_raw(&mut self, name: &str) {
        let text = format!("{}{}", self.config.tag_indicator, name);
        self.append_raw(&text);
    }

    fn open_scope(&mut self, block: OpenBlock, declares: HashMap<String, Declared>) {
        let index = self.tables.len();
        self.tables.push(Vec::new());
        self.push_syntax(Syntax::Scope(Some(index)));
        self.scope_stack.push(index);
        self.declared.push(declares);
        self.open_blocks.push(block);
    }

    fn close_scope(&mut self) -> Option<OpenBlock> {
        self.scope_stack.pop();
        self.declared.pop();
        self.open_blocks.pop()
    }

    // ========== 错误 ==========

    fn malformed(&self, message: impl Into<String>) -> ParseError {
        ParseError::MalformedExpression {
            location: self.tag_location,
            name: self.tag_name.clone(),
            message: message.into(),
        }
    }

    fn invalid_signature(&self, name: &str, message: impl Into<String>) -> ParseError {
        ParseError::InvalidSignature {
            location: self.tag_location,
            name: name.to_string(),
            message: message.into(),
        }
    }

    fn invalid_variable(&self, variable: &str, message: impl Into<String>) -> ParseError {
        ParseError::InvalidVariableUse {
            location: self.tag_location,
            variable: variable.to_string(),
            message: message.into(),
        }
    }

    // ========== 标签分派 ==========

    fn parse_tag(&mut self, name: String) -> Result<(), ParseError> {
        let has_params = matches!(self.peek_token(), Some(LeafToken::ParamsStart));

        if name.is_empty() {
            return self.parse_anonymous();
        }

        if !has_params
            && let Some(closed) = name.strip_prefix("end")
            && !closed.is_empty()
            && self.close_block(closed)?
        {
            return Ok(());
        }

        if has_params && matches!(name.as_str(), "define" | "evaluate" | "inline" | "raw") {
            return self.parse_meta(&name);
        }

        let entities = self.entities;
        if let Some(factory) = entities.block(&name)
            && (has_params || matches!(self.peek_token(), Some(LeafToken::BlockMark)))
        {
            return self.parse_block(&name, factory.as_ref(), has_params);
        }

        if has_params {
            let tuple = self.parse_tuple(ParseMode::strict())?;
            let call = self.resolve_call(&name, false, tuple)?;
            self.validate_parameter(&call)?;
            self.push_syntax(Syntax::Expression(call));
            return Ok(());
        }

        self.decay_to_raw(&name);
        Ok(())
    }

    /// 处理 `#end<name>`，返回 `false` 表示它只是普通文本
    fn close_block(&mut self, closed: &str) -> Result<bool, ParseError> {
        if self.open_blocks.last().is_some_and(|top| top.closes(closed)) {
            if let Some(block) = self.close_scope() {
                trace!(block = %block.name, "关闭块");
                if matches!(block.kind, OpenKind::Raw) {
                    self.raw_handlers.pop();
                }
            }
            return Ok(true);
        }

        let known = self.entities.block(closed).is_some()
            || matches!(closed, "define" | "raw")
            || self.open_blocks.iter().any(|b| b.closes(closed));
        if !known {
            return Ok(false);
        }
        let message = match self.open_blocks.last() {
            Some(top) => format!("当前打开的块是 '{}'", top.head()),
            None => "没有打开的块".to_string(),
        };
        Err(ParseError::UnmatchedBlock {
            location: self.tag_location,
            name: self.tag_name.clone(),
            message,
        })
    }

    // ========== 匿名标签 ==========

    fn parse_anonymous(&mut self) -> Result<(), ParseError> {
        if matches!(
            self.peek_token_at(1),
            Some(LeafToken::Param(ParamToken::Keyword(
                LeafKeyword::Var | LeafKeyword::Let
            )))
        ) {
            return self.parse_declaration();
        }

        let tuple = self.parse_tuple(ParseMode::assignment())?;
        if tuple.len() != 1 || !tuple.labels().is_empty() {
            return Err(self.malformed("匿名标签只能包含一个表达式"));
        }
        let Some(value) = tuple.into_values().pop() else {
            return Err(self.malformed("匿名标签只能包含一个表达式"));
        };

        if let ParameterKind::Expression(expression) = value.kind()
            && let LeafExpression::Custom(items) = expression.as_ref()
            && fold::is_assignment(items)
        {
            return self.parse_assignment(items.clone());
        }

        self.validate_parameter(&value)?;
        self.push_syntax(Syntax::Expression(value));
        Ok(())
    }

    /// `#(var x)`、`#(var x = v)`、`#(let x = v)`
    fn parse_declaration(&mut self) -> Result<(), ParseError> {
        self.pos += 1;
        let constant = matches!(
            self.next_token(),
            Some(LeafToken::Param(ParamToken::Keyword(LeafKeyword::Let)))
        );
        let Some(LeafToken::Param(ParamToken::Identifier(variable))) = self.next_token() else {
            return Err(self.malformed("声明需要变量名"));
        };

        let value = match self.next_token() {
            Some(LeafToken::ParamsEnd) => None,
            Some(LeafToken::Param(ParamToken::Operator(LeafOperator::Assignment))) => {
                let tuple = self.parse_tuple_body(ParseMode::strict())?;
                if tuple.len() != 1 || !tuple.labels().is_empty() {
                    return Err(self.malformed("声明只能赋一个值"));
                }
                tuple.into_values().pop()
            }
            _ => return Err(self.malformed("声明的格式为 `var 名称 = 值`")),
        };

        if constant && value.is_none() {
            return Err(self.invalid_variable(&variable, "let 声明必须赋值"));
        }
        if let Some(value) = &value {
            self.validate_parameter(value)?;
        }
        if self
            .declared
            .last()
            .is_some_and(|frame| frame.contains_key(&variable))
        {
            return Err(self.invalid_variable(&variable, "在同一作用域内重复声明"));
        }

        trace!(variable = %variable, constant, "声明变量");
        if let Some(frame) = self.declared.last_mut() {
            frame.insert(
                variable.clone(),
                Declared {
                    constant,
                    assigned: value.is_some(),
                },
            );
        }
        self.push_syntax(Syntax::Declare {
            variable,
            constant,
            value,
        });
        Ok(())
    }

    /// `#(x = v)`、`#(x += v)`
    fn parse_assignment(&mut self, items: Vec<Parameter>) -> Result<(), ParseError> {
        let mut items = items.into_iter();
        let (Some(target), Some(op), Some(value)) = (items.next(), items.next(), items.next())
        else {
            return Err(self.malformed("赋值格式无效"));
        };
        let (Some(variable), Some(op)) = (target.as_variable().cloned(), op.as_operator()) else {
            return Err(self.malformed("赋值格式无效"));
        };

        if !variable.is_atomic() {
            return Err(self.invalid_variable(&variable.to_string(), "只能给局部变量赋值"));
        }
        let Some(declared) = self.lookup(variable.member()) else {
            return Err(self.invalid_variable(variable.member(), "赋值之前必须先声明"));
        };
        if declared.constant {
            return Err(self.invalid_variable(variable.member(), "常量不能重新赋值"));
        }
        if op.compound_base().is_some() && !declared.assigned {
            return Err(self.invalid_variable(variable.member(), "复合赋值之前必须先赋值"));
        }
        self.validate_parameter(&value)?;

        for frame in self.declared.iter_mut().rev() {
            if let Some(entry) = frame.get_mut(variable.member()) {
                entry.assigned = true;
                break;
            }
        }
        self.push_syntax(Syntax::Assign {
            variable,
            op,
            value,
        });
        Ok(())
    }

    // ========== 元块 ==========

    fn parse_meta(&mut self, name: &str) -> Result<(), ParseError> {
        match name {
            "define" => self.parse_define(),
            "evaluate" => self.parse_evaluate(),
            "inline" => self.parse_inline(),
            _ => self.parse_raw_switch(),
        }
    }

    fn single_argument(&mut self, mode: ParseMode) -> Result<Parameter, ParseError> {
        let tuple = self.parse_tuple(mode)?;
        if tuple.len() != 1 || !tuple.labels().is_empty() {
            return Err(self.malformed("只接受一个参数"));
        }
        tuple
            .into_values()
            .pop()
            .ok_or_else(|| self.malformed("只接受一个参数"))
    }

    /// `#define(name = value)` 或 `#define(name): ... #enddefine`
    fn parse_define(&mut self) -> Result<(), ParseError> {
        let argument = self.single_argument(ParseMode::assignment())?;

        if let ParameterKind::Expression(expression) = argument.kind()
            && let LeafExpression::Custom(items) = expression.as_ref()
            && let [target, op, value] = items.as_slice()
            && op.as_operator() == Some(LeafOperator::Assignment)
            && let Some(variable) = target.as_variable().filter(|v| v.is_atomic())
        {
            self.validate_parameter(value)?;
            self.push_syntax(Syntax::Meta(MetaBlock::Define {
                name: variable.member().to_string(),
                value: Some(value.clone()),
            }));
            return Ok(());
        }

        if let Some(variable) = argument.as_variable().filter(|v| v.is_atomic()) {
            let name = variable.member().to_string();
            if !self.take_block_mark() {
                return Err(self.malformed("define 的主体需要以 ':' 开始"));
            }
            self.push_syntax(Syntax::Meta(MetaBlock::Define {
                name: name.clone(),
                value: None,
            }));
            self.open_scope(
                OpenBlock {
                    name: "define".to_string(),
                    kind: OpenKind::Define,
                    location: self.tag_location,
                },
                HashMap::new(),
            );
            trace!(define = %name, "打开 define 主体");
            return Ok(());
        }

        Err(self.malformed("define 需要 `名称 = 值` 或 `名称):` 形式"))
    }

    /// `#evaluate(name)` 或 `#evaluate(name ?? default)`
    fn parse_evaluate(&mut self) -> Result<(), ParseError> {
        let argument = self.single_argument(ParseMode::strict())?;

        let (name, default) = match argument.kind() {
            ParameterKind::Variable(v) if v.is_atomic() => (v.member().to_string(), None),
            ParameterKind::Expression(expression) => match expression.as_ref() {
                LeafExpression::Infix {
                    op: LeafOperator::NilCoalesce,
                    lhs,
                    rhs,
                } => match lhs.as_variable() {
                    Some(v) if v.is_atomic() => (v.member().to_string(), Some(rhs.clone())),
                    _ => return Err(self.malformed("evaluate 需要一个定义名")),
                },
                _ => return Err(self.malformed("evaluate 需要 `名称` 或 `名称 ?? 默认值`")),
            },
            _ => return Err(self.malformed("evaluate 需要 `名称` 或 `名称 ?? 默认值`")),
        };

        if let Some(default) = &default {
            self.validate_parameter(default)?;
        }
        self.push_syntax(Syntax::Meta(MetaBlock::Evaluate { name, default }));
        Ok(())
    }

    /// `#inline("file")` 或 `#inline("file", as: raw)`
    fn parse_inline(&mut self) -> Result<(), ParseError> {
        let tuple = self.parse_tuple(ParseMode::strict())?;
        let file = match tuple.get(0).and_then(Parameter::as_value) {
            Some(LeafData::String(file)) if tuple.label_of(0).is_none() => {
                file.clone()
            }
            _ => return Err(self.invalid_signature("inline", "第一个参数必须是模板名字符串")),
        };

        let mut raw = false;
        for (label, index) in tuple.labels() {
            if label != "as" {
                return Err(self.invalid_signature("inline", format!("未知的参数标签 '{}'", label)));
            }
            let mode = tuple.get(*index).and_then(|p| match p.kind() {
                ParameterKind::Variable(v) if v.is_atomic() => Some(v.member().to_string()),
                ParameterKind::Value(LeafData::String(s)) => Some(s.clone()),
                _ => None,
            });
            raw = match mode.as_deref() {
                Some("raw") => true,
                Some("leaf") => false,
                _ => return Err(self.invalid_signature("inline", "`as:` 只能是 raw 或 leaf")),
            };
        }
        if tuple.len() != 1 + tuple.labels().len() {
            return Err(self.invalid_signature("inline", "只接受一个模板名"));
        }

        if raw {
            self.required_raws.insert(file.clone());
        } else {
            self.required_templates.insert(file.clone());
        }
        debug!(file = %file, raw, "记录内联引用");
        self.push_syntax(Syntax::Meta(MetaBlock::Inline { file, raw }));
        self.push_syntax(Syntax::Scope(None));
        Ok(())
    }

    /// `#raw(handler): ... #endraw`
    fn parse_raw_switch(&mut self) -> Result<(), ParseError> {
        let argument = self.single_argument(ParseMode::strict())?;
        let handler = match argument.kind() {
            ParameterKind::Variable(v) if v.is_atomic() => v.member().to_string(),
            ParameterKind::Value(LeafData::String(s)) => s.clone(),
            _ => return Err(self.invalid_signature("raw", "需要编码器名称")),
        };
        let Some(encoder) = self.entities.encoder(&handler).map(Arc::clone) else {
            return Err(self.invalid_signature("raw", format!("编码器 '{}' 未注册", handler)));
        };
        if !self.take_block_mark() {
            return Err(self.malformed("raw 的主体需要以 ':' 开始"));
        }

        let outer = self
            .raw_handlers
            .last()
            .map(String::as_str)
            .unwrap_or(self.entities.default_encoder_name());
        debug!(from = %outer, to = %handler, "切换输出编码器");

        self.push_syntax(Syntax::Meta(MetaBlock::RawSwitch {
            handler: handler.clone(),
            encoder,
        }));
        self.open_scope(
            OpenBlock {
                name: "raw".to_string(),
                kind: OpenKind::Raw,
                location: self.tag_location,
            },
            HashMap::new(),
        );
        self.raw_handlers.push(handler);
        Ok(())
    }

    // ========== 块 ==========

    fn parse_block(
        &mut self,
        name: &str,
        factory: &dyn BlockFactory,
        has_params: bool,
    ) -> Result<(), ParseError> {
        let arguments = if has_params {
            self.parse_block_arguments(name, factory)?
        } else {
            BlockArguments::Call(LeafTuple::new())
        };
        if !self.take_block_mark() {
            return Err(self.malformed(format!("块 '{}' 需要以 ':' 开始主体", name)));
        }

        let chain = if factory.chains_to().is_empty() {
            vec![name.to_string()]
        } else {
            let predecessor = match self.open_blocks.last() {
                Some(OpenBlock {
                    name: last,
                    kind: OpenKind::Block { chain },
                    ..
                }) if factory.chains_to().contains(&last.as_str()) => chain.clone(),
                _ => {
                    return Err(ParseError::UnmatchedBlock {
                        location: self.tag_location,
                        name: name.to_string(),
                        message: format!("必须紧跟在 {} 之后", factory.chains_to().join("/")),
                    });
                }
            };
            self.close_scope();
            let mut chain = predecessor;
            chain.push(name.to_string());
            chain
        };
        let chained = chain.len() > 1;

        let instance = factory
            .instantiate(arguments)
            .map_err(|message| self.invalid_signature(name, message))?;
        for value in instance.args.values() {
            self.validate_parameter(value)?;
        }

        trace!(block = %name, chained, args = %instance.args, "打开块");
        self.push_syntax(Syntax::Block {
            name: name.to_string(),
            chained,
            block: instance.block,
            args: instance.args,
        });
        let declares = instance
            .declares
            .into_iter()
            .map(|variable| {
                (
                    variable,
                    Declared {
                        constant: true,
                        assigned: true,
                    },
                )
            })
            .collect();
        self.open_scope(
            OpenBlock {
                name: name.to_string(),
                kind: OpenKind::Block { chain },
                location: self.tag_location,
            },
            declares,
        );
        Ok(())
    }

    /// 严格解析，失败时以宽松模式重试解析签名
    fn parse_block_arguments(
        &mut self,
        name: &str,
        factory: &dyn BlockFactory,
    ) -> Result<BlockArguments, ParseError> {
        let start = self.pos;
        let matches = |tuple: &LeafTuple| {
            factory
                .parse_signatures()
                .iter()
                .find_map(|signature| signature.matches(tuple))
        };

        match self.parse_tuple(ParseMode::strict()) {
            Ok(tuple) => Ok(match matches(&tuple) {
                Some(parsed) => BlockArguments::Parsed(parsed),
                None => BlockArguments::Call(tuple),
            }),
            Err(error) if !factory.parse_signatures().is_empty() => {
                debug!(block = %name, error = %error, "严格解析失败，以宽松模式重试");
                self.pos = start;
                let tuple = self.parse_tuple(ParseMode::relaxed())?;
                match matches(&tuple) {
                    Some(parsed) => {
                        trace!(block = %name, signature = parsed.signature, "匹配解析签名");
                        Ok(BlockArguments::Parsed(parsed))
                    }
                    None => Err(error),
                }
            }
            Err(error) => Err(error),
        }
    }

    // ========== 调用与变量 ==========

    /// 按名称与实参形状选择重载
    fn resolve_call(
        &self,
        name: &str,
        method: bool,
        args: LeafTuple,
    ) -> Result<Parameter, ParseError> {
        let entities = self.entities;
        let candidates = if method {
            entities.methods(name)
        } else {
            entities.functions(name)
        };
        let kind = if method { "方法" } else { "函数" };
        if candidates.is_empty() {
            return Err(self.invalid_signature(name, format!("{}未注册", kind)));
        }

        let mut shaped = Vec::new();
        let mut last_error = String::new();
        for candidate in candidates {
            match candidate.signature().bind(args.len(), args.labels()) {
                Ok(slots) => shaped.push((Arc::clone(candidate), slots)),
                Err(message) => last_error = message,
            }
        }
        if shaped.is_empty() {
            return Err(self.invalid_signature(name, last_error));
        }

        let literals: Option<Vec<LeafData>> = args
            .values()
            .iter()
            .map(|p| p.as_value().cloned())
            .collect();
        if let Some(values) = literals {
            shaped.retain(|(candidate, slots)| candidate.signature().resolve(slots, &values).is_ok());
            match shaped.len() {
                0 => return Err(self.invalid_signature(name, "实参类型与所有重载都不匹配")),
                1 => {}
                count => {
                    return Err(ParseError::AmbiguousOverload {
                        location: self.tag_location,
                        name: name.to_string(),
                        candidates: count,
                    });
                }
            }
        }

        let call = if shaped.len() == 1 {
            let Some((function, slots)) = shaped.pop() else {
                return Err(self.invalid_signature(name, "没有可用的重载"));
            };
            Parameter::function(FunctionCall {
                name: name.to_string(),
                method,
                function,
                args,
                slots,
            })
        } else {
            trace!(name = %name, candidates = shaped.len(), "推迟到求值期选择重载");
            Parameter::dynamic(OverloadCall {
                name: name.to_string(),
                method,
                candidates: shaped.into_iter().map(|(candidate, _)| candidate).collect(),
                args,
            })
        };
        fold::constant_fold(call).map_err(|message| self.malformed(message))
    }

    fn lookup(&self, variable: &str) -> Option<Declared> {
        self.declared
            .iter()
            .rev()
            .find_map(|frame| frame.get(variable).copied())
    }

    /// 检查参数中的变量并记录需要的上下文变量
    fn validate_parameter(&mut self, parameter: &Parameter) -> Result<(), ParseError> {
        for variable in parameter.variables() {
            if variable.scope().is_none()
                && let Some(declared) = self.lookup(variable.member())
            {
                if !declared.assigned {
                    return Err(self.invalid_variable(variable.member(), "声明后尚未赋值"));
                }
                continue;
            }
            self.required_variables.insert(variable.root_key());
        }
        Ok(())
    }
}
