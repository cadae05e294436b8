//! # Template 模块
//!
//! 模板语言的前端：词法分析、参数与表达式模型、解析器与编译产物。
//!
//! ```text
//! 源码 ──lex──▶ Token 序列 ──parse──▶ LeafAst（作用域表数组）
//! ```

pub mod ast;
pub mod expr;
pub mod lexer;
pub mod parser;
pub mod symbol;

pub use ast::{LeafAst, MetaBlock, Syntax};
pub use expr::{
    EmptyContext, EvalContext, FunctionCall, LeafExpression, LeafTuple, OverloadCall, Parameter,
    ParameterKind, binary,
};
pub use lexer::{LeafLexer, LeafToken, ParamToken, Token, lex};
pub use parser::LeafParser;
pub use symbol::{LeafKeyword, LeafOperator, LeafVariable, OperatorForm, SELF_SCOPE};

use crate::config::LeafConfiguration;
use crate::entity::LeafEntities;
use crate::error::LeafResult;

/// 把模板源码编译为 AST
pub fn parse(
    name: &str,
    source: &str,
    entities: &LeafEntities,
    config: &LeafConfiguration,
) -> LeafResult<LeafAst> {
    let tokens = LeafLexer::new(source, config.tag_indicator).lex()?;
    let ast = LeafParser::new(name, tokens, entities, config).parse()?;
    Ok(ast)
}
