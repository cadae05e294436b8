//! # Leaf Kernel
//!
//! Leaf 模板语言的核心库：词法分析、解析、求值，不依赖任何 IO。
//!
//! ## 流程
//!
//! ```text
//! 源码 ──lex──▶ Token ──parse──▶ LeafAst ──inline──▶ LeafAst ──serialize──▶ String
//!                                   ▲                                 ▲
//!                           LeafEntities                      LeafContext
//! ```
//!
//! 模板的外部依赖（`#inline` 引用的模板与原始文本）由调用方提供，
//! 可以直接调用 [`LeafAst::inline_ast`]，也可以登记到 [`LeafEngine`]。
//!
//! ## 使用示例
//!
//! ```ignore
//! use leaf_kernel::{LeafContext, LeafEngine};
//!
//! let mut engine = LeafEngine::default();
//! engine.add_template("header", "<h1>#(title)</h1>");
//!
//! let context = LeafContext::new().with_var("title", "Home");
//! let html = engine.render_source("page", "#inline(\"header\")", &context)?;
//! ```
//!
//! ## 模块结构
//!
//! - [`template`]：词法分析、符号与表达式模型、解析器、AST
//! - [`entity`]：函数、块与输出编码器注册表
//! - [`runtime`]：上下文、AST 遍历与引擎
//! - [`data`]：运行期数据值
//! - [`config`]：内核配置
//! - [`diagnostic`]：静态检查与诊断输出
//! - [`error`]：错误类型定义

pub mod config;
pub mod data;
pub mod diagnostic;
pub mod entity;
pub mod error;
pub mod runtime;
pub mod template;

// 重导出核心类型
pub use config::{ConfigError, Formatters, LeafConfiguration};
pub use data::{LeafData, LeafDataType};
pub use diagnostic::{
    Diagnostic, DiagnosticKind, DiagnosticLevel, DiagnosticReport, analyze_template,
    render_source_window,
};
pub use entity::{
    BlockFactory, CallParameter, CallSignature, LeafBlock, LeafEntities, LeafFunction,
    OutputEncoder,
};
pub use error::{EvalError, LeafError, LeafResult, LexError, ParseError, SourceLocation};
pub use runtime::{LeafContext, LeafEngine, serialize};
pub use template::{LeafAst, Parameter, parse};

/// 用核心注册表与默认配置渲染一段模板源码
pub fn render(source: &str, context: &LeafContext) -> LeafResult<String> {
    LeafEngine::default().render_source("template", source, context)
}
