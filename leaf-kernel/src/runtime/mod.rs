//! # Runtime 模块
//!
//! 渲染期：上下文数据、AST 遍历与对外的引擎入口。
//!
//! ## 模块结构
//!
//! - [`context`]：渲染上下文（根作用域与命名作用域）
//! - [`serializer`]：作用域表遍历与输出
//! - [`engine`]：注册表、配置与模板资源的组合

pub mod context;
pub mod engine;
pub mod serializer;

pub use context::LeafContext;
pub use engine::LeafEngine;
pub use serializer::{LeafSerializer, serialize};
