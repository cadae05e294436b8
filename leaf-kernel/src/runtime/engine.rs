//! # Engine 模块
//!
//! 把注册表、配置与模板源码组合起来的入口。
//!
//! ## 内联模板
//!
//! 引擎持有按名称登记的模板源码与原始文本资源。编译时反复拼接
//! AST 仍然需要的内联引用，直到全部拼接完成或没有新的进展
//! （引用未登记的模板，或者模板之间互相引用）。

use std::collections::HashMap;

use tracing::debug;

use crate::config::LeafConfiguration;
use crate::entity::LeafEntities;
use crate::error::{LeafError, LeafResult};
use crate::template::{self, LeafAst};

use super::context::LeafContext;
use super::serializer::serialize;

/// 拼接内联模板的最大轮数
const MAX_INLINE_ROUNDS: usize = 32;

/// 模板引擎
#[derive(Debug, Clone)]
pub struct LeafEngine {
    entities: LeafEntities,
    config: LeafConfiguration,
    templates: HashMap<String, String>,
    raws: HashMap<String, String>,
}

impl Default for LeafEngine {
    fn default() -> Self {
        Self::new(LeafEntities::core(), LeafConfiguration::default())
    }
}

impl LeafEngine {
    pub fn new(entities: LeafEntities, config: LeafConfiguration) -> Self {
        Self {
            entities,
            config,
            templates: HashMap::new(),
            raws: HashMap::new(),
        }
    }

    pub fn entities(&self) -> &LeafEntities {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut LeafEntities {
        &mut self.entities
    }

    pub fn config(&self) -> &LeafConfiguration {
        &self.config
    }

    /// 登记可被 `#inline` 引用的模板源码
    pub fn add_template(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }

    /// 登记可被 `#inline(…, as: raw)` 引用的原始文本
    pub fn add_raw(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.raws.insert(name.into(), text.into());
    }

    pub fn contains_template(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn contains_raw(&self, name: &str) -> bool {
        self.raws.contains_key(name)
    }

    /// 解析模板源码，不拼接内联引用
    pub fn parse(&self, name: &str, source: &str) -> LeafResult<LeafAst> {
        template::parse(name, source, &self.entities, &self.config)
    }

    /// 编译已登记的模板，并拼接可用的内联引用
    pub fn compile(&self, name: &str) -> LeafResult<LeafAst> {
        let Some(source) = self.templates.get(name) else {
            return Err(LeafError::Eval(crate::error::EvalError::UnresolvedInline {
                name: name.to_string(),
            }));
        };
        let mut ast = self.parse(name, source)?;
        self.resolve(&mut ast)?;
        Ok(ast)
    }

    /// 拼接已登记的内联模板与原始文本
    ///
    /// 返回拼接的引用总数；未登记的引用保持未解析状态。
    pub fn resolve(&self, ast: &mut LeafAst) -> LeafResult<usize> {
        let mut total = 0;
        for round in 0..MAX_INLINE_ROUNDS {
            let mut filled = 0;

            let templates: Vec<String> = ast.required_templates().iter().cloned().collect();
            for name in templates {
                let Some(source) = self.templates.get(&name) else {
                    continue;
                };
                let other = self.parse(&name, source)?;
                filled += ast.inline_ast(&name, &other);
            }

            let raws: Vec<String> = ast.required_raws().iter().cloned().collect();
            for name in raws {
                if let Some(text) = self.raws.get(&name) {
                    filled += ast.inline_raw(&name, text);
                }
            }

            debug!(template = %ast.name(), round, filled, "内联拼接");
            total += filled;
            if filled == 0 || ast.is_resolved() {
                break;
            }
        }

        if !ast.is_resolved() {
            debug!(
                template = %ast.name(),
                templates = ?ast.required_templates(),
                raws = ?ast.required_raws(),
                "仍有未解析的内联引用"
            );
        }
        Ok(total)
    }

    /// 渲染 AST
    pub fn render(&self, ast: &LeafAst, context: &LeafContext) -> LeafResult<String> {
        let output = serialize(
            ast,
            context,
            &self.config,
            self.entities.default_encoder(),
        )?;
        Ok(output)
    }

    /// 解析、拼接并渲染一段模板源码
    pub fn render_source(
        &self,
        name: &str,
        source: &str,
        context: &LeafContext,
    ) -> LeafResult<String> {
        let mut ast = self.parse(name, source)?;
        self.resolve(&mut ast)?;
        self.render(&ast, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;

    #[test]
    fn test_render_source() {
        let engine = LeafEngine::default();
        let context = LeafContext::new().with_var("name", "Leaf");
        let output = engine.render_source("hello", "Hi #(name)", &context).unwrap();
        assert_eq!(output, "Hi Leaf");
    }

    #[test]
    fn test_nested_inline_resolution() {
        let mut engine = LeafEngine::default();
        engine.add_template("page", "[#inline(\"header\")]");
        engine.add_template("header", "<h1>#(title)</h1>#inline(\"style.css\", as: raw)");
        engine.add_raw("style.css", "<style/>");

        let ast = engine.compile("page").unwrap();
        assert!(ast.is_resolved());
        assert!(ast.required_variables().contains("title"));

        let context = LeafContext::new().with_var("title", "Home");
        let output = engine.render(&ast, &context).unwrap();
        assert_eq!(output, "[<h1>Home</h1><style/>]");
    }

    #[test]
    fn test_cyclic_inline_stays_unresolved() {
        let mut engine = LeafEngine::default();
        engine.add_template("a", "#inline(\"b\")");
        engine.add_template("b", "#inline(\"a\")");

        let ast = engine.compile("a").unwrap();
        assert!(!ast.is_resolved());
        let err = engine.render(&ast, &LeafContext::new()).unwrap_err();
        assert!(matches!(err, LeafError::Eval(EvalError::UnresolvedInline { .. })));
    }

    #[test]
    fn test_unknown_template() {
        let engine = LeafEngine::default();
        assert!(engine.compile("missing").is_err());
    }
}
