//! # Context 模块
//!
//! 渲染时的外部数据：根作用域（`self`）与命名作用域（`$name`）。
//!
//! JSON 上下文中以 `$` 开头、值为对象的键被视为命名作用域：
//!
//! ```text
//! { "title": "Home", "$app": { "version": "1.0" } }
//! ```
//!
//! 对应模板中的 `#(title)` 与 `#($app.version)`。

use std::collections::BTreeMap;

use serde::de::Error as _;

use crate::data::LeafData;
use crate::template::{LeafAst, LeafVariable, SELF_SCOPE};

/// 渲染上下文
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafContext {
    root: BTreeMap<String, LeafData>,
    scopes: BTreeMap<String, BTreeMap<String, LeafData>>,
}

impl LeafContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置根作用域变量（构建器风格）
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<LeafData>) -> Self {
        self.set(name, value);
        self
    }

    /// 设置命名作用域变量（构建器风格）
    pub fn with_scoped(
        mut self,
        scope: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<LeafData>,
    ) -> Self {
        self.set_scoped(scope, name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<LeafData>) {
        self.root.insert(name.into(), value.into());
    }

    pub fn set_scoped(
        &mut self,
        scope: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<LeafData>,
    ) {
        self.scopes
            .entry(scope.into())
            .or_default()
            .insert(name.into(), value.into());
    }

    /// 从 JSON 对象构建
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let LeafData::Dictionary(map) = LeafData::from_json(text)? else {
            return Err(serde_json::Error::custom("上下文必须是 JSON 对象"));
        };
        let mut context = Self::new();
        for (key, value) in map {
            match (key.strip_prefix('$'), value) {
                (Some(scope), LeafData::Dictionary(values)) if !scope.is_empty() => {
                    context.scopes.insert(scope.to_string(), values);
                }
                (_, value) => {
                    context.root.insert(key, value);
                }
            }
        }
        Ok(context)
    }

    /// 根作用域
    pub fn root(&self) -> &BTreeMap<String, LeafData> {
        &self.root
    }

    /// 命名作用域
    pub fn scope(&self, name: &str) -> Option<&BTreeMap<String, LeafData>> {
        self.scopes.get(name)
    }

    /// 查找变量（不含渲染期的局部变量）
    pub fn get(&self, variable: &LeafVariable) -> Option<LeafData> {
        let base = match variable.scope() {
            None | Some(SELF_SCOPE) => self.root.get(variable.member()),
            Some(scope) => self.scopes.get(scope)?.get(variable.member()),
        }?;
        walk_path(base, variable.path())
    }

    /// 是否提供了某个根键（[`LeafVariable::root_key`] 的格式）
    pub fn contains_key(&self, key: &str) -> bool {
        match key.strip_prefix('$').and_then(|rest| rest.split_once('.')) {
            Some((scope, member)) => self
                .scopes
                .get(scope)
                .is_some_and(|values| values.contains_key(member)),
            None => self.root.contains_key(key),
        }
    }

    /// 模板需要但上下文没有提供的变量
    pub fn missing_keys(&self, ast: &LeafAst) -> Vec<String> {
        ast.required_variables()
            .iter()
            .filter(|key| !self.contains_key(key))
            .cloned()
            .collect()
    }
}

/// 沿成员路径取值
pub(crate) fn walk_path(base: &LeafData, path: &[String]) -> Option<LeafData> {
    let mut current = base;
    for component in path {
        current = current.member(component)?;
    }
    Some(current.clone())
}
