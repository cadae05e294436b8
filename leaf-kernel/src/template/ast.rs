//! # AST 模块
//!
//! 编译后的模板：扁平的作用域表数组，表 0 为入口作用域。
//!
//! 块节点之后紧跟一个指向其主体表的 [`Syntax::Scope`]，
//! 循环与条件的主体只存储一份，每一轮重新遍历。

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::entity::{LeafBlock, OutputEncoder};
use crate::template::{LeafOperator, LeafTuple, LeafVariable, Parameter};

/// 语法节点
#[derive(Debug, Clone)]
pub enum Syntax {
    /// 原始文本（相邻片段在解析时合并）
    Raw(String),
    /// 输出表达式结果
    Expression(Parameter),
    /// 变量声明
    Declare {
        variable: String,
        constant: bool,
        value: Option<Parameter>,
    },
    /// 变量赋值（`=` 或复合赋值）
    Assign {
        variable: LeafVariable,
        op: LeafOperator,
        value: Parameter,
    },
    /// 块
    Block {
        name: String,
        /// 是否为链式块的后续环节（`elseif`、`else`）
        chained: bool,
        block: Box<dyn LeafBlock>,
        args: LeafTuple,
    },
    /// 元块
    Meta(MetaBlock),
    /// 作用域引用；`None` 表示尚未拼接的内联模板
    Scope(Option<usize>),
}

/// 元块
#[derive(Debug, Clone)]
pub enum MetaBlock {
    /// `#define(name = value)`，或 `#define(name):` 主体形式（`value` 为 `None`，后随作用域）
    Define {
        name: String,
        value: Option<Parameter>,
    },
    /// `#evaluate(name)` / `#evaluate(name ?? default)`
    Evaluate {
        name: String,
        default: Option<Parameter>,
    },
    /// `#inline("file")` / `#inline("file", as: raw)`，后随作用域引用
    Inline { file: String, raw: bool },
    /// `#raw(handler):`，主体内的表达式输出使用指定编码器
    RawSwitch {
        handler: String,
        encoder: Arc<dyn OutputEncoder>,
    },
}

/// 编译后的模板
#[derive(Debug, Clone)]
pub struct LeafAst {
    name: String,
    indicator: char,
    tables: Vec<Vec<Syntax>>,
    required_variables: BTreeSet<String>,
    required_templates: BTreeSet<String>,
    required_raws: BTreeSet<String>,
    underestimated_size: usize,
}

/// 解析器产出的全部部件
pub(crate) struct AstParts {
    pub name: String,
    pub indicator: char,
    pub tables: Vec<Vec<Syntax>>,
    pub required_variables: BTreeSet<String>,
    pub required_templates: BTreeSet<String>,
    pub required_raws: BTreeSet<String>,
}

impl LeafAst {
    pub(crate) fn from_parts(parts: AstParts) -> Self {
        let underestimated_size = raw_size(&parts.tables[0]);
        Self {
            name: parts.name,
            indicator: parts.indicator,
            tables: parts.tables,
            required_variables: parts.required_variables,
            required_templates: parts.required_templates,
            required_raws: parts.required_raws,
            underestimated_size,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag_indicator(&self) -> char {
        self.indicator
    }

    pub fn tables(&self) -> &[Vec<Syntax>] {
        &self.tables
    }

    /// 模板引用的自由变量（根键）
    pub fn required_variables(&self) -> &BTreeSet<String> {
        &self.required_variables
    }

    /// 尚未拼接的内联模板
    pub fn required_templates(&self) -> &BTreeSet<String> {
        &self.required_templates
    }

    /// 尚未拼接的原始文本资源
    pub fn required_raws(&self) -> &BTreeSet<String> {
        &self.required_raws
    }

    /// 输出大小的下限估计（入口作用域中原始文本的长度）
    pub fn underestimated_size(&self) -> usize {
        self.underestimated_size
    }

    /// 所有内联引用都已拼接
    pub fn is_resolved(&self) -> bool {
        self.required_templates.is_empty() && self.required_raws.is_empty()
    }

    /// 把另一个模板拼接到所有对它的 `#inline` 引用处
    ///
    /// 返回填充的引用数量。没有引用（或引用自身）时不做任何修改。
    pub fn inline_ast(&mut self, name: &str, other: &LeafAst) -> usize {
        if name == self.name {
            return 0;
        }
        let offset = self.tables.len();
        let filled = self.fill_inline_references(name, false, offset);
        if filled == 0 {
            return 0;
        }
        for table in &other.tables {
            let shifted = table
                .iter()
                .map(|syntax| match syntax {
                    Syntax::Scope(Some(index)) => Syntax::Scope(Some(index + offset)),
                    other => other.clone(),
                })
                .collect();
            self.tables.push(shifted);
        }
        self.required_templates.remove(name);
        self.required_templates
            .extend(other.required_templates.iter().cloned());
        self.required_raws.extend(other.required_raws.iter().cloned());
        self.required_variables
            .extend(other.required_variables.iter().cloned());
        self.underestimated_size += other.underestimated_size * filled;
        debug!(template = %self.name, inlined = %name, filled, "拼接内联模板");
        filled
    }

    /// 把原始文本拼接到所有对它的 `#inline(…, as: raw)` 引用处
    pub fn inline_raw(&mut self, name: &str, text: &str) -> usize {
        let offset = self.tables.len();
        let filled = self.fill_inline_references(name, true, offset);
        if filled == 0 {
            return 0;
        }
        self.tables.push(vec![Syntax::Raw(text.to_string())]);
        self.required_raws.remove(name);
        self.underestimated_size += text.len() * filled;
        debug!(template = %self.name, inlined = %name, filled, "拼接原始文本");
        filled
    }

    fn fill_inline_references(&mut self, name: &str, raw: bool, target: usize) -> usize {
        let mut filled = 0;
        for table in &mut self.tables {
            for index in 1..table.len() {
                let matches = matches!(
                    &table[index - 1],
                    Syntax::Meta(MetaBlock::Inline { file, raw: is_raw }) if file == name && *is_raw == raw
                );
                if matches && matches!(table[index], Syntax::Scope(None)) {
                    table[index] = Syntax::Scope(Some(target));
                    filled += 1;
                }
            }
        }
        filled
    }

    /// 输出一张表
    ///
    /// `bare` 记录上一个输出是否为不带参数的结束标签：此时紧跟的标识符字符、
    /// `(` 或 `:` 会被词法分析器并入标签，需要改写为字符串表达式。
    fn fmt_table(&self, f: &mut fmt::Formatter<'_>, index: usize, bare: &mut bool) -> fmt::Result {
        let Some(table) = self.tables.get(index) else {
            return Ok(());
        };
        let indicator = self.indicator;
        let mut chain_head: Option<&str> = None;
        let mut cursor = 0;
        while cursor < table.len() {
            let syntax = &table[cursor];
            cursor += 1;
            if let Syntax::Raw(text) = syntax {
                self.fmt_raw(f, text, bare)?;
                continue;
            }
            if !matches!(syntax, Syntax::Scope(_) | Syntax::Meta(MetaBlock::Inline { .. })) {
                *bare = false;
            }
            match syntax {
                Syntax::Raw(_) => {}
                Syntax::Expression(value) => write!(f, "{}({})", indicator, value)?,
                Syntax::Declare {
                    variable,
                    constant,
                    value,
                } => {
                    let keyword = if *constant { "let" } else { "var" };
                    match value {
                        Some(value) => {
                            write!(f, "{}({} {} = {})", indicator, keyword, variable, value)?
                        }
                        None => write!(f, "{}({} {})", indicator, keyword, variable)?,
                    }
                }
                Syntax::Assign {
                    variable,
                    op,
                    value,
                } => write!(f, "{}({} {} {})", indicator, variable, op, value)?,
                Syntax::Block {
                    name,
                    chained,
                    block,
                    args,
                } => {
                    if !chained {
                        chain_head = Some(name.as_str());
                    }
                    write!(f, "{}{}{}:", indicator, name, block.format_parameters(args))?;
                    cursor += self.fmt_body(f, table.get(cursor), bare)?;
                    let continues = matches!(
                        table.get(cursor),
                        Some(Syntax::Block { chained: true, .. })
                    );
                    if !continues {
                        write!(f, "{}end{}", indicator, chain_head.unwrap_or(name))?;
                        *bare = true;
                    }
                }
                Syntax::Meta(meta) => match meta {
                    MetaBlock::Define {
                        name,
                        value: Some(value),
                    } => write!(f, "{}define({} = {})", indicator, name, value)?,
                    MetaBlock::Define { name, value: None } => {
                        write!(f, "{}define({}):", indicator, name)?;
                        cursor += self.fmt_body(f, table.get(cursor), bare)?;
                        write!(f, "{}enddefine", indicator)?;
                        *bare = true;
                    }
                    MetaBlock::Evaluate { name, default } => match default {
                        Some(default) => {
                            write!(f, "{}evaluate({} ?? {})", indicator, name, default)?
                        }
                        None => write!(f, "{}evaluate({})", indicator, name)?,
                    },
                    MetaBlock::Inline { file, raw } => match table.get(cursor) {
                        Some(Syntax::Scope(Some(target))) => {
                            cursor += 1;
                            self.fmt_table(f, *target, bare)?;
                        }
                        next => {
                            if matches!(next, Some(Syntax::Scope(None))) {
                                cursor += 1;
                            }
                            *bare = false;
                            if *raw {
                                write!(f, "{}inline(\"{}\", as: raw)", indicator, file)?;
                            } else {
                                write!(f, "{}inline(\"{}\")", indicator, file)?;
                            }
                        }
                    },
                    MetaBlock::RawSwitch { handler, .. } => {
                        write!(f, "{}raw({}):", indicator, handler)?;
                        cursor += self.fmt_body(f, table.get(cursor), bare)?;
                        write!(f, "{}endraw", indicator)?;
                        *bare = true;
                    }
                },
                Syntax::Scope(Some(target)) => self.fmt_table(f, *target, bare)?,
                Syntax::Scope(None) => {}
            }
        }
        Ok(())
    }

    fn fmt_raw(&self, f: &mut fmt::Formatter<'_>, text: &str, bare: &mut bool) -> fmt::Result {
        let mut chars = text.chars().peekable();
        if *bare
            && let Some(&first) = chars.peek()
            && (first.is_alphanumeric() || matches!(first, '_' | '(' | ':'))
        {
            write!(f, "{}(\"{}\")", self.indicator, first)?;
            chars.next();
        }
        for c in chars {
            if c == '\\' || c == self.indicator {
                f.write_str("\\")?;
            }
            write!(f, "{}", c)?;
        }
        if !text.is_empty() {
            *bare = false;
        }
        Ok(())
    }

    /// 输出块主体，返回消耗的节点数
    fn fmt_body(
        &self,
        f: &mut fmt::Formatter<'_>,
        next: Option<&Syntax>,
        bare: &mut bool,
    ) -> Result<usize, fmt::Error> {
        match next {
            Some(Syntax::Scope(Some(target))) => {
                *bare = false;
                self.fmt_table(f, *target, bare)?;
                Ok(1)
            }
            Some(Syntax::Scope(None)) => Ok(1),
            _ => Ok(0),
        }
    }
}

fn raw_size(table: &[Syntax]) -> usize {
    table
        .iter()
        .map(|syntax| match syntax {
            Syntax::Raw(text) => text.len(),
            _ => 0,
        })
        .sum()
}

/// 以模板源码形式输出
///
/// 输出可以被重新解析；已拼接的内联内容直接展开。
impl fmt::Display for LeafAst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_table(f, 0, &mut false)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::LeafConfiguration;
    use crate::entity::LeafEntities;
    use crate::template::parse;

    fn ast(name: &str, source: &str) -> super::LeafAst {
        parse(name, source, &LeafEntities::core(), &LeafConfiguration::default()).unwrap()
    }

    #[test]
    fn test_required_sets() {
        let ast = ast("page", "#(title) #inline(\"header\") #inline(\"style.css\", as: raw)");
        assert!(ast.required_variables().contains("title"));
        assert!(ast.required_templates().contains("header"));
        assert!(ast.required_raws().contains("style.css"));
        assert!(!ast.is_resolved());
    }

    #[test]
    fn test_inline_ast_renumbers_scopes() {
        let mut page = ast("page", "A#inline(\"part\")B");
        let part = ast("part", "#if(flag):yes#endif");
        assert_eq!(page.inline_ast("part", &part), 1);
        assert!(page.required_templates().is_empty());
        assert!(page.required_variables().contains("flag"));
        // page 原有 1 张表，part 的 2 张表追加在后
        assert_eq!(page.tables().len(), 3);
        // 结束标签后紧跟的字母改写为字符串表达式
        assert_eq!(page.to_string(), "A#if(flag):yes#endif#(\"B\")");
    }

    #[test]
    fn test_inline_raw() {
        let mut page = ast("page", "<style>#inline(\"a.css\", as: raw)</style>");
        assert_eq!(page.inline_raw("missing", "x"), 0);
        assert_eq!(page.inline_raw("a.css", "b{}"), 1);
        assert!(page.is_resolved());
        assert_eq!(page.to_string(), "<style>b{}</style>");
    }

    #[test]
    fn test_self_inline_refused() {
        let mut page = ast("page", "#inline(\"page\")");
        let copy = page.clone();
        assert_eq!(page.inline_ast("page", &copy), 0);
    }

    #[test]
    fn test_dump_escapes_and_chains() {
        let ast = ast(
            "dump",
            "\\#literal #if(a):x#elseif(b):y#else:z#endif #(1 + 2)",
        );
        assert_eq!(
            ast.to_string(),
            "\\#literal #if(a):x#elseif(b):y#else:z#endif #(3)"
        );
    }

    #[test]
    fn test_underestimated_size() {
        let ast = ast("size", "abc#(x)de");
        assert_eq!(ast.underestimated_size(), 5);
    }
}
