//! # 诊断模块
//!
//! 模板的静态检查，不依赖 IO。
//!
//! 每条诊断带有一个 [`DiagnosticKind`]，级别由类别决定：
//! 词法/语法错误与加载失败是错误，未拼接的 `#inline` 是警告，
//! 上下文需要提供的变量是提示。
//!
//! 编译错误附带出错位置与 `^~~~` 源码窗口；未拼接的内联引用按
//! 作用域表扫描，同名引用合并为一条并记录引用次数。

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EvalError, LeafError, SourceLocation};
use crate::template::{LeafAst, MetaBlock, Syntax};

/// 诊断级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        })
    }
}

/// 诊断类别
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// 词法或语法错误
    Syntax,
    /// 渲染期错误
    Render,
    /// 读取模板或其内联文件失败
    Load,
    /// 没有拼接内容的 `#inline`
    MissingInline {
        name: String,
        raw: bool,
        references: usize,
    },
    /// 需要由上下文提供的变量
    RequiredVariables(Vec<String>),
}

impl DiagnosticKind {
    pub fn level(&self) -> DiagnosticLevel {
        match self {
            Self::Syntax | Self::Render | Self::Load => DiagnosticLevel::Error,
            Self::MissingInline { .. } => DiagnosticLevel::Warn,
            Self::RequiredVariables(_) => DiagnosticLevel::Info,
        }
    }
}

/// 一条诊断
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// 模板名称或文件路径
    pub template: String,
    pub kind: DiagnosticKind,
    pub message: String,
    pub location: Option<SourceLocation>,
    /// 带 `^~~~` 标记的源码窗口
    pub window: Option<String>,
}

impl Diagnostic {
    pub fn new(template: impl Into<String>, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            kind,
            message: message.into(),
            location: None,
            window: None,
        }
    }

    /// 读取失败
    pub fn load_failure(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(template, DiagnosticKind::Load, message)
    }

    /// 编译或渲染错误；有位置时截取源码窗口
    pub fn from_error(template: impl Into<String>, error: &LeafError, source: &str) -> Self {
        let kind = match error {
            LeafError::Lex(_) | LeafError::Parse(_) => DiagnosticKind::Syntax,
            LeafError::Eval(EvalError::UnresolvedInline { name }) => DiagnosticKind::MissingInline {
                name: name.clone(),
                raw: false,
                references: 1,
            },
            LeafError::Eval(_) => DiagnosticKind::Render,
        };
        let mut diagnostic = Self::new(template, kind, error.to_string());
        if let Some(location) = error.location() {
            diagnostic.location = Some(location);
            diagnostic.window = Some(render_source_window(source, location, error.marker_width()))
                .filter(|window| !window.is_empty());
        }
        diagnostic
    }

    pub fn level(&self) -> DiagnosticLevel {
        self.kind.level()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level(), self.template)?;
        if let Some(location) = self.location {
            write!(f, ":{}:{}", location.line, location.column)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(window) = &self.window {
            for line in window.lines() {
                write!(f, "\n  | {}", line)?;
            }
        }
        Ok(())
    }
}

/// 一批模板的诊断
#[derive(Debug, Clone, Default)]
pub struct DiagnosticReport {
    pub entries: Vec<Diagnostic>,
}

impl DiagnosticReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn count(&self, level: DiagnosticLevel) -> usize {
        self.entries.iter().filter(|d| d.level() == level).count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(DiagnosticLevel::Error) > 0
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 级别不低于 `min` 的诊断
    pub fn at_least(&self, min: DiagnosticLevel) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.level() >= min)
    }

    /// 尚未拼接的内联名称
    pub fn missing_inlines(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|d| match &d.kind {
            DiagnosticKind::MissingInline { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }
}

impl Extend<Diagnostic> for DiagnosticReport {
    fn extend<I: IntoIterator<Item = Diagnostic>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

impl IntoIterator for DiagnosticReport {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// 取出出错的源码行，并在其下方用 `^~~~` 标出位置
///
/// `width` 为标记的字符数（至少 1）。位置超出源码范围时返回空字符串。
pub fn render_source_window(source: &str, location: SourceLocation, width: usize) -> String {
    let Some(line) = source.lines().nth(location.line.saturating_sub(1)) else {
        return String::new();
    };
    // 制表符保持原样，使标记与源码对齐
    let padding: String = line
        .chars()
        .take(location.column.saturating_sub(1))
        .map(|c| if c == '\t' { '\t' } else { ' ' })
        .collect();
    format!("{}\n{}^{}", line, padding, "~".repeat(width.max(1) - 1))
}

/// 统计各作用域表中没有拼接内容的 `#inline`
///
/// 键为 `(名称, 是否原始文本)`，值为引用次数。
fn unfilled_inlines(ast: &LeafAst) -> BTreeMap<(&str, bool), usize> {
    let mut found = BTreeMap::new();
    for table in ast.tables() {
        for pair in table.windows(2) {
            if let [Syntax::Meta(MetaBlock::Inline { file, raw }), Syntax::Scope(None)] = pair {
                *found.entry((file.as_str(), *raw)).or_insert(0) += 1;
            }
        }
    }
    found
}

/// 分析编译后的模板
pub fn analyze_template(name: &str, ast: &LeafAst) -> DiagnosticReport {
    let mut report = DiagnosticReport::new();

    for ((file, raw), references) in unfilled_inlines(ast) {
        let message = if raw {
            format!("#inline(\"{}\", as: raw) 没有可拼接的文本（{} 处引用）", file, references)
        } else {
            format!("#inline(\"{}\") 没有可拼接的模板（{} 处引用）", file, references)
        };
        let kind = DiagnosticKind::MissingInline {
            name: file.to_string(),
            raw,
            references,
        };
        report.push(Diagnostic::new(name, kind, message));
    }

    let variables: Vec<String> = ast.required_variables().iter().cloned().collect();
    if !variables.is_empty() {
        let message = format!("需要的变量: {}", variables.join(", "));
        report.push(Diagnostic::new(
            name,
            DiagnosticKind::RequiredVariables(variables),
            message,
        ));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LeafConfiguration;
    use crate::entity::LeafEntities;
    use crate::template::parse;

    fn compile(source: &str) -> Result<LeafAst, LeafError> {
        parse("page", source, &LeafEntities::core(), &LeafConfiguration::default())
    }

    #[test]
    fn test_syntax_error_carries_window() {
        let source = "Hello\n#(1 2)";
        let err = compile(source).unwrap_err();
        let diag = Diagnostic::from_error("page.leaf", &err, source);
        assert_eq!(diag.kind, DiagnosticKind::Syntax);
        assert_eq!(diag.level(), DiagnosticLevel::Error);
        assert_eq!(diag.location.map(|l| l.line), Some(2));

        let display = diag.to_string();
        assert!(display.starts_with("[ERROR] page.leaf:2:"));
        assert!(display.contains("\n  | #(1 2)"));
        assert!(display.contains('^'));
    }

    #[test]
    fn test_unresolved_inline_error_is_warning() {
        let err = LeafError::Eval(EvalError::UnresolvedInline {
            name: "footer".to_string(),
        });
        let diag = Diagnostic::from_error("page", &err, "");
        assert_eq!(diag.level(), DiagnosticLevel::Warn);
        assert!(diag.window.is_none());
        assert_eq!(diag.to_string(), format!("[WARN] page: {}", err));
    }

    #[test]
    fn test_source_window() {
        let source = "first\n  #(a b)\nlast";
        let window = render_source_window(source, SourceLocation::new(2, 3, 8), 4);
        assert_eq!(window, "  #(a b)\n  ^~~~");
        assert_eq!(render_source_window(source, SourceLocation::new(9, 1, 0), 1), "");
    }

    #[test]
    fn test_analyze_counts_inline_references() {
        let ast = compile(
            "#(title)#inline(\"header\")#if(x):#inline(\"header\")#endif#inline(\"a.css\", as: raw)",
        )
        .unwrap();
        let report = analyze_template("page", &ast);
        assert_eq!(report.count(DiagnosticLevel::Warn), 2);
        assert!(!report.has_errors());

        assert!(report.entries.iter().any(|d| d.kind
            == DiagnosticKind::MissingInline {
                name: "header".to_string(),
                raw: false,
                references: 2,
            }));
        let mut missing: Vec<&str> = report.missing_inlines().collect();
        missing.sort();
        assert_eq!(missing, ["a.css", "header"]);

        let required = report
            .entries
            .iter()
            .find_map(|d| match &d.kind {
                DiagnosticKind::RequiredVariables(vars) => Some(vars.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(required, ["title", "x"]);
        assert_eq!(report.at_least(DiagnosticLevel::Info).count(), 3);
    }

    #[test]
    fn test_extend_report() {
        let mut report = DiagnosticReport::new();
        assert!(report.is_empty());
        report.extend([Diagnostic::load_failure("a", "无法读取")]);
        assert!(report.has_errors());
        assert_eq!(report.into_iter().count(), 1);
    }
}
