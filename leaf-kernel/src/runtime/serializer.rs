//! # Serializer 模块
//!
//! 遍历 [`LeafAst`] 的作用域表，把模板渲染为字符串。
//!
//! ## 执行模型
//!
//! 用显式的游标栈代替递归。每进入一个作用域（块主体、define 主体、
//! 内联模板、raw 主体）压入一个游标和一个变量帧，作用域结束时弹出。
//! 块主体结束时询问块是否还有下一轮。
//!
//! ## 错误
//!
//! 求值错误不会中断遍历，先记录下来，遍历结束后按配置决定：
//!
//! - 严格模式下出现未定义变量时失败
//! - `errors_are_fatal` 为真时任何错误都失败，否则出错的表达式输出为空

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config::LeafConfiguration;
use crate::data::LeafData;
use crate::entity::{Bindings, CallValues, LeafBlock, OutputEncoder, ScopeValue};
use crate::error::EvalError;
use crate::template::{
    EvalContext, LeafAst, LeafTuple, LeafVariable, MetaBlock, Parameter, Syntax, binary,
};

use super::context::{LeafContext, walk_path};

/// 作用域嵌套的最大深度（防止 define 主体递归求值自身）
const MAX_SCOPE_DEPTH: usize = 256;

/// 通过 define 登记的内容
#[derive(Debug, Clone, Copy)]
enum Definition<'a> {
    Value(&'a Parameter),
    Body(usize),
}

/// 渲染期的变量帧
#[derive(Debug, Default)]
struct Frame<'a> {
    vars: HashMap<String, LeafData>,
    definitions: HashMap<&'a str, Definition<'a>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassMode {
    Once,
    Counted,
    Indefinite,
}

/// 正在执行的块
#[derive(Debug)]
struct ActivePass<'a> {
    name: &'a str,
    block: Box<dyn LeafBlock>,
    args: &'a LeafTuple,
    values: CallValues,
    bindings: Bindings,
    mode: PassMode,
    passes: usize,
}

/// 作用域游标
struct Cursor<'a> {
    table: usize,
    index: usize,
    /// 同一条链上已有环节执行过
    chain_taken: bool,
    /// 上一个节点是 `#inline`，记录其目标名
    pending_inline: Option<&'a str>,
    pass: Option<ActivePass<'a>>,
    encoder: Arc<dyn OutputEncoder>,
}

/// 变量查找：局部帧从内向外，然后是上下文
struct Lookup<'s, 'a> {
    context: &'s LeafContext,
    frames: &'s [Frame<'a>],
    strict: bool,
}

impl EvalContext for Lookup<'_, '_> {
    fn get_var(&self, variable: &LeafVariable) -> Option<LeafData> {
        match variable.scope() {
            None => {
                let local = self
                    .frames
                    .iter()
                    .rev()
                    .find_map(|frame| frame.vars.get(variable.member()));
                match local {
                    Some(value) => walk_path(value, variable.path()),
                    None => self.context.get(variable),
                }
            }
            // `self.x` 跳过局部变量
            Some(_) => self.context.get(variable),
        }
    }

    fn missing_variable(&self, variable: &LeafVariable) -> LeafData {
        if self.strict {
            EvalError::MissingVariable {
                name: variable.to_string(),
            }
            .into()
        } else {
            LeafData::Nil
        }
    }
}

/// AST 渲染器
pub struct LeafSerializer<'a> {
    ast: &'a LeafAst,
    context: &'a LeafContext,
    config: &'a LeafConfiguration,
    default_encoder: Arc<dyn OutputEncoder>,
    output: String,
    frames: Vec<Frame<'a>>,
    errors: Vec<EvalError>,
    /// 上一个行级标签独占一行，丢弃后续文本的第一行空白
    suppress_line: bool,
    /// 当前行已有表达式输出（即使输出为空）
    line_has_value: bool,
}

impl<'a> LeafSerializer<'a> {
    pub fn new(
        ast: &'a LeafAst,
        context: &'a LeafContext,
        config: &'a LeafConfiguration,
        default_encoder: Arc<dyn OutputEncoder>,
    ) -> Self {
        Self {
            ast,
            context,
            config,
            default_encoder,
            output: String::with_capacity(ast.underestimated_size()),
            frames: Vec::new(),
            errors: Vec::new(),
            suppress_line: false,
            line_has_value: false,
        }
    }

    /// 执行渲染
    pub fn serialize(mut self) -> Result<String, EvalError> {
        let ast = self.ast;
        let tables = ast.tables();
        debug!(template = %ast.name(), tables = tables.len(), "开始渲染");

        let root = self.enter(0, Arc::clone(&self.default_encoder), None);
        let mut cursors = vec![root];

        while let Some(cursor) = cursors.last_mut() {
            let Some(syntax) = tables
                .get(cursor.table)
                .and_then(|table| table.get(cursor.index))
            else {
                if let Some(finished) = cursors.pop() {
                    self.frames.pop();
                    if cursors.is_empty() {
                        break;
                    }
                    self.trim_line_tail();
                    if let Some(next) = self.next_pass(finished) {
                        cursors.push(next);
                    }
                }
                continue;
            };
            cursor.index += 1;

            match syntax {
                Syntax::Raw(text) => self.write_raw(text),
                Syntax::Expression(parameter) => {
                    let value = self.evaluate(parameter);
                    let encoder = Arc::clone(&cursor.encoder);
                    self.write_value(value, encoder.as_ref());
                }
                Syntax::Declare {
                    variable, value, ..
                } => {
                    self.trim_line_tail();
                    let value = match value {
                        Some(parameter) => self.checked(self.evaluate(parameter)),
                        None => LeafData::Nil,
                    };
                    if let Some(frame) = self.frames.last_mut() {
                        frame.vars.insert(variable.clone(), value);
                    }
                }
                Syntax::Assign {
                    variable,
                    op,
                    value,
                } => {
                    self.trim_line_tail();
                    let mut value = self.evaluate(value);
                    if let Some(base) = op.compound_base()
                        && !value.is_error()
                    {
                        let current = self.evaluate(&Parameter::variable(variable.clone()));
                        value = binary(base, &current, &value);
                    }
                    if value.is_error() {
                        self.record(value);
                    } else {
                        self.assign(variable.member(), value);
                    }
                }
                Syntax::Block {
                    name,
                    chained,
                    block,
                    args,
                } => {
                    self.trim_line_tail();
                    let Some(Syntax::Scope(Some(body))) = tables[cursor.table].get(cursor.index)
                    else {
                        continue;
                    };
                    let body = *body;
                    cursor.index += 1;

                    if *chained && cursor.chain_taken {
                        continue;
                    }
                    // 参数出错时整条链都跳过
                    cursor.chain_taken = true;
                    let values = match args.evaluate_all(&self.lookup()) {
                        Ok(values) => CallValues::new(values),
                        Err(error) => {
                            self.record(error);
                            continue;
                        }
                    };

                    let mut block = block.clone();
                    let mut bindings = Bindings::new();
                    let mode = match block.evaluate_scope(&values, &mut bindings) {
                        ScopeValue::Discard => {
                            cursor.chain_taken = false;
                            continue;
                        }
                        ScopeValue::Once => PassMode::Once,
                        ScopeValue::Repeating(_) => PassMode::Counted,
                        ScopeValue::Indefinite => PassMode::Indefinite,
                    };
                    trace!(block = %name, ?mode, "进入块");

                    let encoder = Arc::clone(&cursor.encoder);
                    let pass = ActivePass {
                        name,
                        block,
                        args,
                        values,
                        bindings,
                        mode,
                        passes: 0,
                    };
                    let next = self.enter(body, encoder, Some(pass));
                    cursors.push(next);
                }
                Syntax::Meta(MetaBlock::Define { name, value }) => {
                    self.trim_line_tail();
                    let definition = match value {
                        Some(parameter) => Definition::Value(parameter),
                        None => {
                            let Some(Syntax::Scope(Some(body))) =
                                tables[cursor.table].get(cursor.index)
                            else {
                                continue;
                            };
                            cursor.index += 1;
                            Definition::Body(*body)
                        }
                    };
                    if let Some(frame) = self.frames.last_mut() {
                        frame.definitions.insert(name.as_str(), definition);
                    }
                }
                Syntax::Meta(MetaBlock::Evaluate { name, default }) => {
                    let encoder = Arc::clone(&cursor.encoder);
                    match self.definition(name) {
                        Some(Definition::Value(parameter)) => {
                            let value = self.evaluate(parameter);
                            self.write_value(value, encoder.as_ref());
                        }
                        Some(Definition::Body(body)) => {
                            if cursors.len() >= MAX_SCOPE_DEPTH {
                                self.errors.push(EvalError::PassLimitExceeded {
                                    name: name.clone(),
                                    limit: MAX_SCOPE_DEPTH,
                                });
                                continue;
                            }
                            let next = self.enter(body, encoder, None);
                            cursors.push(next);
                        }
                        None => {
                            let value = match default {
                                Some(parameter) => self.evaluate(parameter),
                                None => LeafData::Nil,
                            };
                            self.write_value(value, encoder.as_ref());
                        }
                    }
                }
                Syntax::Meta(MetaBlock::Inline { file, .. }) => {
                    self.trim_line_tail();
                    cursor.pending_inline = Some(file.as_str());
                }
                Syntax::Meta(MetaBlock::RawSwitch { encoder, .. }) => {
                    self.trim_line_tail();
                    let Some(Syntax::Scope(Some(body))) = tables[cursor.table].get(cursor.index)
                    else {
                        continue;
                    };
                    let body = *body;
                    cursor.index += 1;
                    let next = self.enter(body, Arc::clone(encoder), None);
                    cursors.push(next);
                }
                Syntax::Scope(Some(body)) => {
                    cursor.pending_inline = None;
                    let encoder = Arc::clone(&cursor.encoder);
                    let next = self.enter(*body, encoder, None);
                    cursors.push(next);
                }
                Syntax::Scope(None) => {
                    let name = cursor.pending_inline.take().unwrap_or_default();
                    self.errors.push(EvalError::UnresolvedInline {
                        name: name.to_string(),
                    });
                }
            }
        }

        self.finish()
    }

    fn lookup(&self) -> Lookup<'_, 'a> {
        Lookup {
            context: self.context,
            frames: &self.frames,
            strict: self.config.missing_variable_throws,
        }
    }

    fn evaluate(&self, parameter: &Parameter) -> LeafData {
        parameter.evaluate(&self.lookup())
    }

    /// 出错时记录错误并返回 nil
    fn checked(&mut self, value: LeafData) -> LeafData {
        if value.is_error() {
            self.record(value);
            LeafData::Nil
        } else {
            value
        }
    }

    fn record(&mut self, value: LeafData) {
        if let LeafData::Error(error) = value {
            debug!(error = %error, "记录求值错误");
            self.errors.push(error);
        }
    }

    /// 压入新的游标与变量帧
    fn enter(
        &mut self,
        table: usize,
        encoder: Arc<dyn OutputEncoder>,
        pass: Option<ActivePass<'a>>,
    ) -> Cursor<'a> {
        let mut frame = Frame::default();
        if let Some(pass) = &pass {
            frame
                .vars
                .extend(pass.bindings.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        self.frames.push(frame);
        Cursor {
            table,
            index: 0,
            chain_taken: false,
            pending_inline: None,
            pass,
            encoder,
        }
    }

    /// 块主体结束后决定是否再执行一轮
    fn next_pass(&mut self, finished: Cursor<'a>) -> Option<Cursor<'a>> {
        let mut pass = finished.pass?;
        pass.passes += 1;

        let scope = match pass.mode {
            PassMode::Once => return None,
            PassMode::Counted => pass.block.re_evaluate_scope(&pass.values, &mut pass.bindings),
            PassMode::Indefinite => {
                if pass.passes >= self.config.max_loop_passes {
                    warn!(block = %pass.name, limit = self.config.max_loop_passes, "超过最大执行次数");
                    self.errors.push(EvalError::PassLimitExceeded {
                        name: pass.name.to_string(),
                        limit: self.config.max_loop_passes,
                    });
                    return None;
                }
                pass.values = match pass.args.evaluate_all(&self.lookup()) {
                    Ok(values) => CallValues::new(values),
                    Err(error) => {
                        self.record(error);
                        return None;
                    }
                };
                pass.block.re_evaluate_scope(&pass.values, &mut pass.bindings)
            }
        };

        match scope {
            ScopeValue::Discard => None,
            _ => Some(self.enter(finished.table, finished.encoder, Some(pass))),
        }
    }

    /// 把值写入最内层声明了该变量的帧
    fn assign(&mut self, variable: &str, value: LeafData) {
        if let Some(slot) = self
            .frames
            .iter_mut()
            .rev()
            .find_map(|frame| frame.vars.get_mut(variable))
        {
            *slot = value;
        } else if let Some(frame) = self.frames.last_mut() {
            frame.vars.insert(variable.to_string(), value);
        }
    }

    fn definition(&self, name: &str) -> Option<Definition<'a>> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.definitions.get(name).copied())
    }

    // ========== 输出 ==========

    fn write_raw(&mut self, text: &str) {
        let mut text = text;
        if self.suppress_line {
            self.suppress_line = false;
            if let Some(end) = text.find('\n')
                && is_blank(&text[..end])
            {
                text = &text[end + 1..];
            }
        }
        if text.contains('\n') {
            self.line_has_value = false;
        }
        self.output.push_str(text);
    }

    fn write_value(&mut self, value: LeafData, encoder: &dyn OutputEncoder) {
        self.line_has_value = true;
        self.suppress_line = false;
        if value.is_error() {
            self.record(value);
            return;
        }
        let text = self.config.formatters.format(&value);
        encoder.encode(&text, &mut self.output);
    }

    /// 行级标签前只有空白时，删掉这段空白并丢弃标签后的换行
    fn trim_line_tail(&mut self) {
        if !self.config.trim_block_lines || self.line_has_value {
            return;
        }
        let start = self.output.rfind('\n').map_or(0, |i| i + 1);
        if is_blank(&self.output[start..]) {
            self.output.truncate(start);
            self.suppress_line = true;
        }
    }

    fn finish(self) -> Result<String, EvalError> {
        if self.config.missing_variable_throws
            && let Some(missing) = self
                .errors
                .iter()
                .find(|e| matches!(e, EvalError::MissingVariable { .. }))
        {
            return Err(missing.clone());
        }
        if let Some(first) = self.errors.first() {
            if self.config.errors_are_fatal {
                return Err(first.clone());
            }
            warn!(
                template = %self.ast.name(),
                count = self.errors.len(),
                first = %first,
                "渲染时出现求值错误，已按空值输出"
            );
        }
        debug!(template = %self.ast.name(), bytes = self.output.len(), "渲染完成");
        Ok(self.output)
    }
}

/// 行内空白；`\r` 视为 CRLF 换行的一部分
fn is_blank(text: &str) -> bool {
    text.chars().all(|c| matches!(c, ' ' | '\t' | '\r'))
}

/// 渲染一个 AST
pub fn serialize(
    ast: &LeafAst,
    context: &LeafContext,
    config: &LeafConfiguration,
    default_encoder: Arc<dyn OutputEncoder>,
) -> Result<String, EvalError> {
    LeafSerializer::new(ast, context, config, default_encoder).serialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{HtmlEncoder, IdentityEncoder, LeafEntities};
    use crate::template::parse;

    fn render_with(source: &str, context: &LeafContext, config: &LeafConfiguration) -> Result<String, EvalError> {
        let ast = parse("test", source, &LeafEntities::core(), config).unwrap();
        serialize(&ast, context, config, Arc::new(IdentityEncoder))
    }

    fn render(source: &str, context: &LeafContext) -> String {
        render_with(source, context, &LeafConfiguration::default()).unwrap()
    }

    #[test]
    fn test_raw_and_expressions() {
        let context = LeafContext::new().with_var("name", "Leaf");
        assert_eq!(render("Hello, #(name)!", &context), "Hello, Leaf!");
        assert_eq!(render("#(1 + 2)", &context), "3");
        assert_eq!(render("#(missing)", &context), "");
    }

    #[test]
    fn test_strict_missing_variable() {
        let config = LeafConfiguration::strict();
        let err = render_with("#(missing)", &LeafContext::new(), &config).unwrap_err();
        assert_eq!(
            err,
            EvalError::MissingVariable {
                name: "missing".to_string()
            }
        );
        // 空值合并吸收错误
        let output = render_with("#(missing ?? \"x\")", &LeafContext::new(), &config).unwrap();
        assert_eq!(output, "x");
    }

    #[test]
    fn test_conditional_chain_takes_first_branch() {
        let source = "#if(a):A#elseif(b):B#else:C#endif";
        let both = LeafContext::new().with_var("a", true).with_var("b", true);
        assert_eq!(render(source, &both), "A");
        let second = LeafContext::new().with_var("a", false).with_var("b", true);
        assert_eq!(render(source, &second), "B");
        assert_eq!(render(source, &LeafContext::new()), "C");
    }

    #[test]
    fn test_for_loop_bindings() {
        let context = LeafContext::new().with_var("names", vec!["a", "b", "c"]);
        let output = render(
            "#for(name in names):#(index)=#(name)#if(!isLast):,#endif#endfor",
            &context,
        );
        assert_eq!(output, "0=a,1=b,2=c");
    }

    #[test]
    fn test_declare_and_assign_in_loop() {
        let context = LeafContext::new().with_var("xs", vec![1, 2, 3]);
        let output = render("#(var sum = 0)#for(x in xs):#(sum += x)#endfor#(sum)", &context);
        assert_eq!(output, "6");
    }

    #[test]
    fn test_while_loop_and_pass_limit() {
        let output = render("#(var i = 0)#while(i < 3):#(i)#(i += 1)#endwhile", &LeafContext::new());
        assert_eq!(output, "012");

        let config = LeafConfiguration {
            max_loop_passes: 5,
            ..LeafConfiguration::default()
        };
        let err = render_with("#while(true):x#endwhile", &LeafContext::new(), &config).unwrap_err();
        assert_eq!(
            err,
            EvalError::PassLimitExceeded {
                name: "while".to_string(),
                limit: 5
            }
        );
    }

    #[test]
    fn test_define_and_evaluate() {
        let output = render(
            "#define(title = \"Welcome\")#evaluate(title)|#evaluate(other ?? \"Fallback\")",
            &LeafContext::new(),
        );
        assert_eq!(output, "Welcome|Fallback");

        let context = LeafContext::new().with_var("who", "you");
        let output = render("#define(greet):hi #(who)#enddefine[#evaluate(greet)]", &context);
        assert_eq!(output, "[hi you]");
    }

    #[test]
    fn test_raw_switch_changes_encoder() {
        let context = LeafContext::new().with_var("text", "<b>");
        let output = render("#(text)#raw(html):#(text)#endraw#(text)", &context);
        assert_eq!(output, "<b>&lt;b&gt;<b>");

        let ast = parse("t", "#(text)", &LeafEntities::core(), &LeafConfiguration::default()).unwrap();
        let output =
            serialize(&ast, &context, &LeafConfiguration::default(), Arc::new(HtmlEncoder)).unwrap();
        assert_eq!(output, "&lt;b&gt;");
    }

    #[test]
    fn test_unresolved_inline() {
        let err = render_with("#inline(\"part\")", &LeafContext::new(), &LeafConfiguration::default())
            .unwrap_err();
        assert_eq!(
            err,
            EvalError::UnresolvedInline {
                name: "part".to_string()
            }
        );
    }

    #[test]
    fn test_non_fatal_errors_render_empty() {
        let config = LeafConfiguration {
            errors_are_fatal: false,
            ..LeafConfiguration::default()
        };
        let context = LeafContext::new().with_var("zero", 0);
        let output = render_with("a#(1 / zero)b", &context, &config).unwrap();
        assert_eq!(output, "ab");

        let err = render_with("a#(1 / zero)b", &context, &LeafConfiguration::default()).unwrap_err();
        assert!(matches!(err, EvalError::TypeMismatch { .. }));
    }

    #[test]
    fn test_block_lines_trimmed() {
        let context = LeafContext::new().with_var("xs", vec!["a", "b"]);
        let source = "<ul>\n  #for(x in xs):\n  <li>#(x)</li>\n  #endfor\n</ul>\n";
        assert_eq!(render(source, &context), "<ul>\n  <li>a</li>\n  <li>b</li>\n</ul>\n");

        let config = LeafConfiguration {
            trim_block_lines: false,
            ..LeafConfiguration::default()
        };
        let output = render_with("#if(true):\nx\n#endif\n", &context, &config).unwrap();
        assert_eq!(output, "\nx\n\n");
    }

    #[test]
    fn test_block_lines_trimmed_with_crlf() {
        let context = LeafContext::new().with_var("xs", vec!["a", "b"]);
        let source = "<ul>\r\n  #for(x in xs):\r\n  <li>#(x)</li>\r\n  #endfor\r\n</ul>\r\n";
        assert_eq!(
            render(source, &context),
            "<ul>\r\n  <li>a</li>\r\n  <li>b</li>\r\n</ul>\r\n"
        );
    }

    #[test]
    fn test_line_with_empty_expression_not_trimmed() {
        let context = LeafContext::new().with_var("empty", "");
        let output = render("  #(empty)#if(true):\nx\n#endif\n", &context);
        assert_eq!(output, "  \nx\n");

        // 没有表达式时整行属于标签
        assert_eq!(render("  #if(true):\nx\n#endif\n", &context), "x\n");
    }
}
