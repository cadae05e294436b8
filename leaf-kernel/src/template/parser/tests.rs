use std::sync::Arc;

use super::*;
use crate::data::LeafDataType;
use crate::entity::{CallParameter, CallSignature, CallValues, LeafFunction};
use crate::error::LeafError;
use crate::template::parse;

/// 把字符串转为小写的测试函数
struct Lowercased {
    signature: CallSignature,
}

impl Lowercased {
    fn new() -> Self {
        Self {
            signature: CallSignature::new(vec![CallParameter::typed(&[LeafDataType::String])]),
        }
    }
}

impl LeafFunction for Lowercased {
    fn signature(&self) -> &CallSignature {
        &self.signature
    }

    fn evaluate(&self, args: &CallValues) -> LeafData {
        LeafData::from(args[0].as_str().unwrap_or_default().to_lowercase())
    }
}

/// 接受任意一个参数的测试函数
struct Describe;

impl LeafFunction for Describe {
    fn signature(&self) -> &CallSignature {
        static SIGNATURE: std::sync::OnceLock<CallSignature> = std::sync::OnceLock::new();
        SIGNATURE.get_or_init(|| CallSignature::new(vec![CallParameter::any()]))
    }

    fn evaluate(&self, args: &CallValues) -> LeafData {
        LeafData::from(args[0].type_name())
    }
}

fn entities() -> LeafEntities {
    let mut entities = LeafEntities::core();
    entities.register_function("lowercased", Arc::new(Lowercased::new()));
    entities.register_method("lowercased", Arc::new(Lowercased::new()));
    entities.register_function("describe", Arc::new(Describe));
    entities
}

fn try_parse(source: &str) -> Result<LeafAst, LeafError> {
    parse("test", source, &entities(), &LeafConfiguration::default())
}

fn parse_ok(source: &str) -> LeafAst {
    try_parse(source).unwrap()
}

fn parse_err(source: &str) -> ParseError {
    match try_parse(source) {
        Err(LeafError::Parse(e)) => e,
        other => panic!("期望解析错误，得到 {:?}", other.map(|ast| ast.to_string())),
    }
}

/// 入口表中唯一的表达式
fn only_expression(ast: &LeafAst) -> &Parameter {
    let expressions: Vec<&Parameter> = ast.tables()[0]
        .iter()
        .filter_map(|syntax| match syntax {
            Syntax::Expression(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(expressions.len(), 1);
    expressions[0]
}

#[test]
fn test_raw_text_merged() {
    let ast = parse_ok("a\\#b:c");
    assert_eq!(ast.tables()[0].len(), 1);
    assert!(matches!(&ast.tables()[0][0], Syntax::Raw(text) if text == "a#b:c"));
}

#[test]
fn test_constant_arithmetic_folded() {
    let ast = parse_ok("#(-5 + 10 - 20 / 2 + 9 * -3 == 90 / 3 + 2 * -10)");
    assert_eq!(only_expression(&ast).as_value(), Some(&LeafData::Bool(false)));

    let ast = parse_ok("#(1 + 2 * 3)");
    assert_eq!(only_expression(&ast).as_value(), Some(&LeafData::Int(7)));
}

#[test]
fn test_variable_expression_kept() {
    let ast = parse_ok("#(a ? b : c ?? \"d\")");
    assert_eq!(only_expression(&ast).to_string(), "(a ? b : (c ?? \"d\"))");
    let required: Vec<&str> = ast.required_variables().iter().map(String::as_str).collect();
    assert_eq!(required, ["a", "b", "c"]);
}

#[test]
fn test_scoped_and_member_variables() {
    let ast = parse_ok("#(user.name) #(self.title) #($app.version)");
    let required: Vec<&str> = ast.required_variables().iter().map(String::as_str).collect();
    assert_eq!(required, ["$app.version", "title", "user"]);
}

#[test]
fn test_collection_literals() {
    let ast = parse_ok("#([\"a\": 1, b: 2])");
    let LeafData::Dictionary(map) = only_expression(&ast).as_value().unwrap() else {
        panic!("期望字典");
    };
    assert_eq!(map.get("a"), Some(&LeafData::Int(1)));
    assert_eq!(map.get("b"), Some(&LeafData::Int(2)));

    let ast = parse_ok("#([:])");
    assert_eq!(
        only_expression(&ast).as_value(),
        Some(&LeafData::Dictionary(Default::default()))
    );

    let ast = parse_ok("#([1, 2][1])");
    assert_eq!(only_expression(&ast).as_value(), Some(&LeafData::Int(2)));

    let err = parse_err("#([1, a: 2])");
    assert!(matches!(err, ParseError::MalformedExpression { .. }));
}

#[test]
fn test_function_and_method_calls() {
    let ast = parse_ok("#(lowercased(\"ABC\"))");
    assert_eq!(only_expression(&ast).as_value(), Some(&LeafData::from("abc")));

    let ast = parse_ok("#(name.lowercased())");
    let expression = only_expression(&ast);
    assert!(matches!(expression.kind(), ParameterKind::Function(call) if call.method));
    assert_eq!(expression.to_string(), "name.lowercased()");
    assert!(ast.required_variables().contains("name"));

    let err = parse_err("#(missing(1))");
    assert!(matches!(err, ParseError::InvalidSignature { ref name, .. } if name == "missing"));

    let err = parse_err("#(lowercased(1))");
    assert!(matches!(err, ParseError::InvalidSignature { .. }));
}

#[test]
fn test_overload_resolution() {
    let mut entities = entities();
    entities.register_function("describe", Arc::new(Describe));
    let config = LeafConfiguration::default();

    let err = parse("t", "#(describe(1))", &entities, &config).unwrap_err();
    assert!(matches!(
        err,
        LeafError::Parse(ParseError::AmbiguousOverload { candidates: 2, .. })
    ));

    let ast = parse("t", "#(describe(x))", &entities, &config).unwrap();
    assert!(matches!(only_expression(&ast).kind(), ParameterKind::Dynamic(_)));
}

#[test]
fn test_named_tag_with_params_is_function() {
    let ast = parse_ok("#lowercased(\"X\")");
    assert_eq!(only_expression(&ast).as_value(), Some(&LeafData::from("x")));
}

#[test]
fn test_for_retries_with_parse_signature() {
    let ast = parse_ok("#for(name in names):#(name)#endfor");
    assert!(matches!(&ast.tables()[0][0], Syntax::Block { name, .. } if name == "for"));
    assert!(matches!(ast.tables()[0][1], Syntax::Scope(Some(1))));
    // 循环变量是局部的
    let required: Vec<&str> = ast.required_variables().iter().map(String::as_str).collect();
    assert_eq!(required, ["names"]);

    let ast = parse_ok("#for(key, value in pairs):#(key)#(index)#endfor");
    assert_eq!(ast.required_variables().len(), 1);
}

#[test]
fn test_retry_failure_reports_strict_error() {
    let err = parse_err("#for(x y z w):#endfor");
    assert!(matches!(err, ParseError::MalformedExpression { ref name, .. } if name == "for"));
}

#[test]
fn test_conditional_chain() {
    let ast = parse_ok("#if(a):1#elseif(b):2#else:3#endif");
    let blocks: Vec<(&str, bool)> = ast.tables()[0]
        .iter()
        .filter_map(|syntax| match syntax {
            Syntax::Block { name, chained, .. } => Some((name.as_str(), *chained)),
            _ => None,
        })
        .collect();
    assert_eq!(blocks, [("if", false), ("elseif", true), ("else", true)]);
    assert_eq!(ast.tables().len(), 4);
}

#[test]
fn test_chain_requires_predecessor() {
    let err = parse_err("#else:x#endif");
    assert!(matches!(err, ParseError::UnmatchedBlock { ref name, .. } if name == "else"));

    let err = parse_err("#if(a):#else:#else:#endif");
    assert!(matches!(err, ParseError::UnmatchedBlock { .. }));
}

#[test]
fn test_end_tags() {
    let err = parse_err("#if(a):x#endfor");
    assert!(matches!(err, ParseError::UnmatchedBlock { ref name, .. } if name == "endfor"));

    // 未知的结束标签是普通文本
    let ast = parse_ok("#endfoo");
    assert!(matches!(&ast.tables()[0][0], Syntax::Raw(text) if text == "#endfoo"));
}

#[test]
fn test_unclosed_blocks_listed() {
    let err = parse_err("#if(a):#for(x in xs):");
    let ParseError::UnclosedBlocks { names, location } = err else {
        panic!("期望 UnclosedBlocks");
    };
    assert_eq!(names, ["if", "for"]);
    assert_eq!(location.column, 1);
}

#[test]
fn test_bare_block_name_is_raw() {
    let ast = parse_ok("#if and #else");
    assert!(matches!(&ast.tables()[0][0], Syntax::Raw(text) if text == "#if and #else"));

    let err = parse_err("#if(a) no colon");
    assert!(matches!(err, ParseError::MalformedExpression { .. }));
}

#[test]
fn test_declarations_and_assignment() {
    let ast = parse_ok("#(var x = 1)#(x += 2)#(x)");
    assert!(ast.required_variables().is_empty());
    assert!(matches!(&ast.tables()[0][0], Syntax::Declare { variable, constant: false, value: Some(_) } if variable == "x"));
    assert!(matches!(&ast.tables()[0][1], Syntax::Assign { op: LeafOperator::CompoundPlus, .. }));

    let ast = parse_ok("#(var y)#(y = \"set\")#(y)");
    assert!(ast.required_variables().is_empty());
}

#[test]
fn test_invalid_variable_use() {
    let cases = [
        "#(let y = 1)#(y = 2)",
        "#(var z)#(z)",
        "#(var z)#(z += 1)",
        "#(undeclared = 1)",
        "#(var a = 1)#(var a = 2)",
        "#(let c)",
    ];
    for source in cases {
        let err = parse_err(source);
        assert!(
            matches!(err, ParseError::InvalidVariableUse { .. }),
            "{} => {:?}",
            source,
            err
        );
    }

    // 内层作用域可以遮蔽外层声明
    parse_ok("#(var a = 1)#if(true):#(var a = 2)#endif");
    // 循环变量是常量
    let err = parse_err("#for(x in xs):#(x = 1)#endfor");
    assert!(matches!(err, ParseError::InvalidVariableUse { .. }));
}

#[test]
fn test_assignment_only_at_top_level() {
    let err = parse_err("#(var x = 1)#((x = 2))");
    assert!(matches!(err, ParseError::MalformedExpression { .. }));
}

#[test]
fn test_define_and_evaluate() {
    let ast = parse_ok("#define(title = \"Welcome\")#evaluate(title ?? \"x\")");
    assert!(matches!(
        &ast.tables()[0][0],
        Syntax::Meta(MetaBlock::Define { name, value: Some(_) }) if name == "title"
    ));
    assert!(matches!(
        &ast.tables()[0][1],
        Syntax::Meta(MetaBlock::Evaluate { name, default: Some(_) }) if name == "title"
    ));

    let ast = parse_ok("#define(body):<p>#(text)</p>#enddefine#evaluate(body)");
    assert!(matches!(&ast.tables()[0][1], Syntax::Scope(Some(1))));
    assert!(ast.required_variables().contains("text"));

    let err = parse_err("#evaluate(1 + a)");
    assert!(matches!(err, ParseError::MalformedExpression { .. }));
}

#[test]
fn test_inline_references() {
    let ast = parse_ok("#inline(\"header\")#inline(\"a.css\", as: raw)");
    assert!(matches!(ast.tables()[0][1], Syntax::Scope(None)));
    assert!(ast.required_templates().contains("header"));
    assert!(ast.required_raws().contains("a.css"));

    let err = parse_err("#inline(\"x\", as: html)");
    assert!(matches!(err, ParseError::InvalidSignature { .. }));
}

#[test]
fn test_raw_switch() {
    let ast = parse_ok("#raw(html):#(text)#endraw");
    assert!(matches!(
        &ast.tables()[0][0],
        Syntax::Meta(MetaBlock::RawSwitch { handler, .. }) if handler == "html"
    ));

    let err = parse_err("#raw(markdown):x#endraw");
    assert!(matches!(err, ParseError::InvalidSignature { ref name, .. } if name == "raw"));
}

#[test]
fn test_constant_evaluation_error_is_parse_error() {
    let err = parse_err("#(1 / 0)");
    assert!(matches!(err, ParseError::MalformedExpression { .. }));
}

#[test]
fn test_tuple_errors() {
    for source in ["#(1, 2)", "#((1, 2))", "#(f(1,))", "#(a.)", "#($app)", "#(1"] {
        assert!(try_parse(source).is_err(), "{}", source);
    }
}
