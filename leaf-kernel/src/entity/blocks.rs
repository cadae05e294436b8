//! # Blocks 模块
//!
//! 核心控制流块：条件链、`for` 循环与 `while` 循环。

use crate::data::LeafData;
use crate::template::{LeafKeyword, LeafTuple};

use super::{
    BlockArguments, BlockFactory, BlockInstance, Bindings, CallParameter, CallSignature,
    CallValues, LeafBlock, ParseSignature, ParseSlot, ScopeValue, normalize_call,
};

/// 条件链中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConditionalKind {
    /// `if`
    Head,
    /// `elseif`
    Successor,
    /// `else`
    Terminal,
}

const CONDITIONAL_PREDECESSORS: &[&str] = &["if", "elseif"];

/// 条件链工厂
pub struct ConditionalFactory {
    kind: ConditionalKind,
    signature: CallSignature,
}

impl ConditionalFactory {
    fn with_kind(kind: ConditionalKind) -> Self {
        let signature = match kind {
            ConditionalKind::Terminal => CallSignature::empty(),
            _ => CallSignature::new(vec![CallParameter::any()]),
        };
        Self { kind, signature }
    }

    /// `if(condition):`
    pub fn head() -> Self {
        Self::with_kind(ConditionalKind::Head)
    }

    /// `elseif(condition):`
    pub fn successor() -> Self {
        Self::with_kind(ConditionalKind::Successor)
    }

    /// `else:`
    pub fn terminal() -> Self {
        Self::with_kind(ConditionalKind::Terminal)
    }
}

impl BlockFactory for ConditionalFactory {
    fn call_signature(&self) -> &CallSignature {
        &self.signature
    }

    fn chains_to(&self) -> &[&'static str] {
        match self.kind {
            ConditionalKind::Head => &[],
            _ => CONDITIONAL_PREDECESSORS,
        }
    }

    fn instantiate(&self, args: BlockArguments) -> Result<BlockInstance, String> {
        let BlockArguments::Call(tuple) = args else {
            return Err("条件块不接受自定义语法".to_string());
        };
        Ok(BlockInstance {
            block: Box::new(ConditionalBlock { kind: self.kind }),
            args: normalize_call(&self.signature, tuple)?,
            declares: Vec::new(),
        })
    }
}

/// 条件块
///
/// 条件为真时执行一次；`else` 只要被走到就执行。
#[derive(Debug, Clone)]
pub struct ConditionalBlock {
    kind: ConditionalKind,
}

impl LeafBlock for ConditionalBlock {
    fn evaluate_scope(&mut self, args: &CallValues, _bindings: &mut Bindings) -> ScopeValue {
        let taken = match self.kind {
            ConditionalKind::Terminal => true,
            _ => args.get(0).is_some_and(LeafData::is_truthy),
        };
        if taken {
            ScopeValue::Once
        } else {
            ScopeValue::Discard
        }
    }

    fn boxed_clone(&self) -> Box<dyn LeafBlock> {
        Box::new(self.clone())
    }

    fn format_parameters(&self, args: &LeafTuple) -> String {
        match self.kind {
            ConditionalKind::Terminal => String::new(),
            _ => args.to_string(),
        }
    }
}

/// `for` 循环工厂
///
/// 支持 `for(item in collection)` 与 `for(key, item in collection)`。
pub struct ForFactory {
    signature: CallSignature,
    parse_signatures: Vec<ParseSignature>,
}

impl ForFactory {
    pub fn new() -> Self {
        let item = vec![ParseSlot::Declare, ParseSlot::Keyword(LeafKeyword::In), ParseSlot::Expression];
        Self {
            signature: CallSignature::new(vec![CallParameter::any()]),
            parse_signatures: vec![
                ParseSignature::new("item", vec![item.clone()]),
                ParseSignature::new("keyed", vec![vec![ParseSlot::Declare], item]),
            ],
        }
    }
}

impl Default for ForFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// 循环拥有的变量名
pub const LOOP_INDEX: &str = "index";
pub const LOOP_IS_FIRST: &str = "isFirst";
pub const LOOP_IS_LAST: &str = "isLast";

impl BlockFactory for ForFactory {
    fn call_signature(&self) -> &CallSignature {
        &self.signature
    }

    fn parse_signatures(&self) -> &[ParseSignature] {
        &self.parse_signatures
    }

    fn instantiate(&self, args: BlockArguments) -> Result<BlockInstance, String> {
        let BlockArguments::Parsed(parsed) = args else {
            return Err("需要 `item in collection` 形式的参数".to_string());
        };
        let (key, item) = match parsed.declared.as_slice() {
            [item] => (None, item.clone()),
            [key, item] => (Some(key.clone()), item.clone()),
            _ => return Err("循环变量数量无效".to_string()),
        };
        if key.as_ref() == Some(&item) {
            return Err(format!("循环变量 '{}' 重复", item));
        }
        let mut tuple = LeafTuple::new();
        for expression in parsed.expressions {
            tuple.push(expression, None)?;
        }

        let mut declares: Vec<String> = key.iter().cloned().collect();
        declares.push(item.clone());
        declares.extend([LOOP_INDEX, LOOP_IS_FIRST, LOOP_IS_LAST].map(String::from));

        Ok(BlockInstance {
            block: Box::new(ForBlock {
                key,
                item,
                entries: Vec::new(),
                position: 0,
            }),
            args: tuple,
            declares,
        })
    }
}

/// `for` 循环
#[derive(Debug, Clone)]
pub struct ForBlock {
    key: Option<String>,
    item: String,
    entries: Vec<(LeafData, LeafData)>,
    position: usize,
}

impl ForBlock {
    fn bind(&self, bindings: &mut Bindings) {
        let (key, value) = &self.entries[self.position];
        bindings.insert(self.item.clone(), value.clone());
        if let Some(name) = &self.key {
            bindings.insert(name.clone(), key.clone());
        }
        bindings.insert(LOOP_INDEX.to_string(), LeafData::from(self.position));
        bindings.insert(LOOP_IS_FIRST.to_string(), LeafData::Bool(self.position == 0));
        bindings.insert(
            LOOP_IS_LAST.to_string(),
            LeafData::Bool(self.position + 1 == self.entries.len()),
        );
    }
}

impl LeafBlock for ForBlock {
    fn evaluate_scope(&mut self, args: &CallValues, bindings: &mut Bindings) -> ScopeValue {
        self.entries = match args.get(0) {
            Some(LeafData::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| (LeafData::from(i), item.clone()))
                .collect(),
            Some(LeafData::Dictionary(map)) => map
                .iter()
                .map(|(k, v)| (LeafData::from(k.as_str()), v.clone()))
                .collect(),
            _ => Vec::new(),
        };
        self.position = 0;
        if self.entries.is_empty() {
            return ScopeValue::Discard;
        }
        self.bind(bindings);
        ScopeValue::Repeating(self.entries.len())
    }

    fn re_evaluate_scope(&mut self, _args: &CallValues, bindings: &mut Bindings) -> ScopeValue {
        self.position += 1;
        if self.position >= self.entries.len() {
            return ScopeValue::Discard;
        }
        self.bind(bindings);
        ScopeValue::Repeating(self.entries.len() - self.position)
    }

    fn boxed_clone(&self) -> Box<dyn LeafBlock> {
        Box::new(self.clone())
    }

    fn format_parameters(&self, args: &LeafTuple) -> String {
        let collection = args
            .get(0)
            .map(ToString::to_string)
            .unwrap_or_default();
        match &self.key {
            Some(key) => format!("({}, {} in {})", key, self.item, collection),
            None => format!("({} in {})", self.item, collection),
        }
    }
}

/// `while` 循环工厂
pub struct WhileFactory {
    signature: CallSignature,
}

impl WhileFactory {
    pub fn new() -> Self {
        Self {
            signature: CallSignature::new(vec![CallParameter::any()]),
        }
    }
}

impl Default for WhileFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockFactory for WhileFactory {
    fn call_signature(&self) -> &CallSignature {
        &self.signature
    }

    fn instantiate(&self, args: BlockArguments) -> Result<BlockInstance, String> {
        let BlockArguments::Call(tuple) = args else {
            return Err("while 不接受自定义语法".to_string());
        };
        Ok(BlockInstance {
            block: Box::new(WhileBlock),
            args: normalize_call(&self.signature, tuple)?,
            declares: Vec::new(),
        })
    }
}

/// `while` 循环，每一轮之前重新对条件求值
#[derive(Debug, Clone)]
pub struct WhileBlock;

impl WhileBlock {
    fn check(args: &CallValues) -> ScopeValue {
        if args.get(0).is_some_and(LeafData::is_truthy) {
            ScopeValue::Indefinite
        } else {
            ScopeValue::Discard
        }
    }
}

impl LeafBlock for WhileBlock {
    fn evaluate_scope(&mut self, args: &CallValues, _bindings: &mut Bindings) -> ScopeValue {
        Self::check(args)
    }

    fn re_evaluate_scope(&mut self, args: &CallValues, _bindings: &mut Bindings) -> ScopeValue {
        Self::check(args)
    }

    fn boxed_clone(&self) -> Box<dyn LeafBlock> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ParsedArguments;
    use crate::template::{LeafVariable, Parameter};

    fn parsed(declared: &[&str]) -> BlockArguments {
        BlockArguments::Parsed(ParsedArguments {
            signature: "item",
            declared: declared.iter().map(|s| s.to_string()).collect(),
            expressions: vec![Parameter::variable(LeafVariable::new("names"))],
        })
    }

    #[test]
    fn test_conditional_chain_shapes() {
        assert!(ConditionalFactory::head().chains_to().is_empty());
        assert_eq!(ConditionalFactory::successor().chains_to(), &["if", "elseif"]);

        let mut bindings = Bindings::new();
        let instance = ConditionalFactory::terminal()
            .instantiate(BlockArguments::Call(LeafTuple::new()))
            .unwrap();
        let mut block = instance.block;
        assert_eq!(
            block.evaluate_scope(&CallValues::default(), &mut bindings),
            ScopeValue::Once
        );

        let mut head = ConditionalBlock {
            kind: ConditionalKind::Head,
        };
        let values = CallValues::new(vec![LeafData::from(0)]);
        assert_eq!(head.evaluate_scope(&values, &mut bindings), ScopeValue::Discard);
    }

    #[test]
    fn test_for_binds_loop_variables() {
        let instance = ForFactory::new().instantiate(parsed(&["name"])).unwrap();
        assert_eq!(instance.declares, ["name", "index", "isFirst", "isLast"]);

        let mut block = instance.block;
        let mut bindings = Bindings::new();
        let values = CallValues::new(vec![LeafData::from(vec!["tanner", "ziz", "vapor"])]);

        assert_eq!(
            block.evaluate_scope(&values, &mut bindings),
            ScopeValue::Repeating(3)
        );
        assert_eq!(bindings["name"], LeafData::from("tanner"));
        assert_eq!(bindings["isFirst"], LeafData::Bool(true));
        assert_eq!(bindings["isLast"], LeafData::Bool(false));

        block.re_evaluate_scope(&values, &mut bindings);
        assert_eq!(block.re_evaluate_scope(&values, &mut bindings), ScopeValue::Repeating(1));
        assert_eq!(bindings["name"], LeafData::from("vapor"));
        assert_eq!(bindings["index"], LeafData::Int(2));
        assert_eq!(bindings["isFirst"], LeafData::Bool(false));
        assert_eq!(bindings["isLast"], LeafData::Bool(true));

        assert_eq!(block.re_evaluate_scope(&values, &mut bindings), ScopeValue::Discard);
    }

    #[test]
    fn test_for_discards_empty_or_scalar() {
        let mut block = ForFactory::new().instantiate(parsed(&["x"])).unwrap().block;
        let mut bindings = Bindings::new();
        let empty = CallValues::new(vec![LeafData::Array(vec![])]);
        assert_eq!(block.evaluate_scope(&empty, &mut bindings), ScopeValue::Discard);
        let scalar = CallValues::new(vec![LeafData::from(3)]);
        assert_eq!(block.evaluate_scope(&scalar, &mut bindings), ScopeValue::Discard);
    }

    #[test]
    fn test_for_rejects_call_syntax_and_duplicate_names() {
        let factory = ForFactory::new();
        assert!(factory.instantiate(BlockArguments::Call(LeafTuple::new())).is_err());
        assert!(factory.instantiate(parsed(&["x", "x"])).is_err());
    }

    #[test]
    fn test_for_format_parameters() {
        let instance = ForFactory::new().instantiate(parsed(&["k", "v"])).unwrap();
        assert_eq!(instance.block.format_parameters(&instance.args), "(k, v in names)");
    }

    #[test]
    fn test_while_checks_condition_each_pass() {
        let mut block = WhileBlock;
        let mut bindings = Bindings::new();
        let yes = CallValues::new(vec![LeafData::Bool(true)]);
        let no = CallValues::new(vec![LeafData::Bool(false)]);
        assert_eq!(block.evaluate_scope(&yes, &mut bindings), ScopeValue::Indefinite);
        assert_eq!(block.re_evaluate_scope(&no, &mut bindings), ScopeValue::Discard);
    }
}
