//! # Entity 模块
//!
//! 解析器查询的实体注册表：函数、方法、块与输出编码器。
//!
//! ## 线程安全
//!
//! 注册表在解析期间只读。多个线程可以同时用同一个注册表解析模板，
//! 但修改注册表与读取不能并发进行（由调用方保证）。

mod blocks;
mod encoder;
mod signature;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::data::LeafData;
use crate::template::{LeafTuple, Parameter};

pub use blocks::{ConditionalBlock, ConditionalFactory, ForBlock, ForFactory, WhileBlock, WhileFactory};
pub use encoder::{HtmlEncoder, IdentityEncoder, OutputEncoder};
pub use signature::{
    ArgumentSlot, CallParameter, CallSignature, CallValues, ParseSignature, ParseSlot,
    ParsedArguments,
};

/// 元块名称，不能注册为普通块
pub const META_BLOCKS: [&str; 4] = ["define", "evaluate", "inline", "raw"];

/// 默认编码器名称
pub const IDENTITY_ENCODER: &str = "identity";

/// 可在模板中调用的函数或方法
pub trait LeafFunction: Send + Sync {
    /// 调用签名
    fn signature(&self) -> &CallSignature;

    /// 相同实参是否总是产生相同结果
    ///
    /// 返回 `false` 的函数（如获取当前时间）永远不会被常量折叠。
    fn invariant(&self) -> bool {
        true
    }

    /// 执行调用，错误以 [`LeafData::Error`] 返回
    fn evaluate(&self, args: &CallValues) -> LeafData;
}

/// 块作用域的执行次数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeValue {
    /// 跳过作用域
    Discard,
    /// 执行一次
    Once,
    /// 执行 n 次，每次之间调用 [`LeafBlock::re_evaluate_scope`]
    Repeating(usize),
    /// 不定次数，直到 [`LeafBlock::re_evaluate_scope`] 返回 [`ScopeValue::Discard`]
    Indefinite,
}

/// 块作用域内由块自己绑定的变量
pub type Bindings = HashMap<String, LeafData>;

/// 块实例的状态机
///
/// 每次渲染都从 AST 中的原型克隆一份，状态不会在渲染之间共享。
pub trait LeafBlock: Send + Sync + fmt::Debug {
    /// 第一次进入时决定执行次数，并写入第一轮的绑定
    fn evaluate_scope(&mut self, args: &CallValues, bindings: &mut Bindings) -> ScopeValue;

    /// 后续每一轮之前调用，刷新绑定
    ///
    /// 返回 [`ScopeValue::Discard`] 表示提前结束。
    fn re_evaluate_scope(&mut self, _args: &CallValues, _bindings: &mut Bindings) -> ScopeValue {
        ScopeValue::Discard
    }

    /// 克隆出一个新的实例
    fn boxed_clone(&self) -> Box<dyn LeafBlock>;

    /// 以模板源码形式输出参数（用于 AST 转储）
    fn format_parameters(&self, args: &LeafTuple) -> String {
        args.to_string()
    }
}

impl Clone for Box<dyn LeafBlock> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

/// 块的构造参数
#[derive(Debug, Clone)]
pub enum BlockArguments {
    /// 普通调用语法
    Call(LeafTuple),
    /// 通过某个解析签名匹配的自定义语法
    Parsed(ParsedArguments),
}

/// 块工厂返回的实例
#[derive(Debug)]
pub struct BlockInstance {
    pub block: Box<dyn LeafBlock>,
    /// 规范化后的位置参数，求值结果按顺序传给块
    pub args: LeafTuple,
    /// 块在作用域内声明的变量
    pub declares: Vec<String>,
}

/// 块工厂
pub trait BlockFactory: Send + Sync {
    /// 普通调用语法的签名
    fn call_signature(&self) -> &CallSignature;

    /// 可选的自定义语法
    fn parse_signatures(&self) -> &[ParseSignature] {
        &[]
    }

    /// 可以作为前驱的块名称（非空表示这是链式块）
    fn chains_to(&self) -> &[&'static str] {
        &[]
    }

    /// 创建块实例
    fn instantiate(&self, args: BlockArguments) -> Result<BlockInstance, String>;
}

/// 按签名把调用元组规范化为位置参数
///
/// 缺失的参数以默认值字面量填充。只检查形状，类型由块自行处理。
pub fn normalize_call(signature: &CallSignature, tuple: LeafTuple) -> Result<LeafTuple, String> {
    let slots = signature.bind(tuple.len(), tuple.labels())?;
    let mut normalized = LeafTuple::new();
    for slot in slots {
        let value = match slot {
            ArgumentSlot::Argument(index) => tuple
                .get(index)
                .cloned()
                .ok_or_else(|| format!("缺少第 {} 个参数", index + 1))?,
            ArgumentSlot::Default(default) => Parameter::value(default),
        };
        normalized.push(value, None)?;
    }
    Ok(normalized)
}

/// 实体注册表
#[derive(Clone)]
pub struct LeafEntities {
    functions: HashMap<String, Vec<Arc<dyn LeafFunction>>>,
    methods: HashMap<String, Vec<Arc<dyn LeafFunction>>>,
    blocks: HashMap<String, Arc<dyn BlockFactory>>,
    encoders: HashMap<String, Arc<dyn OutputEncoder>>,
    default_encoder: String,
}

impl Default for LeafEntities {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LeafEntities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut blocks: Vec<&String> = self.blocks.keys().collect();
        blocks.sort();
        f.debug_struct("LeafEntities")
            .field("functions", &self.functions.len())
            .field("methods", &self.methods.len())
            .field("blocks", &blocks)
            .field("default_encoder", &self.default_encoder)
            .finish_non_exhaustive()
    }
}

impl LeafEntities {
    /// 只包含原样输出编码器的空注册表
    pub fn new() -> Self {
        let mut encoders: HashMap<String, Arc<dyn OutputEncoder>> = HashMap::new();
        encoders.insert(IDENTITY_ENCODER.to_string(), Arc::new(IdentityEncoder));
        Self {
            functions: HashMap::new(),
            methods: HashMap::new(),
            blocks: HashMap::new(),
            encoders,
            default_encoder: IDENTITY_ENCODER.to_string(),
        }
    }

    /// 核心控制流：`if`/`elseif`/`else`、`for`、`while`，以及 `identity`/`html` 编码器
    pub fn core() -> Self {
        let mut entities = Self::new();
        entities.register_block("if", Arc::new(ConditionalFactory::head()));
        entities.register_block("elseif", Arc::new(ConditionalFactory::successor()));
        entities.register_block("else", Arc::new(ConditionalFactory::terminal()));
        entities.register_block("for", Arc::new(ForFactory::new()));
        entities.register_block("while", Arc::new(WhileFactory::new()));
        entities.register_encoder("html", Arc::new(HtmlEncoder));
        entities
    }

    /// 注册函数（同名可重载）
    pub fn register_function(&mut self, name: impl Into<String>, function: Arc<dyn LeafFunction>) {
        self.functions.entry(name.into()).or_default().push(function);
    }

    /// 注册方法（同名可重载）
    pub fn register_method(&mut self, name: impl Into<String>, method: Arc<dyn LeafFunction>) {
        self.methods.entry(name.into()).or_default().push(method);
    }

    /// 注册块，同名块会被替换
    pub fn register_block(&mut self, name: impl Into<String>, factory: Arc<dyn BlockFactory>) {
        let name = name.into();
        if META_BLOCKS.contains(&name.as_str()) || name.starts_with("end") {
            warn!(name = %name, "块名称与元块或结束标签冲突，注册被忽略");
            return;
        }
        self.blocks.insert(name, factory);
    }

    /// 注册输出编码器
    pub fn register_encoder(&mut self, name: impl Into<String>, encoder: Arc<dyn OutputEncoder>) {
        self.encoders.insert(name.into(), encoder);
    }

    /// 设置默认编码器
    pub fn set_default_encoder(&mut self, name: &str) -> Result<(), String> {
        if !self.encoders.contains_key(name) {
            return Err(format!("编码器 '{}' 未注册", name));
        }
        self.default_encoder = name.to_string();
        Ok(())
    }

    pub fn functions(&self, name: &str) -> &[Arc<dyn LeafFunction>] {
        self.functions.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn methods(&self, name: &str) -> &[Arc<dyn LeafFunction>] {
        self.methods.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn block(&self, name: &str) -> Option<&Arc<dyn BlockFactory>> {
        self.blocks.get(name)
    }

    pub fn encoder(&self, name: &str) -> Option<&Arc<dyn OutputEncoder>> {
        self.encoders.get(name)
    }

    pub fn default_encoder_name(&self) -> &str {
        &self.default_encoder
    }

    /// 默认编码器
    pub fn default_encoder(&self) -> Arc<dyn OutputEncoder> {
        self.encoders
            .get(&self.default_encoder)
            .cloned()
            .unwrap_or_else(|| Arc::new(IdentityEncoder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LeafDataType;

    struct Uppercased {
        signature: CallSignature,
    }

    impl LeafFunction for Uppercased {
        fn signature(&self) -> &CallSignature {
            &self.signature
        }

        fn evaluate(&self, args: &CallValues) -> LeafData {
            LeafData::from(args[0].as_str().unwrap_or_default().to_uppercase())
        }
    }

    #[test]
    fn test_core_registry() {
        let entities = LeafEntities::core();
        assert!(entities.block("if").is_some());
        assert!(entities.block("elseif").is_some());
        assert!(entities.block("for").is_some());
        assert!(entities.encoder("html").is_some());
        assert_eq!(entities.default_encoder_name(), IDENTITY_ENCODER);
        assert!(entities.functions("uppercased").is_empty());
    }

    #[test]
    fn test_overloads_accumulate() {
        let mut entities = LeafEntities::new();
        let function = Arc::new(Uppercased {
            signature: CallSignature::new(vec![CallParameter::typed(&[LeafDataType::String])]),
        });
        entities.register_method("uppercased", function.clone());
        entities.register_method("uppercased", function);
        assert_eq!(entities.methods("uppercased").len(), 2);
        assert!(entities.functions("uppercased").is_empty());
    }

    #[test]
    fn test_reserved_block_names_ignored() {
        let mut entities = LeafEntities::new();
        entities.register_block("define", Arc::new(ForFactory::new()));
        entities.register_block("endthing", Arc::new(ForFactory::new()));
        assert!(entities.block("define").is_none());
        assert!(entities.block("endthing").is_none());
    }

    #[test]
    fn test_default_encoder_must_exist() {
        let mut entities = LeafEntities::core();
        assert!(entities.set_default_encoder("missing").is_err());
        entities.set_default_encoder("html").unwrap();
        assert_eq!(entities.default_encoder_name(), "html");
    }

    #[test]
    fn test_normalize_call_fills_defaults() {
        let signature = CallSignature::new(vec![
            CallParameter::any(),
            CallParameter::any().labeled("limit").with_default(3),
        ]);
        let mut tuple = LeafTuple::new();
        tuple.push(Parameter::value("x"), None).unwrap();
        let normalized = normalize_call(&signature, tuple).unwrap();
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized.values()[1].as_value(), Some(&LeafData::Int(3)));
        assert!(normalized.labels().is_empty());
    }
}
