//! # Lexer 模块
//!
//! 把模板源码转换为 token 序列。
//!
//! ## 状态
//!
//! - 普通文本：累积原始文本，遇到标签标记时切换
//! - 标签：刚读完标签名，决定进入参数列表、块体还是回到普通文本
//! - 参数：`( ... )` 内部，产出字面量、运算符、变量与关键字
//! - 参数结束：读完最外层 `)`，检查是否紧跟 `:`
//!
//! ## 转义
//!
//! 反斜杠紧跟标签标记或另一个反斜杠时输出字面字符，两者都被消耗；
//! 其余反斜杠原样保留。

use std::fmt;

use crate::data::LeafData;
use crate::error::{LexError, SourceLocation};

use super::symbol::{LeafKeyword, LeafOperator};

/// 带位置的 token
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token: LeafToken,
    pub location: SourceLocation,
}

/// token 种类
#[derive(Debug, Clone, PartialEq)]
pub enum LeafToken {
    /// 原始文本
    Raw(String),
    /// 标签名，匿名标签 `#(...)` 为空字符串
    Tag(String),
    /// 块体开始 `:`
    BlockMark,
    /// `(`
    ParamsStart,
    /// `)`
    ParamsEnd,
    /// `,`
    ParamDelimit,
    /// 参数
    Param(ParamToken),
}

/// 参数 token
#[derive(Debug, Clone, PartialEq)]
pub enum ParamToken {
    Literal(LeafData),
    Keyword(LeafKeyword),
    Operator(LeafOperator),
    Identifier(String),
    /// `$name` 作用域引用
    Scope(String),
}

impl fmt::Display for ParamToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(LeafData::String(s)) => write!(f, "\"{}\"", s),
            Self::Literal(data) => write!(f, "{:?}", data),
            Self::Keyword(k) => write!(f, "{}", k),
            Self::Operator(op) => write!(f, "{}", op),
            Self::Identifier(name) => f.write_str(name),
            Self::Scope(name) => write!(f, "${}", name),
        }
    }
}

impl fmt::Display for LeafToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(text) => write!(f, "{:?}", text),
            Self::Tag(name) => write!(f, "#{}", name),
            Self::BlockMark => f.write_str(":"),
            Self::ParamsStart => f.write_str("("),
            Self::ParamsEnd => f.write_str(")"),
            Self::ParamDelimit => f.write_str(","),
            Self::Param(param) => write!(f, "{}", param),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexerState {
    Normal,
    Tag,
    Parameters { depth: usize },
    TagEnd,
}

/// 词法分析器
pub struct LeafLexer<'a> {
    source: &'a str,
    indicator: char,
    pos: usize,
    line: usize,
    column: usize,
    state: LexerState,
    tokens: Vec<Token>,
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_identifier_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl<'a> LeafLexer<'a> {
    pub fn new(source: &'a str, indicator: char) -> Self {
        Self {
            source,
            indicator,
            pos: 0,
            line: 1,
            column: 1,
            state: LexerState::Normal,
            tokens: Vec::new(),
        }
    }

    /// 执行词法分析
    pub fn lex(mut self) -> Result<Vec<Token>, LexError> {
        while self.pos < self.source.len() {
            match self.state {
                LexerState::Normal => self.lex_raw(),
                LexerState::Tag => self.lex_tag_tail(),
                LexerState::Parameters { depth } => self.lex_parameter(depth)?,
                LexerState::TagEnd => {
                    if self.peek() == Some(':') {
                        let location = self.location();
                        self.advance();
                        self.push(LeafToken::BlockMark, location);
                    }
                    self.state = LexerState::Normal;
                }
            }
        }
        Ok(self.tokens)
    }

    fn location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column, self.pos)
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.source[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn advance_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&predicate) {
            self.advance();
        }
        &self.source[start..self.pos]
    }

    fn push(&mut self, token: LeafToken, location: SourceLocation) {
        self.tokens.push(Token { token, location });
    }

    /// 标签标记之后是否真的开始一个标签
    fn starts_tag(&self) -> bool {
        self.peek_second()
            .is_some_and(|c| is_identifier_start(c) || c == '(')
    }

    fn lex_raw(&mut self) {
        let location = self.location();
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' && matches!(self.peek_second(), Some(n) if n == self.indicator || n == '\\') {
                self.advance();
                if let Some(escaped) = self.advance() {
                    text.push(escaped);
                }
                continue;
            }
            if c == self.indicator && self.starts_tag() {
                break;
            }
            text.push(c);
            self.advance();
        }
        if !text.is_empty() {
            self.push(LeafToken::Raw(text), location);
        }
        if self.pos < self.source.len() {
            let location = self.location();
            self.advance();
            let name = self.advance_while(is_identifier_continue).to_string();
            self.push(LeafToken::Tag(name), location);
            self.state = LexerState::Tag;
        }
    }

    fn lex_tag_tail(&mut self) {
        let location = self.location();
        match self.peek() {
            Some('(') => {
                self.advance();
                self.push(LeafToken::ParamsStart, location);
                self.state = LexerState::Parameters { depth: 1 };
            }
            Some(':') => {
                self.advance();
                self.push(LeafToken::BlockMark, location);
                self.state = LexerState::Normal;
            }
            _ => self.state = LexerState::Normal,
        }
    }

    fn lex_parameter(&mut self, depth: usize) -> Result<(), LexError> {
        self.advance_while(char::is_whitespace);
        let Some(c) = self.peek() else {
            return Ok(());
        };
        let location = self.location();
        match c {
            '(' => {
                self.advance();
                self.push(LeafToken::ParamsStart, location);
                self.state = LexerState::Parameters { depth: depth + 1 };
            }
            ')' => {
                self.advance();
                self.push(LeafToken::ParamsEnd, location);
                self.state = if depth == 1 {
                    LexerState::TagEnd
                } else {
                    LexerState::Parameters { depth: depth - 1 }
                };
            }
            ',' => {
                self.advance();
                self.push(LeafToken::ParamDelimit, location);
            }
            '"' => {
                let literal = self.lex_string(location)?;
                self.push(LeafToken::Param(ParamToken::Literal(literal)), location);
            }
            '$' => {
                self.advance();
                if !self.peek().is_some_and(is_identifier_start) {
                    return Err(LexError::UnexpectedToken {
                        location,
                        found: "$".to_string(),
                    });
                }
                let name = self.advance_while(is_identifier_continue).to_string();
                self.push(LeafToken::Param(ParamToken::Scope(name)), location);
            }
            c if c.is_ascii_digit() => {
                let literal = self.lex_number(location)?;
                self.push(LeafToken::Param(ParamToken::Literal(literal)), location);
            }
            c if is_identifier_start(c) => {
                let name = self.advance_while(is_identifier_continue);
                let token = match LeafKeyword::from_identifier(name) {
                    Some(keyword) => ParamToken::Keyword(keyword),
                    None => ParamToken::Identifier(name.to_string()),
                };
                self.push(LeafToken::Param(token), location);
            }
            _ => {
                let rest = &self.source[self.pos..];
                let Some(op) = LeafOperator::LEXABLE
                    .iter()
                    .copied()
                    .find(|op| rest.starts_with(op.symbol()))
                else {
                    return Err(LexError::UnexpectedToken {
                        location,
                        found: c.to_string(),
                    });
                };
                for _ in 0..op.symbol().len() {
                    self.advance();
                }
                self.push(LeafToken::Param(ParamToken::Operator(op)), location);
            }
        }
        Ok(())
    }

    fn lex_string(&mut self, location: SourceLocation) -> Result<LeafData, LexError> {
        self.advance();
        let content = self.advance_while(|c| c != '"' && c != '\n');
        if self.peek() != Some('"') {
            return Err(LexError::UnterminatedStringLiteral { location });
        }
        self.advance();
        Ok(LeafData::from(content))
    }

    /// 数字字面量
    ///
    /// 支持 `0b`/`0o`/`0x` 前缀与 `_` 分隔；十进制与十六进制可以带小数部分，
    /// 小数点后必须紧跟该进制的数字，否则小数点不属于该数字。
    /// 紧跟字母、数字无效或溢出时报 [`LexError::UnexpectedToken`]。
    fn lex_number(&mut self, location: SourceLocation) -> Result<LeafData, LexError> {
        let start = self.pos;
        let radix = match (self.peek(), self.peek_second()) {
            (Some('0'), Some('b')) => 2,
            (Some('0'), Some('o')) => 8,
            (Some('0'), Some('x')) => 16,
            _ => 10,
        };
        if radix != 10 {
            self.advance();
            self.advance();
        }
        let is_digit = move |c: char| c.is_digit(radix) || c == '_';

        let integer = self.advance_while(is_digit).replace('_', "");
        let mut fraction = None;
        if (radix == 10 || radix == 16)
            && self.peek() == Some('.')
            && self.peek_second().is_some_and(|c| c.is_digit(radix))
        {
            self.advance();
            fraction = Some(self.advance_while(is_digit).replace('_', ""));
        }
        let trailing = self.advance_while(is_identifier_continue);

        let text = &self.source[start..self.pos];
        let invalid = || LexError::UnexpectedToken {
            location,
            found: text.to_string(),
        };
        if !trailing.is_empty() || integer.is_empty() {
            return Err(invalid());
        }

        match fraction {
            None => i64::from_str_radix(&integer, radix)
                .map(LeafData::Int)
                .map_err(|_| invalid()),
            Some(fraction) if radix == 10 => format!("{}.{}", integer, fraction)
                .parse::<f64>()
                .map(LeafData::Double)
                .map_err(|_| invalid()),
            Some(fraction) => {
                let whole = i64::from_str_radix(&integer, radix).map_err(|_| invalid())? as f64;
                let mut scale = 1.0 / radix as f64;
                let mut value = whole;
                for digit in fraction.chars() {
                    let digit = digit.to_digit(radix).ok_or_else(invalid)?;
                    value += digit as f64 * scale;
                    scale /= radix as f64;
                }
                Ok(LeafData::Double(value))
            }
        }
    }
}

/// 便捷函数：使用给定标签标记进行词法分析
pub fn lex(source: &str, indicator: char) -> Result<Vec<Token>, LexError> {
    LeafLexer::new(source, indicator).lex()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<LeafToken> {
        lex(source, '#')
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    fn param(token: ParamToken) -> LeafToken {
        LeafToken::Param(token)
    }

    fn literal(data: impl Into<LeafData>) -> LeafToken {
        param(ParamToken::Literal(data.into()))
    }

    #[test]
    fn test_raw_and_tags() {
        let tokens = kinds("Hello #(name)!");
        assert_eq!(
            tokens,
            vec![
                LeafToken::Raw("Hello ".into()),
                LeafToken::Tag(String::new()),
                LeafToken::ParamsStart,
                param(ParamToken::Identifier("name".into())),
                LeafToken::ParamsEnd,
                LeafToken::Raw("!".into()),
            ]
        );
    }

    #[test]
    fn test_block_marks() {
        let tokens = kinds("#if(a):x#else:y#endif");
        assert_eq!(tokens[0], LeafToken::Tag("if".into()));
        assert_eq!(tokens[4], LeafToken::BlockMark);
        assert_eq!(tokens[6], LeafToken::Tag("else".into()));
        assert_eq!(tokens[7], LeafToken::BlockMark);
        assert_eq!(tokens[9], LeafToken::Tag("endif".into()));
    }

    #[test]
    fn test_lone_indicator_is_raw() {
        assert_eq!(kinds("a # b #1"), vec![LeafToken::Raw("a # b #1".into())]);
    }

    #[test]
    fn test_escapes() {
        assert_eq!(
            kinds(r"\#(x) \\ \n"),
            vec![LeafToken::Raw(r"#(x) \ \n".into())]
        );
    }

    #[test]
    fn test_operators_longest_match() {
        let tokens = kinds("#(a!=b??-1)");
        assert_eq!(tokens[3], param(ParamToken::Operator(LeafOperator::Unequal)));
        assert_eq!(tokens[5], param(ParamToken::Operator(LeafOperator::NilCoalesce)));
        assert_eq!(tokens[6], param(ParamToken::Operator(LeafOperator::Minus)));
        assert_eq!(tokens[7], literal(1));
    }

    #[test]
    fn test_keywords_and_scopes() {
        let tokens = kinds("#for(x in $app.items)");
        assert_eq!(tokens[3], param(ParamToken::Keyword(LeafKeyword::In)));
        assert_eq!(tokens[4], param(ParamToken::Scope("app".into())));
        assert_eq!(tokens[5], param(ParamToken::Operator(LeafOperator::ScopeMember)));
    }

    #[test]
    fn test_numbers() {
        let tokens = kinds("#(0x1F, 0b1010, 0o17, 1_000, 2.5, 0x1.8)");
        let numbers: Vec<&LeafToken> = tokens
            .iter()
            .filter(|t| matches!(t, LeafToken::Param(ParamToken::Literal(_))))
            .collect();
        assert_eq!(numbers[0], &literal(31));
        assert_eq!(numbers[1], &literal(10));
        assert_eq!(numbers[2], &literal(15));
        assert_eq!(numbers[3], &literal(1000));
        assert_eq!(numbers[4], &literal(2.5));
        assert_eq!(numbers[5], &literal(1.5));
    }

    #[test]
    fn test_trailing_dot_is_not_part_of_number() {
        let tokens = kinds("#(5.count)");
        assert_eq!(tokens[2], literal(5));
        assert_eq!(tokens[3], param(ParamToken::Operator(LeafOperator::ScopeMember)));
    }

    #[test]
    fn test_malformed_numbers() {
        for source in ["#(12abc)", "#(0b102)", "#(0x)", "#(99999999999999999999)"] {
            let err = lex(source, '#').unwrap_err();
            assert!(
                matches!(err, LexError::UnexpectedToken { .. }),
                "{source} 应该报错"
            );
        }
    }

    #[test]
    fn test_unterminated_string() {
        let err = lex("#(\"abc\n\")", '#').unwrap_err();
        assert_eq!(
            err,
            LexError::UnterminatedStringLiteral {
                location: SourceLocation::new(1, 3, 2)
            }
        );
    }

    #[test]
    fn test_locations_track_lines() {
        let tokens = lex("a\nb #(x)", '#').unwrap();
        assert_eq!(tokens[1].location, SourceLocation::new(2, 3, 4));
    }

    #[test]
    fn test_custom_indicator() {
        assert_eq!(kinds("# @(x)"), vec![LeafToken::Raw("# @(x)".into())]);
        let tokens = lex("# @(x)", '@').unwrap();
        assert_eq!(tokens[1].token, LeafToken::Tag(String::new()));
    }
}
