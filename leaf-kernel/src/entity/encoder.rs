//! 输出编码器（raw handler）

use std::fmt;

/// 表达式输出编码器
///
/// 只作用于表达式结果，原始文本不经过编码。
pub trait OutputEncoder: Send + Sync + fmt::Debug {
    /// 把文本编码后追加到输出
    fn encode(&self, text: &str, out: &mut String);
}

/// 原样输出
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityEncoder;

impl OutputEncoder for IdentityEncoder {
    fn encode(&self, text: &str, out: &mut String) {
        out.push_str(text);
    }
}

/// HTML 转义
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlEncoder;

impl OutputEncoder for HtmlEncoder {
    fn encode(&self, text: &str, out: &mut String) {
        for c in text.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                _ => out.push(c),
            }
        }
    }
}
