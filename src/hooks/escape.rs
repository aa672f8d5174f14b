//! 响应头转义
//!
//! 合并完成后，`Set-Cookie` 列表中的每个值都被转义成纯 ASCII，
//! 转义规则与 jsesc 的默认输出一致（单引号字符串风格）。

use std::fmt::Write;

use serde_json::Value as JsonValue;

use super::types::PartialResult;

/// 按 jsesc 默认规则把字符串转义为可安全传输的 ASCII
pub fn escape_header_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '\u{8}' => escaped.push_str("\\b"),
            '\u{c}' => escaped.push_str("\\f"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            '\0' => {
                if chars.peek().is_some_and(|next| next.is_ascii_digit()) {
                    escaped.push_str("\\x00");
                } else {
                    escaped.push_str("\\0");
                }
            }
            ' '..='~' => escaped.push(ch),
            c if (c as u32) <= 0xFF => {
                let _ = write!(escaped, "\\x{:02X}", c as u32);
            }
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(escaped, "\\u{:04X}", unit);
                }
            }
        }
    }

    escaped
}

/// 转义合并结果中 `response.header` 下的 `Set-Cookie` 列表
///
/// 只处理数组形式的值，单个字符串保持原样。
pub fn escape_set_cookie(result: &mut PartialResult) {
    let Some(JsonValue::Object(response)) = result.as_map_mut().get_mut("response") else {
        return;
    };
    let Some(JsonValue::Object(header)) = response.get_mut("header") else {
        return;
    };

    for (name, value) in header.iter_mut() {
        if !name.eq_ignore_ascii_case("set-cookie") {
            continue;
        }
        if let JsonValue::Array(cookies) = value {
            for cookie in cookies.iter_mut() {
                if let JsonValue::String(raw) = cookie {
                    *raw = escape_header_value(raw);
                }
            }
        }
    }
}
