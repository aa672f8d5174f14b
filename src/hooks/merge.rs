//! 只补缺合并
//!
//! 调度器里唯一的合并原语：目标中已存在的键（任意深度）永不覆盖，
//! 来源中有而目标中没有的键被拷贝进目标。

use serde_json::{Map, Value};

/// 把 `source` 中目标缺失的键递归补进 `target`
///
/// 两侧都是对象时按键递归，两侧都是数组时按下标递归，目标数组较短时
/// 用来源的剩余元素补齐；其余情况保留目标值。
/// 目标里显式的 `null` 也算“已存在”。
pub fn fill_missing(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => fill_missing_map(target, source),
        (Value::Array(target), Value::Array(source)) => {
            for (target_value, source_value) in target.iter_mut().zip(source) {
                fill_missing(target_value, source_value);
            }
            if source.len() > target.len() {
                target.extend_from_slice(&source[target.len()..]);
            }
        }
        _ => {}
    }
}

/// 对象版本的 [`fill_missing`]
pub fn fill_missing_map(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, source_value) in source {
        match target.get_mut(key) {
            Some(target_value) => fill_missing(target_value, source_value),
            None => {
                target.insert(key.clone(), source_value.clone());
            }
        }
    }
}
