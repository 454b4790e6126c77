//! 模块：规范化哈希 (Canonical Hasher)
//!
//! **职责**: 把任意结构化记录变成唯一确定的字节序列，再对其做 SHA-256。
//!
//! 规则 (`canonical-json/v1`，属于导出格式的一部分，修改必须升级版本号)：
//! - JSON，对象键按 UTF-8 字节序排序，无多余空白；
//! - 时间戳统一为 RFC 3339 UTC、毫秒精度、`Z` 结尾，例如 `2024-05-01T12:00:00.000Z`；
//! - 整数原样输出，非整数固定 6 位小数 (`0.930000`)；
//! - 哈希为小写十六进制 SHA-256。

use serde::Serialize;
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};
use std::io::{self, Read};

use crate::error::CanonicalError;

/// 规范化规则版本号，写入 report_hash 的原像中。
pub const CANONICAL_VERSION: &str = "canonical-json/v1";

/// 非整数的固定小数位数
const DECIMAL_PLACES: usize = 6;

/// 序列化为规范化字节
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::with_capacity(256);
    write_value(&value, &mut out)?;
    Ok(out)
}

/// 规范化字节的 SHA-256
pub fn canonical_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonicalError> {
    Ok(sha256_hex(&canonical_bytes(value)?))
}

/// 原始字节的 SHA-256 (小写 hex)
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// 流式计算 SHA-256，内存占用与输入大小无关。
pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// 是否为合法的 SHA-256 hex 摘要
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), CanonicalError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => write_number(n, out)?,
        Value::String(s) => write_string(s, out)?,
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            // 不依赖 serde_json 的 Map 实现 (preserve_order 特性会改变迭代顺序)
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out)?;
                out.push(b':');
                write_value(item, out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_number(n: &Number, out: &mut Vec<u8>) -> Result<(), CanonicalError> {
    if let Some(i) = n.as_i64() {
        out.extend_from_slice(i.to_string().as_bytes());
    } else if let Some(u) = n.as_u64() {
        out.extend_from_slice(u.to_string().as_bytes());
    } else {
        let f = n
            .as_f64()
            .filter(|f| f.is_finite())
            .ok_or_else(|| CanonicalError::UnsupportedNumber(n.to_string()))?;
        // -0.0 与 0.0 输出一致
        let f = if f == 0.0 { 0.0 } else { f };
        out.extend_from_slice(format!("{:.*}", DECIMAL_PLACES, f).as_bytes());
    }
    Ok(())
}

fn write_string(s: &str, out: &mut Vec<u8>) -> Result<(), CanonicalError> {
    serde_json::to_writer(&mut *out, s)?;
    Ok(())
}

/// 时间戳的固定字符串格式，供 `#[serde(with = "timestamp")]` 使用。
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// RFC 3339，毫秒精度，`Z` 结尾
    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// 截断到毫秒，保证内存值与序列化值一致
    pub fn normalize(ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.trunc_subsecs(3)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(raw).map(|t| normalize(t.with_timezone(&Utc)))
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}
