use std::env;
use std::time::Duration;

use anyhow::Context;

/// 生产端服务配置
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    /// 写入 provenance.environment
    pub environment: String,
    /// 写入 provenance.exported_by
    pub exported_by: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port = match lookup("PORT") {
            Some(raw) => raw.parse().with_context(|| format!("PORT must be a number, got `{raw}`"))?,
            None => 3000,
        };
        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            db_path: lookup("DB_PATH").unwrap_or_else(|| "data/db/reports".to_string()),
            environment: lookup("EVIDENCE_ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            exported_by: lookup("EVIDENCE_EXPORTED_BY")
                .unwrap_or_else(|| concat!("evidence-integrity/", env!("CARGO_PKG_VERSION")).to_string()),
        })
    }
}

/// 导出客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base: String,
    pub export_timeout: Duration,
}

impl ClientConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let secs: u64 = match lookup("EVIDENCE_EXPORT_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("EVIDENCE_EXPORT_TIMEOUT_SECS must be a number, got `{raw}`"))?,
            None => 30,
        };
        Ok(Self {
            api_base: lookup("EVIDENCE_API_BASE").unwrap_or_else(|| "http://127.0.0.1:3000".to_string()),
            export_timeout: Duration::from_secs(secs),
        })
    }
}
