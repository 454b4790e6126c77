//! 导出客户端 (降级模式协作者)
//!
//! 向生产端请求证据包；请求失败时在本地写出只含 report.json 内容的 JSON 文件。
//! 降级产物保留 report_hash，但没有 manifest / provenance / packageHash，
//! 不具备包级防篡改能力，调用方必须向用户说明这一点 ([`DownloadOutcome::tamper_evident`])。
//!
//! 只发一次请求，不自动重试：避免瞬时故障反复触发生产端昂贵的打包。

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Url};

use crate::canonical;
use crate::config::ClientConfig;
use crate::error::NetworkError;
use crate::evidence::EvidenceReport;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 每次调用显式传入的请求上下文 (替代全局的“最后一次请求 id”)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// 拉取证据包的能力。重试、关联 id 等属于通用 HTTP 层，不在这里。
#[async_trait]
pub trait BundleFetcher: Send + Sync {
    async fn fetch_bundle(
        &self,
        ctx: &RequestContext,
        report_id: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>, NetworkError>;
}

/// 基于 reqwest 的实现：`GET {base}/evidence-report/{id}/export`
pub struct HttpBundleFetcher {
    http: Client,
    base_url: Url,
}

impl HttpBundleFetcher {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("invalid API base URL `{base_url}`"))?;
        let http = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { http, base_url })
    }

    pub fn export_url(&self, report_id: &str) -> Result<Url, NetworkError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| NetworkError::InvalidEndpoint(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["evidence-report", report_id, "export"]);
        Ok(url)
    }
}

#[async_trait]
impl BundleFetcher for HttpBundleFetcher {
    async fn fetch_bundle(
        &self,
        ctx: &RequestContext,
        report_id: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>, NetworkError> {
        let url = self.export_url(report_id)?;
        let transport = |err: reqwest::Error| {
            if err.is_timeout() {
                NetworkError::Timeout { url: url.to_string(), timeout }
            } else {
                NetworkError::Transport { url: url.to_string(), message: err.to_string() }
            }
        };

        let response = self
            .http
            .get(url.clone())
            .header(REQUEST_ID_HEADER, &ctx.request_id)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status { url: url.to_string(), status: status.as_u16() });
        }
        let body = response.bytes().await.map_err(transport)?;
        Ok(body.to_vec())
    }
}

/// 下载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub used_fallback: bool,
    /// 写出的文件 (ZIP 或降级 JSON)
    pub path: PathBuf,
    pub request_id: String,
    /// 触发降级的原因
    pub failure: Option<String>,
}

impl DownloadOutcome {
    /// 只有完整证据包才具备包级防篡改能力
    pub fn tamper_evident(&self) -> bool {
        !self.used_fallback
    }
}

pub struct ExportClient<F> {
    fetcher: F,
    timeout: Duration,
    out_dir: PathBuf,
}

impl ExportClient<HttpBundleFetcher> {
    pub fn from_config(config: &ClientConfig, out_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::new(
            HttpBundleFetcher::new(&config.api_base)?,
            config.export_timeout,
            out_dir,
        ))
    }
}

impl<F: BundleFetcher> ExportClient<F> {
    pub fn new(fetcher: F, timeout: Duration, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            timeout,
            out_dir: out_dir.into(),
        }
    }

    /// 下载证据包；网络失败不会作为错误返回，而是降级为本地 JSON (`used_fallback = true`)。
    /// 只有本地写文件失败才返回 `Err`。
    pub async fn download_package(
        &self,
        ctx: &RequestContext,
        report_id: &str,
        report: &EvidenceReport,
    ) -> anyhow::Result<DownloadOutcome> {
        match self.fetcher.fetch_bundle(ctx, report_id, self.timeout).await {
            Ok(bytes) => {
                let path = self.out_dir.join(bundle_file_name(report_id));
                write_file(&path, &bytes).await?;
                tracing::info!(report_id, request_id = %ctx.request_id, path = %path.display(), "📥 证据包下载完成");
                Ok(DownloadOutcome {
                    used_fallback: false,
                    path,
                    request_id: ctx.request_id.clone(),
                    failure: None,
                })
            }
            Err(err) => {
                tracing::warn!(
                    report_id,
                    request_id = %ctx.request_id,
                    error = %err,
                    "⚠️ 证据包下载失败，降级为报告 JSON (无包级防篡改)"
                );
                let path = self.out_dir.join(fallback_file_name(report_id));
                let bytes = canonical::canonical_bytes(report).context("failed to serialize fallback report")?;
                write_file(&path, &bytes).await?;
                Ok(DownloadOutcome {
                    used_fallback: true,
                    path,
                    request_id: ctx.request_id.clone(),
                    failure: Some(err.to_string()),
                })
            }
        }
    }
}

/// 与生产端 Content-Disposition 中的文件名一致
pub fn bundle_file_name(report_id: &str) -> String {
    format!("evidence-{}.zip", file_safe(report_id))
}

pub fn fallback_file_name(report_id: &str) -> String {
    format!("evidence-{}-report.json", file_safe(report_id))
}

fn file_safe(report_id: &str) -> String {
    report_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

async fn write_file(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}
