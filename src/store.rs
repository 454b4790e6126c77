use std::path::Path;

use crate::error::StoreError;
use crate::evidence::EvidenceReport;

/// 模块：报告仓库 (Report Store)
///
/// **职责**: 生产端的“档案库”。报告生成后冻结，按 report_id 只写一次。
///
/// - **只追加**: 同一个 report_id 第二次写入直接拒绝，重新生成必须使用新的 id；
/// - **原子写**: 用 sled 的 compare-and-swap 实现“仅当不存在时写入”，并发请求不会互相覆盖；
/// - **线程安全**: `sled::Db` 本身可在线程间共享，上层只需要 `Arc`，不需要额外的锁。
pub struct ReportStore {
    db: sled::Db,
}

impl ReportStore {
    /// 打开 (或创建) 磁盘上的仓库
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self { db: sled::open(path)? })
    }

    /// 进程退出即删除的临时仓库 (测试 / 演示)
    pub fn temporary() -> Result<Self, StoreError> {
        Ok(Self {
            db: sled::Config::new().temporary(true).open()?,
        })
    }

    /// 写入冻结的报告。已存在则返回 `AlreadyExists`。
    pub fn insert(&self, report: &EvidenceReport) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(report)?;
        let swapped = self
            .db
            .compare_and_swap(report.report_id().as_bytes(), None::<&[u8]>, Some(payload))?;
        if swapped.is_err() {
            return Err(StoreError::AlreadyExists(report.report_id().to_string()));
        }
        self.db.flush()?;
        tracing::debug!(report_id = %report.report_id(), "报告已入库");
        Ok(())
    }

    pub fn get(&self, report_id: &str) -> Result<Option<EvidenceReport>, StoreError> {
        match self.db.get(report_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}
