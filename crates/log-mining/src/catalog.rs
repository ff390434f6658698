//! 룰 카탈로그 -- 룰 텍스트와 활성화 여부를 영속화합니다.
//!
//! 재시작 시 `isopen`이 참인 룰을 다시 시작하는 데 사용됩니다.
//!
//! ```json
//! { "_id": "rule1", "value": "{\"dir\": \"/logs\", ...}", "isopen": true }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use logminer_core::error::StoreError;
use logminer_core::store::{Namespace, PersistenceStore, PersistenceStoreExt};

use crate::error::LogMiningError;
use crate::rule::{CompiledRule, RuleOptions};

/// 영속화된 룰 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    /// 룰 이름
    #[serde(rename = "_id")]
    pub name: String,
    /// 룰 JSON 텍스트
    #[serde(default)]
    pub value: String,
    /// 마지막으로 실행 중이었는지 여부
    #[serde(default)]
    pub isopen: bool,
}

/// 룰 레코드 저장소
#[derive(Clone)]
pub struct RuleCatalog {
    store: Arc<dyn PersistenceStore>,
    ns: Namespace,
}

impl RuleCatalog {
    /// 저장소와 룰 네임스페이스로 생성합니다.
    pub fn new(store: Arc<dyn PersistenceStore>, ns: Namespace) -> Self {
        Self { store, ns }
    }

    /// 룰 텍스트를 검증하여 저장합니다. 기존 레코드의 `isopen`은 유지됩니다.
    ///
    /// # Errors
    /// 룰 파싱/정규식 컴파일 실패 또는 저장소 오류
    pub fn commit(&self, name: &str, text: &str) -> Result<RuleRecord, LogMiningError> {
        CompiledRule::compile(RuleOptions::from_json(name, text)?)?;

        let isopen = match self.get(name) {
            Ok(existing) => existing.isopen,
            Err(LogMiningError::Store(e)) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };

        let record = RuleRecord {
            name: name.to_owned(),
            value: text.to_owned(),
            isopen,
        };
        self.put(&record)?;
        Ok(record)
    }

    /// 룰 레코드를 조회합니다.
    pub fn get(&self, name: &str) -> Result<RuleRecord, LogMiningError> {
        Ok(self.store.get_as(&self.ns, name)?)
    }

    /// 레코드를 그대로 저장합니다.
    pub fn put(&self, record: &RuleRecord) -> Result<(), LogMiningError> {
        Ok(self.store.set_as(&self.ns, &record.name, record)?)
    }

    /// 활성화 여부만 변경합니다.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), LogMiningError> {
        let mut record = self.get(name)?;
        record.isopen = enabled;
        self.put(&record)
    }

    /// 레코드를 삭제합니다. 없는 레코드 삭제는 성공으로 처리합니다.
    pub fn remove(&self, name: &str) -> Result<(), LogMiningError> {
        Ok(self.store.del(&self.ns, name)?)
    }

    /// 모든 레코드를 이름 순으로 반환합니다.
    pub fn all(&self) -> Result<Vec<RuleRecord>, LogMiningError> {
        let mut records = self
            .store
            .list(&self.ns)?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(StoreError::from))
            .collect::<Result<Vec<RuleRecord>, _>>()?;
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}
