//! 저장소 기반 레코드 싱크
//!
//! 감사 레코드를 `record_db` 데이터베이스의 일자별 컬렉션(`log_YYYY_MM_DD`)에 삽입합니다.
//! 컬렉션 날짜는 로그 날짜가 아니라 기록 시점의 로컬 날짜입니다.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde_json::Value;

use logminer_core::error::{LogminerError, StoreError};
use logminer_core::pipeline::RecordSink;
use logminer_core::store::{Namespace, PersistenceStore};

/// [`PersistenceStore`]에 레코드를 삽입하는 싱크
pub struct StoreSink {
    store: Arc<dyn PersistenceStore>,
    record_db: String,
}

impl StoreSink {
    /// 저장소와 레코드 데이터베이스 이름으로 생성합니다.
    pub fn new(store: Arc<dyn PersistenceStore>, record_db: impl Into<String>) -> Self {
        Self {
            store,
            record_db: record_db.into(),
        }
    }

    /// 주어진 날짜의 레코드 네임스페이스
    pub fn namespace_on(&self, day: NaiveDate) -> Namespace {
        Namespace::new(
            self.record_db.as_str(),
            day.format("log_%Y_%m_%d").to_string(),
        )
    }
}

impl RecordSink for StoreSink {
    fn write(&self, host: &str, date: &str, record: &[u8]) -> Result<(), LogminerError> {
        let mut value: Value = serde_json::from_slice(record).map_err(StoreError::from)?;
        let Some(fields) = value.as_object_mut() else {
            return Err(StoreError::Serialization("audit record must be a JSON object".to_owned()).into());
        };
        fields.insert("Host".to_owned(), Value::String(host.to_owned()));
        fields.insert("Date".to_owned(), Value::String(date.to_owned()));

        let ns = self.namespace_on(Local::now().date_naive());
        self.store.insert(&ns, value)?;
        Ok(())
    }
}
