//! 저장소 trait — 룰 저장소와 네임스페이스 기반 영속 저장소
//!
//! 엔진은 이 trait들만을 통해 외부 저장소에 접근합니다.
//! 연결 관리, 풀링 등은 구현체의 책임입니다.
//!
//! - [`RuleStore`]: 룰 이름 → 룰 텍스트 (명령 계층이 사용하는 인메모리 캐시)
//! - [`PersistenceStore`]: (database, collection) 네임스페이스별 JSON 문서 저장소
//! - [`MemoryStore`], [`MemoryRuleStore`]: 인메모리 구현
//! - [`FileStore`]: 네임스페이스마다 JSON 파일 하나로 영속화하는 구현

mod file;
mod memory;

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StoreError;

pub use file::FileStore;
pub use memory::{MemoryRuleStore, MemoryStore};

/// 저장소 네임스페이스 (database + collection)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    /// 데이터베이스 이름
    pub database: String,
    /// 컬렉션 이름
    pub collection: String,
}

impl Namespace {
    /// 새 네임스페이스를 생성합니다.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// 룰 텍스트 저장소
pub trait RuleStore: Send + Sync {
    /// 룰 텍스트를 조회합니다. 없으면 [`StoreError::NotFound`]를 반환합니다.
    fn get(&self, name: &str) -> Result<String, StoreError>;

    /// 룰 텍스트를 저장합니다 (덮어쓰기).
    fn set(&self, name: &str, text: String) -> Result<(), StoreError>;

    /// 룰을 삭제합니다. 없는 키 삭제는 성공으로 취급합니다.
    fn del(&self, name: &str) -> Result<(), StoreError>;

    /// 저장된 룰 이름 목록을 반환합니다.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// 네임스페이스 기반 키-값 영속 저장소
///
/// 각 키 단위 연산은 독립적이며, 여러 키에 걸친 트랜잭션은 보장하지 않습니다.
pub trait PersistenceStore: Send + Sync {
    /// 문서를 조회합니다. 없으면 [`StoreError::NotFound`]를 반환합니다.
    fn get(&self, ns: &Namespace, key: &str) -> Result<Value, StoreError>;

    /// 문서를 저장합니다 (upsert).
    fn set(&self, ns: &Namespace, key: &str, value: Value) -> Result<(), StoreError>;

    /// 새 키로 문서를 추가하고 생성된 키를 반환합니다.
    fn insert(&self, ns: &Namespace, value: Value) -> Result<String, StoreError>;

    /// 문서를 삭제합니다. 없는 키 삭제는 성공으로 취급합니다.
    fn del(&self, ns: &Namespace, key: &str) -> Result<(), StoreError>;

    /// 네임스페이스의 키 목록을 반환합니다.
    fn keys(&self, ns: &Namespace) -> Result<Vec<String>, StoreError>;

    /// 네임스페이스의 모든 문서를 반환합니다.
    fn list(&self, ns: &Namespace) -> Result<Vec<Value>, StoreError>;

    /// 네임스페이스의 모든 문서를 삭제합니다 (네임스페이스는 유지).
    fn remove_all(&self, ns: &Namespace) -> Result<(), StoreError>;

    /// 네임스페이스 자체를 제거합니다.
    fn drop_namespace(&self, ns: &Namespace) -> Result<(), StoreError>;
}

/// 타입이 있는 문서 접근 헬퍼
///
/// `dyn PersistenceStore`에서도 쓸 수 있도록 blanket 구현을 제공합니다.
pub trait PersistenceStoreExt: PersistenceStore {
    /// 문서를 조회하여 `T`로 역직렬화합니다.
    fn get_as<T: DeserializeOwned>(&self, ns: &Namespace, key: &str) -> Result<T, StoreError> {
        let value = self.get(ns, key)?;
        Ok(serde_json::from_value(value)?)
    }

    /// `T`를 직렬화하여 저장합니다.
    fn set_as<T: Serialize>(&self, ns: &Namespace, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        self.set(ns, key, value)
    }
}

impl<S: PersistenceStore + ?Sized> PersistenceStoreExt for S {}

/// 삽입 문서의 키를 결정합니다.
///
/// 문서에 문자열 `_id`가 있으면 그 값을, 없으면 새 UUID를 사용하고 `_id`로 기록합니다.
pub(crate) fn assign_id(value: &mut Value) -> String {
    if let Some(id) = value.get("_id").and_then(Value::as_str) {
        return id.to_owned();
    }
    let id = uuid::Uuid::new_v4().to_string();
    if let Value::Object(map) = value {
        map.insert("_id".to_owned(), Value::String(id.clone()));
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_display() {
        let ns = Namespace::new("audit_lib", "rule1");
        assert_eq!(ns.to_string(), "audit_lib.rule1");
    }

    #[test]
    fn assign_id_keeps_existing_id() {
        let mut value = serde_json::json!({"_id": "fixed", "v": 1});
        assert_eq!(assign_id(&mut value), "fixed");
    }

    #[test]
    fn assign_id_generates_and_records_id() {
        let mut value = serde_json::json!({"v": 1});
        let id = assign_id(&mut value);
        assert!(!id.is_empty());
        assert_eq!(value["_id"], id.as_str());
    }
}
