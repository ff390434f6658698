//! 인메모리 저장소 구현
//!
//! 모든 변경 연산은 쓰기 잠금 아래에서 수행합니다.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use super::{Namespace, PersistenceStore, RuleStore, assign_id};
use crate::error::StoreError;

type Documents = BTreeMap<String, Value>;

/// 인메모리 영속 저장소
///
/// 네임스페이스별로 키 순서가 유지되는 문서 맵을 보관합니다.
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: RwLock<HashMap<Namespace, Documents>>,
}

impl MemoryStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 네임스페이스 수를 반환합니다.
    pub fn namespace_count(&self) -> usize {
        self.read().len()
    }

    /// 네임스페이스의 문서 사본을 반환합니다. 없으면 `None`입니다.
    pub(crate) fn snapshot(&self, ns: &Namespace) -> Option<Documents> {
        self.read().get(ns).cloned()
    }

    /// 네임스페이스 전체를 교체합니다.
    pub(crate) fn replace_namespace(&self, ns: Namespace, docs: Documents) {
        self.write().insert(ns, docs);
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Namespace, Documents>> {
        self.namespaces.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Namespace, Documents>> {
        self.namespaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PersistenceStore for MemoryStore {
    fn get(&self, ns: &Namespace, key: &str) -> Result<Value, StoreError> {
        self.read()
            .get(ns)
            .and_then(|docs| docs.get(key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                namespace: ns.to_string(),
                key: key.to_owned(),
            })
    }

    fn set(&self, ns: &Namespace, key: &str, value: Value) -> Result<(), StoreError> {
        self.write()
            .entry(ns.clone())
            .or_default()
            .insert(key.to_owned(), value);
        Ok(())
    }

    fn insert(&self, ns: &Namespace, mut value: Value) -> Result<String, StoreError> {
        let id = assign_id(&mut value);
        let mut namespaces = self.write();
        let docs = namespaces.entry(ns.clone()).or_default();
        if docs.contains_key(&id) {
            return Err(StoreError::Query(format!(
                "duplicate key '{id}' in {ns}"
            )));
        }
        docs.insert(id.clone(), value);
        Ok(id)
    }

    fn del(&self, ns: &Namespace, key: &str) -> Result<(), StoreError> {
        if let Some(docs) = self.write().get_mut(ns) {
            docs.remove(key);
        }
        Ok(())
    }

    fn keys(&self, ns: &Namespace) -> Result<Vec<String>, StoreError> {
        Ok(self
            .read()
            .get(ns)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn list(&self, ns: &Namespace) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .read()
            .get(ns)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    fn remove_all(&self, ns: &Namespace) -> Result<(), StoreError> {
        if let Some(docs) = self.write().get_mut(ns) {
            docs.clear();
        }
        Ok(())
    }

    fn drop_namespace(&self, ns: &Namespace) -> Result<(), StoreError> {
        self.write().remove(ns);
        Ok(())
    }
}

/// 인메모리 룰 저장소
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: RwLock<HashMap<String, String>>,
}

impl MemoryRuleStore {
    /// 빈 룰 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RuleStore for MemoryRuleStore {
    fn get(&self, name: &str) -> Result<String, StoreError> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                namespace: "rules".to_owned(),
                key: name.to_owned(),
            })
    }

    fn set(&self, name: &str, text: String) -> Result<(), StoreError> {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), text);
        Ok(())
    }

    fn del(&self, name: &str) -> Result<(), StoreError> {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
