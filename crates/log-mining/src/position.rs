//! 파일별 읽기 위치(Last Position) 영속화
//!
//! 오프셋은 `library_db` 데이터베이스의 룰 이름 컬렉션에 파일 경로를 키로 저장됩니다.
//!
//! ```json
//! { "_id": "/logs/10.10.2.104_2019-01-07_host-route.log", "offset": 4096, "whence": "current", "reopen": true }
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use logminer_core::error::StoreError;
use logminer_core::store::{Namespace, PersistenceStore, PersistenceStoreExt};

/// 오프셋의 기준 위치
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Whence {
    /// 파일 시작 기준
    #[default]
    Start,
    /// 현재 위치 기준 (이전 실행에서 이어 읽기)
    Current,
}

/// 파일 하나의 영속 읽기 커서
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPosition {
    /// 파일 경로 (기본 키)
    #[serde(rename = "_id")]
    pub name: String,
    /// 바이트 오프셋
    #[serde(default)]
    pub offset: u64,
    /// 오프셋 기준 위치
    #[serde(default)]
    pub whence: Whence,
    /// 파일이 사라졌을 때 같은 이름으로 다시 열지 여부
    #[serde(default)]
    pub reopen: bool,
}

impl LastPosition {
    /// 파일 처음부터 읽는 커서를 생성합니다.
    pub fn fresh(path: impl AsRef<Path>) -> Self {
        Self {
            name: path.as_ref().display().to_string(),
            offset: 0,
            whence: Whence::Start,
            reopen: true,
        }
    }

    /// 주어진 오프셋에서 이어 읽는 커서를 생성합니다.
    pub fn resume(path: impl AsRef<Path>, offset: u64) -> Self {
        Self {
            offset,
            whence: if offset == 0 {
                Whence::Start
            } else {
                Whence::Current
            },
            ..Self::fresh(path)
        }
    }
}

/// 룰 하나의 Last Position 저장소
#[derive(Clone)]
pub struct PositionStore {
    store: Arc<dyn PersistenceStore>,
    ns: Namespace,
}

impl PositionStore {
    /// 저장소와 네임스페이스로 생성합니다.
    pub fn new(store: Arc<dyn PersistenceStore>, ns: Namespace) -> Self {
        Self { store, ns }
    }

    /// 오프셋 네임스페이스
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// 저장된 커서를 조회합니다. 없거나 읽을 수 없으면 `None`입니다.
    pub fn load(&self, path: &Path) -> Option<LastPosition> {
        let key = path.display().to_string();
        match self.store.get_as::<LastPosition>(&self.ns, &key) {
            Ok(position) => Some(position),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!(ns = %self.ns, path = %key, error = %e, "failed to read last position");
                None
            }
        }
    }

    /// 스캔으로 발견한 파일의 시작 커서를 결정합니다.
    ///
    /// 저장된 오프셋이 있으면 이어 읽고, 없으면 처음부터 읽는 커서를 저장합니다.
    pub fn admit(&self, path: &Path) -> LastPosition {
        match self.load(path) {
            Some(stored) if stored.offset > 0 => {
                debug!(path = %path.display(), offset = stored.offset, "resuming from stored offset");
                LastPosition {
                    whence: Whence::Current,
                    reopen: true,
                    ..stored
                }
            }
            _ => self.admit_fresh(path),
        }
    }

    /// 새로 생성된 파일의 커서를 오프셋 0으로 저장합니다.
    pub fn admit_fresh(&self, path: &Path) -> LastPosition {
        let position = LastPosition::fresh(path);
        if let Err(e) = self.save(&position) {
            warn!(path = %position.name, error = %e, "failed to store initial position");
        }
        position
    }

    /// 커서를 저장합니다.
    pub fn save(&self, position: &LastPosition) -> Result<(), StoreError> {
        self.store.set_as(&self.ns, &position.name, position)
    }

    /// 파일의 커서를 삭제합니다.
    pub fn remove(&self, path: &Path) -> Result<(), StoreError> {
        self.store.del(&self.ns, &path.display().to_string())
    }

    /// 네임스페이스의 모든 커서를 삭제합니다.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove_all(&self.ns)
    }

    /// 저장된 모든 커서를 조회합니다.
    pub fn list(&self) -> Result<Vec<LastPosition>, StoreError> {
        self.store
            .list(&self.ns)?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(StoreError::from))
            .collect()
    }
}
