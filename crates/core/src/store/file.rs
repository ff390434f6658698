//! 파일 기반 영속 저장소
//!
//! 네임스페이스 하나는 두 파일로 저장됩니다.
//!
//! - `<root>/<database>/<collection>.json`: 전체 문서 스냅샷
//! - `<root>/<database>/<collection>.jsonl`: 스냅샷 이후 `insert`된 문서의 추가 전용 저널
//!
//! `insert`는 저널에 한 줄만 덧붙이므로 비용이 네임스페이스 크기와 무관합니다.
//! 그 밖의 변경 연산은 스냅샷을 임시 파일에 쓴 뒤 rename으로 교체하고 저널을 비웁니다.
//! 시작 시 스냅샷을 읽은 다음 저널을 재생합니다. 문서는 키로 덮어쓰므로
//! 스냅샷과 저널에 같은 문서가 있어도 결과는 같습니다.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{MemoryStore, Namespace, PersistenceStore, assign_id};
use crate::error::StoreError;

const SNAPSHOT_EXTENSION: &str = "json";
const JOURNAL_EXTENSION: &str = "jsonl";

/// 저널 한 줄
#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
    key: String,
    doc: Value,
}

/// 파일 기반 영속 저장소
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    inner: MemoryStore,
    /// 메모리 변경과 디스크 쓰기를 직렬화합니다.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// 루트 디렉토리에서 저장소를 엽니다. 디렉토리가 없으면 생성합니다.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let inner = MemoryStore::new();
        for db_entry in std::fs::read_dir(&root)? {
            let db_entry = db_entry?;
            if !db_entry.file_type()?.is_dir() {
                continue;
            }
            let database = db_entry.file_name().to_string_lossy().into_owned();

            let mut journals = Vec::new();
            for coll_entry in std::fs::read_dir(db_entry.path())? {
                let path = coll_entry?.path();
                let Some(collection) = path.file_stem().map(|s| s.to_string_lossy().into_owned())
                else {
                    continue;
                };
                let ns = Namespace::new(database.clone(), collection);

                match path.extension().and_then(|ext| ext.to_str()) {
                    Some(SNAPSHOT_EXTENSION) => match load_documents(&path) {
                        Ok(docs) => {
                            debug!(
                                path = %path.display(),
                                count = docs.len(),
                                "loaded namespace file"
                            );
                            inner.replace_namespace(ns, docs);
                        }
                        Err(e) => warn!(
                            path = %path.display(),
                            error = %e,
                            "failed to load namespace file, skipping"
                        ),
                    },
                    Some(JOURNAL_EXTENSION) => journals.push((ns, path)),
                    _ => {}
                }
            }

            // 저널은 스냅샷 위에 재생
            for (ns, path) in journals {
                replay_journal(&inner, &ns, &path)?;
            }
        }

        Ok(Self {
            root,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    /// 저장소 루트 디렉토리를 반환합니다.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_path(&self, ns: &Namespace, extension: &str) -> PathBuf {
        self.root
            .join(&ns.database)
            .join(format!("{}.{extension}", ns.collection))
    }

    /// 메모리 변경을 적용하고 네임스페이스 파일을 갱신합니다.
    fn mutate<T>(
        &self,
        ns: &Namespace,
        op: impl FnOnce(&MemoryStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let out = op(&self.inner)?;
        self.persist(ns)?;
        Ok(out)
    }

    /// 스냅샷을 다시 쓰고 저널을 비웁니다.
    fn persist(&self, ns: &Namespace) -> Result<(), StoreError> {
        let path = self.namespace_path(ns, SNAPSHOT_EXTENSION);
        match self.inner.snapshot(ns) {
            Some(docs) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let body = serde_json::to_vec_pretty(&docs)?;
                let tmp = path.with_extension("json.tmp");
                std::fs::write(&tmp, body)?;
                std::fs::rename(&tmp, &path)?;
            }
            None => remove_if_exists(&path)?,
        }
        // 스냅샷이 저널 내용을 포함하므로 rename 이후에 제거
        remove_if_exists(&self.namespace_path(ns, JOURNAL_EXTENSION))
    }

    /// 문서 한 건을 저널 끝에 덧붙입니다.
    fn append(&self, ns: &Namespace, entry: &JournalEntry) -> Result<(), StoreError> {
        let path = self.namespace_path(ns, JOURNAL_EXTENSION);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(&line)?;
        Ok(())
    }
}

fn load_documents(path: &Path) -> Result<BTreeMap<String, Value>, StoreError> {
    let content = std::fs::read(path)?;
    Ok(serde_json::from_slice(&content)?)
}

/// 저널을 읽어 메모리 저장소에 반영합니다. 깨진 줄은 건너뜁니다.
fn replay_journal(inner: &MemoryStore, ns: &Namespace, path: &Path) -> Result<(), StoreError> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut replayed = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(&line) {
            Ok(entry) => {
                inner.set(ns, &entry.key, entry.doc)?;
                replayed += 1;
            }
            Err(e) => warn!(
                path = %path.display(),
                line = index + 1,
                error = %e,
                "skipping corrupt journal line"
            ),
        }
    }
    debug!(path = %path.display(), count = replayed, "replayed namespace journal");
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl PersistenceStore for FileStore {
    fn get(&self, ns: &Namespace, key: &str) -> Result<Value, StoreError> {
        self.inner.get(ns, key)
    }

    fn set(&self, ns: &Namespace, key: &str, value: Value) -> Result<(), StoreError> {
        self.mutate(ns, |inner| inner.set(ns, key, value))
    }

    fn insert(&self, ns: &Namespace, mut value: Value) -> Result<String, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let key = assign_id(&mut value);
        let entry = JournalEntry {
            key: key.clone(),
            doc: value.clone(),
        };
        // 메모리 삽입이 중복 키를 거르므로 저널 기록보다 먼저 수행
        let id = self.inner.insert(ns, value)?;
        self.append(ns, &entry)?;
        Ok(id)
    }

    fn del(&self, ns: &Namespace, key: &str) -> Result<(), StoreError> {
        self.mutate(ns, |inner| inner.del(ns, key))
    }

    fn keys(&self, ns: &Namespace) -> Result<Vec<String>, StoreError> {
        self.inner.keys(ns)
    }

    fn list(&self, ns: &Namespace) -> Result<Vec<Value>, StoreError> {
        self.inner.list(ns)
    }

    fn remove_all(&self, ns: &Namespace) -> Result<(), StoreError> {
        self.mutate(ns, |inner| inner.remove_all(ns))
    }

    fn drop_namespace(&self, ns: &Namespace) -> Result<(), StoreError> {
        self.mutate(ns, |inner| inner.drop_namespace(ns))
    }
}
