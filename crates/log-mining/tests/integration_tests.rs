//! 통합 테스트 -- 파일 감시부터 레코드 기록, 오프셋 영속화까지의 전체 흐름 검증

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use logminer_core::error::{LogminerError, StoreError};
use logminer_core::pipeline::RecordSink;
use logminer_core::store::{
    MemoryRuleStore, MemoryStore, Namespace, PersistenceStore, RuleStore,
};
use logminer_core::types::AuditRecord;
use logminer_log_mining::rule::dry_run;
use logminer_log_mining::{
    CompiledRule, DirectoryNode, LastPosition, MiningConfig, MiningConfigBuilder, PositionStore,
    RuleOptions, Scheduler, StoreSink, TailFollower, WatchContext,
};

const SWITCH_LINE: &str = "Jan  7 09:40:33 2019 DianXin-route %%10SHELL/5/SHELL_LOGIN: -DevIP=10.10.2.104; alice logged in from 10.10.10.10.";

fn switch_rule(dir: &Path) -> String {
    serde_json::json!({
        "dir": dir.display().to_string(),
        "filePattern": r"(\d+\.\d+\.\d+\.\d+.*\.log)",
        "host": r"(\d+\.\d+\.\d+\.\d+)",
        "logDate": r"(\d+-\d+-\d+)",
        "device": "route",
        "systemType": "switch",
        "linePrefixPattern": r"(\w+  \d \d+:\d+:\d+ \d+ [\w-]+ %%\w+/\d+/\w+: -DevIP=[\d.]+;)",
        "columnPattern": { "UserName": 8, "IpAddr": r"(\d+\.\d+\.\d+\.\d+)" }
    })
    .to_string()
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

fn today_log(dir: &Path, host: &str) -> PathBuf {
    dir.join(format!("{host}_{}_host-route.log", today()))
}

fn append(path: &Path, text: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

fn fast_config() -> MiningConfig {
    MiningConfigBuilder::new()
        .flush_interval(Duration::from_millis(200))
        .rewatch_interval_secs(1)
        .build()
        .unwrap()
}

/// 조건이 참이 될 때까지 최대 10초 기다립니다.
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_for_tracked(node: &DirectoryNode, count: usize) {
    for _ in 0..200 {
        if node.files().await.len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("expected {count} tracked files, got {:?}", node.files().await);
}

/// 레코드를 모아 두는 싱크
#[derive(Default)]
struct CollectingSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl CollectingSink {
    fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl RecordSink for CollectingSink {
    fn write(&self, _host: &str, _date: &str, record: &[u8]) -> Result<(), LogminerError> {
        let record = serde_json::from_slice(record).map_err(StoreError::from)?;
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

/// `set`과 `del` 호출 수를 세는 저장소
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    sets: AtomicUsize,
    dels: AtomicUsize,
}

impl PersistenceStore for CountingStore {
    fn get(&self, ns: &Namespace, key: &str) -> Result<Value, StoreError> {
        self.inner.get(ns, key)
    }
    fn set(&self, ns: &Namespace, key: &str, value: Value) -> Result<(), StoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(ns, key, value)
    }
    fn insert(&self, ns: &Namespace, value: Value) -> Result<String, StoreError> {
        self.inner.insert(ns, value)
    }
    fn del(&self, ns: &Namespace, key: &str) -> Result<(), StoreError> {
        self.dels.fetch_add(1, Ordering::SeqCst);
        self.inner.del(ns, key)
    }
    fn keys(&self, ns: &Namespace) -> Result<Vec<String>, StoreError> {
        self.inner.keys(ns)
    }
    fn list(&self, ns: &Namespace) -> Result<Vec<Value>, StoreError> {
        self.inner.list(ns)
    }
    fn remove_all(&self, ns: &Namespace) -> Result<(), StoreError> {
        self.inner.remove_all(ns)
    }
    fn drop_namespace(&self, ns: &Namespace) -> Result<(), StoreError> {
        self.inner.drop_namespace(ns)
    }
}

fn watch_context(
    store: Arc<dyn PersistenceStore>,
    sink: Arc<dyn RecordSink>,
    config: MiningConfig,
) -> Arc<WatchContext> {
    let positions = PositionStore::new(store, config.position_namespace("rule1"));
    Arc::new(WatchContext::new("rule1", positions, sink, config).unwrap())
}

fn compiled(dir: &Path) -> Arc<CompiledRule> {
    Arc::new(CompiledRule::compile(RuleOptions::from_json("rule1", &switch_rule(dir)).unwrap()).unwrap())
}

/// 스위치 로그 라인에서 Host, Date, Operation을 얻는 시나리오
#[test]
fn switch_line_scenario() {
    let rule = compiled(Path::new("/logs"));
    let path = Path::new("/logs/10.10.2.104_2019-01-07_host-route.log");
    assert!(rule.matches_file("10.10.2.104_2019-01-07_host-route.log"));
    assert_eq!(rule.host_of(path), "10.10.2.104");
    assert_eq!(rule.date_of(path), "2019-01-07");

    let record = rule.extract(SWITCH_LINE.as_bytes()).unwrap();
    assert_eq!(record.operation, "alice logged in from 10.10.10.10.");
    assert_eq!(record.user_name, "alice");
    assert_eq!(record.ip_addr, "10.10.2.104");
    assert_eq!(record.device, "route");
    assert_eq!(record.system_type.as_str(), "SWITCH");

    let dry = dry_run("rule1", &switch_rule(Path::new("/logs")), SWITCH_LINE.as_bytes()).unwrap();
    assert_eq!(dry, record);
}

/// 스케줄러로 시작한 룰이 레코드를 저장하고, 정지 시 최종 오프셋을 저장하는지 확인
#[tokio::test]
async fn scheduler_mines_records_into_store() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let rules = Arc::new(MemoryRuleStore::new());
    let config = fast_config();
    let sink = Arc::new(StoreSink::new(store.clone(), config.record_db.clone()));
    let scheduler =
        Scheduler::new(rules.clone(), store.clone(), sink.clone(), config.clone()).unwrap();

    let log = today_log(tmp.path(), "10.10.2.104");
    append(&log, &format!("{SWITCH_LINE}\n{SWITCH_LINE}\nnoise without prefix\n"));
    rules.set("rule1", switch_rule(tmp.path())).unwrap();

    assert!(scheduler.add("rule1").await.unwrap());

    let records_ns = sink.namespace_on(Local::now().date_naive());
    eventually("two records", || {
        store.list(&records_ns).map(|r| r.len()).unwrap_or(0) == 2
    })
    .await;

    let stored = store.list(&records_ns).unwrap();
    assert_eq!(stored[0]["Host"], "10.10.2.104");
    assert_eq!(stored[0]["Date"], today());
    assert_eq!(stored[0]["Operation"], "alice logged in from 10.10.10.10.");
    assert_eq!(stored[0]["SystemType"], "SWITCH");

    let file_len = std::fs::metadata(&log).unwrap().len();
    eventually("all lines consumed", || {
        stored_offset(&scheduler_positions(&store, &config), &log) == Some(file_len)
    })
    .await;

    assert!(scheduler.del("rule1").await.unwrap());
    let position = scheduler_positions(&store, &config).load(&log).unwrap();
    assert_eq!(position.offset, file_len);
}

fn scheduler_positions(store: &Arc<MemoryStore>, config: &MiningConfig) -> PositionStore {
    PositionStore::new(store.clone(), config.position_namespace("rule1"))
}

fn stored_offset(positions: &PositionStore, path: &Path) -> Option<u64> {
    positions.load(path).map(|p| p.offset)
}

/// 재시작 시 저장된 오프셋 이후의 라인만 다시 전달되는지 확인
#[tokio::test]
async fn restart_resumes_from_persisted_offset() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let rules = Arc::new(MemoryRuleStore::new());
    let sink = Arc::new(CollectingSink::default());
    let scheduler =
        Scheduler::new(rules.clone(), store.clone(), sink.clone(), fast_config()).unwrap();

    let log = today_log(tmp.path(), "10.0.0.1");
    append(&log, &format!("{SWITCH_LINE}\n"));
    rules.set("rule1", switch_rule(tmp.path())).unwrap();

    scheduler.add("rule1").await.unwrap();
    eventually("first record", || sink.len() == 1).await;
    scheduler.del("rule1").await.unwrap();

    append(&log, &format!("{SWITCH_LINE}\n"));
    scheduler.add("rule1").await.unwrap();
    eventually("second record", || sink.len() == 2).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sink.len(), 2, "lines before the stored offset are not re-read");
    scheduler.del("rule1").await.unwrap();
}

/// 대기 중 파일이 0 길이로 잘리면 처음부터 다시 읽는 시나리오
#[tokio::test]
async fn truncation_rewinds_to_start() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("a.log");
    append(&path, "first line\nsecond line\n");

    let (mut follower, mut lines) =
        TailFollower::spawn(&LastPosition::fresh(&path), &fast_config(), CancellationToken::new())
            .unwrap();
    lines.recv().await.unwrap();
    let second = lines.recv().await.unwrap();
    assert_eq!(second.end_offset, 23);

    std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(0)
        .unwrap();
    follower.notify(logminer_log_mining::tail::FileChange::Modified);
    eventually("offset reset", || follower.offset() == 0).await;

    append(&path, "after\n");
    follower.notify(logminer_log_mining::tail::FileChange::Modified);
    let line = tokio::time::timeout(Duration::from_secs(5), lines.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.bytes.as_ref(), b"after");
    assert_eq!(line.end_offset, 6);

    follower.close().await;
}

/// 생성 이벤트로 들어온 파일은 처음부터 읽고, 만료된 파일은 추적하지 않는지 확인
#[tokio::test]
async fn created_files_are_admitted_unless_expired() {
    let tmp = tempfile::tempdir().unwrap();
    let sink = Arc::new(CollectingSink::default());
    let ctx = watch_context(Arc::new(MemoryStore::new()), sink.clone(), fast_config());
    let node = DirectoryNode::open(ctx, compiled(tmp.path()), CancellationToken::new()).unwrap();

    append(&tmp.path().join("10.0.0.9_2001-01-01_old.log"), &format!("{SWITCH_LINE}\n"));
    append(&today_log(tmp.path(), "10.0.0.1"), &format!("{SWITCH_LINE}\n"));

    eventually("record from created file", || sink.len() == 1).await;
    wait_for_tracked(&node, 1).await;
    assert!(node.files().await[0].name.contains("10.0.0.1"));

    node.close().await;
}

/// 파일이 삭제되면 추적을 끝내고 저장된 위치를 삭제하는지 확인
#[tokio::test]
async fn removed_file_is_retired_and_forgotten() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let config = fast_config();
    let ctx = watch_context(store.clone(), Arc::new(CollectingSink::default()), config.clone());
    let log = today_log(tmp.path(), "10.0.0.1");
    append(&log, "x\n");

    let node = DirectoryNode::open(ctx.clone(), compiled(tmp.path()), CancellationToken::new())
        .unwrap();
    wait_for_tracked(&node, 1).await;
    assert!(ctx.positions().load(&log).is_some());

    std::fs::remove_file(&log).unwrap();
    wait_for_tracked(&node, 0).await;
    assert!(ctx.positions().load(&log).is_none());

    node.close().await;
}

/// 하위 디렉토리가 트리에서 사라지면 파일 수만큼 최종 오프셋을 저장하고 더 읽지 않는지 확인
#[tokio::test]
async fn removing_subdirectory_persists_each_file_once() {
    let root = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    let sub = root.path().join("sub");
    std::fs::create_dir(&sub).unwrap();
    append(&today_log(&sub, "10.0.0.1"), &format!("{SWITCH_LINE}\n"));
    append(&today_log(&sub, "10.0.0.2"), &format!("{SWITCH_LINE}\n"));

    let store = Arc::new(CountingStore::default());
    let sink = Arc::new(CollectingSink::default());
    let config = MiningConfigBuilder::new()
        .flush_interval(Duration::from_secs(3600))
        .rewatch_interval_secs(1)
        .build()
        .unwrap();
    let ctx = watch_context(store.clone(), sink.clone(), config);
    let node = DirectoryNode::open(ctx, compiled(root.path()), CancellationToken::new()).unwrap();

    wait_for_tracked(&node, 2).await;
    eventually("both files consumed", || sink.len() == 2).await;

    store.sets.store(0, Ordering::SeqCst);
    let moved = outside.path().join("sub");
    std::fs::rename(&sub, &moved).unwrap();
    wait_for_tracked(&node, 0).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.sets.load(Ordering::SeqCst), 2);

    append(&today_log(&moved, "10.0.0.1"), &format!("{SWITCH_LINE}\n"));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(sink.len(), 2, "closed followers read nothing further");

    node.close().await;
}

/// 하위 디렉토리를 통째로 삭제하면 파일마다 마지막 위치가 한 번씩만 기록됨
#[tokio::test]
async fn deleting_subdirectory_persists_each_file_once() {
    let root = tempfile::tempdir().unwrap();
    let sub = root.path().join("sub");
    std::fs::create_dir(&sub).unwrap();
    append(&today_log(&sub, "10.0.0.1"), &format!("{SWITCH_LINE}\n"));
    append(&today_log(&sub, "10.0.0.2"), &format!("{SWITCH_LINE}\n"));

    let store = Arc::new(CountingStore::default());
    let sink = Arc::new(CollectingSink::default());
    let config = MiningConfigBuilder::new()
        .flush_interval(Duration::from_secs(3600))
        .rewatch_interval_secs(1)
        .build()
        .unwrap();
    let ctx = watch_context(store.clone(), sink.clone(), config);
    let node = DirectoryNode::open(ctx, compiled(root.path()), CancellationToken::new()).unwrap();

    wait_for_tracked(&node, 2).await;
    eventually("both files consumed", || sink.len() == 2).await;

    store.sets.store(0, Ordering::SeqCst);
    store.dels.store(0, Ordering::SeqCst);
    std::fs::remove_dir_all(&sub).unwrap();
    wait_for_tracked(&node, 0).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // 자식 노드가 파일 삭제 이벤트를 먼저 받으면 그 파일의 위치는 삭제로 마감됨
    let writes = store.sets.load(Ordering::SeqCst) + store.dels.load(Ordering::SeqCst);
    assert_eq!(writes, 2);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(sink.len(), 2, "closed followers read nothing further");
    assert!(node.files().await.is_empty());

    node.close().await;
}

/// 하트비트가 주기적으로 오프셋을 저장하는지 확인
#[tokio::test]
async fn heartbeat_flushes_offsets() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let ctx = watch_context(store.clone(), Arc::new(CollectingSink::default()), fast_config());
    let log = today_log(tmp.path(), "10.0.0.1");
    append(&log, "");

    let node = DirectoryNode::open(ctx.clone(), compiled(tmp.path()), CancellationToken::new())
        .unwrap();
    wait_for_tracked(&node, 1).await;

    append(&log, "one\ntwo\n");
    eventually("heartbeat persisted offset", || {
        ctx.positions().load(&log).map(|p| p.offset) == Some(8)
    })
    .await;

    let report = node.flush_all().await;
    assert_eq!(report.persisted, 1);
    node.close().await;
}
