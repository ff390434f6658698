//! 워커 스케줄러 -- 룰 이름과 실행 중인 디렉토리 감시 트리를 연결합니다.
//!
//! 스케줄러의 워커 맵에 들어 있는지 여부가 "룰이 실행 중인가"의 유일한 기준입니다.
//! 모든 변경은 스케줄러 전역 뮤텍스로 직렬화됩니다.
//!
//! # 사용 예시
//! ```ignore
//! let scheduler = Scheduler::new(rules, store, sink, MiningConfig::default())?;
//! scheduler.add("rule1").await?;
//! assert!(scheduler.exists("rule1").await);
//! scheduler.del("rule1").await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use logminer_core::metrics as m;
use logminer_core::pipeline::RecordSink;
use logminer_core::store::{PersistenceStore, RuleStore};
use logminer_core::types::AuditRecord;

use crate::catalog::{RuleCatalog, RuleRecord};
use crate::config::MiningConfig;
use crate::error::LogMiningError;
use crate::position::{LastPosition, PositionStore};
use crate::rule::{self, CompiledRule, RuleOptions};
use crate::watcher::{DirectoryNode, FlushReport, WatchContext};

/// 실행 중인 룰 하나
struct Worker {
    /// 시작할 때 사용한 룰 텍스트
    text: String,
    /// 감시 트리 루트
    root: DirectoryNode,
}

/// 워커 스케줄러
pub struct Scheduler {
    workers: Mutex<HashMap<String, Worker>>,
    rules: Arc<dyn RuleStore>,
    store: Arc<dyn PersistenceStore>,
    sink: Arc<dyn RecordSink>,
    catalog: RuleCatalog,
    config: MiningConfig,
    cancel: CancellationToken,
}

impl Scheduler {
    /// 협력자를 주입하여 스케줄러를 생성합니다.
    ///
    /// # Errors
    /// 설정 검증 실패 시 [`LogMiningError::Config`]
    pub fn new(
        rules: Arc<dyn RuleStore>,
        store: Arc<dyn PersistenceStore>,
        sink: Arc<dyn RecordSink>,
        config: MiningConfig,
    ) -> Result<Self, LogMiningError> {
        config.validate()?;
        let catalog = RuleCatalog::new(Arc::clone(&store), config.rule_namespace());
        Ok(Self {
            workers: Mutex::new(HashMap::new()),
            rules,
            store,
            sink,
            catalog,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// 룰 카탈로그
    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    /// 룰 텍스트 저장소
    pub fn rule_store(&self) -> &Arc<dyn RuleStore> {
        &self.rules
    }

    /// 엔진 설정
    pub fn config(&self) -> &MiningConfig {
        &self.config
    }

    /// 룰을 시작합니다. 이미 실행 중이면 `false`를 반환합니다.
    ///
    /// 룰 저장소에서 텍스트를 읽어 컴파일하고 감시 트리를 연 뒤,
    /// 카탈로그에 활성화 상태를 기록합니다. 어느 단계든 실패하면 상태는 바뀌지 않습니다.
    pub async fn add(&self, name: &str) -> Result<bool, LogMiningError> {
        let mut workers = self.workers.lock().await;
        if workers.contains_key(name) {
            return Ok(false);
        }

        let text = self.rules.get(name)?;
        let rule = Arc::new(CompiledRule::compile(RuleOptions::from_json(name, &text)?)?);
        let dir = rule.options().dir.clone();

        let positions = PositionStore::new(
            Arc::clone(&self.store),
            self.config.position_namespace(name),
        );
        let ctx = Arc::new(WatchContext::new(
            name,
            positions,
            Arc::clone(&self.sink),
            self.config.clone(),
        )?);
        let root = match DirectoryNode::open(ctx, rule, self.cancel.child_token()) {
            Ok(root) => root,
            Err(e) => {
                record_transition("failed");
                return Err(e);
            }
        };

        let record = RuleRecord {
            name: name.to_owned(),
            value: text.clone(),
            isopen: true,
        };
        if let Err(e) = self.catalog.put(&record) {
            warn!(rule = %name, error = %e, "failed to persist enabled flag, stopping worker");
            root.close().await;
            record_transition("failed");
            return Err(e);
        }

        workers.insert(name.to_owned(), Worker { text, root });
        metrics::gauge!(m::SCHEDULER_WORKERS_RUNNING).set(workers.len() as f64);
        record_transition("started");
        info!(rule = %name, dir = %dir, "worker started");
        Ok(true)
    }

    /// 룰을 정지합니다. 실행 중이 아니면 `false`를 반환합니다.
    ///
    /// 감시 트리는 항상 끝까지 닫히고 등록이 해제됩니다. 일부 오프셋 저장이 실패하면
    /// 등록 해제 후 [`LogMiningError::StopIncomplete`]를 반환합니다.
    pub async fn del(&self, name: &str) -> Result<bool, LogMiningError> {
        let mut workers = self.workers.lock().await;
        let Some(worker) = workers.remove(name) else {
            return Ok(false);
        };
        metrics::gauge!(m::SCHEDULER_WORKERS_RUNNING).set(workers.len() as f64);

        let report = worker.root.close().await;
        record_transition("stopped");
        info!(
            rule = %name,
            persisted = report.persisted,
            failures = report.failures,
            "worker stopped"
        );

        let flag = self.catalog.put(&RuleRecord {
            name: name.to_owned(),
            value: worker.text,
            isopen: false,
        });

        if !report.is_clean() {
            if let Err(e) = flag {
                warn!(rule = %name, error = %e, "failed to persist disabled flag");
            }
            return Err(LogMiningError::StopIncomplete {
                name: name.to_owned(),
                failures: report.failures,
            });
        }
        flag?;
        Ok(true)
    }

    /// 룰이 실행 중인지 확인합니다.
    pub async fn exists(&self, name: &str) -> bool {
        self.workers.lock().await.contains_key(name)
    }

    /// 실행 중인 룰 이름 목록 (순서 없음)
    pub async fn list(&self) -> Vec<String> {
        self.workers.lock().await.keys().cloned().collect()
    }

    /// 실행 중인 룰이 추적하는 파일의 Last Position 목록 (경로 순)
    pub async fn files(&self, name: &str) -> Result<Vec<LastPosition>, LogMiningError> {
        let workers = self.workers.lock().await;
        let worker = workers
            .get(name)
            .ok_or_else(|| LogMiningError::WorkerNotFound(name.to_owned()))?;
        Ok(worker.root.files().await)
    }

    /// 정지된 룰을 완전히 삭제합니다.
    ///
    /// 룰 저장소의 텍스트, 저장된 오프셋, 카탈로그 레코드를 삭제합니다.
    /// 오프셋 삭제가 실패하면 룰 텍스트를 복구합니다.
    pub async fn drop_rule(&self, name: &str) -> Result<(), LogMiningError> {
        let workers = self.workers.lock().await;
        if workers.contains_key(name) {
            return Err(LogMiningError::WorkerRunning(name.to_owned()));
        }

        let text = self.rules.get(name)?;
        self.rules.del(name)?;

        let positions = PositionStore::new(
            Arc::clone(&self.store),
            self.config.position_namespace(name),
        );
        if let Err(e) = positions.clear() {
            warn!(rule = %name, ns = %positions.namespace(), error = %e, "failed to clear positions, restoring rule");
            if let Err(restore) = self.rules.set(name, text) {
                warn!(rule = %name, error = %restore, "failed to restore rule text");
            }
            return Err(e.into());
        }

        self.catalog.remove(name)?;
        info!(rule = %name, "rule dropped");
        Ok(())
    }

    /// 모든 워커를 닫습니다. 활성화 플래그는 유지되어 재시작 시 다시 시작됩니다.
    pub async fn shutdown(&self) -> FlushReport {
        let drained: Vec<(String, Worker)> = {
            let mut workers = self.workers.lock().await;
            workers.drain().collect()
        };

        let mut report = FlushReport::default();
        for (name, worker) in drained {
            let closed = worker.root.close().await;
            info!(
                rule = %name,
                persisted = closed.persisted,
                failures = closed.failures,
                "worker closed for shutdown"
            );
            report.persisted += closed.persisted;
            report.failures += closed.failures;
        }
        metrics::gauge!(m::SCHEDULER_WORKERS_RUNNING).set(0.0);
        report
    }

    /// 룰 텍스트로 라인 하나를 시험 추출합니다. 파일이나 저장소에 접근하지 않습니다.
    pub fn dry_run(&self, rule_text: &str, line: &[u8]) -> Result<AuditRecord, LogMiningError> {
        rule::dry_run("dry-run", rule_text, line)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn record_transition(result: &'static str) {
    metrics::counter!(m::SCHEDULER_TRANSITIONS_TOTAL, m::LABEL_RESULT => result).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use logminer_core::error::LogminerError;
    use logminer_core::store::{MemoryRuleStore, MemoryStore};

    struct NullSink;

    impl RecordSink for NullSink {
        fn write(&self, _: &str, _: &str, _: &[u8]) -> Result<(), LogminerError> {
            Ok(())
        }
    }

    fn scheduler() -> (Scheduler, Arc<MemoryRuleStore>) {
        let rules = Arc::new(MemoryRuleStore::new());
        let scheduler = Scheduler::new(
            rules.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(NullSink),
            MiningConfig::default(),
        )
        .unwrap();
        (scheduler, rules)
    }

    fn rule_text(dir: &std::path::Path) -> String {
        serde_json::json!({ "dir": dir.display().to_string(), "filePattern": "\\.log$" }).to_string()
    }

    #[tokio::test]
    async fn add_and_del_track_membership() {
        let tmp = tempfile::tempdir().unwrap();
        let (scheduler, rules) = scheduler();
        rules.set("rule1", rule_text(tmp.path())).unwrap();

        assert!(scheduler.add("rule1").await.unwrap());
        assert!(!scheduler.add("rule1").await.unwrap(), "second add is a no-op");
        assert!(scheduler.exists("rule1").await);
        assert_eq!(scheduler.list().await, vec!["rule1".to_owned()]);
        assert!(scheduler.catalog().get("rule1").unwrap().isopen);

        assert!(scheduler.del("rule1").await.unwrap());
        assert!(!scheduler.exists("rule1").await);
        assert!(scheduler.list().await.is_empty());
        assert!(!scheduler.catalog().get("rule1").unwrap().isopen);

        assert!(!scheduler.del("rule1").await.unwrap());
    }

    #[tokio::test]
    async fn add_unknown_rule_fails_without_state_change() {
        let (scheduler, _) = scheduler();
        assert!(scheduler.add("missing").await.is_err());
        assert!(!scheduler.exists("missing").await);
    }

    #[tokio::test]
    async fn add_invalid_rule_fails_without_state_change() {
        let (scheduler, rules) = scheduler();
        rules
            .set("bad", r#"{"dir": "/tmp", "filePattern": "(["}"#.to_owned())
            .unwrap();
        assert!(scheduler.add("bad").await.is_err());
        assert!(!scheduler.exists("bad").await);
        assert!(scheduler.catalog().get("bad").is_err());
    }

    #[tokio::test]
    async fn drop_refuses_running_rule() {
        let tmp = tempfile::tempdir().unwrap();
        let (scheduler, rules) = scheduler();
        rules.set("rule1", rule_text(tmp.path())).unwrap();
        scheduler.add("rule1").await.unwrap();

        let err = scheduler.drop_rule("rule1").await.unwrap_err();
        assert!(matches!(err, LogMiningError::WorkerRunning(_)));

        scheduler.del("rule1").await.unwrap();
        scheduler.drop_rule("rule1").await.unwrap();
        assert!(rules.get("rule1").is_err());
        assert!(scheduler.catalog().get("rule1").is_err());
    }

    #[tokio::test]
    async fn files_of_stopped_rule_is_not_found() {
        let (scheduler, _) = scheduler();
        let err = scheduler.files("rule1").await.unwrap_err();
        assert!(matches!(err, LogMiningError::WorkerNotFound(_)));
    }

    #[tokio::test]
    async fn shutdown_keeps_enabled_flags() {
        let tmp = tempfile::tempdir().unwrap();
        let (scheduler, rules) = scheduler();
        rules.set("rule1", rule_text(tmp.path())).unwrap();
        scheduler.add("rule1").await.unwrap();

        let report = scheduler.shutdown().await;
        assert!(report.is_clean());
        assert!(!scheduler.exists("rule1").await);
        assert!(scheduler.catalog().get("rule1").unwrap().isopen);
    }
}
