//! 디렉토리 감시기 -- 룰의 감시 디렉토리를 재귀적으로 추적합니다.
//!
//! 디렉토리 하나마다 [`DirectoryNode`]가 생성되며, 노드는 추적 파일과 자식 노드를
//! 독점 소유합니다. 자식은 부모를 참조하지 않습니다.
//!
//! # 노드 태스크
//! - 파일시스템 이벤트 처리 (생성/삭제/이름 변경/쓰기)
//! - 만료 파일 정리 (`expiry_sweep_interval_ms`, 기본 1초)
//! - 오프셋 플러시 하트비트 (`flush_interval_ms`, 기본 2초)
//!
//! 세 작업은 노드별 뮤텍스로 직렬화됩니다. 부모와 자식은 서로 다른 뮤텍스를 사용합니다.
//!
//! # 종료 순서
//! 이벤트 루프 중지 -> 추적 파일 닫기 및 최종 오프셋 저장 -> 자식 노드 재귀 종료 -> 감시 해제

pub mod expiry;
pub mod file;

pub use expiry::ExpiryPolicy;
pub use file::TrackedFile;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use logminer_core::metrics as m;
use logminer_core::pipeline::{BoxFuture, RecordSink};

use crate::config::MiningConfig;
use crate::error::LogMiningError;
use crate::position::{LastPosition, PositionStore};
use crate::rule::CompiledRule;
use crate::tail::FileChange;

/// 감시 트리 전체가 공유하는 실행 문맥
pub struct WatchContext {
    rule_name: String,
    positions: PositionStore,
    sink: Arc<dyn RecordSink>,
    config: MiningConfig,
    expiry: ExpiryPolicy,
}

impl WatchContext {
    /// 룰 하나의 감시 문맥을 생성합니다.
    pub fn new(
        rule_name: impl Into<String>,
        positions: PositionStore,
        sink: Arc<dyn RecordSink>,
        config: MiningConfig,
    ) -> Result<Self, LogMiningError> {
        Ok(Self {
            rule_name: rule_name.into(),
            positions,
            sink,
            config,
            expiry: ExpiryPolicy::new()?,
        })
    }

    /// 룰 이름
    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    /// 오프셋 저장소
    pub fn positions(&self) -> &PositionStore {
        &self.positions
    }
}

/// 오프셋 저장 결과 집계
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// 저장에 성공한 파일 수
    pub persisted: usize,
    /// 저장에 실패한 파일 수
    pub failures: usize,
}

impl FlushReport {
    fn merge(&mut self, other: FlushReport) {
        self.persisted += other.persisted;
        self.failures += other.failures;
    }

    /// 실패가 없었는지 여부
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

/// 추적 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retirement {
    /// 디스크에서 삭제되거나 이름이 바뀜
    Removed,
    /// 날짜 토큰이 오늘이 아님
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// 초기 스캔 (저장된 오프셋에서 이어 읽기)
    Scan,
    /// 생성 이벤트 (처음부터 읽기)
    Event,
}

/// 노드의 불변 정보
struct NodeCore {
    path: PathBuf,
    level: usize,
    rule: Arc<CompiledRule>,
    ctx: Arc<WatchContext>,
    cancel: CancellationToken,
}

/// 노드 뮤텍스가 보호하는 상태
#[derive(Default)]
struct NodeState {
    files: HashMap<PathBuf, TrackedFile>,
    children: HashMap<PathBuf, DirectoryNode>,
}

/// 감시 중인 디렉토리 하나
pub struct DirectoryNode {
    core: Arc<NodeCore>,
    state: Arc<Mutex<NodeState>>,
    watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
}

impl DirectoryNode {
    /// 룰의 감시 디렉토리를 루트로 하는 트리를 엽니다.
    ///
    /// 디렉토리가 없으면 생성합니다. 기존 파일은 저장된 오프셋에서 이어 읽습니다.
    ///
    /// # Errors
    /// 디렉토리 생성, 감시 등록, 초기 스캔이 실패하면 아무것도 시작하지 않고 반환합니다.
    pub fn open(
        ctx: Arc<WatchContext>,
        rule: Arc<CompiledRule>,
        cancel: CancellationToken,
    ) -> Result<Self, LogMiningError> {
        let dir = PathBuf::from(&rule.options().dir);
        std::fs::create_dir_all(&dir).map_err(|e| LogMiningError::Watch {
            path: dir.display().to_string(),
            reason: format!("failed to create directory: {e}"),
        })?;
        Self::start(ctx, rule, 0, cancel)
    }

    fn start(
        ctx: Arc<WatchContext>,
        rule: Arc<CompiledRule>,
        level: usize,
        cancel: CancellationToken,
    ) -> Result<Self, LogMiningError> {
        let path = PathBuf::from(&rule.options().dir);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = event_tx.send(event);
        })?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        let core = Arc::new(NodeCore {
            path,
            level,
            rule,
            ctx,
            cancel,
        });

        let mut state = NodeState::default();
        core.scan(&mut state)?;
        debug!(
            rule = %core.ctx.rule_name,
            dir = %core.path.display(),
            level,
            files = state.files.len(),
            children = state.children.len(),
            "directory opened"
        );

        let state = Arc::new(Mutex::new(state));
        let task = tokio::spawn(run(Arc::clone(&core), Arc::clone(&state), event_rx));

        Ok(Self {
            core,
            state,
            watcher: Some(watcher),
            task: Some(task),
        })
    }

    /// 감시 디렉토리 경로
    pub fn path(&self) -> &Path {
        &self.core.path
    }

    /// 루트로부터의 깊이 (루트 = 0)
    pub fn level(&self) -> usize {
        self.core.level
    }

    /// 하위 트리 전체의 Last Position을 경로 순으로 반환합니다.
    pub async fn files(&self) -> Vec<LastPosition> {
        let mut positions = self.collect_positions().await;
        positions.sort_by(|a, b| a.name.cmp(&b.name));
        positions
    }

    fn collect_positions(&self) -> BoxFuture<'_, Vec<LastPosition>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let mut positions: Vec<_> = state.files.values().map(TrackedFile::position).collect();
            for child in state.children.values() {
                positions.extend(child.collect_positions().await);
            }
            positions
        })
    }

    /// 하위 트리 전체의 오프셋을 즉시 저장합니다.
    pub fn flush_all(&self) -> BoxFuture<'_, FlushReport> {
        Box::pin(async move {
            let mut report = self.core.flush_own(&self.state).await;
            let state = self.state.lock().await;
            for child in state.children.values() {
                report.merge(child.flush_all().await);
            }
            report
        })
    }

    /// 하위 트리를 닫습니다. 각 파일의 최종 오프셋을 저장한 뒤 감시를 해제합니다.
    pub fn close(mut self) -> BoxFuture<'static, FlushReport> {
        Box::pin(async move {
            self.core.cancel.cancel();
            if let Some(task) = self.task.take() {
                if let Err(e) = task.await {
                    warn!(dir = %self.core.path.display(), error = %e, "directory task panicked");
                }
            }

            let (files, children) = {
                let mut state = self.state.lock().await;
                (
                    std::mem::take(&mut state.files),
                    std::mem::take(&mut state.children),
                )
            };

            let mut report = FlushReport::default();
            for (_, file) in files {
                let position = file.close().await;
                self.core.untrack();
                report.merge(self.core.persist(&position));
            }
            for (_, child) in children {
                report.merge(child.close().await);
            }

            drop(self.watcher.take());
            debug!(
                rule = %self.core.ctx.rule_name,
                dir = %self.core.path.display(),
                persisted = report.persisted,
                failures = report.failures,
                "directory closed"
            );
            report
        })
    }
}

impl Drop for DirectoryNode {
    fn drop(&mut self) {
        self.core.cancel.cancel();
    }
}

/// 노드 이벤트 루프
async fn run(
    core: Arc<NodeCore>,
    state: Arc<Mutex<NodeState>>,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
) {
    let config = &core.ctx.config;
    let mut sweep = tokio::time::interval(config.expiry_sweep_interval());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
    sweep.reset();
    let mut heartbeat = tokio::time::interval(config.flush_interval());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    heartbeat.reset();

    loop {
        tokio::select! {
            biased;
            _ = core.cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(Ok(event)) => core.handle_event(&state, event).await,
                Some(Err(e)) => warn!(dir = %core.path.display(), error = %e, "watch error"),
                None => break,
            },
            _ = sweep.tick() => core.sweep_expired(&state).await,
            _ = heartbeat.tick() => {
                core.flush_own(&state).await;
            }
        }
    }

    trace!(dir = %core.path.display(), "directory loop stopped");
}

impl NodeCore {
    /// 디렉토리를 스캔하여 자식 노드와 추적 파일을 등록합니다.
    fn scan(&self, state: &mut NodeState) -> Result<(), LogMiningError> {
        let entries = std::fs::read_dir(&self.path).map_err(|e| LogMiningError::Watch {
            path: self.path.display().to_string(),
            reason: format!("failed to read directory: {e}"),
        })?;

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %self.path.display(), error = %e, "failed to read directory entry");
                    continue;
                }
            };
            self.admit_path(state, entry.path(), Origin::Scan);
        }
        Ok(())
    }

    /// 경로 종류에 따라 자식 노드 또는 추적 파일로 등록합니다.
    fn admit_path(&self, state: &mut NodeState, path: PathBuf, origin: Origin) {
        match std::fs::metadata(&path) {
            Ok(metadata) if metadata.is_dir() => self.add_child(state, path),
            Ok(metadata) if metadata.is_file() => self.add_file(state, path, origin),
            Ok(_) => {}
            Err(e) => trace!(path = %path.display(), error = %e, "path vanished before admission"),
        }
    }

    fn add_child(&self, state: &mut NodeState, path: PathBuf) {
        if state.children.contains_key(&path) {
            return;
        }
        let rule = Arc::new(self.rule.for_dir(path.display().to_string()));
        match DirectoryNode::start(
            Arc::clone(&self.ctx),
            rule,
            self.level + 1,
            self.cancel.child_token(),
        ) {
            Ok(child) => {
                state.children.insert(path, child);
            }
            Err(e) => {
                warn!(rule = %self.ctx.rule_name, dir = %path.display(), error = %e, "failed to watch child directory");
            }
        }
    }

    fn add_file(&self, state: &mut NodeState, path: PathBuf, origin: Origin) {
        if state.files.contains_key(&path) {
            return;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return;
        };
        if !self.rule.matches_file(&name) || self.ctx.expiry.is_expired(&name) {
            trace!(path = %path.display(), "file does not match rule or is expired");
            return;
        }

        let positions = &self.ctx.positions;
        let position = match origin {
            Origin::Scan => positions.admit(&path),
            Origin::Event => positions.admit_fresh(&path),
        };

        match TrackedFile::open(
            &position,
            Arc::clone(&self.rule),
            &self.ctx.rule_name,
            Arc::clone(&self.ctx.sink),
            &self.ctx.config,
            self.cancel.child_token(),
        ) {
            Ok(file) => {
                state.files.insert(path, file);
                metrics::gauge!(m::WATCHER_FILES_TRACKED, m::LABEL_RULE => self.ctx.rule_name.clone())
                    .increment(1.0);
            }
            Err(e) => {
                warn!(rule = %self.ctx.rule_name, path = %path.display(), error = %e, "failed to follow file");
            }
        }
    }

    async fn handle_event(&self, state: &Mutex<NodeState>, event: Event) {
        trace!(dir = %self.path.display(), kind = ?event.kind, paths = ?event.paths, "fs event");
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                let mut guard = state.lock().await;
                for path in event.paths {
                    self.admit_path(&mut guard, path, Origin::Event);
                }
            }
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in event.paths {
                    self.remove_path(state, &path).await;
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to] = event.paths.as_slice() {
                    self.remove_path(state, from).await;
                    let mut guard = state.lock().await;
                    self.admit_path(&mut guard, to.clone(), Origin::Event);
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                for path in event.paths {
                    if path.exists() {
                        let mut guard = state.lock().await;
                        self.admit_path(&mut guard, path, Origin::Event);
                    } else {
                        self.remove_path(state, &path).await;
                    }
                }
            }
            EventKind::Modify(_) => {
                let guard = state.lock().await;
                for path in &event.paths {
                    if let Some(file) = guard.files.get(path) {
                        file.notify(FileChange::Modified);
                    }
                }
            }
            _ => {}
        }
    }

    /// 사라진 경로를 추적 파일 또는 자식 노드에서 제거합니다.
    async fn remove_path(&self, state: &Mutex<NodeState>, path: &Path) {
        let (file, child) = {
            let mut guard = state.lock().await;
            (guard.files.remove(path), guard.children.remove(path))
        };

        if let Some(file) = file {
            self.retire(file, Retirement::Removed).await;
        }
        if let Some(child) = child {
            let report = child.close().await;
            debug!(
                rule = %self.ctx.rule_name,
                dir = %path.display(),
                persisted = report.persisted,
                "child directory removed"
            );
        }
    }

    /// 추적을 끝내고 저장된 오프셋을 삭제합니다.
    async fn retire(&self, file: TrackedFile, reason: Retirement) {
        let path = file.path().to_path_buf();
        file.close().await;
        self.untrack();
        if reason == Retirement::Expired {
            metrics::counter!(m::WATCHER_FILES_EXPIRED_TOTAL, m::LABEL_RULE => self.ctx.rule_name.clone())
                .increment(1);
        }
        if let Err(e) = self.ctx.positions.remove(&path) {
            warn!(path = %path.display(), error = %e, "failed to delete last position");
        }
        debug!(rule = %self.ctx.rule_name, path = %path.display(), ?reason, "file retired");
    }

    async fn sweep_expired(&self, state: &Mutex<NodeState>) {
        let expired: Vec<TrackedFile> = {
            let mut guard = state.lock().await;
            let paths: Vec<PathBuf> = guard
                .files
                .keys()
                .filter(|path| {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy())
                        .unwrap_or_default();
                    self.ctx.expiry.is_expired(&name)
                })
                .cloned()
                .collect();
            paths
                .iter()
                .filter_map(|path| guard.files.remove(path))
                .collect()
        };

        for file in expired {
            self.retire(file, Retirement::Expired).await;
        }
    }

    /// 이 노드가 직접 추적하는 파일의 오프셋을 저장합니다.
    async fn flush_own(&self, state: &Mutex<NodeState>) -> FlushReport {
        let positions: Vec<LastPosition> = {
            let guard = state.lock().await;
            guard.files.values().map(TrackedFile::position).collect()
        };

        let mut report = FlushReport::default();
        for position in &positions {
            report.merge(self.persist(position));
        }
        report
    }

    fn persist(&self, position: &LastPosition) -> FlushReport {
        match self.ctx.positions.save(position) {
            Ok(()) => {
                metrics::counter!(m::WATCHER_OFFSETS_FLUSHED_TOTAL, m::LABEL_RULE => self.ctx.rule_name.clone())
                    .increment(1);
                FlushReport {
                    persisted: 1,
                    failures: 0,
                }
            }
            Err(e) => {
                warn!(path = %position.name, offset = position.offset, error = %e, "failed to persist last position");
                metrics::counter!(m::WATCHER_FLUSH_ERRORS_TOTAL, m::LABEL_RULE => self.ctx.rule_name.clone())
                    .increment(1);
                FlushReport {
                    persisted: 0,
                    failures: 1,
                }
            }
        }
    }

    fn untrack(&self) {
        metrics::gauge!(m::WATCHER_FILES_TRACKED, m::LABEL_RULE => self.ctx.rule_name.clone())
            .decrement(1.0);
    }
}
