//! 추적 중인 파일 하나의 상태
//!
//! [`TrackedFile`]은 Tail 팔로워와 소비 태스크를 묶습니다.
//! 소비 태스크는 라인을 룰 엔진으로 변환하여 싱크에 전달한 뒤에야
//! 그 라인의 `(세대, 끝 오프셋)`을 커서에 기록하므로, 저장되는 오프셋은 처리한 위치를 앞서지 않습니다.
//! 싱크 쓰기는 블로킹 I/O이므로 `spawn_blocking`에서 수행합니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use logminer_core::metrics as m;
use logminer_core::pipeline::RecordSink;

use crate::config::MiningConfig;
use crate::error::LogMiningError;
use crate::position::{LastPosition, Whence};
use crate::rule::CompiledRule;
use crate::tail::{FileChange, Line, TailFollower};

/// 소비 태스크가 마지막으로 처리한 라인의 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    epoch: u64,
    offset: u64,
}

/// 추적 중인 파일
pub struct TrackedFile {
    path: PathBuf,
    reopen: bool,
    follower: TailFollower,
    consumed: Arc<Mutex<Cursor>>,
    consumer: Option<JoinHandle<()>>,
}

impl TrackedFile {
    /// 팔로워와 소비 태스크를 시작합니다.
    pub fn open(
        position: &LastPosition,
        rule: Arc<CompiledRule>,
        rule_name: &str,
        sink: Arc<dyn RecordSink>,
        config: &MiningConfig,
        cancel: CancellationToken,
    ) -> Result<Self, LogMiningError> {
        let (follower, lines) = TailFollower::spawn(position, config, cancel)?;
        let path = follower.path().to_path_buf();
        let consumed = Arc::new(Mutex::new(Cursor {
            epoch: 0,
            offset: follower.start_offset(),
        }));

        let consumer = Consumer {
            host: rule.host_of(&path),
            date: rule.date_of(&path),
            path: path.clone(),
            rule_name: rule_name.to_owned(),
            rule,
            sink,
            consumed: Arc::clone(&consumed),
        };
        let consumer = tokio::spawn(consumer.run(lines));

        debug!(
            rule = %rule_name,
            path = %path.display(),
            offset = follower.start_offset(),
            "file tracked"
        );

        Ok(Self {
            path,
            reopen: position.reopen,
            follower,
            consumed,
            consumer: Some(consumer),
        })
    }

    /// 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 파일 변경 신호를 팔로워에 전달합니다.
    pub fn notify(&self, change: FileChange) {
        self.follower.notify(change);
    }

    /// 처리가 끝난 위치의 스냅샷
    ///
    /// 팔로워가 잘림이나 재열기로 새 세대를 시작했는데 그 세대의 라인을 아직
    /// 처리하지 못했으면 0입니다.
    pub fn position(&self) -> LastPosition {
        let cursor = *self.consumed.lock().unwrap_or_else(PoisonError::into_inner);
        let offset = if cursor.epoch == self.follower.epoch() {
            cursor.offset
        } else {
            0
        };
        LastPosition {
            name: self.path.display().to_string(),
            offset,
            whence: if offset == 0 {
                Whence::Start
            } else {
                Whence::Current
            },
            reopen: self.reopen,
        }
    }

    /// 팔로워를 닫고 남은 라인을 처리한 뒤 최종 위치를 반환합니다.
    pub async fn close(mut self) -> LastPosition {
        self.follower.close().await;
        if let Some(consumer) = self.consumer.take() {
            if let Err(e) = consumer.await {
                warn!(path = %self.path.display(), error = %e, "line consumer panicked");
            }
        }
        self.position()
    }
}

/// 라인을 레코드로 변환하여 싱크에 넘기는 소비 태스크
struct Consumer {
    path: PathBuf,
    host: String,
    date: String,
    rule_name: String,
    rule: Arc<CompiledRule>,
    sink: Arc<dyn RecordSink>,
    consumed: Arc<Mutex<Cursor>>,
}

impl Consumer {
    async fn run(self, mut lines: mpsc::Receiver<Line>) {
        let consumer = Arc::new(self);
        while let Some(line) = lines.recv().await {
            let cursor = Cursor {
                epoch: line.epoch,
                offset: line.end_offset,
            };
            let worker = Arc::clone(&consumer);
            if let Err(e) = tokio::task::spawn_blocking(move || worker.handle(&line)).await {
                warn!(path = %consumer.path.display(), error = %e, "line handler panicked");
            }
            *consumer.consumed.lock().unwrap_or_else(PoisonError::into_inner) = cursor;
        }
    }

    fn handle(&self, line: &Line) {
        match self.deliver(line) {
            Ok(()) => {
                metrics::counter!(m::SINK_RECORDS_WRITTEN_TOTAL, m::LABEL_RULE => self.rule_name.clone())
                    .increment(1);
            }
            Err(e) if e.is_line_error() => {
                debug!(
                    rule = %self.rule_name,
                    path = %self.path.display(),
                    offset = line.end_offset,
                    error = %e,
                    "line skipped"
                );
                metrics::counter!(m::RULE_EXTRACT_ERRORS_TOTAL, m::LABEL_RULE => self.rule_name.clone())
                    .increment(1);
            }
            Err(e) => {
                warn!(
                    rule = %self.rule_name,
                    path = %self.path.display(),
                    offset = line.end_offset,
                    error = %e,
                    "record dropped"
                );
                metrics::counter!(m::SINK_WRITE_ERRORS_TOTAL, m::LABEL_RULE => self.rule_name.clone())
                    .increment(1);
            }
        }
    }

    fn deliver(&self, line: &Line) -> Result<(), LogMiningError> {
        let mut record = self.rule.extract(&line.bytes)?;
        record.host = self.host.clone();
        record.date = self.date.clone();
        metrics::counter!(m::RULE_RECORDS_EXTRACTED_TOTAL, m::LABEL_RULE => self.rule_name.clone())
            .increment(1);

        let encoded = serde_json::to_vec(&record)
            .map_err(|e| LogMiningError::Sink(format!("failed to encode record: {e}")))?;
        self.sink
            .write(&self.host, &self.date, &encoded)
            .map_err(|e| LogMiningError::Sink(e.to_string()))
    }
}
