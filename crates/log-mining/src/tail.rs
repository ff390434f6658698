//! Tail 팔로워 -- 파일 하나에 추가되는 라인을 오프셋과 함께 스트리밍합니다.
//!
//! `tail -F`와 유사하게 동작합니다.
//!
//! # 상태 전이
//! ```text
//! Opening -> Following <-> WaitingForChange -> Closed
//!                 \_____________________________-> Failed (복구 불가 I/O 오류)
//! ```
//!
//! # 변경 감지
//! - 소유 디렉토리 노드가 전달하는 [`FileChange`] 신호
//! - 재확인 주기마다 경로를 다시 stat 하여 잘림(truncation)과 교체(inode 변경)를 감지
//!
//! 라인 채널 용량만큼만 앞서 읽으므로 소비자가 느리면 읽기 루프도 멈춥니다.

use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use logminer_core::metrics as m;

use crate::config::MiningConfig;
use crate::error::LogMiningError;
use crate::position::LastPosition;

/// 팔로워에 쌓일 수 있는 변경 신호 수
const CHANGE_QUEUE_CAPACITY: usize = 8;

/// 파일에서 읽은 완결된 라인 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// 줄바꿈을 제외한 라인 바이트
    pub bytes: Bytes,
    /// 이 라인의 줄바꿈 바로 다음 바이트 오프셋
    pub end_offset: u64,
    /// 읽기 세대. 잘림이나 재열기로 처음부터 다시 읽을 때마다 증가합니다.
    ///
    /// `end_offset`은 같은 세대 안에서만 비교할 수 있습니다.
    pub epoch: u64,
}

/// 팔로워 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerState {
    /// 파일을 여는 중
    Opening,
    /// 라인을 읽는 중
    Following,
    /// 파일 끝에서 변경을 기다리는 중
    WaitingForChange,
    /// 정상 종료
    Closed,
    /// 복구할 수 없는 I/O 오류로 종료
    Failed,
}

/// 외부에서 전달하는 파일 변경 신호
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    /// 쓰기 또는 속성 변경
    Modified,
    /// 경로에서 파일이 사라짐 (삭제 또는 이름 변경)
    Removed,
}

/// 실행 중인 팔로워 핸들
///
/// 핸들을 드롭하면 읽기 루프도 취소됩니다.
pub struct TailFollower {
    path: PathBuf,
    start_offset: u64,
    offset: Arc<AtomicU64>,
    epoch: Arc<AtomicU64>,
    state: watch::Receiver<FollowerState>,
    changes: mpsc::Sender<FileChange>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TailFollower {
    /// 파일을 열고 저장된 오프셋부터 읽는 팔로워를 시작합니다.
    ///
    /// 반환되는 수신 채널은 팔로워가 종료되면 닫힙니다.
    ///
    /// # Errors
    /// 파일을 열거나 오프셋으로 이동할 수 없으면 `Io` 오류를 반환합니다.
    pub fn spawn(
        position: &LastPosition,
        config: &MiningConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<Line>), LogMiningError> {
        let path = PathBuf::from(&position.name);
        let opened = open_at(&path, position.offset)?;
        if opened.offset != position.offset {
            debug!(
                path = %path.display(),
                stored = position.offset,
                "stored offset beyond end of file, starting from 0"
            );
        }

        let (line_tx, line_rx) = mpsc::channel(config.line_channel_capacity.max(1));
        let (change_tx, change_rx) = mpsc::channel(CHANGE_QUEUE_CAPACITY);
        let (state_tx, state_rx) = watch::channel(FollowerState::Opening);
        let offset = Arc::new(AtomicU64::new(opened.offset));
        let epoch = Arc::new(AtomicU64::new(0));

        let follow = FollowLoop {
            path: path.clone(),
            reopen: position.reopen,
            reader: Some(BufReader::with_capacity(
                config.read_buffer_size,
                File::from_std(opened.file),
            )),
            identity: Some(opened.identity),
            offset: opened.offset,
            shared_offset: Arc::clone(&offset),
            epoch: 0,
            shared_epoch: Arc::clone(&epoch),
            buffer_size: config.read_buffer_size,
            rewatch: config.rewatch_interval(),
            lines: line_tx,
            changes: change_rx,
            state: state_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(follow.run());

        Ok((
            Self {
                path,
                start_offset: opened.offset,
                offset,
                epoch,
                state: state_rx,
                changes: change_tx,
                cancel,
                task: Some(task),
            },
            line_rx,
        ))
    }

    /// 추적 중인 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 읽기를 시작한 오프셋 (세대 0)
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// 마지막으로 전달한 라인 다음의 바이트 오프셋
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// 현재 읽기 세대
    ///
    /// 새 세대의 라인이 전달되기 전에 증가합니다.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// 현재 상태
    pub fn state(&self) -> FollowerState {
        *self.state.borrow()
    }

    /// 상태 변경 구독 채널
    pub fn subscribe_state(&self) -> watch::Receiver<FollowerState> {
        self.state.clone()
    }

    /// 파일 변경 신호를 전달합니다. 대기열이 가득 차면 버려지고 재확인 주기에 감지됩니다.
    pub fn notify(&self, change: FileChange) {
        if let Err(TrySendError::Full(change)) = self.changes.try_send(change) {
            trace!(
                path = %self.path.display(),
                ?change,
                "change queue full, relying on rewatch"
            );
        }
    }

    /// 읽기 루프를 취소하고 종료를 기다립니다.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(path = %self.path.display(), error = %e, "tail follower task panicked");
            }
        }
    }
}

impl Drop for TailFollower {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// 파일 식별자 (같은 경로의 다른 파일을 구분)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
}

impl FileIdentity {
    fn of(metadata: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Self {
                dev: metadata.dev(),
                ino: metadata.ino(),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = metadata;
            Self {}
        }
    }
}

struct Opened {
    file: std::fs::File,
    offset: u64,
    identity: FileIdentity,
}

/// 파일을 열고 오프셋으로 이동합니다. 오프셋이 파일 크기보다 크면 처음부터 읽습니다.
fn open_at(path: &Path, offset: u64) -> io::Result<Opened> {
    let mut file = std::fs::File::open(path)?;
    let metadata = file.metadata()?;
    let offset = if offset > metadata.len() { 0 } else { offset };
    file.seek(SeekFrom::Start(offset))?;
    Ok(Opened {
        file,
        offset,
        identity: FileIdentity::of(&metadata),
    })
}

/// 대기 결과
enum Wake {
    Cancelled,
    Changed,
    Truncated,
    Gone,
}

/// 읽기 결과
enum Drain {
    /// 파일 끝까지 읽음
    Idle,
    /// 취소되었거나 수신 측이 닫힘
    Stopped,
}

enum Signal {
    Cancelled,
    Change(Option<FileChange>),
    Tick,
}

struct FollowLoop {
    path: PathBuf,
    reopen: bool,
    reader: Option<BufReader<File>>,
    identity: Option<FileIdentity>,
    offset: u64,
    shared_offset: Arc<AtomicU64>,
    epoch: u64,
    shared_epoch: Arc<AtomicU64>,
    buffer_size: usize,
    rewatch: Duration,
    lines: mpsc::Sender<Line>,
    changes: mpsc::Receiver<FileChange>,
    state: watch::Sender<FollowerState>,
    cancel: CancellationToken,
}

impl FollowLoop {
    async fn run(mut self) {
        debug!(path = %self.path.display(), offset = self.offset, "tail follower started");

        loop {
            if self.reader.is_none() {
                match self.reopen_file() {
                    Ok(true) => {}
                    Ok(false) => match self.wait().await {
                        Wake::Cancelled => break,
                        _ => continue,
                    },
                    Err(e) => {
                        error!(path = %self.path.display(), error = %e, "failed to reopen file");
                        self.state.send_replace(FollowerState::Failed);
                        return;
                    }
                }
            }

            self.state.send_replace(FollowerState::Following);
            match self.read_available().await {
                Ok(Drain::Idle) => {}
                Ok(Drain::Stopped) => break,
                Err(e) => {
                    error!(path = %self.path.display(), offset = self.offset, error = %e, "read failed");
                    self.state.send_replace(FollowerState::Failed);
                    return;
                }
            }

            self.state.send_replace(FollowerState::WaitingForChange);
            match self.wait().await {
                Wake::Cancelled => break,
                Wake::Changed => {}
                Wake::Truncated => {
                    if let Err(e) = self.rewind().await {
                        error!(path = %self.path.display(), error = %e, "failed to rewind truncated file");
                        self.state.send_replace(FollowerState::Failed);
                        return;
                    }
                }
                Wake::Gone => {
                    if !self.reopen {
                        debug!(path = %self.path.display(), "file gone, follower terminating");
                        break;
                    }
                    debug!(path = %self.path.display(), "file gone, waiting to reopen");
                    self.reader = None;
                    self.identity = None;
                }
            }
        }

        self.reader = None;
        self.state.send_replace(FollowerState::Closed);
        debug!(path = %self.path.display(), offset = self.offset, "tail follower stopped");
    }

    /// 완결된 라인을 파일 끝까지 읽어 전달합니다.
    async fn read_available(&mut self) -> io::Result<Drain> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Drain::Idle);
        };

        let mut line = Vec::with_capacity(self.buffer_size.min(1024));
        loop {
            if self.cancel.is_cancelled() {
                return Ok(Drain::Stopped);
            }

            // 미리 할당된 영역의 NUL 패딩
            loop {
                let buffered = reader.fill_buf().await?;
                let padding = buffered.iter().take_while(|b| **b == 0).count();
                if padding == 0 {
                    break;
                }
                reader.consume(padding);
                self.offset += padding as u64;
            }

            line.clear();
            let read = reader.read_until(b'\n', &mut line).await?;
            if read == 0 {
                return Ok(Drain::Idle);
            }
            if line.last() != Some(&b'\n') {
                // 줄바꿈 없는 조각은 다음 쓰기 후 처음부터 다시 읽음
                reader.seek(SeekFrom::Start(self.offset)).await?;
                return Ok(Drain::Idle);
            }

            self.offset += read as u64;
            line.pop();
            metrics::counter!(m::TAIL_LINES_READ_TOTAL).increment(1);

            let next = Line {
                bytes: Bytes::copy_from_slice(&line),
                end_offset: self.offset,
                epoch: self.epoch,
            };
            let delivered = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => false,
                sent = self.lines.send(next) => sent.is_ok(),
            };
            if !delivered {
                return Ok(Drain::Stopped);
            }
            self.shared_offset.store(self.offset, Ordering::Release);
        }
    }

    /// 변경 신호, 재확인 주기, 취소 중 가장 먼저 오는 것을 기다립니다.
    async fn wait(&mut self) -> Wake {
        let signal = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Signal::Cancelled,
            change = self.changes.recv() => Signal::Change(change),
            _ = tokio::time::sleep(self.rewatch) => Signal::Tick,
        };

        match signal {
            Signal::Cancelled | Signal::Change(None) => Wake::Cancelled,
            Signal::Change(Some(FileChange::Removed)) => Wake::Gone,
            Signal::Change(Some(FileChange::Modified)) | Signal::Tick => self.inspect().await,
        }
    }

    /// 경로를 다시 stat 하여 잘림과 교체를 확인합니다.
    async fn inspect(&self) -> Wake {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(_) => return Wake::Gone,
        };

        if self.identity.is_some_and(|identity| FileIdentity::of(&metadata) != identity) {
            debug!(path = %self.path.display(), "file replaced under the same name");
            return Wake::Gone;
        }

        if metadata.len() < self.offset {
            Wake::Truncated
        } else {
            Wake::Changed
        }
    }

    /// 잘린 파일을 처음부터 다시 읽도록 이동합니다.
    async fn rewind(&mut self) -> io::Result<()> {
        if let Some(reader) = self.reader.as_mut() {
            reader.seek(SeekFrom::Start(0)).await?;
        }
        debug!(path = %self.path.display(), previous = self.offset, "file truncated, rewinding");
        self.restart_epoch();
        metrics::counter!(m::TAIL_TRUNCATIONS_TOTAL).increment(1);
        Ok(())
    }

    /// 같은 경로의 파일을 처음부터 다시 엽니다. 아직 없으면 `false`입니다.
    fn reopen_file(&mut self) -> io::Result<bool> {
        let opened = match open_at(&self.path, 0) {
            Ok(opened) => opened,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        self.state.send_replace(FollowerState::Opening);
        self.reader = Some(BufReader::with_capacity(
            self.buffer_size,
            File::from_std(opened.file),
        ));
        self.identity = Some(opened.identity);
        self.restart_epoch();
        metrics::counter!(m::TAIL_REOPENS_TOTAL).increment(1);
        debug!(path = %self.path.display(), epoch = self.epoch, "file reopened");
        Ok(true)
    }

    /// 오프셋 0에서 새 세대를 시작합니다.
    fn restart_epoch(&mut self) {
        self.epoch += 1;
        self.offset = 0;
        self.shared_epoch.store(self.epoch, Ordering::Release);
        self.shared_offset.store(0, Ordering::Release);
    }
}
