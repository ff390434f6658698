//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 엔진은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logminer_`
//! - 구성요소: `tail_`, `watcher_`, `scheduler_`, `rule_`, `sink_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(logminer_core::metrics::TAIL_LINES_READ_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 룰 이름 레이블 키
pub const LABEL_RULE: &str = "rule";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Tail Follower 메트릭 ───────────────────────────────────────────

/// Tail: 읽은 전체 라인 수 (counter)
pub const TAIL_LINES_READ_TOTAL: &str = "logminer_tail_lines_read_total";

/// Tail: 감지된 truncation 수 (counter)
pub const TAIL_TRUNCATIONS_TOTAL: &str = "logminer_tail_truncations_total";

/// Tail: 파일 재열기 수 (counter)
pub const TAIL_REOPENS_TOTAL: &str = "logminer_tail_reopens_total";

// ─── Rule Engine 메트릭 ─────────────────────────────────────────────

/// Rule: 추출 성공 레코드 수 (counter)
pub const RULE_RECORDS_EXTRACTED_TOTAL: &str = "logminer_rule_records_extracted_total";

/// Rule: 추출 실패 라인 수 (counter)
pub const RULE_EXTRACT_ERRORS_TOTAL: &str = "logminer_rule_extract_errors_total";

// ─── Sink 메트릭 ────────────────────────────────────────────────────

/// Sink: 기록된 레코드 수 (counter)
pub const SINK_RECORDS_WRITTEN_TOTAL: &str = "logminer_sink_records_written_total";

/// Sink: 기록 실패 수 (counter)
pub const SINK_WRITE_ERRORS_TOTAL: &str = "logminer_sink_write_errors_total";

// ─── Directory Watcher 메트릭 ───────────────────────────────────────

/// Watcher: 추적 중인 파일 수 (gauge)
pub const WATCHER_FILES_TRACKED: &str = "logminer_watcher_files_tracked";

/// Watcher: 만료로 제외된 파일 수 (counter)
pub const WATCHER_FILES_EXPIRED_TOTAL: &str = "logminer_watcher_files_expired_total";

/// Watcher: 저장된 오프셋 수 (counter)
pub const WATCHER_OFFSETS_FLUSHED_TOTAL: &str = "logminer_watcher_offsets_flushed_total";

/// Watcher: 오프셋 저장 실패 수 (counter)
pub const WATCHER_FLUSH_ERRORS_TOTAL: &str = "logminer_watcher_flush_errors_total";

// ─── Scheduler 메트릭 ───────────────────────────────────────────────

/// Scheduler: 실행 중인 워커 수 (gauge)
pub const SCHEDULER_WORKERS_RUNNING: &str = "logminer_scheduler_workers_running";

/// Scheduler: 워커 생명주기 전환 수 (counter, label: result)
pub const SCHEDULER_TRANSITIONS_TOTAL: &str = "logminer_scheduler_transitions_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "logminer_daemon_uptime_seconds";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `logminer-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    // Tail Follower
    describe_counter!(
        TAIL_LINES_READ_TOTAL,
        "Total number of complete lines read from tailed files"
    );
    describe_counter!(
        TAIL_TRUNCATIONS_TOTAL,
        "Total number of truncations detected on tailed files"
    );
    describe_counter!(
        TAIL_REOPENS_TOTAL,
        "Total number of tailed files reopened after rotation"
    );

    // Rule Engine
    describe_counter!(
        RULE_RECORDS_EXTRACTED_TOTAL,
        "Total number of audit records extracted from lines"
    );
    describe_counter!(
        RULE_EXTRACT_ERRORS_TOTAL,
        "Total number of lines rejected by line or prefix patterns"
    );

    // Sink
    describe_counter!(
        SINK_RECORDS_WRITTEN_TOTAL,
        "Total number of audit records handed to the sink"
    );
    describe_counter!(
        SINK_WRITE_ERRORS_TOTAL,
        "Total number of failed sink writes"
    );

    // Directory Watcher
    describe_gauge!(
        WATCHER_FILES_TRACKED,
        "Number of files currently tailed across all workers"
    );
    describe_counter!(
        WATCHER_FILES_EXPIRED_TOTAL,
        "Total number of files retired by the expiry sweep"
    );
    describe_counter!(
        WATCHER_OFFSETS_FLUSHED_TOTAL,
        "Total number of last-position records written to the store"
    );
    describe_counter!(
        WATCHER_FLUSH_ERRORS_TOTAL,
        "Total number of failed last-position writes"
    );

    // Scheduler
    describe_gauge!(
        SCHEDULER_WORKERS_RUNNING,
        "Number of rules with a running directory watcher"
    );
    describe_counter!(
        SCHEDULER_TRANSITIONS_TOTAL,
        "Worker start and stop transitions by result"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Seconds since the daemon started");
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[&str] = &[
        TAIL_LINES_READ_TOTAL,
        TAIL_TRUNCATIONS_TOTAL,
        TAIL_REOPENS_TOTAL,
        RULE_RECORDS_EXTRACTED_TOTAL,
        RULE_EXTRACT_ERRORS_TOTAL,
        SINK_RECORDS_WRITTEN_TOTAL,
        SINK_WRITE_ERRORS_TOTAL,
        WATCHER_FILES_TRACKED,
        WATCHER_FILES_EXPIRED_TOTAL,
        WATCHER_OFFSETS_FLUSHED_TOTAL,
        WATCHER_FLUSH_ERRORS_TOTAL,
        SCHEDULER_WORKERS_RUNNING,
        SCHEDULER_TRANSITIONS_TOTAL,
        DAEMON_UPTIME_SECONDS,
    ];

    #[test]
    fn metric_names_share_prefix() {
        for name in ALL {
            assert!(name.starts_with("logminer_"), "{name}");
        }
    }

    #[test]
    fn metric_names_are_unique() {
        let mut names = ALL.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL.len());
    }

    #[test]
    fn describe_all_without_recorder_does_not_panic() {
        describe_all();
    }
}
