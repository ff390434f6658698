//! 로그 마이닝 에러 타입
//!
//! [`LogMiningError`]는 엔진 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<LogMiningError> for LogminerError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use logminer_core::error::{LogminerError, StoreError};

/// 로그 마이닝 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum LogMiningError {
    /// 빈 라인
    #[error("line is empty")]
    EmptyLine,

    /// 라인 유효성 패턴 불일치
    #[error("line does not match line pattern")]
    LineRejected,

    /// 라인 접두부 패턴 불일치
    #[error("line does not match line prefix pattern")]
    PrefixMismatch,

    /// 룰 텍스트 파싱 실패
    #[error("rule parse error: rule '{name}': {reason}")]
    RuleParse {
        /// 룰 이름
        name: String,
        /// 실패 사유
        reason: String,
    },

    /// 룰 유효성 검증 실패
    #[error("rule validation error: {field}: {reason}")]
    RuleValidation {
        /// 문제가 된 룰 필드
        field: String,
        /// 검증 실패 사유
        reason: String,
    },

    /// 룰 파일 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// 룰 파일 경로
        path: String,
        /// 로딩 실패 사유
        reason: String,
    },

    /// 파일시스템 감시 에러
    #[error("watch error: {path}: {reason}")]
    Watch {
        /// 감시 대상 경로
        path: String,
        /// 에러 사유
        reason: String,
    },

    /// 싱크 기록 실패
    #[error("sink error: {0}")]
    Sink(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 실행 중이지 않은 워커
    #[error("worker '{0}' is not running")]
    WorkerNotFound(String),

    /// 실행 중인 워커에 허용되지 않는 연산
    #[error("worker '{0}' is running")]
    WorkerRunning(String),

    /// 워커 정지 중 일부 오프셋 저장 실패
    #[error("worker '{name}' stopped with {failures} failed offset writes")]
    StopIncomplete {
        /// 룰 이름
        name: String,
        /// 실패한 저장 수
        failures: usize,
    },

    /// 저장소 에러
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl LogMiningError {
    /// 한 라인에 국한된 추출 에러인지 확인합니다.
    ///
    /// 이 에러들은 기록만 하고 파일 tail은 계속됩니다.
    pub fn is_line_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyLine | Self::LineRejected | Self::PrefixMismatch
        )
    }
}

impl From<notify::Error> for LogMiningError {
    fn from(err: notify::Error) -> Self {
        let path = err
            .paths
            .first()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        Self::Watch {
            path,
            reason: err.to_string(),
        }
    }
}

impl From<LogMiningError> for LogminerError {
    fn from(err: LogMiningError) -> Self {
        match err {
            LogMiningError::Store(e) => LogminerError::Store(e),
            LogMiningError::Io(e) => LogminerError::Io(e),
            other => LogminerError::Engine(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_errors_are_classified() {
        assert!(LogMiningError::EmptyLine.is_line_error());
        assert!(LogMiningError::LineRejected.is_line_error());
        assert!(LogMiningError::PrefixMismatch.is_line_error());
        assert!(!LogMiningError::Sink("down".to_owned()).is_line_error());
    }

    #[test]
    fn rule_parse_error_display() {
        let err = LogMiningError::RuleParse {
            name: "rule1".to_owned(),
            reason: "expected value".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("rule1"));
        assert!(msg.contains("expected value"));
    }

    #[test]
    fn store_error_keeps_its_kind_at_top_level() {
        let err = LogMiningError::Store(StoreError::Connection("refused".to_owned()));
        let top: LogminerError = err.into();
        assert!(matches!(top, LogminerError::Store(_)));
    }

    #[test]
    fn other_errors_become_engine_errors() {
        let top: LogminerError = LogMiningError::WorkerNotFound("rule1".to_owned()).into();
        assert!(matches!(top, LogminerError::Engine(_)));
        assert!(top.to_string().contains("rule1"));
    }

    #[test]
    fn stop_incomplete_display() {
        let err = LogMiningError::StopIncomplete {
            name: "rule1".to_owned(),
            failures: 2,
        };
        assert!(err.to_string().contains("2 failed"));
    }
}
