//! 에러 타입 — 도메인별 에러 정의

/// Logminer 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum LogminerError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 저장소 에러
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// 로그 마이닝 엔진 에러
    #[error("engine error: {0}")]
    Engine(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 저장소 에러
///
/// 룰 저장소와 영속 저장소가 공통으로 사용합니다.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 키가 존재하지 않음
    #[error("key '{key}' not found in {namespace}")]
    NotFound { namespace: String, key: String },

    /// 백엔드 연결 실패
    #[error("connection failed: {0}")]
    Connection(String),

    /// 직렬화/역직렬화 실패
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// 쿼리 실패
    #[error("query failed: {0}")]
    Query(String),

    /// 파일 백엔드 I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// 키 부재 에러인지 확인합니다.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
