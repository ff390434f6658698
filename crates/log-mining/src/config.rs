//! 로그 마이닝 엔진 설정
//!
//! [`MiningConfig`]는 core의 [`EngineConfig`](logminer_core::config::EngineConfig)를
//! 기반으로 엔진 전용 설정을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use logminer_core::config::LogminerConfig;
//! use logminer_log_mining::config::MiningConfig;
//!
//! let core_config = LogminerConfig::default();
//! let config = MiningConfig::from_core(&core_config.engine);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use logminer_core::store::Namespace;

use crate::error::LogMiningError;

/// 로그 마이닝 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    /// 오프셋 플러시 주기 (밀리초)
    pub flush_interval_ms: u64,
    /// 만료 파일 정리 주기 (밀리초)
    pub expiry_sweep_interval_ms: u64,
    /// 이벤트 누락 대비 재확인 주기 (초)
    pub rewatch_interval_secs: u64,
    /// 파일 읽기 버퍼 크기 (바이트)
    pub read_buffer_size: usize,
    /// 팔로워 라인 채널 용량
    pub line_channel_capacity: usize,
    /// 오프셋 저장 데이터베이스
    pub library_db: String,
    /// 감사 레코드 저장 데이터베이스
    pub record_db: String,
    /// 룰 레코드 저장 데이터베이스
    pub rule_db: String,
    /// 룰 레코드 컬렉션
    pub rule_collection: String,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self::from_core(&logminer_core::config::EngineConfig::default())
    }
}

impl MiningConfig {
    /// core의 `EngineConfig`에서 엔진 설정을 생성합니다.
    pub fn from_core(core: &logminer_core::config::EngineConfig) -> Self {
        Self {
            flush_interval_ms: core.flush_interval_ms,
            expiry_sweep_interval_ms: core.expiry_sweep_interval_ms,
            rewatch_interval_secs: core.rewatch_interval_secs,
            read_buffer_size: core.read_buffer_size,
            line_channel_capacity: core.line_channel_capacity,
            library_db: core.library_db.clone(),
            record_db: core.record_db.clone(),
            rule_db: core.rule_db.clone(),
            rule_collection: core.rule_collection.clone(),
        }
    }

    /// 오프셋 플러시 주기
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// 만료 파일 정리 주기
    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_sweep_interval_ms)
    }

    /// 재확인 주기
    pub fn rewatch_interval(&self) -> Duration {
        Duration::from_secs(self.rewatch_interval_secs)
    }

    /// 룰의 오프셋 네임스페이스 (컬렉션 = 룰 이름)
    pub fn position_namespace(&self, rule: &str) -> Namespace {
        Namespace::new(self.library_db.as_str(), rule)
    }

    /// 룰 레코드 네임스페이스
    pub fn rule_namespace(&self) -> Namespace {
        Namespace::new(self.rule_db.as_str(), self.rule_collection.as_str())
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogMiningError> {
        const MAX_READ_BUFFER_SIZE: usize = 16 * 1024 * 1024;
        const MAX_INTERVAL_MS: u64 = 3_600_000; // 1 hour

        if self.flush_interval_ms == 0 || self.flush_interval_ms > MAX_INTERVAL_MS {
            return Err(config_err(
                "flush_interval_ms",
                format!("must be 1-{MAX_INTERVAL_MS}"),
            ));
        }

        if self.expiry_sweep_interval_ms == 0 || self.expiry_sweep_interval_ms > MAX_INTERVAL_MS {
            return Err(config_err(
                "expiry_sweep_interval_ms",
                format!("must be 1-{MAX_INTERVAL_MS}"),
            ));
        }

        if self.rewatch_interval_secs == 0 {
            return Err(config_err(
                "rewatch_interval_secs",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.read_buffer_size == 0 || self.read_buffer_size > MAX_READ_BUFFER_SIZE {
            return Err(config_err(
                "read_buffer_size",
                format!("must be 1-{MAX_READ_BUFFER_SIZE}"),
            ));
        }

        if self.line_channel_capacity == 0 {
            return Err(config_err(
                "line_channel_capacity",
                "must be greater than 0".to_owned(),
            ));
        }

        for (field, value) in [
            ("library_db", &self.library_db),
            ("record_db", &self.record_db),
            ("rule_db", &self.rule_db),
            ("rule_collection", &self.rule_collection),
        ] {
            if value.trim().is_empty() {
                return Err(config_err(field, "must not be empty".to_owned()));
            }
        }

        Ok(())
    }
}

fn config_err(field: &str, reason: String) -> LogMiningError {
    LogMiningError::Config {
        field: field.to_owned(),
        reason,
    }
}

/// 엔진 설정 빌더
#[derive(Default)]
pub struct MiningConfigBuilder {
    config: MiningConfig,
}

impl MiningConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 오프셋 플러시 주기를 설정합니다.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval_ms = duration_ms(interval);
        self
    }

    /// 만료 파일 정리 주기를 설정합니다.
    pub fn expiry_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.expiry_sweep_interval_ms = duration_ms(interval);
        self
    }

    /// 재확인 주기(초)를 설정합니다.
    pub fn rewatch_interval_secs(mut self, secs: u64) -> Self {
        self.config.rewatch_interval_secs = secs;
        self
    }

    /// 읽기 버퍼 크기를 설정합니다.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// 라인 채널 용량을 설정합니다.
    pub fn line_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.line_channel_capacity = capacity;
        self
    }

    /// 오프셋 저장 데이터베이스를 설정합니다.
    pub fn library_db(mut self, db: impl Into<String>) -> Self {
        self.config.library_db = db.into();
        self
    }

    /// 감사 레코드 데이터베이스를 설정합니다.
    pub fn record_db(mut self, db: impl Into<String>) -> Self {
        self.config.record_db = db.into();
        self
    }

    /// 룰 레코드 네임스페이스를 설정합니다.
    pub fn rule_namespace(mut self, db: impl Into<String>, collection: impl Into<String>) -> Self {
        self.config.rule_db = db.into();
        self.config.rule_collection = collection.into();
        self
    }

    /// 설정을 빌드합니다.
    pub fn build(self) -> Result<MiningConfig, LogMiningError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn duration_ms(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}
