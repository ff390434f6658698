#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`rule`]: JSON 룰 파싱, 정규식 컴파일, 라인 -> 감사 레코드 추출
//! - [`tail`]: 파일 하나를 오프셋 단위로 따라 읽는 Tail 팔로워
//! - [`watcher`]: 디렉토리 트리 감시, 파일 추적/만료, 오프셋 플러시
//! - [`scheduler`]: 룰 이름과 실행 중인 감시 트리 매핑
//! - [`position`]: 파일별 Last Position 영속화
//! - [`catalog`]: 룰 텍스트와 활성화 여부 영속화
//! - [`sink`]: 저장소 기반 레코드 싱크
//! - [`config`]: 엔진 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입

pub mod catalog;
pub mod config;
pub mod error;
pub mod position;
pub mod rule;
pub mod scheduler;
pub mod sink;
pub mod tail;
pub mod watcher;

// --- 주요 타입 re-export ---

// 스케줄러
pub use scheduler::Scheduler;

// 설정
pub use config::{MiningConfig, MiningConfigBuilder};

// 에러
pub use error::LogMiningError;

// 룰 엔진
pub use rule::{CompiledRule, RuleLoader, RuleOptions};

// 감시
pub use tail::{FollowerState, Line, TailFollower};
pub use watcher::{DirectoryNode, FlushReport, WatchContext};

// 영속화
pub use catalog::{RuleCatalog, RuleRecord};
pub use position::{LastPosition, PositionStore, Whence};
pub use sink::StoreSink;
