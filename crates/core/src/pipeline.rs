//! 파이프라인 trait — 엔진 외부 협력자 정의

use std::future::Future;
use std::pin::Pin;

use crate::error::LogminerError;

/// `Send` 가능한 박스 퓨처
///
/// 재귀적인 비동기 종료처럼 `async fn`으로 표현할 수 없는 경우에 사용합니다.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 직렬화된 감사 레코드를 받는 싱크
///
/// 호출 한 번에 레코드 하나를 전달합니다. 엔진은 실패한 쓰기를 재시도하지 않습니다.
pub trait RecordSink: Send + Sync {
    /// 레코드를 기록합니다.
    ///
    /// `host`와 `date`는 로그 파일 이름에서 추출한 값입니다.
    fn write(&self, host: &str, date: &str, record: &[u8]) -> Result<(), LogminerError>;
}
