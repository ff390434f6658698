//! 파일 만료 정책
//!
//! 파일 이름에 포함된 날짜 토큰(`YYYY-MM-DD`)이 오늘 날짜와 다르면 만료된 파일입니다.
//! 날짜 토큰이 없는 파일도 만료로 취급하여 추적하지 않습니다.

use chrono::{Local, NaiveDate};
use regex::Regex;

const DATE_TOKEN_PATTERN: &str = r"\d+-\d+-\d+";

/// 날짜 토큰 기반 만료 판정기
#[derive(Debug, Clone)]
pub struct ExpiryPolicy {
    token: Regex,
}

impl ExpiryPolicy {
    /// 날짜 토큰 정규식을 컴파일합니다.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token: Regex::new(DATE_TOKEN_PATTERN)?,
        })
    }

    /// 파일 이름의 날짜 토큰을 반환합니다.
    pub fn date_token<'a>(&self, name: &'a str) -> Option<&'a str> {
        self.token.find(name).map(|m| m.as_str())
    }

    /// 주어진 날짜 기준으로 만료 여부를 판정합니다.
    pub fn is_expired_on(&self, name: &str, today: NaiveDate) -> bool {
        let today = today.format("%Y-%m-%d").to_string();
        self.date_token(name) != Some(today.as_str())
    }

    /// 오늘(로컬 시간) 기준으로 만료 여부를 판정합니다.
    pub fn is_expired(&self, name: &str) -> bool {
        self.is_expired_on(name, Local::now().date_naive())
    }
}
