//! 복제 연결 설정

use crate::error::{BinlogError, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// 복제 연결 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReplicationConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// 복제 클라이언트(slave) server id
    pub server_id: u32,
    /// 체크섬 사용 여부 강제. None 이면 원본 서버에 물어봄
    pub checksum: Option<bool>,
    pub binlog_file: Option<String>,
    pub binlog_position: Option<u32>,
    /// MySQL GTID 집합 (COM_BINLOG_DUMP_GTID)
    pub gtid: Option<String>,
    /// MariaDB slave_connect_state
    pub mariadb_gtid: Option<String>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        ReplicationConfig {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            server_id: 1,
            checksum: None,
            binlog_file: None,
            binlog_position: None,
            gtid: None,
            mariadb_gtid: None,
        }
    }
}

impl ReplicationConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        ReplicationConfig {
            host: host.into(),
            user: user.into(),
            ..Default::default()
        }
    }

    /// 환경 변수에서 설정 읽기 (없는 값은 기본값)
    pub fn from_env() -> Result<Self> {
        let defaults = ReplicationConfig::default();

        Ok(ReplicationConfig {
            host: env::var("DB_HOST").unwrap_or(defaults.host),
            port: parse_var("DB_PORT")?.unwrap_or(defaults.port),
            user: env::var("DB_USER").unwrap_or(defaults.user),
            password: env::var("DB_PASSWORD").unwrap_or(defaults.password),
            server_id: parse_var("SERVER_ID")?.unwrap_or(defaults.server_id),
            checksum: parse_var("BINLOG_CHECKSUM")?,
            binlog_file: env::var("BINLOG_FILE").ok(),
            binlog_position: parse_var("BINLOG_POSITION")?,
            gtid: env::var("GTID").ok(),
            mariadb_gtid: env::var("MARIADB_GTID").ok(),
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn gtid(&self) -> Option<&str> {
        non_empty(&self.gtid)
    }

    pub fn mariadb_gtid(&self) -> Option<&str> {
        non_empty(&self.mariadb_gtid)
    }

    /// 파일명과 위치가 모두 설정된 경우에만 시작 위치로 사용
    pub fn start_position(&self) -> Option<(&str, u32)> {
        match (non_empty(&self.binlog_file), self.binlog_position) {
            (Some(file), Some(position)) => Some((file, position)),
            _ => None,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .map(Some)
            .map_err(|_| BinlogError::Config(format!("Invalid value for {}: {}", name, value))),
        _ => Ok(None),
    }
}
