//! 복제 원본(master) 정보 조회
//!
//! 덤프 시작 위치(binlog 파일 + 위치)와 체크섬 사용 여부를 알려주는 쪽입니다.
//! 실제 서버는 mysql_async 로 SQL 조회를 하고, 테스트나 위치가 고정된 경우에는
//! `StaticSource`를 씁니다.

use crate::config::ReplicationConfig;
use crate::error::{BinlogError, Result};
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tracing::{debug, warn};

/// Binlog 파일 위치 정보
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinlogPosition {
    /// 바이너리 로그 파일명 (e.g., "mysql-bin.000001")
    pub filename: String,
    /// 바이트 위치
    pub position: u32,
}

impl BinlogPosition {
    pub fn new(filename: impl Into<String>, position: u32) -> Self {
        BinlogPosition {
            filename: filename.into(),
            position,
        }
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.position)
    }
}

/// 복제 원본 조회 인터페이스
pub trait ReplicationSource {
    /// 현재 master binlog 위치
    fn master_status(&mut self) -> impl Future<Output = Result<BinlogPosition>> + Send;

    /// binlog 체크섬 사용 여부
    fn is_checksum_enabled(&mut self) -> impl Future<Output = Result<bool>> + Send;
}

/// 미리 정해 둔 값을 돌려주는 원본
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    pub position: Option<BinlogPosition>,
    pub checksum: bool,
}

impl StaticSource {
    pub fn new(position: BinlogPosition, checksum: bool) -> Self {
        StaticSource {
            position: Some(position),
            checksum,
        }
    }
}

impl ReplicationSource for StaticSource {
    async fn master_status(&mut self) -> Result<BinlogPosition> {
        self.position
            .clone()
            .ok_or_else(|| BinlogError::Query("No master status available".to_string()))
    }

    async fn is_checksum_enabled(&mut self) -> Result<bool> {
        Ok(self.checksum)
    }
}

/// mysql_async 로 조회하는 원본
pub struct MySqlSource {
    conn: Conn,
}

impl MySqlSource {
    pub async fn connect(config: &ReplicationConfig) -> Result<Self> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()));

        let conn = Conn::new(opts)
            .await
            .map_err(|e| BinlogError::Connect(format!("Failed to connect to MySQL: {}", e)))?;

        Ok(MySqlSource { conn })
    }

    pub async fn close(self) -> Result<()> {
        self.conn
            .disconnect()
            .await
            .map_err(|e| BinlogError::Query(format!("Failed to disconnect: {}", e)))
    }

    async fn query_status_row(&mut self) -> Result<Row> {
        // MySQL 8.4 부터 SHOW MASTER STATUS 가 제거됨
        match self
            .conn
            .query_first::<Row, _>("SHOW BINARY LOG STATUS")
            .await
        {
            Ok(Some(row)) => return Ok(row),
            Ok(None) => {}
            Err(e) => debug!("SHOW BINARY LOG STATUS failed, falling back: {}", e),
        }

        self.conn
            .query_first::<Row, _>("SHOW MASTER STATUS")
            .await
            .map_err(|e| BinlogError::Query(format!("Failed to query binlog status: {}", e)))?
            .ok_or_else(|| BinlogError::Query("No binlog status available".to_string()))
    }
}

impl ReplicationSource for MySqlSource {
    async fn master_status(&mut self) -> Result<BinlogPosition> {
        let row = self.query_status_row().await?;

        let filename: String = match row.get_opt("File") {
            Some(Ok(file)) => file,
            _ => return Err(BinlogError::Query("Missing File column".to_string())),
        };
        let position: u64 = match row.get_opt("Position") {
            Some(Ok(position)) => position,
            _ => return Err(BinlogError::Query("Missing Position column".to_string())),
        };
        let position = u32::try_from(position)
            .map_err(|_| BinlogError::Query(format!("Position out of range: {}", position)))?;

        Ok(BinlogPosition::new(filename, position))
    }

    async fn is_checksum_enabled(&mut self) -> Result<bool> {
        let result: Option<(String, String)> = self
            .conn
            .query_first("SHOW GLOBAL VARIABLES LIKE 'BINLOG_CHECKSUM'")
            .await
            .map_err(|e| BinlogError::Query(format!("Failed to query binlog_checksum: {}", e)))?;

        match result {
            Some((_, value)) => Ok(!value.is_empty() && !value.eq_ignore_ascii_case("NONE")),
            None => {
                warn!("binlog_checksum variable not found, assuming no checksum");
                Ok(false)
            }
        }
    }
}
