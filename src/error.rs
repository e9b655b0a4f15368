//! Binlog 복제 클라이언트 에러 타입

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BinlogError {
    #[error("호스트 이름을 해석할 수 없습니다: {0}")]
    Resolution(String),

    #[error("MySQL 연결 에러: {0}")]
    Connect(String),

    #[error("전송 계층 에러: {0}")]
    Transport(String),

    /// 패킷 일부만 수신된 상태에서 스트림이 끝남
    #[error("원격 서버에 의해 연결이 끊어졌습니다 (버퍼에 {buffered} 바이트 남음)")]
    Disconnected { buffered: usize },

    #[error("인증 실패 ({code}): {message}")]
    Authentication { code: u16, message: String },

    #[error("서버 에러 ({code}): {message}")]
    Server { code: u16, message: String },

    #[error("데이터 부족: {requested} 바이트 요청, {available} 바이트 보유")]
    InsufficientData { requested: usize, available: usize },

    #[error("프로토콜 에러: {0}")]
    Protocol(String),

    #[error("GTID 처리 에러: {0}")]
    Gtid(String),

    #[error("쿼리 실행 에러: {0}")]
    Query(String),

    #[error("설정 에러: {0}")]
    Config(String),

    #[error("잘못된 연결 상태: {0}")]
    InvalidState(String),

    #[error("이벤트 처리 에러: {0}")]
    Handler(String),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("채널이 닫혔습니다")]
    ChannelClosed,
}

impl BinlogError {
    /// 네트워크 계층(해석, 연결, 전송) 에러인지 여부
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            BinlogError::Resolution(_)
                | BinlogError::Connect(_)
                | BinlogError::Transport(_)
                | BinlogError::Disconnected { .. }
        )
    }

    /// 서버가 돌려준 에러 코드와 메시지
    pub fn server_error(&self) -> Option<(u16, &str)> {
        match self {
            BinlogError::Authentication { code, message } | BinlogError::Server { code, message } => {
                Some((*code, message.as_str()))
            }
            _ => None,
        }
    }
}

impl From<io::Error> for BinlogError {
    fn from(err: io::Error) -> Self {
        BinlogError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BinlogError>;
