//! MySQL/MariaDB Binlog 복제 프로토콜 클라이언트
//!
//! 서버에 slave 로 붙어서 binlog 이벤트 스트림을 받아옵니다.
//! 주요 기능:
//! - 패킷 프레이밍 (조각난 TCP 데이터에서도 손실/중복 없음)
//! - handshake, 인증, 체크섬 협상, slave 등록
//! - 파일/위치 또는 GTID 기반 덤프 요청
//! - 이벤트 원본 바이트를 도착 순서대로 전달

pub mod auth;
pub mod binlog_client;
pub mod buffer;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod gtid;
pub mod protocol;
pub mod source;

pub use binlog_client::{BinlogClient, BinlogStream};
pub use config::ReplicationConfig;
pub use connection::{BinlogConnection, ConnectionState, StreamStats};
pub use error::{BinlogError, Result};
pub use events::{EventHeader, EventSink, EventType, RawEvent};
pub use gtid::GtidSet;
pub use source::{BinlogPosition, MySqlSource, ReplicationSource, StaticSource};
