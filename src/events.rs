//! 스트리밍 단계에서 전달되는 binlog 이벤트
//!
//! 이벤트 본문은 해석하지 않고 원본 바이트 그대로 넘깁니다.
//! 로그 출력을 위해 19 바이트 v4 헤더만 읽을 수 있습니다.

use crate::error::{BinlogError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tokio::sync::mpsc;

const EVENT_HEADER_SIZE: usize = 19;

/// 체크섬(CRC32) 크기
const CHECKSUM_SIZE: usize = 4;

/// MySQL Binlog 이벤트 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventType {
    /// 알 수 없는 이벤트
    Unknown = 0,
    /// 쿼리 이벤트 (DDL, BEGIN)
    QueryEvent = 2,
    /// 로테이션 이벤트 (새 binlog 파일)
    RotateEvent = 4,
    /// 포맷 설명 이벤트
    FormatDescriptionEvent = 15,
    /// 트랜잭션 커밋
    XidEvent = 16,
    /// 테이블 맵 이벤트 (스키마 정보)
    TableMapEvent = 19,
    /// 하트비트
    HeartbeatEvent = 27,
    /// WRITE_ROWS 이벤트 (INSERT)
    WriteRowsEvent = 30,
    /// UPDATE_ROWS 이벤트 (UPDATE)
    UpdateRowsEvent = 31,
    /// DELETE_ROWS 이벤트 (DELETE)
    DeleteRowsEvent = 32,
    /// GTID 이벤트 (Global Transaction ID)
    GtidEvent = 33,
    /// 익명 GTID 이벤트
    AnonymousGtidEvent = 34,
    /// 이전 GTID 집합
    PreviousGtidsEvent = 35,
    /// MariaDB GTID 이벤트
    MariadbGtidEvent = 162,
}

impl EventType {
    pub fn from_u8(val: u8) -> Self {
        match val {
            2 => EventType::QueryEvent,
            4 => EventType::RotateEvent,
            15 => EventType::FormatDescriptionEvent,
            16 => EventType::XidEvent,
            19 => EventType::TableMapEvent,
            27 => EventType::HeartbeatEvent,
            30 => EventType::WriteRowsEvent,
            31 => EventType::UpdateRowsEvent,
            32 => EventType::DeleteRowsEvent,
            33 => EventType::GtidEvent,
            34 => EventType::AnonymousGtidEvent,
            35 => EventType::PreviousGtidsEvent,
            162 => EventType::MariadbGtidEvent,
            _ => EventType::Unknown,
        }
    }
}

/// Binlog 이벤트 헤더
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// 이벤트 타임스탬프 (초 단위)
    pub timestamp: u32,
    pub event_type: EventType,
    /// 원래 타입 코드
    pub type_code: u8,
    /// 이벤트를 기록한 MySQL 서버 ID
    pub server_id: u32,
    pub event_length: u32,
    /// 다음 이벤트 위치
    pub next_pos: u32,
    pub flags: u16,
}

impl EventHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < EVENT_HEADER_SIZE {
            return Err(BinlogError::Protocol(format!(
                "Invalid event header: {} bytes",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);

        let timestamp = cursor.read_u32::<LittleEndian>()?;
        let type_code = cursor.read_u8()?;
        let server_id = cursor.read_u32::<LittleEndian>()?;
        let event_length = cursor.read_u32::<LittleEndian>()?;
        let next_pos = cursor.read_u32::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;

        Ok(EventHeader {
            timestamp,
            event_type: EventType::from_u8(type_code),
            type_code,
            server_id,
            event_length,
            next_pos,
            flags,
        })
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp as i64, 0)
    }
}

/// 상태 검사를 통과한 binlog 스트림 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// 패킷 본문 전체 (선두 OK 바이트 포함)
    pub payload: Bytes,
    /// 체크섬 협상 여부
    pub checksum: bool,
}

impl RawEvent {
    pub fn new(payload: Bytes, checksum: bool) -> Self {
        RawEvent { payload, checksum }
    }

    /// OK 바이트와 (협상된 경우) 끝의 CRC32를 뺀 이벤트 바이트
    pub fn event_data(&self) -> Bytes {
        let mut data = self.payload.slice(self.payload.len().min(1)..);
        if self.checksum && data.len() >= EVENT_HEADER_SIZE + CHECKSUM_SIZE {
            data.truncate(data.len() - CHECKSUM_SIZE);
        }
        data
    }

    pub fn header(&self) -> Result<EventHeader> {
        EventHeader::parse(&self.event_data())
    }
}

/// 이벤트 수신자
///
/// 스트리밍 중 패킷 하나마다 도착 순서대로 한 번씩 호출됩니다.
pub trait EventSink {
    fn on_event(&mut self, event: RawEvent) -> Result<()>;
}

impl EventSink for mpsc::UnboundedSender<RawEvent> {
    fn on_event(&mut self, event: RawEvent) -> Result<()> {
        self.send(event).map_err(|_| BinlogError::ChannelClosed)
    }
}

impl EventSink for Vec<RawEvent> {
    fn on_event(&mut self, event: RawEvent) -> Result<()> {
        self.push(event);
        Ok(())
    }
}
