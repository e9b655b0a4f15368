//! 복제 관련 명령 패킷 생성
//!
//! 모든 명령은 sequence 0 으로 보내므로 패킷 헤더를 4 바이트 little-endian 길이로
//! 기록합니다 (상위 바이트 = sequence id 0).

use byteorder::{LittleEndian, WriteBytesExt};
use bytes::Bytes;
use std::io::{self, Write};
use tracing::debug;

/// COM_QUERY 명령어 코드
pub const COM_QUERY: u8 = 0x03;

/// COM_BINLOG_DUMP 명령어 코드
pub const COM_BINLOG_DUMP: u8 = 0x12;

/// COM_REGISTER_SLAVE 명령어 코드
pub const COM_REGISTER_SLAVE: u8 = 0x15;

/// COM_BINLOG_DUMP_GTID 명령어 코드
pub const COM_BINLOG_DUMP_GTID: u8 = 0x1e;

/// COM_BINLOG_DUMP_GTID 의 binlog 파일명 길이 (빈 이름 자리)
const GTID_DUMP_NAME_SIZE: u32 = 3;

/// COM_BINLOG_DUMP_GTID 의 시작 위치
const GTID_DUMP_POSITION: u64 = 4;

/// 한 패킷에 담을 수 있는 payload 크기 상한 (이 크기부터는 여러 패킷으로 나눠야 함)
const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// 서버로 보낼 명령
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 텍스트 쿼리 (SET 변수 설정 등)
    Query(String),
    RegisterSlave {
        server_id: u32,
    },
    BinlogDump {
        server_id: u32,
        filename: String,
        position: u32,
    },
    BinlogDumpGtid {
        server_id: u32,
        /// 인코딩된 GTID 집합
        encoded_gtid: Bytes,
    },
}

impl Command {
    pub fn code(&self) -> u8 {
        match self {
            Command::Query(_) => COM_QUERY,
            Command::RegisterSlave { .. } => COM_REGISTER_SLAVE,
            Command::BinlogDump { .. } => COM_BINLOG_DUMP,
            Command::BinlogDumpGtid { .. } => COM_BINLOG_DUMP_GTID,
        }
    }

    /// 헤더를 포함한 전송용 바이트 생성
    pub fn encode(&self) -> io::Result<Bytes> {
        let body = self.encode_body()?;
        if body.len() + 1 >= MAX_PAYLOAD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("command payload too large: {} bytes", body.len() + 1),
            ));
        }

        let mut buffer = Vec::with_capacity(5 + body.len());
        buffer.write_u32::<LittleEndian>(body.len() as u32 + 1)?;
        buffer.write_u8(self.code())?;
        buffer.write_all(&body)?;

        debug!(
            "Encoded command 0x{:02x}: {} bytes on the wire",
            self.code(),
            buffer.len()
        );

        Ok(Bytes::from(buffer))
    }

    fn encode_body(&self) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::new();

        match self {
            Command::Query(sql) => {
                buffer.write_all(sql.as_bytes())?;
            }
            Command::RegisterSlave { server_id } => {
                buffer.write_u32::<LittleEndian>(*server_id)?;
                // host, user, password (길이 0)
                buffer.write_u8(0)?;
                buffer.write_u8(0)?;
                buffer.write_u8(0)?;
                // port
                buffer.write_u16::<LittleEndian>(0)?;
                // replication rank
                buffer.write_u32::<LittleEndian>(0)?;
                // master id
                buffer.write_u32::<LittleEndian>(0)?;
            }
            Command::BinlogDump {
                server_id,
                filename,
                position,
            } => {
                buffer.write_u32::<LittleEndian>(*position)?;
                // Flags (2 bytes)
                buffer.write_u16::<LittleEndian>(0)?;
                buffer.write_u32::<LittleEndian>(*server_id)?;
                // 파일명은 null 종료 없이 끝까지
                buffer.write_all(filename.as_bytes())?;
            }
            Command::BinlogDumpGtid {
                server_id,
                encoded_gtid,
            } => {
                // Flags (2 bytes)
                buffer.write_u16::<LittleEndian>(0)?;
                buffer.write_u32::<LittleEndian>(*server_id)?;
                buffer.write_u32::<LittleEndian>(GTID_DUMP_NAME_SIZE)?;
                buffer.write_all(&[0u8; GTID_DUMP_NAME_SIZE as usize])?;
                buffer.write_u64::<LittleEndian>(GTID_DUMP_POSITION)?;
                buffer.write_u32::<LittleEndian>(encoded_gtid.len() as u32)?;
                buffer.write_all(encoded_gtid)?;
            }
        }

        Ok(buffer)
    }
}
