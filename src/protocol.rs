//! MySQL 프로토콜 패킷 처리
//!
//! - 4 바이트 헤더(3 bytes length + 1 byte sequence) 기준 패킷 프레이밍
//! - OK/EOF/ERR 상태 바이트 해석
//! - 서버 Greeting(handshake) 패킷 파싱

use crate::buffer::ByteBuffer;
use crate::error::{BinlogError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;
use std::io::Read;
use tracing::trace;

/// 패킷 헤더 크기 (3 bytes length + 1 byte sequence)
pub const PACKET_HEADER_SIZE: usize = 4;

/// OK 패킷 헤더
pub const OK_HEADER: u8 = 0x00;

/// EOF 패킷 헤더 (auth fast path 성공 응답도 포함)
pub const EOF_HEADER: u8 = 0xFE;

/// ERR 패킷 헤더
pub const ERR_HEADER: u8 = 0xFF;

/// ERR 패킷에서 메시지가 시작하는 위치 (status 1 + code 2 + marker 1 + sql state 5)
const ERROR_MESSAGE_OFFSET: usize = 9;

/// 프레이밍이 끝난 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// 헤더의 sequence 번호 (검증하지 않음)
    pub sequence_id: u8,
    pub payload: Bytes,
}

/// 버퍼에서 패킷 하나를 꺼냄
///
/// 헤더와 본문이 모두 도착한 경우에만 `4 + L` 바이트를 소비합니다.
/// 데이터가 부족하면 버퍼를 건드리지 않고 `None`을 반환하므로
/// 다음 데이터가 도착한 뒤 그대로 다시 호출하면 됩니다.
pub fn try_extract_packet(buffer: &mut ByteBuffer) -> Option<Packet> {
    let (length, sequence_id) = match buffer.peek(PACKET_HEADER_SIZE) {
        Ok(header) => (
            u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize,
            header[3],
        ),
        Err(_) => return None,
    };

    if buffer.len() < PACKET_HEADER_SIZE + length {
        trace!(
            "Incomplete packet: need {} bytes, have {}",
            PACKET_HEADER_SIZE + length,
            buffer.len()
        );
        return None;
    }

    let mut frame = buffer.take_front(PACKET_HEADER_SIZE + length).ok()?;
    let payload = frame.split_off(PACKET_HEADER_SIZE);

    Some(Packet {
        sequence_id,
        payload,
    })
}

/// 상태 바이트 해석 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error { code: u16, message: String },
}

impl Status {
    /// 패킷 첫 바이트로 상태 판별
    ///
    /// 0x00, 0xFE 는 성공으로 취급하고 그 외에는 ERR 패킷 레이아웃
    /// `[status][code 2 bytes LE][6 bytes skip][message...]` 로 읽습니다.
    pub fn of(payload: &[u8]) -> Status {
        match payload.first() {
            None | Some(&OK_HEADER) | Some(&EOF_HEADER) => Status::Ok,
            Some(_) => {
                let code = match payload.get(1..3) {
                    Some(bytes) => u16::from_le_bytes([bytes[0], bytes[1]]),
                    None => 0,
                };
                let message = payload
                    .get(ERROR_MESSAGE_OFFSET..)
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                    .unwrap_or_default();
                Status::Error { code, message }
            }
        }
    }
}

/// 상태 검사를 거친 패킷 반환
///
/// `check_status`가 false면 그대로 돌려줍니다 (handshake 패킷의 첫 바이트는 프로토콜 버전).
pub fn interpret(packet: Packet, check_status: bool) -> Result<Packet> {
    if !check_status {
        return Ok(packet);
    }

    match Status::of(&packet.payload) {
        Status::Ok => Ok(packet),
        Status::Error { code, message } => Err(BinlogError::Server { code, message }),
    }
}

/// EOF 패킷 확인 (0xFE, 패킷 길이 < 9)
pub fn is_eof_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == EOF_HEADER && data.len() < 9
}

/// Greeting 패킷 파싱
#[derive(Debug, Clone)]
pub struct HandshakePacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// 인증에 사용할 salt (scramble)
    pub salt: Vec<u8>,
    pub server_capabilities: u32,
    pub server_collation: u8,
    pub server_status: u16,
    pub auth_plugin_name: Option<String>,
}

impl HandshakePacket {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(data);

        // Protocol version (1 byte)
        let protocol_version = ReadBytesExt::read_u8(&mut cursor)
            .map_err(|e| protocol_error("protocol version", e))?;

        // Server version (null-terminated string)
        let server_version = read_null_terminated_string(&mut cursor)?;

        // Connection ID (4 bytes)
        let connection_id = ReadBytesExt::read_u32::<LittleEndian>(&mut cursor)
            .map_err(|e| protocol_error("connection id", e))?;

        // Auth plugin data part 1 (8 bytes)
        let mut salt = vec![0u8; 8];
        Read::read_exact(&mut cursor, &mut salt).map_err(|e| protocol_error("salt part 1", e))?;

        // Filler (1 byte, always 0x00)
        ReadBytesExt::read_u8(&mut cursor).map_err(|e| protocol_error("filler", e))?;

        // Capability flags (lower 2 bytes)
        let capabilities_lower = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(|e| protocol_error("capabilities", e))?;

        // Character set (1 byte)
        let server_collation =
            ReadBytesExt::read_u8(&mut cursor).map_err(|e| protocol_error("collation", e))?;

        // Status flags (2 bytes)
        let server_status = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(|e| protocol_error("status", e))?;

        // Capability flags (upper 2 bytes)
        let capabilities_upper = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(|e| protocol_error("capabilities upper", e))?;

        let server_capabilities = (capabilities_upper as u32) << 16 | capabilities_lower as u32;

        // Length of auth plugin data (1 byte)
        let auth_data_len = ReadBytesExt::read_u8(&mut cursor)
            .map_err(|e| protocol_error("auth data length", e))?;

        // Reserved (10 bytes)
        let mut reserved = [0u8; 10];
        Read::read_exact(&mut cursor, &mut reserved).map_err(|e| protocol_error("reserved", e))?;

        // Auth plugin data part 2 (at least 13 bytes, 마지막 null byte 제외)
        let part2_len = std::cmp::max(13, auth_data_len.saturating_sub(8)) as usize;
        let mut salt_part2 = vec![0u8; part2_len];
        Read::read_exact(&mut cursor, &mut salt_part2)
            .map_err(|e| protocol_error("salt part 2", e))?;
        salt.extend_from_slice(&salt_part2[..part2_len - 1]);

        let auth_plugin_name = if (cursor.position() as usize) < data.len() {
            Some(read_null_terminated_string(&mut cursor)?)
        } else {
            None
        };

        Ok(HandshakePacket {
            protocol_version,
            server_version,
            connection_id,
            salt,
            server_capabilities,
            server_collation,
            server_status,
            auth_plugin_name,
        })
    }
}

fn protocol_error(field: &str, err: std::io::Error) -> BinlogError {
    BinlogError::Protocol(format!("Failed to read {}: {}", field, err))
}

/// null로 끝나는 문자열 읽기 (null 없이 끝나면 남은 바이트 전체)
fn read_null_terminated_string<R: Read>(reader: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        match ReadBytesExt::read_u8(reader) {
            Ok(0) => break,
            Ok(byte) => bytes.push(byte),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && !bytes.is_empty() => break,
            Err(e) => return Err(protocol_error("string byte", e)),
        }
    }
    String::from_utf8(bytes)
        .map_err(|e| BinlogError::Protocol(format!("Invalid UTF-8 in string: {}", e)))
}
