//! MySQL 인증 처리
//!
//! Native password authentication 구현

use crate::error::Result;
use byteorder::{LittleEndian, WriteBytesExt};
use bytes::Bytes;
use std::io::Write;

/// Client capability flags
pub mod capabilities {
    pub const LONG_PASSWORD: u32 = 1;
    pub const LONG_FLAG: u32 = 4;
    pub const PROTOCOL_41: u32 = 512;
    pub const TRANSACTIONS: u32 = 8192;
    pub const SECURE_CONNECTION: u32 = 32768;

    /// 복제 연결에서 사용하는 기본 capability 조합
    pub const fn replication() -> u32 {
        LONG_PASSWORD | LONG_FLAG | TRANSACTIONS | PROTOCOL_41 | SECURE_CONNECTION
    }
}

/// 최대 패킷 크기 (2^24 - 1)
const MAX_PACKET_SIZE: u32 = 0x00FF_FFFF;

/// utf8_general_ci
const DEFAULT_CHARSET: u8 = 33;

/// 인증 응답 패킷의 sequence 번호 (greeting 다음)
const AUTH_SEQUENCE_ID: u8 = 1;

/// 인증 패킷 생성기
///
/// 반환 값은 패킷 헤더까지 포함한 전송용 바이트입니다.
pub trait AuthEncoder: Send + Sync {
    fn encode(&self, capabilities: u32, username: &str, password: &str, salt: &[u8])
        -> Result<Bytes>;
}

/// mysql_native_password 인증
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePasswordAuth;

impl AuthEncoder for NativePasswordAuth {
    fn encode(
        &self,
        capabilities: u32,
        username: &str,
        password: &str,
        salt: &[u8],
    ) -> Result<Bytes> {
        let body = create_handshake_response(capabilities, username, password, salt)?;

        let mut packet = Vec::with_capacity(4 + body.len());
        packet.write_u24::<LittleEndian>(body.len() as u32)?;
        packet.write_u8(AUTH_SEQUENCE_ID)?;
        packet.write_all(&body)?;

        Ok(Bytes::from(packet))
    }
}

/// Native password 인증 응답 생성
pub fn create_auth_response(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    // SHA1(password)
    let stage1 = sha1(password.as_bytes());

    // SHA1(SHA1(password))
    let stage2 = sha1(&stage1);

    // SHA1(scramble + SHA1(SHA1(password)))
    let mut combined = scramble.to_vec();
    combined.extend_from_slice(&stage2);
    let stage3 = sha1(&combined);

    // XOR(SHA1(password), SHA1(scramble + SHA1(SHA1(password))))
    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

fn sha1(data: &[u8]) -> Vec<u8> {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// 인증 패킷 본문 생성
fn create_handshake_response(
    capabilities: u32,
    username: &str,
    password: &str,
    scramble: &[u8],
) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();

    // Client capability flags (4 bytes)
    buffer.write_u32::<LittleEndian>(capabilities)?;

    // Max packet size (4 bytes)
    buffer.write_u32::<LittleEndian>(MAX_PACKET_SIZE)?;

    // Character set (1 byte)
    buffer.write_u8(DEFAULT_CHARSET)?;

    // Reserved (23 bytes of zeros)
    buffer.write_all(&[0u8; 23])?;

    // Username (null-terminated string)
    buffer.write_all(username.as_bytes())?;
    buffer.write_u8(0)?;

    // Authentication response (length-prefixed)
    let auth_response = create_auth_response(password, scramble);
    buffer.write_u8(auth_response.len() as u8)?;
    buffer.write_all(&auth_response)?;

    Ok(buffer)
}
