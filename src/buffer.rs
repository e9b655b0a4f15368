//! 수신 바이트 버퍼
//!
//! 소켓에서 들어온 바이트를 도착 순서대로 쌓아두고 앞에서부터 소비합니다.
//! 패킷 프레이밍은 이 버퍼 위에서 동작합니다.

use crate::error::{BinlogError, Result};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// 한 번의 읽기에서 확보하는 여유 공간
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// FIFO 바이트 버퍼
#[derive(Debug, Default)]
pub struct ByteBuffer {
    inner: BytesMut,
}

impl ByteBuffer {
    pub fn new() -> Self {
        ByteBuffer {
            inner: BytesMut::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// 버퍼 끝에 데이터 추가
    pub fn append(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// 앞에서부터 n 바이트 조회 (소비하지 않음)
    pub fn peek(&self, n: usize) -> Result<&[u8]> {
        self.check_available(n)?;
        Ok(&self.inner[..n])
    }

    /// 앞에서부터 n 바이트를 꺼내고 버퍼에서 제거
    pub fn take_front(&mut self, n: usize) -> Result<Bytes> {
        self.check_available(n)?;
        Ok(self.inner.split_to(n).freeze())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// 리더에서 한 번 읽어 버퍼 끝에 붙임. 읽은 바이트 수를 반환 (0 = 스트림 종료)
    pub async fn fill_from<R>(&mut self, reader: &mut R) -> std::io::Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.inner.reserve(READ_CHUNK_SIZE);
        reader.read_buf(&mut self.inner).await
    }

    fn check_available(&self, n: usize) -> Result<()> {
        if self.inner.len() < n {
            return Err(BinlogError::InsufficientData {
                requested: n,
                available: self.inner.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_take_front() {
        let mut buffer = ByteBuffer::new();
        buffer.append(&[1, 2, 3]);
        buffer.append(&[4, 5]);
        assert_eq!(buffer.len(), 5);

        assert_eq!(buffer.peek(2).unwrap(), &[1, 2]);
        assert_eq!(buffer.len(), 5);

        let front = buffer.take_front(4).unwrap();
        assert_eq!(&front[..], &[1, 2, 3, 4]);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.peek(1).unwrap(), &[5]);
    }

    #[test]
    fn test_insufficient_data_leaves_buffer_untouched() {
        let mut buffer = ByteBuffer::new();
        buffer.append(&[9, 8, 7]);

        match buffer.take_front(4) {
            Err(BinlogError::InsufficientData { requested, available }) => {
                assert_eq!(requested, 4);
                assert_eq!(available, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(buffer.peek(4).is_err());
        assert_eq!(buffer.len(), 3);
    }

    #[tokio::test]
    async fn test_fill_from_reader() {
        let mut reader = tokio_test::io::Builder::new()
            .read(&[1, 2])
            .read(&[3])
            .build();
        let mut buffer = ByteBuffer::new();

        assert_eq!(buffer.fill_from(&mut reader).await.unwrap(), 2);
        assert_eq!(buffer.fill_from(&mut reader).await.unwrap(), 1);
        assert_eq!(buffer.fill_from(&mut reader).await.unwrap(), 0);
        assert_eq!(buffer.peek(3).unwrap(), &[1, 2, 3]);
    }
}
