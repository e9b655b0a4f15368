//! MySQL Binlog 클라이언트
//!
//! 협상은 호출한 태스크에서 끝내고, 스트리밍은 백그라운드 태스크로 돌려
//! 이벤트를 채널로 넘겨줍니다.

use crate::config::ReplicationConfig;
use crate::connection::{BinlogConnection, ConnectionState, StreamStats};
use crate::error::Result;
use crate::events::RawEvent;
use crate::source::ReplicationSource;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 실행 중인 binlog 스트림
pub struct BinlogStream {
    /// 도착 순서대로 전달되는 이벤트
    pub events: mpsc::UnboundedReceiver<RawEvent>,
    /// 연결 상태
    pub state: watch::Receiver<ConnectionState>,
    /// 스트리밍 태스크 (종료 시 결과)
    pub task: JoinHandle<Result<StreamStats>>,
}

/// Binlog 클라이언트
pub struct BinlogClient {
    config: ReplicationConfig,
}

impl BinlogClient {
    /// 새 Binlog 클라이언트 생성
    pub fn new(config: ReplicationConfig) -> Self {
        BinlogClient { config }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// 서버에 연결하고 Binlog 스트리밍 시작
    pub async fn start_streaming<S: ReplicationSource>(&self, source: &mut S) -> Result<BinlogStream> {
        info!(
            "Connecting to {}:{} as server_id {}",
            self.config.host, self.config.port, self.config.server_id
        );
        let connection = BinlogConnection::<TcpStream>::connect(self.config.clone()).await?;
        Self::spawn(connection, source).await
    }

    /// 이미 만든 연결로 협상 후 스트리밍 태스크 시작
    pub async fn spawn<T, S>(mut connection: BinlogConnection<T>, source: &mut S) -> Result<BinlogStream>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        S: ReplicationSource,
    {
        connection.establish(source).await?;

        let (mut tx, rx) = mpsc::unbounded_channel();
        let state = connection.subscribe_state();

        let task = tokio::spawn(async move {
            let result = connection.stream(&mut tx).await;
            match &result {
                Ok(stats) => info!("Binlog streaming ended. Total events received: {}", stats.events),
                Err(e) => error!("Binlog streaming error: {}", e),
            }
            result
        });

        Ok(BinlogStream {
            events: rx,
            state,
            task,
        })
    }
}
