//! 복제 연결 상태 머신
//!
//! 연결 → handshake → 인증 → 체크섬 협상 → slave 등록 → 덤프 요청 → 스트리밍
//! 순서로 진행합니다. 협상 단계에서는 항상 명령 하나를 보내고 응답 하나를 받은 뒤에
//! 다음 명령을 보냅니다.

use crate::auth::{self, AuthEncoder, NativePasswordAuth};
use crate::buffer::ByteBuffer;
use crate::command::Command;
use crate::config::ReplicationConfig;
use crate::error::{BinlogError, Result};
use crate::events::{EventSink, RawEvent};
use crate::gtid::{GtidEncoder, MySqlGtidEncoder};
use crate::protocol::{self, HandshakePacket, Packet, Status};
use crate::source::{BinlogPosition, ReplicationSource};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const CHECKSUM_QUERY: &str = "SET @master_binlog_checksum=@@global.binlog_checksum";

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingHandshake,
    Authenticating,
    NegotiatingChecksum,
    RegisteringSlave,
    RequestingDump,
    Streaming,
    Errored,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 버퍼 비우기 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drain {
    /// 완성된 패킷이 더 없음
    Idle,
    /// 수신자 실패로 이번 주기 전달 중단
    Paused,
    /// EOF 패킷 수신
    Eof,
}

/// 스트리밍 결과 요약
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// 수신자에게 전달한 이벤트 수
    pub events: u64,
    /// 수신자가 처리에 실패한 이벤트 수
    pub failed: u64,
}

/// Binlog 복제 연결
///
/// 전송 계층 `T`와 수신 버퍼를 단독으로 소유합니다.
pub struct BinlogConnection<T> {
    config: ReplicationConfig,
    transport: Option<T>,
    buffer: ByteBuffer,
    state: watch::Sender<ConnectionState>,
    checksum: bool,
    server: Option<HandshakePacket>,
    auth: Arc<dyn AuthEncoder>,
    gtid: Arc<dyn GtidEncoder>,
}

impl BinlogConnection<TcpStream> {
    /// 설정된 호스트로 TCP 연결
    pub async fn connect(config: ReplicationConfig) -> Result<Self> {
        let mut connection = BinlogConnection::new(config);
        connection.open().await?;
        Ok(connection)
    }

    pub async fn open(&mut self) -> Result<()> {
        if self.state() != ConnectionState::Disconnected {
            return Err(BinlogError::InvalidState(format!(
                "cannot connect from {}",
                self.state()
            )));
        }
        self.transition(ConnectionState::Connecting);

        let result = async {
            let addr = resolve(&self.config.host, self.config.port).await?;
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|e| BinlogError::Connect(format!("Failed to connect to {}: {}", addr, e)))?;
            stream.set_nodelay(true)?;
            Ok::<_, BinlogError>(stream)
        }
        .await;

        match result {
            Ok(stream) => {
                info!("Connected to MySQL at {}:{}", self.config.host, self.config.port);
                self.transport = Some(stream);
                self.transition(ConnectionState::AwaitingHandshake);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }
}

/// 호스트 이름 해석 (IP 리터럴이면 그대로 사용)
async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| BinlogError::Resolution(format!("{}: {}", host, e)))?
        .next()
        .ok_or_else(|| BinlogError::Resolution(host.to_string()))
}

impl<T> BinlogConnection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(config: ReplicationConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        BinlogConnection {
            config,
            transport: None,
            buffer: ByteBuffer::new(),
            state,
            checksum: false,
            server: None,
            auth: Arc::new(NativePasswordAuth),
            gtid: Arc::new(MySqlGtidEncoder),
        }
    }

    /// 이미 열린 전송 계층으로 시작 (handshake 대기 상태)
    pub fn with_transport(config: ReplicationConfig, transport: T) -> Self {
        let mut connection = BinlogConnection::new(config);
        connection.transport = Some(transport);
        connection.transition(ConnectionState::AwaitingHandshake);
        connection
    }

    pub fn with_auth_encoder(mut self, auth: Arc<dyn AuthEncoder>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_gtid_encoder(mut self, gtid: Arc<dyn GtidEncoder>) -> Self {
        self.gtid = gtid;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// 상태 변경 구독
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// 체크섬 협상 결과
    pub fn checksum(&self) -> bool {
        self.checksum
    }

    /// handshake 로 받은 서버 정보
    pub fn server_info(&self) -> Option<&HandshakePacket> {
        self.server.as_ref()
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// 스트리밍 직전까지 협상 진행
    ///
    /// 실패하면 연결은 `Errored` 상태가 되어 더 이상 사용할 수 없습니다.
    pub async fn establish<S: ReplicationSource>(&mut self, source: &mut S) -> Result<()> {
        if self.state() != ConnectionState::AwaitingHandshake {
            return Err(BinlogError::InvalidState(format!(
                "cannot negotiate from {}",
                self.state()
            )));
        }

        match self.negotiate(source).await {
            Ok(()) => {
                self.transition(ConnectionState::Streaming);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// 협상 후 스트리밍까지 한 번에 실행
    pub async fn run<S, E>(&mut self, source: &mut S, sink: &mut E) -> Result<StreamStats>
    where
        S: ReplicationSource,
        E: EventSink,
    {
        self.establish(source).await?;
        self.stream(sink).await
    }

    async fn negotiate<S: ReplicationSource>(&mut self, source: &mut S) -> Result<()> {
        self.read_handshake().await?;

        self.transition(ConnectionState::Authenticating);
        self.authenticate().await?;

        self.transition(ConnectionState::NegotiatingChecksum);
        self.negotiate_checksum(source).await?;

        self.transition(ConnectionState::RegisteringSlave);
        self.execute_command(Command::RegisterSlave {
            server_id: self.config.server_id,
        })
        .await?;
        info!("Registered as slave (server_id={})", self.config.server_id);

        self.transition(ConnectionState::RequestingDump);
        self.request_dump(source).await
    }

    async fn read_handshake(&mut self) -> Result<()> {
        let packet = self.read_packet(false).await?;
        let handshake = HandshakePacket::parse(&packet.payload)?;

        info!(
            "MySQL Server version: {}, connection id: {}",
            handshake.server_version, handshake.connection_id
        );
        self.server = Some(handshake);
        Ok(())
    }

    async fn authenticate(&mut self) -> Result<()> {
        let salt = self
            .server
            .as_ref()
            .map(|server| server.salt.clone())
            .ok_or_else(|| BinlogError::InvalidState("handshake not received".to_string()))?;

        let payload = self.auth.encode(
            auth::capabilities::replication(),
            &self.config.user,
            &self.config.password,
            &salt,
        )?;
        self.write(&payload).await?;

        match self.read_packet(true).await {
            Ok(_) => {
                info!("Authentication successful");
                Ok(())
            }
            Err(BinlogError::Server { code, message }) => {
                Err(BinlogError::Authentication { code, message })
            }
            Err(e) => Err(e),
        }
    }

    async fn negotiate_checksum<S: ReplicationSource>(&mut self, source: &mut S) -> Result<()> {
        let checksum = match self.config.checksum {
            Some(checksum) => checksum,
            None => source.is_checksum_enabled().await?,
        };

        if checksum {
            self.execute(CHECKSUM_QUERY).await?;
        }

        self.checksum = checksum;
        info!("Binlog checksum: {}", if checksum { "enabled" } else { "disabled" });
        Ok(())
    }

    async fn request_dump<S: ReplicationSource>(&mut self, source: &mut S) -> Result<()> {
        if let Some(gtid) = self.config.gtid().map(str::to_string) {
            let encoded = self.gtid.encode(&gtid)?;
            debug!("Encoded GTID set: {} bytes", encoded.length);

            self.execute_command(Command::BinlogDumpGtid {
                server_id: self.config.server_id,
                encoded_gtid: encoded.bytes,
            })
            .await?;
            info!("Sent COM_BINLOG_DUMP_GTID: gtid={}", gtid);
            return Ok(());
        }

        if let Some(state) = self.config.mariadb_gtid().map(str::to_string) {
            self.execute("SET @mariadb_slave_capability = 4").await?;
            self.execute(&format!("SET @slave_connect_state = '{}'", state))
                .await?;
            self.execute("SET @slave_gtid_strict_mode = 0").await?;
            self.execute("SET @slave_gtid_ignore_duplicates = 0").await?;
            debug!("MariaDB GTID connect state set: {}", state);
        }

        let start = match self.config.start_position() {
            Some((file, position)) => BinlogPosition::new(file, position),
            None => source.master_status().await?,
        };

        self.execute_command(Command::BinlogDump {
            server_id: self.config.server_id,
            filename: start.filename.clone(),
            position: start.position,
        })
        .await?;
        info!("Sent COM_BINLOG_DUMP: {}", start);
        Ok(())
    }

    /// 텍스트 명령 실행 후 OK 대기
    async fn execute(&mut self, sql: &str) -> Result<()> {
        debug!("Executing: {}", sql);
        self.execute_command(Command::Query(sql.to_string())).await
    }

    async fn execute_command(&mut self, command: Command) -> Result<()> {
        let frame = command
            .encode()
            .map_err(|e| BinlogError::Protocol(format!("Failed to encode command: {}", e)))?;
        self.write(&frame).await?;
        self.read_packet(true).await?;
        Ok(())
    }

    /// 스트리밍 루프
    ///
    /// 데이터가 도착할 때마다 버퍼에 완성된 패킷을 모두 꺼내 수신자에게 넘깁니다.
    /// 수신자가 실패하면 그 패킷은 소비된 것으로 보고 이번 읽기 주기의 전달만 멈춥니다.
    /// 서버가 연결을 닫으면 버퍼에 남은 완성된 패킷을 먼저 모두 전달합니다.
    pub async fn stream<E: EventSink>(&mut self, sink: &mut E) -> Result<StreamStats> {
        if self.state() != ConnectionState::Streaming {
            return Err(BinlogError::InvalidState(format!(
                "cannot stream from {}",
                self.state()
            )));
        }

        let mut stats = StreamStats::default();
        loop {
            match self.drain(sink, &mut stats) {
                Ok(Drain::Eof) => return Ok(self.finish(stats).await),
                Ok(_) => {}
                Err(e) => return Err(self.fail(e)),
            }

            match self.fill_buffer().await {
                Ok(0) => return self.drain_remaining(sink, stats).await,
                Ok(_) => {}
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    /// 서버가 연결을 닫은 뒤 버퍼에 남은 패킷 처리
    async fn drain_remaining<E: EventSink>(
        &mut self,
        sink: &mut E,
        mut stats: StreamStats,
    ) -> Result<StreamStats> {
        loop {
            match self.drain(sink, &mut stats) {
                Ok(Drain::Eof) => return Ok(self.finish(stats).await),
                Ok(Drain::Paused) => {}
                Ok(Drain::Idle) => {
                    let err = self.closed_error();
                    return Err(self.fail(err));
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    async fn finish(&mut self, stats: StreamStats) -> StreamStats {
        info!("Received EOF packet - stream ended ({} events)", stats.events);
        self.close().await;
        stats
    }

    /// 버퍼에 있는 완성된 패킷 전달
    fn drain<E: EventSink>(&mut self, sink: &mut E, stats: &mut StreamStats) -> Result<Drain> {
        while let Some(packet) = protocol::try_extract_packet(&mut self.buffer) {
            if protocol::is_eof_packet(&packet.payload) {
                return Ok(Drain::Eof);
            }

            if let Status::Error { code, message } = Status::of(&packet.payload) {
                return Err(BinlogError::Server { code, message });
            }

            stats.events += 1;
            match sink.on_event(RawEvent::new(packet.payload, self.checksum)) {
                Ok(()) => {}
                Err(BinlogError::ChannelClosed) => return Err(BinlogError::ChannelClosed),
                Err(e) => {
                    stats.failed += 1;
                    warn!("Event handler failed on event #{}: {}", stats.events, e);
                    return Ok(Drain::Paused);
                }
            }
        }
        Ok(Drain::Idle)
    }

    /// 전송 계층 종료 (여러 번 호출해도 안전)
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.shutdown().await {
                debug!("Error while shutting down transport: {}", e);
            }
            info!("Binlog connection closed");
        }
        if self.state() != ConnectionState::Closed {
            self.transition(ConnectionState::Closed);
        }
    }

    /// 패킷 하나 읽기 (필요한 만큼 전송 계층에서 더 읽음)
    async fn read_packet(&mut self, check_status: bool) -> Result<Packet> {
        loop {
            if let Some(packet) = protocol::try_extract_packet(&mut self.buffer) {
                debug!(
                    "Received packet: seq={}, {} bytes",
                    packet.sequence_id,
                    packet.payload.len()
                );
                return protocol::interpret(packet, check_status);
            }
            if self.fill_buffer().await? == 0 {
                return Err(self.closed_error());
            }
        }
    }

    /// 한 번 읽어서 버퍼에 추가. 서버가 연결을 닫았으면 0
    async fn fill_buffer(&mut self) -> Result<usize> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(BinlogError::InvalidState("transport is closed".to_string()));
        };
        self.buffer
            .fill_from(transport)
            .await
            .map_err(|e| BinlogError::Transport(e.to_string()))
    }

    /// 연결 종료 시점의 에러 (패킷 경계에서 끊겼는지, 패킷 중간에서 끊겼는지)
    fn closed_error(&self) -> BinlogError {
        if self.buffer.is_empty() {
            BinlogError::Transport("connection closed by server".to_string())
        } else {
            BinlogError::Disconnected {
                buffered: self.buffer.len(),
            }
        }
    }

    async fn write(&mut self, data: &Bytes) -> Result<()> {
        let transport = self.transport_mut()?;
        transport.write_all(data).await?;
        transport.flush().await?;
        Ok(())
    }

    fn transport_mut(&mut self) -> Result<&mut T> {
        self.transport
            .as_mut()
            .ok_or_else(|| BinlogError::InvalidState("transport is closed".to_string()))
    }

    fn transition(&mut self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        debug!("Connection state: {} -> {}", previous, next);
    }

    /// 에러 상태로 전환하고 전송 계층을 버림
    fn fail(&mut self, err: BinlogError) -> BinlogError {
        error!("Binlog connection failed in {}: {}", self.state(), err);
        self.transport = None;
        self.transition(ConnectionState::Errored);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::event_packet;
    use crate::gtid::EncodedGtidSet;
    use crate::protocol::tests::{frame, greeting_payload, TEST_SALT};
    use crate::source::StaticSource;
    use tokio_test::io::{Builder, Mock};

    const OK_PACKET: &[u8] = &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];

    fn test_config() -> ReplicationConfig {
        ReplicationConfig {
            user: "repl".to_string(),
            password: "secret".to_string(),
            server_id: 42,
            checksum: Some(false),
            binlog_file: Some("mysql-bin.000001".to_string()),
            binlog_position: Some(4),
            ..ReplicationConfig::new("127.0.0.1", "repl")
        }
    }

    fn auth_frame() -> Bytes {
        NativePasswordAuth
            .encode(auth::capabilities::replication(), "repl", "secret", &TEST_SALT)
            .unwrap()
    }

    fn command_frame(command: Command) -> Bytes {
        command.encode().unwrap()
    }

    fn query_frame(sql: &str) -> Bytes {
        command_frame(Command::Query(sql.to_string()))
    }

    fn error_packet(code: u16, message: &str) -> Vec<u8> {
        let mut data = vec![0xFF];
        data.extend_from_slice(&code.to_le_bytes());
        data.extend_from_slice(b"#HY000");
        data.extend_from_slice(message.as_bytes());
        data
    }

    /// handshake 부터 인증 OK 까지
    fn negotiated(builder: &mut Builder) -> &mut Builder {
        builder
            .read(&frame(0, &greeting_payload()))
            .write(&auth_frame())
            .read(&frame(2, OK_PACKET))
    }

    fn registered(builder: &mut Builder) -> &mut Builder {
        negotiated(builder)
            .write(&command_frame(Command::RegisterSlave { server_id: 42 }))
            .read(&frame(1, OK_PACKET))
    }

    fn dump_by_position(builder: &mut Builder) -> &mut Builder {
        registered(builder)
            .write(&command_frame(Command::BinlogDump {
                server_id: 42,
                filename: "mysql-bin.000001".to_string(),
                position: 4,
            }))
            .read(&frame(1, OK_PACKET))
    }

    fn connection(mock: Mock) -> BinlogConnection<Mock> {
        BinlogConnection::with_transport(test_config(), mock)
    }

    #[tokio::test]
    async fn test_streams_fragmented_events() {
        let first = event_packet(2, b"BEGIN");
        let second = event_packet(30, b"row image bytes");

        let mut wire = frame(2, &first);
        wire.extend(frame(3, &second));
        let (a, rest) = wire.split_at(7);
        let (b, c) = rest.split_at(first.len() + 4 - 7 + 5);

        let mock = dump_by_position(&mut Builder::new())
            .read(a)
            .read(b)
            .read(c)
            .build();

        let mut conn = connection(mock);
        let mut source = StaticSource::default();
        conn.establish(&mut source).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Streaming);
        assert!(!conn.checksum());
        assert_eq!(conn.server_info().unwrap().server_version, "8.0.36");

        let mut events: Vec<RawEvent> = Vec::new();
        let err = conn.stream(&mut events).await.unwrap_err();

        assert!(matches!(err, BinlogError::Transport(_)));
        assert_eq!(conn.state(), ConnectionState::Errored);
        assert_eq!(events.len(), 2);
        assert_eq!(&events[0].payload[..], &first[..]);
        assert_eq!(&events[1].payload[..], &second[..]);
    }

    #[tokio::test]
    async fn test_eof_packet_closes_stream() {
        let event = event_packet(4, b"mysql-bin.000002");
        let mut wire = frame(2, &event);
        wire.extend(frame(3, &[0xFE, 0x00, 0x00, 0x02, 0x00]));

        let mock = dump_by_position(&mut Builder::new()).read(&wire).build();

        let mut conn = connection(mock);
        let mut events: Vec<RawEvent> = Vec::new();
        let stats = conn
            .run(&mut StaticSource::default(), &mut events)
            .await
            .unwrap();

        assert_eq!(stats, StreamStats { events: 1, failed: 0 });
        assert_eq!(events.len(), 1);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_authentication_failure() {
        let mock = Builder::new()
            .read(&frame(0, &greeting_payload()))
            .write(&auth_frame())
            .read(&frame(2, &error_packet(1045, "Access denied for user 'repl'")))
            .build();

        let mut conn = connection(mock);
        let err = conn
            .establish(&mut StaticSource::default())
            .await
            .unwrap_err();

        match err {
            BinlogError::Authentication { code, message } => {
                assert_eq!(code, 1045);
                assert_eq!(message, "Access denied for user 'repl'");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(conn.state(), ConnectionState::Errored);
    }

    #[tokio::test]
    async fn test_checksum_negotiation_from_source() {
        let mock = negotiated(&mut Builder::new())
            .write(&query_frame(CHECKSUM_QUERY))
            .read(&frame(1, OK_PACKET))
            .write(&command_frame(Command::RegisterSlave { server_id: 42 }))
            .read(&frame(1, OK_PACKET))
            .write(&command_frame(Command::BinlogDump {
                server_id: 42,
                filename: "mysql-bin.000009".to_string(),
                position: 1200,
            }))
            .read(&frame(1, OK_PACKET))
            .build();

        let config = ReplicationConfig {
            checksum: None,
            binlog_file: None,
            binlog_position: None,
            ..test_config()
        };
        let mut conn = BinlogConnection::with_transport(config, mock);
        let mut source = StaticSource::new(BinlogPosition::new("mysql-bin.000009", 1200), true);
        conn.establish(&mut source).await.unwrap();

        assert!(conn.checksum());
        assert_eq!(conn.state(), ConnectionState::Streaming);
    }

    #[tokio::test]
    async fn test_mariadb_connect_state_sequence() {
        let mock = registered(&mut Builder::new())
            .write(&query_frame("SET @mariadb_slave_capability = 4"))
            .read(&frame(1, OK_PACKET))
            .write(&query_frame("SET @slave_connect_state = '0-1-100'"))
            .read(&frame(1, OK_PACKET))
            .write(&query_frame("SET @slave_gtid_strict_mode = 0"))
            .read(&frame(1, OK_PACKET))
            .write(&query_frame("SET @slave_gtid_ignore_duplicates = 0"))
            .read(&frame(1, OK_PACKET))
            .write(&command_frame(Command::BinlogDump {
                server_id: 42,
                filename: "mysql-bin.000001".to_string(),
                position: 4,
            }))
            .read(&frame(1, OK_PACKET))
            .build();

        let config = ReplicationConfig {
            mariadb_gtid: Some("0-1-100".to_string()),
            ..test_config()
        };
        let mut conn = BinlogConnection::with_transport(config, mock);
        conn.establish(&mut StaticSource::default()).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Streaming);
    }

    #[tokio::test]
    async fn test_dump_by_gtid() {
        let gtid = "3e11fa47-71ca-11e1-9e33-c80aa9429562:1-5";
        let encoded = MySqlGtidEncoder.encode(gtid).unwrap();

        let mock = registered(&mut Builder::new())
            .write(&command_frame(Command::BinlogDumpGtid {
                server_id: 42,
                encoded_gtid: encoded.bytes,
            }))
            .read(&frame(1, OK_PACKET))
            .build();

        let config = ReplicationConfig {
            gtid: Some(gtid.to_string()),
            ..test_config()
        };
        let mut conn = BinlogConnection::with_transport(config, mock);
        conn.establish(&mut StaticSource::default()).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Streaming);
    }

    #[tokio::test]
    async fn test_dump_rejected_by_server() {
        let mock = registered(&mut Builder::new())
            .write(&command_frame(Command::BinlogDump {
                server_id: 42,
                filename: "mysql-bin.000001".to_string(),
                position: 4,
            }))
            .read(&frame(1, &error_packet(1236, "Could not find first log file name")))
            .build();

        let mut conn = connection(mock);
        let err = conn
            .establish(&mut StaticSource::default())
            .await
            .unwrap_err();

        assert_eq!(
            err.server_error(),
            Some((1236, "Could not find first log file name"))
        );
        assert!(!err.is_network());
        assert_eq!(conn.state(), ConnectionState::Errored);
    }

    #[tokio::test]
    async fn test_transport_error_during_handshake() {
        let mock = Builder::new()
            .read(&frame(0, &greeting_payload())[..10])
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset by peer",
            ))
            .build();

        let mut conn = connection(mock);
        let mut source = StaticSource::default();
        let err = conn.establish(&mut source).await.unwrap_err();

        assert!(matches!(err, BinlogError::Transport(_)));
        assert_eq!(conn.state(), ConnectionState::Errored);

        // 에러 이후에는 아무 동작도 하지 않음
        assert!(matches!(
            conn.establish(&mut source).await,
            Err(BinlogError::InvalidState(_))
        ));
        let mut events: Vec<RawEvent> = Vec::new();
        assert!(matches!(
            conn.stream(&mut events).await,
            Err(BinlogError::InvalidState(_))
        ));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_mid_packet() {
        let mock = dump_by_position(&mut Builder::new())
            .read(&frame(2, &event_packet(2, b"BEGIN"))[..12])
            .build();

        let mut conn = connection(mock);
        let mut events: Vec<RawEvent> = Vec::new();
        let err = conn
            .run(&mut StaticSource::default(), &mut events)
            .await
            .unwrap_err();

        assert!(matches!(err, BinlogError::Disconnected { buffered: 12 }));
        assert!(err.is_network());
        assert!(events.is_empty());
    }

    struct FailingSink {
        seen: Vec<RawEvent>,
        fail_on: usize,
    }

    impl EventSink for FailingSink {
        fn on_event(&mut self, event: RawEvent) -> Result<()> {
            self.seen.push(event);
            if self.seen.len() == self.fail_on {
                return Err(BinlogError::Handler("cannot decode".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handler_failure_keeps_framing() {
        let packets: Vec<Vec<u8>> = (0..3)
            .map(|i| event_packet(30, format!("row {}", i).as_bytes()))
            .collect();

        let mut first_read = frame(2, &packets[0]);
        first_read.extend(frame(3, &packets[1]));
        let second_read = frame(4, &packets[2]);

        let mock = dump_by_position(&mut Builder::new())
            .read(&first_read)
            .read(&second_read)
            .read(&frame(5, &[0xFE, 0x00, 0x00, 0x02, 0x00]))
            .build();

        let mut conn = connection(mock);
        let mut sink = FailingSink {
            seen: Vec::new(),
            fail_on: 1,
        };
        let stats = conn
            .run(&mut StaticSource::default(), &mut sink)
            .await
            .unwrap();

        assert_eq!(stats, StreamStats { events: 3, failed: 1 });
        let payloads: Vec<&[u8]> = sink.seen.iter().map(|e| &e.payload[..]).collect();
        assert_eq!(
            payloads,
            vec![&packets[0][..], &packets[1][..], &packets[2][..]]
        );
    }

    #[tokio::test]
    async fn test_buffered_events_delivered_before_eof() {
        let first = event_packet(30, b"row 0");
        let second = event_packet(30, b"row 1");

        // 한 번의 읽기에 이벤트 두 개와 EOF 패킷이 함께 도착한 뒤 서버가 연결을 닫음
        let mut wire = frame(2, &first);
        wire.extend(frame(3, &second));
        wire.extend(frame(4, &[0xFE, 0x00, 0x00, 0x02, 0x00]));

        let mock = dump_by_position(&mut Builder::new()).read(&wire).build();

        let mut conn = connection(mock);
        let mut sink = FailingSink {
            seen: Vec::new(),
            fail_on: 1,
        };
        let stats = conn
            .run(&mut StaticSource::default(), &mut sink)
            .await
            .unwrap();

        assert_eq!(stats, StreamStats { events: 2, failed: 1 });
        assert_eq!(sink.seen.len(), 2);
        assert_eq!(&sink.seen[1].payload[..], &second[..]);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_on_packet_boundary_after_handler_failure() {
        let first = event_packet(30, b"row 0");
        let second = event_packet(30, b"row 1");

        let mut wire = frame(2, &first);
        wire.extend(frame(3, &second));

        let mock = dump_by_position(&mut Builder::new()).read(&wire).build();

        let mut conn = connection(mock);
        let mut sink = FailingSink {
            seen: Vec::new(),
            fail_on: 1,
        };
        let err = conn
            .run(&mut StaticSource::default(), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, BinlogError::Transport(_)));
        assert_eq!(sink.seen.len(), 2);
        assert_eq!(conn.state(), ConnectionState::Errored);
    }

    #[tokio::test]
    async fn test_write_error_during_register() {
        let mock = negotiated(&mut Builder::new())
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            ))
            .build();

        let mut conn = connection(mock);
        let err = conn
            .establish(&mut StaticSource::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BinlogError::Transport(_)));
        assert!(err.is_network());
        assert_eq!(conn.state(), ConnectionState::Errored);

        let mut events: Vec<RawEvent> = Vec::new();
        assert!(matches!(
            conn.stream(&mut events).await,
            Err(BinlogError::InvalidState(_))
        ));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_read_error_while_streaming() {
        let event = event_packet(2, b"BEGIN");
        let mock = dump_by_position(&mut Builder::new())
            .read(&frame(2, &event))
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset by peer",
            ))
            .build();

        let mut conn = connection(mock);
        conn.establish(&mut StaticSource::default()).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Streaming);

        let mut events: Vec<RawEvent> = Vec::new();
        let err = conn.stream(&mut events).await.unwrap_err();

        assert!(matches!(err, BinlogError::Transport(_)));
        assert_eq!(conn.state(), ConnectionState::Errored);
        assert_eq!(events.len(), 1);

        assert!(matches!(
            conn.stream(&mut events).await,
            Err(BinlogError::InvalidState(_))
        ));
        assert_eq!(events.len(), 1);
    }

    struct TokenAuth;

    impl AuthEncoder for TokenAuth {
        fn encode(&self, capabilities: u32, username: &str, _: &str, salt: &[u8]) -> Result<Bytes> {
            assert_eq!(capabilities, auth::capabilities::replication());
            assert_eq!(username, "repl");
            assert_eq!(salt, &TEST_SALT[..]);
            Ok(Bytes::from(frame(1, b"token")))
        }
    }

    struct FixedGtid;

    impl GtidEncoder for FixedGtid {
        fn encode(&self, gtid: &str) -> Result<EncodedGtidSet> {
            assert_eq!(gtid, "0-1-100");
            Ok(EncodedGtidSet {
                length: 3,
                bytes: Bytes::from_static(&[7, 8, 9]),
            })
        }
    }

    #[tokio::test]
    async fn test_custom_encoders() {
        let mock = Builder::new()
            .read(&frame(0, &greeting_payload()))
            .write(&frame(1, b"token"))
            .read(&frame(2, OK_PACKET))
            .write(&command_frame(Command::RegisterSlave { server_id: 42 }))
            .read(&frame(1, OK_PACKET))
            .write(&command_frame(Command::BinlogDumpGtid {
                server_id: 42,
                encoded_gtid: Bytes::from_static(&[7, 8, 9]),
            }))
            .read(&frame(1, OK_PACKET))
            .build();

        let config = ReplicationConfig {
            gtid: Some("0-1-100".to_string()),
            ..test_config()
        };
        let mut conn = BinlogConnection::with_transport(config, mock)
            .with_auth_encoder(Arc::new(TokenAuth))
            .with_gtid_encoder(Arc::new(FixedGtid));
        conn.establish(&mut StaticSource::default()).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Streaming);
    }

    #[tokio::test]
    async fn test_gtid_encoding_failure() {
        let mock = registered(&mut Builder::new()).build();

        let config = ReplicationConfig {
            gtid: Some("3e11fa47-71ca-11e1-9e33-c80aa9429562:1-18446744073709551615".to_string()),
            ..test_config()
        };
        let mut conn = BinlogConnection::with_transport(config, mock);
        let err = conn
            .establish(&mut StaticSource::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BinlogError::Gtid(_)));
        assert_eq!(conn.state(), ConnectionState::Errored);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mock = Builder::new().build();
        let mut conn = connection(mock);

        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);

        assert!(matches!(
            conn.establish(&mut StaticSource::default()).await,
            Err(BinlogError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_state_subscription() {
        let mock = Builder::new().build();
        let mut conn = connection(mock);
        let rx = conn.subscribe_state();
        assert_eq!(*rx.borrow(), ConnectionState::AwaitingHandshake);

        conn.close().await;
        assert_eq!(*rx.borrow(), ConnectionState::Closed);
    }

    #[tokio::test]
    #[ignore = "needs a DNS resolver"]
    async fn test_unresolvable_host() {
        let config = ReplicationConfig::new("no-such-host.invalid", "repl");
        let mut conn: BinlogConnection<TcpStream> = BinlogConnection::new(config);
        let err = conn.open().await.unwrap_err();

        assert!(matches!(err, BinlogError::Resolution(_)));
        assert_eq!(conn.state(), ConnectionState::Errored);
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let addr = resolve("127.0.0.1", 3307).await.unwrap();
        assert_eq!(addr, "127.0.0.1:3307".parse::<SocketAddr>().unwrap());
    }
}
