/// MySQL Binlog 복제 클라이언트 예제
///
/// 환경 변수로 설정을 읽어 서버에 slave 로 붙고, 받은 이벤트의 헤더를 출력합니다.
use mysql_binlog_connect::{BinlogClient, EventType, MySqlSource, ReplicationConfig};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 초기화
    tracing_subscriber::fmt::init();

    let config = ReplicationConfig::from_env()?;
    info!("Connecting to {}:{}", config.host, config.port);

    // 위치 조회 및 체크섬 확인용 SQL 연결
    let mut source = MySqlSource::connect(&config).await?;

    let client = BinlogClient::new(config);
    let mut stream = client.start_streaming(&mut source).await?;
    source.close().await?;

    info!("Binlog streaming started (Ctrl+C로 종료)");

    let mut event_count = 0u64;
    loop {
        tokio::select! {
            event = stream.events.recv() => {
                let Some(event) = event else {
                    info!("이벤트 스트림 종료");
                    break;
                };
                event_count += 1;

                match event.header() {
                    Ok(header) => {
                        info!(
                            "📦 Event #{}: type={:?}({}), server_id={}, size={}, pos={}, time={:?}",
                            event_count,
                            header.event_type,
                            header.type_code,
                            header.server_id,
                            header.event_length,
                            header.next_pos,
                            header.datetime()
                        );
                        if header.event_type == EventType::Unknown {
                            debug!("   Raw data: {:02x?}", &event.event_data()[..]);
                        }
                    }
                    Err(e) => warn!("Event #{}: unreadable header: {}", event_count, e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("종료 신호 수신. 프로그램을 종료합니다...");
                stream.task.abort();
                break;
            }
        }
    }

    info!("총 {}개의 이벤트를 수신했습니다.", event_count);
    Ok(())
}
