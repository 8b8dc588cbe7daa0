//! 零拷贝中继的端到端契约测试
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：在真实的回环 TCP 连接上验证中继对外可观测的行为：字节透明、
//!   连接间隔离、关闭级联与后端拨号失败的处理。
//! - **设计手法 (How)**：每个用例启动一个 [`RelayListener`] 与一个进程内后端，客户端经由中继
//!   与后端交互；所有等待都包在 `timeout` 中，挂起即视为失败。
//!
//! # 合同与边界 (What)
//!
//! - 负载大小在 `0..=4 × pipesize` 内随机抽取，并混入 0、1、恰好一个管道容量与数倍容量加零头等边界；
//! - back->front 方向另有后端主动推送的用例，不依赖回显；
//! - 任一方向的泵结束都会关闭两端，因此客户端不使用半关闭，而是读取完整回显后再关闭；
//! - 后端不可达时，前端连接被关闭，会话不派生任何泵任务。

use proptest::prelude::*;
use spark_transport_splice::{
    Direction, ErrorCategory, PipeCapacity, RelayConfig, RelayContext, RelayListener,
    SocketOptions, handle_connection,
};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(10);

fn capacity() -> PipeCapacity {
    PipeCapacity::probe().expect("probe pipe capacity")
}

/// 启动中继，返回其监听地址。
async fn start_relay(backend: SocketAddr) -> SocketAddr {
    let config = RelayConfig::new("127.0.0.1:0", backend.to_string());
    let listener = RelayListener::bind(&config, capacity())
        .await
        .expect("bind relay");
    let addr = listener.local_addr();
    tokio::spawn(async move {
        let _ = listener.serve().await;
    });
    addr
}

/// 回显后端：每个连接原样写回收到的字节，直到对端关闭。
async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo");
    let addr = listener.local_addr().expect("echo addr");
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// 发送 `payload` 的同时读回等长数据。
async fn round_trip(relay: SocketAddr, payload: Vec<u8>) -> Vec<u8> {
    let stream = TcpStream::connect(relay).await.expect("connect relay");
    let (mut reader, mut writer) = stream.into_split();
    let len = payload.len();
    let sender: JoinHandle<_> = tokio::spawn(async move {
        writer.write_all(&payload).await.expect("send payload");
        writer
    });

    let mut received = vec![0u8; len];
    reader.read_exact(&mut received).await.expect("read echo");
    drop(sender.await.expect("sender task"));
    received
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("tokio runtime")
}

/// 负载长度：管道容量附近的边界值，混合 `0..=4 × pipesize` 内的任意长度。
fn payload_len() -> impl Strategy<Value = usize> {
    let pipesize = capacity().bytes();
    prop_oneof![
        Just(0usize),
        Just(1usize),
        Just(pipesize),
        Just(pipesize * 3 + 17),
        0..=pipesize * 4,
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// 任意大小（含边界）的负载都按字节原样往返。
    #[test]
    fn payloads_relay_byte_exact(len in payload_len(), seed in any::<u8>()) {
        let rt = runtime();
        let (sent, received) = rt.block_on(async move {
            let payload: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
            let relay = start_relay(start_echo_backend().await).await;
            let received = timeout(DEADLINE, round_trip(relay, payload.clone()))
                .await
                .expect("round trip completes");
            (payload, received)
        });
        prop_assert_eq!(sent, received);
    }
}

/// 后端主动推送、客户端从不写入：back->front 方向独立于回显按字节原样到达。
#[tokio::test(flavor = "multi_thread")]
async fn backend_push_reaches_client_unchanged() {
    let backend = TcpListener::bind("127.0.0.1:0").await.expect("bind backend");
    let relay = start_relay(backend.local_addr().expect("backend addr")).await;
    let pipesize = capacity().bytes();
    let payload: Vec<u8> = (0..pipesize * 2 + 3).map(|i| (i % 241) as u8).collect();

    let mut client = TcpStream::connect(relay).await.expect("connect relay");
    let (mut upstream, _) = timeout(DEADLINE, backend.accept())
        .await
        .expect("relay dials backend")
        .expect("accept");

    let expected = payload.clone();
    let pusher = tokio::spawn(async move {
        upstream.write_all(&payload).await.expect("backend push");
        upstream
    });

    let mut received = vec![0u8; expected.len()];
    timeout(DEADLINE, client.read_exact(&mut received))
        .await
        .expect("push arrives")
        .expect("client read");
    assert_eq!(received, expected);
    drop(pusher.await.expect("pusher task"));
}

/// 场景：客户端发送 `ping`，收到 `ping` 后关闭，后端一侧随即观测到连接关闭。
#[tokio::test(flavor = "multi_thread")]
async fn ping_is_echoed_and_backend_leg_closes() {
    let backend = TcpListener::bind("127.0.0.1:0").await.expect("bind backend");
    let relay = start_relay(backend.local_addr().expect("backend addr")).await;

    let mut client = TcpStream::connect(relay).await.expect("connect relay");
    let (mut upstream, _) = timeout(DEADLINE, backend.accept())
        .await
        .expect("relay dials backend")
        .expect("accept");

    client.write_all(b"ping").await.expect("client write");
    let mut buf = [0u8; 4];
    upstream.read_exact(&mut buf).await.expect("backend read");
    upstream.write_all(&buf).await.expect("backend echo");

    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).await.expect("client read");
    assert_eq!(&echoed, b"ping");
    drop(client);

    let mut rest = [0u8; 1];
    let read = timeout(DEADLINE, upstream.read(&mut rest))
        .await
        .expect("backend leg closes promptly")
        .unwrap_or(0);
    assert_eq!(read, 0);
}

/// 两个并发连接的字节流互不串扰。
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_connections_never_cross_talk() {
    let backend = start_echo_backend().await;
    let relay = start_relay(backend).await;
    let pipesize = capacity().bytes();

    let first = tokio::spawn(round_trip(relay, vec![b'a'; pipesize * 2 + 5]));
    let second = tokio::spawn(round_trip(relay, vec![b'b'; pipesize * 2 + 9]));

    let first = timeout(DEADLINE, first).await.expect("first").expect("task");
    let second = timeout(DEADLINE, second).await.expect("second").expect("task");
    assert!(first.iter().all(|byte| *byte == b'a'));
    assert_eq!(first.len(), pipesize * 2 + 5);
    assert!(second.iter().all(|byte| *byte == b'b'));
    assert_eq!(second.len(), pipesize * 2 + 9);
}

/// 后端持续向前端推送时，前端关闭会级联关闭后端连接。
#[tokio::test(flavor = "multi_thread")]
async fn front_close_cascades_to_backend() {
    let backend = TcpListener::bind("127.0.0.1:0").await.expect("bind backend");
    let relay = start_relay(backend.local_addr().expect("backend addr")).await;

    let mut client = TcpStream::connect(relay).await.expect("connect relay");
    let (mut upstream, _) = timeout(DEADLINE, backend.accept())
        .await
        .expect("relay dials backend")
        .expect("accept");

    let mut first = [0u8; 1];
    upstream.write_all(b"x").await.expect("prime");
    client.read_exact(&mut first).await.expect("client read");
    drop(client);

    let pusher = async {
        let chunk = vec![0u8; 8192];
        loop {
            if let Err(err) = upstream.write_all(&chunk).await {
                return err;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    let err: io::Error = timeout(DEADLINE, pusher)
        .await
        .expect("backend observes the closed session");
    assert!(matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    ));
}

/// 后端不可达：经由监听器时前端被关闭；直接调用处理器时返回会话级错误。
#[tokio::test(flavor = "multi_thread")]
async fn backend_dial_failure_closes_front() {
    let vacant = TcpListener::bind("127.0.0.1:0").await.expect("reserve port");
    let vacant_addr = vacant.local_addr().expect("vacant addr");
    drop(vacant);

    let relay = start_relay(vacant_addr).await;
    let mut client = TcpStream::connect(relay).await.expect("connect relay");
    let mut buf = [0u8; 1];
    let read = timeout(DEADLINE, client.read(&mut buf))
        .await
        .expect("front closed after dial failure")
        .unwrap_or(0);
    assert_eq!(read, 0);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let _client = TcpStream::connect(addr).await.expect("connect");
    let (front, _) = listener.accept().await.expect("accept");
    let ctx = RelayContext::new(vacant_addr.to_string(), capacity(), SocketOptions::default());
    let err = handle_connection(front, &ctx)
        .await
        .expect_err("dial must fail");
    assert_eq!(err.category(), ErrorCategory::SessionFatal);
    assert_eq!(err.code(), "spark.transport.splice.connect_failed");
    assert_eq!(err.io_kind(), Some(io::ErrorKind::ConnectionRefused));
}

/// 会话句柄汇报两个方向各自转发的字节数。
#[tokio::test(flavor = "multi_thread")]
async fn session_reports_relayed_bytes() {
    let backend = start_echo_backend().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let mut client = TcpStream::connect(addr).await.expect("connect");
    let (front, _) = listener.accept().await.expect("accept");

    let ctx = RelayContext::new(backend.to_string(), capacity(), SocketOptions::default());
    let session = handle_connection(front, &ctx).await.expect("session");

    client.write_all(b"hello relay").await.expect("write");
    let mut echoed = [0u8; 11];
    client.read_exact(&mut echoed).await.expect("read");
    assert_eq!(&echoed, b"hello relay");
    drop(client);

    let (forward, backward) = timeout(DEADLINE, session.wait())
        .await
        .expect("pumps finish")
        .expect("join");
    assert_eq!(forward.direction, Direction::FrontToBack);
    assert_eq!(forward.bytes, 11);
    assert_eq!(backward.bytes, 11);
}
