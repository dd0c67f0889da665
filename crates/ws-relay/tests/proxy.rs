//! End-to-end sessions through a real proxy against a fake DevTools browser.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use ws_relay::{OriginPolicy, Proxy, ProxyConfig, TranscriptConfig, WsSettings};

const VERSION_JSON: &str = r#"{"Browser":"HeadlessChrome/120.0.6099.109","Protocol-Version":"1.3"}"#;
const LIST_JSON: &str = r#"[{"id":"E3F1","type":"page","url":"about:blank"}]"#;
const TIMEOUT: Duration = Duration::from_secs(5);

type BrowserSocket = WebSocketStream<TcpStream>;
type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Copy)]
enum Behavior {
    Healthy,
    BrokenVersion,
    RefuseWebSocket,
}

struct FakeBrowser {
    addr: SocketAddr,
    sockets: mpsc::UnboundedReceiver<(String, BrowserSocket)>,
    ws_attempts: Arc<AtomicUsize>,
}

impl FakeBrowser {
    async fn spawn(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let ws_attempts = Arc::new(AtomicUsize::new(0));
        let attempts = Arc::clone(&ws_attempts);

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(serve(stream, behavior, tx.clone(), Arc::clone(&attempts)));
            }
        });

        Self {
            addr,
            sockets: rx,
            ws_attempts,
        }
    }

    /// The next WebSocket the proxy opened, with the path it requested.
    async fn accept(&mut self) -> (String, BrowserSocket) {
        tokio::time::timeout(TIMEOUT, self.sockets.recv())
            .await
            .expect("proxy never dialed the browser")
            .unwrap()
    }
}

async fn serve(
    mut stream: TcpStream,
    behavior: Behavior,
    tx: mpsc::UnboundedSender<(String, BrowserSocket)>,
    attempts: Arc<AtomicUsize>,
) {
    let head = peek_head(&stream).await;
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    if head.to_ascii_lowercase().contains("upgrade: websocket") {
        attempts.fetch_add(1, Ordering::SeqCst);
        if let Behavior::RefuseWebSocket = behavior {
            consume(&mut stream, head.len()).await;
            respond(&mut stream, "404 Not Found", "no such target").await;
            return;
        }
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = tx.send((path, ws));
        return;
    }

    consume(&mut stream, head.len()).await;
    match (path.as_str(), behavior) {
        ("/json/version", Behavior::BrokenVersion) => {
            respond(&mut stream, "200 OK", "<html>not json</html>").await
        }
        ("/json/version", _) => respond(&mut stream, "200 OK", VERSION_JSON).await,
        ("/json/list", _) | ("/json", _) => respond(&mut stream, "200 OK", LIST_JSON).await,
        _ => respond(&mut stream, "404 Not Found", "not found").await,
    }
}

/// Peek the request head without consuming it, so a WebSocket handshake can
/// still be read by the acceptor.
async fn peek_head(stream: &TcpStream) -> String {
    let mut buf = vec![0u8; 8192];
    for _ in 0..200 {
        let n = stream.peek(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        if let Some(end) = text.find("\r\n\r\n") {
            return text[..end + 4].to_string();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("incomplete request head");
}

async fn consume(stream: &mut TcpStream, len: usize) {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.unwrap();
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await.unwrap();
    let _ = stream.shutdown().await;
}

async fn start_proxy(remote: SocketAddr, log_dir: &Path) -> SocketAddr {
    start_proxy_logging_to(remote, log_dir.join("cdp-%s.log").display().to_string()).await
}

async fn start_proxy_logging_to(remote: SocketAddr, file_template: String) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let proxy = Proxy::new(ProxyConfig {
        listen_addr: addr.to_string(),
        remote_addr: remote.to_string(),
        websocket: WsSettings::default(),
        origin: OriginPolicy::default(),
        transcript: TranscriptConfig {
            file_logging: true,
            file_template,
        },
    })
    .unwrap();
    tokio::spawn(async move { proxy.serve(listener).await });
    addr
}

async fn connect(proxy: SocketAddr, id: &str) -> ClientSocket {
    let url = format!("ws://{proxy}/devtools/page/{id}");
    let (ws, _) = tokio::time::timeout(TIMEOUT, tokio_tungstenite::connect_async(url))
        .await
        .unwrap()
        .unwrap();
    ws
}

/// Send a bare handshake and return the status code and body of the answer.
async fn raw_handshake(proxy: SocketAddr, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {proxy}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    let head_end = loop {
        let n = tokio::time::timeout(TIMEOUT, stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "connection closed before response head");
        raw.extend_from_slice(&buf[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..head_end]).to_string();
    let status: u16 = head.split_whitespace().nth(1).unwrap().parse().unwrap();
    let content_length: usize = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())
                .flatten()
        })
        .unwrap_or(0);

    while raw.len() < head_end + content_length {
        let n = tokio::time::timeout(TIMEOUT, stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);
    }
    let body = String::from_utf8_lossy(&raw[head_end..]).to_string();
    (status, body)
}

/// Transcript lines without their timestamps, once the session has closed.
async fn session_records(path: PathBuf, closing_marker: &str) -> Vec<String> {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if let Ok(contents) = std::fs::read_to_string(&path) {
            if contents.contains(closing_marker) {
                return contents
                    .lines()
                    .map(|l| l.splitn(3, ' ').nth(2).unwrap_or("").to_string())
                    .collect();
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "transcript {} never reached {closing_marker:?}",
            path.display()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn next_data<S>(ws: &mut WebSocketStream<S>) -> Message
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("read failed");
        if msg.is_text() || msg.is_binary() {
            return msg;
        }
    }
}

async fn wait_closed<S>(ws: &mut WebSocketStream<S>) -> bool
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn relays_command_and_reply_and_records_transcript() {
    let logs = tempfile::tempdir().unwrap();
    let mut browser = FakeBrowser::spawn(Behavior::Healthy).await;
    let proxy = start_proxy(browser.addr, logs.path()).await;

    let mut client = connect(proxy, "E3F1A0B2").await;
    let (path, mut page) = browser.accept().await;
    assert_eq!(path, "/devtools/page/E3F1A0B2");

    client
        .send(Message::text(r#"{"id":1,"method":"Page.enable"}"#))
        .await
        .unwrap();
    assert_eq!(
        next_data(&mut page).await,
        Message::text(r#"{"id":1,"method":"Page.enable"}"#)
    );
    page.send(Message::text(r#"{"id":1,"result":{}}"#))
        .await
        .unwrap();
    assert_eq!(
        next_data(&mut client).await,
        Message::text(r#"{"id":1,"result":{}}"#)
    );

    client.close(None).await.unwrap();

    let records = session_records(logs.path().join("cdp-E3F1A0B2.log"), "---------- closing").await;
    let remote = browser.addr;
    assert!(records[0].starts_with("---------- connection from 127.0.0.1:"));
    assert_eq!(
        records[1],
        format!("endpoint {remote}/json/version reported: {VERSION_JSON}")
    );
    assert_eq!(
        records[2],
        format!("connecting to ws://{remote}/devtools/page/E3F1A0B2")
    );
    assert_eq!(
        records[3],
        format!("connected to ws://{remote}/devtools/page/E3F1A0B2")
    );
    assert!(records[4].starts_with("upgrading connection on 127.0.0.1:"));
    assert!(records[5].starts_with("upgraded connection on 127.0.0.1:"));
    assert_eq!(records[6], r#"<- {"id":1,"method":"Page.enable"}"#);
    assert_eq!(records[7], r#"-> {"id":1,"result":{}}"#);
    assert!(records[8].starts_with("---------- closing 127.0.0.1:"));
    assert_eq!(records.len(), 9);
}

#[tokio::test]
async fn preserves_frame_sequences_both_ways() {
    let logs = tempfile::tempdir().unwrap();
    let mut browser = FakeBrowser::spawn(Behavior::Healthy).await;
    let proxy = start_proxy(browser.addr, logs.path()).await;

    let mut client = connect(proxy, "seq").await;
    let (_, mut page) = browser.accept().await;

    let upstream: Vec<Message> = (0..50)
        .map(|i| {
            if i % 5 == 0 {
                Message::binary(vec![i as u8; 32])
            } else {
                Message::text(format!(r#"{{"id":{i},"method":"Runtime.evaluate"}}"#))
            }
        })
        .collect();
    let downstream: Vec<Message> = (0..50)
        .map(|i| Message::text(format!(r#"{{"method":"Network.dataReceived","params":{{"n":{i}}}}}"#)))
        .collect();

    let sender = {
        let upstream = upstream.clone();
        async move {
            for msg in upstream {
                client.send(msg).await.unwrap();
            }
            client
        }
    };
    let page_sender = {
        let downstream = downstream.clone();
        async move {
            for msg in downstream {
                page.send(msg).await.unwrap();
            }
            page
        }
    };
    let (mut client, mut page) = tokio::join!(sender, page_sender);

    for expected in &upstream {
        assert_eq!(&next_data(&mut page).await, expected);
    }
    for expected in &downstream {
        assert_eq!(&next_data(&mut client).await, expected);
    }

    page.close(None).await.unwrap();
    assert!(wait_closed(&mut client).await, "client left open after browser closed");

    let records = session_records(logs.path().join("cdp-seq.log"), "---------- closing").await;
    let up: Vec<&String> = records.iter().filter(|r| r.starts_with("<- ")).collect();
    let down: Vec<&String> = records.iter().filter(|r| r.starts_with("-> ")).collect();
    assert_eq!(up.len(), 50);
    assert_eq!(down.len(), 50);
    for (i, record) in down.iter().enumerate() {
        assert_eq!(
            record.as_str(),
            format!(r#"-> {{"method":"Network.dataReceived","params":{{"n":{i}}}}}"#)
        );
    }
    assert_eq!(up[1].as_str(), r#"<- {"id":1,"method":"Runtime.evaluate"}"#);
}

#[tokio::test]
async fn abrupt_client_drop_closes_browser_side() {
    let logs = tempfile::tempdir().unwrap();
    let mut browser = FakeBrowser::spawn(Behavior::Healthy).await;
    let proxy = start_proxy(browser.addr, logs.path()).await;

    let mut client = connect(proxy, "abrupt").await;
    let (_, mut page) = browser.accept().await;

    for i in 0..3 {
        client
            .send(Message::text(format!(r#"{{"id":{i},"method":"DOM.getDocument"}}"#)))
            .await
            .unwrap();
        next_data(&mut page).await;
        page.send(Message::text(format!(r#"{{"id":{i},"result":{{}}}}"#)))
            .await
            .unwrap();
        next_data(&mut client).await;
    }

    // No close handshake: the TCP connection just disappears.
    drop(client);

    assert!(wait_closed(&mut page).await, "browser side left open");

    let records = session_records(logs.path().join("cdp-abrupt.log"), "---------- closing").await;
    let frames = records
        .iter()
        .filter(|r| r.starts_with("<- ") || r.starts_with("-> "))
        .count();
    assert_eq!(frames, 6);
}

#[tokio::test]
async fn unreachable_version_endpoint_refuses_session() {
    let logs = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::spawn(Behavior::BrokenVersion).await;
    let proxy = start_proxy(browser.addr, logs.path()).await;

    let (status, body) = raw_handshake(proxy, "/devtools/page/broken").await;
    assert_eq!(status, 500);
    assert!(body.starts_with("version error, got: "), "body: {body}");
    assert_eq!(browser.ws_attempts.load(Ordering::SeqCst), 0);

    let contents = std::fs::read_to_string(logs.path().join("cdp-broken.log")).unwrap();
    assert!(contents.contains("version error"));
    assert!(!contents.contains(" <- ") && !contents.contains(" -> "));
}

#[tokio::test]
async fn unopenable_session_log_refuses_session() {
    let logs = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::spawn(Behavior::Healthy).await;
    // No placeholder: every session shares one "file", which is a directory.
    let proxy = start_proxy_logging_to(browser.addr, logs.path().display().to_string()).await;

    let (status, body) = raw_handshake(proxy, "/devtools/page/nolog").await;
    assert_eq!(status, 500);
    assert!(body.contains("could not open session log"), "body: {body}");
    assert_eq!(browser.ws_attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dead_remote_refuses_session() {
    let logs = tempfile::tempdir().unwrap();
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let proxy = start_proxy(dead, logs.path()).await;

    let (status, body) = raw_handshake(proxy, "/devtools/page/dead").await;
    assert_eq!(status, 500);
    assert!(body.contains("version error"), "body: {body}");
}

#[tokio::test]
async fn refused_upstream_connect_returns_500() {
    let logs = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::spawn(Behavior::RefuseWebSocket).await;
    let proxy = start_proxy(browser.addr, logs.path()).await;

    let (status, body) = raw_handshake(proxy, "/devtools/page/gone").await;
    assert_eq!(status, 500);
    assert!(body.contains("could not connect"), "body: {body}");
    assert_eq!(browser.ws_attempts.load(Ordering::SeqCst), 1);

    let contents = std::fs::read_to_string(logs.path().join("cdp-gone.log")).unwrap();
    assert!(contents.contains("could not connect to ws://"));
    assert!(!contents.contains(" <- ") && !contents.contains(" -> "));
}

#[tokio::test]
async fn concurrent_sessions_keep_separate_transcripts() {
    let logs = tempfile::tempdir().unwrap();
    let mut browser = FakeBrowser::spawn(Behavior::Healthy).await;
    let proxy = start_proxy(browser.addr, logs.path()).await;

    let mut alpha = connect(proxy, "alpha").await;
    let (path_a, page_a) = browser.accept().await;
    let mut beta = connect(proxy, "beta").await;
    let (path_b, page_b) = browser.accept().await;
    let (mut page_alpha, mut page_beta) = if path_a.ends_with("alpha") {
        assert!(path_b.ends_with("beta"));
        (page_a, page_b)
    } else {
        (page_b, page_a)
    };

    for i in 0..20 {
        alpha
            .send(Message::text(format!("alpha {i}")))
            .await
            .unwrap();
        beta.send(Message::text(format!("beta {i}"))).await.unwrap();
    }
    for i in 0..20 {
        assert_eq!(next_data(&mut page_alpha).await, Message::text(format!("alpha {i}")));
        assert_eq!(next_data(&mut page_beta).await, Message::text(format!("beta {i}")));
    }

    alpha.close(None).await.unwrap();
    beta.close(None).await.unwrap();

    for name in ["alpha", "beta"] {
        let records = session_records(
            logs.path().join(format!("cdp-{name}.log")),
            "---------- closing",
        )
        .await;
        let frames: Vec<&String> = records.iter().filter(|r| r.starts_with("<- ")).collect();
        assert_eq!(frames.len(), 20);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.as_str(), format!("<- {name} {i}"));
        }
    }
}

#[tokio::test]
async fn non_session_paths_are_passed_through() {
    let logs = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::spawn(Behavior::Healthy).await;
    let proxy = start_proxy(browser.addr, logs.path()).await;

    let http = reqwest::Client::new();
    let version = http
        .get(format!("http://{proxy}/json/version"))
        .send()
        .await
        .unwrap();
    assert_eq!(version.status(), 200);
    assert_eq!(version.text().await.unwrap(), VERSION_JSON);

    let list = http
        .get(format!("http://{proxy}/json/list"))
        .send()
        .await
        .unwrap();
    assert_eq!(list.text().await.unwrap(), LIST_JSON);

    let missing = http
        .get(format!("http://{proxy}/nothing-here"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}
