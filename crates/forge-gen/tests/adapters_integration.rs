use forge_gen::{
    GenerationProvider, HttpPermanence, JobHandle, JobRequest, JobState, PermanenceConfig,
    PermanenceProvider, ProviderErrorKind, ReplicateConfig, ReplicateProvider,
};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

async fn start_test_server(
    body: &'static str,
    status_line: &'static str,
) -> (SocketAddr, oneshot::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = Vec::new();
            loop {
                let mut chunk = vec![0u8; 2048];
                let n = stream.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                if let Some(idx) = find_subslice(&buf, b"\r\n\r\n") {
                    let body_len = parse_content_length(&buf[..idx]);
                    if buf.len() >= idx + 4 + body_len {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = tx.send(buf);
        }
    });
    (addr, rx)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_content_length(headers: &[u8]) -> usize {
    String::from_utf8_lossy(headers)
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())?
        })
        .unwrap_or(0)
}

fn provider_for(addr: SocketAddr) -> ReplicateProvider {
    let mut config = ReplicateConfig::new("test-token", "model-v1");
    config.base_url = format!("http://{addr}");
    ReplicateProvider::new(config).expect("provider")
}

#[tokio::test]
async fn create_job_posts_the_prediction_and_returns_its_id() {
    let (addr, captured) =
        start_test_server(r#"{"id":"pred-1","status":"starting"}"#, "201 Created").await;
    let provider = provider_for(addr);

    let handle = provider
        .create_job(&JobRequest::new("minimal fox logo"))
        .await
        .expect("create");
    assert_eq!(handle, JobHandle("pred-1".to_string()));

    let request = String::from_utf8(captured.await.unwrap()).unwrap();
    assert!(request.starts_with("POST /predictions"));
    assert!(request.contains("Token test-token"));
    assert!(request.contains(r#""version":"model-v1""#));
    assert!(request.contains(r#""prompt":"minimal fox logo""#));
}

#[tokio::test]
async fn busy_provider_is_classified_retryable() {
    let (addr, _) = start_test_server(r#"{"detail":"queue full"}"#, "503 Service Unavailable").await;
    let provider = provider_for(addr);

    let error = provider
        .create_job(&JobRequest::new("fox"))
        .await
        .expect_err("must fail");
    assert_eq!(error.kind, ProviderErrorKind::Busy);
    assert!(error.retryable);
    assert_eq!(error.status_code, Some(503));
}

#[tokio::test]
async fn invalid_request_is_not_retryable() {
    let (addr, _) = start_test_server(r#"{"detail":"prompt required"}"#, "422 Unprocessable").await;
    let provider = provider_for(addr);

    let error = provider
        .create_job(&JobRequest::new(""))
        .await
        .expect_err("must fail");
    assert_eq!(error.kind, ProviderErrorKind::InvalidRequest);
    assert!(!error.retryable);
}

#[tokio::test]
async fn get_job_maps_prediction_statuses() {
    let (addr, _) =
        start_test_server(r#"{"id":"pred-1","status":"processing"}"#, "200 OK").await;
    let state = provider_for(addr)
        .get_job(&JobHandle("pred-1".into()))
        .await
        .expect("poll");
    assert_eq!(state, JobState::Pending);

    let (addr, _) = start_test_server(
        r#"{"id":"pred-1","status":"succeeded","output":["https://tmp.example/a.png"]}"#,
        "200 OK",
    )
    .await;
    let state = provider_for(addr)
        .get_job(&JobHandle("pred-1".into()))
        .await
        .expect("poll");
    assert_eq!(
        state,
        JobState::Succeeded {
            output_url: "https://tmp.example/a.png".to_string()
        }
    );

    let (addr, _) = start_test_server(
        r#"{"id":"pred-1","status":"failed","error":"NSFW content"}"#,
        "200 OK",
    )
    .await;
    let state = provider_for(addr)
        .get_job(&JobHandle("pred-1".into()))
        .await
        .expect("poll");
    assert_eq!(
        state,
        JobState::Failed {
            reason: "NSFW content".to_string()
        }
    );
}

#[tokio::test]
async fn permanence_uploads_and_caches_the_mapping() {
    let (addr, captured) =
        start_test_server(r#"{"url":"https://cdn.example/a.png"}"#, "200 OK").await;
    let permanence = HttpPermanence::new(PermanenceConfig::new(
        format!("http://{addr}/upload"),
        "host-key",
    ))
    .expect("permanence");

    let durable = permanence
        .store("https://tmp.example/a.png")
        .await
        .expect("store");
    assert_eq!(durable, "https://cdn.example/a.png");

    let request = String::from_utf8(captured.await.unwrap()).unwrap();
    assert!(request.contains("Bearer host-key"));
    assert!(request.contains(r#""url":"https://tmp.example/a.png""#));

    // Second store of the same URL is served from the cache; the one-shot
    // server is already gone, so a network hit would fail.
    let durable = permanence
        .store("https://tmp.example/a.png")
        .await
        .expect("cached");
    assert_eq!(durable, "https://cdn.example/a.png");
}
