// MISP write-back against a mocked REST API
use misp_glue::event::{Attribute, Event};
use misp_glue::sink::{EventSink, MispSink};
use misp_glue::GlueError;
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sink(server: &MockServer) -> MispSink {
    MispSink::new(&server.uri(), "test-api-key", true, Duration::from_secs(5)).unwrap()
}

fn enriched_event() -> Event {
    let mut event = Event::from_json(
        r#"{"Event": {"id": "42", "info": "C2 beacon", "Attribute": [
            {"type": "ip-dst", "value": "1.2.3.4", "category": "Network activity"}
        ]}}"#,
    )
    .unwrap();
    event.attributes.push(Attribute::new("text", "known-bad"));
    event
}

#[tokio::test]
async fn test_persist_posts_full_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events/edit/42"))
        .and(header("Authorization", "test-api-key"))
        .and(header("Accept", "application/json"))
        .and(body_json(json!({"Event": {
            "id": "42",
            "info": "C2 beacon",
            "Attribute": [
                {"type": "ip-dst", "value": "1.2.3.4", "category": "Network activity"},
                {"type": "text", "value": "known-bad"}
            ]
        }})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Event": {"id": "42"}})))
        .expect(1)
        .mount(&server)
        .await;

    sink(&server).persist(&enriched_event()).await.unwrap();
}

#[tokio::test]
async fn test_rejected_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events/edit/42"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "Forbidden"})))
        .mount(&server)
        .await;

    let err = sink(&server).persist(&enriched_event()).await.unwrap_err();
    match err {
        GlueError::SinkRejected { event_id, message } => {
            assert_eq!(event_id, "42");
            assert!(message.starts_with("HTTP 403"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_errors_in_success_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events/edit/42"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"errors": {"Attribute": ["value is invalid"]}})),
        )
        .mount(&server)
        .await;

    let err = sink(&server).persist(&enriched_event()).await.unwrap_err();
    assert!(matches!(err, GlueError::SinkRejected { .. }));
}

/// Read one HTTP request off the connection, headers and body
async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending a full request");
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return text;
            }
        }
    }
}

#[tokio::test]
async fn test_truncated_response_body_is_an_http_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;
        assert!(request.starts_with("POST /events/edit/42 "));

        // promise 100 bytes, deliver 2, hang up
        let response = concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-Type: application/json\r\n",
            "Content-Length: 100\r\n",
            "\r\n",
            "{}"
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let url = format!("http://{}", addr);
    let sink = MispSink::new(&url, "key", true, Duration::from_secs(5)).unwrap();
    let err = sink.persist(&enriched_event()).await.unwrap_err();

    match err {
        GlueError::Http { context, .. } => assert!(context.contains("update response")),
        other => panic!("expected a body read failure, got {:?}", other),
    }
    server.await.unwrap();
}
