//! Integration tests for server-sent progress streams.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{client_for, fast_settings, refused_base_url, start_mock_server_or_skip};
use firmament_net::network::{ErrorKind, ProgressCallbacks, ProgressEvent, StreamError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Everything the callbacks observed.
#[derive(Default)]
struct Recorder {
    messages: Mutex<Vec<ProgressEvent>>,
    errors: Mutex<Vec<StreamError>>,
    closes: AtomicUsize,
}

impl Recorder {
    fn callbacks(self: &Arc<Self>) -> ProgressCallbacks {
        let on_message = Arc::clone(self);
        let on_error = Arc::clone(self);
        let on_close = Arc::clone(self);
        ProgressCallbacks::new(move |event| on_message.messages.lock().unwrap().push(event))
            .on_error(move |error| on_error.errors.lock().unwrap().push(error))
            .on_close(move || {
                on_close.closes.fetch_add(1, Ordering::SeqCst);
            })
    }

    fn stages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.stage.clone())
            .collect()
    }
}

async fn mount_sse(server: &MockServer, job_id: &str, body: impl Into<Vec<u8>>) {
    Mock::given(method("GET"))
        .and(path(format!("/progress/{job_id}")))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.into(), "text/event-stream"))
        .mount(server)
        .await;
}

async fn wait_closed(handle: &firmament_net::StreamHandle) {
    tokio::time::timeout(Duration::from_secs(5), handle.closed())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_events_delivered_in_order_and_malformed_skipped() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = concat!(
        "data: {\"stage\":\"processing\",\"current\":10,\"total\":100}\n\n",
        "data: not-json\n\n",
        ": keep-alive\n\n",
        "data: {\"stage\":\"complete\",\"result\":{\"headings\":[\"Intro\"]}}\n\n",
    );
    mount_sse(&server, "abc", body).await;

    let client = client_for(&server.uri(), &fast_settings());
    let recorder = Arc::new(Recorder::default());
    let handle = client.subscribe_progress("abc", recorder.callbacks());
    wait_closed(&handle).await;

    assert_eq!(recorder.stages(), vec!["processing", "complete"]);
    {
        let messages = recorder.messages.lock().unwrap();
        assert_eq!(messages[0].current, Some(10));
        assert_eq!(messages[0].total, Some(100));
        assert!(messages[1].result.is_some());
    }

    let errors = recorder.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        StreamError::MalformedEvent { payload, .. } => assert_eq!(payload, "not-json"),
        other => panic!("expected malformed event, got {other:?}"),
    }
    assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stream_keeps_delivering_after_malformed_message() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = concat!(
        "data: {\"stage\":\n\n",
        "data: {\"stage\":\"done\",\"current\":10,\"total\":10}\n\n",
    );
    mount_sse(&server, "job-d", body).await;

    let client = client_for(&server.uri(), &fast_settings());
    let recorder = Arc::new(Recorder::default());
    let handle = client.subscribe_progress("job-d", recorder.callbacks());
    wait_closed(&handle).await;

    assert_eq!(recorder.errors.lock().unwrap().len(), 1);
    let messages = recorder.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].stage, "done");
    assert_eq!(messages[0].current, Some(10));
    assert_eq!(messages[0].total, Some(10));
}

#[tokio::test]
async fn test_invalid_utf8_message_does_not_end_stream() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let mut body = b"data: \xff\xfe\n\n".to_vec();
    body.extend_from_slice(b"data: {\"stage\":\"done\",\"current\":10,\"total\":10}\n\n");
    mount_sse(&server, "binary", body).await;

    let client = client_for(&server.uri(), &fast_settings());
    let recorder = Arc::new(Recorder::default());
    let handle = client.subscribe_progress("binary", recorder.callbacks());
    wait_closed(&handle).await;

    assert_eq!(recorder.stages(), vec!["done"]);
    let errors = recorder.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        StreamError::MalformedEvent { payload, .. } => {
            assert_eq!(payload, "\u{FFFD}\u{FFFD}");
        }
        other => panic!("expected malformed event, got {other:?}"),
    }
    assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_ending_stream_mid_job_reports_lost_connection() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_sse(
        &server,
        "cut",
        "data: {\"stage\":\"processing\",\"current\":1,\"total\":10}\n\n",
    )
    .await;

    let client = client_for(&server.uri(), &fast_settings());
    let recorder = Arc::new(Recorder::default());
    let handle = client.subscribe_progress("cut", recorder.callbacks());
    wait_closed(&handle).await;

    assert_eq!(recorder.stages(), vec!["processing"]);
    let errors = recorder.errors.lock().unwrap();
    assert!(matches!(
        errors.as_slice(),
        [StreamError::Connection(e)] if e.kind() == ErrorKind::NetworkUnreachable
    ));
    assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
}

/// Serves one event over a chunked body, then drops the socket mid-body.
async fn serve_truncated_stream(listener: TcpListener) {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut request = Vec::new();
    let mut buf = [0_u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            return;
        }
        request.extend_from_slice(&buf[..n]);
    }

    let event = "data: {\"stage\":\"processing\",\"current\":1,\"total\":10}\n\n";
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\
         transfer-encoding: chunked\r\n\r\n{:x}\r\n{event}\r\n",
        event.len()
    );
    socket.write_all(response.as_bytes()).await.unwrap();
    socket.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_transport_break_after_open_reports_error_then_closes() {
    if common::sockets_unavailable() {
        return;
    }
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(serve_truncated_stream(listener));

    let client = client_for(&base_url, &fast_settings());
    let recorder = Arc::new(Recorder::default());
    let handle = client.subscribe_progress("job-7", recorder.callbacks());
    wait_closed(&handle).await;

    assert_eq!(recorder.stages(), vec!["processing"]);
    let errors = recorder.errors.lock().unwrap();
    assert!(matches!(errors.as_slice(), [StreamError::Connection(_)]));
    assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_named_events_other_than_message_are_ignored() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = concat!(
        "event: heartbeat\ndata: {\"stage\":\"ignored\"}\n\n",
        "event: message\ndata: {\"stage\":\"processing\"}\n\n",
    );
    mount_sse(&server, "named", body).await;

    let client = client_for(&server.uri(), &fast_settings());
    let recorder = Arc::new(Recorder::default());
    let handle = client.subscribe_progress("named", recorder.callbacks());
    wait_closed(&handle).await;

    assert_eq!(recorder.stages(), vec!["processing"]);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/progress/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("data: {\"stage\":\"late\"}\n\n", "text/event-stream")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), &fast_settings());
    let recorder = Arc::new(Recorder::default());
    let handle = client.subscribe_progress("slow", recorder.callbacks());

    handle.close();
    handle.close();
    assert!(handle.is_closed());
    wait_closed(&handle).await;
    drop(handle);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    assert!(recorder.messages.lock().unwrap().is_empty());
    assert!(recorder.errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stream_expires_after_max_lifetime() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/progress/stuck"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("", "text/event-stream")
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let settings = fast_settings().with_stream_lifetime(Duration::from_millis(300));
    let client = client_for(&server.uri(), &settings);
    let recorder = Arc::new(Recorder::default());
    let handle = client.subscribe_progress("stuck", recorder.callbacks());

    wait_closed(&handle).await;
    assert!(handle.is_closed());
    assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    assert!(recorder.errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_open_failure_reports_error_then_closes() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/progress/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), &fast_settings());
    let recorder = Arc::new(Recorder::default());
    let handle = client.subscribe_progress("gone", recorder.callbacks());
    wait_closed(&handle).await;

    let errors = recorder.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        StreamError::Connection(error) => {
            assert_eq!(error.kind(), ErrorKind::ClientError);
            assert_eq!(error.status_code(), Some(404));
        }
        other => panic!("expected connection error, got {other:?}"),
    }
    assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreachable_stream_reports_connection_error() {
    if common::sockets_unavailable() {
        return;
    }
    let client = client_for(&refused_base_url(), &fast_settings());
    let recorder = Arc::new(Recorder::default());
    let handle = client.subscribe_progress("job-1", recorder.callbacks());
    wait_closed(&handle).await;

    let errors = recorder.errors.lock().unwrap();
    assert!(matches!(
        errors.as_slice(),
        [StreamError::Connection(e)] if e.kind() == ErrorKind::NetworkUnreachable
    ));
    assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropping_handle_closes_stream() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/progress/dropped"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("", "text/event-stream")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), &fast_settings());
    let recorder = Arc::new(Recorder::default());
    let handle = client.subscribe_progress("dropped", recorder.callbacks());
    drop(handle);

    assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_job_id_is_percent_encoded() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_sse(&server, "job%201", "data: {\"stage\":\"complete\"}\n\n").await;

    let client = client_for(&server.uri(), &fast_settings());
    let recorder = Arc::new(Recorder::default());
    let handle = client.subscribe_progress("job 1", recorder.callbacks());
    wait_closed(&handle).await;

    assert_eq!(recorder.stages(), vec!["complete"]);
    assert!(recorder.errors.lock().unwrap().is_empty());
}
