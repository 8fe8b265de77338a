use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use completion_adapter::{
    AzureTextCompletion, BlockingCompletionOutcome, CompletionOutcome, CompletionRequest, Message,
    MessageRole,
};
use futures::StreamExt;
use serde_json::{Value, json};

#[derive(Debug, Clone)]
struct MockResponse {
    status_code: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl MockResponse {
    fn new(status_code: u16, headers: Vec<(String, String)>, body: &str) -> Self {
        Self {
            status_code,
            headers,
            body: body.to_string(),
        }
    }

    fn ok(body: &str) -> Self {
        Self::new(200, Vec::new(), body)
    }
}

struct MockServer {
    addr: std::net::SocketAddr,
    captured_requests: Arc<Mutex<Vec<String>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockServer {
    fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");

        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));
        let captured_requests = Arc::new(Mutex::new(Vec::new()));

        let queue_clone = Arc::clone(&queue);
        let captured_clone = Arc::clone(&captured_requests);

        let handle = thread::spawn(move || {
            loop {
                let next_response = {
                    let mut queue = queue_clone.lock().expect("queue lock");
                    queue.pop_front()
                };

                let Some(response) = next_response else {
                    break;
                };

                let (mut stream, _) = listener.accept().expect("accept connection");
                stream
                    .set_read_timeout(Some(Duration::from_secs(3)))
                    .expect("set stream timeout");

                let request = read_http_request_with_body(&mut stream);
                captured_clone.lock().expect("capture lock").push(request);

                let response_text = build_http_response(&response);
                stream
                    .write_all(response_text.as_bytes())
                    .expect("write response");
                stream.flush().expect("flush response");
            }
        });

        Self {
            addr,
            captured_requests,
            handle: Some(handle),
        }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn captured_request_paths(&self) -> Vec<String> {
        self.captured_requests
            .lock()
            .expect("capture lock")
            .iter()
            .map(|raw_request| {
                let request_line = raw_request.lines().next().unwrap_or_default();
                request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }

    fn captured_bodies(&self) -> Vec<Value> {
        self.captured_requests
            .lock()
            .expect("capture lock")
            .iter()
            .filter_map(|raw_request| {
                let (_, body) = raw_request.split_once("\r\n\r\n")?;
                serde_json::from_str(body).ok()
            })
            .collect()
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("join mock server");
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_http_request_with_body(stream: &mut std::net::TcpStream) -> String {
    let mut request = Vec::new();
    let mut chunk = [0_u8; 1024];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(bytes_read) => {
                request.extend_from_slice(&chunk[..bytes_read]);

                if let Some(header_end) =
                    request.windows(4).position(|window| window == b"\r\n\r\n")
                {
                    let headers = String::from_utf8_lossy(&request[..header_end]).to_string();
                    let content_length = headers
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            if name.eq_ignore_ascii_case("content-length") {
                                value.trim().parse::<usize>().ok()
                            } else {
                                None
                            }
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            Err(error)
                if error.kind() == std::io::ErrorKind::WouldBlock
                    || error.kind() == std::io::ErrorKind::TimedOut =>
            {
                break;
            }
            Err(error) => panic!("failed reading request: {error}"),
        }
    }

    String::from_utf8_lossy(&request).to_string()
}

fn build_http_response(response: &MockResponse) -> String {
    let mut rendered = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status_code,
        status_reason(response.status_code),
        response.body.len(),
    );
    for (name, value) in &response.headers {
        rendered.push_str(name);
        rendered.push_str(": ");
        rendered.push_str(value);
        rendered.push_str("\r\n");
    }
    rendered.push_str("\r\n");
    rendered.push_str(&response.body);
    rendered
}

fn status_reason(status_code: u16) -> &'static str {
    match status_code {
        200 => "OK",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

const COMPLETION_BODY: &str = r#"{
    "id": "cmpl-42",
    "object": "text_completion",
    "created": 1700000000,
    "model": "gpt-35-turbo-instruct",
    "choices": [{"text": "the capital of France is Paris", "index": 0, "finish_reason": "stop"}],
    "usage": {"prompt_tokens": 7, "completion_tokens": 8, "total_tokens": 15}
}"#;

const STREAM_BODY: &str = "data: {\"id\":\"cmpl-42\",\"choices\":[{\"text\":\"Par\",\"index\":0}]}\n\n\
data: {\"id\":\"cmpl-42\",\"choices\":[{\"text\":\"is\",\"index\":0,\"finish_reason\":\"stop\"}]}\n\n\
data: [DONE]\n\n";

fn request_to(api_base: &str) -> CompletionRequest {
    CompletionRequest::new(
        "gpt-35-turbo-instruct",
        vec![
            Message::new(MessageRole::System, "answer briefly"),
            Message::new(MessageRole::User, "what is the capital of France?"),
        ],
        api_base,
    )
    .with_api_key("sk-test")
    .with_api_version("2024-02-01")
    .with_timeout(Duration::from_secs(5))
}

#[test]
fn test_blocking_completion_end_to_end() {
    let mut server = MockServer::start(vec![MockResponse::ok(COMPLETION_BODY)]);

    let outcome = AzureTextCompletion::new()
        .completion(request_to(&server.url()))
        .expect("completion");

    let BlockingCompletionOutcome::Completed(response) = outcome else {
        panic!("expected a completed response");
    };
    assert_eq!(response.object, "chat.completion");
    assert_eq!(
        response.choices[0].message.content.as_deref(),
        Some("the capital of France is Paris")
    );
    assert_eq!(response.usage.total_tokens, Some(15));

    server.shutdown();
    let paths = server.captured_request_paths();
    assert_eq!(
        paths[0],
        "/openai/deployments/gpt-35-turbo-instruct/completions?api-version=2024-02-01"
    );
    let bodies = server.captured_bodies();
    assert_eq!(
        bodies[0]["prompt"],
        "answer briefly\nwhat is the capital of France?"
    );
}

#[tokio::test]
async fn test_async_completion_end_to_end() {
    let mut server = MockServer::start(vec![MockResponse::ok(COMPLETION_BODY)]);

    let outcome = AzureTextCompletion::new()
        .acompletion(request_to(&server.url()))
        .await
        .expect("completion");

    let CompletionOutcome::Completed(response) = outcome else {
        panic!("expected a completed response");
    };
    assert_eq!(
        response.choices[0].message.content.as_deref(),
        Some("the capital of France is Paris")
    );
    server.shutdown();
}

#[test]
fn test_blocking_streaming_end_to_end() {
    let mut server = MockServer::start(vec![MockResponse::ok(STREAM_BODY)]);

    let request = request_to(&server.url()).with_option("stream", json!(true));
    let outcome = AzureTextCompletion::new()
        .completion(request)
        .expect("streaming call");

    let BlockingCompletionOutcome::Streaming(stream) = outcome else {
        panic!("expected a stream");
    };
    assert_eq!(stream.model(), "gpt-35-turbo-instruct");

    let chunks: Vec<_> = stream.map(|chunk| chunk.expect("chunk")).collect();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].choices[0].text, "Par");
    assert_eq!(chunks[1].choices[0].text, "is");
    assert_eq!(chunks[1].choices[0].finish_reason.as_deref(), Some("stop"));
    server.shutdown();
}

#[tokio::test]
async fn test_async_streaming_end_to_end() {
    let mut server = MockServer::start(vec![MockResponse::ok(STREAM_BODY)]);

    let request = request_to(&server.url()).with_option("stream", json!(true));
    let outcome = AzureTextCompletion::new()
        .acompletion(request)
        .await
        .expect("streaming call");

    let CompletionOutcome::Streaming(mut stream) = outcome else {
        panic!("expected a stream");
    };

    let mut texts = Vec::new();
    while let Some(chunk) = stream.next().await {
        texts.push(chunk.expect("chunk").choices[0].text.clone());
    }
    assert_eq!(texts, vec!["Par".to_string(), "is".to_string()]);
    server.shutdown();
}

#[test]
fn test_upstream_failure_end_to_end() {
    let mut server = MockServer::start(vec![MockResponse::new(
        500,
        Vec::new(),
        r#"{"error":{"message":"backend exploded"}}"#,
    )]);

    let request = request_to(&server.url()).with_option("max_retries", json!(0));
    let error = AzureTextCompletion::new()
        .completion(request)
        .expect_err("upstream failure");

    assert_eq!(error.status_code(), 500);
    assert!(error.message().contains("backend exploded"));
    server.shutdown();
}

#[test]
fn test_config_failure_never_reaches_the_network() {
    let request = CompletionRequest::new(
        "gpt-35-turbo-instruct",
        Vec::new(),
        "http://127.0.0.1:1/unreachable",
    )
    .with_api_key("sk-test");

    let error = AzureTextCompletion::new()
        .completion(request)
        .expect_err("config failure");
    assert_eq!(error.status_code(), 422);
}
