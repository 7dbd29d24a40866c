use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use updater_core::{ClientErrorKind, OrchestratorClient, ServiceId};
use updater_docker::{DockerClient, DockerCredentials, DockerHost};

const SERVICE_JSON: &str = "{\"ID\":\"a1\",\"Version\":{\"Index\":9},\"Spec\":{\"Name\":\"web\",\
     \"TaskTemplate\":{\"ContainerSpec\":{\"Image\":\"nginx:1.25\"}}}}";

#[derive(Clone, Copy)]
enum AfterResponse {
    Close,
    /// Hold the connection until the client hangs up, like a keep-alive engine.
    KeepOpen,
}

/// Serve one canned response and hand back the raw request head.
fn serve_once(
    socket: &Path,
    response: String,
    after: AfterResponse,
) -> tokio::task::JoinHandle<String> {
    let listener = UnixListener::bind(socket).expect("bind");
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = vec![0u8; 8192];
        let mut request = Vec::new();
        loop {
            let n = stream.read(&mut buf).await.expect("read");
            request.extend_from_slice(&buf[..n]);
            if n == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        stream.write_all(response.as_bytes()).await.expect("write");
        match after {
            AfterResponse::Close => stream.shutdown().await.expect("shutdown"),
            AfterResponse::KeepOpen => while stream.read(&mut buf).await.unwrap_or(0) > 0 {},
        }
        String::from_utf8_lossy(&request).into_owned()
    })
}

fn json_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

fn client(socket: &Path) -> DockerClient {
    let host = DockerHost::parse(&format!("unix://{}", socket.display())).expect("host");
    DockerClient::new(&host, DockerCredentials::default()).expect("client")
}

#[tokio::test]
async fn inspects_service_over_unix_socket() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("docker.sock");
    let server = serve_once(
        &socket,
        json_response("200 OK", SERVICE_JSON),
        AfterResponse::Close,
    );

    let service = client(&socket)
        .get_service(&ServiceId::from("a1"))
        .await
        .expect("inspect");

    assert_eq!(service.name, "web");
    assert_eq!(service.version.0, 9);
    assert_eq!(service.replicas, None);

    let request = server.await.expect("server");
    assert!(request.starts_with("GET /v1.41/services/a1 HTTP/1.1\r\n"), "{request}");
    assert!(request.to_ascii_lowercase().contains("host: docker\r\n"), "{request}");
}

#[tokio::test]
async fn body_ends_at_content_length_on_open_connection() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("docker.sock");
    let server = serve_once(&socket, json_response("200 OK", "[]"), AfterResponse::KeepOpen);

    let services = tokio::time::timeout(Duration::from_secs(5), client(&socket).list_services())
        .await
        .expect("response should complete without the engine closing the socket")
        .expect("list");
    assert!(services.is_empty());

    let request = server.await.expect("server");
    assert!(request.starts_with("GET /v1.41/services HTTP/1.1\r\n"), "{request}");
}

#[tokio::test]
async fn decodes_chunked_response() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("docker.sock");
    let (head, tail) = SERVICE_JSON.split_at(20);
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n\
         {:x}\r\n{head}\r\n{:x}\r\n{tail}\r\n0\r\n\r\n",
        head.len(),
        tail.len()
    );
    let _server = serve_once(&socket, response, AfterResponse::KeepOpen);

    let service = tokio::time::timeout(
        Duration::from_secs(5),
        client(&socket).get_service(&ServiceId::from("a1")),
    )
    .await
    .expect("chunked body should terminate on the zero chunk")
    .expect("inspect");
    assert_eq!(service.name, "web");
}

#[tokio::test]
async fn socket_error_status_is_classified() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("docker.sock");
    let _server = serve_once(
        &socket,
        json_response(
            "503 Service Unavailable",
            "{\"message\":\"This node is not a swarm manager.\"}",
        ),
        AfterResponse::Close,
    );

    let host = DockerHost::Unix(socket);
    let docker = DockerClient::new(&host, DockerCredentials::default()).expect("client");
    let err = docker.list_services().await.unwrap_err();
    assert_eq!(err.kind, ClientErrorKind::Api);
    assert!(err.message.contains("not a swarm manager"));
}

#[tokio::test]
async fn malformed_response_is_a_transport_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("docker.sock");
    let _server = serve_once(&socket, "garbage\r\n\r\n".to_string(), AfterResponse::Close);

    let err = client(&socket).list_services().await.unwrap_err();
    assert_eq!(err.kind, ClientErrorKind::Transport);
}

#[tokio::test]
async fn missing_socket_is_a_transport_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let host = DockerHost::Unix(dir.path().join("absent.sock"));
    let docker = DockerClient::new(&host, DockerCredentials::default()).expect("client");
    let err = docker.list_services().await.unwrap_err();
    assert_eq!(err.kind, ClientErrorKind::Transport);
}
