// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The `/report` endpoint.

use crate::errors::AgentError;
use crate::report::ReportStore;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, http, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub const REPORT_ENDPOINT_PATH: &str = "/report";

fn handle_request<B>(
    req: &Request<B>,
    reports: &ReportStore,
) -> http::Result<Response<Full<Bytes>>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, REPORT_ENDPOINT_PATH) => report_response(reports),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::default()),
    }
}

fn report_response(reports: &ReportStore) -> http::Result<Response<Full<Bytes>>> {
    match serde_json::to_vec(&reports.snapshot()) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body))),
        Err(e) => {
            error!("Failed to serialize report: {e}");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::default())
        }
    }
}

/// Accept failures that only concern the peer of one connection
fn is_peer_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

/// Next finished connection handler, or never when none are in flight
async fn reap(connections: &mut JoinSet<()>) -> Result<(), JoinError> {
    match connections.join_next().await {
        Some(finished) => finished,
        None => std::future::pending().await,
    }
}

fn spawn_connection(
    connections: &mut JoinSet<()>,
    server: &http1::Builder,
    stream: TcpStream,
    peer: SocketAddr,
    reports: &Arc<ReportStore>,
) {
    let server = server.clone();
    let reports = Arc::clone(reports);
    let service = service_fn(move |req: Request<Incoming>| {
        let reports = Arc::clone(&reports);
        async move { handle_request(&req, &reports) }
    });
    connections.spawn(async move {
        if let Err(e) = server.serve_connection(TokioIo::new(stream), service).await {
            debug!("Report connection from {peer} failed: {e}");
        }
    });
}

/// Serves reports on an already bound listener until `cancel` fires.
/// Open connections are aborted on the way out.
pub async fn serve(
    listener: TcpListener,
    reports: Arc<ReportStore>,
    cancel: CancellationToken,
) -> Result<(), AgentError> {
    let server = http1::Builder::new();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    spawn_connection(&mut connections, &server, stream, peer, &reports);
                }
                Err(e) if is_peer_error(&e) => debug!("Dropped report connection: {e}"),
                Err(e) => {
                    error!("Report endpoint stopped accepting: {e}");
                    connections.shutdown().await;
                    return Err(AgentError::Server(e.to_string()));
                }
            },
            Err(e) = reap(&mut connections) => {
                if e.is_panic() {
                    error!("Report connection handler panicked: {e:?}");
                }
            }
        }
    }

    connections.shutdown().await;
    Ok(())
}

/// Binds `0.0.0.0:<port>` and serves reports on it
pub async fn serve_reports(
    port: u16,
    reports: Arc<ReportStore>,
    cancel: CancellationToken,
) -> Result<(), AgentError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| AgentError::Bind { port, source })?;
    info!("Report endpoint listening on {addr}{REPORT_ENDPOINT_PATH}");
    serve(listener, reports, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{PublisherReport, TaskReport};

    #[test]
    fn test_unknown_path_is_not_found() {
        let reports = ReportStore::new();
        let req = Request::builder()
            .uri("/metrics")
            .body(())
            .expect("request");
        let response = handle_request(&req, &reports).expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let req = Request::builder()
            .method(Method::POST)
            .uri(REPORT_ENDPOINT_PATH)
            .body(())
            .expect("request");
        let response = handle_request(&req, &reports).expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_only_peer_errors_keep_accepting() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionRefused,
        ] {
            assert!(is_peer_error(&io::Error::from(kind)));
        }
        assert!(!is_peer_error(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_peer_error(&io::Error::other("too many open files")));
    }

    #[tokio::test]
    async fn test_cancel_closes_idle_connections() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(
            listener,
            Arc::new(ReportStore::new()),
            cancel.clone(),
        ));

        // held open without sending a request
        let _idle = TcpStream::connect(addr).await.expect("connect");
        tokio::task::yield_now().await;

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .expect("server stops on cancel")
            .expect("server task")
            .expect("server exits cleanly");
    }

    #[tokio::test]
    async fn test_report_endpoint_serves_snapshot() {
        let reports = Arc::new(ReportStore::new());
        reports.update_task_report(
            "cpu-task",
            TaskReport::now("cpu-task", "procfs", "Unable to collect metrics", 3),
        );
        reports.update_publisher_report(
            "file-out",
            PublisherReport::now("file-out", "file", "disk full", 1),
        );

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, Arc::clone(&reports), cancel.clone()));

        let body: serde_json::Value = reqwest::get(format!("http://{addr}{REPORT_ENDPOINT_PATH}"))
            .await
            .expect("request report")
            .json()
            .await
            .expect("json body");

        assert_eq!(body["tasks"]["cpu-task"]["Plugin"], "procfs");
        assert_eq!(body["tasks"]["cpu-task"]["FailureCount"], 3);
        assert_eq!(body["publishers"]["file-out"]["LastErrorMessage"], "disk full");

        cancel.cancel();
        server
            .await
            .expect("server task")
            .expect("server exits cleanly");
    }
}
