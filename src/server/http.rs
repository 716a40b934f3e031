//! HTTP server implementation
//!
//! hyper http1 with TokioIo for async handling. One service, three routes:
//! the pairing trigger and the liveness probes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Args;
use crate::routes;
use crate::session::SessionController;
use crate::types::Result;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub controller: Arc<SessionController>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, controller: Arc<SessionController>) -> Self {
        Self {
            args,
            controller,
            started_at: Instant::now(),
        }
    }
}

/// Accept connections and serve them until the process is told to stop.
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!("Pairway listening on {}", state.args.listen);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state))
        }

        (Method::GET, "/pair") => routes::handle_pair(Arc::clone(&state), req.uri().query()).await,

        _ => routes::not_found(&path),
    };

    Ok(response)
}
