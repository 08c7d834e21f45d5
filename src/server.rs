//! Health check HTTP server
//!
//! Startup runs through the phases in [`startup`]; once serving, every
//! connection answers exactly one request and is closed.

mod handler;
mod privileges;
mod startup;

use handler::HealthEndpoint;
use startup::{Ready, Startup};

use crate::error::Result;
use crate::manifest::ConfigSources;
use crate::sickbay::{CheckRunner, CommandRunner, HealthEvaluator};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};

/// How long a failed startup lingers before exiting
pub const STARTUP_FAILURE_DELAY: Duration = Duration::from_secs(5);

/// Pause after a failed accept
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Start the server and serve until SIGTERM
///
/// Errors are logged before they are returned. A failed startup returns only
/// after [`STARTUP_FAILURE_DELAY`], so a supervisor does not respawn in a hot loop.
pub async fn run(sources: ConfigSources) -> Result<()> {
    let mut startup = Startup::new();

    let ready = match startup.run(&sources).await {
        Ok(ready) => ready,
        Err(e) => {
            startup.fail(&e);
            tokio::time::sleep(STARTUP_FAILURE_DELAY).await;
            return Err(e);
        }
    };
    startup.serving().inspect_err(|e| error!("{}", e))?;
    debug!("Startup reached {:?}", startup.phase());

    let Ready { listener, settings } = ready;
    for check in &settings.checks {
        debug!("Configured check: {}", check);
    }
    info!("Server started on port {}", settings.port);

    let endpoint = Arc::new(HealthEndpoint::new(
        HealthEvaluator::new(CommandRunner),
        settings.checks,
    ));
    serve(listener, endpoint)
        .await
        .inspect_err(|e| error!("{}", e))
}

/// Accept connections until SIGTERM arrives
pub async fn serve<R>(listener: TcpListener, endpoint: Arc<HealthEndpoint<R>>) -> Result<()>
where
    R: CheckRunner + Send + Sync + 'static,
{
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };

                let endpoint = Arc::clone(&endpoint);
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let endpoint = Arc::clone(&endpoint);
                        async move {
                            Ok::<_, Infallible>(handler::handle(req, peer, endpoint).await)
                        }
                    });

                    if let Err(e) = http1::Builder::new()
                        .keep_alive(false)
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!("Connection from {} ended: {}", peer, e);
                    }
                });
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::CheckSpec;
    use handler::ALLOWED_METHODS;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    type ServerTask = tokio::task::JoinHandle<Result<()>>;

    async fn spawn_server(checks: Vec<CheckSpec>) -> (SocketAddr, ServerTask) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let endpoint = Arc::new(HealthEndpoint::new(
            HealthEvaluator::new(CommandRunner),
            checks,
        ));
        (addr, tokio::spawn(serve(listener, endpoint)))
    }

    async fn roundtrip(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn test_serves_healthy_over_tcp() {
        // serve() listens for SIGTERM
        let _guard = crate::signal_lock();
        let (addr, server) = spawn_server(vec![CheckSpec::new("/bin/true")]).await;

        let response = roundtrip(addr, "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
        assert!(response.ends_with("All checks succeeded.\r\n\r\n"));

        server.abort();
    }

    #[tokio::test]
    async fn test_serves_unhealthy_over_tcp() {
        let _guard = crate::signal_lock();
        let (addr, server) = spawn_server(vec![
            CheckSpec::new("/bin/true"),
            CheckSpec::new("/bin/false"),
        ])
        .await;

        let response = roundtrip(addr, "GET /status HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 503"), "{}", response);

        server.abort();
    }

    #[tokio::test]
    async fn test_connection_closes_after_one_request() {
        let _guard = crate::signal_lock();
        let (addr, server) = spawn_server(vec![CheckSpec::new("/bin/true")]).await;

        let options = "OPTIONS / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let response = roundtrip(addr, &options.repeat(2)).await;
        assert_eq!(response.matches("HTTP/1.1 200").count(), 1, "{}", response);
        assert!(response.contains(ALLOWED_METHODS));

        server.abort();
    }
}
