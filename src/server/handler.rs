//! HTTP request handling
//!
//! GET and HEAD run the configured checks; OPTIONS advertises the allowed
//! methods; anything else is rejected with 405.

use crate::logging::access_timestamp;
use crate::manifest::CheckSpec;
use crate::sickbay::{CheckRunner, CommandRunner, HealthEvaluator, Verdict};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{ALLOW, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

/// Methods this endpoint answers
pub const ALLOWED_METHODS: &str = "GET, HEAD, OPTIONS";

static HEALTHY_BODY: &[u8] = b"All checks succeeded.\r\n\r\n";
static UNHEALTHY_BODY: &[u8] = b"Check failed, please see log.\r\n\r\n";

/// The configured checks together with the evaluator that runs them
#[derive(Debug)]
pub struct HealthEndpoint<R = CommandRunner> {
    evaluator: HealthEvaluator<R>,
    checks: Vec<CheckSpec>,
}

impl<R: CheckRunner> HealthEndpoint<R> {
    pub fn new(evaluator: HealthEvaluator<R>, checks: Vec<CheckSpec>) -> Self {
        Self { evaluator, checks }
    }

    /// Evaluate every configured check (blocking)
    pub fn check(&self) -> Verdict {
        self.evaluator.evaluate(&self.checks)
    }
}

/// Handle one request
///
/// The request body is never read.
pub async fn handle<B, R>(
    req: Request<B>,
    peer: SocketAddr,
    endpoint: Arc<HealthEndpoint<R>>,
) -> Response<Full<Bytes>>
where
    R: CheckRunner + Send + Sync + 'static,
{
    let method = req.method().clone();
    let response = match method {
        Method::GET | Method::HEAD => {
            let verdict = evaluate(endpoint).await;
            debug!("{} checks run, healthy: {}", verdict.executed, verdict.healthy);
            if let Some(failure) = &verdict.first_failure {
                warn!(
                    "{} failed: {}\n{}",
                    failure.spec.command,
                    failure.outcome,
                    failure.output.trim_end()
                );
            }
            health_response(verdict.healthy, method == Method::HEAD)
        }
        Method::OPTIONS => allow_response(StatusCode::OK),
        _ => allow_response(StatusCode::METHOD_NOT_ALLOWED),
    };

    info!(
        "{} - - [{}] \"{} {} {:?}\" {}",
        peer,
        access_timestamp(),
        method,
        req.uri().path(),
        req.version(),
        response.status().as_u16()
    );

    response
}

/// Run the checks off the async workers
async fn evaluate<R>(endpoint: Arc<HealthEndpoint<R>>) -> Verdict
where
    R: CheckRunner + Send + Sync + 'static,
{
    match tokio::task::spawn_blocking(move || endpoint.check()).await {
        Ok(verdict) => verdict,
        Err(e) => {
            error!("Check evaluation did not complete: {}", e);
            Verdict {
                healthy: false,
                first_failure: None,
                executed: 0,
            }
        }
    }
}

fn health_response(healthy: bool, head: bool) -> Response<Full<Bytes>> {
    let (status, body) = if healthy {
        (StatusCode::OK, HEALTHY_BODY)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, UNHEALTHY_BODY)
    };

    let mut response = if head {
        Response::new(Full::new(Bytes::new()))
    } else {
        Response::new(Full::new(Bytes::from_static(body)))
    };
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    response
}

fn allow_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sickbay::checker::CheckResult;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    fn endpoint(checks: Vec<CheckSpec>) -> Arc<HealthEndpoint> {
        Arc::new(HealthEndpoint::new(
            HealthEvaluator::new(CommandRunner),
            checks,
        ))
    }

    fn request(method: &str) -> Request<()> {
        Request::builder().method(method).uri("/").body(()).unwrap()
    }

    async fn body_of(response: Response<Full<Bytes>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    /// Counts invocations before running the real command
    #[derive(Default)]
    struct CountingRunner {
        calls: AtomicUsize,
    }

    impl CheckRunner for CountingRunner {
        fn run(&self, spec: &CheckSpec) -> CheckResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            CommandRunner.run(spec)
        }
    }

    #[tokio::test]
    async fn test_get_healthy() {
        let checks = vec![CheckSpec::new("/bin/true")];
        let response = handle(request("GET"), peer(), endpoint(checks)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(body_of(response).await, Bytes::from_static(HEALTHY_BODY));
    }

    #[tokio::test]
    async fn test_get_unhealthy() {
        let checks = vec![CheckSpec::new("/bin/false")];
        let response = handle(request("GET"), peer(), endpoint(checks)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_of(response).await, Bytes::from_static(UNHEALTHY_BODY));
    }

    #[tokio::test]
    async fn test_head_accepts_listed_codes_with_empty_body() {
        let checks = vec![CheckSpec::new("/bin/sh -c 'exit 2'").with_codes([2, 3])];
        let response = handle(request("HEAD"), peer(), endpoint(checks)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_of(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_head_unhealthy() {
        let checks = vec![CheckSpec::new("/bin/false")];
        let response = handle(request("HEAD"), peer(), endpoint(checks)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_of(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_command_is_unavailable() {
        let response = handle(
            request("GET"),
            peer(),
            endpoint(vec![CheckSpec::new("/nonexistent/check")]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_options_never_runs_checks() {
        let runner = CountingRunner::default();
        let endpoint = Arc::new(HealthEndpoint::new(
            HealthEvaluator::new(runner),
            vec![CheckSpec::new("/bin/false")],
        ));

        let response = handle(request("OPTIONS"), peer(), Arc::clone(&endpoint)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ALLOW], ALLOWED_METHODS);
        assert_eq!(endpoint.evaluator_calls(), 0);

        let response = handle(request("GET"), peer(), Arc::clone(&endpoint)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(endpoint.evaluator_calls(), 1);
    }

    #[tokio::test]
    async fn test_other_methods_not_allowed() {
        for method in ["POST", "PUT", "DELETE", "PURGE"] {
            let runner = CountingRunner::default();
            let endpoint = Arc::new(HealthEndpoint::new(
                HealthEvaluator::new(runner),
                vec![CheckSpec::new("/bin/true")],
            ));

            let response = handle(request(method), peer(), Arc::clone(&endpoint)).await;
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{}", method);
            assert_eq!(response.headers()[ALLOW], ALLOWED_METHODS);
            assert_eq!(endpoint.evaluator_calls(), 0);
        }
    }

    impl HealthEndpoint<CountingRunner> {
        fn evaluator_calls(&self) -> usize {
            self.evaluator.runner().calls.load(Ordering::SeqCst)
        }
    }
}
