use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use tracing::{error, info};

/// Flips once the reconciler has completed at least one `Refresh`. Read by
/// the `/healthz` handler; written by whoever drives the reconcile loop.
#[derive(Clone, Default)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

async fn handle(req: Request<Body>, liveness: Liveness) -> Result<Response<Body>, Infallible> {
    if req.uri().path() != "/healthz" {
        return Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap());
    }
    let status = if liveness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok(Response::builder().status(status).body(Body::empty()).unwrap())
}

/// Serves `/healthz` until `stop` resolves. Binding failures are fatal —
/// the caller should treat a returned `Err` as a bootstrap failure.
pub async fn serve(
    addr: SocketAddr,
    liveness: Liveness,
    mut stop: tokio::sync::watch::Receiver<()>,
) -> std::io::Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let liveness = liveness.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, liveness.clone()))) }
    });

    let server = Server::try_bind(&addr)
        .map_err(|source| std::io::Error::new(std::io::ErrorKind::AddrInUse, source))?
        .serve(make_svc)
        .with_graceful_shutdown(async move {
            let _ = stop.changed().await;
        });

    info!(%addr, "liveness endpoint listening");
    if let Err(source) = server.await {
        error!(%source, "liveness endpoint terminated unexpectedly");
    }
    Ok(())
}
