use futures::future;
use hyper::{Body, Request, Response};
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

#[instrument(skip(ready, registry, drain))]
pub async fn serve(
    addr: SocketAddr,
    ready: watch::Receiver<bool>,
    registry: Arc<Registry>,
    drain: drain::Watch,
) -> Result<(), hyper::Error> {
    let server = hyper::server::Server::try_bind(&addr)?.serve(hyper::service::make_service_fn(
        move |_conn| {
            let ready = ready.clone();
            let registry = registry.clone();
            future::ok::<_, hyper::Error>(hyper::service::service_fn(
                move |req: Request<Body>| {
                    let rsp = match req.uri().path() {
                        "/ready" => handle_ready(&ready, &req),
                        "/metrics" => handle_metrics(&registry, &req),
                        _ => status(hyper::StatusCode::NOT_FOUND),
                    };
                    future::ok::<_, hyper::Error>(rsp)
                },
            ))
        },
    ));
    let addr = server.local_addr();
    info!(%addr, "HTTP admin server listening");

    tokio::select! {
        res = server => res,
        handle = drain.signaled() => {
            debug!("Shutting down");
            drop(handle);
            Ok(())
        }
    }
}

fn handle_ready(ready: &watch::Receiver<bool>, req: &Request<Body>) -> Response<Body> {
    match *req.method() {
        hyper::Method::GET | hyper::Method::HEAD => {
            if *ready.borrow() {
                text(hyper::StatusCode::OK, "ready\n".to_string())
            } else {
                text(
                    hyper::StatusCode::INTERNAL_SERVER_ERROR,
                    "not ready\n".to_string(),
                )
            }
        }
        _ => status(hyper::StatusCode::METHOD_NOT_ALLOWED),
    }
}

fn handle_metrics(registry: &Registry, req: &Request<Body>) -> Response<Body> {
    match *req.method() {
        hyper::Method::GET | hyper::Method::HEAD => {
            let mut body = String::new();
            match prometheus_client::encoding::text::encode(&mut body, registry) {
                Ok(()) => text(hyper::StatusCode::OK, body),
                Err(error) => {
                    tracing::error!(%error, "Failed to encode metrics");
                    status(hyper::StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        }
        _ => status(hyper::StatusCode::METHOD_NOT_ALLOWED),
    }
}

fn text(code: hyper::StatusCode, body: String) -> Response<Body> {
    let mut rsp = Response::new(Body::from(body));
    *rsp.status_mut() = code;
    rsp.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain"),
    );
    rsp
}

fn status(code: hyper::StatusCode) -> Response<Body> {
    let mut rsp = Response::new(Body::default());
    *rsp.status_mut() = code;
    rsp
}
