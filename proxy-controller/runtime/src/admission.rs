use crate::{
    core::SharedAggregate,
    dispatch::{Dispatcher, HttpsCaller, Inbound},
};
use bytes::{Buf, Bytes};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, HeaderMap, Request, Response};
use kube::core::DynamicObject;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info_span, trace, warn, Instrument};

const HEALTH_PATH: &str = "/healthz";

/// Serves the proxy's primary admission endpoint.
#[derive(Clone)]
pub struct Admission {
    dispatcher: Arc<Dispatcher<HttpsCaller, SharedAggregate>>,
    path: Arc<str>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;

type Body = http_body_util::Full<Bytes>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Route {
    Proxy,
    Health,
    NotFound,
}

// === impl Admission ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        match self.route(req.method(), req.uri().path()) {
            Route::Health => return Box::pin(future::ok(health())),
            Route::NotFound => return Box::pin(future::ok(not_found())),
            Route::Proxy => {}
        }

        let admission = self.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let bytes = body.collect().await?.to_bytes();
            admission.review(parts.headers, bytes).await
        })
    }
}

impl Admission {
    pub fn new(dispatcher: Dispatcher<HttpsCaller, SharedAggregate>, path: &str) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            path: path.into(),
        }
    }

    fn route(&self, method: &http::Method, path: &str) -> Route {
        if *method == http::Method::POST && path == &*self.path {
            return Route::Proxy;
        }
        if *method == http::Method::GET && path == HEALTH_PATH {
            return Route::Health;
        }
        Route::NotFound
    }

    async fn review(self, headers: HeaderMap, bytes: Bytes) -> Result<Response<Body>, Error> {
        let review: Review = match serde_json::from_reader(bytes.clone().reader()) {
            Ok(review) => review,
            Err(error) => {
                warn!(%error, "Failed to parse request body");
                return json_response(AdmissionResponse::invalid(error).into_review());
            }
        };
        trace!(?review);

        let request: Result<crate::dispatch::Request, _> = review.try_into();
        let rsp = match request {
            Ok(request) => {
                debug!(?request);
                let span = info_span!("admission", uid = %request.uid);
                self.dispatcher
                    .dispatch(Inbound {
                        request,
                        headers,
                        body: bytes,
                    })
                    .instrument(span)
                    .await
            }
            Err(error) => {
                warn!(%error, "Invalid admission request");
                AdmissionResponse::invalid(error)
            }
        };
        debug!(?rsp);
        json_response(rsp.into_review())
    }
}

fn json_response(rsp: Review) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

fn health() -> Response<Body> {
    Response::builder()
        .status(http::StatusCode::OK)
        .body(Body::from("ok"))
        .expect("health response must be valid")
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(http::StatusCode::NOT_FOUND)
        .body(Body::default())
        .expect("not found response must be valid")
}
