use crate::http::{make_error_response, make_text_response};
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Serves `/health` and `/ready` on the admin listener. Liveness is
/// unconditional; readiness is delegated to the injected closure.
pub struct AdminService<F, E> {
    is_ready: F,
    _error: PhantomData<E>,
}

impl<F, E> AdminService<F, E>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self {
            is_ready,
            _error: PhantomData,
        }
    }
}

impl<F, E> Service<Request<Incoming>> for AdminService<F, E>
where
    F: Fn() -> bool + Clone + Send + 'static,
    E: Send + Sync + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let is_ready = (self.is_ready)();

        Box::pin(async move {
            let res = match req.uri().path() {
                "/health" => make_text_response(StatusCode::OK, "ok\n"),
                "/ready" => match is_ready {
                    true => make_text_response(StatusCode::OK, "ok\n"),
                    false => make_error_response(StatusCode::SERVICE_UNAVAILABLE),
                },
                _ => make_error_response(StatusCode::NOT_FOUND),
            };
            Ok(res)
        })
    }
}
