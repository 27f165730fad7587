use std::{cell::RefCell, fmt, rc::Rc};

use actix_utils::future::{Ready, ready};
use actix_web::dev::Payload;
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest, error::ErrorInternalServerError};

/// Per-request annotations read by the access log once the response is done.
///
/// Cloning is cheap and every clone points at the same state, so a value
/// recorded deep inside a handler is seen by the logger that attached the
/// context. The context lives in the request extensions; [`ProxyLogger`]
/// attaches a fresh one to every request.
///
/// The context can also be taken as a handler argument:
/// ```rust
/// use actix_web::HttpResponse;
/// use actix_web_middleware_proxylog::RequestContext;
///
/// async fn handler(ctx: RequestContext) -> HttpResponse {
///     ctx.record_backend("http://10.0.0.5:8080");
///     HttpResponse::Ok().finish()
/// }
/// ```
///
/// [`ProxyLogger`]: crate::ProxyLogger
#[derive(Debug, Clone, Default)]
pub struct RequestContext(Rc<RefCell<State>>);

#[derive(Debug, Default)]
struct State {
    error: Option<String>,
    backend: Option<String>,
}

impl RequestContext {
    /// Creates a context with no error and no backend.
    pub fn new() -> Self {
        RequestContext::default()
    }

    /// Records the upstream the request was routed to.
    pub fn record_backend(&self, backend: impl fmt::Display) {
        self.0.borrow_mut().backend = Some(backend.to_string());
    }

    /// Records the terminal error of the request. A later call replaces an
    /// earlier one.
    pub fn record_error(&self, err: impl fmt::Display) {
        self.0.borrow_mut().error = Some(err.to_string());
    }

    pub fn backend(&self) -> Option<String> {
        self.0.borrow().backend.clone()
    }

    /// Message of the recorded terminal error.
    pub fn error(&self) -> Option<String> {
        self.0.borrow().error.clone()
    }

    pub(crate) fn has_error(&self) -> bool {
        self.0.borrow().error.is_some()
    }
}

/// Attaches a fresh [`RequestContext`] to `req`, replacing any previous one.
pub fn attach_context<R: HttpMessage>(req: &R) -> RequestContext {
    let ctx = RequestContext::new();
    req.extensions_mut().insert(ctx.clone());
    ctx
}

fn context_of<R: HttpMessage>(req: &R) -> Option<RequestContext> {
    req.extensions().get::<RequestContext>().cloned()
}

/// Records the resolved upstream for `req`.
///
/// Works even when no context has been attached yet: a new one is attached
/// so the value is not lost.
pub fn record_backend<R: HttpMessage>(req: &R, backend: impl fmt::Display) {
    let ctx = context_of(req).unwrap_or_else(|| attach_context(req));
    ctx.record_backend(backend);
}

/// Records the terminal error for `req`. Does nothing if the request has no
/// context, i.e. the logger middleware is not installed.
pub fn record_error<R: HttpMessage>(req: &R, err: impl fmt::Display) {
    match context_of(req) {
        Some(ctx) => ctx.record_error(err),
        None => {
            #[cfg(feature = "log")]
            log::debug!("No request context, dropping error: {}", err);
        }
    }
}

pub fn read_backend<R: HttpMessage>(req: &R) -> Option<String> {
    context_of(req).and_then(|ctx| ctx.backend())
}

pub fn read_error<R: HttpMessage>(req: &R) -> Option<String> {
    context_of(req).and_then(|ctx| ctx.error())
}

impl FromRequest for RequestContext {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(context_of(req).ok_or_else(|| {
            ErrorInternalServerError("request context missing; is ProxyLogger installed?")
        }))
    }
}
