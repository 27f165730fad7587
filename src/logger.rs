use std::{
    future::Future,
    marker::PhantomData,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

#[cfg(feature = "log")]
use std::borrow::Cow;
#[cfg(not(feature = "log"))]
use std::io;

use bytes::Bytes;
use futures_core::ready;
use pin_project_lite::pin_project;
use time::{OffsetDateTime, UtcOffset};

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::body::{BodySize, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::HeaderName;
use actix_web::{Error, Result};

use crate::context::attach_context;
use crate::ignore::IgnoreSet;
use crate::line::{LogLineParams, build_line};
#[cfg(feature = "log")]
use crate::sink::LogFacade;
use crate::sink::LogSink;

const DEFAULT_TRACE_HEADER: &str = "x-cloud-trace-context";

/// Middleware writing one Common Log Format line per request, extended with
/// reverse-proxy annotations.
///
/// ```text
/// 1.2.3.4 - - [05/Mar/2024:14:07:09 +0000] "GET /api/x --> http://10.0.0.5:8080 HTTP/1.1" 200 512 XFF(10.1.1.1) host(example.com) upstream(1.5ms) err: boom
/// ```
///
/// The line is written when the response body has been fully sent (or
/// dropped), so the size is the number of body bytes actually streamed.
///
/// # Examples
/// ```rust
/// use actix_web::App;
/// use actix_web_middleware_proxylog::ProxyLogger;
///
/// let app = App::new()
///     .wrap(ProxyLogger::new(std::io::stdout()).ignore("^/health"));
/// ```
pub struct ProxyLogger(Rc<Inner>);

struct Inner {
    ignores: IgnoreSet,
    trace_header: HeaderName,
    offset: UtcOffset,
    sink: Rc<dyn LogSink>,
}

impl ProxyLogger {
    /// Create `ProxyLogger` middleware writing to `sink`.
    pub fn new<S: LogSink + 'static>(sink: S) -> ProxyLogger {
        ProxyLogger(Rc::new(Inner {
            ignores: IgnoreSet::new(),
            trace_header: HeaderName::from_static(DEFAULT_TRACE_HEADER),
            offset: UtcOffset::UTC,
            sink: Rc::new(sink),
        }))
    }

    fn inner_mut(&mut self) -> &mut Inner {
        Rc::get_mut(&mut self.0).expect("ProxyLogger is configured before it is installed")
    }

    /// Do not log requests whose path matches the regex `pattern`.
    ///
    /// # Panics
    /// If `pattern` is not a valid regex. Use [`try_ignore`](Self::try_ignore)
    /// for patterns that come from configuration.
    pub fn ignore<T: AsRef<str>>(self, pattern: T) -> Self {
        let pattern = pattern.as_ref();
        self.try_ignore(pattern)
            .unwrap_or_else(|err| panic!("invalid ignore pattern {pattern:?}: {err}"))
    }

    /// Like [`ignore`](Self::ignore), returning the compile error instead of
    /// panicking.
    pub fn try_ignore<T: AsRef<str>>(mut self, pattern: T) -> Result<Self, regex::Error> {
        self.inner_mut().ignores.add(pattern.as_ref())?;
        Ok(self)
    }

    /// Do not log requests for exactly this path.
    pub fn ignore_path<T: AsRef<str>>(self, path: T) -> Self {
        self.ignore(format!("^{}$", regex::escape(path.as_ref())))
    }

    /// Replace the ignore patterns with a prebuilt set.
    pub fn ignores(mut self, ignores: IgnoreSet) -> Self {
        self.inner_mut().ignores = ignores;
        self
    }

    /// Request header whose value is appended after the upstream latency.
    /// Defaults to `X-Cloud-Trace-Context`.
    pub fn trace_header(mut self, header: &str) -> Self {
        self.inner_mut().trace_header = HeaderName::try_from(header)
            .unwrap_or_else(|_| panic!("invalid trace header name {header:?}"));
        self
    }

    /// Offset used for the request timestamp. Defaults to UTC.
    pub fn utc_offset(mut self, offset: UtcOffset) -> Self {
        self.inner_mut().offset = offset;
        self
    }

    /// Write lines to `sink` instead.
    pub fn sink<S: LogSink + 'static>(mut self, sink: S) -> Self {
        self.inner_mut().sink = Rc::new(sink);
        self
    }

    /// Send lines to the `log` facade under `target`.
    ///
    /// By default, the log target is `actix_web_middleware_proxylog::logger`.
    #[cfg(feature = "log")]
    pub fn log_target(self, target: impl Into<Cow<'static, str>>) -> Self {
        self.sink(LogFacade::new(target))
    }
}

impl Default for ProxyLogger {
    /// Create `ProxyLogger` middleware that sends lines to the `log` facade,
    /// or to stdout when the `log` feature is disabled.
    fn default() -> Self {
        #[cfg(feature = "log")]
        {
            ProxyLogger::new(LogFacade::new("actix_web_middleware_proxylog::logger"))
        }
        #[cfg(not(feature = "log"))]
        {
            ProxyLogger::new(io::stdout())
        }
    }
}

/// Writes the line for `params` to `sink` unless its path is ignored.
///
/// Write failures are dropped: access logging never fails a request.
pub fn emit<S: LogSink + ?Sized>(sink: &S, ignores: &IgnoreSet, params: &LogLineParams) {
    if ignores.is_ignored_raw(params.url.path()) {
        return;
    }

    let line = build_line(params);
    if let Err(err) = sink.write_line(&line) {
        #[cfg(feature = "log")]
        log::debug!("Failed to write access log line: {}", err);
        #[cfg(not(feature = "log"))]
        let _ = err;
    }
}

impl<S, B> Transform<S, ServiceRequest> for ProxyLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<StreamLog<B>>;
    type Error = Error;
    type Transform = ProxyLoggerMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ProxyLoggerMiddlewareService {
            service,
            inner: Rc::clone(&self.0),
        }))
    }
}

pin_project! {
    pub struct StreamLog<B> {
        #[pin]
        body: B,
        params: Option<LogLineParams>,
        size: usize,
        inner: Rc<Inner>,
    }

    impl<B> PinnedDrop for StreamLog<B> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(mut params) = this.params.take() {
                params.size = *this.size;
                emit(this.inner.sink.as_ref(), &this.inner.ignores, &params);
            }
        }
    }
}

impl<B: MessageBody> MessageBody for StreamLog<B> {
    type Error = B::Error;

    #[inline]
    fn size(&self) -> BodySize {
        self.body.size()
    }

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, Self::Error>>> {
        let this = self.project();

        match ready!(this.body.poll_next(cx)) {
            Some(Ok(chunk)) => {
                *this.size += chunk.len();
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(err)) => Poll::Ready(Some(Err(err))),
            None => Poll::Ready(None),
        }
    }
}

/// Logger middleware service.
pub struct ProxyLoggerMiddlewareService<S> {
    inner: Rc<Inner>,
    service: S,
}

impl<S, B> Service<ServiceRequest> for ProxyLoggerMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<StreamLog<B>>;
    type Error = Error;
    type Future = ProxyLoggerResponse<S, B>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Ignored requests still get a context so handlers can record into it.
        let context = attach_context(&req);

        let params = if self.inner.ignores.is_ignored_raw(req.path()) {
            None
        } else {
            let now = OffsetDateTime::now_utc().to_offset(self.inner.offset);
            Some(LogLineParams::from_request(
                &req,
                context,
                &self.inner.trace_header,
                now,
            ))
        };

        ProxyLoggerResponse {
            fut: self.service.call(req),
            params,
            inner: Rc::clone(&self.inner),
            _phantom: PhantomData,
        }
    }
}

pin_project! {
    pub struct ProxyLoggerResponse<S, B>
    where
        B: MessageBody,
        S: Service<ServiceRequest>,
    {
        #[pin]
        fut: S::Future,
        params: Option<LogLineParams>,
        inner: Rc<Inner>,
        _phantom: PhantomData<B>,
    }
}

impl<S, B> Future for ProxyLoggerResponse<S, B>
where
    B: MessageBody,
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Output = Result<ServiceResponse<StreamLog<B>>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let res = match ready!(this.fut.poll(cx)) {
            Ok(res) => res,
            Err(err) => return Poll::Ready(Err(err)),
        };

        if let Some(params) = this.params.as_mut() {
            params.status = res.status();

            if let Some(error) = res.response().error() {
                #[cfg(feature = "log")]
                log::debug!("Error in response: {:?}", error);

                // An error recorded by the handler is more specific than the
                // one it turned into a response.
                if !params.context.has_error() {
                    params.context.record_error(error);
                }
            }
        }

        let params = this.params.take();
        let inner = Rc::clone(this.inner);

        Poll::Ready(Ok(res.map_body(move |_, body| StreamLog {
            body,
            params,
            size: 0,
            inner,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, io};

    use actix_web::{
        App, HttpRequest, HttpResponse, error,
        http::{StatusCode, header},
        test::{TestRequest, call_service, init_service, read_body},
        web,
    };

    use crate::context::{RequestContext, record_backend, record_error};

    #[derive(Clone, Default)]
    struct CaptureSink(Rc<RefCell<Vec<String>>>);

    impl CaptureSink {
        fn lines(&self) -> Vec<String> {
            self.0.borrow().clone()
        }
    }

    impl LogSink for CaptureSink {
        fn write_line(&self, line: &[u8]) -> io::Result<()> {
            self.0
                .borrow_mut()
                .push(String::from_utf8(line.to_vec()).unwrap());
            Ok(())
        }
    }

    struct FailingSink;

    impl LogSink for FailingSink {
        fn write_line(&self, _: &[u8]) -> io::Result<()> {
            Err(io::Error::other("sink closed"))
        }
    }

    fn get(uri: &str) -> TestRequest {
        TestRequest::get()
            .uri(uri)
            .insert_header((header::HOST, "example.com"))
            .insert_header(("x-forwarded-for", "10.1.1.1"))
            .peer_addr("1.2.3.4:5555".parse().unwrap())
    }

    #[test]
    fn test_proxy_logger_builder() {
        let logger = ProxyLogger::default();
        assert_eq!(logger.0.trace_header, "x-cloud-trace-context");
        assert_eq!(logger.0.offset, UtcOffset::UTC);
        assert!(logger.0.ignores.is_empty());

        let logger = ProxyLogger::new(CaptureSink::default())
            .ignore("^/health")
            .ignore_path("/metrics.json")
            .trace_header("X-Trace-Id")
            .utc_offset(UtcOffset::from_hms(2, 0, 0).unwrap());

        assert_eq!(logger.0.trace_header, "x-trace-id");
        assert_eq!(logger.0.ignores.len(), 2);
        assert!(logger.0.ignores.is_ignored("/health/live"));
        assert!(logger.0.ignores.is_ignored("/metrics.json"));
        assert!(!logger.0.ignores.is_ignored("/metrics_json"));
        assert!(!logger.0.ignores.is_ignored("/metrics.json/raw"));
    }

    #[test]
    fn test_try_ignore_rejects_invalid_pattern() {
        assert!(ProxyLogger::default().try_ignore("^/health(").is_err());
        assert!(ProxyLogger::default().try_ignore("^/health").is_ok());
    }

    #[test]
    #[should_panic(expected = "invalid ignore pattern")]
    fn test_ignore_panics_on_invalid_pattern() {
        let _ = ProxyLogger::default().ignore("[unclosed");
    }

    #[test]
    fn test_emit() {
        let sink = CaptureSink::default();
        let ignores = IgnoreSet::from_patterns(["^/health"]).unwrap();

        let req = get("/health").to_srv_request();
        let params = LogLineParams::from_request(
            &req,
            RequestContext::new(),
            &HeaderName::from_static(DEFAULT_TRACE_HEADER),
            OffsetDateTime::now_utc(),
        );
        emit(&sink, &ignores, &params);
        assert!(sink.lines().is_empty());

        let req = get("/he%61lth/live").to_srv_request();
        let params = LogLineParams::from_request(
            &req,
            RequestContext::new(),
            &HeaderName::from_static(DEFAULT_TRACE_HEADER),
            OffsetDateTime::now_utc(),
        );
        emit(&sink, &ignores, &params);
        assert!(sink.lines().is_empty());

        let req = get("/foo").to_srv_request();
        let params = LogLineParams::from_request(
            &req,
            RequestContext::new(),
            &HeaderName::from_static(DEFAULT_TRACE_HEADER),
            OffsetDateTime::now_utc(),
        );
        emit(&sink, &ignores, &params);
        emit(&FailingSink, &ignores, &params);

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("1.2.3.4 - - ["));
        assert!(lines[0].ends_with(")\n"));
    }

    #[actix_web::test]
    async fn test_logs_completed_request() {
        let sink = CaptureSink::default();
        let app = init_service(
            App::new()
                .wrap(ProxyLogger::new(sink.clone()))
                .route(
                    "/foo",
                    web::get().to(|| async { HttpResponse::Ok().body(vec![b'x'; 512]) }),
                ),
        )
        .await;

        let res = call_service(&app, get("/foo").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(read_body(res).await.len(), 512);

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert!(line.starts_with("1.2.3.4 - - ["), "{line}");
        assert!(line.contains(" +0000] \"GET /foo HTTP/1.1\" 200 512 "), "{line}");
        assert!(line.contains(" XFF(10.1.1.1) host(example.com) upstream("), "{line}");
        assert!(line.ends_with(")\n"), "{line}");
        assert!(!line.contains(" err:"), "{line}");
    }

    #[actix_web::test]
    async fn test_backend_and_error_annotations() {
        let sink = CaptureSink::default();
        let app = init_service(
            App::new()
                .wrap(ProxyLogger::new(sink.clone()))
                .route(
                    "/api/x",
                    web::get().to(|req: HttpRequest| async move {
                        record_backend(&req, "http://10.0.0.5:8080");
                        record_error(&req, "boom");
                        HttpResponse::BadGateway().finish()
                    }),
                ),
        )
        .await;

        let res = call_service(&app, get("/api/x").to_request()).await;
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        read_body(res).await;

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert!(
            line.contains("\"GET /api/x --> http://10.0.0.5:8080 HTTP/1.1\" 502 0 "),
            "{line}"
        );
        assert!(line.ends_with(") err: boom\n"), "{line}");
    }

    #[actix_web::test]
    async fn test_error_response_is_recorded() {
        let sink = CaptureSink::default();
        let app = init_service(
            App::new()
                .wrap(ProxyLogger::new(sink.clone()))
                .route(
                    "/down",
                    web::get().to(|| async {
                        Err::<HttpResponse, _>(error::ErrorServiceUnavailable("upstream down"))
                    }),
                )
                .route(
                    "/refused",
                    web::get().to(|ctx: RequestContext| async move {
                        ctx.record_error("dial tcp 10.0.0.5:8080: connection refused");
                        Err::<HttpResponse, _>(error::ErrorBadGateway("bad gateway"))
                    }),
                ),
        )
        .await;

        let res = call_service(&app, get("/down").to_request()).await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        read_body(res).await;

        let res = call_service(&app, get("/refused").to_request()).await;
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        read_body(res).await;

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"GET /down HTTP/1.1\" 503 "), "{}", lines[0]);
        assert!(lines[0].ends_with(" err: upstream down\n"), "{}", lines[0]);
        assert!(
            lines[1].ends_with(" err: dial tcp 10.0.0.5:8080: connection refused\n"),
            "{}",
            lines[1]
        );
    }

    #[actix_web::test]
    async fn test_ignored_path_is_not_written() {
        let sink = CaptureSink::default();
        let app = init_service(
            App::new()
                .wrap(ProxyLogger::new(sink.clone()).ignore("^/health"))
                .route(
                    "/health",
                    web::get().to(|ctx: RequestContext| async move {
                        ctx.record_backend("http://10.0.0.5:8080");
                        HttpResponse::Ok().body("ok")
                    }),
                )
                .route("/other", web::get().to(|| async { HttpResponse::Ok().body("ok") })),
        )
        .await;

        let res = call_service(&app, get("/health").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        read_body(res).await;
        assert!(sink.lines().is_empty());

        let res = call_service(&app, get("/other").to_request()).await;
        read_body(res).await;
        assert_eq!(sink.lines().len(), 1);
    }

    #[actix_web::test]
    async fn test_encoded_ignored_path_is_not_written() {
        let sink = CaptureSink::default();
        let app = init_service(
            App::new()
                .wrap(ProxyLogger::new(sink.clone()).ignore("^/health"))
                .default_service(web::to(|| async { HttpResponse::Ok().body("ok") })),
        )
        .await;

        let res = call_service(&app, get("/he%61lth").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        read_body(res).await;
        assert!(sink.lines().is_empty());

        let res = call_service(&app, get("/wealth").to_request()).await;
        read_body(res).await;
        assert_eq!(sink.lines().len(), 1);
    }

    #[actix_web::test]
    async fn test_trace_header_and_offset() {
        let sink = CaptureSink::default();
        let app = init_service(
            App::new()
                .wrap(
                    ProxyLogger::new(sink.clone())
                        .trace_header("x-trace-id")
                        .utc_offset(UtcOffset::from_hms(2, 0, 0).unwrap()),
                )
                .route("/", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let req = get("/").insert_header(("x-trace-id", "t-1")).to_request();
        let res = call_service(&app, req).await;
        read_body(res).await;

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(" +0200] "), "{}", lines[0]);
        assert!(lines[0].ends_with(")t-1\n"), "{}", lines[0]);
    }
}
