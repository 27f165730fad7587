//! Actix-web middleware for reverse-proxy access logs.
//! Every completed request produces one Common Log Format line extended with
//! proxy annotations: the `X-Forwarded-For` header, the request host, the
//! total latency, a trace id header, and the terminal error if there was one.
//!
//! ```text
//! 1.2.3.4 - - [05/Mar/2024:14:07:09 +0000] "GET /api/x --> http://10.0.0.5:8080 HTTP/1.1" 502 0 XFF(10.1.1.1) host(example.com) upstream(1.203ms) err: connection refused
//! ```
//!
//! # Examples:
//! ## By default lines go to the standard `log` crate.
//! ```bash
//! cargo add actix-web-middleware-proxylog
//! ```
//! Example usage with standard `log` crate and `structured_logger` crate:
//! ```rust,no_run
//! use actix_web::{web, App, HttpServer};
//! use actix_web_middleware_proxylog::ProxyLogger;
//! use tokio;
//! use structured_logger::{Builder, async_json::new_writer};
//!
//! #[actix_web::main] // or #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     Builder::new()
//!         .with_target_writer("*", new_writer(tokio::io::stdout()))
//!         .init();
//!
//!     HttpServer::new(|| {
//!         App::new()
//!             .wrap(ProxyLogger::default().ignore("^/health"))
//!             .route("/", web::get().to(|| async { "Hello world!" }))
//!     })
//!     .bind("127.0.0.1:8080")?
//!     .run()
//!     .await
//! }
//! ```
//! ## Writing plain lines to a file
//! ```rust,no_run
//! use std::fs::OpenOptions;
//! use actix_web::{web, App, HttpServer};
//! use actix_web_middleware_proxylog::{ProxyLogger, WriterSink};
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     let file = OpenOptions::new().create(true).append(true).open("access.log")?;
//!     let sink = WriterSink::new(file);
//!
//!     HttpServer::new(move || {
//!         App::new()
//!             .wrap(ProxyLogger::new(sink.clone()))
//!             .route("/", web::get().to(|| async { "Hello world!" }))
//!     })
//!     .bind("127.0.0.1:8080")?
//!     .run()
//!     .await
//! }
//! ```
//!
//! # Annotating requests
//!
//! The middleware attaches a [`RequestContext`] to every request. Proxy code
//! records the upstream it picked and the error that ended the request:
//!
//! ```rust
//! use actix_web::{HttpRequest, HttpResponse};
//! use actix_web_middleware_proxylog::{record_backend, record_error};
//!
//! async fn proxy(req: HttpRequest) -> HttpResponse {
//!     record_backend(&req, "http://10.0.0.5:8080");
//!     record_error(&req, "connection refused");
//!     HttpResponse::BadGateway().finish()
//! }
//! ```
//!
//! An error returned from a handler is recorded automatically unless one was
//! recorded explicitly.
//!
//! # Configuration
//!
//! ```rust
//! use actix_web_middleware_proxylog::ProxyLogger;
//! use time::UtcOffset;
//!
//! let logger = ProxyLogger::new(std::io::stdout())
//!     .ignore(r"^/health")                 // regex, matched anywhere in the path
//!     .ignore_path("/favicon.ico")         // exact path
//!     .trace_header("x-request-id")        // default: X-Cloud-Trace-Context
//!     .utc_offset(UtcOffset::from_hms(2, 0, 0).unwrap());
//! ```
//!
//! Patterns coming from a config file should go through
//! [`ProxyLogger::try_ignore`] or [`IgnoreSet::from_patterns`], which return
//! the compile error instead of panicking.
//!
//! # Feature Flags
//!
//! - `log` (default) - Enable integration with the standard `log` crate

mod context;
mod escape;
mod ignore;
mod line;
mod logger;
mod sink;
mod wrapper;

pub use crate::context::{
    RequestContext, attach_context, read_backend, read_error, record_backend, record_error,
};
pub use crate::escape::{append_quoted, quote};
pub use crate::ignore::IgnoreSet;
pub use crate::line::{LogLineParams, build_line};
pub use crate::logger::{ProxyLogger, emit};
#[cfg(feature = "log")]
pub use crate::sink::LogFacade;
pub use crate::sink::{LogSink, WriterSink};
#[cfg(feature = "log")]
pub use crate::wrapper::rust_log;
