use actix_web::dev::ServiceRequest;
use actix_web::http::header::{self, HeaderName, HeaderValue};
use actix_web::http::{Method, StatusCode, Uri};
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::context::RequestContext;
use crate::escape::append_quoted;

/// `02/Jan/2006:15:04:05 -0700`
const CLF_TIME: &[BorrowedFormatItem<'static>] = format_description!(
    "[day]/[month repr:short]/[year]:[hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
);

/// Everything needed to render one access log line.
///
/// Request-side fields are captured when the request enters the middleware.
/// `status` and `size` are filled in once the response is known.
#[derive(Debug, Clone)]
pub struct LogLineParams {
    pub method: Method,
    pub version: actix_http::Version,
    /// Request target as received. Example: /index.html?page=2
    pub request_uri: String,
    /// Parsed request target.
    pub url: Uri,
    /// Peer address. Example: 192.168.0.1:53211
    pub remote_addr: String,
    /// User name from the URL's userinfo, if any.
    pub username: Option<String>,
    /// Host header, or the URI authority. Example: example.com:443
    pub host: String,
    pub forwarded_for: Option<HeaderValue>,
    pub trace_context: Option<HeaderValue>,
    pub status: StatusCode,
    /// Response body size in bytes.
    pub size: usize,
    /// Time the request started.
    pub timestamp: OffsetDateTime,
    pub context: RequestContext,
}

impl LogLineParams {
    /// Captures the request side of a log line. The status starts as `200 OK`
    /// and the size as 0.
    pub fn from_request(
        req: &ServiceRequest,
        context: RequestContext,
        trace_header: &HeaderName,
        timestamp: OffsetDateTime,
    ) -> Self {
        let url = req.uri().clone();

        let request_uri = match req.version() {
            actix_http::Version::HTTP_2 | actix_http::Version::HTTP_3 => url
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_default(),
            _ => url.to_string(),
        };

        let host = match req.headers().get(header::HOST) {
            Some(val) => String::from_utf8_lossy(val.as_bytes()).into_owned(),
            None => url
                .authority()
                .map(|a| a.as_str().to_string())
                .unwrap_or_default(),
        };

        LogLineParams {
            method: req.method().clone(),
            version: req.version(),
            request_uri,
            username: username(&url),
            url,
            remote_addr: req
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_default(),
            host,
            forwarded_for: req.headers().get("x-forwarded-for").cloned(),
            trace_context: req.headers().get(trace_header).cloned(),
            status: StatusCode::OK,
            size: 0,
            timestamp,
            context,
        }
    }
}

/// Renders the access log line for `params`, measuring the upstream time
/// against the current clock.
///
/// The `upstream(..)` latency uses the `Debug` form of
/// [`std::time::Duration`]: `1.5s`, `250.3µs`, `120s`. Durations of a minute
/// or more stay in seconds and a zero duration is `0ns`, so parsers expecting
/// Go's `time.Duration` strings (`2m0s`, `0s`) need to accept both forms.
pub fn build_line(params: &LogLineParams) -> Vec<u8> {
    build_line_at(params, OffsetDateTime::now_utc())
}

pub(crate) fn build_line_at(params: &LogLineParams, now: OffsetDateTime) -> Vec<u8> {
    let mut buf = common_log_line(params);

    buf.extend_from_slice(b" XFF(");
    if let Some(xff) = &params.forwarded_for {
        buf.extend_from_slice(xff.as_bytes());
    }
    buf.extend_from_slice(b") host(");
    buf.extend_from_slice(params.host.as_bytes());
    buf.extend_from_slice(b") upstream(");
    let elapsed = std::time::Duration::try_from(now - params.timestamp).unwrap_or_default();
    buf.extend_from_slice(format!("{elapsed:?}").as_bytes());
    buf.push(b')');

    // Appended right after the closing parenthesis, without a separator.
    if let Some(trace) = params.trace_context.as_ref().filter(|v| !v.is_empty()) {
        buf.extend_from_slice(trace.as_bytes());
    }

    if let Some(err) = params.context.error() {
        buf.extend_from_slice(b" err: ");
        buf.extend_from_slice(err.as_bytes());
    }

    buf.push(b'\n');
    buf
}

/// `host - user [time] "METHOD target PROTO" status size`
fn common_log_line(params: &LogLineParams) -> Vec<u8> {
    let username = params
        .username
        .as_deref()
        .filter(|name| !name.is_empty())
        .unwrap_or("-");

    let host = split_host(&params.remote_addr).unwrap_or(&params.remote_addr);

    // CONNECT over HTTP/2 names its target in the authority, not the URI.
    let mut target =
        if params.version == actix_http::Version::HTTP_2 && params.method == Method::CONNECT {
            params.host.clone()
        } else {
            params.request_uri.clone()
        };
    if target.is_empty() {
        target = params
            .url
            .path_and_query()
            .map(|pq| pq.as_str())
            .filter(|pq| !pq.is_empty())
            .unwrap_or("/")
            .to_string();
    }

    if let Some(backend) = params.context.backend() {
        target.push_str(" --> ");
        target.push_str(&backend);
    }

    let proto = version_str(params.version);
    let mut buf = Vec::with_capacity(
        3 * (host.len() + username.len() + params.method.as_str().len() + target.len() + proto.len() + 50)
            / 2,
    );

    buf.extend_from_slice(host.as_bytes());
    buf.extend_from_slice(b" - ");
    buf.extend_from_slice(username.as_bytes());
    buf.extend_from_slice(b" [");
    match params.timestamp.format(CLF_TIME) {
        Ok(ts) => buf.extend_from_slice(ts.as_bytes()),
        Err(_) => buf.push(b'-'),
    }
    buf.extend_from_slice(b"] \"");
    buf.extend_from_slice(params.method.as_str().as_bytes());
    buf.push(b' ');
    append_quoted(&mut buf, target.as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(proto.as_bytes());
    buf.extend_from_slice(b"\" ");
    buf.extend_from_slice(params.status.as_str().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(params.size.to_string().as_bytes());
    buf
}

pub(crate) fn version_str(version: actix_http::Version) -> &'static str {
    match version {
        actix_http::Version::HTTP_09 => "HTTP/0.9",
        actix_http::Version::HTTP_10 => "HTTP/1.0",
        actix_http::Version::HTTP_11 => "HTTP/1.1",
        actix_http::Version::HTTP_2 => "HTTP/2.0",
        actix_http::Version::HTTP_3 => "HTTP/3.0",
        _ => "unknown",
    }
}

/// Host part of `host:port` or `[host]:port`.
fn split_host(addr: &str) -> Option<&str> {
    let (host, port) = match addr.strip_prefix('[') {
        Some(rest) => {
            let (host, tail) = rest.split_once(']')?;
            (host, tail.strip_prefix(':')?)
        }
        None => {
            let (host, port) = addr.rsplit_once(':')?;
            if host.contains(':') {
                // Bare IPv6 without brackets.
                return None;
            }
            (host, port)
        }
    };

    if host.contains(['[', ']']) || port.contains(['[', ']']) {
        return None;
    }
    Some(host)
}

fn username(url: &Uri) -> Option<String> {
    let (userinfo, _) = url.authority()?.as_str().rsplit_once('@')?;
    let name = userinfo.split(':').next().unwrap_or_default();
    (!name.is_empty()).then(|| name.to_string())
}
