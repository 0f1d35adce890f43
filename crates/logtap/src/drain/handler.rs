use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use chrono::Utc;
use futures_util::StreamExt;
use tracing::{debug, error, warn};

use super::context::{ContextResolver, NoContext};
use super::sink::RecordSink;
use crate::framing::{Decoded, StreamDecoder, StreamError};
use crate::telemetry::{LogTelemetry, Telemetry, CONTEXT_ERROR, MESSAGE_COUNT_DELTA, REQUEST, TIME_LAG};

/// Number of records Logplex says it put in the request body.
pub const MSG_COUNT_HEADER: &str = "Logplex-Msg-Count";

/// Largest `Logplex-Msg-Count` trusted to pre-size the record buffer.
/// Empirically Logplex never sends more than 10 records per request.
pub const MAX_MSG_COUNT_HINT: usize = 10;

/// Collaborators of a `Drain`.
pub struct DrainConfig<C> {
    pub resolver: Arc<dyn ContextResolver<Context = C>>,
    pub sink: Arc<dyn RecordSink<C>>,
    pub telemetry: Arc<dyn Telemetry>,
}

impl<C: Clone + Send + Sync + 'static> DrainConfig<C> {
    /// Metrics go to `LogTelemetry` unless replaced with `with_telemetry`.
    pub fn new<R, S>(resolver: R, sink: S) -> Self
    where
        R: ContextResolver<Context = C> + 'static,
        S: RecordSink<C> + 'static,
    {
        Self {
            resolver: Arc::new(resolver),
            sink: Arc::new(sink),
            telemetry: Arc::new(LogTelemetry),
        }
    }

    pub fn with_telemetry(mut self, telemetry: impl Telemetry + 'static) -> Self {
        self.telemetry = Arc::new(telemetry);
        self
    }
}

impl DrainConfig<()> {
    /// No request context, metrics to `LogTelemetry`.
    pub fn with_sink<S: RecordSink<()> + 'static>(sink: S) -> Self {
        Self::new(NoContext, sink)
    }
}

impl<C> Clone for DrainConfig<C> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            sink: Arc::clone(&self.sink),
            telemetry: Arc::clone(&self.telemetry),
        }
    }
}

/// Outcome of one accepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainSummary {
    pub delivered: usize,
    /// Record faults plus the terminal fault, if any
    pub errors: usize,
    pub stream_error: bool,
    /// `expected - delivered`, when the request announced a count
    pub count_delta: Option<i64>,
}

/// Log tapping endpoint for Heroku Logplex HTTPS drains.
///
/// See: https://devcenter.heroku.com/articles/log-drains#https-drains
///
/// Each request runs through these steps:
/// 1. resolve context, answering 418 when that fails
/// 2. decode the body frame by frame
/// 3. attach context to each record and hand it to the sink
/// 4. log every decode error and report metrics
///
/// Any request past step 1 gets a 200, however many records failed to decode.
pub struct Drain<C> {
    config: DrainConfig<C>,
}

impl<C: Clone + Send + Sync + 'static> Drain<C> {
    pub fn new(config: DrainConfig<C>) -> Self {
        Self { config }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();

        let context = match self.config.resolver.resolve(&parts) {
            Ok(context) => context,
            Err(e) => {
                warn!(error = %e, "Refusing drain request");
                self.config.telemetry.count(1, CONTEXT_ERROR);
                return (StatusCode::IM_A_TEAPOT, e.to_string()).into_response();
            }
        };

        let expected = expected_count(&parts.headers);
        let decoder = StreamDecoder::new(Vec::with_capacity(capacity_hint(expected)));
        let decoded = read_body(decoder, body).await;

        let summary = self.dispatch(context, decoded, expected);
        debug!(
            delivered = summary.delivered,
            errors = summary.errors,
            stream_error = summary.stream_error,
            count_delta = ?summary.count_delta,
            "Drain request processed"
        );
        StatusCode::OK.into_response()
    }

    /// Deliver decoded records, log failures and report metrics.
    pub fn dispatch(&self, context: C, decoded: Decoded, expected: Option<i64>) -> DrainSummary {
        let error_count = decoded.error_count();
        let Decoded {
            records,
            errors,
            terminal,
        } = decoded;

        let delivered = records.len();
        for record in records {
            let lag = record.lag_secs(Utc::now());
            self.config.sink.deliver(record.with_context(context.clone()));
            self.config.telemetry.value(lag, TIME_LAG);
        }

        for e in &errors {
            warn!(error = %e, "Skipping malformed syslog record");
        }
        match &terminal {
            Some(e @ StreamError::Framing(_)) => {
                warn!(error = %e, "Lost framing, rest of the body skipped")
            }
            Some(e @ StreamError::Read(_)) => error!(error = %e, "Failed to read drain body"),
            None => {}
        }

        self.config.telemetry.count(1, REQUEST);

        let count_delta = expected.map(|expected| {
            let delta = expected - delivered as i64;
            if delta != 0 {
                warn!(
                    expected,
                    decoded = delivered,
                    "{} is {}, but {} records have been read",
                    MSG_COUNT_HEADER,
                    expected,
                    delivered
                );
            }
            self.config.telemetry.value(delta as f64, MESSAGE_COUNT_DELTA);
            delta
        });

        DrainSummary {
            delivered,
            errors: error_count,
            stream_error: terminal.is_some(),
            count_delta,
        }
    }
}

/// Router serving the drain at `POST /`.
pub fn routes<C: Clone + Send + Sync + 'static>(drain: Arc<Drain<C>>) -> Router {
    Router::new()
        .route("/", post(receive::<C>))
        .with_state(drain)
}

async fn receive<C: Clone + Send + Sync + 'static>(
    State(drain): State<Arc<Drain<C>>>,
    request: Request,
) -> Response {
    drain.handle(request).await
}

async fn read_body(mut decoder: StreamDecoder, body: Body) -> Decoded {
    let mut chunks = body.into_data_stream();
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(bytes) => {
                if !decoder.feed(&bytes) {
                    break;
                }
            }
            Err(e) => {
                decoder.fail(e);
                break;
            }
        }
    }
    decoder.finish()
}

/// Positive `Logplex-Msg-Count`, if the request carries one.
fn expected_count(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(MSG_COUNT_HEADER)?
        .to_str()
        .ok()?
        .parse::<i64>()
        .ok()
        .filter(|n| *n > 0)
}

fn capacity_hint(expected: Option<i64>) -> usize {
    expected
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| (1..=MAX_MSG_COUNT_HINT).contains(n))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drain::context::{AppName, ContextError, ContextFn, DrainToken};
    use crate::framing::FramingError;
    use crate::parser::{ParseError, Record};
    use axum::http::request::Parts;
    use chrono::TimeZone;
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tower::ServiceExt;

    const RELEASE: &str =
        "97 <45>1 2014-01-09T20:34:44.693891+00:00 host heroku api - Release v1822 created by foo@example.com";
    const BOGUS: &str =
        "97 <45>1*2014-01-09T20:34:44.693891+00:00*host*heroku*api*-*Bogus entirely on purpose yes preciousss";
    const BAD_FRAMING: &str = "2x BAD FRAMING...";

    #[derive(Default)]
    struct RecordingTelemetry {
        values: Mutex<Vec<(String, f64)>>,
        counts: Mutex<Vec<(String, i64)>>,
    }

    impl RecordingTelemetry {
        fn values(&self, name: &str) -> Vec<f64> {
            self.values.lock().unwrap().iter().filter(|(n, _)| n == name).map(|(_, v)| *v).collect()
        }

        fn counts(&self, name: &str) -> Vec<i64> {
            self.counts.lock().unwrap().iter().filter(|(n, _)| n == name).map(|(_, v)| *v).collect()
        }
    }

    impl Telemetry for RecordingTelemetry {
        fn value(&self, value: f64, name: &str) {
            self.values.lock().unwrap().push((name.to_string(), value));
        }

        fn count(&self, value: i64, name: &str) {
            self.counts.lock().unwrap().push((name.to_string(), value));
        }
    }

    type Seen<C> = Arc<Mutex<Vec<Record<C>>>>;

    fn collector<C: Send + 'static>() -> (Seen<C>, impl Fn(Record<C>) + Send + Sync) {
        let seen: Seen<C> = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |record: Record<C>| seen.lock().unwrap().push(record)
        };
        (seen, sink)
    }

    fn post(body: String, headers: &[(&str, &str)], uri: &str) -> Request {
        let mut builder = axum::http::Request::builder().method("POST").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    // ── Full requests ────────────────────────────────────────────

    #[tokio::test]
    async fn test_mixed_body_delivers_good_record() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let (seen, sink) = collector::<()>();
        let drain = Drain::new(DrainConfig::with_sink(sink).with_telemetry(Arc::clone(&telemetry)));

        let body = format!("{RELEASE}{BOGUS}{BAD_FRAMING}");
        let response = routes(Arc::new(drain))
            .oneshot(post(body, &[("Logplex-Msg-Count", "3")], "https://logtap.example.org/"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let record = &seen[0];
        assert_eq!(record.priority, "45");
        assert_eq!(record.version, "1");
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2014, 1, 9, 20, 34, 44).unwrap()
                + chrono::Duration::microseconds(693_891)
        );
        assert_eq!(record.hostname, "host");
        assert_eq!(record.app_name, "heroku");
        assert_eq!(record.proc_id, "api");
        assert_eq!(record.msg_id, "-");
        assert_eq!(record.text, "Release v1822 created by foo@example.com");

        assert_eq!(telemetry.values(MESSAGE_COUNT_DELTA), vec![2.0]);
        assert_eq!(telemetry.values(TIME_LAG).len(), 1);
        assert!(telemetry.values(TIME_LAG)[0] > 0.0);
        assert_eq!(telemetry.counts(REQUEST), vec![1]);
        assert!(telemetry.counts(CONTEXT_ERROR).is_empty());
    }

    #[tokio::test]
    async fn test_context_failure_skips_decoding() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let (seen, sink) = collector::<String>();
        let drain = Drain::new(DrainConfig::new(AppName, sink).with_telemetry(Arc::clone(&telemetry)));

        let response = routes(Arc::new(drain))
            .oneshot(post(RELEASE.to_string(), &[], "https://logtap.example.org/"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(body_text(response).await, "query string argument 'app' is missing");
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(telemetry.counts(CONTEXT_ERROR), vec![1]);
        assert!(telemetry.counts(REQUEST).is_empty());
        assert!(telemetry.values(TIME_LAG).is_empty());
    }

    #[tokio::test]
    async fn test_context_attached_to_every_record() {
        let (seen, sink) = collector::<String>();
        let drain = Drain::new(DrainConfig::new(DrainToken, sink).with_telemetry(crate::DiscardTelemetry));

        let body = format!("{RELEASE}{RELEASE}");
        let response = routes(Arc::new(drain))
            .oneshot(post(body, &[("Logplex-Drain-Token", "d.123")], "/"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|r| r.context == "d.123"));
    }

    #[tokio::test]
    async fn test_context_from_plain_function() {
        fn source_host(request: &Parts) -> Result<String, ContextError> {
            request
                .uri
                .host()
                .map(str::to_string)
                .ok_or_else(|| ContextError::new("no host"))
        }

        let (seen, sink) = collector::<String>();
        let drain = Drain::new(
            DrainConfig::new(ContextFn(source_host), sink).with_telemetry(crate::DiscardTelemetry),
        );

        let response = routes(Arc::new(drain))
            .oneshot(post(RELEASE.to_string(), &[], "https://logtap.example.org/"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(seen.lock().unwrap()[0].context, "logtap.example.org");
    }

    #[tokio::test]
    async fn test_without_count_header_no_delta() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let (_seen, sink) = collector::<()>();
        let drain = Drain::new(DrainConfig::with_sink(sink).with_telemetry(Arc::clone(&telemetry)));

        let response = routes(Arc::new(drain)).oneshot(post(RELEASE.to_string(), &[], "/")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(telemetry.values(MESSAGE_COUNT_DELTA).is_empty());
        assert_eq!(telemetry.counts(REQUEST), vec![1]);
    }

    #[tokio::test]
    async fn test_garbage_body_still_ok() {
        let (seen, sink) = collector::<()>();
        let drain = Drain::new(DrainConfig::with_sink(sink).with_telemetry(crate::DiscardTelemetry));

        let response = routes(Arc::new(drain))
            .oneshot(post("\u{1F4A9} not a drain body".to_string(), &[], "/"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(seen.lock().unwrap().is_empty());
    }

    // ── Dispatch ─────────────────────────────────────────────────

    fn decoded(body: &str) -> Decoded {
        crate::framing::decode(Vec::new(), body.as_bytes())
    }

    #[test]
    fn test_dispatch_summary() {
        let (_seen, sink) = collector::<()>();
        let drain = Drain::new(DrainConfig::with_sink(sink).with_telemetry(crate::DiscardTelemetry));

        let summary = drain.dispatch((), decoded(&format!("{RELEASE}{BOGUS}{BAD_FRAMING}")), Some(3));

        assert_eq!(
            summary,
            DrainSummary {
                delivered: 1,
                errors: 2,
                stream_error: true,
                count_delta: Some(2),
            }
        );
    }

    /// Formatted log output, shared with the subscriber that writes it.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    #[test]
    fn test_dispatch_logs_every_fault() {
        let logs = CapturedLogs::default();
        let subscriber = {
            let logs = logs.clone();
            tracing_subscriber::fmt()
                .with_writer(move || logs.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::WARN)
                .finish()
        };
        let (_seen, sink) = collector::<()>();
        let drain = Drain::new(DrainConfig::with_sink(sink).with_telemetry(crate::DiscardTelemetry));

        tracing::subscriber::with_default(subscriber, || {
            drain.dispatch((), decoded(&format!("{RELEASE}{BOGUS}{BAD_FRAMING}")), Some(3));
        });

        let lines = logs.lines();
        let parse_fault: Vec<_> = lines
            .iter()
            .filter(|l| l.contains("Skipping malformed syslog record"))
            .collect();
        assert_eq!(parse_fault.len(), 1);
        assert!(parse_fault[0].contains("WARN"));
        assert!(parse_fault[0].contains("syslog message pattern mismatch"));

        let framing_fault: Vec<_> = lines
            .iter()
            .filter(|l| l.contains("Lost framing"))
            .collect();
        assert_eq!(framing_fault.len(), 1);
        assert!(framing_fault[0].contains("WARN"));
        assert!(framing_fault[0].contains("invalid frame length prefix"));

        assert!(lines
            .iter()
            .any(|l| l.contains("Logplex-Msg-Count is 3, but 1 records have been read")));
    }

    #[test]
    fn test_dispatch_negative_delta() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let (_seen, sink) = collector::<()>();
        let drain = Drain::new(DrainConfig::with_sink(sink).with_telemetry(Arc::clone(&telemetry)));

        let summary = drain.dispatch((), decoded(&format!("{RELEASE}{RELEASE}")), Some(1));

        assert_eq!(summary.count_delta, Some(-1));
        assert_eq!(telemetry.values(MESSAGE_COUNT_DELTA), vec![-1.0]);
    }

    #[test]
    fn test_dispatch_keeps_stream_order() {
        let (seen, sink) = collector::<u8>();
        let drain = Drain::new(
            DrainConfig::new(ContextFn(|_: &Parts| Ok::<u8, ContextError>(0)), sink)
                .with_telemetry(crate::DiscardTelemetry),
        );
        let body = format!("{RELEASE}14 <1>1 x h a p m");

        let summary = drain.dispatch(7, decoded(&body), None);

        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.errors, 1);
        assert!(!summary.stream_error);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].context, 7);
        assert_eq!(seen[0].text, "Release v1822 created by foo@example.com");
    }

    #[test]
    fn test_decode_errors_are_classified() {
        let decoded = decoded(&format!("{BOGUS}{BAD_FRAMING}"));
        assert_eq!(decoded.errors, vec![ParseError::PatternMismatch]);
        assert!(matches!(
            decoded.terminal,
            Some(StreamError::Framing(FramingError::InvalidLength(_)))
        ));
    }

    // ── Header handling ──────────────────────────────────────────

    fn headers(count: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::HeaderName::from_bytes(MSG_COUNT_HEADER.as_bytes()).unwrap(),
            count.parse().unwrap(),
        );
        headers
    }

    #[test]
    fn test_expected_count_parsing() {
        assert_eq!(expected_count(&headers("3")), Some(3));
        assert_eq!(expected_count(&headers("42")), Some(42));
        assert_eq!(expected_count(&headers("0")), None);
        assert_eq!(expected_count(&headers("-2")), None);
        assert_eq!(expected_count(&headers("three")), None);
        assert_eq!(expected_count(&HeaderMap::new()), None);
    }

    #[test]
    fn test_capacity_hint_bounds() {
        assert_eq!(capacity_hint(Some(1)), 1);
        assert_eq!(capacity_hint(Some(10)), 10);
        assert_eq!(capacity_hint(Some(11)), 0);
        assert_eq!(capacity_hint(None), 0);
    }
}
