use std::{
    collections::VecDeque,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{error::ClientError, tags::Dialect};

/// Metric types and their wire codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricType {
    /// Counter, `c`.
    Counter,
    /// Gauge, `g`.
    Gauge,
    /// Set, `s`.
    Set,
    /// Timing, `ms`.
    Timing,
    /// Histogram, `h`.
    Histogram,
    /// Distribution, `d`.
    Distribution,
}

impl MetricType {
    fn as_str(self) -> &'static str {
        match self {
            MetricType::Counter => "|c",
            MetricType::Gauge => "|g",
            MetricType::Set => "|s",
            MetricType::Timing => "|ms",
            MetricType::Histogram => "|h",
            MetricType::Distribution => "|d",
        }
    }
}

/// A metric value.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    /// Integer value.
    Integer(i64),

    /// Floating-point value.
    FloatingPoint(f64),

    /// Free-form value, used for set members.
    Text(String),
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Integer(value)
    }
}

impl From<i32> for MetricValue {
    fn from(value: i32) -> Self {
        MetricValue::Integer(i64::from(value))
    }
}

impl From<u32> for MetricValue {
    fn from(value: u32) -> Self {
        MetricValue::Integer(i64::from(value))
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::FloatingPoint(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

// Floats without a fractional part are written as integers while they can be represented exactly.
const MAX_EXACT_INTEGRAL_FLOAT: f64 = 9_007_199_254_740_992.0;

struct MetricValueFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
}

impl MetricValueFormatter {
    fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new() }
    }

    fn format_float(&mut self, value: f64) -> &str {
        if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_EXACT_INTEGRAL_FLOAT {
            self.int_writer.format(value as i64)
        } else {
            self.float_writer.format(value)
        }
    }

    fn format<'a>(&'a mut self, value: &'a MetricValue) -> &'a str {
        match value {
            MetricValue::Integer(v) => self.int_writer.format(*v),
            MetricValue::FloatingPoint(v) => self.format_float(*v),
            MetricValue::Text(v) => v.as_str(),
        }
    }
}

/// Status of a service check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckStatus {
    /// `0`
    Ok,
    /// `1`
    Warning,
    /// `2`
    Error,
    /// `3`
    Unknown,
}

impl CheckStatus {
    /// Returns the numeric status code.
    pub const fn code(self) -> u8 {
        match self {
            CheckStatus::Ok => 0,
            CheckStatus::Warning => 1,
            CheckStatus::Error => 2,
            CheckStatus::Unknown => 3,
        }
    }
}

/// Priority of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventPriority {
    /// `normal`
    Normal,
    /// `low`
    Low,
}

impl EventPriority {
    fn as_str(self) -> &'static str {
        match self {
            EventPriority::Normal => "normal",
            EventPriority::Low => "low",
        }
    }
}

/// Alert type of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventAlertType {
    /// `error`
    Error,
    /// `warning`
    Warning,
    /// `info`
    Info,
    /// `success`
    Success,
}

impl EventAlertType {
    fn as_str(self) -> &'static str {
        match self {
            EventAlertType::Error => "error",
            EventAlertType::Warning => "warning",
            EventAlertType::Info => "info",
            EventAlertType::Success => "success",
        }
    }
}

/// A point in time attached to a service check or event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Timestamp {
    /// A date, converted to seconds since the Unix epoch.
    Date(SystemTime),

    /// Seconds since the Unix epoch.
    Seconds(f64),
}

impl Timestamp {
    /// Returns the timestamp as whole seconds since the Unix epoch, rounded to the nearest second.
    pub fn epoch_seconds(&self) -> i64 {
        match self {
            Timestamp::Date(date) => match date.duration_since(UNIX_EPOCH) {
                Ok(since) => (since.as_millis() as f64 / 1000.0).round() as i64,
                Err(e) => -((e.duration().as_millis() as f64 / 1000.0).round() as i64),
            },
            Timestamp::Seconds(seconds) => seconds.round() as i64,
        }
    }
}

impl From<SystemTime> for Timestamp {
    fn from(date: SystemTime) -> Self {
        Timestamp::Date(date)
    }
}

impl From<f64> for Timestamp {
    fn from(seconds: f64) -> Self {
        Timestamp::Seconds(seconds)
    }
}

impl From<u64> for Timestamp {
    fn from(seconds: u64) -> Self {
        Timestamp::Seconds(seconds as f64)
    }
}

/// Optional fields of a service check.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CheckOptions {
    /// When the check ran.
    pub timestamp: Option<Timestamp>,

    /// Host the check applies to.
    pub hostname: Option<String>,

    /// Message describing the status.
    pub message: Option<String>,
}

/// Optional fields of an event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventOptions {
    /// When the event happened.
    pub timestamp: Option<Timestamp>,

    /// Host the event applies to.
    pub hostname: Option<String>,

    /// Key used to group events together.
    pub aggregation_key: Option<String>,

    /// Event priority.
    pub priority: Option<EventPriority>,

    /// Source type name, such as `nagios` or `jenkins`.
    pub source_type_name: Option<String>,

    /// Alert type.
    pub alert_type: Option<EventAlertType>,
}

/// Encodes calls into protocol lines.
///
/// Lines are returned without any terminator: the transport decides whether lines are newline-terminated (stream) or
/// newline-joined (buffered datagrams).
pub(crate) struct LineWriter<'a> {
    dialect: Dialect,
    prefix: &'a str,
    suffix: &'a str,
    buf: String,
}

impl<'a> LineWriter<'a> {
    pub fn new(dialect: Dialect, prefix: &'a str, suffix: &'a str) -> Self {
        Self { dialect, prefix, suffix, buf: String::new() }
    }

    fn write_name(&mut self, name: &str) {
        self.buf.push_str(self.prefix);
        self.buf.push_str(name);
        self.buf.push_str(self.suffix);
    }

    fn write_standard_tags(&mut self, tags: &[String]) {
        for (i, tag) in tags.iter().enumerate() {
            self.buf.push_str(if i == 0 { "|#" } else { "," });
            self.buf.push_str(tag);
        }
    }

    fn write_telegraf_tags(&mut self, tags: &[String]) {
        for tag in tags {
            self.buf.push(',');
            self.buf.extend(tag.chars().map(|c| if c == ':' { '=' } else { c }));
        }
    }

    fn ensure_standard(&self, kind: &str) -> Result<(), ClientError> {
        if self.dialect.is_telegraf() {
            return Err(ClientError::Configuration(format!("telegraf does not support {kind}")));
        }
        Ok(())
    }

    /// Writes a metric line.
    ///
    /// `maybe_sample_rate` is written as `|@rate` when present; the caller decides whether the rate applies.
    pub fn write_metric(
        mut self,
        name: &str,
        value: &MetricValue,
        metric_type: MetricType,
        maybe_sample_rate: Option<f64>,
        tags: &[String],
    ) -> String {
        let mut formatter = MetricValueFormatter::new();

        self.write_name(name);
        if self.dialect.is_telegraf() {
            self.write_telegraf_tags(tags);
        }

        self.buf.push(':');
        self.buf.push_str(formatter.format(value));
        self.buf.push_str(metric_type.as_str());

        if let Some(sample_rate) = maybe_sample_rate {
            self.buf.push_str("|@");
            self.buf.push_str(formatter.format_float(sample_rate));
        }

        if !self.dialect.is_telegraf() {
            self.write_standard_tags(tags);
        }

        self.buf
    }

    /// Writes a service check line.
    ///
    /// # Errors
    ///
    /// Service checks have no telegraf representation, so a configuration error is returned in that dialect.
    pub fn write_check(
        mut self,
        name: &str,
        status: CheckStatus,
        options: &CheckOptions,
        tags: &[String],
    ) -> Result<String, ClientError> {
        self.ensure_standard("service checks")?;

        let mut int_writer = itoa::Buffer::new();

        self.buf.push_str("_sc|");
        self.write_name(name);
        self.buf.push('|');
        self.buf.push_str(int_writer.format(status.code()));

        if let Some(timestamp) = &options.timestamp {
            self.buf.push_str("|d:");
            self.buf.push_str(int_writer.format(timestamp.epoch_seconds()));
        }
        if let Some(hostname) = &options.hostname {
            self.buf.push_str("|h:");
            self.buf.push_str(hostname);
        }
        if let Some(message) = &options.message {
            self.buf.push_str("|m:");
            self.buf.push_str(message);
        }

        self.write_standard_tags(tags);
        Ok(self.buf)
    }

    /// Writes an event line.
    ///
    /// # Errors
    ///
    /// Events have no telegraf representation, so a configuration error is returned in that dialect.
    pub fn write_event(
        mut self,
        title: &str,
        text: &str,
        options: &EventOptions,
        tags: &[String],
    ) -> Result<String, ClientError> {
        self.ensure_standard("events")?;

        let full_title = format!("{}{}{}", self.prefix, title, self.suffix);
        let text = if text.is_empty() { title.to_string() } else { text.replace('\n', "\\n") };

        let mut int_writer = itoa::Buffer::new();

        self.buf.push_str("_e{");
        self.buf.push_str(int_writer.format(full_title.len()));
        self.buf.push(',');
        self.buf.push_str(int_writer.format(text.len()));
        self.buf.push_str("}:");
        self.buf.push_str(&full_title);
        self.buf.push('|');
        self.buf.push_str(&text);

        if let Some(timestamp) = &options.timestamp {
            self.buf.push_str("|d:");
            self.buf.push_str(int_writer.format(timestamp.epoch_seconds()));
        }

        let fields = [
            ("|h:", options.hostname.as_deref()),
            ("|k:", options.aggregation_key.as_deref()),
            ("|p:", options.priority.map(EventPriority::as_str)),
            ("|s:", options.source_type_name.as_deref()),
            ("|t:", options.alert_type.map(EventAlertType::as_str)),
        ];
        for (marker, value) in fields {
            if let Some(value) = value {
                self.buf.push_str(marker);
                self.buf.push_str(value);
            }
        }

        self.write_standard_tags(tags);
        Ok(self.buf)
    }
}

/// A finished payload, along with the per-line items (typically completions) of every line it contains.
///
/// Each item is paired with the number of bytes its line occupies in the payload, line terminator included.
pub(crate) struct Payload<T> {
    pub bytes: Vec<u8>,
    pub items: Vec<(usize, T)>,
}

/// Coalesces lines into payloads for more efficient network I/O.
///
/// DogStatsD lines are newline delimited, which means that multiple lines can be sent in a single payload and then
/// trivially split apart by the remote server. Datagram payloads join lines with a newline, while stream payloads
/// terminate every line with one.
///
/// A maximum payload length of zero disables coalescing: every line becomes its own payload. Otherwise, lines are
/// appended to the current payload until the next one would push it past the maximum, at which point the current
/// payload is finalized. A single line longer than the maximum still becomes its own payload, and is left for the
/// socket to accept or reject.
pub(crate) struct PayloadBuffer<T> {
    max_payload_len: usize,
    newline_terminated: bool,
    current: Vec<u8>,
    current_items: Vec<(usize, T)>,
    ready: VecDeque<Payload<T>>,
}

impl<T> PayloadBuffer<T> {
    pub fn new(max_payload_len: usize, newline_terminated: bool) -> Self {
        Self {
            max_payload_len,
            newline_terminated,
            current: Vec::new(),
            current_items: Vec::new(),
            ready: VecDeque::new(),
        }
    }

    fn separator_len(&self) -> usize {
        usize::from(!self.newline_terminated && !self.current.is_empty())
    }

    fn encoded_len(&self, line: &[u8]) -> usize {
        line.len() + usize::from(self.newline_terminated)
    }

    /// Returns `true` if there are no buffered lines and no finished payloads.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.ready.is_empty()
    }

    /// Returns `true` if there are buffered lines not yet finalized into a payload.
    pub fn has_pending(&self) -> bool {
        !self.current.is_empty()
    }

    /// Appends a line to the current payload, finalizing payloads as needed.
    pub fn push(&mut self, line: &[u8], item: T) {
        let encoded_len = self.encoded_len(line);
        if !self.current.is_empty()
            && self.current.len() + self.separator_len() + encoded_len > self.max_payload_len
        {
            self.finalize_current_payload();
        }

        if self.separator_len() == 1 {
            self.current.push(b'\n');
        }
        self.current.extend_from_slice(line);
        if self.newline_terminated {
            self.current.push(b'\n');
        }
        self.current_items.push((encoded_len, item));

        if self.current.len() >= self.max_payload_len {
            self.finalize_current_payload();
        }
    }

    /// Finalizes the current payload, if any lines are buffered.
    pub fn finalize_current_payload(&mut self) {
        if self.current.is_empty() {
            return;
        }

        let bytes = std::mem::take(&mut self.current);
        let items = std::mem::take(&mut self.current_items);
        self.ready.push_back(Payload { bytes, items });
    }

    /// Returns the next finished payload.
    pub fn next_payload(&mut self) -> Option<Payload<T>> {
        self.ready.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::{
        CheckOptions, CheckStatus, EventAlertType, EventOptions, EventPriority, LineWriter, MetricType,
        MetricValue, PayloadBuffer, Timestamp,
    };
    use crate::tags::Dialect;

    fn strings(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|tag| (*tag).to_string()).collect()
    }

    fn metric(
        dialect: Dialect,
        prefix: &str,
        suffix: &str,
        value: MetricValue,
        metric_type: MetricType,
        rate: Option<f64>,
        tags: &[&str],
    ) -> String {
        LineWriter::new(dialect, prefix, suffix).write_metric("test", &value, metric_type, rate, &strings(tags))
    }

    #[test]
    fn metric_standard() {
        // Cases are defined as: prefix, suffix, value, type, sample rate, tags, expected output.
        let cases = [
            ("", "", MetricValue::Integer(1), MetricType::Counter, None, &[][..], "test:1|c"),
            ("", "", MetricValue::Integer(-1), MetricType::Counter, None, &[], "test:-1|c"),
            ("", "", MetricValue::FloatingPoint(42.0), MetricType::Gauge, None, &[], "test:42|g"),
            ("", "", MetricValue::FloatingPoint(3.13232), MetricType::Gauge, None, &[], "test:3.13232|g"),
            ("", "", MetricValue::from("user42"), MetricType::Set, None, &[], "test:user42|s"),
            ("", "", MetricValue::Integer(250), MetricType::Timing, None, &[], "test:250|ms"),
            ("", "", MetricValue::FloatingPoint(22.22), MetricType::Histogram, None, &[], "test:22.22|h"),
            ("", "", MetricValue::Integer(7), MetricType::Distribution, None, &[], "test:7|d"),
            ("", "", MetricValue::Integer(1337), MetricType::Counter, Some(0.5), &[], "test:1337|c|@0.5"),
            (
                "",
                "",
                MetricValue::Integer(1337),
                MetricType::Counter,
                None,
                &["gtag:234", "foo:bar"][..],
                "test:1337|c|#gtag:234,foo:bar",
            ),
            (
                "prefix.",
                ".suffix",
                MetricValue::Integer(1),
                MetricType::Counter,
                Some(0.25),
                &["foo"][..],
                "prefix.test.suffix:1|c|@0.25|#foo",
            ),
        ];

        for (prefix, suffix, value, metric_type, rate, tags, expected) in cases {
            let actual = metric(Dialect::Standard, prefix, suffix, value, metric_type, rate, tags);
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn metric_telegraf() {
        let cases = [
            (
                MetricValue::Integer(1),
                None,
                &["gtag:gvalue", "gtag2:gvalue2"][..],
                "test,gtag=gvalue,gtag2=gvalue2:1|c",
            ),
            (MetricValue::Integer(1337), None, &["gtag=gvalue", "foo:bar"][..], "test,gtag=gvalue,foo=bar:1337|c"),
            (MetricValue::Integer(1337), Some(0.5), &["foo:bar"][..], "test,foo=bar:1337|c|@0.5"),
            (MetricValue::Integer(1), None, &[], "test:1|c"),
        ];

        for (value, rate, tags, expected) in cases {
            let actual = metric(Dialect::Telegraf, "", "", value, MetricType::Counter, rate, tags);
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn check_formats() {
        let writer = LineWriter::new(Dialect::Standard, "", "");
        let line = writer.write_check("check.name", CheckStatus::Ok, &CheckOptions::default(), &[]).unwrap();
        assert_eq!(line, "_sc|check.name|0");

        let writer = LineWriter::new(Dialect::Standard, "prefix.", ".suffix");
        let line = writer.write_check("check.name", CheckStatus::Ok, &CheckOptions::default(), &[]).unwrap();
        assert_eq!(line, "_sc|prefix.check.name.suffix|0");

        let date = UNIX_EPOCH + Duration::from_millis(1_500_000_000_600);
        let options = CheckOptions {
            timestamp: Some(Timestamp::Date(date)),
            hostname: Some("host".to_string()),
            message: Some("message".to_string()),
        };
        let writer = LineWriter::new(Dialect::Standard, "", "");
        let line = writer.write_check("check.name", CheckStatus::Warning, &options, &strings(&["foo", "bar"])).unwrap();
        assert_eq!(line, "_sc|check.name|1|d:1500000001|h:host|m:message|#foo,bar");
    }

    #[test]
    fn check_status_codes() {
        let codes: Vec<u8> = [CheckStatus::Ok, CheckStatus::Warning, CheckStatus::Error, CheckStatus::Unknown]
            .into_iter()
            .map(CheckStatus::code)
            .collect();
        assert_eq!(codes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn event_formats() {
        let options = EventOptions { hostname: Some("host".to_string()), ..Default::default() };
        let writer = LineWriter::new(Dialect::Standard, "", "");
        let line = writer.write_event("test title", "another desc", &options, &strings(&["foo", "bar"])).unwrap();
        assert_eq!(line, "_e{10,12}:test title|another desc|h:host|#foo,bar");

        let options = EventOptions {
            timestamp: Some(Timestamp::Seconds(1234.6)),
            hostname: Some("host".to_string()),
            aggregation_key: Some("agg".to_string()),
            priority: Some(EventPriority::Low),
            source_type_name: Some("jenkins".to_string()),
            alert_type: Some(EventAlertType::Warning),
        };
        let writer = LineWriter::new(Dialect::Standard, "p.", "");
        let line = writer.write_event("title", "line1\nline2", &options, &[]).unwrap();
        assert_eq!(line, "_e{7,12}:p.title|line1\\nline2|d:1235|h:host|k:agg|p:low|s:jenkins|t:warning");
    }

    #[test]
    fn event_text_defaults_to_title() {
        let writer = LineWriter::new(Dialect::Standard, "", "");
        let line = writer.write_event("title", "", &EventOptions::default(), &[]).unwrap();
        assert_eq!(line, "_e{5,5}:title|title");

        // The fallback is the title as given, without the client's prefix and suffix.
        let writer = LineWriter::new(Dialect::Standard, "app.", ".evt");
        let line = writer.write_event("title", "", &EventOptions::default(), &[]).unwrap();
        assert_eq!(line, "_e{14,5}:app.title.evt|title");
    }

    #[test]
    fn event_lengths_are_bytes() {
        let writer = LineWriter::new(Dialect::Standard, "", "");
        let line = writer.write_event("héllo", "wörld", &EventOptions::default(), &[]).unwrap();
        assert_eq!(line, "_e{6,6}:héllo|wörld");
    }

    #[test]
    fn check_and_event_rejected_in_telegraf() {
        let writer = LineWriter::new(Dialect::Telegraf, "", "");
        let err = writer.write_check("check.name", CheckStatus::Ok, &CheckOptions::default(), &[]).unwrap_err();
        assert!(err.is_configuration());

        let writer = LineWriter::new(Dialect::Telegraf, "", "");
        let err = writer.write_event("title", "text", &EventOptions::default(), &[]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn timestamp_rounding() {
        assert_eq!(Timestamp::Seconds(1.4).epoch_seconds(), 1);
        assert_eq!(Timestamp::Seconds(1.5).epoch_seconds(), 2);
        assert_eq!(Timestamp::Date(UNIX_EPOCH + Duration::from_millis(2_499)).epoch_seconds(), 2);
        assert_eq!(Timestamp::Date(UNIX_EPOCH + Duration::from_millis(2_500)).epoch_seconds(), 3);
    }

    fn drain(buffer: &mut PayloadBuffer<u32>) -> Vec<(String, Vec<u32>)> {
        buffer.finalize_current_payload();
        let mut payloads = Vec::new();
        while let Some(payload) = buffer.next_payload() {
            let items = payload.items.into_iter().map(|(_, item)| item).collect();
            payloads.push((String::from_utf8(payload.bytes).unwrap(), items));
        }
        payloads
    }

    #[test]
    fn payload_buffer_unbuffered() {
        let mut buffer = PayloadBuffer::new(0, false);
        buffer.push(b"a:1|c", 1);
        buffer.push(b"b:1|c", 2);
        assert_eq!(
            drain(&mut buffer),
            vec![("a:1|c".to_string(), vec![1]), ("b:1|c".to_string(), vec![2])]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn payload_buffer_joins_datagram_lines() {
        let mut buffer = PayloadBuffer::new(12, false);
        buffer.push(b"a:1|c", 1);
        buffer.push(b"b:1|c", 2);
        buffer.push(b"c:1|c", 3);
        assert_eq!(
            drain(&mut buffer),
            vec![("a:1|c\nb:1|c".to_string(), vec![1, 2]), ("c:1|c".to_string(), vec![3])]
        );
    }

    #[test]
    fn payload_buffer_terminates_stream_lines() {
        let mut buffer = PayloadBuffer::new(0, true);
        buffer.push(b"a:1|c", 1);
        assert_eq!(drain(&mut buffer), vec![("a:1|c\n".to_string(), vec![1])]);

        let mut buffer = PayloadBuffer::new(64, true);
        buffer.push(b"a:1|c", 1);
        buffer.push(b"b:1|c", 2);
        assert_eq!(drain(&mut buffer), vec![("a:1|c\nb:1|c\n".to_string(), vec![1, 2])]);
    }

    #[test]
    fn payload_buffer_oversized_line_stands_alone() {
        let mut buffer = PayloadBuffer::new(8, false);
        buffer.push(b"a:1|c", 1);
        buffer.push(b"very_long_metric:1|c", 2);
        buffer.push(b"b:1|c", 3);
        assert_eq!(
            drain(&mut buffer),
            vec![
                ("a:1|c".to_string(), vec![1]),
                ("very_long_metric:1|c".to_string(), vec![2]),
                ("b:1|c".to_string(), vec![3]),
            ]
        );
    }
}
