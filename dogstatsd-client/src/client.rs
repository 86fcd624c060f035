use std::{borrow::Cow, fmt, sync::Arc, time::Instant};

use crate::{
    error::ClientError,
    sampling::{Decision, Sampler},
    tags::{merge, Dialect, Tags},
    transport::{mock::MockTransport, Completion, ErrorHandler, SendCallback, Transport, TransportState},
    writer::{
        CheckOptions, CheckStatus, EventAlertType, EventOptions, EventPriority, LineWriter, MetricType, MetricValue,
        Timestamp,
    },
};

/// State shared by every client in a hierarchy.
pub(crate) struct Shared {
    pub transport: Arc<dyn Transport>,
    pub mock: Option<Arc<MockTransport>>,
    pub dialect: Dialect,
    pub sampler: Sampler,
    pub default_sample_rate: f64,
}

/// A DogStatsD client.
///
/// Every call is encoded on the calling thread and handed to the transport, which sends it in the background. Calls
/// never block on the network: the outcome of a send is reported through the optional per-call callback, the error
/// handler, or, failing both, a log message.
///
/// Cloning a client is cheap, and clones share the same transport. Child clients created with
/// [`Client::child_client`] share it as well, while carrying their own prefix, suffix, and global tags.
///
/// ```
/// # use dogstatsd_client::{ClientBuilder, CheckStatus};
/// let client = ClientBuilder::default()
///     .with_mock(true)
///     .with_prefix("app.")
///     .with_global_tags(["env:prod"])
///     .build()
///     .unwrap();
///
/// client.gauge("queue.depth", 42).unwrap();
/// client.count_with("requests", 3).tags(["route:/"]).send().unwrap();
/// client.check("app.up", CheckStatus::Ok).unwrap();
///
/// assert_eq!(
///     client.mock_lines().unwrap(),
///     vec![
///         "app.queue.depth:42|g|#env:prod",
///         "app.requests:3|c|#env:prod,route:/",
///         "_sc|app.app.up|0|#env:prod",
///     ]
/// );
/// ```
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
    prefix: String,
    suffix: String,
    global_tags: Arc<[String]>,
    error_handler: Option<ErrorHandler>,
    is_child: bool,
}

impl Client {
    pub(crate) fn root(
        shared: Shared,
        prefix: String,
        suffix: String,
        global_tags: Vec<String>,
        error_handler: Option<ErrorHandler>,
    ) -> Self {
        Self {
            shared: Arc::new(shared),
            prefix,
            suffix,
            global_tags: global_tags.into(),
            error_handler,
            is_child: false,
        }
    }

    /// Creates a child client.
    ///
    /// The child shares this client's transport, dialect, and sampling. Its prefix, suffix, and error handler are
    /// replaced when given in `options`, and inherited otherwise. Its global tags are the tags in `options` merged over
    /// this client's global tags: a child tag with the same key as a parent tag replaces it.
    pub fn child_client(&self, options: ChildOptions) -> Client {
        let global_tags = merge(&self.global_tags, &options.global_tags, self.shared.dialect);

        Client {
            shared: Arc::clone(&self.shared),
            prefix: options.prefix.unwrap_or_else(|| self.prefix.clone()),
            suffix: options.suffix.unwrap_or_else(|| self.suffix.clone()),
            global_tags: global_tags.into(),
            error_handler: options.error_handler.or_else(|| self.error_handler.clone()),
            is_child: true,
        }
    }

    /// Returns `true` if this client was created with [`Client::child_client`].
    pub fn is_child(&self) -> bool {
        self.is_child
    }

    /// Returns the prefix prepended to every metric name, check name, and event title.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the suffix appended to every metric name, check name, and event title.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Returns the tags attached to every call made through this client.
    pub fn global_tags(&self) -> &[String] {
        &self.global_tags
    }

    /// Returns the dialect lines are encoded in.
    pub fn dialect(&self) -> Dialect {
        self.shared.dialect
    }

    /// Returns the lifecycle state of the shared transport.
    pub fn transport_state(&self) -> TransportState {
        self.shared.transport.state()
    }

    /// Increments a counter by one.
    pub fn increment(&self, name: &str) -> Result<(), ClientError> {
        self.increment_with(name).send()
    }

    /// Decrements a counter by one.
    pub fn decrement(&self, name: &str) -> Result<(), ClientError> {
        self.decrement_with(name).send()
    }

    /// Adds `value` to a counter.
    pub fn count(&self, name: &str, value: i64) -> Result<(), ClientError> {
        self.count_with(name, value).send()
    }

    /// Sets a gauge.
    pub fn gauge<V: Into<MetricValue>>(&self, name: &str, value: V) -> Result<(), ClientError> {
        self.gauge_with(name, value).send()
    }

    /// Adds a member to a set, for counting unique occurrences.
    pub fn set<V: Into<MetricValue>>(&self, name: &str, value: V) -> Result<(), ClientError> {
        self.set_with(name, value).send()
    }

    /// Records a timing, in milliseconds.
    pub fn timing<V: Into<MetricValue>>(&self, name: &str, value: V) -> Result<(), ClientError> {
        self.timing_with(name, value).send()
    }

    /// Records a value in a histogram.
    pub fn histogram<V: Into<MetricValue>>(&self, name: &str, value: V) -> Result<(), ClientError> {
        self.histogram_with(name, value).send()
    }

    /// Records a value in a distribution.
    pub fn distribution<V: Into<MetricValue>>(&self, name: &str, value: V) -> Result<(), ClientError> {
        self.distribution_with(name, value).send()
    }

    /// Sends a service check.
    ///
    /// # Errors
    ///
    /// In the telegraf dialect, service checks are not supported: [`ClientError::Configuration`] is returned unless an
    /// error handler is configured, in which case the error goes to the handler instead.
    pub fn check(&self, name: &str, status: CheckStatus) -> Result<(), ClientError> {
        self.check_with(name, status).send()
    }

    /// Sends an event.
    ///
    /// # Errors
    ///
    /// In the telegraf dialect, events are not supported: [`ClientError::Configuration`] is returned unless an error
    /// handler is configured, in which case the error goes to the handler instead.
    pub fn event(&self, title: &str, text: &str) -> Result<(), ClientError> {
        self.event_with(title, text).send()
    }

    /// Prepares a metric of the given type.
    pub fn metric_with<V: Into<MetricValue>>(&self, name: &str, value: V, metric_type: MetricType) -> MetricCall<'_> {
        MetricCall {
            client: self,
            name: name.to_string(),
            value: value.into(),
            metric_type,
            tags: Tags::default(),
            sample_rate: None,
            callback: None,
        }
    }

    /// Prepares a counter increment by one.
    pub fn increment_with(&self, name: &str) -> MetricCall<'_> {
        self.metric_with(name, 1, MetricType::Counter)
    }

    /// Prepares a counter decrement by one.
    pub fn decrement_with(&self, name: &str) -> MetricCall<'_> {
        self.metric_with(name, -1, MetricType::Counter)
    }

    /// Prepares a counter update.
    pub fn count_with(&self, name: &str, value: i64) -> MetricCall<'_> {
        self.metric_with(name, value, MetricType::Counter)
    }

    /// Prepares a gauge update.
    pub fn gauge_with<V: Into<MetricValue>>(&self, name: &str, value: V) -> MetricCall<'_> {
        self.metric_with(name, value, MetricType::Gauge)
    }

    /// Prepares a set update.
    pub fn set_with<V: Into<MetricValue>>(&self, name: &str, value: V) -> MetricCall<'_> {
        self.metric_with(name, value, MetricType::Set)
    }

    /// Prepares a timing, in milliseconds.
    pub fn timing_with<V: Into<MetricValue>>(&self, name: &str, value: V) -> MetricCall<'_> {
        self.metric_with(name, value, MetricType::Timing)
    }

    /// Prepares a histogram update.
    pub fn histogram_with<V: Into<MetricValue>>(&self, name: &str, value: V) -> MetricCall<'_> {
        self.metric_with(name, value, MetricType::Histogram)
    }

    /// Prepares a distribution update.
    pub fn distribution_with<V: Into<MetricValue>>(&self, name: &str, value: V) -> MetricCall<'_> {
        self.metric_with(name, value, MetricType::Distribution)
    }

    /// Prepares a service check.
    pub fn check_with(&self, name: &str, status: CheckStatus) -> CheckCall<'_> {
        CheckCall {
            client: self,
            name: name.to_string(),
            status,
            options: CheckOptions::default(),
            tags: Tags::default(),
            callback: None,
        }
    }

    /// Prepares an event.
    pub fn event_with(&self, title: &str, text: &str) -> EventCall<'_> {
        EventCall {
            client: self,
            title: title.to_string(),
            text: text.to_string(),
            options: EventOptions::default(),
            tags: Tags::default(),
            callback: None,
        }
    }

    /// Runs `f`, and records how long it took as a timing.
    pub fn time<F, R>(&self, name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.timing_with(name, elapsed_ms).dispatch();
        result
    }

    /// Sends out any buffered lines.
    pub fn flush(&self) {
        self.shared.transport.flush();
    }

    /// Closes the shared transport.
    ///
    /// Buffered lines are flushed before the transport closes. Every client sharing the transport, including children,
    /// fails further sends with [`ClientError::Closed`].
    pub fn close(&self) {
        self.shared.transport.close(None);
    }

    /// Closes the shared transport, calling `callback` once it is closed.
    pub fn close_with<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.transport.close(Some(Box::new(callback)));
    }

    /// Returns the lines recorded so far, if the client uses the mock transport.
    pub fn mock_lines(&self) -> Option<Vec<String>> {
        self.shared.mock.as_ref().map(|mock| mock.lines())
    }

    /// Removes and returns the lines recorded so far, if the client uses the mock transport.
    pub fn take_mock_lines(&self) -> Option<Vec<String>> {
        self.shared.mock.as_ref().map(|mock| mock.take_lines())
    }

    fn writer(&self) -> LineWriter<'_> {
        LineWriter::new(self.shared.dialect, &self.prefix, &self.suffix)
    }

    fn resolve_tags(&self, tags: &Tags) -> Cow<'_, [String]> {
        if tags.is_empty() {
            Cow::Borrowed(&self.global_tags[..])
        } else {
            Cow::Owned(merge(&self.global_tags, tags, self.shared.dialect))
        }
    }

    fn completion(&self, callback: Option<SendCallback>) -> Completion {
        Completion::new(callback, self.error_handler.clone())
    }

    /// Raises a configuration error: to the error handler if there is one, and to the caller otherwise.
    fn raise(&self, e: ClientError) -> Result<(), ClientError> {
        match &self.error_handler {
            Some(handler) => {
                handler(e);
                Ok(())
            }
            None => Err(e),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.shared.transport.transport_id())
            .field("dialect", &self.shared.dialect)
            .field("prefix", &self.prefix)
            .field("suffix", &self.suffix)
            .field("global_tags", &self.global_tags)
            .field("is_child", &self.is_child)
            .finish_non_exhaustive()
    }
}

/// Overrides applied when creating a child client.
#[derive(Clone, Default)]
pub struct ChildOptions {
    prefix: Option<String>,
    suffix: Option<String>,
    global_tags: Tags,
    error_handler: Option<ErrorHandler>,
}

impl ChildOptions {
    /// Creates an empty set of overrides, under which the child inherits everything from its parent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the parent's prefix.
    #[must_use]
    pub fn with_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Replaces the parent's suffix.
    #[must_use]
    pub fn with_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Sets the tags merged over the parent's global tags.
    #[must_use]
    pub fn with_global_tags<T: Into<Tags>>(mut self, tags: T) -> Self {
        self.global_tags = tags.into();
        self
    }

    /// Replaces the parent's error handler.
    #[must_use]
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ClientError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for ChildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildOptions")
            .field("prefix", &self.prefix)
            .field("suffix", &self.suffix)
            .field("global_tags", &self.global_tags)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

fn boxed_callback<F>(callback: F) -> SendCallback
where
    F: FnOnce(Result<usize, ClientError>) + Send + 'static,
{
    Box::new(callback)
}

/// A metric call, ready to be sent.
#[must_use = "the metric is only sent once `send` is called"]
pub struct MetricCall<'a> {
    client: &'a Client,
    name: String,
    value: MetricValue,
    metric_type: MetricType,
    tags: Tags,
    sample_rate: Option<f64>,
    callback: Option<SendCallback>,
}

impl MetricCall<'_> {
    /// Sets the tags of this call, merged over the client's global tags.
    pub fn tags<T: Into<Tags>>(mut self, tags: T) -> Self {
        self.tags = tags.into();
        self
    }

    /// Sets the sample rate of this call, overriding the client's default.
    ///
    /// Rates strictly between zero and one send the call with that probability. Any other rate always sends it.
    pub fn sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Sets a callback receiving the outcome of the send.
    ///
    /// On success, the callback receives the number of bytes written for this line, including the trailing newline
    /// over TCP. A call skipped by sampling succeeds with zero bytes.
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Result<usize, ClientError>) + Send + 'static,
    {
        self.callback = Some(boxed_callback(callback));
        self
    }

    /// Sends the metric.
    ///
    /// Metrics never fail synchronously: delivery errors go to the callback or the error handler.
    pub fn send(self) -> Result<(), ClientError> {
        self.dispatch();
        Ok(())
    }

    fn dispatch(self) {
        let client = self.client;
        let completion = client.completion(self.callback);

        let rate = self.sample_rate.unwrap_or(client.shared.default_sample_rate);
        let sample_rate = match client.shared.sampler.sample(rate) {
            Decision::Emit(sample_rate) => sample_rate,
            Decision::Drop => {
                completion.complete(Ok(0));
                return;
            }
        };

        let tags = client.resolve_tags(&self.tags);
        let line = client.writer().write_metric(&self.name, &self.value, self.metric_type, sample_rate, &tags);
        client.shared.transport.send(line, completion);
    }
}

/// A service check call, ready to be sent.
#[must_use = "the service check is only sent once `send` is called"]
pub struct CheckCall<'a> {
    client: &'a Client,
    name: String,
    status: CheckStatus,
    options: CheckOptions,
    tags: Tags,
    callback: Option<SendCallback>,
}

impl CheckCall<'_> {
    /// Sets the tags of this call, merged over the client's global tags.
    pub fn tags<T: Into<Tags>>(mut self, tags: T) -> Self {
        self.tags = tags.into();
        self
    }

    /// Sets the time the check was run.
    pub fn timestamp<T: Into<Timestamp>>(mut self, timestamp: T) -> Self {
        self.options.timestamp = Some(timestamp.into());
        self
    }

    /// Sets the host the check applies to.
    pub fn hostname<H: Into<String>>(mut self, hostname: H) -> Self {
        self.options.hostname = Some(hostname.into());
        self
    }

    /// Sets a message describing the status.
    pub fn message<M: Into<String>>(mut self, message: M) -> Self {
        self.options.message = Some(message.into());
        self
    }

    /// Replaces every optional field at once.
    pub fn options(mut self, options: CheckOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets a callback receiving the outcome of the send.
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Result<usize, ClientError>) + Send + 'static,
    {
        self.callback = Some(boxed_callback(callback));
        self
    }

    /// Sends the service check.
    ///
    /// # Errors
    ///
    /// In the telegraf dialect, [`ClientError::Configuration`] is returned unless an error handler is configured. The
    /// callback is not called in that case.
    pub fn send(self) -> Result<(), ClientError> {
        let client = self.client;
        let tags = client.resolve_tags(&self.tags);
        match client.writer().write_check(&self.name, self.status, &self.options, &tags) {
            Ok(line) => {
                client.shared.transport.send(line, client.completion(self.callback));
                Ok(())
            }
            Err(e) => client.raise(e),
        }
    }
}

/// An event call, ready to be sent.
#[must_use = "the event is only sent once `send` is called"]
pub struct EventCall<'a> {
    client: &'a Client,
    title: String,
    text: String,
    options: EventOptions,
    tags: Tags,
    callback: Option<SendCallback>,
}

impl EventCall<'_> {
    /// Sets the tags of this call, merged over the client's global tags.
    pub fn tags<T: Into<Tags>>(mut self, tags: T) -> Self {
        self.tags = tags.into();
        self
    }

    /// Sets the time the event happened.
    pub fn timestamp<T: Into<Timestamp>>(mut self, timestamp: T) -> Self {
        self.options.timestamp = Some(timestamp.into());
        self
    }

    /// Sets the host the event happened on.
    pub fn hostname<H: Into<String>>(mut self, hostname: H) -> Self {
        self.options.hostname = Some(hostname.into());
        self
    }

    /// Sets the key used to group related events together.
    pub fn aggregation_key<K: Into<String>>(mut self, key: K) -> Self {
        self.options.aggregation_key = Some(key.into());
        self
    }

    /// Sets the priority of the event.
    pub fn priority(mut self, priority: EventPriority) -> Self {
        self.options.priority = Some(priority);
        self
    }

    /// Sets the source type of the event.
    pub fn source_type_name<S: Into<String>>(mut self, source_type_name: S) -> Self {
        self.options.source_type_name = Some(source_type_name.into());
        self
    }

    /// Sets the alert type of the event.
    pub fn alert_type(mut self, alert_type: EventAlertType) -> Self {
        self.options.alert_type = Some(alert_type);
        self
    }

    /// Replaces every optional field at once.
    pub fn options(mut self, options: EventOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets a callback receiving the outcome of the send.
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Result<usize, ClientError>) + Send + 'static,
    {
        self.callback = Some(boxed_callback(callback));
        self
    }

    /// Sends the event.
    ///
    /// # Errors
    ///
    /// In the telegraf dialect, [`ClientError::Configuration`] is returned unless an error handler is configured. The
    /// callback is not called in that case.
    pub fn send(self) -> Result<(), ClientError> {
        let client = self.client;
        let tags = client.resolve_tags(&self.tags);
        match client.writer().write_event(&self.title, &self.text, &self.options, &tags) {
            Ok(line) => {
                client.shared.transport.send(line, client.completion(self.callback));
                Ok(())
            }
            Err(e) => client.raise(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{ChildOptions, Client};
    use crate::{
        builder::ClientBuilder,
        error::ClientError,
        sampling::FixedRandom,
        tags::Dialect,
        transport::TransportState,
        writer::{CheckStatus, EventAlertType, EventPriority},
    };

    fn mock() -> ClientBuilder {
        ClientBuilder::default().with_mock(true).with_telemetry(false)
    }

    type Outcomes = Arc<Mutex<Vec<Result<usize, String>>>>;

    fn outcomes() -> (Outcomes, impl Fn() -> Box<dyn FnOnce(Result<usize, ClientError>) + Send>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let make = move || {
            let seen = Arc::clone(&seen2);
            Box::new(move |result: Result<usize, ClientError>| {
                seen.lock().unwrap().push(result.map_err(|e| e.to_string()));
            }) as Box<dyn FnOnce(Result<usize, ClientError>) + Send>
        };
        (seen, make)
    }

    fn lines(client: &Client) -> Vec<String> {
        client.take_mock_lines().unwrap()
    }

    #[test]
    fn metric_types() {
        let client = mock().build().unwrap();
        client.increment("test").unwrap();
        client.decrement("test").unwrap();
        client.count("test", 23).unwrap();
        client.gauge("test", 42.5).unwrap();
        client.set("test", "user42").unwrap();
        client.timing("test", 250).unwrap();
        client.histogram("test", 7).unwrap();
        client.distribution("test", 0.25).unwrap();

        assert_eq!(
            lines(&client),
            vec![
                "test:1|c",
                "test:-1|c",
                "test:23|c",
                "test:42.5|g",
                "test:user42|s",
                "test:250|ms",
                "test:7|h",
                "test:0.25|d",
            ]
        );
    }

    #[test]
    fn global_and_call_tags() {
        let client = mock().with_global_tags(["gtag:123", "foo"]).build().unwrap();
        client.increment("test").unwrap();
        client.increment_with("test").tags(["gtag:234", "bar"]).send().unwrap();

        assert_eq!(lines(&client), vec!["test:1|c|#gtag:123,foo", "test:1|c|#gtag:234,foo,bar"]);
    }

    #[test]
    fn map_tags_are_sanitized() {
        let client = mock().build().unwrap();
        client.increment_with("test").tags([("a|b", "c:d"), ("e", "f@g")]).send().unwrap();
        assert_eq!(lines(&client), vec!["test:1|c|#a_b:c_d,e:f_g"]);
    }

    #[test]
    fn telegraf_metrics_carry_tags_in_name() {
        let client = mock().with_telegraf(true).with_global_tags(["gtag:123"]).build().unwrap();
        assert_eq!(client.dialect(), Dialect::Telegraf);

        client.increment_with("test").tags(["foo:bar"]).send().unwrap();
        assert_eq!(lines(&client), vec!["test,gtag=123,foo=bar:1|c"]);
    }

    #[test]
    fn telegraf_check_is_a_configuration_error() {
        let client = mock().with_telegraf(true).build().unwrap();
        let err = client.check("test", CheckStatus::Ok).unwrap_err();
        assert!(err.is_configuration());

        let err = client.event("title", "text").unwrap_err();
        assert!(err.is_configuration());
        assert!(lines(&client).is_empty());
    }

    #[test]
    fn telegraf_check_goes_to_error_handler() {
        let handled = Arc::new(Mutex::new(Vec::new()));
        let handled2 = Arc::clone(&handled);
        let client = mock()
            .with_telegraf(true)
            .with_error_handler(move |e| handled2.lock().unwrap().push(e.is_configuration()))
            .build()
            .unwrap();

        let (seen, make) = outcomes();
        client.check_with("test", CheckStatus::Ok).callback(make()).send().unwrap();

        assert_eq!(*handled.lock().unwrap(), vec![true]);
        assert!(seen.lock().unwrap().is_empty());
        assert!(lines(&client).is_empty());
    }

    #[test]
    fn mock_check_completes_with_zero_bytes() {
        let client = mock().build().unwrap();
        let (seen, make) = outcomes();
        client.check_with("test", CheckStatus::Ok).callback(make()).send().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Ok(0)]);
        assert_eq!(lines(&client), vec!["_sc|test|0"]);
    }

    #[test]
    fn check_with_options() {
        let client = mock().with_prefix("p.").with_global_tags(["env:prod"]).build().unwrap();
        client
            .check_with("svc", CheckStatus::Warning)
            .timestamp(1_700_000_000u64)
            .hostname("host1")
            .message("slow")
            .tags(["shard:2"])
            .send()
            .unwrap();

        assert_eq!(lines(&client), vec!["_sc|p.svc|1|d:1700000000|h:host1|m:slow|#env:prod,shard:2"]);
    }

    #[test]
    fn event_with_options() {
        let client = mock().build().unwrap();
        client
            .event_with("deploy", "v1.2.3")
            .aggregation_key("deploys")
            .priority(EventPriority::Low)
            .source_type_name("ci")
            .alert_type(EventAlertType::Success)
            .tags(["team:infra"])
            .send()
            .unwrap();

        assert_eq!(lines(&client), vec!["_e{6,6}:deploy|v1.2.3|k:deploys|p:low|s:ci|t:success|#team:infra"]);
    }

    #[test]
    fn sampling() {
        let emitting = mock().with_random_source(FixedRandom(0.0)).build().unwrap();
        emitting.increment_with("test").sample_rate(0.5).send().unwrap();
        assert_eq!(lines(&emitting), vec!["test:1|c|@0.5"]);

        let skipping = mock().with_random_source(FixedRandom(0.99)).with_sample_rate(0.5).build().unwrap();
        let (seen, make) = outcomes();
        skipping.increment_with("test").callback(make()).send().unwrap();
        assert!(lines(&skipping).is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![Ok(0)]);

        // An explicit rate of one always sends, regardless of the default.
        skipping.increment_with("test").sample_rate(1.0).send().unwrap();
        assert_eq!(lines(&skipping), vec!["test:1|c"]);
    }

    #[test]
    fn child_overrides() {
        let parent = mock()
            .with_prefix("parent.")
            .with_suffix(".s")
            .with_global_tags(["gtag:1", "keep:1"])
            .build()
            .unwrap();
        let child =
            parent.child_client(ChildOptions::new().with_prefix("child.").with_global_tags(["gtag:2", "extra"]));

        assert!(!parent.is_child());
        assert!(child.is_child());
        assert_eq!(child.prefix(), "child.");
        assert_eq!(child.suffix(), ".s");
        assert_eq!(child.global_tags(), ["gtag:2", "keep:1", "extra"]);

        child.increment("test").unwrap();
        assert_eq!(lines(&parent), vec!["child.test.s:1|c|#gtag:2,keep:1,extra"]);
    }

    #[test]
    fn grandchild_merges_against_immediate_parent() {
        let root = mock().with_global_tags(["a:1"]).build().unwrap();
        let child = root.child_client(ChildOptions::new().with_global_tags(["b:2"]));
        let grandchild = child.child_client(ChildOptions::new().with_global_tags(["a:3", "c:4"]));

        assert_eq!(grandchild.global_tags(), ["a:3", "b:2", "c:4"]);
        grandchild.gauge("test", 1).unwrap();
        assert_eq!(lines(&root), vec!["test:1|g|#a:3,b:2,c:4"]);
    }

    #[test]
    fn child_error_handler_override() {
        let parent_handled = Arc::new(Mutex::new(0));
        let child_handled = Arc::new(Mutex::new(0));
        let (p, c) = (Arc::clone(&parent_handled), Arc::clone(&child_handled));

        let parent =
            mock().with_telegraf(true).with_error_handler(move |_| *p.lock().unwrap() += 1).build().unwrap();
        let inherited = parent.child_client(ChildOptions::new());
        let overridden = parent.child_client(ChildOptions::new().with_error_handler(move |_| *c.lock().unwrap() += 1));

        inherited.check("test", CheckStatus::Ok).unwrap();
        overridden.check("test", CheckStatus::Ok).unwrap();

        assert_eq!(*parent_handled.lock().unwrap(), 1);
        assert_eq!(*child_handled.lock().unwrap(), 1);
    }

    #[test]
    fn close_rejects_further_sends() {
        let client = mock().build().unwrap();
        let child = client.child_client(ChildOptions::new());
        let closed = Arc::new(Mutex::new(false));
        let closed2 = Arc::clone(&closed);
        client.close_with(move || *closed2.lock().unwrap() = true);

        assert!(*closed.lock().unwrap());
        assert_eq!(child.transport_state(), TransportState::Closed);

        let (seen, make) = outcomes();
        child.increment_with("test").callback(make()).send().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Err(ClientError::Closed.to_string())]);
    }

    #[test]
    fn time_records_a_timing() {
        let client = mock().build().unwrap();
        let value = client.time("op", || 42);
        assert_eq!(value, 42);

        let lines = lines(&client);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("op:"));
        assert!(lines[0].ends_with("|ms"));
    }
}
