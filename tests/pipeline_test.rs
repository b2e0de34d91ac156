use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rstest::{fixture, rstest};
use tokio::runtime::Runtime;

use flowpipe::codec::{Codec, CodecError, ScratchBuffer};
use flowpipe::message::{ElementRegistry, FieldSpec, Record, Template, TemplateKind};
use flowpipe::network::{BrokerClient, FrameSink, PublisherState, RecordFrame, SendOutcome};
use flowpipe::service::BrokerConfig;
use flowpipe::{setup_local_tracing, AppError, AppResult, MessageBatch, Pipeline, PipelineConfig};

#[fixture]
fn setup() {
    // already installed by an earlier test in this binary
    let _ = setup_local_tracing();
}

#[derive(Debug, Default)]
struct Recorded {
    connects: usize,
    sent: Vec<Vec<u8>>,
    flushes: usize,
    disconnects: usize,
}

/// Broker client that keeps everything it is asked to publish.
struct RecordingClient {
    recorded: Arc<Mutex<Recorded>>,
    refuse_connect: bool,
    connected: bool,
}

impl RecordingClient {
    fn new(refuse_connect: bool) -> (Self, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let client = RecordingClient {
            recorded: recorded.clone(),
            refuse_connect,
            connected: false,
        };
        (client, recorded)
    }
}

impl BrokerClient for RecordingClient {
    fn connect(&mut self) -> AppResult<()> {
        self.recorded.lock().connects += 1;
        if self.refuse_connect {
            return Err(AppError::BrokerError("connection refused".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send(&mut self, payload: &[u8]) -> SendOutcome {
        self.recorded.lock().sent.push(payload.to_vec());
        SendOutcome::Enqueued
    }

    fn poll(&mut self, _timeout: Duration) {}

    fn flush(&mut self, _timeout: Duration) -> usize {
        self.recorded.lock().flushes += 1;
        0
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.recorded.lock().disconnects += 1;
    }
}

/// Publishes the record data verbatim; data starting with `!` fails.
struct EchoCodec;

impl Codec for EchoCodec {
    fn convert(
        &self,
        record: &Record,
        _elements: &ElementRegistry,
        out: &mut ScratchBuffer,
    ) -> Result<usize, CodecError> {
        let data = &record.data;
        if data.first() == Some(&b'!') {
            return Err(CodecError::Unsupported("refused".to_string()));
        }
        if out.capacity() < data.len() {
            return Err(CodecError::BufferTooSmall { required: None });
        }
        out.as_mut_slice()[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }
}

fn config(workers: usize, ignore_options: bool) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.processing.worker_threads = workers;
    config.processing.messages_buffer_size = 4;
    config.processing.process_message_length = 8;
    config.format.ignore_options = ignore_options;
    config.broker.flush_timeout_ms = 100;
    config
}

fn batch(records: &[(String, TemplateKind)]) -> MessageBatch {
    let records = records
        .iter()
        .map(|(data, kind)| {
            let template = Arc::new(Template::new(256, *kind, vec![FieldSpec::iana(1, 8)]));
            Record::new(template, data.clone().into_bytes())
        })
        .collect();
    MessageBatch::new(records, Arc::new(ElementRegistry::new()))
}

fn data_batch(payloads: &[&str]) -> MessageBatch {
    let records: Vec<_> = payloads
        .iter()
        .map(|data| (data.to_string(), TemplateKind::Data))
        .collect();
    batch(&records)
}

fn wait_for(recorded: &Mutex<Recorded>, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while recorded.lock().sent.len() < count && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[rstest]
#[case(1)]
#[case(4)]
fn test_records_of_a_batch_stay_in_order(#[from(setup)] _setup: (), #[case] workers: usize) {
    const BATCHES: usize = 50;
    const RECORDS: usize = 20;

    let (client, recorded) = RecordingClient::new(false);
    let mut pipeline = Pipeline::new(&config(workers, true), Arc::new(EchoCodec), Box::new(client));
    assert_eq!(pipeline.start().unwrap(), PublisherState::Connected);

    for b in 0..BATCHES {
        let payloads: Vec<String> = (0..RECORDS).map(|r| format!("{}:{}", b, r)).collect();
        let payloads: Vec<&str> = payloads.iter().map(String::as_str).collect();
        pipeline.enqueue(data_batch(&payloads)).unwrap();
    }
    wait_for(&recorded, BATCHES * RECORDS);
    pipeline.stop();

    let recorded = recorded.lock();
    assert_eq!(recorded.sent.len(), BATCHES * RECORDS);
    let mut next_record = vec![0usize; BATCHES];
    for payload in &recorded.sent {
        let text = std::str::from_utf8(payload).unwrap();
        let (b, r) = text.split_once(':').unwrap();
        let (b, r): (usize, usize) = (b.parse().unwrap(), r.parse().unwrap());
        assert_eq!(r, next_record[b], "batch {} out of order", b);
        next_record[b] += 1;
    }
}

#[rstest]
#[case(true, 1)]
#[case(false, 2)]
fn test_options_records_skipped_on_request(
    #[from(setup)] _setup: (),
    #[case] ignore_options: bool,
    #[case] expected: usize,
) {
    let (client, recorded) = RecordingClient::new(false);
    let mut pipeline = Pipeline::new(
        &config(2, ignore_options),
        Arc::new(EchoCodec),
        Box::new(client),
    );
    pipeline.start().unwrap();
    pipeline
        .enqueue(batch(&[
            ("flow".to_string(), TemplateKind::Data),
            ("meta".to_string(), TemplateKind::Options),
        ]))
        .unwrap();
    assert!(pipeline.wait_drained(Duration::from_secs(5)));
    wait_for(&recorded, expected);
    pipeline.stop();

    assert_eq!(recorded.lock().sent.len(), expected);
    let stats = pipeline.stats();
    assert_eq!(stats.workers.skipped_options, (2 - expected) as u64);
}

#[rstest]
fn test_stop_joins_and_disconnects_once(#[from(setup)] _setup: ()) {
    let (client, recorded) = RecordingClient::new(false);
    let mut pipeline = Pipeline::new(&config(3, true), Arc::new(EchoCodec), Box::new(client));
    pipeline.start().unwrap();
    assert!(pipeline.is_running());

    pipeline.enqueue(data_batch(&["a", "b"])).unwrap();
    wait_for(&recorded, 2);
    pipeline.stop();
    assert!(!pipeline.is_running());
    assert_eq!(pipeline.publisher_state(), PublisherState::Closed);

    pipeline.stop();
    drop(pipeline);

    let recorded = recorded.lock();
    assert_eq!(recorded.flushes, 1);
    assert_eq!(recorded.disconnects, 1);
}

#[rstest]
fn test_stop_with_pending_batches(#[from(setup)] _setup: ()) {
    let (client, recorded) = RecordingClient::new(false);
    let mut pipeline = Pipeline::new(&config(1, true), Arc::new(EchoCodec), Box::new(client));
    // nothing consumes before start, so the ring keeps these
    pipeline.enqueue(data_batch(&["x"])).unwrap();
    pipeline.enqueue(data_batch(&["y"])).unwrap();
    pipeline.stop();

    assert_eq!(recorded.lock().disconnects, 1);
    // enqueue after stop hands the batch back instead of blocking
    assert!(pipeline.enqueue(data_batch(&["z"])).is_err());
    assert!(pipeline.start().is_err());
}

#[rstest]
fn test_second_start_is_refused(#[from(setup)] _setup: ()) {
    let (client, _recorded) = RecordingClient::new(false);
    let mut pipeline = Pipeline::new(&config(1, true), Arc::new(EchoCodec), Box::new(client));
    pipeline.start().unwrap();
    assert!(matches!(
        pipeline.start(),
        Err(AppError::IllegalStateError(_))
    ));
}

#[rstest]
fn test_failed_connect_does_not_fail_start(#[from(setup)] _setup: ()) {
    let (client, recorded) = RecordingClient::new(true);
    let mut config = config(2, true);
    config.broker.reconnect_backoff_initial_ms = 60_000;
    config.broker.reconnect_backoff_max_ms = 60_000;
    let mut pipeline = Pipeline::new(&config, Arc::new(EchoCodec), Box::new(client));
    assert_eq!(pipeline.start().unwrap(), PublisherState::Disconnected);

    pipeline.enqueue(data_batch(&["lost"])).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while pipeline.stats().publisher.dropped == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    pipeline.stop();

    let recorded = recorded.lock();
    assert!(recorded.sent.is_empty());
    assert_eq!(recorded.connects, 1);
    assert_eq!(pipeline.stats().publisher.dropped, 1);
}

#[rstest]
fn test_codec_failure_skips_only_that_record(#[from(setup)] _setup: ()) {
    let (client, recorded) = RecordingClient::new(false);
    let mut pipeline = Pipeline::new(&config(1, true), Arc::new(EchoCodec), Box::new(client));
    pipeline.start().unwrap();
    pipeline
        .enqueue(data_batch(&["first", "!broken", "a record longer than the limit", "last"]))
        .unwrap();
    wait_for(&recorded, 3);
    pipeline.stop();

    let recorded = recorded.lock();
    assert_eq!(
        recorded.sent,
        vec![
            b"first".to_vec(),
            b"a record longer than the limit".to_vec(),
            b"last".to_vec()
        ]
    );
    assert_eq!(pipeline.stats().workers.codec_failures, 1);
}

#[rstest]
fn test_publishes_json_over_tcp(#[from(setup)] _setup: ()) {
    let server = Runtime::new().unwrap();
    let sink = server.block_on(FrameSink::bind("127.0.0.1:0")).unwrap();
    let port = sink.local_addr().unwrap().port();
    let (frames_tx, frames_rx) = std::sync::mpsc::channel::<RecordFrame>();
    server.spawn(async move {
        let _ = sink
            .run(move |frame| {
                let _ = frames_tx.send(frame);
            })
            .await;
    });

    let mut config = config(2, true);
    config.broker = BrokerConfig {
        port,
        topic: "ipfix".to_string(),
        flush_timeout_ms: 2_000,
        ..BrokerConfig::default()
    };
    let mut pipeline = Pipeline::from_config(&config);
    assert_eq!(pipeline.start().unwrap(), PublisherState::Connected);

    let template = Arc::new(Template::new(
        256,
        TemplateKind::Data,
        vec![
            FieldSpec::iana(8, 4),
            FieldSpec::iana(12, 4),
            FieldSpec::iana(4, 1),
            FieldSpec::iana(2, 4),
        ],
    ));
    let record = Record::new(template, vec![10, 0, 0, 1, 10, 0, 0, 2, 17, 0, 0, 0, 3]);
    let elements = Arc::new(ElementRegistry::with_iana_defaults());
    pipeline
        .enqueue(MessageBatch::new(vec![record], elements))
        .unwrap();

    let frame = frames_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    pipeline.stop();

    assert_eq!(frame.topic, "ipfix");
    let json: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
    assert_eq!(json["@type"], "ipfix.entry");
    assert_eq!(json["iana:sourceIPv4Address"], "10.0.0.1");
    assert_eq!(json["iana:destinationIPv4Address"], "10.0.0.2");
    assert_eq!(json["iana:protocolIdentifier"], "UDP");
    assert_eq!(json["iana:packetDeltaCount"], 3);
    assert_eq!(pipeline.stats().publisher.enqueued, 1);
}
