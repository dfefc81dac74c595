//! Core application runner for `tilt-relay`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically with an injected scanner and publisher.

use crate::label::Label;
use crate::publisher::{HttpPublisher, LinePublisher, Publisher};
use crate::registry::{DEFAULT_PUBLISH_INTERVAL, Registry};
use crate::relay::Relay;
use crate::scanner::{Backend, Frame, ScanError};
use crate::store::{DeviceStore, SharedStore};
use crate::http::{self, HttpState};
use clap::Parser;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

/// Configuration for the relay.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Endpoint that receives readings as JSON POST requests.
    /// Without it, readings are printed to stdout as JSON lines.
    #[arg(long, value_name = "URL")]
    pub publish_url: Option<String>,

    /// Give up on a publish request after this long.
    #[arg(long, default_value = "30s", value_parser = crate::duration::parse_interval)]
    pub publish_timeout: Duration,

    /// Minimum time between two publications of the same Tilt.
    /// Accepts duration with suffix: 30s, 15m, 1h.
    #[arg(long, default_value = "15m", value_parser = crate::duration::parse_interval)]
    pub interval: Duration,

    /// Address of the query server (/getTilts, /getTilt, /).
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Do not start the query server.
    #[arg(long)]
    pub no_http: bool,

    /// Human-readable name for a Tilt on the status page.
    /// Format: --label red=Stout or --label red*hd=Lager
    #[arg(long = "label", value_parser = crate::label::parse_label, value_name = "LABEL")]
    pub labels: Vec<Label>,

    /// Verbose output, log rejected frames and publish responses
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            publish_url: None,
            publish_timeout: Duration::from_secs(30),
            interval: DEFAULT_PUBLISH_INTERVAL,
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            no_http: false,
            labels: Vec::new(),
            verbose: false,
            backend: Backend::default(),
        }
    }
}

/// Errors returned by the relay.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Frame>, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Frame>, ScanError>> + Send + '_>> {
        Box::pin(async move { crate::scanner::start_scan(backend).await })
    }
}

/// Wait until `deadline`, or forever when no timer is armed.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drive the relay from a stream of frames until the stream ends.
///
/// Frames and timer ticks are handled one at a time on the calling task, so
/// a publish in progress holds back both the radio and the other timers.
pub async fn run_relay(
    relay: &mut Relay,
    frames: &mut mpsc::Receiver<Frame>,
    publisher: &dyn Publisher,
) {
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if let Err(error) = relay.accept(&frame) {
                        debug!(%error, "frame rejected");
                    }
                }
                None => break,
            },
            _ = sleep_until_deadline(relay.next_deadline()) => {
                relay.service_due(publisher, Instant::now()).await;
            }
        }
    }
}

/// Run the relay with an injected scanner and publisher, sharing `store`
/// with any reader such as the query server.
pub async fn run_with(
    options: &Options,
    scanner: &dyn Scanner,
    publisher: &dyn Publisher,
    store: SharedStore,
) -> Result<(), RunError> {
    let mut relay = Relay::with_shared(store);
    let mut frames = scanner.start_scan(options.backend).await?;

    run_relay(&mut relay, &mut frames, publisher).await;

    warn!("scanner stopped");
    Ok(())
}

/// Run the relay against real Bluetooth hardware and the configured outputs.
pub async fn run(options: Options) -> Result<(), RunError> {
    let store = DeviceStore::new(Registry::tilt(options.interval)).shared();

    if !options.no_http {
        let state = Arc::new(HttpState {
            store: store.clone(),
            labels: crate::label::to_map(&options.labels),
        });
        let listener = tokio::net::TcpListener::bind(options.listen).await?;
        info!(listen = %options.listen, "query server started");
        tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, http::router(state)).await {
                warn!(%error, "query server stopped");
            }
        });
    }

    info!(
        interval = ?options.interval,
        backend = %options.backend,
        "relay started"
    );

    match &options.publish_url {
        Some(url) => {
            let publisher = HttpPublisher::new(url.clone(), options.publish_timeout)?;
            info!(url = publisher.url(), "publishing over HTTP");
            run_with(&options, &RealScanner, &publisher, store).await
        }
        None => {
            let publisher = LinePublisher::new(io::stdout());
            info!("publishing to stdout");
            run_with(&options, &RealScanner, &publisher, store).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{PublishError, PublishFuture, PublishPayload};
    use crate::registry::Color;
    use crate::store;
    use crate::test_utils::color_frame;
    use reqwest::StatusCode;
    use std::sync::Mutex;

    const INTERVAL: Duration = Duration::from_secs(900);

    /// A scanner that plays back frames at fixed offsets from the start,
    /// then keeps the channel open for `linger` before closing it.
    #[derive(Debug)]
    struct FakeScanner {
        frames: Mutex<Vec<(Duration, Frame)>>,
        linger: Duration,
    }

    impl FakeScanner {
        fn new(frames: Vec<(Duration, Frame)>, linger: Duration) -> Self {
            Self {
                frames: Mutex::new(frames),
                linger,
            }
        }
    }

    impl Scanner for FakeScanner {
        fn start_scan(
            &self,
            _backend: Backend,
        ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Frame>, ScanError>> + Send + '_>>
        {
            let frames = self.frames.lock().unwrap().clone();
            let linger = self.linger;
            Box::pin(async move {
                let (tx, rx) = mpsc::channel::<Frame>(frames.len().max(1));
                tokio::spawn(async move {
                    let start = Instant::now();
                    for (offset, frame) in frames {
                        sleep_until(start + offset).await;
                        let _ = tx.send(frame).await;
                    }
                    tokio::time::sleep(linger).await;
                    // drop tx to close channel
                });
                Ok(rx)
            })
        }
    }

    /// Records the time and payload of each publish.
    #[derive(Debug)]
    struct RecordingPublisher {
        start: Instant,
        sent: Mutex<Vec<(Duration, PublishPayload)>>,
        fail_first: Mutex<usize>,
    }

    impl RecordingPublisher {
        fn new(fail_first: usize) -> Self {
            Self {
                start: Instant::now(),
                sent: Mutex::new(Vec::new()),
                fail_first: Mutex::new(fail_first),
            }
        }

        fn sent(&self) -> Vec<(Duration, PublishPayload)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Publisher for RecordingPublisher {
        fn publish<'a>(&'a self, payload: &'a PublishPayload) -> PublishFuture<'a> {
            self.sent
                .lock()
                .unwrap()
                .push((self.start.elapsed(), payload.clone()));
            let mut fail = self.fail_first.lock().unwrap();
            let result = if *fail > 0 {
                *fail -= 1;
                Err(PublishError::Status(StatusCode::BAD_GATEWAY))
            } else {
                Ok(())
            };
            Box::pin(std::future::ready(result))
        }
    }

    fn options() -> Options {
        Options {
            interval: INTERVAL,
            no_http: true,
            ..Options::default()
        }
    }

    fn shared_store() -> SharedStore {
        DeviceStore::new(Registry::tilt(INTERVAL)).shared()
    }

    #[tokio::test(start_paused = true)]
    async fn run_publishes_once_then_goes_quiet() {
        let scanner = FakeScanner::new(
            vec![(Duration::ZERO, color_frame(Color::Red, 65, 1015))],
            Duration::from_secs(3600),
        );
        let publisher = RecordingPublisher::new(0);
        let store = shared_store();

        run_with(&options(), &scanner, &publisher, store.clone())
            .await
            .unwrap();

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, INTERVAL);
        assert_eq!(sent[0].1.name, "red");
        assert_eq!(sent[0].1.gravity, 1.015);

        assert!(!store::lock(&store).snapshot(0).unwrap().state.pending);
    }

    #[tokio::test(start_paused = true)]
    async fn run_debounces_chatty_beacon() {
        // A reading every 70 seconds for about 45 minutes.
        let frames = (0..40u16)
            .map(|m| {
                (
                    Duration::from_secs(70 * u64::from(m)),
                    color_frame(Color::Green, 66, 1050 - m),
                )
            })
            .collect();
        let scanner = FakeScanner::new(frames, Duration::from_secs(3600));
        let publisher = RecordingPublisher::new(0);

        run_with(&options(), &scanner, &publisher, shared_store())
            .await
            .unwrap();

        let sent = publisher.sent();
        let times: Vec<Duration> = sent.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![INTERVAL, INTERVAL * 2, INTERVAL * 3, INTERVAL * 4]);
        // Each publish carries the latest reading at tick time.
        assert_eq!(sent[0].1.gravity, 1.038);
        assert_eq!(sent[1].1.gravity, 1.025);
        assert_eq!(sent[2].1.gravity, 1.012);
        assert_eq!(sent[3].1.gravity, 1.011);
        assert_eq!(sent[3].1.name, "green");
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_failed_publish_every_interval() {
        let scanner = FakeScanner::new(
            vec![(Duration::ZERO, color_frame(Color::Blue, 682, 10480))],
            Duration::from_secs(3 * 3600),
        );
        let publisher = RecordingPublisher::new(2);
        let store = shared_store();

        run_with(&options(), &scanner, &publisher, store.clone())
            .await
            .unwrap();

        let times: Vec<Duration> = publisher.sent().iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![INTERVAL, INTERVAL * 2, INTERVAL * 3]);
        assert!(!store::lock(&store).snapshot(13).unwrap().state.pending);
    }

    #[tokio::test(start_paused = true)]
    async fn run_ignores_foreign_frames() {
        let mut foreign = color_frame(Color::Red, 65, 1015);
        foreign[0] = 0x99;
        foreign[1] = 0x04;
        let scanner = FakeScanner::new(
            vec![(Duration::ZERO, foreign), (Duration::ZERO, vec![0x4C, 0x00])],
            Duration::from_secs(3600),
        );
        let publisher = RecordingPublisher::new(0);
        let store = shared_store();

        run_with(&options(), &scanner, &publisher, store.clone())
            .await
            .unwrap();

        assert!(publisher.sent().is_empty());
        assert!(store::lock(&store).heard_since(0).is_empty());
    }

    #[test]
    fn options_parse_defaults() {
        let options = Options::try_parse_from(["tilt-relay"]).unwrap();
        assert_eq!(options.interval, DEFAULT_PUBLISH_INTERVAL);
        assert_eq!(options.publish_timeout, Duration::from_secs(30));
        assert_eq!(options.listen, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert!(options.publish_url.is_none());
        assert!(!options.no_http);
    }

    #[test]
    fn options_parse_custom() {
        let options = Options::try_parse_from([
            "tilt-relay",
            "--publish-url",
            "http://log.example.net/stream?id=abc",
            "--interval",
            "5m",
            "--label",
            "red*hd=Stout",
            "--listen",
            "127.0.0.1:9000",
            "-v",
        ])
        .unwrap();
        assert_eq!(
            options.publish_url.as_deref(),
            Some("http://log.example.net/stream?id=abc")
        );
        assert_eq!(options.interval, Duration::from_secs(300));
        assert_eq!(options.labels.len(), 1);
        assert_eq!(options.labels[0].name, "Stout");
        assert!(options.verbose);
    }

    #[test]
    fn options_reject_zero_interval() {
        assert!(Options::try_parse_from(["tilt-relay", "--interval", "0"]).is_err());
    }
}
