//! Tick-driven monitor with automatic reconnection

use crate::config::AppConfig;
use crate::connector::Connector;
use iow_shared::state_machine::{LinkEvent, LinkStateMachine};
use iow_shared::{InterpretError, Interpreter, Message, Storage, StorageError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

/// Loop tuning taken from the config
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Wait after an idle or disconnected tick
    pub poll_interval: Duration,
    /// Lines processed per tick at most
    pub max_lines_per_tick: usize,
    /// Rows logged on shutdown
    pub summary_rows: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_lines_per_tick: 32,
            summary_rows: 5,
        }
    }
}

impl MonitorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_lines_per_tick: config.max_lines_per_tick,
            summary_rows: config.summary_rows,
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Link is down: connect failed, probe failed or the link broke mid-read
    Disconnected,
    /// Link was just established
    Connected,
    /// Link is up but nothing arrived before the read timeout
    Idle,
    /// Number of lines handled
    Processed(usize),
}

impl TickOutcome {
    fn waits(self) -> bool {
        matches!(self, TickOutcome::Disconnected | TickOutcome::Idle)
    }
}

/// Connect → read → interpret → persist → respond, one tick at a time
pub struct Monitor {
    connector: Box<dyn Connector>,
    storage: Storage,
    interpreter: Interpreter,
    link: LinkStateMachine,
    settings: MonitorSettings,
    shutdown: watch::Receiver<bool>,
}

impl Monitor {
    pub fn new(
        connector: Box<dyn Connector>,
        storage: Storage,
        interpreter: Interpreter,
        settings: MonitorSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            connector,
            storage,
            interpreter,
            link: LinkStateMachine::new(),
            settings,
            shutdown,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn link(&self) -> &LinkStateMachine {
        &self.link
    }

    /// Run until shutdown is requested or storage fails
    pub async fn run(&mut self) -> Result<(), StorageError> {
        self.run_ticks(None).await
    }

    /// Run at most `ticks` ticks
    pub async fn run_for(&mut self, ticks: usize) -> Result<(), StorageError> {
        self.run_ticks(Some(ticks)).await
    }

    async fn run_ticks(&mut self, limit: Option<usize>) -> Result<(), StorageError> {
        let span = info_span!("monitor", connector = self.connector.name());
        async move {
            info!(database = %self.storage.path().display(), "Monitor started");

            let mut ticks = 0usize;
            let result = loop {
                if self.shutdown_requested() {
                    info!("Shutdown requested");
                    break Ok(());
                }
                if limit.is_some_and(|limit| ticks >= limit) {
                    break Ok(());
                }
                ticks += 1;

                let outcome = match self.tick().await {
                    Ok(outcome) => outcome,
                    Err(e) => break Err(e),
                };

                if outcome.waits() {
                    self.idle_wait().await;
                }
            };

            self.connector.close_connection().await;
            self.log_summary();
            result
        }
        .instrument(span)
        .await
    }

    /// One pass of the loop. Only a storage failure is an error.
    pub async fn tick(&mut self) -> Result<TickOutcome, StorageError> {
        if !self.link.is_connected() {
            return Ok(self.try_connect().await);
        }

        if !self.connector.is_connected().await {
            self.lose_link("probe failed".into()).await;
            return Ok(TickOutcome::Disconnected);
        }

        let mut processed = 0;
        while processed < self.settings.max_lines_per_tick {
            let line = match self.connector.retrieve_data().await {
                Ok(line) => line,
                Err(e) => {
                    self.lose_link(e.to_string()).await;
                    return Ok(TickOutcome::Disconnected);
                }
            };

            if line.is_empty() {
                self.link.process_event(LinkEvent::ReadTimedOut);
                break;
            }
            self.link.process_event(LinkEvent::LineReceived);
            processed += 1;

            match self.interpreter.interpret(&line) {
                Ok(Message::TimeResponse(response)) => {
                    debug!(%response, "Answering time request");
                    if let Err(e) = self.connector.write_data(&response).await {
                        self.lose_link(e.to_string()).await;
                        return Ok(TickOutcome::Disconnected);
                    }
                }
                Ok(Message::Reading(reading)) => {
                    let row_id = self.storage.append(&reading)?;
                    debug!(
                        row_id,
                        sensor = %reading.sensor_id,
                        value = reading.value,
                        "Stored reading"
                    );
                }
                Err(InterpretError::Unrecognized) => {
                    debug!(%line, "Dropping unrecognized message");
                }
                Err(e) => {
                    warn!(%line, error = %e, "Dropping malformed message");
                }
            }
        }

        Ok(if processed == 0 {
            TickOutcome::Idle
        } else {
            TickOutcome::Processed(processed)
        })
    }

    async fn try_connect(&mut self) -> TickOutcome {
        debug!("Connecting to device");
        match self.connector.connect().await {
            Ok(()) => {
                self.link.process_event(LinkEvent::ConnectSucceeded);
                info!(reconnects = self.link.reconnects(), "Device connected");
                TickOutcome::Connected
            }
            Err(e) => {
                let reason = e.to_string();
                self.link.process_event(LinkEvent::ConnectFailed {
                    reason: reason.clone(),
                });
                warn!(
                    attempt = self.link.consecutive_failures(),
                    %reason,
                    "Connect failed, retrying"
                );
                TickOutcome::Disconnected
            }
        }
    }

    async fn lose_link(&mut self, reason: String) {
        warn!(%reason, "Device link lost");
        self.connector.close_connection().await;
        self.link.process_event(LinkEvent::LinkLost { reason });
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn idle_wait(&mut self) {
        let wait = self.settings.poll_interval;
        if wait.is_zero() {
            return;
        }
        // A dropped sender disables the shutdown branch
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            Ok(()) = self.shutdown.changed() => {}
        }
    }

    fn log_summary(&self) {
        let total = match self.storage.count() {
            Ok(total) => total,
            Err(e) => {
                warn!(error = %e, "Could not count stored readings");
                return;
            }
        };
        info!(total, reconnects = self.link().reconnects(), "Stored readings");

        match self.storage().latest(self.settings.summary_rows) {
            Ok(rows) => {
                for row in rows.iter().rev() {
                    info!(
                        row_id = row.row_id,
                        sensor = %row.reading.sensor_id,
                        time = %row.reading.storage_time(),
                        value = row.reading.value,
                        is_debug = row.reading.is_debug,
                        "Recent reading"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Could not read recent readings"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ConnectorError;
    use async_trait::async_trait;
    use iow_shared::state_machine::LinkState;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    const TEMPERATURE: &str =
        "Flag:D001,Time:20:47:40 23/01/2017,Value:22.70,ID:Temperature,Debug:0,";

    enum Read {
        Line(&'static str),
        Break,
    }

    #[derive(Default)]
    struct Script {
        connect_failures: usize,
        reads: VecDeque<Read>,
        written: Vec<String>,
        connects: usize,
        closes: usize,
        connected: bool,
    }

    /// In-memory connector driven by a script; an exhausted script times out
    struct ScriptedConnector(Arc<Mutex<Script>>);

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&mut self) -> Result<(), ConnectorError> {
            let mut script = self.0.lock().unwrap();
            if script.connect_failures > 0 {
                script.connect_failures -= 1;
                return Err(ConnectorError::NoDevice(vec!["/dev/null-device".into()]));
            }
            script.connects += 1;
            script.connected = true;
            Ok(())
        }

        async fn is_connected(&mut self) -> bool {
            self.0.lock().unwrap().connected
        }

        async fn retrieve_data(&mut self) -> Result<String, ConnectorError> {
            let mut script = self.0.lock().unwrap();
            if !script.connected {
                return Err(ConnectorError::NotConnected);
            }
            match script.reads.pop_front() {
                Some(Read::Line(line)) => Ok(line.to_string()),
                Some(Read::Break) => {
                    script.connected = false;
                    Err(ConnectorError::Disconnected("cable pulled".into()))
                }
                None => Ok(String::new()),
            }
        }

        async fn write_data(&mut self, message: &str) -> Result<(), ConnectorError> {
            let mut script = self.0.lock().unwrap();
            if !script.connected {
                return Err(ConnectorError::NotConnected);
            }
            script.written.push(message.to_string());
            Ok(())
        }

        async fn close_connection(&mut self) {
            let mut script = self.0.lock().unwrap();
            script.connected = false;
            script.closes += 1;
        }

        fn name(&self) -> &'static str {
            "Scripted"
        }
    }

    struct Harness {
        monitor: Monitor,
        script: Arc<Mutex<Script>>,
        shutdown: watch::Sender<bool>,
        _dir: tempfile::TempDir,
    }

    fn harness(script: Script, max_lines_per_tick: usize) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::create(dir.path().join("iow.db"), false).unwrap();
        let script = Arc::new(Mutex::new(script));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let settings = MonitorSettings {
            poll_interval: Duration::ZERO,
            max_lines_per_tick,
            summary_rows: 5,
        };
        let monitor = Monitor::new(
            Box::new(ScriptedConnector(script.clone())),
            storage,
            Interpreter::new(),
            settings,
            shutdown_rx,
        );
        Harness {
            monitor,
            script,
            shutdown,
            _dir: dir,
        }
    }

    fn script(reads: Vec<Read>) -> Script {
        Script {
            reads: reads.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stores_concrete_reading() {
        let mut h = harness(script(vec![Read::Line(TEMPERATURE)]), 32);

        assert_eq!(h.monitor.tick().await.unwrap(), TickOutcome::Connected);
        assert_eq!(h.monitor.tick().await.unwrap(), TickOutcome::Processed(1));
        assert_eq!(h.monitor.tick().await.unwrap(), TickOutcome::Idle);

        let rows = h.monitor.storage().latest(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_id, 1);
        assert_eq!(rows[0].reading.sensor_id, "Temperature");
        assert_eq!(rows[0].reading.storage_time(), "2017-01-23 20:47:40");
        assert_eq!(rows[0].reading.value, 22.7);
        assert!(!rows[0].reading.is_debug);
    }

    #[tokio::test]
    async fn test_answers_time_request() {
        let mut h = harness(script(vec![Read::Line("Flag:R001")]), 32);
        h.monitor.run_for(2).await.unwrap();

        let script = h.script.lock().unwrap();
        assert_eq!(script.written.len(), 1);
        assert_eq!(script.written[0].len(), 15);
        assert!(script.written[0].starts_with('T'));
        assert_eq!(h.monitor.storage().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_dropped() {
        let mut h = harness(
            script(vec![
                Read::Line("GARBAGE MESSAGE!"),
                Read::Line("Flag:D001,Time:20:47:40 23/01/2017,Value:22.70,Debug:0,"),
                Read::Line("Flag:D001,Time:Unparseable,Value:1.0,ID:x,Debug:0,"),
                Read::Line(TEMPERATURE),
            ]),
            32,
        );

        h.monitor.tick().await.unwrap();
        assert_eq!(h.monitor.tick().await.unwrap(), TickOutcome::Processed(4));
        assert_eq!(h.monitor.storage().count().unwrap(), 1);
        assert!(h.script.lock().unwrap().written.is_empty());
    }

    #[tokio::test]
    async fn test_broken_read_reconnects_and_keeps_rows() {
        let mut h = harness(
            script(vec![Read::Line(TEMPERATURE), Read::Break, Read::Line(TEMPERATURE)]),
            32,
        );

        assert_eq!(h.monitor.tick().await.unwrap(), TickOutcome::Connected);
        assert_eq!(h.monitor.tick().await.unwrap(), TickOutcome::Disconnected);
        assert_eq!(h.monitor.link().state(), LinkState::Disconnected);
        assert_eq!(h.monitor.storage().count().unwrap(), 1);

        assert_eq!(h.monitor.tick().await.unwrap(), TickOutcome::Connected);
        assert_eq!(h.monitor.link().reconnects(), 1);
        assert_eq!(h.monitor.tick().await.unwrap(), TickOutcome::Processed(1));

        assert_eq!(h.monitor.storage().count().unwrap(), 2);
        assert_eq!(h.script.lock().unwrap().connects, 2);
    }

    #[tokio::test]
    async fn test_storage_failure_stops_loop_and_closes_link() {
        let mut h = harness(script(vec![Read::Line(TEMPERATURE), Read::Line(TEMPERATURE)]), 32);

        let other = rusqlite::Connection::open(h._dir.path().join("iow.db")).unwrap();
        other.execute_batch("DROP TABLE data").unwrap();
        drop(other);

        let result = h.monitor.run_for(3).await;
        assert!(matches!(result, Err(StorageError::Sqlite(_))), "got {result:?}");

        let script = h.script.lock().unwrap();
        assert_eq!(script.connects, 1);
        assert!(script.closes >= 1);
        assert!(!script.connected);
        // The second line was never read
        assert_eq!(script.reads.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_failures_are_not_fatal() {
        let mut h = harness(
            Script {
                connect_failures: 2,
                ..Default::default()
            },
            32,
        );

        assert_eq!(h.monitor.tick().await.unwrap(), TickOutcome::Disconnected);
        assert_eq!(h.monitor.tick().await.unwrap(), TickOutcome::Disconnected);
        assert_eq!(h.monitor.link().consecutive_failures(), 2);
        assert_eq!(h.monitor.tick().await.unwrap(), TickOutcome::Connected);
        assert_eq!(h.monitor.link().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_failed_probe_disconnects() {
        let mut h = harness(Script::default(), 32);
        h.monitor.tick().await.unwrap();

        h.script.lock().unwrap().connected = false;
        assert_eq!(h.monitor.tick().await.unwrap(), TickOutcome::Disconnected);
        assert!(!h.monitor.link().is_connected());
    }

    #[tokio::test]
    async fn test_lines_per_tick_are_capped() {
        let mut h = harness(
            script(vec![
                Read::Line(TEMPERATURE),
                Read::Line(TEMPERATURE),
                Read::Line(TEMPERATURE),
            ]),
            2,
        );

        h.monitor.tick().await.unwrap();
        assert_eq!(h.monitor.tick().await.unwrap(), TickOutcome::Processed(2));
        assert_eq!(h.monitor.tick().await.unwrap(), TickOutcome::Processed(1));
        assert_eq!(h.monitor.storage().count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_stops_before_next_tick() {
        let mut h = harness(script(vec![Read::Line(TEMPERATURE)]), 32);
        h.shutdown.send(true).unwrap();

        h.monitor.run().await.unwrap();

        let script = h.script.lock().unwrap();
        assert_eq!(script.connects, 0);
        assert_eq!(script.closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_idle_wait() {
        let Harness {
            mut monitor,
            shutdown,
            _dir,
            ..
        } = harness(
            Script {
                connect_failures: usize::MAX,
                ..Default::default()
            },
            32,
        );
        monitor.settings.poll_interval = Duration::from_secs(3600);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            shutdown.send(true).unwrap();
        });

        let started = tokio::time::Instant::now();
        monitor.run().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(3600));
    }
}
