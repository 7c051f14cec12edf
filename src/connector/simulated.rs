//! Simulated sensor board for running without hardware
//!
//! Produces the same line protocol as the real board: data reports flagged
//! `Debug:1`, the occasional time request and some garbage.

use crate::connector::traits::{Connector, ConnectorError};
use async_trait::async_trait;
use iow_shared::now_local;
use iow_shared::protocol::DEVICE_TIME_FORMAT;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const SENSOR_IDS: [&str; 3] = ["sensor_1", "sensor_2", "sensor_3"];

/// Upper bound on lines produced per burst
const MAX_BURST: usize = 3;

/// Written lines kept for inspection
const WRITTEN_HISTORY: usize = 16;

/// Connector that generates device lines
pub struct SimulatedConnector {
    rng: StdRng,
    connected: bool,
    pending: VecDeque<String>,
    next_burst: Instant,
    read_timeout: Duration,
    written: VecDeque<String>,
}

impl SimulatedConnector {
    pub fn new(read_timeout: Duration) -> Self {
        Self::with_rng(StdRng::from_entropy(), read_timeout)
    }

    /// Deterministic generator for tests
    pub fn with_seed(seed: u64, read_timeout: Duration) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), read_timeout)
    }

    fn with_rng(rng: StdRng, read_timeout: Duration) -> Self {
        Self {
            rng,
            connected: false,
            pending: VecDeque::new(),
            next_burst: Instant::now(),
            read_timeout,
            written: VecDeque::with_capacity(WRITTEN_HISTORY),
        }
    }

    /// Most recent lines written back by the monitor, oldest first
    pub fn written(&self) -> impl Iterator<Item = &str> {
        self.written.iter().map(String::as_str)
    }

    fn generate_line(&mut self) -> String {
        let roll: f64 = self.rng.gen();
        if roll < 0.8 {
            let id = SENSOR_IDS.choose(&mut self.rng).copied().unwrap_or("sensor_1");
            let value: f64 = self.rng.gen_range(0.0..100.0);
            format!(
                "Flag:D001,Time:{},Value:{:.2},ID:{},Debug:1,",
                now_local().format(DEVICE_TIME_FORMAT),
                value,
                id
            )
        } else if roll < 0.9 {
            "Flag:R001".to_string()
        } else {
            "GARBAGE MESSAGE!".to_string()
        }
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(&mut self) -> Result<(), ConnectorError> {
        self.connected = true;
        self.pending.clear();
        self.next_burst = Instant::now();
        Ok(())
    }

    async fn is_connected(&mut self) -> bool {
        self.connected
    }

    async fn retrieve_data(&mut self) -> Result<String, ConnectorError> {
        if !self.connected {
            return Err(ConnectorError::NotConnected);
        }

        if let Some(line) = self.pending.pop_front() {
            return Ok(line);
        }

        let now = Instant::now();
        if now < self.next_burst {
            // Nothing buffered: behave like a read that times out
            tokio::time::sleep_until(self.next_burst.min(now + self.read_timeout)).await;
            return Ok(String::new());
        }

        let burst = self.rng.gen_range(1..=MAX_BURST);
        for _ in 0..burst {
            let line = self.generate_line();
            self.pending.push_back(line);
        }
        self.next_burst = now + self.read_timeout;

        Ok(self.pending.pop_front().unwrap_or_default())
    }

    async fn write_data(&mut self, message: &str) -> Result<(), ConnectorError> {
        if !self.connected {
            return Err(ConnectorError::NotConnected);
        }
        debug!(%message, "Simulated board received");
        if self.written.len() == WRITTEN_HISTORY {
            self.written.pop_front();
        }
        self.written.push_back(message.to_string());
        Ok(())
    }

    async fn close_connection(&mut self) {
        self.connected = false;
        self.pending.clear();
    }

    fn name(&self) -> &'static str {
        "Simulated"
    }
}
