use super::parser::decode_packet;
use super::structs::{MeterReading, Mode, Unit};
use super::transport::Transport;
use super::{utils, MeterError};
use crate::config::TimingConfig;
use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::thread::sleep;
use std::time::{Duration, Instant};

/// Measurement sequences on top of one exclusively owned transport.
///
/// The handle is released exactly once, either through `close()` or when
/// the procedures are dropped.
pub struct Procedures {
    transport: Box<dyn Transport>,
    timing: TimingConfig,
}

impl Procedures {
    pub fn new(transport: Box<dyn Transport>, timing: TimingConfig) -> Self {
        Self { transport, timing }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Opens the session. The meter streams continuously, so after opening we
    /// give it a moment and throw away whatever partial frame is buffered.
    pub fn init(&mut self) -> Result<(), MeterError> {
        info!("Initializing meter connection (simulate={})", self.transport.is_simulated());

        if let Err(e) = self.transport.open() {
            error!("Failed to initialize meter: {e}");
            return Err(e);
        }

        if !self.transport.is_simulated() {
            sleep(self.timing.settle());
            if let Err(e) = self.transport.flush_input() {
                error!("Failed to initialize meter: {e}");
                self.transport.close();
                return Err(e);
            }
        }

        info!("Meter connection established");
        Ok(())
    }

    pub fn close(&mut self) {
        if self.transport.is_open() {
            info!("Closing meter connection");
        }
        self.transport.close();
    }

    /// One decoded reading, retrying transport errors and undecodable frames.
    /// `max_retries` is the total number of attempts, 0 fails without reading.
    pub fn read_once(&mut self, max_retries: u32) -> Result<MeterReading, MeterError> {
        let attempts = max_retries;
        let mut last_error: Option<MeterError> = None;

        for attempt in 1..=attempts {
            let result = self.transport.read_packet().map(|packet| decode_packet(&packet));

            match result {
                Ok(reading) => match reading.error() {
                    Some(message) => {
                        warn!("Parse error on attempt {attempt}/{attempts}: {message}");
                        last_error = Some(MeterError::Format(message.to_string()));
                    }
                    None => {
                        debug!("Read {reading} (OL={})", reading.is_overload());
                        if self.transport.is_simulated() {
                            return Ok(reading.with_flag("simulate", Value::from(true)));
                        }
                        return Ok(reading);
                    }
                },
                Err(e) => {
                    warn!("Read failed on attempt {attempt}/{attempts}: {e}");
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                sleep(self.timing.retry_delay());
            }
        }

        let last = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(MeterError::RetriesExhausted { attempts, last })
    }

    /// Mean of up to `sample_count` readings. Overloaded or failed samples are
    /// skipped, not retried.
    pub fn read_averaged(&mut self, sample_count: u32, delay: Duration, max_retries: u32) -> Result<MeterReading, MeterError> {
        debug!("Reading {sample_count} samples for averaging");

        let mut samples: Vec<f64> = Vec::new();
        let mut units: Vec<Unit> = Vec::new();
        let mut modes: Vec<Mode> = Vec::new();

        for i in 0..sample_count {
            match self.read_once(max_retries) {
                Ok(reading) => match reading.value() {
                    Some(v) if !reading.is_overload() => {
                        samples.push(v);
                        units.push(reading.unit());
                        modes.push(reading.mode().clone());

                        /* only collected samples are followed by the delay */
                        if i + 1 < sample_count {
                            sleep(delay);
                        }
                    }
                    _ => warn!("Sample {} is overload, skipping", i + 1),
                },
                Err(e) => warn!("Failed to read sample {}: {e}", i + 1),
            }
        }

        let avg = match utils::mean(&samples) {
            Some(m) => m,
            None => return Err(MeterError::NoValidSamples),
        };
        let std_dev = utils::sample_std_dev(&samples);
        let unit = utils::most_common(&units).unwrap_or(Unit::Unknown);
        let mode = utils::most_common(&modes).unwrap_or(Mode::Unknown(0));

        info!("Averaged {} samples: {avg:.3} {unit} (std dev {std_dev:.3})", samples.len());

        let mut flags = Map::new();
        flags.insert("averaged".to_string(), Value::from(true));
        flags.insert("sample_count".to_string(), Value::from(samples.len()));
        flags.insert("std_dev".to_string(), Value::from(std_dev));

        Ok(MeterReading::new(Some(avg), unit, mode, false, avg < 0.0, flags, &[]))
    }

    /// Polls until the last `window_size` values agree within `threshold`
    /// (relative to their mean) or `timeout` passes.
    pub fn wait_for_stable(&mut self, timeout: Duration, threshold: f64, window_size: usize, max_retries: u32) -> Result<MeterReading, MeterError> {
        debug!("Waiting for stable reading (threshold={}%)", threshold * 100.0);

        let window_size = window_size.max(1);
        let start = Instant::now();
        let mut window: VecDeque<f64> = VecDeque::with_capacity(window_size + 1);

        while start.elapsed() < timeout {
            let reading = match self.read_once(max_retries) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Error during stability check: {e}");
                    window.clear();
                    sleep(self.timing.overload_backoff());
                    continue;
                }
            };

            let value = match reading.value() {
                Some(v) if !reading.is_overload() => v,
                _ => {
                    warn!("Overload during stability wait");
                    window.clear();
                    sleep(self.timing.overload_backoff());
                    continue;
                }
            };

            window.push_back(value);
            while window.len() > window_size {
                window.pop_front();
            }

            if window.len() == window_size {
                let values: Vec<f64> = window.iter().copied().collect();
                if let Some(variation) = utils::max_relative_deviation(&values) {
                    if variation <= threshold {
                        info!(
                            "Reading stable at {:.3} {} (variation={:.1}%)",
                            utils::mean(&values).unwrap_or(value),
                            reading.unit(),
                            variation * 100.0
                        );
                        return Ok(reading);
                    }
                }
            }

            sleep(self.timing.poll_interval());
        }

        Err(MeterError::NotStable { timeout, threshold })
    }

    /// Averaged resistance in Ohm
    pub fn read_resistance(&mut self, average_count: u32, delay: Duration, max_retries: u32) -> Result<f64, MeterError> {
        debug!("Reading resistance ({average_count} samples)");

        let reading = self.read_averaged(average_count, delay, max_retries)?;

        if !reading.mode().is_resistance() {
            warn!("Meter in {} mode, expected Resistance mode", reading.mode());
        }

        let value = reading.value().ok_or(MeterError::NoValidSamples)?;
        let ohms = utils::to_ohms(value, reading.unit());

        info!("Resistance = {ohms:.2} Ohm");
        Ok(ohms)
    }
}

impl Drop for Procedures {
    fn drop(&mut self) {
        self.transport.close();
    }
}
