//! Layer-by-layer forward/backward benchmark.

use crate::device::{DeviceId, DeviceLayer};
use crate::error::{Result, RoastError};
use crate::model::{Net, Phase};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

fn micros(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1e6
}

/// Average per-layer times in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerTiming {
    pub name: String,
    pub forward_ms: f64,
    pub backward_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchReport {
    pub phase: Phase,
    pub iterations: usize,
    pub initial_loss: f32,
    pub avg_forward_ms: f64,
    pub avg_backward_ms: f64,
    pub avg_forward_backward_ms: f64,
    pub total_ms: f64,
    /// Empty unless per-layer timing was requested.
    pub layers: Vec<LayerTiming>,
}

impl BenchReport {
    pub fn log(&self) {
        if !self.layers.is_empty() {
            info!("Average time per layer: ");
            for layer in &self.layers {
                info!("{:>10}\tforward: {} ms.", layer.name, layer.forward_ms);
                info!("{:>10}\tbackward: {} ms.", layer.name, layer.backward_ms);
            }
        }
        info!("Average Forward pass: {} ms.", self.avg_forward_ms);
        info!("Average Backward pass: {} ms.", self.avg_backward_ms);
        info!("Average Forward-Backward: {} ms.", self.avg_forward_backward_ms);
        info!("Total Time: {} ms.", self.total_ms);
        info!("*** Benchmark ends ***");
    }
}

/// Times repeated passes over a model's layers.
///
/// Each directional pass ends with a synchronization barrier on
/// `sync_device` before its timer is read. Per-layer timers have no barrier
/// of their own, so they measure issue time rather than completion time.
pub struct Benchmark<'a> {
    net: &'a mut dyn Net,
    devices: &'a mut dyn DeviceLayer,
    sync_device: DeviceId,
    per_layer: bool,
}

impl<'a> Benchmark<'a> {
    pub fn new(
        net: &'a mut dyn Net,
        devices: &'a mut dyn DeviceLayer,
        sync_device: DeviceId,
        per_layer: bool,
    ) -> Self {
        Self {
            net,
            devices,
            sync_device,
            per_layer,
        }
    }

    /// One untimed warm-up pass, then `iterations` timed ones.
    pub fn run(&mut self, iterations: usize) -> Result<BenchReport> {
        if iterations == 0 {
            return Err(RoastError::usage("benchmark needs at least one iteration"));
        }
        let phase = self.net.phase();
        let num_layers = self.net.num_layers();

        info!("Performing Forward");
        let initial_loss = self.net.forward()?.loss;
        info!("Initial loss: {initial_loss}");
        if phase == Phase::Train {
            info!("Performing Backward");
            self.net.backward()?;
        }

        info!("*** Benchmark begins ***");
        info!("Testing for {iterations} iterations.");
        let table_len = if self.per_layer { num_layers } else { 0 };
        let mut forward_per_layer = vec![0.0; table_len];
        let mut backward_per_layer = vec![0.0; table_len];
        let mut forward_us = 0.0;
        let mut backward_us = 0.0;
        let total_timer = Instant::now();

        for j in 0..iterations {
            let iter_timer = Instant::now();

            let forward_timer = Instant::now();
            for i in 0..num_layers {
                let layer_timer = Instant::now();
                self.net.forward_layer(i)?;
                if let Some(slot) = forward_per_layer.get_mut(i) {
                    *slot += micros(layer_timer);
                }
            }
            self.devices.synchronize(self.sync_device)?;
            forward_us += micros(forward_timer);

            if phase == Phase::Train {
                let backward_timer = Instant::now();
                for i in (0..num_layers).rev() {
                    let layer_timer = Instant::now();
                    self.net.backward_layer(i)?;
                    if let Some(slot) = backward_per_layer.get_mut(i) {
                        *slot += micros(layer_timer);
                    }
                }
                self.devices.synchronize(self.sync_device)?;
                backward_us += micros(backward_timer);
            }

            info!(
                "Iteration: {} forward-backward time: {} ms.",
                j + 1,
                micros(iter_timer) / 1000.0
            );
        }

        let total_ms = micros(total_timer) / 1000.0;
        let n = iterations as f64;
        let layers = forward_per_layer
            .iter()
            .zip(&backward_per_layer)
            .enumerate()
            .map(|(i, (fwd, bwd))| LayerTiming {
                name: self.net.layer(i).name().to_string(),
                forward_ms: fwd / 1000.0 / n,
                backward_ms: bwd / 1000.0 / n,
            })
            .collect();

        let report = BenchReport {
            phase,
            iterations,
            initial_loss,
            avg_forward_ms: forward_us / 1000.0 / n,
            avg_backward_ms: backward_us / 1000.0 / n,
            avg_forward_backward_ms: total_ms / n,
            total_ms,
            layers,
        };
        report.log();
        Ok(report)
    }
}
