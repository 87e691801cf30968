//! Classification-style score aggregation.

use crate::error::{Result, RoastError};
use crate::model::{Net, NetOutput};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Running sums over every flattened output scalar.
///
/// The flattened index layout is fixed by the first iteration; any later
/// iteration with a different layout is rejected before it touches the sums.
#[derive(Debug, Clone, Default)]
pub struct ScoreAccumulator {
    sums: Vec<f32>,
    output_ids: Vec<usize>,
    layout: Vec<usize>,
    loss: f32,
    iterations: usize,
}

impl ScoreAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn sums(&self) -> &[f32] {
        &self.sums
    }

    /// Fold one forward pass into the running sums.
    pub fn add(&mut self, output: &NetOutput) -> Result<()> {
        if self.iterations == 0 {
            for (j, blob) in output.blobs.iter().enumerate() {
                self.sums.extend_from_slice(&blob.data);
                self.output_ids.extend(std::iter::repeat_n(j, blob.count()));
                self.layout.push(blob.count());
            }
        } else {
            self.check_layout(output)?;
            for (sum, score) in self
                .sums
                .iter_mut()
                .zip(output.blobs.iter().flat_map(|b| b.data.iter()))
            {
                *sum += score;
            }
        }
        self.loss += output.loss;
        self.iterations += 1;
        Ok(())
    }

    fn check_layout(&self, output: &NetOutput) -> Result<()> {
        let layout: Vec<usize> = output.blobs.iter().map(|b| b.count()).collect();
        if layout != self.layout {
            return Err(RoastError::structural(format!(
                "iteration {} produced output sizes {:?}, expected {:?}",
                self.iterations, layout, self.layout
            )));
        }
        Ok(())
    }

    /// Divide by the iteration count and attach output names and weights.
    pub fn finish(self, net: &dyn Net) -> Result<ScoreReport> {
        if self.iterations == 0 {
            return Err(RoastError::structural("no iterations were scored"));
        }
        let n = self.iterations as f32;
        let scores = self
            .sums
            .iter()
            .zip(&self.output_ids)
            .map(|(&sum, &output)| {
                let mean = sum / n;
                let loss_weight = net.output_loss_weight(output);
                ScoreEntry {
                    output,
                    name: net.output_name(output).to_string(),
                    mean,
                    loss_weight,
                    weighted_loss: (loss_weight != 0.0).then_some(loss_weight * mean),
                }
            })
            .collect();
        Ok(ScoreReport {
            iterations: self.iterations,
            loss: self.loss / n,
            scores,
        })
    }
}

/// Mean of one flattened output scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub output: usize,
    pub name: String,
    pub mean: f32,
    pub loss_weight: f32,
    /// `loss_weight * mean` when the output carries a loss weight.
    pub weighted_loss: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub iterations: usize,
    pub loss: f32,
    pub scores: Vec<ScoreEntry>,
}

impl ScoreReport {
    pub fn means(&self) -> Vec<f32> {
        self.scores.iter().map(|s| s.mean).collect()
    }

    pub fn log(&self) {
        info!("Loss: {}", self.loss);
        for entry in &self.scores {
            match entry.weighted_loss {
                Some(weighted) => info!(
                    "{} = {} (* {} = {} loss)",
                    entry.name, entry.mean, entry.loss_weight, weighted
                ),
                None => info!("{} = {}", entry.name, entry.mean),
            }
        }
    }
}

/// Run `iterations` forward passes and average every output scalar.
pub fn evaluate_scores(net: &mut dyn Net, iterations: usize) -> Result<ScoreReport> {
    let mut acc = ScoreAccumulator::new();
    for i in 0..iterations {
        let output = net.forward()?;
        acc.add(&output)?;
        for (j, blob) in output.blobs.iter().enumerate() {
            let name = net.output_name(j);
            for score in &blob.data {
                info!("Batch {i}, {name} = {score}");
            }
        }
    }
    let report = acc.finish(net)?;
    report.log();
    Ok(report)
}
