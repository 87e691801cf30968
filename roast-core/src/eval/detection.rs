//! Detection mean-average-precision aggregation.
//!
//! Every output blob is a table of five-column rows:
//! `[item_id, label, score_or_count, true_pos, false_pos]`. Rows with
//! `item_id == -1` are sentinels carrying a ground-truth positives count
//! for `label` in the third column.

use super::{ApFormula, ApMethod};
use crate::error::{Result, RoastError};
use crate::model::{Net, NetOutput};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const DETECTION_ROW_WIDTH: usize = 5;

const SENTINEL_ITEM_ID: i32 = -1;

/// Parallel `(score, flag)` sequences for one label, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelDetections {
    pub true_pos: Vec<(f32, u32)>,
    pub false_pos: Vec<(f32, u32)>,
}

/// Records gathered for one output index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputDetections {
    pub detections: BTreeMap<i32, LabelDetections>,
    /// Ground-truth positives per label; only sentinel rows add to it.
    pub num_pos: BTreeMap<i32, u32>,
}

#[derive(Debug, Clone, Default)]
pub struct DetectionAccumulator {
    outputs: BTreeMap<usize, OutputDetections>,
}

impl DetectionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self, index: usize) -> Option<&OutputDetections> {
        self.outputs.get(&index)
    }

    /// Scan the rows of every output blob of one forward pass.
    pub fn add(&mut self, output: &NetOutput) -> Result<()> {
        for (j, blob) in output.blobs.iter().enumerate() {
            if blob.count() % DETECTION_ROW_WIDTH != 0 {
                return Err(RoastError::structural(format!(
                    "detection output #{j} holds {} values, not a multiple of {DETECTION_ROW_WIDTH}",
                    blob.count()
                )));
            }
            let entry = self.outputs.entry(j).or_default();
            for row in blob.data.chunks_exact(DETECTION_ROW_WIDTH) {
                let item_id = row[0] as i32;
                let label = row[1] as i32;
                if item_id == SENTINEL_ITEM_ID {
                    *entry.num_pos.entry(label).or_insert(0) += row[2] as u32;
                    continue;
                }
                let score = row[2];
                let tp = row[3] as u32;
                let fp = row[4] as u32;
                if tp == 0 && fp == 0 {
                    // Matched to excluded ground truth.
                    continue;
                }
                let label_dets = entry.detections.entry(label).or_default();
                label_dets.true_pos.push((score, tp));
                label_dets.false_pos.push((score, fp));
            }
        }
        Ok(())
    }

    /// Compute the mean average precision of every output.
    pub fn finish(
        self,
        net: &dyn Net,
        formula: &dyn ApFormula,
        method: ApMethod,
    ) -> Result<DetectionReport> {
        if self.outputs.is_empty() {
            return Err(RoastError::structural("model produced no detection outputs"));
        }
        let mut outputs = Vec::with_capacity(self.outputs.len());
        for (index, records) in self.outputs {
            if records.num_pos.is_empty() {
                return Err(RoastError::structural(format!(
                    "Missing positives count for output #{index}"
                )));
            }
            let mut average_precision = BTreeMap::new();
            let mut skipped = Vec::new();
            for (&label, &num_pos) in &records.num_pos {
                let Some(dets) = records.detections.get(&label) else {
                    warn!(output = index, label, "Missing true_pos for label: {label}");
                    skipped.push(label);
                    continue;
                };
                let curve = formula.compute(&dets.true_pos, num_pos, &dets.false_pos, method)?;
                average_precision.insert(label, curve.average_precision);
            }
            let mean_ap =
                average_precision.values().sum::<f32>() / records.num_pos.len() as f32;
            let name = net.output_name(index).to_string();
            info!("    Test net output #{index}: {name} = {mean_ap}");
            outputs.push(OutputMap {
                output: index,
                name,
                mean_ap,
                average_precision,
                skipped_labels: skipped,
            });
        }
        Ok(DetectionReport { method, outputs })
    }
}

/// Mean average precision of one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMap {
    pub output: usize,
    pub name: String,
    pub mean_ap: f32,
    pub average_precision: BTreeMap<i32, f32>,
    /// Labels with a positives count but no detection records; they count
    /// toward the mean's denominator only.
    pub skipped_labels: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub method: ApMethod,
    pub outputs: Vec<OutputMap>,
}

/// Run `iterations` forward passes and compute per-output mAP.
pub fn evaluate_detections(
    net: &mut dyn Net,
    iterations: usize,
    formula: &dyn ApFormula,
    method: ApMethod,
) -> Result<DetectionReport> {
    let mut acc = DetectionAccumulator::new();
    for _ in 0..iterations {
        let output = net.forward()?;
        acc.add(&output)?;
    }
    acc.finish(net, formula, method)
}
