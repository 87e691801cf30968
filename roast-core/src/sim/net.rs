//! Simulated models described by a small TOML file.
//!
//! ```toml
//! name = "lenet"
//!
//! [[layer]]
//! name = "conv1"
//! kind = "Convolution"
//! params = 500
//! top_shape = [64, 20, 24, 24]
//! tunable = true
//!
//! [[output]]
//! name = "accuracy"
//! batches = [[0.91], [0.93]]
//! ```
//!
//! Output batches are cycled across forward passes. The forward loss is the
//! loss-weighted sum of every output value.

use crate::error::{Result, RoastError};
use crate::model::{Blob, Layer, Net, NetOutput, NetSpec, NetState, Phase, Tunable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
struct ModelDef {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "layer")]
    layers: Vec<LayerDef>,
    #[serde(default, rename = "output")]
    outputs: Vec<OutputDef>,
}

#[derive(Debug, Clone, Deserialize)]
struct LayerDef {
    name: String,
    kind: String,
    #[serde(default)]
    params: usize,
    #[serde(default)]
    top_shape: Vec<usize>,
    #[serde(default)]
    tunable: bool,
    /// Only include the layer in this phase.
    #[serde(default)]
    phase: Option<Phase>,
    /// Only include the layer when the net level is at least this.
    #[serde(default)]
    min_level: Option<i32>,
    /// Only include the layer when all of these stages are active.
    #[serde(default)]
    stages: Vec<String>,
}

impl LayerDef {
    fn included(&self, phase: Phase, state: &NetState) -> bool {
        self.phase.is_none_or(|p| p == phase)
            && self.min_level.is_none_or(|l| state.level >= l)
            && self.stages.iter().all(|s| state.stages.contains(s))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OutputDef {
    name: String,
    #[serde(default)]
    loss_weight: f32,
    #[serde(default)]
    batches: Vec<Vec<f32>>,
    #[serde(default)]
    shape: Option<Vec<usize>>,
}

/// Named parameter vectors, the on-disk format of trained weights.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightFile {
    pub layers: BTreeMap<String, Vec<f32>>,
}

impl WeightFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SimLayer {
    name: String,
    kind: String,
    params: Vec<f32>,
    grads: Vec<f32>,
    top_shape: Vec<usize>,
    tunable: bool,
    tuned_batch: Option<usize>,
    activation: f32,
}

impl SimLayer {
    fn from_def(def: &LayerDef) -> Self {
        let params = (0..def.params)
            .map(|k| ((k % 7) as f32 + 1.0) * 0.01)
            .collect();
        Self {
            name: def.name.clone(),
            kind: def.kind.clone(),
            params,
            grads: vec![0.0; def.params],
            top_shape: def.top_shape.clone(),
            tunable: def.tunable,
            tuned_batch: None,
            activation: 0.0,
        }
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn tuned_batch(&self) -> Option<usize> {
        self.tuned_batch
    }

    /// Output of the last forward call.
    pub fn activation(&self) -> f32 {
        self.activation
    }

    fn forward(&mut self) {
        self.activation = std::hint::black_box(self.params.iter().map(|p| p * p).sum::<f32>());
    }

    fn backward(&mut self) {
        // Weight decay is the only gradient term.
        for (g, p) in self.grads.iter_mut().zip(&self.params) {
            *g = std::hint::black_box(*p);
        }
    }

    fn apply_update(&mut self, lr: f32) {
        for (p, g) in self.params.iter_mut().zip(&self.grads) {
            *p -= lr * g;
        }
    }
}

impl Layer for SimLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn as_tunable(&mut self) -> Option<&mut dyn Tunable> {
        if self.tunable {
            Some(self as &mut dyn Tunable)
        } else {
            None
        }
    }
}

impl Tunable for SimLayer {
    fn tune(&mut self, batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(RoastError::model(format!(
                "layer {} has no batch dimension to tune for",
                self.name
            )));
        }
        debug!(layer = %self.name, batch_size, "Tuning layer");
        self.tuned_batch = Some(batch_size);
        Ok(())
    }
}

struct SimOutput {
    name: String,
    loss_weight: f32,
    batches: Vec<Vec<f32>>,
    shape: Option<Vec<usize>>,
}

impl SimOutput {
    fn blob(&self, cursor: usize) -> Blob {
        let data = if self.batches.is_empty() {
            Vec::new()
        } else {
            self.batches[cursor % self.batches.len()].clone()
        };
        match &self.shape {
            Some(shape) if shape.iter().product::<usize>() == data.len() => {
                Blob::new(shape.clone(), data)
            }
            _ => Blob::vector(data),
        }
    }
}

/// A deterministic in-memory model.
pub struct SimNet {
    name: String,
    phase: Phase,
    layers: Vec<SimLayer>,
    outputs: Vec<SimOutput>,
    cursor: usize,
    forward_calls: usize,
    backward_calls: usize,
}

impl SimNet {
    pub fn load(spec: &NetSpec) -> Result<Self> {
        let content = std::fs::read_to_string(&spec.source).map_err(|e| {
            RoastError::model(format!(
                "cannot read model definition {}: {e}",
                spec.source.display()
            ))
        })?;
        Self::build(&content, spec.phase, &spec.state)
    }

    pub fn from_toml_str(content: &str, phase: Phase) -> Result<Self> {
        Self::build(content, phase, &NetState::default())
    }

    fn build(content: &str, phase: Phase, state: &NetState) -> Result<Self> {
        let def: ModelDef = toml::from_str(content)?;
        let layers: Vec<SimLayer> = def
            .layers
            .iter()
            .filter(|l| l.included(phase, state))
            .map(SimLayer::from_def)
            .collect();
        let outputs = def
            .outputs
            .into_iter()
            .map(|o| SimOutput {
                name: o.name,
                loss_weight: o.loss_weight,
                batches: o.batches,
                shape: o.shape,
            })
            .collect();
        info!(
            net = %def.name,
            phase = %phase,
            layers = layers.len(),
            "Initialized simulated net"
        );
        Ok(Self {
            name: def.name,
            phase,
            layers,
            outputs,
            cursor: 0,
            forward_calls: 0,
            backward_calls: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sim_layer(&self, index: usize) -> &SimLayer {
        &self.layers[index]
    }

    pub fn forward_calls(&self) -> usize {
        self.forward_calls
    }

    pub fn backward_calls(&self) -> usize {
        self.backward_calls
    }

    pub fn apply_update(&mut self, lr: f32) {
        for layer in &mut self.layers {
            layer.apply_update(lr);
        }
    }

    pub fn export_weights(&self) -> WeightFile {
        WeightFile {
            layers: self
                .layers
                .iter()
                .filter(|l| !l.params.is_empty())
                .map(|l| (l.name.clone(), l.params.clone()))
                .collect(),
        }
    }

    pub fn load_weights(&mut self, weights: &WeightFile) -> Result<()> {
        for layer in &mut self.layers {
            let Some(source) = weights.layers.get(&layer.name) else {
                continue;
            };
            if source.len() != layer.params.len() {
                return Err(RoastError::model(format!(
                    "cannot copy param of layer {}: source has {} values, target has {}",
                    layer.name,
                    source.len(),
                    layer.params.len()
                )));
            }
            debug!(layer = %layer.name, "Copying source layer");
            layer.params.copy_from_slice(source);
        }
        for name in weights.layers.keys() {
            if !self.layers.iter().any(|l| &l.name == name) {
                debug!(layer = %name, "Ignoring source layer");
            }
        }
        Ok(())
    }
}

impl Net for SimNet {
    fn phase(&self) -> Phase {
        self.phase
    }

    fn forward(&mut self) -> Result<NetOutput> {
        for layer in &mut self.layers {
            layer.forward();
        }
        let blobs: Vec<Blob> = self.outputs.iter().map(|o| o.blob(self.cursor)).collect();
        let loss = self
            .outputs
            .iter()
            .zip(&blobs)
            .map(|(o, b)| o.loss_weight * b.data.iter().sum::<f32>())
            .sum();
        self.cursor += 1;
        self.forward_calls += 1;
        Ok(NetOutput { blobs, loss })
    }

    fn backward(&mut self) -> Result<()> {
        for i in (0..self.layers.len()).rev() {
            self.backward_layer(i)?;
        }
        Ok(())
    }

    fn num_layers(&self) -> usize {
        self.layers.len()
    }

    fn layer(&self, index: usize) -> &dyn Layer {
        &self.layers[index]
    }

    fn layer_mut(&mut self, index: usize) -> &mut dyn Layer {
        &mut self.layers[index]
    }

    fn forward_layer(&mut self, index: usize) -> Result<()> {
        let layer = self
            .layers
            .get_mut(index)
            .ok_or_else(|| RoastError::model(format!("no layer #{index}")))?;
        layer.forward();
        Ok(())
    }

    fn backward_layer(&mut self, index: usize) -> Result<()> {
        let layer = self
            .layers
            .get_mut(index)
            .ok_or_else(|| RoastError::model(format!("no layer #{index}")))?;
        layer.backward();
        self.backward_calls += 1;
        Ok(())
    }

    fn top_shape(&self, index: usize) -> &[usize] {
        &self.layers[index].top_shape
    }

    fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    fn output_name(&self, output: usize) -> &str {
        &self.outputs[output].name
    }

    fn output_loss_weight(&self, output: usize) -> f32 {
        self.outputs[output].loss_weight
    }

    fn copy_trained_layers_from(&mut self, source: &Path) -> Result<()> {
        let weights = WeightFile::load(source)?;
        self.load_weights(&weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"
        name = "staged"
        [[layer]]
        name = "data"
        kind = "Input"
        top_shape = [32, 3]
        [[layer]]
        name = "ip1"
        kind = "InnerProduct"
        params = 6
        tunable = true
        [[layer]]
        name = "dropout"
        kind = "Dropout"
        phase = "TRAIN"
        [[layer]]
        name = "deep"
        kind = "InnerProduct"
        params = 2
        min_level = 1
        stages = ["deploy"]
        [[output]]
        name = "score"
        loss_weight = 0.5
        batches = [[1.0, 3.0], [2.0, 2.0]]
    "#;

    #[test]
    fn test_layer_filtering_by_phase_level_stage() {
        let net = SimNet::from_toml_str(MODEL, Phase::Test).unwrap();
        assert_eq!(net.num_layers(), 2);

        let state = NetState {
            level: 1,
            stages: vec!["deploy".to_string()],
        };
        let net = SimNet::build(MODEL, Phase::Train, &state).unwrap();
        let names: Vec<_> = (0..net.num_layers()).map(|i| net.layer(i).name()).collect();
        assert_eq!(names, vec!["data", "ip1", "dropout", "deep"]);
    }

    #[test]
    fn test_forward_cycles_batches_and_weights_loss() {
        let mut net = SimNet::from_toml_str(MODEL, Phase::Test).unwrap();
        let first = net.forward().unwrap();
        assert_eq!(first.blobs[0].data, vec![1.0, 3.0]);
        assert_eq!(first.loss, 2.0);
        let second = net.forward().unwrap();
        assert_eq!(second.blobs[0].data, vec![2.0, 2.0]);
        let third = net.forward().unwrap();
        assert_eq!(third.blobs[0].data, vec![1.0, 3.0]);
    }

    #[test]
    fn test_weights_copy_and_size_mismatch() {
        let mut net = SimNet::from_toml_str(MODEL, Phase::Test).unwrap();
        let mut weights = WeightFile::default();
        weights.layers.insert("ip1".to_string(), vec![0.5; 6]);
        weights.layers.insert("unknown".to_string(), vec![1.0]);
        net.load_weights(&weights).unwrap();
        assert_eq!(net.sim_layer(1).params(), &[0.5; 6]);

        weights.layers.insert("ip1".to_string(), vec![0.5; 3]);
        assert!(net.load_weights(&weights).is_err());
    }

    #[test]
    fn test_tunable_capability() {
        let mut net = SimNet::from_toml_str(MODEL, Phase::Test).unwrap();
        assert!(net.layer_mut(0).as_tunable().is_none());
        let tunable = net.layer_mut(1).as_tunable().unwrap();
        tunable.tune(32).unwrap();
        assert_eq!(net.sim_layer(1).tuned_batch(), Some(32));
    }
}
