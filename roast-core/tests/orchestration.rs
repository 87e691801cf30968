//! End-to-end command runs against the simulation backend.

use pretty_assertions::assert_eq;
use roast_core::commands::{self, TrainReport};
use roast_core::config::RunConfig;
use roast_core::sim::{SimBackend, SimConfig, SimSnapshot, WeightFile};
use roast_core::{
    ApCurve, ApFormula, ApMethod, Backend, Collective, DeviceId, DeviceLayer, DeviceSet,
    EvalReport, Net, NetSpec, Phase, RoastError, SignalController, SignalKind, SolveOutcome,
    Solver, SolverAction, SolverParameter,
};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const TRAIN_MODEL: &str = r#"
name = "toy"

[[layer]]
name = "data"
kind = "Input"
top_shape = [8, 4]

[[layer]]
name = "ip1"
kind = "InnerProduct"
params = 4
top_shape = [8, 2]
tunable = true

[[layer]]
name = "relu1"
kind = "ReLU"
top_shape = [8, 2]

[[output]]
name = "loss"
loss_weight = 1.0
batches = [[0.5], [0.25]]
"#;

const SCORE_MODEL: &str = r#"
name = "scorer"

[[layer]]
name = "ip1"
kind = "InnerProduct"
params = 4

[[output]]
name = "accuracy"
loss_weight = 0.25
batches = [[2.0]]

[[output]]
name = "top5"
loss_weight = 0.125
batches = [[4.0]]
"#;

const DETECTION_MODEL: &str = r#"
name = "detector"

[[layer]]
name = "conv1"
kind = "Convolution"
params = 4

[[output]]
name = "detection_eval"
shape = [1, 1, 3, 5]
batches = [
    [-1.0, 5.0, 3.0, 0.0, 0.0,
      0.0, 5.0, 0.9, 1.0, 0.0,
      0.0, 5.0, 0.8, 0.0, 1.0],
    [-1.0, 5.0, 2.0, 0.0, 0.0,
      1.0, 5.0, 0.7, 0.0, 0.0,
      1.0, 5.0, 0.5, 1.0, 0.0,
     -1.0, 7.0, 4.0, 0.0, 0.0],
]
"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Solver over `TRAIN_MODEL` with one test net; `extra` is appended.
    fn solver(&self, max_iter: u64, extra: &str) -> PathBuf {
        let model = self.write("toy.toml", TRAIN_MODEL);
        let content = format!(
            "net = '{}'\ntest_net = ['{}']\nmax_iter = {max_iter}\nsnapshot_prefix = '{}'\n{extra}\n",
            model.display(),
            model.display(),
            self.path("toy").display(),
        );
        self.write("solver.toml", &content)
    }

    fn train_config(&self, solver: PathBuf) -> RunConfig {
        RunConfig {
            solver: Some(solver),
            ..RunConfig::default()
        }
    }
}

fn signals() -> SignalController {
    SignalController::new(SolverAction::Stop, SolverAction::Snapshot)
}

fn sim(accelerators: usize) -> SimBackend {
    SimBackend::new(&SimConfig { accelerators })
}

/// Hands every multi-device solve to the plain solve loop and records it.
#[derive(Default)]
struct RecordingCollective {
    runs: Vec<(Vec<DeviceId>, Option<PathBuf>)>,
}

impl Collective for RecordingCollective {
    fn run(
        &mut self,
        solver: &mut dyn Solver,
        devices: &DeviceSet,
        snapshot: Option<&Path>,
    ) -> roast_core::Result<SolveOutcome> {
        self.runs
            .push((devices.ids().to_vec(), snapshot.map(Path::to_path_buf)));
        solver.solve()
    }
}

/// Average precision = recalled positives / positives.
#[derive(Default)]
struct RecallFormula {
    calls: RefCell<Vec<(usize, u32, ApMethod)>>,
}

impl ApFormula for RecallFormula {
    fn compute(
        &self,
        true_pos: &[(f32, u32)],
        num_pos: u32,
        false_pos: &[(f32, u32)],
        method: ApMethod,
    ) -> roast_core::Result<ApCurve> {
        assert_eq!(true_pos.len(), false_pos.len());
        self.calls
            .borrow_mut()
            .push((true_pos.len(), num_pos, method));
        let hits: u32 = true_pos.iter().map(|&(_, flag)| flag).sum();
        Ok(ApCurve {
            average_precision: hits as f32 / num_pos as f32,
            ..ApCurve::default()
        })
    }
}

/// Simulation backend with optional collective and AP formula, counting
/// every model and solver it builds.
struct TestBackend {
    sim: SimBackend,
    collective: Option<RecordingCollective>,
    formula: Option<RecallFormula>,
    builds: usize,
}

impl TestBackend {
    fn new(accelerators: usize) -> Self {
        Self {
            sim: sim(accelerators),
            collective: None,
            formula: None,
            builds: 0,
        }
    }
}

impl Backend for TestBackend {
    fn name(&self) -> &str {
        "test"
    }

    fn devices(&mut self) -> &mut dyn DeviceLayer {
        self.sim.devices()
    }

    fn build_net(&mut self, spec: &NetSpec) -> roast_core::Result<Box<dyn Net>> {
        self.builds += 1;
        self.sim.build_net(spec)
    }

    fn build_solver(&mut self, param: SolverParameter) -> roast_core::Result<Box<dyn Solver>> {
        self.builds += 1;
        self.sim.build_solver(param)
    }

    fn collective(&mut self) -> Option<&mut dyn Collective> {
        self.collective
            .as_mut()
            .map(|c| c as &mut dyn Collective)
    }

    fn ap_formula(&self) -> Option<&dyn ApFormula> {
        self.formula.as_ref().map(|f| f as &dyn ApFormula)
    }
}

fn read_snapshot(path: &Path) -> SimSnapshot {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_train_on_cpu_runs_to_completion() {
    let ws = Workspace::new();
    let config = ws.train_config(ws.solver(6, "snapshot = 3"));
    let mut backend = sim(2);

    let report = commands::train(&config, &mut backend, &signals()).unwrap();

    assert!(report.devices.is_cpu());
    assert_eq!(report.outcome.iterations, 6);
    assert!(!report.outcome.stopped_early);
    assert_eq!(
        report.outcome.snapshots,
        vec![
            ws.path("toy_iter_3.solverstate.json"),
            ws.path("toy_iter_6.solverstate.json"),
        ]
    );
    assert_eq!(backend.sim_devices().active(), None);
}

#[test]
fn test_interrupt_stops_before_first_step() {
    let ws = Workspace::new();
    let config = ws.train_config(ws.solver(100, "snapshot_after_train = true"));
    let signals = signals();
    signals.deliver(SignalKind::Interrupt);

    let report = commands::train(&config, &mut sim(0), &signals).unwrap();

    assert!(report.outcome.stopped_early);
    assert_eq!(report.outcome.iterations, 0);
    assert!(report.outcome.snapshots.is_empty());
}

#[test]
fn test_hangup_snapshots_and_continues() {
    let ws = Workspace::new();
    let config = ws.train_config(ws.solver(2, "snapshot_after_train = false"));
    let signals = signals();
    signals.deliver(SignalKind::Hangup);

    let report = commands::train(&config, &mut sim(0), &signals).unwrap();

    assert!(!report.outcome.stopped_early);
    assert_eq!(report.outcome.iterations, 2);
    assert_eq!(
        report.outcome.snapshots,
        vec![ws.path("toy_iter_0.solverstate.json")]
    );
    assert_eq!(signals.pending(SignalKind::Hangup), SolverAction::None);
}

#[test]
fn test_snapshot_with_weights_rejected_before_construction() {
    let ws = Workspace::new();
    let config = RunConfig {
        snapshot: Some(ws.path("toy_iter_3.solverstate.json")),
        weights: Some(ws.path("w.json").display().to_string()),
        gpu: "0".to_string(),
        ..ws.train_config(ws.path("missing_solver.toml"))
    };
    let mut backend = TestBackend::new(1);

    let err = commands::train(&config, &mut backend, &signals()).unwrap_err();

    assert!(err.is_usage());
    assert_eq!(backend.builds, 0);
    assert_eq!(backend.sim.sim_devices().active(), None);
}

#[test]
fn test_multi_device_without_collective_is_capability_error() {
    let ws = Workspace::new();
    let config = RunConfig {
        gpu: "all".to_string(),
        ..ws.train_config(ws.solver(4, ""))
    };
    let mut backend = TestBackend::new(2);

    let err = commands::train(&config, &mut backend, &signals()).unwrap_err();

    assert!(matches!(err, RoastError::Capability(_)));
    assert_eq!(backend.builds, 0);
    assert_eq!(backend.sim.sim_devices().active(), None);
    assert!(backend.sim.sim_devices().registered().is_empty());
}

#[test]
fn test_failed_restore_still_tears_down() {
    let ws = Workspace::new();
    let config = RunConfig {
        gpu: "0".to_string(),
        snapshot: Some(ws.path("absent.solverstate.json")),
        ..ws.train_config(ws.solver(2, ""))
    };
    let mut backend = sim(1);

    assert!(commands::train(&config, &mut backend, &signals()).is_err());
    assert_eq!(backend.sim_devices().torn_down(), &[0]);
}

#[test]
fn test_empty_snapshot_trains_from_scratch() {
    let ws = Workspace::new();
    let config = RunConfig {
        snapshot: Some(PathBuf::new()),
        weights: Some(String::new()),
        ..ws.train_config(ws.solver(2, ""))
    };

    let report = commands::train(&config, &mut sim(0), &signals()).unwrap();

    assert_eq!(report.outcome.iterations, 2);
    assert_eq!(read_snapshot(&report.outcome.snapshots[0]).iter, 2);
}

#[test]
fn test_collective_receives_resume_snapshot() {
    let ws = Workspace::new();
    let first = commands::train(&ws.train_config(ws.solver(2, "")), &mut sim(0), &signals())
        .unwrap();
    let snapshot = first.outcome.snapshots[0].clone();

    let config = RunConfig {
        gpu: "1,0".to_string(),
        snapshot: Some(snapshot.clone()),
        ..ws.train_config(ws.solver(3, ""))
    };
    let mut backend = TestBackend::new(2);
    backend.collective = Some(RecordingCollective::default());

    let report = commands::train(&config, &mut backend, &signals()).unwrap();

    assert_eq!(report.outcome.iterations, 3);
    let collective = backend.collective.as_ref().unwrap();
    assert_eq!(collective.runs, vec![(vec![1, 0], Some(snapshot))]);
}

#[test]
fn test_multi_device_runs_through_collective() {
    let ws = Workspace::new();
    let config = RunConfig {
        gpu: "1,0".to_string(),
        ..ws.train_config(ws.solver(3, ""))
    };
    let mut backend = TestBackend::new(2);
    backend.collective = Some(RecordingCollective::default());

    let report: TrainReport = commands::train(&config, &mut backend, &signals()).unwrap();

    assert_eq!(report.devices.ids(), &[1, 0]);
    assert_eq!(report.outcome.iterations, 3);
    let collective = backend.collective.as_ref().unwrap();
    assert_eq!(collective.runs, vec![(vec![1, 0], None)]);
    assert_eq!(backend.sim.sim_devices().active(), Some(1));
    assert_eq!(backend.sim.sim_devices().torn_down(), &[1]);
}

#[test]
fn test_gpu_solver_falls_back_to_declared_device() {
    let ws = Workspace::new();
    let config = ws.train_config(ws.solver(1, "solver_mode = 'GPU'\ndevice_id = 1"));
    let mut backend = sim(2);

    let report = commands::train(&config, &mut backend, &signals()).unwrap();

    assert_eq!(report.devices.ids(), &[1]);
    assert_eq!(backend.sim_devices().active(), Some(1));
}

#[test]
fn test_resume_from_snapshot() {
    let ws = Workspace::new();
    let first = ws.train_config(ws.solver(2, ""));
    let report = commands::train(&first, &mut sim(0), &signals()).unwrap();
    let snapshot = report.outcome.snapshots[0].clone();

    let resumed = RunConfig {
        snapshot: Some(snapshot),
        ..ws.train_config(ws.solver(5, ""))
    };
    let report = commands::train(&resumed, &mut sim(0), &signals()).unwrap();

    assert_eq!(report.outcome.iterations, 5);
    assert_eq!(read_snapshot(&report.outcome.snapshots[0]).iter, 5);
}

#[test]
fn test_weights_seed_training_net_in_order() {
    let ws = Workspace::new();
    let mut first = WeightFile::default();
    first.layers.insert("ip1".to_string(), vec![1.0; 4]);
    first.save(&ws.path("first.json")).unwrap();
    let mut second = WeightFile::default();
    second.layers.insert("ip1".to_string(), vec![2.0; 4]);
    second.save(&ws.path("second.json")).unwrap();

    let config = RunConfig {
        weights: Some(format!(
            "{},{}",
            ws.path("first.json").display(),
            ws.path("second.json").display()
        )),
        ..ws.train_config(ws.solver(0, ""))
    };
    let report = commands::train(&config, &mut sim(0), &signals()).unwrap();

    let state = read_snapshot(&report.outcome.snapshots[0]);
    assert_eq!(state.iter, 0);
    assert_eq!(state.weights.layers["ip1"], vec![2.0; 4]);
}

#[test]
fn test_scores_are_means_independent_of_iterations() {
    let ws = Workspace::new();
    let model = ws.write("scorer.toml", SCORE_MODEL);
    let weights = ws.path("weights.json");
    WeightFile::default().save(&weights).unwrap();

    for iterations in [1, 3, 7] {
        let config = RunConfig {
            model: Some(model.clone()),
            weights: Some(weights.display().to_string()),
            iterations,
            ..RunConfig::default()
        };
        let EvalReport::Classification(report) = commands::test(&config, &mut sim(0)).unwrap()
        else {
            panic!("expected classification report");
        };
        assert_eq!(report.iterations, iterations);
        assert_eq!(report.means(), vec![2.0, 4.0]);
        assert_eq!(report.loss, 1.0);
        assert_eq!(report.scores[0].weighted_loss, Some(0.5));
        assert_eq!(report.scores[1].name, "top5");
    }
}

#[test]
fn test_detection_map_counts_unmatched_labels_in_denominator() {
    let ws = Workspace::new();
    let model = ws.write("detector.toml", DETECTION_MODEL);
    let weights = ws.path("weights.json");
    WeightFile::default().save(&weights).unwrap();
    let config = RunConfig {
        model: Some(model),
        weights: Some(weights.display().to_string()),
        iterations: 2,
        detection: true,
        ap: "MaxIntegral".to_string(),
        ..RunConfig::default()
    };
    let mut backend = TestBackend::new(0);
    backend.formula = Some(RecallFormula::default());

    let EvalReport::Detection(report) = commands::test(&config, &mut backend).unwrap() else {
        panic!("expected detection report");
    };

    assert_eq!(report.method, ApMethod::MaxIntegral);
    let output = &report.outputs[0];
    assert_eq!(output.name, "detection_eval");
    assert_eq!(output.skipped_labels, vec![7]);
    assert!((output.average_precision[&5] - 0.4).abs() < 1e-6);
    assert!((output.mean_ap - 0.2).abs() < 1e-6);

    let calls = backend.formula.as_ref().unwrap().calls.borrow().clone();
    assert_eq!(calls, vec![(3, 5, ApMethod::MaxIntegral)]);
}

fn detection_config(ws: &Workspace, model: &str, iterations: usize) -> RunConfig {
    let weights = ws.path("weights.json");
    WeightFile::default().save(&weights).unwrap();
    RunConfig {
        model: Some(ws.write("detector.toml", model)),
        weights: Some(weights.display().to_string()),
        iterations,
        detection: true,
        ..RunConfig::default()
    }
}

fn formula_backend() -> TestBackend {
    let mut backend = TestBackend::new(0);
    backend.formula = Some(RecallFormula::default());
    backend
}

#[test]
fn test_detection_without_iterations_is_structural_error() {
    let ws = Workspace::new();
    let config = detection_config(&ws, DETECTION_MODEL, 0);

    let err = commands::test(&config, &mut formula_backend()).unwrap_err();

    assert!(matches!(err, RoastError::Structural(_)));
}

#[test]
fn test_detection_without_positives_count_is_structural_error() {
    let ws = Workspace::new();
    let model = r#"
name = "detector"

[[output]]
name = "detection_eval"
shape = [1, 1, 2, 5]
batches = [[0.0, 5.0, 0.9, 1.0, 0.0, 0.0, 5.0, 0.8, 0.0, 1.0]]
"#;
    let config = detection_config(&ws, model, 1);
    let mut backend = formula_backend();

    let err = commands::test(&config, &mut backend).unwrap_err();

    assert!(matches!(err, RoastError::Structural(_)));
    assert!(err.to_string().contains("output #0"));
    assert!(backend.formula.as_ref().unwrap().calls.borrow().is_empty());
}

#[test]
fn test_scoring_registers_every_selected_device() {
    let ws = Workspace::new();
    let weights = ws.path("weights.json");
    WeightFile::default().save(&weights).unwrap();
    let config = RunConfig {
        model: Some(ws.write("scorer.toml", SCORE_MODEL)),
        weights: Some(weights.display().to_string()),
        gpu: "1,0".to_string(),
        iterations: 1,
        ..RunConfig::default()
    };
    let mut backend = sim(2);

    commands::test(&config, &mut backend).unwrap();

    assert_eq!(backend.sim_devices().registered().ids(), &[1, 0]);
    assert_eq!(backend.sim_devices().active(), Some(1));
}

#[test]
fn test_time_rejects_unknown_later_device() {
    let ws = Workspace::new();
    let config = RunConfig {
        model: Some(ws.write("toy.toml", TRAIN_MODEL)),
        gpu: "0,9".to_string(),
        ..RunConfig::default()
    };
    let err = commands::time(&config, &mut sim(2)).unwrap_err();
    assert!(matches!(err, RoastError::Device(_)));
}

#[test]
fn test_time_reports_per_layer_in_declared_order() {
    let ws = Workspace::new();
    let config = RunConfig {
        model: Some(ws.write("toy.toml", TRAIN_MODEL)),
        iterations: 2,
        lt: true,
        gpu: "1".to_string(),
        ..RunConfig::default()
    };
    let mut backend = sim(2);

    let report = commands::time(&config, &mut backend).unwrap();

    assert_eq!(report.phase, Phase::Train);
    let names: Vec<_> = report.layers.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["data", "ip1", "relu1"]);
    assert_eq!(backend.sim_devices().active(), Some(1));
    // One barrier per direction per timed iteration.
    assert_eq!(backend.sim_devices().synchronize_calls(), 4);
}

#[test]
fn test_time_in_test_phase() {
    let ws = Workspace::new();
    let config = RunConfig {
        model: Some(ws.write("toy.toml", TRAIN_MODEL)),
        iterations: 1,
        phase: Some("TEST".to_string()),
        ..RunConfig::default()
    };
    let report = commands::time(&config, &mut sim(0)).unwrap();
    assert_eq!(report.phase, Phase::Test);
    assert!(report.layers.is_empty());
    assert_eq!(report.avg_backward_ms, 0.0);
}

#[test]
fn test_autotune_tunes_capable_layers() {
    let ws = Workspace::new();
    let config = RunConfig {
        model: Some(ws.write("toy.toml", TRAIN_MODEL)),
        ..RunConfig::default()
    };
    let report = commands::autotune(&config, &mut sim(0)).unwrap();
    assert_eq!(report.tuned, vec!["ip1"]);
}

#[test]
fn test_device_query_lists_selected_devices() {
    let config = RunConfig {
        gpu: "2,0".to_string(),
        ..RunConfig::default()
    };
    let mut backend = sim(3);
    let infos = commands::device_query(&config, &mut backend).unwrap();
    let ids: Vec<_> = infos.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![2, 0]);
    assert_eq!(backend.sim_devices().torn_down(), &[2]);

    let infos = commands::device_query(&RunConfig::default(), &mut sim(3)).unwrap();
    assert_eq!(infos.len(), 3);

    let bad = RunConfig {
        gpu: "0,x".to_string(),
        ..RunConfig::default()
    };
    assert!(commands::device_query(&bad, &mut sim(3)).unwrap_err().is_usage());
}
