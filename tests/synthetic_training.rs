use std::{env, fs, process};

use ndarray::Array2;
use ndarray_rand::{
    rand::{rngs::StdRng, Rng, SeedableRng},
    rand_distr::{Distribution, Normal},
};
use sgd_net::{
    backend::{ComputeBackend, DeviceBackend, HostBackend},
    config::{ShuffleMode, SoftmaxMode},
    load_config,
    timing::TimingRecord,
    Dataset, ModelConfig, NetworkModel, NetworkTrainer, TrainerConfig, TrainingState,
};

const CENTERS: [[f32; 2]; 3] = [[0.2, 0.2], [0.8, 0.2], [0.5, 0.8]];

// Three well separated gaussian blobs, one per class.
fn generate_blobs(samples_per_class: usize, mut rng: &mut impl Rng) -> Dataset {
    let noise = Normal::new(0.0f32, 0.05).unwrap();
    let mut inputs = Vec::new();
    let mut classes = Vec::new();
    for _ in 0..samples_per_class {
        for (class, center) in CENTERS.iter().enumerate() {
            inputs.push(center[0] + noise.sample(&mut rng));
            inputs.push(center[1] + noise.sample(&mut rng));
            classes.push(class);
        }
    }
    let inputs = Array2::from_shape_vec((classes.len(), 2), inputs).unwrap();
    Dataset::from_classes(inputs, &classes, CENTERS.len()).unwrap()
}

fn train_blobs(backend: &dyn ComputeBackend, config: TrainerConfig, seed: u64) -> TrainingState {
    let mut rng = StdRng::seed_from_u64(seed);
    let train = generate_blobs(30, &mut rng);
    let test = generate_blobs(10, &mut rng);

    let model_config = ModelConfig::new(2, 8, 3).softmax(SoftmaxMode::Stabilized);
    let mut model = NetworkModel::new(backend, model_config, &mut rng).unwrap();
    let mut trainer = NetworkTrainer::new(config, &mut model, &mut rng).unwrap();
    let report = trainer.train(&train, &test).unwrap();

    println!(
        "{}: {:?} after {} epochs, test accuracy {}",
        backend.name(),
        report.state,
        report.epochs,
        report.test_accuracy
    );
    assert!(report.epochs <= trainer.config().max_epochs);
    report.state
}

#[test]
fn host_backend_learns_blobs() {
    let config = TrainerConfig::new(0.05, 200, 0.9);
    assert_eq!(
        train_blobs(&HostBackend::new(), config, 17),
        TrainingState::Converged
    );
}

#[test]
fn device_backend_learns_blobs() {
    let config = TrainerConfig::new(0.05, 200, 0.9).shuffle(ShuffleMode::ExcludeLast);
    let device = DeviceBackend::new().unwrap();
    assert_eq!(train_blobs(&device, config, 17), TrainingState::Converged);
}

#[test]
fn unreachable_accuracy_exhausts_epochs() {
    let config = TrainerConfig::new(0.001, 2, 1.0);
    let mut rng = StdRng::seed_from_u64(0);
    // Identical inputs with different classes can never all be right.
    let inputs = Array2::from_elem((4, 2), 0.5);
    let dataset = Dataset::from_classes(inputs, &[0, 1, 2, 0], 3).unwrap();

    let backend = HostBackend::new();
    let mut model = NetworkModel::new(&backend, ModelConfig::new(2, 4, 3), &mut rng).unwrap();
    let mut trainer = NetworkTrainer::new(config, &mut model, &mut rng).unwrap();
    let report = trainer.train(&dataset, &dataset).unwrap();
    assert_eq!(report.state, TrainingState::Exhausted);
    assert_eq!(report.epochs, 2);
    assert!(report.test_accuracy < 1.0);
}

#[test]
fn experiment_from_json_file_writes_timing_log() {
    let dir = env::temp_dir();
    let config_path = dir.join(format!("sgd-net-experiment-{}.json", process::id()));
    let timing_path = dir.join(format!("sgd-net-epochs-{}.dat", process::id()));
    let _ = fs::remove_file(&timing_path);
    fs::write(
        &config_path,
        format!(
            r#"{{
                "model": {{ "num_inputs": 2, "num_hidden": 6, "num_outputs": 3 }},
                "trainer": {{ "learning_rate": 0.05, "max_epochs": 3, "desired_accuracy": 1.0,
                              "timing_log": {:?} }},
                "seed": 21
            }}"#,
            timing_path.display().to_string()
        ),
    )
    .unwrap();

    let experiment = load_config(&config_path).unwrap();
    let mut rng = StdRng::seed_from_u64(experiment.seed.unwrap());
    let train = generate_blobs(5, &mut rng);

    let backend = HostBackend::new();
    let mut model = NetworkModel::new(&backend, experiment.model, &mut rng).unwrap();
    let mut trainer = NetworkTrainer::new(experiment.trainer, &mut model, &mut rng).unwrap();
    let report = trainer.train(&train, &train).unwrap();

    let records = TimingRecord::read_all(&timing_path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].num_hidden, 6);
    assert!(records[0].average_epoch_seconds >= 0.0);
    assert!(report.epochs <= 3);

    fs::remove_file(&config_path).unwrap();
    fs::remove_file(&timing_path).unwrap();
}
