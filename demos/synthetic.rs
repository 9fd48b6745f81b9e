use std::{env, panic};

use ndarray::Array2;
use ndarray_rand::{
    rand::{rngs::StdRng, Rng, SeedableRng},
    rand_distr::{Distribution, Normal},
};
use log::{LevelFilter, SetLoggerError};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};
use sgd_net::{
    backend::{ComputeBackend, DeviceBackend, HostBackend},
    data::Split,
    load_config, Dataset, ExperimentConfig, ModelConfig, NetworkModel, NetworkTrainer,
    TrainerConfig,
};

fn init_log() -> Result<(), SetLoggerError> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("[{h({l})} - {f}:{L}] {m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        .unwrap();
    log4rs::init_config(config)?;

    let hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        log::error!("{}", info);
        hook(info);
    }));
    Ok(())
}

fn samples_per_class(split: Split) -> usize {
    match split {
        Split::Train => 200,
        Split::Test => 50,
    }
}

// Gaussian blobs centered on a circle, one per class.
fn generate_blobs(
    split: Split,
    num_inputs: usize,
    num_classes: usize,
    mut rng: &mut impl Rng,
) -> Dataset {
    let noise = Normal::new(0.0f32, 0.1).unwrap();
    let mut inputs = Vec::new();
    let mut classes = Vec::new();
    for _ in 0..samples_per_class(split) {
        for class in 0..num_classes {
            let angle = class as f32 / num_classes as f32 * std::f32::consts::TAU;
            for dim in 0..num_inputs {
                let center = if dim % 2 == 0 { angle.cos() } else { angle.sin() };
                inputs.push(0.5 + 0.4 * center + noise.sample(&mut rng));
            }
            classes.push(class);
        }
    }
    let inputs = Array2::from_shape_vec((classes.len(), num_inputs), inputs).unwrap();
    Dataset::from_classes(inputs, &classes, num_classes).unwrap()
}

fn run(backend: &dyn ComputeBackend, experiment: &ExperimentConfig, seed: u64, report_on: Split) {
    let model_config = &experiment.model;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut generate = |split| {
        generate_blobs(
            split,
            model_config.num_inputs,
            model_config.num_outputs,
            &mut rng,
        )
    };
    let train = generate(Split::Train);
    let test = generate(Split::Test);

    log::info!(
        "training on the {} backend with {} samples",
        backend.name(),
        train.len()
    );
    let mut model = NetworkModel::new(backend, model_config.clone(), &mut rng).unwrap();
    let mut trainer =
        NetworkTrainer::new(experiment.trainer.clone(), &mut model, &mut rng).unwrap();
    let report = trainer.train(&train, &test).unwrap();

    println!("[{}] {:?} after {} epochs", backend.name(), report.state, report.epochs);
    println!(
        "[{}] train accuracy: {}, test accuracy: {}",
        backend.name(),
        report.train_accuracy,
        report.test_accuracy
    );
    println!(
        "[{}] average epoch: {:?}, test cross entropy: {}",
        backend.name(),
        report.average_epoch_duration,
        trainer.mean_cross_entropy(&test).unwrap()
    );
    let reported = match report_on {
        Split::Train => &train,
        Split::Test => &test,
    };
    println!("{:?}", trainer.confusion_matrix(reported).unwrap());
}

// Usage: synthetic [experiment.json] [train|test]
fn main() {
    init_log().unwrap();

    let experiment = match env::args().nth(1) {
        Some(path) => load_config(path).unwrap(),
        None => ExperimentConfig {
            model: ModelConfig::new(4, 16, 3),
            trainer: TrainerConfig::new(0.01, 20, 0.95),
            seed: None,
        },
    };
    let report_on = match env::args().nth(2) {
        Some(split) => split.parse::<Split>().unwrap(),
        None => Split::Test,
    };
    let seed = experiment.seed.unwrap_or(42);

    run(&HostBackend::new(), &experiment, seed, report_on);
    run(&DeviceBackend::new().unwrap(), &experiment, seed, report_on);
}
