pub mod activation;
pub mod backend;
pub mod config;
pub mod data;
pub mod error;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod timing;
pub mod trainer;

pub use backend::{ComputeBackend, DeviceBackend, HostBackend};
pub use config::{load_config, ExperimentConfig, ModelConfig, TrainerConfig};
pub use data::Dataset;
pub use error::{Error, Result};
pub use model::NetworkModel;
pub use trainer::{NetworkTrainer, TrainingReport, TrainingState};

#[macro_export]
macro_rules! assert_rel_eq_arr1 {
    ($actual:expr, $expected:expr) => {
        assert_eq!($actual.shape(), $expected.shape());
        ndarray::Zip::from(&$actual)
            .and(&$expected)
            .for_each(|v, w| {
                assert_relative_eq!(v, w);
            });
    };
    ($actual:expr, $expected:expr, epsilon = $epsilon:expr) => {
        assert_eq!($actual.shape(), $expected.shape());
        ndarray::Zip::from(&$actual)
            .and(&$expected)
            .for_each(|v, w| {
                assert_relative_eq!(v, w, epsilon = $epsilon);
            });
    };
}

#[macro_export]
macro_rules! assert_rel_eq_arr2 {
    ($actual:expr, $expected:expr) => {
        assert_eq!($actual.shape(), $expected.shape());
        ndarray::Zip::from(&$actual)
            .and(&$expected)
            .for_each(|v, w| {
                assert_relative_eq!(v, w);
            });
    };
    ($actual:expr, $expected:expr, epsilon = $epsilon:expr) => {
        assert_eq!($actual.shape(), $expected.shape());
        ndarray::Zip::from(&$actual)
            .and(&$expected)
            .for_each(|v, w| {
                assert_relative_eq!(v, w, epsilon = $epsilon);
            });
    };
}
