//! Per-sample stochastic gradient descent for [`NetworkModel`].
//!
//! Gradients are not applied directly. Each backpropagation first multiplies the accumulated
//! delta matrices by [`TrainerConfig::delta_decay`] and then adds the new rank-1 update, so every
//! weight step carries a small, decaying fraction of the previous ones.

use std::time::Duration;

use ndarray::{Array2, ArrayView1};
use ndarray_rand::rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    backend::{ComputeBackend, DeviceBuffer, MatrixLayout, Transpose},
    config::TrainerConfig,
    data::{Dataset, Sampler},
    error::{Error, Result},
    loss, metrics,
    model::{read_matrix, NetworkModel},
    timing::{EpochTimer, TimingRecord},
};

/// Where the training loop stands after an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
    Running,
    /// Reached the desired training accuracy.
    Converged,
    /// Ran out of epochs first.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub state: TrainingState,
    pub epochs: usize,
    pub train_accuracy: f32,
    pub test_accuracy: f32,
    pub average_epoch_duration: Duration,
}

pub struct NetworkTrainer<'m, 'b, B>
where
    B: ComputeBackend + ?Sized,
{
    model: &'m mut NetworkModel<'b, B>,
    config: TrainerConfig,
    rng: StdRng,
    label: DeviceBuffer<'b, B>,
    error_gradient_output: DeviceBuffer<'b, B>,
    error_gradient_hidden: DeviceBuffer<'b, B>,
    weighted_sum: DeviceBuffer<'b, B>,
    non_linearity: DeviceBuffer<'b, B>,
    delta_input_hidden: DeviceBuffer<'b, B>,
    delta_hidden_output: DeviceBuffer<'b, B>,
}

impl<'m, 'b, B> NetworkTrainer<'m, 'b, B>
where
    B: ComputeBackend + ?Sized,
{
    /// `rng` seeds the trainer's own generator, which drives the per-epoch shuffling.
    pub fn new<R: Rng + ?Sized>(
        config: TrainerConfig,
        model: &'m mut NetworkModel<'b, B>,
        rng: &mut R,
    ) -> Result<Self> {
        config.validate()?;
        let backend = model.backend;
        let (num_inputs, num_hidden, num_outputs) =
            (model.num_inputs(), model.num_hidden(), model.num_outputs());

        Ok(Self {
            label: DeviceBuffer::zeros(backend, num_outputs)?,
            error_gradient_output: DeviceBuffer::zeros(backend, num_outputs)?,
            error_gradient_hidden: DeviceBuffer::zeros(backend, num_hidden)?,
            weighted_sum: DeviceBuffer::zeros(backend, num_hidden)?,
            non_linearity: DeviceBuffer::zeros(backend, num_hidden)?,
            delta_input_hidden: DeviceBuffer::zeros(
                backend,
                (num_inputs + 1) * (num_hidden + 1),
            )?,
            delta_hidden_output: DeviceBuffer::zeros(backend, (num_hidden + 1) * num_outputs)?,
            rng: StdRng::seed_from_u64(rng.gen()),
            config,
            model,
        })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn model(&self) -> &NetworkModel<'b, B> {
        &*self.model
    }

    pub fn model_mut(&mut self) -> &mut NetworkModel<'b, B> {
        &mut *self.model
    }

    /// Fold the gradient of the last [`NetworkModel::evaluate`] call against `label` into the
    /// accumulated deltas.
    pub fn backpropagate(&mut self, label: ArrayView1<f32>) -> Result<()> {
        let model = &*self.model;
        let backend = model.backend;
        let (num_hidden, num_outputs) = (model.num_hidden(), model.num_outputs());
        if label.len() != num_outputs {
            return Err(Error::config(format!(
                "expected a label of {} classes, got {}",
                num_outputs,
                label.len()
            )));
        }
        let TrainerConfig {
            learning_rate,
            delta_decay,
            ..
        } = self.config;

        match label.as_slice() {
            Some(values) => self.label.write(0, values)?,
            None => self.label.write(0, &label.to_vec())?,
        }

        // Output layer: softmax with cross-entropy gives `output - label`.
        backend.elementwise_subtract(
            self.error_gradient_output.id(),
            model.output.id(),
            self.label.id(),
            num_outputs,
        )?;
        let delta_hidden_output = self.delta_hidden_output.id();
        let layout = model.hidden_output_layout();
        backend.scale_in_place(delta_hidden_output, layout.required_len(), delta_decay)?;
        backend.rank1_update(
            model.hidden.id(),
            self.error_gradient_output.id(),
            learning_rate,
            delta_hidden_output,
            layout,
        )?;

        // Hidden layer, bias unit excluded.
        backend.apply_scaled_tanh_derivative(
            self.non_linearity.id(),
            model.hidden.id(),
            num_hidden,
        )?;
        backend.mat_vec_mul(
            Transpose::No,
            model.weights_hidden_output.id(),
            MatrixLayout::new(num_hidden, num_outputs),
            self.error_gradient_output.id(),
            self.weighted_sum.id(),
        )?;
        backend.elementwise_multiply(
            self.error_gradient_hidden.id(),
            self.weighted_sum.id(),
            self.non_linearity.id(),
            num_hidden,
        )?;

        let delta_input_hidden = self.delta_input_hidden.id();
        backend.scale_in_place(
            delta_input_hidden,
            model.input_hidden_layout().required_len(),
            delta_decay,
        )?;
        // The hidden bias column is never addressed, so its delta stays zero.
        backend.rank1_update(
            model.input.id(),
            self.error_gradient_hidden.id(),
            learning_rate,
            delta_input_hidden,
            model.input_hidden_units_layout(),
        )?;
        Ok(())
    }

    /// Subtract the accumulated deltas from the weights.
    pub fn update_weights(&mut self) -> Result<()> {
        let model = &*self.model;
        let backend = model.backend;

        let weights = model.weights_input_hidden.id();
        backend.elementwise_subtract(
            weights,
            weights,
            self.delta_input_hidden.id(),
            model.input_hidden_layout().required_len(),
        )?;
        let weights = model.weights_hidden_output.id();
        backend.elementwise_subtract(
            weights,
            weights,
            self.delta_hidden_output.id(),
            model.hidden_output_layout().required_len(),
        )?;
        Ok(())
    }

    /// One pass of evaluate, backpropagate and update over every sample of `dataset`.
    pub fn run_epoch(&mut self, dataset: &Dataset) -> Result<()> {
        let sampler = Sampler::new(dataset.len(), self.config.shuffle);
        for index in sampler.sample(&mut self.rng) {
            let datapoint = dataset.get(index);
            self.model.evaluate(datapoint.input)?;
            self.backpropagate(datapoint.label)?;
            self.update_weights()?;
        }
        Ok(())
    }

    /// Predicted class of every sample of `dataset`, in dataset order.
    pub fn predict(&mut self, dataset: &Dataset) -> Result<Vec<usize>> {
        dataset
            .iter()
            .map(|datapoint| -> Result<usize> {
                self.model.evaluate(datapoint.input)?;
                Ok(self
                    .model
                    .predicted_class()
                    .expect("evaluate sets the predicted class"))
            })
            .collect()
    }

    /// Accuracy and mean cross-entropy over `dataset` in a single pass.
    fn score(&mut self, dataset: &Dataset) -> Result<(f32, f32)> {
        if dataset.is_empty() {
            return Ok((0.0, 0.0));
        }
        let mut predictions = Vec::with_capacity(dataset.len());
        let mut total_loss = 0.0;
        for datapoint in dataset.iter() {
            let output = self.model.evaluate(datapoint.input)?;
            total_loss += loss::cross_entropy(output, datapoint.label);
            predictions.push(
                self.model
                    .predicted_class()
                    .expect("evaluate sets the predicted class"),
            );
        }
        let accuracy = metrics::accuracy(&dataset.classes(), &predictions);
        Ok((accuracy, total_loss / dataset.len() as f32))
    }

    /// Fraction of `dataset` classified correctly. An empty dataset scores `0.0`.
    pub fn accuracy(&mut self, dataset: &Dataset) -> Result<f32> {
        self.score(dataset).map(|(accuracy, _)| accuracy)
    }

    pub fn mean_cross_entropy(&mut self, dataset: &Dataset) -> Result<f32> {
        self.score(dataset).map(|(_, loss)| loss)
    }

    pub fn confusion_matrix(&mut self, dataset: &Dataset) -> Result<Vec<Vec<usize>>> {
        let predictions = self.predict(dataset)?;
        Ok(metrics::confusion_matrix(
            &dataset.classes(),
            &predictions,
            dataset.num_outputs(),
        ))
    }

    fn check_dataset(&self, dataset: &Dataset, name: &str) -> Result<()> {
        let model = &*self.model;
        if dataset.num_inputs() != model.num_inputs()
            || dataset.num_outputs() != model.num_outputs()
        {
            return Err(Error::config(format!(
                "{} set has {} inputs and {} classes, network expects {} and {}",
                name,
                dataset.num_inputs(),
                dataset.num_outputs(),
                model.num_inputs(),
                model.num_outputs()
            )));
        }
        Ok(())
    }

    /// Run epochs until the training accuracy reaches the desired accuracy or the epoch limit is
    /// hit, then score `test` once.
    pub fn train(&mut self, train: &Dataset, test: &Dataset) -> Result<TrainingReport> {
        self.check_dataset(train, "training")?;
        self.check_dataset(test, "test")?;
        log::info!(
            "training a {}-{}-{} network on the {} backend: {} samples, learning rate {}, \
             up to {} epochs, target accuracy {}",
            self.model.num_inputs(),
            self.model.num_hidden(),
            self.model.num_outputs(),
            self.model.backend.name(),
            train.len(),
            self.config.learning_rate,
            self.config.max_epochs,
            self.config.desired_accuracy
        );

        let mut timer = EpochTimer::new();
        let mut state = TrainingState::Running;
        let mut train_accuracy = 0.0;
        while state == TrainingState::Running {
            timer.start();
            self.run_epoch(train)?;
            let elapsed = timer.stop();

            let (accuracy, mean_loss) = self.score(train)?;
            train_accuracy = accuracy;
            log::info!(
                "epoch {}/{}: training accuracy {:.4}, loss {:.6} ({:.3}s)",
                timer.epochs(),
                self.config.max_epochs,
                train_accuracy,
                mean_loss,
                elapsed.as_secs_f64()
            );

            state = if train_accuracy >= self.config.desired_accuracy {
                TrainingState::Converged
            } else if timer.epochs() >= self.config.max_epochs {
                TrainingState::Exhausted
            } else {
                TrainingState::Running
            };
        }

        let test_accuracy = self.accuracy(test)?;
        let average_epoch_duration = timer.average().unwrap_or_default();
        match state {
            TrainingState::Converged => log::info!(
                "reached training accuracy {:.4} after {} epochs",
                train_accuracy,
                timer.epochs()
            ),
            _ => log::info!(
                "stopped after {} epochs at training accuracy {:.4}",
                timer.epochs(),
                train_accuracy
            ),
        }
        log::info!(
            "test accuracy {:.4}, {:.6}s per epoch",
            test_accuracy,
            average_epoch_duration.as_secs_f64()
        );

        if let Some(path) = &self.config.timing_log {
            TimingRecord::new(self.model.num_hidden(), average_epoch_duration).append_to(path)?;
        }

        Ok(TrainingReport {
            state,
            epochs: timer.epochs(),
            train_accuracy,
            test_accuracy,
            average_epoch_duration,
        })
    }

    pub fn delta_input_hidden(&self) -> Result<Array2<f32>> {
        read_matrix(&self.delta_input_hidden, self.model.input_hidden_layout())
    }

    pub fn delta_hidden_output(&self) -> Result<Array2<f32>> {
        read_matrix(&self.delta_hidden_output, self.model.hidden_output_layout())
    }
}
