use ndarray::{Array, Array2, ArrayView1};
use ndarray_rand::{rand::Rng, rand_distr::Normal, RandomExt};

use crate::{
    backend::{ComputeBackend, DeviceBuffer, MatrixLayout, Transpose},
    config::{ModelConfig, SoftmaxMode},
    error::{Error, Result},
};

/// Value of the extra trailing unit appended to the input and hidden layers.
pub const BIAS: f32 = -1.0;

/// Single-hidden-layer classifier whose buffers live on a [`ComputeBackend`].
///
/// Weight matrices are row-major: `(num_inputs + 1) x (num_hidden + 1)` from input to hidden and
/// `(num_hidden + 1) x num_outputs` from hidden to output. The extra row is the weight of the
/// preceding layer's bias unit.
pub struct NetworkModel<'b, B>
where
    B: ComputeBackend + ?Sized,
{
    pub(crate) backend: &'b B,
    config: ModelConfig,
    staging: DeviceBuffer<'b, B>,
    pub(crate) input: DeviceBuffer<'b, B>,
    pub(crate) hidden: DeviceBuffer<'b, B>,
    pub(crate) output: DeviceBuffer<'b, B>,
    pub(crate) weights_input_hidden: DeviceBuffer<'b, B>,
    pub(crate) weights_hidden_output: DeviceBuffer<'b, B>,
    host_output: Vec<f32>,
    predicted_class: Option<usize>,
}

impl<'b, B> NetworkModel<'b, B>
where
    B: ComputeBackend + ?Sized,
{
    /// Draw both weight matrices from `N(0, (2.4 / num_inputs) / 3)`.
    pub fn new<R: Rng + ?Sized>(backend: &'b B, config: ModelConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let half_width = 2.4 / config.num_inputs as f32;
        let std_dev = half_width * 2.0 / 6.0;
        let normal = Normal::new(0.0, std_dev)
            .map_err(|err| Error::config(format!("weight distribution: {}", err)))?;

        let weights_input_hidden = Array::random_using(
            (config.num_inputs + 1, config.num_hidden + 1),
            normal,
            rng,
        );
        let weights_hidden_output =
            Array::random_using((config.num_hidden + 1, config.num_outputs), normal, rng);
        Self::with_weights(backend, config, weights_input_hidden, weights_hidden_output)
    }

    pub fn with_weights(
        backend: &'b B,
        config: ModelConfig,
        weights_input_hidden: Array2<f32>,
        weights_hidden_output: Array2<f32>,
    ) -> Result<Self> {
        config.validate()?;
        let ModelConfig {
            num_inputs,
            num_hidden,
            num_outputs,
            ..
        } = config;
        if weights_input_hidden.dim() != (num_inputs + 1, num_hidden + 1) {
            return Err(Error::config(format!(
                "input to hidden weights must be {}x{}, got {:?}",
                num_inputs + 1,
                num_hidden + 1,
                weights_input_hidden.dim()
            )));
        }
        if weights_hidden_output.dim() != (num_hidden + 1, num_outputs) {
            return Err(Error::config(format!(
                "hidden to output weights must be {}x{}, got {:?}",
                num_hidden + 1,
                num_outputs,
                weights_hidden_output.dim()
            )));
        }

        let mut input = vec![0.0; num_inputs + 1];
        input[num_inputs] = BIAS;
        let mut hidden = vec![0.0; num_hidden + 1];
        hidden[num_hidden] = BIAS;
        let w_ih = weights_input_hidden.iter().copied().collect::<Vec<_>>();
        let w_ho = weights_hidden_output.iter().copied().collect::<Vec<_>>();

        log::debug!(
            "allocating a {}-{}-{} network on the {} backend",
            num_inputs,
            num_hidden,
            num_outputs,
            backend.name()
        );
        Ok(Self {
            backend,
            staging: DeviceBuffer::zeros(backend, num_inputs)?,
            input: DeviceBuffer::new(backend, &input)?,
            hidden: DeviceBuffer::new(backend, &hidden)?,
            output: DeviceBuffer::zeros(backend, num_outputs)?,
            weights_input_hidden: DeviceBuffer::new(backend, &w_ih)?,
            weights_hidden_output: DeviceBuffer::new(backend, &w_ho)?,
            host_output: vec![0.0; num_outputs],
            predicted_class: None,
            config,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn num_inputs(&self) -> usize {
        self.config.num_inputs
    }

    pub fn num_hidden(&self) -> usize {
        self.config.num_hidden
    }

    pub fn num_outputs(&self) -> usize {
        self.config.num_outputs
    }

    /// Whole input to hidden matrix including the bias column of the hidden layer.
    pub(crate) fn input_hidden_layout(&self) -> MatrixLayout {
        MatrixLayout::new(self.num_inputs() + 1, self.num_hidden() + 1)
    }

    /// Input to hidden matrix restricted to the real hidden units.
    pub(crate) fn input_hidden_units_layout(&self) -> MatrixLayout {
        MatrixLayout::with_ld(
            self.num_inputs() + 1,
            self.num_hidden(),
            self.num_hidden() + 1,
        )
    }

    pub(crate) fn hidden_output_layout(&self) -> MatrixLayout {
        MatrixLayout::new(self.num_hidden() + 1, self.num_outputs())
    }

    fn assert_bias(&self, buffer: &DeviceBuffer<'b, B>, index: usize, layer: &str) -> Result<()> {
        let bias = buffer.read_at(index)?;
        assert!(
            bias == BIAS,
            "bias unit of the {} layer was overwritten: {}",
            layer,
            bias
        );
        Ok(())
    }

    /// Run the forward pass and return the output distribution.
    ///
    /// The index of its maximum is kept as [`Self::predicted_class`]; among equal maxima the
    /// last one wins.
    pub fn evaluate(&mut self, input: ArrayView1<f32>) -> Result<ArrayView1<'_, f32>> {
        let (num_inputs, num_hidden, num_outputs) =
            (self.num_inputs(), self.num_hidden(), self.num_outputs());
        if input.len() != num_inputs {
            return Err(Error::config(format!(
                "expected {} inputs, got {}",
                num_inputs,
                input.len()
            )));
        }
        self.assert_bias(&self.input, num_inputs, "input")?;
        self.assert_bias(&self.hidden, num_hidden, "hidden")?;

        match input.as_slice() {
            Some(values) => self.staging.write(0, values)?,
            None => self.staging.write(0, &input.to_vec())?,
        }
        let backend = self.backend;
        backend.copy(self.staging.id(), self.input.id(), num_inputs)?;

        backend.mat_vec_mul(
            Transpose::Yes,
            self.weights_input_hidden.id(),
            self.input_hidden_units_layout(),
            self.input.id(),
            self.hidden.id(),
        )?;
        self.assert_bias(&self.hidden, num_hidden, "hidden")?;
        backend.apply_scaled_tanh(self.hidden.id(), num_hidden)?;

        backend.mat_vec_mul(
            Transpose::Yes,
            self.weights_hidden_output.id(),
            self.hidden_output_layout(),
            self.hidden.id(),
            self.output.id(),
        )?;

        let output = self.output.id();
        if self.config.softmax == SoftmaxMode::Stabilized {
            let max = backend.max_reduce(output, num_outputs)?;
            backend.add_scalar(output, num_outputs, -max)?;
        }
        backend.apply_exp(output, num_outputs)?;
        let denominator = backend.sum_reduce(output, num_outputs)?;
        backend.scale_in_place(output, num_outputs, 1.0 / denominator)?;

        self.output.read_into(0, &mut self.host_output)?;
        let predicted = last_argmax(&self.host_output)
            .expect("output distribution has no maximum");
        self.predicted_class = Some(predicted);

        Ok(ArrayView1::from(&self.host_output[..]))
    }

    /// Class chosen by the latest [`Self::evaluate`] call.
    pub fn predicted_class(&self) -> Option<usize> {
        self.predicted_class
    }

    /// Host copy of the latest output distribution.
    pub fn output(&self) -> ArrayView1<'_, f32> {
        ArrayView1::from(&self.host_output[..])
    }

    /// Input layer including its bias unit.
    pub fn input_activations(&self) -> Result<Vec<f32>> {
        Ok(self.input.to_vec()?)
    }

    /// Hidden layer including its bias unit.
    pub fn hidden_activations(&self) -> Result<Vec<f32>> {
        Ok(self.hidden.to_vec()?)
    }

    pub fn weights_input_hidden(&self) -> Result<Array2<f32>> {
        read_matrix(&self.weights_input_hidden, self.input_hidden_layout())
    }

    pub fn weights_hidden_output(&self) -> Result<Array2<f32>> {
        read_matrix(&self.weights_hidden_output, self.hidden_output_layout())
    }
}

pub(crate) fn read_matrix<B>(
    buffer: &DeviceBuffer<'_, B>,
    layout: MatrixLayout,
) -> Result<Array2<f32>>
where
    B: ComputeBackend + ?Sized,
{
    Array2::from_shape_vec((layout.rows, layout.cols), buffer.to_vec()?)
        .map_err(|err| Error::config(format!("matrix readback: {}", err)))
}

/// Index of the maximum of `values`, scanning with `>=` so the last of equal maxima wins.
/// `None` when no element is `>= 0`, which includes empty and all-`NaN` inputs.
pub fn last_argmax(values: &[f32]) -> Option<usize> {
    let mut max = 0.0;
    let mut index = None;
    for (i, &value) in values.iter().enumerate() {
        if value >= max {
            max = value;
            index = Some(i);
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{assert_rel_eq_arr1, backend::HostBackend};

    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};
    use ndarray_rand::rand::{rngs::StdRng, SeedableRng};

    fn small_model(backend: &HostBackend) -> NetworkModel<'_, HostBackend> {
        // 2 inputs, 2 hidden, 2 outputs; the last row of each matrix weighs the bias unit.
        let w_ih = arr2(&[[0.5, -0.3, 0.9], [0.2, 0.8, 0.9], [0.1, -0.1, 0.9]]);
        let w_ho = arr2(&[[1.0, -1.0], [0.5, 0.25], [-0.2, 0.3]]);
        NetworkModel::with_weights(backend, ModelConfig::new(2, 2, 2), w_ih, w_ho).unwrap()
    }

    #[test]
    fn evaluate_matches_hand_computation() {
        let backend = HostBackend::new();
        let mut model = small_model(&backend);
        let output = model.evaluate(arr1(&[1.0, 0.5]).view()).unwrap().to_owned();

        // hidden pre-activations: [0.5 + 0.1 - 0.1, -0.3 + 0.4 + 0.1]
        let h0 = 1.7159 * (2.0f32 / 3.0 * 0.5).tanh();
        let h1 = 1.7159 * (2.0f32 / 3.0 * 0.2).tanh();
        let z0 = h0 * 1.0 + h1 * 0.5 + 0.2;
        let z1 = -h0 + h1 * 0.25 - 0.3;
        let denominator = z0.exp() + z1.exp();
        let expected = arr1(&[z0.exp() / denominator, z1.exp() / denominator]);
        assert_rel_eq_arr1!(output, expected, epsilon = 1e-6);
        assert_eq!(model.predicted_class(), Some(0));

        let hidden = model.hidden_activations().unwrap();
        assert_relative_eq!(hidden[0], h0, epsilon = 1e-6);
        assert_relative_eq!(hidden[1], h1, epsilon = 1e-6);
    }

    #[test]
    fn bias_units_survive_evaluate() {
        let backend = HostBackend::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = NetworkModel::new(&backend, ModelConfig::new(3, 5, 4), &mut rng).unwrap();
        for input in [[0.0, 0.0, 0.0], [1.0, 0.5, 0.25], [0.9, 0.1, 0.7]] {
            model.evaluate(arr1(&input).view()).unwrap();
            assert_eq!(model.input_activations().unwrap()[3], BIAS);
            assert_eq!(model.hidden_activations().unwrap()[5], BIAS);
        }
    }

    #[test]
    fn output_is_a_distribution() {
        let backend = HostBackend::new();
        let mut rng = StdRng::seed_from_u64(9);
        let mut model = NetworkModel::new(&backend, ModelConfig::new(4, 8, 5), &mut rng).unwrap();
        let output = model.evaluate(arr1(&[0.3, 0.9, 0.0, 1.0]).view()).unwrap();
        assert_relative_eq!(output.sum(), 1.0, epsilon = 1e-5);
        assert!(output.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn stabilized_softmax_survives_large_logits() {
        let backend = HostBackend::new();
        let w_ih = arr2(&[[1.0, 0.0], [0.0, 0.0]]);
        let w_ho = arr2(&[[200.0, 0.0], [0.0, 0.0]]);
        let config = ModelConfig::new(1, 1, 2);

        let mut unstable =
            NetworkModel::with_weights(&backend, config.clone(), w_ih.clone(), w_ho.clone())
                .unwrap();
        // exp(~343) overflows f32 and inf * (1 / inf) is NaN.
        let output = unstable.evaluate(arr1(&[10.0]).view()).unwrap();
        assert!(output[0].is_nan());
        assert_eq!(output[1], 0.0);

        let mut stable = NetworkModel::with_weights(
            &backend,
            config.softmax(SoftmaxMode::Stabilized),
            w_ih,
            w_ho,
        )
        .unwrap();
        let output = stable.evaluate(arr1(&[10.0]).view()).unwrap();
        assert_relative_eq!(output[0], 1.0);
        assert_relative_eq!(output[1], 0.0);
        assert_eq!(stable.predicted_class(), Some(0));
    }

    #[test]
    fn tie_break_prefers_last_index() {
        assert_eq!(last_argmax(&[0.5, 0.5]), Some(1));
        assert_eq!(last_argmax(&[0.2, 0.4, 0.4]), Some(2));
        assert_eq!(last_argmax(&[0.6, 0.4]), Some(0));
        assert_eq!(last_argmax(&[]), None);
        assert_eq!(last_argmax(&[f32::NAN]), None);
    }

    #[test]
    fn equal_logits_predict_last_class() {
        let backend = HostBackend::new();
        let w_ih = arr2(&[[0.4, 0.0], [0.1, 0.0]]);
        let w_ho = arr2(&[[0.7, 0.7, 0.7], [0.2, 0.2, 0.2]]);
        let mut model =
            NetworkModel::with_weights(&backend, ModelConfig::new(1, 1, 3), w_ih, w_ho).unwrap();
        let output = model.evaluate(arr1(&[0.8]).view()).unwrap().to_owned();
        assert_eq!(output[0], output[2]);
        assert_eq!(model.predicted_class(), Some(2));
    }

    #[test]
    fn construction_rejects_bad_shapes() {
        let backend = HostBackend::new();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(NetworkModel::new(&backend, ModelConfig::new(0, 2, 2), &mut rng).is_err());
        let result = NetworkModel::with_weights(
            &backend,
            ModelConfig::new(2, 2, 2),
            Array2::zeros((2, 3)),
            Array2::zeros((3, 2)),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn evaluate_rejects_wrong_input_length() {
        let backend = HostBackend::new();
        let mut model = small_model(&backend);
        assert!(model.evaluate(arr1(&[1.0]).view()).is_err());
    }

    #[test]
    fn buffers_are_released_with_the_model() {
        let backend = HostBackend::new();
        {
            let _model = small_model(&backend);
            assert_eq!(backend.live_buffers(), 6);
        }
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    #[should_panic(expected = "bias unit of the hidden layer")]
    fn corrupted_bias_aborts() {
        let backend = HostBackend::new();
        let mut model = small_model(&backend);
        model.hidden.write(2, &[0.0]).unwrap();
        let _ = model.evaluate(arr1(&[1.0, 0.5]).view());
    }
}
