/// Element-wise non-linearity applied to a layer's pre-activations.
pub trait Activation {
    fn compute(&self, x: f32) -> f32;

    /// Derivative expressed through the activation `y = compute(x)` already stored in the layer.
    fn derivative_from_output(&self, y: f32) -> f32;
}

/// `1.7159 * tanh(2/3 * x)`, whose gain stays close to 1 around the origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaledTanh;

impl ScaledTanh {
    pub const AMPLITUDE: f32 = 1.7159;
    pub const SLOPE: f32 = 2.0 / 3.0;
}

impl Activation for ScaledTanh {
    fn compute(&self, x: f32) -> f32 {
        Self::AMPLITUDE * (Self::SLOPE * x).tanh()
    }

    fn derivative_from_output(&self, y: f32) -> f32 {
        Self::SLOPE * (Self::AMPLITUDE - y.powi(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn scaled_tanh_compute() {
        let xs = [-2.0, -1.0, 0.0, 1.0, 2.0];
        let expected = [-1.4929388, -0.9999973, 0.0, 0.9999973, 1.4929388];
        for (x, e) in xs.iter().zip(expected.iter()) {
            assert_relative_eq!(ScaledTanh.compute(*x), *e, epsilon = 1e-6);
        }
    }

    #[test]
    fn scaled_tanh_is_odd() {
        for x in [0.1f32, 0.7, 3.0] {
            assert_relative_eq!(ScaledTanh.compute(-x), -ScaledTanh.compute(x));
        }
    }

    #[test]
    fn scaled_tanh_derivative_from_output() {
        assert_relative_eq!(ScaledTanh.derivative_from_output(0.0), 1.1439333, epsilon = 1e-6);
        assert_relative_eq!(ScaledTanh.derivative_from_output(1.0), 0.4772667, epsilon = 1e-6);
        assert_relative_eq!(ScaledTanh.derivative_from_output(-1.0), 0.4772667, epsilon = 1e-6);
    }
}
