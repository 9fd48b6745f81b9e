use std::str::FromStr;

use ndarray::{Array2, ArrayView1, Axis};
use ndarray_rand::rand::{seq::SliceRandom, Rng};

use crate::{
    config::ShuffleMode,
    error::{Error, Result},
};

/// One training example, borrowed from a [`Dataset`].
#[derive(Debug, Clone, Copy)]
pub struct Datapoint<'a> {
    pub input: ArrayView1<'a, f32>,
    pub label: ArrayView1<'a, f32>,
}

impl<'a> Datapoint<'a> {
    /// Index of the `1.0` entry in the one-hot label.
    /// Panics if the label has no such entry.
    pub fn class(&self) -> usize {
        self.label
            .iter()
            .position(|&v| v == 1.0)
            .expect("one-hot label without a 1.0 entry")
    }
}

/// Which part of the data a [`Dataset`] stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl FromStr for Split {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Self::Train),
            "test" => Ok(Self::Test),
            other => Err(Error::config(format!(
                "unknown dataset split `{}`, expected `train` or `test`",
                other
            ))),
        }
    }
}

/// Fixed-length sequence of (input, one-hot label) rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    inputs: Array2<f32>,
    labels: Array2<f32>,
}

impl Dataset {
    /// `inputs` has shape `(n, num_inputs)` and `labels` `(n, num_outputs)`.
    pub fn new(inputs: Array2<f32>, labels: Array2<f32>) -> Result<Self> {
        if inputs.nrows() != labels.nrows() {
            return Err(Error::config(format!(
                "{} inputs but {} labels",
                inputs.nrows(),
                labels.nrows()
            )));
        }
        if let Some(row) = labels
            .rows()
            .into_iter()
            .position(|label| label.iter().filter(|&&v| v == 1.0).count() != 1)
        {
            return Err(Error::config(format!(
                "label {} is not a one-hot vector",
                row
            )));
        }
        Ok(Self { inputs, labels })
    }

    /// Build one-hot labels from class indices.
    pub fn from_classes(
        inputs: Array2<f32>,
        classes: &[usize],
        num_outputs: usize,
    ) -> Result<Self> {
        let mut labels = Array2::zeros((classes.len(), num_outputs));
        for (mut label, &class) in labels.rows_mut().into_iter().zip(classes) {
            if class >= num_outputs {
                return Err(Error::config(format!(
                    "class {} out of range for {} outputs",
                    class, num_outputs
                )));
            }
            label[class] = 1.0;
        }
        Self::new(inputs, labels)
    }

    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.ncols()
    }

    pub fn num_outputs(&self) -> usize {
        self.labels.ncols()
    }

    pub fn get(&self, index: usize) -> Datapoint<'_> {
        Datapoint {
            input: self.inputs.index_axis(Axis(0), index),
            label: self.labels.index_axis(Axis(0), index),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Datapoint<'_>> + '_ {
        (0..self.len()).map(move |index| self.get(index))
    }

    /// Class index of the `index`-th label.
    pub fn class_of(&self, index: usize) -> usize {
        self.get(index).class()
    }

    pub fn classes(&self) -> Vec<usize> {
        self.iter().map(|datapoint| datapoint.class()).collect()
    }
}

/// Sampler produces the visiting order of a dataset for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampler {
    Sequential(usize),
    Shuffled(usize, ShuffleMode),
}

impl Sampler {
    pub fn new(size: usize, mode: ShuffleMode) -> Self {
        match mode {
            ShuffleMode::None => Self::Sequential(size),
            mode => Self::Shuffled(size, mode),
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<usize> {
        match *self {
            Self::Sequential(size) => (0..size).collect(),
            Self::Shuffled(size, mode) => {
                let mut indices = (0..size).collect::<Vec<_>>();
                let end = match mode {
                    ShuffleMode::ExcludeLast => size.saturating_sub(1),
                    _ => size,
                };
                indices[..end].shuffle(rng);
                indices
            }
        }
    }
}
