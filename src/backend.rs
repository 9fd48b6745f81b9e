//! Dense linear-algebra primitives the network is written against.
//!
//! Buffers are registered once with [`ComputeBackend::create`] and addressed by [`BufferId`]
//! afterwards; no primitive allocates a registered buffer. Both implementations are observably
//! synchronous: when a primitive returns, its result is materialized.

mod device;
mod host;

use crate::error::BackendError;

pub use device::{DeviceBackend, Event, Kernel};
pub use host::HostBackend;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Handle of a buffer registered with a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) usize);

/// Whether `mat_vec_mul` uses the matrix as stored or its transpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    /// `out[i] = sum_j m[i][j] * v[j]`, `out` has `rows` elements.
    No,
    /// `out[j] = sum_i m[i][j] * v[i]`, `out` has `cols` elements.
    Yes,
}

/// Row-major matrix stored in a flat buffer.
///
/// `ld` is the distance between two rows, so the first `cols` columns of a wider matrix can be
/// addressed without copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixLayout {
    pub rows: usize,
    pub cols: usize,
    pub ld: usize,
}

impl MatrixLayout {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols, ld: cols }
    }

    pub fn with_ld(rows: usize, cols: usize, ld: usize) -> Self {
        assert!(cols <= ld, "leading dimension {} is smaller than {} columns", ld, cols);
        Self { rows, cols, ld }
    }

    /// Number of elements the backing buffer must hold.
    pub fn required_len(&self) -> usize {
        if self.rows == 0 || self.cols == 0 {
            0
        } else {
            (self.rows - 1) * self.ld + self.cols
        }
    }

    pub(crate) fn index(&self, row: usize, col: usize) -> usize {
        row * self.ld + col
    }

    /// Length of the vector consumed by `mat_vec_mul` and the length of its output.
    pub(crate) fn mat_vec_lens(&self, transpose: Transpose) -> (usize, usize) {
        match transpose {
            Transpose::No => (self.cols, self.rows),
            Transpose::Yes => (self.rows, self.cols),
        }
    }
}

pub(crate) fn check_range(
    id: BufferId,
    capacity: usize,
    offset: usize,
    len: usize,
) -> BackendResult<()> {
    if offset.checked_add(len).map_or(true, |end| end > capacity) {
        Err(BackendError::OutOfBounds {
            id,
            offset,
            len,
            capacity,
        })
    } else {
        Ok(())
    }
}

pub(crate) fn check_distinct(out: BufferId, inputs: &[BufferId]) -> BackendResult<()> {
    if inputs.contains(&out) {
        Err(BackendError::AliasedOperands(out))
    } else {
        Ok(())
    }
}

/// Execution substrate for the network arithmetic.
///
/// `len` arguments always count from the start of the buffer. Element-wise primitives accept an
/// output that aliases one of their inputs; `mat_vec_mul` and `rank1_update` do not.
pub trait ComputeBackend {
    fn name(&self) -> &'static str;

    /// Register a buffer initialized with `data`.
    fn create(&self, data: &[f32]) -> BackendResult<BufferId>;

    fn zeros(&self, len: usize) -> BackendResult<BufferId> {
        self.create(&vec![0.0; len])
    }

    fn len(&self, id: BufferId) -> BackendResult<usize>;

    /// Host to device transfer into `id[offset..offset + data.len()]`.
    fn write(&self, id: BufferId, offset: usize, data: &[f32]) -> BackendResult<()>;

    /// Device to host transfer of `id[offset..offset + out.len()]`.
    fn read(&self, id: BufferId, offset: usize, out: &mut [f32]) -> BackendResult<()>;

    fn release(&self, id: BufferId) -> BackendResult<()>;

    fn copy(&self, src: BufferId, dst: BufferId, len: usize) -> BackendResult<()>;

    fn scale_in_place(&self, buf: BufferId, len: usize, factor: f32) -> BackendResult<()>;

    fn add_scalar(&self, buf: BufferId, len: usize, value: f32) -> BackendResult<()>;

    fn mat_vec_mul(
        &self,
        transpose: Transpose,
        matrix: BufferId,
        layout: MatrixLayout,
        vec: BufferId,
        out: BufferId,
    ) -> BackendResult<()>;

    /// `matrix[i][j] += scale * a[i] * b[j]` over `layout.rows x layout.cols`.
    fn rank1_update(
        &self,
        a: BufferId,
        b: BufferId,
        scale: f32,
        matrix: BufferId,
        layout: MatrixLayout,
    ) -> BackendResult<()>;

    fn elementwise_subtract(
        &self,
        out: BufferId,
        a: BufferId,
        b: BufferId,
        len: usize,
    ) -> BackendResult<()>;

    fn elementwise_multiply(
        &self,
        out: BufferId,
        a: BufferId,
        b: BufferId,
        len: usize,
    ) -> BackendResult<()>;

    fn sum_reduce(&self, buf: BufferId, len: usize) -> BackendResult<f32>;

    fn max_reduce(&self, buf: BufferId, len: usize) -> BackendResult<f32>;

    /// `1.7159 * tanh(2/3 * x)` on the first `len` elements.
    fn apply_scaled_tanh(&self, buf: BufferId, len: usize) -> BackendResult<()>;

    /// `out[i] = 2/3 * (1.7159 - activations[i]^2)`.
    fn apply_scaled_tanh_derivative(
        &self,
        out: BufferId,
        activations: BufferId,
        len: usize,
    ) -> BackendResult<()>;

    fn apply_exp(&self, buf: BufferId, len: usize) -> BackendResult<()>;
}

/// A registered buffer released exactly once when dropped.
pub struct DeviceBuffer<'b, B>
where
    B: ComputeBackend + ?Sized,
{
    backend: &'b B,
    id: BufferId,
    len: usize,
}

impl<'b, B> DeviceBuffer<'b, B>
where
    B: ComputeBackend + ?Sized,
{
    pub fn new(backend: &'b B, data: &[f32]) -> BackendResult<Self> {
        let id = backend.create(data)?;
        Ok(Self {
            backend,
            id,
            len: data.len(),
        })
    }

    pub fn zeros(backend: &'b B, len: usize) -> BackendResult<Self> {
        let id = backend.zeros(len)?;
        Ok(Self { backend, id, len })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn write(&self, offset: usize, data: &[f32]) -> BackendResult<()> {
        self.backend.write(self.id, offset, data)
    }

    pub fn read_into(&self, offset: usize, out: &mut [f32]) -> BackendResult<()> {
        self.backend.read(self.id, offset, out)
    }

    pub fn read_at(&self, index: usize) -> BackendResult<f32> {
        let mut value = [0.0];
        self.backend.read(self.id, index, &mut value)?;
        Ok(value[0])
    }

    pub fn to_vec(&self) -> BackendResult<Vec<f32>> {
        let mut host = vec![0.0; self.len];
        self.backend.read(self.id, 0, &mut host)?;
        Ok(host)
    }
}

impl<'b, B> Drop for DeviceBuffer<'b, B>
where
    B: ComputeBackend + ?Sized,
{
    fn drop(&mut self) {
        if let Err(err) = self.backend.release(self.id) {
            log::warn!(
                "failed to release {:?} on the {} backend: {}",
                self.id,
                self.backend.name(),
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_required_len() {
        assert_eq!(MatrixLayout::new(3, 4).required_len(), 12);
        assert_eq!(MatrixLayout::with_ld(3, 4, 5).required_len(), 14);
        assert_eq!(MatrixLayout::new(0, 4).required_len(), 0);
    }

    #[test]
    fn mat_vec_lens_follow_transpose() {
        let layout = MatrixLayout::with_ld(3, 2, 3);
        assert_eq!(layout.mat_vec_lens(Transpose::No), (2, 3));
        assert_eq!(layout.mat_vec_lens(Transpose::Yes), (3, 2));
    }

    #[test]
    fn buffer_is_released_on_drop() {
        let backend = HostBackend::new();
        let id = {
            let buffer = DeviceBuffer::new(&backend, &[1.0, 2.0]).unwrap();
            assert_eq!(buffer.to_vec().unwrap(), vec![1.0, 2.0]);
            buffer.id()
        };
        assert_eq!(backend.len(id), Err(BackendError::UnknownBuffer(id)));
    }

    #[test]
    fn check_range_reports_overflow() {
        let id = BufferId(0);
        assert!(check_range(id, 4, 1, 3).is_ok());
        assert_eq!(
            check_range(id, 4, 2, 3),
            Err(BackendError::OutOfBounds {
                id,
                offset: 2,
                len: 3,
                capacity: 4
            })
        );
        assert_eq!(
            check_range(id, 4, usize::MAX, 1),
            Err(BackendError::OutOfBounds {
                id,
                offset: usize::MAX,
                len: 1,
                capacity: 4
            })
        );
    }
}
