use std::cell::{Ref, RefCell, RefMut};

use ndarray::{
    linalg::{general_mat_mul, general_mat_vec_mul},
    ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, ShapeBuilder, Zip,
};

use crate::{
    activation::{Activation, ScaledTanh},
    backend::{
        check_distinct, check_range, BackendResult, BufferId, ComputeBackend, MatrixLayout,
        Transpose,
    },
    error::BackendError,
};

type Slot = Option<RefCell<Vec<f32>>>;

/// Calls straight through to `ndarray` on host memory.
///
/// Buffers live in a slot arena; released slots are reused by later allocations.
#[derive(Debug, Default)]
pub struct HostBackend {
    slots: RefCell<Vec<Slot>>,
    free: RefCell<Vec<usize>>,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffers currently registered.
    pub fn live_buffers(&self) -> usize {
        self.slots.borrow().iter().filter(|slot| slot.is_some()).count()
    }

    fn with_slots<R>(&self, f: impl FnOnce(&Slots) -> BackendResult<R>) -> BackendResult<R> {
        let slots = self.slots.borrow();
        f(&Slots(&slots))
    }
}

struct Slots<'a>(&'a [Slot]);

impl<'a> Slots<'a> {
    fn cell(&self, id: BufferId) -> BackendResult<&'a RefCell<Vec<f32>>> {
        self.0
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(BackendError::UnknownBuffer(id))
    }

    fn get(&self, id: BufferId, len: usize) -> BackendResult<Ref<'a, Vec<f32>>> {
        let buffer = self.cell(id)?.borrow();
        check_range(id, buffer.len(), 0, len)?;
        Ok(buffer)
    }

    fn get_mut(&self, id: BufferId, len: usize) -> BackendResult<RefMut<'a, Vec<f32>>> {
        let buffer = self.cell(id)?.borrow_mut();
        check_range(id, buffer.len(), 0, len)?;
        Ok(buffer)
    }

    fn map_in_place(&self, id: BufferId, len: usize, f: impl Fn(f32) -> f32) -> BackendResult<()> {
        let mut buffer = self.get_mut(id, len)?;
        ArrayViewMut1::from(&mut buffer[..len]).mapv_inplace(f);
        Ok(())
    }

    /// `out = op(a, b)` where `out` may be the same buffer as `a` or `b`.
    fn zip_with(
        &self,
        out: BufferId,
        a: BufferId,
        b: BufferId,
        len: usize,
        op: impl Fn(f32, f32) -> f32,
    ) -> BackendResult<()> {
        let mut dst = self.get_mut(out, len)?;
        let mut dst = ArrayViewMut1::from(&mut dst[..len]);
        match (a == out, b == out) {
            (true, true) => dst.mapv_inplace(|v| op(v, v)),
            (true, false) => {
                let rhs = self.get(b, len)?;
                Zip::from(&mut dst)
                    .and(&rhs[..len])
                    .for_each(|d, &r| *d = op(*d, r));
            }
            (false, true) => {
                let lhs = self.get(a, len)?;
                Zip::from(&mut dst)
                    .and(&lhs[..len])
                    .for_each(|d, &l| *d = op(l, *d));
            }
            (false, false) => {
                let lhs = self.get(a, len)?;
                let rhs = self.get(b, len)?;
                Zip::from(&mut dst)
                    .and(&lhs[..len])
                    .and(&rhs[..len])
                    .for_each(|d, &l, &r| *d = op(l, r));
            }
        }
        Ok(())
    }
}

fn matrix_view(data: &[f32], layout: MatrixLayout) -> BackendResult<ArrayView2<'_, f32>> {
    ArrayView2::from_shape((layout.rows, layout.cols).strides((layout.ld, 1)), data)
        .map_err(|err| BackendError::Kernel(format!("matrix view: {}", err)))
}

fn matrix_view_mut(
    data: &mut [f32],
    layout: MatrixLayout,
) -> BackendResult<ArrayViewMut2<'_, f32>> {
    ArrayViewMut2::from_shape((layout.rows, layout.cols).strides((layout.ld, 1)), data)
        .map_err(|err| BackendError::Kernel(format!("matrix view: {}", err)))
}

impl ComputeBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn create(&self, data: &[f32]) -> BackendResult<BufferId> {
        let mut host = Vec::new();
        host.try_reserve_exact(data.len())
            .map_err(|_| BackendError::Allocation(data.len()))?;
        host.extend_from_slice(data);

        let mut slots = self.slots.borrow_mut();
        let index = match self.free.borrow_mut().pop() {
            Some(index) => {
                slots[index] = Some(RefCell::new(host));
                index
            }
            None => {
                slots.push(Some(RefCell::new(host)));
                slots.len() - 1
            }
        };
        Ok(BufferId(index))
    }

    fn len(&self, id: BufferId) -> BackendResult<usize> {
        self.with_slots(|slots| Ok(slots.cell(id)?.borrow().len()))
    }

    fn write(&self, id: BufferId, offset: usize, data: &[f32]) -> BackendResult<()> {
        self.with_slots(|slots| {
            let mut buffer = slots.cell(id)?.borrow_mut();
            check_range(id, buffer.len(), offset, data.len())?;
            buffer[offset..offset + data.len()].copy_from_slice(data);
            Ok(())
        })
    }

    fn read(&self, id: BufferId, offset: usize, out: &mut [f32]) -> BackendResult<()> {
        self.with_slots(|slots| {
            let buffer = slots.cell(id)?.borrow();
            check_range(id, buffer.len(), offset, out.len())?;
            out.copy_from_slice(&buffer[offset..offset + out.len()]);
            Ok(())
        })
    }

    fn release(&self, id: BufferId) -> BackendResult<()> {
        let mut slots = self.slots.borrow_mut();
        match slots.get_mut(id.0) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.free.borrow_mut().push(id.0);
                Ok(())
            }
            _ => Err(BackendError::UnknownBuffer(id)),
        }
    }

    fn copy(&self, src: BufferId, dst: BufferId, len: usize) -> BackendResult<()> {
        self.with_slots(|slots| {
            if src == dst {
                slots.get(src, len)?;
                return Ok(());
            }
            let from = slots.get(src, len)?;
            let mut to = slots.get_mut(dst, len)?;
            to[..len].copy_from_slice(&from[..len]);
            Ok(())
        })
    }

    fn scale_in_place(&self, buf: BufferId, len: usize, factor: f32) -> BackendResult<()> {
        self.with_slots(|slots| slots.map_in_place(buf, len, |v| v * factor))
    }

    fn add_scalar(&self, buf: BufferId, len: usize, value: f32) -> BackendResult<()> {
        self.with_slots(|slots| slots.map_in_place(buf, len, |v| v + value))
    }

    fn mat_vec_mul(
        &self,
        transpose: Transpose,
        matrix: BufferId,
        layout: MatrixLayout,
        vec: BufferId,
        out: BufferId,
    ) -> BackendResult<()> {
        check_distinct(out, &[matrix, vec])?;
        let (x_len, y_len) = layout.mat_vec_lens(transpose);
        self.with_slots(|slots| {
            let m = slots.get(matrix, layout.required_len())?;
            let x = slots.get(vec, x_len)?;
            let mut y = slots.get_mut(out, y_len)?;

            let a = matrix_view(&m[..layout.required_len()], layout)?;
            let x = ArrayView1::from(&x[..x_len]);
            let mut y = ArrayViewMut1::from(&mut y[..y_len]);
            y.fill(0.0);
            match transpose {
                Transpose::No => general_mat_vec_mul(1.0, &a, &x, 0.0, &mut y),
                Transpose::Yes => general_mat_vec_mul(1.0, &a.t(), &x, 0.0, &mut y),
            }
            Ok(())
        })
    }

    fn rank1_update(
        &self,
        a: BufferId,
        b: BufferId,
        scale: f32,
        matrix: BufferId,
        layout: MatrixLayout,
    ) -> BackendResult<()> {
        check_distinct(matrix, &[a, b])?;
        self.with_slots(|slots| {
            let lhs = slots.get(a, layout.rows)?;
            let rhs = slots.get(b, layout.cols)?;
            let mut m = slots.get_mut(matrix, layout.required_len())?;

            let column = ArrayView1::from(&lhs[..layout.rows]).insert_axis(Axis(1));
            let row = ArrayView1::from(&rhs[..layout.cols]).insert_axis(Axis(0));
            let required = layout.required_len();
            let mut m = matrix_view_mut(&mut m[..required], layout)?;
            general_mat_mul(scale, &column, &row, 1.0, &mut m);
            Ok(())
        })
    }

    fn elementwise_subtract(
        &self,
        out: BufferId,
        a: BufferId,
        b: BufferId,
        len: usize,
    ) -> BackendResult<()> {
        self.with_slots(|slots| slots.zip_with(out, a, b, len, |l, r| l - r))
    }

    fn elementwise_multiply(
        &self,
        out: BufferId,
        a: BufferId,
        b: BufferId,
        len: usize,
    ) -> BackendResult<()> {
        self.with_slots(|slots| slots.zip_with(out, a, b, len, |l, r| l * r))
    }

    fn sum_reduce(&self, buf: BufferId, len: usize) -> BackendResult<f32> {
        self.with_slots(|slots| {
            let buffer = slots.get(buf, len)?;
            Ok(ArrayView1::from(&buffer[..len]).sum())
        })
    }

    fn max_reduce(&self, buf: BufferId, len: usize) -> BackendResult<f32> {
        self.with_slots(|slots| {
            let buffer = slots.get(buf, len)?;
            Ok(ArrayView1::from(&buffer[..len]).fold(f32::NEG_INFINITY, |acc, &v| acc.max(v)))
        })
    }

    fn apply_scaled_tanh(&self, buf: BufferId, len: usize) -> BackendResult<()> {
        self.with_slots(|slots| slots.map_in_place(buf, len, |v| ScaledTanh.compute(v)))
    }

    fn apply_scaled_tanh_derivative(
        &self,
        out: BufferId,
        activations: BufferId,
        len: usize,
    ) -> BackendResult<()> {
        self.with_slots(|slots| {
            if out == activations {
                return slots.map_in_place(out, len, |y| ScaledTanh.derivative_from_output(y));
            }
            let source = slots.get(activations, len)?;
            let mut dst = slots.get_mut(out, len)?;
            Zip::from(ArrayViewMut1::from(&mut dst[..len]))
                .and(&source[..len])
                .for_each(|d, &y| *d = ScaledTanh.derivative_from_output(y));
            Ok(())
        })
    }

    fn apply_exp(&self, buf: BufferId, len: usize) -> BackendResult<()> {
        self.with_slots(|slots| slots.map_in_place(buf, len, f32::exp))
    }
}
