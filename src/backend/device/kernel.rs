use crate::{
    activation::{Activation, ScaledTanh},
    backend::{BufferId, MatrixLayout, Transpose},
};

/// A unit of work executed by the device worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Kernel {
    Copy {
        src: BufferId,
        dst: BufferId,
        len: usize,
    },
    Scale {
        buf: BufferId,
        len: usize,
        factor: f32,
    },
    AddScalar {
        buf: BufferId,
        len: usize,
        value: f32,
    },
    Gemv {
        transpose: Transpose,
        matrix: BufferId,
        layout: MatrixLayout,
        x: BufferId,
        y: BufferId,
    },
    Ger {
        x: BufferId,
        y: BufferId,
        alpha: f32,
        matrix: BufferId,
        layout: MatrixLayout,
    },
    Subtract {
        out: BufferId,
        a: BufferId,
        b: BufferId,
        len: usize,
    },
    Multiply {
        out: BufferId,
        a: BufferId,
        b: BufferId,
        len: usize,
    },
    Sum {
        buf: BufferId,
        len: usize,
    },
    Max {
        buf: BufferId,
        len: usize,
    },
    ScaledTanh {
        buf: BufferId,
        len: usize,
    },
    ScaledTanhDerivative {
        out: BufferId,
        activations: BufferId,
        len: usize,
    },
    Exp {
        buf: BufferId,
        len: usize,
    },
}

impl Kernel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Copy { .. } => "copy",
            Self::Scale { .. } => "scale",
            Self::AddScalar { .. } => "add_scalar",
            Self::Gemv { .. } => "gemv",
            Self::Ger { .. } => "ger",
            Self::Subtract { .. } => "elementwise_subtract",
            Self::Multiply { .. } => "elementwise_multiply",
            Self::Sum { .. } => "sum",
            Self::Max { .. } => "max",
            Self::ScaledTanh { .. } => "scaled_tanh",
            Self::ScaledTanhDerivative { .. } => "scaled_tanh_derivative",
            Self::Exp { .. } => "exp",
        }
    }
}

/// Launch `work_item` once for every global id in `0..global_size`.
pub(super) fn nd_range(global_size: usize, mut work_item: impl FnMut(usize)) {
    for gid in 0..global_size {
        work_item(gid);
    }
}

pub(super) fn scaled_tanh(data: &mut [f32]) {
    nd_range(data.len(), |gid| data[gid] = ScaledTanh.compute(data[gid]));
}

pub(super) fn scaled_tanh_derivative(out: &mut [f32], activations: Option<&[f32]>) {
    nd_range(out.len(), |gid| {
        let y = activations.map_or(out[gid], |a| a[gid]);
        out[gid] = ScaledTanh.derivative_from_output(y);
    });
}

/// One work-item per output element, each computing a full dot product.
pub(super) fn gemv(
    transpose: Transpose,
    m: &[f32],
    layout: MatrixLayout,
    x: &[f32],
    y: &mut [f32],
) {
    match transpose {
        Transpose::No => nd_range(layout.rows, |row| {
            let mut acc = 0.0;
            for col in 0..layout.cols {
                acc += m[layout.index(row, col)] * x[col];
            }
            y[row] = acc;
        }),
        Transpose::Yes => nd_range(layout.cols, |col| {
            let mut acc = 0.0;
            for row in 0..layout.rows {
                acc += m[layout.index(row, col)] * x[row];
            }
            y[col] = acc;
        }),
    }
}

pub(super) fn ger(alpha: f32, x: &[f32], y: &[f32], m: &mut [f32], layout: MatrixLayout) {
    nd_range(layout.rows * layout.cols, |gid| {
        let (row, col) = (gid / layout.cols, gid % layout.cols);
        m[layout.index(row, col)] += alpha * x[row] * y[col];
    });
}

/// `out = op(a, b)`. A `None` operand reads from `out` itself.
pub(super) fn binary(
    out: &mut [f32],
    a: Option<&[f32]>,
    b: Option<&[f32]>,
    op: impl Fn(f32, f32) -> f32,
) {
    nd_range(out.len(), |gid| {
        let lhs = a.map_or(out[gid], |a| a[gid]);
        let rhs = b.map_or(out[gid], |b| b[gid]);
        out[gid] = op(lhs, rhs);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemv_transposed_skips_padding_column() {
        let m = [1.0, 2.0, 100.0, 3.0, 4.0, 100.0];
        let mut y = [0.0; 2];
        gemv(
            Transpose::Yes,
            &m,
            MatrixLayout::with_ld(2, 2, 3),
            &[1.0, 1.0],
            &mut y,
        );
        assert_eq!(y, [4.0, 6.0]);
    }

    #[test]
    fn ger_touches_only_addressed_columns() {
        let mut m = [0.0, 0.0, 7.0, 0.0, 0.0, 7.0];
        ger(2.0, &[1.0, -1.0], &[1.0, 0.5], &mut m, MatrixLayout::with_ld(2, 2, 3));
        assert_eq!(m, [2.0, 1.0, 7.0, -2.0, -1.0, 7.0]);
    }

    #[test]
    fn binary_reads_aliased_operand_from_output() {
        let mut out = [4.0, 6.0];
        binary(&mut out, None, Some(&[1.0, 2.0]), |l, r| l - r);
        assert_eq!(out, [3.0, 4.0]);
        binary(&mut out, Some(&[1.0, 1.0]), None, |l, r| l - r);
        assert_eq!(out, [-2.0, -3.0]);
    }
}
