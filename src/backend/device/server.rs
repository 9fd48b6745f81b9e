use std::sync::mpsc::Receiver;

use super::{kernel, Command, Kernel};
use crate::{
    backend::{check_distinct, check_range, BackendResult, BufferId},
    error::BackendError,
};

/// Owns device memory and executes commands in arrival order.
#[derive(Debug, Default)]
pub(super) struct DeviceServer {
    memory: Vec<Option<Vec<f32>>>,
    free: Vec<usize>,
}

impl DeviceServer {
    pub(super) fn serve(mut self, commands: Receiver<Command>) {
        // A dropped event receiver only means the caller stopped waiting.
        while let Ok(command) = commands.recv() {
            match command {
                Command::Create { data, event } => {
                    let _ = event.send(Ok(self.create(data)));
                }
                Command::Length { id, event } => {
                    let _ = event.send(self.slot(id).map(|buffer| buffer.len()));
                }
                Command::Write {
                    id,
                    offset,
                    data,
                    event,
                } => {
                    let _ = event.send(self.write(id, offset, &data));
                }
                Command::Read {
                    id,
                    offset,
                    len,
                    event,
                } => {
                    let _ = event.send(self.read(id, offset, len));
                }
                Command::Release { id, event } => {
                    let _ = event.send(self.release(id));
                }
                Command::Launch { kernel, event } => {
                    let name = kernel.name();
                    let result = self.execute(kernel);
                    if let Err(err) = &result {
                        log::debug!("kernel `{}` failed: {}", name, err);
                    }
                    let _ = event.send(result);
                }
                Command::Shutdown => break,
            }
        }
        log::debug!(
            "device worker exiting with {} live buffers",
            self.memory.iter().filter(|slot| slot.is_some()).count()
        );
    }

    fn create(&mut self, data: Vec<f32>) -> BufferId {
        let index = match self.free.pop() {
            Some(index) => {
                self.memory[index] = Some(data);
                index
            }
            None => {
                self.memory.push(Some(data));
                self.memory.len() - 1
            }
        };
        log::debug!("device buffer {} allocated", index);
        BufferId(index)
    }

    fn release(&mut self, id: BufferId) -> BackendResult<()> {
        match self.memory.get_mut(id.0) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.free.push(id.0);
                log::debug!("device buffer {} released", id.0);
                Ok(())
            }
            _ => Err(BackendError::UnknownBuffer(id)),
        }
    }

    fn slot(&self, id: BufferId) -> BackendResult<&Vec<f32>> {
        self.memory
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(BackendError::UnknownBuffer(id))
    }

    fn buffer(&self, id: BufferId, len: usize) -> BackendResult<&[f32]> {
        let buffer = self.slot(id)?;
        check_range(id, buffer.len(), 0, len)?;
        Ok(&buffer[..len])
    }

    /// Like [`Self::buffer`], but `None` when `id` is the output currently being written.
    fn operand(&self, id: BufferId, out: BufferId, len: usize) -> BackendResult<Option<&[f32]>> {
        if id == out {
            Ok(None)
        } else {
            self.buffer(id, len).map(Some)
        }
    }

    fn write(&mut self, id: BufferId, offset: usize, data: &[f32]) -> BackendResult<()> {
        let buffer = self
            .memory
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(BackendError::UnknownBuffer(id))?;
        check_range(id, buffer.len(), offset, data.len())?;
        buffer[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, id: BufferId, offset: usize, len: usize) -> BackendResult<Vec<f32>> {
        let buffer = self.slot(id)?;
        check_range(id, buffer.len(), offset, len)?;
        Ok(buffer[offset..offset + len].to_vec())
    }

    /// Detach `out` from memory while `f` writes its first `len` elements, so inputs can be
    /// borrowed from the remaining buffers.
    fn with_output<R>(
        &mut self,
        out: BufferId,
        len: usize,
        f: impl FnOnce(&Self, &mut [f32]) -> BackendResult<R>,
    ) -> BackendResult<R> {
        let mut dst = self
            .memory
            .get_mut(out.0)
            .and_then(Option::take)
            .ok_or(BackendError::UnknownBuffer(out))?;
        let result = check_range(out, dst.len(), 0, len).and_then(|_| f(self, &mut dst[..len]));
        self.memory[out.0] = Some(dst);
        result
    }

    fn execute(&mut self, kernel: Kernel) -> BackendResult<Option<f32>> {
        match kernel {
            Kernel::Copy { src, dst, len } => self.with_output(dst, len, |server, to| {
                if let Some(from) = server.operand(src, dst, len)? {
                    kernel::nd_range(len, |gid| to[gid] = from[gid]);
                }
                Ok(None)
            }),
            Kernel::Scale { buf, len, factor } => self.with_output(buf, len, |_, data| {
                kernel::nd_range(len, |gid| data[gid] *= factor);
                Ok(None)
            }),
            Kernel::AddScalar { buf, len, value } => self.with_output(buf, len, |_, data| {
                kernel::nd_range(len, |gid| data[gid] += value);
                Ok(None)
            }),
            Kernel::Gemv {
                transpose,
                matrix,
                layout,
                x,
                y,
            } => {
                check_distinct(y, &[matrix, x])?;
                let (x_len, y_len) = layout.mat_vec_lens(transpose);
                self.with_output(y, y_len, |server, out| {
                    let m = server.buffer(matrix, layout.required_len())?;
                    let x = server.buffer(x, x_len)?;
                    kernel::gemv(transpose, m, layout, x, out);
                    Ok(None)
                })
            }
            Kernel::Ger {
                x,
                y,
                alpha,
                matrix,
                layout,
            } => {
                check_distinct(matrix, &[x, y])?;
                self.with_output(matrix, layout.required_len(), |server, m| {
                    let x = server.buffer(x, layout.rows)?;
                    let y = server.buffer(y, layout.cols)?;
                    kernel::ger(alpha, x, y, m, layout);
                    Ok(None)
                })
            }
            Kernel::Subtract { out, a, b, len } => self.with_output(out, len, |server, dst| {
                let (a, b) = (server.operand(a, out, len)?, server.operand(b, out, len)?);
                kernel::binary(dst, a, b, |l, r| l - r);
                Ok(None)
            }),
            Kernel::Multiply { out, a, b, len } => self.with_output(out, len, |server, dst| {
                let (a, b) = (server.operand(a, out, len)?, server.operand(b, out, len)?);
                kernel::binary(dst, a, b, |l, r| l * r);
                Ok(None)
            }),
            Kernel::Sum { buf, len } => {
                let data = self.buffer(buf, len)?;
                Ok(Some(data.iter().sum()))
            }
            Kernel::Max { buf, len } => {
                let data = self.buffer(buf, len)?;
                Ok(Some(data.iter().fold(f32::NEG_INFINITY, |acc, &v| acc.max(v))))
            }
            Kernel::ScaledTanh { buf, len } => self.with_output(buf, len, |_, data| {
                kernel::scaled_tanh(data);
                Ok(None)
            }),
            Kernel::ScaledTanhDerivative {
                out,
                activations,
                len,
            } => self.with_output(out, len, |server, dst| {
                let activations = server.operand(activations, out, len)?;
                kernel::scaled_tanh_derivative(dst, activations);
                Ok(None)
            }),
            Kernel::Exp { buf, len } => self.with_output(buf, len, |_, data| {
                kernel::nd_range(len, |gid| data[gid] = data[gid].exp());
                Ok(None)
            }),
        }
    }
}
