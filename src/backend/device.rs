//! Accelerator-style backend.
//!
//! A device worker thread owns all device memory. The client side enqueues [`Command`]s on a
//! single queue and every primitive blocks on the [`Event`] of the command it just issued, so
//! two primitives never run concurrently from the caller's point of view.

mod kernel;
mod server;

use std::{
    sync::mpsc::{self, Receiver, Sender},
    thread::{self, JoinHandle},
};

use crate::{
    backend::{BackendResult, BufferId, ComputeBackend, MatrixLayout, Transpose},
    error::BackendError,
};

pub use kernel::Kernel;

use server::DeviceServer;

pub(crate) enum Command {
    Create {
        data: Vec<f32>,
        event: Sender<BackendResult<BufferId>>,
    },
    Length {
        id: BufferId,
        event: Sender<BackendResult<usize>>,
    },
    Write {
        id: BufferId,
        offset: usize,
        data: Vec<f32>,
        event: Sender<BackendResult<()>>,
    },
    Read {
        id: BufferId,
        offset: usize,
        len: usize,
        event: Sender<BackendResult<Vec<f32>>>,
    },
    Release {
        id: BufferId,
        event: Sender<BackendResult<()>>,
    },
    Launch {
        kernel: Kernel,
        event: Sender<BackendResult<Option<f32>>>,
    },
    Shutdown,
}

/// Completion event of an enqueued command.
#[must_use = "an event must be waited on to observe the command's completion"]
pub struct Event<T> {
    receiver: Receiver<BackendResult<T>>,
}

impl<T> Event<T> {
    /// Block until the device has executed the command.
    pub fn wait(self) -> BackendResult<T> {
        self.receiver.recv().map_err(|_| BackendError::DeviceLost)?
    }
}

/// Runs every primitive as a kernel on a dedicated device thread.
pub struct DeviceBackend {
    queue: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceBackend {
    pub fn new() -> BackendResult<Self> {
        let (queue, commands) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("sgd-net-device".into())
            .spawn(move || DeviceServer::default().serve(commands))
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;
        log::debug!("device worker started");

        Ok(Self {
            queue,
            worker: Some(worker),
        })
    }

    fn enqueue<T>(
        &self,
        command: impl FnOnce(Sender<BackendResult<T>>) -> Command,
    ) -> BackendResult<Event<T>> {
        let (event, receiver) = mpsc::channel();
        self.queue
            .send(command(event))
            .map_err(|_| BackendError::DeviceLost)?;
        Ok(Event { receiver })
    }

    /// Enqueue `kernel` without waiting for it.
    pub fn enqueue_kernel(&self, kernel: Kernel) -> BackendResult<Event<Option<f32>>> {
        self.enqueue(|event| Command::Launch { kernel, event })
    }

    fn run(&self, kernel: Kernel) -> BackendResult<()> {
        self.enqueue_kernel(kernel)?.wait().map(|_| ())
    }

    fn reduce(&self, kernel: Kernel) -> BackendResult<f32> {
        let name = kernel.name();
        self.enqueue_kernel(kernel)?
            .wait()?
            .ok_or_else(|| BackendError::Kernel(name.to_string()))
    }
}

impl Drop for DeviceBackend {
    fn drop(&mut self) {
        // Commands already in the queue are executed before the worker sees `Shutdown`.
        let _ = self.queue.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("device worker panicked");
            }
        }
        log::debug!("device worker stopped");
    }
}

impl ComputeBackend for DeviceBackend {
    fn name(&self) -> &'static str {
        "device"
    }

    fn create(&self, data: &[f32]) -> BackendResult<BufferId> {
        let data = data.to_vec();
        self.enqueue(|event| Command::Create { data, event })?.wait()
    }

    fn len(&self, id: BufferId) -> BackendResult<usize> {
        self.enqueue(|event| Command::Length { id, event })?.wait()
    }

    fn write(&self, id: BufferId, offset: usize, data: &[f32]) -> BackendResult<()> {
        let data = data.to_vec();
        self.enqueue(|event| Command::Write {
            id,
            offset,
            data,
            event,
        })?
        .wait()
    }

    fn read(&self, id: BufferId, offset: usize, out: &mut [f32]) -> BackendResult<()> {
        let len = out.len();
        let data = self
            .enqueue(|event| Command::Read {
                id,
                offset,
                len,
                event,
            })?
            .wait()?;
        out.copy_from_slice(&data);
        Ok(())
    }

    fn release(&self, id: BufferId) -> BackendResult<()> {
        self.enqueue(|event| Command::Release { id, event })?.wait()
    }

    fn copy(&self, src: BufferId, dst: BufferId, len: usize) -> BackendResult<()> {
        self.run(Kernel::Copy { src, dst, len })
    }

    fn scale_in_place(&self, buf: BufferId, len: usize, factor: f32) -> BackendResult<()> {
        self.run(Kernel::Scale { buf, len, factor })
    }

    fn add_scalar(&self, buf: BufferId, len: usize, value: f32) -> BackendResult<()> {
        self.run(Kernel::AddScalar { buf, len, value })
    }

    fn mat_vec_mul(
        &self,
        transpose: Transpose,
        matrix: BufferId,
        layout: MatrixLayout,
        vec: BufferId,
        out: BufferId,
    ) -> BackendResult<()> {
        self.run(Kernel::Gemv {
            transpose,
            matrix,
            layout,
            x: vec,
            y: out,
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
        self.run(Kernel::Ger {
            x: a,
            y: b,
            alpha: scale,
            matrix,
            layout,
        })
    }

    fn elementwise_subtract(
        &self,
        out: BufferId,
        a: BufferId,
        b: BufferId,
        len: usize,
    ) -> BackendResult<()> {
        self.run(Kernel::Subtract { out, a, b, len })
    }

    fn elementwise_multiply(
        &self,
        out: BufferId,
        a: BufferId,
        b: BufferId,
        len: usize,
    ) -> BackendResult<()> {
        self.run(Kernel::Multiply { out, a, b, len })
    }

    fn sum_reduce(&self, buf: BufferId, len: usize) -> BackendResult<f32> {
        self.reduce(Kernel::Sum { buf, len })
    }

    fn max_reduce(&self, buf: BufferId, len: usize) -> BackendResult<f32> {
        self.reduce(Kernel::Max { buf, len })
    }

    fn apply_scaled_tanh(&self, buf: BufferId, len: usize) -> BackendResult<()> {
        self.run(Kernel::ScaledTanh { buf, len })
    }

    fn apply_scaled_tanh_derivative(
        &self,
        out: BufferId,
        activations: BufferId,
        len: usize,
    ) -> BackendResult<()> {
        self.run(Kernel::ScaledTanhDerivative {
            out,
            activations,
            len,
        })
    }

    fn apply_exp(&self, buf: BufferId, len: usize) -> BackendResult<()> {
        self.run(Kernel::Exp { buf, len })
    }
}
