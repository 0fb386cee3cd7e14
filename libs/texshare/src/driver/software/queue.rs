// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Command queue with a worker thread standing in for the GPU.

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, unbounded};
use parking_lot::{Condvar, Mutex};

use super::SoftAdapter;
use super::memory::SoftMemory;
use crate::error::{Result, ShareError};

pub(crate) enum Command {
    Fill { memory: Arc<SoftMemory>, texel: Vec<u8> },
    Write { memory: Arc<SoftMemory>, data: Vec<u8> },
    /// Completion marker for a fence.
    Marker,
}

struct Batch {
    seq: u64,
    commands: Vec<Command>,
}

#[derive(Default)]
struct Progress {
    completed: Mutex<u64>,
    changed: Condvar,
}

/// Single-threaded submission side of a software queue.
pub(crate) struct SoftQueue {
    pending: RefCell<Vec<Command>>,
    /// Sequence number of the last submitted batch.
    submitted: Cell<u64>,
    progress: Arc<Progress>,
    sender: Option<Sender<Batch>>,
    worker: Option<JoinHandle<()>>,
}

impl SoftQueue {
    pub(crate) fn spawn(adapter: Arc<SoftAdapter>) -> Result<Self> {
        let (sender, receiver) = unbounded::<Batch>();
        let progress = Arc::new(Progress::default());
        let worker_progress = Arc::clone(&progress);
        let latency = adapter.spec.command_latency;

        let worker = std::thread::Builder::new()
            .name("texshare-soft-gpu".to_string())
            .spawn(move || {
                while let Ok(batch) = receiver.recv() {
                    if !latency.is_zero() {
                        std::thread::sleep(latency);
                    }
                    for command in batch.commands {
                        execute(command);
                    }
                    *worker_progress.completed.lock() = batch.seq;
                    worker_progress.changed.notify_all();
                }
                tracing::trace!("[SoftwareDriver] Queue worker for {} stopped", adapter.info.name);
            })
            .map_err(|e| ShareError::Driver(format!("Failed to spawn queue worker: {}", e)))?;

        Ok(Self {
            pending: RefCell::new(Vec::new()),
            submitted: Cell::new(0),
            progress,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub(crate) fn push(&self, command: Command) {
        self.pending.borrow_mut().push(command);
    }

    /// Sequence number the pending batch will get when submitted.
    pub(crate) fn pending_seq(&self) -> u64 {
        self.submitted.get() + 1
    }

    /// Submit the pending batch, if any.
    pub(crate) fn flush(&self) -> Result<()> {
        let commands = std::mem::take(&mut *self.pending.borrow_mut());
        if commands.is_empty() {
            return Ok(());
        }
        let seq = self.pending_seq();
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| ShareError::DeviceLost("queue worker stopped".into()))?;
        sender
            .send(Batch { seq, commands })
            .map_err(|_| ShareError::DeviceLost("queue worker stopped".into()))?;
        self.submitted.set(seq);
        Ok(())
    }

    pub(crate) fn completed(&self) -> u64 {
        *self.progress.completed.lock()
    }

    /// Submit and block until everything submitted has executed.
    pub(crate) fn finish(&self, bound: Duration) -> Result<()> {
        self.flush()?;
        let target = self.submitted.get();
        let deadline = Instant::now() + bound;
        let mut completed = self.progress.completed.lock();
        while *completed < target {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ShareError::SyncTimeout { waited: bound });
            }
            self.progress.changed.wait_for(&mut completed, remaining);
        }
        Ok(())
    }
}

impl Drop for SoftQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("[SoftwareDriver] Queue worker panicked");
            }
        }
    }
}

fn execute(command: Command) {
    match command {
        Command::Fill { memory, texel } => memory.fill(&texel),
        Command::Write { memory, data } => {
            if let Err(e) = memory.write(&data) {
                tracing::warn!("[SoftwareDriver] Dropped write: {}", e);
            }
        }
        Command::Marker => {}
    }
}
