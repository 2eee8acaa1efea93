use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread::{self, JoinHandle};

use lode_error::{LodeError, Result};

/// A finished job: its id and either the result or the panic message.
pub type Completion<R> = (usize, std::result::Result<R, String>);

/// Fixed set of worker threads fed through a shared job channel. Every
/// submitted job gets an id which comes back with its result.
pub struct WorkerPool<J, R> {
    jobs: Option<mpsc::Sender<(usize, J)>>,
    completions: mpsc::Receiver<Completion<R>>,
    workers: Vec<JoinHandle<()>>,
    next_id: usize,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_string())
}

impl<J, R> WorkerPool<J, R>
where
    J: Send + 'static,
    R: Send + 'static,
{
    pub fn new<F>(size: usize, work: F) -> Result<Self>
    where
        F: Fn(J) -> R + Send + Sync + 'static,
    {
        let (job_tx, job_rx) = mpsc::channel::<(usize, J)>();
        let (done_tx, done_rx) = mpsc::channel::<Completion<R>>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let work = Arc::new(work);

        let mut workers = Vec::with_capacity(size.max(1));
        for index in 0..size.max(1) {
            let job_rx = Arc::clone(&job_rx);
            let done_tx = done_tx.clone();
            let work = Arc::clone(&work);
            let handle = thread::Builder::new()
                .name(format!("lode-worker-{index}"))
                .spawn(move || {
                    loop {
                        let next = job_rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
                        let Ok((id, job)) = next else {
                            break;
                        };
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(job)))
                            .map_err(|payload| panic_message(payload.as_ref()));
                        if done_tx.send((id, outcome)).is_err() {
                            break;
                        }
                    }
                })?;
            workers.push(handle);
        }

        Ok(Self {
            jobs: Some(job_tx),
            completions: done_rx,
            workers,
            next_id: 0,
        })
    }

    /// Submits a job and returns its id.
    pub fn enq(&mut self, job: J) -> Result<usize> {
        let sender = self
            .jobs
            .as_ref()
            .ok_or_else(|| LodeError::Io(io::Error::other("worker pool is stopped")))?;
        let id = self.next_id;
        sender
            .send((id, job))
            .map_err(|_| LodeError::Io(io::Error::other("worker pool has no running workers")))?;
        self.next_id += 1;
        Ok(id)
    }

    /// Blocks until some job finishes. A job that panicked comes back as
    /// `Err` carrying the panic message, still paired with its id.
    pub fn deq(&self) -> Result<Completion<R>> {
        self.completions
            .recv()
            .map_err(|_| LodeError::Io(io::Error::other("worker pool has no running workers")))
    }
}

impl<J, R> WorkerPool<J, R> {
    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Closes the job channel and joins every worker. Safe to call twice.
    pub fn stop(&mut self) {
        drop(self.jobs.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl<J, R> Drop for WorkerPool<J, R> {
    fn drop(&mut self) {
        self.stop();
    }
}
