//! A hand-rolled worker-thread pool: one explicit thread-pool handle per
//! open database, no process-wide singletons besides a default environment.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Relative scheduling priority of a submitted job. `Background` jobs (e.g.
/// leaf compaction) are drained only after all `Normal` jobs currently queued
/// have started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Background,
    Normal,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Task {
    priority: Priority,
    job: Job,
}

/// A fixed-size pool of worker threads draining a shared priority queue.
pub struct PriorityPool {
    sender: Sender<Task>,
    workers: Vec<JoinHandle<()>>,
}

impl PriorityPool {
    pub fn new(num_threads: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));
        let pending: Arc<Mutex<Vec<Task>>> = Arc::new(Mutex::new(Vec::new()));

        let mut workers = Vec::with_capacity(num_threads.max(1));
        for _ in 0..num_threads.max(1) {
            let receiver = Arc::clone(&receiver);
            let pending = Arc::clone(&pending);
            workers.push(std::thread::spawn(move || {
                worker_loop(receiver, pending);
            }));
        }
        Self { sender, workers }
    }

    /// Submit a job at the given priority. Jobs run in roughly
    /// priority-then-submission order, not strict FIFO, since multiple
    /// worker threads drain the queue concurrently.
    pub fn submit<F>(&self, priority: Priority, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.sender.send(Task {
            priority,
            job: Box::new(job),
        });
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(receiver: Arc<Mutex<Receiver<Task>>>, pending: Arc<Mutex<Vec<Task>>>) {
    loop {
        let task = {
            let mut buf = pending.lock().expect("pool buffer mutex poisoned");
            // Drain whatever is immediately available into the shared buffer,
            // then pick the highest-priority task out of it.
            if buf.is_empty() {
                let rx = receiver.lock().expect("pool receiver mutex poisoned");
                match rx.recv() {
                    Ok(task) => buf.push(task),
                    Err(_) => return,
                }
                while let Ok(task) = rx.try_recv() {
                    buf.push(task);
                }
            }
            let best = buf
                .iter()
                .enumerate()
                .max_by_key(|(_, t)| t.priority)
                .map(|(i, _)| i);
            match best {
                Some(i) => Some(buf.remove(i)),
                None => None,
            }
        };
        if let Some(task) = task {
            (task.job)();
        }
    }
}

impl Drop for PriorityPool {
    fn drop(&mut self) {
        // Dropping `sender` unblocks all workers' `recv()` calls once the
        // queue drains, letting them exit their loop.
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_all_submitted_jobs() {
        let pool = PriorityPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(Priority::Normal, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn background_and_normal_jobs_both_complete() {
        let pool = PriorityPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for i in 0..20 {
            let counter = Arc::clone(&counter);
            let priority = if i % 2 == 0 {
                Priority::Background
            } else {
                Priority::Normal
            };
            pool.submit(priority, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }
}
