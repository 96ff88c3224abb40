use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::{error::ScanError, Orientation, ParsedTicket, TicketScanner};

struct Job {
    bytes: Vec<u8>,
    orientation: Option<Orientation>,
    reply: Sender<Result<ParsedTicket, ScanError>>,
}

pub struct ScanPool {
    scanner: Arc<TicketScanner>,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ScanPool {
    pub fn new(scanner: TicketScanner) -> std::io::Result<Self> {
        let workers = scanner.config().performance.workers;
        Self::with_workers(scanner, workers)
    }

    pub fn with_workers(scanner: TicketScanner, workers: usize) -> std::io::Result<Self> {
        let workers = workers.max(1);
        let scanner = Arc::new(scanner);
        let (sender, receiver) = bounded::<Job>(workers * 2);
        let handles = (0..workers)
            .map(|index| {
                let scanner = Arc::clone(&scanner);
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("scan-worker-{index}"))
                    .spawn(move || run_worker(&scanner, receiver))
            })
            .collect::<std::io::Result<Vec<_>>>()?;
        log::debug!("Started {workers} scan workers");
        Ok(Self {
            scanner,
            sender: Some(sender),
            workers: handles,
        })
    }

    pub fn scanner(&self) -> &TicketScanner {
        &self.scanner
    }

    /// Queues a photo. The returned channel yields exactly one result, or
    /// disconnects if the pool is torn down first.
    pub fn submit(
        &self,
        bytes: Vec<u8>,
        orientation: Option<Orientation>,
    ) -> Receiver<Result<ParsedTicket, ScanError>> {
        let (reply, result) = bounded(1);
        let job = Job {
            bytes,
            orientation,
            reply,
        };
        if let Some(sender) = &self.sender {
            if sender.send(job).is_err() {
                log::warn!("Scan queue is closed, dropping job");
            }
        }
        result
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        drop(sender);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::warn!("Scan worker panicked");
            }
        }
        self.scanner.shutdown();
        log::debug!("Scan pool stopped");
    }
}

impl Drop for ScanPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(scanner: &TicketScanner, jobs: Receiver<Job>) {
    for job in jobs {
        let result = scanner.scan(&job.bytes, job.orientation);
        // The submitter may have stopped waiting.
        let _ = job.reply.send(result);
    }
}
