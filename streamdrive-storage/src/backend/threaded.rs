use super::{AsyncReadBackend, IssueFailure, NativeCompletion, NativeRead};
use crate::IssueError;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

// Thread that tries to take reads out of the request channel and ends when the finish channel is
// signalled
struct ReadWorkerThread {
    finish_tx: Sender<()>,
    join_handle: JoinHandle<()>,
}

impl ReadWorkerThread {
    fn new(
        request_rx: Receiver<NativeRead>,
        completion_tx: Sender<NativeCompletion>,
        cancel_flags: Arc<Vec<AtomicBool>>,
        thread_index: usize,
    ) -> std::io::Result<Self> {
        let (finish_tx, finish_rx) = crossbeam_channel::bounded(1);
        let join_handle = std::thread::Builder::new()
            .name(format!("Read Thread {}", thread_index))
            .spawn(move || {
                profiling::register_thread!(&format!("ReadWorkerThread {}", thread_index));
                loop {
                    crossbeam_channel::select! {
                        recv(request_rx) -> msg => {
                            let read = match msg {
                                Ok(read) => read,
                                // Backend was dropped
                                Err(_) => return,
                            };

                            let completion = Self::perform_read(read, &cancel_flags);
                            if completion_tx.send(completion).is_err() {
                                return;
                            }
                        },
                        recv(finish_rx) -> _msg => {
                            return;
                        }
                    }
                }
            })?;

        Ok(ReadWorkerThread {
            finish_tx,
            join_handle,
        })
    }

    fn perform_read(
        read: NativeRead,
        cancel_flags: &[AtomicBool],
    ) -> NativeCompletion {
        let NativeRead {
            slot,
            file,
            offset,
            length,
            mut buffer,
        } = read;

        if cancel_flags[slot].swap(false, Ordering::AcqRel) {
            log::trace!("Read in slot {} canceled before it started", slot);
            return NativeCompletion {
                slot,
                buffer,
                result: Ok(0),
                canceled: true,
            };
        }

        profiling::scope!("NativeFile::read_at");
        log::trace!("Start read slot {} offset {} length {}", slot, offset, length);
        let result = file.read_at(&mut buffer.as_mut_slice()[..length], offset);
        NativeCompletion {
            slot,
            buffer,
            result,
            canceled: false,
        }
    }
}

/// Spawns one worker thread per IO channel, proxies reads to/from them, and joins the threads
/// when dropped. Each worker does a blocking positioned read, so the number of workers bounds the
/// number of reads the OS sees at once.
pub struct ThreadedBackend {
    worker_threads: Vec<ReadWorkerThread>,
    request_tx: Sender<NativeRead>,
    completion_rx: Receiver<NativeCompletion>,
    cancel_flags: Arc<Vec<AtomicBool>>,
    outstanding: usize,
}

impl ThreadedBackend {
    pub fn new(
        slot_count: usize,
        worker_count: usize,
    ) -> std::io::Result<Self> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<NativeRead>();
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded::<NativeCompletion>();
        let cancel_flags: Arc<Vec<AtomicBool>> =
            Arc::new((0..slot_count).map(|_| AtomicBool::new(false)).collect());

        let mut worker_threads = Vec::with_capacity(worker_count);
        for thread_index in 0..worker_count.max(1) {
            let worker = ReadWorkerThread::new(
                request_rx.clone(),
                completion_tx.clone(),
                cancel_flags.clone(),
                thread_index,
            )?;
            worker_threads.push(worker);
        }

        Ok(ThreadedBackend {
            worker_threads,
            request_tx,
            completion_rx,
            cancel_flags,
            outstanding: 0,
        })
    }
}

impl Drop for ThreadedBackend {
    fn drop(&mut self) {
        for worker_thread in &self.worker_threads {
            let _ = worker_thread.finish_tx.send(());
        }

        for worker_thread in self.worker_threads.drain(..) {
            if worker_thread.join_handle.join().is_err() {
                log::error!("Read worker thread panicked");
            }
        }
    }
}

impl AsyncReadBackend for ThreadedBackend {
    fn issue_read(
        &mut self,
        read: NativeRead,
    ) -> Result<(), IssueFailure> {
        if read.slot >= self.cancel_flags.len() {
            return Err(IssueFailure {
                error: IssueError::ResourceExhausted,
                read,
            });
        }

        self.cancel_flags[read.slot].store(false, Ordering::Release);
        match self.request_tx.send(read) {
            Ok(()) => {
                self.outstanding += 1;
                Ok(())
            }
            Err(e) => Err(IssueFailure {
                error: IssueError::Os(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "read worker threads are not running",
                )),
                read: e.into_inner(),
            }),
        }
    }

    fn poll_completions(
        &mut self,
        completions: &mut Vec<NativeCompletion>,
    ) {
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.outstanding -= 1;
            completions.push(completion);
        }
    }

    fn cancel(
        &mut self,
        slot: usize,
    ) {
        if let Some(flag) = self.cancel_flags.get(slot) {
            flag.store(true, Ordering::Release);
        }
    }

    fn wait_for_all(
        &mut self,
        completions: &mut Vec<NativeCompletion>,
    ) {
        profiling::scope!("ThreadedBackend::wait_for_all");
        while self.outstanding > 0 {
            match self.completion_rx.recv() {
                Ok(completion) => {
                    self.outstanding -= 1;
                    completions.push(completion);
                }
                Err(_) => {
                    log::error!(
                        "Read workers exited with {} reads outstanding",
                        self.outstanding
                    );
                    self.outstanding = 0;
                }
            }
        }
    }

    fn outstanding(&self) -> usize {
        self.outstanding
    }
}
