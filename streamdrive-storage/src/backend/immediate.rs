use super::{AsyncReadBackend, IssueFailure, NativeCompletion, NativeRead};
use std::collections::VecDeque;

/// Performs each read synchronously when it is issued and reports it on the next poll. Gives
/// deterministic completion order, useful when driving the storage drive from a single thread on
/// platforms without a worker pool.
#[derive(Default)]
pub struct ImmediateBackend {
    finished: VecDeque<NativeCompletion>,
}

impl ImmediateBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AsyncReadBackend for ImmediateBackend {
    fn issue_read(
        &mut self,
        read: NativeRead,
    ) -> Result<(), IssueFailure> {
        profiling::scope!("ImmediateBackend::issue_read");
        let NativeRead {
            slot,
            file,
            offset,
            length,
            mut buffer,
        } = read;

        let result = file.read_at(&mut buffer.as_mut_slice()[..length], offset);
        self.finished.push_back(NativeCompletion {
            slot,
            buffer,
            result,
            canceled: false,
        });
        Ok(())
    }

    fn poll_completions(
        &mut self,
        completions: &mut Vec<NativeCompletion>,
    ) {
        completions.extend(self.finished.drain(..));
    }

    fn cancel(
        &mut self,
        slot: usize,
    ) {
        // Already read, the best we can do is report it as canceled
        for completion in &mut self.finished {
            if completion.slot == slot {
                completion.canceled = true;
            }
        }
    }

    fn wait_for_all(
        &mut self,
        completions: &mut Vec<NativeCompletion>,
    ) {
        self.poll_completions(completions);
    }

    fn outstanding(&self) -> usize {
        self.finished.len()
    }
}
