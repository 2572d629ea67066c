//! Work stealing policy.

use crate::runtime::scheduler::local_queue::Stealer;
use crate::task::Task;
use crate::util::DetRng;
use std::sync::Arc;

/// Tries to steal a task, sweeping all stealers from a random start index.
pub(crate) fn steal_task(stealers: &[Stealer], rng: &mut DetRng) -> Option<Arc<Task>> {
    if stealers.is_empty() {
        return None;
    }

    let len = stealers.len();
    let start = rng.next_usize(len);

    for i in 0..len {
        let idx = (start + i) % len;
        if let Some(task) = stealers[idx].steal() {
            return Some(task);
        }
    }

    None
}
