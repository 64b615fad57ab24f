use parking_lot::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug)]
struct FrontierState<T> {
    pending: Vec<T>,
    active: usize,
    finished: bool,
}

/// The shared stack of pending nodes plus the active/finished bookkeeping
/// that decides termination.
///
/// Items move out on [`pop`](Self::pop) and are owned by the popping worker
/// until it calls [`retire`](Self::retire). The search is finished once the
/// stack is empty and no worker holds an item, or when [`finish`](Self::finish)
/// is called.
#[derive(Debug)]
pub struct Frontier<T> {
    state: Mutex<FrontierState<T>>,
    ready: Condvar,
}

impl<T> Frontier<T> {
    pub fn new(initial: Vec<T>) -> Self {
        let finished = initial.is_empty();
        Self {
            state: Mutex::new(FrontierState {
                pending: initial,
                active: 0,
                finished,
            }),
            ready: Condvar::new(),
        }
    }

    /// Takes the next item, blocking while other workers may still produce
    /// work. Returns `None` once the frontier is finished or `should_stop`
    /// reports true; `should_stop` is polled at least every `poll`.
    pub fn pop(&self, poll: Duration, should_stop: impl Fn() -> bool) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.finished || should_stop() {
                return None;
            }
            if let Some(item) = state.pending.pop() {
                state.active += 1;
                return Some(item);
            }
            if state.active == 0 {
                state.finished = true;
                self.ready.notify_all();
                return None;
            }
            self.ready.wait_for(&mut state, poll);
        }
    }

    /// Returns a popped item's slot, pushing the children it produced.
    pub fn retire(&self, children: Vec<T>) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        if state.finished {
            return;
        }

        let added = children.len();
        state.pending.extend(children);
        if state.pending.is_empty() && state.active == 0 {
            state.finished = true;
            self.ready.notify_all();
        } else if added > 1 {
            self.ready.notify_all();
        } else if added == 1 {
            self.ready.notify_one();
        }
    }

    /// Ends the search; waiting workers wake and pending items are dropped
    /// unprocessed.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        state.pending.clear();
        self.ready.notify_all();
    }

    #[cfg(test)]
    fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}
