use std::{pin::pin, sync::Mutex};

use tokio::sync::Notify;

/// A manual-reset async event: once `set`, every `wait` resolves
/// immediately until someone `clear`s it again.
pub(super) struct Event {
    set: Mutex<bool>,
    notify: Notify,
}

impl Event {
    pub fn new() -> Self {
        Self {
            set: Mutex::new(false),
            notify: Notify::new(),
        }
    }

    pub fn set(&self) {
        *self.set.lock().unwrap() = true;
        self.notify.notify_waiters();
    }

    pub fn clear(&self) {
        *self.set.lock().unwrap() = false;
    }

    pub async fn wait(&self) {
        loop {
            let mut notified = pin!(self.notify.notified());
            // register interest before checking, so a set() racing with the
            // check is not lost
            notified.as_mut().enable();

            if *self.set.lock().unwrap() {
                return;
            }

            notified.await;
        }
    }
}
