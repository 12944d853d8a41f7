mod message;
mod watchdog;

use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use crate::Message;

static LOGGING: Lazy<()> = Lazy::new(|| {
    let _ = osal::logger::init(log::LevelFilter::Warn);
});

pub(crate) fn init_logging() {
    Lazy::force(&LOGGING);
}

/// Polls `cond` until it holds or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Keeps the worker busy inside a dispatch until opened.
pub(crate) struct Gate {
    entered: mpsc::Receiver<()>,
    open: mpsc::Sender<()>,
}

impl Gate {
    pub(crate) fn wait_entered(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(5))
            .expect("gate message should be dispatched");
    }

    pub(crate) fn open(&self) {
        let _ = self.open.send(());
    }
}

pub(crate) fn gate_message(what: i32) -> (Message, Gate) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (open_tx, open_rx) = mpsc::channel();
    let entered_tx = Mutex::new(entered_tx);
    let open_rx = Mutex::new(open_rx);
    let msg = Message::empty(what).with_dispatch(move |_| {
        let _ = entered_tx.lock().unwrap().send(());
        let _ = open_rx
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5));
    });
    (
        msg,
        Gate {
            entered: entered_rx,
            open: open_tx,
        },
    )
}
