use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn, LevelFilter};
use mqueue::{MessageQueue, QueueSet};
use msglooper::{Looper, Message, MessageStatus, Payload, PostError};

const TEXT_SIZE: usize = 32;

#[derive(Parser, Debug)]
#[command(author, version, about = "Message looper and mailbox queue demos")]
struct Opts {
    /// Console log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Producer thread feeding an int queue and a text queue; the main
    /// thread drains both through a queue set.
    Queues {
        /// Items sent to each queue.
        #[arg(long, default_value_t = 20)]
        count: usize,
        /// Capacity of each queue; the set holds twice that.
        #[arg(long, default_value_t = 10)]
        capacity: usize,
        #[arg(long = "select-ms", default_value_t = 1000)]
        select_ms: u64,
    },
    /// Looper run with front, delayed, expiring and cancelled messages under
    /// a watchdog.
    Looper {
        #[arg(long = "watchdog-ms", default_value_t = 200)]
        watchdog_ms: u64,
        /// How long the slow handler blocks the worker.
        #[arg(long = "stall-ms", default_value_t = 500)]
        stall_ms: u64,
    },
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    osal::logger::init(opts.log_level).context("installing console logger")?;

    match opts.command {
        Command::Queues {
            count,
            capacity,
            select_ms,
        } => run_queues(count, capacity, Duration::from_millis(select_ms)),
        Command::Looper {
            watchdog_ms,
            stall_ms,
        } => run_looper(
            Duration::from_millis(watchdog_ms),
            Duration::from_millis(stall_ms),
        ),
    }
}

fn run_queues(count: usize, capacity: usize, select_timeout: Duration) -> Result<()> {
    let ints = MessageQueue::create(4, capacity).context("creating int queue")?;
    let texts = MessageQueue::create(TEXT_SIZE, capacity).context("creating text queue")?;
    let set = QueueSet::create(capacity * 2).context("creating queue set")?;
    set.add_queue(&ints)?;
    set.add_queue(&texts)?;

    let producer = {
        let (ints, texts) = (ints.clone(), texts.clone());
        thread::Builder::new()
            .name("producer".into())
            .spawn(move || -> Result<()> {
                for i in 0..count {
                    let value = u32::try_from(i)?;
                    ints.send(&value.to_le_bytes(), Duration::from_secs(1))?;
                    texts.send(format!("->{i}").as_bytes(), Duration::from_secs(1))?;
                }
                Ok(())
            })
            .context("spawning producer")?
    };

    let mut buf = [0u8; TEXT_SIZE];
    let (mut n_ints, mut n_texts) = (0usize, 0usize);
    while let Some(ready) = set.select(select_timeout)? {
        ready.receive(&mut buf, Duration::ZERO)?;
        if ready == ints {
            let value = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
            info!("{}: int {value}", ready.id());
            n_ints += 1;
        } else {
            let end = buf.iter().position(|&b| b == 0).unwrap_or(TEXT_SIZE);
            info!("{}: text {:?}", ready.id(), String::from_utf8_lossy(&buf[..end]));
            n_texts += 1;
        }
    }

    producer
        .join()
        .map_err(|_| anyhow!("producer thread panicked"))??;
    info!("received {n_ints} ints and {n_texts} texts");

    set.destroy();
    ints.destroy()?;
    texts.destroy()?;
    if n_ints != count || n_texts != count {
        bail!("expected {count} of each, got {n_ints} ints and {n_texts} texts");
    }
    Ok(())
}

const WHAT_SLOW: i32 = 1;
const WHAT_EXPIRING: i32 = 2;
const WHAT_CANCELLED: i32 = 99;

fn post_error(err: PostError) -> anyhow::Error {
    anyhow!(err.to_string())
}

fn run_looper(watchdog_period: Duration, stall: Duration) -> Result<()> {
    let looper = Looper::builder("demo")
        .dispatch(move |msg: &mut Message| {
            if msg.what == WHAT_SLOW {
                info!("what={} blocking the worker for {stall:?}", msg.what);
                thread::sleep(stall);
            } else if let Some(text) = msg.data_ref::<String>() {
                info!("what={} arg1={} data={text:?}", msg.what, msg.arg1);
            } else {
                info!("what={} arg1={}", msg.what, msg.arg1);
            }
        })
        .build()?;

    let stalls = Arc::new(AtomicUsize::new(0));
    {
        let stalls = Arc::clone(&stalls);
        looper.enable_watchdog(watchdog_period, move || {
            stalls.fetch_add(1, Ordering::SeqCst);
        })?;
    }
    looper.start()?;

    looper
        .post(Message::obtain(10, 1, 0, Payload::owned(String::from("first"))))
        .map_err(post_error)?;
    looper
        .post(Message::obtain(11, 2, 0, Payload::Empty))
        .map_err(post_error)?;
    looper
        .post_front(Message::obtain(12, 0, 0, Payload::owned(String::from("urgent"))))
        .map_err(post_error)?;
    looper
        .post_delay(Message::empty(13), Duration::from_millis(50))
        .map_err(post_error)?;
    looper.post(Message::empty(WHAT_SLOW)).map_err(post_error)?;

    let expired = Arc::new(AtomicUsize::new(0));
    {
        let expired = Arc::clone(&expired);
        let msg = Message::empty(WHAT_EXPIRING)
            .with_timeout(Duration::from_millis(10))
            .with_notify(move |msg: &Message, status: MessageStatus| {
                if status == MessageStatus::Timeout {
                    warn!("what={} expired before dispatch", msg.what);
                    expired.fetch_add(1, Ordering::SeqCst);
                }
            });
        looper.post(msg).map_err(post_error)?;
    }
    looper
        .post_delay(Message::empty(WHAT_CANCELLED), Duration::from_secs(5))
        .map_err(post_error)?;

    looper.dump();
    let cancelled = looper.remove(WHAT_CANCELLED);
    info!("cancelled {cancelled} message(s)");

    thread::sleep(stall + watchdog_period * 2);
    looper.destroy();

    info!(
        "watchdog stalls: {}, expired messages: {}",
        stalls.load(Ordering::SeqCst),
        expired.load(Ordering::SeqCst)
    );
    Ok(())
}
