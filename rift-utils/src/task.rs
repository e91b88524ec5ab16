//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio::{task, time};
use tracing::{Instrument, error};

/// A handle which can be used to manipulate the task created by the
/// [`Task::spawn`] function.
///
/// By default, dropping this handle cancels the task (unless [`Task::detach`]
/// is used).
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

/// A handle for a task that fires once after a timeout.
///
/// Dropping this handle cancels the timer.
#[derive(Debug)]
pub struct TimeoutTask {
    #[cfg(not(feature = "testing"))]
    inner: TimerInner,
}

/// A handle for a task that fires periodically.
///
/// Dropping this handle cancels the timer.
#[derive(Debug)]
pub struct IntervalTask {
    #[cfg(not(feature = "testing"))]
    inner: TimerInner,
}

// Shared control plumbing for both timer flavors.
#[derive(Debug)]
#[cfg_attr(feature = "testing", allow(unused))]
struct TimerInner {
    _task: Task<()>,
    control: UnboundedSender<TimerMessage>,
    next: Arc<Mutex<Instant>>,
}

#[derive(Debug)]
enum TimerMessage {
    Reset(Option<Duration>),
}

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task, returning a handle for it.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    /// Spawns a supervised task that automatically restarts if it panics.
    ///
    /// Useful for long-running receive loops exposed to arbitrary input,
    /// where discarding the offending packet and keeping the loop alive is
    /// preferable to bringing down the whole instance.
    pub fn spawn_supervised<F, Fut>(spawn_fn: F) -> Task<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let join_handle = tokio::spawn(
            async move {
                loop {
                    let worker_task = Task::spawn(spawn_fn());
                    match worker_task.await {
                        Ok(_) => {
                            // Finished without panic.
                            break;
                        }
                        Err(error) if error.is_panic() => {
                            error!("task panicked, restarting...");
                            continue;
                        }
                        Err(error) => {
                            error!(%error, "task failed");
                            break;
                        }
                    }
                }
            }
            .in_current_span(),
        );
        Task {
            join_handle,
            detached: false,
        }
    }

    /// Detach the task, meaning it will no longer be canceled if its handle
    /// is dropped.
    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Spawns a task that calls the provided async closure once when the
    /// timeout expires.
    #[cfg(not(feature = "testing"))]
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let next = Arc::new(Mutex::new(Instant::now() + timeout));
        let next_child = next.clone();

        let task = Task::spawn(
            async move {
                let sleep = time::sleep(timeout);
                tokio::pin!(sleep);

                loop {
                    tokio::select! {
                        _ = &mut sleep => {
                            (cb)().await;
                            break;
                        }
                        message = control_rx.recv() => {
                            match message {
                                Some(TimerMessage::Reset(new_timeout)) => {
                                    let next = Instant::now()
                                        + new_timeout.unwrap_or(timeout);
                                    sleep.as_mut().reset(next);
                                    *next_child.lock().unwrap() = next;
                                }
                                // Timeout has been aborted.
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        TimeoutTask {
            inner: TimerInner {
                _task: task,
                control: control_tx,
                next,
            },
        }
    }

    /// Resets the timeout, regardless of whether it has already expired.
    ///
    /// If a new timeout value isn't specified, the last value is reused.
    pub fn reset(&mut self, timeout: Option<Duration>) {
        #[cfg(not(feature = "testing"))]
        if self
            .inner
            .control
            .send(TimerMessage::Reset(timeout))
            .is_err()
        {
            error!("failed to reset timeout");
        }
        #[cfg(feature = "testing")]
        let _ = timeout;
    }

    /// Returns the remaining time before the timeout expires.
    pub fn remaining(&self) -> Duration {
        #[cfg(not(feature = "testing"))]
        {
            let next = self.inner.next.lock().unwrap();
            next.saturating_duration_since(Instant::now())
        }
        #[cfg(feature = "testing")]
        {
            Duration::ZERO
        }
    }
}

#[cfg(feature = "testing")]
impl TimeoutTask {
    pub fn new<F, Fut>(_timeout: Duration, _cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        TimeoutTask {}
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Spawns a task that calls the provided async closure on every tick of
    /// the interval timer.
    #[cfg(not(feature = "testing"))]
    pub fn new<F, Fut>(
        interval: Duration,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let next = Arc::new(Mutex::new(Instant::now() + interval));
        let next_child = next.clone();

        let task = Task::spawn(
            async move {
                let mut ticker = if tick_on_start {
                    time::interval(interval)
                } else {
                    time::interval_at(Instant::now() + interval, interval)
                };

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let next = Instant::now() + interval;
                            (cb)().await;
                            *next_child.lock().unwrap() = next;
                        }
                        message = control_rx.recv() => {
                            match message {
                                Some(TimerMessage::Reset(new_interval)) => {
                                    let interval =
                                        new_interval.unwrap_or(interval);
                                    ticker = time::interval(interval);
                                    *next_child.lock().unwrap() =
                                        Instant::now() + interval;
                                }
                                // Interval timer has been aborted.
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        IntervalTask {
            inner: TimerInner {
                _task: task,
                control: control_tx,
                next,
            },
        }
    }

    /// Resets the interval.
    ///
    /// If a new interval value isn't specified, the last value is reused.
    pub fn reset(&mut self, interval: Option<Duration>) {
        #[cfg(not(feature = "testing"))]
        if self
            .inner
            .control
            .send(TimerMessage::Reset(interval))
            .is_err()
        {
            error!("failed to reset interval");
        }
        #[cfg(feature = "testing")]
        let _ = interval;
    }

    /// Returns the remaining time before the next tick.
    pub fn remaining(&self) -> Duration {
        #[cfg(not(feature = "testing"))]
        {
            let next = self.inner.next.lock().unwrap();
            next.saturating_duration_since(Instant::now())
        }
        #[cfg(feature = "testing")]
        {
            Duration::ZERO
        }
    }
}

#[cfg(feature = "testing")]
impl IntervalTask {
    pub fn new<F, Fut>(
        _interval: Duration,
        _tick_on_start: bool,
        _cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        IntervalTask {}
    }
}
