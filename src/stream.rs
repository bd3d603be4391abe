//! Asynchronous, never-ending stream of lines on top of [`MultiTail`].

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task;

use futures_util::ready;
use futures_util::stream::Stream as FuturesStream;
use pin_project_lite::pin_project;
use tokio::time::{sleep_until, Instant, Sleep};

use crate::mux::{Line, MultiTail};

pin_project! {
/// Polls a [`MultiTail`] repeatedly, waiting for the poll interval whenever
/// a poll comes back empty.
///
/// `TailStream` implements [`futures::Stream`] and never ends on its own;
/// dropping it stops tailing. It can be created anywhere but must be polled
/// within a tokio runtime with the time driver enabled.
///
/// [`futures::Stream`]: https://docs.rs/futures/0.3/futures/stream/trait.Stream.html
pub struct TailStream {
    tail: MultiTail,
    pending: VecDeque<Line>,
    sleeping: bool,
    // Armed on the first empty poll.
    #[pin]
    delay: Option<Sleep>,
}
}

impl TailStream {
    pub fn new(tail: MultiTail) -> Self {
        TailStream {
            tail,
            pending: VecDeque::new(),
            sleeping: false,
            delay: None,
        }
    }

    /// Gives access to the underlying tail, e.g. to snapshot its offsets.
    pub fn tail(&self) -> &MultiTail {
        &self.tail
    }

    pub fn tail_mut(self: Pin<&mut Self>) -> &mut MultiTail {
        self.project().tail
    }

    /// Returns the underlying tail. Lines already polled but not yet yielded
    /// are lost.
    pub fn into_tail(self) -> MultiTail {
        self.tail
    }
}

impl MultiTail {
    /// Turns this tail into an endless asynchronous [`TailStream`].
    pub fn into_stream(self) -> TailStream {
        TailStream::new(self)
    }
}

impl FuturesStream for TailStream {
    type Item = Line;

    fn poll_next(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Option<Line>> {
        let mut this = self.project();

        loop {
            if let Some(line) = this.pending.pop_front() {
                return task::Poll::Ready(Some(line));
            }

            if *this.sleeping {
                if let Some(delay) = this.delay.as_mut().as_pin_mut() {
                    ready!(delay.poll(cx));
                }
                *this.sleeping = false;
            }

            this.pending.extend(this.tail.poll(false));

            if this.pending.is_empty() {
                let interval = this.tail.config().poll_interval;
                if interval.is_zero() {
                    // Nothing to wait on; yield back to the executor.
                    cx.waker().wake_by_ref();
                    return task::Poll::Pending;
                }
                let deadline = Instant::now() + interval;
                let rearmed = this
                    .delay
                    .as_mut()
                    .as_pin_mut()
                    .map(|delay| delay.reset(deadline))
                    .is_some();
                if !rearmed {
                    this.delay.set(Some(sleep_until(deadline)));
                }
                *this.sleeping = true;
            }
        }
    }
}
