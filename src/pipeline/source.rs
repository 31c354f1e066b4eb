//! Item sources pulled by the processor.

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::BufRead;
use std::time::Duration;

use crate::Result;

/// One pull from a source.
#[derive(Debug, PartialEq, Eq)]
pub enum Pull<T> {
    Item(T),
    /// Nothing right now; try again after a short pause.
    Retry,
    /// Exhausted.
    End,
}

/// Supplier of raw items. An `Err` is fatal and aborts the run.
pub trait ItemSource {
    type Item;

    fn pull(&mut self) -> Result<Pull<Self::Item>>;
}

/// Any iterator.
pub struct IterSource<I>(I);

impl<I: Iterator> IterSource<I> {
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self(iter.into_iter())
    }
}

impl<I: Iterator> ItemSource for IterSource<I> {
    type Item = I::Item;

    fn pull(&mut self) -> Result<Pull<I::Item>> {
        Ok(self.0.next().map_or(Pull::End, Pull::Item))
    }
}

/// Iterator of results; the first `Err` becomes a source error.
pub struct TryIterSource<I>(I);

impl<I> TryIterSource<I> {
    pub fn new(iter: I) -> Self {
        Self(iter)
    }
}

impl<I, T, E> ItemSource for TryIterSource<I>
where
    I: Iterator<Item = std::result::Result<T, E>>,
    E: Into<anyhow::Error>,
{
    type Item = T;

    fn pull(&mut self) -> Result<Pull<T>> {
        match self.0.next() {
            Some(Ok(v)) => Ok(Pull::Item(v)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(Pull::End),
        }
    }
}

/// Items sent by other threads. A receive timeout is a `Retry`; all senders gone is `End`.
pub struct ChannelSource<T> {
    rx: Receiver<T>,
    poll: Duration,
}

impl<T> ChannelSource<T> {
    pub fn new(rx: Receiver<T>, poll: Duration) -> Self {
        Self { rx, poll }
    }
}

impl<T> ItemSource for ChannelSource<T> {
    type Item = T;

    fn pull(&mut self) -> Result<Pull<T>> {
        match self.rx.recv_timeout(self.poll) {
            Ok(v) => Ok(Pull::Item(v)),
            Err(RecvTimeoutError::Timeout) => Ok(Pull::Retry),
            Err(RecvTimeoutError::Disconnected) => Ok(Pull::End),
        }
    }
}

/// A numbered line of text (1-based).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Line {
    pub number: u64,
    pub text: String,
}

/// Lines of a reader, numbered from 1, without their line terminator.
pub struct LineSource<R> {
    reader: R,
    next_number: u64,
    skip_empty: bool,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            next_number: 1,
            skip_empty: false,
        }
    }

    /// Skip blank lines (they still advance the line number).
    pub fn skip_empty(mut self, skip: bool) -> Self {
        self.skip_empty = skip;
        self
    }
}

impl<R: BufRead> ItemSource for LineSource<R> {
    type Item = Line;

    fn pull(&mut self) -> Result<Pull<Line>> {
        loop {
            let mut buf = String::new();
            let n = self
                .reader
                .read_line(&mut buf)
                .with_context(|| format!("Failed to read line {}", self.next_number))?;
            if n == 0 {
                return Ok(Pull::End);
            }
            let number = self.next_number;
            self.next_number += 1;
            let text = buf.trim_end_matches(['\n', '\r']).to_string();
            if self.skip_empty && text.trim().is_empty() {
                continue;
            }
            return Ok(Pull::Item(Line { number, text }));
        }
    }
}
