// SPDX-License-Identifier: Apache-2.0

use flume::{Receiver, Sender};
use std::fmt;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

/// Error from a non-blocking send; hands the item back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum TrySendError<T> {
    Full(T),
    Disconnected(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(item) | TrySendError::Disconnected(item) => item,
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "channel full"),
            TrySendError::Disconnected(_) => write!(f, "channel disconnected"),
        }
    }
}

impl<T> BoundedSender<T> {
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        match self.tx.send_async(item).await {
            Ok(()) => Ok(()),
            Err(_e) => Err(SendError::Disconnected), // receiver closed
        }
    }

    /// Non-blocking send - fails with `Full` when there is no capacity.
    pub fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
        self.tx.try_send(item).map_err(|e| match e {
            flume::TrySendError::Full(item) => TrySendError::Full(item),
            flume::TrySendError::Disconnected(item) => TrySendError::Disconnected(item),
        })
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        // this could be derived, but placeholder for now
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    pub async fn next(&mut self) -> Option<T> {
        match self.rx.recv_async().await {
            Ok(item) => Some(item),
            Err(_e) => None, // disconnected
        }
    }

    /// Non-blocking receive - returns immediately.
    /// Returns None if no item is available or channel is disconnected.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);

    let sender = BoundedSender { tx };
    let receiver = BoundedReceiver { rx };

    (sender, receiver)
}
