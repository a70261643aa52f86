//! Caller-to-session byte channel.
//!
//! The caller pushes [`Chunk`]s through a bounded channel. Up to
//! [`INPUT_CAPACITY`] chunks queue ahead of the network, so early writes
//! succeed before the session has sent anything; past that, writers wait for
//! the session to catch up. The session side ([`UploadInput`]) feeds every byte to
//! the shared validator, drops the prefix the server already holds, and
//! forwards the rest.

use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::checksums::StreamingValidator;
use crate::request::ByteStream;

/// Chunks buffered between the caller and the session.
pub(crate) const INPUT_CAPACITY: usize = 16;

/// A message from the caller's stream.
#[derive(Debug)]
pub(crate) enum Chunk {
    /// Payload bytes.
    Data(Bytes),
    /// The caller finished writing.
    End,
}

/// Receiving half of the upload channel.
#[derive(Debug)]
pub(crate) struct UploadInput {
    rx: mpsc::Receiver<Chunk>,
    validator: Arc<Mutex<StreamingValidator>>,
    skip: u64,
    finished: bool,
}

impl UploadInput {
    pub(crate) fn new(
        rx: mpsc::Receiver<Chunk>,
        validator: Arc<Mutex<StreamingValidator>>,
    ) -> Self {
        Self {
            rx,
            validator,
            skip: 0,
            finished: false,
        }
    }

    /// Discard the first `offset` bytes of the payload instead of forwarding
    /// them. Skipped bytes are still validated.
    pub(crate) fn skip_prefix(&mut self, offset: u64) {
        self.skip = offset;
    }

    /// Next chunk to forward, `None` at end of input.
    ///
    /// Returns an error when the caller dropped the stream without finishing,
    /// so an interrupted upload never looks complete to the server.
    pub(crate) async fn next_chunk(&mut self) -> Option<Result<Bytes, std::io::Error>> {
        while !self.finished {
            match self.rx.recv().await {
                Some(Chunk::Data(mut data)) => {
                    self.validator.lock().update(&data);
                    if self.skip > 0 {
                        let len = data.len() as u64;
                        if self.skip >= len {
                            self.skip -= len;
                            continue;
                        }
                        let start = usize::try_from(self.skip).unwrap_or(data.len());
                        data = data.slice(start..);
                        self.skip = 0;
                    }
                    if data.is_empty() {
                        continue;
                    }
                    return Some(Ok(data));
                }
                Some(Chunk::End) => self.finished = true,
                None => {
                    self.finished = true;
                    return Some(Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionAborted,
                        "upload stream dropped before it was finished",
                    )));
                }
            }
        }
        None
    }

    /// Consume the rest of the input through the validator without
    /// forwarding anything.
    pub(crate) async fn drain(&mut self) -> Result<(), std::io::Error> {
        while let Some(chunk) = self.next_chunk().await {
            chunk?;
        }
        Ok(())
    }

    /// Turn the input into a request body stream.
    pub(crate) fn into_stream(self) -> ByteStream {
        stream::unfold(self, |mut input| async move {
            input.next_chunk().await.map(|chunk| (chunk, input))
        })
        .boxed()
    }
}
