//! The control-side interface to the real-time audio worker
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::stream::Stream;
use crate::Error;

/// Operations the audio worker exposes to the control thread.
///
/// The worker serializes these on its own run queue, so from the control
/// thread's perspective they are synchronous. Implementations must be
/// idempotent in the already-present / already-absent sense: the control
/// thread may remove a device it never handed over during suspend races.
pub trait AudioWorker {
    /// Hand an opened device to the worker.
    fn add_open_dev(&mut self, dev_idx: u32) -> Result<(), Error>;

    /// Take a device away from the worker.
    fn rm_open_dev(&mut self, dev_idx: u32);

    /// Attach a stream to a device the worker holds.
    fn add_stream(&mut self, stream: &Arc<Stream>, dev_idx: u32) -> Result<(), Error>;

    /// Detach a stream from one device, or from every device when `dev_idx`
    /// is `None`.
    fn disconnect_stream(&mut self, stream: &Arc<Stream>, dev_idx: Option<u32>);

    /// Start draining a stream. Returns the milliseconds of audio left; zero
    /// means the stream is fully drained and can be dropped.
    fn drain_stream(&mut self, stream: &Arc<Stream>) -> u32;
}

/// Message format serviced by the worker thread.
pub enum WorkerMessage {
    AddOpenDev {
        dev_idx: u32,
    },
    RmOpenDev {
        dev_idx: u32,
    },
    AddStream {
        stream: Arc<Stream>,
        dev_idx: u32,
    },
    DisconnectStream {
        stream: Arc<Stream>,
        dev_idx: Option<u32>,
    },
    /// Reply with the milliseconds of audio left in the stream.
    DrainStream {
        stream: Arc<Stream>,
        reply: Sender<u32>,
    },
}

/// Channel-backed [`AudioWorker`] client.
///
/// The paired [`Receiver`] is handed to the worker thread, which drains
/// messages between render quanta. Drain requests carry their own reply
/// channel so answers can never arrive out of order.
pub struct WorkerClient {
    sender: Sender<WorkerMessage>,
}

impl WorkerClient {
    /// Create the client plus the receiving end for the worker thread.
    pub fn new() -> (Self, Receiver<WorkerMessage>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }

    fn send(&self, message: WorkerMessage) -> Result<(), Error> {
        self.sender
            .send(message)
            .map_err(|_| Error::HwFailure("audio worker is gone".to_string()))
    }
}

impl AudioWorker for WorkerClient {
    fn add_open_dev(&mut self, dev_idx: u32) -> Result<(), Error> {
        self.send(WorkerMessage::AddOpenDev { dev_idx })
    }

    fn rm_open_dev(&mut self, dev_idx: u32) {
        let _ = self.send(WorkerMessage::RmOpenDev { dev_idx });
    }

    fn add_stream(&mut self, stream: &Arc<Stream>, dev_idx: u32) -> Result<(), Error> {
        self.send(WorkerMessage::AddStream {
            stream: Arc::clone(stream),
            dev_idx,
        })
    }

    fn disconnect_stream(&mut self, stream: &Arc<Stream>, dev_idx: Option<u32>) {
        let _ = self.send(WorkerMessage::DisconnectStream {
            stream: Arc::clone(stream),
            dev_idx,
        });
    }

    fn drain_stream(&mut self, stream: &Arc<Stream>) -> u32 {
        let (reply, response) = crossbeam_channel::bounded(1);
        let sent = self.send(WorkerMessage::DrainStream {
            stream: Arc::clone(stream),
            reply,
        });
        if sent.is_err() {
            // no worker, nothing left to drain
            return 0;
        }
        response.recv().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{SampleFormat, StreamFormat};
    use crate::Direction;

    fn stream() -> Arc<Stream> {
        Arc::new(Stream::new(
            1,
            Direction::Output,
            StreamFormat {
                sample_format: SampleFormat::S16Le,
                frame_rate: 44_100,
                num_channels: 2,
            },
            480,
        ))
    }

    #[test]
    fn test_messages_arrive_in_order() {
        let (mut client, receiver) = WorkerClient::new();
        let s = stream();

        client.add_open_dev(4).unwrap();
        client.add_stream(&s, 4).unwrap();
        client.disconnect_stream(&s, None);
        client.rm_open_dev(4);

        match receiver.recv().unwrap() {
            WorkerMessage::AddOpenDev { dev_idx } => assert_eq!(dev_idx, 4),
            _ => panic!("expected AddOpenDev"),
        }
        match receiver.recv().unwrap() {
            WorkerMessage::AddStream { stream, dev_idx } => {
                assert_eq!(stream.id(), 1);
                assert_eq!(dev_idx, 4);
            }
            _ => panic!("expected AddStream"),
        }
        match receiver.recv().unwrap() {
            WorkerMessage::DisconnectStream { dev_idx, .. } => assert_eq!(dev_idx, None),
            _ => panic!("expected DisconnectStream"),
        }
        match receiver.recv().unwrap() {
            WorkerMessage::RmOpenDev { dev_idx } => assert_eq!(dev_idx, 4),
            _ => panic!("expected RmOpenDev"),
        }
    }

    #[test]
    fn test_drain_round_trip() {
        let (mut client, receiver) = WorkerClient::new();

        let worker = std::thread::spawn(move || match receiver.recv().unwrap() {
            WorkerMessage::DrainStream { reply, .. } => reply.send(250).unwrap(),
            _ => panic!("expected DrainStream"),
        });

        assert_eq!(client.drain_stream(&stream()), 250);
        worker.join().unwrap();
    }

    #[test]
    fn test_gone_worker() {
        let (mut client, receiver) = WorkerClient::new();
        drop(receiver);

        assert!(client.add_open_dev(4).is_err());
        assert_eq!(client.drain_stream(&stream()), 0);
        // removals are fire-and-forget even without a worker
        client.rm_open_dev(4);
    }
}
