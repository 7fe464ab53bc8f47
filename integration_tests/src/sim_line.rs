use std::sync::{Arc, Mutex};

use hanbus_common::traits::{AsyncByteReceiver, AsyncByteSender};
use hanbus_node::NodeMbox;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// A simulated multi-drop serial line
///
/// Every byte put on the line is seen by every node except the one which sent it, and by every
/// external receiver (including that of the sending controller, as on a real half-duplex line).
#[derive(Clone, Default)]
pub struct SimLine {
    mailboxes: Arc<Mutex<Vec<&'static NodeMbox>>>,
    // Non-node listeners, e.g. controllers and line monitors
    external_channels: Arc<Mutex<Vec<UnboundedSender<u8>>>>,
}

impl SimLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, mbox: &'static NodeMbox) {
        self.mailboxes.lock().unwrap().push(mbox);
    }

    pub fn new_receiver(&mut self) -> SimLineReceiver {
        let (tx, rx) = unbounded_channel();
        self.external_channels.lock().unwrap().push(tx);
        SimLineReceiver { channel_rx: rx }
    }

    pub fn new_sender(&mut self) -> SimLineSender {
        SimLineSender { line: self.clone() }
    }

    fn deliver(&self, byte: u8, from_node: Option<usize>) {
        for (i, mbox) in self.mailboxes.lock().unwrap().iter().enumerate() {
            if Some(i) != from_node {
                mbox.store_byte(byte);
            }
        }
        for ext in self.external_channels.lock().unwrap().iter() {
            // A dropped receiver just stops listening
            ext.send(byte).ok();
        }
    }

    /// Move every byte the nodes have queued for transmission onto the line
    pub fn service(&self) {
        let mailboxes = self.mailboxes.lock().unwrap().clone();
        for (i, mbox) in mailboxes.iter().enumerate() {
            while let Some(byte) = mbox.next_transmit_byte() {
                self.deliver(byte, Some(i));
            }
        }
    }

    /// Deliver one timer tick to every node
    pub fn tick(&self) {
        let mailboxes = self.mailboxes.lock().unwrap().clone();
        for mbox in mailboxes {
            mbox.tick();
        }
    }
}

pub struct SimLineSender {
    line: SimLine,
}

impl AsyncByteSender for SimLineSender {
    type Error = ();

    async fn send(&mut self, bytes: &[u8]) -> Result<(), ()> {
        for b in bytes {
            self.line.deliver(*b, None);
        }
        Ok(())
    }
}

pub struct SimLineReceiver {
    channel_rx: UnboundedReceiver<u8>,
}

impl AsyncByteReceiver for SimLineReceiver {
    type Error = ();

    fn try_recv(&mut self) -> Option<u8> {
        self.channel_rx.try_recv().ok()
    }

    async fn recv(&mut self) -> Result<u8, Self::Error> {
        self.channel_rx.recv().await.ok_or(())
    }
}
