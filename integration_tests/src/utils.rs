#![allow(dead_code)]
use std::{future::Future, time::Duration};

use hanbus_client::Controller;
use hanbus_common::{
    constants::MAX_FRAME_SIZE,
    frame::{DecodeEvent, FrameDecoder},
    traits::AsyncByteReceiver,
    Header, MessageClass,
};
use hanbus_node::{i2c::BlockingI2c, i2c::I2cEngine, Callbacks, Node, NodeConfig, NodeMbox};

use crate::{
    sim_board::{MemEeprom, SimBoard},
    sim_line::{SimLine, SimLineReceiver, SimLineSender},
    sim_monitor::SimMonitor,
};

/// Nominal period of the node timer tick
pub const TICK: Duration = Duration::from_millis(1);

pub type SimBus = BlockingI2c<'static, SimMonitor, Box<dyn FnMut()>>;
pub type SimNode = Node<'static, SimBoard, SimBus, MemEeprom>;

/// A node on a simulated line, along with handles to its simulated peripherals
pub struct TestNode {
    pub node: SimNode,
    pub mbox: &'static NodeMbox,
    pub board: SimBoard,
    pub monitor: SimMonitor,
    pub eeprom: MemEeprom,
}

impl TestNode {
    pub fn new(line: &mut SimLine, eeprom: MemEeprom) -> Self {
        Self::with_callbacks(line, eeprom, Callbacks::new())
    }

    pub fn with_callbacks(
        line: &mut SimLine,
        eeprom: MemEeprom,
        callbacks: Callbacks<'static>,
    ) -> Self {
        // Each test gets fresh shared state
        let mbox: &'static NodeMbox = Box::leak(Box::new(NodeMbox::new()));
        let engine: &'static I2cEngine = Box::leak(Box::new(I2cEngine::new()));
        line.add_node(mbox);

        let board = SimBoard::default();
        let monitor = SimMonitor::new();
        let mut isr_monitor = monitor.clone();
        // Operations complete instantly, so waiting is just running the bus interrupt
        let idle: Box<dyn FnMut()> = Box::new(move || isr_monitor.pump(engine));
        let bus = BlockingI2c::new(engine, monitor.clone(), idle);

        let node = Node::new(
            NodeConfig::DEFAULT,
            callbacks,
            mbox,
            board.clone(),
            bus,
            eeprom.clone(),
        );
        Self {
            node,
            mbox,
            board,
            monitor,
            eeprom,
        }
    }
}

pub fn get_controller(line: &mut SimLine) -> Controller<SimLineSender, SimLineReceiver> {
    let sender = line.new_sender();
    let receiver = line.new_receiver();
    Controller::new(sender, receiver)
}

pub struct TestContext {
    channel_rx: tokio::sync::mpsc::Receiver<()>,
}

impl TestContext {
    /// Wait for n ticks of the background process
    pub async fn wait_for_ticks(&mut self, n: usize) {
        // Flush the channel
        while self.channel_rx.try_recv().is_ok() {}
        for _ in 0..n {
            self.channel_rx.recv().await;
        }
    }
}

/// Run `test_task` while the nodes are ticked and processed in the background
pub async fn test_with_background_process<F, T, Fut>(
    nodes: &mut [&mut SimNode],
    line: &SimLine,
    test_task: F,
) -> T
where
    F: (FnOnce(TestContext) -> Fut) + 'static,
    Fut: Future<Output = T>,
{
    let (tx, rx) = tokio::sync::mpsc::channel(10);

    let node_process_task = async move {
        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
        loop {
            interval.tick().await;
            line.tick();
            // Run every node until the whole line is quiet, so that no frame is left latched in a
            // mailbox when the test task sends the next request
            loop {
                let mut active = false;
                for node in nodes.iter_mut() {
                    while node.process() {
                        active = true;
                        line.service();
                    }
                }
                line.service();
                if !active {
                    break;
                }
            }
            // Send notice to the TestContext that a tick has been processed
            tx.try_send(()).ok();
        }
    };

    let ctx = TestContext { channel_rx: rx };
    tokio::select! {
        _ = node_process_task => panic!("Node process task exited"),
        test_result = test_task(ctx) => test_result
    }
}

/// Collects the frames seen on the line
pub struct LineMonitor {
    rx: SimLineReceiver,
    decoder: FrameDecoder<MAX_FRAME_SIZE>,
}

impl LineMonitor {
    pub fn new(rx: SimLineReceiver) -> Self {
        Self {
            rx,
            decoder: FrameDecoder::new(),
        }
    }

    /// All frames completed since the last call
    pub fn frames(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Some(byte) = self.rx.try_recv() {
            if let DecodeEvent::Complete(_) = self.decoder.push(byte) {
                frames.push(self.decoder.frame().to_vec());
            }
        }
        frames
    }

    /// Frames since the last call sent by nodes in answer to a request
    pub fn responses(&mut self) -> Vec<Vec<u8>> {
        self.frames()
            .into_iter()
            .filter(|f| {
                f.first()
                    .and_then(|h| Header::try_from(*h).ok())
                    .is_some_and(|h| matches!(h.class(), MessageClass::Ack | MessageClass::Nak))
            })
            .collect()
    }
}
