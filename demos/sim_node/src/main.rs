//! Runs a battery monitor node on the host, with a TCP connection standing in for the serial line
use std::{path::PathBuf, time::Duration};

use clap::Parser;
use hanbus_node::{Callbacks, EnterBootloaderFn, Node, NodeConfig, NodeMbox};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::Notify,
    time::timeout,
};

mod config;
mod hardware;

use config::DemoConfig;
use hardware::{DemoBoard, FileEeprom, ModelMonitor};

static NODE_MBOX: NodeMbox = NodeMbox::new();

#[derive(Parser, Debug)]
struct Args {
    /// TOML configuration file
    config: Option<PathBuf>,
    /// Line endpoint, overriding the configuration
    #[clap(long, short)]
    line: Option<String>,
    /// Store file, overriding the configuration
    #[clap(long, short)]
    eeprom: Option<PathBuf>,
    /// Start with the address-program jumper fitted
    #[clap(long, short)]
    program: bool,
}

#[tokio::main]
async fn main() {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match DemoConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{e}");
                std::process::exit(1);
            }
        },
        None => DemoConfig::default(),
    };
    if let Some(line) = args.line {
        config.line = line;
    }
    if let Some(eeprom) = args.eeprom {
        config.eeprom = eeprom;
    }
    config.program_mode |= args.program;

    // Checked when the configuration was loaded
    let bus_voltage = config.monitor.bus_register().unwrap_or(0);
    let shunt_voltage = config.monitor.shunt_register().unwrap_or(0);

    let stream = match TcpStream::connect(&config.line).await {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("Error connecting to line at {}: {e}", config.line);
            std::process::exit(1);
        }
    };
    let (mut rx, mut tx) = stream.into_split();

    // Node requires callbacks be static, so use Box::leak to make static ref from closure on heap
    let enter_bootloader: &'static mut EnterBootloaderFn<'static> = Box::leak(Box::new(|| {
        log::info!("Restarting into the bootloader");
        std::process::exit(0);
    }));
    let callbacks = Callbacks {
        enter_bootloader: Some(enter_bootloader),
    };

    log::info!("Starting node...");
    let mut node = Node::new(
        NodeConfig::DEFAULT,
        callbacks,
        &NODE_MBOX,
        DemoBoard::new(config.program_mode),
        ModelMonitor::new(bus_voltage, shunt_voltage),
        FileEeprom::open(config.eeprom.clone()),
    );

    let process_notify: &'static Notify = Box::leak(Box::new(Notify::new()));
    let notify_cb = Box::leak(Box::new(move || {
        process_notify.notify_one();
    }));
    NODE_MBOX.set_process_notify_callback(notify_cb);

    // Spawn a task to receive bytes
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        loop {
            match rx.read(&mut buf).await {
                Ok(0) => {
                    log::error!("Line closed");
                    std::process::exit(1);
                }
                Ok(n) => buf[..n].iter().for_each(|b| NODE_MBOX.store_byte(*b)),
                Err(e) => {
                    log::error!("Error receiving from line: {e:?}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    });

    // Spawn a task to send bytes
    tokio::spawn(async move {
        let notify: &'static Notify = Box::leak(Box::new(Notify::new()));
        let transmit_notify_callback = Box::leak(Box::new(move || {
            notify.notify_one();
        }));
        NODE_MBOX.set_transmit_notify_callback(transmit_notify_callback);
        let mut out = Vec::new();
        loop {
            notify.notified().await;
            out.extend(std::iter::from_fn(|| NODE_MBOX.next_transmit_byte()));
            if let Err(e) = tx.write_all(&out).await {
                log::warn!("Error sending frame: {e:?}");
            }
            out.clear();
        }
    });

    let mut interval = tokio::time::interval(Duration::from_millis(1));
    loop {
        interval.tick().await;
        NODE_MBOX.tick();
        while node.process() {}

        // Wait for notification to run, or the next tick
        timeout(Duration::from_micros(500), process_notify.notified())
            .await
            .ok();
        while node.process() {}
    }
}
