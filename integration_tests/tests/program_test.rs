use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use hanbus_common::{
    constants::store::{ADDRESS_OFFSET, BOOT_SIGNATURE, BOOT_SIGNATURE_OFFSET},
    Command,
};
use hanbus_node::EnterBootloaderFn;
use integration_tests::prelude::*;
use serial_test::serial;

fn addr(raw: u8) -> NodeAddress {
    NodeAddress::new(raw).unwrap()
}

#[serial]
#[tokio::test]
async fn test_program_address() {
    let _ = env_logger::try_init();
    let mut line = SimLine::new();
    let mut node = TestNode::new(&mut line, MemEeprom::new());
    let mut client = get_controller(&mut line);
    client.set_timeout(Duration::from_millis(100));
    let board = node.board.clone();
    let eeprom = node.eeprom.clone();
    board.state().program_mode = true;

    let test_task = move |_ctx| async move {
        // With the jumper fitted the node only listens for its new address
        assert_eq!(
            client.node_identity(addr(0x1F)).await.map(|_| ()),
            Err(ClientError::NoResponse)
        );
        client.program_address(addr(5)).await.unwrap();
        assert_eq!(eeprom.get(ADDRESS_OFFSET), 5);
    };
    test_with_background_process(&mut [&mut node.node], &line, test_task).await;
    assert_eq!(node.node.address(), addr(5));

    node.board.state().program_mode = false;
    let mut client = get_controller(&mut line);
    client.set_timeout(Duration::from_millis(100));
    let test_task = move |_ctx| async move {
        client.node_identity(addr(5)).await.unwrap();
        assert_eq!(
            client.noop(addr(0x1F), &[]).await,
            Err(ClientError::NoResponse)
        );
    };
    test_with_background_process(&mut [&mut node.node], &line, test_task).await;
}

#[serial]
#[tokio::test]
async fn test_program_broadcast_address_refused() {
    let mut line = SimLine::new();
    let mut node = TestNode::new(&mut line, MemEeprom::new());
    let mut client = get_controller(&mut line);
    let mut monitor = LineMonitor::new(line.new_receiver());
    let eeprom = node.eeprom.clone();
    node.board.state().program_mode = true;

    let test_task = move |mut ctx: TestContext| async move {
        client
            .broadcast(Command::ProgramAddress.into(), &[])
            .await
            .unwrap();
        ctx.wait_for_ticks(50).await;
        assert!(monitor.responses().is_empty());
        assert_eq!(eeprom.get(ADDRESS_OFFSET), 0xFF);
    };
    test_with_background_process(&mut [&mut node.node], &line, test_task).await;
    assert_eq!(node.node.address(), addr(0x1F));
}

#[serial]
#[tokio::test]
async fn test_enter_bootloader() {
    let mut line = SimLine::new();
    let requested = Arc::new(AtomicBool::new(false));
    let flag = requested.clone();
    let enter_bootloader: &'static mut EnterBootloaderFn<'static> =
        Box::leak(Box::new(move || flag.store(true, Ordering::Relaxed)));
    let callbacks = Callbacks {
        enter_bootloader: Some(enter_bootloader),
    };
    let mut node = TestNode::with_callbacks(&mut line, MemEeprom::with_address(8), callbacks);
    let mut client = get_controller(&mut line);
    let eeprom = node.eeprom.clone();

    let test_task = move |mut ctx: TestContext| async move {
        let wrong_key = client
            .request(addr(8), Command::EnterBootloader.into(), &[0x55, 0x55])
            .await;
        assert!(matches!(wrong_key, Err(ClientError::Nak { .. })));
        ctx.wait_for_ticks(10).await;
        assert!(!requested.load(Ordering::Relaxed));
        assert_eq!(eeprom.get(BOOT_SIGNATURE_OFFSET), 0xFF);

        client.enter_bootloader(addr(8)).await.unwrap();
        ctx.wait_for_ticks(10).await;
        assert!(requested.load(Ordering::Relaxed));
        assert_eq!(eeprom.get(BOOT_SIGNATURE_OFFSET), BOOT_SIGNATURE);
    };
    test_with_background_process(&mut [&mut node.node], &line, test_task).await;
}
