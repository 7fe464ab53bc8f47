use std::{collections::BTreeSet, time::Duration};

use hanbus_client::Notification;
use hanbus_common::Header;
use integration_tests::prelude::*;
use serial_test::serial;

const WAIT: Duration = Duration::from_secs(3);

fn addr(raw: u8) -> NodeAddress {
    NodeAddress::new(raw).unwrap()
}

#[serial]
#[tokio::test]
async fn test_boot_notification_until_acknowledged() {
    let _ = env_logger::try_init();
    let mut line = SimLine::new();
    let mut node = TestNode::new(&mut line, MemEeprom::with_address(10));
    let mut client = get_controller(&mut line);
    let mut monitor = LineMonitor::new(line.new_receiver());

    let test_task = move |mut ctx: TestContext| async move {
        // The first holdoff comes from the address: 10 periods of 32 ticks
        ctx.wait_for_ticks(100).await;
        assert!(monitor.frames().is_empty());

        let expected = Notification {
            address: 10,
            reason: IrqReason::AtBoot,
        };
        assert_eq!(client.wait_notification(WAIT).await.unwrap(), expected);
        let frames = monitor.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][0], u8::from(Header::Notify16));
        assert_eq!(frames[0].len(), 5);

        // Repeated until acknowledged
        assert_eq!(client.wait_notification(WAIT).await.unwrap(), expected);

        assert_eq!(client.poll_irq(addr(10)).await.unwrap(), IrqReason::AtBoot);
        assert_eq!(client.poll_irq(addr(10)).await.unwrap(), IrqReason::None);
        client.take_notifications();
        assert_eq!(
            client.wait_notification(Duration::from_millis(1500)).await,
            Err(ClientError::NoResponse)
        );
    };

    test_with_background_process(&mut [&mut node.node], &line, test_task).await;
}

#[serial]
#[tokio::test]
async fn test_enumerate() {
    let mut line = SimLine::new();
    let mut node1 = TestNode::new(&mut line, MemEeprom::with_address(1));
    let mut node2 = TestNode::new(&mut line, MemEeprom::with_address(2));
    let mut node3 = TestNode::new(&mut line, MemEeprom::with_address(3));
    let mut client = get_controller(&mut line);

    let test_task = move |_ctx| async move {
        for a in 1..=3 {
            client.poll_irq(addr(a)).await.unwrap();
        }
        client.take_notifications();

        client.enumerate().await.unwrap();
        let mut seen = BTreeSet::new();
        while seen.len() < 3 {
            let n = client.wait_notification(WAIT).await.unwrap();
            assert_eq!(n.reason, IrqReason::Enumerate);
            seen.insert(n.address);
        }
        assert_eq!(seen.into_iter().collect::<Vec<_>>(), [1, 2, 3]);

        for a in 1..=3 {
            assert_eq!(client.poll_irq(addr(a)).await.unwrap(), IrqReason::Enumerate);
            assert_eq!(client.poll_irq(addr(a)).await.unwrap(), IrqReason::None);
        }
    };

    test_with_background_process(
        &mut [&mut node1.node, &mut node2.node, &mut node3.node],
        &line,
        test_task,
    )
    .await;
}

#[serial]
#[tokio::test]
async fn test_notification_does_not_block_requests() {
    let mut line = SimLine::new();
    let mut node = TestNode::new(&mut line, MemEeprom::with_address(1));
    let mut client = get_controller(&mut line);

    let test_task = move |mut ctx: TestContext| async move {
        // Keep talking to the node while it is repeating its boot notification
        for i in 0..100u8 {
            assert_eq!(client.noop(addr(1), &[i]).await.unwrap(), [i]);
            ctx.wait_for_ticks(10).await;
        }
        assert!(client
            .take_notifications()
            .iter()
            .all(|n| n.address == 1 && n.reason == IrqReason::AtBoot));
    };

    test_with_background_process(&mut [&mut node.node], &line, test_task).await;
}
