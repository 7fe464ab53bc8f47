use std::time::Duration;

use hanbus_common::{
    crc::CrcWidth,
    frame::encode_frame,
    traits::AsyncByteSender,
    Command, CrcParams, Header, Packet,
};
use integration_tests::prelude::*;
use serial_test::serial;

fn addr(raw: u8) -> NodeAddress {
    NodeAddress::new(raw).unwrap()
}

fn wire(header: Header, address: u8, command: u8, params: &[u8]) -> Vec<u8> {
    let mut pkt = Packet::new(header, address, command, params).unwrap();
    pkt.seal(header.crc_width(), &CrcParams::DEFAULT, || {});
    let mut out: heapless::Vec<u8, 64> = heapless::Vec::new();
    encode_frame(pkt.as_bytes(), &mut out).unwrap();
    out.to_vec()
}

#[serial]
#[tokio::test]
async fn test_identity_and_noop() {
    let _ = env_logger::try_init();
    let mut line = SimLine::new();
    let mut node = TestNode::new(&mut line, MemEeprom::new());
    let mut client = get_controller(&mut line);

    let test_task = move |_ctx| async move {
        // An erased store gives the default address
        let id = client.node_identity(addr(0x1F)).await.unwrap();
        assert_eq!(id.module_id, 0x1007);
        assert_eq!(id.firmware_version, 0);

        let data = [0x00, 0x02, 0x03, 0x1A, 0xFF];
        assert_eq!(client.noop(addr(0x1F), &data).await.unwrap(), data);
        // Idempotent
        assert_eq!(client.noop(addr(0x1F), &data).await.unwrap(), data);
    };

    test_with_background_process(&mut [&mut node.node], &line, test_task).await;
}

#[serial]
#[tokio::test]
async fn test_crc16_exchange() {
    let mut line = SimLine::new();
    let mut node = TestNode::new(&mut line, MemEeprom::with_address(4));
    let mut client = get_controller(&mut line);
    let mut monitor = LineMonitor::new(line.new_receiver());

    let test_task = move |_ctx| async move {
        client.set_crc_width(CrcWidth::Crc16);
        assert_eq!(client.noop(addr(4), &[1, 2]).await.unwrap(), [1, 2]);
        let responses = monitor.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0][0], u8::from(Header::Ack16));
        assert_eq!(responses[0].len(), 3 + 2 + 2);
    };

    test_with_background_process(&mut [&mut node.node], &line, test_task).await;
}

#[serial]
#[tokio::test]
async fn test_address_privacy() {
    let mut line = SimLine::new();
    let mut node1 = TestNode::new(&mut line, MemEeprom::with_address(1));
    let mut node2 = TestNode::new(&mut line, MemEeprom::with_address(2));
    let mut client = get_controller(&mut line);
    let mut monitor = LineMonitor::new(line.new_receiver());
    let board1 = node1.board.clone();
    let board2 = node2.board.clone();

    let test_task = move |_ctx| async move {
        client.set_output(addr(2), 0, true).await.unwrap();
        assert!(board2.state().outputs[0]);
        assert!(!board1.state().outputs[0]);

        let responses = monitor.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0][1], 2);

        // Nobody answers an unused address
        client.set_timeout(Duration::from_millis(50));
        assert_eq!(
            client.noop(addr(3), &[]).await,
            Err(ClientError::NoResponse)
        );
        assert!(monitor.responses().is_empty());
    };

    test_with_background_process(&mut [&mut node1.node, &mut node2.node], &line, test_task)
        .await;
}

#[serial]
#[tokio::test]
async fn test_broadcast_is_never_answered() {
    let mut line = SimLine::new();
    let mut node1 = TestNode::new(&mut line, MemEeprom::with_address(1));
    let mut node2 = TestNode::new(&mut line, MemEeprom::with_address(2));
    let mut client = get_controller(&mut line);
    let mut monitor = LineMonitor::new(line.new_receiver());
    let board1 = node1.board.clone();

    let test_task = move |mut ctx: TestContext| async move {
        // Silence the boot notifications first
        client.poll_irq(addr(1)).await.unwrap();
        client.poll_irq(addr(2)).await.unwrap();
        monitor.frames();
        let enables = board1.state().driver_enables;

        for command in [Command::Noop, Command::Output, Command::GetVolts] {
            client.broadcast(command.into(), &[0, 1, 0]).await.unwrap();
        }
        ctx.wait_for_ticks(50).await;

        // Only the requests themselves were on the line
        let frames = monitor.frames();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f[0] == u8::from(Header::Request8)));
        assert_eq!(board1.state().driver_enables, enables);
        assert!(!board1.state().outputs[0]);
    };

    test_with_background_process(&mut [&mut node1.node, &mut node2.node], &line, test_task)
        .await;
}

#[serial]
#[tokio::test]
async fn test_outputs() {
    let mut line = SimLine::new();
    let mut node = TestNode::new(&mut line, MemEeprom::with_address(7));
    let mut client = get_controller(&mut line);
    let board = node.board.clone();

    let test_task = move |_ctx| async move {
        client.set_output(addr(7), 1, true).await.unwrap();
        assert_eq!(board.state().outputs, [false, true]);
        assert!(client.read_output(addr(7), 1).await.unwrap());
        assert!(!client.read_output(addr(7), 0).await.unwrap());
        client.set_output(addr(7), 1, false).await.unwrap();
        assert_eq!(board.state().outputs, [false, false]);
        assert!(!client.read_output(addr(7), 1).await.unwrap());

        // Only two channels
        assert_eq!(
            client.set_output(addr(7), 2, true).await,
            Err(ClientError::Nak {
                address: 7,
                command: Command::Output.into()
            })
        );
        // Unknown sub-command, and a nonzero result byte in the request
        let output = Command::Output.into();
        assert!(client.request(addr(7), output, &[0, 3, 0]).await.is_err());
        assert!(client.request(addr(7), output, &[0, 1, 1]).await.is_err());
        assert_eq!(board.state().outputs, [false, false]);
    };

    test_with_background_process(&mut [&mut node.node], &line, test_task).await;
}

#[serial]
#[tokio::test]
async fn test_bad_requests_are_refused() {
    let mut line = SimLine::new();
    let mut node = TestNode::new(&mut line, MemEeprom::with_address(9));
    let mut client = get_controller(&mut line);

    let test_task = move |_ctx| async move {
        // Unknown command code
        assert!(matches!(
            client.request(addr(9), 0x55, &[]).await,
            Err(ClientError::Nak { .. })
        ));
        // Wrong length
        assert!(matches!(
            client.request(addr(9), Command::GetNodeId.into(), &[0; 3]).await,
            Err(ClientError::Nak { .. })
        ));
        // Enumerate is only acted on as a broadcast
        assert!(matches!(
            client.request(addr(9), Command::Enumerate.into(), &[]).await,
            Err(ClientError::Nak { .. })
        ));
        // The node still works
        client.noop(addr(9), &[]).await.unwrap();
    };

    test_with_background_process(&mut [&mut node.node], &line, test_task).await;
}

#[serial]
#[tokio::test]
async fn test_comm_status_counts_errors() {
    let mut line = SimLine::new();
    let mut node = TestNode::new(&mut line, MemEeprom::with_address(3));
    let mut client = get_controller(&mut line);
    let mut raw = line.new_sender();

    let test_task = move |mut ctx: TestContext| async move {
        let status = client.comm_status(addr(3), false).await.unwrap();
        assert_eq!((status.crc_errors, status.timeouts), (0, 0));

        // A request with a corrupted parameter byte
        let mut bad = wire(Header::Request8, 3, 0x00, &[0x40]);
        assert_eq!(bad[6], 0x40);
        bad[6] = 0x41;
        raw.send(&bad).await.unwrap();

        // A frame which never ends
        raw.send(&[0x02, 0x41, 0x04]).await.unwrap();
        ctx.wait_for_ticks(300).await;

        let status = client.comm_status(addr(3), true).await.unwrap();
        assert_eq!(status.crc_errors, 1);
        assert_eq!(status.timeouts, 1);

        let status = client.comm_status(addr(3), false).await.unwrap();
        assert_eq!((status.crc_errors, status.timeouts), (0, 0));
    };

    test_with_background_process(&mut [&mut node.node], &line, test_task).await;
}

#[serial]
#[tokio::test]
async fn test_frame_bounds() {
    let mut line = SimLine::new();
    let mut node = TestNode::new(&mut line, MemEeprom::with_address(3));
    let mut client = get_controller(&mut line);
    let mut raw = line.new_sender();
    let mut monitor = LineMonitor::new(line.new_receiver());

    let test_task = move |mut ctx: TestContext| async move {
        client.poll_irq(addr(3)).await.unwrap();
        monitor.frames();

        // Shorter than the fixed overhead
        raw.send(&[0x02, 0x41, 0x1A, 0x03, 0x03]).await.unwrap();
        // Longer than a packet can be
        let mut long = vec![0x02, 0x41, 0x1A, 0x03, 0x20];
        long.extend([0x40; 20]);
        long.push(0x03);
        raw.send(&long).await.unwrap();
        ctx.wait_for_ticks(20).await;

        assert!(monitor.responses().is_empty());
        // Neither counts as a CRC error
        let status = client.comm_status(addr(3), false).await.unwrap();
        assert_eq!(status.crc_errors, 0);
    };

    test_with_background_process(&mut [&mut node.node], &line, test_task).await;
}

#[serial]
#[tokio::test]
async fn test_survives_line_noise() {
    use rand::Rng;

    let mut line = SimLine::new();
    let mut node = TestNode::new(&mut line, MemEeprom::with_address(12));
    let mut client = get_controller(&mut line);
    let mut raw = line.new_sender();

    let test_task = move |mut ctx: TestContext| async move {
        let noise: Vec<u8> = {
            let mut rng = rand::rng();
            (0..2000).map(|_| rng.random()).collect()
        };
        for chunk in noise.chunks(50) {
            raw.send(chunk).await.unwrap();
            ctx.wait_for_ticks(2).await;
        }
        // Let any partial frame time out
        ctx.wait_for_ticks(300).await;

        assert_eq!(client.noop(addr(12), &[5]).await.unwrap(), [5]);
    };

    test_with_background_process(&mut [&mut node.node], &line, test_task).await;
}
