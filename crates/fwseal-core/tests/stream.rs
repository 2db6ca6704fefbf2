//! Transfers over real sockets, with the bootloader on the far end.

mod common;

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use common::*;
use fwseal_core::bundle::encode;
use fwseal_core::session::TransferSession;
use fwseal_core::transport::{StreamChannel, open_port};

/// Default handshake budget; the device thread may start late.
fn socket_config(max_frame_payload: usize) -> TransferConfig {
    TransferConfig {
        max_frame_payload,
        ..Default::default()
    }
}

#[test]
fn test_update_over_tcp() {
    let keys = test_keys();
    let image = firmware(2000);
    let bundle = encode(&image, 21, "tcp release", &keys).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let device_keys = keys.opening_keys();
    let device = thread::spawn(move || {
        let (socket, _) = listener.accept().unwrap();
        let mut channel = StreamChannel::new(socket, "device");
        let mut bootloader = Bootloader::new(device_keys);
        serve_stream(&mut channel, &mut bootloader, 256).unwrap();
        bootloader
    });

    let channel = StreamChannel::connect_tcp(&addr).unwrap();
    let mut session =
        TransferSession::new(channel, socket_config(256), Arc::new(keys.opening_keys()));
    let report = session.run(bundle.as_bytes()).unwrap();
    session.request_boot().unwrap();

    let bootloader = device.join().unwrap();
    assert_eq!(report.firmware_len, 2000);
    assert_eq!(bootloader.stage, DeviceStage::Booted);
    assert_eq!(bootloader.installed, Some(image));
    assert_eq!(bootloader.message.as_deref(), Some("tcp release"));
}

#[cfg(unix)]
#[test]
fn test_update_over_unix_socket() {
    use std::os::unix::net::UnixListener;

    let keys = test_keys();
    let image = firmware(300);
    let bundle = encode(&image, 2, "uart", &keys).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("uart.sock");

    let listener = UnixListener::bind(&path).unwrap();
    let device_keys = keys.opening_keys();
    let device = thread::spawn(move || {
        let (socket, _) = listener.accept().unwrap();
        let mut channel = StreamChannel::new(socket, "device");
        let mut bootloader = Bootloader::new(device_keys);
        serve_stream(&mut channel, &mut bootloader, 64).unwrap();
        bootloader
    });

    let channel = open_port(&format!("unix:{}", path.display())).unwrap();
    let mut session =
        TransferSession::new(channel, socket_config(64), Arc::new(keys.opening_keys()));
    session.run(bundle.as_bytes()).unwrap();
    session.request_boot().unwrap();

    let bootloader = device.join().unwrap();
    assert_eq!(bootloader.installed, Some(image));
    assert_eq!(bootloader.stage, DeviceStage::Booted);
}
