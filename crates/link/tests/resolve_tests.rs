//! Connection resolution tests
//!
//! Exercise the auto-detection fallback with fake discovery sources and the
//! read discipline shared by every link.
//!
//! Run with: `cargo test -p link --test resolve_tests`

use common::ClientInfo;
use link::{
    DeviceDiscovery, Link, LinkError, MemoryLink, NullLink, SerialDeviceInfo, UsbDeviceInfo,
    ensure_connected_link,
};
use std::cell::Cell;

/// Discovery that finds nothing and counts how often it was asked
#[derive(Default)]
struct CountingDiscovery {
    usb_calls: Cell<usize>,
    serial_calls: Cell<usize>,
}

impl DeviceDiscovery for CountingDiscovery {
    fn usb_devices(&self) -> link::Result<Vec<UsbDeviceInfo>> {
        self.usb_calls.set(self.usb_calls.get() + 1);
        Ok(Vec::new())
    }

    fn serial_devices(&self) -> link::Result<Vec<SerialDeviceInfo>> {
        self.serial_calls.set(self.serial_calls.get() + 1);
        Ok(Vec::new())
    }
}

/// Discovery that must never be consulted
struct PanickingDiscovery;

impl DeviceDiscovery for PanickingDiscovery {
    fn usb_devices(&self) -> link::Result<Vec<UsbDeviceInfo>> {
        panic!("auto-detection must not run for a working link");
    }

    fn serial_devices(&self) -> link::Result<Vec<SerialDeviceInfo>> {
        panic!("auto-detection must not run for a working link");
    }
}

#[test]
fn test_null_link_triggers_single_autodetect() {
    let discovery = CountingDiscovery::default();

    let err = ensure_connected_link(&ClientInfo::default(), Box::new(NullLink), &discovery)
        .unwrap_err();

    assert!(matches!(err, LinkError::AutoDetect(_)));
    assert_eq!(discovery.usb_calls.get(), 1);
    assert_eq!(discovery.serial_calls.get(), 1);
}

#[test]
fn test_working_link_skips_autodetect() {
    let memory = MemoryLink::new();
    let info = ClientInfo::socket("127.0.0.1", Some(6110));

    let (link, used) =
        ensure_connected_link(&info, Box::new(memory.clone()), &PanickingDiscovery).unwrap();

    assert!(link.is_connected());
    assert_eq!(used, info);
    assert_eq!(memory.connect_calls(), 1);
}

#[test]
fn test_other_connect_errors_are_not_retried() {
    let memory = MemoryLink::new();
    memory.set_broken(true);

    let err = ensure_connected_link(
        &ClientInfo::serial("/dev/ttyUSB0"),
        Box::new(memory.clone()),
        &PanickingDiscovery,
    )
    .unwrap_err();

    assert!(matches!(err, LinkError::Io(_)));
    assert_eq!(memory.connect_calls(), 1);
}

#[test]
fn test_recv_until_leaves_remainder_buffered() {
    let mut link = MemoryLink::new();
    link.connect().unwrap();
    link.inject(b"{\"a\":1}\n{\"b\":2}\nXY");

    assert_eq!(link.recv_until(b"\n").unwrap(), b"{\"a\":1}\n");
    assert_eq!(link.recv_until(b"\n").unwrap(), b"{\"b\":2}\n");
    assert_eq!(link.recv(2).unwrap(), b"XY");
}

#[test]
fn test_short_recv_is_a_timeout() {
    let mut link = MemoryLink::new();
    link.connect().unwrap();
    link.inject(b"12");

    let err = link.recv(3).unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(link.recv(2).unwrap(), b"12");
}
