use std::time::Duration;

use icarus_probe::{EncodingError, ProbeError, SerialProbe, fixtures};
use minerprobe_tests::{EchoDevice, IcarusEmulator};

#[test]
fn working_device_answers_both_fixtures() {
    let mut probe = SerialProbe::new(IcarusEmulator::default(), "emulator", Duration::from_secs(1));
    let results = probe.send_icarus_fixture().unwrap();
    assert!(results.iter().all(|result| result.matches()));
    assert_eq!(results[0].received, vec![0x06, 0x3c, 0x5e, 0x01]);
    assert_eq!(results[1].received, vec![0x8e, 0x0b, 0x31, 0xc5]);

    let device = probe.into_inner();
    let [first, second] = fixtures().unwrap();
    assert_eq!(device.received.len(), 2);
    assert_eq!(device.received[0][..], first.payload.as_bytes()[..]);
    assert_eq!(device.received[1][..], second.payload.as_bytes()[..]);
}

#[test]
fn unknown_work_gets_no_answer() {
    let mut probe = SerialProbe::new(IcarusEmulator::default(), "emulator", Duration::from_secs(1));
    let reply = probe.read_up_to(4).unwrap();
    assert!(reply.is_empty());
}

#[test]
fn generic_line_reply() {
    let mut probe = SerialProbe::new(EchoDevice::new(false), "echo", Duration::from_secs(1));
    let reply = probe.send_generic(&["0x68656c6c6f20776f726c640a"]).unwrap();
    assert_eq!(reply, b"hello world\n".to_vec());
}

#[test]
fn generic_reply_without_line_end_returns_partial() {
    let mut probe = SerialProbe::new(EchoDevice::new(true), "echo", Duration::from_secs(1));
    let reply = probe.send_generic(&["0x68656c6c6f", "world", "0x0a"]).unwrap();
    assert_eq!(reply, b"helloworld".to_vec());
}

#[test]
fn malformed_hex_is_encoding_error() {
    let mut probe = SerialProbe::new(EchoDevice::new(false), "echo", Duration::from_secs(1));
    match probe.send_generic(&["0xZZ"]) {
        Err(ProbeError::Encoding(EncodingError::InvalidHexCharacter { c: 'Z', .. })) => {}
        other => panic!("expected Encoding error, got {:?}", other),
    }
}
