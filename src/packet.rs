//! Wire constants and outbound frame encoding.
//!
//! Every message, in both directions, starts with the two byte header `EF DD` followed by a
//! message type byte. Inbound messages then carry a length byte and an event type byte, see
//! [`crate::FrameDecoder`]. Outbound messages are just the header, the type and a fixed payload.

use std::fmt;

use hex::FromHexError;

pub const HEADER: [u8; 2] = [0xef, 0xdd];

/// Header, message type, length and event type.
pub(crate) const METADATA_LEN: usize = 5;

pub(crate) const MSG_TYPE_STATUS: u8 = 0x08;
pub(crate) const MSG_TYPE_WEIGHT: u8 = 0x0c;
pub(crate) const EVENT_TYPE_WEIGHT: u8 = 0x05;
pub(crate) const EVENT_TYPE_WEIGHT_STABLE: u8 = 0x0b;
pub(crate) const BATTERY_MASK: u8 = 0x7f;
pub(crate) const MAX_WEIGHT_MESSAGE_LEN: u8 = 64;

const MSG_TYPE_HEARTBEAT: u8 = 0x00;
const MSG_TYPE_IDENT: u8 = 0x0b;
const MSG_TYPE_CONFIG: u8 = 0x0c;
const MSG_TYPE_TARE: u8 = 0x04;
const MSG_TYPE_TIMER: u8 = 0x0d;

const PAYLOAD_HEARTBEAT: [u8; 4] = [0x02, 0x00, 0x02, 0x00];
// ASCII "012345678901234" followed by two trailing bytes the scale expects
const PAYLOAD_IDENT: [u8; 17] = [
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x30, 0x31, 0x32, 0x33, 0x34,
    0x9a, 0x6d,
];
const PAYLOAD_CONFIG: [u8; 11] = [0x09, 0x00, 0x01, 0x01, 0x02, 0x02, 0x01, 0x03, 0x04, 0x11, 0x06];
const PAYLOAD_TARE: [u8; 17] = [0x00; 17];
const PAYLOAD_TIMER_START: [u8; 4] = [0x00, 0x00, 0x00, 0x00];
const PAYLOAD_TIMER_STOP: [u8; 4] = [0x00, 0x02, 0x00, 0x02];
const PAYLOAD_TIMER_RESET: [u8; 4] = [0x00, 0x01, 0x00, 0x01];

/// A message the client sends to the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Heartbeat,
    Identify,
    Configure,
    Tare,
    StartTimer,
    StopTimer,
    ResetTimer,
}

impl Command {
    pub fn msg_type(self) -> u8 {
        match self {
            Command::Heartbeat => MSG_TYPE_HEARTBEAT,
            Command::Identify => MSG_TYPE_IDENT,
            Command::Configure => MSG_TYPE_CONFIG,
            Command::Tare => MSG_TYPE_TARE,
            Command::StartTimer | Command::StopTimer | Command::ResetTimer => MSG_TYPE_TIMER,
        }
    }

    pub fn payload(self) -> &'static [u8] {
        match self {
            Command::Heartbeat => &PAYLOAD_HEARTBEAT,
            Command::Identify => &PAYLOAD_IDENT,
            Command::Configure => &PAYLOAD_CONFIG,
            Command::Tare => &PAYLOAD_TARE,
            Command::StartTimer => &PAYLOAD_TIMER_START,
            Command::StopTimer => &PAYLOAD_TIMER_STOP,
            Command::ResetTimer => &PAYLOAD_TIMER_RESET,
        }
    }

    /// Build the bytes to write for this command.
    pub fn frame(self) -> Vec<u8> {
        encode_frame(self.msg_type(), self.payload())
    }

    /// Name used in skip and error log lines.
    pub(crate) fn action(self) -> &'static str {
        match self {
            Command::Heartbeat => "Heartbeat",
            Command::Identify => "Identify",
            Command::Configure => "Configure",
            Command::Tare => "Tare",
            Command::StartTimer => "Timer start",
            Command::StopTimer => "Timer stop",
            Command::ResetTimer => "Timer reset",
        }
    }
}

impl fmt::Display for Command {
    /// Formats as `TT: PAYLOAD` in upper case hex, the form used in write logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}: {}", self.msg_type(), hex::encode_upper(self.payload()))
    }
}

/// Build an outbound frame: header, message type, then the payload verbatim.
pub fn encode_frame(msg_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER.len() + 1 + payload.len());
    frame.extend_from_slice(&HEADER);
    frame.push(msg_type);
    frame.extend_from_slice(payload);
    frame
}

/// Build an outbound frame from a two digit hex message type and a hex payload.
///
/// An empty payload yields a frame holding only the header and the type.
pub fn encode_packet(msg_type: &str, payload: &str) -> Result<Vec<u8>, FromHexError> {
    let mut msg_type_byte = [0u8; 1];
    hex::decode_to_slice(msg_type, &mut msg_type_byte)?;
    let payload = hex::decode(payload)?;
    Ok(encode_frame(msg_type_byte[0], &payload))
}

/// Render bytes as lower case hex pairs separated by spaces, e.g. `ef dd 0c`.
pub fn to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn test_encode_packet_with_payload() {
    let frame = encode_packet("04", "010203").unwrap();
    assert_eq!(frame, vec![0xef, 0xdd, 0x04, 0x01, 0x02, 0x03]);
}

#[test]
fn test_encode_packet_empty_payload() {
    let frame = encode_packet("0D", "").unwrap();
    assert_eq!(frame, vec![0xef, 0xdd, 0x0d]);
}

#[test]
fn test_encode_packet_accepts_upper_case() {
    let frame = encode_packet("0B", "9A6D").unwrap();
    assert_eq!(frame, vec![0xef, 0xdd, 0x0b, 0x9a, 0x6d]);
}

#[test]
fn test_encode_packet_odd_payload() {
    assert_eq!(encode_packet("04", "012"), Err(FromHexError::OddLength));
}

#[test]
fn test_encode_packet_bad_msg_type() {
    assert!(encode_packet("004", "").is_err());
    assert!(encode_packet("zz", "").is_err());
}

#[test]
fn test_command_frames_match_hex_form() {
    let cases = [
        (Command::Heartbeat, "00", "02000200"),
        (Command::Identify, "0B", "3031323334353637383930313233349A6D"),
        (Command::Configure, "0C", "0900010102020103041106"),
        (Command::Tare, "04", "0000000000000000000000000000000000"),
        (Command::StartTimer, "0D", "00000000"),
        (Command::StopTimer, "0D", "00020002"),
        (Command::ResetTimer, "0D", "00010001"),
    ];
    for (command, msg_type, payload) in cases {
        assert_eq!(command.frame(), encode_packet(msg_type, payload).unwrap(), "{command:?}");
        assert_eq!(command.to_string(), format!("{msg_type}: {payload}"));
    }
}

#[test]
fn test_to_hex() {
    assert_eq!(to_hex(&[0xef, 0xdd, 0x0c, 0x00]), "ef dd 0c 00");
    assert_eq!(to_hex(&[]), "");
}
