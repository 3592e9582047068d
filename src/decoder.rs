use crate::packet::{
    BATTERY_MASK, EVENT_TYPE_WEIGHT, EVENT_TYPE_WEIGHT_STABLE, HEADER, MAX_WEIGHT_MESSAGE_LEN,
    METADATA_LEN, MSG_TYPE_STATUS, MSG_TYPE_WEIGHT,
};

/// Values decoded from a single frame. A field is `None` when the frame did not carry it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reading {
    /// Weight in grams, negative when the scale reads below its tare point
    pub weight: Option<f64>,
    /// Battery charge in %
    pub battery: Option<u8>,
}

/// Reassembles frames from the scale's notification stream.
///
/// The scale splits and merges messages across notifications freely, so bytes are accumulated
/// until a whole frame is present. The frame format is:
///
/// Start Byte | End Byte     | Meaning
/// 0          | 1            | A constant header with value [0xef, 0xdd]
/// 2          | 2            | Message type
/// 3          | 3            | Length `n` of the rest of the message after the event type
/// 4          | 4            | Event type
/// 5          | 4+n          | Payload
///
/// There is no checksum. A header that happens to occur inside another message's payload is
/// taken as a frame start.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add received bytes and decode at most one complete frame.
    ///
    /// When several complete frames are buffered only the first is decoded; the rest surface on
    /// later calls.
    ///
    /// Bytes are only discarded together with a complete frame. A stream that never contains a
    /// header keeps growing the buffer until [`FrameDecoder::reset`] is called.
    pub fn ingest(&mut self, data: &[u8]) -> Option<Reading> {
        self.buffer.extend_from_slice(data);
        let frame = self.take_frame()?;
        Some(decode_frame(&frame))
    }

    /// Drop all buffered bytes.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Remove the first complete frame, and any noise before it, from the buffer.
    fn take_frame(&mut self) -> Option<Vec<u8>> {
        let start = self.buffer.windows(HEADER.len()).position(|w| w == HEADER)?;
        let available = self.buffer.len() - start;
        if available < METADATA_LEN {
            return None;
        }

        let frame_len = METADATA_LEN + self.buffer[start + 3] as usize;
        if available < frame_len {
            return None;
        }

        Some(self.buffer.drain(..start + frame_len).skip(start).collect())
    }
}

/// Decode a complete frame. `frame` is at least [`METADATA_LEN`] bytes long.
fn decode_frame(frame: &[u8]) -> Reading {
    let msg_type = frame[2];
    let length = frame[3];
    let event_type = frame[4];

    let mut reading = Reading::default();
    match msg_type {
        MSG_TYPE_STATUS => reading.battery = Some(frame[4] & BATTERY_MASK),
        MSG_TYPE_WEIGHT
            if matches!(event_type, EVENT_TYPE_WEIGHT | EVENT_TYPE_WEIGHT_STABLE)
                && length <= MAX_WEIGHT_MESSAGE_LEN =>
        {
            // Stable readings carry three extra bytes ahead of the weight
            let offset = if event_type == EVENT_TYPE_WEIGHT_STABLE {
                METADATA_LEN + 3
            } else {
                METADATA_LEN
            };
            reading.weight = Some(decode_weight(frame.get(offset..).unwrap_or_default()));
        }
        _ => {}
    }
    reading
}

/// Weight payload layout:
///
/// Start Byte | End Byte     | Meaning
/// 0          | 2            | Magnitude, 24 bit little endian
/// 3          | 3            | Unused
/// 4          | 4            | Decimal exponent: the magnitude is divided by 10^unit
/// 5          | 5            | Sign, values above 1 mean negative
///
/// Bytes beyond the end of a short frame read as zero.
fn decode_weight(payload: &[u8]) -> f64 {
    let byte = |i: usize| payload.get(i).copied().unwrap_or(0);
    let magnitude = u32::from_le_bytes([byte(0), byte(1), byte(2), 0]);
    let unit = byte(4);
    let weight = magnitude as f64 / 10f64.powi(unit as i32);
    if byte(5) > 1 {
        -weight
    } else {
        weight
    }
}

#[cfg(test)]
fn weight_frame(event_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0xef, 0xdd, MSG_TYPE_WEIGHT, payload.len() as u8, event_type];
    frame.extend_from_slice(payload);
    frame
}

#[test]
fn test_weight_message() {
    let frame = weight_frame(0x05, &[0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    let reading = FrameDecoder::new().ingest(&frame).unwrap();
    assert_eq!(reading, Reading { weight: Some(16.0), battery: None });
}

#[test]
fn test_weight_message_scaled_negative() {
    // 0x0304d2 = 197842, unit 2, sign 2
    let frame = weight_frame(0x05, &[0xd2, 0x04, 0x03, 0x00, 0x02, 0x02, 0x00]);
    let reading = FrameDecoder::new().ingest(&frame).unwrap();
    assert_eq!(reading.weight, Some(-1978.42));
}

#[test]
fn test_sign_byte_one_is_positive() {
    let frame = weight_frame(0x05, &[0x7b, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00]);
    let reading = FrameDecoder::new().ingest(&frame).unwrap();
    assert_eq!(reading.weight, Some(12.3));
}

#[test]
fn test_stable_weight_message_skips_three_bytes() {
    let payload = [0xaa, 0xbb, 0xcc, 0x64, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00];
    let frame = weight_frame(0x0b, &payload);
    let reading = FrameDecoder::new().ingest(&frame).unwrap();
    assert_eq!(reading.weight, Some(10.0));
}

#[test]
fn test_battery_status_message() {
    let frame = [0xef, 0xdd, 0x08, 0x01, 0x85, 0x00];
    let reading = FrameDecoder::new().ingest(&frame).unwrap();
    assert_eq!(reading, Reading { weight: None, battery: Some(0x05) });
}

#[test]
fn test_unknown_message_is_consumed() {
    let mut decoder = FrameDecoder::new();
    let reading = decoder.ingest(&[0xef, 0xdd, 0x07, 0x02, 0x01, 0x02, 0x03]).unwrap();
    assert_eq!(reading, Reading::default());
    assert_eq!(decoder.buffered(), 0);
}

#[test]
fn test_unrecognised_weight_event_is_consumed() {
    let mut decoder = FrameDecoder::new();
    let reading = decoder.ingest(&weight_frame(0x07, &[0x10, 0, 0, 0, 0, 0, 0])).unwrap();
    assert_eq!(reading, Reading::default());
    assert_eq!(decoder.buffered(), 0);
}

#[test]
fn test_short_weight_payload_reads_missing_bytes_as_zero() {
    let mut decoder = FrameDecoder::new();
    let reading = decoder.ingest(&weight_frame(0x05, &[0x10, 0x00, 0x00])).unwrap();
    assert_eq!(reading.weight, Some(16.0));
    assert_eq!(decoder.buffered(), 0);

    let reading = decoder.ingest(&weight_frame(0x0b, &[0xaa, 0xbb])).unwrap();
    assert_eq!(reading.weight, Some(0.0));
    assert_eq!(decoder.buffered(), 0);
}

#[test]
fn test_oversized_weight_message_has_no_weight() {
    let mut payload = vec![0u8; 65];
    payload[0] = 0x10;
    let reading = FrameDecoder::new().ingest(&weight_frame(0x05, &payload)).unwrap();
    assert_eq!(reading.weight, None);
}

#[test]
fn test_split_at_every_boundary() {
    let frame = weight_frame(0x05, &[0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    for split in 1..frame.len() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.ingest(&frame[..split]), None, "split at {split}");
        let reading = decoder.ingest(&frame[split..]).unwrap();
        assert_eq!(reading.weight, Some(16.0), "split at {split}");
        assert_eq!(decoder.buffered(), 0);
    }
}

#[test]
fn test_junk_before_header() {
    let mut data = vec![0x01, 0xef, 0x33, 0xdd, 0xef];
    data.extend_from_slice(&[0xef, 0xdd, 0x08, 0x01, 0x85, 0x00]);
    let mut decoder = FrameDecoder::new();
    let reading = decoder.ingest(&data).unwrap();
    assert_eq!(reading.battery, Some(0x05));
    assert_eq!(decoder.buffered(), 0);
}

#[test]
fn test_partial_header_is_kept() {
    let mut decoder = FrameDecoder::new();
    assert_eq!(decoder.ingest(&[0x00, 0xef, 0xdd, 0x08]), None);
    assert_eq!(decoder.buffered(), 4);
    assert_eq!(decoder.ingest(&[0x01, 0x85, 0x00]).unwrap().battery, Some(0x05));
}

#[test]
fn test_one_frame_per_ingest() {
    let mut data = weight_frame(0x05, &[0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    data.extend_from_slice(&[0xef, 0xdd, 0x08, 0x01, 0x85, 0x00]);
    let mut decoder = FrameDecoder::new();

    assert_eq!(decoder.ingest(&data).unwrap().weight, Some(16.0));
    assert_eq!(decoder.buffered(), 6);
    assert_eq!(decoder.ingest(&[]).unwrap().battery, Some(0x05));
    assert_eq!(decoder.ingest(&[]), None);
}

#[test]
fn test_reset_discards_partial_frame() {
    let frame = weight_frame(0x05, &[0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    let mut decoder = FrameDecoder::new();
    assert_eq!(decoder.ingest(&frame[..6]), None);

    decoder.reset();
    assert_eq!(decoder.buffered(), 0);
    assert_eq!(decoder.ingest(&frame[6..]), None);
}
