//! Wire framing for the v3.3 local protocol.
//!
//! ```text
//! prefix   seq      command  length   [retcode] payload   crc32    suffix
//! 000055aa xxxxxxxx xxxxxxxx xxxxxxxx [xxxxxxxx] ........ xxxxxxxx 0000aa55
//! ```
//!
//! All integers are big-endian. `length` counts every byte after the
//! 16-byte header. The CRC covers everything from the prefix to the end of
//! the payload. Frames sent by a device carry a 4-byte return code ahead of
//! the payload; frames sent to a device do not.
//!
//! [`decode`] works on a complete buffer; [`FrameDecoder`] buffers a byte
//! stream and yields one frame per call.

use bytes::{Buf, BytesMut};
use serde_json::Value;

use crate::cipher::{BLOCK_LEN, Cipher};
use crate::dps::DpsMap;
use crate::error::Error;

pub const PREFIX: u32 = 0x0000_55AA;
pub const SUFFIX: u32 = 0x0000_AA55;

pub const HEADER_LEN: usize = 16;
const RETCODE_LEN: usize = 4;
/// CRC32 plus suffix.
const TRAILER_LEN: usize = 8;

/// Upper bound on the declared length; anything larger is treated as garbage.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const PREFIX_BYTES: [u8; 4] = PREFIX.to_be_bytes();

/// `"3.3"` followed by twelve zero bytes, in front of CONTROL/STATUS ciphertext.
const VERSION_HEADER: [u8; 15] = *b"3.3\0\0\0\0\0\0\0\0\0\0\0\0";

// ── CommandCode ──────────────────────────────────────────────────────

/// The command field of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    Control,
    Status,
    HeartBeat,
    DpQuery,
    ControlNew,
    DpQueryNew,
    UpdateDps,
    UdpNew,
    Other(u32),
}

impl CommandCode {
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Control => 0x07,
            Self::Status => 0x08,
            Self::HeartBeat => 0x09,
            Self::DpQuery => 0x0a,
            Self::ControlNew => 0x0d,
            Self::DpQueryNew => 0x10,
            Self::UpdateDps => 0x12,
            Self::UdpNew => 0x13,
            Self::Other(code) => code,
        }
    }

    /// Whether outbound payloads for this command start with the version header.
    pub fn carries_version_header(self) -> bool {
        !matches!(
            self,
            Self::DpQuery | Self::DpQueryNew | Self::HeartBeat | Self::UpdateDps | Self::UdpNew
        )
    }
}

impl From<u32> for CommandCode {
    fn from(code: u32) -> Self {
        match code {
            0x07 => Self::Control,
            0x08 => Self::Status,
            0x09 => Self::HeartBeat,
            0x0a => Self::DpQuery,
            0x0d => Self::ControlNew,
            0x10 => Self::DpQueryNew,
            0x12 => Self::UpdateDps,
            0x13 => Self::UdpNew,
            other => Self::Other(other),
        }
    }
}

impl From<CommandCode> for u32 {
    fn from(code: CommandCode) -> Self {
        code.as_u32()
    }
}

// ── Frame ────────────────────────────────────────────────────────────

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub seq: u32,
    pub command: CommandCode,
    /// Present on frames sent by a device.
    pub return_code: Option<u32>,
    /// Decrypted JSON payload. `None` for empty payloads (heartbeats, acks).
    pub payload: Option<Value>,
    /// Data Points extracted from the payload.
    pub dps: DpsMap,
}

// ── Encoding ─────────────────────────────────────────────────────────

/// Encode a client-to-device frame.
///
/// `None` produces an empty, unencrypted payload (heartbeats).
pub fn encode(
    seq: u32,
    command: CommandCode,
    payload: Option<&Value>,
    cipher: &Cipher,
) -> Result<Vec<u8>, Error> {
    let body = encrypt_payload(command, payload, cipher)?;
    assemble(seq, command, None, &body)
}

/// Encode a device-to-client frame, which carries a return code.
///
/// Used by device simulators and tests.
pub fn encode_reply(
    seq: u32,
    command: CommandCode,
    return_code: u32,
    payload: Option<&Value>,
    cipher: &Cipher,
) -> Result<Vec<u8>, Error> {
    let body = encrypt_payload(command, payload, cipher)?;
    assemble(seq, command, Some(return_code), &body)
}

fn encrypt_payload(
    command: CommandCode,
    payload: Option<&Value>,
    cipher: &Cipher,
) -> Result<Vec<u8>, Error> {
    let Some(json) = payload else {
        return Ok(Vec::new());
    };

    let plaintext = serde_json::to_vec(json).map_err(|e| Error::Payload {
        reason: format!("failed to serialize payload: {e}"),
        raw: Vec::new(),
    })?;
    let ciphertext = cipher.encrypt(&plaintext);

    if command.carries_version_header() {
        let mut body = Vec::with_capacity(VERSION_HEADER.len() + ciphertext.len());
        body.extend_from_slice(&VERSION_HEADER);
        body.extend_from_slice(&ciphertext);
        Ok(body)
    } else {
        Ok(ciphertext)
    }
}

/// Lay out header, optional return code, body, CRC, and suffix.
pub(crate) fn assemble(
    seq: u32,
    command: CommandCode,
    return_code: Option<u32>,
    body: &[u8],
) -> Result<Vec<u8>, Error> {
    let retcode_len = if return_code.is_some() { RETCODE_LEN } else { 0 };
    let declared = retcode_len + body.len() + TRAILER_LEN;
    let length = u32::try_from(declared).map_err(|_| Error::InvalidLength { declared })?;

    let mut buf = Vec::with_capacity(HEADER_LEN + declared);
    buf.extend_from_slice(&PREFIX_BYTES);
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&command.as_u32().to_be_bytes());
    buf.extend_from_slice(&length.to_be_bytes());
    if let Some(code) = return_code {
        buf.extend_from_slice(&code.to_be_bytes());
    }
    buf.extend_from_slice(body);

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());
    buf.extend_from_slice(&SUFFIX.to_be_bytes());
    Ok(buf)
}

// ── Decoding ─────────────────────────────────────────────────────────

/// Decode the frame at the start of `buf`.
///
/// Returns the frame and the number of bytes it occupied. A buffer that
/// holds only part of a frame fails with [`Error::Framing`].
pub fn decode(buf: &[u8], cipher: &Cipher) -> Result<(Frame, usize), Error> {
    let total = frame_len(buf)?;
    let frame = parse_frame(&buf[..total], cipher)?;
    Ok((frame, total))
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[at..at + 4]);
    u32::from_be_bytes(word)
}

/// Validate prefix, declared length, availability, and suffix.
///
/// Returns the total byte length of the frame at the start of `buf`.
fn frame_len(buf: &[u8]) -> Result<usize, Error> {
    if buf.len() < PREFIX_BYTES.len() {
        return Err(Error::Framing {
            needed: HEADER_LEN - buf.len(),
        });
    }

    let prefix = read_u32(buf, 0);
    if prefix != PREFIX {
        return Err(Error::InvalidPrefix { found: prefix });
    }

    if buf.len() < HEADER_LEN {
        return Err(Error::Framing {
            needed: HEADER_LEN - buf.len(),
        });
    }

    let declared = usize::try_from(read_u32(buf, 12)).unwrap_or(usize::MAX);
    if !(TRAILER_LEN..=MAX_FRAME_LEN).contains(&declared) {
        return Err(Error::InvalidLength { declared });
    }

    let total = HEADER_LEN + declared;
    if buf.len() < total {
        return Err(Error::Framing {
            needed: total - buf.len(),
        });
    }

    let suffix = read_u32(buf, total - 4);
    if suffix != SUFFIX {
        return Err(Error::InvalidSuffix { found: suffix });
    }

    Ok(total)
}

/// Whether `body` leads with a device return code.
///
/// The code is a word whose top three bytes are zero. Ciphertext can start
/// that way too, so the rest of the body must also have a payload length.
/// A client body never does once four bytes are taken off.
fn has_return_code(body: &[u8]) -> bool {
    body.len() >= RETCODE_LEN
        && read_u32(body, 0) & 0xFFFF_FF00 == 0
        && is_payload_len(body.len() - RETCODE_LEN)
}

/// Empty, whole AES blocks, or whole blocks behind the version header.
fn is_payload_len(len: usize) -> bool {
    len % BLOCK_LEN == 0
        || len
            .checked_sub(VERSION_HEADER.len())
            .is_some_and(|rest| rest % BLOCK_LEN == 0)
}

/// Check the CRC and decrypt the payload of exactly one frame.
fn parse_frame(frame: &[u8], cipher: &Cipher) -> Result<Frame, Error> {
    let crc_at = frame.len() - TRAILER_LEN;
    let expected = read_u32(frame, crc_at);
    let actual = crc32fast::hash(&frame[..crc_at]);
    if expected != actual {
        return Err(Error::Integrity { expected, actual });
    }

    let seq = read_u32(frame, 4);
    let command = CommandCode::from(read_u32(frame, 8));
    let mut body = &frame[HEADER_LEN..crc_at];

    let mut return_code = None;
    if has_return_code(body) {
        return_code = Some(read_u32(body, 0));
        body = &body[RETCODE_LEN..];
    }

    if body.starts_with(&VERSION_HEADER[..3]) && body.len() >= VERSION_HEADER.len() {
        body = &body[VERSION_HEADER.len()..];
    }

    if body.is_empty() {
        return Ok(Frame {
            seq,
            command,
            return_code,
            payload: None,
            dps: DpsMap::new(),
        });
    }

    let plaintext = cipher.decrypt(body).map_err(|e| Error::Payload {
        reason: e.to_string(),
        raw: body.to_vec(),
    })?;
    let payload: Value = serde_json::from_slice(&plaintext).map_err(|e| Error::Payload {
        reason: format!("decrypted payload is not JSON: {e}"),
        raw: plaintext.clone(),
    })?;
    let dps = DpsMap::from_payload(&payload);

    Ok(Frame {
        seq,
        command,
        return_code,
        payload: Some(payload),
        dps,
    })
}

// ── FrameDecoder ─────────────────────────────────────────────────────

/// Incremental decoder over a byte stream.
///
/// Feed raw reads with [`feed`](Self::feed), then call
/// [`next_frame`](Self::next_frame) until it returns `Ok(None)`. Partial
/// frames stay buffered across calls, and leading garbage is skipped up to
/// the next prefix.
///
/// An `Err` means one complete frame was consumed and rejected (bad CRC,
/// undecryptable payload). The decoder stays usable.
pub struct FrameDecoder {
    buf: BytesMut,
    cipher: Cipher,
}

impl FrameDecoder {
    pub fn new(cipher: Cipher) -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            cipher,
        }
    }

    /// Append bytes read from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        loop {
            self.resync();

            let total = match frame_len(&self.buf) {
                Ok(total) => total,
                Err(Error::Framing { .. }) => return Ok(None),
                Err(e) => {
                    // Bad length or suffix: this prefix was not a frame start.
                    tracing::warn!(error = %e, "discarding corrupt frame header");
                    self.buf.advance(1);
                    continue;
                }
            };

            let raw = self.buf.split_to(total);
            return parse_frame(&raw, &self.cipher).map(Some);
        }
    }

    /// Advance the buffer to the next prefix.
    ///
    /// Without a prefix in sight, keep only a tail that could be its first bytes.
    fn resync(&mut self) {
        let found = self
            .buf
            .windows(PREFIX_BYTES.len())
            .position(|window| window == PREFIX_BYTES);

        let skip = match found {
            Some(at) => at,
            None => self.buf.len().saturating_sub(PREFIX_BYTES.len() - 1),
        };

        if skip > 0 {
            tracing::warn!(
                skipped = skip,
                bytes = %hex::encode(&self.buf[..skip.min(64)]),
                "discarding bytes before frame prefix"
            );
            self.buf.advance(skip);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cipher::DeviceKey;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn cipher() -> Cipher {
        Cipher::new(DeviceKey::from_local_key("0123456789abcdef").unwrap())
    }

    fn control_payload() -> Value {
        json!({ "devId": "dev1", "uid": "dev1", "t": "1700000000", "dps": { "152": "AggO" } })
    }

    #[test]
    fn command_codes_round_trip() {
        for code in [0x07, 0x08, 0x09, 0x0a, 0x0d, 0x10, 0x12, 0x13, 0x42] {
            assert_eq!(CommandCode::from(code).as_u32(), code);
        }
        assert_eq!(CommandCode::from(0x42), CommandCode::Other(0x42));
    }

    #[test]
    fn encoded_layout() {
        let bytes = encode(7, CommandCode::Control, Some(&control_payload()), &cipher()).unwrap();

        assert_eq!(&bytes[..4], &[0x00, 0x00, 0x55, 0xAA]);
        assert_eq!(&bytes[4..8], &7u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &0x07u32.to_be_bytes());
        assert_eq!(
            usize::try_from(read_u32(&bytes, 12)).unwrap(),
            bytes.len() - HEADER_LEN
        );
        assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + 3], b"3.3");
        assert_eq!(&bytes[bytes.len() - 4..], &[0x00, 0x00, 0xAA, 0x55]);

        let crc_at = bytes.len() - TRAILER_LEN;
        assert_eq!(read_u32(&bytes, crc_at), crc32fast::hash(&bytes[..crc_at]));
    }

    #[test]
    fn query_has_no_version_header() {
        let payload = json!({ "gwId": "dev1", "devId": "dev1" });
        let bytes = encode(1, CommandCode::DpQuery, Some(&payload), &cipher()).unwrap();
        let body_len = bytes.len() - HEADER_LEN - TRAILER_LEN;
        assert_eq!(body_len % 16, 0);
        assert_ne!(&bytes[HEADER_LEN..HEADER_LEN + 3], b"3.3");
    }

    #[test]
    fn heartbeat_is_header_and_trailer_only() {
        let bytes = encode(3, CommandCode::HeartBeat, None, &cipher()).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + TRAILER_LEN);

        let (frame, used) = decode(&bytes, &cipher()).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(frame.command, CommandCode::HeartBeat);
        assert!(frame.payload.is_none());
        assert!(frame.dps.is_empty());
    }

    #[test]
    fn decodes_control_frame() {
        let bytes = encode(9, CommandCode::Control, Some(&control_payload()), &cipher()).unwrap();
        let (frame, used) = decode(&bytes, &cipher()).unwrap();

        assert_eq!(used, bytes.len());
        assert_eq!(frame.seq, 9);
        assert_eq!(frame.command, CommandCode::Control);
        assert_eq!(frame.return_code, None);
        assert_eq!(frame.payload, Some(control_payload()));
        assert_eq!(frame.dps, DpsMap::single(152, "AggO"));
    }

    #[test]
    fn decodes_device_reply_with_return_code() {
        let payload = json!({ "devId": "dev1", "dps": { "8": 100, "153": "AgoAEAUA" } });
        let bytes = encode_reply(4, CommandCode::Status, 0, Some(&payload), &cipher()).unwrap();
        let (frame, _) = decode(&bytes, &cipher()).unwrap();

        assert_eq!(frame.return_code, Some(0));
        assert_eq!(frame.command, CommandCode::Status);
        assert_eq!(frame.dps.len(), 2);
    }

    #[test]
    fn empty_ack_with_return_code() {
        let bytes = encode_reply(5, CommandCode::Control, 0, None, &cipher()).unwrap();
        let (frame, _) = decode(&bytes, &cipher()).unwrap();
        assert_eq!(frame.return_code, Some(0));
        assert!(frame.payload.is_none());
    }

    #[test]
    fn query_ciphertext_with_leading_zero_bytes_keeps_its_first_word() {
        // Encrypts to a first block of 00 00 00 f0 ...
        let payload = json!({ "a": "0000be906c" });
        let bytes = encode(6, CommandCode::DpQuery, Some(&payload), &cipher()).unwrap();
        assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + 3], &[0, 0, 0]);

        let (frame, _) = decode(&bytes, &cipher()).unwrap();
        assert_eq!(frame.return_code, None);
        assert_eq!(frame.payload, Some(payload));
    }

    #[test]
    fn return_code_needs_a_payload_shaped_remainder() {
        assert!(has_return_code(&[0, 0, 0, 1]));
        assert!(has_return_code(&[0; 4 + 16]));
        assert!(has_return_code(&[0; 4 + 15 + 16]));
        assert!(!has_return_code(&[0; 16]));
        assert!(!has_return_code(&[0; 15 + 16]));
        assert!(!has_return_code(&[0, 0, 1, 0]));
    }

    #[test]
    fn partial_buffer_is_framing_error() {
        let bytes = encode(1, CommandCode::Control, Some(&control_payload()), &cipher()).unwrap();

        for cut in [0, 3, 10, HEADER_LEN, bytes.len() - 1] {
            let err = decode(&bytes[..cut], &cipher()).unwrap_err();
            assert!(matches!(err, Error::Framing { .. }), "cut {cut}: {err:?}");
        }
    }

    #[test]
    fn wrong_prefix_is_rejected() {
        let mut bytes = encode(1, CommandCode::HeartBeat, None, &cipher()).unwrap();
        bytes[2] = 0x00;
        assert!(matches!(
            decode(&bytes, &cipher()),
            Err(Error::InvalidPrefix { .. })
        ));
    }

    #[test]
    fn wrong_suffix_is_rejected() {
        let mut bytes = encode(1, CommandCode::HeartBeat, None, &cipher()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        assert!(matches!(
            decode(&bytes, &cipher()),
            Err(Error::InvalidSuffix { .. })
        ));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut bytes = encode(1, CommandCode::HeartBeat, None, &cipher()).unwrap();
        bytes[12..16].copy_from_slice(&0x0010_0000u32.to_be_bytes());
        assert!(matches!(
            decode(&bytes, &cipher()),
            Err(Error::InvalidLength { .. })
        ));
    }

    #[test]
    fn flipped_payload_bit_fails_integrity() {
        let mut bytes = encode(1, CommandCode::Control, Some(&control_payload()), &cipher()).unwrap();
        bytes[HEADER_LEN + 20] ^= 0x01;
        assert!(matches!(
            decode(&bytes, &cipher()),
            Err(Error::Integrity { .. })
        ));
    }

    #[test]
    fn wrong_key_is_payload_error() {
        let bytes = encode(1, CommandCode::Control, Some(&control_payload()), &cipher()).unwrap();
        let other = Cipher::new(DeviceKey::from_local_key("fedcba9876543210").unwrap());

        match decode(&bytes, &other) {
            Err(Error::Payload { raw, .. }) => assert!(!raw.is_empty()),
            other => panic!("expected payload error, got {other:?}"),
        }
    }

    #[test]
    fn decoder_yields_back_to_back_frames() {
        let mut stream = encode(1, CommandCode::Control, Some(&control_payload()), &cipher()).unwrap();
        stream.extend(encode(2, CommandCode::HeartBeat, None, &cipher()).unwrap());

        let mut decoder = FrameDecoder::new(cipher());
        decoder.feed(&stream);

        assert_eq!(decoder.next_frame().unwrap().unwrap().seq, 1);
        assert_eq!(decoder.next_frame().unwrap().unwrap().seq, 2);
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn decoder_waits_for_split_frame() {
        let bytes = encode(1, CommandCode::Control, Some(&control_payload()), &cipher()).unwrap();
        let (head, tail) = bytes.split_at(bytes.len() / 2);

        let mut decoder = FrameDecoder::new(cipher());
        decoder.feed(head);
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), head.len());

        decoder.feed(tail);
        assert_eq!(decoder.next_frame().unwrap().unwrap().dps, DpsMap::single(152, "AggO"));
    }

    #[test]
    fn decoder_skips_leading_garbage() {
        let mut stream = vec![0xde, 0xad, 0xbe, 0xef, 0x00];
        stream.extend(encode(3, CommandCode::HeartBeat, None, &cipher()).unwrap());

        let mut decoder = FrameDecoder::new(cipher());
        decoder.feed(&stream);
        assert_eq!(decoder.next_frame().unwrap().unwrap().seq, 3);
    }

    #[test]
    fn decoder_drops_corrupt_frame_and_continues() {
        let mut corrupt = encode(1, CommandCode::Control, Some(&control_payload()), &cipher()).unwrap();
        corrupt[HEADER_LEN + 20] ^= 0x80;
        let mut stream = corrupt;
        stream.extend(encode(2, CommandCode::HeartBeat, None, &cipher()).unwrap());

        let mut decoder = FrameDecoder::new(cipher());
        decoder.feed(&stream);

        assert!(matches!(decoder.next_frame(), Err(Error::Integrity { .. })));
        assert_eq!(decoder.next_frame().unwrap().unwrap().seq, 2);
    }

    #[test]
    fn decoder_recovers_from_false_prefix() {
        // A prefix with a nonsense length, followed by a real frame.
        let mut stream = PREFIX_BYTES.to_vec();
        stream.extend_from_slice(&[0xff; 12]);
        stream.extend(encode(4, CommandCode::HeartBeat, None, &cipher()).unwrap());

        let mut decoder = FrameDecoder::new(cipher());
        decoder.feed(&stream);
        assert_eq!(decoder.next_frame().unwrap().unwrap().seq, 4);
    }
}
