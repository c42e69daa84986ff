//! DTLS record and handshake framing, as far as the endpoint needs to look.
//!
//! ```text
//! record:    type(1) version(2) epoch(2) sequence(6) length(2)
//! handshake: msg_type(1) length(3) message_seq(2) fragment_offset(3) fragment_length(3)
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DtlsError, Result};

/// DTLS record header: type, version, epoch, sequence and length.
pub const RECORD_HEADER_LENGTH: usize = 13;
/// DTLS handshake header: type, length, sequence, fragment offset and fragment length.
pub const HANDSHAKE_HEADER_LENGTH: usize = 12;
/// Largest plaintext fragment a record may carry.
pub const MAX_FRAGMENT_LENGTH: usize = 1 << 14;

/// ClientHello message type.
pub const HANDSHAKE_CLIENT_HELLO: u8 = 1;
/// HelloVerifyRequest message type.
pub const HANDSHAKE_HELLO_VERIFY_REQUEST: u8 = 3;

const RANDOM_LENGTH: usize = 32;
const MAX_SEQUENCE_NUMBER: u64 = (1 << 48) - 1;

/// Record content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// Content type 20.
    ChangeCipherSpec,
    /// Content type 21.
    Alert,
    /// Content type 22.
    Handshake,
    /// Content type 23.
    ApplicationData,
}

impl ContentType {
    /// `None` for unknown content types.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            20 => Some(ContentType::ChangeCipherSpec),
            21 => Some(ContentType::Alert),
            22 => Some(ContentType::Handshake),
            23 => Some(ContentType::ApplicationData),
            _ => None,
        }
    }

    /// Wire value.
    pub fn as_u8(self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
        }
    }
}

/// Wire protocol version. DTLS counts minor versions down from 255.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion {
    /// Major byte, inverted as DTLS encodes it.
    pub major: u8,
    /// Minor byte, inverted.
    pub minor: u8,
}

impl ProtocolVersion {
    /// DTLS 1.0 on the wire. Used for HelloVerifyRequest records.
    pub const DTLS_1_0: ProtocolVersion = ProtocolVersion {
        major: 254,
        minor: 255,
    };
    /// DTLS 1.2 on the wire.
    pub const DTLS_1_2: ProtocolVersion = ProtocolVersion {
        major: 254,
        minor: 253,
    };

    /// DTLS 1.0 or later.
    pub fn is_dtls(&self) -> bool {
        self.major == Self::DTLS_1_0.major
    }
}

/// Header of one DTLS record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Raw content type byte.
    pub content_type: u8,
    /// Record protocol version.
    pub version: ProtocolVersion,
    /// Cipher state epoch, 0 before ChangeCipherSpec.
    pub epoch: u16,
    /// 48-bit record sequence number.
    pub sequence_number: u64,
    /// Fragment length.
    pub length: u16,
}

impl RecordHeader {
    /// Parses the first 13 bytes of a datagram.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RECORD_HEADER_LENGTH {
            return Err(invalid(format!(
                "{} bytes is shorter than a record header",
                data.len()
            )));
        }
        Ok(Self {
            content_type: data[0],
            version: ProtocolVersion {
                major: data[1],
                minor: data[2],
            },
            epoch: read_u16(data, 3),
            sequence_number: read_u48(data, 5),
            length: read_u16(data, 11),
        })
    }

    /// Appends the 13-byte header to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.content_type);
        buf.put_u8(self.version.major);
        buf.put_u8(self.version.minor);
        buf.put_u16(self.epoch);
        buf.put_slice(&(self.sequence_number & MAX_SEQUENCE_NUMBER).to_be_bytes()[2..]);
        buf.put_u16(self.length);
    }

    /// Decoded content type, if known.
    pub fn content_type(&self) -> Option<ContentType> {
        ContentType::from_u8(self.content_type)
    }
}

/// Returns true if `data` starts with an unencrypted ClientHello record.
pub fn is_client_hello(data: &[u8]) -> bool {
    let Ok(header) = RecordHeader::parse(data) else {
        return false;
    };
    if header.content_type() != Some(ContentType::Handshake) {
        return false;
    }
    if !header.version.is_dtls() || header.epoch != 0 {
        return false;
    }
    let length = header.length as usize;
    if length < 1 || length > MAX_FRAGMENT_LENGTH {
        return false;
    }
    if data.len() < RECORD_HEADER_LENGTH + length {
        return false;
    }
    data[RECORD_HEADER_LENGTH] == HANDSHAKE_CLIENT_HELLO
}

/// The fields of a ClientHello the cookie exchange depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// Sequence number of the carrying record.
    pub record_sequence: u64,
    /// Handshake message sequence.
    pub message_seq: u16,
    /// Highest version the client offers.
    pub client_version: ProtocolVersion,
    /// Client random.
    pub random: [u8; RANDOM_LENGTH],
    /// Session id for resumption, possibly empty.
    pub session_id: Bytes,
    /// Empty on the first ClientHello.
    pub cookie: Bytes,
    /// Cipher suites, compression methods and extensions, unparsed.
    pub tail: Bytes,
}

impl ClientHello {
    /// Parses a datagram holding a single, unfragmented ClientHello.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if !is_client_hello(data) {
            return Err(invalid("not a ClientHello record"));
        }
        let header = RecordHeader::parse(data)?;
        let fragment = &data[RECORD_HEADER_LENGTH..RECORD_HEADER_LENGTH + header.length as usize];
        if fragment.len() < HANDSHAKE_HEADER_LENGTH {
            return Err(invalid("truncated handshake header"));
        }
        let message_length = read_u24(fragment, 1);
        let message_seq = read_u16(fragment, 4);
        let fragment_offset = read_u24(fragment, 6);
        let fragment_length = read_u24(fragment, 9);
        if fragment_offset != 0 || fragment_length != message_length {
            return Err(invalid("fragmented ClientHello"));
        }
        let body = &fragment[HANDSHAKE_HEADER_LENGTH..];
        if body.len() < message_length {
            return Err(invalid("truncated ClientHello"));
        }
        let body = &body[..message_length];

        let mut reader = Reader::new(body);
        let version = reader.take(2)?;
        let mut random = [0u8; RANDOM_LENGTH];
        random.copy_from_slice(reader.take(RANDOM_LENGTH)?);
        let session_id = reader.take_vec8()?;
        let cookie = reader.take_vec8()?;

        Ok(Self {
            record_sequence: header.sequence_number,
            message_seq,
            client_version: ProtocolVersion {
                major: version[0],
                minor: version[1],
            },
            random,
            session_id: Bytes::copy_from_slice(session_id),
            cookie: Bytes::copy_from_slice(cookie),
            tail: Bytes::copy_from_slice(reader.rest()),
        })
    }

    /// Encodes the hello as a single epoch 0 record.
    pub fn to_datagram(&self) -> Bytes {
        let mut body = BytesMut::new();
        body.put_u8(self.client_version.major);
        body.put_u8(self.client_version.minor);
        body.put_slice(&self.random);
        body.put_u8(self.session_id.len() as u8);
        body.put_slice(&self.session_id);
        body.put_u8(self.cookie.len() as u8);
        body.put_slice(&self.cookie);
        body.put_slice(&self.tail);
        handshake_record(
            HANDSHAKE_CLIENT_HELLO,
            self.record_sequence,
            self.message_seq,
            &body,
        )
    }
}

/// Wraps a handshake message body into an epoch 0 DTLS 1.0 record.
pub(crate) fn handshake_record(
    msg_type: u8,
    record_sequence: u64,
    message_seq: u16,
    body: &[u8],
) -> Bytes {
    let fragment_length = HANDSHAKE_HEADER_LENGTH + body.len();
    let mut buf = BytesMut::with_capacity(RECORD_HEADER_LENGTH + fragment_length);
    RecordHeader {
        content_type: ContentType::Handshake.as_u8(),
        version: ProtocolVersion::DTLS_1_0,
        epoch: 0,
        sequence_number: record_sequence,
        length: fragment_length as u16,
    }
    .encode(&mut buf);
    buf.put_u8(msg_type);
    put_u24(&mut buf, body.len());
    buf.put_u16(message_seq);
    put_u24(&mut buf, 0);
    put_u24(&mut buf, body.len());
    buf.put_slice(body);
    buf.freeze()
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.offset + len;
        if end > self.data.len() {
            return Err(invalid("truncated ClientHello"));
        }
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn take_vec8(&mut self) -> Result<&'a [u8]> {
        let len = self.take(1)?[0] as usize;
        self.take(len)
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }
}

fn invalid(reason: impl Into<String>) -> DtlsError {
    DtlsError::InvalidRecord {
        reason: reason.into(),
    }
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn read_u24(data: &[u8], offset: usize) -> usize {
    (data[offset] as usize) << 16 | (data[offset + 1] as usize) << 8 | data[offset + 2] as usize
}

fn read_u48(data: &[u8], offset: usize) -> u64 {
    data[offset..offset + 6]
        .iter()
        .fold(0u64, |acc, b| acc << 8 | *b as u64)
}

fn put_u24(buf: &mut BytesMut, value: usize) {
    buf.put_slice(&(value as u32).to_be_bytes()[1..]);
}
