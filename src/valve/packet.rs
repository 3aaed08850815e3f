use crate::error::{QueryError, Result};
use crate::parse::{Cursor, Writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketHeader {
    Single,
    Split,
}

impl TryFrom<i32> for PacketHeader {
    type Error = QueryError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            -1 => Ok(PacketHeader::Single),
            -2 => Ok(PacketHeader::Split),
            n => Err(QueryError::MalformedHeader(format!("unknown packet header {n:#x}"))),
        }
    }
}

impl PacketHeader {
    pub fn to_i32(self) -> i32 {
        match self {
            PacketHeader::Single => -1,
            PacketHeader::Split => -2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// A2S_INFO -- https://developer.valvesoftware.com/wiki/Server_queries#A2S_INFO
    InfoRequest,
    /// A2S_PLAYER
    PlayersRequest,
    /// A2S_RULES
    RulesRequest,
    /// S2C_CHALLENGE
    ///
    /// The server may reply with a challenge ('A' or 0x41). In that case
    /// the client repeats the request with the challenge number appended.
    Challenge,
    /// A2S_INFO response, Source layout.
    Info,
    /// A2S_INFO response, obsolete GoldSource layout.
    GoldSourceInfo,
    Players,
    Rules,
}

impl TryFrom<u8> for PacketType {
    type Error = QueryError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x54 => Ok(PacketType::InfoRequest),
            0x55 => Ok(PacketType::PlayersRequest),
            0x56 => Ok(PacketType::RulesRequest),
            0x41 => Ok(PacketType::Challenge),
            0x49 => Ok(PacketType::Info),
            0x6D => Ok(PacketType::GoldSourceInfo),
            0x44 => Ok(PacketType::Players),
            0x45 => Ok(PacketType::Rules),
            n => Err(QueryError::MalformedHeader(format!("unknown packet type {n:#x}"))),
        }
    }
}

impl PacketType {
    pub fn to_byte(self) -> u8 {
        match self {
            PacketType::InfoRequest => 0x54,
            PacketType::PlayersRequest => 0x55,
            PacketType::RulesRequest => 0x56,
            PacketType::Challenge => 0x41,
            PacketType::Info => 0x49,
            PacketType::GoldSourceInfo => 0x6D,
            PacketType::Players => 0x44,
            PacketType::Rules => 0x45,
        }
    }
}

/// Challenge value sent before the server has handed one out.
pub const NO_CHALLENGE: [u8; 4] = [0xFF; 4];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPacket {
    packet_type: PacketType,
    body: Option<&'static str>,
    challenge: Option<[u8; 4]>,
}

impl RequestPacket {
    const INFO_BODY: &'static str = "Source Engine Query";

    /// A2S_INFO, with the challenge appended once the server has asked for one.
    pub fn info(challenge: Option<[u8; 4]>) -> Self {
        RequestPacket {
            packet_type: PacketType::InfoRequest,
            body: Some(Self::INFO_BODY),
            challenge,
        }
    }

    /// A2S_PLAYER; without a challenge this asks the server for one.
    pub fn players(challenge: Option<[u8; 4]>) -> Self {
        RequestPacket {
            packet_type: PacketType::PlayersRequest,
            body: None,
            challenge: Some(challenge.unwrap_or(NO_CHALLENGE)),
        }
    }

    /// A2S_RULES; without a challenge this asks the server for one.
    pub fn rules(challenge: Option<[u8; 4]>) -> Self {
        RequestPacket {
            packet_type: PacketType::RulesRequest,
            body: None,
            challenge: Some(challenge.unwrap_or(NO_CHALLENGE)),
        }
    }

    /// Serializes a request packet into an array of bytes.
    pub fn pack(&self) -> Vec<u8> {
        // packet structure: header, type, body, terminator (and challenge)
        let mut writer = Writer::with_capacity(29);
        writer
            .put_i32_le(PacketHeader::Single.to_i32())
            .put_u8(self.packet_type.to_byte());
        if let Some(body) = self.body {
            writer.put_cstring(body);
        }
        if let Some(challenge) = &self.challenge {
            writer.put_bytes(challenge);
        }
        writer.finish()
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }
}

/// A whole (single or reassembled) response, split into type and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    packet_type: PacketType,
    body: Vec<u8>,
}

impl ResponsePacket {
    /// Deserializes a single-packet response.
    pub fn unpack(incoming: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(incoming);
        let header = PacketHeader::try_from(cursor.read_i32_le()?)?;
        if header != PacketHeader::Single {
            return Err(QueryError::MalformedHeader("expected a single-packet response".into()));
        }
        let packet_type = PacketType::try_from(cursor.read_u8()?)?;

        Ok(ResponsePacket {
            packet_type,
            body: cursor.remaining().to_vec(),
        })
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The challenge number carried by an S2C_CHALLENGE body.
    pub fn challenge(&self) -> Result<[u8; 4]> {
        if self.packet_type != PacketType::Challenge {
            return Err(QueryError::MalformedHeader(format!(
                "expected a challenge, got {:?}",
                self.packet_type
            )));
        }
        let mut challenge = [0u8; 4];
        let mut cursor = Cursor::new(&self.body);
        for byte in challenge.iter_mut() {
            *byte = cursor.read_u8()?;
        }
        Ok(challenge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_request_bytes() {
        let mut expected = vec![0xFF, 0xFF, 0xFF, 0xFF, 0x54];
        expected.extend_from_slice(b"Source Engine Query\0");
        assert_eq!(RequestPacket::info(None).pack(), expected);

        expected.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(RequestPacket::info(Some([1, 2, 3, 4])).pack(), expected);
    }

    #[test]
    fn challenge_requests_carry_the_placeholder() {
        assert_eq!(
            RequestPacket::players(None).pack(),
            [0xFF, 0xFF, 0xFF, 0xFF, 0x55, 0xFF, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(
            RequestPacket::rules(Some([9, 8, 7, 6])).pack(),
            [0xFF, 0xFF, 0xFF, 0xFF, 0x56, 9, 8, 7, 6]
        );
    }

    #[test]
    fn unpack_challenge() {
        let packet = ResponsePacket::unpack(&[0xFF, 0xFF, 0xFF, 0xFF, 0x41, 0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        assert_eq!(packet.packet_type(), PacketType::Challenge);
        assert_eq!(packet.challenge().unwrap(), [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn truncated_challenge_underruns() {
        let packet = ResponsePacket::unpack(&[0xFF, 0xFF, 0xFF, 0xFF, 0x41, 0xAA]).unwrap();
        assert!(matches!(packet.challenge(), Err(QueryError::BufferUnderrun { .. })));
    }

    #[test]
    fn unknown_header_is_malformed() {
        assert!(matches!(
            ResponsePacket::unpack(&[0xFD, 0xFF, 0xFF, 0xFF, 0x49]),
            Err(QueryError::MalformedHeader(_))
        ));
        assert!(matches!(
            ResponsePacket::unpack(&[0xFF, 0xFF, 0xFF, 0xFF, 0x00]),
            Err(QueryError::MalformedHeader(_))
        ));
    }
}
