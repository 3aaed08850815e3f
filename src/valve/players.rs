use serde::Serialize;

use crate::error::{QueryError, Result};
use crate::parse::{Cursor, Encoding};

use super::packet::{PacketType, ResponsePacket};

/// One entry of an A2S_PLAYER response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Player {
    pub index: u8,
    pub name: String,
    pub score: i32,
    /// Seconds connected
    pub duration: f32,
}

impl Player {
    /// Parse an A2S_PLAYER [ResponsePacket].
    ///
    /// Slots with an empty name (players still connecting) are left out.
    pub fn parse_list(packet: &ResponsePacket) -> Result<Vec<Player>> {
        if packet.packet_type() != PacketType::Players {
            return Err(QueryError::MalformedHeader(format!(
                "expected a player list, got {:?}",
                packet.packet_type()
            )));
        }

        let mut data = Cursor::new(packet.body());
        let count = data.read_u8()?;
        let mut players = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if !data.has_remaining() {
                break;
            }
            let player = Player {
                index: data.read_u8()?,
                name: data.read_cstring(Encoding::Utf8)?,
                score: data.read_i32_le()?,
                duration: data.read_f32_le()?,
            };
            if !player.name.is_empty() {
                players.push(player);
            }
        }
        Ok(players)
    }
}
