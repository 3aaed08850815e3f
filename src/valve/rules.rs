use serde::Serialize;

use crate::error::{QueryError, Result};
use crate::parse::{Cursor, Encoding};

use super::packet::{PacketType, ResponsePacket};

/// A server cvar from an A2S_RULES response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub name: String,
    pub value: String,
}

impl Rule {
    /// Parse an A2S_RULES [ResponsePacket], stopping at the announced count
    /// or the end of the body, whichever comes first.
    pub fn parse_list(packet: &ResponsePacket) -> Result<Vec<Rule>> {
        if packet.packet_type() != PacketType::Rules {
            return Err(QueryError::MalformedHeader(format!(
                "expected a rule list, got {:?}",
                packet.packet_type()
            )));
        }

        let mut data = Cursor::new(packet.body());
        let count = data.read_u16_le()? as usize;
        let mut rules = Vec::with_capacity(count);
        let mut read = 0;
        while read < count && data.has_remaining() {
            let name = data.read_cstring(Encoding::Utf8)?;
            let value = data.read_cstring(Encoding::Utf8)?;
            read += 1;
            if !name.is_empty() {
                rules.push(Rule { name, value });
            }
        }
        Ok(rules)
    }
}
