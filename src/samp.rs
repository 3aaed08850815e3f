//! SA:MP server queries.
//!
//! Every request is `"SAMP"`, the server's IPv4 octets, its port (LE) and
//! an opcode. Replies echo those 11 bytes before the payload.
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use log::{debug, trace};
use serde::Serialize;

use crate::error::{serialize_error, QueryError, Result};
use crate::net::{Control, Transport};
use crate::parse::{Cursor, Encoding, Writer};

const MAGIC: &[u8; 4] = b"SAMP";
const PREFIX_LEN: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Info,
    Rules,
    /// Names and scores only.
    Players,
    /// Ids, names, scores and pings.
    DetailedPlayers,
}

impl Opcode {
    pub fn to_byte(self) -> u8 {
        match self {
            Opcode::Info => b'i',
            Opcode::Rules => b'r',
            Opcode::Players => b'c',
            Opcode::DetailedPlayers => b'd',
        }
    }
}

/// Build the 11-byte request for `opcode` addressed to `server`.
pub fn request(server: SocketAddrV4, opcode: Opcode) -> Vec<u8> {
    Writer::with_capacity(PREFIX_LEN)
        .put_bytes(MAGIC)
        .put_bytes(&server.ip().octets())
        .put_u16_le(server.port())
        .put_u8(opcode.to_byte())
        .finish()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub password: bool,
    pub players: u16,
    pub max_players: u16,
    pub hostname: String,
    pub gamemode: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Player {
    pub id: u8,
    pub nickname: String,
    pub score: i32,
    pub ping: i32,
}

/// Entry of the basic (`'c'`) player list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerScore {
    pub nickname: String,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub name: String,
    pub value: String,
}

fn read_string_u32(data: &mut Cursor<'_>) -> Result<String> {
    let len = data.read_u32_le()? as usize;
    data.read_fixed_string(len, Encoding::Ascii)
}

fn read_string_u8(data: &mut Cursor<'_>) -> Result<String> {
    let len = data.read_u8()? as usize;
    data.read_fixed_string(len, Encoding::Ascii)
}

impl ServerInfo {
    /// Decode an info payload (the bytes after the echoed prefix).
    pub fn parse(payload: &[u8]) -> Result<ServerInfo> {
        let mut data = Cursor::new(payload);
        Ok(ServerInfo {
            password: data.read_u8()? != 0,
            players: data.read_u16_le()?,
            max_players: data.read_u16_le()?,
            hostname: read_string_u32(&mut data)?,
            gamemode: read_string_u32(&mut data)?,
            language: read_string_u32(&mut data)?,
        })
    }
}

impl Player {
    pub fn parse_list(payload: &[u8]) -> Result<Vec<Player>> {
        let mut data = Cursor::new(payload);
        let count = data.read_u16_le()?;
        (0..count)
            .map(|_| -> Result<Player> {
                Ok(Player {
                    id: data.read_u8()?,
                    nickname: read_string_u8(&mut data)?,
                    score: data.read_i32_le()?,
                    ping: data.read_i32_le()?,
                })
            })
            .collect()
    }
}

impl PlayerScore {
    pub fn parse_list(payload: &[u8]) -> Result<Vec<PlayerScore>> {
        let mut data = Cursor::new(payload);
        let count = data.read_u16_le()?;
        (0..count)
            .map(|_| -> Result<PlayerScore> {
                Ok(PlayerScore {
                    nickname: read_string_u8(&mut data)?,
                    score: data.read_i32_le()?,
                })
            })
            .collect()
    }
}

impl Rule {
    pub fn parse_list(payload: &[u8]) -> Result<Vec<Rule>> {
        let mut data = Cursor::new(payload);
        let count = data.read_u16_le()?;
        (0..count)
            .map(|_| -> Result<Rule> {
                Ok(Rule {
                    name: read_string_u8(&mut data)?,
                    value: read_string_u8(&mut data)?,
                })
            })
            .collect()
    }
}

/// Accept only replies from `remote` that echo `request`; close with the
/// bytes after the echo.
pub fn classify(remote: SocketAddr, request: &[u8], datagram: &[u8], from: SocketAddr) -> Control {
    if from != remote {
        trace!("ignoring datagram from {}", from);
        return Control::Wait;
    }
    match datagram.get(..PREFIX_LEN) {
        Some(prefix) if prefix == request => Control::Close(datagram[PREFIX_LEN..].to_vec()),
        _ => {
            trace!("ignoring reply without our prefix");
            Control::Wait
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct SampResult {
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_error")]
    pub error: Option<QueryError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<ServerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<Player>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,
}

#[derive(Debug)]
pub struct SampQuery {
    server: SocketAddrV4,
    transport: Transport,
}

impl SampQuery {
    /// SA:MP addresses servers by IPv4 octets, so IPv6 targets are refused.
    pub fn new(remote: SocketAddr, timeout_dur: Option<Duration>) -> Result<Self> {
        let server = match remote {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(v6) => return Err(QueryError::InvalidAddress(v6.to_string())),
        };
        Ok(SampQuery {
            server,
            transport: Transport::new(remote, timeout_dur),
        })
    }

    pub async fn run(mut self) -> SampResult {
        let mut result = SampResult::default();

        match self.info().await {
            Ok(info) => result.info = Some(info),
            Err(e) => {
                result.error = Some(e);
                return result;
            }
        }
        match self.detailed_players().await {
            Ok(players) => result.players = Some(players),
            Err(e) => {
                result.error = Some(e);
                return result;
            }
        }
        match self.rules().await {
            Ok(rules) => {
                result.rules = Some(rules);
                debug!("server {} successfully processed", self.server);
            }
            Err(e) => result.error = Some(e),
        }
        result
    }

    pub async fn info(&mut self) -> Result<ServerInfo> {
        let payload = self.exchange(Opcode::Info).await?;
        ServerInfo::parse(&payload)
    }

    pub async fn detailed_players(&mut self) -> Result<Vec<Player>> {
        let payload = self.exchange(Opcode::DetailedPlayers).await?;
        Player::parse_list(&payload)
    }

    pub async fn players(&mut self) -> Result<Vec<PlayerScore>> {
        let payload = self.exchange(Opcode::Players).await?;
        PlayerScore::parse_list(&payload)
    }

    pub async fn rules(&mut self) -> Result<Vec<Rule>> {
        let payload = self.exchange(Opcode::Rules).await?;
        Rule::parse_list(&payload)
    }

    async fn exchange(&mut self, opcode: Opcode) -> Result<Vec<u8>> {
        debug!("sending {:?} request to {}", opcode, self.server);
        let packet = request(self.server, opcode);
        let remote = self.transport.remote();
        self.transport
            .send(&packet, |datagram, from| classify(remote, &packet, datagram, from))
            .await
    }
}
