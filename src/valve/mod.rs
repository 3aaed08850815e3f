//! Source / GoldSource server queries (A2S_INFO, A2S_PLAYER, A2S_RULES).
//!
//! https://developer.valvesoftware.com/wiki/Server_queries
pub mod info;
pub mod packet;
pub mod players;
pub mod rules;

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, trace};
use serde::Serialize;

use crate::error::{serialize_error, QueryError, Result};
use crate::fragment::{Assembly, FragmentAssembler, FragmentEncoding};
use crate::net::{Control, Transport};
use crate::parse::Cursor;

use self::info::ServerInfo;
use self::packet::{PacketHeader, PacketType, RequestPacket, ResponsePacket};
use self::players::Player;
use self::rules::Rule;

/// Everything a Source query collected, up to the first failing stage.
#[derive(Debug, Default, Serialize)]
pub struct SourceResult {
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_error")]
    pub error: Option<QueryError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<ServerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<Player>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,
}

/// Decides what to do with each datagram of one Source exchange.
///
/// Split replies are collected here; the assembler lives only as long as
/// the exchange, so abandoned groups go away with it.
#[derive(Debug)]
pub struct Classifier {
    remote: SocketAddr,
    encoding: FragmentEncoding,
    accept: &'static [PacketType],
    assembler: FragmentAssembler,
}

impl Classifier {
    pub fn new(remote: SocketAddr, encoding: FragmentEncoding, accept: &'static [PacketType]) -> Self {
        Classifier {
            remote,
            encoding,
            accept,
            assembler: FragmentAssembler::new(),
        }
    }

    pub fn classify(&mut self, datagram: &[u8], from: SocketAddr) -> Control {
        if from != self.remote {
            trace!("ignoring datagram from {}", from);
            return Control::Wait;
        }
        match self.try_classify(datagram) {
            Ok(control) => control,
            Err(e) => Control::Error(e),
        }
    }

    fn try_classify(&mut self, datagram: &[u8]) -> Result<Control> {
        let mut cursor = Cursor::new(datagram);
        match PacketHeader::try_from(cursor.read_i32_le()?)? {
            PacketHeader::Single => self.check_type(datagram.to_vec()),
            PacketHeader::Split => match self.assembler.accept(&mut cursor, self.encoding)? {
                Assembly::Incomplete => Ok(Control::Wait),
                Assembly::Complete(joined) => {
                    let mut cursor = Cursor::new(&joined);
                    if PacketHeader::try_from(cursor.read_i32_le()?)? != PacketHeader::Single {
                        return Err(QueryError::MalformedHeader(
                            "reassembled payload is not a single packet".into(),
                        ));
                    }
                    self.check_type(joined)
                }
            },
        }
    }

    /// Close on a whole packet of an expected type; anything else is
    /// left for a later datagram.
    fn check_type(&self, packet: Vec<u8>) -> Result<Control> {
        let mut cursor = Cursor::new(&packet);
        cursor.skip(4)?;
        let raw_type = cursor.read_u8()?;
        match PacketType::try_from(raw_type) {
            Ok(packet_type) if self.accept.contains(&packet_type) => Ok(Control::Close(packet)),
            _ => {
                trace!("ignoring packet type {:#x}", raw_type);
                Ok(Control::Wait)
            }
        }
    }
}

/// Runs the info, players and rules stages against one server.
#[derive(Debug)]
pub struct SourceQuery {
    transport: Transport,
    encoding: FragmentEncoding,
}

impl SourceQuery {
    const INFO_REPLIES: &'static [PacketType] = &[PacketType::Info, PacketType::GoldSourceInfo];
    const INFO_OR_CHALLENGE: &'static [PacketType] =
        &[PacketType::Info, PacketType::GoldSourceInfo, PacketType::Challenge];
    const PLAYERS_REPLIES: &'static [PacketType] = &[PacketType::Players];
    const PLAYERS_OR_CHALLENGE: &'static [PacketType] = &[PacketType::Players, PacketType::Challenge];
    const RULES_REPLIES: &'static [PacketType] = &[PacketType::Rules];
    const RULES_OR_CHALLENGE: &'static [PacketType] = &[PacketType::Rules, PacketType::Challenge];

    pub fn new(remote: SocketAddr, timeout_dur: Option<Duration>) -> Self {
        SourceQuery {
            transport: Transport::new(remote, timeout_dur),
            encoding: FragmentEncoding::Modern,
        }
    }

    /// Run every stage in order, keeping what was collected before a failure.
    pub async fn run(mut self) -> SourceResult {
        let mut result = SourceResult::default();

        match self.info().await {
            Ok(info) => result.info = Some(info),
            Err(e) => {
                result.error = Some(e);
                return result;
            }
        }
        match self.players().await {
            Ok(players) => result.players = Some(players),
            Err(e) => {
                result.error = Some(e);
                return result;
            }
        }
        match self.rules().await {
            Ok(rules) => {
                result.rules = Some(rules);
                debug!("server {} successfully processed", self.transport.remote());
            }
            Err(e) => result.error = Some(e),
        }
        result
    }

    /// A2S_INFO. Also decides how later split replies are decoded.
    pub async fn info(&mut self) -> Result<ServerInfo> {
        debug!("getting server info from {}", self.transport.remote());
        let mut packet = self.exchange(RequestPacket::info(None), Self::INFO_OR_CHALLENGE).await?;

        // absolving challenge
        if packet.packet_type() == PacketType::Challenge {
            let challenge = packet.challenge()?;
            packet = self.exchange(RequestPacket::info(Some(challenge)), Self::INFO_REPLIES).await?;
        }

        let info = ServerInfo::parse(&packet)?;
        if info.uses_legacy_split() {
            self.encoding = FragmentEncoding::Legacy;
        }
        Ok(info)
    }

    /// A2S_PLAYER.
    pub async fn players(&mut self) -> Result<Vec<Player>> {
        debug!("getting players from {}", self.transport.remote());
        let packet = self
            .challenged(RequestPacket::players, Self::PLAYERS_OR_CHALLENGE, Self::PLAYERS_REPLIES)
            .await?;
        Player::parse_list(&packet)
    }

    /// A2S_RULES.
    pub async fn rules(&mut self) -> Result<Vec<Rule>> {
        debug!("getting rules from {}", self.transport.remote());
        let packet = self
            .challenged(RequestPacket::rules, Self::RULES_OR_CHALLENGE, Self::RULES_REPLIES)
            .await?;
        Rule::parse_list(&packet)
    }

    /// Ask for a challenge, then repeat the request with it. Servers that
    /// skip challenges answer the first request with the data itself.
    async fn challenged(
        &mut self,
        request: fn(Option<[u8; 4]>) -> RequestPacket,
        first: &'static [PacketType],
        second: &'static [PacketType],
    ) -> Result<ResponsePacket> {
        let packet = self.exchange(request(None), first).await?;
        if packet.packet_type() != PacketType::Challenge {
            return Ok(packet);
        }
        let challenge = packet.challenge()?;
        trace!("challenge {:02x?} from {}", challenge, self.transport.remote());
        self.exchange(request(Some(challenge)), second).await
    }

    async fn exchange(&mut self, request: RequestPacket, accept: &'static [PacketType]) -> Result<ResponsePacket> {
        let mut classifier = Classifier::new(self.transport.remote(), self.encoding, accept);
        let data = self
            .transport
            .send(&request.pack(), |datagram, from| classifier.classify(datagram, from))
            .await?;
        ResponsePacket::unpack(&data)
    }
}

/// Query `remote` for info, players and rules.
///
/// Each request waits at most `timeout_dur` (2 seconds if `None`) for its reply.
pub async fn query(remote: SocketAddr, timeout_dur: Option<Duration>) -> SourceResult {
    SourceQuery::new(remote, timeout_dur).run().await
}
