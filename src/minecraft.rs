//! Minecraft UDP query protocol (GameSpy4 style): handshake, basic stat,
//! full stat.
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, trace};
use serde::Serialize;

use crate::error::{serialize_error, QueryError, Result};
use crate::net::{Control, Transport};
use crate::parse::{Cursor, Encoding, Writer};

const MAGIC: u16 = 0xFEFD;
/// The server only honours the low nibble of each session id byte.
const SESSION_MASK: i32 = 0x0F0F_0F0F;
/// Type byte plus echoed session id.
const REPLY_HEADER_LEN: usize = 5;
/// Leads every full-stat payload, never a basic-stat one.
const FULL_STAT_MARKER: &[u8] = b"splitnum\0\x80\0";
const FULL_STAT_PADDING: usize = FULL_STAT_MARKER.len();
/// `"\x01player_\0\0"` ahead of the player names.
const PLAYER_SECTION_PADDING: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Handshake,
    Stat,
}

impl PacketType {
    pub fn to_byte(self) -> u8 {
        match self {
            PacketType::Handshake => 9,
            PacketType::Stat => 0,
        }
    }
}

/// The reply an exchange is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Handshake,
    BasicStat,
    FullStat,
}

impl Stage {
    pub fn packet_type(self) -> PacketType {
        match self {
            Stage::Handshake => PacketType::Handshake,
            Stage::BasicStat | Stage::FullStat => PacketType::Stat,
        }
    }
}

pub fn handshake_request(session_id: i32) -> Vec<u8> {
    Writer::with_capacity(7)
        .put_u16_be(MAGIC)
        .put_u8(PacketType::Handshake.to_byte())
        .put_i32_be(session_id)
        .finish()
}

pub fn basic_stat_request(session_id: i32, token: i32) -> Vec<u8> {
    Writer::with_capacity(11)
        .put_u16_be(MAGIC)
        .put_u8(PacketType::Stat.to_byte())
        .put_i32_be(session_id)
        .put_i32_be(token)
        .finish()
}

pub fn full_stat_request(session_id: i32, token: i32) -> Vec<u8> {
    Writer::with_capacity(15)
        .put_u16_be(MAGIC)
        .put_u8(PacketType::Stat.to_byte())
        .put_i32_be(session_id)
        .put_i32_be(token)
        .put_bytes(&[0; 4])
        .finish()
}

/// A fresh random session id.
pub fn session_id() -> i32 {
    rand::random::<i32>() & SESSION_MASK
}

/// Decode the challenge token: ASCII decimal digits, zero-terminated.
pub fn parse_token(payload: &[u8]) -> Result<i32> {
    let text = Cursor::new(payload).read_cstring(Encoding::Ascii)?;
    // tokens are signed 32-bit values, but some servers print them unsigned
    text.trim()
        .parse::<i64>()
        .map(|token| token as i32)
        .map_err(|_| QueryError::MalformedPayload(format!("challenge token {text:?}")))
}

fn parse_number<T: std::str::FromStr>(field: &str, text: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| QueryError::MalformedPayload(format!("{field} {text:?} is not a number")))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasicStat {
    pub motd: String,
    pub gametype: String,
    pub map: String,
    pub numplayers: u32,
    pub maxplayers: u32,
    pub hostport: u16,
    pub hostip: String,
}

impl BasicStat {
    pub fn parse(payload: &[u8]) -> Result<BasicStat> {
        let mut data = Cursor::new(payload);
        Ok(BasicStat {
            motd: data.read_cstring(Encoding::Utf8)?,
            gametype: data.read_cstring(Encoding::Utf8)?,
            map: data.read_cstring(Encoding::Utf8)?,
            numplayers: parse_number("numplayers", &data.read_cstring(Encoding::Ascii)?)?,
            maxplayers: parse_number("maxplayers", &data.read_cstring(Encoding::Ascii)?)?,
            hostport: data.read_u16_le()?,
            hostip: data.read_cstring(Encoding::Ascii)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullStat {
    pub hostname: String,
    pub gametype: String,
    pub game_id: String,
    pub version: String,
    /// Server software, the part of `plugins` before `": "`.
    #[serde(rename = "mod", skip_serializing_if = "Option::is_none")]
    pub server_mod: Option<String>,
    pub plugins: Vec<String>,
    pub map: String,
    pub numplayers: u32,
    pub maxplayers: u32,
    pub hostport: u16,
    pub hostip: String,
    /// Keys beyond the standard ten.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
    pub players: Vec<String>,
}

/// Split the `plugins` value into the server software and its plugin list.
///
/// `"CraftBukkit on Bukkit: a; b"` gives `("CraftBukkit on Bukkit", ["a", "b"])`.
/// Vanilla servers send an empty value.
pub fn split_plugins(value: &str) -> (Option<String>, Vec<String>) {
    if value.is_empty() {
        return (None, Vec::new());
    }
    match value.split_once(": ") {
        Some((server_mod, list)) => {
            let plugins = list
                .split(';')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
            (Some(server_mod.to_string()), plugins)
        }
        None => (Some(value.to_string()), Vec::new()),
    }
}

impl FullStat {
    pub fn parse(payload: &[u8]) -> Result<FullStat> {
        let mut data = Cursor::new(payload);
        data.skip(FULL_STAT_PADDING)?;

        let mut fields = BTreeMap::new();
        loop {
            let key = data.read_cstring(Encoding::Utf8)?;
            if key.is_empty() {
                break;
            }
            let value = data.read_cstring(Encoding::Utf8)?;
            fields.insert(key, value);
        }

        let mut take = |key: &str| fields.remove(key).unwrap_or_default();
        let hostname = take("hostname");
        let gametype = take("gametype");
        let game_id = take("game_id");
        let version = take("version");
        let (server_mod, plugins) = split_plugins(&take("plugins"));
        let map = take("map");
        let numplayers = parse_number("numplayers", &take("numplayers"))?;
        let maxplayers = parse_number("maxplayers", &take("maxplayers"))?;
        let hostport = parse_number("hostport", &take("hostport"))?;
        let hostip = take("hostip");

        data.skip(PLAYER_SECTION_PADDING)?;
        let mut players = Vec::new();
        while data.has_remaining() {
            let name = data.read_cstring(Encoding::Utf8)?;
            if name.is_empty() {
                continue;
            }
            players.push(name);
        }

        Ok(FullStat {
            hostname,
            gametype,
            game_id,
            version,
            server_mod,
            plugins,
            map,
            numplayers,
            maxplayers,
            hostport,
            hostip,
            extra: fields,
            players,
        })
    }
}

fn read_header(datagram: &[u8]) -> Result<(u8, i32)> {
    let mut header = Cursor::new(datagram);
    Ok((header.read_u8()?, header.read_i32_be()?))
}

/// Accept only replies from `remote` for `stage` that echo our session id;
/// close with the bytes after the reply header.
///
/// Both stat replies share a type byte, so a late basic-stat reply is told
/// apart from a full-stat one by the full-stat marker.
pub fn classify(stage: Stage, remote: SocketAddr, session_id: i32, datagram: &[u8], from: SocketAddr) -> Control {
    if from != remote {
        trace!("ignoring datagram from {}", from);
        return Control::Wait;
    }
    let (packet_type, echoed) = match read_header(datagram) {
        Ok(fields) => fields,
        Err(_) => {
            return Control::Error(QueryError::MalformedHeader(format!(
                "{} byte reply is too short for a header",
                datagram.len()
            )))
        }
    };
    if echoed != session_id {
        trace!("ignoring reply for session {:#010x}", echoed);
        return Control::Wait;
    }
    let expected = stage.packet_type().to_byte();
    if packet_type != expected {
        return Control::Error(QueryError::MalformedHeader(format!(
            "expected packet type {expected}, got {packet_type}"
        )));
    }

    let payload = &datagram[REPLY_HEADER_LEN..];
    let full = payload.starts_with(FULL_STAT_MARKER);
    match stage {
        Stage::BasicStat if full => {
            trace!("ignoring full stat reply while waiting for basic stat");
            Control::Wait
        }
        Stage::FullStat if !full => {
            trace!("ignoring basic stat reply while waiting for full stat");
            Control::Wait
        }
        _ => Control::Close(payload.to_vec()),
    }
}

#[derive(Debug, Default, Serialize)]
pub struct MinecraftResult {
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_error")]
    pub error: Option<QueryError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basicstat: Option<BasicStat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fullstat: Option<FullStat>,
}

#[derive(Debug)]
pub struct MinecraftQuery {
    transport: Transport,
    session_id: i32,
    token: Option<i32>,
}

impl MinecraftQuery {
    pub fn new(remote: SocketAddr, timeout_dur: Option<Duration>) -> Self {
        MinecraftQuery {
            transport: Transport::new(remote, timeout_dur),
            session_id: session_id(),
            token: None,
        }
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub async fn run(mut self) -> MinecraftResult {
        let mut result = MinecraftResult::default();

        match self.handshake().await {
            Ok(token) => result.token = Some(token),
            Err(e) => {
                result.error = Some(e);
                return result;
            }
        }
        match self.basic_stat().await {
            Ok(stat) => result.basicstat = Some(stat),
            Err(e) => {
                result.error = Some(e);
                return result;
            }
        }
        match self.full_stat().await {
            Ok(stat) => {
                result.fullstat = Some(stat);
                debug!("server {} successfully processed", self.transport.remote());
            }
            Err(e) => result.error = Some(e),
        }
        result
    }

    /// Obtain the challenge token the stat requests must carry.
    pub async fn handshake(&mut self) -> Result<i32> {
        debug!("handshaking with {}", self.transport.remote());
        let payload = self
            .exchange(Stage::Handshake, handshake_request(self.session_id))
            .await?;
        let token = parse_token(&payload)?;
        self.token = Some(token);
        Ok(token)
    }

    pub async fn basic_stat(&mut self) -> Result<BasicStat> {
        let token = self.token_or_handshake().await?;
        let payload = self
            .exchange(Stage::BasicStat, basic_stat_request(self.session_id, token))
            .await?;
        BasicStat::parse(&payload)
    }

    pub async fn full_stat(&mut self) -> Result<FullStat> {
        let token = self.token_or_handshake().await?;
        let payload = self
            .exchange(Stage::FullStat, full_stat_request(self.session_id, token))
            .await?;
        FullStat::parse(&payload)
    }

    async fn token_or_handshake(&mut self) -> Result<i32> {
        match self.token {
            Some(token) => Ok(token),
            None => self.handshake().await,
        }
    }

    async fn exchange(&mut self, stage: Stage, request: Vec<u8>) -> Result<Vec<u8>> {
        let remote = self.transport.remote();
        let session_id = self.session_id;
        self.transport
            .send(&request, |datagram, from| classify(stage, remote, session_id, datagram, from))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> SocketAddr {
        "10.0.0.1:25565".parse().unwrap()
    }

    fn reply(packet_type: u8, session_id: i32, payload: &[u8]) -> Vec<u8> {
        let mut raw = vec![packet_type];
        raw.extend_from_slice(&session_id.to_be_bytes());
        raw.extend_from_slice(payload);
        raw
    }

    #[test]
    fn request_layouts() {
        assert_eq!(handshake_request(0x01020304), [0xFE, 0xFD, 9, 1, 2, 3, 4]);
        assert_eq!(
            basic_stat_request(1, 9513307),
            [0xFE, 0xFD, 0, 0, 0, 0, 1, 0x00, 0x91, 0x29, 0x5B]
        );
        let full = full_stat_request(1, 9513307);
        assert_eq!(full.len(), 15);
        assert_eq!(&full[11..], [0, 0, 0, 0]);
    }

    #[test]
    fn session_ids_are_masked() {
        for _ in 0..32 {
            assert_eq!(session_id() & !SESSION_MASK, 0);
        }
    }

    #[test]
    fn token_parsing() {
        assert_eq!(parse_token(b"9513307\0").unwrap(), 9513307);
        assert_eq!(parse_token(b"-42\0").unwrap(), -42);
        assert!(matches!(parse_token(b"abc\0"), Err(QueryError::MalformedPayload(_))));
        assert!(matches!(parse_token(b""), Err(QueryError::BufferUnderrun { .. })));
    }

    #[test]
    fn classifier_rejects_other_sessions() {
        let session = 0x0102_0304;
        let ok = reply(9, session, b"1\0");
        match classify(Stage::Handshake, remote(), session, &ok, remote()) {
            Control::Close(payload) => assert_eq!(payload, b"1\0"),
            other => panic!("expected close, got {other:?}"),
        }
        let stale = reply(9, 0x0505_0505, b"1\0");
        assert!(matches!(
            classify(Stage::Handshake, remote(), session, &stale, remote()),
            Control::Wait
        ));
        let stranger: SocketAddr = "10.0.0.9:25565".parse().unwrap();
        assert!(matches!(
            classify(Stage::Handshake, remote(), session, &ok, stranger),
            Control::Wait
        ));
    }

    #[test]
    fn classifier_errors_on_bad_header() {
        let session = 7;
        assert!(matches!(
            classify(Stage::BasicStat, remote(), session, &reply(9, session, b""), remote()),
            Control::Error(QueryError::MalformedHeader(_))
        ));
        assert!(matches!(
            classify(Stage::BasicStat, remote(), session, &[0, 0], remote()),
            Control::Error(QueryError::MalformedHeader(_))
        ));
    }

    #[test]
    fn stat_stages_ignore_each_others_replies() {
        let session = 7;
        let basic = reply(0, session, b"A Minecraft Server\0SMP\0world\0");
        let full = reply(0, session, &full_stat_payload("", &[]));

        assert!(matches!(
            classify(Stage::FullStat, remote(), session, &basic, remote()),
            Control::Wait
        ));
        assert!(matches!(
            classify(Stage::BasicStat, remote(), session, &full, remote()),
            Control::Wait
        ));
        match classify(Stage::FullStat, remote(), session, &full, remote()) {
            Control::Close(payload) => assert!(FullStat::parse(&payload).is_ok()),
            other => panic!("expected close, got {other:?}"),
        }
        match classify(Stage::BasicStat, remote(), session, &basic, remote()) {
            Control::Close(payload) => assert!(payload.starts_with(b"A Minecraft Server\0")),
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[test]
    fn basic_stat() {
        let payload = Writer::new()
            .put_cstring("A Minecraft Server")
            .put_cstring("SMP")
            .put_cstring("world")
            .put_cstring("2")
            .put_cstring("20")
            .put_u16_le(25565)
            .put_cstring("127.0.0.1")
            .finish();
        assert_eq!(
            BasicStat::parse(&payload).unwrap(),
            BasicStat {
                motd: "A Minecraft Server".into(),
                gametype: "SMP".into(),
                map: "world".into(),
                numplayers: 2,
                maxplayers: 20,
                hostport: 25565,
                hostip: "127.0.0.1".into(),
            }
        );
    }

    pub(crate) fn full_stat_payload(plugins: &str, players: &[&str]) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_bytes(FULL_STAT_MARKER);
        for (key, value) in [
            ("hostname", "A Minecraft Server"),
            ("gametype", "SMP"),
            ("game_id", "MINECRAFT"),
            ("version", "1.20.1"),
            ("plugins", plugins),
            ("map", "world"),
            ("numplayers", "2"),
            ("maxplayers", "20"),
            ("hostport", "25565"),
            ("hostip", "127.0.0.1"),
        ] {
            w.put_cstring(key).put_cstring(value);
        }
        w.put_u8(0).put_bytes(b"\x01player_\0\0");
        for name in players {
            w.put_cstring(name);
        }
        w.put_u8(0);
        w.finish()
    }

    #[test]
    fn full_stat_with_plugins() {
        let payload = full_stat_payload("CraftBukkit on Bukkit: pluginA; pluginB", &["Notch", "jeb_"]);
        let stat = FullStat::parse(&payload).unwrap();
        assert_eq!(stat.hostname, "A Minecraft Server");
        assert_eq!(stat.game_id, "MINECRAFT");
        assert_eq!(stat.version, "1.20.1");
        assert_eq!(stat.server_mod.as_deref(), Some("CraftBukkit on Bukkit"));
        assert_eq!(stat.plugins, ["pluginA", "pluginB"]);
        assert_eq!((stat.numplayers, stat.maxplayers, stat.hostport), (2, 20, 25565));
        assert_eq!(stat.hostip, "127.0.0.1");
        assert!(stat.extra.is_empty());
        assert_eq!(stat.players, ["Notch", "jeb_"]);
    }

    #[test]
    fn empty_names_do_not_end_the_player_list() {
        let payload = full_stat_payload("", &["a", "", "b"]);
        let stat = FullStat::parse(&payload).unwrap();
        assert_eq!(stat.server_mod, None);
        assert!(stat.plugins.is_empty());
        assert_eq!(stat.players, ["a", "b"]);
    }

    #[test]
    fn plugin_splitting() {
        assert_eq!(
            split_plugins("CraftBukkit on Bukkit: pluginA; pluginB"),
            (
                Some("CraftBukkit on Bukkit".to_string()),
                vec!["pluginA".to_string(), "pluginB".to_string()]
            )
        );
        assert_eq!(split_plugins("Paper"), (Some("Paper".to_string()), vec![]));
        assert_eq!(split_plugins(""), (None, vec![]));
    }

    #[test]
    fn truncated_full_stat_underruns() {
        assert!(matches!(
            FullStat::parse(b"splitnum\0\x80\0hostname\0"),
            Err(QueryError::BufferUnderrun { .. })
        ));
    }
}
