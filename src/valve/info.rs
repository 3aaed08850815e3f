use serde::Serialize;

use crate::error::{QueryError, Result};
use crate::parse::{Cursor, Encoding};

use super::packet::{PacketType, ResponsePacket};

/// Mod details advertised by GoldSource servers running a mod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModInfo {
    pub link: String,
    pub download_link: String,
    pub version: i32,
    pub size: i32,
    /// `true` for multiplayer-only mods.
    pub multiplayer_only: bool,
    /// `true` if the mod uses its own DLL.
    pub custom_dll: bool,
}

/// Server information as obtained by the A2S_INFO stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInfo {
    /// Answered with the obsolete GoldSource layout (`0x6D`).
    pub goldsource: bool,
    /// Server address as the server sees it (GoldSource only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// A2S_INFO protocol version
    pub protocol: u8,
    /// Server hostname
    pub hostname: String,
    /// Current map
    pub map: String,
    /// Location of server files
    pub folder: String,
    /// Name of game
    pub game: String,
    /// Steam application ID of game (Source only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<u16>,
    /// Current players
    pub players: u8,
    /// Max players
    pub maxplayers: u8,
    /// Current bots
    pub bots: u8,
    /// Server type:
    /// - `d`: Dedicated
    /// - `l`: Listen (non-dedicated)
    /// - `p`: SourceTV relay (proxy)
    pub server_type: char,
    /// Server environment:
    /// - `l`: Linux
    /// - `w`: Windows
    /// - `m` or `o`: Mac
    pub server_env: char,
    /// Is the server password protected?
    pub password_protected: bool,
    /// Is the server VAC enabled?
    pub vac_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mod_info: Option<ModInfo>,
    /// Game version (Source only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Extra data flags; each bit gates one of the fields below.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edf: Option<u8>,
    /// Game port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steam_id: Option<u64>,
    /// SourceTV port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tv_port: Option<u16>,
    /// SourceTV name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tv_name: Option<String>,
    /// Server tags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    /// 64-bit game ID; the low 24 bits are the app ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_id: Option<u64>,
}

impl ServerInfo {
    const EDF_PORT: u8 = 0x80;
    const EDF_STEAM_ID: u8 = 0x10;
    const EDF_SOURCE_TV: u8 = 0x40;
    const EDF_KEYWORDS: u8 = 0x20;
    const EDF_GAME_ID: u8 = 0x01;

    /// Parse an info [ResponsePacket] into its corresponding [ServerInfo].
    pub fn parse(packet: &ResponsePacket) -> Result<ServerInfo> {
        let mut data = Cursor::new(packet.body());
        match packet.packet_type() {
            PacketType::Info => Self::parse_source(&mut data),
            PacketType::GoldSourceInfo => Self::parse_goldsource(&mut data),
            other => Err(QueryError::MalformedHeader(format!(
                "expected an info response, got {other:?}"
            ))),
        }
    }

    fn parse_source(data: &mut Cursor<'_>) -> Result<ServerInfo> {
        let protocol = data.read_u8()?;
        let hostname = data.read_cstring(Encoding::Utf8)?;
        let map = data.read_cstring(Encoding::Utf8)?;
        let folder = data.read_cstring(Encoding::Utf8)?;
        let game = data.read_cstring(Encoding::Utf8)?;
        let app_id = data.read_u16_le()?;
        let players = data.read_u8()?;
        let maxplayers = data.read_u8()?;
        let bots = data.read_u8()?;
        let server_type = char::from(data.read_u8()?);
        let server_env = char::from(data.read_u8()?);
        let password_protected = data.read_u8()? == 1;
        let vac_enabled = data.read_u8()? == 1;
        let version = data.read_cstring(Encoding::Utf8)?;

        let mut info = ServerInfo {
            goldsource: false,
            address: None,
            protocol,
            hostname,
            map,
            folder,
            game,
            app_id: Some(app_id),
            players,
            maxplayers,
            bots,
            server_type,
            server_env,
            password_protected,
            vac_enabled,
            mod_info: None,
            version: Some(version),
            edf: None,
            port: None,
            steam_id: None,
            tv_port: None,
            tv_name: None,
            keywords: None,
            game_id: None,
        };

        // older servers stop after the version string
        if !data.has_remaining() {
            return Ok(info);
        }
        let edf = data.read_u8()?;
        info.edf = Some(edf);

        if edf & Self::EDF_PORT != 0 {
            info.port = Some(data.read_u16_le()?);
        }
        if edf & Self::EDF_STEAM_ID != 0 {
            info.steam_id = Some(data.read_u64_le()?);
        }
        if edf & Self::EDF_SOURCE_TV != 0 {
            info.tv_port = Some(data.read_u16_le()?);
            info.tv_name = Some(data.read_cstring(Encoding::Utf8)?);
        }
        if edf & Self::EDF_KEYWORDS != 0 {
            info.keywords = Some(data.read_cstring(Encoding::Utf8)?);
        }
        if edf & Self::EDF_GAME_ID != 0 {
            info.game_id = Some(data.read_u64_le()?);
        }

        Ok(info)
    }

    fn parse_goldsource(data: &mut Cursor<'_>) -> Result<ServerInfo> {
        let address = data.read_cstring(Encoding::Utf8)?;
        let hostname = data.read_cstring(Encoding::Utf8)?;
        let map = data.read_cstring(Encoding::Utf8)?;
        let folder = data.read_cstring(Encoding::Utf8)?;
        let game = data.read_cstring(Encoding::Utf8)?;
        let players = data.read_u8()?;
        let maxplayers = data.read_u8()?;
        let protocol = data.read_u8()?;
        let server_type = char::from(data.read_u8()?);
        let server_env = char::from(data.read_u8()?);
        let password_protected = data.read_u8()? == 1;

        let mod_info = if data.read_u8()? == 1 {
            let link = data.read_cstring(Encoding::Utf8)?;
            let download_link = data.read_cstring(Encoding::Utf8)?;
            // unused NULL byte
            data.skip(1)?;
            Some(ModInfo {
                link,
                download_link,
                version: data.read_i32_le()?,
                size: data.read_i32_le()?,
                multiplayer_only: data.read_u8()? == 1,
                custom_dll: data.read_u8()? == 1,
            })
        } else {
            None
        };

        let vac_enabled = data.read_u8()? == 1;
        let bots = data.read_u8()?;

        Ok(ServerInfo {
            goldsource: true,
            address: Some(address),
            protocol,
            hostname,
            map,
            folder,
            game,
            app_id: None,
            players,
            maxplayers,
            bots,
            server_type,
            server_env,
            password_protected,
            vac_enabled,
            mod_info,
            version: None,
            edf: None,
            port: None,
            steam_id: None,
            tv_port: None,
            tv_name: None,
            keywords: None,
            game_id: None,
        })
    }

    /// GoldSource engines split long replies with the packed-nibble header,
    /// whichever info layout they answered with.
    pub fn uses_legacy_split(&self) -> bool {
        self.goldsource || matches!(self.protocol, 47 | 48)
    }
}
