mod common;

use std::time::Duration;

use common::{spawn_server, Reply};
use gsquery::parse::Writer;
use gsquery::valve::{self, SourceQuery};
use gsquery::{QueryEngine, QueryError, QueryResult, Target};

const CHALLENGE: [u8; 4] = [0xAA, 0xBB, 0xCC, 0xDD];
const NO_CHALLENGE: [u8; 4] = [0xFF; 4];

fn single(packet_type: u8, body: &[u8]) -> Vec<u8> {
    let mut raw = vec![0xFF, 0xFF, 0xFF, 0xFF, packet_type];
    raw.extend_from_slice(body);
    raw
}

fn challenge() -> Vec<u8> {
    single(0x41, &CHALLENGE)
}

fn source_info() -> Vec<u8> {
    let body = Writer::new()
        .put_u8(17)
        .put_cstring("Test Server")
        .put_cstring("cp_badlands")
        .put_cstring("tf")
        .put_cstring("Team Fortress")
        .put_u16_le(440)
        .put_u8(2)
        .put_u8(24)
        .put_u8(0)
        .put_u8(b'd')
        .put_u8(b'l')
        .put_u8(0)
        .put_u8(1)
        .put_cstring("8622567")
        .put_u8(0x90)
        .put_u16_le(27015)
        .put_bytes(&76561198000000000u64.to_le_bytes())
        .finish();
    single(0x49, &body)
}

fn goldsource_info() -> Vec<u8> {
    let body = Writer::new()
        .put_cstring("127.0.0.1:27015")
        .put_cstring("Old School")
        .put_cstring("de_dust")
        .put_cstring("cstrike")
        .put_cstring("Counter-Strike")
        .put_u8(2)
        .put_u8(20)
        .put_u8(47)
        .put_u8(b'd')
        .put_u8(b'l')
        .put_u8(0)
        .put_u8(0)
        .put_u8(1)
        .put_u8(0)
        .finish();
    single(0x6D, &body)
}

/// A GoldSource engine answering in the Source layout, protocol 47.
fn source_layout_goldsource_info() -> Vec<u8> {
    let body = Writer::new()
        .put_u8(47)
        .put_cstring("Half-Life Server")
        .put_cstring("crossfire")
        .put_cstring("valve")
        .put_cstring("Half-Life")
        .put_u16_le(70)
        .put_u8(2)
        .put_u8(16)
        .put_u8(0)
        .put_u8(b'd')
        .put_u8(b'l')
        .put_u8(0)
        .put_u8(1)
        .put_cstring("1.1.2.2")
        .finish();
    single(0x49, &body)
}

fn players() -> Vec<u8> {
    let body = Writer::new()
        .put_u8(2)
        .put_u8(0)
        .put_cstring("alice")
        .put_i32_le(10)
        .put_bytes(&120.0f32.to_le_bytes())
        .put_u8(1)
        .put_cstring("bob")
        .put_i32_le(4)
        .put_bytes(&30.0f32.to_le_bytes())
        .finish();
    single(0x44, &body)
}

fn rules() -> Vec<u8> {
    let body = Writer::new()
        .put_u16_le(2)
        .put_cstring("mp_timelimit")
        .put_cstring("30")
        .put_cstring("sv_gravity")
        .put_cstring("800")
        .finish();
    single(0x45, &body)
}

/// Split `packet` into modern fragments, sent last-first.
fn modern_split(id: i32, packet: &[u8], chunk: usize) -> Vec<Reply> {
    let pieces: Vec<&[u8]> = packet.chunks(chunk).collect();
    let total = pieces.len() as u8;
    pieces
        .iter()
        .enumerate()
        .rev()
        .map(|(index, piece)| {
            let mut raw = vec![0xFE, 0xFF, 0xFF, 0xFF];
            raw.extend_from_slice(&id.to_le_bytes());
            raw.extend_from_slice(&[total, index as u8]);
            raw.extend_from_slice(&(chunk as u16).to_le_bytes());
            raw.extend_from_slice(piece);
            Reply::Send(raw)
        })
        .collect()
}

/// Split `packet` into legacy (packed nibble) fragments, sent last-first.
fn legacy_split(id: i32, packet: &[u8], chunk: usize) -> Vec<Reply> {
    let pieces: Vec<&[u8]> = packet.chunks(chunk).collect();
    let total = pieces.len() as u8;
    pieces
        .iter()
        .enumerate()
        .rev()
        .map(|(index, piece)| {
            let mut raw = vec![0xFE, 0xFF, 0xFF, 0xFF];
            raw.extend_from_slice(&id.to_le_bytes());
            raw.push(((index as u8) << 4) | total);
            raw.extend_from_slice(piece);
            Reply::Send(raw)
        })
        .collect()
}

/// A modern server: challenges A2S_INFO and A2S_PLAYER, splits the player
/// list, and answers A2S_RULES without a challenge.
fn source_server(request: &[u8]) -> Vec<Reply> {
    let tail = &request[5..];
    match request[4] {
        0x54 if tail.ends_with(&CHALLENGE) => vec![Reply::Stranger(source_info()), Reply::Send(source_info())],
        0x54 => vec![Reply::Send(challenge())],
        0x55 if tail == NO_CHALLENGE => vec![Reply::Send(challenge())],
        0x55 if tail == CHALLENGE => {
            // a stale rules reply first, which the players stage must skip
            let mut replies = vec![Reply::Send(rules())];
            replies.extend(modern_split(0x1234, &players(), 16));
            replies
        }
        0x56 => vec![Reply::Send(rules())],
        _ => vec![],
    }
}

#[tokio::test]
async fn modern_server_end_to_end() {
    let addr = spawn_server(source_server).await;
    let target = Target::new("127.0.0.1", addr.port(), "tf2").unwrap();

    let result = match QueryEngine::new(None).query(&target).await {
        QueryResult::Source(result) => result,
        other => panic!("expected a Source result, got {other:?}"),
    };
    assert!(result.error.is_none(), "{:?}", result.error);

    let info = result.info.unwrap();
    assert!(!info.goldsource);
    assert_eq!(info.hostname, "Test Server");
    assert_eq!(info.app_id, Some(440));
    assert_eq!(info.port, Some(27015));
    assert_eq!(info.steam_id, Some(76561198000000000));
    assert_eq!(info.tv_name, None);
    assert_eq!(info.keywords, None);
    assert_eq!(info.game_id, None);

    let players = result.players.unwrap();
    assert_eq!(players.len(), 2);
    assert_eq!(players[0].name, "alice");
    assert_eq!(players[1].score, 4);
    assert_eq!(players[1].duration, 30.0);

    assert_eq!(
        result.rules.unwrap(),
        vec![
            valve::rules::Rule { name: "mp_timelimit".into(), value: "30".into() },
            valve::rules::Rule { name: "sv_gravity".into(), value: "800".into() },
        ]
    );
}

#[tokio::test]
async fn goldsource_server_uses_legacy_split() {
    let addr = spawn_server(|request: &[u8]| match request[4] {
        0x54 => vec![Reply::Send(goldsource_info())],
        0x55 => legacy_split(7, &players(), 12),
        0x56 => legacy_split(8, &rules(), 20),
        _ => vec![],
    })
    .await;

    let result = SourceQuery::new(addr, None).run().await;
    assert!(result.error.is_none(), "{:?}", result.error);
    let info = result.info.unwrap();
    assert!(info.goldsource);
    assert_eq!(info.address.as_deref(), Some("127.0.0.1:27015"));
    assert_eq!(info.protocol, 47);
    assert_eq!(result.players.unwrap().len(), 2);
    assert_eq!(result.rules.unwrap().len(), 2);
}

#[tokio::test]
async fn source_layout_with_goldsource_protocol_uses_legacy_split() {
    let addr = spawn_server(|request: &[u8]| match request[4] {
        0x54 => vec![Reply::Send(source_layout_goldsource_info())],
        0x55 => legacy_split(9, &players(), 12),
        0x56 => vec![Reply::Send(rules())],
        _ => vec![],
    })
    .await;

    let result = SourceQuery::new(addr, Some(Duration::from_millis(500))).run().await;
    assert!(result.error.is_none(), "{:?}", result.error);
    let info = result.info.unwrap();
    assert!(!info.goldsource);
    assert_eq!(info.protocol, 47);
    let players = result.players.unwrap();
    assert_eq!(players.len(), 2);
    assert_eq!(players[0].name, "alice");
    assert_eq!(players[1].name, "bob");
}

#[tokio::test]
async fn compressed_split_stops_the_query() {
    let addr = spawn_server(|request: &[u8]| match request[4] {
        0x54 => vec![Reply::Send(source_info())],
        0x55 => modern_split(0x8000_0001u32 as i32, &players(), 16),
        _ => vec![],
    })
    .await;

    let result = SourceQuery::new(addr, Some(Duration::from_millis(500))).run().await;
    assert!(result.info.is_some());
    assert!(result.players.is_none());
    assert!(matches!(result.error, Some(QueryError::UnsupportedCompression)));
}

#[tokio::test]
async fn incomplete_split_times_out() {
    let addr = spawn_server(|request: &[u8]| match request[4] {
        0x54 => vec![Reply::Send(source_info())],
        0x55 => {
            let mut fragments = modern_split(3, &players(), 16);
            fragments.remove(0);
            fragments
        }
        _ => vec![],
    })
    .await;

    let result = SourceQuery::new(addr, Some(Duration::from_millis(200))).run().await;
    assert!(result.info.is_some());
    assert!(matches!(result.error, Some(QueryError::Timeout)));
}

#[tokio::test]
async fn silent_server_times_out_before_info() {
    let addr = spawn_server(|_: &[u8]| vec![]).await;
    let result = SourceQuery::new(addr, Some(Duration::from_millis(100))).run().await;
    assert!(result.info.is_none());
    assert!(matches!(result.error, Some(QueryError::Timeout)));
}
