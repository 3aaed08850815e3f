use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{serialize_error, QueryError, Result};
use crate::minecraft::{MinecraftQuery, MinecraftResult};
use crate::samp::{SampQuery, SampResult};
use crate::valve::{SourceQuery, SourceResult};

/// Query protocol a game speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Game {
    Samp,
    Source,
    Minecraft,
}

/// Game names (and aliases) mapped to the protocol they speak.
pub const GAMES: &[(&str, Game)] = &[
    ("samp", Game::Samp),
    ("sa-mp", Game::Samp),
    ("source", Game::Source),
    ("valve", Game::Source),
    ("goldsource", Game::Source),
    ("hl", Game::Source),
    ("hl2dm", Game::Source),
    ("cs16", Game::Source),
    ("cscz", Game::Source),
    ("css", Game::Source),
    ("csgo", Game::Source),
    ("cs2", Game::Source),
    ("tf2", Game::Source),
    ("dods", Game::Source),
    ("gmod", Game::Source),
    ("l4d", Game::Source),
    ("l4d2", Game::Source),
    ("rust", Game::Source),
    ("minecraft", Game::Minecraft),
    ("mc", Game::Minecraft),
];

impl Game {
    /// Look `name` up in [GAMES], ignoring case.
    pub fn resolve(name: &str) -> Result<Game> {
        let name = name.trim();
        GAMES
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))
            .map(|(_, game)| *game)
            .ok_or_else(|| QueryError::UnsupportedGame(name.to_string()))
    }

    pub fn name(self) -> &'static str {
        match self {
            Game::Samp => "samp",
            Game::Source => "source",
            Game::Minecraft => "minecraft",
        }
    }
}

impl FromStr for Game {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        Game::resolve(s)
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A server to query and the protocol to query it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub address: IpAddr,
    pub port: u16,
    pub game: Game,
}

impl Target {
    pub fn new(address: &str, port: u16, game: &str) -> Result<Target> {
        let game = Game::resolve(game)?;
        let address = address
            .trim()
            .parse()
            .map_err(|_| QueryError::InvalidAddress(address.to_string()))?;
        Ok(Target { address, port, game })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// `game:address:port`, e.g. `samp:127.0.0.1:7777` or `tf2:[::1]:27015`.
impl FromStr for Target {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        let (game, endpoint) = s
            .split_once(':')
            .ok_or_else(|| QueryError::InvalidAddress(s.to_string()))?;
        let game = Game::resolve(game)?;
        let endpoint: SocketAddr = endpoint
            .parse()
            .map_err(|_| QueryError::InvalidAddress(endpoint.to_string()))?;
        Ok(Target {
            address: endpoint.ip(),
            port: endpoint.port(),
            game,
        })
    }
}

/// The record shape upstream tools hand us.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetRecord {
    pub address: String,
    pub port: u16,
    pub game: String,
}

impl TargetRecord {
    /// Read one `{"address", "port", "game"}` JSON record.
    pub fn from_json(line: &str) -> Result<TargetRecord> {
        serde_json::from_str(line).map_err(|e| QueryError::InvalidRecord(format!("{line:?}: {e}")))
    }
}

impl TryFrom<TargetRecord> for Target {
    type Error = QueryError;

    fn try_from(record: TargetRecord) -> Result<Target> {
        Target::new(&record.address, record.port, &record.game)
    }
}

/// A query that never reached the network.
#[derive(Debug, Serialize)]
pub struct Rejected {
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<QueryError>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Samp(SampResult),
    Source(SourceResult),
    Minecraft(MinecraftResult),
    Rejected(Rejected),
}

impl QueryResult {
    pub fn rejected(error: QueryError) -> Self {
        QueryResult::Rejected(Rejected { error: Some(error) })
    }

    /// The error that ended the query early, if any.
    pub fn error(&self) -> Option<&QueryError> {
        match self {
            QueryResult::Samp(r) => r.error.as_ref(),
            QueryResult::Source(r) => r.error.as_ref(),
            QueryResult::Minecraft(r) => r.error.as_ref(),
            QueryResult::Rejected(r) => r.error.as_ref(),
        }
    }
}

/// Queries a stream keeps in flight before it stops reading input.
const STREAM_DEPTH: usize = 256;

/// Runs queries; every query gets its own transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryEngine {
    timeout: Option<Duration>,
}

impl QueryEngine {
    /// Each request waits at most `timeout_dur` (2 seconds if `None`) for its reply.
    pub fn new(timeout_dur: Option<Duration>) -> Self {
        QueryEngine { timeout: timeout_dur }
    }

    pub async fn query(&self, target: &Target) -> QueryResult {
        let remote = target.socket_addr();
        debug!("querying {} server at {}", target.game, remote);

        let result = match target.game {
            Game::Samp => match SampQuery::new(remote, self.timeout) {
                Ok(query) => QueryResult::Samp(query.run().await),
                Err(e) => QueryResult::Samp(SampResult {
                    error: Some(e),
                    ..Default::default()
                }),
            },
            Game::Source => QueryResult::Source(SourceQuery::new(remote, self.timeout).run().await),
            Game::Minecraft => QueryResult::Minecraft(MinecraftQuery::new(remote, self.timeout).run().await),
        };

        if let Some(e) = result.error() {
            warn!("query to {} stopped early: {}", remote, e);
        }
        result
    }

    /// Query every target concurrently. Results come back in input order.
    pub async fn query_all(&self, targets: Vec<Target>) -> Vec<QueryResult> {
        let handles: Vec<_> = targets
            .into_iter()
            .map(|target| {
                let engine = *self;
                tokio::spawn(async move { engine.query(&target).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(joined(handle).await);
        }
        results
    }

    /// Start a query for each entry as soon as it arrives. Results come
    /// out in input order; entries that failed to parse come out rejected.
    /// Must be called from within a tokio runtime.
    pub fn query_stream(&self, mut entries: mpsc::Receiver<Result<Target>>) -> mpsc::Receiver<QueryResult> {
        let engine = *self;
        let (pending_tx, mut pending_rx) = mpsc::channel::<JoinHandle<QueryResult>>(STREAM_DEPTH);
        let (results_tx, results_rx) = mpsc::channel(STREAM_DEPTH);

        tokio::spawn(async move {
            while let Some(entry) = entries.recv().await {
                let handle = match entry {
                    Ok(target) => tokio::spawn(async move { engine.query(&target).await }),
                    Err(e) => tokio::spawn(async move { QueryResult::rejected(e) }),
                };
                if pending_tx.send(handle).await.is_err() {
                    break;
                }
            }
        });
        tokio::spawn(async move {
            while let Some(handle) = pending_rx.recv().await {
                if results_tx.send(joined(handle).await).await.is_err() {
                    debug!("result receiver dropped, abandoning stream");
                    break;
                }
            }
        });

        results_rx
    }
}

async fn joined(handle: JoinHandle<QueryResult>) -> QueryResult {
    match handle.await {
        Ok(result) => result,
        Err(e) => QueryResult::rejected(QueryError::Task(e.to_string())),
    }
}
