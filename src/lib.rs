//! Pure Rust async queries for SA:MP, Source/GoldSource ([A2S](https://developer.valvesoftware.com/wiki/Server_queries))
//! and Minecraft (UDP query) game servers.
//!
//! ```no_run
//! # async fn demo() -> Result<(), gsquery::error::QueryError> {
//! use gsquery::{QueryEngine, Target};
//!
//! let target: Target = "tf2:127.0.0.1:27015".parse()?;
//! let result = QueryEngine::new(None).query(&target).await;
//! println!("{}", serde_json::to_string(&result).unwrap_or_default());
//! # Ok(())
//! # }
//! ```
pub mod error;
pub mod fragment;
pub mod minecraft;
pub mod net;
pub mod parse;
pub mod query;
pub mod samp;
pub mod valve;

pub use error::{QueryError, Result};
pub use query::{Game, QueryEngine, QueryResult, Target, TargetRecord};
