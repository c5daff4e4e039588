//! Mover state store and live price feeds.
//!
//! - `MoverStore`: per-instrument mover episodes and latest prices
//! - `FeedManager`: one live price subscription per active mover
//! - `PriceStreamSource`: the streaming seam, backed by the ticker WebSocket
//!   in production

pub mod error;
pub mod feed_manager;
pub mod parser;
pub mod store;
pub mod stream;

pub use error::{FeedError, FeedResult};
pub use feed_manager::FeedManager;
pub use parser::parse_ticker;
pub use store::{MoverSnapshot, MoverStore, MoverView, UpsertOutcome};
pub use stream::{
    BoxFuture, DynPriceStreamSource, MockPriceSource, PriceStream, PriceStreamSource,
    StreamConfig, TickerStreamSource,
};
