mod build;
mod common;
mod enrich;
mod rank;

pub use build::{BuildArgs, build};
pub use common::{LogLevel, init_logging};
pub use enrich::{EnrichArgs, enrich};
pub use rank::{RankArgs, rank};
