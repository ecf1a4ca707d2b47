mod rankings;
mod router;

pub use rankings::{ModelInfo, ModelRankings, RankingsStore, RankingsWatcher, RoleRanking};
pub use router::{ModelRouter, ModelSelection};
