// Hunt domain model
//
// This crate holds the storage-agnostic types shared by the reconciliation
// engine and the bot binary.
//
// Key design decisions:
// - Puzzle, Round and Solver carry the transition rules for the invariants
//   (single assignment, monotonic history, monotonic watermark, round
//   completion, one-way document mode upgrade)
// - Stores persist the outcome of those rules; they never reimplement them
// - Configuration is parsed from a flat key/value map so it can be hot-reloaded
//   from any source

pub mod activity;
pub mod config;
pub mod ids;
pub mod puzzle;
pub mod round;
pub mod solver;
pub mod telemetry;

pub use activity::{ActivityKind, ActivityOrigin, ActivityRecord, ActivityStamp, EditEvent};
pub use config::{
    BotConfig, ConfigError, ConfigSource, EnvConfigSource, LayeredConfigSource,
    StaticConfigSource,
};
pub use ids::{PuzzleId, RoundId, SolverId};
pub use puzzle::{
    AssignChange, DocumentActivityMode, Puzzle, PuzzleSolved, PuzzleStatus, PuzzleStatusParseError,
};
pub use round::{Round, RoundStatus};
pub use solver::Solver;
