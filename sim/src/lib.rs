//! `sim`: synthetic events built from true trajectories, plus JSON event logs.

pub mod hit_sim;
pub mod replay;
pub mod scenarios;
pub mod trajectory;

pub use hit_sim::{HitSimParams, HitSimulator};
pub use replay::{load_events, save_events, EventLog};
pub use scenarios::{Event, Piece, Scenario, ScenarioKind};
pub use trajectory::{PathSpec, Trajectory};
