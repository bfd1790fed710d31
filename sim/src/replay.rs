//! Event logs: JSON files of simulated events for offline refinement runs.

use crate::scenarios::Event;
use crate::trajectory::Trajectory;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// A recorded batch of events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLog {
    pub scenario_name: String,
    pub seed: u64,
    /// True trajectories the events were drawn from
    pub ground_truth: Vec<Trajectory>,
    pub events: Vec<Event>,
}

/// Save an event log to a JSON file.
pub fn save_events(log: &EventLog, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, log)?;
    Ok(())
}

/// Load an event log from a JSON file.
pub fn load_events(path: &Path) -> anyhow::Result<EventLog> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let log: EventLog = serde_json::from_reader(reader)?;
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::{Scenario, ScenarioKind};

    #[test]
    fn log_survives_a_file_round_trip() {
        let scenario = Scenario::build(ScenarioKind::CleanGap, 5);
        let log = EventLog {
            scenario_name: scenario.name.clone(),
            seed: scenario.seed,
            ground_truth: scenario.tracks.clone(),
            events: scenario.events(2),
        };
        let path = std::env::temp_dir().join(format!("trackrefine-log-{}.json", std::process::id()));
        save_events(&log, &path).unwrap();
        let loaded = load_events(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.scenario_name, "CleanGap");
        assert_eq!(loaded.events.len(), 2);
        let ids = |e: &Event| -> Vec<Vec<_>> {
            e.clusters.iter().map(|c| c.iter().map(|h| h.id).collect()).collect()
        };
        assert_eq!(ids(&loaded.events[1]), ids(&log.events[1]));
    }
}
