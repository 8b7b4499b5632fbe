//! Duplicate-instance resolution.
//!
//! Transient index overlap is normal during rolling restarts, so a
//! stop is only emitted once the *oldest* occupant of the index has
//! been around longer than the grace period. One stop per index per
//! pass: the next pass sees the reduced set and acts again if still
//! over target.

use tracing::debug;

use pulse_core::{InstanceHeartbeat, PendingStop};

use crate::snapshot::StateSnapshot;

/// Compute the duplicate-instance stops for one analysis pass.
pub(crate) fn stops_for_duplicate_instances(
    snapshot: &StateSnapshot,
    now: u64,
    grace_period: u64,
) -> Vec<PendingStop> {
    let mut stops = Vec::new();

    for desired in &snapshot.desired {
        let app_key = desired.app_key();
        for index in 0..desired.number_of_instances {
            let mut occupants: Vec<&InstanceHeartbeat> = snapshot
                .heartbeats_at_index(&app_key, index)
                .into_iter()
                .filter(|hb| hb.is_starting_or_running())
                .collect();
            if occupants.len() < 2 {
                continue;
            }

            let oldest = occupants
                .iter()
                .map(|hb| hb.state_timestamp)
                .fold(f64::INFINITY, f64::min);
            if (now as f64) - oldest < grace_period as f64 {
                debug!(
                    app_id = %desired.app_id,
                    index,
                    occupants = occupants.len(),
                    "duplicate index within grace period, waiting"
                );
                continue;
            }

            // Stable victim selection so repeated passes agree.
            occupants.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
            let victim = occupants[0];
            debug!(
                app_id = %desired.app_id,
                index,
                instance_id = %victim.instance_id,
                "stopping duplicate instance"
            );
            stops.push(PendingStop {
                app_id: desired.app_id.clone(),
                app_version: desired.app_version.clone(),
                instance_index: index,
                instance_id: victim.instance_id.clone(),
                is_duplicate: true,
                issued_at: now,
            });
        }
    }

    stops
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{AppState, DesiredApp, InstanceState, PackageState};

    const GRACE: u64 = 30;

    fn heartbeat(instance_id: &str, index: u32, state_timestamp: f64) -> InstanceHeartbeat {
        InstanceHeartbeat {
            app_id: "app-1".to_string(),
            app_version: "v1".to_string(),
            instance_id: instance_id.to_string(),
            instance_index: index,
            state: InstanceState::Running,
            state_timestamp,
            host_id: "h1".to_string(),
        }
    }

    fn desired(instances: u32) -> DesiredApp {
        DesiredApp {
            app_id: "app-1".to_string(),
            app_version: "v1".to_string(),
            number_of_instances: instances,
            state: AppState::Started,
            package_state: PackageState::Staged,
            updated_at: 100,
        }
    }

    fn snapshot(heartbeats: Vec<InstanceHeartbeat>, instances: u32) -> StateSnapshot {
        StateSnapshot::build(heartbeats, vec![desired(instances)])
    }

    #[test]
    fn single_occupants_produce_no_stops() {
        let snap = snapshot(
            vec![heartbeat("i1", 0, 100.0), heartbeat("i2", 1, 100.0)],
            2,
        );
        assert!(stops_for_duplicate_instances(&snap, 200, GRACE).is_empty());
    }

    #[test]
    fn no_stop_within_grace_period() {
        let snap = snapshot(
            vec![
                heartbeat("i1", 0, 100.0),
                heartbeat("i2", 1, 100.0),
                heartbeat("i3", 1, 100.0),
            ],
            2,
        );
        // Oldest occupant is 20s old at t=120; grace is 30.
        assert!(stops_for_duplicate_instances(&snap, 120, GRACE).is_empty());
    }

    #[test]
    fn one_stop_after_grace_period() {
        let snap = snapshot(
            vec![
                heartbeat("i1", 0, 100.0),
                heartbeat("i2", 1, 100.0),
                heartbeat("i3", 1, 100.0),
            ],
            2,
        );

        let stops = stops_for_duplicate_instances(&snap, 130, GRACE);
        assert_eq!(stops.len(), 1);

        let stop = &stops[0];
        assert_eq!(stop.app_id, "app-1");
        assert_eq!(stop.instance_index, 1);
        assert!(stop.is_duplicate);
        assert_eq!(stop.issued_at, 130);
        // Lexicographic tie-break.
        assert_eq!(stop.instance_id, "i2");
    }

    #[test]
    fn grace_measured_from_oldest_occupant() {
        // The newcomer landed 5s ago but the original has been there
        // past the grace period: act now.
        let snap = snapshot(
            vec![heartbeat("i2", 1, 100.0), heartbeat("i3", 1, 155.0)],
            2,
        );
        let stops = stops_for_duplicate_instances(&snap, 160, GRACE);
        assert_eq!(stops.len(), 1);
    }

    #[test]
    fn triple_occupancy_still_emits_one_stop_per_pass() {
        let snap = snapshot(
            vec![
                heartbeat("i2", 1, 100.0),
                heartbeat("i3", 1, 100.0),
                heartbeat("i4", 1, 100.0),
            ],
            2,
        );
        let stops = stops_for_duplicate_instances(&snap, 130, GRACE);
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].instance_id, "i2");
    }

    #[test]
    fn each_duplicated_index_gets_its_own_stop() {
        let snap = snapshot(
            vec![
                heartbeat("i1", 0, 100.0),
                heartbeat("i2", 0, 100.0),
                heartbeat("i3", 1, 100.0),
                heartbeat("i4", 1, 100.0),
            ],
            2,
        );
        let stops = stops_for_duplicate_instances(&snap, 130, GRACE);
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0].instance_index, 0);
        assert_eq!(stops[1].instance_index, 1);
    }

    #[test]
    fn crashed_occupants_do_not_count() {
        let mut crashed = heartbeat("i3", 1, 100.0);
        crashed.state = InstanceState::Crashed;
        let snap = snapshot(vec![heartbeat("i2", 1, 100.0), crashed], 2);

        assert!(stops_for_duplicate_instances(&snap, 130, GRACE).is_empty());
    }

    #[test]
    fn duplicates_beyond_desired_range_are_ignored() {
        // Index 5 is outside [0, 2); another policy owns it.
        let snap = snapshot(
            vec![heartbeat("i2", 5, 100.0), heartbeat("i3", 5, 100.0)],
            2,
        );
        assert!(stops_for_duplicate_instances(&snap, 130, GRACE).is_empty());
    }

    #[test]
    fn resolution_settles_after_victim_disappears() {
        let snap = snapshot(
            vec![heartbeat("i2", 1, 100.0), heartbeat("i3", 1, 100.0)],
            2,
        );
        let stops = stops_for_duplicate_instances(&snap, 130, GRACE);
        assert_eq!(stops.len(), 1);

        // The victim stopped; the survivor alone triggers nothing.
        let snap = snapshot(vec![heartbeat("i3", 1, 100.0)], 2);
        assert!(stops_for_duplicate_instances(&snap, 160, GRACE).is_empty());
    }
}
