//! Tests for the state store and snapshot persistence

use super::*;
use crate::models::MonitorState;
use crate::provider::MonitorConfig;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

fn t(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn config(samples: u32) -> MonitorConfig {
    MonitorConfig {
        consecutive_samples: samples,
        ..Default::default()
    }
}

fn observe(
    store: &mut MonitorStateStore,
    id: &str,
    state: MonitorState,
    config: &MonitorConfig,
    minute: i64,
) -> MonitorStateRecord {
    let details = json!({"state": state.as_str(), "minute": minute});
    store
        .update(
            id,
            Observation {
                state,
                observed_at: t(minute),
                details: &details,
                config,
            },
            t(minute),
        )
        .clone()
}

mod store_tests {
    use super::*;

    #[test]
    fn test_first_observation_is_sent() {
        let mut store = MonitorStateStore::new("cluster");
        let record = observe(&mut store, "a", MonitorState::Pass, &config(1), 0);

        assert_eq!(record.old_state, None);
        assert_eq!(record.new_state, MonitorState::Pass);
        assert!(record.should_send);
        assert_eq!(record.occurrences, 1);
        assert_eq!(record.last_transition_time, Some(t(0)));
    }

    #[test]
    fn test_new_state_becomes_old_state_once() {
        let mut store = MonitorStateStore::new("cluster");
        let cfg = config(1);
        observe(&mut store, "a", MonitorState::Pass, &cfg, 0);

        let second = observe(&mut store, "a", MonitorState::Pass, &cfg, 1);
        assert_eq!(second.old_state, Some(MonitorState::Pass));
        assert!(!second.should_send);

        let third = observe(&mut store, "a", MonitorState::Fail, &cfg, 2);
        assert_eq!(third.old_state, Some(MonitorState::Pass));
        assert_eq!(third.new_state, MonitorState::Fail);
        assert!(third.should_send);
        assert_eq!(third.time_first_observed, t(2));

        let fourth = observe(&mut store, "a", MonitorState::Fail, &cfg, 3);
        assert_eq!(fourth.old_state, Some(MonitorState::Fail));
        assert!(!fourth.should_send);
    }

    #[test]
    fn test_root_is_always_sent() {
        let mut store = MonitorStateStore::new("cluster");
        let cfg = config(1);
        for minute in 0..3 {
            let record = observe(&mut store, "cluster", MonitorState::Pass, &cfg, minute);
            assert!(record.should_send);
        }
    }

    #[test]
    fn test_thresholded_transition() {
        let mut store = MonitorStateStore::new("cluster");
        let cfg = config(3);

        let first = observe(&mut store, "a", MonitorState::Pass, &cfg, 0);
        assert_eq!(first.new_state, MonitorState::None);
        assert_eq!(first.pending_state, Some(MonitorState::Pass));

        observe(&mut store, "a", MonitorState::Pass, &cfg, 1);
        let third = observe(&mut store, "a", MonitorState::Pass, &cfg, 2);
        assert_eq!(third.new_state, MonitorState::Pass);
        assert!(third.should_send);
        assert_eq!(third.recent_details.len(), 3);

        // Two failures are not enough, and an interruption resets the streak
        observe(&mut store, "a", MonitorState::Fail, &cfg, 3);
        observe(&mut store, "a", MonitorState::Fail, &cfg, 4);
        let interrupted = observe(&mut store, "a", MonitorState::Pass, &cfg, 5);
        assert_eq!(interrupted.new_state, MonitorState::Pass);
        assert_eq!(interrupted.streak, 0);

        observe(&mut store, "a", MonitorState::Fail, &cfg, 6);
        observe(&mut store, "a", MonitorState::Fail, &cfg, 7);
        let flipped = observe(&mut store, "a", MonitorState::Fail, &cfg, 8);
        assert_eq!(flipped.new_state, MonitorState::Fail);
        assert_eq!(flipped.old_state, Some(MonitorState::Pass));
        assert!(flipped.should_send);
    }

    #[test]
    fn test_zero_threshold_behaves_like_one() {
        let mut store = MonitorStateStore::new("cluster");
        let cfg = config(0);
        observe(&mut store, "a", MonitorState::Pass, &cfg, 0);
        let record = observe(&mut store, "a", MonitorState::Warning, &cfg, 1);
        assert_eq!(record.new_state, MonitorState::Warning);
        assert_eq!(record.recent_details.len(), 1);
    }

    #[test]
    fn test_get_absent_returns_default() {
        let store = MonitorStateStore::new("cluster");
        let record = store.get("missing");
        assert_eq!(record, MonitorStateRecord::default());
        assert!(!store.contains("missing"));
    }
}

mod persistence_tests {
    use super::*;

    fn populated_store() -> MonitorStateStore {
        let mut store = MonitorStateStore::new("cluster");
        let cfg = config(2);
        observe(&mut store, "a", MonitorState::Pass, &cfg, 0);
        observe(&mut store, "a", MonitorState::Fail, &cfg, 1);
        observe(&mut store, "cluster", MonitorState::Warning, &config(1), 1);
        store
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("health.json");
        let store = populated_store();

        StateSerializer::new(&path).save(&store, t(5)).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let LoadedState::Restored(snapshot) = StateDeserializer::new(&path).load() else {
            panic!("expected a restored snapshot");
        };
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.saved_at, t(5));
        assert_eq!(&snapshot.states, store.states());

        let mut restored = MonitorStateStore::new("cluster");
        restored.load(snapshot.states);
        assert_eq!(restored.get("a"), store.get("a"));
    }

    #[test]
    fn test_same_store_same_bytes() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        let store = populated_store();

        StateSerializer::new(&first).save(&store, t(5)).unwrap();
        let LoadedState::Restored(snapshot) = StateDeserializer::new(&first).load() else {
            panic!("expected a restored snapshot");
        };
        let mut restored = MonitorStateStore::new("cluster");
        restored.load(snapshot.states);
        StateSerializer::new(&second).save(&restored, t(5)).unwrap();

        assert_eq!(
            std::fs::read(&first).unwrap(),
            std::fs::read(&second).unwrap()
        );
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let loaded = StateDeserializer::new(dir.path().join("absent.json")).load();
        assert_eq!(loaded, LoadedState::Empty);
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("health.json");
        std::fs::write(&path, b"{\"version\": 1, \"states\": [").unwrap();
        assert_eq!(StateDeserializer::new(&path).load(), LoadedState::Empty);
    }

    #[test]
    fn test_unsupported_version_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("health.json");
        let snapshot = json!({
            "version": 99,
            "saved_at": "2024-01-01T00:00:00Z",
            "states": {}
        });
        std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();
        assert_eq!(StateDeserializer::new(&path).load(), LoadedState::Empty);
    }

    #[test]
    fn test_record_json_shape() {
        let store = populated_store();
        let value: Value = serde_json::to_value(store.get("a")).unwrap();
        assert_eq!(value["old_state"], json!("none"));
        assert_eq!(value["new_state"], json!("none"));
        assert_eq!(value["pending_state"], json!("fail"));
    }
}
