// Forward migration of stored settings blobs
//
// Steps run on the raw JSON object so they can see keys the current
// `Settings` struct no longer declares. A step may add a missing key,
// rename a key (moving its value) or fill a default; it never drops a
// value the user set.

use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use tracing::{info, warn};

pub const CURRENT_CONFIG_VERSION: &str = "1.3.0";

/// Version assumed for blobs written before `config_version` existed
const LEGACY_CONFIG_VERSION: &str = "1.0.0";

type StepFn = fn(&mut Map<String, Value>);

struct MigrationStep {
    target: &'static str,
    apply: StepFn,
}

const STEPS: &[MigrationStep] = &[
    MigrationStep { target: "1.1.0", apply: to_1_1_0 },
    MigrationStep { target: "1.2.0", apply: to_1_2_0 },
    MigrationStep { target: "1.3.0", apply: to_1_3_0 },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: String,
    pub to: String,
    pub changed: bool,
}

/// Parse "major.minor.patch"; missing parts count as zero, junk as zero.
pub fn parse_version(version: &str) -> (u32, u32, u32) {
    let mut parts = version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .map(|p| p.trim().parse::<u32>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    parse_version(a).cmp(&parse_version(b))
}

fn insert_missing(map: &mut Map<String, Value>, key: &str, value: Value) {
    if !map.contains_key(key) {
        map.insert(key.to_string(), value);
    }
}

fn rename(map: &mut Map<String, Value>, old: &str, new: &str) {
    if map.contains_key(new) {
        return;
    }
    if let Some(value) = map.remove(old) {
        map.insert(new.to_string(), value);
    }
}

fn to_1_1_0(map: &mut Map<String, Value>) {
    rename(map, "ai_detect_cooldown", "switch_cooldown_ms");
    insert_missing(map, "preload_images", json!(true));
    insert_missing(map, "preload_videos", json!(false));
}

fn to_1_2_0(map: &mut Map<String, Value>) {
    if !map.contains_key("auto_switch_mode") {
        let mode = match map.remove("auto_switch") {
            Some(Value::Bool(false)) => "manual",
            _ => "timer",
        };
        map.insert("auto_switch_mode".to_string(), json!(mode));
    }
}

fn to_1_3_0(map: &mut Map<String, Value>) {
    insert_missing(map, "random_played_indices", json!([]));
    insert_missing(map, "current_random_index", Value::Null);
    insert_missing(map, "last_switch_time", json!(0));
    insert_missing(map, "image_max_size_mb", json!(5));
    insert_missing(map, "video_max_size_mb", json!(100));
}

/// Bring a stored blob up to [`CURRENT_CONFIG_VERSION`] in place.
///
/// Running it on an already current blob changes nothing. A blob from a
/// newer build is left alone.
pub fn migrate_value(value: &mut Value) -> MigrationReport {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    let Value::Object(map) = value else {
        return MigrationReport {
            from: LEGACY_CONFIG_VERSION.to_string(),
            to: LEGACY_CONFIG_VERSION.to_string(),
            changed: false,
        };
    };

    let from = map
        .get("config_version")
        .and_then(Value::as_str)
        .unwrap_or(LEGACY_CONFIG_VERSION)
        .to_string();

    match compare_versions(&from, CURRENT_CONFIG_VERSION) {
        Ordering::Equal => {
            return MigrationReport {
                to: from.clone(),
                from,
                changed: false,
            }
        }
        Ordering::Greater => {
            warn!(
                "settings version {} is newer than this build ({}), leaving as is",
                from, CURRENT_CONFIG_VERSION
            );
            return MigrationReport {
                to: from.clone(),
                from,
                changed: false,
            };
        }
        Ordering::Less => {}
    }

    for step in STEPS {
        if compare_versions(&from, step.target) == Ordering::Less {
            (step.apply)(map);
            info!("migrated settings to {}", step.target);
        }
    }
    map.insert(
        "config_version".to_string(),
        json!(CURRENT_CONFIG_VERSION),
    );

    MigrationReport {
        from,
        to: CURRENT_CONFIG_VERSION.to_string(),
        changed: true,
    }
}
