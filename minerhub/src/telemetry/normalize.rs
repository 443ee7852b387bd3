use std::collections::BTreeMap;

use super::{BoardState, DeviceState, FanState};
use crate::device::{Capabilities, INITIAL_POWER_LIMIT, PowerScaling, RawSnapshot, TunerPayload};

/// How many board and fan records a state must carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpectedCounts {
    pub hashboards: u8,
    pub fans: u8,
}

impl From<&Capabilities> for ExpectedCounts {
    fn from(capabilities: &Capabilities) -> Self {
        Self {
            hashboards: capabilities.expected_hashboard_count,
            fans: capabilities.expected_fan_count,
        }
    }
}

/// Map a raw snapshot onto a [`DeviceState`].
///
/// Board and fan records are keyed by the slot the device reported, and
/// every slot below the expected count is present even when the device
/// skipped it this cycle. A slot at or above the expected count extends
/// the range instead of being dropped.
pub fn normalize(raw: &RawSnapshot, expected: ExpectedCounts) -> DeviceState {
    DeviceState {
        is_reachable: true,
        is_mining: raw.is_mining,
        hashrate: raw.hashrate.map(round2),
        expected_hashrate: raw.expected_hashrate.map(round2),
        temperature_avg: raw.temperature_avg.map(|t| t.trunc() as i32),
        wattage: raw.wattage,
        wattage_limit: raw.wattage_limit,
        scaled_power_limit: scaled_power_limit(raw.tuner.as_ref(), raw.wattage_limit),
        efficiency: raw.efficiency,
        active_preset_name: raw.active_preset.clone(),
        mining_mode: raw.mining_mode.clone(),
        boards: boards(raw, expected.hashboards),
        fans: fans(raw, expected.fans),
        mining_mode_config: raw.config.clone(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Power limit the tuner is currently scaling to.
///
/// Three outcomes: an explicit scaled value, the pinned sentinel (which
/// means "same as the configured limit"), or unknown.
fn scaled_power_limit(tuner: Option<&TunerPayload>, wattage_limit: Option<f64>) -> Option<f64> {
    match tuner?.dynamic_power_scaling.as_ref()? {
        PowerScaling::Scaled { scaled_power_limit } => Some(*scaled_power_limit),
        PowerScaling::Pinned(sentinel) if sentinel == INITIAL_POWER_LIMIT => wattage_limit,
        PowerScaling::Pinned(_) | PowerScaling::Other(_) => None,
    }
}

/// Every slot from 0 up to the larger of the last expected slot and the
/// highest reported one. Slot 255 is included.
fn slots(expected: u8, reported: impl Iterator<Item = u8>) -> impl Iterator<Item = u8> {
    let last = reported.max().max(expected.checked_sub(1));
    last.into_iter().flat_map(|last| 0..=last)
}

fn boards(raw: &RawSnapshot, expected: u8) -> Vec<BoardState> {
    let reported: BTreeMap<u8, _> = raw.hashboards.iter().map(|b| (b.slot, b)).collect();
    slots(expected, reported.keys().copied())
        .map(|slot| match reported.get(&slot) {
            Some(board) => BoardState {
                slot,
                board_temp: board.temp,
                chip_temp: board.chip_temp,
                hashrate: board.hashrate.map(round2),
            },
            None => BoardState {
                slot,
                ..Default::default()
            },
        })
        .collect()
}

fn fans(raw: &RawSnapshot, expected: u8) -> Vec<FanState> {
    let reported: BTreeMap<u8, _> = raw.fans.iter().map(|f| (f.slot, f.speed)).collect();
    slots(expected, reported.keys().copied())
        .map(|slot| FanState {
            slot,
            speed_rpm: reported.get(&slot).copied().flatten(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{RawBoard, RawFan};
    use serde_json::json;
    use test_case::test_case;

    fn counts(hashboards: u8, fans: u8) -> ExpectedCounts {
        ExpectedCounts { hashboards, fans }
    }

    fn tuner(value: serde_json::Value) -> Option<TunerPayload> {
        Some(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn should_map_absent_fields_to_unknown() {
        let state = normalize(&RawSnapshot::default(), counts(0, 0));

        assert!(state.is_reachable);
        assert_eq!(state.is_mining, None);
        assert_eq!(state.hashrate, None);
        assert_eq!(state.expected_hashrate, None);
        assert_eq!(state.temperature_avg, None);
        assert_eq!(state.wattage, None);
        assert_eq!(state.wattage_limit, None);
        assert_eq!(state.efficiency, None);
        assert_eq!(state.active_preset_name, None);
        assert!(state.boards.is_empty());
        assert!(state.fans.is_empty());
    }

    #[test]
    fn should_keep_zero_readings() {
        let raw = RawSnapshot {
            hashrate: Some(0.0),
            fans: vec![RawFan {
                slot: 0,
                speed: Some(0),
            }],
            ..Default::default()
        };

        let state = normalize(&raw, counts(0, 1));
        assert_eq!(state.hashrate, Some(0.0));
        assert_eq!(state.fans[0].speed_rpm, Some(0));
    }

    #[test]
    fn should_round_hashrates_and_truncate_temperature() {
        let raw = RawSnapshot {
            hashrate: Some(95.126),
            expected_hashrate: Some(99.994),
            temperature_avg: Some(64.9),
            hashboards: vec![RawBoard {
                slot: 0,
                hashrate: Some(31.705),
                ..Default::default()
            }],
            ..Default::default()
        };

        let state = normalize(&raw, counts(1, 0));
        assert_eq!(state.hashrate, Some(95.13));
        assert_eq!(state.expected_hashrate, Some(99.99));
        assert_eq!(state.temperature_avg, Some(64));
        assert_eq!(state.boards[0].hashrate, Some(31.71));
    }

    #[test]
    fn should_fill_missing_board_slots() {
        let raw = RawSnapshot {
            hashboards: vec![
                RawBoard {
                    slot: 2,
                    temp: Some(62.0),
                    chip_temp: Some(72.0),
                    hashrate: Some(30.0),
                },
                RawBoard {
                    slot: 0,
                    temp: Some(60.0),
                    chip_temp: Some(70.0),
                    hashrate: Some(31.0),
                },
            ],
            ..Default::default()
        };

        let state = normalize(&raw, counts(3, 0));

        let slots: Vec<u8> = state.boards.iter().map(|b| b.slot).collect();
        assert_eq!(slots, vec![0, 1, 2]);
        assert_eq!(state.boards[0].board_temp, Some(60.0));
        assert_eq!(state.boards[1], BoardState {
            slot: 1,
            board_temp: None,
            chip_temp: None,
            hashrate: None,
        });
        assert_eq!(state.boards[2].hashrate, Some(30.0));
    }

    #[test]
    fn should_index_fans_by_reported_slot() {
        let raw = RawSnapshot {
            fans: vec![
                RawFan {
                    slot: 3,
                    speed: Some(4000),
                },
                RawFan {
                    slot: 1,
                    speed: Some(3900),
                },
            ],
            ..Default::default()
        };

        let state = normalize(&raw, counts(0, 4));

        assert_eq!(state.fans.len(), 4);
        assert_eq!(state.fans[0].speed_rpm, None);
        assert_eq!(state.fans[1].speed_rpm, Some(3900));
        assert_eq!(state.fans[2].speed_rpm, None);
        assert_eq!(state.fans[3].speed_rpm, Some(4000));
    }

    #[test]
    fn should_extend_past_expected_count_for_unexpected_slot() {
        let raw = RawSnapshot {
            hashboards: vec![RawBoard {
                slot: 3,
                ..Default::default()
            }],
            ..Default::default()
        };

        let state = normalize(&raw, counts(2, 0));
        assert_eq!(state.boards.len(), 4);
    }

    #[test]
    fn scaled_power_limit_follows_pinned_sentinel() {
        let raw = RawSnapshot {
            wattage_limit: Some(3000.0),
            tuner: tuner(json!({ "DynamicPowerScaling": "InitialPowerLimit" })),
            ..Default::default()
        };
        assert_eq!(normalize(&raw, counts(0, 0)).scaled_power_limit, Some(3000.0));
    }

    #[test]
    fn scaled_power_limit_reads_structured_value() {
        let raw = RawSnapshot {
            wattage_limit: Some(3000.0),
            tuner: tuner(json!({ "DynamicPowerScaling": { "ScaledPowerLimit": 2750 } })),
            ..Default::default()
        };
        assert_eq!(normalize(&raw, counts(0, 0)).scaled_power_limit, Some(2750.0));
    }

    #[test]
    fn scaled_power_limit_unknown_without_tuner() {
        let raw = RawSnapshot {
            wattage_limit: Some(3000.0),
            ..Default::default()
        };
        assert_eq!(normalize(&raw, counts(0, 0)).scaled_power_limit, None);
    }

    #[test]
    fn scaled_power_limit_unknown_for_other_sentinel() {
        let raw = RawSnapshot {
            wattage_limit: Some(3000.0),
            tuner: tuner(json!({ "DynamicPowerScaling": "Disabled" })),
            ..Default::default()
        };
        assert_eq!(normalize(&raw, counts(0, 0)).scaled_power_limit, None);
    }

    #[test_case(json!({ "Mode": "Off" }); "unknown object")]
    #[test_case(json!(7); "number")]
    #[test_case(json!({ "ScaledPowerLimit": null }); "null scaled value")]
    fn scaled_power_limit_unknown_for_unrecognized_shape(scaling: serde_json::Value) {
        let raw: RawSnapshot = serde_json::from_value(json!({
            "hashrate": 100.0,
            "wattage_limit": 3000.0,
            "tuner": { "DynamicPowerScaling": scaling },
        }))
        .unwrap();

        let state = normalize(&raw, counts(0, 0));
        assert_eq!(state.scaled_power_limit, None);
        assert_eq!(state.hashrate, Some(100.0));
        assert_eq!(state.wattage_limit, Some(3000.0));
    }

    #[test]
    fn should_keep_board_in_last_slot() {
        let raw = RawSnapshot {
            hashboards: vec![RawBoard {
                slot: 255,
                hashrate: Some(10.0),
                ..Default::default()
            }],
            fans: vec![RawFan {
                slot: 255,
                speed: Some(1200),
            }],
            ..Default::default()
        };

        let state = normalize(&raw, counts(3, 2));
        assert_eq!(state.boards.len(), 256);
        assert_eq!(state.boards[255].hashrate, Some(10.0));
        assert_eq!(state.fans.len(), 256);
        assert_eq!(state.fans[255].speed_rpm, Some(1200));
    }

    #[test]
    fn should_pass_mining_config_through_untouched() {
        let config = json!({ "mining_mode": { "mode": "low" }, "pools": [] });
        let raw = RawSnapshot {
            config: Some(crate::device::MiningModeConfig(config.clone())),
            ..Default::default()
        };

        let state = normalize(&raw, counts(0, 0));
        assert_eq!(state.mining_mode_config.unwrap().0, config);
    }
}
