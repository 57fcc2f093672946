//! Start payloads for each control activity

use serde::{Deserialize, Serialize};

use crate::types::ControlType;

/// Dataset settings for a recording run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDatasetConfig {
    pub dataset: String,
    pub num_episodes: u32,
    pub episode_time_s: u32,
    pub reset_time_s: u32,
    pub task: String,
}

/// Dataset settings for an evaluation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateDatasetConfig {
    pub dataset: String,
    pub num_episodes: u32,
    pub task: String,
    pub episode_time_s: u32,
    pub reset_time_s: u32,
}

/// Which recorded episode to play back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayDatasetConfig {
    pub dataset: String,
    pub episode_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeleopConfig {
    pub nickname: String,
    pub robot_port: String,
    pub teleop_port: String,
    /// Passed through to the host untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordConfig {
    pub nickname: String,
    pub robot_port: String,
    pub teleop_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_config: Option<serde_json::Value>,
    pub dataset: RecordDatasetConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub nickname: String,
    pub robot_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_config: Option<serde_json::Value>,
    pub dataset: ReplayDatasetConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub nickname: String,
    pub dataset: String,
    pub policy_type: String,
    pub model_name: String,
    pub batch_size: u32,
    pub steps: u32,
    #[serde(default)]
    pub distributed_training: bool,
    #[serde(default = "default_gpus")]
    pub num_gpus: u32,
}

fn default_gpus() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateConfig {
    pub nickname: String,
    pub robot_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_config: Option<serde_json::Value>,
    pub model_name: String,
    pub model_steps: u32,
    pub dataset: EvaluateDatasetConfig,
}

/// Start request for one activity; the variant selects the host command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "control_type", content = "config", rename_all = "snake_case")]
pub enum ActivityConfig {
    Teleop(TeleopConfig),
    Record(RecordConfig),
    Replay(ReplayConfig),
    Training(TrainingConfig),
    Evaluate(EvaluateConfig),
}

impl ActivityConfig {
    pub fn control_type(&self) -> ControlType {
        match self {
            ActivityConfig::Teleop(_) => ControlType::Teleop,
            ActivityConfig::Record(_) => ControlType::Record,
            ActivityConfig::Replay(_) => ControlType::Replay,
            ActivityConfig::Training(_) => ControlType::Training,
            ActivityConfig::Evaluate(_) => ControlType::Evaluate,
        }
    }

    pub fn nickname(&self) -> &str {
        match self {
            ActivityConfig::Teleop(c) => &c.nickname,
            ActivityConfig::Record(c) => &c.nickname,
            ActivityConfig::Replay(c) => &c.nickname,
            ActivityConfig::Training(c) => &c.nickname,
            ActivityConfig::Evaluate(c) => &c.nickname,
        }
    }

    /// The inner config as the JSON object the host's `start_<activity>` expects
    pub fn to_host_args(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            ActivityConfig::Teleop(c) => serde_json::to_value(c),
            ActivityConfig::Record(c) => serde_json::to_value(c),
            ActivityConfig::Replay(c) => serde_json::to_value(c),
            ActivityConfig::Training(c) => serde_json::to_value(c),
            ActivityConfig::Evaluate(c) => serde_json::to_value(c),
        }
    }

    /// Minimal teleop request, enough for hosts that resolve ports from
    /// their own stored robot config.
    pub fn teleop(nickname: impl Into<String>) -> Self {
        Self::minimal(ControlType::Teleop, nickname)
    }

    /// Request with only the nickname filled in. Ports, datasets and models
    /// are left empty for the host to resolve.
    pub fn minimal(control_type: ControlType, nickname: impl Into<String>) -> Self {
        let nickname = nickname.into();
        match control_type {
            ControlType::Teleop => ActivityConfig::Teleop(TeleopConfig {
                nickname,
                robot_port: String::new(),
                teleop_port: String::new(),
                camera_config: None,
            }),
            ControlType::Record => ActivityConfig::Record(RecordConfig {
                nickname,
                robot_port: String::new(),
                teleop_port: String::new(),
                camera_config: None,
                dataset: RecordDatasetConfig {
                    dataset: String::new(),
                    num_episodes: 1,
                    episode_time_s: 60,
                    reset_time_s: 10,
                    task: String::new(),
                },
            }),
            ControlType::Replay => ActivityConfig::Replay(ReplayConfig {
                nickname,
                robot_port: String::new(),
                camera_config: None,
                dataset: ReplayDatasetConfig {
                    dataset: String::new(),
                    episode_number: 0,
                },
            }),
            ControlType::Training => ActivityConfig::Training(TrainingConfig {
                nickname,
                dataset: String::new(),
                policy_type: String::new(),
                model_name: String::new(),
                batch_size: 8,
                steps: 1000,
                distributed_training: false,
                num_gpus: default_gpus(),
            }),
            ControlType::Evaluate => ActivityConfig::Evaluate(EvaluateConfig {
                nickname,
                robot_port: String::new(),
                camera_config: None,
                model_name: String::new(),
                model_steps: 0,
                dataset: EvaluateDatasetConfig {
                    dataset: String::new(),
                    num_episodes: 1,
                    task: String::new(),
                    episode_time_s: 60,
                    reset_time_s: 10,
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_config_is_tagged_by_control_type() {
        let config = ActivityConfig::teleop("arm-01");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["control_type"], "teleop");
        assert_eq!(json["config"]["nickname"], "arm-01");
        assert!(json["config"].get("camera_config").is_none());
    }

    #[test]
    fn host_args_are_the_inner_config() {
        let config = ActivityConfig::Replay(ReplayConfig {
            nickname: "arm-02".into(),
            robot_port: "/dev/ttyACM0".into(),
            camera_config: None,
            dataset: ReplayDatasetConfig {
                dataset: "user/pick-place".into(),
                episode_number: 3,
            },
        });
        let args = config.to_host_args().unwrap();
        assert_eq!(args["nickname"], "arm-02");
        assert_eq!(args["dataset"]["episode_number"], 3);
        assert_eq!(config.control_type(), ControlType::Replay);
    }

    #[test]
    fn minimal_config_matches_requested_activity() {
        for control_type in ControlType::ALL {
            let config = ActivityConfig::minimal(control_type, "arm-03");
            assert_eq!(config.control_type(), control_type);
            assert_eq!(config.nickname(), "arm-03");
        }
    }
}
