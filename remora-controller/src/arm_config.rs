use crate::arm_driver::{Joint, JointPositions, JOINT_COUNT};
use serde::{Deserialize, Serialize};
use std::{fs, include_bytes, str};

/// Bus id and admissible position range of one joint.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct JointConfig {
    pub id: u8,
    pub min: f32,
    pub max: f32,
}

impl JointConfig {
    pub fn new(id: u8, min: f32, max: f32) -> JointConfig {
        JointConfig { id, min, max }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArmConfig {
    pub shoulder_pan: JointConfig,
    pub shoulder_lift: JointConfig,
    pub elbow_flex: JointConfig,
    pub wrist_flex: JointConfig,
    pub wrist_roll: JointConfig,
    pub gripper: JointConfig,
    /// Degrees one `move` command shifts its axis per tick.
    pub move_step: f32,
    pub gripper_open_position: f32,
    pub gripper_closed_position: f32,
    /// Upper bound on a single motor bus operation in milliseconds.
    pub bus_timeout_ms: u64,
}

impl ArmConfig {
    /// Arm configuration with default values
    pub fn default() -> ArmConfig {
        ArmConfig {
            shoulder_pan: JointConfig::new(1, -180.0, 180.0),
            shoulder_lift: JointConfig::new(2, -180.0, 180.0),
            elbow_flex: JointConfig::new(3, -180.0, 180.0),
            wrist_flex: JointConfig::new(4, -180.0, 180.0),
            wrist_roll: JointConfig::new(5, -180.0, 180.0),
            gripper: JointConfig::new(6, 0.0, 100.0),
            move_step: 0.5,
            gripper_open_position: 45.0,
            gripper_closed_position: 0.0,
            bus_timeout_ms: 250,
        }
    }

    pub fn joint(&self, joint: Joint) -> &JointConfig {
        match joint {
            Joint::ShoulderPan => &self.shoulder_pan,
            Joint::ShoulderLift => &self.shoulder_lift,
            Joint::ElbowFlex => &self.elbow_flex,
            Joint::WristFlex => &self.wrist_flex,
            Joint::WristRoll => &self.wrist_roll,
            Joint::Gripper => &self.gripper,
        }
    }

    pub fn get_ids(&self) -> [u8; JOINT_COUNT] {
        [
            self.shoulder_pan.id,
            self.shoulder_lift.id,
            self.elbow_flex.id,
            self.wrist_flex.id,
            self.wrist_roll.id,
            self.gripper.id,
        ]
    }

    /// True when every joint of `positions` lies inside its range.
    pub fn in_range(&self, positions: &JointPositions) -> bool {
        Joint::ALL.iter().all(|joint| {
            let range = self.joint(*joint);
            let value = positions.get(*joint);
            value >= range.min && value <= range.max
        })
    }

    /// Remora comes with an included config file.
    ///
    /// This file is packaged with the binary
    /// This method retrieves this included version
    pub fn included() -> ArmConfig {
        let json = str::from_utf8(include_bytes!("../config/remora.json")).unwrap();
        ArmConfig::parse_json(json).unwrap()
    }

    pub fn parse_json(text: &str) -> Result<ArmConfig, Box<dyn std::error::Error>> {
        let config: ArmConfig = serde_json::from_str(text)?;
        Ok(config)
    }

    pub fn parse_yaml(text: &str) -> Result<ArmConfig, Box<dyn std::error::Error>> {
        let config: ArmConfig = serde_yaml::from_str(text)?;
        Ok(config)
    }

    pub fn serialize_to_json(&self) -> Result<String, Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        Ok(json)
    }

    pub fn serialize_to_yaml(&self) -> Result<String, Box<dyn std::error::Error>> {
        let yaml = serde_yaml::to_string(self)?;
        Ok(yaml)
    }

    pub fn save_json(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        fs::write(path, self.serialize_to_json()?)?;
        Ok(())
    }

    pub fn save_yaml(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        fs::write(path, self.serialize_to_yaml()?)?;
        Ok(())
    }

    pub fn load_json(path: &str) -> Result<ArmConfig, Box<dyn std::error::Error>> {
        let text = fs::read_to_string(path)?;
        let config = ArmConfig::parse_json(&text)?;
        Ok(config)
    }

    pub fn load_yaml(path: &str) -> Result<ArmConfig, Box<dyn std::error::Error>> {
        let text = fs::read_to_string(path)?;
        let config = ArmConfig::parse_yaml(&text)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_from_json() {
        let json = ArmConfig::default().serialize_to_json().unwrap();
        let config = ArmConfig::parse_json(&json).unwrap();
        assert_eq!(config, ArmConfig::default());
    }

    #[test]
    fn serialize_to_yaml_round_trip() {
        let config = ArmConfig::default();
        let yaml = config.serialize_to_yaml().unwrap();
        let parsed_config = ArmConfig::parse_yaml(&yaml).unwrap();
        assert_eq!(config, parsed_config);
    }

    #[test]
    fn check_included() {
        let config = ArmConfig::included();
        assert_eq!(config.get_ids(), [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn in_range_checks_every_joint() {
        let config = ArmConfig::default();
        assert!(config.in_range(&JointPositions::new(0.0, 0.0, 0.0, 0.0, 0.0, 50.0)));
        assert!(!config.in_range(&JointPositions::new(200.0, 0.0, 0.0, 0.0, 0.0, 50.0)));
        assert!(!config.in_range(&JointPositions::new(0.0, 0.0, 0.0, 0.0, 0.0, -1.0)));
    }
}
