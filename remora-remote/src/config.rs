use serde::{Deserialize, Serialize};
use std::{fs, time::Duration};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Control loop rate.
    pub tick_rate_hz: u32,
    /// Floor between two status broadcasts, independent of the tick rate.
    pub status_interval_ms: u64,
    /// Sessions with no inbound traffic for this long are force-closed.
    pub session_timeout_s: u64,
    pub robot_type: String,
    /// Identifier of the hardware channel, e.g. the serial port path.
    pub channel: String,
    pub capabilities: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            host: "0.0.0.0".to_owned(),
            port: 8765,
            tick_rate_hz: 25,
            status_interval_ms: 100,
            session_timeout_s: 30,
            robot_type: "so-100".to_owned(),
            channel: "/dev/ttyUSB0".to_owned(),
            capabilities: vec![
                "move".to_owned(),
                "move_to_position".to_owned(),
                "gripper".to_owned(),
                "emergency_stop".to_owned(),
                "resume".to_owned(),
                "status".to_owned(),
                "config".to_owned(),
            ],
        }
    }
}

impl ServerConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_s)
    }

    pub fn parse_json(text: &str) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let config: ServerConfig = serde_json::from_str(text)?;
        Ok(config)
    }

    pub fn parse_yaml(text: &str) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let config: ServerConfig = serde_yaml::from_str(text)?;
        Ok(config)
    }

    pub fn load_json(path: &str) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let text = fs::read_to_string(path)?;
        let config = ServerConfig::parse_json(&text)?;
        Ok(config)
    }

    pub fn load_yaml(path: &str) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let text = fs::read_to_string(path)?;
        let config = ServerConfig::parse_yaml(&text)?;
        Ok(config)
    }
}
