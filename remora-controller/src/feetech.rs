//! Feetech STS3215 bus servo driver.
//!
//! Speaks the Feetech SCS/STS instruction protocol (Dynamixel v1 style
//! framing, little-endian registers) over a serial port. The port is
//! owned by a dedicated bus thread so the physical channel has exactly
//! one reader/writer; async callers talk to the thread through a
//! request channel.

use crate::arm_config::ArmConfig;
use crate::arm_driver::{ArmDriver, DriverError, JointPositions, Result, JOINT_COUNT};
use async_trait::async_trait;
use serialport::SerialPort;
use std::io;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// STS3215 default baud rate.
pub const BAUD_RATE: u32 = 1_000_000;

const HEADER: [u8; 2] = [0xFF, 0xFF];
const BROADCAST_ID: u8 = 0xFE;

const INSTRUCTION_READ: u8 = 0x02;
const INSTRUCTION_SYNC_WRITE: u8 = 0x83;

/// Goal_Position register, 2 bytes.
const GOAL_POSITION: u8 = 0x2A;
/// Present_Position register, 2 bytes.
const PRESENT_POSITION: u8 = 0x38;

/// 4096 ticks per revolution, mechanical center at 2048.
const TICKS_PER_DEGREE: f32 = 4096.0 / 360.0;
const CENTER_TICKS: f32 = 2048.0;

fn degrees_to_ticks(degrees: f32) -> u16 {
    (degrees * TICKS_PER_DEGREE + CENTER_TICKS).round().clamp(0.0, 4095.0) as u16
}

fn ticks_to_degrees(ticks: u16) -> f32 {
    (ticks as f32 - CENTER_TICKS) / TICKS_PER_DEGREE
}

fn checksum(id: u8, length: u8, payload: &[u8]) -> u8 {
    let sum = payload
        .iter()
        .fold(id as u32 + length as u32, |acc, byte| acc + *byte as u32);
    !(sum as u8)
}

/// `[0xFF, 0xFF, id, length, instruction, params..., checksum]`
fn instruction_packet(id: u8, instruction: u8, params: &[u8]) -> Vec<u8> {
    let length = params.len() as u8 + 2;
    let mut packet = Vec::with_capacity(params.len() + 6);
    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push(length);
    packet.push(instruction);
    packet.extend_from_slice(params);
    let mut payload = vec![instruction];
    payload.extend_from_slice(params);
    packet.push(checksum(id, length, &payload));
    packet
}

fn sync_write_positions(ids: &[u8; JOINT_COUNT], positions: &JointPositions) -> Vec<u8> {
    let mut params = vec![GOAL_POSITION, 2];
    for (id, degrees) in ids.iter().zip(positions.to_array()) {
        let ticks = degrees_to_ticks(degrees);
        params.push(*id);
        params.extend_from_slice(&ticks.to_le_bytes());
    }
    instruction_packet(BROADCAST_ID, INSTRUCTION_SYNC_WRITE, &params)
}

fn map_io_error(error: io::Error) -> DriverError {
    if error.kind() == io::ErrorKind::TimedOut {
        DriverError::Timeout
    } else {
        DriverError::IoError(error)
    }
}

fn read_register_u16(port: &mut dyn SerialPort, id: u8, address: u8) -> Result<u16> {
    let request = instruction_packet(id, INSTRUCTION_READ, &[address, 2]);
    port.write_all(&request).map_err(map_io_error)?;

    // status frame: [0xFF, 0xFF, id, length, error, lo, hi, checksum]
    let mut head = [0u8; 4];
    port.read_exact(&mut head).map_err(map_io_error)?;
    if head[0..2] != HEADER || head[2] != id {
        return Err(DriverError::ProtocolError(format!(
            "unexpected status header {:02x?} from servo {}",
            head, id
        )));
    }
    let length = head[3] as usize;
    if length != 4 {
        return Err(DriverError::ProtocolError(format!(
            "unexpected status length {} from servo {}",
            length, id
        )));
    }
    let mut body = [0u8; 4];
    port.read_exact(&mut body).map_err(map_io_error)?;
    let expected = checksum(id, head[3], &body[..3]);
    if body[3] != expected {
        return Err(DriverError::ProtocolError(format!(
            "bad checksum from servo {}",
            id
        )));
    }
    if body[0] != 0 {
        return Err(DriverError::ProtocolError(format!(
            "servo {} reported error flags {:#04x}",
            id, body[0]
        )));
    }
    Ok(u16::from_le_bytes([body[1], body[2]]))
}

fn read_positions(port: &mut dyn SerialPort, config: &ArmConfig) -> Result<JointPositions> {
    let mut values = [0.0f32; JOINT_COUNT];
    for (value, id) in values.iter_mut().zip(config.get_ids()) {
        *value = ticks_to_degrees(read_register_u16(port, id, PRESENT_POSITION)?);
    }
    Ok(JointPositions::from_array(values))
}

fn write_goal(port: &mut dyn SerialPort, config: &ArmConfig, goal: &JointPositions) -> Result<()> {
    let packet = sync_write_positions(&config.get_ids(), goal);
    port.write_all(&packet).map_err(map_io_error)?;
    port.flush().map_err(map_io_error)?;
    Ok(())
}

enum BusRequest {
    ReadPositions(oneshot::Sender<Result<JointPositions>>),
    WriteGoal(JointPositions, oneshot::Sender<Result<()>>),
}

/// Arm driver backed by an STS3215 servo chain on a serial port.
pub struct FeetechArmDriver {
    requests: mpsc::Sender<BusRequest>,
}

impl FeetechArmDriver {
    /// Open `port_name` and start the bus worker thread.
    pub fn open(port_name: &str, config: ArmConfig) -> Result<Box<Self>> {
        let port = serialport::new(port_name, BAUD_RATE)
            .timeout(Duration::from_millis(config.bus_timeout_ms))
            .open()?;
        let (requests, queue) = mpsc::channel(1);
        std::thread::Builder::new()
            .name("remora-bus".to_owned())
            .spawn(move || bus_worker(port, config, queue))?;
        Ok(Box::new(FeetechArmDriver { requests }))
    }

    async fn submit<T>(
        &self,
        request: BusRequest,
        reply: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.requests
            .send(request)
            .await
            .map_err(|_| DriverError::BusClosed)?;
        reply.await.map_err(|_| DriverError::BusClosed)?
    }
}

fn bus_worker(
    mut port: Box<dyn SerialPort>,
    config: ArmConfig,
    mut queue: mpsc::Receiver<BusRequest>,
) {
    while let Some(request) = queue.blocking_recv() {
        match request {
            BusRequest::ReadPositions(reply) => {
                let _ = reply.send(read_positions(port.as_mut(), &config));
            }
            BusRequest::WriteGoal(goal, reply) => {
                let _ = reply.send(write_goal(port.as_mut(), &config, &goal));
            }
        }
    }
    tracing::debug!("motor bus worker shutting down");
}

#[async_trait]
impl ArmDriver for FeetechArmDriver {
    async fn read_position(&mut self) -> Result<JointPositions> {
        let (reply, receiver) = oneshot::channel();
        self.submit(BusRequest::ReadPositions(reply), receiver).await
    }

    async fn move_to(&mut self, position: &JointPositions) -> Result<()> {
        let (reply, receiver) = oneshot::channel();
        self.submit(BusRequest::WriteGoal(*position, reply), receiver)
            .await
    }
}
