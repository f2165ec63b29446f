//! # Simulated Drive Peer
//!
//! An in-process drive that speaks the same RTU wire contract as the real
//! hardware, for development and tests without a drive attached.
//!
//! - Register bank seeded from a [`ModelProfile`] with plausible defaults
//! - Hardware-like answers: silence on bad CRC or foreign station, exception
//!   0x01/0x02/0x03 for unsupported function, unknown address or bad value
//! - Fault injection from a scripted queue or a seeded random draw
//! - Optional animation: accel/decel ramps timed by the drive's own ramp
//!   registers, V/f voltage, quadratic load current, slip, and trips on
//!   overcurrent or heatsink overtemperature
//!
//! [`SimulatedDrive::spawn`] runs the peer as a tokio task at the far end of
//! a [`tokio::io::duplex`] pipe and returns the near end as a transport.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::catalog::{fault_codes, names, ModelProfile, RegisterDescriptor, StatusWord};
use crate::codec::{self, Direction};
use crate::constants::{
    BROADCAST_STATION, DEFAULT_STATION, EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS,
    FC_WRITE_SINGLE_REGISTER, MAX_READ_REGISTERS, MAX_RTU_FRAME_SIZE,
};
use crate::error::{DriveError, FrameError};
use crate::pdu::PduBuilder;
use crate::protocol::{is_unicast_station, ExceptionCode, StationAddress};
use crate::transport::StreamTransport;

/// Motor slip at rated load
const RATED_SLIP: f64 = 0.02;

/// Heatsink temperature at standstill (°C)
const AMBIENT_TEMPERATURE_C: f64 = 25.0;

/// Heatsink temperature rise at full load (°C)
const FULL_LOAD_TEMPERATURE_RISE_C: f64 = 20.0;

/// Heatsink temperature that trips the drive (°C)
const OVERHEAT_TEMPERATURE_C: f64 = 80.0;

/// Output current above this multiple of motor rated current trips the drive
const OVERCURRENT_FACTOR: f64 = 1.1;

/// DC bus voltage of a three-phase rectifier relative to line voltage
const DC_BUS_RATIO: f64 = 1.35;

/// Highest V/f base frequency
const MAX_BASE_FREQUENCY_HZ: f64 = 50.0;

/// Default accel/decel ramp (s)
const DEFAULT_RAMP_TIME_S: f64 = 10.0;

/// Output frequency within this band of the target counts as at speed
const AT_SPEED_BAND_HZ: f64 = 0.05;

const PIPE_CAPACITY: usize = 4096;

// ============================================================================
// Configuration
// ============================================================================

/// Simulated drive behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Station address the drive answers to
    pub station: StationAddress,
    /// Seed of the fault-injection and noise generator
    pub seed: u64,
    /// Probability that a request gets no answer
    pub drop_probability: f64,
    /// Probability that an answer has its CRC corrupted
    pub corrupt_probability: f64,
    /// Probability that a request is answered with `exception_code`
    pub exception_probability: f64,
    /// Exception returned by random exception injection
    pub exception_code: u8,
    /// Ramp the output on every read
    pub animate: bool,
    /// Simulated seconds per wall-clock second while animating
    pub time_scale: f64,
    /// Heatsink temperature at standstill (°C)
    pub ambient_temperature_c: f64,
    /// Delay before each answer (milliseconds)
    pub response_delay_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            station: DEFAULT_STATION,
            seed: 0x5EED,
            drop_probability: 0.0,
            corrupt_probability: 0.0,
            exception_probability: 0.0,
            exception_code: ExceptionCode::SERVER_DEVICE_BUSY.code(),
            animate: false,
            time_scale: 1.0,
            ambient_temperature_c: AMBIENT_TEMPERATURE_C,
            response_delay_ms: 0,
        }
    }
}

impl SimulatorConfig {
    pub fn with_station(mut self, station: StationAddress) -> Self {
        self.station = station;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_drop_probability(mut self, probability: f64) -> Self {
        self.drop_probability = probability;
        self
    }

    pub fn with_corrupt_probability(mut self, probability: f64) -> Self {
        self.corrupt_probability = probability;
        self
    }

    pub fn with_exception_probability(mut self, probability: f64, code: ExceptionCode) -> Self {
        self.exception_probability = probability;
        self.exception_code = code.code();
        self
    }

    /// Animate on every read, running simulated time `time_scale` times
    /// faster than the wall clock
    pub fn with_animation(mut self, time_scale: f64) -> Self {
        self.animate = true;
        self.time_scale = time_scale;
        self
    }

    pub fn with_ambient_temperature(mut self, celsius: f64) -> Self {
        self.ambient_temperature_c = celsius;
        self
    }

    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<(), DriveError> {
        if !is_unicast_station(self.station) {
            return Err(DriveError::configuration(format!(
                "simulator station {} outside 1..=247",
                self.station
            )));
        }
        for (name, p) in [
            ("drop_probability", self.drop_probability),
            ("corrupt_probability", self.corrupt_probability),
            ("exception_probability", self.exception_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(DriveError::configuration(format!(
                    "{} {} outside 0..=1",
                    name, p
                )));
            }
        }
        if self.drop_probability + self.corrupt_probability + self.exception_probability > 1.0 {
            return Err(DriveError::configuration(
                "injection probabilities add up to more than 1",
            ));
        }
        if !(self.time_scale.is_finite() && self.time_scale > 0.0) {
            return Err(DriveError::configuration("time_scale must be positive"));
        }
        if !self.ambient_temperature_c.is_finite() {
            return Err(DriveError::configuration("ambient_temperature_c must be finite"));
        }
        Ok(())
    }
}

/// One scripted misbehaviour, applied to the next request addressed to the drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// The request is lost
    Silence,
    /// The answer goes out with a broken CRC
    CorruptCrc,
    /// The request is answered with this exception
    Exception(ExceptionCode),
}

/// Simulator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimulatorStats {
    /// Valid frames addressed to this drive (broadcast included)
    pub requests: u64,
    /// Answers sent
    pub responses: u64,
    /// Requests left unanswered by injection
    pub dropped: u64,
    /// Answers sent with a corrupted CRC
    pub corrupted: u64,
    /// Exception answers sent
    pub exceptions: u64,
    /// Frames ignored for bad CRC, truncation or foreign station
    pub ignored: u64,
}

// ============================================================================
// Simulated drive
// ============================================================================

/// Register bank and behaviour of one simulated drive
pub struct SimulatedDrive {
    profile: Arc<ModelProfile>,
    config: SimulatorConfig,
    bank: BTreeMap<u16, u16>,
    rng: StdRng,
    script: VecDeque<InjectedFault>,
    silent: bool,
    running: bool,
    reverse: bool,
    output_hz: f64,
    last_animated: Instant,
    stats: SimulatorStats,
}

impl SimulatedDrive {
    /// Create a drive with a register bank seeded from `profile`
    pub fn new(profile: Arc<ModelProfile>, config: SimulatorConfig) -> Self {
        let ratings = *profile.ratings();
        let mut bank: BTreeMap<u16, u16> = profile
            .registers()
            .iter()
            .map(|d| (d.address, d.clamp_to_raw(0.0)))
            .collect();

        let defaults = [
            (names::DC_BUS_VOLTAGE, ratings.rated_voltage_v * DC_BUS_RATIO),
            (names::DRIVE_TEMPERATURE, config.ambient_temperature_c),
            (names::ACCEL_TIME, DEFAULT_RAMP_TIME_S),
            (names::DECEL_TIME, DEFAULT_RAMP_TIME_S),
            (names::MOTOR_RATED_CURRENT, ratings.rated_current_a),
            (names::MAX_FREQUENCY, ratings.max_frequency_hz),
            (names::MOTOR_RATED_VOLTAGE, ratings.rated_voltage_v),
        ];
        for (name, value) in defaults {
            if let Ok(descriptor) = profile.find(name) {
                bank.insert(descriptor.address, descriptor.clamp_to_raw(value));
            }
        }

        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            profile,
            config,
            bank,
            rng,
            script: VecDeque::new(),
            silent: false,
            running: false,
            reverse: false,
            output_hz: 0.0,
            last_animated: Instant::now(),
            stats: SimulatorStats::default(),
        }
    }

    pub fn profile(&self) -> &Arc<ModelProfile> {
        &self.profile
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn stats(&self) -> SimulatorStats {
        self.stats
    }

    /// Raw value of a register
    pub fn register(&self, address: u16) -> Option<u16> {
        self.bank.get(&address).copied()
    }

    /// Overwrite a register without any side effect.
    ///
    /// Returns `false` if the address is not in the bank.
    pub fn set_register(&mut self, address: u16, raw: u16) -> bool {
        match self.bank.get_mut(&address) {
            Some(slot) => {
                *slot = raw;
                if self.address_of(names::OUTPUT_FREQUENCY) == Some(address) {
                    self.output_hz = self.value(names::OUTPUT_FREQUENCY).unwrap_or(0.0);
                }
                true
            }
            None => false,
        }
    }

    /// Engineering value of a named parameter
    pub fn parameter(&self, name: &str) -> Option<f64> {
        let descriptor = self.profile.find(name).ok()?;
        self.register(descriptor.address)
            .map(|raw| descriptor.to_engineering(raw))
    }

    /// Queue a misbehaviour for the next request
    pub fn inject(&mut self, fault: InjectedFault) {
        self.script.push_back(fault);
    }

    /// Drop every answer while set
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Latch a drive trip: fault register set and motor stopped
    pub fn trip(&mut self, fault_code: u16) {
        info!(
            "simulated {} tripped: {}",
            self.profile.name(),
            crate::catalog::fault_description(fault_code)
        );
        self.set_named(names::FAULT_CODE, fault_code);
        self.set_named(names::RUN_COMMAND, 0);
        self.running = false;
        self.refresh_status();
    }

    pub fn is_tripped(&self) -> bool {
        self.named(names::FAULT_CODE)
            .is_some_and(|code| code != fault_codes::NONE)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Answer one raw request frame the way the drive would.
    ///
    /// Returns `None` when the drive stays silent.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Option<Bytes> {
        let decoded = match codec::decode(frame) {
            Ok(decoded) => decoded,
            // CRC passed, so the header is trustworthy
            Err(FrameError::UnknownFunction { code }) => {
                let station = frame[0];
                if station != self.config.station {
                    self.stats.ignored += 1;
                    return None;
                }
                self.stats.requests += 1;
                return self.respond(self.exception(code, ExceptionCode::ILLEGAL_FUNCTION));
            }
            Err(e) => {
                debug!("simulator ignoring frame: {}", e);
                self.stats.ignored += 1;
                return None;
            }
        };

        let broadcast = decoded.station == BROADCAST_STATION;
        if (decoded.station != self.config.station && !broadcast) || decoded.exception {
            self.stats.ignored += 1;
            return None;
        }
        self.stats.requests += 1;

        let fault = self.next_fault();
        match fault {
            Some(InjectedFault::Silence) => {
                debug!("simulator dropping request");
                self.stats.dropped += 1;
                return None;
            }
            Some(InjectedFault::Exception(code)) if !broadcast => {
                return self.respond(self.exception(decoded.function_byte(), code));
            }
            _ => {}
        }

        let payload = decoded.payload.as_ref();
        let function = decoded.function.to_u8();
        let reply = if payload.len() != 4 {
            self.exception(function, ExceptionCode::ILLEGAL_DATA_VALUE)
        } else {
            let address = u16::from_be_bytes([payload[0], payload[1]]);
            let operand = u16::from_be_bytes([payload[2], payload[3]]);
            match function {
                FC_READ_HOLDING_REGISTERS if !broadcast => self.read(address, operand),
                FC_WRITE_SINGLE_REGISTER => self.write(address, operand, payload),
                _ => return None,
            }
        };

        if broadcast {
            return None;
        }

        match fault {
            Some(InjectedFault::CorruptCrc) => {
                let mut bytes = BytesMut::from(reply.as_ref());
                let last = bytes.len() - 1;
                bytes[last] ^= 0xFF;
                self.stats.corrupted += 1;
                self.respond(bytes.freeze())
            }
            _ => self.respond(reply),
        }
    }

    fn respond(&mut self, reply: Bytes) -> Option<Bytes> {
        if reply.get(1).is_some_and(|fc| fc & EXCEPTION_FLAG != 0) {
            self.stats.exceptions += 1;
        }
        self.stats.responses += 1;
        Some(reply)
    }

    fn exception(&self, function: u8, code: ExceptionCode) -> Bytes {
        codec::encode(self.config.station, function | EXCEPTION_FLAG, &[code.code()])
    }

    /// Scripted faults first, then the silent flag, then the random draw
    fn next_fault(&mut self) -> Option<InjectedFault> {
        if let Some(fault) = self.script.pop_front() {
            return Some(fault);
        }
        if self.silent {
            return Some(InjectedFault::Silence);
        }

        let config = &self.config;
        let total =
            config.drop_probability + config.corrupt_probability + config.exception_probability;
        if total <= 0.0 {
            return None;
        }
        let draw: f64 = self.rng.gen();
        if draw < config.drop_probability {
            Some(InjectedFault::Silence)
        } else if draw < config.drop_probability + config.corrupt_probability {
            Some(InjectedFault::CorruptCrc)
        } else if draw < total {
            Some(InjectedFault::Exception(ExceptionCode(config.exception_code)))
        } else {
            None
        }
    }

    fn read(&mut self, address: u16, quantity: u16) -> Bytes {
        let fc = FC_READ_HOLDING_REGISTERS;
        if quantity == 0 || quantity as usize > MAX_READ_REGISTERS {
            return self.exception(fc, ExceptionCode::ILLEGAL_DATA_VALUE);
        }
        if self.config.animate {
            self.animate();
        }

        let mut values = Vec::with_capacity(quantity as usize);
        for offset in 0..quantity {
            let value = address
                .checked_add(offset)
                .and_then(|addr| self.bank.get(&addr).copied());
            match value {
                Some(value) => values.push(value),
                None => return self.exception(fc, ExceptionCode::ILLEGAL_DATA_ADDRESS),
            }
        }

        match PduBuilder::read_response(&values)
            .and_then(|pdu| codec::encode_pdu(self.config.station, &pdu))
        {
            Ok(reply) => reply,
            Err(_) => self.exception(fc, ExceptionCode::SERVER_DEVICE_FAILURE),
        }
    }

    fn write(&mut self, address: u16, value: u16, payload: &[u8]) -> Bytes {
        let fc = FC_WRITE_SINGLE_REGISTER;
        let Ok(descriptor) = self.profile.lookup(address) else {
            return self.exception(fc, ExceptionCode::ILLEGAL_DATA_ADDRESS);
        };
        if !descriptor.is_writable() || !accepts(descriptor, value) {
            return self.exception(fc, ExceptionCode::ILLEGAL_DATA_VALUE);
        }
        let name = descriptor.name.clone();

        self.bank.insert(address, value);
        self.apply_side_effects(&name, value);
        codec::encode(self.config.station, fc, payload)
    }

    fn apply_side_effects(&mut self, name: &str, value: u16) {
        match name {
            names::RUN_COMMAND => {
                if value != 0 && self.is_tripped() {
                    debug!("simulator ignoring run command while tripped");
                    self.set_named(names::RUN_COMMAND, 0);
                } else {
                    self.running = value != 0;
                }
            }
            names::DIRECTION => self.reverse = value != 0,
            names::FAULT_RESET => {
                if value != 0 {
                    self.set_named(names::FAULT_CODE, fault_codes::NONE);
                    self.set_named(names::FAULT_RESET, 0);
                }
            }
            _ => {}
        }
        self.refresh_status();
    }

    /// Advance the drive by the wall-clock time since the last animation,
    /// scaled by `time_scale`
    pub fn animate(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_animated);
        self.last_animated = now;
        let scaled = elapsed.as_secs_f64() * self.config.time_scale;
        self.advance(Duration::try_from_secs_f64(scaled).unwrap_or_default());
    }

    /// Advance the drive by `elapsed` of simulated time.
    ///
    /// The output ramps toward the setpoint (or toward 0 when stopped or
    /// tripped) at max frequency / accel or decel time, the same rate a real
    /// drive derives from its ramp registers. Electrical values follow the
    /// new output frequency, then the alarm limits are checked.
    pub fn advance(&mut self, elapsed: Duration) {
        let ratings = *self.profile.ratings();
        let target = if self.running && !self.is_tripped() {
            self.value(names::FREQUENCY_SETPOINT).unwrap_or(0.0)
        } else {
            0.0
        };

        let max_hz = self
            .value(names::MAX_FREQUENCY)
            .filter(|hz| *hz > 0.0)
            .unwrap_or(ratings.max_frequency_hz);
        let ramp = if self.output_hz < target {
            names::ACCEL_TIME
        } else {
            names::DECEL_TIME
        };
        let ramp_s = self
            .value(ramp)
            .filter(|s| *s > 0.0)
            .unwrap_or(DEFAULT_RAMP_TIME_S);
        let step = max_hz / ramp_s * elapsed.as_secs_f64();

        self.output_hz = if self.output_hz < target {
            (self.output_hz + step).min(target)
        } else {
            (self.output_hz - step).max(target)
        };

        let f = self.output_hz;
        let base_hz = ratings.max_frequency_hz.min(MAX_BASE_FREQUENCY_HZ);
        let voltage = if f > 0.0 {
            (ratings.rated_voltage_v * f / base_hz).min(ratings.rated_voltage_v)
        } else {
            0.0
        };
        let load = (f / ratings.max_frequency_hz).powi(2);
        let jitter = 0.9 + 0.2 * self.rng.gen::<f64>();
        let current = load * ratings.rated_current_a * jitter;
        let speed = 60.0 * f * (1.0 - RATED_SLIP * load);
        let temperature = self.config.ambient_temperature_c + FULL_LOAD_TEMPERATURE_RISE_C * load;

        self.set_value(names::OUTPUT_FREQUENCY, f);
        self.set_value(names::OUTPUT_VOLTAGE, voltage);
        self.set_value(names::OUTPUT_CURRENT, current);
        self.set_value(names::MOTOR_SPEED, speed);
        self.set_value(names::DRIVE_TEMPERATURE, temperature);
        self.refresh_status();

        self.check_alarms(current, temperature);
    }

    /// Trip on overcurrent against the motor rated current register, or on
    /// heatsink overtemperature. A latched fault stays until reset.
    fn check_alarms(&mut self, current: f64, temperature: f64) {
        if self.is_tripped() {
            return;
        }
        let rated_current = self
            .value(names::MOTOR_RATED_CURRENT)
            .filter(|a| *a > 0.0)
            .unwrap_or(self.profile.ratings().rated_current_a);

        if current > rated_current * OVERCURRENT_FACTOR {
            self.trip(fault_codes::OVERCURRENT);
        } else if temperature > OVERHEAT_TEMPERATURE_C {
            self.trip(fault_codes::INVERTER_OVERHEAT);
        }
    }

    fn refresh_status(&mut self) {
        let setpoint = self.value(names::FREQUENCY_SETPOINT).unwrap_or(0.0);
        let mut status = 0;
        if self.running {
            status |= StatusWord::RUNNING;
            if setpoint > 0.0 && (self.output_hz - setpoint).abs() < AT_SPEED_BAND_HZ {
                status |= StatusWord::AT_SPEED;
            }
        }
        if self.is_tripped() {
            status |= StatusWord::FAULT;
        }
        if self.reverse {
            status |= StatusWord::REVERSE;
        }
        self.set_named(names::STATUS_WORD, status);
    }

    fn address_of(&self, name: &str) -> Option<u16> {
        self.profile.find(name).ok().map(|d| d.address)
    }

    fn named(&self, name: &str) -> Option<u16> {
        self.address_of(name).and_then(|address| self.register(address))
    }

    fn set_named(&mut self, name: &str, raw: u16) {
        if let Some(address) = self.address_of(name) {
            self.bank.insert(address, raw);
        }
    }

    fn value(&self, name: &str) -> Option<f64> {
        self.parameter(name)
    }

    fn set_value(&mut self, name: &str, value: f64) {
        if let Ok(descriptor) = self.profile.find(name) {
            let raw = descriptor.clamp_to_raw(value);
            self.bank.insert(descriptor.address, raw);
        }
    }

    /// Run the drive on a background task behind an in-process pipe.
    ///
    /// The task ends when the returned transport is closed or dropped.
    pub fn spawn(self) -> (StreamTransport<DuplexStream>, SimulatorHandle) {
        let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
        let name = format!("sim:{}@{}", self.profile.name(), self.config.station);
        let delay = Duration::from_millis(self.config.response_delay_ms);
        let drive = Arc::new(Mutex::new(self));

        tokio::spawn(serve(drive.clone(), far, delay));

        (StreamTransport::new(near, name), SimulatorHandle { drive })
    }
}

fn accepts(descriptor: &RegisterDescriptor, raw: u16) -> bool {
    let (min, max) = descriptor.raw_bounds();
    let value = descriptor.width.interpret(raw);
    (min..=max).contains(&value)
}

async fn serve(drive: Arc<Mutex<SimulatedDrive>>, mut stream: DuplexStream, delay: Duration) {
    let mut buf = BytesMut::with_capacity(MAX_RTU_FRAME_SIZE);
    loop {
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        while let Some(len) = codec::expected_frame_len(Direction::Request, &buf) {
            if buf.len() < len {
                break;
            }
            let frame = buf.split_to(len);
            let reply = drive.lock().handle_frame(&frame);
            let Some(reply) = reply else {
                continue;
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if stream.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
    debug!("simulated drive link closed");
}

/// Shared access to a running simulated drive
#[derive(Clone)]
pub struct SimulatorHandle {
    drive: Arc<Mutex<SimulatedDrive>>,
}

impl SimulatorHandle {
    pub fn inject(&self, fault: InjectedFault) {
        self.drive.lock().inject(fault);
    }

    pub fn set_silent(&self, silent: bool) {
        self.drive.lock().set_silent(silent);
    }

    pub fn trip(&self, fault_code: u16) {
        self.drive.lock().trip(fault_code);
    }

    pub fn register(&self, address: u16) -> Option<u16> {
        self.drive.lock().register(address)
    }

    pub fn set_register(&self, address: u16, raw: u16) -> bool {
        self.drive.lock().set_register(address, raw)
    }

    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.drive.lock().parameter(name)
    }

    pub fn is_running(&self) -> bool {
        self.drive.lock().is_running()
    }

    pub fn is_tripped(&self) -> bool {
        self.drive.lock().is_tripped()
    }

    pub fn stats(&self) -> SimulatorStats {
        self.drive.lock().stats()
    }

    /// Run `f` with exclusive access to the drive
    pub fn with_drive<R>(&self, f: impl FnOnce(&mut SimulatedDrive) -> R) -> R {
        f(&mut self.drive.lock())
    }
}

impl std::fmt::Debug for SimulatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let drive = self.drive.lock();
        f.debug_struct("SimulatorHandle")
            .field("profile", &drive.profile.name())
            .field("station", &drive.config.station)
            .field("stats", &drive.stats)
            .finish()
    }
}
