//! # Register Catalog
//!
//! Per-model register maps for the drive families. A [`ModelProfile`] is a
//! validated, immutable table of [`RegisterDescriptor`]s loaded from JSON at
//! start-up; profiles are shared as `Arc<ModelProfile>` so any number of
//! sessions read them without locking.
//!
//! ## Scaling
//!
//! | Scaling | Read | Write |
//! |---------|------|-------|
//! | `Divide(n)` | `raw / n` | `round(value * n)` |
//! | `Multiply(n)` | `raw * n` | `round(value / n)` |
//!
//! ## Profile JSON
//!
//! ```json
//! { "profiles": [ {
//!     "name": "CDE400",
//!     "ratings": { "max_frequency_hz": 400.0, "rated_current_a": 8.0,
//!                  "rated_power_kw": 0.4, "rated_voltage_v": 400.0 },
//!     "registers": [
//!       { "address": "0x0001", "name": "output_frequency", "scaling": { "divide": 10 },
//!         "unit": "Hz", "access": "read_only", "poll": true }
//!     ] } ] }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::device_limits::DeviceLimits;
use crate::error::CatalogError;
use crate::protocol::Request;

/// Built-in profile table for the CDE drive series
const BUILTIN_PROFILES: &str = include_str!("../profiles/cde_series.json");

/// Largest accepted scale factor
pub const MAX_SCALE_FACTOR: u32 = 10_000;

/// Register names the session helpers and the simulated drive rely on
pub mod names {
    pub const STATUS_WORD: &str = "status_word";
    pub const OUTPUT_FREQUENCY: &str = "output_frequency";
    pub const FREQUENCY_SETPOINT: &str = "frequency_setpoint";
    pub const OUTPUT_CURRENT: &str = "output_current";
    pub const OUTPUT_VOLTAGE: &str = "output_voltage";
    pub const DC_BUS_VOLTAGE: &str = "dc_bus_voltage";
    pub const FAULT_CODE: &str = "fault_code";
    pub const DRIVE_TEMPERATURE: &str = "drive_temperature";
    pub const MOTOR_SPEED: &str = "motor_speed";
    pub const RUN_COMMAND: &str = "run_command";
    pub const DIRECTION: &str = "direction";
    pub const FAULT_RESET: &str = "fault_reset";
    pub const ACCEL_TIME: &str = "accel_time";
    pub const DECEL_TIME: &str = "decel_time";
    pub const MOTOR_RATED_CURRENT: &str = "motor_rated_current";
    pub const MAX_FREQUENCY: &str = "max_frequency";
    pub const MOTOR_RATED_VOLTAGE: &str = "motor_rated_voltage";
}

// ============================================================================
// Status word and fault table
// ============================================================================

/// Drive status word (register `status_word`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub const RUNNING: u16 = 0x0001;
    pub const AT_SPEED: u16 = 0x0002;
    pub const FAULT: u16 = 0x0004;
    pub const REVERSE: u16 = 0x0008;

    pub fn is_running(self) -> bool {
        self.0 & Self::RUNNING != 0
    }

    pub fn is_at_speed(self) -> bool {
        self.0 & Self::AT_SPEED != 0
    }

    pub fn is_faulted(self) -> bool {
        self.0 & Self::FAULT != 0
    }

    pub fn is_reverse(self) -> bool {
        self.0 & Self::REVERSE != 0
    }
}

/// Drive fault codes reported in the `fault_code` register
pub mod fault_codes {
    pub const NONE: u16 = 0x00;
    pub const OVERCURRENT: u16 = 0x01;
    pub const OVERVOLTAGE: u16 = 0x02;
    pub const UNDERVOLTAGE: u16 = 0x03;
    pub const INVERTER_OVERHEAT: u16 = 0x04;
    pub const MOTOR_OVERLOAD: u16 = 0x05;
    pub const INPUT_PHASE_LOSS: u16 = 0x06;
    pub const OUTPUT_PHASE_LOSS: u16 = 0x07;
    pub const EXTERNAL_FAULT: u16 = 0x08;
    pub const EEPROM_ERROR: u16 = 0x09;
    pub const CPU_ERROR: u16 = 0x0A;
    pub const OVERLOAD: u16 = 0x0B;
    pub const BRAKING_RESISTOR_OVERLOAD: u16 = 0x0C;
    pub const MOTOR_STALL: u16 = 0x0D;
    pub const COMMUNICATION_ERROR: u16 = 0x0E;
}

/// Human-readable description of a drive fault code
pub fn fault_description(code: u16) -> &'static str {
    match code {
        fault_codes::NONE => "No fault",
        fault_codes::OVERCURRENT => "Overcurrent",
        fault_codes::OVERVOLTAGE => "Overvoltage",
        fault_codes::UNDERVOLTAGE => "Undervoltage",
        fault_codes::INVERTER_OVERHEAT => "Inverter overheat",
        fault_codes::MOTOR_OVERLOAD => "Motor overload",
        fault_codes::INPUT_PHASE_LOSS => "Input phase loss",
        fault_codes::OUTPUT_PHASE_LOSS => "Output phase loss",
        fault_codes::EXTERNAL_FAULT => "External fault",
        fault_codes::EEPROM_ERROR => "EEPROM error",
        fault_codes::CPU_ERROR => "CPU error",
        fault_codes::OVERLOAD => "Drive overload",
        fault_codes::BRAKING_RESISTOR_OVERLOAD => "Braking resistor overload",
        fault_codes::MOTOR_STALL => "Motor stall prevention",
        fault_codes::COMMUNICATION_ERROR => "Communication error",
        _ => "Unknown fault",
    }
}

// ============================================================================
// Register Descriptor
// ============================================================================

/// Register data width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataWidth {
    /// Unsigned 16-bit
    #[default]
    U16,
    /// Signed 16-bit, two's complement
    I16,
}

impl DataWidth {
    /// Representable raw values
    pub fn bounds(self) -> (i32, i32) {
        match self {
            Self::U16 => (0, u16::MAX as i32),
            Self::I16 => (i16::MIN as i32, i16::MAX as i32),
        }
    }

    /// Interpret a raw register word
    pub fn interpret(self, raw: u16) -> i32 {
        match self {
            Self::U16 => raw as i32,
            Self::I16 => raw as i16 as i32,
        }
    }

    /// Wire word for an in-bounds integer
    pub fn to_wire(self, value: i32) -> u16 {
        match self {
            Self::U16 => value as u16,
            Self::I16 => value as i16 as u16,
        }
    }
}

/// Access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Conversion between raw register integers and engineering values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scaling {
    /// engineering = raw / n
    Divide(u32),
    /// engineering = raw * n
    Multiply(u32),
}

impl Default for Scaling {
    fn default() -> Self {
        Self::Divide(1)
    }
}

impl Scaling {
    fn factor(self) -> u32 {
        match self {
            Self::Divide(n) | Self::Multiply(n) => n,
        }
    }

    /// Engineering value of one raw step
    pub fn resolution(self) -> f64 {
        match self {
            Self::Divide(n) => 1.0 / n as f64,
            Self::Multiply(n) => n as f64,
        }
    }
}

/// Inclusive range of valid raw values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRange {
    pub min: i32,
    pub max: i32,
}

/// One addressable drive parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDescriptor {
    /// Holding register address
    #[serde(deserialize_with = "deserialize_address")]
    pub address: u16,
    /// Machine key, unique within a profile
    pub name: String,
    /// Human name for parameter tables
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub width: DataWidth,
    #[serde(default)]
    pub scaling: Scaling,
    #[serde(default)]
    pub unit: String,
    pub access: Access,
    /// Valid raw values; the data width's bounds when absent
    #[serde(default)]
    pub range: Option<RawRange>,
    /// Part of the polled parameter snapshot
    #[serde(default)]
    pub poll: bool,
}

impl RegisterDescriptor {
    /// Check if the register accepts writes
    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    /// Smallest representable change in engineering units
    pub fn resolution(&self) -> f64 {
        self.scaling.resolution()
    }

    /// Valid raw values, declared range intersected with the data width
    pub fn raw_bounds(&self) -> (i32, i32) {
        let (lo, hi) = self.width.bounds();
        match self.range {
            Some(range) => (range.min.max(lo), range.max.min(hi)),
            None => (lo, hi),
        }
    }

    /// Convert a raw register word to its engineering value
    pub fn to_engineering(&self, raw: u16) -> f64 {
        let value = self.width.interpret(raw) as f64;
        match self.scaling {
            Scaling::Divide(n) => value / n as f64,
            Scaling::Multiply(n) => value * n as f64,
        }
    }

    /// Convert an engineering value to the raw word to write.
    ///
    /// Fails with `AccessViolation` on read-only registers and `OutOfRange`
    /// when the rounded raw value is outside [`Self::raw_bounds`].
    pub fn to_raw(&self, value: f64) -> Result<u16, CatalogError> {
        if !self.is_writable() {
            return Err(CatalogError::AccessViolation {
                address: self.address,
                name: self.name.clone(),
            });
        }
        self.quantize(value)
    }

    /// Range-checked conversion that ignores the access mode
    pub fn quantize(&self, value: f64) -> Result<u16, CatalogError> {
        if !value.is_finite() {
            return Err(CatalogError::NotFinite {
                name: self.name.clone(),
                value,
            });
        }

        let raw = self.scale_to_raw(value);
        let (min, max) = self.raw_bounds();
        if raw < min as f64 || raw > max as f64 {
            return Err(CatalogError::OutOfRange {
                name: self.name.clone(),
                value,
                raw: raw as i64,
                min,
                max,
            });
        }
        Ok(self.width.to_wire(raw as i32))
    }

    /// Conversion that saturates at the valid range instead of failing
    pub fn clamp_to_raw(&self, value: f64) -> u16 {
        let (min, max) = self.raw_bounds();
        let raw = if value.is_finite() {
            self.scale_to_raw(value).clamp(min as f64, max as f64)
        } else {
            min as f64
        };
        self.width.to_wire(raw as i32)
    }

    fn scale_to_raw(&self, value: f64) -> f64 {
        match self.scaling {
            Scaling::Divide(n) => (value * n as f64).round(),
            Scaling::Multiply(n) => (value / n as f64).round(),
        }
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.name.is_empty() {
            return Err(CatalogError::invalid_profile(format!(
                "register 0x{:04X} has no name",
                self.address
            )));
        }
        let factor = self.scaling.factor();
        if factor == 0 || factor > MAX_SCALE_FACTOR {
            return Err(CatalogError::invalid_profile(format!(
                "{}: scale factor {} outside 1..={}",
                self.name, factor, MAX_SCALE_FACTOR
            )));
        }
        if let Some(range) = self.range {
            let (lo, hi) = self.width.bounds();
            if range.min > range.max || range.min < lo || range.max > hi {
                return Err(CatalogError::invalid_profile(format!(
                    "{}: range {}..={} invalid for {:?}",
                    self.name, range.min, range.max, self.width
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for RegisterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X} {}", self.address, self.name)?;
        if !self.unit.is_empty() {
            write!(f, " [{}]", self.unit)?;
        }
        Ok(())
    }
}

/// Accept addresses as JSON numbers or "0x…" strings
fn deserialize_address<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AddressRepr {
        Number(u16),
        Text(String),
    }

    match AddressRepr::deserialize(deserializer)? {
        AddressRepr::Number(address) => Ok(address),
        AddressRepr::Text(text) => {
            let parsed = match text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
            {
                Some(hex) => u16::from_str_radix(hex, 16),
                None => text.parse(),
            };
            parsed.map_err(|e| serde::de::Error::custom(format!("address '{}': {}", text, e)))
        }
    }
}

// ============================================================================
// Model Profile
// ============================================================================

/// Nameplate ratings of a drive family
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveRatings {
    pub max_frequency_hz: f64,
    pub rated_current_a: f64,
    pub rated_power_kw: f64,
    pub rated_voltage_v: f64,
}

#[derive(Debug, Deserialize)]
struct ProfileDef {
    name: String,
    #[serde(default)]
    description: String,
    ratings: DriveRatings,
    registers: Vec<RegisterDescriptor>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    profiles: Vec<ProfileDef>,
}

/// One FC03 read covering contiguous polled registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBlock {
    pub start: u16,
    pub count: u16,
}

impl ReadBlock {
    /// The read request for this block
    pub fn request(&self) -> Request {
        Request::read(self.start, self.count)
    }

    fn end(&self) -> u32 {
        self.start as u32 + self.count as u32
    }
}

/// Validated register map of one drive family
#[derive(Debug)]
pub struct ModelProfile {
    name: String,
    description: String,
    ratings: DriveRatings,
    /// Sorted by address
    registers: Vec<RegisterDescriptor>,
    by_address: HashMap<u16, usize>,
    by_name: HashMap<String, usize>,
}

impl ModelProfile {
    /// Build and validate a profile.
    ///
    /// Addresses and names must be unique and every descriptor's scaling and
    /// range must be valid.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        ratings: DriveRatings,
        mut registers: Vec<RegisterDescriptor>,
    ) -> Result<Self, CatalogError> {
        let name = name.into();
        if name.is_empty() {
            return Err(CatalogError::invalid_profile("profile without a name"));
        }
        if registers.is_empty() {
            return Err(CatalogError::invalid_profile(format!(
                "{}: no registers defined",
                name
            )));
        }

        registers.sort_by_key(|r| r.address);

        let mut by_address = HashMap::with_capacity(registers.len());
        let mut by_name = HashMap::with_capacity(registers.len());
        for (index, register) in registers.iter().enumerate() {
            register.validate().map_err(|e| match e {
                CatalogError::InvalidProfile { message } => {
                    CatalogError::invalid_profile(format!("{}: {}", name, message))
                }
                other => other,
            })?;
            if by_address.insert(register.address, index).is_some() {
                return Err(CatalogError::invalid_profile(format!(
                    "{}: duplicate register address 0x{:04X}",
                    name, register.address
                )));
            }
            if by_name.insert(register.name.clone(), index).is_some() {
                return Err(CatalogError::invalid_profile(format!(
                    "{}: duplicate register name '{}'",
                    name, register.name
                )));
            }
        }

        debug!("Profile {} validated: {} registers", name, registers.len());

        Ok(Self {
            name,
            description: description.into(),
            ratings,
            registers,
            by_address,
            by_name,
        })
    }

    /// Profile name (drive family)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn ratings(&self) -> &DriveRatings {
        &self.ratings
    }

    /// All registers, sorted by address
    pub fn registers(&self) -> &[RegisterDescriptor] {
        &self.registers
    }

    /// Look up a register by address
    pub fn lookup(&self, address: u16) -> Result<&RegisterDescriptor, CatalogError> {
        self.by_address
            .get(&address)
            .map(|&index| &self.registers[index])
            .ok_or_else(|| CatalogError::NotFound {
                profile: self.name.clone(),
                address,
            })
    }

    /// Look up a register by name
    pub fn find(&self, name: &str) -> Result<&RegisterDescriptor, CatalogError> {
        self.by_name
            .get(name)
            .map(|&index| &self.registers[index])
            .ok_or_else(|| CatalogError::UnknownParameter {
                profile: self.name.clone(),
                name: name.to_string(),
            })
    }

    /// Registers that make up the parameter snapshot
    pub fn polled(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.iter().filter(|r| r.poll)
    }

    /// Group polled registers into as few FC03 reads as the limits allow.
    ///
    /// Only contiguous addresses are merged; reading across a gap would hit
    /// undefined registers and draw an illegal-address exception.
    pub fn plan_poll(&self, limits: &DeviceLimits) -> Vec<ReadBlock> {
        let max = limits.read_block_size();
        let mut blocks: Vec<ReadBlock> = Vec::new();

        for register in self.polled() {
            match blocks.last_mut() {
                Some(block) if block.end() == register.address as u32 && block.count < max => {
                    block.count += 1;
                }
                _ => blocks.push(ReadBlock {
                    start: register.address,
                    count: 1,
                }),
            }
        }

        blocks
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// The set of model profiles known to the application
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    profiles: BTreeMap<String, Arc<ModelProfile>>,
}

impl Catalog {
    /// Profiles for the CDE drive series shipped with the crate
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_PROFILES)
    }

    /// Parse and validate a profile table
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(text)?;
        let mut catalog = Self::default();
        for def in file.profiles {
            let profile = ModelProfile::new(def.name, def.description, def.ratings, def.registers)?;
            catalog.insert(profile)?;
        }
        Ok(catalog)
    }

    /// Load a profile table from disk
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CatalogError::invalid_profile(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Add a profile; names must be unique
    pub fn insert(&mut self, profile: ModelProfile) -> Result<(), CatalogError> {
        if self.profiles.contains_key(profile.name()) {
            return Err(CatalogError::invalid_profile(format!(
                "duplicate profile '{}'",
                profile.name()
            )));
        }
        self.profiles
            .insert(profile.name().to_string(), Arc::new(profile));
        Ok(())
    }

    /// Profile by name, ignoring ASCII case
    pub fn profile(&self, name: &str) -> Result<Arc<ModelProfile>, CatalogError> {
        self.profiles
            .get(name)
            .or_else(|| {
                self.profiles
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, profile)| profile)
            })
            .cloned()
            .ok_or_else(|| CatalogError::UnknownProfile {
                name: name.to_string(),
            })
    }

    /// Profile names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
