//! coyote-core: domain types shared by the DG-LAB transport and the session
//! manager, plus the pure pieces of the controller: endpoint resolution,
//! the DungeonLab `.pulse` codec and the preset registry.
//!
//! Nothing in this crate performs network IO or spawns tasks.

pub mod codec;
pub mod endpoint;
pub mod preset;
pub mod pulse;
pub mod types;

pub use codec::{MAX_PRESET_PULSES, parse_dungeonlab_pulse};
pub use endpoint::{EndpointError, Scheme, SessionIdentity, resolve};
pub use preset::{PULSE_FILE_EXTENSION, PresetRegistry};
pub use pulse::{PulseDataError, RawPulse, validate_pulses};
pub use types::{
    Channel, DeviceEvent, PulseOperation, RetCode, StrengthData, StrengthOperation,
};
