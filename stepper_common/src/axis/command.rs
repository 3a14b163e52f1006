//! Command-mutation messages.
//!
//! The protocol collaborator decodes host messages into [`AxisCommand`]
//! values and enqueues them for the axis task. Each command mutates the
//! axis' requested fields once, at the start of the next cycle.

use serde::{Deserialize, Serialize};

use crate::axis::types::{Direction, SpeedChannelMask};

/// A single state mutation requested by the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AxisCommand {
    /// Move to an absolute encoder position.
    MoveAbsolute { target: i32 },
    /// Move by a signed distance from the current encoder position.
    MoveRelative { distance: i32 },
    /// Stop any motion.
    Stop,
    /// Run continuously on the VELOCITY channel.
    Velocity { direction: Direction },
    /// Run continuously at a percentage of the UNBOUND channel (0 stops).
    VelocityPercent { direction: Direction, percent: u8 },
    /// One jog step.
    Jog { direction: Direction },
    /// Start the homing procedure for the fitted encoder type.
    Home,
    /// Recall a stored position.
    GotoStored { index: u8 },
    /// Enable or disable the channel.
    SetChannelEnable { enabled: bool },
    /// Re-base the encoder counter.
    SetEncoderCounter { counts: i32 },
    /// Write the raw drive step counter.
    SetPositionCounter { steps: i32 },
    /// Set the ceiling of the selected speed channels.
    SetSpeedLimit {
        #[serde(with = "mask_bits")]
        channels: SpeedChannelMask,
        value: u32,
    },
    /// Joystick deflection in `[-1.0, 1.0]`; zero stops.
    Joystick { deflection: f32 },
    /// A protocol message this engine does not implement.
    Unsupported { message_id: u16 },
}

impl AxisCommand {
    /// Short name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MoveAbsolute { .. } => "move_absolute",
            Self::MoveRelative { .. } => "move_relative",
            Self::Stop => "stop",
            Self::Velocity { .. } => "velocity",
            Self::VelocityPercent { .. } => "velocity_percent",
            Self::Jog { .. } => "jog",
            Self::Home => "home",
            Self::GotoStored { .. } => "goto_stored",
            Self::SetChannelEnable { .. } => "set_channel_enable",
            Self::SetEncoderCounter { .. } => "set_encoder_counter",
            Self::SetPositionCounter { .. } => "set_position_counter",
            Self::SetSpeedLimit { .. } => "set_speed_limit",
            Self::Joystick { .. } => "joystick",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

mod mask_bits {
    use super::SpeedChannelMask;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(mask: &SpeedChannelMask, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(mask.bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SpeedChannelMask, D::Error> {
        u8::deserialize(d).map(SpeedChannelMask::from_bits_truncate)
    }
}
