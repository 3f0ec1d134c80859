//! Protocol module containing packet types, the two wire formats and the codec.

pub mod checksum;
pub mod codec;
pub mod messages;
pub mod params;
pub mod status;
pub mod v1;
pub mod v2;

pub use codec::{
    decode_instruction, decode_status, encode_instruction, encode_status, probe_status_frame,
    FrameProbe, PacketError,
};
pub use messages::*;
pub use status::DeviceStatus;
