//! In-band control channel
//!
//! A single reliable, ordered, bidirectional channel multiplexed over the
//! active session. Its lifetime is defined to exactly track the call's
//! lifetime: the channel opening means the peers are connected, and the
//! channel closing is the hangup signal.

mod control_channel;
mod messages;

pub use control_channel::{ChannelState, ControlChannel};
pub use messages::ControlMessage;
