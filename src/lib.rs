//! Device and stream orchestration core for a userspace audio server.
//!
//! This crate is the control-plane of an audio server: it keeps the registry
//! of playback and capture devices, decides which of them are enabled, opens
//! them on demand and closes them when idle, and routes every client stream
//! to the right device(s). Mixing, resampling and the actual PCM callbacks
//! live in an external audio worker reached through the [`worker::AudioWorker`]
//! trait; this crate only sequences the control operations.
//!
//! All state is owned by a single [`hub::Hub`] value driven from one control
//! thread. The only cross-thread surface is the published
//! [`snapshot::ServerState`].

use std::time::Duration;

pub mod alert;
pub mod device;
pub mod hub;
pub mod registry;
pub mod snapshot;
pub mod stream;
pub mod timer;
pub mod worker;

pub use crate::device::{Device, DeviceDriver, DeviceInfo, Node, NodeAttr, NodeInfo, NodeType};
pub use crate::hub::{Hub, SystemEvent};
pub use crate::snapshot::{ServerState, SharedState};
pub use crate::stream::{SampleFormat, Stream, StreamFormat};

/// Time an idle output device is kept open so it can drain audible samples.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum delay of the idle-close timer, prevents wakeup storms when many
/// timeouts clump together.
pub const IDLE_TIMER_MIN: Duration = Duration::from_millis(10);

/// Maximum number of devices per direction in the published snapshot.
pub const MAX_IODEVS: usize = 20;

/// Maximum number of nodes per direction in the published snapshot.
pub const MAX_IONODES: usize = 20;

/// Device indices below this value are reserved for synthetic devices and are
/// never assigned to real ones. Index 0 means "no device".
pub const MAX_SPECIAL_DEVICE_IDX: u32 = 3;

/// Fixed index of the synthetic silent playback device.
pub const FALLBACK_OUTPUT_IDX: u32 = 1;

/// Fixed index of the synthetic silent capture device.
pub const FALLBACK_INPUT_IDX: u32 = 2;

/// Direction of audio flow. All core state is duplicated per direction and
/// never crosses directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Playback towards a speaker, headphone, HDMI sink, etc.
    Output,
    /// Capture from a microphone or another source.
    Input,
}

impl Direction {
    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Output => 0,
            Direction::Input => 1,
        }
    }
}

/// Composite identifier of a node: device index in the upper 32 bits, the
/// device-scoped node index in the lower 32 bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// The "no node selected" value.
    pub const NONE: NodeId = NodeId(0);

    pub fn new(dev_idx: u32, node_idx: u32) -> Self {
        NodeId(u64::from(dev_idx) << 32 | u64::from(node_idx))
    }

    /// Device index this node belongs to.
    pub fn device_index(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Index of the node within its device.
    pub fn node_index(self) -> u32 {
        self.0 as u32
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Raw 64-bit value, as published in the snapshot.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Errors returned by the control operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Bad direction, or a pinned stream targets a device that is not there.
    #[error("invalid request")]
    Invalid,
    /// The device is already registered or already enabled.
    #[error("already present")]
    Duplicate,
    /// No device or stream with the given index.
    #[error("not found")]
    NotFound,
    /// The device is still open and cannot be removed.
    #[error("device busy")]
    Busy,
    /// Bookkeeping allocation failed; nothing was committed.
    #[error("out of memory")]
    OutOfMemory,
    /// The device driver or the audio worker reported a hardware problem.
    #[error("hardware failure: {0}")]
    HwFailure(String),
}
