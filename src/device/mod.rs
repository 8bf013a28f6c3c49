//! The device data model and the driver capability interface
use std::fmt;
use std::time::Duration;

use crate::stream::StreamFormat;
use crate::{Direction, Error};

mod fallback;
pub use fallback::*;
mod test_dev;
pub use test_dev::*;

/// Capability hooks of a device backend (one ALSA PCM, one Bluetooth link,
/// a synthetic source, ...).
///
/// `open`, `close` and `is_open` are mandatory; the remaining hooks have
/// no-op defaults for backends that do not support them. Hooks may block on
/// kernel calls, the control thread tolerates that.
pub trait DeviceDriver {
    /// Bring the hardware up with the negotiated format.
    fn open(&mut self, format: &StreamFormat) -> Result<(), Error>;

    /// Release the hardware.
    fn close(&mut self);

    /// Whether the hardware is currently open.
    fn is_open(&self) -> bool;

    /// Negotiate the closest supported format for a requested stream format.
    /// The default accepts the request as-is.
    fn negotiate_format(&mut self, requested: &StreamFormat) -> Result<StreamFormat, Error> {
        Ok(*requested)
    }

    /// Apply the system playback volume, in percent.
    fn set_volume(&mut self, _volume: u32) {}

    /// Apply the system playback mute state.
    fn set_mute(&mut self, _muted: bool) {}

    /// Apply the system capture gain, in 0.01 dB steps.
    fn set_capture_gain(&mut self, _gain: i32) {}

    /// Apply the system capture mute state.
    fn set_capture_mute(&mut self, _muted: bool) {}

    /// Pick the node audio should flow through. The default prefers the
    /// first plugged node and falls back to the first node.
    fn update_active_node(&mut self, nodes: &[Node]) -> Option<u32> {
        nodes
            .iter()
            .find(|n| n.plugged())
            .or_else(|| nodes.first())
            .map(|n| n.idx())
    }
}

/// Descriptor published to clients for every registered device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Registry-assigned index, unique across both directions.
    pub idx: u32,
    /// Human readable device name.
    pub name: String,
    /// Identifier that survives replug/reboot, 0 if the backend has none.
    pub stable_id: u64,
}

/// One logical audio endpoint and its registry-managed state.
pub struct Device {
    info: DeviceInfo,
    direction: Direction,
    nodes: Vec<Node>,
    active_node: Option<u32>,
    is_active: bool,
    idle_timeout: Option<Duration>,
    format: Option<StreamFormat>,
    min_cb_level: usize,
    max_cb_level: usize,
    driver: Box<dyn DeviceDriver>,
}

impl Device {
    pub fn new(
        direction: Direction,
        name: &str,
        stable_id: u64,
        driver: Box<dyn DeviceDriver>,
    ) -> Self {
        Self {
            info: DeviceInfo {
                idx: 0,
                name: name.to_string(),
                stable_id,
            },
            direction,
            nodes: Vec::new(),
            active_node: None,
            is_active: false,
            idle_timeout: None,
            format: None,
            min_cb_level: 0,
            max_cb_level: 0,
            driver,
        }
    }

    /// Add a node, keyed by its device-scoped index. Replaces nothing, the
    /// caller is expected to hand out unique indices.
    pub fn add_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn index(&self) -> u32 {
        self.info.idx
    }

    pub(crate) fn set_index(&mut self, idx: u32) {
        self.info.idx = idx;
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, idx: u32) -> Option<&Node> {
        self.nodes.iter().find(|n| n.idx == idx)
    }

    pub(crate) fn node_mut(&mut self, idx: u32) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.idx == idx)
    }

    /// The node currently selected for audio flow, if any.
    pub fn active_node(&self) -> Option<&Node> {
        self.active_node.and_then(move |idx| self.node(idx))
    }

    pub(crate) fn active_node_idx(&self) -> Option<u32> {
        self.active_node
    }

    /// Whether this device is the representative of its direction.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub(crate) fn set_active_flag(&mut self, active: bool) {
        self.is_active = active;
    }

    pub fn is_open(&self) -> bool {
        self.driver.is_open()
    }

    /// The negotiated format. Only meaningful while the device is open.
    pub fn format(&self) -> Option<&StreamFormat> {
        self.format.as_ref()
    }

    pub(crate) fn set_format(&mut self, format: StreamFormat) {
        self.format = Some(format);
    }

    pub(crate) fn clear_format(&mut self) {
        self.format = None;
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub(crate) fn set_idle_timeout(&mut self, deadline: Duration) {
        self.idle_timeout = Some(deadline);
    }

    pub(crate) fn clear_idle_timeout(&mut self) {
        self.idle_timeout = None;
    }

    /// Smallest period (in frames) any attached stream needs serviced.
    pub fn min_cb_level(&self) -> usize {
        self.min_cb_level
    }

    pub fn max_cb_level(&self) -> usize {
        self.max_cb_level
    }

    pub(crate) fn set_cb_levels(&mut self, min: usize, max: usize) {
        self.min_cb_level = min;
        self.max_cb_level = max;
    }

    pub(crate) fn driver_mut(&mut self) -> &mut dyn DeviceDriver {
        &mut *self.driver
    }

    /// Let the driver recompute which node audio should flow through.
    pub fn update_active_node(&mut self) {
        let choice = self.driver.update_active_node(&self.nodes);
        // discard indices the driver made up
        self.active_node = choice.filter(|idx| self.nodes.iter().any(|n| n.idx == *idx));
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("info", &self.info)
            .field("direction", &self.direction)
            .field("nodes", &self.nodes)
            .field("active_node", &self.active_node)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Kind of endpoint a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    InternalSpeaker,
    Headphone,
    Hdmi,
    InternalMic,
    Mic,
    /// Always-on keyword recognition (hotword) source.
    Aokr,
    Usb,
    Bluetooth,
    KeyboardMic,
    Unknown,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeType::InternalSpeaker => "INTERNAL_SPEAKER",
            NodeType::Headphone => "HEADPHONE",
            NodeType::Hdmi => "HDMI",
            NodeType::InternalMic => "INTERNAL_MIC",
            NodeType::Mic => "MIC",
            NodeType::Aokr => "AOKR",
            NodeType::Usb => "USB",
            NodeType::Bluetooth => "BLUETOOTH",
            NodeType::KeyboardMic => "KEYBOARD_MIC",
            NodeType::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// A sub-endpoint of a device: a specific jack, HDMI port or transducer.
#[derive(Debug, Clone)]
pub struct Node {
    idx: u32,
    node_type: NodeType,
    name: String,
    plugged: bool,
    plugged_time: Duration,
    volume: u32,
    capture_gain: i32,
    left_right_swapped: bool,
}

impl Node {
    pub fn new(idx: u32, node_type: NodeType, name: &str) -> Self {
        Self {
            idx,
            node_type,
            name: name.to_string(),
            plugged: false,
            plugged_time: Duration::ZERO,
            volume: 100,
            capture_gain: 0,
            left_right_swapped: false,
        }
    }

    /// Builder-style plugged flag, handy when describing fixed nodes.
    pub fn plugged_at(mut self, time: Duration) -> Self {
        self.plugged = true;
        self.plugged_time = time;
        self
    }

    pub fn idx(&self) -> u32 {
        self.idx
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugged(&self) -> bool {
        self.plugged
    }

    pub fn plugged_time(&self) -> Duration {
        self.plugged_time
    }

    pub(crate) fn set_plugged(&mut self, plugged: bool, now: Duration) {
        self.plugged = plugged;
        self.plugged_time = now;
    }

    pub fn volume(&self) -> u32 {
        self.volume
    }

    pub(crate) fn set_volume(&mut self, volume: u32) {
        self.volume = volume.min(100);
    }

    pub fn capture_gain(&self) -> i32 {
        self.capture_gain
    }

    pub(crate) fn set_capture_gain(&mut self, gain: i32) {
        self.capture_gain = gain;
    }

    pub fn left_right_swapped(&self) -> bool {
        self.left_right_swapped
    }

    pub(crate) fn set_left_right_swapped(&mut self, swapped: bool) {
        self.left_right_swapped = swapped;
    }
}

/// Mutable node attribute, set through the control interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAttr {
    Plugged(bool),
    /// Playback volume in percent, clamped to 100.
    Volume(u32),
    /// Capture gain in 0.01 dB steps.
    CaptureGain(i32),
    SwapLeftRight(bool),
}

/// Per-node record published to clients in the snapshot.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub dev_idx: u32,
    pub node_idx: u32,
    pub node_type: NodeType,
    pub name: String,
    pub plugged: bool,
    pub plugged_time: Duration,
    /// True when the owning device is active and this is its active node.
    pub active: bool,
    pub volume: u32,
    pub capture_gain: i32,
    pub left_right_swapped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDriver;

    impl DeviceDriver for NullDriver {
        fn open(&mut self, _format: &StreamFormat) -> Result<(), Error> {
            Ok(())
        }
        fn close(&mut self) {}
        fn is_open(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_default_active_node_prefers_plugged() {
        let mut dev = Device::new(Direction::Output, "card", 1, Box::new(NullDriver));
        dev.add_node(Node::new(0, NodeType::InternalSpeaker, "Speaker"));
        dev.add_node(Node::new(1, NodeType::Headphone, "Headphone").plugged_at(Duration::ZERO));

        dev.update_active_node();
        assert_eq!(dev.active_node_idx(), Some(1));
    }

    #[test]
    fn test_default_active_node_falls_back_to_first() {
        let mut dev = Device::new(Direction::Output, "card", 1, Box::new(NullDriver));
        dev.add_node(Node::new(4, NodeType::Hdmi, "HDMI"));
        dev.add_node(Node::new(5, NodeType::Headphone, "Headphone"));

        dev.update_active_node();
        assert_eq!(dev.active_node_idx(), Some(4));

        let active = dev.active_node().unwrap();
        assert_eq!(active.name(), "HDMI");
    }

    #[test]
    fn test_no_nodes_no_active() {
        let mut dev = Device::new(Direction::Input, "mic", 2, Box::new(NullDriver));
        dev.update_active_node();
        assert_eq!(dev.active_node_idx(), None);
        assert!(dev.active_node().is_none());
    }

    #[test]
    fn test_node_volume_clamped() {
        let mut node = Node::new(0, NodeType::Usb, "USB Speaker");
        node.set_volume(250);
        assert_eq!(node.volume(), 100);
    }

    #[test]
    fn test_node_type_names() {
        assert_eq!(NodeType::InternalSpeaker.to_string(), "INTERNAL_SPEAKER");
        assert_eq!(NodeType::Aokr.to_string(), "AOKR");
        assert_eq!(NodeType::Unknown.to_string(), "UNKNOWN");
    }
}
