//! The orchestration core tying devices, streams and routing policy together
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arrayvec::ArrayVec;

use crate::alert::{Alert, CallbackId};
use crate::device::{
    fallback_device, test_device, Device, DeviceInfo, NodeAttr, NodeInfo, TestDevCommand,
    TestDevType, TestDeviceHandle,
};
use crate::registry::Registry;
use crate::snapshot::SharedState;
use crate::stream::{Stream, StreamList};
use crate::timer::{TimerId, TimerService};
use crate::worker::AudioWorker;
use crate::{
    Direction, Error, NodeId, FALLBACK_INPUT_IDX, FALLBACK_OUTPUT_IDX, IDLE_TIMEOUT,
    IDLE_TIMER_MIN, MAX_IODEVS, MAX_IONODES, MAX_SPECIAL_DEVICE_IDX,
};

/// System-wide changes the host delivers to the core. The current values
/// live in the [`SharedState`] handed to [`Hub::new`]; the event only tells
/// the core to pick them up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    VolumeChanged,
    MuteChanged,
    CaptureGainChanged,
    CaptureMuteChanged,
    SuspendStateChanged,
}

/// Callback fired when a node volume or capture gain changes.
pub type NodeValueCallback = Box<dyn FnMut(NodeId, i32)>;

/// Callback fired when a node channel swap changes.
pub type NodeSwapCallback = Box<dyn FnMut(NodeId, bool)>;

struct EnabledDev {
    dev: u32,
    for_pinned_streams: bool,
}

/// Introspection record of one enablement entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnabledDevInfo {
    pub dev_idx: u32,
    pub for_pinned_streams: bool,
}

/// The control-plane core of the audio server.
///
/// One `Hub` owns the device registry, the per-direction enablement sets,
/// the node selection, the stream list and the notification alerts. Every
/// operation runs to completion on the control thread; the audio worker and
/// the timer service are reached through the traits handed to [`Hub::new`].
pub struct Hub {
    registry: Registry,
    enabled: [Vec<EnabledDev>; 2],
    selected: [NodeId; 2],
    fallbacks: [u32; 2],
    streams: StreamList,
    worker: Box<dyn AudioWorker>,
    timer: Box<dyn TimerService>,
    state: SharedState,
    idle_timer: Option<TimerId>,
    nodes_changed: Alert,
    active_node_changed: Alert,
    node_volume_cb: Option<NodeValueCallback>,
    node_gain_cb: Option<NodeValueCallback>,
    node_swap_cb: Option<NodeSwapCallback>,
    test_handles: HashMap<u32, TestDeviceHandle>,
}

impl Hub {
    /// Set the core up: registers the silent fallback devices at their
    /// reserved indices, enables them so both directions can always flow,
    /// and publishes the first snapshot.
    pub fn new(
        worker: Box<dyn AudioWorker>,
        timer: Box<dyn TimerService>,
        state: SharedState,
    ) -> Self {
        let mut hub = Hub {
            registry: Registry::new(),
            enabled: [Vec::new(), Vec::new()],
            selected: [NodeId::NONE; 2],
            fallbacks: [FALLBACK_OUTPUT_IDX, FALLBACK_INPUT_IDX],
            streams: StreamList::new(),
            worker,
            timer,
            state,
            idle_timer: None,
            nodes_changed: Alert::new(),
            active_node_changed: Alert::new(),
            node_volume_cb: None,
            node_gain_cb: None,
            node_swap_cb: None,
            test_handles: HashMap::new(),
        };

        hub.registry
            .add_reserved(fallback_device(Direction::Output), FALLBACK_OUTPUT_IDX);
        hub.registry
            .add_reserved(fallback_device(Direction::Input), FALLBACK_INPUT_IDX);
        let _ = hub.enable_device(FALLBACK_OUTPUT_IDX);
        let _ = hub.enable_device(FALLBACK_INPUT_IDX);

        hub.update_device_list();
        hub
    }

    /// Clear the device and enablement lists without touching the worker.
    /// Test helper.
    pub fn reset(&mut self) {
        self.enabled[0].clear();
        self.enabled[1].clear();
        self.registry.clear();
        self.test_handles.clear();
    }

    /// Register a playback device, returning its assigned index.
    pub fn add_output(&mut self, dev: Device) -> Result<u32, Error> {
        self.add_dev(Direction::Output, dev)
    }

    /// Register a capture device, returning its assigned index.
    pub fn add_input(&mut self, dev: Device) -> Result<u32, Error> {
        self.add_dev(Direction::Input, dev)
    }

    fn add_dev(&mut self, direction: Direction, dev: Device) -> Result<u32, Error> {
        if dev.direction() != direction {
            return Err(Error::Invalid);
        }
        let idx = self.registry.add(dev)?;
        self.update_device_list();
        Ok(idx)
    }

    /// Unregister a playback device. Fails with `Busy` while it is open.
    pub fn rm_output(&mut self, dev_idx: u32) -> Result<(), Error> {
        self.rm_dev(Direction::Output, dev_idx)
    }

    /// Unregister a capture device. Fails with `Busy` while it is open.
    pub fn rm_input(&mut self, dev_idx: u32) -> Result<(), Error> {
        self.rm_dev(Direction::Input, dev_idx)
    }

    fn rm_dev(&mut self, direction: Direction, dev_idx: u32) -> Result<(), Error> {
        match self.registry.get(dev_idx) {
            Some(dev) if dev.direction() != direction => return Err(Error::Invalid),
            Some(_) => {}
            None => return Err(Error::NotFound),
        }

        // retire the device first, otherwise it stays busy in the list
        if self.dev_is_enabled(dev_idx) {
            self.disable_device(dev_idx);
            if self.enabled[direction.index()].is_empty() {
                let _ = self.enable_device(self.fallbacks[direction.index()]);
            }
        }

        self.registry.remove(dev_idx)?;
        self.test_handles.remove(&dev_idx);
        self.update_device_list();
        Ok(())
    }

    /// Look a device up by index, either direction.
    pub fn find_dev(&self, dev_idx: u32) -> Option<&Device> {
        self.registry.get(dev_idx)
    }

    /// Info records of the registered playback devices, newest first. The
    /// synthetic fallback devices are not listed.
    pub fn outputs(&self) -> Vec<DeviceInfo> {
        self.dev_infos(Direction::Output)
    }

    /// Info records of the registered capture devices, newest first. The
    /// synthetic fallback devices are not listed.
    pub fn inputs(&self) -> Vec<DeviceInfo> {
        self.dev_infos(Direction::Input)
    }

    fn dev_infos(&self, direction: Direction) -> Vec<DeviceInfo> {
        self.registry
            .devices(direction)
            .iter()
            .filter(|d| !is_special(d.index()))
            .map(|d| d.info().clone())
            .collect()
    }

    /// Enable the device owning the node, retiring the fallback if needed.
    pub fn add_active_node(&mut self, direction: Direction, node_id: NodeId) {
        let dev_idx = match self.registry.get(node_id.device_index()) {
            Some(dev) if dev.direction() == direction => dev.index(),
            _ => return,
        };

        self.possibly_disable_fallback(direction);
        if let Err(e) = self.enable_device(dev_idx) {
            if e != Error::Duplicate {
                log::warn!("enabling device {}: {}", dev_idx, e);
            }
        }
        if self.enabled[direction.index()].is_empty() {
            let _ = self.enable_device(self.fallbacks[direction.index()]);
        }
    }

    /// Disable the device owning the node, re-enabling the fallback when the
    /// direction would otherwise end up with nothing.
    pub fn rm_active_node(&mut self, direction: Direction, node_id: NodeId) {
        let dev_idx = match self.registry.get(node_id.device_index()) {
            Some(dev) => dev.index(),
            None => return,
        };
        if !self.enabled[direction.index()].iter().any(|e| e.dev == dev_idx) {
            return;
        }

        self.disable_device(dev_idx);
        if self.enabled[direction.index()].is_empty() {
            let _ = self.enable_device(self.fallbacks[direction.index()]);
        }
    }

    /// Route audio of a direction through the given node.
    ///
    /// A node that has vanished, or whose device direction disagrees, is
    /// silently ignored: the user may select a node that was unplugged just
    /// before the request arrived.
    pub fn select_node(&mut self, direction: Direction, node_id: NodeId) {
        if node_id == self.selected[direction.index()] {
            return;
        }

        let old_idx = self
            .registry
            .get(self.selected[direction.index()].device_index())
            .map(|d| d.index());
        let new_dev = self
            .registry
            .get(node_id.device_index())
            .map(|d| (d.index(), d.direction()));

        if let Some((_, dir)) = new_dev {
            if dir != direction {
                return;
            }
        }

        self.selected[direction.index()] = node_id;

        let new_idx = new_dev.map(|(idx, _)| idx);
        if let Some(idx) = new_idx {
            if let Err(e) = self.set_active(idx) {
                log::warn!("activating device {}: {}", idx, e);
            }
        }

        // the previous device recomputes its own active node
        if let Some(old) = old_idx {
            if Some(old) != new_idx {
                if let Some(dev) = self.registry.get_mut(old) {
                    dev.update_active_node();
                }
            }
        }
    }

    /// Composite id of the first enabled device's active node, or
    /// [`NodeId::NONE`].
    pub fn active_node_id(&self, direction: Direction) -> NodeId {
        let entry = match self.enabled[direction.index()].first() {
            Some(entry) => entry,
            None => return NodeId::NONE,
        };
        let dev = match self.registry.get(entry.dev) {
            Some(dev) => dev,
            None => return NodeId::NONE,
        };
        match dev.active_node() {
            Some(node) => NodeId::new(dev.index(), node.idx()),
            None => NodeId::NONE,
        }
    }

    /// Change one attribute of a node. Fails with `Invalid` when the node is
    /// not there.
    pub fn set_node_attr(&mut self, node_id: NodeId, attr: NodeAttr) -> Result<(), Error> {
        let now = self.timer.now();
        {
            let node = self.registry.find_node_mut(node_id).ok_or(Error::Invalid)?;
            match attr {
                NodeAttr::Plugged(plugged) => node.set_plugged(plugged, now),
                NodeAttr::Volume(volume) => node.set_volume(volume),
                NodeAttr::CaptureGain(gain) => node.set_capture_gain(gain),
                NodeAttr::SwapLeftRight(swapped) => node.set_left_right_swapped(swapped),
            }
        }

        match attr {
            NodeAttr::Plugged(_) => self.notify_nodes_changed(),
            NodeAttr::Volume(_) => self.notify_node_volume(node_id),
            NodeAttr::CaptureGain(_) => self.notify_node_capture_gain(node_id),
            NodeAttr::SwapLeftRight(_) => self.notify_node_left_right_swapped(node_id),
        }
        Ok(())
    }

    /// Whether the node is the selected one of either direction.
    pub fn node_selected(&self, node_id: NodeId) -> bool {
        !node_id.is_none() && (node_id == self.selected[0] || node_id == self.selected[1])
    }

    pub fn register_nodes_changed_cb(&mut self, cb: Box<dyn FnMut()>) -> CallbackId {
        self.nodes_changed.add_callback(cb)
    }

    pub fn remove_nodes_changed_cb(&mut self, id: CallbackId) -> Result<(), Error> {
        self.nodes_changed.rm_callback(id)
    }

    pub fn register_active_node_changed_cb(&mut self, cb: Box<dyn FnMut()>) -> CallbackId {
        self.active_node_changed.add_callback(cb)
    }

    pub fn remove_active_node_changed_cb(&mut self, id: CallbackId) -> Result<(), Error> {
        self.active_node_changed.rm_callback(id)
    }

    /// Mark the nodes-changed alert for dispatch.
    pub fn notify_nodes_changed(&mut self) {
        self.nodes_changed.pending();
    }

    /// Mark the active-node-changed alert for dispatch.
    pub fn notify_active_node_changed(&mut self) {
        self.active_node_changed.pending();
    }

    /// Dispatch the pending alerts: refresh the published snapshot, then
    /// fan out to the subscribers. Any number of pending marks since the
    /// last dispatch collapse into one.
    pub fn process_alerts(&mut self) {
        loop {
            let mut dispatched = false;
            if self.nodes_changed.take_pending() {
                self.update_device_list();
                self.nodes_changed.notify();
                dispatched = true;
            }
            if self.active_node_changed.take_pending() {
                self.update_device_list();
                self.active_node_changed.notify();
                dispatched = true;
            }
            if !dispatched {
                return;
            }
        }
    }

    /// Fire the node volume callback with the node's current volume.
    pub fn notify_node_volume(&mut self, node_id: NodeId) {
        let volume = match self.registry.find_node(node_id) {
            Some((_, node)) => node.volume() as i32,
            None => return,
        };
        if let Some(cb) = self.node_volume_cb.as_mut() {
            cb(node_id, volume);
        }
    }

    /// Fire the capture gain callback with the node's current gain.
    pub fn notify_node_capture_gain(&mut self, node_id: NodeId) {
        let gain = match self.registry.find_node(node_id) {
            Some((_, node)) => node.capture_gain(),
            None => return,
        };
        if let Some(cb) = self.node_gain_cb.as_mut() {
            cb(node_id, gain);
        }
    }

    /// Fire the channel swap callback with the node's current state.
    pub fn notify_node_left_right_swapped(&mut self, node_id: NodeId) {
        let swapped = match self.registry.find_node(node_id) {
            Some((_, node)) => node.left_right_swapped(),
            None => return,
        };
        if let Some(cb) = self.node_swap_cb.as_mut() {
            cb(node_id, swapped);
        }
    }

    pub fn set_node_volume_callbacks(
        &mut self,
        volume_cb: Option<NodeValueCallback>,
        gain_cb: Option<NodeValueCallback>,
    ) {
        self.node_volume_cb = volume_cb;
        self.node_gain_cb = gain_cb;
    }

    pub fn set_node_left_right_swapped_callbacks(&mut self, swapped_cb: Option<NodeSwapCallback>) {
        self.node_swap_cb = swapped_cb;
    }

    /// Publish a fresh snapshot of the device and node lists.
    pub fn update_device_list(&mut self) {
        let mut update = match self.state.update_begin() {
            Some(update) => update,
            None => return,
        };

        update.num_output_devs = self
            .registry
            .devices(Direction::Output)
            .iter()
            .filter(|d| !is_special(d.index()))
            .count();
        update.num_input_devs = self
            .registry
            .devices(Direction::Input)
            .iter()
            .filter(|d| !is_special(d.index()))
            .count();

        update.output_devs.clear();
        fill_dev_list(self.registry.devices(Direction::Output), &mut update.output_devs);
        update.input_devs.clear();
        fill_dev_list(self.registry.devices(Direction::Input), &mut update.input_devs);

        update.output_nodes.clear();
        fill_node_list(self.registry.devices(Direction::Output), &mut update.output_nodes);
        update.input_nodes.clear();
        fill_node_list(self.registry.devices(Direction::Input), &mut update.input_nodes);

        update.selected_output = self.selected[Direction::Output.index()];
        update.selected_input = self.selected[Direction::Input.index()];
    }

    /// Route a new stream: a pinned stream to its target device, a default
    /// stream to every enabled device of its direction.
    pub fn add_stream(&mut self, stream: Arc<Stream>) -> Result<(), Error> {
        if self.streams.get(stream.id()).is_some() {
            return Err(Error::Duplicate);
        }
        self.streams.insert(Arc::clone(&stream));

        if let Some(dev_idx) = stream.pinned_dev() {
            let result = if self.registry.get(dev_idx).is_none() {
                Err(Error::Invalid)
            } else {
                self.init_device(dev_idx, &stream)
                    .and_then(|_| self.worker.add_stream(&stream, dev_idx))
            };
            if let Err(e) = result {
                self.streams.remove(stream.id());
                return Err(e);
            }
            return Ok(());
        }

        let enabled: Vec<u32> = self.enabled[stream.direction().index()]
            .iter()
            .map(|e| e.dev)
            .collect();
        for dev_idx in enabled {
            if let Err(e) = self.init_device(dev_idx, &stream) {
                log::error!("opening device {} for stream {}: {}", dev_idx, stream.id(), e);
                continue;
            }
            if let Err(e) = self.worker.add_stream(&stream, dev_idx) {
                log::error!("adding stream {} to worker: {}", stream.id(), e);
            }
        }
        Ok(())
    }

    /// Tear a stream down.
    ///
    /// Returns the milliseconds of audio the worker still has to drain. A
    /// nonzero value means nothing was changed yet; call again once the
    /// drain period passed. On zero the stream is gone and devices left
    /// without streams are closed (inputs) or scheduled for idle close
    /// (outputs).
    pub fn remove_stream(&mut self, stream_id: u32) -> Result<u32, Error> {
        let stream = match self.streams.get(stream_id) {
            Some(stream) => Arc::clone(stream),
            None => return Err(Error::NotFound),
        };

        let remaining_ms = self.worker.drain_stream(&stream);
        if remaining_ms > 0 {
            return Ok(remaining_ms);
        }

        self.streams.remove(stream_id);

        if let Some(dev_idx) = stream.pinned_dev() {
            if self.registry.get(dev_idx).is_some() && !self.dev_is_enabled(dev_idx) {
                self.close_dev(dev_idx);
            }
        }
        self.possibly_close_enabled_devs(stream.direction());
        Ok(0)
    }

    /// The idle-close timer handed out through the timer service fired;
    /// close expired devices and re-arm.
    pub fn idle_timer_fired(&mut self) {
        self.idle_timer = None;
        self.idle_dev_check();
    }

    /// Pick up a system-wide change from the shared state.
    pub fn system_event(&mut self, event: SystemEvent) {
        match event {
            SystemEvent::VolumeChanged => {
                let volume = self.state.volume();
                for dev in self.registry.devices_mut(Direction::Output) {
                    if dev.is_open() {
                        dev.driver_mut().set_volume(volume);
                    }
                }
            }
            SystemEvent::MuteChanged => {
                let mute = self.state.mute();
                for dev in self.registry.devices_mut(Direction::Output) {
                    if dev.is_open() {
                        dev.driver_mut().set_mute(mute);
                    }
                }
            }
            SystemEvent::CaptureGainChanged => {
                let gain = self.state.capture_gain();
                for dev in self.registry.devices_mut(Direction::Input) {
                    if dev.is_open() {
                        dev.driver_mut().set_capture_gain(gain);
                    }
                }
            }
            SystemEvent::CaptureMuteChanged => {
                let mute = self.state.capture_mute();
                for dev in self.registry.devices_mut(Direction::Input) {
                    if dev.is_open() {
                        dev.driver_mut().set_capture_mute(mute);
                    }
                }
            }
            SystemEvent::SuspendStateChanged => {
                if self.state.suspended() {
                    self.suspend_devs();
                } else {
                    self.resume_devs();
                }
            }
        }
    }

    /// Create a synthetic test device, returning its index.
    pub fn add_test_dev(&mut self, dev_type: TestDevType) -> Result<u32, Error> {
        let (dev, handle) = test_device(dev_type, self.timer.now());
        let idx = self.registry.add(dev)?;
        self.test_handles.insert(idx, handle);
        self.update_device_list();
        Ok(idx)
    }

    /// Deliver a command to a test device. Fails with `NotFound` for an
    /// unknown index and `Invalid` for a device that is not a test device.
    pub fn test_dev_command(&mut self, dev_idx: u32, command: TestDevCommand) -> Result<(), Error> {
        if self.registry.get(dev_idx).is_none() {
            return Err(Error::NotFound);
        }
        let handle = self.test_handles.get(&dev_idx).ok_or(Error::Invalid)?;
        handle.command(command);
        Ok(())
    }

    /// The worker handle, for host plumbing.
    pub fn audio_worker(&mut self) -> &mut dyn AudioWorker {
        &mut *self.worker
    }

    /// All streams currently routed.
    pub fn stream_list(&self) -> &StreamList {
        &self.streams
    }

    /// The shared state area this core publishes into.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// The enablement entries of a direction, in enable order.
    pub fn enabled_devices(&self, direction: Direction) -> Vec<EnabledDevInfo> {
        self.enabled[direction.index()]
            .iter()
            .map(|e| EnabledDevInfo {
                dev_idx: e.dev,
                for_pinned_streams: e.for_pinned_streams,
            })
            .collect()
    }

    fn dev_is_enabled(&self, dev_idx: u32) -> bool {
        self.enabled.iter().flatten().any(|e| e.dev == dev_idx)
    }

    fn dev_has_pinned_stream(&self, dev_idx: u32) -> bool {
        self.streams.iter().any(|s| s.pinned_dev() == Some(dev_idx))
    }

    fn possibly_disable_fallback(&mut self, direction: Direction) {
        let fallback = self.fallbacks[direction.index()];
        if self.dev_is_enabled(fallback) {
            self.disable_device(fallback);
        }
    }

    /// Append an enablement entry and attach the running default streams.
    fn enable_device(&mut self, dev_idx: u32) -> Result<(), Error> {
        let direction = match self.registry.get(dev_idx) {
            Some(dev) => dev.direction(),
            None => return Err(Error::NotFound),
        };
        if self.dev_is_enabled(dev_idx) {
            return Err(Error::Duplicate);
        }

        let list = &mut self.enabled[direction.index()];
        list.try_reserve(1).map_err(|_| Error::OutOfMemory)?;
        list.push(EnabledDev {
            dev: dev_idx,
            for_pinned_streams: false,
        });
        if let Some(dev) = self.registry.get_mut(dev_idx) {
            dev.set_active_flag(true);
        }

        let streams: Vec<Arc<Stream>> = self
            .streams
            .iter()
            .filter(|s| s.direction() == direction && !s.is_pinned())
            .cloned()
            .collect();
        for stream in streams {
            if let Err(e) = self.init_device(dev_idx, &stream) {
                log::error!("opening device {} for stream {}: {}", dev_idx, stream.id(), e);
                continue;
            }
            if let Err(e) = self.worker.add_stream(&stream, dev_idx) {
                log::error!("adding stream {} to worker: {}", stream.id(), e);
            }
        }
        Ok(())
    }

    /// Drop the enablement entry, pull the default streams off the device
    /// and close it.
    fn disable_device(&mut self, dev_idx: u32) {
        let direction = match self.registry.get(dev_idx) {
            Some(dev) => dev.direction(),
            None => return,
        };
        self.enabled[direction.index()].retain(|e| e.dev != dev_idx);
        if let Some(dev) = self.registry.get_mut(dev_idx) {
            dev.set_active_flag(false);
        }

        let streams: Vec<Arc<Stream>> = self
            .streams
            .iter()
            .filter(|s| s.direction() == direction && !s.is_pinned())
            .cloned()
            .collect();
        for stream in streams {
            self.worker.disconnect_stream(&stream, Some(dev_idx));
        }
        self.close_dev(dev_idx);
    }

    /// Make a device the representative of its direction: retire every
    /// other enabled device, refresh the active node, enable.
    fn set_active(&mut self, new_idx: u32) -> Result<(), Error> {
        let direction = match self.registry.get(new_idx) {
            Some(dev) => dev.direction(),
            None => return Err(Error::NotFound),
        };

        self.notify_active_node_changed();

        let others: Vec<u32> = self.enabled[direction.index()]
            .iter()
            .map(|e| e.dev)
            .filter(|&d| d != new_idx)
            .collect();
        for dev_idx in others {
            self.disable_device(dev_idx);
        }

        if let Some(dev) = self.registry.get_mut(new_idx) {
            dev.update_active_node();
        }

        if self.dev_is_enabled(new_idx) {
            return Ok(());
        }
        self.enable_device(new_idx)
    }

    /// Open a device for a stream and hand it to the worker.
    fn init_device(&mut self, dev_idx: u32, stream: &Stream) -> Result<(), Error> {
        {
            let dev = self.registry.get_mut(dev_idx).ok_or(Error::NotFound)?;
            dev.clear_idle_timeout();

            if dev.is_open() {
                return Ok(());
            }

            let format = match dev.format().copied() {
                Some(format) => format,
                None => {
                    let negotiated = dev.driver_mut().negotiate_format(stream.format())?;
                    dev.set_format(negotiated);
                    negotiated
                }
            };
            dev.driver_mut().open(&format)?;
            dev.set_cb_levels(stream.cb_threshold(), 0);
        }

        if let Err(e) = self.worker.add_open_dev(dev_idx) {
            if let Some(dev) = self.registry.get_mut(dev_idx) {
                dev.driver_mut().close();
                dev.clear_format();
            }
            return Err(e);
        }
        Ok(())
    }

    /// Close a device unless a pinned stream still needs it.
    fn close_dev(&mut self, dev_idx: u32) {
        let open = self
            .registry
            .get(dev_idx)
            .map(|d| d.is_open())
            .unwrap_or(false);
        if !open || self.dev_has_pinned_stream(dev_idx) {
            return;
        }

        self.worker.rm_open_dev(dev_idx);
        if let Some(dev) = self.registry.get_mut(dev_idx) {
            dev.clear_idle_timeout();
            dev.driver_mut().close();
            dev.clear_format();
        }
        self.idle_dev_check();
    }

    /// Sweep the enabled outputs: close the ones whose drain period passed,
    /// re-arm the timer for the next deadline.
    fn idle_dev_check(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            self.timer.cancel(timer);
        }

        let now = self.timer.now();
        let mut min_deadline: Option<Duration> = None;

        let enabled_outputs: Vec<u32> = self.enabled[Direction::Output.index()]
            .iter()
            .map(|e| e.dev)
            .collect();
        for dev_idx in enabled_outputs {
            let deadline = match self.registry.get(dev_idx).and_then(|d| d.idle_timeout()) {
                Some(deadline) => deadline,
                None => continue,
            };
            if now > deadline {
                self.worker.rm_open_dev(dev_idx);
                if let Some(dev) = self.registry.get_mut(dev_idx) {
                    dev.clear_idle_timeout();
                    dev.driver_mut().close();
                    dev.clear_format();
                }
                continue;
            }
            min_deadline = Some(match min_deadline {
                Some(m) => m.min(deadline),
                None => deadline,
            });
        }

        if let Some(deadline) = min_deadline {
            // wake when the next device is due, but not sooner than the floor
            let delay = (deadline - now).max(IDLE_TIMER_MIN);
            self.idle_timer = Some(self.timer.schedule(delay));
        }
    }

    /// Close devices of a direction that lost their last stream: inputs
    /// right away, outputs after the drain period.
    fn possibly_close_enabled_devs(&mut self, direction: Direction) {
        if self.streams.iter().any(|s| s.direction() == direction) {
            return;
        }

        let enabled: Vec<u32> = self.enabled[direction.index()]
            .iter()
            .map(|e| e.dev)
            .collect();
        for dev_idx in enabled {
            if self.dev_has_pinned_stream(dev_idx) {
                continue;
            }
            if direction == Direction::Input {
                self.close_dev(dev_idx);
                continue;
            }
            // outputs may still be playing audible samples
            let deadline = self.timer.now() + IDLE_TIMEOUT;
            if let Some(dev) = self.registry.get_mut(dev_idx) {
                if dev.is_open() {
                    dev.set_idle_timeout(deadline);
                }
            }
        }

        self.idle_dev_check();
    }

    fn suspend_devs(&mut self) {
        let streams: Vec<Arc<Stream>> = self.streams.iter().cloned().collect();
        for stream in streams {
            match stream.pinned_dev() {
                Some(dev_idx) => {
                    if self.registry.get(dev_idx).is_none() {
                        continue;
                    }
                    self.worker.disconnect_stream(&stream, Some(dev_idx));
                    if !self.dev_is_enabled(dev_idx) {
                        self.close_dev(dev_idx);
                    }
                }
                None => self.worker.disconnect_stream(&stream, None),
            }
        }

        for direction in [Direction::Output, Direction::Input] {
            let enabled: Vec<u32> = self.enabled[direction.index()]
                .iter()
                .map(|e| e.dev)
                .collect();
            for dev_idx in enabled {
                self.close_dev(dev_idx);
            }
        }
    }

    fn resume_devs(&mut self) {
        let streams: Vec<Arc<Stream>> = self.streams.iter().cloned().collect();
        for stream in streams {
            match stream.pinned_dev() {
                Some(dev_idx) => {
                    if self.registry.get(dev_idx).is_none() {
                        continue;
                    }
                    self.reattach(dev_idx, &stream);
                }
                None => {
                    let enabled: Vec<u32> = self.enabled[stream.direction().index()]
                        .iter()
                        .map(|e| e.dev)
                        .collect();
                    for dev_idx in enabled {
                        self.reattach(dev_idx, &stream);
                    }
                }
            }
        }
    }

    fn reattach(&mut self, dev_idx: u32, stream: &Arc<Stream>) {
        if let Err(e) = self.init_device(dev_idx, stream) {
            log::warn!("reopening device {} after resume: {}", dev_idx, e);
            return;
        }
        if let Err(e) = self.worker.add_stream(stream, dev_idx) {
            log::error!("adding stream {} to worker: {}", stream.id(), e);
        }
    }
}

fn is_special(dev_idx: u32) -> bool {
    dev_idx < MAX_SPECIAL_DEVICE_IDX
}

fn fill_dev_list(devs: &[Device], out: &mut ArrayVec<DeviceInfo, MAX_IODEVS>) {
    for dev in devs {
        if is_special(dev.index()) {
            continue;
        }
        if out.is_full() {
            return;
        }
        out.push(dev.info().clone());
    }
}

fn fill_node_list(devs: &[Device], out: &mut ArrayVec<NodeInfo, MAX_IONODES>) {
    for dev in devs {
        if is_special(dev.index()) {
            continue;
        }
        for node in dev.nodes() {
            if out.is_full() {
                return;
            }
            out.push(NodeInfo {
                dev_idx: dev.index(),
                node_idx: node.idx(),
                node_type: node.node_type(),
                name: node.name().to_string(),
                plugged: node.plugged(),
                plugged_time: node.plugged_time(),
                active: dev.is_active() && dev.active_node_idx() == Some(node.idx()),
                volume: node.volume(),
                capture_gain: node.capture_gain(),
                left_right_swapped: node.left_right_swapped(),
            });
        }
    }
}
