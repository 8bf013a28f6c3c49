//! Synthetic capture device used to exercise the hotword path
use std::sync::{Arc, Mutex};

use crate::device::{Device, DeviceDriver, Node, NodeType};
use crate::stream::StreamFormat;
use crate::{Direction, Error};

/// Kinds of synthetic test devices the control interface can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestDevType {
    /// A capture device with a single always-on-keyword node.
    Hotword,
}

/// Commands a test device understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestDevCommand {
    /// Simulate a detected keyword; `data` is the raw trigger payload.
    HotwordTrigger { data: Vec<u8> },
}

#[derive(Debug, Default)]
struct TestDevState {
    open: bool,
    triggers: Vec<Vec<u8>>,
}

/// Control handle paired with an installed [`TestDriver`]. The driver is
/// moved into the registry; the handle stays behind to deliver commands and
/// observe what the device received.
#[derive(Debug, Clone)]
pub struct TestDeviceHandle {
    state: Arc<Mutex<TestDevState>>,
}

impl TestDeviceHandle {
    pub(crate) fn command(&self, command: TestDevCommand) {
        match command {
            TestDevCommand::HotwordTrigger { data } => {
                let mut state = match self.state.lock() {
                    Ok(state) => state,
                    Err(_) => return,
                };
                if !state.open {
                    log::debug!("hotword trigger on closed test device ignored");
                    return;
                }
                state.triggers.push(data);
            }
        }
    }

    /// Trigger payloads delivered so far, oldest first.
    pub fn triggers(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .map(|state| state.triggers.clone())
            .unwrap_or_default()
    }
}

/// Driver of the synthetic hotword device.
#[derive(Debug)]
pub struct TestDriver {
    state: Arc<Mutex<TestDevState>>,
}

impl DeviceDriver for TestDriver {
    fn open(&mut self, _format: &StreamFormat) -> Result<(), Error> {
        if let Ok(mut state) = self.state.lock() {
            state.open = true;
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.state.lock().map(|state| state.open).unwrap_or(false)
    }
}

/// Build a test device plus its control handle.
pub(crate) fn test_device(dev_type: TestDevType, now: std::time::Duration) -> (Device, TestDeviceHandle) {
    let state = Arc::new(Mutex::new(TestDevState::default()));
    let handle = TestDeviceHandle {
        state: Arc::clone(&state),
    };

    let TestDevType::Hotword = dev_type;
    let mut dev = Device::new(
        Direction::Input,
        "Hotword test device",
        0,
        Box::new(TestDriver { state }),
    );
    dev.add_node(Node::new(0, NodeType::Aokr, "Hotword").plugged_at(now));
    dev.update_active_node();

    (dev, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SampleFormat;
    use std::time::Duration;

    fn hotword_format() -> StreamFormat {
        StreamFormat {
            sample_format: SampleFormat::S16Le,
            frame_rate: 16_000,
            num_channels: 1,
        }
    }

    #[test]
    fn test_trigger_only_while_open() {
        let (mut dev, handle) = test_device(TestDevType::Hotword, Duration::ZERO);

        handle.command(TestDevCommand::HotwordTrigger { data: vec![1] });
        assert!(handle.triggers().is_empty());

        dev.driver_mut().open(&hotword_format()).unwrap();
        handle.command(TestDevCommand::HotwordTrigger { data: vec![2, 3] });
        assert_eq!(handle.triggers(), vec![vec![2, 3]]);
    }

    #[test]
    fn test_hotword_node() {
        let (dev, _handle) = test_device(TestDevType::Hotword, Duration::ZERO);
        assert_eq!(dev.direction(), Direction::Input);
        let node = dev.active_node().unwrap();
        assert_eq!(node.node_type(), NodeType::Aokr);
    }
}
