//! The synthetic silent device backing each direction
use crate::device::{Device, DeviceDriver, Node, NodeType};
use crate::stream::StreamFormat;
use crate::{Direction, Error};

use std::time::Duration;

/// Driver of the always-available silent device. Opening it never touches
/// hardware and never fails, so audio production and consumption can proceed
/// when no real device is present.
#[derive(Debug, Default)]
pub struct FallbackDriver {
    open: bool,
}

impl DeviceDriver for FallbackDriver {
    fn open(&mut self, _format: &StreamFormat) -> Result<(), Error> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Build the fallback device for a direction. The registry installs it at
/// its reserved index during init.
pub(crate) fn fallback_device(direction: Direction) -> Device {
    let name = match direction {
        Direction::Output => "Silent playback device",
        Direction::Input => "Silent capture device",
    };
    let mut dev = Device::new(direction, name, 0, Box::new(FallbackDriver::default()));
    dev.add_node(Node::new(0, NodeType::Unknown, "(default)").plugged_at(Duration::ZERO));
    dev.update_active_node();
    dev
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{SampleFormat, StreamFormat};

    #[test]
    fn test_fallback_open_close() {
        let mut dev = fallback_device(Direction::Output);
        assert!(!dev.is_open());

        let fmt = StreamFormat {
            sample_format: SampleFormat::S16Le,
            frame_rate: 48_000,
            num_channels: 2,
        };
        dev.driver_mut().open(&fmt).unwrap();
        assert!(dev.is_open());

        dev.driver_mut().close();
        assert!(!dev.is_open());
    }

    #[test]
    fn test_fallback_has_active_node() {
        let dev = fallback_device(Direction::Input);
        let node = dev.active_node().unwrap();
        assert_eq!(node.name(), "(default)");
        assert!(node.plugged());
    }
}
