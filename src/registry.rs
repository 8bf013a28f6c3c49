//! The registry of known devices and their nodes
use crate::device::{Device, Node};
use crate::{Direction, Error, NodeId, MAX_SPECIAL_DEVICE_IDX};

/// All devices known to the server, per direction, newest first. Indices are
/// assigned from a monotonic counter and never reused.
pub struct Registry {
    devs: [Vec<Device>; 2],
    next_index: u32,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            devs: [Vec::new(), Vec::new()],
            next_index: MAX_SPECIAL_DEVICE_IDX,
        }
    }

    /// Register a device and assign its index.
    ///
    /// Fails with `Duplicate` when a device with the same nonzero stable id
    /// is already listed in either direction.
    pub fn add(&mut self, mut dev: Device) -> Result<u32, Error> {
        if dev.info().stable_id != 0 {
            let stable_id = dev.info().stable_id;
            let listed = self
                .devs
                .iter()
                .flatten()
                .any(|d| d.info().stable_id == stable_id);
            if listed {
                return Err(Error::Duplicate);
            }
        }

        // move to the next index and make sure it isn't taken
        let mut new_idx = self.next_index.max(MAX_SPECIAL_DEVICE_IDX);
        while self.index_in_use(new_idx) {
            new_idx += 1;
        }
        self.next_index = new_idx + 1;

        dev.set_index(new_idx);
        dev.clear_format();

        log::info!(
            "adding {} device at index {}",
            match dev.direction() {
                Direction::Output => "output",
                Direction::Input => "input",
            },
            new_idx
        );

        let list = &mut self.devs[dev.direction().index()];
        list.insert(0, dev);
        Ok(new_idx)
    }

    /// Install a synthetic device at a fixed reserved index.
    pub(crate) fn add_reserved(&mut self, mut dev: Device, idx: u32) {
        debug_assert!(idx != 0 && idx < MAX_SPECIAL_DEVICE_IDX);
        dev.set_index(idx);
        dev.clear_format();
        self.devs[dev.direction().index()].insert(0, dev);
    }

    /// Unregister a device. Fails with `Busy` while it is open and with
    /// `NotFound` when it is not listed.
    pub fn remove(&mut self, idx: u32) -> Result<Device, Error> {
        for list in self.devs.iter_mut() {
            if let Some(pos) = list.iter().position(|d| d.index() == idx) {
                if list[pos].is_open() {
                    return Err(Error::Busy);
                }
                log::info!("removing device at index {}", idx);
                return Ok(list.remove(pos));
            }
        }
        Err(Error::NotFound)
    }

    /// Look a device up by index, searching both directions.
    pub fn get(&self, idx: u32) -> Option<&Device> {
        self.devs.iter().flatten().find(|d| d.index() == idx)
    }

    pub fn get_mut(&mut self, idx: u32) -> Option<&mut Device> {
        self.devs
            .iter_mut()
            .flatten()
            .find(|d| d.index() == idx)
    }

    /// Resolve a composite node id to its device and node.
    pub fn find_node(&self, id: NodeId) -> Option<(&Device, &Node)> {
        let dev = self.get(id.device_index())?;
        let node = dev.node(id.node_index())?;
        Some((dev, node))
    }

    pub(crate) fn find_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.get_mut(id.device_index())?.node_mut(id.node_index())
    }

    /// Devices of one direction in list order (newest first).
    pub fn devices(&self, direction: Direction) -> &[Device] {
        &self.devs[direction.index()]
    }

    pub(crate) fn devices_mut(&mut self, direction: Direction) -> &mut [Device] {
        &mut self.devs[direction.index()]
    }

    pub fn len(&self, direction: Direction) -> usize {
        self.devs[direction.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.devs.iter().all(|l| l.is_empty())
    }

    pub(crate) fn clear(&mut self) {
        self.devs[0].clear();
        self.devs[1].clear();
    }

    fn index_in_use(&self, idx: u32) -> bool {
        self.devs.iter().flatten().any(|d| d.index() == idx)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceDriver, NodeType};
    use crate::stream::StreamFormat;
    use std::cell::Cell;
    use std::rc::Rc;

    struct FakeDriver {
        open: Rc<Cell<bool>>,
    }

    impl DeviceDriver for FakeDriver {
        fn open(&mut self, _format: &StreamFormat) -> Result<(), Error> {
            self.open.set(true);
            Ok(())
        }
        fn close(&mut self) {
            self.open.set(false);
        }
        fn is_open(&self) -> bool {
            self.open.get()
        }
    }

    fn device(direction: Direction, stable_id: u64) -> (Device, Rc<Cell<bool>>) {
        let open = Rc::new(Cell::new(false));
        let mut dev = Device::new(
            direction,
            "Fake",
            stable_id,
            Box::new(FakeDriver {
                open: Rc::clone(&open),
            }),
        );
        dev.add_node(Node::new(0, NodeType::Mic, "Mic"));
        (dev, open)
    }

    #[test]
    fn test_indices_monotonic_and_reserved() {
        let mut reg = Registry::new();
        let (d1, _) = device(Direction::Output, 10);
        let (d2, _) = device(Direction::Input, 11);

        let i1 = reg.add(d1).unwrap();
        let i2 = reg.add(d2).unwrap();
        assert!(i1 >= MAX_SPECIAL_DEVICE_IDX);
        assert!(i2 > i1);

        // removal does not recycle the index
        reg.remove(i1).unwrap();
        let (d3, _) = device(Direction::Output, 12);
        let i3 = reg.add(d3).unwrap();
        assert!(i3 > i2);
    }

    #[test]
    fn test_duplicate_stable_id() {
        let mut reg = Registry::new();
        let (d1, _) = device(Direction::Output, 42);
        let (d2, _) = device(Direction::Input, 42);

        reg.add(d1).unwrap();
        assert_eq!(reg.add(d2), Err(Error::Duplicate));
    }

    #[test]
    fn test_remove_busy_and_not_found() {
        let mut reg = Registry::new();
        let (dev, open) = device(Direction::Output, 1);
        let idx = reg.add(dev).unwrap();

        open.set(true);
        assert_eq!(reg.remove(idx).err(), Some(Error::Busy));
        assert!(reg.get(idx).is_some());

        open.set(false);
        reg.remove(idx).unwrap();
        assert_eq!(reg.remove(idx).err(), Some(Error::NotFound));
    }

    #[test]
    fn test_newest_first_order() {
        let mut reg = Registry::new();
        let (d1, _) = device(Direction::Output, 1);
        let (d2, _) = device(Direction::Output, 2);
        let i1 = reg.add(d1).unwrap();
        let i2 = reg.add(d2).unwrap();

        let order: Vec<u32> = reg
            .devices(Direction::Output)
            .iter()
            .map(|d| d.index())
            .collect();
        assert_eq!(order, vec![i2, i1]);
    }

    #[test]
    fn test_find_node() {
        let mut reg = Registry::new();
        let (dev, _) = device(Direction::Input, 5);
        let idx = reg.add(dev).unwrap();

        let (found_dev, found_node) = reg.find_node(NodeId::new(idx, 0)).unwrap();
        assert_eq!(found_dev.index(), idx);
        assert_eq!(found_node.idx(), 0);

        assert!(reg.find_node(NodeId::new(idx, 9)).is_none());
        assert!(reg.find_node(NodeId::new(9999, 0)).is_none());
    }
}
