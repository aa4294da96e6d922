//! IRP transport.
//!
//! An IRP is a typed request packet routed from the Pipeline Manager to
//! the driver process that owns the target device. The dispatcher parks
//! the initiator until the driver calls `io_complete_request`; each IRP
//! completes exactly once. A dying driver fails every IRP it was servicing
//! with `UNSUCCESSFUL`, and the driver supervisor restarts it out-of-band.

use std::collections::HashMap;

use vt_abi::{IrpMajor, Pid, Status, Value};

/// An I/O Request Packet.
#[derive(Debug, Clone)]
pub struct Irp {
    pub id: u64,
    /// Leaf device name under `\Device`.
    pub device: String,
    pub major: IrpMajor,
    /// The process on whose behalf the packet was built.
    pub sender: Pid,
    /// Typed per-major parameter bag.
    pub parameters: Value,
}

impl Irp {
    /// Wire shape handed to drivers.
    pub fn to_value(&self) -> Value {
        Value::map([
            ("nIrpId", Value::from(self.id)),
            ("sDeviceName", Value::from(self.device.as_str())),
            ("nMajorFunction", Value::from(self.major.number())),
            ("nSenderPid", Value::from(self.sender)),
            ("tParameters", self.parameters.clone()),
        ])
    }
}

/// In-flight completion slot.
#[derive(Debug, Clone)]
struct InFlight {
    /// Who parked awaiting completion.
    initiator: Pid,
    /// Driver the packet was dispatched to.
    driver: Pid,
}

/// In-flight IRP bookkeeping.
pub struct IrpTable {
    next_id: u64,
    in_flight: HashMap<u64, InFlight>,
}

impl IrpTable {
    pub fn new() -> IrpTable {
        IrpTable {
            next_id: 0,
            in_flight: HashMap::new(),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Allocate an IRP id and record its completion slot.
    pub fn dispatch(&mut self, initiator: Pid, driver: Pid) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.in_flight.insert(id, InFlight { initiator, driver });
        id
    }

    /// Complete an IRP. Returns the parked initiator when the packet was
    /// live and `completer` is the driver it was dispatched to.
    pub fn complete(&mut self, id: u64, completer: Pid) -> Result<Pid, Status> {
        match self.in_flight.get(&id) {
            Some(slot) if slot.driver == completer => {
                let slot = self.in_flight.remove(&id).expect("present");
                Ok(slot.initiator)
            }
            Some(_) => Err(Status::AccessDenied),
            None => Err(Status::InvalidParameter),
        }
    }

    /// Tear down every IRP touching a dead process. Returns the initiators
    /// to fail. Packets the dead process *initiated* are dropped silently;
    /// a late completion of one reads as an unknown id.
    pub fn fail_for_process(&mut self, pid: Pid) -> Vec<(Pid, Status)> {
        let mut failed = Vec::new();
        self.in_flight.retain(|_, slot| {
            if slot.driver == pid {
                failed.push((slot.initiator, Status::Unsuccessful));
                false
            } else {
                slot.initiator != pid
            }
        });
        failed
    }
}

impl Default for IrpTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_is_exactly_once() {
        let mut table = IrpTable::new();
        let id = table.dispatch(Pid(2), Pid(7));
        assert_eq!(table.complete(id, Pid(7)), Ok(Pid(2)));
        assert_eq!(table.complete(id, Pid(7)), Err(Status::InvalidParameter));
    }

    #[test]
    fn only_the_dispatched_driver_may_complete() {
        let mut table = IrpTable::new();
        let id = table.dispatch(Pid(2), Pid(7));
        assert_eq!(table.complete(id, Pid(8)), Err(Status::AccessDenied));
        assert_eq!(table.complete(id, Pid(7)), Ok(Pid(2)));
    }

    #[test]
    fn driver_death_fails_its_packets() {
        let mut table = IrpTable::new();
        let a = table.dispatch(Pid(2), Pid(7));
        let _b = table.dispatch(Pid(3), Pid(8));
        let failed = table.fail_for_process(Pid(7));
        assert_eq!(failed, vec![(Pid(2), Status::Unsuccessful)]);
        assert_eq!(table.in_flight_count(), 1);
        assert_eq!(table.complete(a, Pid(7)), Err(Status::InvalidParameter));
    }

    #[test]
    fn initiator_death_drops_its_packets() {
        let mut table = IrpTable::new();
        let id = table.dispatch(Pid(2), Pid(7));
        let failed = table.fail_for_process(Pid(2));
        assert!(failed.is_empty());
        assert_eq!(table.complete(id, Pid(7)), Err(Status::InvalidParameter));
    }

    #[test]
    fn irp_wire_shape() {
        let irp = Irp {
            id: 4,
            device: "null".into(),
            major: IrpMajor::Write,
            sender: Pid(9),
            parameters: Value::map([("vBuffer", Value::Bytes(b"x".to_vec()))]),
        };
        let wire = irp.to_value();
        assert_eq!(wire.get("sDeviceName").as_str(), Some("null"));
        assert_eq!(wire.get("nMajorFunction").as_int(), Some(3));
        assert_eq!(wire.get("nSenderPid").as_int(), Some(9));
    }
}
