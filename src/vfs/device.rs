//! The device driver plug-in point.
//!
//! Drivers register under a name in `/dev/` and service opens, reads,
//! writes, and control calls themselves. The router never permission-checks
//! `/dev/` paths; policy belongs to the driver.

use std::collections::VecDeque;
use std::sync::Arc;

use super::OpenMode;
use crate::syscall::error::{Error, Result};
use crate::syscall::Value;

pub trait DeviceDriver {
    /// Called on open with the path remainder after the device name.
    fn open(&self, rest: &str, mode: OpenMode) -> Result<()> {
        let _ = (rest, mode);
        Ok(())
    }

    fn read(&self, n: usize) -> Result<Vec<u8>>;

    fn write(&self, bytes: &[u8]) -> Result<usize>;

    fn device_control(&self, method: &str, args: &[Value]) -> Result<Value> {
        let _ = (method, args);
        Err(Error::DriverError(String::from("unsupported control method")))
    }
}

/// A device file body: the resolved driver plus the name it was opened as.
#[derive(Clone)]
pub struct DeviceFile {
    pub name: String,
    pub driver: Arc<dyn DeviceDriver>,
}

/// Reads empty, swallows writes.
pub struct NullDevice;

impl DeviceDriver for NullDevice {
    fn read(&self, _n: usize) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn write(&self, bytes: &[u8]) -> Result<usize> {
        Ok(bytes.len())
    }
}

/// A scriptable terminal: reads drain a queued input buffer, writes append
/// to an output transcript. Hosts feed input and collect output directly.
#[derive(Default)]
pub struct TtyDevice {
    input: spin::Mutex<VecDeque<u8>>,
    output: spin::Mutex<Vec<u8>>,
}

impl TtyDevice {
    pub fn new() -> TtyDevice {
        TtyDevice::default()
    }

    pub fn push_input(&self, bytes: &[u8]) {
        self.input.lock().extend(bytes.iter().copied());
    }

    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut self.output.lock())
    }
}

impl DeviceDriver for TtyDevice {
    fn read(&self, n: usize) -> Result<Vec<u8>> {
        let mut input = self.input.lock();
        let take = n.min(input.len());
        Ok(input.drain(..take).collect())
    }

    fn write(&self, bytes: &[u8]) -> Result<usize> {
        self.output.lock().extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn device_control(&self, method: &str, _args: &[Value]) -> Result<Value> {
        match method {
            "pending" => Ok(Value::Int(self.input.lock().len() as i64)),
            _ => Err(Error::DriverError(String::from("unsupported control method"))),
        }
    }
}
