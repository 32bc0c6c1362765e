use std::path::Path;

use linux_embedded_hal::i2cdev::linux::LinuxI2CError;
use linux_embedded_hal::{Delay, I2cdev};

use crate::{Master, Options};

impl Master<I2cdev, Delay, LinuxI2CError> {
    /// Create a new master instance on a linux i2c character device
    pub fn linux<P: AsRef<Path>>(bus: P, options: Options) -> Result<Self, LinuxI2CError> {
        let path = bus.as_ref();

        // Open bus, the slave address is applied per transfer
        let bus = I2cdev::new(path)?;

        debug!("Opened {} for device 0x{:02X}", path.display(), options.address);

        Ok(Self::new(bus, Delay {}, options))
    }
}
