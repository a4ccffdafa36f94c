//! Linux Industrial I/O sysfs backends.
//!
//! The kernel drivers for the MCP3008 ADC and the DHT22 sensor both expose
//! plain text attributes under `/sys/bus/iio/devices/iio:deviceN/`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use super::hardware::{AnalogInput, ClimateSample, ClimateSensor, SensorError};

const TEMPERATURE_ATTR: &str = "in_temp_input";
const HUMIDITY_ATTR: &str = "in_humidityrelative_input";

pub struct IioAdcChannel {
    channel: u8,
    path: PathBuf,
}

impl IioAdcChannel {
    pub fn open(device_dir: &Path, channel: u8) -> Result<Self> {
        let path = device_dir.join(format!("in_voltage{channel}_raw"));
        if !path.is_file() {
            bail!("{} does not exist", path.display());
        }
        Ok(Self { channel, path })
    }
}

impl AnalogInput for IioAdcChannel {
    fn read_raw(&mut self) -> Result<u32, SensorError> {
        let raw = read_attr(&self.path)?;
        raw.parse::<u32>()
            .map_err(|_| SensorError::Transient(format!("unparsable ADC code '{raw}'")))
    }

    fn label(&self) -> String {
        format!("adc channel {}", self.channel)
    }
}

pub struct IioClimateSensor {
    device_dir: PathBuf,
    has_humidity: bool,
}

impl IioClimateSensor {
    pub fn open(device_dir: &Path) -> Result<Self> {
        if !device_dir.join(TEMPERATURE_ATTR).is_file() {
            bail!(
                "{} has no {TEMPERATURE_ATTR} attribute",
                device_dir.display()
            );
        }
        Ok(Self {
            device_dir: device_dir.to_path_buf(),
            has_humidity: device_dir.join(HUMIDITY_ATTR).is_file(),
        })
    }

    fn read_milli(&self, attr: &str) -> Result<f64, SensorError> {
        let raw = read_attr(&self.device_dir.join(attr))?;
        let milli: i64 = raw
            .parse()
            .map_err(|_| SensorError::Transient(format!("unparsable {attr} value '{raw}'")))?;
        Ok(milli as f64 / 1000.0)
    }
}

impl ClimateSensor for IioClimateSensor {
    fn read(&mut self) -> Result<ClimateSample, SensorError> {
        let temperature = self.read_milli(TEMPERATURE_ATTR)?;
        let humidity = if self.has_humidity {
            Some(self.read_milli(HUMIDITY_ATTR)?)
        } else {
            None
        };
        Ok(ClimateSample {
            temperature,
            humidity,
        })
    }

    fn label(&self) -> String {
        format!("climate sensor {}", self.device_dir.display())
    }
}

/// Reads one sysfs attribute. A vanished device is unrecoverable; anything
/// else (the DHT22 driver returns EIO on checksum errors) is retried.
fn read_attr(path: &Path) -> Result<String, SensorError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().to_string()),
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
            Err(SensorError::Unavailable(format!("{}: {err}", path.display())))
        }
        Err(err) => Err(SensorError::Transient(format!("{}: {err}", path.display()))),
    }
}
