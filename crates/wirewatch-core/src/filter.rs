//! Capability predicates over typed devices
//!
//! New device roles get their own filter type; the parser and model only
//! ever see the [`DeviceFilter`] trait.

use crate::topology::{DeviceType, TypedDevice};

pub trait DeviceFilter {
    fn matches(&self, device: &TypedDevice) -> bool;
}

impl<F> DeviceFilter for F
where
    F: Fn(&TypedDevice) -> bool,
{
    fn matches(&self, device: &TypedDevice) -> bool {
        self(device)
    }
}

/// Switches (LEDs, relays)
#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchFilter;

impl DeviceFilter for SwitchFilter {
    fn matches(&self, device: &TypedDevice) -> bool {
        device.device_type == DeviceType::Switch
    }
}

/// Level sensors (push buttons, contact inputs read as levels)
#[derive(Debug, Clone, Copy, Default)]
pub struct LevelSensorFilter;

impl DeviceFilter for LevelSensorFilter {
    fn matches(&self, device: &TypedDevice) -> bool {
        device.device_type == DeviceType::LevelSensor
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HumidityFilter;

impl DeviceFilter for HumidityFilter {
    fn matches(&self, device: &TypedDevice) -> bool {
        device.device_type == DeviceType::HumiditySensor
    }
}

/// Matches a single declared type
#[derive(Debug, Clone, Copy)]
pub struct TypeFilter(pub DeviceType);

impl DeviceFilter for TypeFilter {
    fn matches(&self, device: &TypedDevice) -> bool {
        device.device_type == self.0
    }
}
