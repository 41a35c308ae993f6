//! Device Output Abstraction Traits

/// Trait for the on/off output remote messages control (an LED on the dev kit)
pub trait DeviceOutput: Send {
    fn set(&mut self, on: bool);
}
