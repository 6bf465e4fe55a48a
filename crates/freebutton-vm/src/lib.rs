//! # FreeButton VM
//!
//! Executes relocated bytecode units on the device.
//!
//! - [`AtomTable`]: well-known names, resolved by index when a container is
//!   relocated for loading
//! - [`load_bytecode`]: validates a buffer whose pointers are valid where it resides
//! - [`Runtime`]: globals, hardware bindings, event callbacks and timers
//!
//! A unit holds its backing bytes for as long as any closure created from it
//! is alive, so a zero-copy mapping stays valid while callbacks remain registered.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod atoms;
pub mod error;
pub mod hal;
pub mod interpreter;
pub mod runtime;
pub mod stdlib;
pub mod unit;
pub mod value;

pub use atoms::{AtomTable, AtomTableBuilder, STDLIB_ATOMS};
pub use error::{VmError, VmResult};
pub use hal::{
    ButtonHardware, Clock, Console, LedHardware, ManualClock, MemoryConsole, MqttBinding,
    SensorHardware, SensorInfo, StdoutConsole, SystemClock,
};
pub use runtime::{Hardware, Runtime, RuntimeBuilder};
pub use unit::{ExecutableUnit, FunctionInfo, ResidentBytes, UnitBuffer, load_bytecode, load_relocated};
pub use value::{Closure, JsObject, NativeFunction, Value};
