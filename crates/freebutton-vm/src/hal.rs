//! Hardware abstraction
//!
//! Script bindings talk to the device only through these traits. The stub
//! implementations match a host build without hardware: eight LEDs that
//! accept any color, and no buttons, sensors or brokers.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Failure reported by a hardware driver
pub type HalResult<T> = Result<T, String>;

/// NeoPixel strip
pub trait LedHardware: Send + Sync {
    /// Number of addressable LEDs
    fn count(&self) -> i32;
    /// Set the color of the LED at `position`
    fn set_color(&self, position: i32, r: u8, g: u8, b: u8) -> HalResult<()>;
}

/// Physical buttons with labels
pub trait ButtonHardware: Send + Sync {
    /// Number of buttons
    fn count(&self) -> i32;
    /// Update the main label of the button at `position`
    fn set_label(&self, position: i32, text: &str) -> HalResult<()>;
    /// Update the top label of the button at `position`
    fn set_top_label(&self, position: i32, text: &str) -> HalResult<()>;
}

/// Static description of a sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SensorInfo {
    /// Sensor id
    pub id: i32,
    /// Display name
    pub name: String,
    /// Sensor type, e.g. "temperature"
    pub kind: String,
    /// Unit of the value
    pub unit: String,
    /// Whether the sensor currently reports
    pub online: bool,
}

/// Sensor bus
pub trait SensorHardware: Send + Sync {
    /// Number of sensors
    fn count(&self) -> i32;
    /// Current reading
    fn value(&self, id: i32) -> f32;
    /// Description of sensor `id`
    fn info(&self, id: i32) -> Option<SensorInfo>;
    /// Ids of every known sensor
    fn all_ids(&self) -> Vec<i32>;
}

/// MQTT client binding
pub trait MqttBinding: Send + Sync {
    /// Number of configured brokers
    fn broker_count(&self) -> i32;
    /// Display name of broker `id`
    fn broker_name(&self, id: i32) -> String;
    /// Whether broker `id` is connected
    fn is_connected(&self, id: i32) -> bool;
    /// Publish a message
    fn publish(&self, id: i32, topic: &str, payload: &str, qos: i32, retain: bool) -> HalResult<()>;
    /// Subscribe on the broker side
    fn subscribe(&self, id: i32, topic: &str, qos: i32) -> HalResult<()>;
    /// Unsubscribe on the broker side
    fn unsubscribe(&self, id: i32, topic: &str) -> HalResult<()>;
}

/// Eight LEDs that accept every color
#[derive(Debug, Default, Clone, Copy)]
pub struct StubLeds;

impl LedHardware for StubLeds {
    fn count(&self) -> i32 {
        8
    }

    fn set_color(&self, _position: i32, _r: u8, _g: u8, _b: u8) -> HalResult<()> {
        Ok(())
    }
}

/// No buttons
#[derive(Debug, Default, Clone, Copy)]
pub struct StubButtons;

impl ButtonHardware for StubButtons {
    fn count(&self) -> i32 {
        0
    }

    fn set_label(&self, _position: i32, _text: &str) -> HalResult<()> {
        Ok(())
    }

    fn set_top_label(&self, _position: i32, _text: &str) -> HalResult<()> {
        Ok(())
    }
}

/// No sensors
#[derive(Debug, Default, Clone, Copy)]
pub struct StubSensors;

impl SensorHardware for StubSensors {
    fn count(&self) -> i32 {
        0
    }

    fn value(&self, _id: i32) -> f32 {
        0.0
    }

    fn info(&self, _id: i32) -> Option<SensorInfo> {
        None
    }

    fn all_ids(&self) -> Vec<i32> {
        Vec::new()
    }
}

/// No brokers; publish and subscribe succeed without effect
#[derive(Debug, Default, Clone, Copy)]
pub struct StubMqtt;

impl MqttBinding for StubMqtt {
    fn broker_count(&self) -> i32 {
        0
    }

    fn broker_name(&self, _id: i32) -> String {
        String::new()
    }

    fn is_connected(&self, _id: i32) -> bool {
        false
    }

    fn publish(&self, _id: i32, _topic: &str, _payload: &str, _qos: i32, _retain: bool) -> HalResult<()> {
        Ok(())
    }

    fn subscribe(&self, _id: i32, _topic: &str, _qos: i32) -> HalResult<()> {
        Ok(())
    }

    fn unsubscribe(&self, _id: i32, _topic: &str) -> HalResult<()> {
        Ok(())
    }
}

/// Output sink for `print`
pub trait Console: Send + Sync {
    /// Write one line
    fn write_line(&self, line: &str);
}

/// Prints to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn write_line(&self, line: &str) {
        println!("{line}");
    }
}

/// Collects lines in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryConsole {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryConsole {
    /// Create an empty console
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl Console for MemoryConsole {
    fn write_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Time source for timers, `Date.now` and `performance.now`
pub trait Clock: Send + Sync {
    /// Monotonic milliseconds
    fn now_ms(&self) -> i64;
    /// Milliseconds since the Unix epoch
    fn epoch_ms(&self) -> i64;
}

/// Wall and monotonic clocks of the host
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        i64::try_from(self.start.elapsed().as_millis()).unwrap_or(i64::MAX)
    }

    fn epoch_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// Clock advanced by hand
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<i64>>,
}

impl ManualClock {
    /// Clock starting at `start` milliseconds
    pub fn new(start: i64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move time forward
    pub fn advance(&self, ms: i64) {
        *self.now.lock() += ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        *self.now.lock()
    }

    fn epoch_ms(&self) -> i64 {
        *self.now.lock()
    }
}
