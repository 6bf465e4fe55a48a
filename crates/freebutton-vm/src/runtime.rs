//! Script runtime
//!
//! Owns globals, hardware bindings, registered callbacks and timers. Hosts
//! feed hardware events in through the `dispatch_*` methods and drive timers
//! with [`Runtime::process_timers`] from their main loop.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::atoms::AtomTable;
use crate::error::{VmError, VmResult};
use crate::hal::{
    ButtonHardware, Clock, Console, LedHardware, MqttBinding, SensorHardware, StdoutConsole,
    StubButtons, StubLeds, StubMqtt, StubSensors, SystemClock,
};
use crate::interpreter::{self, MAX_CALL_DEPTH};
use crate::stdlib::{self, EventCallbacks, TimerList, TimerPoll};
use crate::unit::{self, ExecutableUnit, UnitBuffer};
use crate::value::{Closure, Value};

/// Hardware drivers available to scripts
#[derive(Clone)]
pub struct Hardware {
    /// LED strip
    pub leds: Arc<dyn LedHardware>,
    /// Buttons
    pub buttons: Arc<dyn ButtonHardware>,
    /// Sensors
    pub sensors: Arc<dyn SensorHardware>,
    /// MQTT client
    pub mqtt: Arc<dyn MqttBinding>,
}

impl Default for Hardware {
    fn default() -> Self {
        Self {
            leds: Arc::new(StubLeds),
            buttons: Arc::new(StubButtons),
            sensors: Arc::new(StubSensors),
            mqtt: Arc::new(StubMqtt),
        }
    }
}

/// Builder for [`Runtime`]
pub struct RuntimeBuilder {
    atoms: Option<Arc<AtomTable>>,
    hardware: Hardware,
    console: Arc<dyn Console>,
    clock: Arc<dyn Clock>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Builder with stub hardware, stdout console and the system clock
    pub fn new() -> Self {
        Self {
            atoms: None,
            hardware: Hardware::default(),
            console: Arc::new(StdoutConsole),
            clock: Arc::new(SystemClock::default()),
        }
    }

    /// Atom table; defaults to [`AtomTable::standard`]
    pub fn atoms(mut self, atoms: Arc<AtomTable>) -> Self {
        self.atoms = Some(atoms);
        self
    }

    /// Replace all hardware drivers
    pub fn hardware(mut self, hardware: Hardware) -> Self {
        self.hardware = hardware;
        self
    }

    /// LED driver
    pub fn leds(mut self, leds: Arc<dyn LedHardware>) -> Self {
        self.hardware.leds = leds;
        self
    }

    /// Button driver
    pub fn buttons(mut self, buttons: Arc<dyn ButtonHardware>) -> Self {
        self.hardware.buttons = buttons;
        self
    }

    /// Sensor driver
    pub fn sensors(mut self, sensors: Arc<dyn SensorHardware>) -> Self {
        self.hardware.sensors = sensors;
        self
    }

    /// MQTT binding
    pub fn mqtt(mut self, mqtt: Arc<dyn MqttBinding>) -> Self {
        self.hardware.mqtt = mqtt;
        self
    }

    /// Output sink for `print`
    pub fn console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = console;
        self
    }

    /// Time source
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the runtime and install the standard library
    pub fn build(self) -> Runtime {
        let mut runtime = Runtime {
            globals: FxHashMap::default(),
            atoms: self.atoms.unwrap_or_else(|| Arc::new(AtomTable::standard())),
            hardware: self.hardware,
            console: self.console,
            clock: self.clock,
            events: EventCallbacks::default(),
            timers: TimerList::new(),
            depth: 0,
        };
        stdlib::install(&mut runtime);
        runtime
    }
}

/// A script runtime instance
pub struct Runtime {
    globals: FxHashMap<Arc<str>, Value>,
    atoms: Arc<AtomTable>,
    hardware: Hardware,
    console: Arc<dyn Console>,
    clock: Arc<dyn Clock>,
    pub(crate) events: EventCallbacks,
    pub(crate) timers: TimerList,
    depth: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Runtime with default drivers
    pub fn new() -> Self {
        RuntimeBuilder::new().build()
    }

    /// Start configuring a runtime
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Well-known atoms units are resolved against
    pub fn atoms(&self) -> &Arc<AtomTable> {
        &self.atoms
    }

    /// Hardware drivers
    pub fn hardware(&self) -> &Hardware {
        &self.hardware
    }

    /// Output sink
    pub fn console(&self) -> &Arc<dyn Console> {
        &self.console
    }

    /// Time source
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Read a global
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    /// Define or overwrite a global
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(Arc::from(name), value);
    }

    pub(crate) fn set_global_atom(&mut self, name: Arc<str>, value: Value) {
        self.globals.insert(name, value);
    }

    /// Register a host function as a global
    pub fn register_native<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&mut Runtime, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        self.set_global(name, Value::native(name, func));
    }

    /// Validate a buffer already relocated to where it resides
    pub fn load(&self, buffer: UnitBuffer) -> VmResult<Arc<ExecutableUnit>> {
        unit::load_bytecode(buffer, Arc::clone(&self.atoms))
    }

    /// Copy container bytes, relocate the copy and validate it
    pub fn load_copy(&self, bytes: &[u8]) -> VmResult<Arc<ExecutableUnit>> {
        unit::load_relocated(bytes, Arc::clone(&self.atoms)).map(|(unit, _)| unit)
    }

    /// Run the top-level function of `unit`
    pub fn run(&mut self, unit: &Arc<ExecutableUnit>) -> VmResult<Value> {
        let entry = Value::Function(Closure::new(Arc::clone(unit), unit.entry_offset()));
        self.call(&entry, &[])
    }

    /// Call a function value
    pub fn call(&mut self, function: &Value, args: &[Value]) -> VmResult<Value> {
        interpreter::call_value(self, function, args)
    }

    pub(crate) fn enter_call(&mut self) -> VmResult<()> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(VmError::StackOverflow);
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn exit_call(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn invoke(&mut self, callback: Option<Value>, args: &[Value]) -> VmResult<bool> {
        match callback {
            Some(callback) => self.call(&callback, args).map(|_| true),
            None => Ok(false),
        }
    }

    /// Button `position` (1-based) was clicked
    pub fn dispatch_button_click(&mut self, position: i32) -> VmResult<bool> {
        let callback = self.events.buttons.click(position);
        self.invoke(callback, &[])
    }

    /// Button `position` (1-based) was held
    pub fn dispatch_button_long_press(&mut self, position: i32) -> VmResult<bool> {
        let callback = self.events.buttons.long_press(position);
        self.invoke(callback, &[])
    }

    /// Button `position` (1-based) was released
    pub fn dispatch_button_release(&mut self, position: i32) -> VmResult<bool> {
        let callback = self.events.buttons.release(position);
        self.invoke(callback, &[])
    }

    /// Sensor `id` reported a new value
    pub fn dispatch_sensor_change(&mut self, id: i32, value: f32) -> VmResult<bool> {
        let callback = self.events.sensors.change(id);
        self.invoke(callback, &[Value::Number(f64::from(value))])
    }

    /// A message arrived on `broker`. Every matching subscription is called
    /// with `(topic, payload)`; the first failing callback stops delivery.
    pub fn dispatch_mqtt_message(&mut self, broker: i32, topic: &str, payload: &str) -> VmResult<bool> {
        let callbacks = self.events.mqtt.matching(broker, topic);
        let args = [Value::string(topic), Value::string(payload)];
        let delivered = !callbacks.is_empty();
        for callback in callbacks {
            self.call(&callback, &args)?;
        }
        Ok(delivered)
    }

    /// `broker` connected
    pub fn dispatch_mqtt_connect(&mut self, broker: i32) -> VmResult<bool> {
        let callback = self.events.mqtt.connect(broker);
        self.invoke(callback, &[Value::int32(broker)])
    }

    /// `broker` disconnected
    pub fn dispatch_mqtt_disconnect(&mut self, broker: i32) -> VmResult<bool> {
        let callback = self.events.mqtt.disconnect(broker);
        self.invoke(callback, &[Value::int32(broker)])
    }

    /// Run at most one expired timer.
    ///
    /// Returns milliseconds until the next timer is due (0 after running one,
    /// at most 1000), or -1 when no timer is pending.
    pub fn process_timers(&mut self) -> VmResult<i64> {
        let now = self.clock.now_ms();
        match self.timers.poll(now) {
            TimerPoll::Expired(callback) => {
                self.call(&callback, &[])?;
                Ok(0)
            }
            TimerPoll::Wait(delay) => Ok(delay),
            TimerPoll::Idle => Ok(-1),
        }
    }

    /// Number of timers waiting to fire
    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }
}
