//! Script-facing standard library
//!
//! `print`, `gc`, timers, `Date.now`, `performance.now` and the hardware
//! namespaces `led`, `button`, `sensor` and `mqtt`. Loader functions (`load`,
//! `loadMapped`, `loadUserBytecode`) need storage and are registered by the
//! embedding engine.

mod builtins;
mod button;
mod led;
mod mqtt;
mod sensor;
mod timers;

pub use button::MAX_BUTTONS;
pub use mqtt::{MAX_BROKERS, MAX_SUBSCRIPTIONS_PER_BROKER, topic_matches};
pub use sensor::MAX_SENSORS;
pub use timers::MAX_TIMERS;

pub(crate) use timers::{TimerList, TimerPoll};

use crate::error::{VmError, VmResult};
use crate::runtime::Runtime;
use crate::value::{JsObject, Value};

/// Callbacks registered by scripts for hardware events
#[derive(Default)]
pub(crate) struct EventCallbacks {
    pub(crate) buttons: button::ButtonCallbacks,
    pub(crate) sensors: sensor::SensorCallbacks,
    pub(crate) mqtt: mqtt::MqttCallbacks,
}

/// Install every global of the standard library
pub fn install(runtime: &mut Runtime) {
    builtins::install(runtime);
    timers::install(runtime);
    led::install(runtime);
    button::install(runtime);
    sensor::install(runtime);
    mqtt::install(runtime);
}

/// Argument `i`, or `undefined`
fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

/// Fail with `message` unless at least `n` arguments were passed
fn require_args(args: &[Value], n: usize, message: &str) -> VmResult<()> {
    if args.len() < n {
        return Err(VmError::type_error(message));
    }
    Ok(())
}

/// Argument `i`, which must be callable
fn callback_arg(args: &[Value], i: usize, api: &str) -> VmResult<Value> {
    let callback = arg(args, i);
    if !callback.is_callable() {
        return Err(VmError::type_error(format!("{api}() callback must be a function")));
    }
    Ok(callback)
}

type Method = fn(&mut Runtime, &[Value]) -> VmResult<Value>;

/// Object whose properties are host functions
fn namespace(methods: &[(&str, Method)]) -> Value {
    let obj = methods.iter().fold(JsObject::new(), |obj, &(name, method)| {
        obj.with(name, Value::native(name, method))
    });
    Value::object(obj)
}
