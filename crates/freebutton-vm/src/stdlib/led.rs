//! `led` namespace

use super::{arg, namespace, require_args};
use crate::error::{VmError, VmResult};
use crate::runtime::Runtime;
use crate::value::Value;

pub(super) fn install(runtime: &mut Runtime) {
    let led = namespace(&[
        ("count", count),
        ("on", on),
        ("off", off),
        ("setColor", set_color),
    ]);
    runtime.set_global("led", led);
}

fn count(runtime: &mut Runtime, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::int32(runtime.hardware().leds.count()))
}

fn fill(runtime: &Runtime, position: i32, rgb: (u8, u8, u8)) -> VmResult<()> {
    runtime
        .hardware()
        .leds
        .set_color(position, rgb.0, rgb.1, rgb.2)
        .map_err(|reason| {
            tracing::debug!(position, %reason, "LED driver rejected color");
            VmError::internal(format!("failed to set LED {position}"))
        })
}

fn on(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    require_args(args, 1, "led.on() requires position argument")?;
    fill(runtime, arg(args, 0).to_int32(), (255, 255, 255))?;
    Ok(Value::Undefined)
}

fn off(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    require_args(args, 1, "led.off() requires position argument")?;
    fill(runtime, arg(args, 0).to_int32(), (0, 0, 0))?;
    Ok(Value::Undefined)
}

fn set_color(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    require_args(args, 4, "led.setColor() requires position, r, g, b arguments")?;
    let position = arg(args, 0).to_int32();
    // Channels wrap like a C cast to uint8_t
    let channel = |i: usize| arg(args, i).to_int32() as u8;
    runtime
        .hardware()
        .leds
        .set_color(position, channel(1), channel(2), channel(3))
        .map_err(|_| VmError::internal(format!("failed to set LED {position} color")))?;
    Ok(Value::Undefined)
}
