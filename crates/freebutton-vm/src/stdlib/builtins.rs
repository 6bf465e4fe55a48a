//! `print`, `gc`, `Date` and `performance`

use super::namespace;
use crate::error::VmResult;
use crate::runtime::Runtime;
use crate::value::Value;

pub(super) fn install(runtime: &mut Runtime) {
    runtime.register_native("print", print);
    runtime.register_native("gc", gc);
    runtime.set_global("Date", namespace(&[("now", date_now)]));
    runtime.set_global("performance", namespace(&[("now", performance_now)]));
}

fn print(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    let line = args
        .iter()
        .map(Value::display_string)
        .collect::<Vec<_>>()
        .join(" ");
    runtime.console().write_line(&line);
    Ok(Value::Undefined)
}

// Values are reference counted; nothing to collect.
fn gc(_runtime: &mut Runtime, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::Undefined)
}

fn date_now(runtime: &mut Runtime, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::Number(runtime.clock().epoch_ms() as f64))
}

fn performance_now(runtime: &mut Runtime, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::Number(runtime.clock().now_ms() as f64))
}
