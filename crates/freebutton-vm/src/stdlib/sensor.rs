//! `sensor` namespace

use super::{arg, callback_arg, namespace, require_args};
use crate::error::{VmError, VmResult};
use crate::hal::SensorInfo;
use crate::runtime::Runtime;
use crate::value::{JsObject, Value};

/// Sensor ids run from 0 below this limit
pub const MAX_SENSORS: usize = 8;

/// Per-sensor change handlers
#[derive(Default)]
pub(crate) struct SensorCallbacks {
    change: [Option<Value>; MAX_SENSORS],
}

impl SensorCallbacks {
    pub(crate) fn change(&self, id: i32) -> Option<Value> {
        let idx = usize::try_from(id).ok()?;
        self.change.get(idx).cloned().flatten()
    }
}

pub(super) fn install(runtime: &mut Runtime) {
    let sensor = namespace(&[
        ("count", count),
        ("getValue", get_value),
        ("getType", get_type),
        ("getInfo", get_info),
        ("getAll", get_all),
        ("onChange", on_change),
    ]);
    runtime.set_global("sensor", sensor);
}

fn info_object(info: &SensorInfo) -> Value {
    Value::object(
        JsObject::new()
            .with("id", Value::int32(info.id))
            .with("name", Value::string(&info.name))
            .with("type", Value::string(&info.kind))
            .with("unit", Value::string(&info.unit))
            .with("online", Value::Boolean(info.online)),
    )
}

fn count(runtime: &mut Runtime, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::int32(runtime.hardware().sensors.count()))
}

fn get_value(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    require_args(args, 1, "sensor.getValue() requires sensorId argument")?;
    let value = runtime.hardware().sensors.value(arg(args, 0).to_int32());
    Ok(Value::Number(f64::from(value)))
}

fn get_type(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    require_args(args, 1, "sensor.getType() requires sensorId argument")?;
    Ok(runtime
        .hardware()
        .sensors
        .info(arg(args, 0).to_int32())
        .map_or(Value::Null, |info| Value::string(&info.kind)))
}

fn get_info(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    require_args(args, 1, "sensor.getInfo() requires sensorId argument")?;
    Ok(runtime
        .hardware()
        .sensors
        .info(arg(args, 0).to_int32())
        .map_or(Value::Null, |info| info_object(&info)))
}

fn get_all(runtime: &mut Runtime, _args: &[Value]) -> VmResult<Value> {
    let sensors = &runtime.hardware().sensors;
    let elements = sensors
        .all_ids()
        .into_iter()
        .take(MAX_SENSORS)
        .filter_map(|id| sensors.info(id))
        .map(|info| info_object(&info))
        .collect();
    Ok(Value::object(JsObject::array(elements)))
}

fn on_change(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    require_args(
        args,
        2,
        "sensor.onChange() requires sensorId and callback arguments",
    )?;
    let id = arg(args, 0).to_int32();
    let callback = callback_arg(args, 1, "sensor.onChange")?;
    let idx = usize::try_from(id)
        .ok()
        .filter(|&i| i < MAX_SENSORS)
        .ok_or_else(|| {
            VmError::range_error(format!(
                "sensor ID {id} out of range (0-{})",
                MAX_SENSORS - 1
            ))
        })?;
    runtime.events.sensors.change[idx] = Some(callback);
    Ok(Value::Undefined)
}
