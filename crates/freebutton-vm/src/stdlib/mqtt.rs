//! `mqtt` namespace

use super::{arg, callback_arg, namespace, require_args};
use crate::error::{VmError, VmResult};
use crate::runtime::Runtime;
use crate::value::Value;

/// Brokers scripts may address
pub const MAX_BROKERS: usize = 2;

/// Topic subscriptions per broker
pub const MAX_SUBSCRIPTIONS_PER_BROKER: usize = 8;

struct Subscription {
    topic: String,
    callback: Value,
}

#[derive(Default)]
struct Broker {
    subscriptions: Vec<Subscription>,
    connect: Option<Value>,
    disconnect: Option<Value>,
}

/// Per-broker subscriptions and connection handlers
#[derive(Default)]
pub(crate) struct MqttCallbacks {
    brokers: [Broker; MAX_BROKERS],
}

/// Whether a message on `topic` is delivered to a subscription on `filter`.
///
/// A trailing `#` matches any suffix; a `/` right before it is not required.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if filter == topic {
        return true;
    }
    match filter.strip_suffix('#') {
        Some(prefix) => {
            let prefix = prefix.strip_suffix('/').unwrap_or(prefix);
            topic.starts_with(prefix)
        }
        None => false,
    }
}

impl MqttCallbacks {
    fn broker(&self, id: i32) -> Option<&Broker> {
        self.brokers.get(usize::try_from(id).ok()?)
    }

    /// Callbacks of every subscription matching `topic`, in subscription order
    pub(crate) fn matching(&self, broker: i32, topic: &str) -> Vec<Value> {
        self.broker(broker)
            .map(|b| {
                b.subscriptions
                    .iter()
                    .filter(|s| topic_matches(&s.topic, topic))
                    .map(|s| s.callback.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn connect(&self, broker: i32) -> Option<Value> {
        self.broker(broker)?.connect.clone()
    }

    pub(crate) fn disconnect(&self, broker: i32) -> Option<Value> {
        self.broker(broker)?.disconnect.clone()
    }
}

pub(super) fn install(runtime: &mut Runtime) {
    let mqtt = namespace(&[
        ("getBrokerCount", get_broker_count),
        ("getBrokerName", get_broker_name),
        ("isConnected", is_connected),
        ("publish", publish),
        ("subscribe", subscribe),
        ("unsubscribe", unsubscribe),
        ("onConnect", on_connect),
        ("onDisconnect", on_disconnect),
    ]);
    runtime.set_global("mqtt", mqtt);
}

fn broker_index(id: i32) -> VmResult<usize> {
    usize::try_from(id)
        .ok()
        .filter(|&i| i < MAX_BROKERS)
        .ok_or_else(|| {
            VmError::range_error(format!(
                "broker ID {id} out of range (0-{})",
                MAX_BROKERS - 1
            ))
        })
}

fn get_broker_count(runtime: &mut Runtime, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::int32(runtime.hardware().mqtt.broker_count()))
}

fn get_broker_name(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    require_args(args, 1, "mqtt.getBrokerName() requires brokerId argument")?;
    let name = runtime.hardware().mqtt.broker_name(arg(args, 0).to_int32());
    Ok(Value::string(&name))
}

fn is_connected(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    require_args(args, 1, "mqtt.isConnected() requires brokerId argument")?;
    Ok(Value::Boolean(
        runtime.hardware().mqtt.is_connected(arg(args, 0).to_int32()),
    ))
}

fn publish(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    require_args(
        args,
        3,
        "mqtt.publish() requires brokerId, topic, and payload arguments",
    )?;
    let broker = arg(args, 0).to_int32();
    let topic = arg(args, 1).display_string();
    let payload = arg(args, 2).display_string();
    let qos = args.get(3).map_or(0, Value::to_int32);
    let retain = args.get(4).is_some_and(|v| v.to_int32() != 0);
    runtime
        .hardware()
        .mqtt
        .publish(broker, &topic, &payload, qos, retain)
        .map_err(|_| VmError::internal("failed to publish MQTT message"))?;
    Ok(Value::Undefined)
}

fn subscribe(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    require_args(
        args,
        3,
        "mqtt.subscribe() requires brokerId, topic, and callback arguments",
    )?;
    let id = arg(args, 0).to_int32();
    let topic = arg(args, 1).display_string();
    let callback = callback_arg(args, 2, "mqtt.subscribe")?;
    let qos = args.get(3).map_or(0, Value::to_int32);
    let idx = broker_index(id)?;

    let broker = &mut runtime.events.mqtt.brokers[idx];
    if let Some(existing) = broker.subscriptions.iter_mut().find(|s| s.topic == topic) {
        existing.callback = callback;
        tracing::debug!(broker = id, %topic, "updated MQTT subscription");
        return Ok(Value::Undefined);
    }
    if broker.subscriptions.len() >= MAX_SUBSCRIPTIONS_PER_BROKER {
        return Err(VmError::internal(format!(
            "too many MQTT subscriptions for broker {id}"
        )));
    }
    broker.subscriptions.push(Subscription {
        topic: topic.clone(),
        callback,
    });

    let mqtt = std::sync::Arc::clone(&runtime.hardware().mqtt);
    if mqtt.subscribe(id, &topic, qos).is_err() {
        runtime.events.mqtt.brokers[idx]
            .subscriptions
            .retain(|s| s.topic != topic);
        return Err(VmError::internal("failed to subscribe to MQTT topic"));
    }
    tracing::debug!(broker = id, %topic, "subscribed to MQTT topic");
    Ok(Value::Undefined)
}

fn unsubscribe(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    require_args(
        args,
        2,
        "mqtt.unsubscribe() requires brokerId and topic arguments",
    )?;
    let id = arg(args, 0).to_int32();
    let topic = arg(args, 1).display_string();
    if let Some(broker) = usize::try_from(id)
        .ok()
        .and_then(|i| runtime.events.mqtt.brokers.get_mut(i))
    {
        broker.subscriptions.retain(|s| s.topic != topic);
    }
    runtime
        .hardware()
        .mqtt
        .unsubscribe(id, &topic)
        .map_err(|_| VmError::internal("failed to unsubscribe from MQTT topic"))?;
    Ok(Value::Undefined)
}

fn on_connection_event(runtime: &mut Runtime, args: &[Value], connect: bool) -> VmResult<Value> {
    let api = if connect { "mqtt.onConnect" } else { "mqtt.onDisconnect" };
    require_args(
        args,
        2,
        &format!("{api}() requires brokerId and callback arguments"),
    )?;
    let id = arg(args, 0).to_int32();
    let callback = callback_arg(args, 1, api)?;
    let broker = &mut runtime.events.mqtt.brokers[broker_index(id)?];
    if connect {
        broker.connect = Some(callback);
    } else {
        broker.disconnect = Some(callback);
    }
    Ok(Value::Undefined)
}

fn on_connect(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    on_connection_event(runtime, args, true)
}

fn on_disconnect(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    on_connection_event(runtime, args, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("home/door", "home/door"));
        assert!(!topic_matches("home/door", "home/window"));
        assert!(topic_matches("home/#", "home/door"));
        assert!(topic_matches("home/#", "home"));
        assert!(topic_matches("#", "anything"));
        assert!(!topic_matches("home/#", "garage/door"));
    }
}
