//! `button` namespace

use super::{arg, callback_arg, namespace, require_args};
use crate::error::{VmError, VmResult};
use crate::runtime::Runtime;
use crate::value::Value;

/// Button positions are 1-based up to this limit
pub const MAX_BUTTONS: usize = 8;

#[derive(Default, Clone)]
struct Handlers {
    click: Option<Value>,
    long_press: Option<Value>,
    release: Option<Value>,
}

/// Per-button event handlers
#[derive(Default)]
pub(crate) struct ButtonCallbacks {
    slots: [Handlers; MAX_BUTTONS],
}

#[derive(Clone, Copy)]
enum Event {
    Click,
    LongPress,
    Release,
}

impl Event {
    fn api(self) -> &'static str {
        match self {
            Self::Click => "button.onClick",
            Self::LongPress => "button.onLongPress",
            Self::Release => "button.onRelease",
        }
    }
}

fn index(position: i32) -> Option<usize> {
    let position = usize::try_from(position).ok()?;
    (1..=MAX_BUTTONS).contains(&position).then(|| position - 1)
}

impl ButtonCallbacks {
    fn handler(&self, position: i32, event: Event) -> Option<Value> {
        let handlers = &self.slots[index(position)?];
        match event {
            Event::Click => handlers.click.clone(),
            Event::LongPress => handlers.long_press.clone(),
            Event::Release => handlers.release.clone(),
        }
    }

    fn set(&mut self, index: usize, event: Event, callback: Value) {
        let handlers = &mut self.slots[index];
        let slot = match event {
            Event::Click => &mut handlers.click,
            Event::LongPress => &mut handlers.long_press,
            Event::Release => &mut handlers.release,
        };
        *slot = Some(callback);
    }

    pub(crate) fn click(&self, position: i32) -> Option<Value> {
        self.handler(position, Event::Click)
    }

    pub(crate) fn long_press(&self, position: i32) -> Option<Value> {
        self.handler(position, Event::LongPress)
    }

    pub(crate) fn release(&self, position: i32) -> Option<Value> {
        self.handler(position, Event::Release)
    }
}

pub(super) fn install(runtime: &mut Runtime) {
    let button = namespace(&[
        ("count", count),
        ("setLabel", set_label),
        ("setTopLabel", set_top_label),
        ("onClick", on_click),
        ("onLongPress", on_long_press),
        ("onRelease", on_release),
    ]);
    runtime.set_global("button", button);
}

fn count(runtime: &mut Runtime, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::int32(runtime.hardware().buttons.count()))
}

fn set_label(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    require_args(args, 2, "button.setLabel() requires position and text arguments")?;
    let position = arg(args, 0).to_int32();
    let text = arg(args, 1).display_string();
    runtime
        .hardware()
        .buttons
        .set_label(position, &text)
        .map_err(|_| VmError::internal(format!("failed to set label for button {position}")))?;
    Ok(Value::Undefined)
}

fn set_top_label(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    require_args(args, 2, "button.setTopLabel() requires position and text arguments")?;
    let position = arg(args, 0).to_int32();
    let text = arg(args, 1).display_string();
    runtime
        .hardware()
        .buttons
        .set_top_label(position, &text)
        .map_err(|_| VmError::internal(format!("failed to set top label for button {position}")))?;
    Ok(Value::Undefined)
}

fn register(runtime: &mut Runtime, args: &[Value], event: Event) -> VmResult<Value> {
    let api = event.api();
    require_args(
        args,
        2,
        &format!("{api}() requires position and callback arguments"),
    )?;
    let position = arg(args, 0).to_int32();
    let callback = callback_arg(args, 1, api)?;
    let idx = index(position).ok_or_else(|| {
        VmError::range_error(format!(
            "button position {position} out of range (1-{MAX_BUTTONS})"
        ))
    })?;
    runtime.events.buttons.set(idx, event, callback);
    Ok(Value::Undefined)
}

fn on_click(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    register(runtime, args, Event::Click)
}

fn on_long_press(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    register(runtime, args, Event::LongPress)
}

fn on_release(runtime: &mut Runtime, args: &[Value]) -> VmResult<Value> {
    register(runtime, args, Event::Release)
}
