//! Scripts compiled, stored, relocated and run end to end

use std::sync::Arc;

use freebutton_bytecode::{SymbolTable, prepare, relocate_for_storage};
use freebutton_compiler::compile;
use freebutton_vm::hal::HalResult;
use freebutton_vm::{
    ExecutableUnit, LedHardware, ManualClock, MemoryConsole, Runtime, RuntimeBuilder,
    SensorHardware, SensorInfo, VmError,
};
use parking_lot::Mutex;
use proptest::prelude::*;

#[derive(Default)]
struct RecordingLeds {
    calls: Mutex<Vec<(i32, u8, u8, u8)>>,
}

impl LedHardware for RecordingLeds {
    fn count(&self) -> i32 {
        8
    }

    fn set_color(&self, position: i32, r: u8, g: u8, b: u8) -> HalResult<()> {
        if position > 8 {
            return Err("no such LED".to_string());
        }
        self.calls.lock().push((position, r, g, b));
        Ok(())
    }
}

struct OneSensor;

impl SensorHardware for OneSensor {
    fn count(&self) -> i32 {
        1
    }

    fn value(&self, _id: i32) -> f32 {
        21.5
    }

    fn info(&self, id: i32) -> Option<SensorInfo> {
        (id == 0).then(|| SensorInfo {
            id: 0,
            name: "temp".to_string(),
            kind: "temperature".to_string(),
            unit: "C".to_string(),
            online: true,
        })
    }

    fn all_ids(&self) -> Vec<i32> {
        vec![0]
    }
}

struct Harness {
    runtime: Runtime,
    console: MemoryConsole,
    leds: Arc<RecordingLeds>,
    clock: ManualClock,
}

impl Harness {
    fn new() -> Self {
        Self::with(Runtime::builder())
    }

    fn with(builder: RuntimeBuilder) -> Self {
        let console = MemoryConsole::new();
        let leds = Arc::new(RecordingLeds::default());
        let clock = ManualClock::new(1_000);
        let runtime = builder
            .console(Arc::new(console.clone()))
            .leds(leds.clone())
            .clock(Arc::new(clock.clone()))
            .build();
        Self {
            runtime,
            console,
            leds,
            clock,
        }
    }

    fn load(&self, source: &str) -> Arc<ExecutableUnit> {
        let unit = compile(source, "test.js").unwrap();
        let container = prepare(&unit).unwrap();
        let symbols: &dyn SymbolTable = self.runtime.atoms().as_ref();
        let stored = relocate_for_storage(&container, 0, Some(symbols)).unwrap();
        self.runtime.load_copy(&stored.to_bytes().unwrap()).unwrap()
    }

    fn run(&mut self, source: &str) -> Result<(), VmError> {
        let unit = self.load(source);
        self.runtime.run(&unit).map(|_| ())
    }

    fn output(&self) -> Vec<String> {
        self.console.lines()
    }
}

#[test]
fn test_led_script_drives_hardware() {
    let mut h = Harness::new();
    let unit = h.load("led.on(1); led.off(2);");
    assert_eq!(unit.rom_table().len(), 3);
    h.runtime.run(&unit).unwrap();
    assert_eq!(*h.leds.calls.lock(), vec![(1, 255, 255, 255), (2, 0, 0, 0)]);
}

#[test]
fn test_led_driver_failure() {
    let mut h = Harness::new();
    let err = h.run("led.setColor(9, 1, 2, 3);").unwrap_err();
    assert_eq!(err, VmError::internal("failed to set LED 9 color"));
    let err = h.run("led.on();").unwrap_err();
    assert_eq!(err, VmError::type_error("led.on() requires position argument"));
}

#[test]
fn test_set_color_wraps_channels() {
    let mut h = Harness::new();
    h.run("led.setColor(3, 256, -1, 128);").unwrap();
    assert_eq!(*h.leds.calls.lock(), vec![(3, 0, 255, 128)]);
}

#[test]
fn test_print_formats_values() {
    let mut h = Harness::new();
    h.run(r#"print("sum", 1 + 2, true, null, 2.5, "a" + 1);"#).unwrap();
    assert_eq!(h.output(), ["sum 3 true null 2.5 a1"]);
}

#[test]
fn test_functions_and_loops() {
    let mut h = Harness::new();
    h.run(
        "
        function fib(n) {
            if (n < 2) return n;
            return fib(n - 1) + fib(n - 2);
        }
        let total = 0;
        for (let i = 0; i < 5; i++) {
            total = total + i;
        }
        print(fib(10), total);
        ",
    )
    .unwrap();
    assert_eq!(h.output(), ["55 10"]);
}

#[test]
fn test_string_and_operator_semantics() {
    let mut h = Harness::new();
    h.run(r#"print("abc".length, "abc"[1], typeof print, typeof 1, 7 % 3, 1 / 0, 1 == "1", 1 === "1");"#)
        .unwrap();
    assert_eq!(h.output(), ["3 b function number 1 Infinity true false"]);
}

#[test]
fn test_button_callbacks() {
    let mut h = Harness::new();
    h.run(
        r#"
        button.onClick(1, () => print("clicked"));
        button.onRelease(1, () => print("released"));
        "#,
    )
    .unwrap();

    assert!(h.runtime.dispatch_button_click(1).unwrap());
    assert!(!h.runtime.dispatch_button_click(2).unwrap());
    assert!(!h.runtime.dispatch_button_long_press(1).unwrap());
    assert!(h.runtime.dispatch_button_release(1).unwrap());
    assert!(!h.runtime.dispatch_button_click(0).unwrap());
    assert_eq!(h.output(), ["clicked", "released"]);
}

#[test]
fn test_button_argument_errors() {
    let mut h = Harness::new();
    let err = h.run("button.onClick(9, () => 1);").unwrap_err();
    assert_eq!(err, VmError::range_error("button position 9 out of range (1-8)"));

    let err = h.run("button.onLongPress(1, 5);").unwrap_err();
    assert_eq!(
        err,
        VmError::type_error("button.onLongPress() callback must be a function")
    );

    let err = h.run("button.onClick(1);").unwrap_err();
    assert_eq!(
        err,
        VmError::type_error("button.onClick() requires position and callback arguments")
    );
}

#[test]
fn test_callback_errors_reach_the_host() {
    let mut h = Harness::new();
    h.run("button.onClick(2, () => nothing());").unwrap();
    let err = h.runtime.dispatch_button_click(2).unwrap_err();
    assert_eq!(err, VmError::reference_error("nothing is not defined"));
}

#[test]
fn test_timers() {
    let mut h = Harness::new();
    h.run(r#"let id = setTimeout(() => print("tick"), 100); print(id);"#)
        .unwrap();
    assert_eq!(h.runtime.pending_timers(), 1);
    assert_eq!(h.runtime.process_timers().unwrap(), 100);

    h.clock.advance(100);
    assert_eq!(h.runtime.process_timers().unwrap(), 0);
    assert_eq!(h.runtime.process_timers().unwrap(), -1);
    assert_eq!(h.output(), ["0", "tick"]);
}

#[test]
fn test_cleared_timer_never_fires() {
    let mut h = Harness::new();
    h.run(r#"let t = setTimeout(() => print("late"), 5); clearTimeout(t);"#)
        .unwrap();
    h.clock.advance(10);
    assert_eq!(h.runtime.process_timers().unwrap(), -1);
    assert!(h.output().is_empty());
}

#[test]
fn test_too_many_timers() {
    let mut h = Harness::new();
    let err = h
        .run("for (let i = 0; i < 17; i++) { setTimeout(() => 0, 10); }")
        .unwrap_err();
    assert_eq!(err, VmError::internal("too many timers"));
    assert_eq!(h.runtime.pending_timers(), 16);
}

#[test]
fn test_date_and_performance() {
    let mut h = Harness::new();
    h.run("print(Date.now(), performance.now());").unwrap();
    assert_eq!(h.output(), ["1000 1000"]);
}

#[test]
fn test_runtime_errors() {
    let mut h = Harness::new();
    assert_eq!(
        h.run("missing();").unwrap_err(),
        VmError::reference_error("missing is not defined")
    );
    assert_eq!(
        h.run("undefined.foo;").unwrap_err(),
        VmError::type_error("Cannot read properties of undefined (reading 'foo')")
    );
    assert_eq!(
        h.run("let n = 1; n();").unwrap_err(),
        VmError::type_error("1 is not a function")
    );
    assert_eq!(
        h.run("function f() { return f(); } f();").unwrap_err(),
        VmError::StackOverflow
    );
}

#[test]
fn test_sensors() {
    let mut h = Harness::with(Runtime::builder().sensors(Arc::new(OneSensor)));
    h.run(
        r#"
        let all = sensor.getAll();
        print(sensor.count(), all.length, all[0].name, all[0].online, sensor.getType(0), sensor.getInfo(3));
        sensor.onChange(0, (v) => print("changed", v));
        "#,
    )
    .unwrap();
    assert!(h.runtime.dispatch_sensor_change(0, 22.5).unwrap());
    assert!(!h.runtime.dispatch_sensor_change(1, 1.0).unwrap());
    assert_eq!(h.output(), ["1 1 temp true temperature null", "changed 22.5"]);

    let err = h.run("sensor.onChange(8, () => 0);").unwrap_err();
    assert_eq!(err, VmError::range_error("sensor ID 8 out of range (0-7)"));
}

#[test]
fn test_mqtt_subscriptions() {
    let mut h = Harness::new();
    h.run(
        r#"
        mqtt.subscribe(0, "home/#", (t, p) => print(t, p));
        mqtt.onConnect(1, (id) => print("up", id));
        "#,
    )
    .unwrap();

    assert!(h.runtime.dispatch_mqtt_message(0, "home/door", "open").unwrap());
    assert!(!h.runtime.dispatch_mqtt_message(0, "garage/door", "open").unwrap());
    assert!(!h.runtime.dispatch_mqtt_message(1, "home/door", "open").unwrap());
    assert!(h.runtime.dispatch_mqtt_connect(1).unwrap());
    assert!(!h.runtime.dispatch_mqtt_disconnect(1).unwrap());
    assert_eq!(h.output(), ["home/door open", "up 1"]);

    h.run(r#"mqtt.unsubscribe(0, "home/#");"#).unwrap();
    assert!(!h.runtime.dispatch_mqtt_message(0, "home/door", "open").unwrap());
}

#[test]
fn test_mqtt_limits() {
    let mut h = Harness::new();
    let err = h
        .run(r#"for (let i = 0; i < 9; i++) { mqtt.subscribe(1, "t" + i, () => 0); }"#)
        .unwrap_err();
    assert_eq!(err, VmError::internal("too many MQTT subscriptions for broker 1"));

    let err = h.run(r#"mqtt.subscribe(2, "x", () => 0);"#).unwrap_err();
    assert_eq!(err, VmError::range_error("broker ID 2 out of range (0-1)"));
}

#[test]
fn test_host_functions() {
    let mut h = Harness::new();
    h.runtime
        .register_native("double", |_, args| Ok((args[0].to_number() * 2.0).into()));
    h.run("print(double(21));").unwrap();
    assert_eq!(h.output(), ["42"]);

    let double = h.runtime.global("double").unwrap();
    let result = h.runtime.call(&double, &[4.into()]).unwrap();
    assert_eq!(result.as_number(), Some(8.0));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_integer_arithmetic_matches(a in -1000i32..1000, b in 1i32..1000) {
        let mut h = Harness::new();
        h.run(&format!("print({a} + {b}, {a} - {b}, {a} * {b}, {a} < {b});")).unwrap();
        let expected = format!("{} {} {} {}", a + b, a - b, a * b, a < b);
        prop_assert_eq!(h.output(), vec![expected]);
    }
}
