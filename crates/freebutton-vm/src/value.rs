//! JavaScript values
//!
//! The value model covers what scripts on the device can produce: primitives,
//! bytecode closures, host functions and the plain objects/arrays returned by
//! hardware bindings.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::VmResult;
use crate::runtime::Runtime;
use crate::unit::ExecutableUnit;

/// Signature of a host function
pub type NativeFn = Arc<dyn Fn(&mut Runtime, &[Value]) -> VmResult<Value> + Send + Sync>;

/// A JavaScript value
#[derive(Clone, Default)]
pub enum Value {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Boolean(bool),
    /// IEEE 754 number
    Number(f64),
    /// Immutable string
    String(Arc<str>),
    /// Function defined in a loaded unit
    Function(Closure),
    /// Host function
    Native(NativeFunction),
    /// Plain object or array
    Object(Arc<JsObject>),
}

/// A function block of a loaded unit
#[derive(Clone)]
pub struct Closure {
    /// Unit the function lives in; keeps its bytes alive
    pub unit: Arc<ExecutableUnit>,
    /// Data section offset of the Function block
    pub offset: u64,
}

impl Closure {
    /// Create a closure over the function at `offset`
    pub fn new(unit: Arc<ExecutableUnit>, offset: u64) -> Self {
        Self { unit, offset }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// A host function with its display name
#[derive(Clone)]
pub struct NativeFunction {
    /// Name shown when printed
    pub name: Arc<str>,
    /// Implementation
    pub func: NativeFn,
}

impl NativeFunction {
    /// Wrap a closure as a host function
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut Runtime, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// Plain object: named properties plus, for arrays, dense elements
#[derive(Debug, Clone, Default)]
pub struct JsObject {
    properties: FxHashMap<Arc<str>, Value>,
    elements: Vec<Value>,
    is_array: bool,
}

impl JsObject {
    /// Empty object
    pub fn new() -> Self {
        Self::default()
    }

    /// Array holding `elements`
    pub fn array(elements: Vec<Value>) -> Self {
        Self {
            properties: FxHashMap::default(),
            elements,
            is_array: true,
        }
    }

    /// Builder-style property setter
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.set(key, value);
        self
    }

    /// Set a named property
    pub fn set(&mut self, key: &str, value: Value) {
        self.properties.insert(Arc::from(key), value);
    }

    /// Look up a property; arrays also answer `length` and numeric keys
    pub fn get(&self, key: &str) -> Option<Value> {
        if self.is_array {
            if key == "length" {
                return Some(Value::Number(self.elements.len() as f64));
            }
            if let Ok(index) = key.parse::<usize>() {
                return self.elements.get(index).cloned();
            }
        }
        self.properties.get(key).cloned()
    }

    /// Whether this object is an array
    pub fn is_array(&self) -> bool {
        self.is_array
    }

    /// Array elements (empty for plain objects)
    pub fn elements(&self) -> &[Value] {
        &self.elements
    }
}

impl Value {
    /// Create a number value
    #[inline]
    pub fn number(n: f64) -> Self {
        Self::Number(n)
    }

    /// Create a number from an i32
    #[inline]
    pub fn int32(n: i32) -> Self {
        Self::Number(f64::from(n))
    }

    /// Create a string value
    pub fn string(s: &str) -> Self {
        Self::String(Arc::from(s))
    }

    /// Create an object value
    pub fn object(obj: JsObject) -> Self {
        Self::Object(Arc::new(obj))
    }

    /// Create a host function value
    pub fn native<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut Runtime, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        Self::Native(NativeFunction::new(name, func))
    }

    /// Check if undefined
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Check if null or undefined
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Check if callable
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_) | Self::Native(_))
    }

    /// Get as number without conversion
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as string without conversion
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as object
    pub fn as_object(&self) -> Option<&Arc<JsObject>> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Truthiness
    pub fn to_boolean(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Boolean(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Function(_) | Self::Native(_) | Self::Object(_) => true,
        }
    }

    /// Numeric conversion
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Boolean(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::String(s) => string_to_number(s),
            Self::Function(_) | Self::Native(_) | Self::Object(_) => f64::NAN,
        }
    }

    /// ToInt32: wraps modulo 2^32, NaN and infinities become 0
    pub fn to_int32(&self) -> i32 {
        let n = self.to_number();
        if !n.is_finite() {
            return 0;
        }
        let wrapped = n.trunc().rem_euclid(4_294_967_296.0);
        wrapped as u32 as i32
    }

    /// `typeof` result
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Function(_) | Self::Native(_) => "function",
            Self::Object(_) => "object",
        }
    }

    /// String conversion used by `print` and `+`
    pub fn display_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Number(n) => number_to_string(*n),
            Self::String(s) => s.to_string(),
            Self::Function(closure) => match closure.unit.function_name(closure.offset) {
                Some(name) => format!("function {name}() {{ [bytecode] }}"),
                None => "function () { [bytecode] }".to_string(),
            },
            Self::Native(native) => format!("function {}() {{ [native code] }}", native.name),
            Self::Object(obj) if obj.is_array() => obj
                .elements()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.display_string() })
                .collect::<Vec<_>>()
                .join(","),
            Self::Object(_) => "[object Object]".to_string(),
        }
    }

    /// Name used in "is not a function" style messages
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::String(s) => format!("\"{s}\""),
            other => other.display_string(),
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => {
                Arc::ptr_eq(&a.unit, &b.unit) && a.offset == b.offset
            }
            (Self::Native(a), Self::Native(b)) => Arc::ptr_eq(&a.func, &b.func),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Self::Number(_), Self::String(_))
            | (Self::String(_), Self::Number(_))
            | (Self::Boolean(_), _)
            | (_, Self::Boolean(_)) => {
                if matches!(self, Self::Object(_)) || matches!(other, Self::Object(_)) {
                    return false;
                }
                self.to_number() == other.to_number()
            }
            _ => self.strict_equals(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", number_to_string(*n)),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Function(c) => c.fmt(f),
            Self::Native(n) => n.fmt(f),
            Self::Object(o) => o.fmt(f),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_string())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::int32(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
    }
    // Rust also accepts "inf" and "nan" spellings
    if trimmed.bytes().any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E') {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// Number to string, JavaScript style for the common cases
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let s = if n > 0.0 { "Infinity" } else { "-Infinity" };
        s.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

/// `+`: concatenation when either side is not a primitive number-like value
pub(crate) fn add(lhs: &Value, rhs: &Value) -> Value {
    let concat = |v: &Value| {
        matches!(
            v,
            Value::String(_) | Value::Object(_) | Value::Function(_) | Value::Native(_)
        )
    };
    if concat(lhs) || concat(rhs) {
        let mut s = lhs.display_string();
        s.push_str(&rhs.display_string());
        Value::String(Arc::from(s))
    } else {
        Value::Number(lhs.to_number() + rhs.to_number())
    }
}

/// Relational comparison; `None` when either side is NaN
pub(crate) fn compare(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => lhs.to_number().partial_cmp(&rhs.to_number()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_display() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(2.5), "2.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::string(" 42 ").to_number(), 42.0);
        assert_eq!(Value::string("").to_number(), 0.0);
        assert!(Value::string("inf").to_number().is_nan());
        assert_eq!(Value::string("0x10").to_number(), 16.0);
        assert_eq!(Value::Null.to_number(), 0.0);
        assert!(Value::Undefined.to_number().is_nan());
        assert_eq!(Value::number(4_294_967_297.0).to_int32(), 1);
        assert_eq!(Value::number(-1.5).to_int32(), -1);
        assert_eq!(Value::number(f64::NAN).to_int32(), 0);
    }

    #[test]
    fn test_add_and_compare() {
        assert_eq!(add(&Value::int32(1), &Value::int32(2)), Value::int32(3));
        assert_eq!(add(&Value::string("a"), &Value::int32(1)), Value::string("a1"));
        assert_eq!(add(&Value::Boolean(true), &Value::Null), Value::int32(1));
        assert_eq!(
            compare(&Value::string("b"), &Value::string("a")),
            Some(std::cmp::Ordering::Greater)
        );
        assert_eq!(compare(&Value::Undefined, &Value::int32(1)), None);
    }

    #[test]
    fn test_equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::string("1").loose_equals(&Value::int32(1)));
        assert!(Value::Boolean(true).loose_equals(&Value::int32(1)));
        assert!(!Value::number(f64::NAN).strict_equals(&Value::number(f64::NAN)));

        let obj = Value::object(JsObject::new());
        assert!(obj.strict_equals(&obj.clone()));
        assert!(!obj.strict_equals(&Value::object(JsObject::new())));
    }

    #[test]
    fn test_array_object() {
        let arr = JsObject::array(vec![Value::int32(1), Value::Null, Value::string("x")]);
        assert_eq!(arr.get("length"), Some(Value::int32(3)));
        assert_eq!(arr.get("2"), Some(Value::string("x")));
        assert_eq!(arr.get("3"), None);
        assert_eq!(Value::object(arr).display_string(), "1,,x");
    }
}
