//! Dynamically typed argument and return values.
//!
//! Configuration documents carry keyword arguments as JSON/TOML scalars, so a
//! call reaches a driver as an ordered [`Arguments`] map of [`Value`]s. The
//! driver's operation schema decides which [`ValueKind`] each argument must
//! have before the call is dispatched.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered keyword-argument map (insertion order is preserved).
pub type Arguments = IndexMap<String, Value>;

/// Build an [`Arguments`] map from `name => value` pairs.
///
/// ```
/// use labrig_core::{arguments, Value};
///
/// let args = arguments! { "voltage" => 12.5, "channel" => 2 };
/// assert_eq!(args["channel"], Value::Int(2));
/// ```
#[macro_export]
macro_rules! arguments {
    () => {
        $crate::Arguments::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut args = $crate::Arguments::new();
        $(args.insert(::std::string::String::from($name), $crate::Value::from($value));)+
        args
    }};
}

/// A single argument or return value.
///
/// `List` only appears as a return value (e.g. both load levels of a sink or
/// a drained error queue); operation schemas never accept it as an argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// No value (`null`, or an operation without a result).
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Text.
    Str(String),
    /// Sequence of values.
    List(Vec<Value>),
}

/// Kind tag of a [`Value`], used by operation schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// `Value::Null`
    Null,
    /// `Value::Bool`
    Bool,
    /// `Value::Int`
    Int,
    /// `Value::Float` (also accepts `Value::Int`)
    Float,
    /// `Value::Str`
    Str,
    /// `Value::List`
    List,
}

impl ValueKind {
    /// Whether a value of this kind may be passed where `self` is declared.
    ///
    /// Integers widen to floats; every other kind must match exactly.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ValueKind::Null, Value::Null)
                | (ValueKind::Bool, Value::Bool(_))
                | (ValueKind::Int, Value::Int(_))
                | (ValueKind::Float, Value::Float(_) | Value::Int(_))
                | (ValueKind::Str, Value::Str(_))
                | (ValueKind::List, Value::List(_))
        )
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "string",
            ValueKind::List => "list",
        };
        write!(f, "{}", label)
    }
}

impl Value {
    /// Kind tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::List(_) => ValueKind::List,
        }
    }

    /// `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer payload.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric payload, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// String payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// List payload.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Convert to `kind` where [`ValueKind::accepts`] allows it without
    /// being exact (integers into floats). Anything else is returned as is.
    pub fn widen_to(self, kind: ValueKind) -> Value {
        match (kind, self) {
            (ValueKind::Float, Value::Int(i)) => Value::Float(i as f64),
            (_, value) => value,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Render an argument map as `name=value, ...` for logs and traces.
pub fn format_arguments(args: &Arguments) -> String {
    args.iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_accepts_integer() {
        assert!(ValueKind::Float.accepts(&Value::Int(0)));
        assert!(ValueKind::Float.accepts(&Value::Float(1.5)));
        assert!(!ValueKind::Int.accepts(&Value::Float(1.5)));
        assert!(!ValueKind::Bool.accepts(&Value::Int(1)));
        assert!(!ValueKind::Str.accepts(&Value::Null));
    }

    #[test]
    fn test_widen_to_only_promotes_integers_to_float() {
        assert_eq!(Value::Int(0).widen_to(ValueKind::Float), Value::Float(0.0));
        assert_eq!(Value::Int(3).widen_to(ValueKind::Int), Value::Int(3));
        assert_eq!(Value::Bool(true).widen_to(ValueKind::Float), Value::Bool(true));
        assert_eq!(Value::Float(1.5).widen_to(ValueKind::Float), Value::Float(1.5));
    }

    #[test]
    fn test_arguments_macro_preserves_order() {
        let args = arguments! { "voltage" => 0, "channel" => 3, "state" => true };
        let names: Vec<&str> = args.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["voltage", "channel", "state"]);
        assert_eq!(format_arguments(&args), "voltage=0, channel=3, state=true");
    }

    #[test]
    fn test_display_quotes_strings() {
        let value = Value::List(vec![Value::from("CC"), Value::from(2)]);
        assert_eq!(value.to_string(), "[\"CC\", 2]");
    }
}
