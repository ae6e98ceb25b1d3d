//! Per-operation argument schemas.
//!
//! Every driver declares the operations it exposes as an [`OperationSet`] of
//! [`OperationSpec`]s. A device validates each incoming call against the
//! matching spec before the driver sees it, so drivers only ever receive a
//! [`CallArgs`] whose names and kinds are already checked.

use indexmap::IndexMap;

use crate::error::{Result, RigError};
use crate::value::{Arguments, Value, ValueKind};

// =============================================================================
// Parameters
// =============================================================================

/// One keyword parameter of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Keyword name.
    pub name: &'static str,
    /// Accepted value kind.
    pub kind: ValueKind,
    /// Whether the caller must supply it.
    pub required: bool,
}

impl Param {
    /// A parameter the caller must supply.
    pub const fn required(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    /// A parameter the caller may omit (or pass as `null`).
    pub const fn optional(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

// =============================================================================
// Operation Specs
// =============================================================================

/// Name, parameters and result kind of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSpec {
    /// Operation name as used in `init` steps.
    pub name: &'static str,
    /// Keyword parameters in declaration order.
    pub params: Vec<Param>,
    /// Kind of the value returned on success.
    pub returns: ValueKind,
}

impl OperationSpec {
    /// Operation with no parameters returning `Null`.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            params: Vec::new(),
            returns: ValueKind::Null,
        }
    }

    /// Add a required parameter.
    pub fn required(mut self, name: &'static str, kind: ValueKind) -> Self {
        self.params.push(Param::required(name, kind));
        self
    }

    /// Add an optional parameter.
    pub fn optional(mut self, name: &'static str, kind: ValueKind) -> Self {
        self.params.push(Param::optional(name, kind));
        self
    }

    /// Set the result kind.
    pub fn returns(mut self, kind: ValueKind) -> Self {
        self.returns = kind;
        self
    }

    /// Look up a declared parameter.
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Check `args` against this spec.
    ///
    /// Rejects unexpected names, values of the wrong kind and missing
    /// required parameters, in that order. `null` for an optional parameter
    /// is treated as absent.
    pub fn validate(&self, args: &Arguments) -> Result<CallArgs> {
        validate_params(self.name, &self.params, args)
    }
}

/// Validate `args` against a bare parameter list (used for constructor
/// arguments as well as operations).
pub fn validate_params(operation: &str, params: &[Param], args: &Arguments) -> Result<CallArgs> {
    let mut values = Arguments::new();

    for (name, value) in args {
        let Some(param) = params.iter().find(|p| p.name == name) else {
            return Err(RigError::invalid_argument(
                operation,
                name,
                "unexpected argument",
            ));
        };
        if value.is_null() && !param.required {
            continue;
        }
        if !param.kind.accepts(value) {
            return Err(RigError::invalid_argument(
                operation,
                name,
                format!("expected {}, got {}", param.kind, value.kind()),
            ));
        }
        values.insert(name.clone(), value.clone());
    }

    if let Some(missing) = params
        .iter()
        .find(|p| p.required && !values.contains_key(p.name))
    {
        return Err(RigError::invalid_argument(
            operation,
            missing.name,
            "missing required argument",
        ));
    }

    Ok(CallArgs {
        operation: operation.to_string(),
        values,
    })
}

// =============================================================================
// Operation Sets
// =============================================================================

/// Ordered collection of operation specs exposed by one driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationSet {
    specs: IndexMap<&'static str, OperationSpec>,
}

impl OperationSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, spec: OperationSpec) -> Self {
        self.insert(spec);
        self
    }

    /// Insert or replace a spec.
    pub fn insert(&mut self, spec: OperationSpec) {
        self.specs.insert(spec.name, spec);
    }

    /// Merge every spec of `other` into this set; `other` wins on conflicts.
    pub fn extend(mut self, other: OperationSet) -> Self {
        for (_, spec) in other.specs {
            self.insert(spec);
        }
        self
    }

    /// Spec for `name`.
    pub fn get(&self, name: &str) -> Option<&OperationSpec> {
        self.specs.get(name)
    }

    /// Whether `name` is exposed.
    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// Operation names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.specs.keys().copied()
    }

    /// Specs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &OperationSpec> {
        self.specs.values()
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// `true` when no operation is exposed.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Resolve `operation` and validate `args` against its spec.
    pub fn validate(&self, operation: &str, args: &Arguments) -> Result<CallArgs> {
        let spec = self
            .get(operation)
            .ok_or_else(|| RigError::UnknownOperation {
                operation: operation.to_string(),
            })?;
        spec.validate(args)
    }
}

// =============================================================================
// Validated Calls
// =============================================================================

/// A call whose arguments passed schema validation.
///
/// Accessors return `InvalidArgument` rather than panicking when a driver
/// asks for a name it did not declare.
#[derive(Debug, Clone, PartialEq)]
pub struct CallArgs {
    operation: String,
    values: Arguments,
}

impl CallArgs {
    /// A call without arguments (bypasses validation).
    pub fn empty(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            values: Arguments::new(),
        }
    }

    /// Operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Validated arguments.
    pub fn arguments(&self) -> &Arguments {
        &self.values
    }

    /// Raw value, if supplied.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    fn missing(&self, name: &str) -> RigError {
        RigError::invalid_argument(&self.operation, name, "missing required argument")
    }

    fn mistyped(&self, name: &str, kind: ValueKind) -> RigError {
        RigError::invalid_argument(&self.operation, name, format!("expected {}", kind))
    }

    /// Required float (integers widen).
    pub fn f64(&self, name: &str) -> Result<f64> {
        self.opt_f64(name)?.ok_or_else(|| self.missing(name))
    }

    /// Optional float.
    pub fn opt_f64(&self, name: &str) -> Result<Option<f64>> {
        self.get(name)
            .map(|v| v.as_f64().ok_or_else(|| self.mistyped(name, ValueKind::Float)))
            .transpose()
    }

    /// Required integer.
    pub fn i64(&self, name: &str) -> Result<i64> {
        self.opt_i64(name)?.ok_or_else(|| self.missing(name))
    }

    /// Optional integer.
    pub fn opt_i64(&self, name: &str) -> Result<Option<i64>> {
        self.get(name)
            .map(|v| v.as_i64().ok_or_else(|| self.mistyped(name, ValueKind::Int)))
            .transpose()
    }

    /// Required boolean.
    pub fn bool(&self, name: &str) -> Result<bool> {
        self.opt_bool(name)?.ok_or_else(|| self.missing(name))
    }

    /// Optional boolean.
    pub fn opt_bool(&self, name: &str) -> Result<Option<bool>> {
        self.get(name)
            .map(|v| v.as_bool().ok_or_else(|| self.mistyped(name, ValueKind::Bool)))
            .transpose()
    }

    /// Required string.
    pub fn str(&self, name: &str) -> Result<&str> {
        self.opt_str(name)?.ok_or_else(|| self.missing(name))
    }

    /// Optional string.
    pub fn opt_str(&self, name: &str) -> Result<Option<&str>> {
        self.get(name)
            .map(|v| v.as_str().ok_or_else(|| self.mistyped(name, ValueKind::Str)))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arguments;
    use crate::error::ErrorKind;

    fn supply_ops() -> OperationSet {
        OperationSet::new()
            .with(OperationSpec::new("set_voltage")
                .required("voltage", ValueKind::Float)
                .optional("channel", ValueKind::Int))
            .with(OperationSpec::new("off"))
    }

    #[test]
    fn test_validate_accepts_declared_arguments() {
        let call = supply_ops()
            .validate("set_voltage", &arguments! { "voltage" => 0 })
            .unwrap();
        assert_eq!(call.operation(), "set_voltage");
        assert_eq!(call.f64("voltage").unwrap(), 0.0);
        assert_eq!(call.opt_i64("channel").unwrap(), None);
    }

    #[test]
    fn test_unknown_operation() {
        let err = supply_ops().validate("explode", &Arguments::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownOperation);
    }

    #[test]
    fn test_missing_extra_and_mistyped_arguments() {
        let ops = supply_ops();

        let missing = ops.validate("set_voltage", &Arguments::new()).unwrap_err();
        assert_eq!(
            missing,
            RigError::invalid_argument("set_voltage", "voltage", "missing required argument")
        );

        let extra = ops.validate("off", &arguments! { "now" => true }).unwrap_err();
        assert_eq!(extra.kind(), ErrorKind::InvalidArgument);

        let mistyped = ops
            .validate("set_voltage", &arguments! { "voltage" => "high" })
            .unwrap_err();
        assert!(mistyped.to_string().contains("expected float, got string"));
    }

    #[test]
    fn test_null_optional_is_absent() {
        let call = supply_ops()
            .validate(
                "set_voltage",
                &arguments! { "voltage" => 1.5, "channel" => Value::Null },
            )
            .unwrap();
        assert!(call.get("channel").is_none());
    }

    #[test]
    fn test_extend_keeps_declaration_order() {
        let ops = supply_ops().extend(OperationSet::new().with(OperationSpec::new("reset")));
        let names: Vec<_> = ops.names().collect();
        assert_eq!(names, vec!["set_voltage", "off", "reset"]);
    }
}
