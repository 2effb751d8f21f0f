//! Builtin argument binding.
//!
//! A builtin call arrives as a [`Value`]: a list binds positionally in
//! declaration order, a dict binds by name, and `None` is an empty call.
//! Binding fails on the first unknown, duplicated, missing or mistyped
//! argument.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgsError {
    #[error("arguments must be a list or a dict, got {0}")]
    Malformed(&'static str),

    #[error("accepts at most {max} positional arguments ({got} given)")]
    TooManyPositional { max: usize, got: usize },

    #[error("unexpected keyword argument {0:?}")]
    UnknownKeyword(String),

    #[error("got multiple values for parameter {0:?}")]
    Duplicate(String),

    #[error("missing argument for {0}")]
    Missing(&'static str),

    #[error("for parameter {param}: got {got}, want {expected}")]
    TypeMismatch {
        param: &'static str,
        expected: &'static str,
        got: &'static str,
    },
}

/// One declared parameter of a builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub required: bool,
}

impl Param {
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            required: true,
        }
    }

    pub const fn optional(name: &'static str) -> Self {
        Self {
            name,
            required: false,
        }
    }
}

/// Raw call arguments before binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub named: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn from_value(value: Value) -> Result<Self, ArgsError> {
        match value {
            Value::None => Ok(Self::default()),
            Value::List(positional) => Ok(Self {
                positional,
                named: BTreeMap::new(),
            }),
            Value::Dict(named) => Ok(Self {
                positional: Vec::new(),
                named,
            }),
            other => Err(ArgsError::Malformed(other.type_name())),
        }
    }

    /// Bind against `params`.
    pub fn bind(self, params: &'static [Param]) -> Result<BoundArgs, ArgsError> {
        if self.positional.len() > params.len() {
            return Err(ArgsError::TooManyPositional {
                max: params.len(),
                got: self.positional.len(),
            });
        }

        let mut slots: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, value) in slots.iter_mut().zip(self.positional) {
            *slot = Some(value);
        }

        for (name, value) in self.named {
            let idx = params
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| ArgsError::UnknownKeyword(name.clone()))?;
            if slots[idx].is_some() {
                return Err(ArgsError::Duplicate(name));
            }
            slots[idx] = Some(value);
        }

        for (param, slot) in params.iter().zip(&slots) {
            if param.required && slot.is_none() {
                return Err(ArgsError::Missing(param.name));
            }
        }

        Ok(BoundArgs { params, slots })
    }
}

/// Arguments bound to a builtin's parameter list.
#[derive(Debug)]
pub struct BoundArgs {
    params: &'static [Param],
    slots: Vec<Option<Value>>,
}

impl BoundArgs {
    fn slot(&self, name: &'static str) -> (&'static str, Option<&Value>) {
        let idx = self.params.iter().position(|p| p.name == name);
        let value = idx
            .and_then(|i| self.slots[i].as_ref())
            // An explicit `None` for an optional parameter means "not given".
            .filter(|v| !v.is_none());
        (name, value)
    }

    /// An optional string argument.
    pub fn string(&self, name: &'static str) -> Result<Option<&str>, ArgsError> {
        match self.slot(name) {
            (_, None) => Ok(None),
            (_, Some(Value::String(s))) => Ok(Some(s)),
            (param, Some(other)) => Err(ArgsError::TypeMismatch {
                param,
                expected: "string",
                got: other.type_name(),
            }),
        }
    }

    /// A required string argument.
    pub fn required_string(&self, name: &'static str) -> Result<&str, ArgsError> {
        match self.slot(name) {
            (_, Some(Value::String(s))) => Ok(s),
            (param, other) => Err(ArgsError::TypeMismatch {
                param,
                expected: "string",
                got: other.map_or("NoneType", Value::type_name),
            }),
        }
    }

    /// An optional bool argument.
    pub fn bool(&self, name: &'static str) -> Result<Option<bool>, ArgsError> {
        match self.slot(name) {
            (_, None) => Ok(None),
            (_, Some(Value::Bool(b))) => Ok(Some(*b)),
            (param, Some(other)) => Err(ArgsError::TypeMismatch {
                param,
                expected: "bool",
                got: other.type_name(),
            }),
        }
    }
}
