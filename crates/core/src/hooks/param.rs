//! Typed parameter slots passed through hook callbacks
//!
//! Native arguments and return values are converted to [`Param`] so callbacks
//! can inspect and replace them without knowing the native signature.

use std::ffi::c_void;

/// Type of a parameter or return slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Void,
    Bool,
    Int,
    Float,
    Pointer,
}

impl ParamType {
    /// Value returned to the caller when nothing better is available
    pub fn zero(self) -> Param {
        match self {
            ParamType::Void => Param::Void,
            ParamType::Bool => Param::Bool(false),
            ParamType::Int => Param::Int(0),
            ParamType::Float => Param::Float(0.0),
            ParamType::Pointer => Param::Pointer(0),
        }
    }
}

/// A single argument or return value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param {
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    Pointer(usize),
}

impl Param {
    pub fn kind(&self) -> ParamType {
        match self {
            Param::Void => ParamType::Void,
            Param::Bool(_) => ParamType::Bool,
            Param::Int(_) => ParamType::Int,
            Param::Float(_) => ParamType::Float,
            Param::Pointer(_) => ParamType::Pointer,
        }
    }

    pub fn as_pointer(&self) -> Option<usize> {
        match self {
            Param::Pointer(v) => Some(*v),
            _ => None,
        }
    }
}

/// Ordered argument list of one intercepted call (excluding `this`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamBundle(Vec<Param>);

impl ParamBundle {
    pub fn new(params: Vec<Param>) -> Self {
        Self(params)
    }

    pub fn get(&self, index: usize) -> Option<Param> {
        self.0.get(index).copied()
    }

    /// Replace one argument, returning `false` if out of range
    pub fn set(&mut self, index: usize, value: Param) -> bool {
        match self.0.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Param> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every slot has the type the signature expects
    pub fn matches(&self, signature: &[ParamType]) -> bool {
        self.0.len() == signature.len()
            && self.0.iter().zip(signature).all(|(p, t)| p.kind() == *t)
    }
}

impl From<Vec<Param>> for ParamBundle {
    fn from(params: Vec<Param>) -> Self {
        Self(params)
    }
}

/// Conversion between a native argument type and [`Param`]
///
/// Implemented for the primitive types that appear in virtual function
/// signatures. `from_param` returns `None` when the slot has the wrong type or
/// the value does not fit.
pub trait HookArg: Sized {
    const TYPE: ParamType;

    fn into_param(self) -> Param;

    fn from_param(param: Param) -> Option<Self>;

    /// Value handed back to native code when conversion fails
    fn fallback() -> Self;
}

impl HookArg for () {
    const TYPE: ParamType = ParamType::Void;

    fn into_param(self) -> Param {
        Param::Void
    }

    fn from_param(param: Param) -> Option<Self> {
        matches!(param, Param::Void).then_some(())
    }

    fn fallback() -> Self {}
}

impl HookArg for bool {
    const TYPE: ParamType = ParamType::Bool;

    fn into_param(self) -> Param {
        Param::Bool(self)
    }

    fn from_param(param: Param) -> Option<Self> {
        match param {
            Param::Bool(v) => Some(v),
            _ => None,
        }
    }

    fn fallback() -> Self {
        false
    }
}

macro_rules! impl_int_arg {
    ($($ty:ty),*) => {
        $(
            impl HookArg for $ty {
                const TYPE: ParamType = ParamType::Int;

                fn into_param(self) -> Param {
                    Param::Int(self as i64)
                }

                fn from_param(param: Param) -> Option<Self> {
                    match param {
                        Param::Int(v) => <$ty>::try_from(v).ok(),
                        _ => None,
                    }
                }

                fn fallback() -> Self {
                    0
                }
            }
        )*
    };
}

impl_int_arg!(i8, u8, i16, u16, i32, u32, i64);

impl HookArg for f32 {
    const TYPE: ParamType = ParamType::Float;

    fn into_param(self) -> Param {
        Param::Float(self as f64)
    }

    fn from_param(param: Param) -> Option<Self> {
        match param {
            Param::Float(v) => Some(v as f32),
            _ => None,
        }
    }

    fn fallback() -> Self {
        0.0
    }
}

impl HookArg for f64 {
    const TYPE: ParamType = ParamType::Float;

    fn into_param(self) -> Param {
        Param::Float(self)
    }

    fn from_param(param: Param) -> Option<Self> {
        match param {
            Param::Float(v) => Some(v),
            _ => None,
        }
    }

    fn fallback() -> Self {
        0.0
    }
}

impl HookArg for *mut c_void {
    const TYPE: ParamType = ParamType::Pointer;

    fn into_param(self) -> Param {
        Param::Pointer(self as usize)
    }

    fn from_param(param: Param) -> Option<Self> {
        param.as_pointer().map(|p| p as *mut c_void)
    }

    fn fallback() -> Self {
        std::ptr::null_mut()
    }
}

impl HookArg for *const c_void {
    const TYPE: ParamType = ParamType::Pointer;

    fn into_param(self) -> Param {
        Param::Pointer(self as usize)
    }

    fn from_param(param: Param) -> Option<Self> {
        param.as_pointer().map(|p| p as *const c_void)
    }

    fn fallback() -> Self {
        std::ptr::null()
    }
}
