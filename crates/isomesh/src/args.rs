//! Positional arguments.
//!
//! Calls travel as an ordered list of dynamic values. These traits bridge that
//! list and Rust tuples, so `("world",)` can be sent and `(String,)` received.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::error::Result;
use crate::types::Type;
use crate::types::Typed;
use crate::types::Value;

/// Converts a value into positional call arguments.
pub trait IntoArgs {
    fn into_args(self) -> Result<Vec<Value>>;
}

/// Rebuilds a value from positional call arguments.
pub trait FromArgs: Sized {
    fn from_args(args: Vec<Value>) -> Result<Self>;
}

/// Describes the parameter list a tuple stands for.
pub trait ParamTypes {
    fn param_types() -> Vec<Type>;
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Result<Vec<Value>> {
        Ok(self)
    }
}

impl FromArgs for Vec<Value> {
    fn from_args(args: Vec<Value>) -> Result<Self> {
        Ok(args)
    }
}

/// Generates the three argument traits for a tuple of the given arity.
/// Arguments: the arity, then one type parameter name per element.
macro_rules! tuple_args {
    ($len:expr; $($name:ident),*) => {
        impl<$($name: Serialize),*> IntoArgs for ($($name,)*) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Result<Vec<Value>> {
                let ($($name,)*) = self;
                Ok(vec![$(serde_json::to_value($name)?),*])
            }
        }

        impl<$($name: DeserializeOwned),*> FromArgs for ($($name,)*) {
            #[allow(unused_mut, unused_variables)]
            fn from_args(args: Vec<Value>) -> Result<Self> {
                if args.len() != $len {
                    return Err(Error::Codec(format!(
                        "expected {} arguments, got {}", $len, args.len()
                    )));
                }
                let mut iter = args.into_iter();
                Ok(($(serde_json::from_value::<$name>(iter.next().unwrap_or_default())?,)*))
            }
        }

        impl<$($name: Typed),*> ParamTypes for ($($name,)*) {
            fn param_types() -> Vec<Type> {
                vec![$(<$name as Typed>::ty()),*]
            }
        }
    };
}

tuple_args!(0;);
tuple_args!(1; A);
tuple_args!(2; A, B);
tuple_args!(3; A, B, C);
tuple_args!(4; A, B, C, D);
tuple_args!(5; A, B, C, D, E);
tuple_args!(6; A, B, C, D, E, F);
tuple_args!(7; A, B, C, D, E, F, G);
tuple_args!(8; A, B, C, D, E, F, G, H);

/// Converts a handler's return value into a dynamic value.
pub(crate) fn to_value<R: Serialize>(value: R) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Converts a dynamic result back into the caller's expected type.
pub(crate) fn from_value<R: DeserializeOwned>(value: Value) -> Result<R> {
    Ok(serde_json::from_value(value)?)
}
