/// Macro to implement `From<T>` in both directions for newtype wrappers around primitive types.
#[macro_export]
macro_rules! impl_from_primitive {
    ($wrapper:ident, $primitive:ty) => {
        impl From<$primitive> for $wrapper {
            fn from(value: $primitive) -> Self {
                Self(value)
            }
        }

        impl From<$wrapper> for $primitive {
            fn from(wrapper: $wrapper) -> Self {
                wrapper.0
            }
        }
    };
}

/// Macro to implement input validation helpers for `f64` newtypes fed by
/// external collaborators (ticks, account telemetry).
#[macro_export]
macro_rules! impl_finite_positive {
    ($wrapper:ident) => {
        impl $wrapper {
            /// Returns `true` if the wrapped value is finite and strictly positive.
            pub fn is_finite_positive(self) -> bool {
                self.0.is_finite() && self.0 > 0.0
            }

            /// Returns the wrapped value if it is finite and strictly positive.
            pub fn checked(self) -> Option<f64> {
                self.is_finite_positive().then_some(self.0)
            }
        }
    };
}
