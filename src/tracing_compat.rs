//! Compatibility shim over the `tracing` macros.
//!
//! With the `tracing` feature enabled the real macros are re-exported; without
//! it they expand to nothing, so scheduler internals can emit diagnostics
//! unconditionally while the default build stays dependency-light.

#[cfg(feature = "tracing")]
pub use tracing::{debug, error, trace, warn};

#[cfg(not(feature = "tracing"))]
mod noop {
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }
    #[allow(unused_macros)]
    macro_rules! warn_impl {
        ($($arg:tt)*) => {};
    }
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    #[allow(unused_imports)]
    pub(crate) use warn_impl as warn;
    #[allow(unused_imports)]
    pub(crate) use {debug, error, trace};
}

#[cfg(not(feature = "tracing"))]
#[allow(unused_imports)]
pub(crate) use noop::{debug, error, trace, warn};
