//! Loading of optional native modules.
//!
//! A module that fails to load is repaired in two ways, one after the other:
//! a precompiled build matching the [`AbiTag`] of this process is unpacked
//! over the installed module, then the module is rebuilt in place.  After
//! every repair the module is loaded again.

mod abi;
mod dylib;
mod loader;

pub use self::abi::{abi_for_rustc, AbiTag};
pub use self::dylib::{DylibLoader, NativeLibrary};
pub use self::loader::{
    BuildCommand, LoadAttempt, LoadHandle, LoadOutcome, LoaderOptions, NativeModuleLoader,
    ResilientLoader, RetryMechanism,
};
