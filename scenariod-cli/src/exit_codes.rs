//! Exit code constants for the scenario controller
//!
//! - 0: Every run succeeded, or the listing was printed
//! - 1: The sequence finished but some scenario runs failed
//! - 2: Bad arguments, configuration or selection, or proxy setup failed

/// Successful execution
pub const EXIT_SUCCESS: i32 = 0;

/// Some scenario runs failed
pub const EXIT_WARNING: i32 = 1;

/// Configuration, selection or setup errors
pub const EXIT_ERROR: i32 = 2;
