//! Hermetic test support.
//!
//! [`Emulator`] implements [`Transport`](crate::Transport) entirely in
//! memory, so the whole access layer can be exercised without a network or
//! a running service.

mod emulator;

pub use emulator::Emulator;
