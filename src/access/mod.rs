mod controller;
mod state;
#[cfg(test)]
mod tests;

pub use controller::AccessController;
pub use state::{LockState, LockStatus};
