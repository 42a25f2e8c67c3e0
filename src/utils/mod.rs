pub mod logging;

pub use logging::WarnOnce;
