pub mod controller;
pub mod loop_worker;
pub mod observer;
pub mod screen;
pub mod sink;

#[cfg(test)]
pub(crate) mod fakes;

pub use controller::SensingController;
pub use loop_worker::ProducerContext;
pub use observer::{ContextObserver, SystemObserver};
pub use screen::{ScreenCapturer, SystemScreenCapturer};
pub use sink::{EventSink, FanoutSink};
