pub mod subscriber;

pub use subscriber::{ChangePropagationSubscriber, RateChangeEvent};
