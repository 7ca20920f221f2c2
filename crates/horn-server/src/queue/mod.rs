pub mod producer;

pub use producer::AmqpNotificationProducer;
