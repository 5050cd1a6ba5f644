pub mod aggregator;
pub mod notifier;
pub mod recorder;
