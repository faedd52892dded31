mod relay;
mod sweeper;

pub use relay::RelaySubscriber;
pub use sweeper::ExpirySweeper;
