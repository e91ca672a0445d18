pub mod amount;
pub mod audit;
pub mod cancellation;
pub mod confirmation;
pub mod intents;
pub mod refunds;
pub mod webhooks;
