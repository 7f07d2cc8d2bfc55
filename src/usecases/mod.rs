//! Application use cases. Orchestrate domain logic via ports.

pub mod dispatcher;
pub mod group_search_service;
pub mod scheduler_service;
pub mod subscription_service;
pub mod suggestion_service;

#[cfg(test)]
pub(crate) mod test_support;

pub use dispatcher::{DispatchReport, Dispatcher, DispatcherSettings, PostReport};
pub use group_search_service::GroupSearchService;
pub use scheduler_service::SchedulerService;
pub use subscription_service::SubscriptionService;
pub use suggestion_service::SuggestionService;
