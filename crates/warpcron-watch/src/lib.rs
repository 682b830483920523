//! warpcron-watch: watchers that feed the schedule service.
//!
//! - **`WorkflowWatcher`**: one snapshot per workflow change, with the
//!   workflow's own schedules plus those of every template it uses
//! - **`TemplateWatcher`**: on a template change, re-resolves every
//!   workflow that uses it
//!
//! Both share one resubscribe loop: subscription failures are logged and
//! retried after a fixed delay, and only the first subscription asks for
//! the full current state.

mod resolve;
mod source;
mod template;
mod workflow;

#[cfg(test)]
mod testing;

pub use resolve::TemplateResolver;
pub use source::WatchScope;
pub use template::TemplateWatcher;
pub use workflow::WorkflowWatcher;
