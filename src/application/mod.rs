pub mod actor_identity;
pub mod auth_manager;
pub mod completion_guard;
pub mod context_compositor;
pub mod event_ingestor;
pub mod publisher;
pub mod reasoning_invoker;
pub mod target_resolver;
pub mod trigger_pipeline;
pub mod usecases;

#[cfg(test)]
pub mod test_support;
