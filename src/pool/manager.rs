//! Resource lifecycle hooks.

use async_trait::async_trait;

/// Lifecycle hooks the pool drives for each handle.
///
/// `create`, `activate` and `validate` may suspend. `passivate` and `destroy`
/// run synchronously because they are also invoked when a [`Lease`](super::Lease)
/// is dropped.
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    /// The pooled handle type.
    type Resource: Send + 'static;

    /// Creation failure type.
    type Error: std::fmt::Display + Send;

    /// Open a new handle.
    async fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Prepare a handle before it is handed to a borrower.
    async fn activate(&self, _resource: &mut Self::Resource) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Check that a handle is still usable.
    async fn validate(&self, _resource: &mut Self::Resource) -> bool {
        true
    }

    /// Reset a handle before it goes back to the idle list.
    fn passivate(&self, _resource: &mut Self::Resource) {}

    /// Release a handle for good.
    fn destroy(&self, resource: Self::Resource) {
        drop(resource);
    }
}
