//! Reconnection orchestrator.
//!
//! One control flow shared by every driver kind:
//!
//! 1. Load the persisted fingerprint for the driver name (store failures
//!    read as "no fingerprint").
//! 2. If present: enumerate already-authorized resources, pick one that
//!    matches, re-verify its permission, open it with the saved
//!    parameters. Success returns without writing to the store.
//! 3. Otherwise: prompt the user, open the granted resource, overwrite the
//!    fingerprint. A declined or empty prompt fails and leaves the stored
//!    fingerprint untouched.
//!
//! Drivers only supply the leaves through [`Reacquire`].

use crate::store::{MetadataStore, load_fingerprint, save_fingerprint};
use async_trait::async_trait;
use devhal_common::hal::driver::HalError;
use devhal_common::hal::types::{ConnectMethod, ConnectOptions, ConnectionState, DriverKind};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::{debug, info, warn};

/// Per-kind leaves of the reconnection algorithm.
#[async_trait]
pub trait Reacquire: Send + Sync + 'static {
    /// A granted but not yet opened resource (a port, a device, a directory).
    type Resource: Send + Sync;
    /// Open handle owned by the driver while Connected.
    type Handle: Send + Sync + 'static;
    /// Persisted re-acquisition data.
    type Fingerprint: Serialize + DeserializeOwned + Clone + Debug + Send + Sync;

    /// Kind, also the store namespace.
    fn kind(&self) -> DriverKind;

    /// Whether the host offers the capability at all.
    async fn detect(&self) -> bool;

    /// Resources the user already granted, without prompting.
    async fn authorized(&self) -> Result<Vec<Self::Resource>, HalError>;

    /// Whether `resource` is the one `fingerprint` describes.
    fn matches(&self, resource: &Self::Resource, fingerprint: &Self::Fingerprint) -> bool;

    /// Permission verifier: is the grant still usable without a prompt?
    async fn verify(&self, resource: &Self::Resource) -> bool;

    /// Interactive acquisition.
    ///
    /// # Errors
    /// `PermissionDenied` if the user declines, `NoDeviceAvailable` if
    /// nothing exists or nothing was selected.
    async fn request(&self, options: &ConnectOptions) -> Result<Self::Resource, HalError>;

    /// Fingerprint for a freshly granted resource.
    fn fingerprint(&self, resource: &Self::Resource, options: &ConnectOptions)
    -> Self::Fingerprint;

    /// Open `resource` with the parameters recorded in `fingerprint`.
    async fn open(
        &self,
        resource: &Self::Resource,
        fingerprint: &Self::Fingerprint,
    ) -> Result<Self::Handle, HalError>;

    /// Close an open handle. Errors are logged by the caller, never raised.
    async fn close(&self, handle: &Self::Handle) -> Result<(), HalError>;

    /// Resource label and connection details for `ConnectionInfo`.
    fn describe(
        &self,
        resource: &Self::Resource,
        fingerprint: &Self::Fingerprint,
    ) -> (String, BTreeMap<String, String>);
}

/// Outcome of a successful reconnection.
pub struct Reconnected<H> {
    /// Open handle
    pub handle: H,
    /// Silent or interactive
    pub method: ConnectMethod,
    /// Resource label
    pub resource: String,
    /// Connection details
    pub details: BTreeMap<String, String>,
}

/// Run the reconnection algorithm for driver `driver`.
///
/// `on_stage` is called with `Restoring` before the silent attempt and
/// with `AwaitingUserSelection` before the prompt.
pub async fn reconnect<B, F>(
    backend: &B,
    store: &dyn MetadataStore,
    driver: &str,
    options: &ConnectOptions,
    mut on_stage: F,
) -> Result<Reconnected<B::Handle>, HalError>
where
    B: Reacquire,
    F: FnMut(ConnectionState) + Send,
{
    let namespace = backend.kind().as_str();

    let stored = match load_fingerprint::<B::Fingerprint>(store, namespace, driver).await {
        Ok(stored) => stored,
        Err(e) => {
            warn!("{}: fingerprint unavailable ({}), prompting instead", driver, e);
            None
        }
    };

    if let Some(fingerprint) = stored {
        on_stage(ConnectionState::Restoring);
        debug!("{}: restoring from {:?}", driver, fingerprint);
        match restore(backend, driver, &fingerprint).await {
            Ok(Some(restored)) => {
                info!("{}: restored {} silently", driver, restored.resource);
                return Ok(restored);
            }
            Ok(None) => info!("{}: no authorized resource matches fingerprint", driver),
            Err(e) => warn!("{}: silent restoration failed: {}", driver, e),
        }
    } else {
        debug!("{}: no fingerprint stored", driver);
    }

    on_stage(ConnectionState::AwaitingUserSelection);
    let resource = backend.request(options).await?;
    let fingerprint = backend.fingerprint(&resource, options);
    let handle = backend.open(&resource, &fingerprint).await?;

    if let Err(e) = save_fingerprint(store, namespace, driver, &fingerprint).await {
        // Connection is usable; only the next silent restore is lost.
        warn!("{}: failed to persist fingerprint: {}", driver, e);
    }

    let (label, details) = backend.describe(&resource, &fingerprint);
    info!("{}: acquired {} interactively", driver, label);
    Ok(Reconnected {
        handle,
        method: ConnectMethod::Interactive,
        resource: label,
        details,
    })
}

async fn restore<B: Reacquire>(
    backend: &B,
    driver: &str,
    fingerprint: &B::Fingerprint,
) -> Result<Option<Reconnected<B::Handle>>, HalError> {
    let candidates = backend.authorized().await?;

    for resource in candidates
        .iter()
        .filter(|r| backend.matches(r, fingerprint))
    {
        if !backend.verify(resource).await {
            debug!("{}: matching resource failed permission check", driver);
            continue;
        }

        let handle = backend.open(resource, fingerprint).await?;
        let (label, details) = backend.describe(resource, fingerprint);
        return Ok(Some(Reconnected {
            handle,
            method: ConnectMethod::Restored,
            resource: label,
            details,
        }));
    }

    Ok(None)
}
