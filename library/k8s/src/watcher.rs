//! Thin re-export over `kube::runtime::watcher`. The teacher's `lib.rs`
//! declared a `watcher` module of its own (consumed by
//! `podmanager/event_watcher.rs` as `k8s::watcher::watcher(...)` driving
//! `Event::{Added,Deleted,Restarted,Applied}`) whose body was not present in
//! the retrieved source; this rebuilds it from that call-site usage.

pub use kube::runtime::watcher::{watcher, Config, Error, Event};

use futures::Stream;
use kube::{Api, Resource};
use std::fmt::Debug;

/// Starts a watch over `api` filtered by `config`, yielding a stream of
/// [`Event`]s. Equivalent to calling `kube::runtime::watcher` directly; kept
/// as a named wrapper so call sites read `k8s::watcher::watch(...)` the way
/// the teacher's pod manager read `k8s::watcher::watcher(...)`.
pub fn watch<K>(api: Api<K>, config: Config) -> impl Stream<Item = Result<Event<K>, Error>>
where
    K: Resource + Clone + Debug + serde::de::DeserializeOwned + Send + 'static,
    K::DynamicType: Default,
{
    watcher(api, config)
}
