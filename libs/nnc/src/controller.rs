use crate::crd::{ClusterSubnetState, NodeNetworkConfig};
use crate::error::Error;
use crate::reconcile::{Context, reconcile_nnc};

use cnsd_ipam::pool::monitor::SubnetExhaustion;
use cnsd_k8s_util::types::short_type_name;

use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::{WatchStreamExt, watcher};
use kube::Resource;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{error, info, warn};

pub const CONTROLLER_ID: &str = "node-network-config";
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Verify the API is reachable and the controller may list the resource;
/// anything else is a startup failure.
pub async fn check_api_queryable<K>(client: Client) -> Api<K>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    let api = Api::<K>::all(client.clone());
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!(
            "{} is not queryable; {e:?}. Check controller permissions",
            short_type_name::<K>().unwrap_or("Unknown resource"),
        );
        std::process::exit(1);
    }
    api
}

pub fn error_policy(
    _obj: Arc<NodeNetworkConfig>,
    _error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    unreachable!("reconcile_nnc handles its own errors and backoff")
}

/// Run the NNC controller scoped to this node, plus the cluster subnet
/// state watcher feeding the pool monitor's exhaustion channel.
pub async fn run(ctx: Arc<Context>, node_name: String, css_tx: mpsc::Sender<SubnetExhaustion>) {
    let client = ctx.client.clone();
    let nnc = check_api_queryable::<NodeNetworkConfig>(client.clone()).await;
    let css: Api<ClusterSubnetState> = Api::all(client);

    info!(msg = format!("starting {CONTROLLER_ID} controller"), node = %node_name);
    // the NNC for a node carries the node's name; scope the watch to it
    let nnc_config = watcher::Config::default()
        .fields(&format!("metadata.name={node_name}"))
        .any_semantic();
    let nnc_controller = Controller::new(nnc, nnc_config)
        // debounce to collapse reconcile calls in quick succession
        .with_config(controller::Config::default().debounce(Duration::from_millis(500)))
        .shutdown_on_signal()
        .run(reconcile_nnc, error_policy, ctx.clone())
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()));

    // subnet exhaustion is optional input: watch failures are logged, never
    // fatal
    let css_watcher = watcher(css, watcher::Config::default().any_semantic())
        .default_backoff()
        .applied_objects()
        .for_each(|res| {
            let css_tx = css_tx.clone();
            async move {
                match res {
                    Ok(css) => {
                        let exhausted = css.status.as_ref().is_some_and(|s| s.exhausted);
                        if css_tx.send(SubnetExhaustion { exhausted }).await.is_err() {
                            warn!(msg = "pool monitor is gone, dropping subnet state");
                        }
                    }
                    Err(error) => {
                        warn!(msg = "cluster subnet state watch failed", %error);
                    }
                }
            }
        });

    tokio::join!(nnc_controller, css_watcher);
}
