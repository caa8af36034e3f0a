use cnsd_nnc::crd::{ClusterSubnetState, NodeNetworkConfig};

use kube::CustomResourceExt;

fn main() {
    for crd in [NodeNetworkConfig::crd(), ClusterSubnetState::crd()] {
        // safe unwrap: we know CRD is serializable
        print!("---\n{}\n", serde_yaml::to_string(&crd).unwrap());
    }
}
