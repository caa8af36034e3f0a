/// Collapse object-specific segments of a Kubernetes API path so metric
/// labels stay low-cardinality: the namespace value and the object name
/// become placeholders, subresources pass through.
///
/// `/apis/acn.azure.com/v1alpha/namespaces/kube-system/nodenetworkconfigs/node-1/status`
/// becomes
/// `/apis/acn.azure.com/v1alpha/namespaces/{namespace}/nodenetworkconfigs/{name}/status`.
///
/// Cluster-scoped object names are left as-is; this service only talks to
/// namespaced resources.
pub fn template_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut out: Vec<&str> = Vec::with_capacity(segments.len());
    let mut i = 0;
    while i < segments.len() {
        if segments[i] == "namespaces" && i + 1 < segments.len() {
            out.push("namespaces");
            out.push("{namespace}");
            i += 2;
            if i < segments.len() {
                out.push(segments[i]);
                i += 1;
                if i < segments.len() {
                    out.push("{name}");
                    i += 1;
                }
            }
            continue;
        }
        out.push(segments[i]);
        i += 1;
    }
    format!("/{}", out.join("/"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_namespaced_object_path() {
        assert_eq!(
            template_path("/apis/acn.azure.com/v1alpha/namespaces/kube-system/nodenetworkconfigs/node-1"),
            "/apis/acn.azure.com/v1alpha/namespaces/{namespace}/nodenetworkconfigs/{name}"
        );
    }

    #[test]
    fn test_subresource_passes_through() {
        assert_eq!(
            template_path("/api/v1/namespaces/default/pods/web-0/status"),
            "/api/v1/namespaces/{namespace}/pods/{name}/status"
        );
    }

    #[test]
    fn test_collection_path_keeps_resource() {
        assert_eq!(
            template_path("/api/v1/namespaces/default/pods"),
            "/api/v1/namespaces/{namespace}/pods"
        );
    }

    #[test]
    fn test_cluster_scoped_path_untouched() {
        assert_eq!(template_path("/api/v1/nodes"), "/api/v1/nodes");
    }
}
