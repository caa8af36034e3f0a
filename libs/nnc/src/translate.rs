use crate::crd::NetworkContainer;
use crate::error::{Error, Result};

use std::collections::HashMap;
use std::net::IpAddr;

use cnsd_ipam::nc::{CreateNetworkContainerRequest, SecondaryIpConfig};
use ipnet::IpNet;

/// Build the programming request for the sole NC in an NNC status.
///
/// The primary IP is canonicalised to a CIDR (host-length prefix appended
/// when the status carries a bare address). Each IP assignment becomes a
/// secondary IP config keyed by its UUID, stamped with the NC version.
/// Malformed addresses are permanent validation errors.
pub fn nc_request_from_status(nc: &NetworkContainer) -> Result<CreateNetworkContainerRequest> {
    let primary_ip = parse_host_or_cidr("primary IP", &nc.primary_ip)?;
    let subnet_prefix: IpNet = nc.subnet_address_space.parse().map_err(|e| {
        Error::PrefixParseError(
            format!("invalid subnet address space {:?}", nc.subnet_address_space),
            e,
        )
    })?;
    let gateway = parse_optional_addr("default gateway", &nc.default_gateway)?;
    let host_primary_ip = parse_optional_addr("node IP", &nc.node_ip)?;

    let secondary_ip_configs = nc
        .ip_assignments
        .iter()
        .map(|assignment| {
            let _: IpAddr = assignment.ip.parse().map_err(|e| {
                Error::AddrParseError(
                    format!(
                        "invalid IP {:?} in assignment {}",
                        assignment.ip, assignment.name
                    ),
                    e,
                )
            })?;
            Ok((
                assignment.name.clone(),
                SecondaryIpConfig {
                    ip_address: assignment.ip.clone(),
                    nc_version: nc.version,
                },
            ))
        })
        .collect::<Result<HashMap<_, _>>>()?;

    Ok(CreateNetworkContainerRequest {
        network_container_id: nc.id.clone(),
        version: nc.version,
        primary_ip,
        gateway,
        subnet_prefix,
        secondary_ip_configs,
        host_primary_ip,
    })
}

fn parse_host_or_cidr(what: &str, raw: &str) -> Result<IpNet> {
    if raw.contains('/') {
        raw.parse()
            .map_err(|e| Error::PrefixParseError(format!("invalid {what} {raw:?}"), e))
    } else {
        let addr: IpAddr = raw
            .parse()
            .map_err(|e| Error::AddrParseError(format!("invalid {what} {raw:?}"), e))?;
        Ok(IpNet::from(addr))
    }
}

fn parse_optional_addr(what: &str, raw: &str) -> Result<Option<IpAddr>> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|e| Error::AddrParseError(format!("invalid {what} {raw:?}"), e))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crd::IpAssignment;

    fn network_container() -> NetworkContainer {
        NetworkContainer {
            id: "nc-1".to_string(),
            primary_ip: "10.240.0.4".to_string(),
            subnet_name: "podnet".to_string(),
            subnet_address_space: "10.240.0.0/16".to_string(),
            default_gateway: "10.240.0.1".to_string(),
            version: 3,
            ip_assignments: vec![
                IpAssignment {
                    name: "uuid-1".to_string(),
                    ip: "10.240.0.10".to_string(),
                },
                IpAssignment {
                    name: "uuid-2".to_string(),
                    ip: "10.240.0.11".to_string(),
                },
            ],
            node_ip: "10.224.0.5".to_string(),
            ..NetworkContainer::default()
        }
    }

    #[test]
    fn test_translation_preserves_identity_and_key_set() {
        let nc = network_container();
        let request = nc_request_from_status(&nc).unwrap();
        assert_eq!(request.network_container_id, "nc-1");
        assert_eq!(request.version, 3);
        assert_eq!(request.primary_ip.to_string(), "10.240.0.4/32");
        assert_eq!(request.subnet_prefix.to_string(), "10.240.0.0/16");
        assert_eq!(request.gateway.unwrap().to_string(), "10.240.0.1");
        assert_eq!(request.host_primary_ip.unwrap().to_string(), "10.224.0.5");

        let mut keys: Vec<&str> = request
            .secondary_ip_configs
            .keys()
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        assert_eq!(keys, ["uuid-1", "uuid-2"]);
        assert!(
            request
                .secondary_ip_configs
                .values()
                .all(|sec| sec.nc_version == 3)
        );
    }

    #[test]
    fn test_primary_ip_cidr_passes_through() {
        let mut nc = network_container();
        nc.primary_ip = "10.240.0.4/24".to_string();
        let request = nc_request_from_status(&nc).unwrap();
        assert_eq!(request.primary_ip.to_string(), "10.240.0.4/24");
    }

    #[test]
    fn test_translation_is_idempotent() {
        let nc = network_container();
        let first = nc_request_from_status(&nc).unwrap();
        let second = nc_request_from_status(&nc).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_gateway_is_tolerated() {
        let mut nc = network_container();
        nc.default_gateway = String::new();
        nc.node_ip = String::new();
        let request = nc_request_from_status(&nc).unwrap();
        assert!(request.gateway.is_none());
        assert!(request.host_primary_ip.is_none());
    }

    #[test]
    fn test_malformed_primary_ip() {
        let mut nc = network_container();
        nc.primary_ip = "not-an-ip".to_string();
        let err = nc_request_from_status(&nc).unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn test_malformed_assignment_ip() {
        let mut nc = network_container();
        nc.ip_assignments[1].ip = "10.240.0".to_string();
        let err = nc_request_from_status(&nc).unwrap_err();
        assert!(matches!(err, Error::AddrParseError(..)));
    }
}
