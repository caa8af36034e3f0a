use std::any::type_name;

/// Last path segment of a type name, for log and error messages.
#[inline]
pub fn short_type_name<K>() -> Option<&'static str> {
    type_name::<K>().split("::").last()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<std::net::Ipv4Addr>(), Some("Ipv4Addr"));
        assert_eq!(short_type_name::<u8>(), Some("u8"));
    }
}
