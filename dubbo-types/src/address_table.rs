use std::collections::HashMap;

/// A mapping from pod endpoint (`IP:PORT`) to load-balancer endpoint
/// (`IP:PORT`).
///
/// Invariant: no key ever maps to the empty string. [`AddressTable::update`]
/// and [`AddressTable::delete`] enforce this at the only two write paths;
/// there is no other way to mutate the table. This is what prevents the
/// endpoints-add/update handlers (which don't yet know the LB address) from
/// poisoning lookups with an empty value — see spec §4.C.
#[derive(Debug, Default, Clone)]
pub struct AddressTable {
    inner: HashMap<String, String>,
}

impl AddressTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `pod_addr -> lb_addr` for every pod address in `pod_addrs`.
    /// No-op if `pod_addrs` is empty or `lb_addr` is empty.
    pub fn update<I>(&mut self, pod_addrs: I, lb_addr: &str)
    where
        I: IntoIterator<Item = String>,
    {
        if lb_addr.is_empty() {
            return;
        }
        let mut wrote_any = false;
        for pod_addr in pod_addrs {
            self.inner.insert(pod_addr, lb_addr.to_string());
            wrote_any = true;
        }
        let _ = wrote_any;
    }

    /// Deletes every pod address in `pod_addrs` from the table. No-op if
    /// `pod_addrs` is empty.
    pub fn delete<I>(&mut self, pod_addrs: I)
    where
        I: IntoIterator<Item = String>,
    {
        for pod_addr in pod_addrs {
            self.inner.remove(&pod_addr);
        }
    }

    /// Looks up the load-balancer endpoint for a pod endpoint.
    pub fn translate(&self, pod_addr: &str) -> Option<&str> {
        self.inner.get(pod_addr).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_with_empty_lb_is_noop() {
        let mut t = AddressTable::new();
        t.update(["10.0.0.1:1".to_string()], "");
        assert!(t.translate("10.0.0.1:1").is_none());
    }

    #[test]
    fn update_with_empty_pod_set_is_noop() {
        let mut t = AddressTable::new();
        t.update(std::iter::empty(), "10.200.0.1:30080");
        assert!(t.is_empty());
    }

    #[test]
    fn delete_with_empty_set_is_noop() {
        let mut t = AddressTable::new();
        t.update(["10.0.0.1:1".to_string()], "10.200.0.1:30080");
        t.delete(std::iter::empty::<String>());
        assert_eq!(t.translate("10.0.0.1:1"), Some("10.200.0.1:30080"));
    }

    #[test]
    fn translate_missing_key_is_none() {
        let t = AddressTable::new();
        assert!(t.translate("10.0.0.1:1").is_none());
    }

    #[test]
    fn never_stores_empty_value() {
        let mut t = AddressTable::new();
        t.update(["a".to_string(), "b".to_string()], "lb:1");
        t.update(["a".to_string()], "");
        assert_eq!(t.translate("a"), Some("lb:1"));
    }
}
