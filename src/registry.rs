//! Static device ↔ location mapping.
//!
//! Built once from configuration and shared read-only for the lifetime of
//! the process. A location that is not registered is an error, never an
//! empty device set, so "unknown location" cannot masquerade as "no data".

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Result};

use crate::error::{CoreError, CoreResult};

// ---

#[derive(Debug, Clone, Default)]
pub struct DeviceLocationRegistry {
    // ---
    by_device: BTreeMap<String, String>,
    by_location: BTreeMap<String, BTreeSet<String>>,
}

impl DeviceLocationRegistry {
    // ---
    pub fn new<I, D, L>(entries: I) -> Self
    where
        I: IntoIterator<Item = (D, L)>,
        D: Into<String>,
        L: Into<String>,
    {
        let mut registry = Self::default();
        for (device_id, location) in entries {
            let (device_id, location) = (device_id.into(), location.into());
            registry
                .by_location
                .entry(location.clone())
                .or_default()
                .insert(device_id.clone());
            registry.by_device.insert(device_id, location);
        }
        registry
    }

    /// Parse `device:location` pairs separated by commas, e.g.
    /// `28-0316a279:pool,28-0416b3c1:outside`.
    pub fn parse(raw: &str) -> Result<Self> {
        // ---
        let mut entries = Vec::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (device, location) = pair
                .split_once(':')
                .ok_or_else(|| anyhow!("Invalid device mapping '{}', expected device:location", pair))?;
            let (device, location) = (device.trim(), location.trim());
            if device.is_empty() || location.is_empty() {
                return Err(anyhow!("Invalid device mapping '{}', empty device or location", pair));
            }
            entries.push((device.to_string(), location.to_string()));
        }
        if entries.is_empty() {
            return Err(anyhow!("Device mapping must name at least one device"));
        }
        Ok(Self::new(entries))
    }

    pub fn location_of(&self, device_id: &str) -> Option<&str> {
        self.by_device.get(device_id).map(String::as_str)
    }

    pub fn device_ids_of(&self, location: &str) -> BTreeSet<String> {
        self.by_location.get(location).cloned().unwrap_or_default()
    }

    pub fn all_locations(&self) -> BTreeSet<String> {
        self.by_location.keys().cloned().collect()
    }

    /// Device ids for a location the caller named, failing fast when the
    /// location is not registered.
    pub fn require_location(&self, location: &str) -> CoreResult<Vec<String>> {
        // ---
        match self.by_location.get(location) {
            Some(devices) if !devices.is_empty() => Ok(devices.iter().cloned().collect()),
            _ => Err(CoreError::UnknownLocation(location.to_string())),
        }
    }

    /// Resolve an optional location filter into an optional device filter.
    pub fn device_filter(&self, location: Option<&str>) -> CoreResult<Option<Vec<String>>> {
        location.map(|l| self.require_location(l)).transpose()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_device.iter().map(|(d, l)| (d.as_str(), l.as_str()))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn registry() -> DeviceLocationRegistry {
        DeviceLocationRegistry::new([("28-aaa", "pool"), ("28-bbb", "outside")])
    }

    #[test]
    fn test_lookup_both_directions() {
        // ---
        let reg = registry();
        assert_eq!(reg.location_of("28-aaa"), Some("pool"));
        assert_eq!(reg.location_of("28-zzz"), None);
        assert_eq!(
            reg.device_ids_of("outside").into_iter().collect::<Vec<_>>(),
            vec!["28-bbb".to_string()]
        );
        assert!(reg.device_ids_of("attic").is_empty());
        assert_eq!(
            reg.all_locations().into_iter().collect::<Vec<_>>(),
            vec!["outside".to_string(), "pool".to_string()]
        );
    }

    #[test]
    fn test_unknown_location_is_rejected() {
        // ---
        let reg = registry();
        let err = reg.require_location("attic").unwrap_err();
        assert_eq!(err.kind(), "UnknownLocation");
        assert!(reg.device_filter(None).unwrap().is_none());
        assert_eq!(
            reg.device_filter(Some("pool")).unwrap(),
            Some(vec!["28-aaa".to_string()])
        );
    }

    #[test]
    fn test_parse_mapping() {
        // ---
        let reg = DeviceLocationRegistry::parse(" 28-a:pool , 28-b:outside,").unwrap();
        assert_eq!(reg.location_of("28-b"), Some("outside"));
        assert_eq!(reg.entries().count(), 2);

        assert!(DeviceLocationRegistry::parse("").is_err());
        assert!(DeviceLocationRegistry::parse("28-a").is_err());
        assert!(DeviceLocationRegistry::parse("28-a:").is_err());
    }
}
