//! Country lookup for configs that embed an IPv4 address

use crate::error::Error;
use maxminddb::{geoip2, Reader};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Regex pattern to match IPv4 literals
static IPV4_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("Invalid IPv4 regex")
});

/// Maps an IPv4 address to a two-letter country code.
///
/// Lookups never fail the caller: missing data and errors both mean `None`.
pub trait GeoLookup: Send + Sync {
    fn country_code(&self, ip: Ipv4Addr) -> Option<String>;
}

impl GeoLookup for HashMap<Ipv4Addr, String> {
    fn country_code(&self, ip: Ipv4Addr) -> Option<String> {
        self.get(&ip).cloned()
    }
}

/// GeoLocator backed by a MaxMind MMDB database
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Open an MMDB file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let reader = Reader::open_readfile(path).map_err(|e| Error::Geo(e.to_string()))?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Look up the ISO country code of an address
    pub fn lookup_country(&self, ip: IpAddr) -> Result<Option<String>, Error> {
        let lookup_result = self.reader.lookup(ip).map_err(|e| Error::Geo(e.to_string()))?;
        let city: Option<geoip2::City> = lookup_result.decode().map_err(|e| Error::Geo(e.to_string()))?;
        Ok(city.and_then(|city| city.country.iso_code.map(String::from)))
    }
}

impl GeoLookup for GeoLocator {
    fn country_code(&self, ip: Ipv4Addr) -> Option<String> {
        match self.lookup_country(IpAddr::V4(ip)) {
            Ok(code) => code,
            Err(e) => {
                trace!(%ip, "geo lookup failed: {}", e);
                None
            }
        }
    }
}

impl Clone for GeoLocator {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}

/// First valid IPv4 literal in the host part of a config
pub fn first_ipv4(config: &str) -> Option<Ipv4Addr> {
    let rest = config.split_once("://").map_or(config, |(_, rest)| rest);
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);

    IPV4_REGEX
        .find_iter(host)
        .find_map(|m| m.as_str().parse::<Ipv4Addr>().ok())
}

/// Country code for a config, if it embeds a resolvable IPv4 address
pub fn resolve_country(geo: &dyn GeoLookup, config: &str) -> Option<String> {
    let ip = first_ipv4(config)?;
    geo.country_code(ip)
}
