//! Source registry: normalization, deduplication and the enabled subset.
//!
//! # Normalization Rules
//!
//! - Empty input or input without a scheme is rejected
//! - The `ssconf://` forwarding scheme is rewritten to `https://`
//! - Channel feeds on `t.me` collapse to their lower-cased channel name,
//!   with or without the `/s/` web preview segment
//! - Everything else becomes `scheme://host/path` with trailing slashes removed

use crate::error::Error;
use crate::harvest::models::Source;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Host of the channel-feed service
const CHANNEL_FEED_HOST: &str = "t.me";

/// Forwarding scheme that is served over plain HTTPS
const FORWARDING_SCHEME: &str = "ssconf";

/// Channel feeds fetched by default
const DEFAULT_CHANNELS: &[&str] = &[
    "v2ray_free_conf",
    "ShadowProxy66",
    "OutlineReleasedKey",
    "PrivateVPNs",
    "prrofile_purple",
    "proxy_shadosocks",
    "DirectVPN",
    "VmessProtocol",
    "vpnfail_v2ray",
    "vpnkanfik",
    "vpnmega1",
    "vpnowl",
    "vpnx1x",
    "wxgmrjdcc",
    "zibanabz",
    "antifilterjadid",
    "canfigv2ray",
    "cnlv2rayng",
    "configshub",
    "customv2ray",
    "dgkbza",
    "elitevpnv2",
    "entrynet",
    "expressvpn_420",
    "external_net",
    "farahvpn",
    "fast_2ray",
    "fastkanfig",
    "flyv2ray",
    "free1_vpn",
    "freeconfig01",
    "freevirgoolnet",
    "gh_v2rayng",
    "givevpn",
    "guard_revil",
    "hiddenvpnchannel",
    "hl_proxy",
    "hope_net",
    "hopev2ray",
    "huiguo62",
    "IP_CF_Config",
    "irv2rey",
    "jiedianf",
    "jiujied",
    "king_network7",
    "kingofilter",
    "kurdistan_vpn_perfectt",
    "lonup_m",
    "masirbazz",
    "meli_proxyy",
    "moftinet",
    "mtpproxy0098",
    "new_mtproxi2",
    "nofiltering2",
    "outline_ir",
    "poroxybaz",
    "proxy_v2box",
    "prroxyng",
    "satafkompani",
    "satellitenewspersian",
    "server_nekobox",
    "shadowsockskeys",
    "skivpn",
    "socks5tobefree",
    "strongprotocol",
    "tehranargo",
    "uvpn_org",
    "v2aryng_vpn",
    "v2fre",
    "v2mystery",
    "v2rang_255",
    "v2ray1_ng",
    "v2ray_alpha",
    "v2ray_raha",
    "v2ray_v_vpn",
    "v2rayminer",
    "v2rayngrit",
    "v2rayngseven",
    "v2rayngvp",
    "v2rayprotocol",
    "v2rayproxy",
    "v2rayvlp",
    "vistav2ray",
    "astrovpn_official",
    "free4allvpn",
    "freev2rays",
    "appsooner",
    "dailyv2ry",
    "vpnhubmarket",
    "artemisvpn1",
    "lightconnect_m",
    "v2rayng_vpnn",
    "V2pedia",
    "networknim",
    "freeland8",
    "vmessiran",
    "Outline_Vpn",
    "vmessq",
    "WeePeeN",
    "V2rayNG3",
    "ShadowsocksM",
    "shadowsocksshop",
    "v2rayan",
    "ShadowSocks_s",
    "napsternetv_config",
    "Easy_Free_VPN",
    "V2Ray_FreedomIran",
    "V2RAY_VMESS_free",
    "v2ray_for_free",
    "V2rayN_Free",
    "vpn_ocean",
    "configV2rayForFree",
    "DigiV2ray",
    "freev2rayssr",
    "v2rayn_server",
    "Shadowlinkserverr",
    "iranvpnet",
    "mahsaamoon1",
    "V2RAY_NEW",
    "v2RayChannel",
    "configV2rayNG",
    "config_v2ray",
    "vpn_proxy_custom",
    "vpnmasi",
    "v2ray_custom",
    "VPNCUSTOMIZE",
    "HTTPCustomLand",
    "ViPVpn_v2ray",
    "FreeNet1500",
    "v2ray_ar",
    "beta_v2ray",
    "vip_vpn_2022",
    "FOX_VPN66",
    "VorTexIRN",
    "YtTe3la",
    "V2RayOxygen",
    "Network_442",
    "VPN_443",
    "v2rayng_v",
    "ultrasurf_12",
    "iSeqaro",
    "frev2rayng",
    "frev2ray",
    "Awlix_ir",
    "v2rayngvpn",
    "God_CONFIG",
    "Configforvpn01",
    "TUICity",
    "ParsRoute",
];

/// Normalize a source URL into its identity key
pub fn normalize(url: &str) -> Result<String, Error> {
    let parsed = parse_source_url(url)?;
    let host = parsed.host_str().unwrap_or_default();

    if host.eq_ignore_ascii_case(CHANNEL_FEED_HOST) {
        if let Some(channel) = channel_name(&parsed) {
            return Ok(channel.to_lowercase());
        }
    }

    let key = format!("{}://{}{}", parsed.scheme(), host_with_port(&parsed), parsed.path());
    Ok(key.trim_end_matches('/').to_string())
}

/// URL to request for a source
pub fn fetch_url(source: &Source) -> String {
    let Ok(parsed) = parse_source_url(&source.url) else {
        return source.url.clone();
    };
    let host = parsed.host_str().unwrap_or_default();
    if host.eq_ignore_ascii_case(CHANNEL_FEED_HOST) {
        if let Some(channel) = channel_name(&parsed) {
            return format!("https://{}/s/{}", CHANNEL_FEED_HOST, channel);
        }
    }
    rewrite_forwarding_scheme(source.url.trim())
}

/// Whether the source is a channel feed (served as HTML)
pub fn is_channel_feed(source: &Source) -> bool {
    parse_source_url(&source.url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(CHANNEL_FEED_HOST)))
        .unwrap_or(false)
}

fn parse_source_url(url: &str) -> Result<Url, Error> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::invalid_source(url, "empty URL"));
    }
    let Some((scheme, rest)) = url.split_once("://") else {
        return Err(Error::invalid_source(url, "missing scheme"));
    };
    if scheme.is_empty() {
        return Err(Error::invalid_source(url, "missing scheme"));
    }

    if rest.is_empty() {
        return Err(Error::invalid_source(url, "missing host"));
    }

    let parsed =
        Url::parse(&rewrite_forwarding_scheme(url)).map_err(|e| Error::invalid_source(url, e.to_string()))?;
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(Error::invalid_source(url, "missing host"));
    }
    Ok(parsed)
}

fn rewrite_forwarding_scheme(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case(FORWARDING_SCHEME) => format!("https://{}", rest),
        _ => url.to_string(),
    }
}

fn channel_name(url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let first = segments.next()?;
    let channel = if first == "s" { segments.next()? } else { first };
    Some(channel.to_string())
}

fn host_with_port(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Drop sources whose normalized key already appeared, keeping the first
pub fn deduplicate(sources: Vec<Source>) -> Vec<Source> {
    let mut seen = HashSet::new();
    let unique: Vec<Source> = sources
        .into_iter()
        .filter(|source| {
            let fresh = seen.insert(source.key.clone());
            if !fresh {
                debug!(url = %source.url, key = %source.key, "dropping duplicate source");
            }
            fresh
        })
        .collect();

    if unique.is_empty() {
        warn!("source list is empty after deduplication");
    }
    unique
}

/// The set of sources for one process lifetime
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    /// Build a registry from already constructed sources
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            sources: deduplicate(sources),
        }
    }

    /// Build a registry from raw URLs, rejecting malformed ones individually
    pub fn from_urls<I, S>(urls: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sources = urls
            .into_iter()
            .filter_map(|url| {
                let url = url.as_ref().trim();
                match normalize(url) {
                    Ok(key) => Some(Source::new(url, key).with_timeout(timeout)),
                    Err(e) => {
                        warn!("rejecting source: {}", e);
                        None
                    }
                }
            })
            .collect();
        Self::new(sources)
    }

    /// Registry over the built-in channel feeds
    pub fn with_default_sources(timeout: Duration) -> Self {
        Self::from_urls(default_sources(), timeout)
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut [Source] {
        &mut self.sources
    }

    pub fn get(&self, key: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.key == key)
    }

    pub fn enabled_sources(&self) -> Vec<&Source> {
        self.sources.iter().filter(|s| s.enabled).collect()
    }

    pub fn enabled_count(&self) -> usize {
        self.sources.iter().filter(|s| s.enabled).count()
    }

    /// No source is left enabled; the run must emit an empty artifact
    pub fn is_exhausted(&self) -> bool {
        self.enabled_count() == 0
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Built-in list of public channel feeds
pub fn default_sources() -> Vec<String> {
    DEFAULT_CHANNELS
        .iter()
        .map(|channel| format!("https://{}/s/{}", CHANNEL_FEED_HOST, channel))
        .collect()
}

/// Read a source list file: one URL per line, `#` starts a comment
pub fn load_source_list<P: AsRef<Path>>(path: P) -> crate::Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}
