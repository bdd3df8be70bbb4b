use std::net::SocketAddr;

const API_ADDR: &str = "SENTINEL_API_ADDR";

pub const DEFAULT_API_ADDR: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 8080);

/// Bind address of the snapshot API, `SENTINEL_API_ADDR` overrides the default
pub fn get_api_addr() -> SocketAddr {
    let addr_from_env = std::env::var(API_ADDR);
    addr_from_env.map_or(DEFAULT_API_ADDR, |res| res.parse().unwrap_or(DEFAULT_API_ADDR))
}

const API_TOKEN: &str = "SENTINEL_API_TOKEN";

/// Token guarding the API's operator actions
pub fn get_api_token() -> Option<String> {
    std::env::var(API_TOKEN).ok().filter(|token| !token.is_empty())
}
