use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const INGEST_PORT: &str = "INGEST_PORT";

const DEFAULT_PORT: u16 = 8080;

pub fn get_port() -> u16 {
    let port_from_env = std::env::var(INGEST_PORT);
    port_from_env.map_or(DEFAULT_PORT, |res| res.parse().unwrap_or(DEFAULT_PORT))
}

const INGEST_ADDR: &str = "INGEST_ADDR";

const DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

pub fn get_addr() -> Ipv4Addr {
    let addr_from_env = std::env::var(INGEST_ADDR);
    addr_from_env.map_or(DEFAULT_ADDR, |res| res.parse().unwrap_or(DEFAULT_ADDR))
}

pub fn get_bind_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(get_addr()), get_port())
}

const INGEST_TOKEN: &str = "INGEST_TOKEN";

pub fn get_token() -> Option<String> {
    let token_from_env = std::env::var(INGEST_TOKEN);
    token_from_env.ok()
}
