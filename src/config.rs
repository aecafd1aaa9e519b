use std::env;
use std::net::SocketAddr;

use crate::error::{invalid_input_error, Error};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub max_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        let database_url = env::var("DATABASE_URL")?;

        let listen_addr = match env::var("LISTEN_ADDR") {
            Ok(raw) => raw.parse().map_err(|_| invalid_input_error())?,
            Err(_) => SocketAddr::from(([127, 0, 0, 1], 3000)),
        };

        let max_connections = match env::var("PG_MAX_CONNECTIONS") {
            Ok(raw) => raw.parse().map_err(|_| invalid_input_error())?,
            Err(_) => 5,
        };

        Ok(Self {
            database_url,
            listen_addr,
            max_connections,
        })
    }
}
