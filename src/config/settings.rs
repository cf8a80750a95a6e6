use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::env;
use std::sync::RwLock;

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

static DEFAULT_DATA_DIR: &str = "data";

const DATA_DIR_KEY: &str = "DATA_DIR";
const MINTING_ADDRESS_KEY: &str = "MINTING_ADDRESS";

/// Process-wide settings for the node: where the database lives and which
/// address collects block rewards. Values come from the environment and
/// can be overridden at runtime (the CLI does this for tests and tools).
pub struct Config {
    inner: RwLock<HashMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Config {
        let mut map = HashMap::new();

        let data_dir = env::var(DATA_DIR_KEY).unwrap_or_else(|_| String::from(DEFAULT_DATA_DIR));
        map.insert(String::from(DATA_DIR_KEY), data_dir);

        if let Ok(addr) = env::var(MINTING_ADDRESS_KEY) {
            map.insert(String::from(MINTING_ADDRESS_KEY), addr);
        }

        Config {
            inner: RwLock::new(map),
        }
    }

    pub fn get_data_dir(&self) -> String {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on config - this should never happen");
        inner
            .get(DATA_DIR_KEY)
            .expect("Data directory should always be present in config")
            .clone()
    }

    pub fn set_data_dir(&self, dir: String) {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on config - this should never happen");
        inner.insert(String::from(DATA_DIR_KEY), dir);
    }

    pub fn get_minting_addr(&self) -> Option<String> {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on config - this should never happen");
        inner.get(MINTING_ADDRESS_KEY).cloned()
    }

    pub fn set_minting_addr(&self, addr: String) {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on config - this should never happen");
        inner.insert(String::from(MINTING_ADDRESS_KEY), addr);
    }
}
