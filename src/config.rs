// Machine tuning knobs, loadable from a RON file.
//
// Streams are not configuration: they are injected programmatically
// at machine construction.

use ron::de::{from_reader, from_str};
use serde::Deserialize;
use std::fs::File;


fn default_memory_ceiling() -> usize {
    1000
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    // Address limit for the cell heap; allocation past it is fatal.
    #[serde(default = "default_memory_ceiling")]
    pub memory_ceiling: usize,

    // Per-step trace to stderr. Does not affect semantics.
    #[serde(default)]
    pub debug: bool,
}


impl Default for Config {
    fn default() -> Config {
        Config {
            memory_ceiling: default_memory_ceiling(),
            debug: false,
        }
    }
}


pub type LoadResult = std::result::Result<Config, String>;


impl Config {
    pub fn load(path: String) -> LoadResult {
        if let Ok(file) = File::open(path) {
            from_reader(file).map_err(|e| e.to_string())
        } else {
            Err(String::from("Couldn't open file"))
        }
    }

    pub fn parse(source: &str) -> LoadResult {
        from_str(source).map_err(|e| e.to_string())
    }
}
