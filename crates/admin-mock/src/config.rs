use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub hosts: Vec<String>,
    #[serde(default)]
    pub log_capacity: Option<usize>,
}
