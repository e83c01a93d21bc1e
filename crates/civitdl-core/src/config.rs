//! Centralized configuration constants for civitdl.
//!
//! Runtime (user-supplied) settings live in [`crate::settings`]; this module
//! only holds the fixed parameters of the catalog, network layer and paths.

use std::time::Duration;

/// Catalog endpoint configuration.
pub struct CatalogConfig;

impl CatalogConfig {
    pub const API_BASE: &'static str = "https://civitai.com/api/v1";
    pub const WEB_HOST: &'static str = "civitai.com";
    pub const SEARCH_LIMIT: u32 = 20;
    pub const USER_AGENT: &'static str = concat!("civitdl/", env!("CARGO_PKG_VERSION"));
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Longest a download may go without receiving a byte.
    pub const READ_TIMEOUT: Duration = Duration::from_secs(60);
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
    pub const DOWNLOAD_RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
    pub const DOWNLOAD_PROGRESS_INTERVAL: Duration = Duration::from_millis(250);
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
}

/// Hashing parameters.
pub struct HashConfig;

impl HashConfig {
    /// Read buffer for streaming digests (8MB).
    pub const CHUNK_SIZE: usize = 8 * 1024 * 1024;
}

/// Environment variables, directory and file names.
pub struct PathsConfig;

impl PathsConfig {
    pub const ENV_API_TOKEN: &'static str = "CIVITAI_API_TOKEN";
    pub const ENV_ROOT_PATH: &'static str = "COMFYUI_PATH";
    pub const CONFIG_DIR_NAME: &'static str = "civitdl";
    pub const CONFIG_FILE_NAME: &'static str = "config.json";
    pub const DEFAULT_ROOT_DIR_NAME: &'static str = "ComfyUI";
}
