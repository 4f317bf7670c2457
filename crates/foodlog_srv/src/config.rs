//! config types.

/// Configuration for running a FoodLogSrv.
#[derive(Debug, Clone)]
pub struct Config {
    /// Worker thread count.
    ///
    /// Every mutation rewrites a whole collection file on a worker thread,
    /// so workers are bound on io, not on cpu. It is beneficial to have
    /// more of them than system cpus, but each one is also an os thread
    /// with its own stack, so we don't want to set it too high.
    ///
    /// Defaults:
    /// - `testing = 2`
    /// - `production = 4 * cpu_count`
    pub worker_thread_count: usize,

    /// The address(es) at which to listen.
    ///
    /// Defaults:
    /// - `testing = "[127.0.0.1:0]"`
    /// - `production = "[0.0.0.0:80, [::]:80]"`
    pub listen_address_list: Vec<std::net::SocketAddr>,

    /// The directory holding the collection files
    /// (`foodData.json`, `foodTypes.json`, `groups.json`, `users.json`)
    /// and the `uploads` directory for submitted images.
    ///
    /// Created on startup if it does not exist.
    ///
    /// Defaults:
    /// - `testing = "./data"`
    /// - `production = "./data"`
    pub data_dir: std::path::PathBuf,

    /// The maximum request body size accepted, which bounds the size
    /// of an uploaded image.
    ///
    /// Defaults:
    /// - `testing = 1MiB`
    /// - `production = 10MiB`
    pub max_upload_bytes: usize,

    /// The interval at which keep-alive comments are written to open
    /// notification streams.
    ///
    /// A closed client is noticed at the latest on the next write, so this
    /// also bounds how long a departed subscriber stays in the count.
    ///
    /// Defaults:
    /// - `testing = 100ms`
    /// - `production = 15s`
    pub notify_keep_alive: std::time::Duration,

    /// Broadcast a `fetch` event to all subscribers after every
    /// accepted food submission.
    ///
    /// Defaults:
    /// - `testing = true`
    /// - `production = true`
    pub notify_on_data_change: bool,
}

impl Config {
    /// Get a foodlog_srv config suitable for testing.
    pub fn testing() -> Self {
        Self {
            worker_thread_count: 2,
            listen_address_list: vec![(std::net::Ipv4Addr::LOCALHOST, 0).into()],
            data_dir: std::path::PathBuf::from("data"),
            max_upload_bytes: 1024 * 1024,
            notify_keep_alive: std::time::Duration::from_millis(100),
            notify_on_data_change: true,
        }
    }

    /// Get a foodlog_srv config suitable for production.
    pub fn production() -> Self {
        Self {
            worker_thread_count: num_cpus::get() * 4,
            listen_address_list: vec![
                (std::net::Ipv4Addr::UNSPECIFIED, 80).into(),
                (std::net::Ipv6Addr::UNSPECIFIED, 80).into(),
            ],
            data_dir: std::path::PathBuf::from("data"),
            max_upload_bytes: 1024 * 1024 * 10,
            notify_keep_alive: std::time::Duration::from_secs(15),
            notify_on_data_change: true,
        }
    }

    /// The directory uploaded images are written to.
    pub fn uploads_dir(&self) -> std::path::PathBuf {
        self.data_dir.join("uploads")
    }
}
