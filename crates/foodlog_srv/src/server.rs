//! foodlog http server types.

use std::sync::Arc;

use crate::*;

/// Print out a message if this thread dies.
struct ThreadGuard(&'static str);

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        tracing::debug!("{}", self.0);
    }
}

/// An actual foodlog_srv server instance.
///
/// Collection mutations rewrite whole files, so request handling happens
/// on os thread workers doing blocking io. Only the notification streams
/// live on the async side.
pub struct FoodLogSrv {
    cont: Arc<std::sync::atomic::AtomicBool>,
    workers: Vec<std::thread::JoinHandle<std::io::Result<()>>>,
    addrs: Vec<std::net::SocketAddr>,
    registry: SubscriberRegistry,
    server: Option<Server>,
}

impl Drop for FoodLogSrv {
    fn drop(&mut self) {
        let _g = ThreadGuard("Server Shutdown Complete!");

        tracing::debug!("begin server shutdown...");
        let _ = self.shutdown();
    }
}

impl FoodLogSrv {
    /// Construct a new FoodLogSrv instance, loading all collections
    /// from [Config::data_dir].
    pub fn new(config: Config) -> std::io::Result<Self> {
        let config = Arc::new(config);

        // atomic flag for telling worker threads to shutdown
        let cont = Arc::new(std::sync::atomic::AtomicBool::new(true));

        // the in-memory working copy of every collection
        let store = Arc::new(Store::load(&config.data_dir)?);

        // open notification streams
        let registry = SubscriberRegistry::default();

        let sconf = ServerConfig {
            addrs: config.listen_address_list.clone(),
            worker_thread_count: config.worker_thread_count,
            max_upload_bytes: config.max_upload_bytes,
            notify_keep_alive: config.notify_keep_alive,
        };

        // start the actual http server
        let server = Server::new(config.clone(), sconf, registry.clone())?;

        // get the address that was assigned
        let addrs = server.server_addrs().to_vec();
        tracing::info!(?addrs, data_dir = %config.data_dir.display(), "Listening");

        // spawn our worker threads
        let mut workers = Vec::with_capacity(config.worker_thread_count);
        for _ in 0..config.worker_thread_count {
            let config = config.clone();
            let cont = cont.clone();
            let store = store.clone();
            let recv = server.receiver().clone();
            let registry = registry.clone();
            workers.push(std::thread::spawn(move || {
                worker(config, cont, store, recv, registry)
            }));
        }

        Ok(Self {
            cont,
            workers,
            addrs,
            registry,
            server: Some(server),
        })
    }

    /// Shutdown the server, returning an error result if any
    /// of the worker threads had panicked.
    pub fn shutdown(&mut self) -> std::io::Result<()> {
        let mut is_err = false;
        self.cont.store(false, std::sync::atomic::Ordering::SeqCst);
        self.registry.close_all();
        drop(self.server.take());
        while let Some(worker) = self.workers.pop() {
            tracing::debug!(
                "waiting on {} threads to close...",
                self.workers.len() + 1
            );
            match worker.join() {
                Ok(Ok(())) => (),
                Ok(Err(err)) => {
                    tracing::warn!(?err, "worker thread failed");
                    is_err = true;
                }
                Err(_) => is_err = true,
            }
        }
        tracing::debug!("all threads closed.");
        if is_err {
            Err(std::io::Error::other("Failure shutting down worker thread"))
        } else {
            Ok(())
        }
    }

    /// Get the bound listening addresses of this server.
    pub fn listen_addrs(&self) -> &[std::net::SocketAddr] {
        self.addrs.as_slice()
    }

    /// The number of currently open notification streams.
    pub fn subscriber_count(&self) -> usize {
        self.registry.count()
    }

    /// Print the address server started on
    pub fn print_addrs(&self) {
        println!("#foodlog_srv#running#");
        for addr in self.addrs.iter() {
            // print these incase someone wants to parse for them
            println!("#foodlog_srv#listening#{addr:?}#");
        }
    }
}

fn worker(
    config: Arc<Config>,
    cont: Arc<std::sync::atomic::AtomicBool>,
    store: Arc<Store>,
    recv: HttpReceiver,
    registry: SubscriberRegistry,
) -> std::io::Result<()> {
    let _g = ThreadGuard("worker thread has ended");

    while cont.load(std::sync::atomic::Ordering::SeqCst) {
        let (req, res) = match recv.recv() {
            None => break,
            Some(r) => r,
        };

        let handler = Handler {
            config: &config,
            store: &store,
            registry: &registry,
            res,
        };

        handler.handle(req)?;
    }

    Ok(())
}

struct Handler<'lt> {
    config: &'lt Config,
    store: &'lt Store,
    registry: &'lt SubscriberRegistry,
    res: HttpRespondCb,
}

impl Handler<'_> {
    /// Wrap the handle call so we can respond to the client with errors.
    pub fn handle(mut self, req: HttpRequest) -> std::io::Result<()> {
        match self.handle_inner(req) {
            Ok((status, body)) => self.respond(status, body),
            Err(err) => {
                tracing::warn!(%err, "Request failed");
                let status = err.status();
                self.respond(
                    status,
                    serde_json::to_vec(&serde_json::json!({
                        "error": err.to_string(),
                    }))?,
                )
            }
        }

        Ok(())
    }

    /// Dispatch to the correct handlers.
    fn handle_inner(&mut self, req: HttpRequest) -> FoodResult<(u16, Vec<u8>)> {
        match req {
            HttpRequest::HealthGet => Ok((200, b"{}".to_vec())),
            HttpRequest::FoodDataGet { search } => {
                self.handle_food_data_get(search)
            }
            HttpRequest::FoodTypeGet { search } => {
                self.handle_food_type_get(search)
            }
            HttpRequest::GroupsGet => {
                Ok((200, serde_json::to_vec(&*self.store.groups.all())?))
            }
            HttpRequest::AddFoodData { form } => {
                self.handle_add_food_data(form)
            }
            HttpRequest::UserCountGet => Ok((
                200,
                serde_json::to_vec(&serde_json::json!({
                    "count": self.registry.count(),
                }))?,
            )),
            HttpRequest::UserPasswordGet { user_password } => {
                self.handle_user_password_get(user_password)
            }
        }
    }

    /// List food entries, optionally only those whose tag equals `search`
    /// ignoring case.
    fn handle_food_data_get(
        &mut self,
        search: String,
    ) -> FoodResult<(u16, Vec<u8>)> {
        let all = self.store.food_data.all();

        if search.is_empty() {
            return Ok((200, serde_json::to_vec(&*all)?));
        }

        let search = search.to_lowercase();
        let found = all
            .iter()
            .filter(|e| e.category_tag.to_lowercase() == search)
            .collect::<Vec<_>>();

        Ok((200, serde_json::to_vec(&found)?))
    }

    /// List categories, optionally only those whose name contains
    /// `search` ignoring case.
    fn handle_food_type_get(
        &mut self,
        search: String,
    ) -> FoodResult<(u16, Vec<u8>)> {
        let all = self.store.food_types.all();

        if search.is_empty() {
            return Ok((200, serde_json::to_vec(&*all)?));
        }

        let search = search.to_lowercase();
        let found = all
            .iter()
            .filter(|c| c.name.to_lowercase().contains(&search))
            .collect::<Vec<_>>();

        Ok((200, serde_json::to_vec(&found)?))
    }

    /// Store a new entry and tell subscribers to refetch.
    fn handle_add_food_data(
        &mut self,
        form: FoodForm,
    ) -> FoodResult<(u16, Vec<u8>)> {
        let entry = submit(self.store, &self.config.uploads_dir(), form)?;

        if self.config.notify_on_data_change {
            self.registry.emit(PushEvent::DataChanged);
        }

        Ok((
            201,
            serde_json::to_vec(&serde_json::json!({
                "message": "Food data added successfully!",
                "data": entry,
            }))?,
        ))
    }

    /// Check a `{name, password}` json pair against the user collection.
    fn handle_user_password_get(
        &mut self,
        user_password: Option<String>,
    ) -> FoodResult<(u16, Vec<u8>)> {
        #[derive(serde::Deserialize)]
        struct Credentials {
            #[serde(default)]
            name: String,
            #[serde(default)]
            password: String,
        }

        let raw = user_password
            .ok_or_else(|| FoodError::validation("userPassword is required."))?;
        let creds: Credentials = serde_json::from_str(&raw).map_err(|err| {
            FoodError::validation(format!("Invalid userPassword: {err}"))
        })?;

        let verdict =
            check_or_register(&self.store.users, &creds.name, &creds.password)?;

        Ok((
            200,
            serde_json::to_vec(&serde_json::json!({
                "pass": verdict.pass(),
            }))?,
        ))
    }

    /// Process the response.
    fn respond(self, status: u16, body: Vec<u8>) {
        let Self { res, .. } = self;
        res(HttpResponse { status, body });
    }
}
