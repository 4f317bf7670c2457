use crate::{Config, FoodForm, SubscriberRegistry, UploadedImage};
use axum::*;
use std::sync::Arc;

pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn respond(self) -> response::Response {
        let status = http::StatusCode::from_u16(self.status)
            .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
        response::IntoResponse::into_response((
            status,
            [(http::header::CONTENT_TYPE, "application/json")],
            self.body,
        ))
    }

    fn error(status: u16, msg: impl std::fmt::Display) -> Self {
        let body = serde_json::to_vec(&serde_json::json!({
            "error": msg.to_string(),
        }))
        .unwrap_or_else(|_| b"{\"error\":\"invalid error\"}".to_vec());
        Self { status, body }
    }
}

pub type HttpRespondCb = Box<dyn FnOnce(HttpResponse) + 'static + Send>;

pub enum HttpRequest {
    HealthGet,
    FoodDataGet { search: String },
    FoodTypeGet { search: String },
    GroupsGet,
    AddFoodData { form: FoodForm },
    UserCountGet,
    UserPasswordGet { user_password: Option<String> },
}

type HSend = async_channel::Sender<(HttpRequest, HttpRespondCb)>;
type HRecv = async_channel::Receiver<(HttpRequest, HttpRespondCb)>;

#[derive(Clone)]
pub struct HttpReceiver(HRecv);

impl HttpReceiver {
    pub fn recv(&self) -> Option<(HttpRequest, HttpRespondCb)> {
        match self.0.recv_blocking() {
            Ok(r) => Some(r),
            Err(_) => None,
        }
    }
}

pub struct ServerConfig {
    pub addrs: Vec<std::net::SocketAddr>,
    pub worker_thread_count: usize,
    pub max_upload_bytes: usize,
    pub notify_keep_alive: std::time::Duration,
}

pub struct Server {
    t_join: Option<std::thread::JoinHandle<()>>,
    addrs: Vec<std::net::SocketAddr>,
    receiver: HttpReceiver,
    h_send: HSend,
    shutdown: Option<axum_server::Handle>,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.h_send.close();
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.shutdown();
        }
        if let Some(t_join) = self.t_join.take() {
            let _ = t_join.join();
        }
    }
}

impl Server {
    pub fn new(
        config: Arc<Config>,
        server_config: ServerConfig,
        registry: SubscriberRegistry,
    ) -> std::io::Result<Self> {
        let (s_ready, r_ready) = tokio::sync::oneshot::channel();
        let t_join = std::thread::spawn(move || {
            tokio_thread(config, server_config, registry, s_ready)
        });
        match r_ready.blocking_recv() {
            Ok(Ok(Ready {
                h_send,
                addrs,
                receiver,
                shutdown,
            })) => Ok(Self {
                t_join: Some(t_join),
                addrs,
                receiver,
                h_send,
                shutdown: Some(shutdown),
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(std::io::Error::other("failed to bind server")),
        }
    }

    pub fn server_addrs(&self) -> &[std::net::SocketAddr] {
        self.addrs.as_slice()
    }

    pub fn receiver(&self) -> &HttpReceiver {
        &self.receiver
    }
}

struct Ready {
    h_send: HSend,
    addrs: Vec<std::net::SocketAddr>,
    receiver: HttpReceiver,
    shutdown: axum_server::Handle,
}

#[derive(Clone)]
pub struct AppState {
    pub h_send: HSend,
    pub registry: SubscriberRegistry,
    pub notify_keep_alive: std::time::Duration,
    pub dispatch_timeout: std::time::Duration,
}

type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

fn tokio_thread(
    config: Arc<Config>,
    server_config: ServerConfig,
    registry: SubscriberRegistry,
    ready: tokio::sync::oneshot::Sender<std::io::Result<Ready>>,
) {
    tracing::trace!(?config, "Starting tokio thread");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    runtime.block_on(async move {
        let (h_send, h_recv) =
            async_channel::bounded(server_config.worker_thread_count);

        let app: Router = Router::<AppState>::new()
            .route("/health", routing::get(handle_health_get))
            .route("/api/foodData", routing::get(handle_food_data_get))
            .route("/api/foodType", routing::get(handle_food_type_get))
            .route("/api/groups", routing::get(handle_groups_get))
            .route("/api/addFoodData", routing::post(handle_add_food_data))
            .route("/api/notify", routing::get(handle_notify))
            .route("/api/userCount", routing::get(handle_user_count_get))
            .route(
                "/api/userPassword",
                routing::get(handle_user_password_get),
            )
            .layer(extract::DefaultBodyLimit::max(
                server_config.max_upload_bytes,
            ))
            .layer(tower_http::cors::CorsLayer::permissive())
            .with_state(AppState {
                h_send: h_send.clone(),
                registry,
                notify_keep_alive: server_config.notify_keep_alive,
                dispatch_timeout: DISPATCH_TIMEOUT,
            });

        let receiver = HttpReceiver(h_recv);

        let mut addrs = Vec::with_capacity(server_config.addrs.len());
        let mut servers: Vec<BoxFut<'static, std::io::Result<()>>> =
            Vec::with_capacity(server_config.addrs.len());

        let shutdown_handle = axum_server::Handle::new();

        for addr in server_config.addrs {
            tracing::info!("Binding to: {}", addr);

            let listener = match tokio::task::spawn_blocking(
                move || -> std::io::Result<std::net::TcpListener> {
                    let listener = std::net::TcpListener::bind(addr)?;
                    listener.set_nonblocking(true)?;
                    Ok(listener)
                },
            )
            .await
            .unwrap_or_else(|err| Err(std::io::Error::other(err)))
            {
                Ok(listener) => listener,
                Err(err) => {
                    let _ = ready.send(Err(err));
                    return;
                }
            };

            match listener.local_addr() {
                Ok(addr) => {
                    tracing::info!("Bound with local address: {}", addr);
                    addrs.push(addr)
                }
                Err(err) => {
                    let _ = ready.send(Err(err));
                    return;
                }
            }

            let s = axum_server::Server::from_tcp(listener)
                .handle(shutdown_handle.clone())
                .serve(app.clone().into_make_service());
            servers.push(Box::pin(s));
        }

        tracing::info!("Sending ready signal");

        if ready
            .send(Ok(Ready {
                h_send,
                addrs,
                receiver,
                shutdown: shutdown_handle,
            }))
            .is_err()
        {
            return;
        }

        let _ = futures::future::join_all(servers).await;
    });
}

/// How long a request may wait for a free worker before giving up.
const DISPATCH_TIMEOUT: std::time::Duration =
    std::time::Duration::from_secs(10);

/// Hand a request to the worker pool and wait for its response.
///
/// Only the wait for a queue slot is bounded by `timeout`. A request that
/// timed out was never queued, so it had no effect. Once queued, the
/// response is awaited for as long as the worker takes, so a completed
/// mutation is never reported as failed.
async fn handle_dispatch(
    h_send: &HSend,
    timeout: std::time::Duration,
    req: HttpRequest,
) -> response::Response {
    let (s, r) = tokio::sync::oneshot::channel();
    let s = Box::new(move |res| {
        let _ = s.send(res);
    });

    match tokio::time::timeout(timeout, h_send.send((req, s))).await {
        Err(_) => {
            return HttpResponse::error(500, "internal timeout").respond()
        }
        Ok(Err(_)) => {
            return HttpResponse::error(500, "server shutting down").respond()
        }
        Ok(Ok(())) => (),
    }

    match r.await {
        Ok(r) => r.respond(),
        Err(_) => HttpResponse::error(500, "request dropped").respond(),
    }
}

#[derive(serde::Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: String,
}

#[derive(serde::Deserialize)]
struct UserPasswordQuery {
    #[serde(rename = "userPassword")]
    user_password: Option<String>,
}

async fn handle_health_get(
    extract::State(state): extract::State<AppState>,
) -> response::Response {
    handle_dispatch(
        &state.h_send,
        state.dispatch_timeout,
        HttpRequest::HealthGet,
    )
    .await
}

async fn handle_food_data_get(
    extract::Query(query): extract::Query<SearchQuery>,
    extract::State(state): extract::State<AppState>,
) -> response::Response {
    handle_dispatch(
        &state.h_send,
        state.dispatch_timeout,
        HttpRequest::FoodDataGet {
            search: query.search,
        },
    )
    .await
}

async fn handle_food_type_get(
    extract::Query(query): extract::Query<SearchQuery>,
    extract::State(state): extract::State<AppState>,
) -> response::Response {
    handle_dispatch(
        &state.h_send,
        state.dispatch_timeout,
        HttpRequest::FoodTypeGet {
            search: query.search,
        },
    )
    .await
}

async fn handle_groups_get(
    extract::State(state): extract::State<AppState>,
) -> response::Response {
    handle_dispatch(
        &state.h_send,
        state.dispatch_timeout,
        HttpRequest::GroupsGet,
    )
    .await
}

async fn handle_user_count_get(
    extract::State(state): extract::State<AppState>,
) -> response::Response {
    handle_dispatch(
        &state.h_send,
        state.dispatch_timeout,
        HttpRequest::UserCountGet,
    )
    .await
}

async fn handle_user_password_get(
    extract::Query(query): extract::Query<UserPasswordQuery>,
    extract::State(state): extract::State<AppState>,
) -> response::Response {
    handle_dispatch(
        &state.h_send,
        state.dispatch_timeout,
        HttpRequest::UserPasswordGet {
            user_password: query.user_password,
        },
    )
    .await
}

async fn handle_add_food_data(
    extract::State(state): extract::State<AppState>,
    multipart: Result<
        extract::Multipart,
        extract::multipart::MultipartRejection,
    >,
) -> response::Response {
    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(err) => {
            return HttpResponse::error(err.status().as_u16(), err.body_text())
                .respond()
        }
    };
    let form = match read_food_form(multipart).await {
        Ok(form) => form,
        Err(err) => return err.respond(),
    };
    handle_dispatch(
        &state.h_send,
        state.dispatch_timeout,
        HttpRequest::AddFoodData { form },
    )
    .await
}

/// Collect the submission fields. Unknown fields are skipped, and an
/// `image` field only counts if it carries a file name.
async fn read_food_form(
    mut multipart: extract::Multipart,
) -> Result<FoodForm, HttpResponse> {
    fn field_err(err: extract::multipart::MultipartError) -> HttpResponse {
        HttpResponse::error(err.status().as_u16(), err.body_text())
    }

    let mut form = FoodForm::default();

    while let Some(field) = multipart.next_field().await.map_err(field_err)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let file_name = field.file_name().map(str::to_string);
                let content = field.bytes().await.map_err(field_err)?;
                if let Some(file_name) = file_name {
                    form.image = Some(UploadedImage { file_name, content });
                }
            }
            "name" => form.name = Some(field.text().await.map_err(field_err)?),
            "cal" => form.cal = Some(field.text().await.map_err(field_err)?),
            "loc" => form.loc = Some(field.text().await.map_err(field_err)?),
            "tag" => form.tag = Some(field.text().await.map_err(field_err)?),
            _ => {
                field.bytes().await.map_err(field_err)?;
            }
        }
    }

    Ok(form)
}

/// Open a server-sent event stream of [crate::PushEvent] tokens.
///
/// The stream owns the subscription, so the subscriber is unregistered
/// as soon as axum drops the stream on client disconnect.
async fn handle_notify(
    extract::State(state): extract::State<AppState>,
) -> response::Response {
    use response::sse::{Event, KeepAlive, Sse};

    let sub = state.registry.register();

    let stream = futures::stream::unfold(sub, |mut sub| async move {
        let event = sub.recv().await?;
        let event = Event::default().data(event.token());
        Some((Ok::<_, std::convert::Infallible>(event), sub))
    });

    response::IntoResponse::into_response(
        Sse::new(stream)
            .keep_alive(KeepAlive::new().interval(state.notify_keep_alive)),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(f)
    }

    fn body_text(res: response::Response) -> String {
        let body =
            block_on(body::to_bytes(res.into_body(), usize::MAX)).unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[test]
    fn queued_request_is_answered_after_timeout() {
        let (h_send, h_recv) = async_channel::bounded(1);

        let worker = std::thread::spawn(move || {
            let (_req, res): (HttpRequest, HttpRespondCb) =
                h_recv.recv_blocking().unwrap();
            std::thread::sleep(Duration::from_millis(300));
            res(HttpResponse {
                status: 201,
                body: b"{}".to_vec(),
            });
        });

        let res = block_on(handle_dispatch(
            &h_send,
            Duration::from_millis(20),
            HttpRequest::HealthGet,
        ));

        assert_eq!(201, res.status().as_u16());
        worker.join().unwrap();
    }

    #[test]
    fn full_queue_times_out_without_queueing() {
        let (h_send, h_recv) =
            async_channel::bounded::<(HttpRequest, HttpRespondCb)>(1);

        // nobody is receiving, so the single slot stays taken
        let noop: HttpRespondCb = Box::new(|_| ());
        assert!(h_send.try_send((HttpRequest::GroupsGet, noop)).is_ok());

        let res = block_on(handle_dispatch(
            &h_send,
            Duration::from_millis(20),
            HttpRequest::HealthGet,
        ));

        assert_eq!(500, res.status().as_u16());
        assert!(body_text(res).contains("internal timeout"));

        // only the original request is queued
        assert_eq!(1, h_recv.len());
        assert!(matches!(
            h_recv.try_recv(),
            Ok((HttpRequest::GroupsGet, _))
        ));
    }

    #[test]
    fn closed_queue_is_500() {
        let (h_send, _h_recv) =
            async_channel::bounded::<(HttpRequest, HttpRespondCb)>(1);
        h_send.close();

        let res = block_on(handle_dispatch(
            &h_send,
            Duration::from_millis(20),
            HttpRequest::HealthGet,
        ));

        assert_eq!(500, res.status().as_u16());
        assert!(body_text(res).contains("shutting down"));
    }
}
