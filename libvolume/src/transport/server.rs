//! HTTP server that listens on the plugin socket and dispatches incoming
//! plugin requests to a [`VolumePlugin`] implementation.

use std::convert::Infallible;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::UnixListener;
use tracing::{debug, error, info, instrument, warn};

use crate::error::VolumeError;
use crate::plugin::VolumePlugin;
use crate::protocol::{PLUGIN_CONTENT_TYPE, PluginRequest, PluginResponse, ProtocolError};

/// A plugin server bound to a Unix socket.
pub struct PluginServer<T> {
    listener: UnixListener,
    socket_path: PathBuf,
    handler: Arc<T>,
}

impl<T> PluginServer<T>
where
    T: VolumePlugin + 'static,
{
    /// Bind the socket at `socket_path`, replacing a stale socket file left
    /// by a previous run and creating the parent directory if needed.
    pub async fn bind(
        socket_path: impl Into<PathBuf>,
        handler: Arc<T>,
    ) -> Result<Self, VolumeError> {
        let socket_path = socket_path.into();

        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(VolumeError::transport)?;
        }
        match tokio::fs::remove_file(&socket_path).await {
            Ok(()) => debug!(path = %socket_path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(VolumeError::transport(e)),
        }

        let listener = UnixListener::bind(&socket_path).map_err(VolumeError::transport)?;
        info!(path = %socket_path.display(), "plugin socket listening");
        Ok(Self {
            listener,
            socket_path,
            handler,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `shutdown` resolves, then remove the socket
    /// file. Each connection is served on its own task.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), VolumeError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested, closing plugin socket");
                    break;
                }
                accepted = self.listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            warn!(error = %e, "plugin socket accept failed");
                            continue;
                        }
                    };

                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let handler = Arc::clone(&handler);
                            async move { Ok::<_, Infallible>(Self::handle(req, &*handler).await) }
                        });
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            warn!(error = %e, "plugin connection error");
                        }
                    });
                }
            }
        }

        drop(self.listener);
        if let Err(e) = tokio::fs::remove_file(&self.socket_path).await {
            warn!(
                path = %self.socket_path.display(),
                error = %e,
                "unable to remove plugin socket"
            );
        }
        Ok(())
    }

    /// Read one request, decode it, dispatch it and encode the reply.
    #[instrument(skip_all, fields(endpoint = %req.uri().path()))]
    async fn handle(req: Request<Incoming>, handler: &T) -> Response<Full<Bytes>> {
        let endpoint = req.uri().path().to_owned();

        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(error = %e, "failed to read request body");
                return reply(
                    StatusCode::BAD_REQUEST,
                    &PluginResponse::Error(format!("unreadable request body: {e}")),
                );
            }
        };

        let request = match PluginRequest::decode(&endpoint, &body) {
            Ok(request) => request,
            Err(e @ ProtocolError::UnknownEndpoint(_)) => {
                warn!(error = %e, "rejecting request");
                return reply(StatusCode::NOT_FOUND, &PluginResponse::Error(e.to_string()));
            }
            Err(e) => {
                warn!(error = %e, "rejecting request");
                return reply(StatusCode::BAD_REQUEST, &PluginResponse::Error(e.to_string()));
            }
        };

        debug!(%request, "plugin request received");
        let response = Self::dispatch(handler, request).await;
        debug!(%response, "plugin request handled");

        let status = StatusCode::from_u16(response.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        reply(status, &response)
    }

    /// Map a [`PluginRequest`] to the matching trait method call and wrap
    /// the result in a [`PluginResponse`].
    async fn dispatch(handler: &T, request: PluginRequest) -> PluginResponse {
        let result = match request {
            PluginRequest::Activate => Ok(PluginResponse::Activated),
            PluginRequest::Create { name, options } => handler
                .create(&name, options)
                .await
                .map(|()| PluginResponse::Ok),
            PluginRequest::Remove { name } => {
                handler.remove(&name).await.map(|()| PluginResponse::Ok)
            }
            PluginRequest::Mount { name, id } => handler
                .mount(&id, &name)
                .await
                .map(PluginResponse::Mountpoint),
            PluginRequest::Unmount { name, id } => handler
                .unmount(&id, &name)
                .await
                .map(|()| PluginResponse::Ok),
            PluginRequest::Path { name } => {
                handler.path(&name).await.map(PluginResponse::Mountpoint)
            }
            PluginRequest::Get { name } => handler.get(&name).await.map(PluginResponse::Volume),
            PluginRequest::List => handler.list().await.map(PluginResponse::Volumes),
            PluginRequest::Capabilities => {
                Ok(PluginResponse::Capabilities(handler.capabilities().await))
            }
        };
        result.unwrap_or_else(|e| PluginResponse::Error(e.to_string()))
    }
}

fn reply(status: StatusCode, response: &PluginResponse) -> Response<Full<Bytes>> {
    let body = response.to_json().unwrap_or_else(|e| {
        error!(error = %e, "failed to encode plugin response");
        br#"{"Err":"failed to encode response"}"#.to_vec()
    });

    let mut resp = Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(PLUGIN_CONTENT_TYPE));
    resp
}
