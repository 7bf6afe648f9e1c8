//! Opening the controller's port-forward WebSocket

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, USER_AGENT};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_util::sync::CancellationToken;
use url::Url;

use vt_core::{TunnelConfig, TunnelError};

use crate::stream::WsStream;

/// User agent sent with every dial
pub const CLIENT_USER_AGENT: &str = concat!("vm-tunnel/", env!("CARGO_PKG_VERSION"));

/// Build the port-forward URL for the configured VM.
///
/// `http` becomes `ws` and `https` becomes `wss`. The VM name is
/// percent-encoded as a single path segment, and `wait` is only sent when
/// positive.
pub fn build_websocket_url(config: &TunnelConfig) -> Result<Url, TunnelError> {
    let invalid = |reason: &str| TunnelError::InvalidUrl {
        url: config.controller_url.clone(),
        reason: reason.to_string(),
    };

    let mut url = Url::parse(&config.controller_url).map_err(|e| invalid(&e.to_string()))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(invalid(&format!("unsupported scheme {:?}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid("scheme cannot be changed"))?;

    url.path_segments_mut()
        .map_err(|()| invalid("URL cannot carry a path"))?
        .pop_if_empty()
        .push("vms")
        .push(&config.vm_name)
        .push("port-forward");

    let mut query = format!("port={}", config.ssh_port);
    if config.wait_seconds > 0 {
        query.push_str(&format!("&wait={}", config.wait_seconds));
    }
    url.set_query(Some(&query));
    url.set_fragment(None);

    Ok(url)
}

/// Map a rejected upgrade's HTTP status to a tunnel error
pub fn classify_status(config: &TunnelConfig, status: u16) -> TunnelError {
    match status {
        404 => TunnelError::VmNotReady {
            vm: config.vm_name.clone(),
            status,
        },
        503 => TunnelError::WorkerUnreachable {
            vm: config.vm_name.clone(),
            status,
        },
        400 => TunnelError::InvalidPort {
            port: config.ssh_port,
            status,
        },
        _ => TunnelError::ConnectionFailed {
            reason: format!("unexpected HTTP status {}", status),
            status: Some(status),
        },
    }
}

/// Dial the controller and return the tunnel as a byte stream.
///
/// The returned stream is bound to `cancel`. Dialing itself has no timeout
/// of its own; the controller's `wait` budget bounds it server-side and
/// callers wrap it in their own deadline.
pub async fn dial(
    config: &TunnelConfig,
    cancel: &CancellationToken,
) -> Result<WsStream, TunnelError> {
    let url = build_websocket_url(config)?;

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| TunnelError::InvalidUrl {
            url: config.controller_url.clone(),
            reason: e.to_string(),
        })?;

    let headers = request.headers_mut();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
    if let Some(token) = config.token() {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| TunnelError::InvalidInput("bearer token is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, value);
    }

    // SSH packets can exceed tungstenite's default limits
    let ws_config = WebSocketConfig::default()
        .max_message_size(None)
        .max_frame_size(None);

    tracing::debug!(vm = %config.vm_name, port = config.ssh_port, "Dialing controller at {}", url);

    let connect = tokio_tungstenite::connect_async_with_config(request, Some(ws_config), true);
    let result = tokio::select! {
        _ = cancel.cancelled() => {
            return Err(TunnelError::Cancelled { operation: "dial controller" });
        }
        result = connect => result,
    };

    match result {
        Ok((ws, response)) => {
            tracing::debug!(status = %response.status(), "WebSocket tunnel established");
            Ok(WsStream::new(ws, cancel))
        }
        Err(WsError::Http(response)) => {
            let status = response.status().as_u16();
            tracing::debug!(status, "Controller rejected port-forward upgrade");
            Err(classify_status(config, status))
        }
        Err(e) => Err(TunnelError::ConnectionFailed {
            reason: e.to_string(),
            status: None,
        }),
    }
}
