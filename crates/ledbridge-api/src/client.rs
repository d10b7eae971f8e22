// WLED JSON API HTTP client
//
// Wraps `reqwest::Client` with WLED URL construction, status checking and
// body decoding. One instance per device; cheap to clone since the inner
// reqwest client is reference counted.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{CommandAck, DeviceSnapshot};
use crate::transport::TransportConfig;

/// Raw HTTP client for a single WLED device.
///
/// All endpoints live under `/json`; the legacy `/win` endpoint is used only
/// for raw parameter commands.
#[derive(Debug, Clone)]
pub struct WledClient {
    http: reqwest::Client,
    base_url: Url,
    timeout_ms: u64,
}

impl WledClient {
    /// Create a client for `host` (an IP, `ip:port`, or full `http://` URL).
    pub fn new(host: &str, transport: &TransportConfig) -> Result<Self, Error> {
        let base_url = base_url_for(host)?;
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            timeout_ms: transport.timeout_ms(),
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            timeout_ms: TransportConfig::default().timeout_ms(),
        }
    }

    /// The device base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The WebSocket endpoint for this device: `ws://{host}/ws`.
    pub fn ws_url(&self) -> Result<Url, Error> {
        let mut url = self.base_url.join("ws")?;
        let scheme = if self.base_url.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::WebSocketConnect(format!("cannot derive ws URL from {url}")))?;
        Ok(url)
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// `GET /json`: full state, info, effects and palettes.
    pub async fn get_json(&self) -> Result<DeviceSnapshot, Error> {
        let snapshot: DeviceSnapshot = self.get(self.api_url("json")?).await?;
        snapshot.identity()?;
        Ok(snapshot)
    }

    /// `GET /json/info`.
    pub async fn get_info(&self) -> Result<serde_json::Value, Error> {
        self.get(self.api_url("json/info")?).await
    }

    /// `GET /json/state`.
    pub async fn get_state(&self) -> Result<serde_json::Value, Error> {
        self.get(self.api_url("json/state")?).await
    }

    /// `GET /json/eff`: effect names indexed by effect ID.
    pub async fn get_effects(&self) -> Result<Vec<String>, Error> {
        self.get(self.api_url("json/eff")?).await
    }

    /// `GET /json/pal`: palette names indexed by palette ID.
    pub async fn get_palettes(&self) -> Result<Vec<String>, Error> {
        self.get(self.api_url("json/pal")?).await
    }

    /// `POST /json` with a state command body.
    pub async fn post_state(&self, command: &serde_json::Value) -> Result<CommandAck, Error> {
        self.post(self.api_url("json")?, command).await
    }

    /// `GET /win?{query}`: legacy HTTP API for raw parameter strings
    /// such as `A=255&FX=0`. Returns the XML body untouched.
    pub async fn raw_command(&self, query: &str) -> Result<String, Error> {
        let mut url = self.api_url("win")?;
        url.set_query(Some(query.trim_start_matches('?')));
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(|e| self.map_send(e))?;
        let resp = check_status(resp)?;
        resp.text().await.map_err(|e| self.map_send(e))
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn api_url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(|e| self.map_send(e))?;
        self.decode(resp).await
    }

    async fn post<T: DeserializeOwned>(&self, url: Url, body: &impl Serialize) -> Result<T, Error> {
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send(e))?;
        self.decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, Error> {
        let resp = check_status(resp)?;
        let body = resp.text().await.map_err(|e| self.map_send(e))?;

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    fn map_send(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_ms: self.timeout_ms,
            }
        } else {
            Error::Transport(err)
        }
    }
}

fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(Error::Status {
            status: status.as_u16(),
            url: resp.url().to_string(),
        })
    }
}

/// Normalise a host string into a base URL with a trailing slash.
pub fn base_url_for(host: &str) -> Result<Url, Error> {
    let host = host.trim();
    let with_scheme = if host.contains("://") {
        host.to_owned()
    } else {
        format!("http://{host}")
    };
    let mut url = Url::parse(&with_scheme)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
