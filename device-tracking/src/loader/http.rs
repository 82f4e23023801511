//! HTTP module source.
//!
//! Fetches module code over HTTP(S) with `reqwest` and hands the bytes to a
//! [`ModuleLinker`], which turns them into a [`RemoteValue`]. The linker is
//! where an embedding application plugs in whatever can actually run the
//! downloaded code.

use std::sync::Arc;

use tracing::debug;

use super::module::{BoxFuture, ModuleSource, RemoteValue, SourceError};

/// Turns downloaded module code into a loadable value.
pub trait ModuleLinker: Send + Sync {
    /// Instantiate the code fetched from `url`.
    ///
    /// # Arguments
    ///
    /// * `url` - The URL the code was downloaded from
    /// * `code` - The response body, unmodified
    ///
    /// # Returns
    ///
    /// The value the code evaluates to, or an instantiation error.
    fn link(&self, url: &str, code: Vec<u8>) -> Result<RemoteValue, SourceError>;
}

/// Module source that downloads code with an async `reqwest` client.
pub struct HttpModuleSource {
    client: reqwest::Client,
    linker: Arc<dyn ModuleLinker>,
}

impl HttpModuleSource {
    /// Creates a source with a default client.
    ///
    /// No client-side timeout is set; the loader bounds every load.
    ///
    /// # Arguments
    ///
    /// * `linker` - Turns downloaded code into a module value
    ///
    /// # Returns
    ///
    /// The source, or an error if the HTTP client could not be built.
    pub fn new(linker: Arc<dyn ModuleLinker>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self { client, linker })
    }

    /// Creates a source around an existing client.
    ///
    /// # Arguments
    ///
    /// * `client` - Preconfigured client (proxy, TLS roots, headers)
    /// * `linker` - Turns downloaded code into a module value
    pub fn with_client(client: reqwest::Client, linker: Arc<dyn ModuleLinker>) -> Self {
        Self { client, linker }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("HTTP {} from {}", response.status(), url).into());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| format!("Failed to read response: {}", e))?;

        debug!(url = %url, bytes = body.len(), "Fetched device module code");
        Ok(body.to_vec())
    }
}

impl ModuleSource for HttpModuleSource {
    fn load<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<RemoteValue, SourceError>> {
        Box::pin(async move {
            let code = self.fetch(url).await?;
            self.linker.link(url, code)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Linker that parses the body as JSON data and records what it saw.
    #[derive(Default)]
    struct JsonLinker {
        seen: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl ModuleLinker for JsonLinker {
        fn link(&self, url: &str, code: Vec<u8>) -> Result<RemoteValue, SourceError> {
            self.seen.lock().unwrap().push((url.to_string(), code.clone()));
            let value = serde_json::from_slice(&code)?;
            Ok(RemoteValue::Value(value))
        }
    }

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}/js/device-module.js", addr)
    }

    /// Source that talks to the local test server directly.
    fn local_source(linker: Arc<dyn ModuleLinker>) -> HttpModuleSource {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        HttpModuleSource::with_client(client, linker)
    }

    #[test]
    fn test_new_builds_default_client() {
        assert!(HttpModuleSource::new(Arc::new(JsonLinker::default())).is_ok());
    }

    #[tokio::test]
    async fn test_fetches_and_links_module_code() {
        let url = serve_once("200 OK", r#"{"version":1}"#).await;
        let linker = Arc::new(JsonLinker::default());
        let source = local_source(linker.clone());

        let value = source.load(&url).await.unwrap();

        match value {
            RemoteValue::Value(data) => assert_eq!(data, json!({ "version": 1 })),
            other => panic!("unexpected value: {:?}", other),
        }
        let seen = linker.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, url);
    }

    #[tokio::test]
    async fn test_http_error_status_fails() {
        let url = serve_once("404 Not Found", "missing").await;
        let linker = Arc::new(JsonLinker::default());
        let source = local_source(linker.clone());

        let err = source.load(&url).await.unwrap_err();

        assert!(err.to_string().contains("HTTP 404"), "got: {}", err);
        assert!(linker.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connection_refused_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = local_source(Arc::new(JsonLinker::default()));
        let err = source
            .load(&format!("http://{}/js/device-module.js", addr))
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("Request failed"), "got: {}", err);
    }

    #[tokio::test]
    async fn test_linker_errors_propagate() {
        let url = serve_once("200 OK", "export function trackDevice() {}").await;
        let source = local_source(Arc::new(JsonLinker::default()));

        assert!(source.load(&url).await.is_err());
    }
}
