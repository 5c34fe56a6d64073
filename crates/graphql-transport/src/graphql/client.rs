//! GraphQL client implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::request::Operation;
use super::response::GraphQLResponse;
use crate::channel::{ChannelConfig, ChannelMultiplexer, ConnectionEvent, run_channel_operation};
use crate::error::{Result, TransportError};
use crate::http::{HttpClient, HttpClientBuilder, HttpRequest};
use crate::observer::{Delivery, Observer, OperationHandle};
use crate::runner::{self, Handoff, RequestContext};
use crate::transport::UnaryTransport;

/// Builder for creating a GraphQL client.
pub struct GraphQLClientBuilder {
    http_url: String,
    websocket_url: Option<String>,
    transport: Option<Arc<dyn UnaryTransport>>,
    http_client: Option<HttpClient>,
    http_client_builder: Option<HttpClientBuilder>,
    default_headers: HashMap<String, String>,
    auth_token: Option<String>,
    connection_init_payload: Option<Value>,
    request_timeout: Option<Duration>,
    error: Option<TransportError>,
}

impl GraphQLClientBuilder {
    /// Create a new builder with the specified GraphQL endpoint URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http_url: url.into(),
            websocket_url: None,
            transport: None,
            http_client: None,
            http_client_builder: None,
            default_headers: HashMap::new(),
            auth_token: None,
            connection_init_payload: None,
            request_timeout: None,
            error: None,
        }
    }

    /// Set a separate WebSocket URL for channel subscriptions.
    ///
    /// If not set, the HTTP URL will be converted to WebSocket protocol
    /// (http:// -> ws://, https:// -> wss://).
    pub fn websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = Some(url.into());
        self
    }

    /// Send requests through a custom transport instead of reqwest.
    pub fn transport(mut self, transport: impl UnaryTransport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Use an existing HTTP client.
    pub fn http_client(mut self, client: HttpClient) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Use a custom HTTP client builder.
    pub fn http_client_builder(mut self, builder: HttpClientBuilder) -> Self {
        self.http_client_builder = Some(builder);
        self
    }

    /// Add a default header to all requests and channel handshakes.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Add multiple headers.
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.default_headers.extend(headers);
        self
    }

    /// Set bearer token authentication.
    ///
    /// This adds the Authorization header and includes the token
    /// in the channel's `connection_init` payload.
    pub fn bearer_auth(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.auth_token = Some(token.clone());
        self.default_headers
            .insert("Authorization".into(), format!("Bearer {}", token));
        self
    }

    /// Set the `connection_init` payload for channels.
    ///
    /// This is sent when establishing the WebSocket connection and can
    /// include authentication tokens or other initialization data.
    /// A payload that fails to serialize is reported by [`build`](Self::build).
    pub fn connection_init_payload(mut self, payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(payload) => self.connection_init_payload = Some(payload),
            Err(e) => {
                tracing::error!(target: "graphql_transport::http", "Failed to serialize connection_init payload: {}", e);
                self.error.get_or_insert(e.into());
            }
        }
        self
    }

    /// Set the request timeout of the default HTTP client.
    ///
    /// The timeout covers the whole body, so it also ends streamed responses.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Build the GraphQL client.
    pub fn build(self) -> Result<GraphQLClient> {
        if let Some(error) = self.error {
            return Err(error);
        }
        url::Url::parse(&self.http_url)?;

        let transport: Arc<dyn UnaryTransport> = if let Some(transport) = self.transport {
            transport
        } else if let Some(client) = self.http_client {
            Arc::new(client)
        } else if let Some(builder) = self.http_client_builder {
            Arc::new(builder.build()?)
        } else {
            let mut builder = HttpClient::builder();
            if let Some(timeout) = self.request_timeout {
                builder = builder.timeout(timeout);
            }
            Arc::new(builder.build()?)
        };

        let websocket_url = self
            .websocket_url
            .unwrap_or_else(|| Self::http_to_ws_url(&self.http_url));

        let mut headers = HeaderMap::new();
        for (name, value) in &self.default_headers {
            headers.insert(
                HeaderName::try_from(name.as_str())?,
                HeaderValue::try_from(value.as_str())?,
            );
        }

        let init_payload = if self.connection_init_payload.is_some() {
            self.connection_init_payload
        } else {
            self.auth_token.as_ref().map(|token| {
                serde_json::json!({
                    "Authorization": format!("Bearer {}", token)
                })
            })
        };

        Ok(GraphQLClient {
            inner: Arc::new(GraphQLClientInner {
                transport,
                http_url: self.http_url,
                websocket_url,
                default_headers: self.default_headers,
                headers,
                init_payload,
            }),
        })
    }

    fn http_to_ws_url(url: &str) -> String {
        if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            url.to_string()
        }
    }
}

struct GraphQLClientInner {
    transport: Arc<dyn UnaryTransport>,
    http_url: String,
    websocket_url: String,
    default_headers: HashMap<String, String>,
    headers: HeaderMap,
    init_payload: Option<Value>,
}

/// A GraphQL client for queries, mutations, and subscriptions.
///
/// Every streaming entry point takes an [`Observer`] and returns an
/// [`OperationHandle`]; the observer sees any number of `on_next` calls and
/// then exactly one of `on_error` or `on_complete`.
///
/// # Example
///
/// ```ignore
/// use graphql_transport::{Callbacks, GraphQLClient, Operation};
///
/// let client = GraphQLClient::new("https://api.example.com/graphql")
///     .bearer_auth("my-token")
///     .build()?;
///
/// // Execute a query
/// let response = client.execute(Operation::query("{ users { id name } }")).await?;
///
/// // Subscribe through a 201 handoff to an event stream
/// let handle = client.event_source(
///     Operation::subscription("subscription { events { id } }"),
///     Callbacks::new(
///         |value| println!("{value}"),
///         |error| eprintln!("{error}"),
///         || println!("done"),
///     ),
/// );
/// handle.cancel();
/// ```
#[derive(Clone)]
pub struct GraphQLClient {
    inner: Arc<GraphQLClientInner>,
}

impl GraphQLClient {
    /// Create a new GraphQL client with the specified endpoint URL.
    pub fn new(url: impl Into<String>) -> GraphQLClientBuilder {
        GraphQLClientBuilder::new(url)
    }

    /// Create a new builder for configuring a GraphQL client.
    pub fn builder(url: impl Into<String>) -> GraphQLClientBuilder {
        GraphQLClientBuilder::new(url)
    }

    /// Get the HTTP endpoint URL.
    pub fn url(&self) -> &str {
        &self.inner.http_url
    }

    /// Get the WebSocket URL for channels.
    pub fn websocket_url(&self) -> &str {
        &self.inner.websocket_url
    }

    /// Execute a unary operation and wait for its result.
    ///
    /// A `201` handoff is reported as [`TransportError::UnexpectedHandoff`].
    pub async fn execute(&self, operation: Operation) -> Result<GraphQLResponse> {
        let request = HttpRequest::post(&self.inner.http_url)
            .json_body(operation.to_body()?)
            .headers(&self.inner.headers);

        let response = self.inner.transport.send(request).await?;

        match response.status() {
            200 => response.json().await,
            201 => Err(TransportError::UnexpectedHandoff(
                response.location().unwrap_or_default().to_owned(),
            )),
            _ => Err(response.into_rejection().await),
        }
    }

    /// Execute a query and parse the result.
    pub async fn query<T: DeserializeOwned>(&self, query: impl Into<String>) -> Result<T> {
        self.execute(Operation::query(query)).await?.data()
    }

    /// Execute a query with variables and parse the result.
    pub async fn query_with_variables<T: DeserializeOwned>(
        &self,
        query: impl Into<String>,
        variables: impl Serialize,
    ) -> Result<T> {
        let operation = Operation::query(query).variables(variables);
        self.execute(operation).await?.data()
    }

    /// Execute a mutation and parse the result.
    pub async fn mutate<T: DeserializeOwned>(&self, mutation: impl Into<String>) -> Result<T> {
        self.execute(Operation::mutation(mutation)).await?.data()
    }

    /// Execute a mutation with variables and parse the result.
    pub async fn mutate_with_variables<T: DeserializeOwned>(
        &self,
        mutation: impl Into<String>,
        variables: impl Serialize,
    ) -> Result<T> {
        let operation = Operation::mutation(mutation).variables(variables);
        self.execute(operation).await?.data()
    }

    /// Run a unary operation, reporting the result to `observer`.
    pub fn fetch(&self, operation: Operation, observer: impl Observer) -> OperationHandle {
        self.run(operation, Handoff::None, observer)
    }

    /// Run an operation that may be handed off to a server-sent event stream.
    pub fn event_source(&self, operation: Operation, observer: impl Observer) -> OperationHandle {
        self.run(operation, Handoff::EventSource, observer)
    }

    /// Run an operation whose results arrive as newline-delimited JSON.
    pub fn stream(&self, operation: Operation, observer: impl Observer) -> OperationHandle {
        self.run(operation, Handoff::Stream, observer)
    }

    /// Run an operation that may be handed off to a channel.
    pub fn channel(&self, operation: Operation, observer: impl Observer) -> OperationHandle {
        self.run(operation, Handoff::Channel(self.channel_config()), observer)
    }

    /// Subscribe through a server-sent event stream without a prior `POST`.
    ///
    /// The operation is sent as the `query`, `variables` and `operationName`
    /// URL parameters of a `GET` to the endpoint.
    pub fn subscribe_event_source(
        &self,
        operation: Operation,
        observer: impl Observer,
    ) -> OperationHandle {
        let handle = OperationHandle::new();
        let cancel = handle.token();
        let client = self.clone();

        tokio::spawn(async move {
            let mut delivery = Delivery::new(observer);
            let url = match event_source_url(&client.inner.http_url, &operation) {
                Ok(url) => url,
                Err(error) => return delivery.error(error),
            };
            let request = runner::event_source_request(&url, &client.inner.headers);
            runner::open_event_stream(client.inner.transport.as_ref(), request, cancel, &mut delivery)
                .await;
        });
        handle
    }

    /// Subscribe on a dedicated channel at the WebSocket URL without a prior
    /// `POST`.
    pub fn subscribe(&self, operation: Operation, observer: impl Observer) -> OperationHandle {
        let handle = OperationHandle::new();
        let cancel = handle.token();
        let config = self.channel_config().url(self.inner.websocket_url.clone());

        tokio::spawn(async move {
            let mut delivery = Delivery::new(observer);
            run_channel_operation(config, operation, cancel, &mut delivery).await;
        });
        handle
    }

    /// Open a channel at the WebSocket URL for many subscriptions.
    pub fn connect_channel(
        &self,
        on_connection: impl FnMut(ConnectionEvent) + Send + 'static,
    ) -> ChannelMultiplexer {
        let config = self.channel_config().url(self.inner.websocket_url.clone());
        ChannelMultiplexer::connect(config, on_connection)
    }

    fn run(&self, operation: Operation, handoff: Handoff, observer: impl Observer) -> OperationHandle {
        let context = RequestContext::new(self.inner.http_url.clone())
            .headers(self.inner.headers.clone());
        runner::run_operation(self.inner.transport.clone(), context, operation, handoff, observer)
    }

    /// Channel settings shared by every channel this client opens. The URL
    /// is filled in per channel.
    fn channel_config(&self) -> ChannelConfig {
        let mut config = ChannelConfig::default().headers(self.inner.default_headers.clone());
        if let Some(payload) = &self.inner.init_payload {
            config = config.init_payload(payload.clone());
        }
        config
    }
}

impl std::fmt::Debug for GraphQLClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQLClient")
            .field("http_url", &self.inner.http_url)
            .field("websocket_url", &self.inner.websocket_url)
            .finish()
    }
}

/// The endpoint URL with the operation encoded as query parameters.
fn event_source_url(endpoint: &str, operation: &Operation) -> Result<String> {
    let mut url = url::Url::parse(endpoint)?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("query", &operation.query);
        if let Some(variables) = &operation.variables {
            pairs.append_pair("variables", &serde_json::to_string(variables)?);
        }
        if let Some(name) = &operation.operation_name {
            pairs.append_pair("operationName", name);
        }
    }
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_to_ws_url() {
        assert_eq!(
            GraphQLClientBuilder::http_to_ws_url("https://example.com/graphql"),
            "wss://example.com/graphql"
        );
        assert_eq!(
            GraphQLClientBuilder::http_to_ws_url("http://example.com/graphql"),
            "ws://example.com/graphql"
        );
    }

    #[test]
    fn test_builder_defaults() {
        let client = GraphQLClient::new("https://api.example.com/graphql")
            .build()
            .unwrap();

        assert_eq!(client.url(), "https://api.example.com/graphql");
        assert_eq!(client.websocket_url(), "wss://api.example.com/graphql");
    }

    #[test]
    fn test_builder_custom_ws_url() {
        let client = GraphQLClient::new("https://api.example.com/graphql")
            .websocket_url("wss://ws.example.com/graphql")
            .build()
            .unwrap();

        assert_eq!(client.websocket_url(), "wss://ws.example.com/graphql");
    }

    #[test]
    fn test_builder_auth() {
        let client = GraphQLClient::new("https://api.example.com/graphql")
            .bearer_auth("my-token")
            .build()
            .unwrap();

        assert_eq!(client.inner.headers["authorization"], "Bearer my-token");
        let config = client.channel_config();
        assert_eq!(
            config.init_payload,
            Some(serde_json::json!({"Authorization": "Bearer my-token"}))
        );
        assert_eq!(config.headers["Authorization"], "Bearer my-token");
    }

    #[test]
    fn test_builder_rejects_bad_header() {
        let result = GraphQLClient::new("https://api.example.com/graphql")
            .header("bad header", "x")
            .build();
        assert!(matches!(result, Err(TransportError::InvalidHeader(_))));
    }

    #[test]
    fn test_builder_reports_unserializable_init_payload() {
        let payload = std::collections::BTreeMap::from([((1, 2), "x")]);
        let result = GraphQLClient::new("https://api.example.com/graphql")
            .connection_init_payload(payload)
            .build();
        assert!(matches!(result, Err(TransportError::Json(_))));
    }

    #[test]
    fn test_event_source_url() {
        let operation = Operation::subscription("subscription { a }")
            .variable("x", 1)
            .operation_name("A");
        let url = event_source_url("http://h/graphql", &operation).unwrap();
        assert_eq!(
            url,
            "http://h/graphql?query=subscription+%7B+a+%7D&variables=%7B%22x%22%3A1%7D&operationName=A"
        );
    }
}
