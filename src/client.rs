// BreweryDB client and the shared request pipeline every resource call goes
// through: build parameters, send, decode, check for service errors.
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::{ClientConfig, DecodePolicy, ResponseFormat};
use crate::error::{BreweryDbError, Result};
use crate::params::Params;
use crate::transport::{HttpMethod, HttpTransport, PreparedRequest, Transport};
use crate::xml;

/// Everything one call produced. Returned by value so concurrent callers
/// never have to read it back from shared client state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub request_uri: String,
    pub method: HttpMethod,
    pub status: u16,
    pub raw_body: String,
    pub data: Value,
    // XML only: part of the document was deeper than `xml::MAX_DEPTH`
    pub truncated: bool,
}

// Snapshot of the most recent call, kept for debugging
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub request_uri: Option<String>,
    pub raw_response: Option<String>,
    pub parsed_response: Option<Value>,
}

pub struct BreweryDbClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    last: Mutex<Diagnostics>,
}

impl std::fmt::Debug for BreweryDbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreweryDbClient")
            .field("base_url", &self.config.base_url)
            .field("format", &self.config.format)
            .finish_non_exhaustive()
    }
}

impl BreweryDbClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            last: Mutex::new(Diagnostics::default()),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn api_key(&self) -> &str {
        &self.config.api_key
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn format(&self) -> ResponseFormat {
        self.config.format
    }

    // Anything other than "json" or "xml" (ignoring case) selects JSON
    pub fn set_format(&mut self, format: &str) -> &mut Self {
        self.config.format = ResponseFormat::from_lenient(format);
        self
    }

    pub fn set_response_format(&mut self, format: ResponseFormat) -> &mut Self {
        self.config.format = format;
        self
    }

    pub fn last_request_uri(&self) -> Option<String> {
        self.last.lock().request_uri.clone()
    }

    pub fn last_raw_response(&self) -> Option<String> {
        self.last.lock().raw_response.clone()
    }

    pub fn last_parsed_response(&self) -> Option<Value> {
        self.last.lock().parsed_response.clone()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.last.lock().clone()
    }

    /// Builds the outgoing request without sending it.
    ///
    /// `apikey` and `format` are added before empty values are stripped, so an
    /// empty API key is silently left out rather than rejected.
    pub fn prepare(
        &self,
        endpoint: &str,
        mut params: Params,
        method: HttpMethod,
    ) -> Result<PreparedRequest> {
        if matches!(method, HttpMethod::Put | HttpMethod::Delete) {
            return Err(BreweryDbError::UnsupportedMethod(method));
        }

        params.insert("apikey", self.config.api_key.as_str());
        params.insert("format", self.config.format.as_str());
        params.strip_empty();

        let url = format!(
            "{}/{}/",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_matches('/')
        );
        let encoded = params.to_query_string();

        let request = match method {
            HttpMethod::Post => PreparedRequest {
                method,
                uri: url,
                body: Some(encoded),
            },
            _ if encoded.is_empty() => PreparedRequest {
                method,
                uri: url,
                body: None,
            },
            _ => PreparedRequest {
                method,
                uri: format!("{}?{}", url, encoded),
                body: None,
            },
        };
        Ok(request)
    }

    /// Sends one request to `endpoint` and returns the decoded body.
    ///
    /// The method applies to this call only. Diagnostics are cleared first;
    /// the call then fills its own snapshot and publishes it in one step when
    /// it finishes, so after a failure they show how far it got.
    pub async fn request(
        &self,
        endpoint: &str,
        params: Params,
        method: HttpMethod,
    ) -> Result<ApiResponse> {
        *self.last.lock() = Diagnostics::default();

        let mut snapshot = Diagnostics::default();
        let result = self.execute(endpoint, params, method, &mut snapshot).await;
        *self.last.lock() = snapshot;
        result
    }

    async fn execute(
        &self,
        endpoint: &str,
        params: Params,
        method: HttpMethod,
        snapshot: &mut Diagnostics,
    ) -> Result<ApiResponse> {
        let format = self.config.format;
        let prepared = self.prepare(endpoint, params, method)?;
        snapshot.request_uri = Some(prepared.uri.clone());

        let uri = redact_api_key(&prepared.uri);
        tracing::debug!(method = %prepared.method, %uri, %format, "sending request");

        let raw = match self.transport.send(&prepared).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!(method = %prepared.method, %uri, error = %err, "request failed");
                if let BreweryDbError::Transport(message) = &err {
                    snapshot.raw_response = Some(message.clone());
                }
                return Err(err);
            }
        };

        let status = raw.status;
        let raw_body = raw.body_text();
        snapshot.raw_response = Some(raw_body.clone());

        tracing::debug!(
            method = %prepared.method,
            %uri,
            status,
            bytes = raw.body.len(),
            "response received"
        );

        let (mut data, truncated) = self.decode(format, &raw.body)?;
        snapshot.parsed_response = Some(data.clone());

        if let Some(error) = data.get("error").filter(|error| !error.is_null()) {
            let message = service_error_message(error);
            tracing::warn!(endpoint, status, %message, "service reported an error");
            return Err(BreweryDbError::Service(message));
        }

        if format == ResponseFormat::Xml {
            xml::strip_root_attributes(&mut data);
            snapshot.parsed_response = Some(data.clone());
        }

        Ok(ApiResponse {
            request_uri: prepared.uri,
            method: prepared.method,
            status,
            raw_body,
            data,
            truncated,
        })
    }

    pub async fn get(&self, endpoint: &str, params: Params) -> Result<ApiResponse> {
        self.request(endpoint, params, HttpMethod::Get).await
    }

    pub async fn post(&self, endpoint: &str, params: Params) -> Result<ApiResponse> {
        self.request(endpoint, params, HttpMethod::Post).await
    }

    // Works on the undecoded bytes so invalid UTF-8 is a decode failure
    // rather than silently replaced, and XML can declare its own encoding.
    fn decode(&self, format: ResponseFormat, body: &[u8]) -> Result<(Value, bool)> {
        let lenient = self.config.decode_policy == DecodePolicy::Lenient;

        match format {
            ResponseFormat::Json => match serde_json::from_slice(body) {
                Ok(value) => Ok((value, false)),
                Err(_) if lenient => Ok((Value::Null, false)),
                Err(e) => Err(BreweryDbError::Decode(format!("invalid JSON body: {}", e))),
            },
            ResponseFormat::Xml => match xml::normalize_bytes(body) {
                Ok(normalized) => {
                    let truncated = normalized.is_truncated();
                    Ok((normalized.into_value(), truncated))
                }
                Err(_) if lenient => Ok((Value::Object(Map::new()), false)),
                Err(e) => Err(e.into()),
            },
        }
    }
}

// Request URI for log output, with the API key masked
fn redact_api_key(uri: &str) -> String {
    let Some((base, query)) = uri.split_once('?') else {
        return uri.to_string();
    };

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if key == "apikey" {
            serializer.append_pair(&key, "redacted");
        } else {
            serializer.append_pair(&key, &value);
        }
    }
    format!("{}?{}", base, serializer.finish())
}

fn service_error_message(error: &Value) -> String {
    match error.get("message") {
        Some(Value::String(message)) => message.clone(),
        Some(other) => other.to_string(),
        None => match error {
            Value::String(message) => message.clone(),
            other => other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock_transport::MockTransport;
    use serde_json::json;
    use std::time::Duration;
    use url::form_urlencoded;

    fn client_with(transport: &Arc<MockTransport>, config: ClientConfig) -> BreweryDbClient {
        BreweryDbClient::with_transport(config, transport.clone())
    }

    fn query_pairs(uri: &str) -> Vec<(String, String)> {
        let query = uri.split_once('?').map(|(_, q)| q).unwrap_or("");
        form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn test_prepare_get_appends_query() {
        let client = BreweryDbClient::with_transport(
            ClientConfig::new("secret"),
            Arc::new(MockTransport::new()),
        );
        let params = Params::new().with("page", 2u32).with("since", "");
        let request = client.prepare("beers", params, HttpMethod::Get).unwrap();

        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(
            request.uri,
            "http://www.brewerydb.com/api/beers/?page=2&apikey=secret&format=json"
        );
        assert!(request.body.is_none());
    }

    #[test]
    fn test_prepare_post_uses_body() {
        let client = BreweryDbClient::with_transport(
            ClientConfig::new("secret").with_base_url("http://localhost:8080/api/"),
            Arc::new(MockTransport::new()),
        );
        let params = Params::new().with("metadata", true);
        let request = client.prepare("/maproute/", params, HttpMethod::Post).unwrap();

        assert_eq!(request.uri, "http://localhost:8080/api/maproute/");
        assert_eq!(
            request.body.as_deref(),
            Some("metadata=1&apikey=secret&format=json")
        );
    }

    #[test]
    fn test_prepare_drops_empty_api_key() {
        let client = BreweryDbClient::with_transport(
            ClientConfig::new(""),
            Arc::new(MockTransport::new()),
        );
        let request = client.prepare("styles", Params::new(), HttpMethod::Get).unwrap();
        assert_eq!(
            query_pairs(&request.uri),
            vec![("format".to_string(), "json".to_string())]
        );
    }

    #[test]
    fn test_prepare_overrides_caller_supplied_key_and_format() {
        let client = BreweryDbClient::with_transport(
            ClientConfig::new("real").with_format(ResponseFormat::Xml),
            Arc::new(MockTransport::new()),
        );
        let params = Params::new().with("apikey", "fake").with("format", "yaml");
        let request = client.prepare("styles", params, HttpMethod::Get).unwrap();
        assert_eq!(
            query_pairs(&request.uri),
            vec![
                ("apikey".to_string(), "real".to_string()),
                ("format".to_string(), "xml".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_put_and_delete_are_rejected_before_sending() {
        let transport = Arc::new(MockTransport::new());
        let client = client_with(&transport, ClientConfig::new("key"));

        for method in [HttpMethod::Put, HttpMethod::Delete] {
            let err = client.request("beers", Params::new(), method).await.unwrap_err();
            assert!(matches!(err, BreweryDbError::UnsupportedMethod(m) if m == method));
        }
        assert_eq!(transport.call_count(), 0);
        assert_eq!(client.diagnostics(), Diagnostics::default());
    }

    #[tokio::test]
    async fn test_json_response_and_diagnostics() {
        let body = r#"{"status":"success","data":[{"id":1,"name":"Ale"}]}"#;
        let transport = Arc::new(MockTransport::with_body(body));
        let client = client_with(&transport, ClientConfig::new("key"));

        let response = client.get("beers", Params::new()).await.unwrap();

        assert_eq!(response.data["data"][0]["name"], "Ale");
        assert_eq!(response.status, 200);
        assert!(!response.truncated);
        assert_eq!(client.last_raw_response().as_deref(), Some(body));
        assert_eq!(client.last_parsed_response(), Some(response.data.clone()));
        assert_eq!(client.last_request_uri(), Some(response.request_uri.clone()));
    }

    #[tokio::test]
    async fn test_service_error_from_json() {
        let transport = Arc::new(MockTransport::with_body(
            r#"{"error":{"message":"Invalid API Key"}}"#,
        ));
        let client = client_with(&transport, ClientConfig::new("bad"));

        let err = client.get("beers", Params::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Brewerydb Service Error: Invalid API Key");
        assert!(matches!(err, BreweryDbError::Service(ref m) if m == "Invalid API Key"));
        // the failing body stays available for debugging
        assert!(client.last_parsed_response().is_some());
    }

    #[tokio::test]
    async fn test_service_error_from_xml() {
        let transport = Arc::new(MockTransport::with_body(
            "<error><message>Invalid API Key</message></error>",
        ));
        let client = client_with(
            &transport,
            ClientConfig::new("bad").with_format(ResponseFormat::Xml),
        );

        let err = client.get("beers", Params::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Brewerydb Service Error: Invalid API Key");
    }

    #[tokio::test]
    async fn test_xml_response_is_normalized_and_root_attributes_stripped() {
        let transport = Arc::new(MockTransport::with_body(
            r#"<response version="1"><data><beer id="4">Stout</beer></data></response>"#,
        ));
        let mut client = client_with(&transport, ClientConfig::new("key"));
        client.set_format("XML");

        let response = client.get("beer/4", Params::new()).await.unwrap();
        assert_eq!(
            response.data,
            json!({"response": {"data": {"beer": {"@attributes": {"id": "4"}}}}})
        );
        assert_eq!(client.last_parsed_response(), Some(response.data));
        assert!(transport.last_request().unwrap().uri.contains("format=xml"));
    }

    #[tokio::test]
    async fn test_transport_error_is_recorded() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error(BreweryDbError::Transport("connection refused".to_string()));
        let client = client_with(&transport, ClientConfig::new("key"));

        let err = client.get("beers", Params::new()).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(client.last_raw_response().as_deref(), Some("connection refused"));
        assert!(client.last_request_uri().is_some());
        assert!(client.last_parsed_response().is_none());
    }

    #[tokio::test]
    async fn test_strict_decoding_rejects_malformed_bodies() {
        let transport = Arc::new(MockTransport::new());
        transport.push_body("<html>oops");
        transport.push_body("not xml at all <");
        let mut client = client_with(&transport, ClientConfig::new("key"));

        let err = client.get("beers", Params::new()).await.unwrap_err();
        assert!(matches!(err, BreweryDbError::Decode(_)));
        assert_eq!(client.last_raw_response().as_deref(), Some("<html>oops"));

        client.set_response_format(ResponseFormat::Xml);
        let err = client.get("beers", Params::new()).await.unwrap_err();
        assert!(matches!(err, BreweryDbError::Decode(_)));
    }

    #[tokio::test]
    async fn test_lenient_decoding_degrades() {
        let transport = Arc::new(MockTransport::new());
        transport.push_body("<html>oops");
        transport.push_body("<a><b></a>");
        let mut client = client_with(
            &transport,
            ClientConfig::new("key").with_decode_policy(DecodePolicy::Lenient),
        );

        let response = client.get("beers", Params::new()).await.unwrap();
        assert_eq!(response.data, Value::Null);

        client.set_response_format(ResponseFormat::Xml);
        let response = client.get("beers", Params::new()).await.unwrap();
        assert_eq!(response.data, json!({}));
    }

    #[tokio::test]
    async fn test_diagnostics_reset_at_start_of_each_call() {
        let transport = Arc::new(MockTransport::with_body(r#"{"data":1}"#));
        let client = client_with(&transport, ClientConfig::new("key"));

        client.get("beers", Params::new()).await.unwrap();
        assert!(client.last_parsed_response().is_some());

        let _ = client.request("beers", Params::new(), HttpMethod::Delete).await;
        assert_eq!(client.diagnostics(), Diagnostics::default());
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_client() {
        let transport = Arc::new(MockTransport::new());
        for i in 0..8 {
            transport.push_body(&format!(r#"{{"n":{}}}"#, i));
        }
        let client = client_with(&transport, ClientConfig::new("key"));

        let calls = (0..8).map(|_| client.get("beers", Params::new()));
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(transport.call_count(), 8);
        assert!(client.last_parsed_response().is_some());
    }

    #[tokio::test]
    async fn test_invalid_utf8_json_is_a_decode_error() {
        let transport = Arc::new(MockTransport::new());
        transport.push_bytes(b"{\"name\":\"Caf\xe9\"}");
        let client = client_with(&transport, ClientConfig::new("key"));

        let err = client.get("beers", Params::new()).await.unwrap_err();
        assert!(matches!(err, BreweryDbError::Decode(_)));
        assert_eq!(
            client.last_raw_response().as_deref(),
            Some("{\"name\":\"Caf\u{fffd}\"}")
        );
        assert!(client.last_parsed_response().is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_json_is_null_when_lenient() {
        let transport = Arc::new(MockTransport::new());
        transport.push_bytes(b"{\"name\":\"Caf\xe9\"}");
        let client = client_with(
            &transport,
            ClientConfig::new("key").with_decode_policy(DecodePolicy::Lenient),
        );

        let response = client.get("beers", Params::new()).await.unwrap();
        assert_eq!(response.data, Value::Null);
    }

    #[tokio::test]
    async fn test_xml_body_in_declared_latin1() {
        let transport = Arc::new(MockTransport::new());
        transport.push_bytes(
            b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><response><name>Caf\xe9</name></response>",
        );
        let client = client_with(
            &transport,
            ClientConfig::new("key").with_format(ResponseFormat::Xml),
        );

        let response = client.get("beer/1", Params::new()).await.unwrap();
        assert_eq!(response.data, json!({"response": {"name": "Caf\u{e9}"}}));
    }

    #[tokio::test]
    async fn test_null_error_entry_is_not_a_service_error() {
        let transport = Arc::new(MockTransport::with_body(r#"{"error":null,"data":[1]}"#));
        let client = client_with(&transport, ClientConfig::new("key"));

        let response = client.get("beers", Params::new()).await.unwrap();
        assert_eq!(response.data["data"], json!([1]));
    }

    #[tokio::test]
    async fn test_deep_xml_marks_response_truncated() {
        let mut body = String::new();
        for level in 0..xml::MAX_DEPTH + 2 {
            body.push_str(&format!("<n{}>", level));
        }
        body.push_str("deep");
        for level in (0..xml::MAX_DEPTH + 2).rev() {
            body.push_str(&format!("</n{}>", level));
        }
        let transport = Arc::new(MockTransport::with_body(&body));
        let client = client_with(
            &transport,
            ClientConfig::new("key").with_format(ResponseFormat::Xml),
        );

        let response = client.get("beers", Params::new()).await.unwrap();
        assert!(response.truncated);
        assert_eq!(client.last_parsed_response(), Some(response.data));
    }

    #[tokio::test]
    async fn test_diagnostics_come_from_a_single_call() {
        let transport = Arc::new(MockTransport::new());
        transport.push_delayed_body(r#"{"who":"a"}"#, Duration::from_millis(50));
        transport.push_body(r#"{"who":"b"}"#);
        let client = client_with(&transport, ClientConfig::new("k"));

        // "a" is sent first but finishes last
        let (a, b) = futures::join!(
            client.get("a", Params::new()),
            client.get("b", Params::new())
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.data, json!({"who": "a"}));
        assert_eq!(b.data, json!({"who": "b"}));

        let diagnostics = client.diagnostics();
        assert_eq!(diagnostics.request_uri, Some(a.request_uri));
        assert_eq!(diagnostics.raw_response.as_deref(), Some(r#"{"who":"a"}"#));
        assert_eq!(diagnostics.parsed_response, Some(a.data));
    }

    #[test]
    fn test_logged_uri_hides_api_key() {
        assert_eq!(
            redact_api_key("http://host/api/beers/?page=2&apikey=secret&format=json"),
            "http://host/api/beers/?page=2&apikey=redacted&format=json"
        );
        assert_eq!(
            redact_api_key("http://host/api/maproute/"),
            "http://host/api/maproute/"
        );
    }

    #[test]
    fn test_service_error_message_shapes() {
        assert_eq!(service_error_message(&json!({"message": "nope"})), "nope");
        assert_eq!(service_error_message(&json!("plain")), "plain");
        assert_eq!(service_error_message(&json!({"code": 5})), r#"{"code":5}"#);
    }

    #[test]
    fn test_blocking_callers_can_drive_the_client() {
        let transport = Arc::new(MockTransport::with_body(r#"{"status":"success"}"#));
        let client = client_with(&transport, ClientConfig::new("key"));

        let response = tokio_test::block_on(client.get("styles", Params::new())).unwrap();
        assert_eq!(response.data["status"], "success");
    }
}
