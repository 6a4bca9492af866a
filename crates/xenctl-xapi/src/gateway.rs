//! Remote call gateway: one XML-RPC request, one response, envelope unwrapped.
//!
//! XenAPI wraps every result in `{Status, Value}` or
//! `{Status, ErrorDescription}`. [`Gateway::call`] returns only the
//! `Value`; anything other than `Success` becomes a `RemoteError`. No
//! retries happen here.

use crate::codec::{decode_method_response, encode_method_call, MethodResponse};
use crate::error::{XenError, XenResult};
use crate::types::XenConfig;
use crate::value::XmlRpcValue;

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::{header, Client};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Byte transport for XML-RPC documents.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// POST one request document and return the response document.
    async fn round_trip(&self, body: String) -> XenResult<String>;
}

/// HTTP(S) transport backed by reqwest.
pub struct HttpTransport {
    client: Client,
    url: Url,
}

impl HttpTransport {
    pub fn new(url: Url, config: &XenConfig) -> XenResult<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .timeout(Duration::from_secs(config.rpc_timeout_secs))
            .build()
            .map_err(|e| XenError::connection(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn round_trip(&self, body: String) -> XenResult<String> {
        let resp = self
            .client
            .post(self.url.clone())
            .header(header::CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(XenError::transport(format!(
                "RPC endpoint answered {}: {}",
                status.as_u16(),
                snippet(&text, ERROR_BODY_CHARS)
            )));
        }
        Ok(text)
    }
}

/// Longest slice of an error body quoted in a transport error.
const ERROR_BODY_CHARS: usize = 200;

/// First `max` characters of `text`, cut on a character boundary.
fn snippet(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Serializes calls, sends them, and unwraps the status envelope.
#[derive(Clone)]
pub struct Gateway {
    transport: Arc<dyn RpcTransport>,
}

impl Gateway {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    /// Call a method whose result is wrapped in a status envelope.
    pub async fn call(&self, method: &str, args: &[XmlRpcValue]) -> XenResult<XmlRpcValue> {
        let value = self.call_raw(method, args).await?;
        unwrap_envelope(method, value)
    }

    /// Call a method whose result is returned bare (`system.*` introspection).
    pub async fn call_raw(&self, method: &str, args: &[XmlRpcValue]) -> XenResult<XmlRpcValue> {
        if method.trim().is_empty() {
            return Err(XenError::invalid_input("empty method name"));
        }
        debug!("xapi call {} ({} args)", method, args.len());

        let body = encode_method_call(method, args);
        let text = self.transport.round_trip(body).await?;
        trace!("xapi {} response: {} bytes", method, text.len());

        match decode_method_response(&text)? {
            MethodResponse::Params(value) => Ok(value),
            MethodResponse::Fault { code, message } => Err(XenError::remote(
                method,
                "Fault",
                vec![code.to_string(), message],
            )),
        }
    }
}

/// `Success` → payload; anything else → `RemoteError` with the status verbatim.
pub fn unwrap_envelope(method: &str, value: XmlRpcValue) -> XenResult<XmlRpcValue> {
    let XmlRpcValue::Struct(mut members) = value else {
        return Err(XenError::parse(format!(
            "{method}: expected status envelope, got {}",
            value.type_name()
        )));
    };

    let status = match members.get("Status") {
        Some(XmlRpcValue::String(s)) => s.clone(),
        Some(other) => other.to_display_string(),
        None => {
            return Err(XenError::parse(format!(
                "{method}: response struct has no Status member"
            )))
        }
    };

    if status == "Success" {
        return Ok(members.remove("Value").unwrap_or(XmlRpcValue::Nil));
    }

    let description = match members.remove("ErrorDescription") {
        Some(XmlRpcValue::Array(items)) => items.iter().map(XmlRpcValue::to_display_string).collect(),
        Some(other) => vec![other.to_display_string()],
        None => Vec::new(),
    };
    Err(XenError::remote(method, status, description))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory transport shared by unit tests.

    use super::*;
    use crate::codec::{decode_method_call, encode_method_response, MethodCall};
    use crate::value::structure;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Handler = Box<dyn Fn(&MethodCall) -> XenResult<XmlRpcValue> + Send + Sync>;

    /// Answers each call from a handler and records every request.
    pub struct ScriptedTransport {
        handler: Handler,
        pub calls: Mutex<Vec<MethodCall>>,
        queued: Mutex<VecDeque<String>>,
    }

    impl ScriptedTransport {
        pub fn new(
            handler: impl Fn(&MethodCall) -> XenResult<XmlRpcValue> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                handler: Box::new(handler),
                calls: Mutex::new(Vec::new()),
                queued: Mutex::new(VecDeque::new()),
            })
        }

        /// Serve this raw document before consulting the handler.
        pub fn push_raw(&self, xml: impl Into<String>) {
            self.queued.lock().unwrap().push_back(xml.into());
        }

        pub fn methods(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|c| c.method.clone()).collect()
        }
    }

    #[async_trait]
    impl RpcTransport for ScriptedTransport {
        async fn round_trip(&self, body: String) -> XenResult<String> {
            let call = decode_method_call(&body)?;
            self.calls.lock().unwrap().push(call.clone());
            if let Some(raw) = self.queued.lock().unwrap().pop_front() {
                return Ok(raw);
            }
            let value = (self.handler)(&call)?;
            Ok(encode_method_response(&MethodResponse::Params(value)))
        }
    }

    pub fn success(value: impl Into<XmlRpcValue>) -> XenResult<XmlRpcValue> {
        Ok(structure([
            ("Status", XmlRpcValue::from("Success")),
            ("Value", value.into()),
        ]))
    }

    pub fn failure(description: Vec<&str>) -> XenResult<XmlRpcValue> {
        Ok(structure([
            ("Status", XmlRpcValue::from("Failure")),
            ("ErrorDescription", XmlRpcValue::from(description)),
        ]))
    }

    pub const TEST_TOKEN: &str = "OpaqueRef:session-1";

    /// Answer login and `system.listMethods`; hand everything else to `rest`.
    pub fn with_login(
        methods: &'static [&'static str],
        rest: impl Fn(&MethodCall) -> XenResult<XmlRpcValue> + Send + Sync + 'static,
    ) -> impl Fn(&MethodCall) -> XenResult<XmlRpcValue> + Send + Sync + 'static {
        move |call| match call.method.as_str() {
            "session.login_with_password" => success(TEST_TOKEN),
            "system.listMethods" => Ok(XmlRpcValue::from(methods.to_vec())),
            _ => rest(call),
        }
    }

    /// Log in through `transport` with fast polling.
    pub async fn open_session(transport: Arc<ScriptedTransport>) -> crate::session::Session {
        let mut config = XenConfig::new("xen.test", "root");
        config.poll_interval_ms = 1;
        config.poll_max_attempts = 5;
        crate::session::Session::open_with_gateway(
            Url::parse("http://xen.test/").unwrap(),
            Gateway::new(transport),
            &config,
            Some(secrecy::SecretString::new("pw".into())),
            &crate::credentials::NoPrompt,
        )
        .await
        .unwrap()
    }

    /// `OpaqueRef:` argument at `index`, as a string.
    pub fn arg(call: &MethodCall, index: usize) -> String {
        call.params
            .get(index)
            .map(XmlRpcValue::to_display_string)
            .unwrap_or_default()
    }
}
