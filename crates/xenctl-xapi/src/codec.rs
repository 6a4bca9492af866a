//! XML-RPC encoding and decoding.
//!
//! Requests are written straight into a `String`; responses are read with
//! the quick-xml event reader into a small element tree and then
//! interpreted. The server-side pair (`decode_method_call`,
//! `encode_method_response`) exists for loopback servers.

use crate::error::{XenError, XenResult};
use crate::value::{XmlRpcValue, DATETIME_FORMAT};

use chrono::NaiveDateTime;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;

/// Decoded `methodResponse`.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResponse {
    Params(XmlRpcValue),
    Fault { code: i32, message: String },
}

/// Decoded `methodCall`.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub params: Vec<XmlRpcValue>,
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Serialize a `methodCall` document.
pub fn encode_method_call(method: &str, params: &[XmlRpcValue]) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(r#"<?xml version="1.0"?><methodCall><methodName>"#);
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for p in params {
        out.push_str("<param>");
        write_value(&mut out, p);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

/// Serialize a `methodResponse` document.
pub fn encode_method_response(resp: &MethodResponse) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(r#"<?xml version="1.0"?><methodResponse>"#);
    match resp {
        MethodResponse::Params(v) => {
            out.push_str("<params><param>");
            write_value(&mut out, v);
            out.push_str("</param></params>");
        }
        MethodResponse::Fault { code, message } => {
            let mut fault = BTreeMap::new();
            fault.insert("faultCode".to_string(), XmlRpcValue::Int(*code));
            fault.insert("faultString".to_string(), XmlRpcValue::string(message.clone()));
            out.push_str("<fault>");
            write_value(&mut out, &XmlRpcValue::Struct(fault));
            out.push_str("</fault>");
        }
    }
    out.push_str("</methodResponse>");
    out
}

fn write_value(out: &mut String, v: &XmlRpcValue) {
    out.push_str("<value>");
    match v {
        XmlRpcValue::Bool(b) => {
            out.push_str(if *b { "<boolean>1</boolean>" } else { "<boolean>0</boolean>" })
        }
        XmlRpcValue::String(s) => {
            out.push_str("<string>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</string>");
        }
        XmlRpcValue::Int(i) => out.push_str(&format!("<i4>{i}</i4>")),
        XmlRpcValue::Int64(i) => out.push_str(&format!("<i8>{i}</i8>")),
        XmlRpcValue::Double(d) => out.push_str(&format!("<double>{d}</double>")),
        XmlRpcValue::DateTime(dt) => out.push_str(&format!(
            "<dateTime.iso8601>{}</dateTime.iso8601>",
            dt.format(DATETIME_FORMAT)
        )),
        XmlRpcValue::Nil => out.push_str("<nil/>"),
        XmlRpcValue::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }
        XmlRpcValue::Struct(members) => {
            out.push_str("<struct>");
            for (name, value) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name.as_str()));
                out.push_str("</name>");
                write_value(out, value);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// Parse a `methodResponse` document.
pub fn decode_method_response(xml: &str) -> XenResult<MethodResponse> {
    let root = parse_tree(xml)?;
    if root.name != "methodResponse" {
        return Err(XenError::parse(format!(
            "expected <methodResponse>, found <{}>",
            root.name
        )));
    }

    if let Some(fault) = root.child("fault") {
        let value = fault
            .child("value")
            .ok_or_else(|| XenError::parse("<fault> without <value>"))
            .and_then(decode_value)?;
        let code = match value.get("faultCode") {
            Some(XmlRpcValue::Int(c)) => *c,
            Some(XmlRpcValue::Int64(c)) => *c as i32,
            Some(XmlRpcValue::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        };
        let message = value
            .get("faultString")
            .map(XmlRpcValue::to_display_string)
            .unwrap_or_default();
        return Ok(MethodResponse::Fault { code, message });
    }

    let value = root
        .child("params")
        .and_then(|p| p.child("param"))
        .and_then(|p| p.child("value"))
        .ok_or_else(|| XenError::parse("<methodResponse> without params/param/value"))?;
    decode_value(value).map(MethodResponse::Params)
}

/// Parse a `methodCall` document.
pub fn decode_method_call(xml: &str) -> XenResult<MethodCall> {
    let root = parse_tree(xml)?;
    if root.name != "methodCall" {
        return Err(XenError::parse(format!(
            "expected <methodCall>, found <{}>",
            root.name
        )));
    }
    let method = root
        .child("methodName")
        .map(|m| m.text.trim().to_string())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| XenError::parse("<methodCall> without <methodName>"))?;

    let mut params = Vec::new();
    if let Some(list) = root.child("params") {
        for param in list.children.iter().filter(|c| c.name == "param") {
            let value = param
                .child("value")
                .ok_or_else(|| XenError::parse("<param> without <value>"))?;
            params.push(decode_value(value)?);
        }
    }
    Ok(MethodCall { method, params })
}

fn decode_value(el: &Element) -> XenResult<XmlRpcValue> {
    let typed = match el.children.first() {
        // Untyped <value>text</value> is a string.
        None => return Ok(XmlRpcValue::String(el.text.clone())),
        Some(t) => t,
    };

    match typed.name.as_str() {
        "string" => Ok(XmlRpcValue::String(typed.text.clone())),
        "boolean" => match typed.text.trim() {
            "1" | "true" => Ok(XmlRpcValue::Bool(true)),
            "0" | "false" => Ok(XmlRpcValue::Bool(false)),
            other => Err(XenError::parse(format!("invalid boolean '{other}'"))),
        },
        "i4" | "int" => typed
            .text
            .trim()
            .parse()
            .map(XmlRpcValue::Int)
            .map_err(|e| XenError::parse(format!("invalid int '{}': {e}", typed.text))),
        "i8" => typed
            .text
            .trim()
            .parse()
            .map(XmlRpcValue::Int64)
            .map_err(|e| XenError::parse(format!("invalid i8 '{}': {e}", typed.text))),
        "double" => typed
            .text
            .trim()
            .parse()
            .map(XmlRpcValue::Double)
            .map_err(|e| XenError::parse(format!("invalid double '{}': {e}", typed.text))),
        "dateTime.iso8601" => parse_datetime(&typed.text).map(XmlRpcValue::DateTime),
        "nil" => Ok(XmlRpcValue::Nil),
        "array" => {
            let items = match typed.child("data") {
                Some(data) => data
                    .children
                    .iter()
                    .filter(|c| c.name == "value")
                    .map(decode_value)
                    .collect::<XenResult<Vec<_>>>()?,
                None => Vec::new(),
            };
            Ok(XmlRpcValue::Array(items))
        }
        "struct" => {
            let mut members = BTreeMap::new();
            for member in typed.children.iter().filter(|c| c.name == "member") {
                let name = member
                    .child("name")
                    .map(|n| n.text.clone())
                    .ok_or_else(|| XenError::parse("<member> without <name>"))?;
                let value = match member.child("value") {
                    Some(v) => decode_value(v)?,
                    None => XmlRpcValue::Nil,
                };
                members.insert(name, value);
            }
            Ok(XmlRpcValue::Struct(members))
        }
        other => Err(XenError::parse(format!("unsupported XML-RPC type <{other}>"))),
    }
}

/// Accepts `20240131T08:15:00`, with or without a trailing `Z`, and the
/// dashed ISO variant some servers emit.
fn parse_datetime(raw: &str) -> XenResult<NaiveDateTime> {
    let s = raw.trim().trim_end_matches('Z');
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| XenError::parse(format!("invalid dateTime '{raw}': {e}")))
}

// ── Element tree ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Element {
    name: String,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn parse_tree(xml: &str) -> XenResult<Element> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                stack.push(Element::new(tag_name(e.local_name().as_ref())));
            }
            Event::Empty(e) => {
                let el = Element::new(tag_name(e.local_name().as_ref()));
                attach(&mut stack, &mut root, el)?;
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| XenError::parse("unbalanced closing tag"))?;
                attach(&mut stack, &mut root, el)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(XenError::parse("unexpected end of document"));
    }
    root.ok_or_else(|| XenError::parse("empty document"))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) -> XenResult<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(el);
        Ok(())
    } else if root.is_none() {
        *root = Some(el);
        Ok(())
    } else {
        Err(XenError::parse("multiple root elements"))
    }
}

fn tag_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}
