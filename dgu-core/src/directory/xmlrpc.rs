//! Minimal XML-RPC codec: string-parameter method calls out, JSON values in.
//!
//! Every Drupal method we call takes string arguments, so the encoder only emits
//! `<string>` params. The decoder understands every XML-RPC value type and maps it
//! onto [`serde_json::Value`], the same shape the REST endpoints return.

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Number, Value};

/// Reasons an XML-RPC call did not produce a value.
#[derive(Debug)]
pub enum RpcFailure {
    /// The request never got an HTTP response (DNS, refused connection, reset...).
    Transport(reqwest::Error),
    /// The server answered with a non-success HTTP status.
    Status(u16),
    /// The server answered with a well-formed `<fault>`.
    Fault { code: i64, message: String },
    /// The body was not a valid `methodResponse`.
    Malformed(String),
}

impl std::fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcFailure::Transport(e) => write!(f, "transport error: {e}"),
            RpcFailure::Status(code) => write!(f, "HTTP status {code}"),
            RpcFailure::Fault { code, message } => write!(f, "fault {code}: {message}"),
            RpcFailure::Malformed(desc) => write!(f, "malformed response: {desc}"),
        }
    }
}

/// Render a `methodCall` document with every parameter sent as `<string>`.
pub fn encode_call(method: &str, params: &[&str]) -> String {
    let mut body = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    body.push_str(&escape(method));
    body.push_str("</methodName><params>");
    for param in params {
        body.push_str("<param><value><string>");
        body.push_str(&escape(*param));
        body.push_str("</string></value></param>");
    }
    body.push_str("</params></methodCall>");
    body
}

/// Decode a `methodResponse` body into its single return value.
pub fn decode_response(xml: &str) -> Result<Value, RpcFailure> {
    let root = parse_tree(xml)?;
    if root.name != "methodResponse" {
        return Err(RpcFailure::Malformed(format!(
            "expected methodResponse, found <{}>",
            root.name
        )));
    }

    if let Some(fault) = root.child("fault") {
        let value = fault
            .child("value")
            .ok_or_else(|| RpcFailure::Malformed("fault without value".into()))?;
        let decoded = decode_value(value)?;
        let code = decoded
            .get("faultCode")
            .and_then(|c| c.as_i64().or_else(|| c.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(0);
        let message = decoded
            .get("faultString")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(RpcFailure::Fault { code, message });
    }

    let value = root
        .child("params")
        .and_then(|p| p.child("param"))
        .and_then(|p| p.child("value"))
        .ok_or_else(|| RpcFailure::Malformed("response has neither params nor fault".into()))?;
    decode_value(value)
}

#[derive(Debug)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn new(name: String) -> Self {
        Self {
            name,
            text: String::new(),
            children: Vec::new(),
        }
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn parse_tree(xml: &str) -> Result<Node, RpcFailure> {
    let mut reader = Reader::from_str(xml);
    let mut stack = vec![Node::new(String::new())];

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.push(Node::new(name));
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::new(name));
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(RpcFailure::Malformed("unbalanced closing tag".into()));
                }
                if let Some(done) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(done);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| RpcFailure::Malformed(e.to_string()))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                let raw = c.into_inner();
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&raw));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(RpcFailure::Malformed(e.to_string())),
        }
    }

    if stack.len() != 1 {
        return Err(RpcFailure::Malformed("unexpected end of document".into()));
    }
    let document = stack.pop().unwrap_or_else(|| Node::new(String::new()));
    document
        .children
        .into_iter()
        .next()
        .ok_or_else(|| RpcFailure::Malformed("empty document".into()))
}

fn decode_value(value: &Node) -> Result<Value, RpcFailure> {
    // <value>text</value> with no type element is a string
    let Some(typed) = value.children.first() else {
        return Ok(Value::String(value.text.clone()));
    };

    let text = typed.text.trim();
    match typed.name.as_str() {
        "string" | "dateTime.iso8601" | "base64" => Ok(Value::String(typed.text.clone())),
        "int" | "i4" | "i8" => text
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|e| RpcFailure::Malformed(format!("bad integer {text:?}: {e}"))),
        "boolean" => match text {
            "1" | "true" => Ok(Value::Bool(true)),
            "0" | "false" => Ok(Value::Bool(false)),
            other => Err(RpcFailure::Malformed(format!("bad boolean {other:?}"))),
        },
        "double" => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| RpcFailure::Malformed(format!("bad double {text:?}"))),
        "nil" => Ok(Value::Null),
        "struct" => {
            let mut map = Map::new();
            for member in typed.children.iter().filter(|c| c.name == "member") {
                let name = member
                    .child("name")
                    .map(|n| n.text.clone())
                    .ok_or_else(|| RpcFailure::Malformed("struct member without name".into()))?;
                let member_value = member
                    .child("value")
                    .ok_or_else(|| RpcFailure::Malformed(format!("member {name:?} without value")))?;
                map.insert(name, decode_value(member_value)?);
            }
            Ok(Value::Object(map))
        }
        "array" => {
            let items = match typed.child("data") {
                Some(data) => data
                    .children
                    .iter()
                    .filter(|c| c.name == "value")
                    .map(decode_value)
                    .collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
            };
            Ok(Value::Array(items))
        }
        other => Err(RpcFailure::Malformed(format!("unknown value type <{other}>"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?>\n<methodResponse>\n  <params>\n    <param>\n      <value>{value}</value>\n    </param>\n  </params>\n</methodResponse>"
        )
    }

    #[test]
    fn encode_escapes_parameters() {
        let body = encode_call("organisation.match", &["Food & <Rural> Affairs"]);
        assert!(body.contains("<methodName>organisation.match</methodName>"));
        assert!(body.contains("<string>Food &amp; &lt;Rural&gt; Affairs</string>"));
    }

    #[test]
    fn decodes_nested_struct_and_array() {
        let xml = response(
            "<struct>\
               <member><name>uid</name><value><int>42</int></value></member>\
               <member><name>name</name><value><string>Jo &amp; Co</string></value></member>\
               <member><name>status</name><value><boolean>1</boolean></value></member>\
               <member><name>roles</name><value><array><data>\
                  <value>authenticated</value>\
                  <value><string>publisher</string></value>\
               </data></array></value></member>\
               <member><name>picture</name><value><nil/></value></member>\
             </struct>",
        );
        let value = decode_response(&xml).unwrap();
        assert_eq!(
            value,
            json!({
                "uid": 42,
                "name": "Jo & Co",
                "status": true,
                "roles": ["authenticated", "publisher"],
                "picture": null,
            })
        );
    }

    #[test]
    fn untyped_value_is_a_string() {
        let value = decode_response(&response("0")).unwrap();
        assert_eq!(value, json!("0"));
    }

    #[test]
    fn fault_is_reported_with_code() {
        let xml = "<methodResponse><fault><value><struct>\
              <member><name>faultCode</name><value><int>404</int></value></member>\
              <member><name>faultString</name><value><string>Not found</string></value></member>\
            </struct></value></fault></methodResponse>";
        match decode_response(xml) {
            Err(RpcFailure::Fault { code, message }) => {
                assert_eq!(code, 404);
                assert_eq!(message, "Not found");
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    fn malformed_documents_are_rejected() {
        for body in [
            "",
            "not xml at all",
            "<methodResponse><params></methodResponse>",
            "<html><body>Bad gateway</body></html>",
            response("<int>forty-two</int>").as_str(),
            response("<mystery>1</mystery>").as_str(),
        ] {
            assert!(
                matches!(decode_response(body), Err(RpcFailure::Malformed(_))),
                "{body:?} should be malformed"
            );
        }
    }
}
