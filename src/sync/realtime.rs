//! Minimal Socket.IO (protocol v5) over Engine.IO (protocol v4) codec, enough to register with the
//! realtime endpoint and receive `update` notifications over a websocket.
use serde_json::Value;
use url::Url;

use crate::{Error, Result};

/// Engine.IO packet received over the websocket.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EnginePacket {
    /// Handshake, carrying the session JSON.
    Open(String),
    Close,
    Ping(String),
    Pong,
    /// Socket.IO packet addressed to `namespace`.
    Message {
        namespace: String,
        packet: SocketPacket,
    },
    /// Upgrade/noop packets and anything this client does not care about.
    Other,
}

/// Socket.IO packet carried in an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SocketPacket {
    Connect,
    Disconnect,
    Event { name: String, args: Vec<Value> },
    ConnectError(String),
    Other,
}

/// Derive the websocket URL from the realtime endpoint.
///
/// `http://host/server/realtime` becomes `ws://host/server/realtime/?EIO=4&transport=websocket`.
pub(crate) fn websocket_url(realtime: &Url) -> Result<Url> {
    let scheme = match realtime.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(Error::Realtime(format!("unsupported scheme: {other}"))),
    };

    let mut url = realtime.clone();
    url.set_scheme(scheme)
        .map_err(|()| Error::Realtime("cannot set websocket scheme".to_owned()))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");
    Ok(url)
}

pub(crate) fn decode(frame: &str) -> Option<EnginePacket> {
    let mut chars = frame.chars();
    let kind = chars.next()?;
    let data = chars.as_str();

    let packet = match kind {
        '0' => EnginePacket::Open(data.to_owned()),
        '1' => EnginePacket::Close,
        '2' => EnginePacket::Ping(data.to_owned()),
        '3' => EnginePacket::Pong,
        '4' => {
            let (namespace, packet) = decode_socket_packet(data)?;
            EnginePacket::Message { namespace, packet }
        }
        '5' | '6' => EnginePacket::Other,
        _ => return None,
    };
    Some(packet)
}

fn decode_socket_packet(data: &str) -> Option<(String, SocketPacket)> {
    let mut chars = data.chars();
    let kind = chars.next()?;
    let (namespace, rest) = split_namespace(chars.as_str());

    let packet = match kind {
        '0' => SocketPacket::Connect,
        '1' => SocketPacket::Disconnect,
        '2' => {
            // Optional ack id precedes the payload.
            let payload = rest.trim_start_matches(|c: char| c.is_ascii_digit());
            let mut args: Vec<Value> = serde_json::from_str(payload).ok()?;
            if args.is_empty() {
                return None;
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                _ => return None,
            };
            SocketPacket::Event { name, args }
        }
        '4' => SocketPacket::ConnectError(rest.to_owned()),
        _ => SocketPacket::Other,
    };
    Some((namespace.to_owned(), packet))
}

/// Split a `/namespace,` prefix off `data`. Packets without one belong to `/`.
fn split_namespace(data: &str) -> (&str, &str) {
    if !data.starts_with('/') {
        return ("/", data);
    }
    match data.find(',') {
        Some(comma) => (&data[..comma], &data[comma + 1..]),
        None => (data, ""),
    }
}

/// The Socket.IO namespace of the realtime endpoint: its URL path without a trailing slash.
pub(crate) fn namespace(realtime: &Url) -> String {
    let path = realtime.path().trim_end_matches('/');
    if path.is_empty() {
        "/".to_owned()
    } else {
        path.to_owned()
    }
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace == "/" {
        String::new()
    } else {
        format!("{namespace},")
    }
}

pub(crate) fn encode_connect(namespace: &str) -> String {
    format!("40{}", namespace_prefix(namespace))
}

pub(crate) fn encode_pong(data: &str) -> String {
    format!("3{data}")
}

pub(crate) fn encode_event(namespace: &str, name: &str, payload: &Value) -> String {
    format!(
        "42{}{}",
        namespace_prefix(namespace),
        Value::Array(vec![Value::from(name), payload.clone()])
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use url::Url;

    use super::{
        decode, encode_connect, encode_event, encode_pong, namespace, websocket_url, EnginePacket,
        SocketPacket,
    };

    fn message(namespace: &str, packet: SocketPacket) -> Option<EnginePacket> {
        Some(EnginePacket::Message {
            namespace: namespace.to_owned(),
            packet,
        })
    }

    #[test]
    fn builds_websocket_url() {
        let url = websocket_url(&Url::parse("http://localhost:4009/server/realtime").unwrap())
            .unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:4009/server/realtime/?EIO=4&transport=websocket"
        );

        let url = websocket_url(&Url::parse("https://fp.example.com/realtime/").unwrap()).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://fp.example.com/realtime/?EIO=4&transport=websocket"
        );

        assert!(websocket_url(&Url::parse("ftp://example.com").unwrap()).is_err());
    }

    #[test]
    fn namespace_follows_url_path() {
        let url = Url::parse("http://localhost:4009/server/realtime").unwrap();
        assert_eq!(namespace(&url), "/server/realtime");
        let url = Url::parse("http://localhost:4009/realtime/").unwrap();
        assert_eq!(namespace(&url), "/realtime");
        let url = Url::parse("http://localhost:4009").unwrap();
        assert_eq!(namespace(&url), "/");
    }

    #[test]
    fn decodes_engine_packets() {
        assert_eq!(
            decode(r#"0{"sid":"abc","pingInterval":25000}"#),
            Some(EnginePacket::Open(r#"{"sid":"abc","pingInterval":25000}"#.to_owned()))
        );
        assert_eq!(decode("2"), Some(EnginePacket::Ping(String::new())));
        assert_eq!(decode("1"), Some(EnginePacket::Close));
        assert_eq!(decode("6"), Some(EnginePacket::Other));
        assert_eq!(decode(""), None);
        assert_eq!(decode("x"), None);
    }

    #[test]
    fn decodes_socket_packets() {
        assert_eq!(decode(r#"40{"sid":"xyz"}"#), message("/", SocketPacket::Connect));
        assert_eq!(
            decode(r#"40/server/realtime,{"sid":"xyz"}"#),
            message("/server/realtime", SocketPacket::Connect)
        );
        assert_eq!(
            decode(r#"42["update",{"version":3}]"#),
            message(
                "/",
                SocketPacket::Event {
                    name: "update".to_owned(),
                    args: vec![json!({"version": 3})],
                }
            )
        );
        assert_eq!(
            decode(r#"42/admin,17["update"]"#),
            message(
                "/admin",
                SocketPacket::Event {
                    name: "update".to_owned(),
                    args: vec![],
                }
            )
        );
        assert_eq!(
            decode(r#"44/realtime,{"message":"denied"}"#),
            message(
                "/realtime",
                SocketPacket::ConnectError(r#"{"message":"denied"}"#.to_owned())
            )
        );
        assert_eq!(decode("41/realtime"), message("/realtime", SocketPacket::Disconnect));
        assert_eq!(decode("42[]"), None);
        assert_eq!(decode("42not-json"), None);
    }

    #[test]
    fn encodes_packets() {
        assert_eq!(encode_connect("/"), "40");
        assert_eq!(encode_connect("/server/realtime"), "40/server/realtime,");
        assert_eq!(
            encode_event("/", "register", &json!({"key": "server-key"})),
            r#"42["register",{"key":"server-key"}]"#
        );
        assert_eq!(
            encode_event("/server/realtime", "register", &json!({"key": "server-key"})),
            r#"42/server/realtime,["register",{"key":"server-key"}]"#
        );
        assert_eq!(encode_pong("1700000000"), "31700000000");
    }
}
