//! Websocket chat room on the jam server, used as the session's broadcast bus.
//!
//! The server speaks primus: we create/join a room named after the session,
//! `say` json text into it, and everything anyone says comes back to every
//! member with `"context": "user"`.  The server also pings over the socket
//! and expects a pong or it drops us.
use crate::common::box_error::BoxError;
use log::{debug, trace, warn};
use serde_json::{json, Value};
use std::{
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    thread::sleep,
    time::Duration,
};
use tungstenite::{
    client,
    error::{Error, UrlError},
    http::Uri,
    stream::{Mode, NoDelay},
    Message, WebSocket,
};
use url::Url;

/// how long a read blocks before giving the caller a chance to send
pub const READ_POLL: Duration = Duration::from_millis(20);

#[derive(PartialEq, Debug)]
enum RoomState {
    Idle,
    Inside,
}

pub struct Room {
    state: RoomState,
    name: String,
    sock: WebSocket<TcpStream>,
    msg_id: u64,
}

impl Room {
    pub fn new(name: &str, url: &str) -> Result<Self, BoxError> {
        let url = Url::parse(url)?;
        let stream = Self::make_stream(&url)?;
        let (sock, _resp) = client::client(url, stream)?;
        Ok(Room {
            state: RoomState::Idle,
            name: String::from(name),
            sock,
            msg_id: 0,
        })
    }

    fn make_stream(url: &Url) -> Result<TcpStream, BoxError> {
        let request = client::IntoClientRequest::into_client_request(url.clone())?;
        let uri = request.uri();
        let mode = client::uri_mode(uri)?;
        let host = uri.host().ok_or(Error::Url(UrlError::NoHostName))?;
        let port = uri.port_u16().unwrap_or(match mode {
            Mode::Plain => 80,
            Mode::Tls => 443,
        });
        let addrs = (host, port).to_socket_addrs()?;
        let mut stream = Self::connect_to_some(addrs.as_slice(), uri)?;
        NoDelay::set_nodelay(&mut stream, true)?;
        // short read timeout so the caller can interleave sends and stop checks
        stream.set_read_timeout(Some(READ_POLL))?;
        Ok(stream)
    }

    fn connect_to_some(addrs: &[SocketAddr], uri: &Uri) -> Result<TcpStream, Error> {
        for addr in addrs {
            debug!("Trying to contact {} at {}...", uri, addr);
            if let Ok(stream) = TcpStream::connect(addr) {
                return Ok(stream);
            }
        }
        Err(Error::Url(UrlError::UnableToConnect(uri.to_string())))
    }

    fn next_id(&mut self) -> u64 {
        self.msg_id += 1;
        self.msg_id
    }

    pub fn join_room(&mut self) -> Result<(), BoxError> {
        let create = json!({
          "event": "action",
          "params": {
            "name": self.name.as_str(),
            "action": "createChatRoom",
          },
          "messageId": self.next_id(),
        });
        self.sock.write_message(Message::Text(create.to_string()))?;

        // The first member creates the room and the server needs a moment before
        // a join will stick.  If it already existed we get a harmless error back.
        sleep(Duration::from_millis(500));
        let join = json!({
          "event": "roomAdd",
          "room": self.name.as_str(),
          "messageId": self.next_id(),
        });
        self.sock.write_message(Message::Text(join.to_string()))?;
        self.state = RoomState::Inside;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.state = RoomState::Idle;
    }

    pub fn is_connected(&self) -> bool {
        self.state == RoomState::Inside
    }

    fn is_primus_ping(&mut self, msg: &Message) -> bool {
        let msg_body = msg.to_string();
        let is_ping = msg_body.contains("primus::ping::");
        if is_ping {
            if let Some(stamp) = msg_body.split("::ping::").nth(1) {
                let _res = self
                    .sock
                    .write_message(Message::Text(format!("\"primus::pong::{}", stamp)));
            }
        }
        is_ping
    }

    pub fn send_message(&mut self, msg: &Value) -> Result<(), BoxError> {
        let say = json!({
            "event": "say",
            "room": self.name.as_str(),
            "message": msg.to_string(),
            "messageId": self.next_id(),
        });
        trace!("room {} say: {}", self.name, say);
        self.sock.write_message(Message::Text(say.to_string()))?;
        Ok(())
    }

    /// Next message somebody said in the room, None on timeout or housekeeping traffic
    pub fn get_message(&mut self) -> Result<Option<Value>, BoxError> {
        match self.sock.read_message() {
            Ok(msg) => {
                if self.is_primus_ping(&msg) {
                    return Ok(None);
                }
                let jvalue: Value = match serde_json::from_str(msg.to_string().as_str()) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("room {}: unreadable frame: {}", self.name, e);
                        return Ok(None);
                    }
                };
                if jvalue["context"] == "user" {
                    Ok(Some(jvalue))
                } else {
                    Ok(None)
                }
            }
            Err(Error::Io(ioerr))
                if ioerr.kind() == std::io::ErrorKind::WouldBlock
                    || ioerr.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
