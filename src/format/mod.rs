//! Format of records in the Yate Engine external module protocol.
//!
//! ## Format of commands and notifications
//!
//! Every command is sent on its own newline (`\n`, `^J`, decimal `10`) delimited line.
//!
//! Any value that contains special characters (ASCII `<32`)
//! MUST have them converted to `%<upcode>` where `<upcode>` is the character
//! with a numeric value equal with `64 + original ASCII code`.
//!
//! The `%` character itself MUST be converted to a special `%%` representation.
//! Characters with codes `>=32` (except `%`) SHOULD not be escaped but may be so.
//!
//! A `%`-escaped code may be received instead of an unescaped character anywhere
//! except in the initial keyword or the delimiting colon (`:`) characters.
//!
//! ## Command direction
//! Command direction is anotated by the following prefixes in the
//! structures documentations:
//! - **(>)**: _Application_ to _Engine_
//! - **(<)**: _Engine_ to _Application_
//! - **(~)**: _Bi_-directional

use std::str::FromStr;

mod error;
pub use error::{Error, Result};

pub mod upcode;

mod params;
pub use params::Params;


fn int_field<T: FromStr>(field: &'static str, value: &str) -> Result<T> {
    value.parse().map_err(|_| Error::InvalidInteger {
        field,
        value: value.to_owned(),
    })
}

fn bool_field(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// **(~)** A dispatched message, either asked by the engine (`%>message`)
/// or a reply to a previous request (`%<message`).
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Opaque correlation id, echoed verbatim in the reply.
    pub id: String,

    /// Unix timestamp of creation, only on the request form.
    pub time: Option<u64>,

    /// Whether a handler processed the message, only on the reply form.
    pub processed: Option<bool>,

    /// Name of the message.
    pub name: String,

    /// Textual return value of the message.
    pub retvalue: String,

    /// Ordered `key=value` parameters.
    pub params: Params,

    /// Whether this record is the reply form.
    pub reply: bool,
}

impl Message {
    fn parse(fields: &[String]) -> Result<Self> {
        if fields.len() < 5 {
            return Err(Error::Arity {
                tag: "message",
                count: fields.len(),
            });
        }

        let reply = fields[0] == "%<message";
        let (time, processed) = if reply {
            (None, Some(bool_field(&fields[2])))
        } else {
            (Some(int_field("time", &fields[2])?), None)
        };

        Ok(Self {
            id: fields[1].clone(),
            time,
            processed,
            name: fields[3].clone(),
            retvalue: fields[4].clone(),
            params: Params::parse(&fields[5..]),
            reply,
        })
    }

    /// Encode the record back to its wire form.
    pub fn encode(&self) -> String {
        if self.reply {
            self.encode_answer(self.processed.unwrap_or(false))
        } else {
            let head = [
                "%>message".to_owned(),
                self.id.clone(),
                self.time.unwrap_or_default().to_string(),
                self.name.clone(),
                self.retvalue.clone(),
            ];

            upcode::join(head.into_iter().chain(self.params.fields()))
        }
    }

    /// Encode the reply form with the chosen `processed` flag, echoing
    /// the id, name, return value and parameters in their current state.
    pub fn encode_answer(&self, processed: bool) -> String {
        let head = [
            "%<message".to_owned(),
            self.id.clone(),
            bool_str(processed).to_owned(),
            self.name.clone(),
            self.retvalue.clone(),
        ];

        upcode::join(head.into_iter().chain(self.params.fields()))
    }
}

/// **(>)** An application message not yet submitted to the engine,
/// the correlation id and timestamp are allocated at send time.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRequest {
    /// Name of the message.
    pub name: String,

    /// Textual return value of the message.
    pub retvalue: String,

    /// Ordered `key=value` parameters.
    pub params: Params,
}

impl MessageRequest {
    /// Create a message request with an empty return value.
    pub fn new(name: impl Into<String>, params: impl Into<Params>) -> Self {
        Self {
            name: name.into(),
            retvalue: String::new(),
            params: params.into(),
        }
    }

    /// Encode the record to its wire form with the allocated id and timestamp.
    pub fn encode(&self, id: &str, time: u64) -> String {
        let head = [
            "%>message".to_owned(),
            id.to_owned(),
            time.to_string(),
            self.name.clone(),
            self.retvalue.clone(),
        ];

        upcode::join(head.into_iter().chain(self.params.fields()))
    }
}

/// **(>)** Requests the installing of a message **handler**.
#[derive(Debug, Clone, PartialEq)]
pub struct Install {
    /// Priority in chain, `100` is the engine default.
    pub priority: u32,

    /// Name of the messages for that a handler should be installed.
    pub name: String,

    /// Filter for the installed handler;
    /// - name of a variable the handler will filter,
    /// - matching value for the filtered variable.
    pub filter: Option<(String, Option<String>)>,
}

impl Install {
    fn parse(fields: &[String]) -> Result<Self> {
        if fields.len() < 3 {
            return Err(Error::Arity {
                tag: "install",
                count: fields.len(),
            });
        }

        let filter = fields.get(3).map(|attribute| {
            (attribute.clone(), fields.get(4).cloned())
        });

        Ok(Self {
            priority: int_field("priority", &fields[1])?,
            name: fields[2].clone(),
            filter,
        })
    }

    /// Encode the record to its wire form.
    pub fn encode(&self) -> String {
        let mut fields = vec![
            "%>install".to_owned(),
            self.priority.to_string(),
            self.name.clone(),
        ];
        if let Some((attribute, value)) = &self.filter {
            fields.push(attribute.clone());
            if let Some(value) = value {
                fields.push(value.clone());
            }
        }

        upcode::join(fields)
    }
}

/// **(<)** Confirmation that the **handler**
/// has been installed properly or not.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallAck {
    /// Priority of the installed handler.
    pub priority: u32,

    /// Name of the messages asked to handle.
    pub name: String,

    /// Success of operation.
    pub success: bool,
}

impl InstallAck {
    fn parse(fields: &[String]) -> Result<Self> {
        if fields.len() < 4 {
            return Err(Error::Arity {
                tag: "install",
                count: fields.len(),
            });
        }

        Ok(Self {
            priority: int_field("priority", &fields[1])?,
            name: fields[2].clone(),
            success: bool_field(&fields[3]),
        })
    }

    /// Encode the record to its wire form.
    pub fn encode(&self) -> String {
        let priority = self.priority.to_string();

        upcode::join([
            "%<install",
            priority.as_str(),
            self.name.as_str(),
            bool_str(self.success),
        ])
    }
}

/// **(>)** Requests uninstalling a previously installed message **handler**.
#[derive(Debug, Clone, PartialEq)]
pub struct Uninstall {
    /// Name of the message handler that should be uninstalled.
    pub name: String,
}

impl Uninstall {
    fn parse(fields: &[String]) -> Result<Self> {
        if fields.len() < 2 {
            return Err(Error::Arity {
                tag: "uninstall",
                count: fields.len(),
            });
        }

        Ok(Self {
            name: fields[1].clone(),
        })
    }

    /// Encode the record to its wire form.
    pub fn encode(&self) -> String {
        upcode::join(["%>uninstall", self.name.as_str()])
    }
}

/// **(<)** Confirmation that the **handler**
/// has been uninstalled properly or not.
#[derive(Debug, Clone, PartialEq)]
pub struct UninstallAck {
    /// Priority of the previously installed handler.
    pub priority: u32,

    /// Name of the message handler asked to uninstall.
    pub name: String,

    /// Success of operation.
    pub success: bool,
}

impl UninstallAck {
    fn parse(fields: &[String]) -> Result<Self> {
        if fields.len() < 4 {
            return Err(Error::Arity {
                tag: "uninstall",
                count: fields.len(),
            });
        }

        Ok(Self {
            priority: int_field("priority", &fields[1])?,
            name: fields[2].clone(),
            success: bool_field(&fields[3]),
        })
    }

    /// Encode the record to its wire form.
    pub fn encode(&self) -> String {
        let priority = self.priority.to_string();

        upcode::join([
            "%<uninstall",
            priority.as_str(),
            self.name.as_str(),
            bool_str(self.success),
        ])
    }
}

/// **(>)** Requests the installing of a message **watcher**
/// (post-dispatching notifier).
#[derive(Debug, Clone, PartialEq)]
pub struct Watch {
    /// Name of the messages for that a watcher should be installed,
    /// the empty string watches every message.
    pub name: String,
}

impl Watch {
    fn parse(fields: &[String]) -> Result<Self> {
        if fields.len() < 2 {
            return Err(Error::Arity {
                tag: "watch",
                count: fields.len(),
            });
        }

        Ok(Self {
            name: fields[1].clone(),
        })
    }

    /// Encode the record to its wire form.
    pub fn encode(&self) -> String {
        upcode::join(["%>watch", self.name.as_str()])
    }
}

/// **(<)** Confirmation that the **watcher**
/// has been installed properly or not.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchAck {
    /// Name of the messages asked to watch.
    pub name: String,

    /// Success of operation.
    pub success: bool,
}

impl WatchAck {
    fn parse(fields: &[String]) -> Result<Self> {
        if fields.len() < 3 {
            return Err(Error::Arity {
                tag: "watch",
                count: fields.len(),
            });
        }

        Ok(Self {
            name: fields[1].clone(),
            success: bool_field(&fields[2]),
        })
    }

    /// Encode the record to its wire form.
    pub fn encode(&self) -> String {
        upcode::join(["%<watch", self.name.as_str(), bool_str(self.success)])
    }
}

/// **(>)** Requests uninstalling a previously installed message **watcher**.
#[derive(Debug, Clone, PartialEq)]
pub struct Unwatch {
    /// Name of the message watcher that should be uninstalled.
    pub name: String,
}

impl Unwatch {
    fn parse(fields: &[String]) -> Result<Self> {
        if fields.len() < 2 {
            return Err(Error::Arity {
                tag: "unwatch",
                count: fields.len(),
            });
        }

        Ok(Self {
            name: fields[1].clone(),
        })
    }

    /// Encode the record to its wire form.
    pub fn encode(&self) -> String {
        upcode::join(["%>unwatch", self.name.as_str()])
    }
}

/// **(<)** Confirmation that the **watcher**
/// has been uninstalled properly or not.
#[derive(Debug, Clone, PartialEq)]
pub struct UnwatchAck {
    /// Name of the message watcher asked to uninstall.
    pub name: String,

    /// Success of operation.
    pub success: bool,
}

impl UnwatchAck {
    fn parse(fields: &[String]) -> Result<Self> {
        if fields.len() < 3 {
            return Err(Error::Arity {
                tag: "unwatch",
                count: fields.len(),
            });
        }

        Ok(Self {
            name: fields[1].clone(),
            success: bool_field(&fields[2]),
        })
    }

    /// Encode the record to its wire form.
    pub fn encode(&self) -> String {
        upcode::join(["%<unwatch", self.name.as_str(), bool_str(self.success)])
    }
}

/// **(>)** Requests the change of a **local parameter**,
/// an empty `value` only queries the current one.
///
/// Currently supported parameters:
/// - `id` (string) - Identifier of the associated channel, if any
/// - `disconnected` (bool) - Enable or disable sending "chan.disconnected" messages
/// - `trackparam` (string) - Set the message handler tracking name, cannot be made empty
/// - `reason` (string) - Set the disconnect reason that gets received by the peer channel
/// - `timeout` (int) - Timeout in milliseconds for answering to messages
/// - `timebomb` (bool) - Terminate this module instance if a timeout occured
/// - `bufsize` (int) - Length of the incoming line buffer (default 8192)
/// - `setdata` (bool) - Attach channel pointer as user data to generated messages
/// - `reenter` (bool) - If this module is allowed to handle messages generated by itself
/// - `selfwatch` (bool) - If this module is allowed to watch messages generated by itself
/// - `restart` (bool) - Restart this global module if it terminates unexpectedly. Must be turned off to allow normal termination
///
/// Engine read-only run parameters such as `engine.version`, `engine.nodename`
/// or `config.<section>.<key>` can only be queried.
#[derive(Debug, Clone, PartialEq)]
pub struct SetLocal {
    /// Name of the parameter to modify or query.
    pub name: String,

    /// New value to set in the local module instance,
    /// empty to just query.
    pub value: String,
}

impl SetLocal {
    fn parse(fields: &[String]) -> Result<Self> {
        if fields.len() < 3 {
            return Err(Error::Arity {
                tag: "setlocal",
                count: fields.len(),
            });
        }

        Ok(Self {
            name: fields[1].clone(),
            value: fields[2].clone(),
        })
    }

    /// Encode the record to its wire form.
    pub fn encode(&self) -> String {
        upcode::join(["%>setlocal", self.name.as_str(), self.value.as_str()])
    }
}

/// **(<)** Confirmation that the **local parameter**
/// has been changed or queried successfully or not.
#[derive(Debug, Clone, PartialEq)]
pub struct SetLocalAck {
    /// Name of the modified parameter.
    pub name: String,

    /// Value of the local parameter.
    pub value: String,

    /// Success of operation.
    pub success: bool,
}

impl SetLocalAck {
    fn parse(fields: &[String]) -> Result<Self> {
        if fields.len() < 4 {
            return Err(Error::Arity {
                tag: "setlocal",
                count: fields.len(),
            });
        }

        Ok(Self {
            name: fields[1].clone(),
            value: fields[2].clone(),
            success: bool_field(&fields[3]),
        })
    }

    /// Encode the record to its wire form.
    pub fn encode(&self) -> String {
        upcode::join([
            "%<setlocal",
            self.name.as_str(),
            self.value.as_str(),
            bool_str(self.success),
        ])
    }
}

/// **(>)** The [`Connect`] record is used only by
/// external modules that attach to the socket interface.
///
/// As the connection is initiated from the external module
/// the engine must be informed on the role of the connection.
/// This must be the first request sent over a newly
/// established socket connection.
///
/// There is no answer to this request, if it fails
/// the engine will slam the connection shut.
#[derive(Debug, Clone, PartialEq)]
pub struct Connect {
    /// Role of this connection: `global`, `channel`, `play`, `record` or `playrec`.
    pub role: String,

    /// Channel id to connect this socket to.
    pub id: Option<String>,

    /// Type of data channel, assuming `audio` if absent.
    pub type_: Option<String>,
}

impl Connect {
    /// The `global` role connect record sent on socket transports.
    pub fn global() -> Self {
        Self {
            role: "global".to_owned(),
            id: None,
            type_: None,
        }
    }

    fn parse(fields: &[String]) -> Result<Self> {
        if fields.len() < 2 {
            return Err(Error::Arity {
                tag: "connect",
                count: fields.len(),
            });
        }

        Ok(Self {
            role: fields[1].clone(),
            id: fields.get(2).cloned(),
            type_: fields.get(3).cloned(),
        })
    }

    /// Encode the record to its wire form.
    pub fn encode(&self) -> String {
        let mut fields = vec!["%>connect".to_owned(), self.role.clone()];
        if let Some(id) = &self.id {
            fields.push(id.clone());
            if let Some(type_) = &self.type_ {
                fields.push(type_.clone());
            }
        }

        upcode::join(fields)
    }
}

/// A parsed protocol record, discriminated on the leading token.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// `%>message` or `%<message`.
    Message(Message),
    /// `%>install`.
    Install(Install),
    /// `%<install`.
    InstallAck(InstallAck),
    /// `%>uninstall`.
    Uninstall(Uninstall),
    /// `%<uninstall`.
    UninstallAck(UninstallAck),
    /// `%>watch`.
    Watch(Watch),
    /// `%<watch`.
    WatchAck(WatchAck),
    /// `%>unwatch`.
    Unwatch(Unwatch),
    /// `%<unwatch`.
    UnwatchAck(UnwatchAck),
    /// `%>setlocal`.
    SetLocal(SetLocal),
    /// `%<setlocal`.
    SetLocalAck(SetLocalAck),
    /// `%>connect`.
    Connect(Connect),
}

impl Record {
    /// Parse a record from a wire line, without its `\n` terminator.
    pub fn parse(line: &str) -> Result<Self> {
        let fields = upcode::split(line)?;

        Ok(match fields[0].as_str() {
            "%>message" | "%<message" => Self::Message(Message::parse(&fields)?),
            "%>install" => Self::Install(Install::parse(&fields)?),
            "%<install" => Self::InstallAck(InstallAck::parse(&fields)?),
            "%>uninstall" => Self::Uninstall(Uninstall::parse(&fields)?),
            "%<uninstall" => Self::UninstallAck(UninstallAck::parse(&fields)?),
            "%>watch" => Self::Watch(Watch::parse(&fields)?),
            "%<watch" => Self::WatchAck(WatchAck::parse(&fields)?),
            "%>unwatch" => Self::Unwatch(Unwatch::parse(&fields)?),
            "%<unwatch" => Self::UnwatchAck(UnwatchAck::parse(&fields)?),
            "%>setlocal" => Self::SetLocal(SetLocal::parse(&fields)?),
            "%<setlocal" => Self::SetLocalAck(SetLocalAck::parse(&fields)?),
            "%>connect" => Self::Connect(Connect::parse(&fields)?),
            tag => return Err(Error::UnknownTag(tag.to_owned())),
        })
    }

    /// Encode the record back to its wire form.
    pub fn encode(&self) -> String {
        match self {
            Self::Message(record) => record.encode(),
            Self::Install(record) => record.encode(),
            Self::InstallAck(record) => record.encode(),
            Self::Uninstall(record) => record.encode(),
            Self::UninstallAck(record) => record.encode(),
            Self::Watch(record) => record.encode(),
            Self::WatchAck(record) => record.encode(),
            Self::Unwatch(record) => record.encode(),
            Self::UnwatchAck(record) => record.encode(),
            Self::SetLocal(record) => record.encode(),
            Self::SetLocalAck(record) => record.encode(),
            Self::Connect(record) => record.encode(),
        }
    }
}
