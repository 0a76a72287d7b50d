//! Standard subjects and services every node understands
//!
//! Fixed, well-known identifiers: the heartbeat subject plus the info,
//! register-access, register-list, and command services. The message
//! schemas here are the published wire contract; the heartbeat is sealed,
//! everything else is delimited so it can grow compatibly.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use tessera_core::{DecodeError, Health, Mode, Result, ServiceId, SubjectId};
use tessera_registry::{RegisterFlags, Value};
use tessera_wire::{BitReader, BitWriter, Message, Service, TypeDescriptor};

use crate::node::Node;

/// Subject carrying node liveness broadcasts
pub const HEARTBEAT_SUBJECT: SubjectId = SubjectId(7509);

/// Service answering node identity queries
pub const SERVICE_NODE_INFO: ServiceId = ServiceId(430);

/// Service enumerating register names by index
pub const SERVICE_REGISTER_LIST: ServiceId = ServiceId(384);

/// Service reading and writing registers
pub const SERVICE_REGISTER_ACCESS: ServiceId = ServiceId(385);

/// Service executing node-level commands
pub const SERVICE_COMMAND: ServiceId = ServiceId(435);

/// Wire protocol version reported by the info service
pub const PROTOCOL_VERSION: (u8, u8) = (1, 0);

/// Re-enter initialization and rebase uptime
pub const COMMAND_RESTART: u16 = 65535;

/// Flush persistent registers through the backend now
pub const COMMAND_STORE_PERSISTENT_STATES: u16 = 65533;

/// Clear all persistent registers; defaults reapply on next access
pub const COMMAND_FACTORY_RESET: u16 = 65532;

pub const STATUS_SUCCESS: u8 = 0;
pub const STATUS_BAD_COMMAND: u8 = 3;

const MAX_NODE_NAME_LEN: usize = 50;
const MAX_REGISTER_NAME_LEN: usize = 255;

/// Periodic liveness broadcast: uptime, health, mode, vendor status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    pub uptime_secs: u32,
    pub health: Health,
    pub mode: Mode,
    pub vendor_status: u8,
}

impl Message for Heartbeat {
    // uptime(32) + health(2) + mode(2) + reserved(4) + vendor(8)
    const DESCRIPTOR: TypeDescriptor = TypeDescriptor::sealed(48);

    fn encode(&self, w: &mut BitWriter) {
        w.write_bits(self.uptime_secs as u64, 32);
        w.write_bits(self.health.to_bits() as u64, 2);
        w.write_bits(self.mode.to_bits() as u64, 2);
        w.write_bits(0, 4);
        w.write_bits(self.vendor_status as u64, 8);
    }

    fn decode(r: &mut BitReader<'_>) -> std::result::Result<Self, DecodeError> {
        let uptime_secs = r.read_bits(32) as u32;
        let health = Health::from_bits(r.read_bits(2) as u8);
        let mode = Mode::from_bits(r.read_bits(2) as u8);
        let _reserved = r.read_bits(4);
        let vendor_status = r.read_bits(8) as u8;
        Ok(Heartbeat {
            uptime_secs,
            health,
            mode,
            vendor_status,
        })
    }
}

/// Info query carries no parameters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InfoRequest;

impl Message for InfoRequest {
    const DESCRIPTOR: TypeDescriptor = TypeDescriptor::sealed(0);

    fn encode(&self, _w: &mut BitWriter) {}

    fn decode(_r: &mut BitReader<'_>) -> std::result::Result<Self, DecodeError> {
        Ok(InfoRequest)
    }
}

/// Identity and version of the answering node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfoResponse {
    pub protocol_version: (u8, u8),
    pub software_version: (u8, u8),
    pub name: String,
}

impl Message for InfoResponse {
    const DESCRIPTOR: TypeDescriptor = TypeDescriptor::delimited(40, 440, 512);

    fn encode(&self, w: &mut BitWriter) {
        w.write_bits(self.protocol_version.0 as u64, 8);
        w.write_bits(self.protocol_version.1 as u64, 8);
        w.write_bits(self.software_version.0 as u64, 8);
        w.write_bits(self.software_version.1 as u64, 8);
        let name = self.name.as_bytes();
        let len = name.len().min(MAX_NODE_NAME_LEN);
        w.write_bits(len as u64, 8);
        w.write_bytes(&name[..len]);
    }

    fn decode(r: &mut BitReader<'_>) -> std::result::Result<Self, DecodeError> {
        let protocol_version = (r.read_bits(8) as u8, r.read_bits(8) as u8);
        let software_version = (r.read_bits(8) as u8, r.read_bits(8) as u8);
        let len = r.read_bits(8) as usize;
        if len > MAX_NODE_NAME_LEN {
            return Err(DecodeError::IllFormedLengthPrefix {
                length: len,
                remaining: MAX_NODE_NAME_LEN,
            });
        }
        let name = String::from_utf8_lossy(&r.read_bytes(len)).into_owned();
        Ok(InfoResponse {
            protocol_version,
            software_version,
            name,
        })
    }
}

/// Request the register name at an index, in lexicographic order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterListRequest {
    pub index: u16,
}

impl Message for RegisterListRequest {
    const DESCRIPTOR: TypeDescriptor = TypeDescriptor::sealed(16);

    fn encode(&self, w: &mut BitWriter) {
        w.write_bits(self.index as u64, 16);
    }

    fn decode(r: &mut BitReader<'_>) -> std::result::Result<Self, DecodeError> {
        Ok(RegisterListRequest {
            index: r.read_bits(16) as u16,
        })
    }
}

/// Empty name means the index is past the end
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterListResponse {
    pub name: String,
}

impl Message for RegisterListResponse {
    const DESCRIPTOR: TypeDescriptor = TypeDescriptor::delimited(8, 2048, 2304);

    fn encode(&self, w: &mut BitWriter) {
        write_register_name(w, &self.name);
    }

    fn decode(r: &mut BitReader<'_>) -> std::result::Result<Self, DecodeError> {
        Ok(RegisterListResponse {
            name: read_register_name(r),
        })
    }
}

/// Read (empty value) or write (non-empty value) one register
#[derive(Clone, Debug, PartialEq)]
pub struct RegisterAccessRequest {
    pub name: String,
    pub value: Value,
}

impl RegisterAccessRequest {
    pub fn read(name: impl Into<String>) -> Self {
        RegisterAccessRequest {
            name: name.into(),
            value: Value::Empty,
        }
    }

    pub fn write(name: impl Into<String>, value: Value) -> Self {
        RegisterAccessRequest {
            name: name.into(),
            value,
        }
    }
}

impl Message for RegisterAccessRequest {
    const DESCRIPTOR: TypeDescriptor = TypeDescriptor::delimited(48, 4152, 4608);

    fn encode(&self, w: &mut BitWriter) {
        write_register_name(w, &self.name);
        w.write_delimited(|nested| self.value.encode(nested));
    }

    fn decode(r: &mut BitReader<'_>) -> std::result::Result<Self, DecodeError> {
        let name = read_register_name(r);
        let value = r.read_delimited(Value::decode)?;
        Ok(RegisterAccessRequest { name, value })
    }
}

/// The register's value and attributes after the access.
///
/// A refused write answers with the unchanged current value; an unknown
/// register answers with an empty value.
#[derive(Clone, Debug, PartialEq)]
pub struct RegisterAccessResponse {
    pub value: Value,
    pub mutable: bool,
    pub persistent: bool,
}

impl Message for RegisterAccessResponse {
    const DESCRIPTOR: TypeDescriptor = TypeDescriptor::delimited(48, 2112, 2304);

    fn encode(&self, w: &mut BitWriter) {
        w.write_bool(self.mutable);
        w.write_bool(self.persistent);
        w.write_delimited(|nested| self.value.encode(nested));
    }

    fn decode(r: &mut BitReader<'_>) -> std::result::Result<Self, DecodeError> {
        let mutable = r.read_bool();
        let persistent = r.read_bool();
        let value = r.read_delimited(Value::decode)?;
        Ok(RegisterAccessResponse {
            value,
            mutable,
            persistent,
        })
    }
}

/// Execute a node-level command with an opaque parameter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: u16,
    pub parameter: String,
}

impl CommandRequest {
    pub fn new(command: u16) -> Self {
        CommandRequest {
            command,
            parameter: String::new(),
        }
    }
}

impl Message for CommandRequest {
    const DESCRIPTOR: TypeDescriptor = TypeDescriptor::delimited(24, 2064, 2304);

    fn encode(&self, w: &mut BitWriter) {
        w.write_bits(self.command as u64, 16);
        write_register_name(w, &self.parameter);
    }

    fn decode(r: &mut BitReader<'_>) -> std::result::Result<Self, DecodeError> {
        let command = r.read_bits(16) as u16;
        let parameter = read_register_name(r);
        Ok(CommandRequest { command, parameter })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandResponse {
    pub status: u8,
}

impl Message for CommandResponse {
    const DESCRIPTOR: TypeDescriptor = TypeDescriptor::sealed(8);

    fn encode(&self, w: &mut BitWriter) {
        w.write_bits(self.status as u64, 8);
    }

    fn decode(r: &mut BitReader<'_>) -> std::result::Result<Self, DecodeError> {
        Ok(CommandResponse {
            status: r.read_bits(8) as u8,
        })
    }
}

fn write_register_name(w: &mut BitWriter, name: &str) {
    let bytes = name.as_bytes();
    let len = bytes.len().min(MAX_REGISTER_NAME_LEN);
    w.write_bits(len as u64, 8);
    w.write_bytes(&bytes[..len]);
}

fn read_register_name(r: &mut BitReader<'_>) -> String {
    let len = r.read_bits(8) as usize;
    String::from_utf8_lossy(&r.read_bytes(len)).into_owned()
}

pub struct InfoService;

impl Service for InfoService {
    type Request = InfoRequest;
    type Response = InfoResponse;
}

pub struct RegisterListService;

impl Service for RegisterListService {
    type Request = RegisterListRequest;
    type Response = RegisterListResponse;
}

pub struct RegisterAccessService;

impl Service for RegisterAccessService {
    type Request = RegisterAccessRequest;
    type Response = RegisterAccessResponse;
}

pub struct CommandService;

impl Service for CommandService {
    type Request = CommandRequest;
    type Response = CommandResponse;
}

/// Bind the standard servers on a starting node
pub(crate) fn spawn_standard_services(node: &Node) -> Result<()> {
    let info = node.inner.config.info.clone();
    let server = node.server::<InfoService>(SERVICE_NODE_INFO.0)?;
    server.serve(move |_request, _meta| {
        let info = info.clone();
        async move {
            Some(InfoResponse {
                protocol_version: PROTOCOL_VERSION,
                software_version: info.software_version,
                name: info.name,
            })
        }
    });

    let registry = Arc::clone(&node.inner.registry);
    let server = node.server::<RegisterListService>(SERVICE_REGISTER_LIST.0)?;
    server.serve(move |request: RegisterListRequest, _meta| {
        let registry = Arc::clone(&registry);
        async move {
            let name = registry.name_at(request.index as usize).unwrap_or_default();
            Some(RegisterListResponse { name })
        }
    });

    let registry = Arc::clone(&node.inner.registry);
    let server = node.server::<RegisterAccessService>(SERVICE_REGISTER_ACCESS.0)?;
    server.serve(move |request: RegisterAccessRequest, _meta| {
        let registry = Arc::clone(&registry);
        async move {
            if !request.value.is_empty() {
                // The store is the single authority: a refused write
                // simply answers with the unchanged current value
                if let Err(err) = registry.set(&request.name, request.value) {
                    debug!(register = %request.name, error = %err, "remote write refused");
                }
            }
            let value = registry.get(&request.name).unwrap_or(Value::Empty);
            let flags = registry
                .flags(&request.name)
                .unwrap_or(RegisterFlags::READ_ONLY);
            Some(RegisterAccessResponse {
                value,
                mutable: flags.mutable,
                persistent: flags.persistent,
            })
        }
    });

    let inner = Arc::clone(&node.inner);
    let server = node.server::<CommandService>(SERVICE_COMMAND.0)?;
    server.serve(move |request: CommandRequest, _meta| {
        let inner = Arc::clone(&inner);
        async move {
            let status = match request.command {
                COMMAND_RESTART => {
                    *inner.uptime_base.lock() = Instant::now();
                    inner
                        .mode
                        .store(Mode::Initialization.to_bits(), std::sync::atomic::Ordering::Relaxed);
                    STATUS_SUCCESS
                }
                COMMAND_STORE_PERSISTENT_STATES => {
                    inner.registry.flush();
                    STATUS_SUCCESS
                }
                COMMAND_FACTORY_RESET => {
                    inner.registry.factory_reset();
                    STATUS_SUCCESS
                }
                _ => STATUS_BAD_COMMAND,
            };
            Some(CommandResponse { status })
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_wire::{decode_from_slice, encode_to_vec};

    #[test]
    fn test_heartbeat_is_six_bytes() {
        let beat = Heartbeat {
            uptime_secs: 3601,
            health: Health::Advisory,
            mode: Mode::Operational,
            vendor_status: 0x7F,
        };
        let buf = encode_to_vec(&beat);
        assert_eq!(buf.len(), 6);

        let back: Heartbeat = decode_from_slice(&buf).unwrap();
        assert_eq!(back, beat);
    }

    #[test]
    fn test_heartbeat_rejects_wrong_size() {
        assert!(decode_from_slice::<Heartbeat>(&[0u8; 5]).is_err());
        assert!(decode_from_slice::<Heartbeat>(&[0u8; 7]).is_err());
    }

    #[test]
    fn test_info_response_roundtrip() {
        let response = InfoResponse {
            protocol_version: PROTOCOL_VERSION,
            software_version: (2, 7),
            name: "vendor.widget.controller".into(),
        };
        let buf = encode_to_vec(&response);
        assert!(buf.len() <= InfoResponse::DESCRIPTOR.extent_bytes());
        let back: InfoResponse = decode_from_slice(&buf).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn test_info_response_tolerates_newer_schema() {
        let response = InfoResponse {
            protocol_version: (1, 0),
            software_version: (0, 1),
            name: "n".into(),
        };
        let mut buf = encode_to_vec(&response);
        // A newer revision appended fields this decoder does not know
        buf.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        let back: InfoResponse = decode_from_slice(&buf).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn test_register_access_roundtrip() {
        let request =
            RegisterAccessRequest::write("thermostat.pid.gains", Value::F64(vec![0.1, 0.2, 0.3]));
        let buf = encode_to_vec(&request);
        let back: RegisterAccessRequest = decode_from_slice(&buf).unwrap();
        assert_eq!(back, request);

        let response = RegisterAccessResponse {
            value: Value::F64(vec![0.1, 0.2, 0.3]),
            mutable: true,
            persistent: false,
        };
        let buf = encode_to_vec(&response);
        let back: RegisterAccessResponse = decode_from_slice(&buf).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn test_command_roundtrip() {
        let request = CommandRequest::new(COMMAND_FACTORY_RESET);
        let buf = encode_to_vec(&request);
        let back: CommandRequest = decode_from_slice(&buf).unwrap();
        assert_eq!(back, request);
    }
}
