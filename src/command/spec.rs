//! Command schema values and the protocol catalogue.
//!
//! A [`CommandSpec`] is pure data: the wire name, the ordered argument and
//! response schemas, the error-kind mapping, and the answer policy. Handler
//! behavior lives elsewhere; the registry stays testable on its own.

use crate::error::FailureKind;

/// Wire encoding kind of one argument or response field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// ASCII decimal signed integer.
    Integer,
    /// Raw byte string.
    Str,
    /// UTF-8 text.
    Text,
    /// Sequence of u16-BE length-prefixed byte strings.
    StrList,
    /// `resource@domain` peer address.
    Address,
    /// `host:port` pair.
    HostPort,
    /// Opaque certificate blob.
    Cert,
    /// Opaque certificate-request blob.
    CertReq,
}

/// One named, typed field of an argument or response schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: ArgKind,
}

const fn field(name: &'static str, kind: ArgKind) -> FieldSpec {
    FieldSpec { name, kind }
}

/// The closed set of protocol commands, for outbound lookup by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Listen,
    Virtual,
    Identify,
    BindUdp,
    SourceIp,
    Sign,
    Choke,
    Unchoke,
    WhoAmI,
    YourAddress,
}

impl CommandKind {
    /// All commands in catalogue order.
    pub const ALL: [CommandKind; 10] = [
        CommandKind::Listen,
        CommandKind::Virtual,
        CommandKind::Identify,
        CommandKind::BindUdp,
        CommandKind::SourceIp,
        CommandKind::Sign,
        CommandKind::Choke,
        CommandKind::Unchoke,
        CommandKind::WhoAmI,
        CommandKind::YourAddress,
    ];

    /// Canonical lower-kebab wire name. Inbound matching is
    /// case-insensitive.
    pub fn wire_name(self) -> &'static str {
        match self {
            CommandKind::Listen => "listen",
            CommandKind::Virtual => "virtual",
            CommandKind::Identify => "identify",
            CommandKind::BindUdp => "bind-udp",
            CommandKind::SourceIp => "source-ip",
            CommandKind::Sign => "sign",
            CommandKind::Choke => "choke",
            CommandKind::Unchoke => "unchoke",
            CommandKind::WhoAmI => "who-am-i",
            CommandKind::YourAddress => "your-address",
        }
    }
}

/// Schema of one command: wire name, argument and response field lists,
/// error-kind mapping, and answer policy. Immutable once registered.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub kind: CommandKind,
    pub name: &'static str,
    pub arguments: &'static [FieldSpec],
    pub response: &'static [FieldSpec],
    pub errors: &'static [(FailureKind, &'static str)],
    pub answer_required: bool,
}

impl CommandSpec {
    /// Map a failure kind through this command's error table.
    pub fn wire_error_name(&self, kind: FailureKind) -> Option<&'static str> {
        self.errors
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, name)| *name)
    }
}

/// Registers interest in hearing about inbound connections for the named
/// protocols. On the wire:
///
/// ```text
/// C: _command: listen
/// C: _ask: 1
/// C: From: glyph@divmod.com
/// C: protocols: q2q-example, q2q-example2
/// C: description: some simple protocols
/// C:
/// S: _answer: 1
/// S:
/// ```
const LISTEN: CommandSpec = CommandSpec {
    kind: CommandKind::Listen,
    name: "listen",
    arguments: &[
        field("From", ArgKind::Address),
        field("protocols", ArgKind::StrList),
        field("description", ArgKind::Text),
    ],
    response: &[],
    errors: &[],
    answer_required: true,
};

/// Establishes one virtual connection over the physical connection. The id
/// is unique only within the scope of this connection. The empty answer
/// carries a side effect: the responder's virtual transport starts exactly
/// when the answer is handed to the write path.
const VIRTUAL: CommandSpec = CommandSpec {
    kind: CommandKind::Virtual,
    name: "virtual",
    arguments: &[field("id", ArgKind::Integer)],
    response: &[],
    errors: &[],
    answer_required: true,
};

/// Answered with a self-signed certificate for the requested domain,
/// assuming the responder is an authority for it. On the wire:
///
/// ```text
/// C: _command: identify
/// C: _ask: 1
/// C: subject: divmod.com
/// C:
/// S: _answer: 1
/// S: certificate: <<<self-signed certificate of divmod.com>>>
/// S:
/// ```
const IDENTIFY: CommandSpec = CommandSpec {
    kind: CommandKind::Identify,
    name: "identify",
    arguments: &[field("subject", ArgKind::Address)],
    response: &[field("certificate", ArgKind::Cert)],
    errors: &[],
    answer_required: true,
};

/// Negotiates a direct UDP path between two peers.
const BIND_UDP: CommandSpec = CommandSpec {
    kind: CommandKind::BindUdp,
    name: "bind-udp",
    arguments: &[
        field("protocol", ArgKind::Str),
        field("q2qsrc", ArgKind::Address),
        field("q2qdst", ArgKind::Address),
        field("udpsrc", ArgKind::HostPort),
        field("udpdst", ArgKind::HostPort),
    ],
    response: &[],
    errors: &[(FailureKind::Connection, "ConnectionError")],
    answer_required: true,
};

/// Asks a server on the public internet what the caller's public IP
/// probably is. On the wire:
///
/// ```text
/// C: _command: source-ip
/// C: _ask: 1
/// C:
/// S: _answer: 1
/// S: ip: 4.3.2.1
/// S:
/// ```
const SOURCE_IP: CommandSpec = CommandSpec {
    kind: CommandKind::SourceIp,
    name: "source-ip",
    arguments: &[],
    response: &[field("ip", ArgKind::Str)],
    errors: &[],
    answer_required: true,
};

/// Signs a certificate request for an account named by the request,
/// authenticated with a password.
const SIGN: CommandSpec = CommandSpec {
    kind: CommandKind::Sign,
    name: "sign",
    arguments: &[
        field("certificate_request", ArgKind::CertReq),
        field("password", ArgKind::Str),
    ],
    response: &[field("certificate", ArgKind::Cert)],
    errors: &[
        (FailureKind::NoSuchUser, "NoSuchUser"),
        (FailureKind::BadCertificateRequest, "BadCertificateRequest"),
    ],
    answer_required: true,
};

/// Asks the peer to be quiet for a while on one channel. Never answered.
const CHOKE: CommandSpec = CommandSpec {
    kind: CommandKind::Choke,
    name: "choke",
    arguments: &[field("id", ArgKind::Integer)],
    response: &[],
    errors: &[],
    answer_required: false,
};

/// Reverses the effects of a choke. Never answered.
const UNCHOKE: CommandSpec = CommandSpec {
    kind: CommandKind::Unchoke,
    name: "unchoke",
    arguments: &[field("id", ArgKind::Integer)],
    response: &[],
    errors: &[],
    answer_required: false,
};

/// The responder reports how it perceives the caller's transport address.
const WHO_AM_I: CommandSpec = CommandSpec {
    kind: CommandKind::WhoAmI,
    name: "who-am-i",
    arguments: &[],
    response: &[field("address", ArgKind::HostPort)],
    errors: &[],
    answer_required: true,
};

/// The caller informs the responder of its own believed address.
const YOUR_ADDRESS: CommandSpec = CommandSpec {
    kind: CommandKind::YourAddress,
    name: "your-address",
    arguments: &[field("address", ArgKind::HostPort)],
    response: &[],
    errors: &[],
    answer_required: true,
};

/// The full protocol catalogue in registration order.
pub const fn catalogue() -> [CommandSpec; 10] {
    [
        LISTEN,
        VIRTUAL,
        IDENTIFY,
        BIND_UDP,
        SOURCE_IP,
        SIGN,
        CHOKE,
        UNCHOKE,
        WHO_AM_I,
        YOUR_ADDRESS,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_covers_all_kinds_once() {
        let specs = catalogue();
        assert_eq!(specs.len(), CommandKind::ALL.len());
        for kind in CommandKind::ALL {
            assert_eq!(specs.iter().filter(|s| s.kind == kind).count(), 1);
        }
    }

    #[test]
    fn test_names_are_lower_kebab() {
        for spec in catalogue() {
            assert_eq!(spec.name, spec.kind.wire_name());
            assert!(spec
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '-'));
        }
    }

    #[test]
    fn test_flow_commands_never_answer() {
        let specs = catalogue();
        for spec in &specs {
            let expected = !matches!(spec.kind, CommandKind::Choke | CommandKind::Unchoke);
            assert_eq!(spec.answer_required, expected, "{}", spec.name);
        }
    }

    #[test]
    fn test_sign_error_table() {
        let sign = catalogue()
            .into_iter()
            .find(|s| s.kind == CommandKind::Sign)
            .unwrap();
        assert_eq!(
            sign.wire_error_name(FailureKind::NoSuchUser),
            Some("NoSuchUser")
        );
        assert_eq!(
            sign.wire_error_name(FailureKind::BadCertificateRequest),
            Some("BadCertificateRequest")
        );
        assert_eq!(sign.wire_error_name(FailureKind::Connection), None);
    }

    #[test]
    fn test_bind_udp_error_table() {
        let bind = catalogue()
            .into_iter()
            .find(|s| s.kind == CommandKind::BindUdp)
            .unwrap();
        assert_eq!(
            bind.wire_error_name(FailureKind::Connection),
            Some("ConnectionError")
        );
    }
}
