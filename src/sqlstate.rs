//! SQLSTATE codes.
//!
//! PostgreSQL reports errors with a five character SQLSTATE code made of
//! digits and upper-case letters. The code is stored here as its base-36
//! value so that comparisons and class extraction are integer operations.

/// A five character SQLSTATE code in base-36 form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SqlState(u32);

const RADIX: u32 = 36;
/// 36^3, divides a five digit value down to its two digit class.
const CLASS_DIVISOR: u32 = RADIX * RADIX * RADIX;

const fn digit(c: u8) -> Option<u32> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as u32),
        b'A'..=b'Z' => Some((c - b'A') as u32 + 10),
        _ => None,
    }
}

const fn encode(code: [u8; 5]) -> u32 {
    let mut value = 0;
    let mut i = 0;
    while i < 5 {
        value = value * RADIX
            + match digit(code[i]) {
                Some(d) => d,
                None => 0,
            };
        i += 1;
    }
    value
}

impl SqlState {
    /// Parse a SQLSTATE from its wire representation.
    ///
    /// Returns `None` unless the input is exactly five characters from
    /// `[0-9A-Z]`.
    pub fn from_code(code: &str) -> Option<Self> {
        let bytes: [u8; 5] = code.as_bytes().try_into().ok()?;
        let mut i = 0;
        while i < 5 {
            digit(bytes[i])?;
            i += 1;
        }
        Some(Self(encode(bytes)))
    }

    /// Build a SQLSTATE from a five character literal, e.g. `*b"40001"`.
    pub const fn from_ascii(code: [u8; 5]) -> Self {
        Self(encode(code))
    }

    /// The base-36 value.
    pub fn value(self) -> u32 {
        self.0
    }

    /// The five character code, e.g. `"40001"`.
    pub fn code(self) -> String {
        let mut out = [b'0'; 5];
        let mut v = self.0;
        let mut i = 5;
        while i > 0 {
            i -= 1;
            let d = (v % RADIX) as u8;
            out[i] = if d < 10 { b'0' + d } else { b'A' + d - 10 };
            v /= RADIX;
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    /// The base-36 value of the two character class prefix.
    pub fn class(self) -> u32 {
        self.0 / CLASS_DIVISOR
    }

    /// Class 08: connection exceptions.
    pub fn is_connection_exception(self) -> bool {
        self.class() == Self::CONNECTION_EXCEPTION.class()
    }

    /// True for codes that mean the server is going away or refusing new
    /// sessions, which a client should treat like a connect failure.
    pub fn is_server_unavailable(self) -> bool {
        matches!(
            self,
            Self::ADMIN_SHUTDOWN
                | Self::CRASH_SHUTDOWN
                | Self::CANNOT_CONNECT_NOW
                | Self::TOO_MANY_CONNECTIONS
        )
    }
}

impl std::fmt::Display for SqlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code())
    }
}

macro_rules! sqlstates {
    ($($name:ident = $code:literal,)+) => {
        impl SqlState {
            $(pub const $name: SqlState = SqlState::from_ascii(*$code);)+
        }
    };
}

sqlstates! {
    SUCCESSFUL_COMPLETION = b"00000",
    WARNING = b"01000",
    NO_DATA = b"02000",
    CONNECTION_EXCEPTION = b"08000",
    SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION = b"08001",
    CONNECTION_DOES_NOT_EXIST = b"08003",
    SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION = b"08004",
    CONNECTION_FAILURE = b"08006",
    TRANSACTION_RESOLUTION_UNKNOWN = b"08007",
    PROTOCOL_VIOLATION = b"08P01",
    FEATURE_NOT_SUPPORTED = b"0A000",
    DATA_EXCEPTION = b"22000",
    NUMERIC_VALUE_OUT_OF_RANGE = b"22003",
    NULL_VALUE_NOT_ALLOWED = b"22004",
    DIVISION_BY_ZERO = b"22012",
    INVALID_PARAMETER_VALUE = b"22023",
    INVALID_TEXT_REPRESENTATION = b"22P02",
    INVALID_BINARY_REPRESENTATION = b"22P03",
    INTEGRITY_CONSTRAINT_VIOLATION = b"23000",
    NOT_NULL_VIOLATION = b"23502",
    FOREIGN_KEY_VIOLATION = b"23503",
    UNIQUE_VIOLATION = b"23505",
    CHECK_VIOLATION = b"23514",
    INVALID_TRANSACTION_STATE = b"25000",
    ACTIVE_SQL_TRANSACTION = b"25001",
    READ_ONLY_SQL_TRANSACTION = b"25006",
    NO_ACTIVE_SQL_TRANSACTION = b"25P01",
    IN_FAILED_SQL_TRANSACTION = b"25P02",
    INVALID_AUTHORIZATION_SPECIFICATION = b"28000",
    INVALID_PASSWORD = b"28P01",
    TRANSACTION_ROLLBACK = b"40000",
    SERIALIZATION_FAILURE = b"40001",
    DEADLOCK_DETECTED = b"40P01",
    SYNTAX_ERROR_OR_ACCESS_RULE_VIOLATION = b"42000",
    INSUFFICIENT_PRIVILEGE = b"42501",
    SYNTAX_ERROR = b"42601",
    UNDEFINED_COLUMN = b"42703",
    UNDEFINED_OBJECT = b"42704",
    DATATYPE_MISMATCH = b"42804",
    UNDEFINED_FUNCTION = b"42883",
    UNDEFINED_TABLE = b"42P01",
    DUPLICATE_TABLE = b"42P07",
    INSUFFICIENT_RESOURCES = b"53000",
    DISK_FULL = b"53100",
    OUT_OF_MEMORY = b"53200",
    TOO_MANY_CONNECTIONS = b"53300",
    QUERY_CANCELED = b"57014",
    ADMIN_SHUTDOWN = b"57P01",
    CRASH_SHUTDOWN = b"57P02",
    CANNOT_CONNECT_NOW = b"57P03",
    SYSTEM_ERROR = b"58000",
    IO_ERROR = b"58030",
    PLPGSQL_ERROR = b"P0000",
    INTERNAL_ERROR = b"XX000",
    DATA_CORRUPTED = b"XX001",
    INDEX_CORRUPTED = b"XX002",
}
