//! Enumerations carried in link tables.
//!
//! Absent enum fields decode to the declared default (the first variant).
//! Raw values this build does not know decode to the enum's fallback and are
//! logged; they never fail the frame.

use link_wire::{Result, Scalar, Table};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Conversion between an enum and its raw wire representation
pub trait WireEnum: Copy + PartialEq + fmt::Debug + Sized + 'static {
    /// Fixed-width storage type
    type Repr: Scalar + fmt::Display;
    /// Schema default, used when the field is absent
    const DEFAULT: Self;
    /// Value substituted for unrecognised raw values
    const FALLBACK: Self;
    /// Enum name for diagnostics
    const TYPE_NAME: &'static str;

    /// Map a raw value to a known variant
    fn from_wire(raw: Self::Repr) -> Option<Self>;
    /// Raw value written to the wire
    fn to_wire(self) -> Self::Repr;
    /// Protocol name of the variant
    fn name(self) -> &'static str;
}

/// Error returned when parsing an enum from text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    /// Enum name
    pub kind: &'static str,
    /// Text that failed to parse
    pub value: String,
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $repr:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal => $label:literal, )+
        }
        default = $default:ident, fallback = $fallback:ident;
    ) => {
        $(#[$meta])*
        #[repr($repr)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value, )+
        }

        impl WireEnum for $name {
            type Repr = $repr;
            const DEFAULT: Self = $name::$default;
            const FALLBACK: Self = $name::$fallback;
            const TYPE_NAME: &'static str = stringify!($name);

            fn from_wire(raw: $repr) -> Option<Self> {
                match raw {
                    $( $value => Some($name::$variant), )+
                    _ => None,
                }
            }

            fn to_wire(self) -> $repr {
                self as $repr
            }

            fn name(self) -> &'static str {
                match self {
                    $( $name::$variant => $label, )+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                <Self as WireEnum>::DEFAULT
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let normalized = s.replace('-', "_");
                $(
                    if normalized.eq_ignore_ascii_case($label) {
                        return Ok($name::$variant);
                    }
                )+
                Err(UnknownVariant {
                    kind: stringify!($name),
                    value: s.to_string(),
                })
            }
        }
    };
}

wire_enum! {
    /// Server action selected by a command
    pub enum CommandType: u8 {
        /// List the procedures (node types) the backend offers
        ListProcedures = 0 => "LIST_PROCEDURES",
        /// Add a mesh to the scene
        AppendMesh = 1 => "APPEND_MESH",
        /// Load a model file into the scene
        LoadFile = 2 => "LOAD_FILE",
        /// Save the scene to a file
        SaveFile = 3 => "SAVE_FILE",
        /// Remove everything from the scene
        ClearScene = 4 => "CLEAR_SCENE",
        /// Receiver-side marker for a command this build does not know
        Unknown = 255 => "UNKNOWN",
    }
    default = ListProcedures, fallback = Unknown;
}

wire_enum! {
    /// Logical recipient class of a message
    pub enum TargetType: u8 {
        /// Backend server
        Server = 0 => "SERVER",
        /// Browser viewer
        Web = 1 => "WEB",
        /// Python kernel
        Python = 2 => "PYTHON",
    }
    default = Server, fallback = Server;
}

wire_enum! {
    /// Format of a file argument
    pub enum FileType: u8 {
        /// Industry Foundation Classes
        Ifc = 0 => "IFC",
        /// Stereolithography mesh
        Stl = 1 => "STL",
        /// Wavefront OBJ
        Obj = 2 => "OBJ",
        /// glTF
        Gltf = 3 => "GLTF",
        /// STEP
        Step = 4 => "STEP",
    }
    default = Ifc, fallback = Ifc;
}

wire_enum! {
    /// Failure class reported by the server
    pub enum ErrorCode: u16 {
        /// No specific code
        Unspecified = 0 => "UNSPECIFIED",
        /// Command not understood
        InvalidCommand = 1 => "INVALID_COMMAND",
        /// Named procedure does not exist
        ProcedureNotFound = 2 => "PROCEDURE_NOT_FOUND",
        /// Referenced file does not exist
        FileNotFound = 3 => "FILE_NOT_FOUND",
        /// Payload could not be parsed
        ParseFailed = 4 => "PARSE_FAILED",
        /// Server-side failure
        Internal = 5 => "INTERNAL",
    }
    default = Unspecified, fallback = Unspecified;
}

/// Read an enum field that has a schema default
pub(crate) fn read_enum<E: WireEnum>(table: &Table<'_>, field: u16) -> Result<E> {
    Ok(read_optional_enum(table, field)?.unwrap_or(E::DEFAULT))
}

/// Read an enum field declared without a default
pub(crate) fn read_optional_enum<E: WireEnum>(table: &Table<'_>, field: u16) -> Result<Option<E>> {
    let Some(raw) = table.get_optional::<E::Repr>(field)? else {
        return Ok(None);
    };
    Ok(Some(E::from_wire(raw).unwrap_or_else(|| {
        warn!(
            "Unknown {} value {}, using {}",
            E::TYPE_NAME,
            raw,
            E::FALLBACK.name()
        );
        E::FALLBACK
    })))
}
