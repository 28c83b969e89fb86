//! Micheline expressions: the data and type syntax of Tezos contracts.
//!
//! Expressions come in from Micheline JSON (compiled contracts) or from
//! Michelson text (`.tz` files, `get contract storage` output) and go out as
//! Michelson text, the form `octez-client` takes for `--init`.

mod parser;

use std::fmt::{self, Display, Write};

use num_bigint::BigInt;
use serde::Deserialize;

pub use parser::{parse_expr, parse_script};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MichelineError {
    #[error("Failed to parse Michelson: {0}")]
    Parse(String),
    #[error("Invalid Micheline JSON: {0}")]
    Json(String),
    #[error("Program has no storage section")]
    MissingStorageSection,
    #[error("Program has no parameter section")]
    MissingParameterSection,
    #[error("Program has no entrypoint `{0}`")]
    UnknownEntrypoint(String),
    #[error("Storage type field `{0}` has no value")]
    MissingField(String),
    #[error("Field `{0}` is not part of the storage type")]
    UnexpectedField(String),
    #[error("Storage type leaf `{0}` has no field annotation")]
    MissingAnnotation(String),
    #[error("Expected a value of type `{expected}`, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("Invalid address `{0}`")]
    InvalidAddress(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawMicheline")]
pub enum Micheline {
    Int(BigInt),
    String(String),
    Bytes(Vec<u8>),
    Prim(Prim),
    Seq(Vec<Micheline>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prim {
    pub name: String,
    pub args: Vec<Micheline>,
    pub annots: Vec<String>,
}

impl Prim {
    /// The `%name` annotation, without its sigil.
    pub fn field_annot(&self) -> Option<&str> {
        self.annots.iter().find_map(|a| a.strip_prefix('%'))
    }
}

impl Micheline {
    pub fn prim(name: &str, args: Vec<Micheline>) -> Self {
        Micheline::Prim(Prim {
            name: name.to_owned(),
            args,
            annots: Vec::new(),
        })
    }

    pub fn pair(left: Micheline, right: Micheline) -> Self {
        Self::prim("Pair", vec![left, right])
    }

    pub fn elt(key: Micheline, value: Micheline) -> Self {
        Self::prim("Elt", vec![key, value])
    }

    pub fn string(s: impl Into<String>) -> Self {
        Micheline::String(s.into())
    }

    pub fn int(n: impl Into<BigInt>) -> Self {
        Micheline::Int(n.into())
    }

    pub fn as_prim(&self) -> Option<&Prim> {
        match self {
            Micheline::Prim(prim) => Some(prim),
            _ => None,
        }
    }

    /// Short description used in error messages.
    pub(crate) fn kind(&self) -> String {
        match self {
            Micheline::Int(n) => format!("int {n}"),
            Micheline::String(s) => format!("string {s:?}"),
            Micheline::Bytes(_) => "bytes".to_owned(),
            Micheline::Prim(prim) => format!("primitive {}", prim.name),
            Micheline::Seq(_) => "sequence".to_owned(),
        }
    }

    fn fmt_michelson(&self, f: &mut fmt::Formatter<'_>, nested: bool) -> fmt::Result {
        match self {
            Micheline::Int(n) => write!(f, "{n}"),
            Micheline::String(s) => write_string_literal(f, s),
            Micheline::Bytes(bytes) => write!(f, "0x{}", hex::encode(bytes)),
            Micheline::Seq(items) if items.is_empty() => f.write_str("{}"),
            Micheline::Seq(items) => {
                f.write_str("{ ")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ; ")?;
                    }
                    item.fmt_michelson(f, false)?;
                }
                f.write_str(" }")
            }
            Micheline::Prim(prim) => {
                let bare = prim.args.is_empty() && prim.annots.is_empty();
                if nested && !bare {
                    f.write_char('(')?;
                }
                f.write_str(&prim.name)?;
                for annot in &prim.annots {
                    write!(f, " {annot}")?;
                }
                for arg in &prim.args {
                    f.write_char(' ')?;
                    arg.fmt_michelson(f, true)?;
                }
                if nested && !bare {
                    f.write_char(')')?;
                }
                Ok(())
            }
        }
    }
}

fn write_string_literal(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

/// Renders Michelson concrete syntax.
impl Display for Micheline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_michelson(f, false)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMicheline {
    Int {
        int: String,
    },
    String {
        string: String,
    },
    Bytes {
        bytes: String,
    },
    Prim {
        prim: String,
        #[serde(default)]
        args: Vec<Micheline>,
        #[serde(default)]
        annots: Vec<String>,
    },
    Seq(Vec<Micheline>),
}

impl TryFrom<RawMicheline> for Micheline {
    type Error = MichelineError;

    fn try_from(raw: RawMicheline) -> Result<Self, Self::Error> {
        Ok(match raw {
            RawMicheline::Int { int } => Micheline::Int(
                int.parse()
                    .map_err(|_| MichelineError::Json(format!("invalid int {int:?}")))?,
            ),
            RawMicheline::String { string } => Micheline::String(string),
            RawMicheline::Bytes { bytes } => Micheline::Bytes(
                hex::decode(&bytes)
                    .map_err(|e| MichelineError::Json(format!("invalid bytes: {e}")))?,
            ),
            RawMicheline::Prim { prim, args, annots } => Micheline::Prim(Prim {
                name: prim,
                args,
                annots,
            }),
            RawMicheline::Seq(items) => Micheline::Seq(items),
        })
    }
}
