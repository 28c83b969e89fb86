//! Encodes storage records against a contract's declared storage type, and
//! decodes fetched storage back into records.
//!
//! Records are matched to the type by field annotation, so the same record
//! encodes correctly whatever pair layout the compiler chose for the
//! contract (right comb, balanced tree, ...).

use num_bigint::{BigInt, Sign};
use tezos_crypto_rs::base58::FromBase58Check;

use crate::micheline::{Micheline, MichelineError, Prim};

type Result<T> = std::result::Result<T, MichelineError>;

/// An untyped storage value. Types come from the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(BigInt),
    String(String),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Record(Vec<(String, Value)>),
}

impl Value {
    pub fn int(n: impl Into<BigInt>) -> Self {
        Value::Int(n.into())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn record<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Field names of a record, in order.
    pub fn field_names(&self) -> Vec<&str> {
        match self {
            Value::Record(fields) => fields.iter().map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// A record field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    fn kind(&self) -> String {
        match self {
            Value::Bool(b) => format!("bool {b}"),
            Value::Int(n) => format!("int {n}"),
            Value::String(s) => format!("string {s:?}"),
            Value::List(_) => "list".to_owned(),
            Value::Map(_) => "map".to_owned(),
            Value::Record(_) => "record".to_owned(),
        }
    }
}

/// Record fields consumed while walking a pair type.
struct Fields<'a> {
    fields: &'a [(String, Value)],
    used: Vec<bool>,
}

impl<'a> Fields<'a> {
    fn new(fields: &'a [(String, Value)]) -> Self {
        Self {
            fields,
            used: vec![false; fields.len()],
        }
    }

    fn take(&mut self, name: &str) -> Result<&'a Value> {
        let fields = self.fields;
        let index = fields
            .iter()
            .position(|(k, _)| k == name)
            .ok_or_else(|| MichelineError::MissingField(name.to_owned()))?;
        self.used[index] = true;
        Ok(&fields[index].1)
    }

    fn finish(self) -> Result<()> {
        match self.used.iter().position(|used| !used) {
            Some(index) => Err(MichelineError::UnexpectedField(
                self.fields[index].0.clone(),
            )),
            None => Ok(()),
        }
    }
}

/// Encodes `value` as Michelson data of type `ty`.
pub fn encode(ty: &Micheline, value: &Value) -> Result<Micheline> {
    let prim = ty.as_prim().ok_or_else(|| MichelineError::TypeMismatch {
        expected: "a type".to_owned(),
        found: ty.kind(),
    })?;
    let mismatch = || MichelineError::TypeMismatch {
        expected: ty.to_string(),
        found: value.kind(),
    };

    match (prim.name.as_str(), value) {
        ("pair", Value::Record(fields)) => {
            let mut fields = Fields::new(fields);
            let encoded = encode_fields(&prim.args, &mut fields)?;
            fields.finish()?;
            Ok(encoded)
        }
        ("list", Value::List(items)) => {
            let elem = type_arg(prim, 0)?;
            let items = items
                .iter()
                .map(|item| encode(elem, item))
                .collect::<Result<_>>()?;
            Ok(Micheline::Seq(items))
        }
        ("set", Value::List(items)) => {
            let elem = type_arg(prim, 0)?;
            let mut keyed = items
                .iter()
                .map(|item| Ok((sort_key(elem, item)?, encode(elem, item)?)))
                .collect::<Result<Vec<_>>>()?;
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            keyed.dedup_by(|a, b| a.0 == b.0);
            Ok(Micheline::Seq(keyed.into_iter().map(|(_, v)| v).collect()))
        }
        ("map" | "big_map", Value::Map(entries)) => {
            let key_ty = type_arg(prim, 0)?;
            let value_ty = type_arg(prim, 1)?;
            let mut keyed = entries
                .iter()
                .map(|(k, v)| {
                    Ok((
                        sort_key(key_ty, k)?,
                        Micheline::elt(encode(key_ty, k)?, encode(value_ty, v)?),
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(Micheline::Seq(keyed.into_iter().map(|(_, v)| v).collect()))
        }
        ("bool", Value::Bool(b)) => Ok(Micheline::prim(
            if *b { "True" } else { "False" },
            Vec::new(),
        )),
        ("nat" | "mutez", Value::Int(n)) if n.sign() != Sign::Minus => {
            Ok(Micheline::Int(n.clone()))
        }
        ("int" | "timestamp", Value::Int(n)) => Ok(Micheline::Int(n.clone())),
        ("string" | "timestamp" | "address" | "key_hash" | "contract", Value::String(s)) => {
            Ok(Micheline::String(s.clone()))
        }
        _ => Err(mismatch()),
    }
}

/// Walks the arguments of a pair type, encoding `pair a b c` as the right
/// comb `pair a (pair b c)`.
fn encode_fields(args: &[Micheline], fields: &mut Fields) -> Result<Micheline> {
    match args {
        [] => Err(MichelineError::TypeMismatch {
            expected: "pair arguments".to_owned(),
            found: "none".to_owned(),
        }),
        [last] => encode_field(last, fields),
        [first, rest @ ..] => Ok(Micheline::pair(
            encode_field(first, fields)?,
            encode_fields(rest, fields)?,
        )),
    }
}

fn encode_field(ty: &Micheline, fields: &mut Fields) -> Result<Micheline> {
    let prim = ty
        .as_prim()
        .ok_or_else(|| MichelineError::MissingAnnotation(ty.to_string()))?;
    match prim.field_annot() {
        Some(name) => encode(ty, fields.take(name)?),
        // unannotated pairs are layout nodes, their leaves belong to the
        // enclosing record
        None if prim.name == "pair" => encode_fields(&prim.args, fields),
        None => Err(MichelineError::MissingAnnotation(ty.to_string())),
    }
}

/// Decodes Michelson data of type `ty`. Annotated pair leaves become record
/// fields, and a `big_map` given by id decodes to that id.
pub fn decode(ty: &Micheline, data: &Micheline) -> Result<Value> {
    let prim = ty.as_prim().ok_or_else(|| MichelineError::TypeMismatch {
        expected: "a type".to_owned(),
        found: ty.kind(),
    })?;
    let mismatch = || MichelineError::TypeMismatch {
        expected: ty.to_string(),
        found: data.kind(),
    };

    match (prim.name.as_str(), data) {
        ("pair", _) => {
            let mut fields = Vec::new();
            decode_fields(&prim.args, data, &mut fields)?;
            Ok(Value::Record(fields))
        }
        ("list" | "set", Micheline::Seq(items)) => {
            let elem = type_arg(prim, 0)?;
            let items = items
                .iter()
                .map(|item| decode(elem, item))
                .collect::<Result<_>>()?;
            Ok(Value::List(items))
        }
        ("map" | "big_map", Micheline::Seq(entries)) => {
            let key_ty = type_arg(prim, 0)?;
            let value_ty = type_arg(prim, 1)?;
            let entries = entries
                .iter()
                .map(|entry| match entry.as_prim() {
                    Some(elt) if elt.name == "Elt" && elt.args.len() == 2 => {
                        Ok((decode(key_ty, &elt.args[0])?, decode(value_ty, &elt.args[1])?))
                    }
                    _ => Err(MichelineError::TypeMismatch {
                        expected: "Elt".to_owned(),
                        found: entry.kind(),
                    }),
                })
                .collect::<Result<_>>()?;
            Ok(Value::Map(entries))
        }
        ("big_map", Micheline::Int(id)) => Ok(Value::Int(id.clone())),
        ("bool", Micheline::Prim(b)) if b.args.is_empty() => match b.name.as_str() {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },
        ("nat" | "mutez" | "int" | "timestamp", Micheline::Int(n)) => Ok(Value::Int(n.clone())),
        ("string" | "timestamp" | "address" | "key_hash" | "contract", Micheline::String(s)) => {
            Ok(Value::String(s.clone()))
        }
        _ => Err(mismatch()),
    }
}

fn decode_fields(
    args: &[Micheline],
    data: &Micheline,
    out: &mut Vec<(String, Value)>,
) -> Result<()> {
    match args {
        [] => Err(MichelineError::TypeMismatch {
            expected: "pair arguments".to_owned(),
            found: "none".to_owned(),
        }),
        [last] => decode_field(last, data, out),
        [first, rest @ ..] => {
            let (head, tail) = split_pair(data)?;
            decode_field(first, &head, out)?;
            decode_fields(rest, &tail, out)
        }
    }
}

fn decode_field(ty: &Micheline, data: &Micheline, out: &mut Vec<(String, Value)>) -> Result<()> {
    let prim = ty
        .as_prim()
        .ok_or_else(|| MichelineError::MissingAnnotation(ty.to_string()))?;
    match prim.field_annot() {
        Some(name) => {
            out.push((name.to_owned(), decode(ty, data)?));
            Ok(())
        }
        None if prim.name == "pair" => decode_fields(&prim.args, data, out),
        None => Err(MichelineError::MissingAnnotation(ty.to_string())),
    }
}

/// Splits `Pair a b c` (or the sequence form `{ a ; b ; c }`) into `a` and
/// the comb of the rest.
fn split_pair(data: &Micheline) -> Result<(Micheline, Micheline)> {
    let items: &[Micheline] = match data {
        Micheline::Prim(prim) if prim.name == "Pair" => &prim.args,
        Micheline::Seq(items) => items,
        _ => &[],
    };
    match items {
        [head, tail] => Ok((head.clone(), tail.clone())),
        [head, rest @ ..] if rest.len() > 1 => {
            let rest = rest.to_vec();
            let tail = match data {
                Micheline::Seq(_) => Micheline::Seq(rest),
                _ => Micheline::prim("Pair", rest),
            };
            Ok((head.clone(), tail))
        }
        _ => Err(MichelineError::TypeMismatch {
            expected: "Pair".to_owned(),
            found: data.kind(),
        }),
    }
}

fn type_arg(prim: &Prim, index: usize) -> Result<&Micheline> {
    prim.args.get(index).ok_or_else(|| MichelineError::TypeMismatch {
        expected: format!("{} with {} type arguments", prim.name, index + 1),
        found: format!("{} arguments", prim.args.len()),
    })
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Int(BigInt),
    Bytes(Vec<u8>),
    Text(String),
}

/// Michelson orders set elements and map keys by value; addresses compare by
/// their binary form, implicit accounts first.
fn sort_key(ty: &Micheline, value: &Value) -> Result<SortKey> {
    let name = ty.as_prim().map(|p| p.name.as_str()).unwrap_or_default();
    Ok(match (name, value) {
        (_, Value::Int(n)) => SortKey::Int(n.clone()),
        (_, Value::Bool(b)) => SortKey::Int(BigInt::from(u8::from(*b))),
        ("address" | "key_hash", Value::String(s)) => {
            let decoded = s
                .from_base58check()
                .map_err(|_| MichelineError::InvalidAddress(s.clone()))?;
            let mut key = vec![u8::from(s.starts_with("KT1"))];
            key.extend(decoded);
            SortKey::Bytes(key)
        }
        (_, Value::String(s)) => SortKey::Text(s.clone()),
        (_, other) => SortKey::Text(encode(ty, other)?.to_string()),
    })
}
