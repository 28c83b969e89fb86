use std::path::{Path, PathBuf};

use crate::{
    error::{DeployError, Result},
    micheline::{parse_script, Micheline, MichelineError},
};

/// A compiled contract, passed to the client unchanged apart from the
/// JSON to Michelson conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    source: PathBuf,
    code: String,
    parameter_type: Micheline,
    storage_type: Micheline,
}

impl Program {
    /// Loads `.json` files as Micheline JSON and anything else as Michelson
    /// source.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DeployError::Program(format!("failed to read {}: {e}", path.display()))
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            Self::from_json(&contents)
        } else {
            Self::from_michelson(&contents)
        };
        parsed
            .map(|program| Self {
                source: path.to_path_buf(),
                ..program
            })
            .map_err(|e| DeployError::Program(format!("{}: {e}", path.display())))
    }

    pub fn from_michelson(code: &str) -> std::result::Result<Self, MichelineError> {
        let sections = parse_script(code)?;
        Ok(Self {
            source: PathBuf::new(),
            code: code.to_owned(),
            parameter_type: section(&sections, "parameter")
                .ok_or(MichelineError::MissingParameterSection)?,
            storage_type: section(&sections, "storage")
                .ok_or(MichelineError::MissingStorageSection)?,
        })
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, MichelineError> {
        let sections: Vec<Micheline> =
            serde_json::from_str(json).map_err(|e| MichelineError::Json(e.to_string()))?;
        let parameter_type =
            section(&sections, "parameter").ok_or(MichelineError::MissingParameterSection)?;
        let storage_type =
            section(&sections, "storage").ok_or(MichelineError::MissingStorageSection)?;
        let code = sections
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ;\n");
        Ok(Self {
            source: PathBuf::new(),
            code: format!("{code} ;\n"),
            parameter_type,
            storage_type,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// The script in Michelson concrete syntax.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn storage_type(&self) -> &Micheline {
        &self.storage_type
    }

    pub fn parameter_type(&self) -> &Micheline {
        &self.parameter_type
    }

    /// Argument type of the entrypoint named `name`, found among the
    /// annotated branches of the parameter's `or` tree.
    pub fn entrypoint_type(&self, name: &str) -> std::result::Result<&Micheline, MichelineError> {
        find_entrypoint(&self.parameter_type, name)
            .or_else(|| (name == "default").then_some(&self.parameter_type))
            .ok_or_else(|| MichelineError::UnknownEntrypoint(name.to_owned()))
    }
}

fn section(sections: &[Micheline], name: &str) -> Option<Micheline> {
    sections
        .iter()
        .filter_map(Micheline::as_prim)
        .find(|prim| prim.name == name)
        .and_then(|prim| prim.args.first().cloned())
}

fn find_entrypoint<'a>(ty: &'a Micheline, name: &str) -> Option<&'a Micheline> {
    let prim = ty.as_prim()?;
    if prim.field_annot() == Some(name) {
        return Some(ty);
    }
    if prim.name != "or" {
        return None;
    }
    prim.args.iter().find_map(|arg| find_entrypoint(arg, name))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use tempfile::Builder;

    use super::*;

    const SCRIPT: &str = "parameter unit;\nstorage (pair (address %oracle_address) (mutez %query_price));\ncode { CDR ; NIL operation ; PAIR };\n";

    const JSON: &str = r#"[
        { "prim": "parameter", "args": [ { "prim": "unit" } ] },
        { "prim": "storage", "args": [ { "prim": "pair", "args": [
            { "prim": "address", "annots": [ "%oracle_address" ] },
            { "prim": "mutez", "annots": [ "%query_price" ] } ] } ] },
        { "prim": "code", "args": [ [
            { "prim": "CDR" },
            { "prim": "NIL", "args": [ { "prim": "operation" } ] },
            { "prim": "PAIR" } ] ] }
    ]"#;

    #[test]
    fn michelson_source_is_kept_verbatim() {
        let program = Program::from_michelson(SCRIPT).unwrap();
        assert_eq!(program.code(), SCRIPT);
        assert_eq!(
            program.storage_type().to_string(),
            "pair (address %oracle_address) (mutez %query_price)"
        );
    }

    #[test]
    fn json_is_rendered_as_michelson() {
        let program = Program::from_json(JSON).unwrap();
        assert_eq!(
            program.code(),
            "parameter unit ;\nstorage (pair (address %oracle_address) (mutez %query_price)) ;\ncode { CDR ; NIL operation ; PAIR } ;\n"
        );
        assert_eq!(
            program.storage_type(),
            Program::from_michelson(SCRIPT).unwrap().storage_type()
        );
    }

    #[test]
    fn missing_storage_section_is_rejected() {
        let err = Program::from_michelson("parameter unit; code { FAILWITH };").unwrap_err();
        assert_eq!(err, MichelineError::MissingStorageSection);
    }

    #[test]
    fn missing_parameter_section_is_rejected() {
        let err = Program::from_michelson("storage unit; code { FAILWITH };").unwrap_err();
        assert_eq!(err, MichelineError::MissingParameterSection);
    }

    #[test]
    fn finds_entrypoints_in_the_parameter_tree() {
        let program = Program::from_michelson(
            "parameter (or (or (unit %request_price) (nat %withdraw)) \
                           (pair %update (string %pair) (address %target)));\n\
             storage unit;\ncode { CDR ; NIL operation ; PAIR };\n",
        )
        .unwrap();
        assert_eq!(
            program.entrypoint_type("update").unwrap().to_string(),
            "pair %update (string %pair) (address %target)"
        );
        assert_eq!(
            program.entrypoint_type("withdraw").unwrap().to_string(),
            "nat %withdraw"
        );
        assert_eq!(
            program.entrypoint_type("default").unwrap(),
            program.parameter_type()
        );
        assert_eq!(
            program.entrypoint_type("pair").unwrap_err(),
            MichelineError::UnknownEntrypoint("pair".to_owned())
        );
    }

    #[test]
    fn load_picks_format_from_extension() {
        let mut json_file = Builder::new().suffix(".json").tempfile().unwrap();
        json_file.write_all(JSON.as_bytes()).unwrap();
        let program = Program::load(json_file.path()).unwrap();
        assert_eq!(program.source(), json_file.path());
        assert!(program.code().starts_with("parameter unit ;"));

        let mut tz_file = Builder::new().suffix(".tz").tempfile().unwrap();
        tz_file.write_all(SCRIPT.as_bytes()).unwrap();
        let program = Program::load(tz_file.path()).unwrap();
        assert_eq!(program.code(), SCRIPT);
    }

    #[test]
    fn load_reports_unreadable_files() {
        let err = Program::load(Path::new("/nonexistent/Oracle.json")).unwrap_err();
        assert!(
            matches!(&err, DeployError::Program(msg) if msg.contains("/nonexistent/Oracle.json"))
        );
    }
}
