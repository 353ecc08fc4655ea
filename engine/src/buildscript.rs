use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::args::{BoundParameters, CasterRegistry};
use crate::error::{EngineError, ExecError};
use crate::interp::{self, Capabilities, Outcome};
use crate::metadata::Metadata;
use crate::script::{parse_program, transform, Program};

/// A script that has been scanned, parsed and transformed, ready to bind and
/// run any number of times.
#[derive(Debug, Clone)]
pub struct BuildScript {
    source: String,
    metadata: Metadata,
    program: Program,
}

impl BuildScript {
    pub fn parse(source: impl Into<String>) -> Result<Self, EngineError> {
        let source = source.into();
        let metadata = Metadata::from_source(&source)?;
        let program = transform(parse_program(&source)?);
        debug!(
            dependencies = metadata.dependencies.len(),
            parameters = metadata.parameters.len(),
            statements = program.body.len(),
            "script.parsed"
        );
        Ok(Self {
            source,
            metadata,
            program,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let source = fs::read_to_string(path).map_err(|source| EngineError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(source)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The transformed program.
    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn bind(&self, raw: &BTreeMap<String, String>) -> Result<BoundParameters, EngineError> {
        self.bind_with(&CasterRegistry::builtin(), raw)
    }

    pub fn bind_with(
        &self,
        registry: &CasterRegistry,
        raw: &BTreeMap<String, String>,
    ) -> Result<BoundParameters, EngineError> {
        Ok(registry.bind(&self.metadata.parameters, raw)?)
    }

    pub fn execute(
        &self,
        params: &BoundParameters,
        caps: &Capabilities,
    ) -> Result<Outcome, ExecError> {
        interp::execute(&self.program, params, caps)
    }
}
